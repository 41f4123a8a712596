//! Strongly-typed identifiers.
//!
//! Identifiers are ULIDs wrapped in a phantom-typed `Id<T>`: sortable by
//! creation time, cheap to copy, and impossible to mix up across kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for each identifier kind.
pub trait IdMarker: Send + Sync + 'static {
    /// Prefix used by `Display` (e.g. "req-").
    fn prefix() -> &'static str;
}

/// Generic ULID-backed identifier.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// Fresh identifier for "now".
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Marker for integration requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Request {}

impl IdMarker for Request {
    fn prefix() -> &'static str {
        "req-"
    }
}

/// Marker for integration results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Integration {}

impl IdMarker for Integration {
    fn prefix() -> &'static str {
        "build-"
    }
}

/// Identifier of one triggering event (and of the queue item it becomes).
pub type RequestId = Id<Request>;

/// Identifier of one integration attempt.
pub type IntegrationId = Id<Integration>;
