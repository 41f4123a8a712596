//! Build condition: the reason a build should run.

use serde::{Deserialize, Serialize};

/// Why a build is requested.
///
/// The variants are declared weakest first so the derived `Ord` is the
/// priority order: `NoBuild < IfModificationExists < ForceBuild`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum BuildCondition {
    #[default]
    NoBuild,
    IfModificationExists,
    ForceBuild,
}

impl BuildCondition {
    /// Does this condition ask for any build at all?
    pub fn wants_build(self) -> bool {
        self != BuildCondition::NoBuild
    }

    /// The stronger of two conditions.
    pub fn strongest(self, other: BuildCondition) -> BuildCondition {
        self.max(other)
    }
}
