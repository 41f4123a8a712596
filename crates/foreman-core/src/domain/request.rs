//! Integration request: one triggering event.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::condition::BuildCondition;
use super::ids::RequestId;

/// An immutable request for an integration.
///
/// Created once per triggering event (trigger decision, force build, remote
/// request) and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationRequest {
    id: RequestId,
    condition: BuildCondition,
    source: String,
    user: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    parameters: BTreeMap<String, String>,
    requested_at: DateTime<Utc>,
}

impl IntegrationRequest {
    pub fn new(condition: BuildCondition, source: impl Into<String>) -> Self {
        Self {
            id: RequestId::generate(),
            condition,
            source: source.into(),
            user: None,
            parameters: BTreeMap::new(),
            requested_at: Utc::now(),
        }
    }

    /// A forced build requested by `enforcer`.
    pub fn force(enforcer: impl Into<String>, parameters: BTreeMap<String, String>) -> Self {
        let enforcer = enforcer.into();
        Self::new(BuildCondition::ForceBuild, enforcer.clone())
            .with_user(enforcer)
            .with_parameters(parameters)
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_requested_at(mut self, at: DateTime<Utc>) -> Self {
        self.requested_at = at;
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn condition(&self) -> BuildCondition {
        self.condition
    }

    /// Trigger name or external caller that produced the request.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }
}
