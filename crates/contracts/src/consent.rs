//! ConsentManager trait - optional consent collaborator

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::Dispatch;

/// Consent purpose reserved for the SDK platform itself
pub const PLATFORM_PURPOSE: &str = "tealium";

/// How a consent decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    /// Derived from defaults; the user has not chosen yet
    Implicit,
    /// Chosen by the user
    Explicit,
}

/// A consent decision and the purposes it grants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentDecision {
    pub decision_type: DecisionType,
    pub purposes: HashSet<String>,
}

impl ConsentDecision {
    pub fn new(decision_type: DecisionType, purposes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            decision_type,
            purposes: purposes.into_iter().map(Into::into).collect(),
        }
    }
}

/// Consent collaborator consulted by `track`
pub trait ConsentManager: Send + Sync {
    /// Current decision, `None` if none has been made
    fn consent_decision(&self) -> Option<ConsentDecision>;

    /// Apply consent side effects to an admitted dispatch
    fn apply_consent(&self, dispatch: Dispatch);

    /// Whether the decision allows the platform purpose
    fn platform_consented(&self, decision: &ConsentDecision) -> bool {
        decision.purposes.contains(PLATFORM_PURPOSE)
    }
}
