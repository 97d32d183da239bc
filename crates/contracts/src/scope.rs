//! Barrier and transformation scopes
//!
//! String forms: `"all"`, `"after_collectors"`, `"all_dispatchers"`; any
//! other text names a single destination.

use serde::{Deserialize, Serialize};
use std::fmt;

const ALL: &str = "all";
const AFTER_COLLECTORS: &str = "after_collectors";
const ALL_DISPATCHERS: &str = "all_dispatchers";

/// Where a barrier applies
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BarrierScope {
    All,
    Dispatcher(String),
}

impl BarrierScope {
    /// True if this scope covers the given destination
    pub fn covers(&self, destination_id: &str) -> bool {
        match self {
            BarrierScope::All => true,
            BarrierScope::Dispatcher(id) => id == destination_id,
        }
    }
}

impl From<&str> for BarrierScope {
    fn from(text: &str) -> Self {
        if text.eq_ignore_ascii_case(ALL) {
            BarrierScope::All
        } else {
            BarrierScope::Dispatcher(text.to_string())
        }
    }
}

impl From<String> for BarrierScope {
    fn from(text: String) -> Self {
        BarrierScope::from(text.as_str())
    }
}

impl From<BarrierScope> for String {
    fn from(scope: BarrierScope) -> Self {
        scope.to_string()
    }
}

impl fmt::Display for BarrierScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BarrierScope::All => f.write_str(ALL),
            BarrierScope::Dispatcher(id) => f.write_str(id),
        }
    }
}

/// Where a configured transformation applies
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransformationScope {
    AfterCollectors,
    AllDispatchers,
    Dispatcher(String),
}

impl TransformationScope {
    /// `AfterCollectors` matches only the after-collectors stage;
    /// `AllDispatchers` matches every destination stage; `Dispatcher(id)`
    /// matches the stage of that destination only.
    pub fn matches(&self, scope: &DispatchScope) -> bool {
        match (self, scope) {
            (TransformationScope::AfterCollectors, DispatchScope::AfterCollectors) => true,
            (TransformationScope::AllDispatchers, DispatchScope::Dispatcher(_)) => true,
            (TransformationScope::Dispatcher(id), DispatchScope::Dispatcher(target)) => id == target,
            _ => false,
        }
    }
}

impl From<&str> for TransformationScope {
    fn from(text: &str) -> Self {
        if text.eq_ignore_ascii_case(AFTER_COLLECTORS) {
            TransformationScope::AfterCollectors
        } else if text.eq_ignore_ascii_case(ALL_DISPATCHERS) {
            TransformationScope::AllDispatchers
        } else {
            TransformationScope::Dispatcher(text.to_string())
        }
    }
}

impl From<String> for TransformationScope {
    fn from(text: String) -> Self {
        TransformationScope::from(text.as_str())
    }
}

impl From<TransformationScope> for String {
    fn from(scope: TransformationScope) -> Self {
        scope.to_string()
    }
}

impl fmt::Display for TransformationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformationScope::AfterCollectors => f.write_str(AFTER_COLLECTORS),
            TransformationScope::AllDispatchers => f.write_str(ALL_DISPATCHERS),
            TransformationScope::Dispatcher(id) => f.write_str(id),
        }
    }
}

/// The pipeline stage a transformation is invoked for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DispatchScope {
    AfterCollectors,
    Dispatcher(String),
}

impl fmt::Display for DispatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchScope::AfterCollectors => f.write_str(AFTER_COLLECTORS),
            DispatchScope::Dispatcher(id) => write!(f, "dispatcher:{id}"),
        }
    }
}
