//! SDK settings contracts that can be shared across crates.
//!
//! Settings are distributed live as `watch::Receiver<SdkSettings>`; every
//! section defaults so partial documents load.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::{BarrierScope, Condition, DataObject, MappingOperation, Rule, TransformationSettings};

/// Root settings document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkSettings {
    /// Queue and delivery-loop limits
    pub core: CoreSettings,

    /// Barrier settings by barrier id
    pub barriers: HashMap<String, BarrierSettings>,

    /// Transformations, in registration order
    pub transformations: Vec<TransformationSettings>,

    /// Named condition trees referenced by destination rules
    pub load_rules: HashMap<String, Rule<Condition>>,

    /// Per-destination rules and mappings by destination id
    pub destinations: HashMap<String, DestinationSettings>,
}

/// Queue and delivery-loop limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreSettings {
    /// Maximum number of stored dispatches, `None` for unbounded
    pub max_queue_size: Option<usize>,
    /// How long a stored dispatch is kept, in seconds
    pub expiration_secs: u64,
    /// Maximum dispatches handed to one destination and not yet completed
    pub max_in_flight_per_destination: usize,
}

impl CoreSettings {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            max_queue_size: Some(100),
            expiration_secs: 86_400,
            max_in_flight_per_destination: 50,
        }
    }
}

/// Settings for one barrier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarrierSettings {
    /// Passed to the barrier on creation and on every update
    pub configuration: DataObject,
    /// Overrides the factory's default scopes when non-empty
    pub scopes: Vec<BarrierScope>,
}

/// Settings for one destination
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationSettings {
    /// Load rule tree over named rule ids; `None` accepts everything
    pub rules: Option<Rule<String>>,
    /// Field mappings; `None` passes payloads through unchanged
    pub mappings: Option<Vec<MappingOperation>>,
}
