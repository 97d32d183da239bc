//! Barrier contracts - gating conditions for delivery

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::{BarrierScope, DataObject};

/// Gate state reported by a barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierState {
    Open,
    Closed,
}

impl fmt::Display for BarrierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BarrierState::Open => f.write_str("open"),
            BarrierState::Closed => f.write_str("closed"),
        }
    }
}

/// A named gate that can halt delivery to destinations.
///
/// Implementations publish their state through a `watch` channel; the
/// receiver returned by `on_state` must always hold the current state.
pub trait Barrier: Send + Sync {
    /// Stable barrier id
    fn id(&self) -> &str;

    /// Observable state as seen by one destination
    fn on_state(&self, destination_id: &str) -> watch::Receiver<BarrierState>;

    /// State for one destination right now, without waiting for the
    /// `on_state` receiver to catch up
    fn state(&self, destination_id: &str) -> BarrierState {
        *self.on_state(destination_id).borrow()
    }

    /// Whether a flush request may bypass this barrier
    fn is_flushable(&self) -> bool {
        true
    }
}

/// A barrier created from settings; receives configuration updates
pub trait ConfigurableBarrier: Barrier {
    fn update_configuration(&self, configuration: &DataObject);
}

/// A barrier together with the destinations it applies to
#[derive(Clone)]
pub struct ScopedBarrier {
    pub barrier: Arc<dyn Barrier>,
    pub scopes: HashSet<BarrierScope>,
}

impl ScopedBarrier {
    pub fn new(barrier: Arc<dyn Barrier>, scopes: impl IntoIterator<Item = BarrierScope>) -> Self {
        Self {
            barrier,
            scopes: scopes.into_iter().collect(),
        }
    }

    pub fn id(&self) -> &str {
        self.barrier.id()
    }

    /// True if any scope covers the destination
    pub fn applies_to(&self, destination_id: &str) -> bool {
        self.scopes.iter().any(|scope| scope.covers(destination_id))
    }
}

impl fmt::Debug for ScopedBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedBarrier")
            .field("id", &self.barrier.id())
            .field("scopes", &self.scopes)
            .finish()
    }
}
