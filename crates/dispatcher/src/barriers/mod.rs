//! Barriers - gating of per-destination delivery
//!
//! `BarrierManager` builds and publishes the scoped barrier set,
//! `BarrierCoordinator` folds it into one state per destination.

mod batching;
mod coordinator;
mod manager;

pub use batching::{BATCH_SIZE_KEY, BATCHING_BARRIER_ID, BatchingBarrier, BatchingBarrierFactory};
pub use coordinator::BarrierCoordinator;
pub use manager::BarrierManager;

use std::sync::Arc;
use tokio::sync::watch;

use contracts::{BarrierScope, ConfigurableBarrier, DataObject, Destination};

use crate::queue::QueueMetrics;

/// What a barrier factory can observe when creating a barrier
#[derive(Clone)]
pub struct BarrierContext {
    pub queue_metrics: Arc<dyn QueueMetrics>,
    pub destinations: watch::Receiver<Vec<Arc<dyn Destination>>>,
}

/// Creates a configuration-driven barrier
pub trait BarrierFactory: Send + Sync {
    /// Id of the created barrier, also the key of its settings entry
    fn id(&self) -> &str;

    /// Scopes used when the settings entry lists none.
    ///
    /// `None` means every destination; an empty list leaves the barrier
    /// inactive until settings scope it.
    fn default_scopes(&self) -> Option<Vec<BarrierScope>> {
        None
    }

    /// Configuration entries that override whatever settings provide
    fn enforced_settings(&self) -> DataObject {
        DataObject::new()
    }

    fn create(&self, context: &BarrierContext, configuration: &DataObject) -> Arc<dyn ConfigurableBarrier>;
}
