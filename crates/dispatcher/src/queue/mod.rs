//! Durable per-destination queue, in-flight tracking and queue metrics

mod manager;
mod repository;

pub use manager::QueueManager;
pub use repository::{Clock, InMemoryQueueRepository};

use tokio::sync::watch;

/// Live queue depth observable per destination
pub trait QueueMetrics: Send + Sync {
    /// Stored minus in-flight dispatches for `destination_id`.
    ///
    /// The receiver only observes changes of the number itself.
    fn queue_size_pending_dispatch(&self, destination_id: &str) -> watch::Receiver<usize>;
}
