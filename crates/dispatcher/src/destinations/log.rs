//! LogDestination - logs batch summaries via tracing

use contracts::{Destination, Dispatch, DispatchCompletion};
use tracing::{info, instrument};

/// Destination that logs batches and completes them immediately
pub struct LogDestination {
    id: String,
    batch_limit: usize,
}

impl LogDestination {
    /// Create a new LogDestination with the given id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            batch_limit: 1,
        }
    }

    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit.max(1);
        self
    }

    fn log_batch_summary(&self, dispatches: &[Dispatch]) {
        let events: Vec<String> = dispatches.iter().map(Dispatch::log_description).collect();
        info!(
            destination = %self.id,
            count = dispatches.len(),
            events = ?events,
            "Batch received"
        );
    }
}

impl Destination for LogDestination {
    fn id(&self) -> &str {
        &self.id
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    #[instrument(
        name = "log_destination_dispatch",
        skip(self, dispatches, on_complete),
        fields(destination = %self.id, count = dispatches.len())
    )]
    fn dispatch(&self, dispatches: Vec<Dispatch>, on_complete: DispatchCompletion) {
        self.log_batch_summary(&dispatches);
        on_complete(dispatches);
    }
}
