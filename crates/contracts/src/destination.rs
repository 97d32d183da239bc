//! Destination trait - delivery output interface

use crate::Dispatch;

/// Completion callback for a delivery attempt.
///
/// Receives the dispatches that were attempted; the caller deletes them from
/// the queue.
pub type DispatchCompletion = Box<dyn FnOnce(Vec<Dispatch>) + Send>;

/// A registered consumer of dispatch batches
///
/// Delivery is asynchronous: `dispatch` must return promptly and invoke
/// `on_complete` later, from any thread or task. Failures are the
/// destination's own concern; dispatches it does not report back stay queued.
pub trait Destination: Send + Sync {
    /// Stable destination id
    fn id(&self) -> &str;

    /// Maximum number of dispatches per batch
    fn batch_limit(&self) -> usize;

    /// Deliver a non-empty, ordered batch
    fn dispatch(&self, dispatches: Vec<Dispatch>, on_complete: DispatchCompletion);
}
