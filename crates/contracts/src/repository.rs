//! QueueRepository trait - durable per-destination dispatch store

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::{ContractError, Dispatch};

/// A dispatch removed by the repository's size or age limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedDispatch {
    pub id: String,
    /// Destinations that had not deleted it yet
    pub destinations: HashSet<String>,
}

/// Durable store of dispatches keyed by destination id.
///
/// A dispatch stays stored until every destination it was tagged with has
/// deleted it. Reads return dispatches oldest first and never return
/// expired entries.
pub trait QueueRepository: Send {
    /// Persist `dispatches` for every id in `destination_ids`.
    /// No-op when either argument is empty.
    fn store_dispatches(
        &mut self,
        dispatches: &[Dispatch],
        destination_ids: &HashSet<String>,
    ) -> Result<(), ContractError>;

    /// Up to `limit` oldest dispatches for the destination, skipping `exclude_ids`
    fn get_queued_dispatches(
        &mut self,
        limit: usize,
        exclude_ids: &HashSet<String>,
        destination_id: &str,
    ) -> Result<Vec<Dispatch>, ContractError>;

    /// Remove the given dispatch ids for one destination
    fn delete_dispatches(
        &mut self,
        dispatch_ids: &[String],
        destination_id: &str,
    ) -> Result<(), ContractError>;

    /// Remove everything queued for one destination
    fn delete_all_dispatches(&mut self, destination_id: &str) -> Result<(), ContractError>;

    /// Remove queues of every destination not in `keep`
    fn delete_queues(&mut self, keep: &HashSet<String>) -> Result<(), ContractError>;

    /// Change the maximum number of stored dispatches; `None` is unbounded.
    /// Oldest dispatches are evicted first.
    fn resize(&mut self, max_size: Option<usize>) -> Result<(), ContractError>;

    /// Change how long dispatches are kept
    fn set_expiration(&mut self, expiration: Duration) -> Result<(), ContractError>;

    /// Stored dispatch count per destination
    fn queue_size_by_destination(&mut self) -> Result<HashMap<String, usize>, ContractError>;

    /// Purge expired dispatches, then hand over everything evicted by size
    /// or age since the previous call
    fn take_evicted(&mut self) -> Result<Vec<EvictedDispatch>, ContractError>;
}
