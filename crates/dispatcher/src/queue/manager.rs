//! QueueManager - owns every queue mutation and publishes queue changes
//!
//! The repository and the in-flight map live behind one mutex, so dequeue,
//! delete and resize never interleave. After each access the repository's
//! evictions are released from in-flight tracking, and counters are
//! recomputed and only published when they change.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, instrument, warn};

use contracts::{ContractError, CoreSettings, Dispatch, QueueRepository};

use crate::error::DispatcherError;
use crate::queue::QueueMetrics;

/// Capacity of the enqueued / deleted notification channels
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Serialized access to the queue repository plus in-flight tracking
pub struct QueueManager {
    state: Mutex<QueueState>,
    enqueued_tx: broadcast::Sender<HashSet<String>>,
    deleted_tx: broadcast::Sender<String>,
}

struct QueueState {
    repository: Box<dyn QueueRepository>,
    /// Dispatch ids handed to each destination and not yet deleted
    in_flight: HashMap<String, HashSet<String>>,
    in_flight_tx: HashMap<String, watch::Sender<usize>>,
    pending_tx: HashMap<String, watch::Sender<usize>>,
}

impl QueueManager {
    pub fn new(repository: impl QueueRepository + 'static) -> Self {
        let (enqueued_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (deleted_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(QueueState {
                repository: Box::new(repository),
                in_flight: HashMap::new(),
                in_flight_tx: HashMap::new(),
                pending_tx: HashMap::new(),
            }),
            enqueued_tx,
            deleted_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist `dispatches` for every destination in `destination_ids`.
    ///
    /// No-op when either argument is empty. Emits the destination set on the
    /// enqueued stream.
    #[instrument(
        name = "queue_store_dispatches",
        skip(self, dispatches, destination_ids),
        fields(count = dispatches.len(), destinations = destination_ids.len())
    )]
    pub fn store_dispatches(
        &self,
        dispatches: &[Dispatch],
        destination_ids: &HashSet<String>,
    ) -> Result<(), DispatcherError> {
        if dispatches.is_empty() || destination_ids.is_empty() {
            return Ok(());
        }
        let purged = {
            let mut state = self.lock();
            state.repository.store_dispatches(dispatches, destination_ids)?;
            state.refresh()?
        };

        debug!("Dispatches stored");
        let _ = self.enqueued_tx.send(destination_ids.clone());
        self.notify_deleted(purged);
        Ok(())
    }

    /// Up to `limit` oldest dispatches for the destination that are not in
    /// flight yet; the returned dispatches become in flight.
    #[instrument(name = "queue_dequeue_dispatches", skip(self), fields(destination = %destination_id))]
    pub fn dequeue_dispatches(
        &self,
        limit: usize,
        destination_id: &str,
    ) -> Result<Vec<Dispatch>, DispatcherError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let (dispatches, purged) = {
            let mut state = self.lock();
            let exclude = state
                .in_flight
                .get(destination_id)
                .cloned()
                .unwrap_or_default();
            let dispatches = state
                .repository
                .get_queued_dispatches(limit, &exclude, destination_id)?;
            if !dispatches.is_empty() {
                state
                    .in_flight
                    .entry(destination_id.to_string())
                    .or_default()
                    .extend(dispatches.iter().map(|d| d.id().to_string()));
            }
            (dispatches, state.refresh()?)
        };
        self.notify_deleted(purged);
        Ok(dispatches)
    }

    /// Remove dispatches from the destination's queue and in-flight set.
    ///
    /// The in-flight entries are released even when the repository fails, so
    /// the dispatches stay deliverable.
    #[instrument(
        name = "queue_delete_dispatches",
        skip(self, dispatches),
        fields(destination = %destination_id, count = dispatches.len())
    )]
    pub fn delete_dispatches(
        &self,
        dispatches: &[Dispatch],
        destination_id: &str,
    ) -> Result<(), DispatcherError> {
        if dispatches.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = dispatches.iter().map(|d| d.id().to_string()).collect();
        let purged = {
            let mut state = self.lock();
            let result = state.repository.delete_dispatches(&ids, destination_id);
            if let Some(in_flight) = state.in_flight.get_mut(destination_id) {
                for id in &ids {
                    in_flight.remove(id);
                }
            }
            let purged = state.refresh();
            result?;
            purged?
        };

        let _ = self.deleted_tx.send(destination_id.to_string());
        self.notify_deleted(purged);
        Ok(())
    }

    /// Remove everything queued for the destination
    #[instrument(name = "queue_delete_all_dispatches", skip(self), fields(destination = %destination_id))]
    pub fn delete_all_dispatches(&self, destination_id: &str) -> Result<(), DispatcherError> {
        let purged = {
            let mut state = self.lock();
            state.repository.delete_all_dispatches(destination_id)?;
            state.in_flight.remove(destination_id);
            state.refresh()?
        };
        let _ = self.deleted_tx.send(destination_id.to_string());
        self.notify_deleted(purged);
        Ok(())
    }

    /// Drop queues and in-flight state of destinations not in `destinations`
    #[instrument(name = "queue_destinations_changed", skip(self, destinations), fields(count = destinations.len()))]
    pub fn on_destinations_changed(
        &self,
        destinations: &HashSet<String>,
    ) -> Result<(), DispatcherError> {
        let purged = {
            let mut state = self.lock();
            let stored = state.repository.queue_size_by_destination()?;
            state.repository.delete_queues(destinations)?;
            state.in_flight.retain(|id, _| destinations.contains(id));
            let mut purged = state.refresh()?;
            purged.extend(stored.into_keys().filter(|id| !destinations.contains(id)));
            purged
        };
        self.notify_deleted(purged);
        Ok(())
    }

    /// Apply size and expiry limits
    #[instrument(name = "queue_update_settings", skip(self, core))]
    pub fn update_settings(&self, core: &CoreSettings) -> Result<(), DispatcherError> {
        let purged = {
            let mut state = self.lock();
            state.repository.resize(core.max_queue_size)?;
            state.repository.set_expiration(core.expiration())?;
            state.refresh()?
        };
        self.notify_deleted(purged);
        Ok(())
    }

    /// Drop expired dispatches now rather than on the next queue access
    #[instrument(name = "queue_purge_expired", skip(self))]
    pub fn purge_expired(&self) -> Result<(), DispatcherError> {
        let purged = self.lock().refresh()?;
        self.notify_deleted(purged);
        Ok(())
    }

    /// Dispatches currently in flight for the destination
    pub fn in_flight_count(&self, destination_id: &str) -> usize {
        self.lock()
            .in_flight
            .get(destination_id)
            .map_or(0, HashSet::len)
    }

    /// Observable in-flight count for the destination
    pub fn subscribe_in_flight(&self, destination_id: &str) -> watch::Receiver<usize> {
        let mut state = self.lock();
        let count = state.in_flight.get(destination_id).map_or(0, HashSet::len);
        state
            .in_flight_tx
            .entry(destination_id.to_string())
            .or_insert_with(|| watch::channel(count).0)
            .subscribe()
    }

    /// Destination sets of every successful store
    pub fn subscribe_enqueued(&self) -> broadcast::Receiver<HashSet<String>> {
        self.enqueued_tx.subscribe()
    }

    /// Destination ids whose stored count went down
    pub fn subscribe_deleted(&self) -> broadcast::Receiver<String> {
        self.deleted_tx.subscribe()
    }

    fn notify_deleted(&self, destinations: HashSet<String>) {
        for destination in destinations {
            debug!(destination = %destination, "Queue purged");
            let _ = self.deleted_tx.send(destination);
        }
    }
}

impl QueueMetrics for QueueManager {
    fn queue_size_pending_dispatch(&self, destination_id: &str) -> watch::Receiver<usize> {
        let mut state = self.lock();
        if let Some(tx) = state.pending_tx.get(destination_id) {
            return tx.subscribe();
        }
        let stored = match state.repository.queue_size_by_destination() {
            Ok(sizes) => sizes.get(destination_id).copied().unwrap_or(0),
            Err(e) => {
                warn!(destination = %destination_id, error = %e, "Failed to read queue size");
                0
            }
        };
        let in_flight = state.in_flight.get(destination_id).map_or(0, HashSet::len);
        let (tx, rx) = watch::channel(stored.saturating_sub(in_flight));
        state.pending_tx.insert(destination_id.to_string(), tx);
        rx
    }
}

impl QueueState {
    /// Release evicted dispatches from in-flight tracking and republish the
    /// counters; returns the destinations that lost dispatches to eviction
    fn refresh(&mut self) -> Result<HashSet<String>, ContractError> {
        let evicted = self.repository.take_evicted()?;
        let mut purged = HashSet::new();
        for dispatch in evicted {
            for destination in dispatch.destinations {
                if let Some(ids) = self.in_flight.get_mut(&destination) {
                    ids.remove(&dispatch.id);
                }
                purged.insert(destination);
            }
        }
        let sizes = self.repository.queue_size_by_destination()?;
        self.publish(&sizes);
        Ok(purged)
    }

    /// Recompute in-flight and pending counters of every known destination
    fn publish(&mut self, sizes: &HashMap<String, usize>) {
        let destinations: HashSet<String> = sizes
            .keys()
            .chain(self.in_flight.keys())
            .chain(self.pending_tx.keys())
            .chain(self.in_flight_tx.keys())
            .cloned()
            .collect();

        for destination in destinations {
            let stored = sizes.get(&destination).copied().unwrap_or(0);
            let in_flight = self.in_flight.get(&destination).map_or(0, HashSet::len);
            let pending = stored.saturating_sub(in_flight);

            let pending_tx = self
                .pending_tx
                .entry(destination.clone())
                .or_insert_with(|| watch::channel(pending).0);
            if set_if_changed(pending_tx, pending) {
                observability::record_pending_dispatches(&destination, pending);
            }
            if let Some(in_flight_tx) = self.in_flight_tx.get(&destination) {
                set_if_changed(in_flight_tx, in_flight);
            }
        }
    }
}

fn set_if_changed(tx: &watch::Sender<usize>, value: usize) -> bool {
    tx.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueueRepository;
    use contracts::{DataObject, DispatchType, EvictedDispatch};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    fn make_dispatches(count: usize) -> Vec<Dispatch> {
        (0..count)
            .map(|i| Dispatch::new(format!("event_{i}"), DispatchType::Event, DataObject::new()))
            .collect()
    }

    fn destinations(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn manager() -> QueueManager {
        QueueManager::new(InMemoryQueueRepository::new(None, Duration::from_secs(3600)))
    }

    #[test]
    fn test_store_then_dequeue_returns_all_in_order() {
        let queue = manager();
        let dispatches = make_dispatches(4);
        queue
            .store_dispatches(&dispatches, &destinations(&["a", "b"]))
            .unwrap();

        assert_eq!(queue.dequeue_dispatches(4, "a").unwrap(), dispatches);
        assert_eq!(queue.dequeue_dispatches(4, "b").unwrap(), dispatches);
    }

    #[test]
    fn test_dequeue_skips_in_flight() {
        let queue = manager();
        let dispatches = make_dispatches(3);
        queue.store_dispatches(&dispatches, &destinations(&["a"])).unwrap();

        assert_eq!(queue.dequeue_dispatches(2, "a").unwrap(), dispatches[..2]);
        assert_eq!(queue.in_flight_count("a"), 2);
        assert_eq!(queue.dequeue_dispatches(2, "a").unwrap(), dispatches[2..]);
        assert!(queue.dequeue_dispatches(2, "a").unwrap().is_empty());
        assert_eq!(queue.in_flight_count("a"), 3);
    }

    #[test]
    fn test_pending_metric_is_distinct() {
        let queue = manager();
        let mut pending = queue.queue_size_pending_dispatch("a");
        assert_eq!(*pending.borrow_and_update(), 0);

        queue.store_dispatches(&make_dispatches(1), &destinations(&["a"])).unwrap();
        assert!(pending.has_changed().unwrap());
        assert_eq!(*pending.borrow_and_update(), 1);

        queue.dequeue_dispatches(1, "a").unwrap();
        assert!(pending.has_changed().unwrap());
        assert_eq!(*pending.borrow_and_update(), 0);

        assert!(queue.dequeue_dispatches(1, "a").unwrap().is_empty());
        assert!(!pending.has_changed().unwrap());
    }

    #[test]
    fn test_delete_releases_in_flight_and_notifies() {
        let queue = manager();
        let mut deleted = queue.subscribe_deleted();
        let mut in_flight = queue.subscribe_in_flight("a");
        let dispatches = make_dispatches(2);
        queue.store_dispatches(&dispatches, &destinations(&["a"])).unwrap();

        let batch = queue.dequeue_dispatches(2, "a").unwrap();
        assert_eq!(*in_flight.borrow_and_update(), 2);

        queue.delete_dispatches(&batch, "a").unwrap();
        assert_eq!(*in_flight.borrow_and_update(), 0);
        assert_eq!(deleted.try_recv().unwrap(), "a");
        assert!(queue.dequeue_dispatches(2, "a").unwrap().is_empty());
    }

    #[test]
    fn test_enqueued_notification_carries_destinations() {
        let queue = manager();
        let mut enqueued = queue.subscribe_enqueued();
        queue.store_dispatches(&make_dispatches(1), &destinations(&["a", "b"])).unwrap();
        assert_eq!(enqueued.try_recv().unwrap(), destinations(&["a", "b"]));

        queue.store_dispatches(&[], &destinations(&["a"])).unwrap();
        assert!(enqueued.try_recv().is_err());
    }

    #[test]
    fn test_destination_removal_clears_state() {
        let queue = manager();
        let mut deleted = queue.subscribe_deleted();
        queue.store_dispatches(&make_dispatches(3), &destinations(&["a", "b"])).unwrap();
        queue.dequeue_dispatches(1, "a").unwrap();
        let pending_a = queue.queue_size_pending_dispatch("a");

        queue.on_destinations_changed(&destinations(&["b"])).unwrap();

        assert_eq!(queue.in_flight_count("a"), 0);
        assert_eq!(*pending_a.borrow(), 0);
        assert_eq!(deleted.try_recv().unwrap(), "a");
        assert_eq!(queue.dequeue_dispatches(10, "b").unwrap().len(), 3);
    }

    #[test]
    fn test_resize_prunes_in_flight() {
        let queue = manager();
        let mut deleted = queue.subscribe_deleted();
        let dispatches = make_dispatches(5);
        queue.store_dispatches(&dispatches, &destinations(&["a"])).unwrap();
        queue.dequeue_dispatches(2, "a").unwrap();

        let core = CoreSettings {
            max_queue_size: Some(2),
            ..CoreSettings::default()
        };
        queue.update_settings(&core).unwrap();

        assert_eq!(queue.in_flight_count("a"), 0);
        assert_eq!(*queue.queue_size_pending_dispatch("a").borrow(), 2);
        assert_eq!(deleted.try_recv().unwrap(), "a");
        assert_eq!(queue.dequeue_dispatches(5, "a").unwrap(), dispatches[3..]);
    }

    #[test]
    fn test_expiry_on_read_releases_in_flight_and_notifies() {
        let now = Arc::new(AtomicI64::new(chrono::Utc::now().timestamp_millis()));
        let clock = Arc::clone(&now);
        let queue = QueueManager::new(
            InMemoryQueueRepository::new(None, Duration::from_secs(60))
                .with_clock(move || clock.load(Ordering::Relaxed)),
        );
        let mut deleted = queue.subscribe_deleted();
        let mut in_flight = queue.subscribe_in_flight("a");
        queue.store_dispatches(&make_dispatches(3), &destinations(&["a", "b"])).unwrap();
        queue.dequeue_dispatches(1, "a").unwrap();
        let mut pending_a = queue.queue_size_pending_dispatch("a");
        let mut pending_b = queue.queue_size_pending_dispatch("b");
        assert_eq!(*pending_a.borrow_and_update(), 2);
        assert_eq!(*in_flight.borrow_and_update(), 1);

        now.fetch_add(61_000, Ordering::Relaxed);
        assert!(queue.dequeue_dispatches(5, "a").unwrap().is_empty());

        assert_eq!(*pending_a.borrow_and_update(), 0);
        assert_eq!(*pending_b.borrow_and_update(), 0);
        assert_eq!(*in_flight.borrow_and_update(), 0);
        assert_eq!(queue.in_flight_count("a"), 0);
        let mut notified = vec![deleted.try_recv().unwrap(), deleted.try_recv().unwrap()];
        notified.sort();
        assert_eq!(notified, vec!["a", "b"]);
    }

    #[test]
    fn test_purge_expired_publishes_without_reads() {
        let now = Arc::new(AtomicI64::new(chrono::Utc::now().timestamp_millis()));
        let clock = Arc::clone(&now);
        let queue = QueueManager::new(
            InMemoryQueueRepository::new(None, Duration::from_secs(60))
                .with_clock(move || clock.load(Ordering::Relaxed)),
        );
        let mut deleted = queue.subscribe_deleted();
        queue.store_dispatches(&make_dispatches(2), &destinations(&["a"])).unwrap();
        let pending = queue.queue_size_pending_dispatch("a");

        queue.purge_expired().unwrap();
        assert_eq!(*pending.borrow(), 2);
        assert!(deleted.try_recv().is_err());

        now.fetch_add(61_000, Ordering::Relaxed);
        queue.purge_expired().unwrap();
        assert_eq!(*pending.borrow(), 0);
        assert_eq!(deleted.try_recv().unwrap(), "a");
    }

    struct FailingDeletes(InMemoryQueueRepository);

    impl QueueRepository for FailingDeletes {
        fn store_dispatches(
            &mut self,
            dispatches: &[Dispatch],
            destination_ids: &HashSet<String>,
        ) -> Result<(), ContractError> {
            self.0.store_dispatches(dispatches, destination_ids)
        }

        fn get_queued_dispatches(
            &mut self,
            limit: usize,
            exclude_ids: &HashSet<String>,
            destination_id: &str,
        ) -> Result<Vec<Dispatch>, ContractError> {
            self.0.get_queued_dispatches(limit, exclude_ids, destination_id)
        }

        fn delete_dispatches(&mut self, _: &[String], _: &str) -> Result<(), ContractError> {
            Err(ContractError::persistence("delete", "disk full"))
        }

        fn delete_all_dispatches(&mut self, _: &str) -> Result<(), ContractError> {
            Err(ContractError::persistence("delete_all", "disk full"))
        }

        fn delete_queues(&mut self, keep: &HashSet<String>) -> Result<(), ContractError> {
            self.0.delete_queues(keep)
        }

        fn resize(&mut self, max_size: Option<usize>) -> Result<(), ContractError> {
            self.0.resize(max_size)
        }

        fn set_expiration(&mut self, expiration: Duration) -> Result<(), ContractError> {
            self.0.set_expiration(expiration)
        }

        fn queue_size_by_destination(&mut self) -> Result<HashMap<String, usize>, ContractError> {
            self.0.queue_size_by_destination()
        }

        fn take_evicted(&mut self) -> Result<Vec<EvictedDispatch>, ContractError> {
            self.0.take_evicted()
        }
    }

    #[test]
    fn test_failed_delete_keeps_state_consistent() {
        let queue = QueueManager::new(FailingDeletes(InMemoryQueueRepository::default()));
        let dispatches = make_dispatches(2);
        queue.store_dispatches(&dispatches, &destinations(&["a"])).unwrap();
        let batch = queue.dequeue_dispatches(2, "a").unwrap();

        let result = queue.delete_dispatches(&batch, "a");
        assert!(matches!(result, Err(DispatcherError::Contract(_))));
        assert_eq!(queue.in_flight_count("a"), 0);
        assert_eq!(*queue.queue_size_pending_dispatch("a").borrow(), 2);

        assert!(queue.delete_all_dispatches("a").is_err());
        assert_eq!(queue.dequeue_dispatches(5, "a").unwrap(), dispatches);
    }
}
