//! In-memory queue repository with size and age eviction.
//!
//! Uses index-based separation:
//! - `Slab` stores the entries (dispatch plus pending destinations)
//! - `order` maps insertion sequence to slab key, oldest first
//! - `by_id` maps dispatch id to slab key
//! - `by_age` orders entries by timestamp for expiry
//!
//! Deleting or evicting one dispatch touches only its own index entries;
//! stored dispatches are never moved.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use contracts::{ContractError, Dispatch, EvictedDispatch, QueueRepository};
use slab::Slab;

/// Millisecond clock used for expiry
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

#[derive(Debug, Clone)]
struct Entry {
    /// Insertion sequence, key into `order`
    seq: u64,
    dispatch: Dispatch,
    /// Destinations that have not deleted this dispatch yet
    destinations: HashSet<String>,
}

/// Reference `QueueRepository` kept in process memory
pub struct InMemoryQueueRepository {
    entries: Slab<Entry>,
    order: BTreeMap<u64, usize>,
    by_id: HashMap<String, usize>,
    /// (timestamp, seq) of every entry
    by_age: BTreeSet<(i64, u64)>,
    next_seq: u64,
    max_size: Option<usize>,
    expiration: Duration,
    clock: Clock,
    evicted_count: u64,
    /// Evictions not yet handed out by `take_evicted`
    evicted: Vec<EvictedDispatch>,
}

impl fmt::Debug for InMemoryQueueRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryQueueRepository")
            .field("len", &self.entries.len())
            .field("max_size", &self.max_size)
            .field("expiration", &self.expiration)
            .field("evicted", &self.evicted_count)
            .finish()
    }
}

impl Default for InMemoryQueueRepository {
    fn default() -> Self {
        Self::new(Some(100), Duration::from_secs(86_400))
    }
}

impl InMemoryQueueRepository {
    /// Create a repository; `max_size` of `None` is unbounded
    pub fn new(max_size: Option<usize>, expiration: Duration) -> Self {
        Self {
            entries: Slab::new(),
            order: BTreeMap::new(),
            by_id: HashMap::new(),
            by_age: BTreeSet::new(),
            next_seq: 0,
            max_size,
            expiration,
            clock: Arc::new(|| chrono::Utc::now().timestamp_millis()),
            evicted_count: 0,
            evicted: Vec::new(),
        }
    }

    /// Replace the expiry clock
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Number of stored dispatches
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dispatches removed by size or age limits
    pub fn evicted_count(&self) -> u64 {
        self.evicted_count
    }

    fn insert(&mut self, dispatch: &Dispatch, destinations: HashSet<String>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let key = self.entries.insert(Entry {
            seq,
            dispatch: dispatch.clone(),
            destinations,
        });
        self.order.insert(seq, key);
        self.by_id.insert(dispatch.id().to_string(), key);
        self.by_age.insert((dispatch.timestamp(), seq));
    }

    fn remove(&mut self, key: usize) -> Option<Entry> {
        let entry = self.entries.try_remove(key)?;
        self.order.remove(&entry.seq);
        self.by_id.remove(entry.dispatch.id());
        self.by_age.remove(&(entry.dispatch.timestamp(), entry.seq));
        Some(entry)
    }

    fn evict(&mut self, key: usize) {
        if let Some(entry) = self.remove(key) {
            self.evicted_count += 1;
            self.evicted.push(EvictedDispatch {
                id: entry.dispatch.id().to_string(),
                destinations: entry.destinations,
            });
        }
    }

    fn purge_expired(&mut self, expiration: Duration) {
        let age = i64::try_from(expiration.as_millis()).unwrap_or(i64::MAX);
        let cutoff = (self.clock)().saturating_sub(age);
        while let Some(&(timestamp, seq)) = self.by_age.first() {
            if timestamp >= cutoff {
                break;
            }
            match self.order.get(&seq).copied() {
                Some(key) => self.evict(key),
                None => {
                    self.by_age.remove(&(timestamp, seq));
                }
            }
        }
    }

    /// Drop oldest entries until at most `max` remain
    fn evict_oldest_to(&mut self, max: usize) {
        while self.entries.len() > max {
            let Some(&key) = self.order.values().next() else {
                break;
            };
            self.evict(key);
        }
    }

    /// Remove `destination_id` from one entry, freeing it once no destination is left
    fn release(&mut self, key: usize, destination_id: &str) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        entry.destinations.remove(destination_id);
        if entry.destinations.is_empty() {
            self.remove(key);
        }
    }

    /// Keep only the destinations accepted by `keep` on every entry
    fn retain_destinations(&mut self, mut keep: impl FnMut(&str) -> bool) {
        let emptied: Vec<usize> = self
            .entries
            .iter_mut()
            .filter_map(|(key, entry)| {
                entry.destinations.retain(|d| keep(d.as_str()));
                entry.destinations.is_empty().then_some(key)
            })
            .collect();
        for key in emptied {
            self.remove(key);
        }
    }
}

impl QueueRepository for InMemoryQueueRepository {
    fn store_dispatches(
        &mut self,
        dispatches: &[Dispatch],
        destination_ids: &HashSet<String>,
    ) -> Result<(), ContractError> {
        if dispatches.is_empty() || destination_ids.is_empty() {
            return Ok(());
        }
        self.purge_expired(self.expiration);

        // only the newest `max` of an oversized batch can survive
        let batch = match self.max_size {
            Some(max) if dispatches.len() > max => &dispatches[dispatches.len() - max..],
            _ => dispatches,
        };

        for dispatch in batch {
            if let Some(&key) = self.by_id.get(dispatch.id()) {
                if let Some(entry) = self.entries.get_mut(key) {
                    self.by_age.remove(&(entry.dispatch.timestamp(), entry.seq));
                    self.by_age.insert((dispatch.timestamp(), entry.seq));
                    entry.dispatch = dispatch.clone();
                    entry.destinations.extend(destination_ids.iter().cloned());
                }
                continue;
            }

            if let Some(max) = self.max_size {
                if max == 0 {
                    continue;
                }
                self.evict_oldest_to(max - 1);
            }
            self.insert(dispatch, destination_ids.clone());
        }
        Ok(())
    }

    fn get_queued_dispatches(
        &mut self,
        limit: usize,
        exclude_ids: &HashSet<String>,
        destination_id: &str,
    ) -> Result<Vec<Dispatch>, ContractError> {
        self.purge_expired(self.expiration);
        Ok(self
            .order
            .values()
            .filter_map(|&key| self.entries.get(key))
            .filter(|entry| {
                entry.destinations.contains(destination_id)
                    && !exclude_ids.contains(entry.dispatch.id())
            })
            .take(limit)
            .map(|entry| entry.dispatch.clone())
            .collect())
    }

    fn delete_dispatches(
        &mut self,
        dispatch_ids: &[String],
        destination_id: &str,
    ) -> Result<(), ContractError> {
        for id in dispatch_ids {
            if let Some(&key) = self.by_id.get(id) {
                self.release(key, destination_id);
            }
        }
        Ok(())
    }

    fn delete_all_dispatches(&mut self, destination_id: &str) -> Result<(), ContractError> {
        self.retain_destinations(|d| d != destination_id);
        Ok(())
    }

    fn delete_queues(&mut self, keep: &HashSet<String>) -> Result<(), ContractError> {
        self.retain_destinations(|d| keep.contains(d));
        Ok(())
    }

    fn resize(&mut self, max_size: Option<usize>) -> Result<(), ContractError> {
        self.max_size = max_size;
        if let Some(max) = max_size {
            self.evict_oldest_to(max);
        }
        Ok(())
    }

    fn set_expiration(&mut self, expiration: Duration) -> Result<(), ContractError> {
        self.purge_expired(self.expiration.min(expiration));
        self.expiration = expiration;
        Ok(())
    }

    fn queue_size_by_destination(&mut self) -> Result<HashMap<String, usize>, ContractError> {
        self.purge_expired(self.expiration);
        let mut sizes = HashMap::new();
        for (_, entry) in &self.entries {
            for destination in &entry.destinations {
                *sizes.entry(destination.clone()).or_insert(0) += 1;
            }
        }
        Ok(sizes)
    }

    fn take_evicted(&mut self) -> Result<Vec<EvictedDispatch>, ContractError> {
        self.purge_expired(self.expiration);
        Ok(std::mem::take(&mut self.evicted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{DataObject, DispatchType};
    use std::sync::atomic::{AtomicI64, Ordering};

    fn make_dispatch(id: &str, timestamp: i64) -> Dispatch {
        Dispatch::restore(id, DispatchType::Event, timestamp, DataObject::new())
    }

    fn destinations(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn ids(dispatches: &[Dispatch]) -> Vec<&str> {
        dispatches.iter().map(Dispatch::id).collect()
    }

    fn repository(max: Option<usize>) -> (InMemoryQueueRepository, Arc<AtomicI64>) {
        let now = Arc::new(AtomicI64::new(1_000_000));
        let clock = Arc::clone(&now);
        let repo = InMemoryQueueRepository::new(max, Duration::from_secs(60))
            .with_clock(move || clock.load(Ordering::Relaxed));
        (repo, now)
    }

    #[test]
    fn test_store_and_read_in_order() {
        let (mut repo, _) = repository(None);
        let batch = vec![
            make_dispatch("a", 1_000_000),
            make_dispatch("b", 1_000_000),
            make_dispatch("c", 1_000_000),
        ];
        repo.store_dispatches(&batch, &destinations(&["x", "y"])).unwrap();

        let read = repo.get_queued_dispatches(10, &HashSet::new(), "x").unwrap();
        assert_eq!(read, batch);
        let read = repo.get_queued_dispatches(2, &destinations(&["a"]), "y").unwrap();
        assert_eq!(ids(&read), vec!["b", "c"]);
        assert!(repo.get_queued_dispatches(10, &HashSet::new(), "z").unwrap().is_empty());
    }

    #[test]
    fn test_store_noop_on_empty_arguments() {
        let (mut repo, _) = repository(None);
        repo.store_dispatches(&[], &destinations(&["x"])).unwrap();
        repo.store_dispatches(&[make_dispatch("a", 1_000_000)], &HashSet::new()).unwrap();
        assert!(repo.is_empty());
    }

    #[test]
    fn test_delete_is_per_destination() {
        let (mut repo, _) = repository(None);
        repo.store_dispatches(&[make_dispatch("a", 1_000_000)], &destinations(&["x", "y"]))
            .unwrap();

        repo.delete_dispatches(&["a".to_string()], "x").unwrap();
        assert!(repo.get_queued_dispatches(10, &HashSet::new(), "x").unwrap().is_empty());
        assert_eq!(repo.len(), 1);

        repo.delete_all_dispatches("y").unwrap();
        assert!(repo.is_empty());
        assert!(repo.by_id.is_empty());
        assert!(repo.order.is_empty());
    }

    #[test]
    fn test_max_size_evicts_oldest() {
        let (mut repo, _) = repository(Some(2));
        for id in ["a", "b", "c"] {
            repo.store_dispatches(&[make_dispatch(id, 1_000_000)], &destinations(&["x"]))
                .unwrap();
        }
        let read = repo.get_queued_dispatches(10, &HashSet::new(), "x").unwrap();
        assert_eq!(ids(&read), vec!["b", "c"]);
        assert_eq!(repo.evicted_count(), 1);
    }

    #[test]
    fn test_oversized_batch_keeps_newest() {
        let (mut repo, _) = repository(Some(2));
        let batch: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|id| make_dispatch(id, 1_000_000))
            .collect();
        repo.store_dispatches(&batch, &destinations(&["x"])).unwrap();
        let read = repo.get_queued_dispatches(10, &HashSet::new(), "x").unwrap();
        assert_eq!(ids(&read), vec!["c", "d"]);
    }

    #[test]
    fn test_store_existing_id_replaces_in_place() {
        let (mut repo, _) = repository(None);
        repo.store_dispatches(
            &[make_dispatch("a", 1_000_000), make_dispatch("b", 1_000_000)],
            &destinations(&["x"]),
        )
        .unwrap();
        let updated = make_dispatch("a", 1_000_001).with_payload(DataObject::new().with("k", 1));
        repo.store_dispatches(&[updated.clone()], &destinations(&["y"])).unwrap();

        assert_eq!(repo.len(), 2);
        let read = repo.get_queued_dispatches(10, &HashSet::new(), "x").unwrap();
        assert_eq!(read[0], updated);
        assert_eq!(ids(&repo.get_queued_dispatches(10, &HashSet::new(), "y").unwrap()), vec!["a"]);
    }

    #[test]
    fn test_resize_evicts_oldest() {
        let (mut repo, _) = repository(None);
        let batch: Vec<_> = (0..5).map(|i| make_dispatch(&i.to_string(), 1_000_000)).collect();
        repo.store_dispatches(&batch, &destinations(&["x"])).unwrap();

        repo.resize(Some(2)).unwrap();
        let read = repo.get_queued_dispatches(10, &HashSet::new(), "x").unwrap();
        assert_eq!(ids(&read), vec!["3", "4"]);
        assert_eq!(repo.queue_size_by_destination().unwrap()["x"], 2);
    }

    #[test]
    fn test_expired_entries_are_not_returned() {
        let (mut repo, now) = repository(None);
        repo.store_dispatches(
            &[make_dispatch("old", 945_000), make_dispatch("new", 999_000)],
            &destinations(&["x"]),
        )
        .unwrap();
        assert_eq!(repo.len(), 2);

        now.store(1_010_000, Ordering::Relaxed);
        let read = repo.get_queued_dispatches(10, &HashSet::new(), "x").unwrap();
        assert_eq!(ids(&read), vec!["new"]);
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn test_set_expiration_uses_shorter_duration() {
        let (mut repo, _) = repository(None);
        repo.store_dispatches(
            &[make_dispatch("a", 955_000), make_dispatch("b", 995_000)],
            &destinations(&["x"]),
        )
        .unwrap();

        // longer expiry purges with the current, shorter one
        repo.set_expiration(Duration::from_secs(120)).unwrap();
        assert_eq!(repo.len(), 2);

        repo.set_expiration(Duration::from_secs(10)).unwrap();
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn test_delete_queues_keeps_listed_destinations() {
        let (mut repo, _) = repository(None);
        repo.store_dispatches(&[make_dispatch("a", 1_000_000)], &destinations(&["x", "y"]))
            .unwrap();
        repo.store_dispatches(&[make_dispatch("b", 1_000_000)], &destinations(&["y"]))
            .unwrap();

        repo.delete_queues(&destinations(&["x"])).unwrap();
        let sizes = repo.queue_size_by_destination().unwrap();
        assert_eq!(sizes.get("x"), Some(&1));
        assert_eq!(sizes.get("y"), None);
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn test_take_evicted_reports_size_and_age_evictions() {
        let (mut repo, now) = repository(Some(2));
        for id in ["a", "b", "c"] {
            repo.store_dispatches(&[make_dispatch(id, 1_000_000)], &destinations(&["x", "y"]))
                .unwrap();
        }
        repo.delete_dispatches(&["b".to_string()], "y").unwrap();

        let evicted = repo.take_evicted().unwrap();
        assert_eq!(
            evicted,
            vec![EvictedDispatch {
                id: "a".to_string(),
                destinations: destinations(&["x", "y"]),
            }]
        );
        assert!(repo.take_evicted().unwrap().is_empty());

        now.store(1_061_000, Ordering::Relaxed);
        let mut evicted = repo.take_evicted().unwrap();
        evicted.sort_by(|l, r| l.id.cmp(&r.id));
        assert_eq!(evicted.len(), 2);
        assert_eq!(evicted[0].id, "b");
        assert_eq!(evicted[0].destinations, destinations(&["x"]));
        assert_eq!(evicted[1].id, "c");
        assert!(repo.is_empty());
        assert_eq!(repo.evicted_count(), 3);
    }

    #[test]
    fn test_replaced_timestamp_moves_expiry() {
        let (mut repo, now) = repository(None);
        repo.store_dispatches(&[make_dispatch("a", 945_000)], &destinations(&["x"]))
            .unwrap();
        repo.store_dispatches(&[make_dispatch("a", 1_000_000)], &destinations(&["x"]))
            .unwrap();

        now.store(1_010_000, Ordering::Relaxed);
        assert!(repo.take_evicted().unwrap().is_empty());
        assert_eq!(repo.len(), 1);
    }
}
