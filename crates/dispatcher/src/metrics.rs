//! Destination metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Delivery counters for a single destination
#[derive(Debug, Default)]
pub struct DestinationMetrics {
    /// Dispatches currently handed to the destination
    in_flight: AtomicUsize,
    /// Batches handed to the destination
    batch_count: AtomicU64,
    /// Dispatches whose delivery completed
    delivered_count: AtomicU64,
    /// Dispatches rejected by load rules
    rejected_count: AtomicU64,
    /// Dispatches dropped by pre-send transformations
    dropped_count: AtomicU64,
    /// Failed queue operations inside the delivery loop
    failure_count: AtomicU64,
}

impl DestinationMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn set_in_flight(&self, count: usize) {
        self.in_flight.store(count, Ordering::Relaxed);
    }

    pub fn batch_count(&self) -> u64 {
        self.batch_count.load(Ordering::Relaxed)
    }

    pub fn inc_batch_count(&self) {
        self.batch_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered_count.load(Ordering::Relaxed)
    }

    pub fn add_delivered(&self, count: usize) {
        self.delivered_count.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }

    pub fn add_rejected(&self, count: usize) {
        self.rejected_count.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn add_dropped(&self, count: usize) {
        self.dropped_count.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            in_flight: self.in_flight(),
            batch_count: self.batch_count(),
            delivered_count: self.delivered_count(),
            rejected_count: self.rejected_count(),
            dropped_count: self.dropped_count(),
            failure_count: self.failure_count(),
        }
    }
}

/// Snapshot of destination metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub in_flight: usize,
    pub batch_count: u64,
    pub delivered_count: u64,
    pub rejected_count: u64,
    pub dropped_count: u64,
    pub failure_count: u64,
}
