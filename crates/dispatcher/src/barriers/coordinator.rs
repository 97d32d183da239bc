//! BarrierCoordinator - one gate state per destination

use std::collections::HashSet;
use futures::future::select_all;
use tokio::sync::watch;
use tracing::debug;

use contracts::{BarrierState, ScopedBarrier};

/// Folds the live barrier set into per-destination states
#[derive(Clone)]
pub struct BarrierCoordinator {
    barriers: watch::Receiver<Vec<ScopedBarrier>>,
}

enum Wake {
    Unobserved,
    BarrierSet(bool),
    Input(usize, bool),
}

impl BarrierCoordinator {
    pub fn new(barriers: watch::Receiver<Vec<ScopedBarrier>>) -> Self {
        Self { barriers }
    }

    /// Combined state for `destination_id`: `Closed` if any barrier scoped to
    /// it is closed, otherwise `Open`.
    ///
    /// The receiver only observes actual changes of the combined value.
    /// Spawns a task that follows barrier set changes and ends once every
    /// receiver is dropped; must be called within a Tokio runtime.
    pub fn on_barriers_state(&self, destination_id: &str) -> watch::Receiver<BarrierState> {
        let mut barriers = self.barriers.clone();
        let mut inputs = subscribe(&barriers.borrow_and_update(), destination_id);
        let (tx, rx) = watch::channel(combine(&mut inputs));
        let destination_id = destination_id.to_string();

        tokio::spawn(async move {
            let mut follow_set = true;
            loop {
                let wake = tokio::select! {
                    _ = tx.closed() => Wake::Unobserved,
                    changed = barriers.changed(), if follow_set => Wake::BarrierSet(changed.is_ok()),
                    (index, ok) = next_change(&mut inputs) => Wake::Input(index, ok),
                };

                match wake {
                    Wake::Unobserved => break,
                    Wake::BarrierSet(true) => {
                        inputs = subscribe(&barriers.borrow_and_update(), &destination_id);
                    }
                    Wake::BarrierSet(false) => follow_set = false,
                    Wake::Input(_, true) => {}
                    Wake::Input(index, false) => {
                        inputs.swap_remove(index);
                    }
                }

                let state = combine(&mut inputs);
                let changed = tx.send_if_modified(|current| {
                    if *current == state {
                        false
                    } else {
                        *current = state;
                        true
                    }
                });
                if changed {
                    debug!(destination = %destination_id, state = %state, "Barrier state changed");
                    observability::record_barrier_state(&destination_id, state);
                }
            }
        });

        rx
    }

    /// Combined state for `destination_id` computed from each barrier's
    /// current state, for decisions that cannot wait for propagation
    pub fn current_state(&self, destination_id: &str) -> BarrierState {
        let barriers = self.barriers.borrow();
        let mut seen = HashSet::new();
        let closed = barriers
            .iter()
            .filter(|b| seen.insert(b.id().to_string()))
            .filter(|b| b.applies_to(destination_id))
            .any(|b| b.barrier.state(destination_id) == BarrierState::Closed);
        if closed {
            BarrierState::Closed
        } else {
            BarrierState::Open
        }
    }
}

/// State receivers of barriers applying to the destination, unique by id
fn subscribe(barriers: &[ScopedBarrier], destination_id: &str) -> Vec<watch::Receiver<BarrierState>> {
    let mut seen = HashSet::new();
    barriers
        .iter()
        .filter(|b| seen.insert(b.id().to_string()))
        .filter(|b| b.applies_to(destination_id))
        .map(|b| b.barrier.on_state(destination_id))
        .collect()
}

fn combine(inputs: &mut [watch::Receiver<BarrierState>]) -> BarrierState {
    let mut closed = false;
    for input in inputs.iter_mut() {
        closed |= *input.borrow_and_update() == BarrierState::Closed;
    }
    if closed {
        BarrierState::Closed
    } else {
        BarrierState::Open
    }
}

/// Wait until any input changes; `false` when its barrier is gone
async fn next_change(inputs: &mut [watch::Receiver<BarrierState>]) -> (usize, bool) {
    if inputs.is_empty() {
        return std::future::pending().await;
    }
    let (result, index, _) = select_all(inputs.iter_mut().map(|rx| Box::pin(rx.changed()))).await;
    (index, result.is_ok())
}
