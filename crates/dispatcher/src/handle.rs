//! DestinationHandle - manages a destination and its delivery loop task

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use contracts::{BarrierState, Destination, Dispatch, DispatchScope, SdkSettings};
use rules::LoadRuleEngine;

use crate::barriers::BarrierCoordinator;
use crate::mappings::MappingsEngine;
use crate::metrics::DestinationMetrics;
use crate::queue::QueueManager;
use crate::transform::TransformerCoordinator;

/// Everything a delivery loop reads from
#[derive(Clone)]
pub(crate) struct Pipeline {
    pub queue: Arc<QueueManager>,
    pub barriers: BarrierCoordinator,
    pub load_rules: LoadRuleEngine,
    pub mappings: MappingsEngine,
    pub transformers: Arc<TransformerCoordinator>,
    pub settings: watch::Receiver<SdkSettings>,
}

struct LoopTask {
    stop_tx: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

/// Handle to a registered destination
pub struct DestinationHandle {
    destination: Arc<dyn Destination>,
    metrics: Arc<DestinationMetrics>,
    task: Option<LoopTask>,
    /// Stopped loop that may still be finishing its last batch
    stopping: Option<JoinHandle<()>>,
}

impl DestinationHandle {
    pub fn new(destination: Arc<dyn Destination>) -> Self {
        Self {
            destination,
            metrics: Arc::new(DestinationMetrics::new()),
            task: None,
            stopping: None,
        }
    }

    pub fn id(&self) -> &str {
        self.destination.id()
    }

    pub fn destination(&self) -> &Arc<dyn Destination> {
        &self.destination
    }

    pub fn metrics(&self) -> &Arc<DestinationMetrics> {
        &self.metrics
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Spawn the delivery loop; no-op while it is running.
    ///
    /// A loop stopped earlier is awaited before the new one dequeues, so one
    /// destination never has two loops delivering at once.
    pub(crate) fn start(&mut self, pipeline: &Pipeline) {
        if self.task.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let previous = self.stopping.take();
        let destination = Arc::clone(&self.destination);
        let pipeline = pipeline.clone();
        let metrics = Arc::clone(&self.metrics);
        let worker = tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    error!(destination = %destination.id(), error = ?e, "Previous delivery loop panicked");
                }
            }
            delivery_loop(destination, pipeline, metrics, stop_rx).await;
        });
        self.task = Some(LoopTask { stop_tx, worker });
    }

    /// Stop dequeuing. A batch already dequeued still goes to the destination,
    /// and its completion deletes it.
    pub(crate) fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.stop_tx.send(true);
            self.stopping = Some(task.worker);
        }
    }

    /// Stop and wait for the loop task to finish
    #[instrument(name = "destination_handle_shutdown", skip(self), fields(destination = %self.id()))]
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.stop_tx.send(true);
            if let Err(e) = task.worker.await {
                error!(destination = %self.id(), error = ?e, "Delivery loop panicked");
            }
        }
        if let Some(worker) = self.stopping.take() {
            if let Err(e) = worker.await {
                error!(destination = %self.id(), error = ?e, "Delivery loop panicked");
            }
        }
        debug!(destination = %self.id(), "DestinationHandle shutdown complete");
    }
}

enum Wake {
    Recheck,
    Ignore,
    Stop,
}

/// Drain the destination's queue whenever something may allow progress
#[instrument(
    name = "destination_delivery_loop",
    skip(destination, pipeline, metrics, stop_rx),
    fields(destination = %destination.id())
)]
async fn delivery_loop(
    destination: Arc<dyn Destination>,
    pipeline: Pipeline,
    metrics: Arc<DestinationMetrics>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let id = destination.id().to_string();
    let mut barrier = pipeline.barriers.on_barriers_state(&id);
    let mut in_flight = pipeline.queue.subscribe_in_flight(&id);
    let mut enqueued = pipeline.queue.subscribe_enqueued();
    info!(destination = %id, "Delivery loop started");

    loop {
        if *stop_rx.borrow() {
            break;
        }
        drain(&destination, &pipeline, &metrics, &stop_rx).await;

        let wake = loop {
            let wake = tokio::select! {
                changed = stop_rx.changed() => match changed {
                    Ok(()) if !*stop_rx.borrow() => Wake::Ignore,
                    _ => Wake::Stop,
                },
                changed = barrier.changed() => match changed {
                    Ok(()) if *barrier.borrow() == BarrierState::Open => Wake::Recheck,
                    Ok(()) => Wake::Ignore,
                    Err(_) => Wake::Stop,
                },
                changed = in_flight.changed() => match changed {
                    Ok(()) => Wake::Recheck,
                    Err(_) => Wake::Stop,
                },
                received = enqueued.recv() => match received {
                    Ok(destinations) if destinations.contains(&id) => Wake::Recheck,
                    Ok(_) => Wake::Ignore,
                    Err(broadcast::error::RecvError::Lagged(_)) => Wake::Recheck,
                    Err(broadcast::error::RecvError::Closed) => Wake::Stop,
                },
            };
            if !matches!(wake, Wake::Ignore) {
                break wake;
            }
        };
        if matches!(wake, Wake::Stop) {
            break;
        }
    }

    info!(destination = %id, "Delivery loop stopped");
}

/// Send batches until the barrier closes, the in-flight limit is reached or
/// nothing is left to send.
///
/// The barrier state is re-read before every dequeue, since the previous
/// batch changes the pending count it depends on.
async fn drain(
    destination: &Arc<dyn Destination>,
    pipeline: &Pipeline,
    metrics: &Arc<DestinationMetrics>,
    stop_rx: &watch::Receiver<bool>,
) {
    let id = destination.id();
    let scope = DispatchScope::Dispatcher(id.to_string());

    loop {
        if *stop_rx.borrow() || pipeline.barriers.current_state(id) == BarrierState::Closed {
            return;
        }
        let max_in_flight = pipeline.settings.borrow().core.max_in_flight_per_destination;
        if pipeline.queue.in_flight_count(id) >= max_in_flight {
            debug!(destination = %id, "In-flight limit reached");
            return;
        }

        let batch = match pipeline.queue.dequeue_dispatches(destination.batch_limit().max(1), id) {
            Ok(batch) => batch,
            Err(e) => {
                metrics.inc_failure_count();
                warn!(destination = %id, error = %e, "Dequeue failed");
                return;
            }
        };
        if batch.is_empty() {
            return;
        }
        metrics.set_in_flight(pipeline.queue.in_flight_count(id));
        debug!(destination = %id, count = batch.len(), "Dequeued batch");

        let split = pipeline.load_rules.evaluate_load_rules(id, batch);
        metrics.add_rejected(split.rejected.len());
        delete(pipeline, metrics, id, &split.rejected, "load_rules");

        let mapped: Vec<Dispatch> = split
            .accepted
            .into_iter()
            .map(|dispatch| pipeline.mappings.map(id, dispatch))
            .collect();
        let transformed = pipeline.transformers.transform_all(mapped.clone(), &scope).await;

        let kept: HashSet<&str> = transformed.iter().map(Dispatch::id).collect();
        let dropped: Vec<Dispatch> = mapped
            .iter()
            .filter(|d| !kept.contains(d.id()))
            .cloned()
            .collect();
        metrics.add_dropped(dropped.len());
        delete(pipeline, metrics, id, &dropped, "transformer");

        if !transformed.is_empty() {
            send(destination, pipeline, metrics, transformed);
        }
    }
}

fn send(
    destination: &Arc<dyn Destination>,
    pipeline: &Pipeline,
    metrics: &Arc<DestinationMetrics>,
    batch: Vec<Dispatch>,
) {
    let id = destination.id().to_string();
    let queue = Arc::clone(&pipeline.queue);
    let completion_metrics = Arc::clone(metrics);
    debug!(destination = %id, count = batch.len(), "Sending batch");
    metrics.inc_batch_count();

    destination.dispatch(
        batch,
        Box::new(move |completed: Vec<Dispatch>| {
            completion_metrics.add_delivered(completed.len());
            observability::record_batch_delivered(&id, completed.len());
            match queue.delete_dispatches(&completed, &id) {
                Ok(()) => observability::record_dispatches_deleted(&id, completed.len(), "delivered"),
                Err(e) => {
                    completion_metrics.inc_failure_count();
                    warn!(destination = %id, error = %e, "Failed to delete delivered dispatches");
                }
            }
            completion_metrics.set_in_flight(queue.in_flight_count(&id));
        }),
    );
}

fn delete(
    pipeline: &Pipeline,
    metrics: &DestinationMetrics,
    destination_id: &str,
    dispatches: &[Dispatch],
    reason: &'static str,
) {
    if dispatches.is_empty() {
        return;
    }
    match pipeline.queue.delete_dispatches(dispatches, destination_id) {
        Ok(()) => observability::record_dispatches_deleted(destination_id, dispatches.len(), reason),
        Err(e) => {
            metrics.inc_failure_count();
            warn!(destination = %destination_id, reason, error = %e, "Failed to delete dispatches");
        }
    }
}
