//! DispatchManager - admission of dispatches and per-destination delivery

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use contracts::{
    ConsentManager, DecisionType, Destination, Dispatch, DispatchScope, QueueRepository,
    SdkSettings, ScopedBarrier, TrackResult, TrackResultListener, Transformer,
};
use rules::LoadRuleEngine;

use crate::barriers::{
    BarrierContext, BarrierCoordinator, BarrierFactory, BarrierManager, BatchingBarrierFactory,
};
use crate::error::DispatcherError;
use crate::handle::{DestinationHandle, Pipeline};
use crate::mappings::MappingsEngine;
use crate::metrics::MetricsSnapshot;
use crate::queue::{InMemoryQueueRepository, QueueManager};
use crate::transform::TransformerCoordinator;

/// Builder for creating a DispatchManager
pub struct DispatchManagerBuilder {
    settings: watch::Receiver<SdkSettings>,
    queue: Option<QueueManager>,
    destinations: Vec<Arc<dyn Destination>>,
    transformers: Vec<Arc<dyn Transformer>>,
    barrier_factories: Vec<Arc<dyn BarrierFactory>>,
    consent: Option<Arc<dyn ConsentManager>>,
}

impl DispatchManagerBuilder {
    /// Create a new DispatchManagerBuilder following live `settings`
    pub fn new(settings: watch::Receiver<SdkSettings>) -> Self {
        Self {
            settings,
            queue: None,
            destinations: Vec::new(),
            transformers: Vec::new(),
            barrier_factories: Vec::new(),
            consent: None,
        }
    }

    /// Use `repository` instead of an in-memory queue
    pub fn with_repository(mut self, repository: impl QueueRepository + 'static) -> Self {
        self.queue = Some(QueueManager::new(repository));
        self
    }

    pub fn with_destination(mut self, destination: Arc<dyn Destination>) -> Self {
        self.destinations.push(destination);
        self
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformers.push(transformer);
        self
    }

    pub fn with_barrier_factory(mut self, factory: Arc<dyn BarrierFactory>) -> Self {
        self.barrier_factories.push(factory);
        self
    }

    pub fn with_consent_manager(mut self, consent: Arc<dyn ConsentManager>) -> Self {
        self.consent = Some(consent);
        self
    }

    /// Build the manager. The dispatch loop is not started.
    ///
    /// Must be called within a Tokio runtime.
    #[instrument(
        name = "dispatch_manager_build",
        skip(self),
        fields(destinations = self.destinations.len())
    )]
    pub fn build(self) -> Result<DispatchManager, DispatcherError> {
        let settings = self.settings.borrow().clone();

        let mut ids = HashSet::new();
        for destination in &self.destinations {
            if !ids.insert(destination.id().to_string()) {
                return Err(DispatcherError::DuplicateDestination(destination.id().to_string()));
            }
        }

        let queue = Arc::new(self.queue.unwrap_or_else(|| {
            QueueManager::new(InMemoryQueueRepository::new(
                settings.core.max_queue_size,
                settings.core.expiration(),
            ))
        }));
        queue.update_settings(&settings.core)?;
        queue.on_destinations_changed(&ids)?;

        let (destinations_tx, destinations_rx) = watch::channel(self.destinations.clone());
        let barrier_manager = Arc::new(BarrierManager::new(BarrierContext {
            queue_metrics: queue.clone(),
            destinations: destinations_rx,
        }));
        let defaults: Vec<Arc<dyn BarrierFactory>> = vec![Arc::new(BatchingBarrierFactory::new())];
        barrier_manager.initialize_barriers(self.barrier_factories, defaults, &settings);

        let transformers = Arc::new(TransformerCoordinator::new(self.settings.clone()));
        for transformer in self.transformers {
            transformers.register_transformer(transformer);
        }

        let pipeline = Pipeline {
            queue: Arc::clone(&queue),
            barriers: BarrierCoordinator::new(barrier_manager.barriers()),
            load_rules: LoadRuleEngine::new(self.settings.clone()),
            mappings: MappingsEngine::new(self.settings.clone()),
            transformers,
            settings: self.settings.clone(),
        };
        let settings_task = spawn_settings_forwarder(
            self.settings,
            Arc::clone(&queue),
            Arc::clone(&barrier_manager),
        );

        info!(destinations = ids.len(), "DispatchManager built");
        Ok(DispatchManager {
            pipeline,
            barrier_manager,
            consent: self.consent,
            destinations_tx,
            handles: Mutex::new(self.destinations.into_iter().map(DestinationHandle::new).collect()),
            loop_active: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            settings_task,
        })
    }
}

/// Period of the expiry sweep over an otherwise idle queue
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Keep queue limits and barriers in step with settings updates, and purge
/// expired dispatches periodically
fn spawn_settings_forwarder(
    mut settings: watch::Receiver<SdkSettings>,
    queue: Arc<QueueManager>,
    barrier_manager: Arc<BarrierManager>,
) -> JoinHandle<()> {
    settings.borrow_and_update();
    tokio::spawn(async move {
        let mut sweep = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        sweep.tick().await;
        loop {
            tokio::select! {
                changed = settings.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = settings.borrow_and_update().clone();
                    debug!("Settings updated");
                    if let Err(e) = queue.update_settings(&current.core) {
                        warn!(error = %e, "Failed to apply queue settings");
                    }
                    barrier_manager.update_settings(&current);
                }
                _ = sweep.tick() => {
                    if let Err(e) = queue.purge_expired() {
                        warn!(error = %e, "Expiry sweep failed");
                    }
                }
            }
        }
    })
}

/// Entry point of the pipeline: admits dispatches and runs one delivery
/// loop per registered destination
pub struct DispatchManager {
    pipeline: Pipeline,
    barrier_manager: Arc<BarrierManager>,
    consent: Option<Arc<dyn ConsentManager>>,
    destinations_tx: watch::Sender<Vec<Arc<dyn Destination>>>,
    handles: Mutex<Vec<DestinationHandle>>,
    loop_active: AtomicBool,
    shut_down: AtomicBool,
    settings_task: JoinHandle<()>,
}

impl DispatchManager {
    fn handles(&self) -> MutexGuard<'_, Vec<DestinationHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a dispatch.
    ///
    /// Without a consent manager the dispatch is transformed and queued for
    /// every registered destination. With one, the consent decision decides
    /// whether it is dropped or handed over to consent. `listener` receives
    /// the same result that is returned.
    #[instrument(name = "dispatch_manager_track", skip_all, fields(dispatch = %dispatch.log_description()))]
    pub async fn track(
        &self,
        dispatch: Dispatch,
        listener: Option<TrackResultListener>,
    ) -> Result<TrackResult, DispatcherError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(DispatcherError::Shutdown);
        }

        let result = match &self.consent {
            None => self.transform_and_queue(dispatch).await?,
            Some(consent) => match consent.consent_decision() {
                Some(decision) if decision.decision_type == DecisionType::Explicit => {
                    if !consent.platform_consented(&decision) {
                        TrackResult::dropped(dispatch, "Platform consent not granted")
                    } else {
                        match self.transform_collected(dispatch.clone()).await {
                            Some(transformed) => {
                                consent.apply_consent(transformed.clone());
                                TrackResult::accepted(transformed, "Dispatch handed to consent")
                            }
                            None => TrackResult::dropped(dispatch, "Dropped by transformation"),
                        }
                    }
                }
                _ => {
                    consent.apply_consent(dispatch.clone());
                    TrackResult::accepted(dispatch, "Dispatch handed to consent")
                }
            },
        };

        debug!(status = %result.status, info = %result.info, "Track completed");
        observability::record_track_result(result.status);
        if let Some(listener) = listener {
            listener(result.clone());
        }
        Ok(result)
    }

    async fn transform_collected(&self, dispatch: Dispatch) -> Option<Dispatch> {
        self.pipeline
            .transformers
            .transform(dispatch, &DispatchScope::AfterCollectors)
            .await
    }

    async fn transform_and_queue(&self, dispatch: Dispatch) -> Result<TrackResult, DispatcherError> {
        let Some(transformed) = self.transform_collected(dispatch.clone()).await else {
            return Ok(TrackResult::dropped(dispatch, "Dropped by transformation"));
        };
        let destinations: HashSet<String> = self.destination_ids().into_iter().collect();
        if destinations.is_empty() {
            debug!("No destinations registered, nothing queued");
        }
        self.pipeline
            .queue
            .store_dispatches(std::slice::from_ref(&transformed), &destinations)?;
        Ok(TrackResult::accepted(transformed, "Dispatch queued"))
    }

    /// Start one delivery loop per registered destination; no-op if running
    #[instrument(name = "dispatch_manager_start", skip(self))]
    pub fn start_dispatch_loop(&self) {
        if self.shut_down.load(Ordering::SeqCst) || self.loop_active.swap(true, Ordering::SeqCst) {
            return;
        }
        for handle in self.handles().iter_mut() {
            handle.start(&self.pipeline);
        }
        info!("Dispatch loop started");
    }

    /// Stop dequeuing for every destination; no-op if not running.
    ///
    /// Batches already handed to destinations are not cancelled.
    #[instrument(name = "dispatch_manager_stop", skip(self))]
    pub fn stop_dispatch_loop(&self) {
        if !self.loop_active.swap(false, Ordering::SeqCst) {
            return;
        }
        for handle in self.handles().iter_mut() {
            handle.stop();
        }
        info!("Dispatch loop stopped");
    }

    pub fn is_dispatch_loop_active(&self) -> bool {
        self.loop_active.load(Ordering::SeqCst)
    }

    /// Register a destination; its loop starts if the dispatch loop runs
    #[instrument(name = "dispatch_manager_register_destination", skip_all, fields(destination = %destination.id()))]
    pub fn register_destination(&self, destination: Arc<dyn Destination>) -> Result<(), DispatcherError> {
        let mut handles = self.handles();
        if handles.iter().any(|h| h.id() == destination.id()) {
            return Err(DispatcherError::DuplicateDestination(destination.id().to_string()));
        }
        let mut handle = DestinationHandle::new(destination);
        if self.loop_active.load(Ordering::SeqCst) {
            handle.start(&self.pipeline);
        }
        handles.push(handle);
        self.publish_destinations(&handles)?;
        info!("Destination registered");
        Ok(())
    }

    /// Unregister a destination and delete its queue. Batches it already
    /// received still complete.
    #[instrument(name = "dispatch_manager_unregister_destination", skip(self))]
    pub fn unregister_destination(&self, destination_id: &str) -> Result<(), DispatcherError> {
        let mut handles = self.handles();
        let index = handles
            .iter()
            .position(|h| h.id() == destination_id)
            .ok_or_else(|| DispatcherError::DestinationNotFound(destination_id.to_string()))?;
        let mut handle = handles.remove(index);
        handle.stop();
        self.publish_destinations(&handles)?;
        info!("Destination unregistered");
        Ok(())
    }

    fn publish_destinations(&self, handles: &[DestinationHandle]) -> Result<(), DispatcherError> {
        let destinations: Vec<Arc<dyn Destination>> =
            handles.iter().map(|h| Arc::clone(h.destination())).collect();
        let ids: HashSet<String> = handles.iter().map(|h| h.id().to_string()).collect();
        self.destinations_tx.send_replace(destinations);
        self.pipeline.queue.on_destinations_changed(&ids)
    }

    /// Ids of the registered destinations, in registration order
    pub fn destination_ids(&self) -> Vec<String> {
        self.handles().iter().map(|h| h.id().to_string()).collect()
    }

    pub fn register_scoped_barrier(&self, barrier: ScopedBarrier) {
        self.barrier_manager.register_scoped_barrier(barrier);
    }

    pub fn unregister_scoped_barrier(&self, barrier_id: &str) {
        self.barrier_manager.unregister_scoped_barrier(barrier_id);
    }

    pub fn register_transformer(&self, transformer: Arc<dyn Transformer>) {
        self.pipeline.transformers.register_transformer(transformer);
    }

    pub fn unregister_transformer(&self, transformer_id: &str) {
        self.pipeline.transformers.unregister_transformer(transformer_id);
    }

    /// Queue of this pipeline, for inspection
    pub fn queue(&self) -> &Arc<QueueManager> {
        &self.pipeline.queue
    }

    /// Get metrics for all destinations
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles()
            .iter()
            .map(|h| (h.id().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Stop every loop, clear barriers and reject further tracking
    #[instrument(name = "dispatch_manager_shutdown", skip(self))]
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.loop_active.store(false, Ordering::SeqCst);
        self.settings_task.abort();
        self.barrier_manager.shutdown();

        let handles = std::mem::take(&mut *self.handles());
        for handle in handles {
            handle.shutdown().await;
        }
        info!("DispatchManager shutdown complete");
    }
}

impl Drop for DispatchManager {
    fn drop(&mut self) {
        self.settings_task.abort();
    }
}
