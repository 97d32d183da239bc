//! BatchingBarrier - holds delivery until a full batch is pending

use std::sync::Arc;
use tokio::sync::watch;

use contracts::{
    Barrier, BarrierScope, BarrierState, ConfigurableBarrier, DataItem, DataObject, Destination,
};

use super::{BarrierContext, BarrierFactory};
use crate::queue::QueueMetrics;

pub const BATCHING_BARRIER_ID: &str = "BatchingBarrier";

/// Configuration key of the requested batch size
pub const BATCH_SIZE_KEY: &str = "batch_size";

/// Open for a destination once its pending count reaches the batch size.
///
/// The effective batch size is the configured `batch_size` clamped to the
/// destination's batch limit, the batch limit when unset, or 1 while the
/// destination is not registered.
pub struct BatchingBarrier {
    queue_metrics: Arc<dyn QueueMetrics>,
    destinations: watch::Receiver<Vec<Arc<dyn Destination>>>,
    batch_size: watch::Sender<Option<usize>>,
}

impl BatchingBarrier {
    pub fn new(context: &BarrierContext, configuration: &DataObject) -> Self {
        Self {
            queue_metrics: Arc::clone(&context.queue_metrics),
            destinations: context.destinations.clone(),
            batch_size: watch::channel(configured_batch_size(configuration)).0,
        }
    }
}

impl Barrier for BatchingBarrier {
    fn id(&self) -> &str {
        BATCHING_BARRIER_ID
    }

    fn on_state(&self, destination_id: &str) -> watch::Receiver<BarrierState> {
        let mut pending = self.queue_metrics.queue_size_pending_dispatch(destination_id);
        let mut destinations = self.destinations.clone();
        let mut batch_size = self.batch_size.subscribe();
        let destination_id = destination_id.to_string();

        let initial = current_state(&mut pending, &mut destinations, &mut batch_size, &destination_id);
        let (tx, rx) = watch::channel(initial);

        tokio::spawn(async move {
            loop {
                let alive = tokio::select! {
                    _ = tx.closed() => false,
                    changed = pending.changed() => changed.is_ok(),
                    changed = destinations.changed() => changed.is_ok(),
                    changed = batch_size.changed() => changed.is_ok(),
                };
                if !alive {
                    break;
                }

                let state = current_state(&mut pending, &mut destinations, &mut batch_size, &destination_id);
                tx.send_if_modified(|current| {
                    if *current == state {
                        false
                    } else {
                        *current = state;
                        true
                    }
                });
            }
        });

        rx
    }

    fn state(&self, destination_id: &str) -> BarrierState {
        let pending = *self.queue_metrics.queue_size_pending_dispatch(destination_id).borrow();
        evaluate(
            pending,
            &self.destinations.borrow(),
            *self.batch_size.borrow(),
            destination_id,
        )
    }
}

impl ConfigurableBarrier for BatchingBarrier {
    fn update_configuration(&self, configuration: &DataObject) {
        let size = configured_batch_size(configuration);
        self.batch_size.send_if_modified(|current| {
            if *current == size {
                false
            } else {
                *current = size;
                true
            }
        });
    }
}

fn current_state(
    pending: &mut watch::Receiver<usize>,
    destinations: &mut watch::Receiver<Vec<Arc<dyn Destination>>>,
    batch_size: &mut watch::Receiver<Option<usize>>,
    destination_id: &str,
) -> BarrierState {
    let pending = *pending.borrow_and_update();
    let batch_size = *batch_size.borrow_and_update();
    evaluate(pending, &destinations.borrow_and_update(), batch_size, destination_id)
}

fn evaluate(
    pending: usize,
    destinations: &[Arc<dyn Destination>],
    batch_size: Option<usize>,
    destination_id: &str,
) -> BarrierState {
    let limit = destinations
        .iter()
        .find(|d| d.id() == destination_id)
        .map(|d| d.batch_limit());
    if pending >= effective_batch_size(batch_size, limit) {
        BarrierState::Open
    } else {
        BarrierState::Closed
    }
}

fn configured_batch_size(configuration: &DataObject) -> Option<usize> {
    configuration
        .get(BATCH_SIZE_KEY)
        .and_then(DataItem::as_i64)
        .and_then(|size| usize::try_from(size.max(1)).ok())
}

fn effective_batch_size(configured: Option<usize>, batch_limit: Option<usize>) -> usize {
    let Some(limit) = batch_limit.map(|l| l.max(1)) else {
        return 1;
    };
    configured.map_or(limit, |size| size.clamp(1, limit))
}

/// Creates the `BatchingBarrier`.
///
/// Inactive by default: it only gates destinations that settings, or
/// `with_scopes`, scope it to.
#[derive(Debug, Clone, Default)]
pub struct BatchingBarrierFactory {
    default_scopes: Vec<BarrierScope>,
    enforced: DataObject,
}

impl BatchingBarrierFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = BarrierScope>) -> Self {
        self.default_scopes = scopes.into_iter().collect();
        self
    }

    /// Configuration that settings cannot override
    pub fn with_enforced(mut self, configuration: DataObject) -> Self {
        self.enforced = configuration;
        self
    }
}

impl BarrierFactory for BatchingBarrierFactory {
    fn id(&self) -> &str {
        BATCHING_BARRIER_ID
    }

    fn default_scopes(&self) -> Option<Vec<BarrierScope>> {
        Some(self.default_scopes.clone())
    }

    fn enforced_settings(&self) -> DataObject {
        self.enforced.clone()
    }

    fn create(&self, context: &BarrierContext, configuration: &DataObject) -> Arc<dyn ConfigurableBarrier> {
        Arc::new(BatchingBarrier::new(context, configuration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Dispatch, DispatchCompletion};
    use tokio::time::{Duration, timeout};

    struct FixedMetrics(watch::Sender<usize>);

    impl QueueMetrics for FixedMetrics {
        fn queue_size_pending_dispatch(&self, _: &str) -> watch::Receiver<usize> {
            self.0.subscribe()
        }
    }

    struct NullDestination(usize);

    impl Destination for NullDestination {
        fn id(&self) -> &str {
            "collect"
        }

        fn batch_limit(&self) -> usize {
            self.0
        }

        fn dispatch(&self, dispatches: Vec<Dispatch>, on_complete: DispatchCompletion) {
            on_complete(dispatches);
        }
    }

    struct Fixture {
        pending: Arc<FixedMetrics>,
        destinations: watch::Sender<Vec<Arc<dyn Destination>>>,
        context: BarrierContext,
    }

    fn fixture(batch_limit: Option<usize>) -> Fixture {
        let pending = Arc::new(FixedMetrics(watch::channel(0).0));
        let registered: Vec<Arc<dyn Destination>> = batch_limit
            .map(|limit| Arc::new(NullDestination(limit)) as Arc<dyn Destination>)
            .into_iter()
            .collect();
        let (destinations, rx) = watch::channel(registered);
        let context = BarrierContext {
            queue_metrics: pending.clone(),
            destinations: rx,
        };
        Fixture {
            pending,
            destinations,
            context,
        }
    }

    async fn next(rx: &mut watch::Receiver<BarrierState>) -> BarrierState {
        timeout(Duration::from_secs(1), rx.changed())
            .await
            .expect("batching state did not change")
            .unwrap();
        *rx.borrow_and_update()
    }

    #[test]
    fn test_effective_batch_size() {
        assert_eq!(effective_batch_size(Some(5), None), 1);
        assert_eq!(effective_batch_size(None, Some(10)), 10);
        assert_eq!(effective_batch_size(Some(5), Some(10)), 5);
        assert_eq!(effective_batch_size(Some(50), Some(10)), 10);
        assert_eq!(effective_batch_size(Some(1), Some(0)), 1);
    }

    #[test]
    fn test_configured_batch_size() {
        assert_eq!(configured_batch_size(&DataObject::new()), None);
        assert_eq!(configured_batch_size(&DataObject::new().with(BATCH_SIZE_KEY, 4)), Some(4));
        assert_eq!(configured_batch_size(&DataObject::new().with(BATCH_SIZE_KEY, -2)), Some(1));
        assert_eq!(configured_batch_size(&DataObject::new().with(BATCH_SIZE_KEY, "4")), None);
    }

    #[tokio::test]
    async fn test_opens_when_batch_is_full() {
        let fixture = fixture(Some(10));
        let barrier = BatchingBarrier::new(&fixture.context, &DataObject::new().with(BATCH_SIZE_KEY, 3));
        let mut state = barrier.on_state("collect");
        assert_eq!(*state.borrow_and_update(), BarrierState::Closed);

        fixture.pending.0.send_replace(3);
        assert_eq!(next(&mut state).await, BarrierState::Open);

        fixture.pending.0.send_replace(1);
        assert_eq!(next(&mut state).await, BarrierState::Closed);
    }

    #[tokio::test]
    async fn test_state_reflects_latest_pending_count() {
        let fixture = fixture(Some(3));
        let barrier = BatchingBarrier::new(&fixture.context, &DataObject::new().with(BATCH_SIZE_KEY, 3));
        fixture.pending.0.send_replace(4);
        assert_eq!(barrier.state("collect"), BarrierState::Open);

        // a partial remainder left after a full batch keeps the gate closed
        fixture.pending.0.send_replace(1);
        assert_eq!(barrier.state("collect"), BarrierState::Closed);

        barrier.update_configuration(&DataObject::new().with(BATCH_SIZE_KEY, 1));
        assert_eq!(barrier.state("collect"), BarrierState::Open);
    }

    #[tokio::test]
    async fn test_reacts_to_configuration_update() {
        let fixture = fixture(Some(10));
        fixture.pending.0.send_replace(2);
        let barrier = BatchingBarrier::new(&fixture.context, &DataObject::new().with(BATCH_SIZE_KEY, 5));
        let mut state = barrier.on_state("collect");
        assert_eq!(*state.borrow_and_update(), BarrierState::Closed);

        barrier.update_configuration(&DataObject::new().with(BATCH_SIZE_KEY, 2));
        assert_eq!(next(&mut state).await, BarrierState::Open);
    }

    #[tokio::test]
    async fn test_unknown_destination_uses_single_dispatch() {
        let fixture = fixture(None);
        let barrier = BatchingBarrier::new(&fixture.context, &DataObject::new().with(BATCH_SIZE_KEY, 5));
        let mut state = barrier.on_state("collect");
        assert_eq!(*state.borrow_and_update(), BarrierState::Closed);

        fixture.pending.0.send_replace(1);
        assert_eq!(next(&mut state).await, BarrierState::Open);

        fixture
            .destinations
            .send_replace(vec![Arc::new(NullDestination(10)) as Arc<dyn Destination>]);
        assert_eq!(next(&mut state).await, BarrierState::Closed);
    }

    #[test]
    fn test_factory_defaults_to_inactive() {
        let factory = BatchingBarrierFactory::new();
        assert_eq!(factory.id(), BATCHING_BARRIER_ID);
        assert_eq!(factory.default_scopes(), Some(Vec::new()));

        let scoped = factory.with_scopes([BarrierScope::Dispatcher("collect".into())]);
        assert_eq!(
            scoped.default_scopes(),
            Some(vec![BarrierScope::Dispatcher("collect".into())])
        );
    }
}
