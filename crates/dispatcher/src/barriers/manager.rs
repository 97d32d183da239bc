//! BarrierManager - builds and publishes the scoped barrier set

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use contracts::{
    Barrier, BarrierScope, ConfigurableBarrier, DataObject, SdkSettings, ScopedBarrier,
};

use super::{BarrierContext, BarrierFactory};

/// A barrier created from a factory and driven by settings
struct ConfiguredBarrier {
    factory: Arc<dyn BarrierFactory>,
    barrier: Arc<dyn ConfigurableBarrier>,
    scopes: HashSet<BarrierScope>,
}

#[derive(Default)]
struct ManagerState {
    configured: Vec<ConfiguredBarrier>,
    /// Programmatically registered barriers, in registration order
    registered: Vec<ScopedBarrier>,
}

/// Owner of the live scoped barrier set
pub struct BarrierManager {
    context: BarrierContext,
    state: Mutex<ManagerState>,
    barriers_tx: watch::Sender<Vec<ScopedBarrier>>,
}

impl BarrierManager {
    pub fn new(context: BarrierContext) -> Self {
        let (barriers_tx, _) = watch::channel(Vec::new());
        Self {
            context,
            state: Mutex::new(ManagerState::default()),
            barriers_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create configuration-driven barriers.
    ///
    /// `defaults` only contribute when no factory in `factories` has the same
    /// id. Replaces any previously created configuration-driven barriers.
    #[instrument(
        name = "barrier_manager_initialize",
        skip_all,
        fields(factories = factories.len(), defaults = defaults.len())
    )]
    pub fn initialize_barriers(
        &self,
        factories: Vec<Arc<dyn BarrierFactory>>,
        defaults: Vec<Arc<dyn BarrierFactory>>,
        settings: &SdkSettings,
    ) {
        let mut seen = HashSet::new();
        let configured: Vec<ConfiguredBarrier> = factories
            .into_iter()
            .chain(defaults)
            .filter(|factory| seen.insert(factory.id().to_string()))
            .map(|factory| {
                let configuration = configuration_for(factory.as_ref(), settings);
                let barrier = factory.create(&self.context, &configuration);
                let scopes = scopes_for(factory.as_ref(), settings);
                debug!(barrier = %factory.id(), scopes = ?scopes, "Barrier created");
                ConfiguredBarrier {
                    factory,
                    barrier,
                    scopes,
                }
            })
            .collect();

        info!(count = configured.len(), "Barriers initialized");
        let mut state = self.lock();
        state.configured = configured;
        self.publish(&state);
    }

    /// Add a run-time barrier. The first registration of an id wins; later
    /// ones are ignored until it is unregistered.
    pub fn register_scoped_barrier(&self, scoped: ScopedBarrier) {
        let mut state = self.lock();
        if state.registered.iter().any(|b| b.id() == scoped.id()) {
            debug!(barrier = %scoped.id(), "Barrier already registered, ignoring");
            return;
        }
        debug!(barrier = %scoped.id(), "Barrier registered");
        state.registered.push(scoped);
        self.publish(&state);
    }

    /// Remove a run-time barrier. Configuration-driven barriers are kept.
    pub fn unregister_scoped_barrier(&self, barrier_id: &str) {
        let mut state = self.lock();
        let before = state.registered.len();
        state.registered.retain(|b| b.id() != barrier_id);
        if state.registered.len() != before {
            debug!(barrier = %barrier_id, "Barrier unregistered");
            self.publish(&state);
        }
    }

    /// Forward new settings to configuration-driven barriers and refresh
    /// their scopes
    #[instrument(name = "barrier_manager_update_settings", skip_all)]
    pub fn update_settings(&self, settings: &SdkSettings) {
        let mut state = self.lock();
        for configured in &mut state.configured {
            let configuration = configuration_for(configured.factory.as_ref(), settings);
            configured.barrier.update_configuration(&configuration);
            configured.scopes = scopes_for(configured.factory.as_ref(), settings);
        }
        self.publish(&state);
    }

    /// Clear every barrier
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.configured.clear();
        state.registered.clear();
        self.publish(&state);
    }

    /// Live scoped barrier set, unique by id
    pub fn barriers(&self) -> watch::Receiver<Vec<ScopedBarrier>> {
        self.barriers_tx.subscribe()
    }

    fn publish(&self, state: &ManagerState) {
        let configured = state.configured.iter().map(|c| {
            let barrier: Arc<dyn Barrier> = c.barrier.clone();
            ScopedBarrier::new(barrier, c.scopes.iter().cloned())
        });
        let mut seen = HashSet::new();
        let barriers: Vec<ScopedBarrier> = configured
            .chain(state.registered.iter().cloned())
            .filter(|b| seen.insert(b.id().to_string()))
            .collect();
        self.barriers_tx.send_replace(barriers);
    }
}

fn configuration_for(factory: &dyn BarrierFactory, settings: &SdkSettings) -> DataObject {
    settings
        .barriers
        .get(factory.id())
        .map(|s| s.configuration.clone())
        .unwrap_or_default()
        .merged(&factory.enforced_settings())
}

fn scopes_for(factory: &dyn BarrierFactory, settings: &SdkSettings) -> HashSet<BarrierScope> {
    match settings.barriers.get(factory.id()) {
        Some(s) if !s.scopes.is_empty() => s.scopes.iter().cloned().collect(),
        _ => factory
            .default_scopes()
            .unwrap_or_else(|| vec![BarrierScope::All])
            .into_iter()
            .collect(),
    }
}
