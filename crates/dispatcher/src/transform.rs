//! TransformerCoordinator - ordered, scope-filtered transformation chains

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use futures::future::join_all;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use contracts::{Dispatch, DispatchScope, SdkSettings, Transformer};

/// One resolved step: transformation id plus the implementation running it
type Step = (String, Arc<dyn Transformer>);

/// Runs the configured transformations at one pipeline stage
pub struct TransformerCoordinator {
    settings: watch::Receiver<SdkSettings>,
    transformers: Mutex<Vec<Arc<dyn Transformer>>>,
}

impl TransformerCoordinator {
    pub fn new(settings: watch::Receiver<SdkSettings>) -> Self {
        Self {
            settings,
            transformers: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn Transformer>>> {
        self.transformers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an implementation, replacing one with the same id
    pub fn register_transformer(&self, transformer: Arc<dyn Transformer>) {
        let mut transformers = self.lock();
        transformers.retain(|t| t.id() != transformer.id());
        debug!(transformer = %transformer.id(), "Transformer registered");
        transformers.push(transformer);
    }

    pub fn unregister_transformer(&self, transformer_id: &str) {
        self.lock().retain(|t| t.id() != transformer_id);
    }

    /// Apply every matching transformation in order; `None` if one dropped it
    pub async fn transform(&self, dispatch: Dispatch, scope: &DispatchScope) -> Option<Dispatch> {
        let steps = self.steps(scope);
        apply_steps(&steps, dispatch, scope).await
    }

    /// Transform each dispatch independently, keeping the survivors in order
    pub async fn transform_all(&self, dispatches: Vec<Dispatch>, scope: &DispatchScope) -> Vec<Dispatch> {
        if dispatches.is_empty() {
            return dispatches;
        }
        let steps = self.steps(scope);
        join_all(dispatches.into_iter().map(|d| apply_steps(&steps, d, scope)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Matching transformations in settings order. Identical entries run
    /// once; entries without a registered implementation are skipped.
    fn steps(&self, scope: &DispatchScope) -> Vec<Step> {
        let transformers = self.lock().clone();
        let settings = self.settings.borrow();
        let mut seen = HashSet::new();

        settings
            .transformations
            .iter()
            .filter(|t| t.matches(scope))
            .filter(|t| seen.insert((t.id.as_str(), t.transformer_id.as_str())))
            .filter_map(|t| {
                let transformer = transformers.iter().find(|r| r.id() == t.transformer_id);
                if transformer.is_none() {
                    debug!(
                        transformation = %t.id,
                        transformer = %t.transformer_id,
                        "Transformer not registered, skipping"
                    );
                }
                transformer.map(|r| (t.id.clone(), Arc::clone(r)))
            })
            .collect()
    }
}

async fn apply_steps(steps: &[Step], mut dispatch: Dispatch, scope: &DispatchScope) -> Option<Dispatch> {
    for (transformation_id, transformer) in steps {
        let (tx, rx) = oneshot::channel();
        let unchanged = dispatch.clone();
        transformer.apply_transformation(
            transformation_id,
            dispatch,
            scope,
            Box::new(move |result: Option<Dispatch>| {
                let _ = tx.send(result);
            }),
        );

        dispatch = match rx.await {
            Ok(Some(transformed)) => transformed,
            Ok(None) => {
                debug!(
                    dispatch = %unchanged.log_description(),
                    transformation = %transformation_id,
                    "Dispatch dropped by transformation"
                );
                return None;
            }
            Err(_) => {
                warn!(
                    dispatch = %unchanged.log_description(),
                    transformation = %transformation_id,
                    "Transformer never completed, keeping dispatch"
                );
                unchanged
            }
        };
    }
    Some(dispatch)
}
