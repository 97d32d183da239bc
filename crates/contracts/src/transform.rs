//! Transformer contracts

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{DataObject, Dispatch, DispatchScope, TransformationScope};

/// Completion callback of a transformation; `None` drops the dispatch
pub type TransformCompletion = Box<dyn FnOnce(Option<Dispatch>) + Send>;

/// A pluggable payload transformation step
pub trait Transformer: Send + Sync {
    /// Id referenced by `TransformationSettings::transformer_id`
    fn id(&self) -> &str;

    /// Apply the transformation identified by `transformation_id`.
    ///
    /// Must call `completion` exactly once with the new dispatch, or `None`
    /// to drop it.
    fn apply_transformation(
        &self,
        transformation_id: &str,
        dispatch: Dispatch,
        scope: &DispatchScope,
        completion: TransformCompletion,
    );
}

/// One configured transformation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationSettings {
    /// Unique transformation id
    pub id: String,
    /// Id of the transformer implementation that runs it
    pub transformer_id: String,
    /// Stages it applies to
    #[serde(default)]
    pub scopes: HashSet<TransformationScope>,
    /// Free-form configuration for the transformer
    #[serde(default)]
    pub configuration: DataObject,
}

impl TransformationSettings {
    pub fn new(
        id: impl Into<String>,
        transformer_id: impl Into<String>,
        scopes: impl IntoIterator<Item = TransformationScope>,
    ) -> Self {
        Self {
            id: id.into(),
            transformer_id: transformer_id.into(),
            scopes: scopes.into_iter().collect(),
            configuration: DataObject::new(),
        }
    }

    pub fn matches(&self, scope: &DispatchScope) -> bool {
        self.scopes.iter().any(|s| s.matches(scope))
    }
}
