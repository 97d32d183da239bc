//! LoadRuleEngine - per-destination inclusion filter

use std::collections::HashMap;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use contracts::{Condition, Dispatch, Rule, SdkSettings};

use crate::condition::{Matchable, evaluate_with};
use crate::RuleError;

/// Result of splitting a batch by load rules
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchSplit {
    /// Dispatches the destination should receive, in input order
    pub accepted: Vec<Dispatch>,
    /// Dispatches that failed or could not be evaluated, in input order
    pub rejected: Vec<Dispatch>,
}

/// Evaluates destination rules from the live settings
#[derive(Clone)]
pub struct LoadRuleEngine {
    settings: watch::Receiver<SdkSettings>,
}

/// Snapshot of what one destination needs for evaluation
struct DestinationRules {
    rule: Rule<String>,
    load_rules: HashMap<String, Rule<Condition>>,
}

impl LoadRuleEngine {
    pub fn new(settings: watch::Receiver<SdkSettings>) -> Self {
        Self { settings }
    }

    /// Partition `dispatches` for `destination_id`.
    ///
    /// Destinations without a rule accept everything. Evaluation failures
    /// reject the dispatch and never abort the batch.
    #[instrument(
        name = "load_rules_evaluate",
        skip(self, dispatches),
        fields(destination = %destination_id, count = dispatches.len())
    )]
    pub fn evaluate_load_rules(&self, destination_id: &str, dispatches: Vec<Dispatch>) -> DispatchSplit {
        let Some(rules) = self.rules_for(destination_id) else {
            return DispatchSplit {
                accepted: dispatches,
                rejected: Vec::new(),
            };
        };

        let mut split = DispatchSplit::default();
        for dispatch in dispatches {
            match rules.evaluate(&dispatch) {
                Ok(true) => split.accepted.push(dispatch),
                Ok(false) => {
                    debug!(dispatch = %dispatch.log_description(), "Rejected by load rules");
                    split.rejected.push(dispatch);
                }
                Err(e) => {
                    warn!(
                        dispatch = %dispatch.log_description(),
                        error = %e,
                        "Load rule evaluation failed, rejecting"
                    );
                    split.rejected.push(dispatch);
                }
            }
        }
        split
    }

    /// Evaluate the destination's rule for one dispatch
    pub fn evaluate(&self, destination_id: &str, dispatch: &Dispatch) -> Result<bool, RuleError> {
        match self.rules_for(destination_id) {
            Some(rules) => rules.evaluate(dispatch),
            None => Ok(true),
        }
    }

    fn rules_for(&self, destination_id: &str) -> Option<DestinationRules> {
        let settings = self.settings.borrow();
        let rule = settings.destinations.get(destination_id)?.rules.clone()?;
        let load_rules = rule
            .leaves()
            .into_iter()
            .filter_map(|id| settings.load_rules.get(id).map(|r| (id.clone(), r.clone())))
            .collect();
        Some(DestinationRules { rule, load_rules })
    }
}

impl DestinationRules {
    fn evaluate(&self, dispatch: &Dispatch) -> Result<bool, RuleError> {
        evaluate_with(&self.rule, &mut |id: &String| {
            self.load_rules
                .get(id)
                .ok_or_else(|| RuleError::RuleNotFound(id.clone()))?
                .matches(dispatch.payload())
        })
    }
}
