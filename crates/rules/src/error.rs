//! Rule evaluation error types

use thiserror::Error;

/// Failures that make a condition undecidable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// The variable is absent and the operator cannot decide without it
    #[error("missing data item '{variable}' for operator '{operator}'")]
    MissingDataItem { variable: String, operator: String },

    /// The operator needs a filter and none was configured
    #[error("operator '{operator}' requires a filter")]
    MissingFilter { operator: String },

    /// A destination references a load rule that is not defined
    #[error("load rule '{0}' not found")]
    RuleNotFound(String),

    /// The regular expression filter does not compile
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl RuleError {
    pub fn missing_data_item(variable: impl Into<String>, operator: impl Into<String>) -> Self {
        Self::MissingDataItem {
            variable: variable.into(),
            operator: operator.into(),
        }
    }
}
