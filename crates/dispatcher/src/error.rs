//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// No destination registered under this id
    #[error("destination '{0}' is not registered")]
    DestinationNotFound(String),

    /// A destination with this id is already registered
    #[error("destination '{0}' is already registered")]
    DuplicateDestination(String),

    /// The manager has been shut down
    #[error("dispatch manager is shut down")]
    Shutdown,

    /// Repository or configuration failure (from contract)
    #[error("contract error: {0}")]
    Contract(#[from] contracts::ContractError),
}
