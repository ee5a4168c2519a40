use thiserror::Error;

use crate::transaction::TransactionState;
use crate::transport::TransportError;

/// Result type for transaction engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for transaction engine operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A key field or argument is missing or malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not defined in the transaction's current state
    #[error("Operation '{operation}' is not allowed in state {state}")]
    IllegalState {
        state: TransactionState,
        operation: &'static str,
    },

    /// A configured limit was reached
    #[error("Out of resources: {0}")]
    OutOfResources(String),

    /// The transaction was terminated by an owner callback that just returned
    #[error("Transaction was destructed during a callback")]
    Destructed,

    /// No further address candidates remain
    #[error("Not found: {0}")]
    NotFound(String),

    /// The feature is not available in this engine instance
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The transaction has already reached the terminated state
    #[error("Transaction already terminated")]
    Terminated,

    /// The owner refused to let an outbound message go out
    #[error("Send aborted by owner: {0}")]
    Aborted(String),

    /// The transport collaborator failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl Error {
    pub(crate) fn illegal_state(state: TransactionState, operation: &'static str) -> Self {
        Error::IllegalState { state, operation }
    }

    /// Returns true if the transaction is gone (destructed or terminated)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Destructed | Error::Terminated)
    }

    /// Returns true for errors caused by the caller rather than the network
    pub fn is_structural(&self) -> bool {
        matches!(self, Error::InvalidArgument(_) | Error::IllegalState { .. })
    }
}
