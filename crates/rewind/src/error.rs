use std::fmt::Debug;

use rewind_core::{Fault, FunctionKind, MethodMarker, ResolveError};
use thiserror::Error;

/// Error raised while building a transactional wrapper.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("cannot make '{name}' transactional: {kind} is not supported")]
    Unsupported { name: String, kind: FunctionKind },

    #[error(
        "cannot make '{name}' transactional: it is already marked as a {marker}; \
         wrap the undecorated function and declare the method kind instead"
    )]
    MarkedBeforeWrap { name: String, marker: MethodMarker },
}

/// Error from a failed compensating action.
#[derive(Debug, Error)]
#[error("compensation failed for call '{name}': {failure}")]
pub struct CompensationError {
    /// Name of the call whose compensation failed.
    pub name: String,
    /// The failure as recorded on the call record.
    pub failure: String,
    /// The underlying fault raised by the compensating action.
    #[source]
    pub source: Fault,
}

/// Errors raised by ledgers, call records and transactional wrappers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransactError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("call '{name}' failed")]
    Invocation {
        name: String,
        #[source]
        source: Fault,
    },

    #[error(transparent)]
    Compensation(#[from] CompensationError),

    #[error("{} compensation(s) failed", .0.len())]
    CompensationsFailed(Vec<TransactError>),

    #[error("no compensating action for '{name}'")]
    NoRollback { name: String },

    #[error("failed to resolve rollback reference")]
    Resolution(#[from] ResolveError),

    #[error("invalid ledger document")]
    Json(#[from] serde_json::Error),

    #[error("failed to encode call records")]
    EncodeBinary(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("failed to decode call records")]
    DecodeBinary(#[from] ciborium::de::Error<std::io::Error>),

    #[error("transaction is already active")]
    AlreadyActive,

    #[error("transaction is not accepting calls")]
    NotActive,

    #[error("failed to start a runtime for compensation")]
    Runtime(#[source] std::io::Error),

    #[error("compensation worker panicked")]
    WorkerPanicked,

    #[error("call '{name}' is asynchronous and must be awaited")]
    Pending { name: String },
}

/// Error leaving a transaction scope.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScopeError<E: Debug> {
    /// The scope failed and every compensation succeeded.
    #[error("transaction scope failed")]
    Failed(#[source] E),

    /// The scope failed and compensation failed as well.
    ///
    /// The compensation error supersedes the original failure.
    #[error("transaction scope failed and compensation did not complete")]
    Compensation {
        #[source]
        error: TransactError,
        original: E,
    },

    /// The scope could not be entered.
    #[error("transaction scope could not be entered")]
    Ledger(#[source] TransactError),
}

impl<E: Debug> ScopeError<E> {
    /// The failure raised inside the scope, if any.
    #[must_use]
    pub fn original(&self) -> Option<&E> {
        match self {
            Self::Failed(error) | Self::Compensation { original: error, .. } => Some(error),
            Self::Ledger(_) => None,
        }
    }

    /// The compensation or ledger error, if the scope failed for that reason.
    #[must_use]
    pub fn transaction_error(&self) -> Option<&TransactError> {
        match self {
            Self::Failed(_) => None,
            Self::Compensation { error, .. } | Self::Ledger(error) => Some(error),
        }
    }
}
