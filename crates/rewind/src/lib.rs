//! Compensating transactions for ordinary function calls.
//!
//! Functions wrapped in [`Transactional`] record every call in the ambient
//! [`Transaction`] before running. When the transaction scope fails, the
//! recorded calls are undone in reverse order by invoking each call's
//! compensating action with the call's original arguments.

mod ambient;
mod config;
mod dispatch;
mod driver;
mod error;
mod ledger;
mod record;

pub use config::{CompensationPolicy, TransactionConfig};
pub use dispatch::{Declaration, Outcome, PendingCall, Transactional, TransactionalBuilder};
pub use error::{CompensationError, ConfigError, ScopeError, TransactError};
pub use ledger::{LedgerState, Transaction, TransactionBuilder};
pub use record::{CallRecord, ExportedCall};

pub use rewind_core::{
    Arguments, Attribute, BoxError, Callable, Fault, FunctionKind, MethodMarker, Registry,
    TypeDescriptor, TypeRef, Value, classify, inspect,
};
