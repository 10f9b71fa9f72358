//! Callable model for the rewind transaction library.
//!
//! A [`Callable`] pairs a function value with the declaration metadata the
//! dispatch layer needs: its name, whether it is blocking or async, and which
//! receiver or owning type it belongs to. [`classify`] turns that metadata into
//! a [`FunctionKind`], and the [`Registry`] resolves dotted names back into
//! callables when a ledger is imported.

mod arguments;
mod callable;
mod classify;
mod error;
mod registry;
mod types;

pub use arguments::Arguments;
pub use callable::{BoxFuture, Callable, Invoked, LAMBDA_IDENT, MethodMarker, Receiver};
pub use classify::{FunctionKind, classify, inspect};
pub use error::{BoxError, Fault, ResolveError};
pub use registry::{LiveHandle, Registry, pin_live, resolve_live};
pub use types::{Attribute, TypeDescriptor, TypeRef};

pub use serde_json::Value;
