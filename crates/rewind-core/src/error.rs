use std::any::type_name;

use thiserror::Error;

/// Boxed error returned by user callables.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure raised by a callable, tagged with the kind of error that caused it.
///
/// Renders as `"<kind>: <message>"`, which is the form stored on a call record
/// when a compensation attempt fails.
#[derive(Debug, Error)]
#[error("{kind}: {source}")]
pub struct Fault {
    kind: String,
    source: BoxError,
}

impl Fault {
    /// Create a fault with an explicit kind label and message.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            source: message.into().into(),
        }
    }

    /// Create a fault with an explicit kind label around an existing error.
    pub fn labeled(kind: impl Into<String>, error: impl Into<BoxError>) -> Self {
        Self {
            kind: kind.into(),
            source: error.into(),
        }
    }

    /// Wrap an error, deriving the kind label from its static type.
    ///
    /// Only the static type is visible here, so string errors and boxed
    /// `dyn Error` values are labeled `Error`. A boxed `Fault` is passed
    /// through unchanged; return one built with [`Fault::new`] or
    /// [`Fault::labeled`] to keep a specific kind behind a `BoxError`.
    pub fn from_error<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        let kind = kind_of::<E>();
        let boxed: BoxError = error.into();
        match boxed.downcast::<Fault>() {
            Ok(fault) => *fault,
            Err(source) => Self {
                kind: kind.to_string(),
                source,
            },
        }
    }

    /// Short name of the error type (or the explicit label).
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Message of the underlying error without the kind prefix.
    #[must_use]
    pub fn message(&self) -> String {
        self.source.to_string()
    }

    #[must_use]
    pub fn into_source(self) -> BoxError {
        self.source
    }
}

fn kind_of<E>() -> &'static str {
    let full = type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    let short = base.rsplit("::").next().unwrap_or(base).trim_start_matches('&');
    match short {
        "str" | "String" | "Box" => "Error",
        other => other,
    }
}

/// Error resolving a callable reference back into a live callable.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResolveError {
    #[error("'{0}' is not a dotted '<module>.<identifier>' name")]
    InvalidName(String),

    #[error("module '{module}' not found while resolving '{name}'")]
    ModuleNotFound { module: String, name: String },

    #[error("attribute '{attribute}' not found in module '{module}'")]
    AttributeNotFound { module: String, attribute: String },

    #[error("live handle {id} belongs to process {pid}, not this process")]
    ForeignProcess { pid: u32, id: u64 },

    #[error("live handle {id} refers to a callable that no longer exists")]
    Expired { id: u64 },
}
