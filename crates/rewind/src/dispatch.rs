use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::RwLock;
use rewind_core::{
    Arguments, BoxFuture, Callable, Fault, FunctionKind, Invoked, MethodMarker, TypeRef, Value,
    inspect,
};
use tracing::debug;

use crate::error::{ConfigError, TransactError};
use crate::ledger::Transaction;
use crate::record::CallRecord;

/// How a wrapped function is declared.
#[derive(Debug, Clone, Default)]
pub enum Declaration {
    /// A free function or an already-bound method.
    #[default]
    Plain,
    /// A static method declared in the given type.
    Static(TypeRef),
    /// A class method of the given type; it receives the type's qualified
    /// name as its first argument.
    Class(TypeRef),
}

/// A function whose calls are recorded in the ambient transaction.
///
/// Each call appends a [`CallRecord`] to [`Transaction::current`] before the
/// function runs, so a failing call is compensated as well. Outside of a
/// transaction scope calls run without being recorded.
pub struct Transactional {
    function: Callable,
    kind: FunctionKind,
    rollback: RwLock<Option<Callable>>,
}

impl Transactional {
    /// Wrap a plain function.
    ///
    /// # Errors
    ///
    /// Same as [`TransactionalBuilder::build`].
    pub fn new(function: Callable) -> Result<Self, ConfigError> {
        Self::builder(function).build()
    }

    #[must_use]
    pub fn builder(function: Callable) -> TransactionalBuilder {
        TransactionalBuilder {
            function,
            declaration: Declaration::Plain,
            rollback: None,
        }
    }

    /// Set the compensating action used by calls made from now on.
    ///
    /// Calls already recorded keep the rollback they were recorded with.
    pub fn attach_rollback(&self, rollback: Callable) -> &Self {
        debug!(
            function = %self.name(),
            rollback = %rollback.qualified_name(),
            "attaching rollback"
        );
        *self.rollback.write() = Some(rollback);
        self
    }

    #[must_use]
    pub fn rollback(&self) -> Option<Callable> {
        self.rollback.read().clone()
    }

    #[must_use]
    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    /// Name used for recorded calls: `"<Type>.<ident>"` for methods.
    #[must_use]
    pub fn name(&self) -> String {
        self.function.display_name()
    }

    #[must_use]
    pub fn function(&self) -> &Callable {
        &self.function
    }

    /// Record the call in the ambient transaction, then invoke the function.
    ///
    /// Async functions return [`Outcome::Pending`]; nothing runs until the
    /// handle is awaited, but the call is already recorded.
    ///
    /// # Errors
    ///
    /// Returns `TransactError::Invocation` when a blocking function fails.
    pub fn call(&self, arguments: Arguments) -> Result<Outcome, TransactError> {
        let name = self.name();

        if let Some(transaction) = Transaction::current() {
            let record = CallRecord::new(name.clone(), arguments.clone(), self.rollback());
            match transaction.record(record) {
                Ok(()) => {}
                Err(TransactError::NotActive) => {
                    debug!(call = %name, "transaction not accepting calls, not recording");
                }
                Err(e) => return Err(e),
            }
        }

        let arguments = match self.function.class_receiver() {
            Some(owner) => arguments.prepend(owner.qualified_name()),
            None => arguments,
        };

        match self.function.invoke(arguments) {
            Invoked::Ready(Ok(value)) => Ok(Outcome::Ready(value)),
            Invoked::Ready(Err(source)) => Err(TransactError::Invocation { name, source }),
            Invoked::Suspended(future) => Ok(Outcome::Pending(PendingCall { name, future })),
        }
    }
}

impl fmt::Debug for Transactional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transactional")
            .field("function", &self.function)
            .field("kind", &self.kind)
            .field("rollback", &self.rollback.read().as_ref())
            .finish()
    }
}

/// Builder for a [`Transactional`] wrapper.
#[derive(Debug)]
pub struct TransactionalBuilder {
    function: Callable,
    declaration: Declaration,
    rollback: Option<Callable>,
}

impl TransactionalBuilder {
    #[must_use]
    pub fn declaration(mut self, declaration: Declaration) -> Self {
        self.declaration = declaration;
        self
    }

    /// Declare the function as a static method of `ty`.
    #[must_use]
    pub fn static_in(self, ty: TypeRef) -> Self {
        self.declaration(Declaration::Static(ty))
    }

    /// Declare the function as a class method of `ty`.
    #[must_use]
    pub fn class_of(self, ty: TypeRef) -> Self {
        self.declaration(Declaration::Class(ty))
    }

    #[must_use]
    pub fn rollback(mut self, rollback: Callable) -> Self {
        self.rollback = Some(rollback);
        self
    }

    /// Validate the function and build the wrapper.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MarkedBeforeWrap` when the function already
    /// carries a static or class marking, and `ConfigError::Unsupported` for
    /// lambdas, partial applications, generators and builtins.
    pub fn build(self) -> Result<Transactional, ConfigError> {
        let Self {
            function,
            declaration,
            rollback,
        } = self;

        if let Some(marker) = function.marker() {
            return Err(ConfigError::MarkedBeforeWrap {
                name: function.qualified_name(),
                marker,
            });
        }

        let kind = inspect(&function);
        if !kind.is_supported() {
            return Err(ConfigError::Unsupported {
                name: function.qualified_name(),
                kind,
            });
        }

        let (function, kind) = match declaration {
            Declaration::Plain => (function, kind),
            Declaration::Static(ty) => (
                function.declared_in(ty).mark(MethodMarker::Static),
                FunctionKind::StaticMethod,
            ),
            Declaration::Class(ty) => {
                let function = function.bind_type(ty).mark(MethodMarker::Class);
                let kind = inspect(&function);
                (function, kind)
            }
        };

        debug!(function = %function.qualified_name(), %kind, "wrapped transactional function");
        Ok(Transactional {
            function,
            kind,
            rollback: RwLock::new(rollback),
        })
    }
}

/// Result of a transactional call.
#[derive(Debug)]
pub enum Outcome {
    /// A blocking function returned.
    Ready(Value),
    /// An async function was called; await the handle to run it.
    Pending(PendingCall),
}

impl Outcome {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// The returned value of a blocking call.
    ///
    /// # Errors
    ///
    /// Returns `TransactError::Pending` for an async call.
    pub fn into_value(self) -> Result<Value, TransactError> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::Pending(pending) => Err(TransactError::Pending { name: pending.name }),
        }
    }
}

impl IntoFuture for Outcome {
    type Output = Result<Value, TransactError>;
    type IntoFuture = BoxFuture<Result<Value, TransactError>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            match self {
                Self::Ready(value) => Ok(value),
                Self::Pending(pending) => pending.await,
            }
        })
    }
}

/// Suspended invocation of an async transactional function.
pub struct PendingCall {
    name: String,
    future: BoxFuture<Result<Value, Fault>>,
}

impl PendingCall {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Future for PendingCall {
    type Output = Result<Value, TransactError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.future.as_mut().poll(cx).map(|result| {
            result.map_err(|source| TransactError::Invocation {
                name: this.name.clone(),
                source,
            })
        })
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
