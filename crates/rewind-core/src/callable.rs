use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use crate::arguments::Arguments;
use crate::error::{BoxError, Fault};
use crate::types::{Attribute, TypeRef};

/// Identifier given to anonymous closures.
pub const LAMBDA_IDENT: &str = "<lambda>";

/// Owned, sendable future used for suspending callables.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type BlockingFn = dyn Fn(&Arguments) -> Result<Value, Fault> + Send + Sync;
type AsyncFn = dyn Fn(Arguments) -> BoxFuture<Result<Value, Fault>> + Send + Sync;
type GeneratorFn =
    dyn Fn(&Arguments) -> Box<dyn Iterator<Item = Result<Value, Fault>> + Send> + Send + Sync;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// How the callable was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Form {
    Named,
    Lambda,
    Native,
    Partial,
    Opaque,
}

pub(crate) enum Body {
    Blocking(Box<BlockingFn>),
    Async(Box<AsyncFn>),
    Generator(Box<GeneratorFn>),
    Started(Mutex<Option<BoxFuture<Result<Value, Fault>>>>),
    Partial { inner: Callable, bound: Arguments },
}

pub(crate) struct Core {
    pub(crate) id: u64,
    pub(crate) module: String,
    pub(crate) ident: String,
    pub(crate) form: Form,
    pub(crate) body: Body,
}

/// Receiver a method is bound to.
#[derive(Debug, Clone)]
pub enum Receiver {
    /// Bound to an instance of the given type.
    Instance(TypeRef),
    /// Bound to the type itself.
    Type(TypeRef),
}

impl Receiver {
    #[must_use]
    pub fn type_ref(&self) -> &TypeRef {
        match self {
            Self::Instance(ty) | Self::Type(ty) => ty,
        }
    }
}

/// Static or class marking already applied to a callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodMarker {
    Static,
    Class,
}

impl fmt::Display for MethodMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => f.write_str("static method"),
            Self::Class => f.write_str("class method"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Decorations {
    pub(crate) receiver: Option<Receiver>,
    pub(crate) owner: Option<TypeRef>,
    pub(crate) marker: Option<MethodMarker>,
}

/// Result of invoking a callable: either finished, or a future to drive.
pub enum Invoked {
    Ready(Result<Value, Fault>),
    Suspended(BoxFuture<Result<Value, Fault>>),
}

impl Invoked {
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended(_))
    }

    /// Wait for the result, awaiting the future when the call suspended.
    ///
    /// # Errors
    ///
    /// Returns the callable's fault.
    pub async fn resolve(self) -> Result<Value, Fault> {
        match self {
            Self::Ready(result) => result,
            Self::Suspended(future) => future.await,
        }
    }
}

impl fmt::Debug for Invoked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Self::Suspended(_) => f.write_str("Suspended(..)"),
        }
    }
}

/// A function value together with the declaration metadata needed to
/// classify it and to name it in an exported ledger.
///
/// Cloning is cheap; clones share the same underlying function.
#[derive(Clone)]
pub struct Callable {
    pub(crate) core: Arc<Core>,
    pub(crate) decorations: Decorations,
}

impl Callable {
    fn from_core(module: impl Into<String>, ident: impl Into<String>, form: Form, body: Body) -> Self {
        Self {
            core: Arc::new(Core {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                module: module.into(),
                ident: ident.into(),
                form,
                body,
            }),
            decorations: Decorations::default(),
        }
    }

    fn blocking<F, T, E>(f: F) -> Body
    where
        F: Fn(&Arguments) -> Result<T, E> + Send + Sync + 'static,
        T: Into<Value> + 'static,
        E: Into<BoxError> + 'static,
    {
        Body::Blocking(Box::new(move |args: &Arguments| -> Result<Value, Fault> {
            f(args).map(Into::<Value>::into).map_err(Fault::from_error)
        }))
    }

    /// A named blocking function.
    pub fn function<F, T, E>(module: impl Into<String>, ident: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Arguments) -> Result<T, E> + Send + Sync + 'static,
        T: Into<Value> + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::from_core(module, ident, Form::Named, Self::blocking(f))
    }

    /// A named asynchronous function. Each invocation creates a new future.
    pub fn async_function<F, Fut, T, E>(
        module: impl Into<String>,
        ident: impl Into<String>,
        f: F,
    ) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Into<Value> + 'static,
        E: Into<BoxError> + 'static,
    {
        let body = Body::Async(Box::new(
            move |args: Arguments| -> BoxFuture<Result<Value, Fault>> {
                let future = f(args);
                Box::pin(async move {
                    future
                        .await
                        .map(Into::<Value>::into)
                        .map_err(Fault::from_error)
                })
            },
        ));
        Self::from_core(module, ident, Form::Named, body)
    }

    /// A named function producing a sequence of values.
    pub fn generator<F, I, T, E>(module: impl Into<String>, ident: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Arguments) -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Result<T, E>>,
        I::IntoIter: Send + 'static,
        T: Into<Value> + 'static,
        E: Into<BoxError> + 'static,
    {
        let body = Body::Generator(Box::new(
            move |args: &Arguments| -> Box<dyn Iterator<Item = Result<Value, Fault>> + Send> {
                Box::new(
                    f(args)
                        .into_iter()
                        .map(|item| item.map(Into::<Value>::into).map_err(Fault::from_error)),
                )
            },
        ));
        Self::from_core(module, ident, Form::Named, body)
    }

    /// A future that was already created and can be awaited exactly once.
    pub fn started<Fut, T, E>(module: impl Into<String>, ident: impl Into<String>, future: Fut) -> Self
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Into<Value> + 'static,
        E: Into<BoxError> + 'static,
    {
        let future: BoxFuture<Result<Value, Fault>> = Box::pin(async move {
            future
                .await
                .map(Into::<Value>::into)
                .map_err(Fault::from_error)
        });
        Self::from_core(module, ident, Form::Named, Body::Started(Mutex::new(Some(future))))
    }

    /// An anonymous closure.
    pub fn lambda<F, T, E>(module: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Arguments) -> Result<T, E> + Send + Sync + 'static,
        T: Into<Value> + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::from_core(module, LAMBDA_IDENT, Form::Lambda, Self::blocking(f))
    }

    /// A builtin function provided by the host rather than user code.
    pub fn native<F, T, E>(module: impl Into<String>, ident: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Arguments) -> Result<T, E> + Send + Sync + 'static,
        T: Into<Value> + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::from_core(module, ident, Form::Native, Self::blocking(f))
    }

    /// A callable object without function declaration metadata.
    pub fn opaque<F, T, E>(module: impl Into<String>, ident: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Arguments) -> Result<T, E> + Send + Sync + 'static,
        T: Into<Value> + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::from_core(module, ident, Form::Opaque, Self::blocking(f))
    }

    /// Partial application of `inner` with `bound` arguments filled in first.
    #[must_use]
    pub fn partial(inner: &Callable, bound: Arguments) -> Self {
        let module = inner.core.module.clone();
        let ident = inner.core.ident.clone();
        let body = Body::Partial {
            inner: inner.clone(),
            bound,
        };
        Self::from_core(module, ident, Form::Partial, body)
    }

    /// Bind to an instance of `ty`.
    #[must_use]
    pub fn bind_instance(mut self, ty: TypeRef) -> Self {
        self.decorations.receiver = Some(Receiver::Instance(ty));
        self
    }

    /// Bind to the type `ty` itself.
    #[must_use]
    pub fn bind_type(mut self, ty: TypeRef) -> Self {
        self.decorations.receiver = Some(Receiver::Type(ty));
        self
    }

    /// Record the type this function is declared in.
    #[must_use]
    pub fn declared_in(mut self, ty: TypeRef) -> Self {
        self.decorations.owner = Some(ty);
        self
    }

    /// Apply a static or class marking.
    #[must_use]
    pub fn mark(mut self, marker: MethodMarker) -> Self {
        self.decorations.marker = Some(marker);
        self
    }

    #[must_use]
    pub fn module(&self) -> &str {
        &self.core.module
    }

    #[must_use]
    pub fn ident(&self) -> &str {
        &self.core.ident
    }

    /// `"<module>.<ident>"`, the name a registry resolves.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        if self.core.module.is_empty() {
            self.core.ident.clone()
        } else {
            format!("{}.{}", self.core.module, self.core.ident)
        }
    }

    /// `"<Type>.<ident>"` for methods, the bare identifier otherwise.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self.owning_type() {
            Some(ty) => format!("{}.{}", ty.name(), self.core.ident),
            None => self.core.ident.clone(),
        }
    }

    #[must_use]
    pub fn receiver(&self) -> Option<&Receiver> {
        self.decorations.receiver.as_ref()
    }

    #[must_use]
    pub fn owner(&self) -> Option<&TypeRef> {
        self.decorations.owner.as_ref()
    }

    /// The bound receiver's type, falling back to the declaring type.
    #[must_use]
    pub fn owning_type(&self) -> Option<&TypeRef> {
        self.receiver()
            .map(Receiver::type_ref)
            .or(self.decorations.owner.as_ref())
    }

    /// The type passed as the implicit first argument when this callable runs
    /// as a class method.
    ///
    /// Decided by the declaration alone: a type receiver, a class marking on
    /// a declared owner, or an owner that declares the identifier as a class
    /// method. A static marking never has one. Async bodies are treated like
    /// blocking ones.
    #[must_use]
    pub fn class_receiver(&self) -> Option<&TypeRef> {
        match (self.receiver(), self.marker()) {
            (Some(Receiver::Type(ty)), _) => Some(ty),
            (Some(Receiver::Instance(_)), _) | (None, Some(MethodMarker::Static)) => None,
            (None, Some(MethodMarker::Class)) => self.owner(),
            (None, None) => self
                .owner()
                .filter(|ty| ty.lookup(&self.core.ident) == Some(Attribute::ClassMethod)),
        }
    }

    #[must_use]
    pub fn marker(&self) -> Option<MethodMarker> {
        self.decorations.marker
    }

    /// Whether invoking this callable yields a future.
    #[must_use]
    pub fn suspends(&self) -> bool {
        match &self.core.body {
            Body::Async(_) | Body::Started(_) => true,
            Body::Partial { inner, .. } => inner.suspends(),
            Body::Blocking(_) | Body::Generator(_) => false,
        }
    }

    /// Whether both handles share the same underlying function.
    #[must_use]
    pub fn same_function(&self, other: &Callable) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Call the function with `args`.
    ///
    /// Generators are drained into an array. An already-started future is
    /// handed out on the first invocation only.
    pub fn invoke(&self, args: Arguments) -> Invoked {
        match &self.core.body {
            Body::Blocking(f) => Invoked::Ready(f(&args)),
            Body::Async(f) => Invoked::Suspended(f(args)),
            Body::Generator(f) => Invoked::Ready(
                f(&args)
                    .collect::<Result<Vec<Value>, Fault>>()
                    .map(Value::Array),
            ),
            Body::Started(slot) => match slot.lock().take() {
                Some(future) => Invoked::Suspended(future),
                None => Invoked::Ready(Err(Fault::new(
                    "CoroutineReused",
                    format!("{} was already awaited", self.qualified_name()),
                ))),
            },
            Body::Partial { inner, bound } => {
                let mut merged = bound.clone();
                merged.args.extend(args.args);
                merged.kwargs.extend(args.kwargs);
                inner.invoke(merged)
            }
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.core.id
    }

    pub(crate) fn downgrade(&self) -> (Weak<Core>, Decorations) {
        (Arc::downgrade(&self.core), self.decorations.clone())
    }

    pub(crate) fn from_parts(core: Arc<Core>, decorations: Decorations) -> Self {
        Self { core, decorations }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("name", &self.qualified_name())
            .field("form", &self.core.form)
            .field("receiver", &self.decorations.receiver)
            .field("marker", &self.decorations.marker)
            .finish_non_exhaustive()
    }
}
