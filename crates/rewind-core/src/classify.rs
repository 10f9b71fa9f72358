use std::fmt;

use crate::callable::{Body, Callable, Form, LAMBDA_IDENT, Receiver};
use crate::types::{Attribute, TypeDescriptor};

/// Calling convention of a callable, as far as dispatch is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    RegularFunction,
    InstanceMethod,
    ClassMethod,
    StaticMethod,
    LambdaFunction,
    BuiltinFunction,
    AsyncFunction,
    GeneratorFunction,
    CoroutineFunction,
    PartialFunction,
    Unknown,
}

impl FunctionKind {
    /// Whether a transactional wrapper may be built around this kind.
    ///
    /// `Unknown` is supported: unrecognized callables are invoked as-is.
    #[must_use]
    pub fn is_supported(self) -> bool {
        !matches!(
            self,
            Self::LambdaFunction
                | Self::PartialFunction
                | Self::GeneratorFunction
                | Self::BuiltinFunction
        )
    }

    /// Whether the kind can be invoked without any receiver adjustment.
    #[must_use]
    pub fn is_directly_callable(self) -> bool {
        matches!(
            self,
            Self::AsyncFunction
                | Self::CoroutineFunction
                | Self::InstanceMethod
                | Self::RegularFunction
        )
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::RegularFunction => "regular function",
            Self::InstanceMethod => "instance method",
            Self::ClassMethod => "class method",
            Self::StaticMethod => "static method",
            Self::LambdaFunction => "lambda",
            Self::BuiltinFunction => "builtin function",
            Self::AsyncFunction => "async function",
            Self::GeneratorFunction => "generator function",
            Self::CoroutineFunction => "coroutine",
            Self::PartialFunction => "partial function",
            Self::Unknown => "unknown callable",
        };
        f.write_str(label)
    }
}

/// Classify `callable`, consulting `hint`'s method resolution order for
/// functions declared as static or class methods.
///
/// Checks run in a fixed priority order; the first match wins.
#[must_use]
pub fn classify(hint: Option<&TypeDescriptor>, callable: &Callable) -> FunctionKind {
    let core = &callable.core;

    if core.form == Form::Partial {
        return FunctionKind::PartialFunction;
    }
    if core.form == Form::Native {
        return FunctionKind::BuiltinFunction;
    }
    match core.body {
        Body::Async(_) => return FunctionKind::AsyncFunction,
        Body::Started(_) => return FunctionKind::CoroutineFunction,
        Body::Generator(_) => return FunctionKind::GeneratorFunction,
        Body::Blocking(_) | Body::Partial { .. } => {}
    }
    match callable.receiver() {
        Some(Receiver::Type(_)) => return FunctionKind::ClassMethod,
        Some(Receiver::Instance(_)) => return FunctionKind::InstanceMethod,
        None => {}
    }
    if core.form == Form::Opaque {
        return FunctionKind::Unknown;
    }
    if core.form == Form::Lambda || core.ident == LAMBDA_IDENT {
        return FunctionKind::LambdaFunction;
    }
    match hint.and_then(|ty| ty.lookup(&core.ident)) {
        Some(Attribute::StaticMethod) => FunctionKind::StaticMethod,
        Some(Attribute::ClassMethod) => FunctionKind::ClassMethod,
        Some(Attribute::Method) | None => FunctionKind::RegularFunction,
    }
}

/// Classify `callable` using its own receiver or declaring type as the hint.
#[must_use]
pub fn inspect(callable: &Callable) -> FunctionKind {
    classify(callable.owning_type().map(AsRef::as_ref), callable)
}
