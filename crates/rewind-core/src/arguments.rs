use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Positional and keyword arguments of a single invocation.
///
/// Keyword arguments keep their insertion order so that a recorded call
/// describes and exports identically to how it was made.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arguments {
    /// Positional arguments in call order.
    pub args: Vec<Value>,
    /// Keyword arguments, unique by name.
    pub kwargs: IndexMap<String, Value>,
}

impl Arguments {
    /// Create an empty argument list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an argument list from positional values only.
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            args: values.into_iter().map(Into::into).collect(),
            kwargs: IndexMap::new(),
        }
    }

    /// Append a positional argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument, replacing any previous value under the same name.
    #[must_use]
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Return a copy with `value` inserted before all positional arguments.
    #[must_use]
    pub fn prepend(&self, value: impl Into<Value>) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(value.into());
        args.extend(self.args.iter().cloned());
        Self {
            args,
            kwargs: self.kwargs.clone(),
        }
    }

    /// Positional argument at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Keyword argument by name.
    #[must_use]
    pub fn named(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }
}

impl<V: Into<Value>> FromIterator<V> for Arguments {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::positional(iter)
    }
}
