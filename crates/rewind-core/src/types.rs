use std::sync::Arc;

use indexmap::IndexMap;

/// Shared handle to a type descriptor.
pub type TypeRef = Arc<TypeDescriptor>;

/// How a type declares an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    /// Ordinary method taking the instance as receiver.
    Method,
    /// Method declared without any receiver.
    StaticMethod,
    /// Method receiving the owning type as its first argument.
    ClassMethod,
}

/// Declaration metadata of a user type: its name, bases, and declared attributes.
///
/// The classifier walks [`TypeDescriptor::mro`] to find out whether a plain
/// function was declared as a static or class method on some ancestor.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    module: String,
    name: String,
    bases: Vec<TypeRef>,
    attributes: IndexMap<String, Attribute>,
}

impl TypeDescriptor {
    #[must_use]
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            bases: Vec::new(),
            attributes: IndexMap::new(),
        }
    }

    /// Add a base type. Earlier bases take precedence during lookup.
    #[must_use]
    pub fn extends(mut self, base: TypeRef) -> Self {
        self.bases.push(base);
        self
    }

    /// Declare an attribute on this type.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    #[must_use]
    pub fn into_ref(self) -> TypeRef {
        Arc::new(self)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// `"<module>.<name>"`.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    #[must_use]
    pub fn bases(&self) -> &[TypeRef] {
        &self.bases
    }

    /// Attribute declared directly on this type, ignoring ancestors.
    #[must_use]
    pub fn own_attribute(&self, name: &str) -> Option<Attribute> {
        self.attributes.get(name).copied()
    }

    /// Method resolution order: this type first, then ancestors depth-first,
    /// left to right, each type listed once.
    #[must_use]
    pub fn mro(&self) -> Vec<&TypeDescriptor> {
        let mut order: Vec<&TypeDescriptor> = Vec::new();
        let mut pending: Vec<&TypeDescriptor> = vec![self];
        while let Some(current) = pending.pop() {
            if order
                .iter()
                .any(|seen| seen.qualified_name() == current.qualified_name())
            {
                continue;
            }
            order.push(current);
            for base in current.bases.iter().rev() {
                pending.push(base);
            }
        }
        order
    }

    /// First declaration of `name` along the method resolution order.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Attribute> {
        self.mro()
            .into_iter()
            .find_map(|ty| ty.own_attribute(name))
    }
}
