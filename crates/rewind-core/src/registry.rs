use std::collections::HashMap;
use std::sync::{LazyLock, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::callable::{Callable, Core, Decorations};
use crate::error::ResolveError;

static GLOBAL: LazyLock<Registry> = LazyLock::new(Registry::new);
static LIVE: LazyLock<Mutex<HashMap<u64, (Weak<Core>, Decorations)>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Functions addressable by dotted `"<module>.<identifier>"` names.
///
/// This is the lookup table used when a serialized ledger is imported:
/// every rollback named in the export must have been registered here by the
/// importing process.
#[derive(Debug, Default)]
pub struct Registry {
    modules: RwLock<HashMap<String, IndexMap<String, Callable>>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    #[must_use]
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Register `callable` under its module and identifier, replacing any
    /// previous function with the same qualified name.
    pub fn register(&self, callable: &Callable) {
        debug!(function = %callable.qualified_name(), "registering function");
        self.modules
            .write()
            .entry(callable.module().to_string())
            .or_default()
            .insert(callable.ident().to_string(), callable.clone());
    }

    #[must_use]
    pub fn contains(&self, qualified_name: &str) -> bool {
        self.resolve(qualified_name).is_ok()
    }

    /// Look up a function by dotted name, splitting at the last dot.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::InvalidName` for names without a module part,
    /// `ModuleNotFound` when nothing was registered under the module, and
    /// `AttributeNotFound` when the module lacks the identifier.
    pub fn resolve(&self, qualified_name: &str) -> Result<Callable, ResolveError> {
        let (module, attribute) = qualified_name
            .rsplit_once('.')
            .filter(|(module, attribute)| !module.is_empty() && !attribute.is_empty())
            .ok_or_else(|| ResolveError::InvalidName(qualified_name.to_string()))?;

        let modules = self.modules.read();
        let functions = modules
            .get(module)
            .ok_or_else(|| ResolveError::ModuleNotFound {
                module: module.to_string(),
                name: qualified_name.to_string(),
            })?;
        functions
            .get(attribute)
            .cloned()
            .ok_or_else(|| ResolveError::AttributeNotFound {
                module: module.to_string(),
                attribute: attribute.to_string(),
            })
    }
}

/// Process-local reference to a live callable, for same-process transport.
///
/// A handle is only meaningful inside the process that created it and only
/// while the callable it points at is still alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveHandle {
    pub pid: u32,
    pub id: u64,
}

/// Make `callable` reachable through a [`LiveHandle`].
///
/// The table keeps only a weak reference, so pinning does not extend the
/// callable's lifetime.
#[must_use]
pub fn pin_live(callable: &Callable) -> LiveHandle {
    let id = callable.id();
    let mut live = LIVE.lock();
    live.retain(|_, (core, _)| core.strong_count() > 0);
    live.insert(id, callable.downgrade());
    LiveHandle {
        pid: std::process::id(),
        id,
    }
}

/// Recover the callable behind a handle created by [`pin_live`].
///
/// # Errors
///
/// Returns `ResolveError::ForeignProcess` for handles from another process
/// and `ResolveError::Expired` when the callable has been dropped.
pub fn resolve_live(handle: &LiveHandle) -> Result<Callable, ResolveError> {
    if handle.pid != std::process::id() {
        return Err(ResolveError::ForeignProcess {
            pid: handle.pid,
            id: handle.id,
        });
    }
    let live = LIVE.lock();
    let (core, decorations) = live
        .get(&handle.id)
        .ok_or(ResolveError::Expired { id: handle.id })?;
    let core = core
        .upgrade()
        .ok_or(ResolveError::Expired { id: handle.id })?;
    Ok(Callable::from_parts(core, decorations.clone()))
}
