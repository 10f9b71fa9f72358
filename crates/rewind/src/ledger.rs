use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use rewind_core::{Callable, Registry};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tracing::{debug, warn};

use crate::ambient;
use crate::config::{CompensationPolicy, TransactionConfig};
use crate::driver;
use crate::error::{ScopeError, TransactError};
use crate::record::{BinaryCall, CallRecord, ExportedCall};

/// Lifecycle of a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    /// Not entered, or already left.
    Inactive,
    /// Entered and accepting calls.
    Active,
    /// Running compensating actions.
    Compensating,
}

/// The ordered record of transactional calls made inside one scope.
///
/// A `Transaction` is a handle: clones refer to the same ledger. While a
/// scope runs, the ledger is the ambient transaction for that task or
/// synchronous call tree, and every transactional call made there appends a
/// [`CallRecord`]. If the scope fails, the records are compensated in reverse
/// order.
#[derive(Clone)]
pub struct Transaction {
    shared: Arc<Shared>,
}

struct Shared {
    config: TransactionConfig,
    state: Mutex<LedgerState>,
    entries: Mutex<Vec<CallRecord>>,
}

/// How a scope body ended.
enum Exit<T, E> {
    Clean(T),
    Failed {
        error: E,
        compensation: Result<(), TransactError>,
    },
}

/// Returns the ledger to `Inactive` when the scope ends, including on panic.
struct Activation<'a> {
    transaction: &'a Transaction,
}

impl Drop for Activation<'_> {
    fn drop(&mut self) {
        *self.transaction.shared.state.lock() = LedgerState::Inactive;
        debug!("left transaction scope");
    }
}

/// Restores the state a ledger had before a compensation pass started.
struct Compensating<'a> {
    transaction: &'a Transaction,
    previous: LedgerState,
}

impl Drop for Compensating<'_> {
    fn drop(&mut self) {
        *self.transaction.shared.state.lock() = self.previous;
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("config", &self.shared.config)
            .field("state", &self.state())
            .field("entries", &self.len())
            .finish()
    }
}

impl Transaction {
    /// Create an empty ledger with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TransactionConfig::default())
    }

    #[must_use]
    pub fn with_config(config: TransactionConfig) -> Self {
        Self::from_entries(config, Vec::new())
    }

    #[must_use]
    pub fn builder() -> TransactionBuilder {
        TransactionBuilder::default()
    }

    fn from_entries(config: TransactionConfig, entries: Vec<CallRecord>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(LedgerState::Inactive),
                entries: Mutex::new(entries),
            }),
        }
    }

    /// The ambient transaction of the calling task or scope, if any.
    #[must_use]
    pub fn current() -> Option<Transaction> {
        ambient::current()
    }

    #[must_use]
    pub fn config(&self) -> TransactionConfig {
        self.shared.config
    }

    #[must_use]
    pub fn state(&self) -> LedgerState {
        *self.shared.state.lock()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == LedgerState::Active
    }

    /// Whether both handles refer to the same ledger.
    #[must_use]
    pub fn same_ledger(&self, other: &Transaction) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Append a call. Only an active ledger accepts calls.
    ///
    /// # Errors
    ///
    /// Returns `TransactError::NotActive` outside of a scope and while
    /// compensating.
    pub fn record(&self, call: CallRecord) -> Result<(), TransactError> {
        let state = self.shared.state.lock();
        if *state != LedgerState::Active {
            return Err(TransactError::NotActive);
        }
        debug!(call = %call.name(), "recording call");
        self.shared.entries.lock().push(call);
        drop(state);
        Ok(())
    }

    /// Snapshot of the recorded calls in execution order.
    #[must_use]
    pub fn entries(&self) -> Vec<CallRecord> {
        self.shared.entries.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.entries.lock().is_empty()
    }

    /// Drop every recorded call.
    pub fn clear(&self) {
        self.shared.entries.lock().clear();
    }

    fn enter(&self) -> Result<Activation<'_>, TransactError> {
        let mut state = self.shared.state.lock();
        if *state != LedgerState::Inactive {
            return Err(TransactError::AlreadyActive);
        }
        *state = LedgerState::Active;
        debug!(entries = self.len(), "entered transaction scope");
        Ok(Activation { transaction: self })
    }

    fn begin_compensation(&self) -> Compensating<'_> {
        let mut state = self.shared.state.lock();
        let previous = *state;
        *state = LedgerState::Compensating;
        Compensating {
            transaction: self,
            previous,
        }
    }

    fn has_suspending_rollbacks(&self) -> bool {
        self.shared
            .entries
            .lock()
            .iter()
            .any(|call| call.rollback().is_some_and(Callable::suspends))
    }

    /// Run `body` as a transaction scope on the current thread.
    ///
    /// Returns `Ok(Some(value))` when the body succeeds. When it fails, every
    /// recorded call is compensated in reverse order before this returns;
    /// async compensating actions are driven to completion as well. The
    /// failure is then returned, or suppressed as `Ok(None)` when the ledger
    /// was built with `reraise` disabled.
    ///
    /// # Errors
    ///
    /// Returns `ScopeError::Failed` with the body's error after a clean
    /// compensation pass, `ScopeError::Compensation` when compensation itself
    /// failed (regardless of `reraise`), and `ScopeError::Ledger` when the
    /// ledger is already in use.
    pub fn scope<T, E, F>(&self, body: F) -> Result<Option<T>, ScopeError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: Debug,
    {
        let activation = self.enter().map_err(ScopeError::Ledger)?;
        let exit = ambient::sync_scope(self.clone(), || match body() {
            Ok(value) => Exit::Clean(value),
            Err(error) => Exit::Failed {
                error,
                compensation: self.rollback_blocking(),
            },
        });
        drop(activation);
        self.settle(exit)
    }

    /// Run `body` as a transaction scope inside the current task.
    ///
    /// Behaves like [`Transaction::scope`]; compensating actions are awaited
    /// one at a time.
    ///
    /// # Errors
    ///
    /// Same as [`Transaction::scope`].
    pub async fn scope_async<T, E, Fut>(&self, body: Fut) -> Result<Option<T>, ScopeError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Debug,
    {
        let activation = self.enter().map_err(ScopeError::Ledger)?;
        let exit = ambient::scope(self.clone(), async {
            match body.await {
                Ok(value) => Exit::Clean(value),
                Err(error) => Exit::Failed {
                    error,
                    compensation: self.rollback().await,
                },
            }
        })
        .await;
        drop(activation);
        self.settle(exit)
    }

    fn settle<T, E: Debug>(&self, exit: Exit<T, E>) -> Result<Option<T>, ScopeError<E>> {
        match exit {
            Exit::Clean(value) => Ok(Some(value)),
            Exit::Failed {
                error,
                compensation: Ok(()),
            } => {
                if self.shared.config.reraise {
                    Err(ScopeError::Failed(error))
                } else {
                    warn!(?error, "suppressing failure after compensation");
                    Ok(None)
                }
            }
            Exit::Failed {
                error,
                compensation: Err(compensation),
            } => Err(ScopeError::Compensation {
                error: compensation,
                original: error,
            }),
        }
    }

    /// Compensate every recorded call in reverse order.
    ///
    /// Calls that were already compensated are skipped. Entries stay in the
    /// ledger during and after the pass, so a cancelled pass or a panicking
    /// compensating action leaves every record in place; use
    /// [`Transaction::clear`] to drop them.
    ///
    /// # Errors
    ///
    /// With [`CompensationPolicy::FailFast`] the first failing compensation
    /// stops the pass and is returned. With
    /// [`CompensationPolicy::BestEffort`] all failures are collected into
    /// `TransactError::CompensationsFailed`.
    pub async fn rollback(&self) -> Result<(), TransactError> {
        let _compensating = self.begin_compensation();
        let pending = self.len();
        debug!(entries = pending, "starting compensation pass");

        let mut failures = Vec::new();
        for index in (0..pending).rev() {
            let Some(mut call) = self.shared.entries.lock().get(index).cloned() else {
                continue;
            };
            if call.is_completed() {
                debug!(call = %call.name(), "already compensated, skipping");
                continue;
            }

            let result = call.compensate().await;
            if let Some(slot) = self.shared.entries.lock().get_mut(index) {
                *slot = call;
            }

            if let Err(error) = result {
                match self.shared.config.policy {
                    CompensationPolicy::FailFast => return Err(error),
                    CompensationPolicy::BestEffort => failures.push(error),
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TransactError::CompensationsFailed(failures))
        }
    }

    /// [`Transaction::rollback`] for blocking callers.
    ///
    /// # Errors
    ///
    /// Same as [`Transaction::rollback`], plus `TransactError::Runtime` and
    /// `TransactError::WorkerPanicked` if async compensating actions could
    /// not be driven.
    pub fn rollback_blocking(&self) -> Result<(), TransactError> {
        driver::block_on(self.rollback(), self.has_suspending_rollbacks())?
    }

    /// Export the ledger as a JSON list of call documents, indented by four
    /// spaces.
    ///
    /// # Errors
    ///
    /// Returns `TransactError::Json` if serialization fails.
    pub fn export_history(&self) -> Result<String, TransactError> {
        let exported: Vec<ExportedCall> = self
            .shared
            .entries
            .lock()
            .iter()
            .map(CallRecord::export)
            .collect();
        let mut buffer = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        exported.serialize(&mut serializer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Rebuild a ledger from [`Transaction::export_history`] output,
    /// resolving rollbacks in the global registry.
    ///
    /// # Errors
    ///
    /// Returns `TransactError::Json` for malformed input and
    /// `TransactError::Resolution` for rollbacks that cannot be resolved.
    pub fn import_history(json: &str) -> Result<Self, TransactError> {
        Self::import_history_with(json, Registry::global())
    }

    /// Like [`Transaction::import_history`] with an explicit registry.
    ///
    /// # Errors
    ///
    /// Same as [`Transaction::import_history`].
    pub fn import_history_with(json: &str, registry: &Registry) -> Result<Self, TransactError> {
        let exported: Vec<ExportedCall> = serde_json::from_str(json)?;
        let entries = exported
            .into_iter()
            .map(|call| CallRecord::import_with(call, registry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_entries(TransactionConfig::default(), entries))
    }

    /// Encode the ledger as CBOR with live rollbacks. See
    /// [`CallRecord::to_bytes`] for the portability caveat.
    ///
    /// # Errors
    ///
    /// Returns `TransactError::EncodeBinary` if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransactError> {
        let binary: Vec<BinaryCall> = self
            .shared
            .entries
            .lock()
            .iter()
            .map(CallRecord::to_binary)
            .collect();
        let mut bytes = Vec::new();
        ciborium::into_writer(&binary, &mut bytes)?;
        Ok(bytes)
    }

    /// Decode a ledger produced by [`Transaction::to_bytes`] in this process.
    ///
    /// # Errors
    ///
    /// Returns `TransactError::DecodeBinary` for malformed input and
    /// `TransactError::Resolution` when a live rollback is unavailable.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransactError> {
        let binary: Vec<BinaryCall> = ciborium::from_reader(bytes)?;
        let entries = binary
            .into_iter()
            .map(CallRecord::from_binary)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_entries(TransactionConfig::default(), entries))
    }

    /// One line per call: `↩` compensated, `⚠` compensation failed, `✓`
    /// recorded only.
    #[must_use]
    pub fn summary(&self) -> String {
        self.shared
            .entries
            .lock()
            .iter()
            .map(|call| {
                if call.is_completed() {
                    format!("↩ {}", call.describe())
                } else if let Some(failure) = call.failure() {
                    format!("⚠ {} ({failure})", call.describe())
                } else {
                    format!("✓ {}", call.describe())
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Builder for a [`Transaction`] with non-default settings.
#[derive(Debug, Default)]
pub struct TransactionBuilder {
    config: TransactionConfig,
}

impl TransactionBuilder {
    /// Whether the failure that triggered compensation is propagated.
    #[must_use]
    pub fn reraise(mut self, reraise: bool) -> Self {
        self.config.reraise = reraise;
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: CompensationPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    #[must_use]
    pub fn build(self) -> Transaction {
        Transaction::with_config(self.config)
    }
}
