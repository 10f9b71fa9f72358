//! The "current transaction" slot.
//!
//! Backed by a task-local, so every task (and every synchronous scope on a
//! thread) sees only the ledger it entered itself. Nested scopes shadow the
//! outer ledger and the previous value, including none, comes back when the
//! inner scope ends, even on failure or panic.

use std::future::Future;

use crate::ledger::Transaction;

tokio::task_local! {
    static CURRENT: Transaction;
}

pub(crate) fn current() -> Option<Transaction> {
    CURRENT.try_with(Clone::clone).ok()
}

pub(crate) fn sync_scope<R>(transaction: Transaction, f: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(transaction, f)
}

pub(crate) async fn scope<F: Future>(transaction: Transaction, future: F) -> F::Output {
    CURRENT.scope(transaction, future).await
}
