//! Running a compensation pass to completion from blocking code.

use std::future::Future;
use std::pin::pin;
use std::task::{Context, Poll, Waker};

use tokio::runtime::{Builder, Handle};
use tracing::debug;

use crate::error::TransactError;

/// Drive `future` to completion on the calling thread's behalf.
///
/// Without suspending work the future is polled inline. Otherwise it runs on
/// a fresh current-thread runtime, or, when the calling thread is already
/// inside a runtime, on a scoped worker thread with its own runtime while the
/// caller blocks.
pub(crate) fn block_on<F>(future: F, suspends: bool) -> Result<F::Output, TransactError>
where
    F: Future + Send,
    F::Output: Send,
{
    let mut future = pin!(future);

    if !suspends {
        let mut cx = Context::from_waker(Waker::noop());
        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return Ok(output);
        }
    }

    if Handle::try_current().is_err() {
        debug!("driving compensation on a temporary runtime");
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(TransactError::Runtime)?;
        return Ok(runtime.block_on(future));
    }

    debug!("runtime already active, driving compensation on a worker thread");
    std::thread::scope(|scope| {
        scope
            .spawn(move || {
                let runtime = Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(TransactError::Runtime)?;
                Ok(runtime.block_on(future))
            })
            .join()
            .map_err(|_| TransactError::WorkerPanicked)?
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_future_is_polled_inline() -> anyhow::Result<()> {
        assert_eq!(block_on(async { 7 }, false)?, 7);
        Ok(())
    }

    #[test]
    fn suspending_future_gets_a_temporary_runtime() -> anyhow::Result<()> {
        let output = block_on(
            async {
                tokio::task::yield_now().await;
                Handle::try_current().is_ok()
            },
            true,
        )?;
        assert!(output);
        Ok(())
    }

    #[tokio::test]
    async fn inside_runtime_the_future_runs_on_another_thread() -> anyhow::Result<()> {
        let caller = std::thread::current().id();
        let worker = block_on(
            async {
                tokio::task::yield_now().await;
                std::thread::current().id()
            },
            true,
        )?;
        assert_ne!(caller, worker);
        Ok(())
    }

    #[tokio::test]
    async fn worker_panic_is_reported() {
        let err = block_on(
            async {
                tokio::task::yield_now().await;
                panic!("rollback exploded");
            },
            true,
        )
        .expect_err("panic must surface");
        assert!(matches!(err, TransactError::WorkerPanicked));
    }
}
