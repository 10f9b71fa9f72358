//! Integration tests for the compensation pass run at scope exit.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rewind::{
    Arguments, BoxError, Callable, CompensationPolicy, LedgerState, ScopeError, TransactError,
    Transaction, Transactional, Value,
};
use serde_json::json;

type Log = Arc<Mutex<Vec<Value>>>;

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn appender(ident: &str, log: &Log) -> Callable {
    let log = Arc::clone(log);
    Callable::function("steps", ident, move |args: &Arguments| {
        log.lock().extend(args.args.iter().cloned());
        Ok::<_, BoxError>(Value::Null)
    })
}

fn undo(ident: &str, log: &Log) -> Callable {
    let log = Arc::clone(log);
    Callable::function("steps", ident, move |args: &Arguments| {
        let arg = args.get(0).map(render).unwrap_or_default();
        log.lock().push(Value::from(format!("undo:{arg}")));
        Ok::<_, BoxError>(Value::Null)
    })
}

fn failing(ident: &str, message: &'static str) -> Callable {
    Callable::function("steps", ident, move |_: &Arguments| {
        Err::<Value, BoxError>(message.into())
    })
}

fn step(log: &Log) -> anyhow::Result<Transactional> {
    Ok(Transactional::builder(appender("step", log))
        .rollback(undo("undo", log))
        .build()?)
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Abort(&'static str);

#[test]
fn failure_compensates_in_reverse_order() -> anyhow::Result<()> {
    let log = Log::default();
    let step = step(&log)?;
    let transaction = Transaction::new();

    let result = transaction.scope(|| {
        for n in 1..=3 {
            step.call(Arguments::positional([n]))
                .map_err(|_| Abort("step failed"))?;
        }
        Err::<(), _>(Abort("boom"))
    });

    let err = result.expect_err("failure must propagate by default");
    assert!(matches!(err, ScopeError::Failed(Abort("boom"))));
    assert_eq!(
        *log.lock(),
        vec![json!(1), json!(2), json!(3), json!("undo:3"), json!("undo:2"), json!("undo:1")]
    );
    assert!(transaction.entries().iter().all(rewind::CallRecord::is_completed));
    Ok(())
}

#[test]
fn reraise_disabled_suppresses_the_failure() -> anyhow::Result<()> {
    let log = Log::default();
    let step = step(&log)?;
    let transaction = Transaction::builder().reraise(false).build();

    let result = transaction.scope(|| {
        step.call(Arguments::positional([1]))
            .map_err(|_| Abort("step failed"))?;
        Err::<(), _>(Abort("boom"))
    });

    assert!(matches!(result, Ok(None)));
    assert_eq!(*log.lock(), vec![json!(1), json!("undo:1")]);
    Ok(())
}

#[test]
fn success_leaves_records_uncompensated() -> anyhow::Result<()> {
    let log = Log::default();
    let step = step(&log)?;
    let transaction = Transaction::new();

    let value = transaction
        .scope(|| {
            step.call(Arguments::positional([1]))?;
            step.call(Arguments::positional([2]))?;
            Ok::<_, TransactError>("done")
        })
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    assert_eq!(value, Some("done"));
    assert_eq!(*log.lock(), vec![json!(1), json!(2)]);
    let entries = transaction.entries();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|call| !call.is_completed()));
    Ok(())
}

#[test]
fn failing_compensation_stops_the_pass() -> anyhow::Result<()> {
    let log = Log::default();
    let first = step(&log)?;
    let second = Transactional::builder(appender("reserve", &log))
        .rollback(failing("release", "release failed"))
        .build()?;
    let third = step(&log)?;
    let transaction = Transaction::builder().reraise(false).build();

    let result = transaction.scope(|| {
        first.call(Arguments::positional([1]))?;
        second.call(Arguments::positional([2]))?;
        third.call(Arguments::positional([3]))?;
        Err::<(), _>(TransactError::NotActive)
    });

    let err = result.expect_err("compensation failure must propagate despite reraise=false");
    let ScopeError::Compensation { error, original } = err else {
        anyhow::bail!("expected a compensation error, got {err:?}");
    };
    assert!(matches!(original, TransactError::NotActive));
    assert!(matches!(error, TransactError::Compensation(ref e) if e.name == "reserve"));

    assert_eq!(*log.lock(), vec![json!(1), json!(2), json!(3), json!("undo:3")]);
    let entries = transaction.entries();
    assert!(!entries[0].is_completed());
    assert!(entries[0].failure().is_none());
    assert_eq!(entries[1].failure(), Some("Error: release failed"));
    assert!(entries[2].is_completed());
    Ok(())
}

#[test]
fn best_effort_reports_every_failure() -> anyhow::Result<()> {
    let log = Log::default();
    let first = step(&log)?;
    let second = Transactional::builder(appender("reserve", &log))
        .rollback(failing("release", "release failed"))
        .build()?;
    let third = Transactional::new(appender("notify", &log))?;
    let transaction = Transaction::builder()
        .policy(CompensationPolicy::BestEffort)
        .build();

    let result = transaction.scope(|| {
        first.call(Arguments::positional([1]))?;
        second.call(Arguments::positional([2]))?;
        third.call(Arguments::positional([3]))?;
        Err::<(), _>(TransactError::NotActive)
    });

    let err = result.expect_err("must fail");
    let Some(TransactError::CompensationsFailed(failures)) = err.transaction_error() else {
        anyhow::bail!("expected collected failures, got {err:?}");
    };
    assert_eq!(failures.len(), 2);
    assert!(matches!(failures[0], TransactError::NoRollback { .. }));
    assert!(matches!(failures[1], TransactError::Compensation(_)));
    assert!(transaction.entries()[0].is_completed());
    assert_eq!(log.lock().last(), Some(&json!("undo:1")));
    Ok(())
}

#[test]
fn failing_step_is_compensated_first() -> anyhow::Result<()> {
    let log = Log::default();
    let step = step(&log)?;
    let step4 = Transactional::builder(failing("step4", "step 4 failed"))
        .rollback(undo("undo", &log))
        .build()?;
    let transaction = Transaction::builder().reraise(false).build();

    let result = transaction.scope(|| {
        for n in 1..=3 {
            step.call(Arguments::positional([n]))?;
        }
        step4.call(Arguments::positional(["step4arg"]))
    });

    assert!(matches!(result, Ok(None)));
    assert_eq!(
        *log.lock(),
        vec![
            json!(1),
            json!(2),
            json!(3),
            json!("undo:step4arg"),
            json!("undo:3"),
            json!("undo:2"),
            json!("undo:1"),
        ]
    );
    Ok(())
}

#[test]
fn manual_rollback_skips_completed_calls() -> anyhow::Result<()> {
    let log = Log::default();
    let step = step(&log)?;
    let transaction = Transaction::new();

    transaction
        .scope(|| {
            step.call(Arguments::positional([1]))?;
            step.call(Arguments::positional([2]))
        })
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    transaction.rollback_blocking()?;
    transaction.rollback_blocking()?;

    assert_eq!(
        *log.lock(),
        vec![json!(1), json!(2), json!("undo:2"), json!("undo:1")]
    );

    transaction.clear();
    assert!(transaction.is_empty());
    Ok(())
}

#[tokio::test]
async fn async_scope_awaits_async_rollbacks() -> anyhow::Result<()> {
    let log = Log::default();
    let sink = Arc::clone(&log);
    let undo_async = Callable::async_function("steps", "undo_async", move |args: Arguments| {
        let sink = Arc::clone(&sink);
        async move {
            tokio::task::yield_now().await;
            let arg = args.get(0).map(render).unwrap_or_default();
            sink.lock().push(Value::from(format!("undo:{arg}")));
            Ok::<_, BoxError>(Value::Null)
        }
    });
    let sink = Arc::clone(&log);
    let send = Transactional::builder(Callable::async_function(
        "steps",
        "send",
        move |args: Arguments| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().extend(args.args);
                Ok::<_, BoxError>(Value::Null)
            }
        },
    ))
    .rollback(undo_async)
    .build()?;
    let transaction = Transaction::new();

    let result = transaction
        .scope_async(async {
            send.call(Arguments::positional(["a"]))?.await?;
            send.call(Arguments::positional(["b"]))?.await?;
            Err::<(), _>(TransactError::NotActive)
        })
        .await;

    assert!(matches!(result, Err(ScopeError::Failed(TransactError::NotActive))));
    assert_eq!(
        *log.lock(),
        vec![json!("a"), json!("b"), json!("undo:b"), json!("undo:a")]
    );
    Ok(())
}

#[test]
fn panicking_rollback_keeps_every_entry() -> anyhow::Result<()> {
    let log = Log::default();
    let fragile = Transactional::builder(appender("reserve", &log))
        .rollback(Callable::function("steps", "release", |_: &Arguments| -> Result<Value, BoxError> {
            panic!("release exploded")
        }))
        .build()?;
    let step = step(&log)?;
    let transaction = Transaction::new();
    let inside = transaction.clone();

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(move || {
        inside.scope(|| {
            fragile.call(Arguments::positional([1]))?;
            step.call(Arguments::positional([2]))?;
            Err::<(), _>(TransactError::NotActive)
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(transaction.state(), LedgerState::Inactive);
    let entries = transaction.entries();
    assert_eq!(entries.len(), 2);
    assert!(!entries[0].is_completed());
    assert!(entries[1].is_completed());
    assert_eq!(*log.lock(), vec![json!(1), json!(2), json!("undo:2")]);
    Ok(())
}

#[tokio::test]
async fn cancelled_compensation_keeps_every_entry() -> anyhow::Result<()> {
    let slow_undo = Callable::async_function("steps", "slow_undo", |_: Arguments| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok::<_, BoxError>(Value::Null)
    });
    let log = Log::default();
    let step = Transactional::builder(appender("step", &log))
        .rollback(slow_undo)
        .build()?;
    let transaction = Transaction::new();

    let scope = transaction.scope_async(async {
        step.call(Arguments::positional([1]))?;
        step.call(Arguments::positional([2]))?;
        Err::<(), _>(TransactError::NotActive)
    });
    let elapsed = tokio::time::timeout(Duration::from_millis(50), scope).await;

    assert!(elapsed.is_err());
    assert_eq!(transaction.state(), LedgerState::Inactive);
    let entries = transaction.entries();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|call| !call.is_completed()));
    assert!(transaction.export_history()?.contains("\"args\": [\n            2\n        ]"));
    Ok(())
}
