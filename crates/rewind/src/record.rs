use std::fmt;

use indexmap::IndexMap;
use rewind_core::{Arguments, Callable, LiveHandle, Registry, Value, pin_live, resolve_live};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CompensationError, TransactError};

/// One invocation of a transactional function.
///
/// The name and arguments never change after construction. `completed`
/// becomes true only after a successful compensation, and `failure` holds
/// the last compensation failure; neither is reset automatically.
#[derive(Debug, Clone)]
pub struct CallRecord {
    name: String,
    arguments: Arguments,
    rollback: Option<Callable>,
    completed: bool,
    failure: Option<String>,
}

/// Plain structural form of a [`CallRecord`].
///
/// `rollback` is the dotted `"<module>.<identifier>"` name of the
/// compensating action; importing resolves it through a [`Registry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedCall {
    pub name: String,
    pub args: Vec<Value>,
    pub kwargs: IndexMap<String, Value>,
    pub rollback: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub failure: Option<String>,
}

/// Binary form: the structural export plus a process-local handle to the
/// live rollback. Only decodable inside the process that encoded it.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct BinaryCall {
    call: ExportedCall,
    live: Option<LiveHandle>,
}

impl CallRecord {
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Arguments, rollback: Option<Callable>) -> Self {
        Self {
            name: name.into(),
            arguments,
            rollback,
            completed: false,
            failure: None,
        }
    }

    /// Set the completion flag when restoring an exported record.
    #[must_use]
    fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    /// Set the failure description, for records restored from elsewhere.
    #[must_use]
    pub fn with_failure(mut self, failure: impl Into<String>) -> Self {
        self.failure = Some(failure.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.arguments.args
    }

    #[must_use]
    pub fn kwargs(&self) -> &IndexMap<String, Value> {
        &self.arguments.kwargs
    }

    #[must_use]
    pub fn rollback(&self) -> Option<&Callable> {
        self.rollback.as_ref()
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// `"<name>(args=<args>, kwargs=<kwargs>)"` with JSON-rendered arguments.
    #[must_use]
    pub fn describe(&self) -> String {
        let args = Value::Array(self.arguments.args.clone());
        let kwargs: serde_json::Map<String, Value> = self
            .arguments
            .kwargs
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        format!(
            "{}(args={args}, kwargs={})",
            self.name,
            Value::Object(kwargs)
        )
    }

    /// Run the compensating action with the original arguments.
    ///
    /// Class-method rollbacks receive the owning type's qualified name as an
    /// extra first argument. Async rollbacks are awaited before returning.
    ///
    /// # Errors
    ///
    /// Returns `TransactError::NoRollback` if no compensating action is
    /// attached and `TransactError::Compensation` if the action fails. Both
    /// are recorded in `failure`; `completed` stays false.
    pub async fn compensate(&mut self) -> Result<(), TransactError> {
        let Some(rollback) = self.rollback.clone() else {
            let error = TransactError::NoRollback {
                name: self.name.clone(),
            };
            self.failure = Some(error.to_string());
            warn!(call = %self.name, "no compensating action attached");
            return Err(error);
        };

        let arguments = match rollback.class_receiver() {
            Some(owner) => self.arguments.prepend(owner.qualified_name()),
            None => self.arguments.clone(),
        };

        debug!(
            call = %self.name,
            rollback = %rollback.qualified_name(),
            "compensating call"
        );
        match rollback.invoke(arguments).resolve().await {
            Ok(_) => {
                self.completed = true;
                Ok(())
            }
            Err(fault) => {
                let failure = fault.to_string();
                warn!(call = %self.name, %failure, "compensation failed");
                self.failure = Some(failure.clone());
                Err(CompensationError {
                    name: self.name.clone(),
                    failure,
                    source: fault,
                }
                .into())
            }
        }
    }

    #[must_use]
    pub fn export(&self) -> ExportedCall {
        ExportedCall {
            name: self.name.clone(),
            args: self.arguments.args.clone(),
            kwargs: self.arguments.kwargs.clone(),
            rollback: self.rollback.as_ref().map(Callable::qualified_name),
            completed: self.completed,
            failure: self.failure.clone(),
        }
    }

    /// Rebuild a record, resolving its rollback in the global registry.
    ///
    /// # Errors
    ///
    /// Returns `TransactError::Resolution` when the rollback name cannot be
    /// resolved.
    pub fn import(exported: ExportedCall) -> Result<Self, TransactError> {
        Self::import_with(exported, Registry::global())
    }

    /// Rebuild a record, resolving its rollback in `registry`.
    ///
    /// # Errors
    ///
    /// Returns `TransactError::Resolution` when the rollback name cannot be
    /// resolved.
    pub fn import_with(exported: ExportedCall, registry: &Registry) -> Result<Self, TransactError> {
        let rollback = exported
            .rollback
            .as_deref()
            .map(|name| registry.resolve(name))
            .transpose()?;
        Ok(Self::restore(exported, rollback))
    }

    fn restore(exported: ExportedCall, rollback: Option<Callable>) -> Self {
        let arguments = Arguments {
            args: exported.args,
            kwargs: exported.kwargs,
        };
        let record = Self::new(exported.name, arguments, rollback).with_completed(exported.completed);
        match exported.failure {
            Some(failure) => record.with_failure(failure),
            None => record,
        }
    }

    /// Encode as a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `TransactError::Json` if serialization fails.
    pub fn to_text(&self) -> Result<String, TransactError> {
        Ok(serde_json::to_string(&self.export())?)
    }

    /// Decode a JSON document produced by [`CallRecord::to_text`].
    ///
    /// # Errors
    ///
    /// Returns `TransactError::Json` for malformed input and
    /// `TransactError::Resolution` when the rollback cannot be resolved.
    pub fn from_text(text: &str) -> Result<Self, TransactError> {
        Self::import(serde_json::from_str(text)?)
    }

    /// Encode as CBOR, carrying the live rollback.
    ///
    /// The result is tied to the current process: decoding elsewhere, or
    /// after the rollback was dropped, fails.
    ///
    /// # Errors
    ///
    /// Returns `TransactError::EncodeBinary` if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransactError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(&self.to_binary(), &mut bytes)?;
        Ok(bytes)
    }

    /// Decode bytes produced by [`CallRecord::to_bytes`] in this process.
    ///
    /// # Errors
    ///
    /// Returns `TransactError::DecodeBinary` for malformed input and
    /// `TransactError::Resolution` when the live rollback is unavailable.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransactError> {
        Self::from_binary(ciborium::from_reader(bytes)?)
    }

    pub(crate) fn to_binary(&self) -> BinaryCall {
        BinaryCall {
            call: self.export(),
            live: self.rollback.as_ref().map(pin_live),
        }
    }

    pub(crate) fn from_binary(binary: BinaryCall) -> Result<Self, TransactError> {
        let rollback = match (&binary.live, &binary.call.rollback) {
            (Some(handle), _) => Some(resolve_live(handle)?),
            (None, Some(name)) => Some(Registry::global().resolve(name)?),
            (None, None) => None,
        };
        Ok(Self::restore(binary.call, rollback))
    }
}

impl fmt::Display for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use rewind_core::{BoxError, Fault, TypeDescriptor};
    use serde_json::json;

    use super::*;

    fn recorder(module: &str, ident: &str, log: &Arc<Mutex<Vec<Value>>>) -> Callable {
        let log = Arc::clone(log);
        Callable::function(module, ident, move |args: &Arguments| {
            log.lock().push(Value::Array(args.args.clone()));
            Ok::<_, BoxError>(Value::Null)
        })
    }

    #[test]
    fn describe_renders_args_and_kwargs() {
        let record = CallRecord::new(
            "create_order",
            Arguments::positional([1, 2]).kwarg("sku", "A-1"),
            None,
        );
        assert_eq!(
            record.describe(),
            r#"create_order(args=[1,2], kwargs={"sku":"A-1"})"#
        );
        assert_eq!(record.to_string(), record.describe());
    }

    #[tokio::test]
    async fn compensate_without_rollback_records_failure() {
        let mut record = CallRecord::new("orphan", Arguments::new(), None);

        let err = record.compensate().await.expect_err("must fail");

        assert!(matches!(err, TransactError::NoRollback { .. }));
        assert!(!record.is_completed());
        assert_eq!(record.failure(), Some("no compensating action for 'orphan'"));
    }

    #[tokio::test]
    async fn successful_compensation_marks_completed() -> anyhow::Result<()> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let undo = recorder("records", "undo", &log);
        let mut record = CallRecord::new("step", Arguments::positional([7]), Some(undo));

        record.compensate().await?;

        assert!(record.is_completed());
        assert!(record.failure().is_none());
        assert_eq!(*log.lock(), vec![json!([7])]);
        Ok(())
    }

    #[tokio::test]
    async fn failing_compensation_records_kind_and_message() {
        let undo = Callable::function("records", "explode", |_: &Arguments| {
            "nope".parse::<u8>().map(Value::from)
        });
        let mut record = CallRecord::new("step", Arguments::new(), Some(undo));

        let err = record.compensate().await.expect_err("must fail");

        assert!(matches!(err, TransactError::Compensation(_)));
        assert!(!record.is_completed());
        assert_eq!(
            record.failure(),
            Some("ParseIntError: invalid digit found in string")
        );
    }

    #[tokio::test]
    async fn class_method_rollback_receives_owner_first() -> anyhow::Result<()> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let owner = TypeDescriptor::new("shop", "Inventory").into_ref();
        let undo = recorder("shop", "restock", &log).bind_type(owner);
        let mut record = CallRecord::new("Inventory.take", Arguments::positional([3]), Some(undo));

        record.compensate().await?;

        assert_eq!(*log.lock(), vec![json!(["shop.Inventory", 3])]);
        Ok(())
    }

    #[tokio::test]
    async fn async_class_method_rollback_receives_owner_first() -> anyhow::Result<()> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let owner = TypeDescriptor::new("shop", "Inventory").into_ref();
        let undo = Callable::async_function("shop", "restock", move |args: Arguments| {
            let sink = Arc::clone(&sink);
            async move {
                tokio::task::yield_now().await;
                sink.lock().push(Value::Array(args.args));
                Ok::<_, BoxError>(Value::Null)
            }
        })
        .bind_type(owner);
        let mut record = CallRecord::new("Inventory.take", Arguments::positional([3]), Some(undo));

        record.compensate().await?;

        assert!(record.is_completed());
        assert_eq!(*log.lock(), vec![json!(["shop.Inventory", 3])]);
        Ok(())
    }

    #[tokio::test]
    async fn labeled_fault_kind_reaches_the_record() {
        let undo = Callable::function("shop", "restock", |_: &Arguments| {
            Err::<Value, BoxError>(Box::new(Fault::new("StockError", "shelf is full")))
        });
        let mut record = CallRecord::new("take", Arguments::new(), Some(undo));

        record.compensate().await.expect_err("must fail");

        assert_eq!(record.failure(), Some("StockError: shelf is full"));
    }

    #[tokio::test]
    async fn async_rollback_is_awaited() -> anyhow::Result<()> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let undo = Callable::async_function("records", "undo_async", move |args: Arguments| {
            let sink = Arc::clone(&sink);
            async move {
                tokio::task::yield_now().await;
                sink.lock().push(Value::Array(args.args));
                Ok::<_, BoxError>(Value::Null)
            }
        });
        let mut record = CallRecord::new("step", Arguments::positional(["x"]), Some(undo));

        record.compensate().await?;

        assert!(record.is_completed());
        assert_eq!(*log.lock(), vec![json!(["x"])]);
        Ok(())
    }

    #[test]
    fn export_lists_fields_in_order() -> anyhow::Result<()> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let record = CallRecord::new(
            "charge",
            Arguments::positional([10]).kwarg("currency", "EUR"),
            Some(recorder("billing", "refund", &log)),
        )
        .with_failure("Error: gateway down");

        let text = record.to_text()?;
        assert_eq!(
            text,
            r#"{"name":"charge","args":[10],"kwargs":{"currency":"EUR"},"rollback":"billing.refund","completed":false,"failure":"Error: gateway down"}"#
        );
        Ok(())
    }

    #[test]
    fn import_with_resolves_rollback_by_name() -> anyhow::Result<()> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = Registry::new();
        let refund = recorder("billing", "refund", &log);
        registry.register(&refund);

        let original = CallRecord::new("charge", Arguments::positional([5]), Some(refund.clone()))
            .with_completed(true);
        let restored = CallRecord::import_with(original.export(), &registry)?;

        assert_eq!(restored.export(), original.export());
        assert!(restored.rollback().is_some_and(|r| r.same_function(&refund)));
        Ok(())
    }

    #[test]
    fn import_fails_for_unknown_rollback() {
        let exported = ExportedCall {
            name: "charge".to_string(),
            args: vec![],
            kwargs: IndexMap::new(),
            rollback: Some("nowhere.refund".to_string()),
            completed: false,
            failure: None,
        };
        let err = CallRecord::import_with(exported, &Registry::new()).expect_err("must fail");
        assert!(matches!(err, TransactError::Resolution(_)));
    }

    #[test]
    fn bytes_carry_the_live_rollback() -> anyhow::Result<()> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let unregistered = recorder("records", "not_in_any_registry", &log);
        let record = CallRecord::new("step", Arguments::positional([1]), Some(unregistered.clone()))
            .with_failure("Error: earlier attempt");

        let decoded = CallRecord::from_bytes(&record.to_bytes()?)?;

        assert_eq!(decoded.export(), record.export());
        assert!(decoded.rollback().is_some_and(|r| r.same_function(&unregistered)));
        Ok(())
    }
}
