//! Execution harness: run one script in a fresh namespace on a worker
//! thread and package what it produced.

use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;

use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::functions::CapabilityTable;
use crate::script::{self, Interpreter, Resource, ScriptError};

mod limits;
mod session;

pub use limits::Limits;
pub use session::OutputBuffer;
use session::Session;

/// Stack for the interpreter thread. Parser and value nesting ceilings keep
/// recursion far below it.
const WORKER_STACK_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    /// Syntax or runtime fault, including rejected simulation parameters.
    #[error("{0}")]
    ScriptFault(String),
    #[error("simulation result not found; assign the result to the `{binding}` variable or `return` it")]
    MissingResult { binding: String },
    #[error("{resource} limit exceeded: {detail}")]
    ResourceExceeded { resource: Resource, detail: String },
}

impl ExecutionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::ScriptFault(_) => "script_fault",
            ExecutionError::MissingResult { .. } => "missing_result",
            ExecutionError::ResourceExceeded { .. } => "resource_exceeded",
        }
    }

    pub fn resource(&self) -> Option<Resource> {
        match self {
            ExecutionError::ResourceExceeded { resource, .. } => Some(*resource),
            _ => None,
        }
    }
}

impl From<ScriptError> for ExecutionError {
    fn from(err: ScriptError) -> Self {
        match err.resource_kind() {
            Some(resource) => {
                let detail = match err.line {
                    Some(line) => format!("{} (line {line})", err.message),
                    None => err.message,
                };
                ExecutionError::ResourceExceeded { resource, detail }
            }
            None => ExecutionError::ScriptFault(err.to_string()),
        }
    }
}

/// What one invocation produced. Serializes to exactly
/// `{"result": ..., "output": ...}` or `{"error": ...}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success { result: serde_json::Value, output: String },
    Failure(ExecutionError),
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success { .. } => "success",
            ExecutionOutcome::Failure(err) => err.kind(),
        }
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        match self {
            ExecutionOutcome::Failure(err) => Some(err),
            ExecutionOutcome::Success { .. } => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ExecutionOutcome::Success { result, output } => {
                serde_json::json!({ "result": result, "output": output })
            }
            ExecutionOutcome::Failure(err) => serde_json::json!({ "error": err.to_string() }),
        }
    }
}

impl Serialize for ExecutionOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ExecutionOutcome::Success { result, output } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("result", result)?;
                map.serialize_entry("output", output)?;
                map.end()
            }
            ExecutionOutcome::Failure(err) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", &err.to_string())?;
                map.end()
            }
        }
    }
}

impl From<ExecutionError> for ExecutionOutcome {
    fn from(err: ExecutionError) -> Self {
        ExecutionOutcome::Failure(err)
    }
}

/// A capability table paired with the limits every execution runs under.
#[derive(Debug, Clone)]
pub struct Harness {
    capabilities: Arc<CapabilityTable>,
    limits: Limits,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(CapabilityTable::with_defaults(), Limits::default())
    }
}

impl Harness {
    pub fn new(capabilities: CapabilityTable, limits: Limits) -> Self {
        Self { capabilities: Arc::new(capabilities), limits }
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub async fn execute(&self, script: &str) -> ExecutionOutcome {
        execute(script, Arc::clone(&self.capabilities), &self.limits).await
    }

    pub fn execute_blocking(&self, script: &str) -> ExecutionOutcome {
        execute_blocking(script, &self.capabilities, &self.limits)
    }
}

/// Run `script` on a worker thread, giving up after `limits.timeout`.
///
/// Never fails: every fault is reported as [`ExecutionOutcome::Failure`].
pub async fn execute(script: &str, capabilities: Arc<CapabilityTable>, limits: &Limits) -> ExecutionOutcome {
    info!(bytes = script.len(), timeout_ms = limits.timeout.as_millis() as u64, "executing script");

    let cancel = Arc::new(AtomicBool::new(false));
    let (tx, rx) = oneshot::channel();
    let spawned = {
        let script = script.to_owned();
        let limits = limits.clone();
        let cancel = Arc::clone(&cancel);
        worker().spawn(move || {
            // the receiver is gone once the caller has timed out
            let _ = tx.send(run(&script, &capabilities, &limits, cancel));
        })
    };
    if let Err(err) = spawned {
        return worker_failed(err).into();
    }

    let outcome = match timeout(limits.timeout, rx).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => worker_failed("worker exited without an outcome").into(),
        Err(_) => {
            // The worker notices the flag at its next step check.
            cancel.store(true, Ordering::Relaxed);
            warn!(timeout_ms = limits.timeout.as_millis() as u64, "script timed out");
            ExecutionError::ResourceExceeded {
                resource: Resource::Time,
                detail: format!("no result within {} ms", limits.timeout.as_millis()),
            }
            .into()
        }
    };
    info!(outcome = outcome.kind(), "execution finished");
    outcome
}

/// Run `script` and wait for it. The deadline is enforced by the step
/// checks alone, so a single long capability call can overrun it.
pub fn execute_blocking(script: &str, capabilities: &CapabilityTable, limits: &Limits) -> ExecutionOutcome {
    info!(bytes = script.len(), "executing script inline");
    let cancel = Arc::new(AtomicBool::new(false));
    let outcome = thread::scope(|scope| {
        worker()
            .spawn_scoped(scope, || run(script, capabilities, limits, cancel))
            .map_err(worker_failed)?
            .join()
            .map_err(|_| worker_failed("worker panicked"))
    })
    .unwrap_or_else(ExecutionOutcome::from);
    info!(outcome = outcome.kind(), "execution finished");
    outcome
}

fn worker() -> thread::Builder {
    thread::Builder::new()
        .name("oscsim-script".to_string())
        .stack_size(WORKER_STACK_BYTES)
}

fn worker_failed(err: impl fmt::Display) -> ExecutionError {
    warn!(error = %err, "execution worker failed");
    ExecutionError::ScriptFault(format!("execution worker failed: {err}"))
}

fn run(source: &str, capabilities: &CapabilityTable, limits: &Limits, cancel: Arc<AtomicBool>) -> ExecutionOutcome {
    let program = match script::parse(source) {
        Ok(program) => program,
        Err(err) => {
            debug!(error = %err, "script rejected by parser");
            return ExecutionError::from(err).into();
        }
    };

    let mut session = Session::new(capabilities, limits, cancel);
    let completion = Interpreter::new(&mut session).run(&program);
    debug!(steps = session.steps(), "interpreter stopped");
    let mut completion = match completion {
        Ok(completion) => completion,
        Err(err) => {
            debug!(error = %err, "script raised");
            return ExecutionError::from(err).into();
        }
    };

    let value = match completion.returned.take() {
        Some(value) => value,
        None => match completion.globals.remove(&limits.result_binding) {
            Some(value) => value,
            None => {
                return ExecutionError::MissingResult { binding: limits.result_binding.clone() }.into();
            }
        },
    };
    ExecutionOutcome::Success { result: value.to_json(), output: session.into_output() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_default(script: &str) -> ExecutionOutcome {
        execute_blocking(script, &CapabilityTable::with_defaults(), &Limits::default())
    }

    #[test]
    fn reads_the_result_binding() {
        let outcome = run_default("result = {'answer': 42}\nprint('done')\n");
        assert_eq!(
            outcome,
            ExecutionOutcome::Success { result: serde_json::json!({ "answer": 42 }), output: "done\n".into() }
        );
    }

    #[test]
    fn custom_binding_name() {
        let limits = Limits { result_binding: "out".into(), ..Limits::default() };
        let table = CapabilityTable::with_defaults();
        let outcome = execute_blocking("out = 1\nresult = 2\n", &table, &limits);
        assert!(matches!(outcome, ExecutionOutcome::Success { ref result, .. } if *result == serde_json::json!(1)));
        let outcome = execute_blocking("result = 2\n", &table, &limits);
        assert_eq!(outcome.kind(), "missing_result");
        assert!(outcome.error().unwrap().to_string().contains("`out`"));
    }

    #[test]
    fn syntax_errors_are_script_faults() {
        let outcome = run_default("result = (1 +\n");
        let err = outcome.error().unwrap();
        assert_eq!(err.kind(), "script_fault");
        assert!(err.to_string().contains("SyntaxError"), "{err}");
    }

    #[test]
    fn step_ceiling_maps_to_resource_exceeded() {
        let limits = Limits { max_steps: 50, ..Limits::default() };
        let outcome = execute_blocking("while True:\n    pass\n", &CapabilityTable::empty(), &limits);
        assert_eq!(outcome.error().and_then(ExecutionError::resource), Some(Resource::Steps));
    }

    #[test]
    fn memory_ceiling_maps_to_resource_exceeded() {
        let limits = Limits { max_collection_len: 100, ..Limits::default() };
        let outcome = execute_blocking("result = [0] * 1000\n", &CapabilityTable::empty(), &limits);
        assert_eq!(outcome.error().and_then(ExecutionError::resource), Some(Resource::Memory));
    }

    #[test]
    fn resource_details_keep_the_cause() {
        let limits = Limits { max_collection_len: 100, ..Limits::default() };
        let outcome = execute_blocking("x = 1\nresult = [0] * 1000\n", &CapabilityTable::empty(), &limits);
        let Some(ExecutionError::ResourceExceeded { resource, detail }) = outcome.error() else {
            panic!("expected a resource failure, got {outcome:?}");
        };
        assert_eq!(*resource, Resource::Memory);
        assert_eq!(detail, "memory limit exceeded (line 2)");

        let limits = Limits { max_total_samples: 3, ..Limits::default() };
        let outcome = execute_blocking("result = simulate(t_end=1.0, dt=0.1)\n", &CapabilityTable::with_defaults(), &limits);
        let err = outcome.error().unwrap().to_string();
        assert!(err.contains("exceeds the sample budget"), "{err}");
        assert!(err.contains("line 1"), "{err}");
    }

    #[test]
    fn deep_parentheses_are_a_syntax_fault() {
        let script = format!("result = {}1{}\n", "(".repeat(5_000), ")".repeat(5_000));
        let err = run_default(&script).error().cloned().unwrap();
        assert_eq!(err.kind(), "script_fault");
        assert!(err.to_string().contains("SyntaxError: too many nested parentheses"), "{err}");
    }

    #[test]
    fn deeply_nested_values_are_a_memory_fault() {
        let outcome = run_default("x = []\nn = 0\nwhile n < 1000000:\n    x = [x]\n    n += 1\nresult = x\n");
        assert_eq!(outcome.error().and_then(ExecutionError::resource), Some(Resource::Memory));
        assert!(outcome.error().unwrap().to_string().contains("nested deeper than"));
    }

    #[test]
    fn most_negative_integer_round_trips() {
        let outcome = run_default("result = -9223372036854775808\n");
        assert!(
            matches!(outcome, ExecutionOutcome::Success { ref result, .. } if *result == serde_json::json!(i64::MIN)),
            "{outcome:?}"
        );
    }

    #[test]
    fn serializes_to_exact_shapes() {
        let success = ExecutionOutcome::Success { result: serde_json::json!([1.5]), output: "x\n".into() };
        assert_eq!(serde_json::to_string(&success).unwrap(), r#"{"result":[1.5],"output":"x\n"}"#);
        assert_eq!(serde_json::to_value(&success).unwrap(), success.to_json());

        let failure = ExecutionOutcome::from(ExecutionError::MissingResult { binding: "result".into() });
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json.as_object().map(|o| o.len()), Some(1));
        assert!(json["error"].as_str().unwrap().contains("`result`"));
    }
}
