//! Sandboxed runner: executes a validated program on its own OS thread under
//! a wall-clock watchdog and captures a sanitized result.

use crate::analyzer::Violation;
use crate::chart::ChartSpec;
use crate::config::ResourceLimits;
use crate::context::ExecutionContext;
use crate::fault::{Fault, FaultKind, FaultResult};
use crate::interpreter::Interpreter;
use crate::policy::NodeKind;
use crate::syntax::parse_program;
use crate::table::{Column, Scalar, Table};
use crate::value::{range_len, RangeIter, Value};
use serde::Serialize;
use serde_json::{Map, Value as Json};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Names checked, in order, for the program's result
pub const RESULT_VARIABLES: [&str; 4] = ["result", "df_out", "fig", "output"];

const RUN_THREAD_STACK_BYTES: usize = 32 * 1024 * 1024;
const MAX_FAULT_MESSAGE_CHARS: usize = 512;
const INTERNAL_FAULT_MESSAGE: &str = "internal interpreter error";

/// A result value that left the interpreter. Never holds interpreter objects.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CapturedValue {
    Table(Table),
    Chart(ChartSpec),
    /// Anything else, as plain JSON plus its Python-style rendering
    Data { value: Json, text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success {
        captured_value: Option<CapturedValue>,
        captured_text: String,
    },
    Timeout,
    RuntimeFault {
        kind: FaultKind,
        message: String,
    },
    Rejected {
        violations: Vec<Violation>,
    },
}

impl ExecutionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success { .. } => "success",
            ExecutionOutcome::Timeout => "timeout",
            ExecutionOutcome::RuntimeFault { .. } => "runtime_fault",
            ExecutionOutcome::Rejected { .. } => "rejected",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    fn internal() -> Self {
        ExecutionOutcome::RuntimeFault {
            kind: FaultKind::Internal,
            message: INTERNAL_FAULT_MESSAGE.to_string(),
        }
    }
}

/// Runs an accepted program against `context`.
///
/// The program text is re-parsed inside the run thread; callers must only
/// pass programs whose verdict was accepted. On timeout the run's
/// cancellation flag is raised and `Timeout` is returned without waiting for
/// the thread, whose partial output is discarded.
pub async fn run(program: &str, context: ExecutionContext, limits: &ResourceLimits) -> ExecutionOutcome {
    let run_id = Uuid::new_v4();
    info!(
        "[RUNNER] Run {} starting: {} bytes, timeout {:?}",
        run_id,
        program.len(),
        limits.timeout()
    );
    let started = Instant::now();

    let program = program.to_string();
    let thread_limits = limits.clone();
    let outcome = supervise(run_id, limits.timeout(), move |cancel| {
        let tree = match parse_program(&program) {
            Ok(tree) => tree,
            Err(err) => {
                return ExecutionOutcome::Rejected {
                    violations: vec![Violation {
                        node_kind: NodeKind::Unparsable,
                        location: err.loc,
                        message: err.message,
                    }],
                }
            }
        };
        let max_collection_len = thread_limits.max_collection_len;
        let max_output_bytes = thread_limits.max_output_bytes;
        let (bindings, allowed_attributes) = context.into_parts();
        let mut interpreter = Interpreter::new(bindings, allowed_attributes, thread_limits, cancel);
        let result = interpreter.run(&tree);
        capture(&mut interpreter, result, max_collection_len, max_output_bytes)
    })
    .await;

    info!(
        "[RUNNER] Run {} finished in {:?}: {}",
        run_id,
        started.elapsed(),
        outcome.label()
    );
    outcome
}

/// Spawns `job` on a dedicated thread and waits for it under `timeout`
async fn supervise<F>(run_id: Uuid, timeout: Duration, job: F) -> ExecutionOutcome
where
    F: FnOnce(Arc<AtomicBool>) -> ExecutionOutcome + Send + 'static,
{
    let cancel = Arc::new(AtomicBool::new(false));
    let (tx, rx) = oneshot::channel();
    let flag = Arc::clone(&cancel);

    let mut name = run_id.simple().to_string();
    name.truncate(8);
    let spawned = thread::Builder::new()
        .name(format!("querysandbox-run-{}", name))
        .stack_size(RUN_THREAD_STACK_BYTES)
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(flag)))
                .unwrap_or_else(|_| ExecutionOutcome::internal());
            // The receiver is gone once the watchdog fired
            let _ = tx.send(outcome);
        });
    if let Err(err) = spawned {
        error!("[RUNNER] Run {}: failed to spawn run thread: {}", run_id, err);
        return ExecutionOutcome::internal();
    }

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => {
            error!("[RUNNER] Run {}: run thread exited without a result", run_id);
            ExecutionOutcome::internal()
        }
        Err(_) => {
            cancel.store(true, Ordering::SeqCst);
            warn!("[RUNNER] Run {} exceeded {:?}, cancelled", run_id, timeout);
            ExecutionOutcome::Timeout
        }
    }
}

// ============================================================================
// CAPTURE - Turning interpreter state into plain data
// ============================================================================

fn capture(
    interpreter: &mut Interpreter,
    result: FaultResult<()>,
    max_collection_len: usize,
    max_output_bytes: usize,
) -> ExecutionOutcome {
    if let Err(fault) = result {
        return fault_outcome(fault);
    }

    let bound = RESULT_VARIABLES
        .iter()
        .find_map(|name| interpreter.binding(name).map(|value| (*name, value.clone())));
    let captured_value = match bound {
        Some((name, value)) => {
            debug!("[RUNNER] Capturing '{}' ({})", name, value.type_name());
            match sanitize(&value, max_collection_len, max_output_bytes) {
                Ok(captured) => captured,
                Err(fault) => return fault_outcome(fault),
            }
        }
        None => interpreter
            .last_chart()
            .map(|chart| CapturedValue::Chart(chart.as_ref().clone())),
    };

    ExecutionOutcome::Success {
        captured_value,
        captured_text: interpreter.take_output(),
    }
}

fn fault_outcome(fault: Fault) -> ExecutionOutcome {
    match fault.kind {
        FaultKind::Interrupted => ExecutionOutcome::Timeout,
        kind => ExecutionOutcome::RuntimeFault {
            kind,
            message: sanitize_message(&fault.message),
        },
    }
}

/// Single line, bounded length
fn sanitize_message(message: &str) -> String {
    let flat: String = message
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let flat = flat.trim();
    if flat.chars().count() <= MAX_FAULT_MESSAGE_CHARS {
        return flat.to_string();
    }
    let mut cut: String = flat.chars().take(MAX_FAULT_MESSAGE_CHARS).collect();
    cut.push_str("...");
    cut
}

fn sanitize(
    value: &Value,
    max_collection_len: usize,
    max_output_bytes: usize,
) -> FaultResult<Option<CapturedValue>> {
    let captured = match value {
        Value::None => return Ok(None),
        Value::Table(table) => CapturedValue::Table(table.as_ref().clone()),
        Value::Series(column) => CapturedValue::Table(series_table(column)?),
        Value::Chart(chart) => CapturedValue::Chart(chart.as_ref().clone()),
        other => {
            let mut budget = max_collection_len;
            let value = bounded_json(other, &mut budget)?;
            let mut text = other.display();
            if text.len() > max_output_bytes {
                let mut end = max_output_bytes;
                while !text.is_char_boundary(end) {
                    end -= 1;
                }
                text.truncate(end);
                text.push_str(crate::interpreter::TRUNCATION_MARKER);
            }
            CapturedValue::Data { value, text }
        }
    };
    Ok(Some(captured))
}

fn series_table(column: &Column) -> FaultResult<Table> {
    let name = if column.name.is_empty() {
        "value".to_string()
    } else {
        column.name.clone()
    };
    Ok(Table::new(vec![column.clone().renamed(name)])?)
}

/// JSON conversion that counts elements against `budget`
fn bounded_json(value: &Value, budget: &mut usize) -> FaultResult<Json> {
    let mut spend = |n: usize| -> FaultResult<()> {
        if n > *budget {
            return Err(Fault::resource_limit("result too large to return"));
        }
        *budget -= n;
        Ok(())
    };
    match value {
        Value::List(items) | Value::Tuple(items) => {
            spend(items.len())?;
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                out.push(bounded_json(item, budget)?);
            }
            Ok(Json::Array(out))
        }
        Value::Range { .. } => {
            spend(range_len(value))?;
            Ok(Json::Array(RangeIter::new(value).map(Json::from).collect()))
        }
        Value::Dict(dict) => {
            spend(dict.len())?;
            let mut map = Map::new();
            for (key, item) in dict.iter() {
                map.insert(key.display(), bounded_json(item, budget)?);
            }
            Ok(Json::Object(map))
        }
        Value::Table(table) => {
            spend(table.num_rows())?;
            Ok(table.to_records())
        }
        Value::Series(column) => {
            spend(column.len())?;
            Ok(Json::Array(column.values.iter().map(Scalar::to_json).collect()))
        }
        other => Ok(other.to_json()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::CapabilityPolicy;
    use serde_json::json;

    fn sales() -> Arc<Table> {
        Arc::new(
            Table::from_json(&json!([
                {"region": "North", "sales": 100},
                {"region": "South", "sales": 250},
                {"region": "North", "sales": 50},
            ]))
            .unwrap(),
        )
    }

    fn context(binding: &str) -> ExecutionContext {
        let policy = CapabilityPolicy::custom(CapabilityPolicy::data_analysis())
            .data_binding(binding)
            .build()
            .unwrap();
        ExecutionContext::build(&policy, sales())
    }

    async fn run_default(program: &str) -> ExecutionOutcome {
        run(program, context("df"), &ResourceLimits::default()).await
    }

    #[tokio::test]
    async fn test_scalar_result() {
        let outcome = run(
            "result = data[\"sales\"].sum()",
            context("data"),
            &ResourceLimits::default(),
        )
        .await;
        match outcome {
            ExecutionOutcome::Success {
                captured_value: Some(CapturedValue::Data { value, text }),
                ..
            } => {
                assert_eq!(value, json!(400));
                assert_eq!(text, "400");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_result_variable_order() {
        let outcome = run_default("output = 1\nresult = 2").await;
        match outcome {
            ExecutionOutcome::Success {
                captured_value: Some(CapturedValue::Data { value, .. }),
                ..
            } => assert_eq!(value, json!(2)),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_series_becomes_table() {
        let outcome = run_default("df_out = df.groupby('region')['sales'].sum()").await;
        match outcome {
            ExecutionOutcome::Success {
                captured_value: Some(CapturedValue::Table(table)),
                ..
            } => {
                assert_eq!(table.num_rows(), 2);
                assert!(table.has_column("sales"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_last_chart_is_used_without_result() {
        let outcome = run_default("px.bar(df, x='region', y='sales', title='Sales')").await;
        match outcome {
            ExecutionOutcome::Success {
                captured_value: Some(CapturedValue::Chart(chart)),
                ..
            } => assert_eq!(chart.title.as_deref(), Some("Sales")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_print_only() {
        let outcome = run_default("print('rows:', len(df))").await;
        assert_eq!(
            outcome,
            ExecutionOutcome::Success {
                captured_value: None,
                captured_text: "rows: 3\n".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_faults_are_values() {
        match run_default("result = 1 / 0").await {
            ExecutionOutcome::RuntimeFault { kind, .. } => assert_eq!(kind, FaultKind::ZeroDivision),
            other => panic!("unexpected outcome: {:?}", other),
        }
        match run_default("result = df['profit']").await {
            ExecutionOutcome::RuntimeFault { kind, message } => {
                assert_eq!(kind, FaultKind::KeyError);
                assert!(message.contains("profit"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dataset_is_not_mutated() {
        let data = sales();
        let policy = CapabilityPolicy::data_analysis();
        let context = ExecutionContext::build(&policy, Arc::clone(&data));
        let outcome = run(
            "df['sales'] = df['sales'] * 2\nresult = df['sales'].sum()",
            context,
            &ResourceLimits::default(),
        )
        .await;
        assert!(outcome.is_success());
        assert_eq!(*data, *sales());
    }

    #[tokio::test]
    async fn test_unbounded_loop_times_out() {
        let limits = ResourceLimits::default().with_timeout(Duration::from_secs(2));
        let started = Instant::now();
        let outcome = run(
            "px.bar(df, x='region', y='sales')\nwhile True:\n    pass",
            context("df"),
            &limits,
        )
        .await;
        let elapsed = started.elapsed();
        assert_eq!(outcome, ExecutionOutcome::Timeout);
        assert!(elapsed >= Duration::from_millis(1_900), "returned early: {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(2_500), "returned late: {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_oversized_result_is_a_fault() {
        let mut limits = ResourceLimits::default();
        limits.max_collection_len = 100;
        let outcome = run("result = range(1000)", context("df"), &limits).await;
        match outcome {
            ExecutionOutcome::RuntimeFault { kind, .. } => assert_eq!(kind, FaultKind::ResourceLimit),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_fault() {
        let outcome = supervise(Uuid::new_v4(), Duration::from_secs(5), |_| {
            panic!("interpreter bug")
        })
        .await;
        assert_eq!(
            outcome,
            ExecutionOutcome::RuntimeFault {
                kind: FaultKind::Internal,
                message: "internal interpreter error".to_string(),
            }
        );
    }

    #[test]
    fn test_sanitize_message() {
        assert_eq!(sanitize_message("bad\nthing "), "bad thing");
        let long = "x".repeat(2_000);
        assert_eq!(sanitize_message(&long).chars().count(), MAX_FAULT_MESSAGE_CHARS + 3);
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = ExecutionOutcome::RuntimeFault {
            kind: FaultKind::KeyError,
            message: "'x'".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "runtime_fault");
        assert_eq!(json["kind"], "key_error");
    }
}
