use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::json;

use crate::lisp::{self, EvalBudget, Interp, LispError, TraceScope, Value};
use crate::schemas::{Fault, FaultKind, ToolCallRecord};
use crate::tools::ToolDispatcher;

use super::Limits;

/// How a program finished, when it did not fault.
#[derive(Debug, Clone)]
pub enum ProgramResult {
    /// Value of the last top-level expression.
    Value(Value),
    /// Explicit `(return v)`.
    Returned(Value),
    /// Explicit `(fail m)`.
    Failed(Value),
}

/// Everything one sandboxed execution produced.
#[derive(Debug)]
pub struct ExecOutcome {
    pub result: Result<ProgramResult, Fault>,
    pub prints: Vec<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Top-level `def` / `memory/put` bindings made by the program.
    pub defs: BTreeMap<String, Value>,
}

/// Runs programs under [`Limits`]. The sandbox owns its interpreter for the
/// duration of one program; the host stays reachable only through the
/// supplied context and tool dispatcher.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    limits: Limits,
}

/// Inputs for one execution.
pub struct ExecRequest {
    pub source: String,
    pub context: BTreeMap<String, Value>,
    pub memory: BTreeMap<String, Value>,
    pub tools: Arc<dyn ToolDispatcher>,
    pub max_tool_calls: Option<u32>,
    pub pool_size: usize,
    pub trace: Option<TraceScope>,
}

impl Sandbox {
    pub fn new(limits: Limits) -> Self {
        Sandbox { limits }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Executes one program to completion, failure or cancellation.
    ///
    /// Partial prints and tool calls are discarded on timeout; kept on
    /// recoverable faults, where they feed the retry message.
    pub async fn execute(&self, request: ExecRequest) -> ExecOutcome {
        let program = match lisp::parse_program(&request.source) {
            Ok(program) => program,
            Err(error) => {
                return ExecOutcome {
                    result: Err(Fault::new(FaultKind::AnalysisError, error.to_string())),
                    prints: Vec::new(),
                    tool_calls: Vec::new(),
                    defs: BTreeMap::new(),
                }
            }
        };

        let deadline = Instant::now() + self.limits.wall_timeout;
        let interp = Interp::new(
            request.context,
            request.memory,
            request.tools,
            EvalBudget {
                deadline,
                iteration_cap: self.limits.iteration_cap,
                heap_limit: self.limits.heap_bytes,
            },
        )
        .with_max_tool_calls(request.max_tool_calls)
        .with_pool_size(request.pool_size)
        .with_trace(request.trace);

        let run = tokio::time::timeout(self.limits.wall_timeout, interp.run(&program));
        let outcome = std::panic::AssertUnwindSafe(run).catch_unwind().await;

        let result = match outcome {
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic during execution".to_string());
                Err(Fault::new(FaultKind::Crash, message))
            }
            Ok(Err(_elapsed)) => Err(Fault::new(
                FaultKind::Timeout,
                format!(
                    "execution exceeded the {} ms wall clock",
                    self.limits.wall_timeout.as_millis()
                ),
            )),
            Ok(Ok(Ok(value))) => Ok(ProgramResult::Value(value)),
            Ok(Ok(Err(LispError::Return(value)))) => Ok(ProgramResult::Returned(value)),
            Ok(Ok(Err(LispError::Fail(value)))) => Ok(ProgramResult::Failed(value)),
            Ok(Ok(Err(error))) => Err(fault_from_error(error, &self.limits)),
        };

        let discard_partials = matches!(
            &result,
            Err(fault) if fault.kind == FaultKind::Timeout || fault.kind == FaultKind::Crash
        );
        let output = interp.drain_output();
        if discard_partials {
            ExecOutcome {
                result,
                prints: Vec::new(),
                tool_calls: Vec::new(),
                defs: BTreeMap::new(),
            }
        } else {
            ExecOutcome {
                result,
                prints: output.prints,
                tool_calls: output.tool_calls,
                defs: output.defs,
            }
        }
    }
}

/// Maps interpreter errors onto the sandbox fault taxonomy. The `category`
/// detail key preserves the finer distinction the loop needs for retry
/// feedback.
fn fault_from_error(error: LispError, limits: &Limits) -> Fault {
    match error {
        LispError::DeadlineExceeded => Fault::new(
            FaultKind::Timeout,
            format!(
                "execution exceeded the {} ms wall clock",
                limits.wall_timeout.as_millis()
            ),
        ),
        LispError::IterationLimit { limit } => Fault::new(
            FaultKind::IterationLimit,
            format!("iteration limit of {limit} exceeded"),
        ),
        LispError::OutOfMemory { limit } => Fault::new(
            FaultKind::OutOfMemory,
            format!("memory limit of {limit} bytes exceeded"),
        ),
        LispError::Reader { .. } | LispError::Analysis { .. } => {
            Fault::new(FaultKind::AnalysisError, error.to_string())
        }
        LispError::UnknownTool(ref name) => Fault::new(FaultKind::RuntimeError, error.to_string())
            .with_detail(json!({ "category": "unknown_tool", "op": name })),
        LispError::CatalogTool(ref name) => Fault::new(FaultKind::RuntimeError, error.to_string())
            .with_detail(json!({ "category": "catalog_tool_called", "op": name })),
        LispError::ToolValidation { ref tool, .. } => {
            Fault::new(FaultKind::RuntimeError, error.to_string())
                .with_detail(json!({ "category": "tool_validation_error", "op": tool }))
        }
        LispError::ToolFailed { ref tool, .. } => {
            Fault::new(FaultKind::RuntimeError, error.to_string())
                .with_detail(json!({ "category": "tool_error", "op": tool }))
        }
        other => {
            let op = other.op().map(str::to_string);
            Fault::new(FaultKind::RuntimeError, other.to_string())
                .with_detail(json!({ "category": "runtime_error", "op": op }))
        }
    }
}
