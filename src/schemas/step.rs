use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::lisp::Value;

use super::{ToolCallRecord, Turn, Usage};

/// Why a mission ended in failure, or why a turn needed another attempt.
///
/// The loop distinguishes configuration errors (never retried), recoverable
/// errors (formatted and fed back to the LLM as the next user message) and
/// terminal conditions. See [`FailReason::is_recoverable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    InvalidSignature,
    PlaceholderUnbound,
    LlmError,
    NoCodeInResponse,
    AnalysisError,
    RuntimeError,
    ToolError,
    ToolValidationError,
    CatalogToolCalled,
    ReturnValidationFailed,
    Timeout,
    OutOfMemory,
    IterationLimit,
    MemoryLimitExceeded,
    MaxTurnsExceeded,
    TurnBudgetExhausted,
    MaxDepthExceeded,
    MissionTimeout,
    Failed,
}

impl FailReason {
    /// Whether the loop may feed this error back and try another turn.
    ///
    /// `MemoryLimitExceeded` depends on the agent's memory strategy and is
    /// handled where the strategy is known; it reports `false` here.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FailReason::NoCodeInResponse
                | FailReason::AnalysisError
                | FailReason::RuntimeError
                | FailReason::ToolError
                | FailReason::ToolValidationError
                | FailReason::CatalogToolCalled
                | FailReason::ReturnValidationFailed
                | FailReason::Timeout
                | FailReason::OutOfMemory
                | FailReason::IterationLimit
        )
    }
}

impl Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Structured failure attached to a terminal [`Step`].
#[derive(Debug, Clone)]
pub struct FailInfo {
    pub reason: FailReason,
    pub message: String,
    pub op: Option<String>,
    pub details: Option<Value>,
}

impl FailInfo {
    pub fn new(reason: FailReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            op: None,
            details: None,
        }
    }

    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The map bound to `ctx/fail` so the next program can branch on it.
    pub fn to_value(&self) -> Value {
        let mut map = Value::map_builder()
            .keyword_entry("reason", Value::keyword(self.reason.to_string()))
            .keyword_entry("message", Value::string(&self.message));
        if let Some(op) = &self.op {
            map = map.keyword_entry("op", Value::string(op));
        }
        if let Some(details) = &self.details {
            map = map.keyword_entry("details", details.clone());
        }
        map.build()
    }
}

impl Display for FailInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op {
            Some(op) => write!(f, "{} in {}: {}", self.reason, op, self.message),
            None => write!(f, "{}: {}", self.reason, self.message),
        }
    }
}

/// The result of any execution: a whole mission, a nested sub-mission, or a
/// single sandbox run.
///
/// On a terminal step exactly one of `return_value` / `fail` is set.
/// Intermediate per-turn steps may carry neither.
#[derive(Debug, Clone, Default)]
pub struct Step {
    pub return_value: Option<Value>,
    pub fail: Option<FailInfo>,
    pub prints: Vec<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub memory: BTreeMap<String, Value>,
    pub usage: Usage,
    pub turns: Option<Vec<Turn>>,
    pub signature: Option<String>,
}

impl Step {
    pub fn succeeded(return_value: Value) -> Self {
        Step {
            return_value: Some(return_value),
            ..Default::default()
        }
    }

    pub fn failed(fail: FailInfo) -> Self {
        Step {
            fail: Some(fail),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.fail.is_none()
    }
}

impl Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.return_value, &self.fail) {
            (Some(value), _) => write!(f, "Step(return: {value})")?,
            (None, Some(fail)) => write!(f, "Step(fail: {fail})")?,
            (None, None) => write!(f, "Step(pending)")?,
        }
        write!(
            f,
            " [{} turns, {} tool calls, {} ms]",
            self.usage.turns,
            self.tool_calls.len(),
            self.usage.duration_ms
        )
    }
}
