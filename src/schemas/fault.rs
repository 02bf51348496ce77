use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of bound or failure stopped a sandboxed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Timeout,
    OutOfMemory,
    IterationLimit,
    Crash,
    AnalysisError,
    RuntimeError,
}

impl Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::Timeout => "timeout",
            FaultKind::OutOfMemory => "out_of_memory",
            FaultKind::IterationLimit => "iteration_limit",
            FaultKind::Crash => "crash",
            FaultKind::AnalysisError => "analysis_error",
            FaultKind::RuntimeError => "runtime_error",
        };
        write!(f, "{name}")
    }
}

/// Structured failure produced by the sandbox instead of a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

impl Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
