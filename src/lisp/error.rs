use thiserror::Error;

use super::Value;

/// Errors and termination signals raised while reading, analyzing or
/// evaluating a PTC-Lisp program.
///
/// `Return` and `Fail` are not errors in the ordinary sense: they are the
/// program's termination signals, modeled as error variants so they bypass
/// ordinary continuation and surface at the sandbox boundary.
#[derive(Debug, Error)]
pub enum LispError {
    #[error("reader error at {line}:{col}: {message}")]
    Reader {
        message: String,
        line: usize,
        col: usize,
    },

    #[error("analysis error in {form}: {message}")]
    Analysis { message: String, form: String },

    #[error("unable to resolve symbol: {0}")]
    Unbound(String),

    #[error("wrong number of args to {name}: expected {expected}, got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("{op}: expected {expected}, got {got}")]
    Type {
        op: String,
        expected: String,
        got: String,
    },

    #[error("{message}")]
    Runtime { op: Option<String>, message: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool {0} is listed for planning only and cannot be called")]
    CatalogTool(String),

    #[error("invalid arguments for tool {tool}: {message}")]
    ToolValidation { tool: String, message: String },

    #[error("tool {tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("iteration limit of {limit} exceeded")]
    IterationLimit { limit: u64 },

    #[error("memory limit of {limit} bytes exceeded")]
    OutOfMemory { limit: u64 },

    #[error("execution deadline exceeded")]
    DeadlineExceeded,

    /// `(return v)` — terminate the program with a final value.
    #[error("return signal")]
    Return(Value),

    /// `(fail m)` — terminate the program with a failure value.
    #[error("fail signal")]
    Fail(Value),
}

impl LispError {
    pub fn runtime(op: impl Into<String>, message: impl Into<String>) -> Self {
        LispError::Runtime {
            op: Some(op.into()),
            message: message.into(),
        }
    }

    pub fn type_mismatch(
        op: impl Into<String>,
        expected: impl Into<String>,
        got: &Value,
    ) -> Self {
        LispError::Type {
            op: op.into(),
            expected: expected.into(),
            got: got.type_name().to_string(),
        }
    }

    /// The operation name carried by this error, when one applies.
    pub fn op(&self) -> Option<&str> {
        match self {
            LispError::Arity { name, .. } => Some(name),
            LispError::Type { op, .. } => Some(op),
            LispError::Runtime { op, .. } => op.as_deref(),
            LispError::UnknownTool(name)
            | LispError::CatalogTool(name)
            | LispError::ToolValidation { tool: name, .. }
            | LispError::ToolFailed { tool: name, .. } => Some(name),
            _ => None,
        }
    }

    /// Whether this variant is a termination signal rather than a failure.
    pub fn is_signal(&self) -> bool {
        matches!(self, LispError::Return(_) | LispError::Fail(_))
    }
}
