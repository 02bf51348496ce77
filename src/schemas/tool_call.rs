use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::add_indent;

/// One completed tool invocation, as recorded in a [`Step`](super::Step).
///
/// Arguments and results are kept in their JSON form: that is the shape they
/// cross the tool boundary in, and the shape the trace file stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub args: Value,
    pub result: Value,
    pub duration_ms: u64,
}

impl ToolCallRecord {
    pub fn new(name: impl Into<String>, args: Value, result: Value, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            args,
            result,
            duration_ms,
        }
    }
}

impl Display for ToolCallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) => {}",
            self.name,
            self.args,
            add_indent(
                &serde_json::to_string_pretty(&self.result).unwrap_or_else(|_| self
                    .result
                    .to_string()),
                4,
                false
            )
        )
    }
}
