use std::fmt::{self, Display};

use crate::lisp::Value;

use super::{Message, TokenUsage, ToolCallRecord};

/// One LLM↔sandbox cycle within a mission.
///
/// Created when the loop enters the turn, finalized right before the next
/// turn begins or the loop terminates.
#[derive(Debug, Clone, Default)]
pub struct Turn {
    /// 1-based turn number.
    pub number: u32,
    /// The LLM response verbatim.
    pub raw_response: String,
    /// Program source extracted from the response, if any.
    pub program: Option<String>,
    /// Response text outside the code block.
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub prints: Vec<String>,
    /// Value of the turn's program, if it produced one.
    pub result: Option<Value>,
    pub success: bool,
    /// Captured conversation, populated when tracing is on.
    pub messages: Option<Vec<Message>>,
    pub token_usage: Option<TokenUsage>,
}

impl Turn {
    pub fn new(number: u32) -> Self {
        Turn {
            number,
            ..Default::default()
        }
    }
}

impl Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "turn {} ({}{} tool calls, {} prints)",
            self.number,
            if self.success { "ok, " } else { "failed, " },
            self.tool_calls.len(),
            self.prints.len()
        )
    }
}
