use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of trace event. `*.start`/`*.stop` pairs share a span id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "run.start")]
    RunStart,
    #[serde(rename = "run.stop")]
    RunStop,
    #[serde(rename = "turn.start")]
    TurnStart,
    #[serde(rename = "turn.stop")]
    TurnStop,
    #[serde(rename = "llm.start")]
    LlmStart,
    #[serde(rename = "llm.stop")]
    LlmStop,
    #[serde(rename = "tool.start")]
    ToolStart,
    #[serde(rename = "tool.stop")]
    ToolStop,
    #[serde(rename = "nested.call")]
    NestedCall,
}

/// One recorded event. Events form a tree through `parent_span_id`, not
/// through lexical nesting; the finalized list is sorted by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub event: EventKind,
    /// Nanoseconds on the run's monotonic clock.
    pub timestamp_ns: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub meta: Value,
}
