use serde::{Deserialize, Serialize};

/// Counters dropped or collapsed by history compression, carried in `Usage`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompressionStats {
    pub turns_compressed: u32,
    pub printlns_dropped: u32,
    pub tool_calls_dropped: u32,
    pub error_turns_collapsed: u32,
}

impl CompressionStats {
    pub fn is_empty(&self) -> bool {
        self == &CompressionStats::default()
    }
}

/// Aggregate resource usage of one mission, reported on the terminal
/// [`Step`](super::Step).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub duration_ms: u64,
    pub memory_bytes: u64,
    pub turns: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub system_prompt_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionStats>,
}

impl Usage {
    pub fn record_tokens(&mut self, input: u32, output: u32) {
        self.input_tokens += input;
        self.output_tokens += output;
        self.total_tokens += input + output;
    }
}
