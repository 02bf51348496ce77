use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::llm::{RetryConfig, LLM};
use crate::memory::MemoryStrategy;
use crate::prompt::{CompressionConfig, PromptLimits, SystemPromptOverrides};
use crate::schemas::OutputMode;
use crate::signature::Signature;
use crate::template::MissionTemplate;
use crate::tools::ToolTable;

use super::AgentBuilder;

/// How an agent names its model: pinned instance, registry name, or
/// whatever the run supplies.
#[derive(Clone, Default)]
pub enum LLMRef {
    #[default]
    FromRun,
    Named(String),
    Pinned(Arc<dyn LLM>),
}

/// Declarative agent configuration, immutable after construction.
///
/// Cheap to clone; all state lives behind one `Arc`. Built through
/// [`AgentBuilder`], which validates every field.
#[derive(Clone)]
pub struct Agent {
    pub(crate) inner: Arc<AgentConfig>,
}

pub(crate) struct AgentConfig {
    pub prompt: MissionTemplate,
    pub signature: Option<Signature>,
    pub tools: ToolTable,
    pub max_turns: u32,
    pub retry_turns: u32,
    pub turn_budget: Option<u32>,
    pub max_depth: u32,
    pub mission_timeout: Option<Duration>,
    pub per_turn_timeout: Duration,
    pub memory_limit_bytes: u64,
    pub output_mode: OutputMode,
    pub memory_strategy: MemoryStrategy,
    pub compression: Option<CompressionConfig>,
    pub prompt_limits: PromptLimits,
    pub overrides: SystemPromptOverrides,
    pub field_descriptions: BTreeMap<String, String>,
    pub llm_retry: RetryConfig,
    pub llm: LLMRef,
    pub thinking: bool,
    pub max_tool_calls: Option<u32>,
    pub pool_size: usize,
    pub iteration_cap: u64,
    pub sandbox_heap_bytes: u64,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.inner.signature.as_ref()
    }

    pub fn signature_string(&self) -> Option<String> {
        self.inner.signature.as_ref().map(Signature::render)
    }

    pub fn tools(&self) -> &ToolTable {
        &self.inner.tools
    }

    pub fn max_turns(&self) -> u32 {
        self.inner.max_turns
    }

    pub fn output_mode(&self) -> OutputMode {
        self.inner.output_mode
    }

    pub fn is_single_shot(&self) -> bool {
        self.inner.max_turns == 1
    }

    pub fn mission_source(&self) -> &str {
        self.inner.prompt.source()
    }
}
