use std::collections::BTreeMap;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value as Json;

use crate::lisp::Value;
use crate::llm::{LLMRegistry, LLM};
use crate::trace::{TraceMode, Tracer};

/// Per-run inputs: the model, the context data, tracing, provider options.
#[derive(Default)]
pub struct RunOptions {
    pub llm: Option<Arc<dyn LLM>>,
    pub context: BTreeMap<String, Value>,
    pub registry: Option<LLMRegistry>,
    pub trace_mode: TraceMode,
    /// Opaque options forwarded to the LLM callback.
    pub llm_opts: Json,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_llm(mut self, llm: Arc<dyn LLM>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_context(mut self, context: BTreeMap<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_registry(mut self, registry: LLMRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_trace_mode(mut self, trace_mode: TraceMode) -> Self {
        self.trace_mode = trace_mode;
        self
    }

    pub fn with_llm_opts(mut self, llm_opts: Json) -> Self {
        self.llm_opts = llm_opts;
        self
    }
}

/// Internal nesting state threaded through sub-agent calls: depth, the
/// shared turn budget, the shared mission deadline, and the trace collector.
#[derive(Clone)]
pub(crate) struct RunScope {
    pub depth: u32,
    /// Shared across the whole nested tree when a `turn_budget` is set.
    pub remaining_turns: Option<Arc<AtomicI64>>,
    pub mission_deadline: Option<Instant>,
    pub tracer: Tracer,
    pub parent_span: Option<String>,
}

impl RunScope {
    pub fn root(trace_mode: TraceMode) -> Self {
        RunScope {
            depth: 0,
            remaining_turns: None,
            mission_deadline: None,
            tracer: Tracer::new(trace_mode),
            parent_span: None,
        }
    }

    /// The scope a nested agent runs under: one level deeper, same budget
    /// and deadline, a child collector.
    pub fn nested(&self, parent_span: Option<String>) -> Self {
        RunScope {
            depth: self.depth + 1,
            remaining_turns: self.remaining_turns.clone(),
            mission_deadline: self.mission_deadline,
            tracer: self.tracer.child(),
            parent_span,
        }
    }
}
