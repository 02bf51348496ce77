//! A runtime for programmatic tool calling: the model drives a task by
//! writing small PTC-Lisp programs, the host executes them in a bounded
//! sandbox against typed tools and context data, feeds results back, and
//! iterates until the program returns a typed result.
//!
//! ```rust,ignore
//! use ptc_runtime::{Agent, RunOptions, context};
//!
//! let agent = Agent::builder()
//!     .prompt("Add {{x}} and {{y}}")
//!     .signature("(x :int, y :int) -> :int")
//!     .max_turns(1)
//!     .build()?;
//!
//! let step = agent
//!     .run(RunOptions::new()
//!         .with_llm(my_llm)
//!         .with_context(context! { "x" => 5, "y" => 3 }))
//!     .await;
//! assert_eq!(step.return_value, Some(8.into()));
//! ```

pub mod agent;
pub mod lisp;
pub mod llm;
pub mod memory;
pub mod output_parser;
pub mod prompt;
pub mod sandbox;
pub mod schemas;
pub mod signature;
pub mod template;
pub mod tools;
pub mod trace;

pub(crate) mod utils;

pub use agent::{Agent, AgentBuilder, AgentError, AsToolOptions, Preview, RunOptions};
pub use lisp::{MapKey, Value};
pub use llm::{
    llm_fn, Backoff, FakeLLM, LLMError, LLMRegistry, LLMRequest, LLMResponse, RetryConfig, LLM,
};
pub use memory::MemoryStrategy;
pub use prompt::{CompressionConfig, PromptLimits, SystemPromptOverrides};
pub use schemas::{
    FailInfo, FailReason, Fault, FaultKind, Message, MessageType, OutputMode, Step, TokenUsage,
    ToolCallRecord, Turn, Usage,
};
pub use signature::{Signature, SignatureError, Type};
pub use tools::{tool_fn, Tool, ToolEntry, ToolError};
pub use trace::{TraceEvent, TraceMode, Tracer};
