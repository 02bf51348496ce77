use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::lisp::DEFAULT_ITERATION_CAP;
use crate::llm::{RetryConfig, LLM};
use crate::memory::MemoryStrategy;
use crate::prompt::{CompressionConfig, PromptLimits, SystemPromptOverrides};
use crate::schemas::OutputMode;
use crate::signature::{self, SignatureError, Type};
use crate::template::MissionTemplate;
use crate::tools::{CatalogTool, Tool, ToolEntry, ToolTable};

use super::config::{AgentConfig, LLMRef};
use super::{Agent, AgentError};

enum PendingTool {
    Plain(Arc<dyn Tool>),
    Typed {
        tool: Arc<dyn Tool>,
        signature: String,
        skip_validation: bool,
    },
    Nested {
        agent: Agent,
        llm: Option<Arc<dyn LLM>>,
        description: String,
    },
    Judge {
        template: String,
        signature: String,
        llm: Option<Arc<dyn LLM>>,
        description: String,
    },
    SelfRef,
}

/// Builds and validates an [`Agent`]. Invalid configurations fail here, at
/// build time, never at run time.
pub struct AgentBuilder {
    prompt: String,
    signature: Option<String>,
    tools: Vec<(String, PendingTool)>,
    catalog: Vec<(String, Option<String>, String)>,
    max_turns: u32,
    retry_turns: u32,
    turn_budget: Option<u32>,
    max_depth: u32,
    mission_timeout: Option<Duration>,
    per_turn_timeout: Duration,
    memory_limit_bytes: u64,
    output_mode: OutputMode,
    memory_strategy: MemoryStrategy,
    compression: Option<CompressionConfig>,
    prompt_limits: PromptLimits,
    overrides: SystemPromptOverrides,
    field_descriptions: BTreeMap<String, String>,
    llm_retry: RetryConfig,
    llm: LLMRef,
    thinking: bool,
    max_tool_calls: Option<u32>,
    pool_size: usize,
    iteration_cap: u64,
    sandbox_heap_bytes: u64,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        AgentBuilder {
            prompt: String::new(),
            signature: None,
            tools: Vec::new(),
            catalog: Vec::new(),
            max_turns: 10,
            retry_turns: 2,
            turn_budget: None,
            max_depth: 3,
            mission_timeout: None,
            per_turn_timeout: Duration::from_millis(1000),
            memory_limit_bytes: 10 * 1024 * 1024,
            output_mode: OutputMode::PtcLisp,
            memory_strategy: MemoryStrategy::Strict,
            compression: None,
            prompt_limits: PromptLimits::default(),
            overrides: SystemPromptOverrides::default(),
            field_descriptions: BTreeMap::new(),
            llm_retry: RetryConfig::default(),
            llm: LLMRef::FromRun,
            thinking: false,
            max_tool_calls: None,
            pool_size: 4,
            iteration_cap: DEFAULT_ITERATION_CAP,
            sandbox_heap_bytes: 64 * 1024 * 1024,
        }
    }

    /// The mission template, with `{{…}}` placeholders over signature
    /// parameters.
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// The agent's contract string, e.g. `"(users [:map]) -> :int"`.
    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Registers an untyped tool; arguments are passed through unvalidated.
    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        let name = tool.name();
        self.tools.push((name, PendingTool::Plain(Arc::new(tool))));
        self
    }

    /// Registers a tool with a contract string; arguments are validated and
    /// coerced against it.
    pub fn typed_tool(mut self, tool: impl Tool + 'static, signature: impl Into<String>) -> Self {
        let name = tool.name();
        self.tools.push((
            name,
            PendingTool::Typed {
                tool: Arc::new(tool),
                signature: signature.into(),
                skip_validation: false,
            },
        ));
        self
    }

    /// Like [`typed_tool`](Self::typed_tool) but skips runtime validation;
    /// the signature is documentation only.
    pub fn typed_tool_unchecked(
        mut self,
        tool: impl Tool + 'static,
        signature: impl Into<String>,
    ) -> Self {
        let name = tool.name();
        self.tools.push((
            name,
            PendingTool::Typed {
                tool: Arc::new(tool),
                signature: signature.into(),
                skip_validation: true,
            },
        ));
        self
    }

    /// Registers another agent as a tool.
    pub fn agent_tool(
        mut self,
        name: impl Into<String>,
        agent: Agent,
        description: impl Into<String>,
    ) -> Self {
        self.tools.push((
            name.into(),
            PendingTool::Nested {
                agent,
                llm: None,
                description: description.into(),
            },
        ));
        self
    }

    /// Registers this agent itself as a tool, for bounded recursion.
    pub fn self_tool(mut self, name: impl Into<String>) -> Self {
        self.tools.push((name.into(), PendingTool::SelfRef));
        self
    }

    /// Registers an LLM-judge tool: a prompt template plus a contract,
    /// answered by a single-shot typed model call.
    pub fn judge_tool(
        mut self,
        name: impl Into<String>,
        template: impl Into<String>,
        signature: impl Into<String>,
        llm: Option<Arc<dyn LLM>>,
    ) -> Self {
        self.tools.push((
            name.into(),
            PendingTool::Judge {
                template: template.into(),
                signature: signature.into(),
                llm,
                description: String::new(),
            },
        ));
        self
    }

    /// Lists a schema for planning without making it callable.
    pub fn catalog_tool(
        mut self,
        name: impl Into<String>,
        signature: Option<String>,
        description: impl Into<String>,
    ) -> Self {
        self.catalog
            .push((name.into(), signature, description.into()));
        self
    }

    pub fn max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn retry_turns(mut self, retry_turns: u32) -> Self {
        self.retry_turns = retry_turns;
        self
    }

    pub fn turn_budget(mut self, turn_budget: u32) -> Self {
        self.turn_budget = Some(turn_budget);
        self
    }

    pub fn max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn mission_timeout(mut self, timeout: Duration) -> Self {
        self.mission_timeout = Some(timeout);
        self
    }

    pub fn per_turn_timeout(mut self, timeout: Duration) -> Self {
        self.per_turn_timeout = timeout;
        self
    }

    pub fn memory_limit_bytes(mut self, limit: u64) -> Self {
        self.memory_limit_bytes = limit;
        self
    }

    pub fn output_mode(mut self, output_mode: OutputMode) -> Self {
        self.output_mode = output_mode;
        self
    }

    pub fn memory_strategy(mut self, strategy: MemoryStrategy) -> Self {
        self.memory_strategy = strategy;
        self
    }

    pub fn compression(mut self, config: CompressionConfig) -> Self {
        self.compression = Some(config);
        self
    }

    pub fn prompt_limits(mut self, limits: PromptLimits) -> Self {
        self.prompt_limits = limits;
        self
    }

    pub fn system_prompt_overrides(mut self, overrides: SystemPromptOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn field_description(
        mut self,
        field: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.field_descriptions
            .insert(field.into(), description.into());
        self
    }

    pub fn llm_retry(mut self, config: RetryConfig) -> Self {
        self.llm_retry = config;
        self
    }

    /// Pins a model instance to this agent.
    pub fn llm(mut self, llm: Arc<dyn LLM>) -> Self {
        self.llm = LLMRef::Pinned(llm);
        self
    }

    /// Pins a model by registry name, resolved at run time.
    pub fn llm_named(mut self, name: impl Into<String>) -> Self {
        self.llm = LLMRef::Named(name.into());
        self
    }

    pub fn thinking(mut self, thinking: bool) -> Self {
        self.thinking = thinking;
        self
    }

    pub fn max_tool_calls(mut self, max: u32) -> Self {
        self.max_tool_calls = Some(max);
        self
    }

    /// Worker pool size for `pmap`.
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn iteration_cap(mut self, cap: u64) -> Self {
        self.iteration_cap = cap;
        self
    }

    pub fn sandbox_heap_bytes(mut self, bytes: u64) -> Self {
        self.sandbox_heap_bytes = bytes;
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        if self.prompt.trim().is_empty() {
            return Err(AgentError::InvalidConfig("prompt cannot be empty".into()));
        }
        if self.max_turns == 0 {
            return Err(AgentError::InvalidConfig("max_turns must be at least 1".into()));
        }
        if self.pool_size == 0 {
            return Err(AgentError::InvalidConfig("pool_size must be at least 1".into()));
        }
        if self.memory_limit_bytes == 0 {
            return Err(AgentError::InvalidConfig(
                "memory_limit_bytes must be positive".into(),
            ));
        }
        if matches!(self.turn_budget, Some(0)) {
            return Err(AgentError::InvalidConfig("turn_budget must be positive".into()));
        }

        let signature = self
            .signature
            .as_deref()
            .map(signature::parse)
            .transpose()?;

        let prompt = MissionTemplate::new(self.prompt);
        // Every placeholder root must be a signature parameter.
        let known: Vec<&str> = signature
            .iter()
            .flat_map(|sig| sig.param_names())
            .collect();
        for variable in prompt.variables() {
            if !known.contains(&variable.as_str()) {
                return Err(SignatureError::PlaceholderUnbound {
                    name: variable.clone(),
                }
                .into());
            }
        }

        if self.output_mode == OutputMode::Json {
            let Some(signature) = &signature else {
                return Err(AgentError::InvalidConfig(
                    "json output mode requires a signature".into(),
                ));
            };
            if !self.tools.is_empty() || !self.catalog.is_empty() {
                return Err(AgentError::InvalidConfig(
                    "json output mode does not allow tools".into(),
                ));
            }
            if self.compression.is_some() {
                return Err(AgentError::InvalidConfig(
                    "json output mode does not allow compression".into(),
                ));
            }
            if has_firewalled_fields(&signature.returns) {
                return Err(AgentError::InvalidConfig(
                    "json output mode does not allow firewalled fields".into(),
                ));
            }
        }

        let mut tools = ToolTable::new();
        for (name, pending) in self.tools {
            let entry = match pending {
                PendingTool::Plain(tool) => ToolEntry::Plain(tool),
                PendingTool::Typed {
                    tool,
                    signature,
                    skip_validation,
                } => ToolEntry::Typed {
                    tool,
                    signature: signature::parse(&signature)?,
                    skip_validation,
                },
                PendingTool::Nested {
                    agent,
                    llm,
                    description,
                } => ToolEntry::Nested {
                    agent,
                    llm,
                    description,
                },
                PendingTool::Judge {
                    template,
                    signature,
                    llm,
                    description,
                } => ToolEntry::Judge {
                    template,
                    signature: signature::parse(&signature)?,
                    llm,
                    description,
                },
                PendingTool::SelfRef => {
                    if signature.is_none() {
                        return Err(AgentError::InvalidConfig(
                            "a self tool requires the agent to have a signature".into(),
                        ));
                    }
                    ToolEntry::SelfRef
                }
            };
            tools.insert(name, entry);
        }
        for (name, catalog_signature, description) in self.catalog {
            let parsed = catalog_signature.as_deref().map(signature::parse).transpose()?;
            tools.insert_catalog(name, CatalogTool::new(parsed, description));
        }

        Ok(Agent {
            inner: Arc::new(AgentConfig {
                prompt,
                signature,
                tools,
                max_turns: self.max_turns,
                retry_turns: self.retry_turns,
                turn_budget: self.turn_budget,
                max_depth: self.max_depth,
                mission_timeout: self.mission_timeout,
                per_turn_timeout: self.per_turn_timeout,
                memory_limit_bytes: self.memory_limit_bytes,
                output_mode: self.output_mode,
                memory_strategy: self.memory_strategy,
                compression: self.compression,
                prompt_limits: self.prompt_limits,
                overrides: self.overrides,
                field_descriptions: self.field_descriptions,
                llm_retry: self.llm_retry,
                llm: self.llm,
                thinking: self.thinking,
                max_tool_calls: self.max_tool_calls,
                pool_size: self.pool_size,
                iteration_cap: self.iteration_cap,
                sandbox_heap_bytes: self.sandbox_heap_bytes,
            }),
        })
    }
}

fn has_firewalled_fields(ty: &Type) -> bool {
    match ty {
        Type::Record(fields) => fields
            .iter()
            .any(|field| field.is_firewalled() || has_firewalled_fields(&field.ty)),
        Type::List(element) | Type::Optional(element) => has_firewalled_fields(element),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_must_match_signature_params() {
        let result = Agent::builder()
            .prompt("Add {{x}} and {{y}}")
            .signature("(x :int, y :int) -> :int")
            .build();
        assert!(result.is_ok());

        let result = Agent::builder()
            .prompt("Add {{x}} and {{z}}")
            .signature("(x :int, y :int) -> :int")
            .build();
        assert!(matches!(
            result,
            Err(AgentError::Signature(SignatureError::PlaceholderUnbound { name })) if name == "z"
        ));
    }

    #[test]
    fn test_placeholders_without_signature_fail() {
        assert!(Agent::builder().prompt("Hello {{who}}").build().is_err());
        assert!(Agent::builder().prompt("Hello there").build().is_ok());
    }

    #[test]
    fn test_invalid_signature_fails_at_build() {
        let result = Agent::builder()
            .prompt("do it")
            .signature(":nonsense")
            .build();
        assert!(matches!(
            result,
            Err(AgentError::Signature(SignatureError::InvalidSignature { .. }))
        ));
    }

    #[test]
    fn test_json_mode_constraints() {
        // Requires a signature.
        assert!(Agent::builder()
            .prompt("classify")
            .output_mode(OutputMode::Json)
            .build()
            .is_err());

        // No firewalled fields.
        assert!(Agent::builder()
            .prompt("classify")
            .output_mode(OutputMode::Json)
            .signature("-> {label :string, _raw :string}")
            .build()
            .is_err());

        assert!(Agent::builder()
            .prompt("classify")
            .output_mode(OutputMode::Json)
            .signature("-> {label :string}")
            .build()
            .is_ok());
    }

    #[test]
    fn test_numeric_sanity_checks() {
        assert!(Agent::builder().prompt("x").max_turns(0).build().is_err());
        assert!(Agent::builder().prompt("x").pool_size(0).build().is_err());
        assert!(Agent::builder().prompt("x").memory_limit_bytes(0).build().is_err());
    }

    #[test]
    fn test_self_tool_requires_signature() {
        assert!(Agent::builder()
            .prompt("recurse")
            .self_tool("again")
            .build()
            .is_err());
        assert!(Agent::builder()
            .prompt("recurse {{n}}")
            .signature("(n :int) -> :int")
            .self_tool("again")
            .build()
            .is_ok());
    }
}
