use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use async_recursion::async_recursion;
use regex::Regex;
use serde_json::json;

use crate::lisp::{TraceScope, Value};
use crate::llm::{generate_with_retry, LLMRequest, LLMResponse, LLM};
use crate::memory::{split_turn_result, MemoryOutcome, TurnMemory};
use crate::output_parser::{extract_json, extract_program};
use crate::prompt::{
    assemble_system_prompt, compress_history, estimate_tokens, firewall_mask, resources,
    PromptInputs,
};
use crate::sandbox::{ExecRequest, Limits, ProgramResult, Sandbox};
use crate::schemas::{
    FailInfo, FailReason, Fault, FaultKind, Message, OutputMode, Step, ToolCallRecord, Turn, Usage,
};
use crate::signature::{self, SignatureError};
use crate::template::MissingPolicy;
use crate::tools::ToolEntry;
use crate::trace::{EventKind, Span, TraceMode};

use super::config::LLMRef;
use super::dispatcher::RunDispatcher;
use super::feedback;
use super::{Agent, AgentError, RunOptions, RunScope};

/// Dry-run prompt assembly, no LLM call.
#[derive(Debug, Clone)]
pub struct Preview {
    pub system: String,
    pub user: String,
    pub message_estimate: usize,
    pub token_estimate: usize,
}

/// Options for wrapping an agent as a parent's tool.
#[derive(Default)]
pub struct AsToolOptions {
    pub description: Option<String>,
    pub llm: Option<Arc<dyn LLM>>,
}

impl Agent {
    /// Runs one mission to its terminal [`Step`]. The step always comes
    /// back; failure lives in `step.fail`.
    pub async fn run(&self, options: RunOptions) -> Step {
        let scope = RunScope::root(options.trace_mode);
        self.run_scoped(options, scope).await
    }

    /// Like [`run`](Self::run), but converts a failed step into an error.
    pub async fn run_or_raise(&self, options: RunOptions) -> Result<Step, AgentError> {
        let step = self.run(options).await;
        if step.is_success() {
            Ok(step)
        } else {
            Err(AgentError::StepFailed(Box::new(step)))
        }
    }

    /// Wraps this agent as a tool for a parent agent.
    pub fn as_tool(&self, options: AsToolOptions) -> ToolEntry {
        ToolEntry::Nested {
            agent: self.clone(),
            llm: options.llm,
            description: options.description.unwrap_or_default(),
        }
    }

    /// Assembles the turn-1 prompts without calling the LLM.
    pub fn preview(&self, options: &RunOptions) -> Result<Preview, AgentError> {
        let cfg = &*self.inner;
        let masked_context = mask_context(&options.context);
        let policy = match cfg.output_mode {
            OutputMode::PtcLisp => MissingPolicy::Keep,
            OutputMode::Json => MissingPolicy::Collect,
        };
        let expanded = cfg
            .prompt
            .expand(&masked_context, policy)
            .map_err(|error| AgentError::InvalidConfig(error.to_string()))?;
        if cfg.output_mode == OutputMode::Json {
            if let Some(name) = expanded.missing.first() {
                return Err(SignatureError::PlaceholderUnbound { name: name.clone() }.into());
            }
        }
        let system = assemble_system_prompt(&PromptInputs {
            context: &masked_context,
            signature: cfg.signature.as_ref(),
            field_descriptions: &cfg.field_descriptions,
            tools: &cfg.tools,
            output_mode: cfg.output_mode,
            multi_turn: cfg.max_turns > 1,
            mission: &expanded.text,
            overrides: &cfg.overrides,
            limits: &cfg.prompt_limits,
        });
        let user = initial_user_message(cfg.output_mode).content;
        let token_estimate = estimate_tokens(&system) + estimate_tokens(&user);
        Ok(Preview {
            system,
            user,
            message_estimate: 2,
            token_estimate,
        })
    }

    #[async_recursion]
    pub(crate) async fn run_scoped(&self, options: RunOptions, mut scope: RunScope) -> Step {
        let cfg = &*self.inner;
        let started = Instant::now();

        if scope.depth == 0 {
            if let Some(budget) = cfg.turn_budget {
                scope.remaining_turns = Some(Arc::new(AtomicI64::new(i64::from(budget))));
            }
        }
        if let Some(timeout) = cfg.mission_timeout {
            let own = started + timeout;
            scope.mission_deadline = Some(match scope.mission_deadline {
                Some(inherited) => inherited.min(own),
                None => own,
            });
        }

        let tracer = scope.tracer.clone();
        let run_span = tracer.span(
            EventKind::RunStart,
            EventKind::RunStop,
            scope.parent_span.as_deref(),
            json!({ "depth": scope.depth, "output_mode": cfg.output_mode.to_string() }),
        );
        let run_span_id = run_span.id().to_string();

        let mut step = self.run_inner(&options, &scope, &run_span_id, started).await;

        step.usage.duration_ms = started.elapsed().as_millis() as u64;
        step.signature = self.signature_string();
        run_span.finish(json!({ "ok": step.is_success(), "turns": step.usage.turns }));

        if scope.depth == 0 && tracer.mode() == TraceMode::OnError && step.is_success() {
            tracer.discard();
        }
        if step.is_success() {
            log::debug!("mission finished: {step}");
        } else {
            log::error!("mission failed: {step}");
        }
        step
    }

    async fn run_inner(
        &self,
        options: &RunOptions,
        scope: &RunScope,
        run_span: &str,
        _started: Instant,
    ) -> Step {
        let cfg = &*self.inner;
        let attach_turns = scope.tracer.is_enabled();
        let mut state = LoopState::new(cfg.memory_limit_bytes, cfg.memory_strategy, attach_turns);

        if scope.depth > cfg.max_depth {
            return state.terminal_failure(FailInfo::new(
                FailReason::MaxDepthExceeded,
                format!("depth {} exceeds max_depth {}", scope.depth, cfg.max_depth),
            ));
        }

        let llm: Arc<dyn LLM> = match resolve_llm(cfg, options) {
            Ok(llm) => llm,
            Err(message) => {
                return state.terminal_failure(FailInfo::new(FailReason::LlmError, message))
            }
        };

        // Template expansion happens once, before turn 1, over the masked
        // (LLM-visible) context.
        let masked_context = mask_context(&options.context);
        let policy = match cfg.output_mode {
            OutputMode::PtcLisp => MissingPolicy::Keep,
            OutputMode::Json => MissingPolicy::Collect,
        };
        let mission = match cfg.prompt.expand(&masked_context, policy) {
            Ok(expanded) => {
                if cfg.output_mode == OutputMode::Json && !expanded.missing.is_empty() {
                    return state.terminal_failure(FailInfo::new(
                        FailReason::PlaceholderUnbound,
                        format!("unbound placeholders: {}", expanded.missing.join(", ")),
                    ));
                }
                expanded.text
            }
            Err(error) => {
                return state.terminal_failure(FailInfo::new(
                    FailReason::PlaceholderUnbound,
                    error.to_string(),
                ))
            }
        };

        state
            .messages
            .push(initial_user_message(cfg.output_mode));

        let mut turn: u32 = 1;
        loop {
            // Budget checks come before any work for this turn.
            if turn > cfg.max_turns {
                // When the loop ran out of turns chasing a recoverable
                // error, that error is the honest terminal reason.
                let fail = match state.last_fail.take() {
                    Some(last) => last,
                    None => FailInfo::new(
                        FailReason::MaxTurnsExceeded,
                        format!("no terminal return after {} turns", cfg.max_turns),
                    ),
                };
                return state.terminal_failure(fail);
            }
            if let Some(counter) = &scope.remaining_turns {
                if counter.load(AtomicOrdering::SeqCst) <= 0 {
                    return state.terminal_failure(FailInfo::new(
                        FailReason::TurnBudgetExhausted,
                        "shared turn budget exhausted",
                    ));
                }
            }
            if let Some(deadline) = scope.mission_deadline {
                if Instant::now() >= deadline {
                    return state.terminal_failure(FailInfo::new(
                        FailReason::MissionTimeout,
                        "mission deadline exceeded",
                    ));
                }
            }

            let turn_span = scope.tracer.span(
                EventKind::TurnStart,
                EventKind::TurnStop,
                Some(run_span),
                json!({ "turn": turn }),
            );

            let system = assemble_system_prompt(&PromptInputs {
                context: &masked_context,
                signature: cfg.signature.as_ref(),
                field_descriptions: &cfg.field_descriptions,
                tools: &cfg.tools,
                output_mode: cfg.output_mode,
                multi_turn: cfg.max_turns > 1,
                mission: &mission,
                overrides: &cfg.overrides,
                limits: &cfg.prompt_limits,
            });
            if turn == 1 {
                state.usage.system_prompt_tokens = estimate_tokens(&system) as u32;
            }

            let messages = match (&cfg.compression, state.turns.is_empty()) {
                (Some(compression), false) => {
                    let (message, stats) = compress_history(&state.turns, compression);
                    state.usage.compression = Some(stats);
                    vec![message]
                }
                _ => state.messages.clone(),
            };

            let mut llm_opts = options.llm_opts.clone();
            if cfg.thinking {
                if let Some(object) = llm_opts.as_object_mut() {
                    object.insert("thinking".to_string(), json!(true));
                } else if llm_opts.is_null() {
                    llm_opts = json!({ "thinking": true });
                }
            }
            let request = LLMRequest {
                system,
                messages: messages.clone(),
                turn,
                output_mode: cfg.output_mode,
                schema: match cfg.output_mode {
                    OutputMode::Json => cfg
                        .signature
                        .as_ref()
                        .map(|sig| signature::to_json_schema(&sig.returns)),
                    OutputMode::PtcLisp => None,
                },
                tool_names: cfg.tools.names().map(str::to_string).collect(),
                opts: llm_opts.clone(),
            };

            let llm_span = scope.tracer.span(
                EventKind::LlmStart,
                EventKind::LlmStop,
                Some(turn_span.id()),
                json!({ "turn": turn }),
            );
            let response = generate_with_retry(llm.as_ref(), &request, &cfg.llm_retry).await;
            llm_span.finish(json!({ "ok": response.is_ok() }));

            let response = match response {
                Ok(response) => response,
                Err(error) => {
                    turn_span.finish(json!({ "ok": false }));
                    return state.terminal_failure(FailInfo::new(
                        FailReason::LlmError,
                        error.to_string(),
                    ));
                }
            };
            if let Some(usage) = &response.usage {
                state
                    .usage
                    .record_tokens(usage.prompt_tokens, usage.completion_tokens);
            }

            let mut record = Turn::new(turn);
            record.token_usage = response.usage.clone();
            if attach_turns {
                record.messages = Some(messages.clone());
            }

            let outcome = match cfg.output_mode {
                OutputMode::Json => {
                    self.json_turn(cfg, &response, &mut record, &mut state, scope, turn)
                        .await
                }
                OutputMode::PtcLisp => {
                    self.lisp_turn(
                        cfg, options, &response, &mut record, &mut state, scope, &llm,
                        &llm_opts, &turn_span, turn,
                    )
                    .await
                }
            };

            turn_span.finish(json!({ "ok": record.success }));
            state.finish_turn(record);
            if let Some(counter) = &scope.remaining_turns {
                counter.fetch_sub(1, AtomicOrdering::SeqCst);
            }

            match outcome {
                TurnOutcome::Success(value) => return state.terminal_success(value),
                TurnOutcome::Failure(fail) => return state.terminal_failure(fail),
                TurnOutcome::Continue => turn += 1,
            }
        }
    }

    /// One JSON-mode turn: parse, validate, retry like
    /// `return_validation_failed`.
    async fn json_turn(
        &self,
        cfg: &super::config::AgentConfig,
        response: &LLMResponse,
        record: &mut Turn,
        state: &mut LoopState,
        scope: &RunScope,
        turn: u32,
    ) -> TurnOutcome {
        let content = match (&response.content, response.tool_calls.first()) {
            (Some(text), _) => text.clone(),
            (None, Some(call)) if call.name == "respond" => call.arguments.to_string(),
            _ => String::new(),
        };
        record.raw_response = content.clone();

        let signature = cfg.signature.as_ref().expect("json mode has a signature");
        let parsed = match extract_json(&content) {
            Ok(json) => Value::from_json(&json),
            Err(error) => {
                let fail = FailInfo::new(FailReason::NoCodeInResponse, error.to_string());
                record.success = false;
                let remaining = state.remaining_after(cfg.max_turns, turn, scope);
                let message = feedback::error_feedback(
                    &fail,
                    &[],
                    &state.memory,
                    remaining,
                    &cfg.prompt_limits,
                );
                state.feed_back(content, message, fail);
                return TurnOutcome::Continue;
            }
        };

        match signature::validate(&parsed, &signature.returns, "") {
            Ok(()) => {
                record.success = true;
                record.result = Some(parsed.clone());
                TurnOutcome::Success(parsed)
            }
            Err(error) => {
                record.success = false;
                if state.retries_used < cfg.retry_turns {
                    state.retries_used += 1;
                    let remaining = state.remaining_after(cfg.max_turns, turn, scope);
                    let message = feedback::validation_feedback(&error, &state.memory, remaining);
                    state.feed_back(
                        content,
                        message,
                        FailInfo::new(FailReason::ReturnValidationFailed, error.to_string()),
                    );
                    TurnOutcome::Continue
                } else {
                    TurnOutcome::Failure(FailInfo::new(
                        FailReason::ReturnValidationFailed,
                        error.to_string(),
                    ))
                }
            }
        }
    }

    /// One PTC-Lisp turn: extract, catalog-check, execute, apply the memory
    /// contract, decide feedback or termination.
    #[allow(clippy::too_many_arguments)]
    async fn lisp_turn(
        &self,
        cfg: &super::config::AgentConfig,
        options: &RunOptions,
        response: &LLMResponse,
        record: &mut Turn,
        state: &mut LoopState,
        scope: &RunScope,
        llm: &Arc<dyn LLM>,
        llm_opts: &serde_json::Value,
        turn_span: &Span,
        turn: u32,
    ) -> TurnOutcome {
        let content = response.content.clone().unwrap_or_default();
        record.raw_response = content.clone();

        let parsed = match extract_program(&content) {
            Ok(parsed) => parsed,
            Err(error) => {
                let fail = FailInfo::new(FailReason::NoCodeInResponse, error.to_string());
                record.success = false;
                let remaining = state.remaining_after(cfg.max_turns, turn, scope);
                let message = feedback::error_feedback(
                    &fail,
                    &[],
                    &state.memory,
                    remaining,
                    &cfg.prompt_limits,
                );
                state.feed_back(content, message, fail);
                return TurnOutcome::Continue;
            }
        };
        if parsed.block_count > 1 {
            log::warn!(
                "response contained {} code blocks; wrapping them in an implicit do",
                parsed.block_count
            );
        }
        record.program = Some(parsed.program.clone());
        record.reasoning = parsed.reasoning.clone();

        // Catalog check before execution: a planned-only tool in the code
        // is fed back without running anything.
        if let Some(tool) = scan_for_catalog_calls(&parsed.program, cfg) {
            let fail = FailInfo::new(
                FailReason::CatalogToolCalled,
                format!("tool {tool} is listed for planning only and cannot be called"),
            )
            .with_op(tool);
            record.success = false;
            let remaining = state.remaining_after(cfg.max_turns, turn, scope);
            let message = feedback::error_feedback(
                &fail,
                &[],
                &state.memory,
                remaining,
                &cfg.prompt_limits,
            );
            state.feed_back(content, message, fail);
            return TurnOutcome::Continue;
        }

        // Execution context: the run context plus the previous failure
        // under `fail`, and `*1`..`*3` in memory.
        let mut exec_context = options.context.clone();
        match &state.last_fail {
            Some(fail) => {
                exec_context.insert("fail".to_string(), fail.to_value());
            }
            None => {
                exec_context.insert("fail".to_string(), Value::Nil);
            }
        }
        let mut exec_memory = state.memory.snapshot();
        for (index, value) in state.history.iter().enumerate() {
            exec_memory.insert(format!("*{}", index + 1), value.clone());
        }

        let dispatcher = Arc::new(RunDispatcher {
            agent: self.clone(),
            llm: llm.clone(),
            registry: options.registry.clone(),
            scope: RunScope {
                parent_span: Some(turn_span.id().to_string()),
                ..scope.clone()
            },
            llm_opts: llm_opts.clone(),
        });
        let wall_timeout = match scope.mission_deadline {
            Some(deadline) => cfg
                .per_turn_timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => cfg.per_turn_timeout,
        };
        let sandbox = Sandbox::new(
            Limits::default()
                .with_wall_timeout(wall_timeout)
                .with_heap_bytes(cfg.sandbox_heap_bytes)
                .with_iteration_cap(cfg.iteration_cap),
        );
        let outcome = sandbox
            .execute(ExecRequest {
                source: parsed.program.clone(),
                context: exec_context,
                memory: exec_memory,
                tools: dispatcher,
                max_tool_calls: cfg.max_tool_calls,
                pool_size: cfg.pool_size,
                trace: Some(TraceScope {
                    tracer: scope.tracer.clone(),
                    parent_span: turn_span.id().to_string(),
                }),
            })
            .await;

        record.prints = outcome.prints.clone();
        record.tool_calls = outcome.tool_calls.clone();
        state.all_prints.extend(outcome.prints.iter().cloned());
        state.all_tool_calls.extend(outcome.tool_calls.iter().cloned());

        match outcome.result {
            Err(fault) => {
                let fail = fail_from_fault(fault);
                record.success = false;
                let remaining = state.remaining_after(cfg.max_turns, turn, scope);
                let message = feedback::error_feedback(
                    &fail,
                    &outcome.prints,
                    &state.memory,
                    remaining,
                    &cfg.prompt_limits,
                );
                state.feed_back(content, message, fail);
                TurnOutcome::Continue
            }
            Ok(ProgramResult::Failed(value)) => {
                record.success = true;
                record.result = Some(value.clone());
                let message = value
                    .get_keyword("message")
                    .and_then(|m| m.as_str().map(str::to_string))
                    .unwrap_or_else(|| value.to_string());
                TurnOutcome::Failure(
                    FailInfo::new(FailReason::Failed, message).with_details(value),
                )
            }
            Ok(ProgramResult::Returned(value)) => {
                if let MemoryOutcome::LimitExceeded { attempted_bytes } =
                    state.memory.apply_turn(outcome.defs)
                {
                    return TurnOutcome::Failure(FailInfo::new(
                        FailReason::MemoryLimitExceeded,
                        format!(
                            "memory would grow to {attempted_bytes} bytes, over the {} byte limit",
                            cfg.memory_limit_bytes
                        ),
                    ));
                }
                match &cfg.signature {
                    Some(signature) => {
                        match signature::validate(&value, &signature.returns, "") {
                            Ok(()) => {
                                record.success = true;
                                record.result = Some(value.clone());
                                TurnOutcome::Success(value)
                            }
                            Err(error) => {
                                record.success = false;
                                if state.retries_used < cfg.retry_turns {
                                    state.retries_used += 1;
                                    let remaining =
                                        state.remaining_after(cfg.max_turns, turn, scope);
                                    let message = feedback::validation_feedback(
                                        &error,
                                        &state.memory,
                                        remaining,
                                    );
                                    state.feed_back(
                                        content,
                                        message,
                                        FailInfo::new(
                                            FailReason::ReturnValidationFailed,
                                            error.to_string(),
                                        ),
                                    );
                                    TurnOutcome::Continue
                                } else {
                                    TurnOutcome::Failure(FailInfo::new(
                                        FailReason::ReturnValidationFailed,
                                        error.to_string(),
                                    ))
                                }
                            }
                        }
                    }
                    None => {
                        record.success = true;
                        record.result = Some(value.clone());
                        TurnOutcome::Success(value)
                    }
                }
            }
            Ok(ProgramResult::Value(value)) => {
                if cfg.max_turns == 1 {
                    // Single-shot: the expression value is the return, no
                    // revalidation retries.
                    record.result = Some(value.clone());
                    if let Some(signature) = &cfg.signature {
                        if let Err(error) = signature::validate(&value, &signature.returns, "") {
                            record.success = false;
                            return TurnOutcome::Failure(FailInfo::new(
                                FailReason::ReturnValidationFailed,
                                error.to_string(),
                            ));
                        }
                    }
                    record.success = true;
                    return TurnOutcome::Success(value);
                }

                let (updates, explicit_result) = split_turn_result(&value);
                let turn_result = explicit_result.unwrap_or_else(|| value.clone());
                let mut all_updates = outcome.defs;
                all_updates.extend(updates);

                match state.memory.apply_turn(all_updates) {
                    MemoryOutcome::LimitExceeded { attempted_bytes } => {
                        record.success = false;
                        TurnOutcome::Failure(FailInfo::new(
                            FailReason::MemoryLimitExceeded,
                            format!(
                                "memory would grow to {attempted_bytes} bytes, over the {} byte limit",
                                cfg.memory_limit_bytes
                            ),
                        ))
                    }
                    MemoryOutcome::RolledBack { attempted_bytes } => {
                        record.success = true;
                        record.result = Some(turn_result.clone());
                        state.push_history(turn_result);
                        let remaining = state.remaining_after(cfg.max_turns, turn, scope);
                        let message = feedback::memory_rollback_feedback(
                            attempted_bytes,
                            cfg.memory_limit_bytes,
                            &state.memory,
                            remaining,
                        );
                        state.feed_back_ok(content, message);
                        TurnOutcome::Continue
                    }
                    MemoryOutcome::Applied { size_bytes } => {
                        record.success = true;
                        record.result = Some(turn_result.clone());
                        state.usage.memory_bytes = state.usage.memory_bytes.max(size_bytes);
                        state.push_history(turn_result);
                        let remaining = state.remaining_after(cfg.max_turns, turn, scope);
                        let message = feedback::turn_feedback(
                            &outcome.prints,
                            &state.memory,
                            remaining,
                            &cfg.prompt_limits,
                        );
                        state.feed_back_ok(content, message);
                        TurnOutcome::Continue
                    }
                }
            }
        }
    }
}

enum TurnOutcome {
    Continue,
    Success(Value),
    Failure(FailInfo),
}

/// Accumulated loop state for one run.
struct LoopState {
    turns: Vec<Turn>,
    all_prints: Vec<String>,
    all_tool_calls: Vec<ToolCallRecord>,
    memory: TurnMemory,
    usage: Usage,
    messages: Vec<Message>,
    /// Results of the last three turns, most recent first (`*1`..`*3`).
    history: VecDeque<Value>,
    last_fail: Option<FailInfo>,
    retries_used: u32,
    attach_turns: bool,
}

impl LoopState {
    fn new(
        memory_limit_bytes: u64,
        strategy: crate::memory::MemoryStrategy,
        attach_turns: bool,
    ) -> Self {
        LoopState {
            turns: Vec::new(),
            all_prints: Vec::new(),
            all_tool_calls: Vec::new(),
            memory: TurnMemory::new(memory_limit_bytes, strategy),
            usage: Usage::default(),
            messages: Vec::new(),
            history: VecDeque::new(),
            last_fail: None,
            retries_used: 0,
            attach_turns,
        }
    }

    /// Turns the LLM can still use after the current one.
    fn remaining_after(&self, max_turns: u32, turn: u32, scope: &RunScope) -> i64 {
        let by_max = i64::from(max_turns) - i64::from(turn);
        match &scope.remaining_turns {
            Some(counter) => by_max.min(counter.load(AtomicOrdering::SeqCst) - 1),
            None => by_max,
        }
    }

    /// Appends the assistant response and an error-feedback user message,
    /// and records the structured failure for `ctx/fail`.
    fn feed_back(&mut self, assistant: String, user: String, fail: FailInfo) {
        log::warn!("turn failed, feeding back: {fail}");
        self.last_fail = Some(fail);
        self.messages.push(Message::new_ai_message(assistant));
        self.messages.push(Message::new_human_message(user));
    }

    /// Appends the assistant response and an ordinary feedback message.
    fn feed_back_ok(&mut self, assistant: String, user: String) {
        self.last_fail = None;
        self.messages.push(Message::new_ai_message(assistant));
        self.messages.push(Message::new_human_message(user));
    }

    fn push_history(&mut self, result: Value) {
        self.history.push_front(result);
        self.history.truncate(3);
    }

    fn finish_turn(&mut self, record: Turn) {
        self.usage.turns += 1;
        self.turns.push(record);
    }

    fn terminal_success(&mut self, value: Value) -> Step {
        self.build_step(Some(value), None)
    }

    fn terminal_failure(&mut self, fail: FailInfo) -> Step {
        self.build_step(None, Some(fail))
    }

    fn build_step(&mut self, return_value: Option<Value>, fail: Option<FailInfo>) -> Step {
        let mut usage = std::mem::take(&mut self.usage);
        usage.memory_bytes = usage.memory_bytes.max(self.memory.size_bytes());
        Step {
            return_value,
            fail,
            prints: std::mem::take(&mut self.all_prints),
            tool_calls: std::mem::take(&mut self.all_tool_calls),
            memory: self.memory.snapshot(),
            usage,
            turns: self.attach_turns.then(|| std::mem::take(&mut self.turns)),
            signature: None,
        }
    }
}

fn resolve_llm(
    cfg: &super::config::AgentConfig,
    options: &RunOptions,
) -> Result<Arc<dyn LLM>, String> {
    match &cfg.llm {
        LLMRef::Pinned(llm) => Ok(llm.clone()),
        LLMRef::Named(name) => options
            .registry
            .as_ref()
            .and_then(|registry| registry.get(name))
            .ok_or_else(|| format!("no LLM named {name:?} in the registry")),
        LLMRef::FromRun => options
            .llm
            .clone()
            .ok_or_else(|| "no LLM supplied: pass one in RunOptions or pin one".to_string()),
    }
}

fn initial_user_message(output_mode: OutputMode) -> Message {
    match output_mode {
        OutputMode::PtcLisp => Message::new_human_message("Begin."),
        OutputMode::Json => {
            Message::new_human_message(resources::JSON_USER_MESSAGE.trim())
        }
    }
}

fn mask_context(context: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    context
        .iter()
        .map(|(name, value)| (name.clone(), firewall_mask(value)))
        .collect()
}

static TOOL_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"tool/([A-Za-z0-9_\-.]+)|\(call\s+"([^"]+)""#).expect("static regex is valid")
});

/// Finds the first reference to a catalog-only tool in the program text.
fn scan_for_catalog_calls(program: &str, cfg: &super::config::AgentConfig) -> Option<String> {
    for cap in TOOL_NAME_RE.captures_iter(program) {
        let name = cap.get(1).or_else(|| cap.get(2))?.as_str();
        if cfg.tools.is_catalog_only(name) {
            return Some(name.to_string());
        }
    }
    None
}

fn fail_from_fault(fault: Fault) -> FailInfo {
    let category = fault
        .detail
        .as_ref()
        .and_then(|detail| detail.get("category"))
        .and_then(|category| category.as_str())
        .unwrap_or("");
    let reason = match fault.kind {
        FaultKind::Timeout => FailReason::Timeout,
        FaultKind::OutOfMemory => FailReason::OutOfMemory,
        FaultKind::IterationLimit => FailReason::IterationLimit,
        FaultKind::AnalysisError => FailReason::AnalysisError,
        FaultKind::Crash => FailReason::RuntimeError,
        FaultKind::RuntimeError => match category {
            "catalog_tool_called" => FailReason::CatalogToolCalled,
            "tool_validation_error" => FailReason::ToolValidationError,
            "tool_error" => FailReason::ToolError,
            _ => FailReason::RuntimeError,
        },
    };
    let mut fail = FailInfo::new(reason, fault.message.clone());
    if let Some(op) = fault
        .detail
        .as_ref()
        .and_then(|detail| detail.get("op"))
        .and_then(|op| op.as_str())
    {
        fail = fail.with_op(op);
    }
    if let Some(detail) = &fault.detail {
        fail = fail.with_details(Value::from_json(detail));
    }
    fail
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::llm::{llm_fn, FakeLLM, LLMError};
    use crate::schemas::FailReason;
    use crate::tools::tool_fn;
    use crate::trace::EventKind;
    use crate::{context, ToolError};

    fn options_with(llm: Arc<dyn LLM>) -> RunOptions {
        RunOptions::new().with_llm(llm)
    }

    #[tokio::test]
    async fn test_arithmetic_single_shot() {
        let agent = Agent::builder()
            .prompt("Add {{x}} and {{y}}")
            .signature("(x :int, y :int) -> :int")
            .max_turns(1)
            .build()
            .unwrap();
        let llm = Arc::new(FakeLLM::new().reply_program("(+ ctx/x ctx/y)"));

        let step = agent
            .run(
                options_with(llm.clone())
                    .with_context(context! { "x" => 5, "y" => 3 }),
            )
            .await;

        assert!(step.is_success());
        assert_eq!(step.return_value, Some(Value::Int(8)));
        assert_eq!(step.usage.turns, 1);

        // The mission placeholders were expanded before turn 1.
        let request = &llm.requests()[0];
        assert!(request.system.contains("Add 5 and 3"));
    }

    #[tokio::test]
    async fn test_return_contract_violation_retries() {
        let agent = Agent::builder()
            .prompt("produce the number eight")
            .signature("-> {result :int}")
            .max_turns(3)
            .retry_turns(1)
            .build()
            .unwrap();
        let llm = Arc::new(
            FakeLLM::new()
                .reply_program(r#"(return {:result "eight"})"#)
                .reply_program("(return {:result 8})"),
        );

        let step = agent
            .run(options_with(llm.clone()).with_trace_mode(TraceMode::On))
            .await;

        assert!(step.is_success());
        let result = step.return_value.unwrap();
        assert_eq!(result.get_keyword("result"), Some(&Value::Int(8)));
        assert_eq!(step.turns.as_ref().map(Vec::len), Some(2));

        // Turn 2 received the validation failure as its user message.
        let second_request = &llm.requests()[1];
        let last_user = second_request
            .messages
            .iter()
            .rev()
            .find(|m| m.message_type == crate::schemas::MessageType::Human)
            .unwrap();
        assert!(last_user.content.contains("return type validation failed"));
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_terminal() {
        let agent = Agent::builder()
            .prompt("produce the number eight")
            .signature("-> {result :int}")
            .max_turns(5)
            .retry_turns(1)
            .build()
            .unwrap();
        let llm = Arc::new(
            FakeLLM::new()
                .reply_program(r#"(return {:result "eight"})"#)
                .reply_program(r#"(return {:result "still eight"})"#),
        );

        let step = agent.run(options_with(llm)).await;
        assert_eq!(
            step.fail.as_ref().map(|f| f.reason),
            Some(FailReason::ReturnValidationFailed)
        );
    }

    #[tokio::test]
    async fn test_tool_dispatch_with_validation_and_trace() {
        let double = tool_fn("double", |args| async move {
            let n = args["n"].as_i64().ok_or_else(|| {
                ToolError::InvalidInput("n must be an int".into())
            })?;
            Ok(serde_json::json!(n * 2))
        });
        let agent = Agent::builder()
            .prompt("double the number")
            .signature("-> :int")
            .typed_tool(double, "(n :int) -> :int")
            .build()
            .unwrap();
        let llm = Arc::new(FakeLLM::new().reply_program("(return (tool/double {:n 21}))"));

        let step = agent
            .run(options_with(llm).with_trace_mode(TraceMode::On))
            .await;

        assert_eq!(step.return_value, Some(Value::Int(42)));
        assert_eq!(step.tool_calls.len(), 1);
        assert_eq!(step.tool_calls[0].name, "double");
        assert_eq!(step.tool_calls[0].result, serde_json::json!(42));
    }

    #[tokio::test]
    async fn test_catalog_tool_blocked() {
        let agent = Agent::builder()
            .prompt("plan something")
            .signature("-> :int")
            .catalog_tool("plan", Some("(goal :string) -> :map".to_string()), "planning")
            .max_turns(2)
            .build()
            .unwrap();
        let llm = Arc::new(
            FakeLLM::new()
                .reply_program("(tool/plan {})")
                .reply_program("(tool/plan {})"),
        );

        let step = agent.run(options_with(llm.clone())).await;

        // Retry feedback named the catalog violation...
        let second_request = &llm.requests()[1];
        let transcript = Message::messages_to_string(&second_request.messages);
        assert!(transcript.contains("planning only"));

        // ...and once turns ran out, that reason became terminal.
        assert_eq!(
            step.fail.as_ref().map(|f| f.reason),
            Some(FailReason::CatalogToolCalled)
        );
    }

    #[tokio::test]
    async fn test_firewalled_field_round_trip() {
        let agent = Agent::builder()
            .prompt("summarize")
            .signature("-> {summary :string, _ids [:int]}")
            .build()
            .unwrap();
        let llm = Arc::new(
            FakeLLM::new().reply_program(r#"(return {:summary "ok" :_ids [1 2 3]})"#),
        );

        let step = agent.run(options_with(llm)).await;
        let result = step.return_value.unwrap();
        assert_eq!(result.get_keyword("summary"), Some(&Value::string("ok")));
        assert_eq!(
            result.get_keyword("_ids"),
            Some(&Value::vector(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3),
            ]))
        );

        // A downstream agent using this one as a tool never sees _ids in
        // its prompt.
        let entry = agent.as_tool(AsToolOptions::default());
        let line = entry.schema_line("summarize", None);
        assert!(line.contains("summary"));
        assert!(!line.contains("_ids"));
    }

    #[tokio::test]
    async fn test_mission_timeout() {
        let agent = Agent::builder()
            .prompt("slow mission")
            .signature("-> :int")
            .mission_timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let llm = Arc::new(llm_fn(|_req| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(crate::llm::LLMResponse::from_text(
                "```clojure\n(println \"still thinking\")\n```",
            ))
        }));

        let step = agent.run(options_with(llm)).await;

        assert_eq!(
            step.fail.as_ref().map(|f| f.reason),
            Some(FailReason::MissionTimeout)
        );
        assert!(step.usage.turns <= 2);
        assert!(step.usage.duration_ms >= 100);
    }

    #[tokio::test]
    async fn test_memory_persists_across_turns() {
        let agent = Agent::builder()
            .prompt("accumulate")
            .signature("-> :int")
            .max_turns(3)
            .build()
            .unwrap();
        let llm = Arc::new(
            FakeLLM::new()
                .reply_program("(def total 40)\n(println \"stored\")\n{:note \"saved\"}")
                .reply_program("(return (+ total 2))"),
        );

        let step = agent.run(options_with(llm)).await;

        assert_eq!(step.return_value, Some(Value::Int(42)));
        assert_eq!(step.memory.get("total"), Some(&Value::Int(40)));
        assert_eq!(step.memory.get("note"), Some(&Value::string("saved")));
        assert_eq!(step.prints, vec!["stored".to_string()]);
    }

    #[tokio::test]
    async fn test_return_key_splits_memory_from_result() {
        let agent = Agent::builder()
            .prompt("split")
            .max_turns(3)
            .build()
            .unwrap();
        let llm = Arc::new(
            FakeLLM::new()
                .reply_program(r#"{:count 3 :return "intermediate"}"#)
                .reply_program("(return (memory/get :count))"),
        );

        let step = agent.run(options_with(llm)).await;
        assert_eq!(step.return_value, Some(Value::Int(3)));
        assert!(step.memory.contains_key("count"));
        assert!(!step.memory.contains_key("return"));
    }

    #[tokio::test]
    async fn test_explicit_fail_is_terminal() {
        let agent = Agent::builder()
            .prompt("give up")
            .max_turns(5)
            .build()
            .unwrap();
        let llm = Arc::new(
            FakeLLM::new().reply_program(r#"(fail {:reason :no-data :message "nothing here"})"#),
        );

        let step = agent.run(options_with(llm)).await;
        let fail = step.fail.unwrap();
        assert_eq!(fail.reason, FailReason::Failed);
        assert_eq!(fail.message, "nothing here");
        assert_eq!(step.usage.turns, 1);
    }

    #[tokio::test]
    async fn test_no_code_in_response_feeds_back() {
        let agent = Agent::builder()
            .prompt("write code")
            .max_turns(3)
            .build()
            .unwrap();
        let llm = Arc::new(
            FakeLLM::new()
                .reply("I would rather explain in prose.")
                .reply_program("(return 1)"),
        );

        let step = agent.run(options_with(llm.clone())).await;
        assert_eq!(step.return_value, Some(Value::Int(1)));

        let transcript = Message::messages_to_string(&llm.requests()[1].messages);
        assert!(transcript.contains("ctx/fail"));
    }

    #[tokio::test]
    async fn test_runtime_error_recoverable_via_ctx_fail() {
        let agent = Agent::builder()
            .prompt("resilient")
            .max_turns(3)
            .build()
            .unwrap();
        let llm = Arc::new(
            FakeLLM::new()
                .reply_program("(nth [] 5)")
                .reply_program("(return (:reason ctx/fail))"),
        );

        let step = agent.run(options_with(llm)).await;
        assert_eq!(step.return_value, Some(Value::keyword("runtime_error")));
    }

    #[tokio::test]
    async fn test_nested_agent_as_tool() {
        let child = Agent::builder()
            .prompt("double {{n}}")
            .signature("(n :int) -> :int")
            .max_turns(1)
            .build()
            .unwrap();
        let parent = Agent::builder()
            .prompt("use the doubler")
            .signature("-> :int")
            .agent_tool("doubler", child, "doubles a number")
            .build()
            .unwrap();
        // Script order: parent turn 1, then the nested child call.
        let llm = Arc::new(
            FakeLLM::new()
                .reply_program("(return (tool/doubler {:n 21}))")
                .reply_program("(* ctx/n 2)"),
        );

        let step = parent
            .run(options_with(llm).with_trace_mode(TraceMode::On))
            .await;
        assert_eq!(step.return_value, Some(Value::Int(42)));
    }

    #[tokio::test]
    async fn test_nested_failure_surfaces_as_tool_error() {
        let child = Agent::builder()
            .prompt("always fail {{n}}")
            .signature("(n :int) -> :int")
            .max_turns(1)
            .build()
            .unwrap();
        let parent = Agent::builder()
            .prompt("try the child, report the failure")
            .max_turns(3)
            .agent_tool("child", child, "")
            .build()
            .unwrap();
        let llm = Arc::new(
            FakeLLM::new()
                .reply_program("(tool/child {:n 1})")
                .reply_program(r#"(fail {:reason :cascade :message "child broke"})"#)
                .reply_program("(return (:reason ctx/fail))"),
        );

        let step = parent.run(options_with(llm)).await;
        assert_eq!(step.return_value, Some(Value::keyword("tool_error")));
    }

    #[tokio::test]
    async fn test_turn_budget_shared_and_exhausted() {
        let agent = Agent::builder()
            .prompt("budgeted")
            .max_turns(10)
            .turn_budget(2)
            .build()
            .unwrap();
        let llm = Arc::new(
            FakeLLM::new()
                .reply_program("(println 1)")
                .reply_program("(println 2)")
                .reply_program("(println 3)"),
        );

        let step = agent.run(options_with(llm)).await;
        assert_eq!(
            step.fail.as_ref().map(|f| f.reason),
            Some(FailReason::TurnBudgetExhausted)
        );
        assert_eq!(step.usage.turns, 2);
    }

    #[tokio::test]
    async fn test_llm_error_after_retries_is_terminal() {
        let agent = Agent::builder()
            .prompt("never answered")
            .llm_retry(crate::llm::RetryConfig {
                max_attempts: 2,
                base_delay_ms: 1,
                ..Default::default()
            })
            .build()
            .unwrap();
        let llm = Arc::new(llm_fn(|_req| async {
            Err(LLMError::ServerError("500".into()))
        }));

        let step = agent.run(options_with(llm)).await;
        assert_eq!(step.fail.as_ref().map(|f| f.reason), Some(FailReason::LlmError));
    }

    #[tokio::test]
    async fn test_json_mode_validates_and_retries() {
        let agent = Agent::builder()
            .prompt("classify the text")
            .signature("-> {label :string}")
            .output_mode(OutputMode::Json)
            .max_turns(3)
            .retry_turns(1)
            .build()
            .unwrap();
        let llm = Arc::new(
            FakeLLM::new()
                .reply("```json\n{\"label\": 3}\n```")
                .reply("{\"label\": \"spam\"}"),
        );

        let step = agent.run(options_with(llm.clone())).await;
        assert!(step.is_success());
        assert_eq!(
            step.return_value.unwrap().get_keyword("label"),
            Some(&Value::string("spam"))
        );

        // JSON mode sends the schema fragment along.
        let request = &llm.requests()[0];
        assert!(request.schema.is_some());
    }

    #[tokio::test]
    async fn test_trace_has_matched_spans() {
        let double = tool_fn("double", |args| async move {
            Ok(serde_json::json!(args["n"].as_i64().unwrap_or(0) * 2))
        });
        let agent = Agent::builder()
            .prompt("trace me")
            .typed_tool(double, "(n :int) -> :int")
            .build()
            .unwrap();
        let llm = Arc::new(FakeLLM::new().reply_program("(return (tool/double {:n 2}))"));

        let scope = RunScope::root(TraceMode::On);
        let tracer = scope.tracer.clone();
        let step = agent
            .run_scoped(options_with(llm).with_trace_mode(TraceMode::On), scope)
            .await;
        assert!(step.is_success());

        let events = tracer.finalize();
        let count = |kind: EventKind| events.iter().filter(|e| e.event == kind).count();
        assert_eq!(count(EventKind::RunStart), 1);
        assert_eq!(count(EventKind::RunStop), 1);
        assert_eq!(count(EventKind::TurnStart), count(EventKind::TurnStop));
        assert_eq!(count(EventKind::LlmStart), count(EventKind::LlmStop));
        assert_eq!(count(EventKind::ToolStart), 1);
        assert_eq!(count(EventKind::ToolStop), 1);

        // Tool events match the step's tool_calls log.
        assert_eq!(step.tool_calls.len(), count(EventKind::ToolStart));
    }

    #[tokio::test]
    async fn test_preview_does_not_call_llm() {
        let agent = Agent::builder()
            .prompt("Add {{x}} and {{y}}")
            .signature("(x :int, y :int) -> :int")
            .build()
            .unwrap();
        let llm = Arc::new(FakeLLM::new());

        let preview = agent
            .preview(
                &options_with(llm.clone()).with_context(context! { "x" => 1, "y" => 2 }),
            )
            .unwrap();

        assert!(preview.system.contains("Add 1 and 2"));
        assert!(preview.token_estimate > 0);
        assert_eq!(preview.message_estimate, 2);
        assert_eq!(llm.requests().len(), 0);
    }

    #[tokio::test]
    async fn test_final_turn_warning_sent() {
        let agent = Agent::builder()
            .prompt("short leash")
            .max_turns(2)
            .build()
            .unwrap();
        let llm = Arc::new(
            FakeLLM::new()
                .reply_program("(println \"probing\")")
                .reply_program("(return 1)"),
        );

        let step = agent.run(options_with(llm.clone())).await;
        assert!(step.is_success());

        let transcript = Message::messages_to_string(&llm.requests()[1].messages);
        assert!(transcript.contains("FINAL TURN"));
    }

    #[tokio::test]
    async fn test_memory_rollback_strategy_keeps_going() {
        let agent = Agent::builder()
            .prompt("hoarder")
            .max_turns(3)
            .memory_limit_bytes(128)
            .memory_strategy(crate::memory::MemoryStrategy::Rollback)
            .build()
            .unwrap();
        let big = "x".repeat(500);
        let llm = Arc::new(
            FakeLLM::new()
                .reply_program(format!("(def blob \"{big}\")\n1"))
                .reply_program("(return (count (keys {})))"),
        );

        let step = agent.run(options_with(llm.clone())).await;
        assert!(step.is_success());
        assert!(!step.memory.contains_key("blob"));

        let transcript = Message::messages_to_string(&llm.requests()[1].messages);
        assert!(transcript.contains("discarded"));
    }

    #[tokio::test]
    async fn test_memory_strict_strategy_is_fatal() {
        let agent = Agent::builder()
            .prompt("hoarder")
            .max_turns(3)
            .memory_limit_bytes(128)
            .build()
            .unwrap();
        let big = "x".repeat(500);
        let llm = Arc::new(FakeLLM::new().reply_program(format!("(def blob \"{big}\")\n1")));

        let step = agent.run(options_with(llm)).await;
        assert_eq!(
            step.fail.as_ref().map(|f| f.reason),
            Some(FailReason::MemoryLimitExceeded)
        );
    }

    #[tokio::test]
    async fn test_turn_history_symbols_available() {
        let agent = Agent::builder()
            .prompt("history")
            .max_turns(3)
            .build()
            .unwrap();
        let llm = Arc::new(
            FakeLLM::new()
                .reply_program("(+ 20 1)")
                .reply_program("(return (* *1 2))"),
        );

        let step = agent.run(options_with(llm)).await;
        assert_eq!(step.return_value, Some(Value::Int(42)));
    }
}
