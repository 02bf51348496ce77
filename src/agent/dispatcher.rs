use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value as Json};

use crate::lisp::Value;
use crate::llm::{LLMRegistry, LLM};
use crate::schemas::OutputMode;
use crate::signature::{self, Signature};
use crate::tools::{args_to_json, prepare_args, DispatchError, Tool, ToolDispatcher, ToolEntry};
use crate::trace::EventKind;

use super::{Agent, RunOptions, RunScope};

/// The tool dispatcher for one turn of one run.
///
/// Local tools run in place; nested agents (including `SELF` and judges)
/// re-enter the loop one level deeper, sharing the parent's turn budget
/// and mission deadline.
pub(crate) struct RunDispatcher {
    pub agent: Agent,
    pub llm: Arc<dyn LLM>,
    pub registry: Option<LLMRegistry>,
    pub scope: RunScope,
    pub llm_opts: Json,
}

#[async_trait]
impl ToolDispatcher for RunDispatcher {
    async fn dispatch(&self, name: &str, args: Value) -> Result<Value, DispatchError> {
        let table = self.agent.tools();
        let Some(entry) = table.get(name) else {
            if table.is_catalog_only(name) {
                return Err(DispatchError::CatalogOnly(name.to_string()));
            }
            return Err(DispatchError::Unknown(name.to_string()));
        };

        match entry {
            ToolEntry::Plain(tool) => {
                let (prepared, _) = prepare_args(name, None, &args)?;
                call_local(name, tool.as_ref(), args_to_json(name, &prepared)?).await
            }
            ToolEntry::Typed {
                tool,
                signature,
                skip_validation,
            } => {
                let checked = if *skip_validation { None } else { Some(signature) };
                let (prepared, warnings) = prepare_args(name, checked, &args)?;
                for warning in &warnings {
                    log::warn!("tool {name}: {warning}");
                }
                let result =
                    call_local(name, tool.as_ref(), args_to_json(name, &prepared)?).await?;
                if !skip_validation {
                    signature::validate(&result, &signature.returns, "result").map_err(
                        |error| DispatchError::Failed {
                            tool: name.to_string(),
                            message: format!("result failed its contract: {error}"),
                        },
                    )?;
                }
                Ok(result)
            }
            ToolEntry::Nested {
                agent,
                llm,
                description: _,
            } => {
                let llm = llm.clone().unwrap_or_else(|| self.llm.clone());
                self.run_nested(name, agent.clone(), llm, &args).await
            }
            ToolEntry::Judge {
                template,
                signature,
                llm,
                description: _,
            } => {
                let judge = build_judge(template, signature)
                    .map_err(|message| DispatchError::Failed {
                        tool: name.to_string(),
                        message,
                    })?;
                let llm = llm.clone().unwrap_or_else(|| self.llm.clone());
                self.run_nested(name, judge, llm, &args).await
            }
            ToolEntry::SelfRef => {
                self.run_nested(name, self.agent.clone(), self.llm.clone(), &args)
                    .await
            }
        }
    }
}

impl RunDispatcher {
    async fn run_nested(
        &self,
        name: &str,
        agent: Agent,
        llm: Arc<dyn LLM>,
        args: &Value,
    ) -> Result<Value, DispatchError> {
        let (context, warnings) = prepare_args(name, agent.signature(), args)?;
        for warning in &warnings {
            log::warn!("nested agent {name}: {warning}");
        }

        self.scope.tracer.instant(
            EventKind::NestedCall,
            self.scope.parent_span.as_deref(),
            json!({ "tool": name, "depth": self.scope.depth + 1 }),
        );
        let child_scope = self.scope.nested(self.scope.parent_span.clone());
        let child_tracer = child_scope.tracer.clone();
        let options = RunOptions {
            llm: Some(llm),
            context,
            registry: self.registry.clone(),
            trace_mode: child_tracer.mode(),
            llm_opts: self.llm_opts.clone(),
        };

        let step = agent.run_scoped(options, child_scope).await;
        self.scope.tracer.merge_child(&child_tracer);

        match (&step.return_value, &step.fail) {
            (Some(value), _) => Ok(value.clone()),
            (None, Some(fail)) => Err(DispatchError::Failed {
                tool: name.to_string(),
                message: fail.to_string(),
            }),
            (None, None) => Ok(Value::Nil),
        }
    }
}

/// Runs a local tool function; panics become dispatch failures, per the
/// tool contract.
async fn call_local(
    name: &str,
    tool: &dyn Tool,
    args: Json,
) -> Result<Value, DispatchError> {
    let outcome = std::panic::AssertUnwindSafe(tool.call(args))
        .catch_unwind()
        .await;
    match outcome {
        Ok(Ok(result)) => Ok(Value::from_json(&result)),
        Ok(Err(error)) => Err(DispatchError::Failed {
            tool: name.to_string(),
            message: error.to_string(),
        }),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "tool panicked".to_string());
            Err(DispatchError::Failed {
                tool: name.to_string(),
                message: format!("tool panicked: {message}"),
            })
        }
    }
}

/// The implicit single-shot agent behind a judge tool: JSON output mode,
/// the judge's contract, a few turns for validation retries.
fn build_judge(template: &str, signature: &Signature) -> Result<Agent, String> {
    Agent::builder()
        .prompt(template)
        .signature(signature.render())
        .output_mode(OutputMode::Json)
        .max_turns(3)
        .retry_turns(2)
        .build()
        .map_err(|error| error.to_string())
}
