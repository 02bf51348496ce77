use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::schemas::{Message, OutputMode, TokenUsage};

use super::LLMError;

/// Everything the host sends the model for one turn.
#[derive(Debug, Clone)]
pub struct LLMRequest {
    pub system: String,
    pub messages: Vec<Message>,
    /// 1-based turn number.
    pub turn: u32,
    pub output_mode: OutputMode,
    /// JSON-Schema fragment, present in JSON output mode.
    pub schema: Option<Json>,
    /// Names of callable tools, for providers that pre-register them.
    pub tool_names: Vec<String>,
    /// Opaque provider options, passed through from the agent.
    pub opts: Json,
}

/// A provider-side tool call, accepted in JSON output mode when the
/// provider answers through a `respond` call instead of text content.
#[derive(Debug, Clone)]
pub struct LLMToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Json,
}

/// What the model answered.
#[derive(Debug, Clone, Default)]
pub struct LLMResponse {
    pub content: Option<String>,
    pub usage: Option<TokenUsage>,
    pub tool_calls: Vec<LLMToolCall>,
}

impl LLMResponse {
    pub fn from_text(content: impl Into<String>) -> Self {
        LLMResponse {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// The externally supplied model callable. The runtime never implements a
/// model itself; callers hand one in per run or through the registry.
#[async_trait]
pub trait LLM: Send + Sync {
    async fn generate(&self, request: LLMRequest) -> Result<LLMResponse, LLMError>;
}

#[async_trait]
impl<T: LLM + ?Sized> LLM for Arc<T> {
    async fn generate(&self, request: LLMRequest) -> Result<LLMResponse, LLMError> {
        (**self).generate(request).await
    }
}

/// Wraps a plain async function as an [`LLM`].
///
/// ```rust,ignore
/// let llm = llm_fn(|_req| async { Ok(LLMResponse::from_text("```clojure\n1\n```")) });
/// ```
pub fn llm_fn<F, Fut>(f: F) -> LLMFn<F>
where
    F: Fn(LLMRequest) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<LLMResponse, LLMError>> + Send,
{
    LLMFn(f)
}

pub struct LLMFn<F>(F);

#[async_trait]
impl<F, Fut> LLM for LLMFn<F>
where
    F: Fn(LLMRequest) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<LLMResponse, LLMError>> + Send,
{
    async fn generate(&self, request: LLMRequest) -> Result<LLMResponse, LLMError> {
        (self.0)(request).await
    }
}
