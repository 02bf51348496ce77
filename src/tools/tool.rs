use async_trait::async_trait;
use serde_json::Value as Json;

use super::ToolError;

/// A callable tool. Implementations receive the LLM's argument map as JSON
/// (hyphenated keys already rewritten to underscores) and return any JSON
/// value.
///
/// # Usage
/// ```rust,ignore
/// let double = tool_fn("double", |args| async move {
///     let n = args["n"].as_i64().unwrap_or(0);
///     Ok(serde_json::json!(n * 2))
/// });
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the name of the tool.
    fn name(&self) -> String;

    /// Provides a description of what the tool does and when to use it.
    fn description(&self) -> String {
        String::new()
    }

    /// Executes the tool against its argument map.
    async fn call(&self, args: Json) -> Result<Json, ToolError>;
}

/// Wraps an async closure as a [`Tool`].
pub fn tool_fn<F, Fut>(name: impl Into<String>, f: F) -> FunctionTool<F>
where
    F: Fn(Json) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Json, ToolError>> + Send,
{
    FunctionTool {
        name: name.into(),
        description: String::new(),
        f,
    }
}

pub struct FunctionTool<F> {
    name: String,
    description: String,
    f: F,
}

impl<F> FunctionTool<F> {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl<F, Fut> Tool for FunctionTool<F>
where
    F: Fn(Json) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Json, ToolError>> + Send,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    async fn call(&self, args: Json) -> Result<Json, ToolError> {
        (self.f)(args).await
    }
}
