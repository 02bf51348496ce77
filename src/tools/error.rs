use thiserror::Error;

/// Errors a tool implementation may return.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Failed(String),

    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors produced by tool dispatch, before or after the tool ran. The
/// interpreter maps these onto its own error taxonomy.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown tool: {0}")]
    Unknown(String),

    #[error("tool {0} is listed for planning only")]
    CatalogOnly(String),

    #[error("invalid arguments for tool {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("tool {tool} failed: {message}")]
    Failed { tool: String, message: String },
}
