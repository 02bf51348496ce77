use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse error classes used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LLMErrorKind {
    RateLimit,
    Timeout,
    ServerError,
    Other,
}

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

impl LLMError {
    pub fn kind(&self) -> LLMErrorKind {
        match self {
            LLMError::RateLimit(_) => LLMErrorKind::RateLimit,
            LLMError::Timeout(_) => LLMErrorKind::Timeout,
            LLMError::ServerError(_) => LLMErrorKind::ServerError,
            LLMError::InvalidResponse(_) | LLMError::Other(_) => LLMErrorKind::Other,
        }
    }
}
