use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{LLMError, LLMErrorKind, LLMRequest, LLMResponse, LLM};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Exponential,
    Linear,
    Constant,
}

/// Retry policy for the LLM call only; nothing else in the loop retries on
/// its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub base_delay_ms: u64,
    pub retry_on: Vec<LLMErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            backoff: Backoff::Exponential,
            base_delay_ms: 1000,
            retry_on: vec![
                LLMErrorKind::RateLimit,
                LLMErrorKind::Timeout,
                LLMErrorKind::ServerError,
            ],
        }
    }
}

impl RetryConfig {
    /// Delay before the given retry (1-based attempt that just failed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms;
        let ms = match self.backoff {
            Backoff::Constant => base,
            Backoff::Linear => base.saturating_mul(u64::from(attempt)),
            Backoff::Exponential => base.saturating_mul(1u64 << (attempt - 1).min(16)),
        };
        Duration::from_millis(ms)
    }

    pub fn should_retry(&self, error: &LLMError) -> bool {
        self.retry_on.contains(&error.kind())
    }
}

/// Calls the model, retrying retryable errors with backoff. Other errors
/// are fatal for the turn.
pub async fn generate_with_retry(
    llm: &dyn LLM,
    request: &LLMRequest,
    config: &RetryConfig,
) -> Result<LLMResponse, LLMError> {
    let mut attempt = 1;
    loop {
        match llm.generate(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(error) => {
                if attempt >= config.max_attempts || !config.should_retry(&error) {
                    return Err(error);
                }
                let delay = config.delay_for(attempt);
                log::warn!(
                    "LLM call failed (attempt {attempt}/{}), retrying in {} ms: {error}",
                    config.max_attempts,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::llm::llm_fn;
    use crate::schemas::OutputMode;

    fn request() -> LLMRequest {
        LLMRequest {
            system: String::new(),
            messages: vec![],
            turn: 1,
            output_mode: OutputMode::PtcLisp,
            schema: None,
            tool_names: vec![],
            opts: serde_json::Value::Null,
        }
    }

    fn quick_retry() -> RetryConfig {
        RetryConfig {
            base_delay_ms: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_schedules() {
        let exponential = RetryConfig::default();
        assert_eq!(exponential.delay_for(1), Duration::from_millis(1000));
        assert_eq!(exponential.delay_for(2), Duration::from_millis(2000));
        assert_eq!(exponential.delay_for(3), Duration::from_millis(4000));

        let linear = RetryConfig {
            backoff: Backoff::Linear,
            ..Default::default()
        };
        assert_eq!(linear.delay_for(3), Duration::from_millis(3000));

        let constant = RetryConfig {
            backoff: Backoff::Constant,
            ..Default::default()
        };
        assert_eq!(constant.delay_for(3), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let llm = llm_fn(|_req| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LLMError::RateLimit("slow down".into()))
                } else {
                    Ok(LLMResponse::from_text("ok"))
                }
            }
        });
        let response = generate_with_retry(&llm, &request(), &quick_retry())
            .await
            .unwrap();
        assert_eq!(response.content.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let calls = AtomicU32::new(0);
        let llm = llm_fn(|_req| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LLMError::InvalidResponse("bad".into())) }
        });
        let error = generate_with_retry(&llm, &request(), &quick_retry())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), LLMErrorKind::Other);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_exhausted() {
        let llm = llm_fn(|_req| async { Err(LLMError::ServerError("500".into())) });
        let error = generate_with_retry(&llm, &request(), &quick_retry())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), LLMErrorKind::ServerError);
    }
}
