use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{LLMError, LLMRequest, LLMResponse, LLM};

/// A scripted model for tests and offline runs: answers from a queue and
/// records every request it saw.
#[derive(Default)]
pub struct FakeLLM {
    script: Mutex<VecDeque<Result<LLMResponse, LLMError>>>,
    requests: Mutex<Vec<LLMRequest>>,
}

impl FakeLLM {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a plain-text response.
    pub fn reply(self, content: impl Into<String>) -> Self {
        self.script
            .lock()
            .expect("script lock")
            .push_back(Ok(LLMResponse::from_text(content)));
        self
    }

    /// Queues a fenced PTC-Lisp program, the shape agents expect.
    pub fn reply_program(self, program: impl AsRef<str>) -> Self {
        self.reply(format!("```clojure\n{}\n```", program.as_ref()))
    }

    pub fn reply_response(self, response: LLMResponse) -> Self {
        self.script
            .lock()
            .expect("script lock")
            .push_back(Ok(response));
        self
    }

    pub fn reply_error(self, error: LLMError) -> Self {
        self.script.lock().expect("script lock").push_back(Err(error));
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<LLMRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().expect("script lock").len()
    }
}

#[async_trait]
impl LLM for FakeLLM {
    async fn generate(&self, request: LLMRequest) -> Result<LLMResponse, LLMError> {
        self.requests.lock().expect("requests lock").push(request);
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(LLMError::Other("FakeLLM script exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::OutputMode;

    fn request() -> LLMRequest {
        LLMRequest {
            system: "sys".into(),
            messages: vec![],
            turn: 1,
            output_mode: OutputMode::PtcLisp,
            schema: None,
            tool_names: vec![],
            opts: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_replays_script_in_order() {
        let llm = FakeLLM::new().reply("one").reply_program("(+ 1 2)");
        assert_eq!(
            llm.generate(request()).await.unwrap().content.as_deref(),
            Some("one")
        );
        let second = llm.generate(request()).await.unwrap();
        assert!(second.content.unwrap().contains("(+ 1 2)"));
        assert_eq!(llm.remaining(), 0);
        assert_eq!(llm.requests().len(), 2);
    }

    #[test]
    fn test_exhausted_script_errors() {
        let llm = FakeLLM::new();
        assert!(tokio_test::block_on(llm.generate(request())).is_err());
    }
}
