use std::collections::HashMap;
use std::sync::Arc;

use super::LLM;

/// Named models, so agents can pin one (`llm: "judge"`) and runs can share
/// a single wiring point.
#[derive(Default, Clone)]
pub struct LLMRegistry {
    models: HashMap<String, Arc<dyn LLM>>,
}

impl LLMRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, llm: Arc<dyn LLM>) -> Self {
        self.models.insert(name.into(), llm);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LLM>> {
        self.models.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}
