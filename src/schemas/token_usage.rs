use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Sums any number of optional usages; `None` entries count as zero.
    pub fn merge_options<'a>(
        usages: impl IntoIterator<Item = &'a Option<TokenUsage>>,
    ) -> Option<TokenUsage> {
        let mut merged: Option<TokenUsage> = None;
        for usage in usages.into_iter().flatten() {
            let acc = merged.get_or_insert_with(TokenUsage::default);
            acc.prompt_tokens += usage.prompt_tokens;
            acc.completion_tokens += usage.completion_tokens;
            acc.total_tokens += usage.total_tokens;
        }
        merged
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_options_skips_none() {
        let a = Some(TokenUsage::new(10, 5));
        let b = None;
        let c = Some(TokenUsage::new(1, 1));

        let merged = TokenUsage::merge_options([&a, &b, &c]).unwrap();
        assert_eq!(merged.prompt_tokens, 11);
        assert_eq!(merged.completion_tokens, 6);
        assert_eq!(merged.total_tokens, 17);
    }

    #[test]
    fn test_merge_options_all_none() {
        assert!(TokenUsage::merge_options([&None, &None]).is_none());
    }
}
