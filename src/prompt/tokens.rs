use std::sync::LazyLock;

use tiktoken_rs::CoreBPE;

static BPE: LazyLock<CoreBPE> =
    LazyLock::new(|| tiktoken_rs::cl100k_base().expect("embedded encoding"));

/// Token estimate for prompt budgeting and `Preview`. Uses cl100k_base as a
/// reasonable stand-in for whatever model the caller wires in.
pub fn estimate_tokens(text: &str) -> usize {
    BPE.encode_with_special_tokens(text).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_is_monotonic() {
        let short = estimate_tokens("hello");
        let long = estimate_tokens(&"hello world ".repeat(50));
        assert!(short >= 1);
        assert!(long > short);
    }
}
