use indoc::formatdoc;

use crate::memory::TurnMemory;
use crate::prompt::PromptLimits;
use crate::schemas::FailInfo;
use crate::signature::SignatureError;
use crate::utils::truncate_chars;

/// The boundary reminder closing every feedback message.
fn boundary(remaining: i64) -> String {
    if remaining <= 1 {
        "FINAL TURN — you must call `return` or `fail`.".to_string()
    } else {
        format!("{remaining} turns remain. Finish with `(return value)` or `(fail {{:reason :keyword :message \"…\"}})`.")
    }
}

fn prints_block(prints: &[String], limits: &PromptLimits) -> String {
    if prints.is_empty() {
        "(no output — use println to inspect values)".to_string()
    } else {
        let joined = prints.join("\n");
        if joined.len() > limits.feedback_max_chars {
            format!(
                "{}\n[output truncated]",
                truncate_chars(&joined, limits.feedback_max_chars)
            )
        } else {
            joined
        }
    }
}

fn memory_hint(memory: &TurnMemory) -> String {
    if memory.is_empty() {
        "Memory is empty.".to_string()
    } else {
        format!(
            "In memory: {}.",
            memory.symbols().collect::<Vec<_>>().join(", ")
        )
    }
}

/// Feedback after a successful (non-terminal) turn.
pub(crate) fn turn_feedback(
    prints: &[String],
    memory: &TurnMemory,
    remaining: i64,
    limits: &PromptLimits,
) -> String {
    formatdoc! {"
        Output:
        {prints}

        {memory}
        {boundary}",
        prints = prints_block(prints, limits),
        memory = memory_hint(memory),
        boundary = boundary(remaining),
    }
}

/// Feedback after a recoverable error. The structured form is also bound
/// to `ctx/fail` for the next program.
pub(crate) fn error_feedback(
    fail: &FailInfo,
    prints: &[String],
    memory: &TurnMemory,
    remaining: i64,
    limits: &PromptLimits,
) -> String {
    formatdoc! {"
        The previous program failed: {fail}
        The structured error is available as ctx/fail.

        Output before the failure:
        {prints}

        {memory}
        {boundary}",
        fail = fail,
        prints = prints_block(prints, limits),
        memory = memory_hint(memory),
        boundary = boundary(remaining),
    }
}

/// Feedback after the returned value failed its contract.
pub(crate) fn validation_feedback(
    error: &SignatureError,
    memory: &TurnMemory,
    remaining: i64,
) -> String {
    formatdoc! {"
        return type validation failed: {error}
        Fix the value and call `return` again.

        {memory}
        {boundary}",
        error = error,
        memory = memory_hint(memory),
        boundary = boundary(remaining),
    }
}

/// Feedback when a turn's memory updates were rolled back.
pub(crate) fn memory_rollback_feedback(
    attempted_bytes: u64,
    limit_bytes: u64,
    memory: &TurnMemory,
    remaining: i64,
) -> String {
    formatdoc! {"
        This turn's memory updates were discarded: they would have grown
        memory to {attempted} bytes, over the {limit} byte limit.
        Store less, or summarize before persisting.

        {memory}
        {boundary}",
        attempted = attempted_bytes,
        limit = limit_bytes,
        memory = memory_hint(memory),
        boundary = boundary(remaining),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStrategy;

    fn memory() -> TurnMemory {
        TurnMemory::new(1024, MemoryStrategy::Strict)
    }

    #[test]
    fn test_final_turn_warning() {
        let text = turn_feedback(&[], &memory(), 1, &PromptLimits::default());
        assert!(text.contains("FINAL TURN"));

        let text = turn_feedback(&[], &memory(), 3, &PromptLimits::default());
        assert!(text.contains("3 turns remain"));
        assert!(!text.contains("FINAL TURN"));
    }

    #[test]
    fn test_prints_truncated_to_cap() {
        let limits = PromptLimits {
            feedback_max_chars: 20,
            ..Default::default()
        };
        let prints = vec!["x".repeat(100)];
        let text = turn_feedback(&prints, &memory(), 2, &limits);
        assert!(text.contains("[output truncated]"));
    }

    #[test]
    fn test_memory_symbols_listed() {
        let mut mem = memory();
        mem.apply_turn(std::collections::BTreeMap::from([
            ("users".to_string(), crate::lisp::Value::Int(1)),
            ("total".to_string(), crate::lisp::Value::Int(2)),
        ]));
        let text = turn_feedback(&[], &mem, 2, &PromptLimits::default());
        assert!(text.contains("total, users"));
    }
}
