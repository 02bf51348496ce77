use serde::{Deserialize, Serialize};

use crate::schemas::{CompressionStats, Message, Turn};

/// Settings for coalescing prior turns into one REPL-transcript message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Tool calls retained per turn.
    pub max_tool_calls: usize,
    /// `println` lines retained per turn.
    pub max_printlns: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig {
            max_tool_calls: 5,
            max_printlns: 10,
        }
    }
}

/// Coalesces completed turns into a single USER message shaped like a REPL
/// transcript, with caps on retained tool calls and prints. Failed turns
/// collapse to one line each.
pub fn compress_history(turns: &[Turn], config: &CompressionConfig) -> (Message, CompressionStats) {
    let mut stats = CompressionStats {
        turns_compressed: turns.len() as u32,
        ..Default::default()
    };
    let mut transcript = vec!["Previous turns (compressed):".to_string()];

    for turn in turns {
        transcript.push(String::new());
        transcript.push(format!(";; turn {}", turn.number));

        if !turn.success {
            stats.error_turns_collapsed += 1;
            let summary = turn
                .prints
                .last()
                .cloned()
                .unwrap_or_else(|| "this turn failed and was discarded".to_string());
            transcript.push(format!(";; (failed) {summary}"));
            continue;
        }

        if let Some(program) = &turn.program {
            transcript.push(format!(">>> {program}"));
        }

        let shown_calls = turn.tool_calls.iter().take(config.max_tool_calls);
        for record in shown_calls {
            transcript.push(format!(";; {record}"));
        }
        if turn.tool_calls.len() > config.max_tool_calls {
            let dropped = turn.tool_calls.len() - config.max_tool_calls;
            stats.tool_calls_dropped += dropped as u32;
            transcript.push(format!(";; … {dropped} more tool calls"));
        }

        for line in turn.prints.iter().take(config.max_printlns) {
            transcript.push(line.clone());
        }
        if turn.prints.len() > config.max_printlns {
            let dropped = turn.prints.len() - config.max_printlns;
            stats.printlns_dropped += dropped as u32;
            transcript.push(format!("… {dropped} more lines"));
        }

        if let Some(result) = &turn.result {
            transcript.push(format!("=> {result}"));
        }
    }

    (
        Message::new_human_message(transcript.join("\n")),
        stats,
    )
}
