use serde::{Deserialize, Serialize};
use std::fmt;

/// How the LLM is expected to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// The default: a fenced PTC-Lisp program per turn.
    #[default]
    PtcLisp,
    /// A single typed JSON document; no tools, no compression, signature
    /// required.
    Json,
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::PtcLisp => write!(f, "ptc_lisp"),
            OutputMode::Json => write!(f, "json"),
        }
    }
}
