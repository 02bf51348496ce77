use thiserror::Error;

use crate::schemas::Step;
use crate::signature::SignatureError;

#[derive(Debug, Error)]
pub enum AgentError {
    /// A contract string failed to parse, or a template references a name
    /// outside the signature parameters.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `run_or_raise` on a mission that ended in failure; the full step is
    /// attached.
    #[error("mission failed: {}", failure_summary(.0))]
    StepFailed(Box<Step>),
}

fn failure_summary(step: &Step) -> String {
    step.fail
        .as_ref()
        .map(|fail| fail.to_string())
        .unwrap_or_else(|| "unknown failure".to_string())
}
