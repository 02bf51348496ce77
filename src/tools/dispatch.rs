use async_trait::async_trait;

use crate::lisp::Value;

use super::DispatchError;

/// The seam between the interpreter and the host's tools.
///
/// The interpreter hands over the single map argument of a `(tool/… {...})`
/// call and gets a value back. Everything behind the seam — validation,
/// nested agents, telemetry scope — belongs to the host.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(&self, name: &str, args: Value) -> Result<Value, DispatchError>;
}
