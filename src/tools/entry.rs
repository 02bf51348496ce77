use std::sync::Arc;

use serde_json::{Map as JsonMap, Value as Json};

use crate::agent::Agent;
use crate::lisp::Value;
use crate::llm::LLM;
use crate::signature::{self, Signature};

use super::{DispatchError, Tool};

/// One entry of an agent's tool table.
///
/// The loop dispatches on the tag: `Plain` and `Typed` run a local callable,
/// `Nested` runs another agent one level deeper, `Judge` runs a single-shot
/// prompt against a model, and `SelfRef` re-enters the owning agent
/// (recursion, bounded by depth and the shared turn budget).
pub enum ToolEntry {
    Plain(Arc<dyn Tool>),
    Typed {
        tool: Arc<dyn Tool>,
        signature: Signature,
        skip_validation: bool,
    },
    Nested {
        agent: Agent,
        /// Model override for the nested run; defaults to the parent's.
        llm: Option<Arc<dyn LLM>>,
        description: String,
    },
    Judge {
        template: String,
        signature: Signature,
        llm: Option<Arc<dyn LLM>>,
        description: String,
    },
    SelfRef,
}

impl ToolEntry {
    pub fn description(&self) -> String {
        match self {
            ToolEntry::Plain(tool) => tool.description(),
            ToolEntry::Typed { tool, .. } => tool.description(),
            ToolEntry::Nested { description, .. } | ToolEntry::Judge { description, .. } => {
                description.clone()
            }
            ToolEntry::SelfRef => "this agent, applied recursively".to_string(),
        }
    }

    /// The contract governing this entry's arguments, when it has one.
    /// `self_signature` is the owning agent's contract, used by `SelfRef`.
    pub fn signature<'a>(&'a self, self_signature: Option<&'a Signature>) -> Option<&'a Signature> {
        match self {
            ToolEntry::Plain(_) => None,
            ToolEntry::Typed { signature, .. } | ToolEntry::Judge { signature, .. } => {
                Some(signature)
            }
            ToolEntry::Nested { agent, .. } => agent.signature(),
            ToolEntry::SelfRef => self_signature,
        }
    }

    /// The one-line schema shown in prompts.
    pub fn schema_line(&self, name: &str, self_signature: Option<&Signature>) -> String {
        match self.signature(self_signature) {
            Some(signature) => signature::render_inline(name, signature),
            None => format!("{name}(args map) -> any"),
        }
    }
}

/// Prepares an argument map for a tool: rewrites hyphenated keys to
/// underscores, applies shallow input coercion, and validates against the
/// signature.
///
/// Returns the prepared values plus any coercion warnings. Local tools
/// receive the JSON form (see [`args_to_json`]); nested agents take the
/// values as their context directly.
pub fn prepare_args(
    tool: &str,
    signature: Option<&Signature>,
    args: &Value,
) -> Result<(std::collections::BTreeMap<String, Value>, Vec<String>), DispatchError> {
    let entries = args.as_map().ok_or_else(|| DispatchError::InvalidArguments {
        tool: tool.to_string(),
        message: format!("expected a map of arguments, got {}", args.type_name()),
    })?;

    // Hyphen-in-name keys become underscores before the tool sees them.
    let mut prepared: Vec<(String, Value)> = entries
        .iter()
        .filter_map(|(key, value)| {
            key.as_plain_str()
                .map(|name| (name.replace('-', "_"), value.clone()))
        })
        .collect();

    let mut warnings = Vec::new();
    if let Some(signature) = signature {
        for param in &signature.params {
            let wanted = param.name.replace('-', "_");
            let found = prepared.iter_mut().find(|(name, _)| *name == wanted);
            match found {
                Some((_, value)) => {
                    let coerced = signature::coerce_input(
                        value.clone(),
                        &param.ty,
                        &param.name,
                        &mut warnings,
                    );
                    signature::validate(&coerced, &param.ty, &param.name).map_err(|error| {
                        DispatchError::InvalidArguments {
                            tool: tool.to_string(),
                            message: error.to_string(),
                        }
                    })?;
                    *value = coerced;
                }
                None if param.ty.is_optional() => {}
                None => {
                    return Err(DispatchError::InvalidArguments {
                        tool: tool.to_string(),
                        message: format!("missing required argument {}", param.name),
                    })
                }
            }
        }
    }

    Ok((prepared.into_iter().collect(), warnings))
}

/// The JSON object a local tool function receives.
pub fn args_to_json(
    tool: &str,
    prepared: &std::collections::BTreeMap<String, Value>,
) -> Result<Json, DispatchError> {
    let mut object = JsonMap::with_capacity(prepared.len());
    for (name, value) in prepared {
        let json = value
            .to_json()
            .map_err(|error| DispatchError::InvalidArguments {
                tool: tool.to_string(),
                message: error.to_string(),
            })?;
        object.insert(name.clone(), json);
    }
    Ok(Json::Object(object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::parse;

    fn args(pairs: &[(&str, Value)]) -> Value {
        let mut builder = Value::map_builder();
        for (name, value) in pairs {
            builder = builder.keyword_entry(*name, value.clone());
        }
        builder.build()
    }

    #[test]
    fn test_hyphen_keys_are_rewritten() {
        let value = args(&[("user-id", Value::Int(3))]);
        let (prepared, _) = prepare_args("t", None, &value).unwrap();
        let json = args_to_json("t", &prepared).unwrap();
        assert_eq!(json["user_id"], 3);
        assert!(json.get("user-id").is_none());
    }

    #[test]
    fn test_validation_and_coercion() {
        let signature = parse("(n :int) -> :int").unwrap();
        let value = args(&[("n", Value::string("21"))]);
        let (prepared, warnings) = prepare_args("double", Some(&signature), &value).unwrap();
        assert_eq!(prepared.get("n"), Some(&Value::Int(21)));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_missing_required_argument() {
        let signature = parse("(n :int) -> :int").unwrap();
        let error = prepare_args("double", Some(&signature), &args(&[])).unwrap_err();
        assert!(matches!(error, DispatchError::InvalidArguments { .. }));
    }

    #[test]
    fn test_optional_argument_may_be_absent() {
        let signature = parse("(n :int, verbose :bool?) -> :int").unwrap();
        assert!(prepare_args("t", Some(&signature), &args(&[("n", Value::Int(1))])).is_ok());
    }

    #[test]
    fn test_extra_arguments_pass_through() {
        let signature = parse("(n :int) -> :int").unwrap();
        let value = args(&[("n", Value::Int(1)), ("extra", Value::Bool(true))]);
        let (prepared, _) = prepare_args("t", Some(&signature), &value).unwrap();
        assert_eq!(prepared.get("extra"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let signature = parse("(n :int) -> :int").unwrap();
        let error =
            prepare_args("t", Some(&signature), &args(&[("n", Value::Bool(true))])).unwrap_err();
        let DispatchError::InvalidArguments { message, .. } = error else {
            panic!("expected invalid arguments");
        };
        assert!(message.contains("expected int"));
    }
}
