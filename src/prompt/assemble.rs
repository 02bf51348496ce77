use std::collections::BTreeMap;

use indoc::indoc;
use serde::{Deserialize, Serialize};

use crate::lisp::{MapKey, Value, ValueMap};
use crate::schemas::OutputMode;
use crate::signature::{self, Signature};
use crate::tools::ToolTable;
use crate::utils::truncate_chars;

use super::resources;

/// Caps applied while rendering prompt text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptLimits {
    /// Hard cap on the assembled system prompt; tail-truncated beyond it.
    pub max_chars: Option<usize>,
    /// Cap on one context sample line.
    pub sample_max_chars: usize,
    /// How many list elements a sample shows.
    pub sample_list_len: usize,
    /// Cap on the `println` transcript in per-turn feedback.
    pub feedback_max_chars: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        PromptLimits {
            max_chars: None,
            sample_max_chars: 200,
            sample_list_len: 3,
            feedback_max_chars: 2000,
        }
    }
}

/// Caller-supplied replacements for the fixed prompt sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemPromptOverrides {
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub language_spec: Option<String>,
    pub output_format: Option<String>,
}

/// Everything prompt assembly needs from the agent and the run.
pub struct PromptInputs<'a> {
    pub context: &'a BTreeMap<String, Value>,
    pub signature: Option<&'a Signature>,
    pub field_descriptions: &'a BTreeMap<String, String>,
    pub tools: &'a ToolTable,
    pub output_mode: OutputMode,
    pub multi_turn: bool,
    /// The template-expanded mission text.
    pub mission: &'a str,
    pub overrides: &'a SystemPromptOverrides,
    pub limits: &'a PromptLimits,
}

/// Renders the system prompt in its stable section order: role & rules,
/// data inventory, tools, language spec, expected output, format
/// boilerplate, mission.
pub fn assemble_system_prompt(inputs: &PromptInputs<'_>) -> String {
    let mut sections: Vec<String> = Vec::new();

    if let Some(prefix) = &inputs.overrides.prefix {
        sections.push(prefix.clone());
    }
    sections.push(resources::ROLE_RULES.trim_end().to_string());

    if !inputs.context.is_empty() {
        sections.push(render_data_inventory(inputs));
    }

    if !inputs.tools.is_empty() || inputs.tools.has_catalog() {
        sections.push(render_tool_section(inputs));
    }

    let language_spec = match (&inputs.overrides.language_spec, inputs.multi_turn) {
        (Some(spec), _) => spec.clone(),
        (None, false) => resources::LANG_SINGLE_SHOT.trim_end().to_string(),
        (None, true) => resources::LANG_MULTI_TURN.trim_end().to_string(),
    };
    if inputs.output_mode == OutputMode::PtcLisp {
        sections.push(language_spec);
    }

    if let Some(expected) = render_expected_output(inputs) {
        sections.push(expected);
    }

    let output_format = match (&inputs.overrides.output_format, inputs.output_mode) {
        (Some(format), _) => format.clone(),
        (None, OutputMode::PtcLisp) => indoc! {"
            # Output format

            Reply with exactly one fenced code block tagged `clojure`. No other
            code blocks."}
        .to_string(),
        (None, OutputMode::Json) => resources::JSON_USER_MESSAGE.trim_end().to_string(),
    };
    sections.push(output_format);

    sections.push(format!("# Mission\n\n{}", inputs.mission));

    if let Some(suffix) = &inputs.overrides.suffix {
        sections.push(suffix.clone());
    }

    let prompt = sections.join("\n\n");
    match inputs.limits.max_chars {
        Some(max) if prompt.len() > max => {
            let mut truncated = truncate_chars(&prompt, max);
            truncated.push_str("\n[truncated]");
            truncated
        }
        _ => prompt,
    }
}

fn render_data_inventory(inputs: &PromptInputs<'_>) -> String {
    let mut lines = vec!["# Data".to_string(), String::new()];
    for (name, value) in inputs.context {
        let ty = inputs
            .signature
            .and_then(|signature| signature.param(name))
            .map(|param| param.ty.render_for_prompt())
            .unwrap_or_else(|| infer_shallow_type(value));
        let description = inputs
            .field_descriptions
            .get(name)
            .map(|text| format!(" — {text}"))
            .unwrap_or_default();
        let sample = render_sample(value, inputs.limits);
        lines.push(format!("- ctx/{name} ({ty}){description}: {sample}"));
    }
    lines.join("\n")
}

fn render_tool_section(inputs: &PromptInputs<'_>) -> String {
    let mut lines = vec!["# Tools".to_string(), String::new()];
    if inputs.tools.is_empty() {
        lines.push("(none callable)".to_string());
    }
    for (name, entry) in inputs.tools.iter() {
        let line = entry.schema_line(name, inputs.signature);
        let description = entry.description();
        if description.is_empty() {
            lines.push(format!("- {line}"));
        } else {
            lines.push(format!("- {line}: {description}"));
        }
    }
    if inputs.tools.has_catalog() {
        lines.push(String::new());
        lines.push("For planning only (not callable):".to_string());
        for (name, entry) in inputs.tools.catalog_iter() {
            let line = entry.schema_line(name);
            if entry.description.is_empty() {
                lines.push(format!("- {line}"));
            } else {
                lines.push(format!("- {line}: {}", entry.description));
            }
        }
    }
    lines.join("\n")
}

fn render_expected_output(inputs: &PromptInputs<'_>) -> Option<String> {
    let signature = inputs.signature?;
    match inputs.output_mode {
        OutputMode::PtcLisp => Some(format!(
            "# Expected output\n\nCall `(return value)` where value has type: {}",
            signature.returns.render_for_prompt()
        )),
        OutputMode::Json => {
            let schema = signature::to_json_schema(&signature.returns);
            let rendered =
                serde_json::to_string_pretty(&schema).unwrap_or_else(|_| schema.to_string());
            Some(format!(
                "# Expected output\n\nA JSON document matching this schema:\n```json\n{rendered}\n```"
            ))
        }
    }
}

/// Shallow runtime type of a context value, for keys the signature does not
/// describe.
fn infer_shallow_type(value: &Value) -> String {
    match value {
        Value::Vector(items) => match items.first() {
            Some(first) => format!("[{}]", first.type_name()),
            None => "[any]".to_string(),
        },
        other => other.type_name().to_string(),
    }
}

/// A short sample of a context value: long strings and lists elided,
/// firewalled map fields masked.
fn render_sample(value: &Value, limits: &PromptLimits) -> String {
    let sampled = sample_value(value, limits.sample_list_len);
    let text = firewall_mask(&sampled).to_string();
    if text.len() > limits.sample_max_chars {
        format!("{}…", truncate_chars(&text, limits.sample_max_chars))
    } else {
        text
    }
}

fn sample_value(value: &Value, list_len: usize) -> Value {
    match value {
        Value::Vector(items) if items.len() > list_len => {
            Value::vector(items.iter().take(list_len).cloned().collect())
        }
        other => other.clone(),
    }
}

/// Replaces the values of `_`-prefixed map fields with `<Firewalled>` in
/// any LLM-visible rendering; the program context keeps the real values.
pub fn firewall_mask(value: &Value) -> Value {
    match value {
        Value::Map(entries) => {
            let mut masked = ValueMap::new();
            for (key, entry_value) in entries.iter() {
                let firewalled = matches!(
                    key,
                    MapKey::Keyword(name) | MapKey::Str(name) if name.starts_with('_')
                );
                let rendered = if firewalled {
                    Value::string("<Firewalled>")
                } else {
                    firewall_mask(entry_value)
                };
                masked.insert(key.clone(), rendered);
            }
            Value::map(masked)
        }
        Value::Vector(items) => Value::vector(items.iter().map(firewall_mask).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::parse;
    use crate::tools::{CatalogTool, ToolTable};

    fn inputs<'a>(
        context: &'a BTreeMap<String, Value>,
        tools: &'a ToolTable,
        signature: Option<&'a Signature>,
        overrides: &'a SystemPromptOverrides,
        limits: &'a PromptLimits,
        descriptions: &'a BTreeMap<String, String>,
    ) -> PromptInputs<'a> {
        PromptInputs {
            context,
            signature,
            field_descriptions: descriptions,
            tools,
            output_mode: OutputMode::PtcLisp,
            multi_turn: true,
            mission: "Count the users.",
            overrides,
            limits,
        }
    }

    #[test]
    fn test_section_order_is_stable() {
        let context = BTreeMap::from([("users".to_string(), Value::vector(vec![]))]);
        let tools = ToolTable::new();
        let overrides = SystemPromptOverrides::default();
        let limits = PromptLimits::default();
        let descriptions = BTreeMap::new();
        let signature = parse("(users [:map]) -> :int").unwrap();
        let prompt = assemble_system_prompt(&inputs(
            &context,
            &tools,
            Some(&signature),
            &overrides,
            &limits,
            &descriptions,
        ));

        let data = prompt.find("# Data").unwrap();
        let lang = prompt.find("# PTC-Lisp").unwrap();
        let expected = prompt.find("# Expected output").unwrap();
        let format = prompt.find("# Output format").unwrap();
        let mission = prompt.find("# Mission").unwrap();
        assert!(data < lang && lang < expected && expected < format && format < mission);
    }

    #[test]
    fn test_catalog_tools_listed_separately() {
        let context = BTreeMap::new();
        let mut tools = ToolTable::new();
        tools.insert_catalog(
            "plan",
            CatalogTool::new(Some(parse("(goal :string) -> :map").unwrap()), "think ahead"),
        );
        let overrides = SystemPromptOverrides::default();
        let limits = PromptLimits::default();
        let descriptions = BTreeMap::new();
        let prompt = assemble_system_prompt(&inputs(
            &context,
            &tools,
            None,
            &overrides,
            &limits,
            &descriptions,
        ));
        assert!(prompt.contains("For planning only"));
        assert!(prompt.contains("plan(goal string) -> map"));
    }

    #[test]
    fn test_firewalled_sample_masked() {
        let context = BTreeMap::from([(
            "report".to_string(),
            Value::map_builder()
                .keyword_entry("summary", Value::string("fine"))
                .keyword_entry("_ids", Value::vector(vec![Value::Int(1)]))
                .build(),
        )]);
        let tools = ToolTable::new();
        let overrides = SystemPromptOverrides::default();
        let limits = PromptLimits::default();
        let descriptions = BTreeMap::new();
        let prompt = assemble_system_prompt(&inputs(
            &context,
            &tools,
            None,
            &overrides,
            &limits,
            &descriptions,
        ));
        assert!(prompt.contains("<Firewalled>"));
        assert!(!prompt.contains("[1]"));
    }

    #[test]
    fn test_max_chars_truncates_with_notice() {
        let context = BTreeMap::new();
        let tools = ToolTable::new();
        let overrides = SystemPromptOverrides::default();
        let limits = PromptLimits {
            max_chars: Some(80),
            ..Default::default()
        };
        let descriptions = BTreeMap::new();
        let prompt = assemble_system_prompt(&inputs(
            &context,
            &tools,
            None,
            &overrides,
            &limits,
            &descriptions,
        ));
        assert!(prompt.ends_with("[truncated]"));
        assert!(prompt.len() <= 80 + "\n[truncated]".len());
    }

    #[test]
    fn test_overrides_replace_sections() {
        let context = BTreeMap::new();
        let tools = ToolTable::new();
        let overrides = SystemPromptOverrides {
            language_spec: Some("my own language notes".into()),
            output_format: Some("answer in haiku".into()),
            prefix: Some("PREFIX".into()),
            suffix: Some("SUFFIX".into()),
        };
        let limits = PromptLimits::default();
        let descriptions = BTreeMap::new();
        let prompt = assemble_system_prompt(&inputs(
            &context,
            &tools,
            None,
            &overrides,
            &limits,
            &descriptions,
        ));
        assert!(prompt.starts_with("PREFIX"));
        assert!(prompt.ends_with("SUFFIX"));
        assert!(prompt.contains("my own language notes"));
        assert!(prompt.contains("answer in haiku"));
        assert!(!prompt.contains("# PTC-Lisp"));
    }
}
