use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::lisp::{MapKey, Value};

use super::TemplateError;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([#/]?)(\.|[A-Za-z0-9_*][A-Za-z0-9_.\-]*)\}\}")
        .expect("static regex is valid")
});

/// A mission template: `{{path}}` placeholders with dotted paths, plus
/// `{{#items}}…{{/items}}` sections that repeat their body per element.
///
/// Expansion happens once, before turn 1. What happens to a placeholder
/// that resolves to nothing is the caller's policy: [`MissingPolicy::Keep`]
/// leaves it in place, [`MissingPolicy::Collect`] reports it.
#[derive(Debug, Clone)]
pub struct MissionTemplate {
    template: String,
    variables: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPolicy {
    /// Leave `{{name}}` verbatim in the output.
    Keep,
    /// Record the name; the caller decides whether that is fatal.
    Collect,
}

/// Result of one expansion.
#[derive(Debug)]
pub struct Expanded {
    pub text: String,
    pub missing: Vec<String>,
}

impl MissionTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let variables = TAG_RE
            .captures_iter(&template)
            .filter(|cap| &cap[1] != "/" && &cap[2] != ".")
            .map(|cap| {
                // The root of the path is what must be bound.
                cap[2].split('.').next().unwrap_or(&cap[2]).to_string()
            })
            .collect();
        Self { template, variables }
    }

    /// Root names of every placeholder and section in the template.
    pub fn variables(&self) -> &HashSet<String> {
        &self.variables
    }

    pub fn source(&self) -> &str {
        &self.template
    }

    pub fn expand(
        &self,
        values: &BTreeMap<String, Value>,
        policy: MissingPolicy,
    ) -> Result<Expanded, TemplateError> {
        let mut missing = Vec::new();
        let text = expand_block(&self.template, &Scope::Root(values), policy, &mut missing)?;
        Ok(Expanded { text, missing })
    }
}

enum Scope<'a> {
    Root(&'a BTreeMap<String, Value>),
    /// Inside a section: the element first, the root as fallback.
    Section(&'a Value, &'a BTreeMap<String, Value>),
}

impl Scope<'_> {
    fn resolve(&self, path: &str) -> Option<Value> {
        if path == "." {
            return match self {
                Scope::Root(_) => None,
                Scope::Section(element, _) => Some((*element).clone()),
            };
        }
        let mut segments = path.split('.');
        let head = segments.next()?;
        let mut current = match self {
            Scope::Root(values) => values.get(head).cloned()?,
            Scope::Section(element, root) => {
                lookup_in(element, head).or_else(|| root.get(head).cloned())?
            }
        };
        for segment in segments {
            current = lookup_in(&current, segment)?;
        }
        Some(current)
    }
}

fn lookup_in(value: &Value, key: &str) -> Option<Value> {
    value
        .as_map()
        .and_then(|entries| Value::get_flexible(entries, &MapKey::keyword(key)))
        .cloned()
}

fn expand_block(
    block: &str,
    scope: &Scope<'_>,
    policy: MissingPolicy,
    missing: &mut Vec<String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(block.len());
    let mut cursor = 0;

    while let Some(cap) = TAG_RE.captures(&block[cursor..]) {
        let whole = cap.get(0).expect("group 0");
        let (start, end) = (cursor + whole.start(), cursor + whole.end());
        out.push_str(&block[cursor..start]);
        let sigil = &cap[1];
        let name = cap[2].to_string();

        match sigil {
            "/" => return Err(TemplateError::UnexpectedClose(name)),
            "#" => {
                let close = format!("{{{{/{name}}}}}");
                let body_start = end;
                let body_end = block[body_start..]
                    .find(&close)
                    .map(|offset| body_start + offset)
                    .ok_or_else(|| TemplateError::UnclosedSection(name.clone()))?;
                let body = &block[body_start..body_end];

                match scope.resolve(&name) {
                    Some(Value::Vector(items)) => {
                        for item in items.iter() {
                            let root = match scope {
                                Scope::Root(values) => values,
                                Scope::Section(_, root) => root,
                            };
                            let inner = Scope::Section(item, root);
                            out.push_str(&expand_block(body, &inner, policy, missing)?);
                        }
                    }
                    Some(Value::Nil) | None => {
                        if policy == MissingPolicy::Collect {
                            missing.push(name.clone());
                        } else {
                            out.push_str(&block[start..body_end + close.len()]);
                        }
                    }
                    Some(other) => {
                        return Err(TemplateError::SectionNotAList {
                            name,
                            got: other.type_name().to_string(),
                        })
                    }
                }
                cursor = body_end + close.len();
            }
            _ => {
                match scope.resolve(&name) {
                    Some(value) if !value.is_nil() => {
                        out.push_str(&render_value(&value));
                    }
                    _ => {
                        missing.push(name.clone());
                        if policy == MissingPolicy::Keep {
                            out.push_str(&block[start..end]);
                        }
                    }
                }
                cursor = end;
            }
        }
    }

    out.push_str(&block[cursor..]);
    Ok(out)
}

/// Values render the way programs print them, except strings stay bare.
fn render_value(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_simple_placeholder() {
        let template = MissionTemplate::new("Add {{x}} and {{y}}");
        let expanded = template
            .expand(
                &values(&[("x", Value::Int(5)), ("y", Value::Int(3))]),
                MissingPolicy::Keep,
            )
            .unwrap();
        assert_eq!(expanded.text, "Add 5 and 3");
        assert!(expanded.missing.is_empty());
    }

    #[test]
    fn test_dotted_path() {
        let user = Value::map_builder()
            .keyword_entry("name", Value::string("Ada"))
            .build();
        let template = MissionTemplate::new("Hello {{user.name}}");
        let expanded = template
            .expand(&values(&[("user", user)]), MissingPolicy::Keep)
            .unwrap();
        assert_eq!(expanded.text, "Hello Ada");
    }

    #[test]
    fn test_missing_placeholder_kept_in_place() {
        let template = MissionTemplate::new("Value: {{absent}}");
        let expanded = template.expand(&values(&[]), MissingPolicy::Keep).unwrap();
        assert_eq!(expanded.text, "Value: {{absent}}");
        assert_eq!(expanded.missing, vec!["absent".to_string()]);
    }

    #[test]
    fn test_section_repeats_body() {
        let items = Value::vector(vec![
            Value::map_builder()
                .keyword_entry("name", Value::string("a"))
                .build(),
            Value::map_builder()
                .keyword_entry("name", Value::string("b"))
                .build(),
        ]);
        let template = MissionTemplate::new("{{#items}}- {{name}}\n{{/items}}");
        let expanded = template
            .expand(&values(&[("items", items)]), MissingPolicy::Keep)
            .unwrap();
        assert_eq!(expanded.text, "- a\n- b\n");
    }

    #[test]
    fn test_section_over_scalars_uses_dot() {
        let template = MissionTemplate::new("{{#xs}}[{{.}}]{{/xs}}");
        let expanded = template
            .expand(
                &values(&[("xs", Value::vector(vec![Value::Int(1), Value::Int(2)]))]),
                MissingPolicy::Keep,
            )
            .unwrap();
        assert_eq!(expanded.text, "[1][2]");
    }

    #[test]
    fn test_unclosed_section_is_error() {
        let template = MissionTemplate::new("{{#items}} body");
        assert!(matches!(
            template.expand(&values(&[]), MissingPolicy::Keep),
            Err(TemplateError::UnclosedSection(_))
        ));
    }

    #[test]
    fn test_variables_lists_roots() {
        let template = MissionTemplate::new("{{a.b}} {{#c}}{{d}}{{/c}}");
        let vars = template.variables();
        assert!(vars.contains("a"));
        assert!(vars.contains("c"));
        assert!(vars.contains("d"));
        assert!(!vars.contains("b"));
    }
}
