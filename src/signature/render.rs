use serde_json::{json, Map as JsonMap, Value as Json};

use super::{Signature, Type};

/// The one-line schema shown in system prompts:
/// `name(param type, …) -> return_type`, firewalled fields hidden.
pub fn render_inline(name: &str, signature: &Signature) -> String {
    let params = signature
        .params
        .iter()
        .map(|param| format!("{} {}", param.name, param.ty.render_for_prompt()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{name}({params}) -> {}",
        signature.returns.render_for_prompt()
    )
}

/// The JSON-Schema fragment used in JSON output mode. Firewalled fields are
/// omitted, required = non-optional fields, `:any` renders as schema-less.
pub fn to_json_schema(ty: &Type) -> Json {
    match ty {
        Type::String | Type::Keyword => json!({ "type": "string" }),
        Type::Int => json!({ "type": "integer" }),
        Type::Float => json!({ "type": "number" }),
        Type::Bool => json!({ "type": "boolean" }),
        Type::Any => json!({}),
        Type::Map => json!({ "type": "object" }),
        Type::List(element) => json!({
            "type": "array",
            "items": to_json_schema(element),
        }),
        Type::Record(fields) => {
            let mut properties = JsonMap::new();
            let mut required = Vec::new();
            for field in fields {
                if field.is_firewalled() {
                    continue;
                }
                properties.insert(
                    field.name.clone(),
                    to_json_schema(field.ty.unwrap_optional()),
                );
                if !field.is_optional() {
                    required.push(Json::String(field.name.clone()));
                }
            }
            let mut schema = JsonMap::new();
            schema.insert("type".into(), Json::String("object".into()));
            schema.insert("properties".into(), Json::Object(properties));
            if !required.is_empty() {
                schema.insert("required".into(), Json::Array(required));
            }
            Json::Object(schema)
        }
        Type::Optional(inner) => to_json_schema(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::super::parse::parse;
    use super::*;

    #[test]
    fn test_inline_hides_firewalled_fields() {
        let sig = parse("(query :string) -> {summary :string, _ids [:int]}").unwrap();
        let line = render_inline("search", &sig);
        assert_eq!(line, "search(query string) -> {summary string}");
        assert!(!line.contains("_ids"));
    }

    #[test]
    fn test_json_schema_shape() {
        let sig = parse("-> {summary :string, note :string?, _ids [:int]}").unwrap();
        let schema = to_json_schema(&sig.returns);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["summary"]["type"], "string");
        assert!(schema["properties"].get("_ids").is_none());
        assert_eq!(schema["required"], serde_json::json!(["summary"]));
    }

    #[test]
    fn test_any_renders_without_type() {
        let schema = to_json_schema(&Type::Any);
        assert!(schema.get("type").is_none());
    }

    #[test]
    fn test_array_items() {
        let sig = parse("-> [{id :int}]").unwrap();
        let schema = to_json_schema(&sig.returns);
        assert_eq!(schema["type"], "array");
        assert_eq!(schema["items"]["properties"]["id"]["type"], "integer");
    }
}
