use crate::lisp::{MapKey, Value};

use super::{SignatureError, Type};

/// Validates a runtime value against a type. Output validation is strict:
/// no coercion happens here.
pub fn validate(value: &Value, ty: &Type, path: &str) -> Result<(), SignatureError> {
    let mismatch = |expected: &str| SignatureError::TypeMismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        received: value.type_name().to_string(),
    };

    match ty {
        Type::Any => Ok(()),
        Type::String => match value {
            Value::Str(_) => Ok(()),
            _ => Err(mismatch("string")),
        },
        Type::Int => match value {
            Value::Int(_) => Ok(()),
            _ => Err(mismatch("int")),
        },
        Type::Float => match value {
            Value::Float(_) | Value::Int(_) => Ok(()),
            _ => Err(mismatch("float")),
        },
        Type::Bool => match value {
            Value::Bool(_) => Ok(()),
            _ => Err(mismatch("bool")),
        },
        Type::Keyword => match value {
            Value::Keyword(_) => Ok(()),
            _ => Err(mismatch("keyword")),
        },
        Type::Map => match value {
            Value::Map(_) => Ok(()),
            _ => Err(mismatch("map")),
        },
        Type::List(element) => match value {
            Value::Vector(items) => {
                for (index, item) in items.iter().enumerate() {
                    validate(item, element, &format!("{path}[{index}]"))?;
                }
                Ok(())
            }
            _ => Err(mismatch("list")),
        },
        Type::Record(fields) => {
            let Value::Map(entries) = value else {
                return Err(mismatch("map"));
            };
            for field in fields {
                let field_path = if path.is_empty() {
                    field.name.clone()
                } else {
                    format!("{path}.{}", field.name)
                };
                let found = Value::get_flexible(entries, &MapKey::keyword(field.name.clone()));
                match (found, field.is_optional()) {
                    // The full field type: a present nil is fine for an
                    // optional field, a mismatch is not.
                    (Some(found), _) => validate(found, &field.ty, &field_path)?,
                    (None, true) => {}
                    (None, false) => {
                        return Err(SignatureError::MissingRequired { path: field_path })
                    }
                }
            }
            // Extra fields are allowed and preserved.
            Ok(())
        }
        Type::Optional(inner) => match value {
            Value::Nil => Ok(()),
            other => validate(other, inner, path),
        },
    }
}

/// Shallow input coercion: a string that spells an int or float becomes the
/// number, with a recorded warning. Nothing else coerces; booleans in
/// particular never parse from strings.
pub fn coerce_input(value: Value, ty: &Type, name: &str, warnings: &mut Vec<String>) -> Value {
    let target = ty.unwrap_optional();
    match (&value, target) {
        (Value::Str(s), Type::Int) => {
            if let Ok(parsed) = s.trim().parse::<i64>() {
                warnings.push(format!("coerced {name} from string {s:?} to int"));
                return Value::Int(parsed);
            }
            value
        }
        (Value::Str(s), Type::Float) => {
            if let Ok(parsed) = s.trim().parse::<f64>() {
                warnings.push(format!("coerced {name} from string {s:?} to float"));
                return Value::Float(parsed);
            }
            value
        }
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::super::parse;
    use super::*;

    fn ty(source: &str) -> Type {
        parse::parse_type(source).unwrap()
    }

    #[test]
    fn test_primitives() {
        assert!(validate(&Value::Int(1), &ty(":int"), "x").is_ok());
        assert!(validate(&Value::string("1"), &ty(":int"), "x").is_err());
        assert!(validate(&Value::Int(1), &ty(":float"), "x").is_ok());
        assert!(validate(&Value::Bool(true), &ty(":bool"), "x").is_ok());
        assert!(validate(&Value::keyword("k"), &ty(":keyword"), "x").is_ok());
        assert!(validate(&Value::string("k"), &ty(":keyword"), "x").is_err());
        assert!(validate(&Value::set(vec![]), &ty(":any"), "x").is_ok());
    }

    #[test]
    fn test_list_reports_element_path() {
        let err = validate(
            &Value::vector(vec![Value::Int(1), Value::string("two")]),
            &ty("[:int]"),
            "xs",
        )
        .unwrap_err();
        let SignatureError::TypeMismatch { path, .. } = err else {
            panic!("expected mismatch");
        };
        assert_eq!(path, "xs[1]");
    }

    #[test]
    fn test_record_required_optional_and_extra() {
        let record = ty("{a :int, b :string?}");
        let ok = Value::map_builder()
            .keyword_entry("a", Value::Int(1))
            .keyword_entry("extra", Value::Bool(true))
            .build();
        assert!(validate(&ok, &record, "").is_ok());

        let missing = Value::map_builder()
            .keyword_entry("b", Value::string("x"))
            .build();
        let err = validate(&missing, &record, "").unwrap_err();
        assert!(matches!(err, SignatureError::MissingRequired { path } if path == "a"));
    }

    #[test]
    fn test_record_accepts_string_keys() {
        let record = ty("{a :int}");
        let value = Value::map_builder()
            .string_entry("a", Value::Int(1))
            .build();
        assert!(validate(&value, &record, "").is_ok());
    }

    #[test]
    fn test_optional_accepts_nil() {
        assert!(validate(&Value::Nil, &ty(":int?"), "x").is_ok());
        assert!(validate(&Value::Int(3), &ty(":int?"), "x").is_ok());
        assert!(validate(&Value::string("3"), &ty(":int?"), "x").is_err());
    }

    #[test]
    fn test_coercion_only_for_numeric_strings() {
        let mut warnings = Vec::new();
        assert_eq!(
            coerce_input(Value::string("42"), &ty(":int"), "n", &mut warnings),
            Value::Int(42)
        );
        assert_eq!(
            coerce_input(Value::string("3.14"), &ty(":float"), "x", &mut warnings),
            Value::Float(3.14)
        );
        assert_eq!(warnings.len(), 2);

        // Booleans never coerce from strings.
        assert_eq!(
            coerce_input(Value::string("true"), &ty(":bool"), "b", &mut warnings),
            Value::string("true")
        );
        assert_eq!(warnings.len(), 2);
    }
}
