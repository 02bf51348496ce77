use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Write as _};
use std::sync::Arc;

use super::analyze::{Ir, Pattern};
use super::env::Env;
use super::LispError;

/// A key of a PTC-Lisp map.
///
/// Only scalar keys are allowed; programs that use collections as map keys
/// get an analysis error. Keywords and strings are distinct keys but are
/// interchangeable on lookup (see [`Value::get_flexible`]), which makes data
/// sourced from JSON (string keys) and from typed tools (keyword keys) look
/// the same to programs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MapKey {
    Keyword(String),
    Str(String),
    Int(i64),
    Bool(bool),
}

impl MapKey {
    pub fn keyword(name: impl Into<String>) -> Self {
        MapKey::Keyword(name.into())
    }

    pub fn string(s: impl Into<String>) -> Self {
        MapKey::Str(s.into())
    }

    /// The plain name of the key as tools and JSON see it.
    pub fn as_plain_str(&self) -> Option<&str> {
        match self {
            MapKey::Keyword(name) | MapKey::Str(name) => Some(name),
            _ => None,
        }
    }

    pub fn from_value(value: &Value) -> Option<MapKey> {
        match value {
            Value::Keyword(name) => Some(MapKey::Keyword(name.clone())),
            Value::Str(s) => Some(MapKey::Str(s.clone())),
            Value::Int(n) => Some(MapKey::Int(*n)),
            Value::Bool(b) => Some(MapKey::Bool(*b)),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            MapKey::Keyword(name) => Value::Keyword(name.clone()),
            MapKey::Str(s) => Value::Str(s.clone()),
            MapKey::Int(n) => Value::Int(*n),
            MapKey::Bool(b) => Value::Bool(*b),
        }
    }
}

impl Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Keyword(name) => write!(f, ":{name}"),
            MapKey::Str(s) => write!(f, "{s:?}"),
            MapKey::Int(n) => write!(f, "{n}"),
            MapKey::Bool(b) => write!(f, "{b}"),
        }
    }
}

pub type ValueMap = BTreeMap<MapKey, Value>;

/// A user-defined function value: parameters, analyzed body, captured
/// environment.
#[derive(Debug)]
pub struct Lambda {
    pub name: Option<String>,
    pub params: Arc<Pattern>,
    pub body: Arc<Vec<Ir>>,
    pub env: Env,
}

/// A compiled `where` predicate, applied to candidate maps by `filter` and
/// friends.
#[derive(Debug)]
pub struct WherePred {
    pub path: Vec<MapKey>,
    pub op: WhereOp,
    pub operand: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhereOp {
    Eq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    Includes,
}

impl WhereOp {
    pub fn name(&self) -> &'static str {
        match self {
            WhereOp::Eq => "=",
            WhereOp::NotEq => "not=",
            WhereOp::Lt => "<",
            WhereOp::Gt => ">",
            WhereOp::Le => "<=",
            WhereOp::Ge => ">=",
            WhereOp::In => "in",
            WhereOp::Includes => "includes",
        }
    }
}

/// A runtime PTC-Lisp value.
///
/// `Symbol` only appears in reader output and never survives analysis.
/// Collections are `Arc`-shared so cloning a value is cheap; builtins build
/// new collections rather than mutating in place.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Keyword(String),
    Symbol(String),
    Vector(Arc<Vec<Value>>),
    Map(Arc<ValueMap>),
    Set(Arc<Vec<Value>>),
    Fn(Arc<Lambda>),
    Builtin(&'static str),
    Pred(Arc<WherePred>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn keyword(name: impl Into<String>) -> Self {
        Value::Keyword(name.into())
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        Value::Symbol(name.into())
    }

    pub fn vector(items: Vec<Value>) -> Self {
        Value::Vector(Arc::new(items))
    }

    pub fn map(entries: ValueMap) -> Self {
        Value::Map(Arc::new(entries))
    }

    /// Builds a set, dropping duplicates while keeping first-seen order.
    pub fn set(items: Vec<Value>) -> Self {
        let mut unique: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            if !unique.contains(&item) {
                unique.push(item);
            }
        }
        Value::Set(Arc::new(unique))
    }

    pub fn map_builder() -> MapBuilder {
        MapBuilder::default()
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::Symbol(_) => "symbol",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Fn(_) => "function",
            Value::Builtin(_) => "function",
            Value::Pred(_) => "function",
        }
    }

    /// Everything except `nil` and `false` is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Fn(_) | Value::Builtin(_) | Value::Pred(_) | Value::Keyword(_) | Value::Set(_)
        )
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[Value]> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Flexible map lookup: a keyword key falls back to the same-named string
    /// key and vice versa. `None` means the key is absent, which is distinct
    /// from a present `nil` value.
    pub fn get_flexible<'a>(map: &'a ValueMap, key: &MapKey) -> Option<&'a Value> {
        if let Some(found) = map.get(key) {
            return Some(found);
        }
        match key {
            MapKey::Keyword(name) => map.get(&MapKey::Str(name.clone())),
            MapKey::Str(name) => map.get(&MapKey::Keyword(name.clone())),
            _ => None,
        }
    }

    pub fn get_keyword(&self, name: &str) -> Option<&Value> {
        self.as_map()
            .and_then(|m| Self::get_flexible(m, &MapKey::keyword(name)))
    }

    /// Number of elements for countable values.
    pub fn count(&self) -> Option<usize> {
        match self {
            Value::Nil => Some(0),
            Value::Str(s) => Some(s.chars().count()),
            Value::Vector(v) | Value::Set(v) => Some(v.len()),
            Value::Map(m) => Some(m.len()),
            _ => None,
        }
    }

    /// Total order used by `sort` and the comparison builtins. Numbers
    /// compare across int/float; otherwise both sides must share a kind.
    pub fn compare(&self, other: &Value, op: &str) -> Result<Ordering, LispError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => Ok(a.total_cmp(b)),
            (Value::Int(a), Value::Float(b)) => Ok((*a as f64).total_cmp(b)),
            (Value::Float(a), Value::Int(b)) => Ok(a.total_cmp(&(*b as f64))),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Keyword(a), Value::Keyword(b)) => Ok(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (Value::Nil, Value::Nil) => Ok(Ordering::Equal),
            (Value::Vector(a), Value::Vector(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y, op)? {
                        Ordering::Equal => continue,
                        unequal => return Ok(unequal),
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            _ => Err(LispError::Type {
                op: op.to_string(),
                expected: format!("comparable values, got {}", self.type_name()),
                got: other.type_name().to_string(),
            }),
        }
    }

    /// Approximate external size in bytes, used for memory accounting.
    pub fn estimated_size(&self) -> u64 {
        const BASE: u64 = 16;
        match self {
            Value::Nil | Value::Bool(_) | Value::Int(_) | Value::Float(_) => BASE,
            Value::Str(s) | Value::Keyword(s) | Value::Symbol(s) => BASE + s.len() as u64,
            Value::Vector(items) | Value::Set(items) => {
                BASE + items.iter().map(Value::estimated_size).sum::<u64>()
            }
            Value::Map(entries) => {
                BASE + entries
                    .iter()
                    .map(|(k, v)| {
                        let key_size = match k {
                            MapKey::Keyword(s) | MapKey::Str(s) => BASE + s.len() as u64,
                            _ => BASE,
                        };
                        key_size + v.estimated_size()
                    })
                    .sum::<u64>()
            }
            Value::Fn(_) | Value::Builtin(_) | Value::Pred(_) => 64,
        }
    }

    /// Converts to the JSON shape tools and the trace file see. Keywords
    /// become their plain names; sets become arrays. Functions have no JSON
    /// form.
    pub fn to_json(&self) -> Result<serde_json::Value, LispError> {
        use serde_json::Value as Json;
        Ok(match self {
            Value::Nil => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => Json::from(*n),
            Value::Float(x) => serde_json::Number::from_f64(*x)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.clone()),
            Value::Keyword(name) => Json::String(name.clone()),
            Value::Symbol(name) => Json::String(name.clone()),
            Value::Vector(items) | Value::Set(items) => Json::Array(
                items
                    .iter()
                    .map(Value::to_json)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Value::Map(entries) => {
                let mut object = serde_json::Map::with_capacity(entries.len());
                for (key, value) in entries.iter() {
                    let key = match key {
                        MapKey::Keyword(name) | MapKey::Str(name) => name.clone(),
                        MapKey::Int(n) => n.to_string(),
                        MapKey::Bool(b) => b.to_string(),
                    };
                    object.insert(key, value.to_json()?);
                }
                Json::Object(object)
            }
            Value::Fn(_) | Value::Builtin(_) | Value::Pred(_) => {
                return Err(LispError::runtime(
                    "to-json",
                    "functions cannot leave the program",
                ))
            }
        })
    }

    /// Converts JSON into a value. Objects get string keys, which the
    /// flexible lookup makes reachable by keyword too.
    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Nil,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(items) => Value::vector(items.iter().map(Value::from_json).collect()),
            Json::Object(object) => {
                let mut entries = ValueMap::new();
                for (key, value) in object {
                    entries.insert(MapKey::Str(key.clone()), Value::from_json(value));
                }
                Value::map(entries)
            }
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(&json)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => {
                a.len() == b.len() && a.iter().all(|item| b.contains(item))
            }
            (Value::Fn(a), Value::Fn(b)) => Arc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Pred(a), Value::Pred(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => {
                if x.is_nan() {
                    write!(f, "##NaN")
                } else if x.is_infinite() {
                    write!(f, "{}", if *x > 0.0 { "##Inf" } else { "##-Inf" })
                } else if x.fract() == 0.0 {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Keyword(name) => write!(f, ":{name}"),
            Value::Symbol(name) => write!(f, "{name}"),
            Value::Vector(items) => {
                f.write_char('[')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_char(' ')?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_char(']')
            }
            Value::Map(entries) => {
                f.write_char('{')?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key} {value}")?;
                }
                f.write_char('}')
            }
            Value::Set(items) => {
                f.write_str("#{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_char(' ')?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_char('}')
            }
            Value::Fn(lambda) => match &lambda.name {
                Some(name) => write!(f, "#function[{name}]"),
                None => write!(f, "#function[fn]"),
            },
            Value::Builtin(name) => write!(f, "#function[{name}]"),
            Value::Pred(pred) => write!(f, "#function[where {}]", pred.op.name()),
        }
    }
}

/// Builder for host-constructed maps; keeps call sites short.
#[derive(Default)]
pub struct MapBuilder {
    entries: ValueMap,
}

impl MapBuilder {
    pub fn keyword_entry(mut self, name: impl Into<String>, value: Value) -> Self {
        self.entries.insert(MapKey::keyword(name), value);
        self
    }

    pub fn string_entry(mut self, name: impl Into<String>, value: Value) -> Self {
        self.entries.insert(MapKey::string(name), value);
        self
    }

    pub fn build(self) -> Value {
        Value::map(self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_equality_across_kinds() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::Float(1.5));
    }

    #[test]
    fn test_keyword_and_string_are_not_equal() {
        assert_ne!(Value::keyword("a"), Value::string("a"));
    }

    #[test]
    fn test_flexible_lookup_both_directions() {
        let map = Value::map_builder()
            .keyword_entry("id", Value::Int(1))
            .string_entry("name", Value::string("ada"))
            .build();
        let entries = map.as_map().unwrap();

        assert_eq!(
            Value::get_flexible(entries, &MapKey::string("id")),
            Some(&Value::Int(1))
        );
        assert_eq!(
            Value::get_flexible(entries, &MapKey::keyword("name")),
            Some(&Value::string("ada"))
        );
        assert_eq!(Value::get_flexible(entries, &MapKey::keyword("other")), None);
    }

    #[test]
    fn test_nil_value_is_distinct_from_missing() {
        let map = Value::map_builder()
            .keyword_entry("present", Value::Nil)
            .build();
        let entries = map.as_map().unwrap();
        assert_eq!(
            Value::get_flexible(entries, &MapKey::keyword("present")),
            Some(&Value::Nil)
        );
        assert_eq!(Value::get_flexible(entries, &MapKey::keyword("absent")), None);
    }

    #[test]
    fn test_set_deduplicates() {
        let set = Value::set(vec![Value::Int(1), Value::Int(2), Value::Int(1)]);
        assert_eq!(set.count(), Some(2));
    }

    #[test]
    fn test_display_edn_shapes() {
        let value = Value::map_builder()
            .keyword_entry("xs", Value::vector(vec![Value::Int(1), Value::Float(2.0)]))
            .build();
        assert_eq!(value.to_string(), "{:xs [1 2.0]}");
        assert_eq!(Value::string("a\"b").to_string(), r#""a\"b""#);
    }

    #[test]
    fn test_json_round_trip_keeps_data() {
        let value = Value::map_builder()
            .keyword_entry("n", Value::Int(21))
            .keyword_entry("tags", Value::vector(vec![Value::keyword("a")]))
            .build();
        let json = value.to_json().unwrap();
        assert_eq!(json, serde_json::json!({"n": 21, "tags": ["a"]}));

        let back = Value::from_json(&json);
        // Keys come back as strings; flexible lookup still finds them.
        assert_eq!(back.get_keyword("n"), Some(&Value::Int(21)));
    }

    #[test]
    fn test_estimated_size_grows_with_content() {
        let small = Value::vector(vec![Value::Int(1)]);
        let big = Value::vector(vec![Value::string("x".repeat(100))]);
        assert!(big.estimated_size() > small.estimated_size());
    }
}
