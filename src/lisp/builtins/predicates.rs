use super::{arity_exact, LispError, Value};

pub fn is_nil(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("nil?", &args, 1)?;
    Ok(Value::Bool(args[0].is_nil()))
}

pub fn is_some(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("some?", &args, 1)?;
    Ok(Value::Bool(!args[0].is_nil()))
}

pub fn is_number(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("number?", &args, 1)?;
    Ok(Value::Bool(matches!(
        args[0],
        Value::Int(_) | Value::Float(_)
    )))
}

pub fn is_string(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("string?", &args, 1)?;
    Ok(Value::Bool(matches!(args[0], Value::Str(_))))
}

pub fn is_map(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("map?", &args, 1)?;
    Ok(Value::Bool(matches!(args[0], Value::Map(_))))
}

pub fn is_vector(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("vector?", &args, 1)?;
    Ok(Value::Bool(matches!(args[0], Value::Vector(_))))
}

pub fn is_set(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("set?", &args, 1)?;
    Ok(Value::Bool(matches!(args[0], Value::Set(_))))
}

/// `odd?` when `parity == 1`, `even?` when `parity == 0`.
pub fn parity(args: Vec<Value>, parity: i64) -> Result<Value, LispError> {
    let name = if parity == 1 { "odd?" } else { "even?" };
    arity_exact(name, &args, 1)?;
    let n = super::as_int(name, &args[0])?;
    Ok(Value::Bool(n.rem_euclid(2) == parity))
}

pub fn parse_long(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("parse-long", &args, 1)?;
    Ok(match &args[0] {
        Value::Int(n) => Value::Int(*n),
        Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).unwrap_or(Value::Nil),
        _ => Value::Nil,
    })
}

pub fn parse_double(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("parse-double", &args, 1)?;
    Ok(match &args[0] {
        Value::Int(n) => Value::Float(*n as f64),
        Value::Float(x) => Value::Float(*x),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or(Value::Nil),
        _ => Value::Nil,
    })
}
