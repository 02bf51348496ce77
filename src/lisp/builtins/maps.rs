use super::{arity_exact, arity_range, as_key, as_map, LispError, MapKey, Value, ValueMap};
use crate::lisp::eval::Interp;

/// Looks a key up in a map, vector (by index) or set (membership), with the
/// keyword/string fallback on maps.
fn lookup(subject: &Value, key: &Value) -> Result<Option<Value>, LispError> {
    Ok(match subject {
        Value::Map(entries) => {
            let map_key = as_key("get", key)?;
            Value::get_flexible(entries, &map_key).cloned()
        }
        Value::Vector(items) => match key {
            Value::Int(index) => usize::try_from(*index).ok().and_then(|i| items.get(i).cloned()),
            _ => None,
        },
        Value::Set(items) => items.iter().find(|item| *item == key).cloned(),
        Value::Nil => None,
        other => {
            return Err(LispError::type_mismatch(
                "get",
                "a map, vector or set",
                other,
            ))
        }
    })
}

pub fn get(args: Vec<Value>) -> Result<Value, LispError> {
    arity_range("get", &args, 2, 3)?;
    let found = lookup(&args[0], &args[1])?;
    Ok(found.unwrap_or_else(|| args.get(2).cloned().unwrap_or(Value::Nil)))
}

pub fn get_in(args: Vec<Value>) -> Result<Value, LispError> {
    arity_range("get-in", &args, 2, 3)?;
    let path = args[1]
        .as_vector()
        .ok_or_else(|| LispError::type_mismatch("get-in", "a path vector", &args[1]))?;
    let mut current = args[0].clone();
    for key in path {
        match lookup(&current, key)? {
            Some(next) => current = next,
            None => return Ok(args.get(2).cloned().unwrap_or(Value::Nil)),
        }
    }
    Ok(current)
}

pub fn assoc(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    if args.len() < 3 || args.len() % 2 != 1 {
        return Err(LispError::Arity {
            name: "assoc".into(),
            expected: "a target plus key/value pairs".into(),
            got: args.len(),
        });
    }
    let result = match &args[0] {
        Value::Vector(items) => {
            let mut out = items.as_ref().clone();
            for pair in args[1..].chunks(2) {
                let index = match &pair[0] {
                    Value::Int(n) => usize::try_from(*n).ok(),
                    _ => None,
                }
                .ok_or_else(|| {
                    LispError::type_mismatch("assoc", "a non-negative index", &pair[0])
                })?;
                if index < out.len() {
                    out[index] = pair[1].clone();
                } else if index == out.len() {
                    out.push(pair[1].clone());
                } else {
                    return Err(LispError::runtime(
                        "assoc",
                        format!("index {index} out of bounds for {} elements", out.len()),
                    ));
                }
            }
            Value::vector(out)
        }
        map_like => {
            let mut out = as_map("assoc", map_like)?;
            for pair in args[1..].chunks(2) {
                out.insert(as_key("assoc", &pair[0])?, pair[1].clone());
            }
            Value::map(out)
        }
    };
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn assoc_in(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("assoc-in", &args, 3)?;
    let path = args[1]
        .as_vector()
        .ok_or_else(|| LispError::type_mismatch("assoc-in", "a path vector", &args[1]))?;
    if path.is_empty() {
        return Err(LispError::runtime("assoc-in", "empty path"));
    }
    let result = put_in("assoc-in", &args[0], path, args[2].clone())?;
    interp.charge_heap(&result)?;
    Ok(result)
}

fn put_in(op: &str, subject: &Value, path: &[Value], value: Value) -> Result<Value, LispError> {
    let key = as_key(op, &path[0])?;
    let mut entries = as_map(op, subject)?;
    if path.len() == 1 {
        entries.insert(key, value);
    } else {
        let child = Value::get_flexible(&entries, &key)
            .cloned()
            .unwrap_or(Value::Nil);
        entries.insert(key, put_in(op, &child, &path[1..], value)?);
    }
    Ok(Value::map(entries))
}

pub async fn update(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    if args.len() < 3 {
        return Err(LispError::Arity {
            name: "update".into(),
            expected: "at least 3".into(),
            got: args.len(),
        });
    }
    let mut entries = as_map("update", &args[0])?;
    let key = as_key("update", &args[1])?;
    let current = Value::get_flexible(&entries, &key)
        .cloned()
        .unwrap_or(Value::Nil);
    let mut call_args = vec![current];
    call_args.extend_from_slice(&args[3..]);
    let updated = interp.apply(&args[2], call_args).await?;
    entries.insert(key, updated);
    let result = Value::map(entries);
    interp.charge_heap(&result)?;
    Ok(result)
}

pub async fn update_in(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    if args.len() < 3 {
        return Err(LispError::Arity {
            name: "update-in".into(),
            expected: "at least 3".into(),
            got: args.len(),
        });
    }
    let path = args[1]
        .as_vector()
        .ok_or_else(|| LispError::type_mismatch("update-in", "a path vector", &args[1]))?;
    if path.is_empty() {
        return Err(LispError::runtime("update-in", "empty path"));
    }
    let current = {
        let mut current = args[0].clone();
        let mut found = true;
        for key in path {
            match lookup(&current, key)? {
                Some(next) => current = next,
                None => {
                    found = false;
                    break;
                }
            }
        }
        if found {
            current
        } else {
            Value::Nil
        }
    };
    let mut call_args = vec![current];
    call_args.extend_from_slice(&args[3..]);
    let updated = interp.apply(&args[2], call_args).await?;
    let result = put_in("update-in", &args[0], path, updated)?;
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn dissoc(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    if args.is_empty() {
        return Err(LispError::Arity {
            name: "dissoc".into(),
            expected: "at least 1".into(),
            got: 0,
        });
    }
    let mut entries = as_map("dissoc", &args[0])?;
    for key in &args[1..] {
        let key = as_key("dissoc", key)?;
        if entries.remove(&key).is_none() {
            // Match the flexible lookup: also try the cross-spelled key.
            if let Some(name) = key.as_plain_str() {
                let other = match &key {
                    MapKey::Keyword(_) => MapKey::string(name),
                    _ => MapKey::keyword(name),
                };
                entries.remove(&other);
            }
        }
    }
    let result = Value::map(entries);
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn keys(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("keys", &args, 1)?;
    let entries = as_map("keys", &args[0])?;
    let result = Value::vector(entries.keys().map(MapKey::to_value).collect());
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn vals(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("vals", &args, 1)?;
    let entries = as_map("vals", &args[0])?;
    let result = Value::vector(entries.into_values().collect());
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn merge(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    let mut out = ValueMap::new();
    let mut all_nil = true;
    for arg in &args {
        interp.charge_iterations(1)?;
        if arg.is_nil() {
            continue;
        }
        all_nil = false;
        out.extend(as_map("merge", arg)?);
    }
    if all_nil && !args.is_empty() {
        return Ok(Value::Nil);
    }
    let result = Value::map(out);
    interp.charge_heap(&result)?;
    Ok(result)
}

/// `select-keys` keeps `nil`-valued entries; only truly absent keys are
/// dropped.
pub fn select_keys(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("select-keys", &args, 2)?;
    let entries = as_map("select-keys", &args[0])?;
    let wanted = args[1]
        .as_vector()
        .ok_or_else(|| LispError::type_mismatch("select-keys", "a vector of keys", &args[1]))?;
    let mut out = ValueMap::new();
    for key_value in wanted {
        interp.charge_iterations(1)?;
        let key = as_key("select-keys", key_value)?;
        if let Some(found) = Value::get_flexible(&entries, &key) {
            out.insert(key, found.clone());
        }
    }
    let result = Value::map(out);
    interp.charge_heap(&result)?;
    Ok(result)
}
