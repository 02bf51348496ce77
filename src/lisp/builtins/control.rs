use futures::stream::{self, StreamExt, TryStreamExt};

use super::strings::display_plain;
use super::{arity_exact, arity_range, as_seq, LispError, Value};
use crate::lisp::eval::Interp;

pub fn return_signal(args: Vec<Value>) -> Result<Value, LispError> {
    arity_range("return", &args, 0, 1)?;
    Err(LispError::Return(
        args.into_iter().next().unwrap_or(Value::Nil),
    ))
}

pub fn fail_signal(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("fail", &args, 1)?;
    Err(LispError::Fail(args.into_iter().next().expect("one arg")))
}

pub fn println(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    let line = args
        .iter()
        .map(display_plain)
        .collect::<Vec<_>>()
        .join(" ");
    interp.push_print(line);
    Ok(Value::Nil)
}

fn memory_key(op: &str, value: &Value) -> Result<String, LispError> {
    match value {
        Value::Keyword(name) | Value::Str(name) => Ok(name.clone()),
        other => Err(LispError::type_mismatch(op, "a keyword or string", other)),
    }
}

pub fn memory_put(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("memory/put", &args, 2)?;
    let name = memory_key("memory/put", &args[0])?;
    let value = args.into_iter().nth(1).expect("two args");
    interp.charge_heap(&value)?;
    interp.memory_put(name, value.clone());
    Ok(value)
}

pub fn memory_get(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("memory/get", &args, 1)?;
    let name = memory_key("memory/get", &args[0])?;
    Ok(interp.memory_get(&name).unwrap_or(Value::Nil))
}

/// `(call "name" {...})` — dynamic tool dispatch, same path as
/// `(tool/name {...})`.
pub async fn call(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_range("call", &args, 1, 2)?;
    let Value::Str(name) = &args[0] else {
        return Err(LispError::type_mismatch("call", "a tool name string", &args[0]));
    };
    let name = name.clone();
    let rest = args.into_iter().skip(1).collect();
    interp.call_tool(&name, rest).await
}

/// Bounded-parallel map: applies `f` to every element concurrently, capped
/// at the worker pool size. Results keep input order; the first failure
/// wins and in-flight siblings are dropped.
pub async fn pmap(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("pmap", &args, 2)?;
    let f = args[0].clone();
    let items = as_seq("pmap", &args[1])?;
    interp.charge_iterations(items.len() as u64)?;

    let total = items.len();
    let indexed: Vec<(usize, Value)> = items.into_iter().enumerate().collect();
    let completed: Vec<(usize, Value)> = stream::iter(indexed.into_iter().map(|(index, item)| {
        let f = f.clone();
        async move {
            interp
                .apply(&f, vec![item])
                .await
                .map(|value| (index, value))
        }
    }))
    .buffer_unordered(interp.pool_size())
    .try_collect()
    .await?;

    let mut ordered = vec![Value::Nil; total];
    for (index, value) in completed {
        ordered[index] = value;
    }
    let result = Value::vector(ordered);
    interp.charge_heap(&result)?;
    Ok(result)
}
