use super::{arity_exact, as_seq, LispError, Value};
use crate::lisp::eval::Interp;

pub fn to_set(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("set", &args, 1)?;
    let items = as_seq("set", &args[0])?;
    interp.charge_iterations(items.len() as u64)?;
    let result = Value::set(items);
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn union(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    let mut out: Vec<Value> = Vec::new();
    for arg in &args {
        for item in as_seq("clojure.set/union", arg)? {
            interp.charge_iterations(1)?;
            if !out.contains(&item) {
                out.push(item);
            }
        }
    }
    let result = Value::Set(std::sync::Arc::new(out));
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn intersection(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    if args.is_empty() {
        return Err(LispError::Arity {
            name: "clojure.set/intersection".into(),
            expected: "at least 1".into(),
            got: 0,
        });
    }
    let mut out = as_seq("clojure.set/intersection", &args[0])?;
    for arg in &args[1..] {
        let other = as_seq("clojure.set/intersection", arg)?;
        interp.charge_iterations(out.len() as u64)?;
        out.retain(|item| other.contains(item));
    }
    let result = Value::set(out);
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn difference(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    if args.is_empty() {
        return Err(LispError::Arity {
            name: "clojure.set/difference".into(),
            expected: "at least 1".into(),
            got: 0,
        });
    }
    let mut out = as_seq("clojure.set/difference", &args[0])?;
    for arg in &args[1..] {
        let other = as_seq("clojure.set/difference", arg)?;
        interp.charge_iterations(out.len() as u64)?;
        out.retain(|item| !other.contains(item));
    }
    let result = Value::set(out);
    interp.charge_heap(&result)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use crate::lisp::eval::test_support::{eval_source, interp};
    use crate::lisp::Value;

    async fn eval_ok(source: &str) -> Value {
        eval_source(&interp(), source).await.unwrap()
    }

    #[tokio::test]
    async fn test_set_from_vector_dedups() {
        assert_eq!(eval_ok("(count (set [1 1 2]))").await, Value::Int(2));
        assert_eq!(eval_ok("(set? (set [1]))").await, Value::Bool(true));
    }

    #[tokio::test]
    async fn test_union_intersection_difference() {
        assert_eq!(
            eval_ok("(count (clojure.set/union #{1 2} #{2 3}))").await,
            Value::Int(3)
        );
        assert_eq!(
            eval_ok("(clojure.set/intersection #{1 2} #{2 3})").await,
            Value::set(vec![Value::Int(2)])
        );
        assert_eq!(
            eval_ok("(clojure.set/difference #{1 2 3} #{2})").await,
            Value::set(vec![Value::Int(1), Value::Int(3)])
        );
    }

    #[tokio::test]
    async fn test_set_ops_accept_vectors() {
        assert_eq!(
            eval_ok("(count (clojure.set/union [1 2] [2 3]))").await,
            Value::Int(3)
        );
    }
}
