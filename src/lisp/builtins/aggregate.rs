use super::{arity_exact, as_seq, LispError, Value};
use crate::lisp::eval::Interp;

fn numeric_sum(op: &str, items: &[Value]) -> Result<(Value, usize), LispError> {
    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut saw_float = false;
    for item in items {
        match item {
            Value::Int(n) => {
                int_total = int_total
                    .checked_add(*n)
                    .ok_or_else(|| LispError::runtime(op, "integer overflow"))?;
            }
            Value::Float(x) => {
                saw_float = true;
                float_total += x;
            }
            Value::Nil => {}
            other => return Err(LispError::type_mismatch(op, "a number", other)),
        }
    }
    let total = if saw_float {
        Value::Float(float_total + int_total as f64)
    } else {
        Value::Int(int_total)
    };
    Ok((total, items.len()))
}

pub fn sum(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("sum", &args, 1)?;
    let items = as_seq("sum", &args[0])?;
    interp.charge_iterations(items.len() as u64)?;
    Ok(numeric_sum("sum", &items)?.0)
}

pub async fn sum_by(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("sum-by", &args, 2)?;
    let projected = project(interp, "sum-by", &args[0], &args[1]).await?;
    Ok(numeric_sum("sum-by", &projected)?.0)
}

pub fn avg(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("avg", &args, 1)?;
    let items = as_seq("avg", &args[0])?;
    interp.charge_iterations(items.len() as u64)?;
    mean("avg", &items)
}

pub async fn avg_by(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("avg-by", &args, 2)?;
    let projected = project(interp, "avg-by", &args[0], &args[1]).await?;
    mean("avg-by", &projected)
}

/// The mean of the numbers, `nil` for an empty sequence.
fn mean(op: &str, items: &[Value]) -> Result<Value, LispError> {
    if items.is_empty() {
        return Ok(Value::Nil);
    }
    let (total, count) = numeric_sum(op, items)?;
    let total = total.as_f64().unwrap_or(0.0);
    Ok(Value::Float(total / count as f64))
}

pub async fn extreme_by(
    interp: &Interp,
    args: Vec<Value>,
    want_max: bool,
) -> Result<Value, LispError> {
    let name = if want_max { "max-by" } else { "min-by" };
    arity_exact(name, &args, 2)?;
    let items = as_seq(name, &args[1])?;
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        interp.charge_iterations(1)?;
        let key = interp.apply(&args[0], vec![item.clone()]).await?;
        let better = match &best {
            None => true,
            Some((best_key, _)) => {
                let ordering = key.compare(best_key, name)?;
                if want_max {
                    ordering.is_gt()
                } else {
                    ordering.is_lt()
                }
            }
        };
        if better {
            best = Some((key, item));
        }
    }
    Ok(best.map(|(_, item)| item).unwrap_or(Value::Nil))
}

async fn project(
    interp: &Interp,
    name: &str,
    f: &Value,
    coll: &Value,
) -> Result<Vec<Value>, LispError> {
    let items = as_seq(name, coll)?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        interp.charge_iterations(1)?;
        out.push(interp.apply(f, vec![item]).await?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use crate::lisp::eval::test_support::{eval_source, interp};
    use crate::lisp::Value;

    async fn eval_ok(source: &str) -> Value {
        eval_source(&interp(), source).await.unwrap()
    }

    #[tokio::test]
    async fn test_sum_and_avg() {
        assert_eq!(eval_ok("(sum [1 2 3])").await, Value::Int(6));
        assert_eq!(eval_ok("(sum [1 2.5])").await, Value::Float(3.5));
        assert_eq!(eval_ok("(sum [])").await, Value::Int(0));
        assert_eq!(eval_ok("(avg [1 2 3])").await, Value::Float(2.0));
        assert_eq!(eval_ok("(avg [])").await, Value::Nil);
    }

    #[tokio::test]
    async fn test_sum_by_and_avg_by_with_keywords() {
        assert_eq!(
            eval_ok("(sum-by :n [{:n 1} {:n 2}])").await,
            Value::Int(3)
        );
        assert_eq!(
            eval_ok("(avg-by :n [{:n 1} {:n 3}])").await,
            Value::Float(2.0)
        );
    }

    #[tokio::test]
    async fn test_min_by_max_by_return_elements() {
        assert_eq!(
            eval_ok("(:id (max-by :score [{:id 1 :score 4} {:id 2 :score 9}]))").await,
            Value::Int(2)
        );
        assert_eq!(
            eval_ok("(:id (min-by :score [{:id 1 :score 4} {:id 2 :score 9}]))").await,
            Value::Int(1)
        );
        assert_eq!(eval_ok("(min-by :score [])").await, Value::Nil);
    }

    #[tokio::test]
    async fn test_sum_rejects_non_numbers() {
        assert!(eval_source(&interp(), r#"(sum ["a"])"#).await.is_err());
    }
}
