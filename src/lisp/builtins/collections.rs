use super::{arity_exact, arity_range, as_int, as_key, as_seq, LispError, Value, ValueMap};
use crate::lisp::eval::Interp;

pub async fn map(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("map", &args, 2)?;
    let items = as_seq("map", &args[1])?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        interp.charge_iterations(1)?;
        out.push(interp.apply(&args[0], vec![item]).await?);
    }
    let result = Value::vector(out);
    interp.charge_heap(&result)?;
    Ok(result)
}

pub async fn filter(interp: &Interp, args: Vec<Value>, negate: bool) -> Result<Value, LispError> {
    let name = if negate { "remove" } else { "filter" };
    arity_exact(name, &args, 2)?;
    let items = as_seq(name, &args[1])?;
    let mut out = Vec::new();
    for item in items {
        interp.charge_iterations(1)?;
        let keep = interp.apply(&args[0], vec![item.clone()]).await?.is_truthy();
        if keep != negate {
            out.push(item);
        }
    }
    let result = Value::vector(out);
    interp.charge_heap(&result)?;
    Ok(result)
}

pub async fn reduce(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_range("reduce", &args, 2, 3)?;
    let (f, init, coll) = match args.len() {
        2 => (&args[0], None, &args[1]),
        _ => (&args[0], Some(args[1].clone()), &args[2]),
    };
    let items = as_seq("reduce", coll)?;
    let mut iter = items.into_iter();
    let mut acc = match init {
        Some(value) => value,
        None => iter.next().unwrap_or(Value::Nil),
    };
    for item in iter {
        interp.charge_iterations(1)?;
        acc = interp.apply(f, vec![acc, item]).await?;
    }
    Ok(acc)
}

pub fn first(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("first", &args, 1)?;
    Ok(as_seq("first", &args[0])?.into_iter().next().unwrap_or(Value::Nil))
}

pub fn last(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("last", &args, 1)?;
    Ok(as_seq("last", &args[0])?.pop().unwrap_or(Value::Nil))
}

pub fn nth(args: Vec<Value>) -> Result<Value, LispError> {
    arity_range("nth", &args, 2, 3)?;
    let items = as_seq("nth", &args[0])?;
    let index = as_int("nth", &args[1])?;
    let found = usize::try_from(index).ok().and_then(|i| items.get(i).cloned());
    match (found, args.get(2)) {
        (Some(value), _) => Ok(value),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(LispError::runtime(
            "nth",
            format!("index {index} out of bounds for {} elements", items.len()),
        )),
    }
}

pub fn count(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("count", &args, 1)?;
    args[0]
        .count()
        .map(|n| Value::Int(n as i64))
        .ok_or_else(|| LispError::type_mismatch("count", "a countable value", &args[0]))
}

pub fn is_empty(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("empty?", &args, 1)?;
    args[0]
        .count()
        .map(|n| Value::Bool(n == 0))
        .ok_or_else(|| LispError::type_mismatch("empty?", "a countable value", &args[0]))
}

pub fn conj(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    if args.is_empty() {
        return Err(LispError::Arity {
            name: "conj".into(),
            expected: "at least 1".into(),
            got: 0,
        });
    }
    let mut iter = args.into_iter();
    let target = iter.next().expect("nonempty");
    let result = match target {
        Value::Vector(items) => {
            let mut out = items.as_ref().clone();
            out.extend(iter);
            Value::vector(out)
        }
        Value::Nil => Value::vector(iter.collect()),
        Value::Set(items) => {
            let mut out = items.as_ref().clone();
            for item in iter {
                if !out.contains(&item) {
                    out.push(item);
                }
            }
            Value::Set(std::sync::Arc::new(out))
        }
        Value::Map(entries) => {
            let mut out = entries.as_ref().clone();
            for pair in iter {
                let items = pair
                    .as_vector()
                    .filter(|items| items.len() == 2)
                    .ok_or_else(|| {
                        LispError::type_mismatch("conj", "a [key value] pair", &pair)
                    })?;
                out.insert(as_key("conj", &items[0])?, items[1].clone());
            }
            Value::map(out)
        }
        other => return Err(LispError::type_mismatch("conj", "a collection", &other)),
    };
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn cons(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("cons", &args, 2)?;
    let mut out = vec![args[0].clone()];
    out.extend(as_seq("cons", &args[1])?);
    let result = Value::vector(out);
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn concat(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    let mut out = Vec::new();
    for arg in &args {
        interp.charge_iterations(1)?;
        out.extend(as_seq("concat", arg)?);
    }
    let result = Value::vector(out);
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn sort(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("sort", &args, 1)?;
    let mut items = as_seq("sort", &args[0])?;
    interp.charge_iterations(items.len() as u64)?;
    sort_values("sort", &mut items)?;
    let result = Value::vector(items);
    interp.charge_heap(&result)?;
    Ok(result)
}

pub async fn sort_by(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("sort-by", &args, 2)?;
    let items = as_seq("sort-by", &args[1])?;
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        interp.charge_iterations(1)?;
        let key = interp.apply(&args[0], vec![item.clone()]).await?;
        keyed.push((key, item));
    }
    let mut error = None;
    keyed.sort_by(|(a, _), (b, _)| {
        a.compare(b, "sort-by").unwrap_or_else(|e| {
            error.get_or_insert(e);
            std::cmp::Ordering::Equal
        })
    });
    if let Some(error) = error {
        return Err(error);
    }
    let result = Value::vector(keyed.into_iter().map(|(_, item)| item).collect());
    interp.charge_heap(&result)?;
    Ok(result)
}

pub async fn group_by(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("group-by", &args, 2)?;
    let items = as_seq("group-by", &args[1])?;
    let mut groups: ValueMap = ValueMap::new();
    for item in items {
        interp.charge_iterations(1)?;
        let key_value = interp.apply(&args[0], vec![item.clone()]).await?;
        let key = as_key("group-by", &key_value)?;
        match groups.get_mut(&key) {
            Some(Value::Vector(existing)) => {
                std::sync::Arc::make_mut(existing).push(item);
            }
            _ => {
                groups.insert(key, Value::vector(vec![item]));
            }
        }
    }
    let result = Value::map(groups);
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn take(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    slice("take", interp, args, |items, n| {
        items.into_iter().take(n).collect()
    })
}

pub fn drop(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    slice("drop", interp, args, |items, n| {
        items.into_iter().skip(n).collect()
    })
}

pub fn take_last(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    slice("take-last", interp, args, |items, n| {
        let skip = items.len().saturating_sub(n);
        items.into_iter().skip(skip).collect()
    })
}

pub fn drop_last(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    slice("drop-last", interp, args, |items, n| {
        let keep = items.len().saturating_sub(n);
        items.into_iter().take(keep).collect()
    })
}

fn slice(
    name: &str,
    interp: &Interp,
    args: Vec<Value>,
    pick: impl FnOnce(Vec<Value>, usize) -> Vec<Value>,
) -> Result<Value, LispError> {
    arity_exact(name, &args, 2)?;
    let n = as_int(name, &args[0])?.max(0) as usize;
    let items = as_seq(name, &args[1])?;
    interp.charge_iterations(items.len() as u64)?;
    let result = Value::vector(pick(items, n));
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn partition_all(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("partition-all", &args, 2)?;
    let size = as_int("partition-all", &args[0])?;
    if size <= 0 {
        return Err(LispError::runtime("partition-all", "size must be positive"));
    }
    let items = as_seq("partition-all", &args[1])?;
    interp.charge_iterations(items.len() as u64)?;
    let chunks = items
        .chunks(size as usize)
        .map(|chunk| Value::vector(chunk.to_vec()))
        .collect();
    let result = Value::vector(chunks);
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn butlast(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("butlast", &args, 1)?;
    let mut items = as_seq("butlast", &args[0])?;
    interp.charge_iterations(items.len() as u64)?;
    items.pop();
    let result = Value::vector(items);
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn distinct(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("distinct", &args, 1)?;
    let items = as_seq("distinct", &args[0])?;
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        interp.charge_iterations(1)?;
        if !out.contains(&item) {
            out.push(item);
        }
    }
    let result = Value::vector(out);
    interp.charge_heap(&result)?;
    Ok(result)
}

/// `(pluck coll :field)` — the named field of every element, `nil` where
/// absent.
pub fn pluck(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("pluck", &args, 2)?;
    let items = as_seq("pluck", &args[0])?;
    let key = as_key("pluck", &args[1])?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        interp.charge_iterations(1)?;
        let field = item
            .as_map()
            .and_then(|m| Value::get_flexible(m, &key))
            .cloned()
            .unwrap_or(Value::Nil);
        out.push(field);
    }
    let result = Value::vector(out);
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn to_vec(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("vec", &args, 1)?;
    let result = Value::vector(as_seq("vec", &args[0])?);
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn vector(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    let result = Value::vector(args);
    interp.charge_heap(&result)?;
    Ok(result)
}

pub(crate) fn sort_values(op: &str, items: &mut [Value]) -> Result<(), LispError> {
    let mut error = None;
    items.sort_by(|a, b| {
        a.compare(b, op).unwrap_or_else(|e| {
            error.get_or_insert(e);
            std::cmp::Ordering::Equal
        })
    });
    match error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use crate::lisp::eval::test_support::{eval_source, interp};
    use crate::lisp::Value;

    async fn eval_ok(source: &str) -> Value {
        eval_source(&interp(), source).await.unwrap()
    }

    #[tokio::test]
    async fn test_map_filter_reduce() {
        assert_eq!(
            eval_ok("(map (fn [x] (* x x)) [1 2 3])").await,
            Value::vector(vec![Value::Int(1), Value::Int(4), Value::Int(9)])
        );
        assert_eq!(
            eval_ok("(filter odd? [1 2 3 4 5])").await,
            Value::vector(vec![Value::Int(1), Value::Int(3), Value::Int(5)])
        );
        assert_eq!(eval_ok("(reduce + 0 [1 2 3 4])").await, Value::Int(10));
        assert_eq!(eval_ok("(reduce + [1 2 3 4])").await, Value::Int(10));
    }

    #[tokio::test]
    async fn test_remove_inverts_filter() {
        assert_eq!(
            eval_ok("(remove odd? [1 2 3 4])").await,
            Value::vector(vec![Value::Int(2), Value::Int(4)])
        );
    }

    #[tokio::test]
    async fn test_first_last_nth() {
        assert_eq!(eval_ok("(first [1 2 3])").await, Value::Int(1));
        assert_eq!(eval_ok("(first [])").await, Value::Nil);
        assert_eq!(eval_ok("(last [1 2 3])").await, Value::Int(3));
        assert_eq!(eval_ok("(nth [1 2 3] 1)").await, Value::Int(2));
        assert_eq!(eval_ok("(nth [1 2 3] 9 :none)").await, Value::keyword("none"));
        assert!(eval_source(&interp(), "(nth [1 2 3] 9)").await.is_err());
    }

    #[tokio::test]
    async fn test_conj_on_vector_set_map() {
        assert_eq!(
            eval_ok("(conj [1] 2 3)").await,
            Value::vector(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(eval_ok("(count (conj #{1 2} 2 3))").await, Value::Int(3));
        assert_eq!(eval_ok("(:b (conj {:a 1} [:b 2]))").await, Value::Int(2));
    }

    #[tokio::test]
    async fn test_sort_and_sort_by() {
        assert_eq!(
            eval_ok("(sort [3 1 2])").await,
            Value::vector(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(
            eval_ok("(pluck (sort-by :age [{:age 3} {:age 1}]) :age)").await,
            Value::vector(vec![Value::Int(1), Value::Int(3)])
        );
        assert!(eval_source(&interp(), "(sort [1 :a])").await.is_err());
    }

    #[tokio::test]
    async fn test_group_by_keyword() {
        assert_eq!(
            eval_ok("(count (get (group-by :kind [{:kind :a} {:kind :b} {:kind :a}]) :a))").await,
            Value::Int(2)
        );
    }

    #[tokio::test]
    async fn test_take_drop_family() {
        assert_eq!(
            eval_ok("(take 2 [1 2 3])").await,
            Value::vector(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            eval_ok("(drop 2 [1 2 3])").await,
            Value::vector(vec![Value::Int(3)])
        );
        assert_eq!(
            eval_ok("(take-last 2 [1 2 3])").await,
            Value::vector(vec![Value::Int(2), Value::Int(3)])
        );
        assert_eq!(
            eval_ok("(drop-last 2 [1 2 3])").await,
            Value::vector(vec![Value::Int(1)])
        );
        assert_eq!(
            eval_ok("(butlast [1 2 3])").await,
            Value::vector(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[tokio::test]
    async fn test_partition_all_keeps_tail() {
        assert_eq!(eval_ok("(count (partition-all 2 [1 2 3]))").await, Value::Int(2));
        assert_eq!(
            eval_ok("(last (partition-all 2 [1 2 3]))").await,
            Value::vector(vec![Value::Int(3)])
        );
    }

    #[tokio::test]
    async fn test_distinct_and_pluck() {
        assert_eq!(
            eval_ok("(distinct [1 2 1 3 2])").await,
            Value::vector(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(
            eval_ok(r#"(pluck [{:id 1} {"id" 2} {}] :id)"#).await,
            Value::vector(vec![Value::Int(1), Value::Int(2), Value::Nil])
        );
    }

    #[tokio::test]
    async fn test_map_over_map_yields_pairs() {
        assert_eq!(
            eval_ok("(count (map first {:a 1 :b 2}))").await,
            Value::Int(2)
        );
    }
}
