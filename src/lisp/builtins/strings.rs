use super::{arity_exact, arity_range, as_seq, as_str, LispError, Value};
use crate::lisp::eval::Interp;

/// Plain rendering used by `str` and `println`: strings stay unquoted, `nil`
/// renders as the empty string.
pub(crate) fn display_plain(value: &Value) -> String {
    match value {
        Value::Nil => String::new(),
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn str_concat(args: Vec<Value>) -> Result<Value, LispError> {
    let mut out = String::new();
    for arg in &args {
        out.push_str(&display_plain(arg));
    }
    Ok(Value::Str(out))
}

pub fn includes(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("str/includes?", &args, 2)?;
    let haystack = as_str("str/includes?", &args[0])?;
    let needle = as_str("str/includes?", &args[1])?;
    Ok(Value::Bool(haystack.contains(needle)))
}

pub fn starts_with(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("str/starts-with?", &args, 2)?;
    let subject = as_str("str/starts-with?", &args[0])?;
    let prefix = as_str("str/starts-with?", &args[1])?;
    Ok(Value::Bool(subject.starts_with(prefix)))
}

pub fn ends_with(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("str/ends-with?", &args, 2)?;
    let subject = as_str("str/ends-with?", &args[0])?;
    let suffix = as_str("str/ends-with?", &args[1])?;
    Ok(Value::Bool(subject.ends_with(suffix)))
}

pub fn split(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("str/split", &args, 2)?;
    let subject = as_str("str/split", &args[0])?;
    let separator = as_str("str/split", &args[1])?;
    if separator.is_empty() {
        return Err(LispError::runtime("str/split", "separator cannot be empty"));
    }
    let parts: Vec<Value> = subject.split(separator).map(Value::string).collect();
    interp.charge_iterations(parts.len() as u64)?;
    let result = Value::vector(parts);
    interp.charge_heap(&result)?;
    Ok(result)
}

pub fn join(interp: &Interp, args: Vec<Value>) -> Result<Value, LispError> {
    arity_range("str/join", &args, 1, 2)?;
    let (separator, coll) = match args.len() {
        1 => ("".to_string(), &args[0]),
        _ => (as_str("str/join", &args[0])?.to_string(), &args[1]),
    };
    let items = as_seq("str/join", coll)?;
    interp.charge_iterations(items.len() as u64)?;
    let joined = items
        .iter()
        .map(display_plain)
        .collect::<Vec<_>>()
        .join(&separator);
    Ok(Value::Str(joined))
}

pub fn trim(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("str/trim", &args, 1)?;
    Ok(Value::string(as_str("str/trim", &args[0])?.trim()))
}

/// `grep` scans the lines of a string (or a sequence of strings) for a
/// regex. Plain form returns matching lines; `grep-n` returns `[line-number
/// line]` pairs, 1-based.
pub fn grep(interp: &Interp, args: Vec<Value>, numbered: bool) -> Result<Value, LispError> {
    let name = if numbered { "grep-n" } else { "grep" };
    arity_exact(name, &args, 2)?;
    let pattern = as_str(name, &args[0])?;
    let re = regex::Regex::new(pattern)
        .map_err(|e| LispError::runtime(name, format!("invalid pattern: {e}")))?;

    let lines: Vec<String> = match &args[1] {
        Value::Str(text) => text.lines().map(str::to_string).collect(),
        other => as_seq(name, other)?
            .iter()
            .map(|item| as_str(name, item).map(str::to_string))
            .collect::<Result<_, _>>()?,
    };

    let mut out = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        interp.charge_iterations(1)?;
        if re.is_match(line) {
            if numbered {
                out.push(Value::vector(vec![
                    Value::Int(index as i64 + 1),
                    Value::string(line),
                ]));
            } else {
                out.push(Value::string(line));
            }
        }
    }
    let result = Value::vector(out);
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
    async fn test_str_renders_plainly() {
        assert_eq!(
            eval_ok(r#"(str "n=" 1 " k=" :a nil)"#).await,
            Value::string("n=1 k=:a")
        );
    }

    #[tokio::test]
    async fn test_predicates() {
        assert_eq!(eval_ok(r#"(str/includes? "haystack" "hay")"#).await, Value::Bool(true));
        assert_eq!(eval_ok(r#"(str/starts-with? "haystack" "hay")"#).await, Value::Bool(true));
        assert_eq!(eval_ok(r#"(str/ends-with? "haystack" "hay")"#).await, Value::Bool(false));
    }

    #[tokio::test]
    async fn test_split_join_trim() {
        assert_eq!(
            eval_ok(r#"(str/split "a,b,c" ",")"#).await,
            Value::vector(vec![
                Value::string("a"),
                Value::string("b"),
                Value::string("c"),
            ])
        );
        assert_eq!(
            eval_ok(r#"(str/join ", " ["a" "b"])"#).await,
            Value::string("a, b")
        );
        assert_eq!(eval_ok(r#"(str/trim "  x ")"#).await, Value::string("x"));
    }

    #[tokio::test]
    async fn test_grep_over_string_lines() {
        assert_eq!(
            eval_ok("(grep \"err\" \"ok\\nerror: one\\nfine\\nerror: two\")").await,
            Value::vector(vec![
                Value::string("error: one"),
                Value::string("error: two"),
            ])
        );
    }

    #[tokio::test]
    async fn test_grep_n_is_one_based() {
        assert_eq!(
            eval_ok("(grep-n \"b\" \"a\\nb\")").await,
            Value::vector(vec![Value::vector(vec![
                Value::Int(2),
                Value::string("b"),
            ])])
        );
    }

    #[tokio::test]
    async fn test_grep_invalid_pattern_errors() {
        assert!(eval_source(&interp(), r#"(grep "[" "x")"#).await.is_err());
    }
}
