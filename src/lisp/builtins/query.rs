use std::sync::Arc;

use super::{arity_exact, as_key, LispError, Value};
use crate::lisp::value::{WhereOp, WherePred};

/// `(where :field = value)` / `(where [:a :b] = value)` — builds a
/// predicate over maps for use with `filter` and friends.
pub fn where_pred(args: Vec<Value>) -> Result<Value, LispError> {
    arity_exact("where", &args, 3)?;
    let path = match &args[0] {
        Value::Vector(segments) => segments
            .iter()
            .map(|segment| as_key("where", segment))
            .collect::<Result<Vec<_>, _>>()?,
        single => vec![as_key("where", single)?],
    };
    if path.is_empty() {
        return Err(LispError::runtime("where", "empty field path"));
    }
    let op = match &args[1] {
        Value::Builtin(name) => match *name {
            "=" => WhereOp::Eq,
            "not=" => WhereOp::NotEq,
            "<" => WhereOp::Lt,
            ">" => WhereOp::Gt,
            "<=" => WhereOp::Le,
            ">=" => WhereOp::Ge,
            "in" => WhereOp::In,
            "includes" => WhereOp::Includes,
            other => {
                return Err(LispError::runtime(
                    "where",
                    format!("unsupported operator {other}"),
                ))
            }
        },
        other => {
            return Err(LispError::type_mismatch(
                "where",
                "an operator (= not= < > <= >= in includes)",
                other,
            ))
        }
    };
    Ok(Value::Pred(Arc::new(WherePred {
        path,
        op,
        operand: args[2].clone(),
    })))
}

/// Applies a `where` predicate to one candidate. Non-map candidates and
/// missing fields fail the predicate rather than erroring, so mixed
/// collections filter cleanly.
pub fn eval_where_pred(pred: &WherePred, subject: &Value) -> Result<Value, LispError> {
    let mut current = subject.clone();
    for key in &pred.path {
        let next = current
            .as_map()
            .and_then(|entries| Value::get_flexible(entries, key))
            .cloned();
        match next {
            Some(value) => current = value,
            None => return Ok(Value::Bool(pred.op == WhereOp::NotEq)),
        }
    }
    let field = current;
    let operand = &pred.operand;

    let holds = match pred.op {
        // Keywords and strings are interchangeable for equality tests only;
        // booleans and numbers never coerce.
        WhereOp::Eq => loose_eq(&field, operand),
        WhereOp::NotEq => !loose_eq(&field, operand),
        WhereOp::Lt | WhereOp::Gt | WhereOp::Le | WhereOp::Ge => {
            match field.compare(operand, pred.op.name()) {
                Ok(ordering) => match pred.op {
                    WhereOp::Lt => ordering.is_lt(),
                    WhereOp::Gt => ordering.is_gt(),
                    WhereOp::Le => ordering.is_le(),
                    WhereOp::Ge => ordering.is_ge(),
                    _ => unreachable!(),
                },
                Err(_) => false,
            }
        }
        WhereOp::In => match operand {
            Value::Vector(items) | Value::Set(items) => {
                items.iter().any(|item| loose_eq(&field, item))
            }
            _ => false,
        },
        WhereOp::Includes => match &field {
            Value::Vector(items) | Value::Set(items) => {
                items.iter().any(|item| loose_eq(item, operand))
            }
            Value::Str(haystack) => match operand {
                Value::Str(needle) => haystack.contains(needle.as_str()),
                Value::Keyword(needle) => haystack.contains(needle.as_str()),
                _ => false,
            },
            _ => false,
        },
    };
    Ok(Value::Bool(holds))
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Keyword(k), Value::Str(s)) | (Value::Str(s), Value::Keyword(k)) => k == s,
        _ => false,
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
    async fn test_where_equality_coerces_keywords_and_strings() {
        assert_eq!(
            eval_ok(r#"(count (filter (where :status = "active")
                                      [{:status :active} {:status "active"} {:status :done}]))"#)
            .await,
            Value::Int(2)
        );
    }

    #[tokio::test]
    async fn test_where_booleans_do_not_coerce() {
        assert_eq!(
            eval_ok(r#"(count (filter (where :on = true) [{:on true} {:on "true"}]))"#).await,
            Value::Int(1)
        );
    }

    #[tokio::test]
    async fn test_where_not_eq_matches_missing_field() {
        assert_eq!(
            eval_ok("(count (filter (where :kind not= :a) [{:kind :a} {:kind :b} {}]))").await,
            Value::Int(2)
        );
    }

    #[tokio::test]
    async fn test_where_path_and_ordering() {
        assert_eq!(
            eval_ok("(count (filter (where [:user :age] >= 18) [{:user {:age 20}} {:user {:age 10}}]))")
                .await,
            Value::Int(1)
        );
    }

    #[tokio::test]
    async fn test_where_in_and_includes() {
        assert_eq!(
            eval_ok(r#"(count (filter (where :id in [1 2]) [{:id 1} {:id 3}]))"#).await,
            Value::Int(1)
        );
        assert_eq!(
            eval_ok(r#"(count (filter (where :tags includes "rust")
                                      [{:tags ["rust" "lisp"]} {:tags ["go"]}]))"#)
            .await,
            Value::Int(1)
        );
        assert_eq!(
            eval_ok(r#"(count (filter (where :title includes "abc") [{:title "xxabcxx"} {:title "x"}]))"#)
                .await,
            Value::Int(1)
        );
    }

    #[tokio::test]
    async fn test_where_rejects_unknown_operator() {
        assert!(eval_source(&interp(), "(where :a + 1)").await.is_err());
        assert!(eval_source(&interp(), "(in [1 2] 1)").await.is_err());
    }
}
