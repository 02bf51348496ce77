use super::{arity_exact, LispError, Value};

enum Num {
    I(i64),
    F(f64),
}

fn to_num(op: &str, value: &Value) -> Result<Num, LispError> {
    match value {
        Value::Int(n) => Ok(Num::I(*n)),
        Value::Float(x) => Ok(Num::F(*x)),
        other => Err(LispError::type_mismatch(op, "a number", other)),
    }
}

fn overflow(op: &str) -> LispError {
    LispError::runtime(op, "integer overflow")
}

pub fn arithmetic(op: &str, args: Vec<Value>) -> Result<Value, LispError> {
    match op {
        "+" => fold(op, args, Num::I(0), |a, b| add(a, b)),
        "*" => fold(op, args, Num::I(1), |a, b| mul(a, b)),
        "-" => match args.len() {
            0 => Err(LispError::Arity {
                name: op.into(),
                expected: "at least 1".into(),
                got: 0,
            }),
            1 => match to_num(op, &args[0])? {
                Num::I(n) => n.checked_neg().map(Value::Int).ok_or_else(|| overflow(op)),
                Num::F(x) => Ok(Value::Float(-x)),
            },
            _ => {
                let mut iter = args.iter();
                let mut acc = to_num(op, iter.next().expect("nonempty"))?;
                for value in iter {
                    acc = sub(acc, to_num(op, value)?).ok_or_else(|| overflow(op))?;
                }
                Ok(num_value(acc))
            }
        },
        "/" => {
            if args.len() < 2 {
                return Err(LispError::Arity {
                    name: op.into(),
                    expected: "at least 2".into(),
                    got: args.len(),
                });
            }
            let mut iter = args.iter();
            let mut acc = to_num(op, iter.next().expect("nonempty"))?;
            for value in iter {
                acc = divide(op, acc, to_num(op, value)?)?;
            }
            Ok(num_value(acc))
        }
        "mod" | "quot" => {
            arity_exact(op, &args, 2)?;
            let a = super::as_int(op, &args[0])?;
            let b = super::as_int(op, &args[1])?;
            if b == 0 {
                return Err(LispError::runtime(op, "division by zero"));
            }
            Ok(Value::Int(if op == "mod" {
                a.rem_euclid(b)
            } else {
                a / b
            }))
        }
        _ => Err(LispError::Unbound(op.to_string())),
    }
}

fn fold(
    op: &str,
    args: Vec<Value>,
    init: Num,
    combine: impl Fn(Num, Num) -> Option<Num>,
) -> Result<Value, LispError> {
    let mut acc = init;
    for value in &args {
        acc = combine(acc, to_num(op, value)?).ok_or_else(|| overflow(op))?;
    }
    Ok(num_value(acc))
}

fn add(a: Num, b: Num) -> Option<Num> {
    Some(match (a, b) {
        (Num::I(a), Num::I(b)) => Num::I(a.checked_add(b)?),
        (a, b) => Num::F(as_f64(a) + as_f64(b)),
    })
}

fn sub(a: Num, b: Num) -> Option<Num> {
    Some(match (a, b) {
        (Num::I(a), Num::I(b)) => Num::I(a.checked_sub(b)?),
        (a, b) => Num::F(as_f64(a) - as_f64(b)),
    })
}

fn mul(a: Num, b: Num) -> Option<Num> {
    Some(match (a, b) {
        (Num::I(a), Num::I(b)) => Num::I(a.checked_mul(b)?),
        (a, b) => Num::F(as_f64(a) * as_f64(b)),
    })
}

/// Int ÷ int stays an int when it divides evenly, otherwise goes float.
fn divide(op: &str, a: Num, b: Num) -> Result<Num, LispError> {
    match (a, b) {
        (Num::I(_), Num::I(0)) => Err(LispError::runtime(op, "division by zero")),
        (Num::I(a), Num::I(b)) if a % b == 0 => Ok(Num::I(a / b)),
        (a, b) => Ok(Num::F(as_f64(a) / as_f64(b))),
    }
}

fn as_f64(n: Num) -> f64 {
    match n {
        Num::I(n) => n as f64,
        Num::F(x) => x,
    }
}

fn num_value(n: Num) -> Value {
    match n {
        Num::I(n) => Value::Int(n),
        Num::F(x) => Value::Float(x),
    }
}

pub fn comparison(op: &str, args: Vec<Value>) -> Result<Value, LispError> {
    if args.len() < 2 {
        return Err(LispError::Arity {
            name: op.into(),
            expected: "at least 2".into(),
            got: args.len(),
        });
    }
    for pair in args.windows(2) {
        let ordering = pair[0].compare(&pair[1], op)?;
        let holds = match op {
            "<" => ordering.is_lt(),
            ">" => ordering.is_gt(),
            "<=" => ordering.is_le(),
            ">=" => ordering.is_ge(),
            _ => return Err(LispError::Unbound(op.to_string())),
        };
        if !holds {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

pub fn equality(args: Vec<Value>, negate: bool) -> Result<Value, LispError> {
    let name = if negate { "not=" } else { "=" };
    if args.len() < 2 {
        return Err(LispError::Arity {
            name: name.into(),
            expected: "at least 2".into(),
            got: args.len(),
        });
    }
    let all_equal = args.windows(2).all(|pair| pair[0] == pair[1]);
    Ok(Value::Bool(if negate { !all_equal } else { all_equal }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_arithmetic_promotes_to_float() {
        assert_eq!(
            arithmetic("+", vec![Value::Int(1), Value::Float(0.5)]).unwrap(),
            Value::Float(1.5)
        );
    }

    #[test]
    fn test_division_exact_stays_int() {
        assert_eq!(
            arithmetic("/", vec![Value::Int(6), Value::Int(3)]).unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            arithmetic("/", vec![Value::Int(7), Value::Int(2)]).unwrap(),
            Value::Float(3.5)
        );
    }

    #[test]
    fn test_division_by_zero_errors() {
        assert!(arithmetic("/", vec![Value::Int(1), Value::Int(0)]).is_err());
        assert!(arithmetic("mod", vec![Value::Int(1), Value::Int(0)]).is_err());
    }

    #[test]
    fn test_mod_is_euclidean() {
        assert_eq!(
            arithmetic("mod", vec![Value::Int(-7), Value::Int(3)]).unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            arithmetic("quot", vec![Value::Int(7), Value::Int(2)]).unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn test_chained_comparison() {
        assert_eq!(
            comparison("<", vec![Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            comparison("<", vec![Value::Int(1), Value::Int(3), Value::Int(2)]).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_equality_is_strict_about_keywords() {
        assert_eq!(
            equality(vec![Value::keyword("a"), Value::string("a")], false).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            equality(vec![Value::Int(1), Value::Float(1.0)], false).unwrap(),
            Value::Bool(true)
        );
    }
}
