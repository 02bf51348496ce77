//! The fixed builtin library of PTC-Lisp.
//!
//! Builtins are looked up by name at resolution time and dispatched here.
//! Every builtin that loops charges the interpreter's shared iteration
//! counter per element, which is also where the execution deadline is
//! re-checked.

mod aggregate;
mod collections;
mod control;
mod maps;
mod math;
mod predicates;
mod query;
mod sets;
mod strings;

pub use query::eval_where_pred;

use super::eval::Interp;
use super::value::{MapKey, Value, ValueMap};
use super::LispError;

/// Every builtin name, in one place. Resolution returns the canonical
/// `&'static str` stored inside `Value::Builtin`.
const BUILTINS: &[&str] = &[
    // arithmetic
    "+", "-", "*", "/", "mod", "quot",
    // comparison
    "<", ">", "<=", ">=", "=", "not=",
    // logic
    "not",
    // collections
    "map", "mapv", "filter", "remove", "reduce", "first", "last", "nth", "count", "empty?",
    "conj", "cons", "concat", "sort", "sort-by", "group-by", "take", "drop", "take-last",
    "drop-last", "partition-all", "butlast", "distinct", "pluck", "vec", "vector",
    // maps
    "get", "get-in", "assoc", "assoc-in", "update", "update-in", "dissoc", "keys", "vals",
    "merge", "select-keys",
    // sets
    "set", "set?", "clojure.set/union", "clojure.set/intersection", "clojure.set/difference",
    // strings
    "str", "str/includes?", "str/starts-with?", "str/ends-with?", "str/split", "str/join",
    "str/trim", "grep", "grep-n",
    // aggregators
    "sum", "sum-by", "avg", "avg-by", "min-by", "max-by",
    // coercion
    "parse-long", "parse-double",
    // predicates
    "nil?", "some?", "number?", "string?", "map?", "vector?", "odd?", "even?",
    // query DSL
    "where", "in", "includes",
    // control and host access
    "return", "fail", "println", "memory/put", "memory/get", "call", "pmap",
];

/// Resolves a symbol to its canonical builtin name, if it names one.
pub fn canonical_name(name: &str) -> Option<&'static str> {
    BUILTINS.iter().copied().find(|known| *known == name)
}

/// Dispatches one builtin application.
pub async fn invoke(interp: &Interp, name: &str, args: Vec<Value>) -> Result<Value, LispError> {
    match name {
        "+" | "-" | "*" | "/" | "mod" | "quot" => math::arithmetic(name, args),
        "<" | ">" | "<=" | ">=" => math::comparison(name, args),
        "=" => math::equality(args, false),
        "not=" => math::equality(args, true),
        "not" => {
            arity_exact("not", &args, 1)?;
            Ok(Value::Bool(!args[0].is_truthy()))
        }

        "map" | "mapv" => collections::map(interp, args).await,
        "filter" => collections::filter(interp, args, false).await,
        "remove" => collections::filter(interp, args, true).await,
        "reduce" => collections::reduce(interp, args).await,
        "first" => collections::first(args),
        "last" => collections::last(args),
        "nth" => collections::nth(args),
        "count" => collections::count(args),
        "empty?" => collections::is_empty(args),
        "conj" => collections::conj(interp, args),
        "cons" => collections::cons(interp, args),
        "concat" => collections::concat(interp, args),
        "sort" => collections::sort(interp, args),
        "sort-by" => collections::sort_by(interp, args).await,
        "group-by" => collections::group_by(interp, args).await,
        "take" => collections::take(interp, args),
        "drop" => collections::drop(interp, args),
        "take-last" => collections::take_last(interp, args),
        "drop-last" => collections::drop_last(interp, args),
        "partition-all" => collections::partition_all(interp, args),
        "butlast" => collections::butlast(interp, args),
        "distinct" => collections::distinct(interp, args),
        "pluck" => collections::pluck(interp, args),
        "vec" => collections::to_vec(interp, args),
        "vector" => collections::vector(interp, args),

        "get" => maps::get(args),
        "get-in" => maps::get_in(args),
        "assoc" => maps::assoc(interp, args),
        "assoc-in" => maps::assoc_in(interp, args),
        "update" => maps::update(interp, args).await,
        "update-in" => maps::update_in(interp, args).await,
        "dissoc" => maps::dissoc(interp, args),
        "keys" => maps::keys(interp, args),
        "vals" => maps::vals(interp, args),
        "merge" => maps::merge(interp, args),
        "select-keys" => maps::select_keys(interp, args),

        "set" => sets::to_set(interp, args),
        "set?" => predicates::is_set(args),
        "clojure.set/union" => sets::union(interp, args),
        "clojure.set/intersection" => sets::intersection(interp, args),
        "clojure.set/difference" => sets::difference(interp, args),

        "str" => strings::str_concat(args),
        "str/includes?" => strings::includes(args),
        "str/starts-with?" => strings::starts_with(args),
        "str/ends-with?" => strings::ends_with(args),
        "str/split" => strings::split(interp, args),
        "str/join" => strings::join(interp, args),
        "str/trim" => strings::trim(args),
        "grep" => strings::grep(interp, args, false),
        "grep-n" => strings::grep(interp, args, true),

        "sum" => aggregate::sum(interp, args),
        "sum-by" => aggregate::sum_by(interp, args).await,
        "avg" => aggregate::avg(interp, args),
        "avg-by" => aggregate::avg_by(interp, args).await,
        "min-by" => aggregate::extreme_by(interp, args, false).await,
        "max-by" => aggregate::extreme_by(interp, args, true).await,

        "parse-long" => predicates::parse_long(args),
        "parse-double" => predicates::parse_double(args),
        "nil?" => predicates::is_nil(args),
        "some?" => predicates::is_some(args),
        "number?" => predicates::is_number(args),
        "string?" => predicates::is_string(args),
        "map?" => predicates::is_map(args),
        "vector?" => predicates::is_vector(args),
        "odd?" => predicates::parity(args, 1),
        "even?" => predicates::parity(args, 0),

        "where" => query::where_pred(args),
        "in" | "includes" => Err(LispError::runtime(
            name,
            "only valid as the operator of a where clause",
        )),

        "return" => control::return_signal(args),
        "fail" => control::fail_signal(args),
        "println" => control::println(interp, args),
        "memory/put" => control::memory_put(interp, args),
        "memory/get" => control::memory_get(interp, args),
        "call" => control::call(interp, args).await,
        "pmap" => control::pmap(interp, args).await,

        other => Err(LispError::Unbound(other.to_string())),
    }
}

// ---- shared argument helpers ----

pub(crate) fn arity_exact(name: &str, args: &[Value], n: usize) -> Result<(), LispError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(LispError::Arity {
            name: name.to_string(),
            expected: n.to_string(),
            got: args.len(),
        })
    }
}

pub(crate) fn arity_range(
    name: &str,
    args: &[Value],
    min: usize,
    max: usize,
) -> Result<(), LispError> {
    if (min..=max).contains(&args.len()) {
        Ok(())
    } else {
        Err(LispError::Arity {
            name: name.to_string(),
            expected: format!("{min} to {max}"),
            got: args.len(),
        })
    }
}

/// Coerces a value into a sequence of elements. Maps become `[key value]`
/// pairs; `nil` is the empty sequence.
pub(crate) fn as_seq(name: &str, value: &Value) -> Result<Vec<Value>, LispError> {
    match value {
        Value::Vector(items) | Value::Set(items) => Ok(items.as_ref().clone()),
        Value::Nil => Ok(Vec::new()),
        Value::Map(entries) => Ok(entries
            .iter()
            .map(|(key, val)| Value::vector(vec![key.to_value(), val.clone()]))
            .collect()),
        other => Err(LispError::type_mismatch(name, "a sequence", other)),
    }
}

pub(crate) fn as_map(name: &str, value: &Value) -> Result<ValueMap, LispError> {
    match value {
        Value::Map(entries) => Ok(entries.as_ref().clone()),
        Value::Nil => Ok(ValueMap::new()),
        other => Err(LispError::type_mismatch(name, "a map", other)),
    }
}

pub(crate) fn as_str<'a>(name: &str, value: &'a Value) -> Result<&'a str, LispError> {
    value
        .as_str()
        .ok_or_else(|| LispError::type_mismatch(name, "a string", value))
}

pub(crate) fn as_int(name: &str, value: &Value) -> Result<i64, LispError> {
    match value {
        Value::Int(n) => Ok(*n),
        other => Err(LispError::type_mismatch(name, "an int", other)),
    }
}

pub(crate) fn as_key(name: &str, value: &Value) -> Result<MapKey, LispError> {
    MapKey::from_value(value)
        .ok_or_else(|| LispError::type_mismatch(name, "a keyword, string, int or bool key", value))
}
