/// Builds an execution context map from `key => value` pairs.
///
/// Values are anything with an `Into<Value>` conversion: numbers, strings,
/// booleans, `Value` itself, or `serde_json::Value`.
///
/// ```rust,ignore
/// let ctx = context! {
///     "x" => 5,
///     "users" => serde_json::json!([{"id": 1}]),
/// };
/// ```
#[macro_export]
macro_rules! context {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = ::std::collections::BTreeMap::<String, $crate::lisp::Value>::new();
        $( map.insert($key.to_string(), $crate::lisp::Value::from($value)); )*
        map
    }};
}
