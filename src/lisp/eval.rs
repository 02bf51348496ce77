use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_recursion::async_recursion;
use serde_json::json;

use crate::schemas::ToolCallRecord;
use crate::tools::{DispatchError, ToolDispatcher};
use crate::trace::{EventKind, Tracer};

use super::analyze::{Ir, Pattern};
use super::builtins;
use super::env::Env;
use super::value::{Lambda, MapKey, Value, ValueMap};
use super::LispError;

/// Iteration ceiling no configuration can raise.
pub const HARD_ITERATION_CAP: u64 = 10_000;

/// Default soft iteration cap.
pub const DEFAULT_ITERATION_CAP: u64 = 1_000;

/// Bounds one evaluation. The sandbox derives this from its limits.
#[derive(Debug, Clone, Copy)]
pub struct EvalBudget {
    pub deadline: Instant,
    pub iteration_cap: u64,
    pub heap_limit: u64,
}

impl Default for EvalBudget {
    fn default() -> Self {
        EvalBudget {
            deadline: Instant::now() + Duration::from_secs(1),
            iteration_cap: DEFAULT_ITERATION_CAP,
            heap_limit: 64 * 1024 * 1024,
        }
    }
}

/// Where sandboxed tool events land: the run's collector plus the span they
/// hang under.
#[derive(Clone)]
pub struct TraceScope {
    pub tracer: Tracer,
    pub parent_span: String,
}

/// One interpreter instance, alive for a single program execution.
///
/// Shared mutable state is behind locks and atomics so `pmap` branches can
/// run on the same instance concurrently.
pub struct Interp {
    ctx: BTreeMap<String, Value>,
    memory: BTreeMap<String, Value>,
    defs: Mutex<BTreeMap<String, Value>>,
    prints: Mutex<Vec<String>>,
    tool_log: Mutex<Vec<ToolCallRecord>>,
    tools: Arc<dyn ToolDispatcher>,
    budget: EvalBudget,
    iterations: AtomicU64,
    heap: AtomicU64,
    tool_calls_made: AtomicU64,
    max_tool_calls: Option<u32>,
    pool_size: usize,
    trace: Option<TraceScope>,
}

/// What an execution leaves behind besides its value.
#[derive(Debug, Default)]
pub struct InterpOutput {
    pub prints: Vec<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub defs: BTreeMap<String, Value>,
}

impl Interp {
    pub fn new(
        ctx: BTreeMap<String, Value>,
        memory: BTreeMap<String, Value>,
        tools: Arc<dyn ToolDispatcher>,
        budget: EvalBudget,
    ) -> Self {
        Interp {
            ctx,
            memory,
            defs: Mutex::new(BTreeMap::new()),
            prints: Mutex::new(Vec::new()),
            tool_log: Mutex::new(Vec::new()),
            tools,
            budget,
            iterations: AtomicU64::new(0),
            heap: AtomicU64::new(0),
            tool_calls_made: AtomicU64::new(0),
            max_tool_calls: None,
            pool_size: 4,
            trace: None,
        }
    }

    pub fn with_max_tool_calls(mut self, max: Option<u32>) -> Self {
        self.max_tool_calls = max;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn with_trace(mut self, trace: Option<TraceScope>) -> Self {
        self.trace = trace;
        self
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Evaluates all top-level forms, returning the last value.
    pub async fn run(&self, program: &[Ir]) -> Result<Value, LispError> {
        let env = Env::root();
        let mut last = Value::Nil;
        for ir in program {
            last = self.eval(ir, &env).await?;
        }
        Ok(last)
    }

    /// Takes everything the execution accumulated. Usable after a timeout
    /// dropped the evaluation future mid-flight.
    pub fn drain_output(&self) -> InterpOutput {
        InterpOutput {
            prints: std::mem::take(&mut self.prints.lock().expect("prints lock")),
            tool_calls: std::mem::take(&mut self.tool_log.lock().expect("tool log lock")),
            defs: std::mem::take(&mut self.defs.lock().expect("defs lock")),
        }
    }

    pub fn push_print(&self, line: String) {
        self.prints.lock().expect("prints lock").push(line);
    }

    pub fn memory_get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.defs.lock().expect("defs lock").get(name) {
            return Some(value.clone());
        }
        self.memory.get(name).cloned()
    }

    pub fn memory_put(&self, name: String, value: Value) {
        self.defs.lock().expect("defs lock").insert(name, value);
    }

    /// Charges `n` loop iterations against the shared counter; every builtin
    /// that loops calls this per element. Also the cooperative deadline
    /// check, so CPU-bound programs cannot outrun the wall clock between
    /// awaits.
    pub fn charge_iterations(&self, n: u64) -> Result<(), LispError> {
        if Instant::now() >= self.budget.deadline {
            return Err(LispError::DeadlineExceeded);
        }
        let cap = self.budget.iteration_cap.min(HARD_ITERATION_CAP);
        let used = self.iterations.fetch_add(n, AtomicOrdering::Relaxed) + n;
        if used > cap {
            return Err(LispError::IterationLimit { limit: cap });
        }
        Ok(())
    }

    /// Charges the approximate size of a freshly built value against the
    /// heap ceiling.
    pub fn charge_heap(&self, value: &Value) -> Result<(), LispError> {
        let size = value.estimated_size();
        let used = self.heap.fetch_add(size, AtomicOrdering::Relaxed) + size;
        if used > self.budget.heap_limit {
            return Err(LispError::OutOfMemory {
                limit: self.budget.heap_limit,
            });
        }
        Ok(())
    }

    #[async_recursion]
    pub async fn eval(&self, ir: &Ir, env: &Env) -> Result<Value, LispError> {
        if Instant::now() >= self.budget.deadline {
            return Err(LispError::DeadlineExceeded);
        }
        match ir {
            Ir::Literal(value) => Ok(value.clone()),
            Ir::Var(name) => self.resolve(name, env),
            Ir::Ctx(key) => Ok(self.ctx.get(key).cloned().unwrap_or(Value::Nil)),
            Ir::If { cond, then, els } => {
                if self.eval(cond, env).await?.is_truthy() {
                    self.eval(then, env).await
                } else {
                    self.eval(els, env).await
                }
            }
            Ir::Do(exprs) => {
                let mut last = Value::Nil;
                for expr in exprs {
                    last = self.eval(expr, env).await?;
                }
                Ok(last)
            }
            Ir::Let { bindings, body } => {
                let mut scope = env.clone();
                for (pattern, expr) in bindings {
                    let value = self.eval(expr, &scope).await?;
                    let mut bound = HashMap::new();
                    bind_pattern(pattern, value, &mut bound)?;
                    scope = scope.child(bound);
                }
                let mut last = Value::Nil;
                for expr in body {
                    last = self.eval(expr, &scope).await?;
                }
                Ok(last)
            }
            Ir::Fn { name, params, body } => Ok(Value::Fn(Arc::new(Lambda {
                name: name.clone(),
                params: params.clone(),
                body: body.clone(),
                env: env.clone(),
            }))),
            Ir::Def { name, expr } => {
                let value = self.eval(expr, env).await?;
                self.charge_heap(&value)?;
                self.defs
                    .lock()
                    .expect("defs lock")
                    .insert(name.clone(), value.clone());
                Ok(value)
            }
            Ir::Call { target, args } => {
                let callee = self.eval(target, env).await?;
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval(arg, env).await?);
                }
                self.apply(&callee, evaluated).await
            }
            Ir::ToolCall { name, args } => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval(arg, env).await?);
                }
                self.call_tool(name, evaluated).await
            }
            Ir::Vector(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, env).await?);
                }
                let vector = Value::vector(values);
                self.charge_heap(&vector)?;
                Ok(vector)
            }
            Ir::SetLit(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, env).await?);
                }
                let set = Value::set(values);
                self.charge_heap(&set)?;
                Ok(set)
            }
            Ir::MapLit(entries) => {
                let mut map = ValueMap::new();
                for (key_ir, value_ir) in entries {
                    let key_value = self.eval(key_ir, env).await?;
                    let key = MapKey::from_value(&key_value).ok_or_else(|| {
                        LispError::type_mismatch("map literal", "a scalar key", &key_value)
                    })?;
                    map.insert(key, self.eval(value_ir, env).await?);
                }
                let map = Value::map(map);
                self.charge_heap(&map)?;
                Ok(map)
            }
        }
    }

    fn resolve(&self, name: &str, env: &Env) -> Result<Value, LispError> {
        if let Some(value) = env.get(name) {
            return Ok(value);
        }
        if let Some(value) = self.defs.lock().expect("defs lock").get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.memory.get(name) {
            return Ok(value.clone());
        }
        if let Some(canonical) = builtins::canonical_name(name) {
            return Ok(Value::Builtin(canonical));
        }
        Err(LispError::Unbound(name.to_string()))
    }

    /// Applies any callable value. Keywords, maps and sets are callable the
    /// way they are in Clojure.
    #[async_recursion]
    pub async fn apply(&self, callee: &Value, args: Vec<Value>) -> Result<Value, LispError> {
        match callee {
            Value::Builtin(name) => builtins::invoke(self, name, args).await,
            Value::Fn(lambda) => {
                check_lambda_arity(lambda, args.len())?;
                let mut bound = HashMap::new();
                bind_pattern(lambda.params.as_ref(), Value::vector(args), &mut bound)?;
                let scope = lambda.env.child(bound);
                let mut last = Value::Nil;
                for expr in lambda.body.iter() {
                    last = self.eval(expr, &scope).await?;
                }
                Ok(last)
            }
            Value::Pred(pred) => match args.as_slice() {
                [subject] => builtins::eval_where_pred(pred, subject),
                _ => Err(LispError::Arity {
                    name: "where predicate".into(),
                    expected: "1".into(),
                    got: args.len(),
                }),
            },
            Value::Keyword(name) => match args.as_slice() {
                [subject] | [subject, _] => {
                    let found = subject
                        .as_map()
                        .and_then(|m| Value::get_flexible(m, &MapKey::keyword(name.clone())))
                        .cloned();
                    match found {
                        Some(value) => Ok(value),
                        None => Ok(args.into_iter().nth(1).unwrap_or(Value::Nil)),
                    }
                }
                _ => Err(LispError::Arity {
                    name: format!(":{name}"),
                    expected: "1 or 2".into(),
                    got: args.len(),
                }),
            },
            Value::Map(entries) => match args.as_slice() {
                [key] | [key, _] => {
                    let map_key = MapKey::from_value(key).ok_or_else(|| {
                        LispError::type_mismatch("map lookup", "a scalar key", key)
                    })?;
                    match Value::get_flexible(entries, &map_key).cloned() {
                        Some(value) => Ok(value),
                        None => Ok(args.into_iter().nth(1).unwrap_or(Value::Nil)),
                    }
                }
                _ => Err(LispError::Arity {
                    name: "map lookup".into(),
                    expected: "1 or 2".into(),
                    got: args.len(),
                }),
            },
            Value::Set(items) => match args.as_slice() {
                [candidate] => Ok(if items.contains(candidate) {
                    candidate.clone()
                } else {
                    Value::Nil
                }),
                _ => Err(LispError::Arity {
                    name: "set membership".into(),
                    expected: "1".into(),
                    got: args.len(),
                }),
            },
            other => Err(LispError::type_mismatch("call", "a function", other)),
        }
    }

    /// Dispatches one tool call through the host. Tools take exactly one
    /// map argument; positional arguments are a validation error.
    pub async fn call_tool(&self, name: &str, args: Vec<Value>) -> Result<Value, LispError> {
        let args_map = match args.len() {
            0 => Value::map(ValueMap::new()),
            1 if args[0].as_map().is_some() => args.into_iter().next().expect("one arg"),
            1 => {
                return Err(LispError::ToolValidation {
                    tool: name.to_string(),
                    message: format!(
                        "tools take a single map argument, got {}",
                        args[0].type_name()
                    ),
                })
            }
            got => {
                return Err(LispError::ToolValidation {
                    tool: name.to_string(),
                    message: format!(
                        "tools take a single map argument, got {got} positional arguments"
                    ),
                })
            }
        };

        let made = self.tool_calls_made.fetch_add(1, AtomicOrdering::Relaxed) + 1;
        if let Some(max) = self.max_tool_calls {
            if made > u64::from(max) {
                return Err(LispError::runtime(
                    name,
                    format!("tool call budget of {max} exceeded"),
                ));
            }
        }

        let args_json = args_map.to_json().unwrap_or(serde_json::Value::Null);
        let span = self.trace.as_ref().map(|scope| {
            scope.tracer.span(
                EventKind::ToolStart,
                EventKind::ToolStop,
                Some(&scope.parent_span),
                json!({ "tool": name }),
            )
        });
        let started = Instant::now();
        let outcome = self.tools.dispatch(name, args_map).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        if let Some(span) = span {
            span.finish(json!({ "tool": name, "ok": outcome.is_ok() }));
        }

        match outcome {
            Ok(result) => {
                self.charge_heap(&result)?;
                let result_json = result.to_json().unwrap_or(serde_json::Value::Null);
                self.tool_log
                    .lock()
                    .expect("tool log lock")
                    .push(ToolCallRecord::new(name, args_json, result_json, duration_ms));
                Ok(result)
            }
            Err(DispatchError::Unknown(tool)) => Err(LispError::UnknownTool(tool)),
            Err(DispatchError::CatalogOnly(tool)) => Err(LispError::CatalogTool(tool)),
            Err(DispatchError::InvalidArguments { tool, message }) => {
                Err(LispError::ToolValidation { tool, message })
            }
            Err(DispatchError::Failed { tool, message }) => {
                Err(LispError::ToolFailed { tool, message })
            }
        }
    }
}

fn check_lambda_arity(lambda: &Lambda, got: usize) -> Result<(), LispError> {
    let Pattern::Vector { items, rest, .. } = lambda.params.as_ref() else {
        return Ok(());
    };
    let required = items.len();
    let ok = if rest.is_some() {
        got >= required
    } else {
        got == required
    };
    if ok {
        Ok(())
    } else {
        Err(LispError::Arity {
            name: lambda.name.clone().unwrap_or_else(|| "fn".into()),
            expected: if rest.is_some() {
                format!("at least {required}")
            } else {
                required.to_string()
            },
            got,
        })
    }
}

/// Binds a destructuring pattern against a value. Absent keys use `:or`
/// defaults; present-but-`nil` values do not.
pub fn bind_pattern(
    pattern: &Pattern,
    value: Value,
    out: &mut HashMap<String, Value>,
) -> Result<(), LispError> {
    match pattern {
        Pattern::Sym(name) => {
            out.insert(name.clone(), value);
            Ok(())
        }
        Pattern::Vector {
            items,
            rest,
            as_name,
        } => {
            if let Some(name) = as_name {
                out.insert(name.clone(), value.clone());
            }
            let elements: Vec<Value> = match &value {
                Value::Vector(items) => items.as_ref().clone(),
                Value::Nil => Vec::new(),
                other => {
                    return Err(LispError::type_mismatch(
                        "destructuring",
                        "a vector",
                        other,
                    ))
                }
            };
            for (index, item) in items.iter().enumerate() {
                let element = elements.get(index).cloned().unwrap_or(Value::Nil);
                bind_pattern(item, element, out)?;
            }
            if let Some(rest_pattern) = rest {
                let tail: Vec<Value> = elements.iter().skip(items.len()).cloned().collect();
                bind_pattern(rest_pattern, Value::vector(tail), out)?;
            }
            Ok(())
        }
        Pattern::Map {
            bindings,
            defaults,
            as_name,
        } => {
            if let Some(name) = as_name {
                out.insert(name.clone(), value.clone());
            }
            let empty = ValueMap::new();
            let entries = value.as_map().unwrap_or(&empty);
            for (target, key) in bindings {
                match Value::get_flexible(entries, key) {
                    Some(found) => bind_pattern(target, found.clone(), out)?,
                    None => {
                        let fallback = match target {
                            Pattern::Sym(name) => defaults
                                .iter()
                                .find(|(default_name, _)| default_name == name)
                                .map(|(_, default)| default.clone())
                                .unwrap_or(Value::Nil),
                            _ => Value::Nil,
                        };
                        bind_pattern(target, fallback, out)?;
                    }
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::tools::DispatchError;
    use async_trait::async_trait;

    /// Dispatcher with no tools, for interpreter-only tests.
    pub struct NoTools;

    #[async_trait]
    impl ToolDispatcher for NoTools {
        async fn dispatch(&self, name: &str, _args: Value) -> Result<Value, DispatchError> {
            Err(DispatchError::Unknown(name.to_string()))
        }
    }

    pub fn interp() -> Interp {
        interp_with_ctx(BTreeMap::new())
    }

    pub fn interp_with_ctx(ctx: BTreeMap<String, Value>) -> Interp {
        Interp::new(
            ctx,
            BTreeMap::new(),
            Arc::new(NoTools),
            EvalBudget::default(),
        )
    }

    pub async fn eval_source(interp: &Interp, source: &str) -> Result<Value, LispError> {
        let forms = crate::lisp::reader::read_all(source)?;
        let program = crate::lisp::analyze::analyze_program(&forms)?;
        interp.run(&program).await
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    async fn eval_ok(source: &str) -> Value {
        eval_source(&interp(), source).await.unwrap()
    }

    #[tokio::test]
    async fn test_literals_and_arithmetic() {
        assert_eq!(eval_ok("(+ 1 2 3)").await, Value::Int(6));
        assert_eq!(eval_ok("(* 2 (- 10 6))").await, Value::Int(8));
    }

    #[tokio::test]
    async fn test_let_with_shadowing() {
        assert_eq!(
            eval_ok("(let [x 1 y (+ x 1)] (let [x 10] (+ x y)))").await,
            Value::Int(12)
        );
    }

    #[tokio::test]
    async fn test_fn_and_closures() {
        assert_eq!(
            eval_ok("(let [make (fn [n] (fn [x] (+ x n))) add2 (make 2)] (add2 40))").await,
            Value::Int(42)
        );
    }

    #[tokio::test]
    async fn test_fn_rest_params() {
        assert_eq!(
            eval_ok("((fn [x & more] (count more)) 1 2 3)").await,
            Value::Int(2)
        );
    }

    #[tokio::test]
    async fn test_lambda_arity_error() {
        let err = eval_source(&interp(), "((fn [a b] a) 1)").await.unwrap_err();
        assert!(matches!(err, LispError::Arity { .. }));
    }

    #[tokio::test]
    async fn test_def_persists_to_memory() {
        let interp = interp();
        eval_source(&interp, "(def total 40) (+ total 2)")
            .await
            .unwrap();
        let output = interp.drain_output();
        assert_eq!(output.defs.get("total"), Some(&Value::Int(40)));
    }

    #[tokio::test]
    async fn test_keyword_as_function() {
        assert_eq!(eval_ok("(:id {:id 7})").await, Value::Int(7));
        assert_eq!(eval_ok("(:missing {:id 7} :fallback)").await, Value::keyword("fallback"));
    }

    #[tokio::test]
    async fn test_set_as_membership_predicate() {
        assert_eq!(eval_ok("(#{1 2} 2)").await, Value::Int(2));
        assert_eq!(eval_ok("(#{1 2} 3)").await, Value::Nil);
    }

    #[tokio::test]
    async fn test_ctx_access_and_missing_key() {
        let interp = interp_with_ctx(BTreeMap::from([("x".to_string(), Value::Int(5))]));
        assert_eq!(eval_source(&interp, "(+ ctx/x 1)").await.unwrap(), Value::Int(6));
        assert_eq!(eval_source(&interp, "data/x").await.unwrap(), Value::Int(5));
        assert_eq!(eval_source(&interp, "ctx/absent").await.unwrap(), Value::Nil);
    }

    #[tokio::test]
    async fn test_destructuring_or_defaults_respect_nil() {
        // :or applies only when the key is absent, not when its value is nil.
        assert_eq!(
            eval_ok("(let [{:keys [a] :or {a 1}} {}] a)").await,
            Value::Int(1)
        );
        assert_eq!(
            eval_ok("(let [{:keys [a] :or {a 1}} {:a nil}] a)").await,
            Value::Nil
        );
    }

    #[tokio::test]
    async fn test_unbound_symbol() {
        let err = eval_source(&interp(), "nope").await.unwrap_err();
        assert!(matches!(err, LispError::Unbound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_unknown_tool_call() {
        let err = eval_source(&interp(), "(tool/missing {})").await.unwrap_err();
        assert!(matches!(err, LispError::UnknownTool(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_tool_rejects_positional_args() {
        let err = eval_source(&interp(), "(tool/missing 1 2)").await.unwrap_err();
        assert!(matches!(err, LispError::ToolValidation { .. }));
    }

    #[tokio::test]
    async fn test_iteration_limit_enforced() {
        let interp = Interp::new(
            BTreeMap::new(),
            BTreeMap::new(),
            Arc::new(NoTools),
            EvalBudget {
                iteration_cap: 10,
                ..Default::default()
            },
        );
        let err = eval_source(&interp, "(map (fn [x] x) [1 2 3 4 5 6 7 8 9 10 11 12])")
            .await
            .unwrap_err();
        assert!(matches!(err, LispError::IterationLimit { .. }));
    }

    #[tokio::test]
    async fn test_heap_limit_enforced() {
        let interp = Interp::new(
            BTreeMap::new(),
            BTreeMap::new(),
            Arc::new(NoTools),
            EvalBudget {
                heap_limit: 64,
                ..Default::default()
            },
        );
        let err = eval_source(&interp, "(vec (concat [1 2 3] [4 5 6]))")
            .await
            .unwrap_err();
        assert!(matches!(err, LispError::OutOfMemory { .. }));
    }

    #[tokio::test]
    async fn test_return_signal_escapes() {
        let err = eval_source(&interp(), "(do (return 42) 7)").await.unwrap_err();
        assert!(matches!(err, LispError::Return(Value::Int(42))));
    }
}
