use std::sync::Arc;

use super::reader::{Form, FormKind};
use super::value::{MapKey, Value};
use super::LispError;

/// The core IR the evaluator walks. `when`, `cond`, `and`, `or`, `->`,
/// `->>` and `defn` are gone by the time a program reaches this shape.
#[derive(Debug, Clone)]
pub enum Ir {
    Literal(Value),
    Var(String),
    /// `ctx/<key>` or `data/<key>` — read-only context access.
    Ctx(String),
    If {
        cond: Box<Ir>,
        then: Box<Ir>,
        els: Box<Ir>,
    },
    Do(Vec<Ir>),
    Let {
        bindings: Vec<(Pattern, Ir)>,
        body: Vec<Ir>,
    },
    Fn {
        name: Option<String>,
        /// The whole parameter vector as one pattern, so `& rest` and `:as`
        /// work in parameter lists exactly as they do in `let`.
        params: Arc<Pattern>,
        body: Arc<Vec<Ir>>,
    },
    Call {
        target: Box<Ir>,
        args: Vec<Ir>,
    },
    /// `(tool/<name> …)` — dispatched through the host's tool table.
    ToolCall {
        name: String,
        args: Vec<Ir>,
    },
    /// Top-level `def`; persists into outgoing memory.
    Def {
        name: String,
        expr: Box<Ir>,
    },
    Vector(Vec<Ir>),
    MapLit(Vec<(Ir, Ir)>),
    SetLit(Vec<Ir>),
}

/// A binding target in `let`, `fn` params or `defn` params.
#[derive(Debug, Clone)]
pub enum Pattern {
    Sym(String),
    Vector {
        items: Vec<Pattern>,
        rest: Option<Box<Pattern>>,
        as_name: Option<String>,
    },
    Map {
        /// `(target, source key)` pairs, covering both `{:keys [a]}` and
        /// `{x :field}` spellings.
        bindings: Vec<(Pattern, MapKey)>,
        /// `:or` defaults, applied only when the key is absent.
        defaults: Vec<(String, Value)>,
        as_name: Option<String>,
    },
}

impl Pattern {
    /// All symbol names this pattern introduces.
    pub fn bound_names(&self, out: &mut Vec<String>) {
        match self {
            Pattern::Sym(name) => out.push(name.clone()),
            Pattern::Vector {
                items,
                rest,
                as_name,
            } => {
                for item in items {
                    item.bound_names(out);
                }
                if let Some(rest) = rest {
                    rest.bound_names(out);
                }
                if let Some(name) = as_name {
                    out.push(name.clone());
                }
            }
            Pattern::Map {
                bindings, as_name, ..
            } => {
                for (target, _) in bindings {
                    target.bound_names(out);
                }
                if let Some(name) = as_name {
                    out.push(name.clone());
                }
            }
        }
    }
}

/// Analyzes a whole program (multiple top-level forms).
pub fn analyze_program(forms: &[Form]) -> Result<Vec<Ir>, LispError> {
    let mut analyzer = Analyzer { gensym: 0 };
    forms
        .iter()
        .map(|form| analyzer.analyze(form, true))
        .collect()
}

/// Analyzes one expression (no top-level `def` allowed).
pub fn analyze_expr(form: &Form) -> Result<Ir, LispError> {
    Analyzer { gensym: 0 }.analyze(form, false)
}

struct Analyzer {
    gensym: usize,
}

impl Analyzer {
    fn gensym(&mut self, stem: &str) -> String {
        self.gensym += 1;
        format!("__{stem}-{}", self.gensym)
    }

    fn error(&self, form: &Form, message: impl Into<String>) -> LispError {
        LispError::Analysis {
            message: format!("{} (at {}:{})", message.into(), form.line, form.col),
            form: form.describe(),
        }
    }

    fn analyze(&mut self, form: &Form, top_level: bool) -> Result<Ir, LispError> {
        match &form.kind {
            FormKind::Literal(value) => Ok(Ir::Literal(value.clone())),
            FormKind::Symbol(name) => self.analyze_symbol(form, name),
            FormKind::Vector(items) => Ok(Ir::Vector(
                items
                    .iter()
                    .map(|item| self.analyze(item, false))
                    .collect::<Result<_, _>>()?,
            )),
            FormKind::Set(items) => Ok(Ir::SetLit(
                items
                    .iter()
                    .map(|item| self.analyze(item, false))
                    .collect::<Result<_, _>>()?,
            )),
            FormKind::Map(entries) => Ok(Ir::MapLit(
                entries
                    .iter()
                    .map(|(key, value)| {
                        Ok((self.analyze(key, false)?, self.analyze(value, false)?))
                    })
                    .collect::<Result<_, _>>()?,
            )),
            FormKind::List(items) => self.analyze_list(form, items, top_level),
        }
    }

    fn analyze_symbol(&mut self, form: &Form, name: &str) -> Result<Ir, LispError> {
        if let Some(key) = name.strip_prefix("ctx/").or_else(|| name.strip_prefix("data/")) {
            if key.is_empty() {
                return Err(self.error(form, "empty context key"));
            }
            return Ok(Ir::Ctx(key.to_string()));
        }
        if name.strip_prefix("tool/").is_some() {
            return Err(self.error(form, "tool references can only appear in call position"));
        }
        Ok(Ir::Var(name.to_string()))
    }

    fn analyze_list(
        &mut self,
        form: &Form,
        items: &[Form],
        top_level: bool,
    ) -> Result<Ir, LispError> {
        let Some(head) = items.first() else {
            // () evaluates to an empty vector, like an empty list literal.
            return Ok(Ir::Literal(Value::vector(vec![])));
        };
        let args = &items[1..];

        if let FormKind::Symbol(op) = &head.kind {
            match op.as_str() {
                "def" => return self.analyze_def(form, args, top_level),
                "defn" => return self.analyze_defn(form, args, top_level),
                "fn" => return self.analyze_fn(form, args),
                "let" => return self.analyze_let(form, args),
                "if" => return self.analyze_if(form, args),
                "when" => return self.analyze_when(form, args),
                "cond" => return self.analyze_cond(form, args),
                "do" => {
                    return Ok(Ir::Do(
                        args.iter()
                            .map(|arg| self.analyze(arg, false))
                            .collect::<Result<_, _>>()?,
                    ))
                }
                "and" => return self.analyze_and(args),
                "or" => return self.analyze_or(args),
                "->" => return self.analyze_thread(form, args, ThreadKind::First),
                "->>" => return self.analyze_thread(form, args, ThreadKind::Last),
                "quote" => {
                    let [quoted] = args else {
                        return Err(self.error(form, "quote expects one form"));
                    };
                    return Ok(Ir::Literal(quoted.to_quoted_value()?));
                }
                _ => {
                    if let Some(tool) = op.strip_prefix("tool/") {
                        if tool.is_empty() {
                            return Err(self.error(form, "empty tool name"));
                        }
                        return Ok(Ir::ToolCall {
                            name: tool.to_string(),
                            args: args
                                .iter()
                                .map(|arg| self.analyze(arg, false))
                                .collect::<Result<_, _>>()?,
                        });
                    }
                }
            }
        }

        Ok(Ir::Call {
            target: Box::new(self.analyze(head, false)?),
            args: args
                .iter()
                .map(|arg| self.analyze(arg, false))
                .collect::<Result<_, _>>()?,
        })
    }

    fn analyze_def(
        &mut self,
        form: &Form,
        args: &[Form],
        top_level: bool,
    ) -> Result<Ir, LispError> {
        if !top_level {
            return Err(self.error(form, "def is only allowed at the top level"));
        }
        let [name_form, expr] = args else {
            return Err(self.error(form, "def expects a name and a value"));
        };
        let FormKind::Symbol(name) = &name_form.kind else {
            return Err(self.error(name_form, "def name must be a symbol"));
        };
        Ok(Ir::Def {
            name: name.clone(),
            expr: Box::new(self.analyze(expr, false)?),
        })
    }

    fn analyze_defn(
        &mut self,
        form: &Form,
        args: &[Form],
        top_level: bool,
    ) -> Result<Ir, LispError> {
        if !top_level {
            return Err(self.error(form, "defn is only allowed at the top level"));
        }
        let Some((name_form, rest)) = args.split_first() else {
            return Err(self.error(form, "defn expects a name, params and a body"));
        };
        let FormKind::Symbol(name) = &name_form.kind else {
            return Err(self.error(name_form, "defn name must be a symbol"));
        };
        // An optional docstring before the params vector is accepted and
        // dropped.
        let rest = match rest.first() {
            Some(Form {
                kind: FormKind::Literal(Value::Str(_)),
                ..
            }) => &rest[1..],
            _ => rest,
        };
        let lambda = self.analyze_fn_tail(form, Some(name.clone()), rest)?;
        Ok(Ir::Def {
            name: name.clone(),
            expr: Box::new(lambda),
        })
    }

    fn analyze_fn(&mut self, form: &Form, args: &[Form]) -> Result<Ir, LispError> {
        match args.first() {
            Some(Form {
                kind: FormKind::Symbol(name),
                ..
            }) => {
                let name = name.clone();
                self.analyze_fn_tail(form, Some(name), &args[1..])
            }
            _ => self.analyze_fn_tail(form, None, args),
        }
    }

    fn analyze_fn_tail(
        &mut self,
        form: &Form,
        name: Option<String>,
        args: &[Form],
    ) -> Result<Ir, LispError> {
        let Some((params_form, body)) = args.split_first() else {
            return Err(self.error(form, "fn expects a params vector and a body"));
        };
        if !matches!(params_form.kind, FormKind::Vector(_)) {
            return Err(self.error(params_form, "fn params must be a vector"));
        }
        let params = self.analyze_pattern(params_form)?;
        if body.is_empty() {
            return Err(self.error(form, "fn body cannot be empty"));
        }
        let body = body
            .iter()
            .map(|expr| self.analyze(expr, false))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Ir::Fn {
            name,
            params: Arc::new(params),
            body: Arc::new(body),
        })
    }

    fn analyze_let(&mut self, form: &Form, args: &[Form]) -> Result<Ir, LispError> {
        let Some((bindings_form, body)) = args.split_first() else {
            return Err(self.error(form, "let expects a bindings vector and a body"));
        };
        let FormKind::Vector(binding_forms) = &bindings_form.kind else {
            return Err(self.error(bindings_form, "let bindings must be a vector"));
        };
        if binding_forms.len() % 2 != 0 {
            return Err(self.error(
                bindings_form,
                "let bindings must contain an even number of forms",
            ));
        }
        let mut bindings = Vec::with_capacity(binding_forms.len() / 2);
        for pair in binding_forms.chunks(2) {
            let pattern = self.analyze_pattern(&pair[0])?;
            let expr = self.analyze(&pair[1], false)?;
            bindings.push((pattern, expr));
        }
        if body.is_empty() {
            return Err(self.error(form, "let body cannot be empty"));
        }
        let body = body
            .iter()
            .map(|expr| self.analyze(expr, false))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Ir::Let { bindings, body })
    }

    fn analyze_if(&mut self, form: &Form, args: &[Form]) -> Result<Ir, LispError> {
        match args {
            [cond, then] => Ok(Ir::If {
                cond: Box::new(self.analyze(cond, false)?),
                then: Box::new(self.analyze(then, false)?),
                els: Box::new(Ir::Literal(Value::Nil)),
            }),
            [cond, then, els] => Ok(Ir::If {
                cond: Box::new(self.analyze(cond, false)?),
                then: Box::new(self.analyze(then, false)?),
                els: Box::new(self.analyze(els, false)?),
            }),
            _ => Err(self.error(form, "if expects a condition, a then and an optional else")),
        }
    }

    fn analyze_when(&mut self, form: &Form, args: &[Form]) -> Result<Ir, LispError> {
        let Some((cond, body)) = args.split_first() else {
            return Err(self.error(form, "when expects a condition and a body"));
        };
        Ok(Ir::If {
            cond: Box::new(self.analyze(cond, false)?),
            then: Box::new(Ir::Do(
                body.iter()
                    .map(|expr| self.analyze(expr, false))
                    .collect::<Result<_, _>>()?,
            )),
            els: Box::new(Ir::Literal(Value::Nil)),
        })
    }

    fn analyze_cond(&mut self, form: &Form, args: &[Form]) -> Result<Ir, LispError> {
        if args.len() % 2 != 0 {
            return Err(self.error(form, "cond expects an even number of forms"));
        }
        let mut result = Ir::Literal(Value::Nil);
        for pair in args.chunks(2).rev() {
            let is_else = matches!(&pair[0].kind, FormKind::Literal(Value::Keyword(k)) if k == "else");
            let branch = self.analyze(&pair[1], false)?;
            if is_else {
                result = branch;
            } else {
                result = Ir::If {
                    cond: Box::new(self.analyze(&pair[0], false)?),
                    then: Box::new(branch),
                    els: Box::new(result),
                };
            }
        }
        Ok(result)
    }

    /// `(and a b c)` keeps Clojure semantics: returns the first falsey value
    /// or the last value. Lowered with a synthetic let so each form
    /// evaluates once.
    fn analyze_and(&mut self, args: &[Form]) -> Result<Ir, LispError> {
        match args {
            [] => Ok(Ir::Literal(Value::Bool(true))),
            [only] => self.analyze(only, false),
            [head, rest @ ..] => {
                let tmp = self.gensym("and");
                Ok(Ir::Let {
                    bindings: vec![(Pattern::Sym(tmp.clone()), self.analyze(head, false)?)],
                    body: vec![Ir::If {
                        cond: Box::new(Ir::Var(tmp.clone())),
                        then: Box::new(self.analyze_and(rest)?),
                        els: Box::new(Ir::Var(tmp)),
                    }],
                })
            }
        }
    }

    fn analyze_or(&mut self, args: &[Form]) -> Result<Ir, LispError> {
        match args {
            [] => Ok(Ir::Literal(Value::Nil)),
            [only] => self.analyze(only, false),
            [head, rest @ ..] => {
                let tmp = self.gensym("or");
                Ok(Ir::Let {
                    bindings: vec![(Pattern::Sym(tmp.clone()), self.analyze(head, false)?)],
                    body: vec![Ir::If {
                        cond: Box::new(Ir::Var(tmp.clone())),
                        then: Box::new(Ir::Var(tmp)),
                        els: Box::new(self.analyze_or(rest)?),
                    }],
                })
            }
        }
    }

    fn analyze_thread(
        &mut self,
        form: &Form,
        args: &[Form],
        kind: ThreadKind,
    ) -> Result<Ir, LispError> {
        let Some((seed, steps)) = args.split_first() else {
            return Err(self.error(form, "threading expects an initial value"));
        };
        let mut acc = seed.clone();
        for step in steps {
            acc = match &step.kind {
                FormKind::List(call) if !call.is_empty() => {
                    let mut threaded = call.clone();
                    match kind {
                        ThreadKind::First => threaded.insert(1, acc),
                        ThreadKind::Last => threaded.push(acc),
                    }
                    Form {
                        kind: FormKind::List(threaded),
                        line: step.line,
                        col: step.col,
                    }
                }
                FormKind::Symbol(_) => Form {
                    kind: FormKind::List(vec![step.clone(), acc]),
                    line: step.line,
                    col: step.col,
                },
                _ => return Err(self.error(step, "threading step must be a call or a symbol")),
            };
        }
        self.analyze(&acc, false)
    }

    fn analyze_pattern(&mut self, form: &Form) -> Result<Pattern, LispError> {
        match &form.kind {
            FormKind::Symbol(name) => {
                if name.contains('/') {
                    return Err(self.error(form, "binding names cannot be namespaced"));
                }
                Ok(Pattern::Sym(name.clone()))
            }
            FormKind::Vector(items) => {
                let mut parsed = Vec::new();
                let mut rest = None;
                let mut as_name = None;
                let mut iter = items.iter().peekable();
                while let Some(item) = iter.next() {
                    match &item.kind {
                        FormKind::Symbol(s) if s == "&" => {
                            let rest_form = iter
                                .next()
                                .ok_or_else(|| self.error(form, "& must be followed by a binding"))?;
                            rest = Some(Box::new(self.analyze_pattern(rest_form)?));
                        }
                        FormKind::Literal(Value::Keyword(k)) if k == "as" => {
                            let name_form = iter
                                .next()
                                .ok_or_else(|| self.error(form, ":as must be followed by a name"))?;
                            let FormKind::Symbol(name) = &name_form.kind else {
                                return Err(self.error(name_form, ":as name must be a symbol"));
                            };
                            as_name = Some(name.clone());
                        }
                        _ => parsed.push(self.analyze_pattern(item)?),
                    }
                }
                Ok(Pattern::Vector {
                    items: parsed,
                    rest,
                    as_name,
                })
            }
            FormKind::Map(entries) => self.analyze_map_pattern(form, entries),
            _ => Err(self.error(form, "unsupported binding form")),
        }
    }

    fn analyze_map_pattern(
        &mut self,
        form: &Form,
        entries: &[(Form, Form)],
    ) -> Result<Pattern, LispError> {
        let mut bindings = Vec::new();
        let mut defaults = Vec::new();
        let mut as_name = None;

        for (left, right) in entries {
            match &left.kind {
                FormKind::Literal(Value::Keyword(k)) if k == "keys" => {
                    let FormKind::Vector(names) = &right.kind else {
                        return Err(self.error(right, ":keys expects a vector of symbols"));
                    };
                    for name_form in names {
                        let FormKind::Symbol(name) = &name_form.kind else {
                            return Err(self.error(name_form, ":keys entries must be symbols"));
                        };
                        bindings.push((Pattern::Sym(name.clone()), MapKey::keyword(name.clone())));
                    }
                }
                FormKind::Literal(Value::Keyword(k)) if k == "or" => {
                    let FormKind::Map(default_entries) = &right.kind else {
                        return Err(self.error(right, ":or expects a map of defaults"));
                    };
                    for (name_form, default_form) in default_entries {
                        let FormKind::Symbol(name) = &name_form.kind else {
                            return Err(self.error(name_form, ":or keys must be symbols"));
                        };
                        let FormKind::Literal(default) = &default_form.kind else {
                            return Err(self.error(default_form, ":or defaults must be literals"));
                        };
                        defaults.push((name.clone(), default.clone()));
                    }
                }
                FormKind::Literal(Value::Keyword(k)) if k == "as" => {
                    let FormKind::Symbol(name) = &right.kind else {
                        return Err(self.error(right, ":as name must be a symbol"));
                    };
                    as_name = Some(name.clone());
                }
                _ => {
                    // `{x :field}` — left is the target, right is the key.
                    let target = self.analyze_pattern(left)?;
                    let FormKind::Literal(key_literal) = &right.kind else {
                        return Err(self.error(right, "map destructuring keys must be literals"));
                    };
                    let key = MapKey::from_value(key_literal)
                        .ok_or_else(|| self.error(right, "unsupported map destructuring key"))?;
                    bindings.push((target, key));
                }
            }
        }

        if bindings.is_empty() && as_name.is_none() {
            return Err(self.error(form, "empty map destructuring"));
        }
        Ok(Pattern::Map {
            bindings,
            defaults,
            as_name,
        })
    }
}

#[derive(Clone, Copy)]
enum ThreadKind {
    First,
    Last,
}
