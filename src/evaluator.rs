use crate::Error;
use crate::{MAX_EVAL_DEPTH, with_stack_headroom};
use crate::ast::{Closure, MapEntries, Value};
use crate::builtinops::{Arity, find_special_form, get_builtin_ops, is_special_form};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

pub mod intooperation;
pub mod quasiquote;

pub use intooperation::{IntoOperation, IntoVariadicOperation, NumIter, OperationFn, ValueIter};
pub use quasiquote::quasiquote_expand;

/// Lexical environment: one frame of bindings plus a shared link to the
/// enclosing frame.
///
/// Cloning an `Environment` is cheap and yields another handle to the same
/// frame, so closures and active evaluations can all keep a frame alive.
#[derive(Clone, Default)]
pub struct Environment(Rc<Frame>);

#[derive(Default)]
struct Frame {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<Environment>,
}

impl Environment {
    /// A root environment with no bindings and no parent
    pub fn new() -> Self {
        Environment::default()
    }

    pub fn with_parent(parent: &Environment) -> Self {
        Environment(Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        }))
    }

    /// Create a child of `outer` binding `params` to `args` positionally.
    ///
    /// With a `rest` collector, extra arguments are gathered into a list bound
    /// to it (an empty list when there are none).
    pub fn bind(
        outer: &Environment,
        params: &[String],
        rest: Option<&str>,
        args: Vec<Value>,
    ) -> Result<Self, Error> {
        let expected = match rest {
            Some(_) => Arity::AtLeast(params.len()),
            None => Arity::Exact(params.len()),
        };
        if !expected.accepts(args.len()) {
            return Err(Error::BindingArityMismatch {
                expected,
                got: args.len(),
            });
        }

        let env = Environment::with_parent(outer);
        let mut args = args.into_iter();
        for param in params {
            if let Some(arg) = args.next() {
                env.set(param.clone(), arg);
            }
        }
        if let Some(rest) = rest {
            env.set(rest, Value::list(args.collect()));
        }
        Ok(env)
    }

    /// Insert or overwrite a binding in this frame only
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.0.bindings.borrow_mut().insert(name.into(), value);
    }

    /// The nearest frame (this one or an ancestor) that defines `name`
    pub fn find(&self, name: &str) -> Result<Environment, Error> {
        let mut frame = self;
        loop {
            if frame.0.bindings.borrow().contains_key(name) {
                return Ok(frame.clone());
            }
            match &frame.0.parent {
                Some(parent) => frame = parent,
                None => return Err(Error::NameNotFound(name.to_owned())),
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<Value, Error> {
        self.get_if(name)
            .ok_or_else(|| Error::NameNotFound(name.to_owned()))
    }

    /// Like [`Environment::get`] but reports absence instead of failing
    pub fn get_if(&self, name: &str) -> Option<Value> {
        let mut frame = self;
        loop {
            if let Some(value) = frame.0.bindings.borrow().get(name) {
                return Some(value.clone());
            }
            frame = frame.0.parent.as_ref()?;
        }
    }

    /// Register a native function working directly on the argument slice.
    ///
    /// # Example
    /// ```
    /// use tailisp::evaluator::{create_global_env, eval};
    /// use tailisp::ast::{Value, sym};
    /// use tailisp::Error;
    ///
    /// let env = create_global_env();
    /// env.register_builtin_function("arg-count", |args: &[Value]| -> Result<Value, Error> {
    ///     Ok(Value::Integer(args.len() as i64))
    /// });
    /// let call = Value::list(vec![sym("arg-count"), Value::Nil, Value::True]);
    /// assert_eq!(eval(&call, &env), Ok(Value::Integer(2)));
    /// ```
    pub fn register_builtin_function<F>(&self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, Error> + 'static,
    {
        let wrapped: Rc<OperationFn> = Rc::new(move |args: Vec<Value>| func(&args));
        self.set(name, Value::builtin(name, wrapped));
    }

    /// Register a strongly-typed Rust function as a builtin using automatic
    /// argument extraction and result conversion.
    ///
    /// ```rust,ignore
    /// fn add(a: i64, b: i64) -> i64 { a + b }
    /// env.register_builtin_operation::<_, (i64, i64)>("add", add);
    /// ```
    ///
    /// Supported parameter types: `i64`, `&str`, `Value`, and the sequence
    /// iterators `ValueIter<'_>` and `NumIter<'_>` (which also accept `nil`
    /// as the empty sequence). Supported return types are anything
    /// `Into<Value>` and `Result<R, Error>` for such `R`.
    ///
    /// Arity is enforced automatically and conversion failures yield
    /// `TypeError`.
    pub fn register_builtin_operation<F, Args>(&self, name: &str, func: F)
    where
        F: IntoOperation<Args> + 'static,
    {
        self.set(name, Value::builtin(name, func.into_operation()));
    }

    /// Register a builtin whose last parameter collects the remaining
    /// arguments through `ValueIter<'_>` or `NumIter<'_>`.
    ///
    /// The provided [`Arity`] validates the total argument count at call
    /// time, since it is not always derivable from the Rust signature.
    pub fn register_variadic_builtin_operation<F, Args>(&self, name: &str, arity: Arity, func: F)
    where
        F: IntoVariadicOperation<Args> + 'static,
    {
        let inner = func.into_variadic_operation();
        let wrapped: Rc<OperationFn> = Rc::new(move |args: Vec<Value>| {
            arity.validate(args.len())?;
            inner(args)
        });
        self.set(name, Value::builtin(name, wrapped));
    }

    /// Move the values of this frame, and of every ancestor frame reached
    /// only through it, into `out`
    pub(crate) fn take_owned_bindings(&mut self, out: &mut Vec<Value>) {
        let mut parent = self.take_frame(out);
        while let Some(mut env) = parent {
            parent = env.take_frame(out);
        }
    }

    fn take_frame(&mut self, out: &mut Vec<Value>) -> Option<Environment> {
        let frame = Rc::get_mut(&mut self.0)?;
        out.extend(frame.bindings.get_mut().drain().map(|(_, value)| value));
        frame.parent.take()
    }

    /// Get all bindings visible from this environment
    /// Returns a Vec of (name, value) pairs sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings = HashMap::new();

        // Parent bindings first so local ones override them
        if let Some(parent) = &self.0.parent {
            for (name, value) in parent.get_all_bindings() {
                bindings.insert(name, value);
            }
        }

        for (name, value) in self.0.bindings.borrow().iter() {
            bindings.insert(name.clone(), value.clone());
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Bindings are not printed: closures stored in them refer back to frames.
        let mut names: Vec<String> = self.0.bindings.borrow().keys().cloned().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("names", &names)
            .field("has_parent", &self.0.parent.is_some())
            .finish()
    }
}

/// Outcome of one special form: a final value, or the next expression and
/// environment for the evaluator loop to continue with (tail position).
pub enum Step {
    Return(Value),
    Continue(Value, Environment),
}

thread_local! {
    /// Nested (non-tail) evaluations currently active on this thread
    static EVAL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// One level of evaluation depth, released when dropped (also on error)
struct DepthGuard;

impl DepthGuard {
    fn enter() -> Result<Self, Error> {
        EVAL_DEPTH.with(|depth| {
            let current = depth.get();
            if current >= MAX_EVAL_DEPTH {
                return Err(Error::EvalError(format!(
                    "Evaluation depth limit exceeded (max: {MAX_EVAL_DEPTH})"
                )));
            }
            depth.set(current + 1);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        EVAL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Evaluate an expression (public API)
pub fn eval(expr: &Value, env: &Environment) -> Result<Value, Error> {
    eval_with_depth_tracking(expr, env)
}

/// Apply a function value to already evaluated arguments
///
/// Closure bodies count against the same depth limit as the evaluation
/// that called into the builtin, so recursion through `apply`, `map` or
/// `swap!` is bounded too.
pub fn apply(func: &Value, args: Vec<Value>) -> Result<Value, Error> {
    match func {
        Value::BuiltinFunction { func, .. } => func(args),
        Value::Function(closure) => {
            let env = closure.bind_arguments(args)?;
            eval_with_depth_tracking(&closure.body, &env)
        }
        other => Err(Error::NotCallable(other.to_string())),
    }
}

/// Expand macro calls at the head of `expr` until it is no longer one
pub fn macroexpand(mut expr: Value, env: &Environment) -> Result<Value, Error> {
    while let Some((mac, args)) = macro_call(&expr, env) {
        let expanded = apply(&mac, args)?;
        tracing::trace!(from = %expr, to = %expanded, "macro expanded");
        expr = expanded;
    }
    Ok(expr)
}

/// The evaluator loop.
///
/// Tail positions (special forms returning [`Step::Continue`] and closure
/// calls) replace `expr`/`env` and go around the loop again; only nested,
/// non-tail evaluations recurse and count against [`MAX_EVAL_DEPTH`].
fn eval_with_depth_tracking(expr: &Value, env: &Environment) -> Result<Value, Error> {
    let _depth = DepthGuard::enter()?;
    with_stack_headroom(|| eval_loop(expr, env))
}

fn eval_loop(expr: &Value, env: &Environment) -> Result<Value, Error> {
    let mut expr = macroexpand(expr.clone(), env)?;
    let mut env = env.clone();

    loop {
        let Value::List(elements) = &expr else {
            return eval_ast(&expr, &env);
        };
        let Some((head, args)) = elements.split_first() else {
            return Ok(expr.clone());
        };

        if let Value::Symbol(name) = head
            && let Some(form) = find_special_form(name)
        {
            if !form.arity.accepts(args.len()) {
                return Err(Error::SpecialFormArityError {
                    form: form.id.to_owned(),
                    expected: form.arity,
                    got: args.len(),
                });
            }
            match (form.handler)(args, &env)? {
                Step::Return(value) => return Ok(value),
                Step::Continue(next_expr, next_env) => {
                    env = next_env;
                    expr = macroexpand(next_expr, &env)?;
                    continue;
                }
            }
        }

        let func = eval_with_depth_tracking(head, &env)?;
        let args = eval_args(args, &env)?;
        match &func {
            Value::BuiltinFunction { func, .. } => {
                return func(args).map_err(|err| with_call_context(err, &expr));
            }
            Value::Function(closure) => {
                env = closure.bind_arguments(args)?;
                expr = macroexpand(closure.body.clone(), &env)?;
            }
            other => return Err(Error::NotCallable(other.to_string())),
        }
    }
}

/// Attach the printed call to arity errors raised by builtins
fn with_call_context(err: Error, call: &Value) -> Error {
    match err {
        Error::ArityError {
            expected,
            got,
            expression: None,
        } => Error::arity_error_with_expr(expected, got, call.to_string()),
        other => other,
    }
}

/// Structural evaluation of everything that is not a call
fn eval_ast(expr: &Value, env: &Environment) -> Result<Value, Error> {
    match expr {
        Value::Symbol(name) => env.get(name),
        Value::Vector(items) => Ok(Value::vector(eval_args(items, env)?)),
        Value::HashMap(entries) => {
            let mut evaluated = MapEntries::new();
            for (key, item) in entries.iter() {
                evaluated.insert(key.clone(), eval_with_depth_tracking(item, env)?);
            }
            Ok(Value::hash_map(evaluated))
        }
        // Only the empty list gets here; it evaluates to itself
        Value::List(_)
        | Value::Nil
        | Value::True
        | Value::False
        | Value::Integer(_)
        | Value::Str(_)
        | Value::Atom(_)
        | Value::BuiltinFunction { .. }
        | Value::Function(_) => Ok(expr.clone()),
    }
}

/// Evaluate argument expressions left to right
fn eval_args(args: &[Value], env: &Environment) -> Result<Vec<Value>, Error> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval_with_depth_tracking(arg, env)?);
    }
    Ok(values)
}

/// The macro function and unevaluated arguments if `expr` is a macro call
fn macro_call(expr: &Value, env: &Environment) -> Option<(Value, Vec<Value>)> {
    let Value::List(items) = expr else {
        return None;
    };
    let (Value::Symbol(name), args) = items.split_first()? else {
        return None;
    };
    // Special forms cannot be shadowed, not even by macros
    if is_special_form(name) {
        return None;
    }
    let mac = env.get_if(name).filter(Value::is_macro)?;
    Some((mac, args.to_vec()))
}

fn special_form_arity(form: &str, expected: Arity, got: usize) -> Error {
    Error::SpecialFormArityError {
        form: form.to_owned(),
        expected,
        got,
    }
}

/// Evaluate def! special form
pub(crate) fn eval_def(args: &[Value], env: &Environment) -> Result<Step, Error> {
    match args {
        [Value::Symbol(name), expr] => {
            let value = eval_with_depth_tracking(expr, env)?;
            tracing::debug!(%name, "def!");
            env.set(name.clone(), value.clone());
            Ok(Step::Return(value))
        }
        [other, _] => Err(Error::MalformedBinding(format!(
            "def! requires a symbol, got {}",
            other.type_name()
        ))),
        _ => Err(special_form_arity("def!", Arity::Exact(2), args.len())),
    }
}

/// Evaluate let* special form
///
/// Each value is evaluated in the child environment as it grows, so later
/// bindings see earlier ones.
pub(crate) fn eval_let(args: &[Value], env: &Environment) -> Result<Step, Error> {
    let [bindings, body] = args else {
        return Err(special_form_arity("let*", Arity::Exact(2), args.len()));
    };
    let Some(pairs) = bindings.as_sequence() else {
        return Err(Error::MalformedBinding(format!(
            "let* bindings must be a list or vector, got {}",
            bindings.type_name()
        )));
    };
    if pairs.len() % 2 != 0 {
        return Err(Error::MalformedBinding(
            "let* requires an even number of binding forms".to_owned(),
        ));
    }

    let child = Environment::with_parent(env);
    for pair in pairs.chunks_exact(2) {
        let Value::Symbol(name) = &pair[0] else {
            return Err(Error::MalformedBinding(format!(
                "let* binding names must be symbols, got {}",
                pair[0].type_name()
            )));
        };
        let value = eval_with_depth_tracking(&pair[1], &child)?;
        child.set(name.clone(), value);
    }
    Ok(Step::Continue(body.clone(), child))
}

/// Evaluate do special form
pub(crate) fn eval_do(args: &[Value], env: &Environment) -> Result<Step, Error> {
    let Some((last, init)) = args.split_last() else {
        return Ok(Step::Return(Value::Nil));
    };
    for expr in init {
        eval_with_depth_tracking(expr, env)?;
    }
    Ok(Step::Continue(last.clone(), env.clone()))
}

/// Evaluate if special form
pub(crate) fn eval_if(args: &[Value], env: &Environment) -> Result<Step, Error> {
    let (condition_expr, then_expr, else_expr) = match args {
        [c, t] => (c, t, None),
        [c, t, e] => (c, t, Some(e)),
        _ => return Err(special_form_arity("if", Arity::Range(2, 3), args.len())),
    };
    let condition = eval_with_depth_tracking(condition_expr, env)?;
    if condition.is_truthy() {
        Ok(Step::Continue(then_expr.clone(), env.clone()))
    } else {
        match else_expr {
            Some(else_expr) => Ok(Step::Continue(else_expr.clone(), env.clone())),
            None => Ok(Step::Return(Value::Nil)),
        }
    }
}

/// Evaluate fn* special form
pub(crate) fn eval_fn(args: &[Value], env: &Environment) -> Result<Step, Error> {
    let [param_list, body] = args else {
        return Err(special_form_arity("fn*", Arity::Exact(2), args.len()));
    };
    let Some(param_list) = param_list.as_sequence() else {
        return Err(Error::MalformedBinding(format!(
            "fn* parameters must be a list or vector, got {}",
            param_list.type_name()
        )));
    };
    let (params, rest) = parse_params(param_list)?;

    Ok(Step::Return(Value::Function(Rc::new(Closure {
        params,
        rest,
        body: body.clone(),
        env: env.clone(),
        is_macro: false,
    }))))
}

/// Split a parameter list into positional names and the optional `&` collector
fn parse_params(param_list: &[Value]) -> Result<(Vec<String>, Option<String>), Error> {
    let mut params: Vec<String> = Vec::new();
    let mut iter = param_list.iter();

    while let Some(param) = iter.next() {
        match param {
            Value::Symbol(name) if name == "&" => {
                let rest = match (iter.next(), iter.next()) {
                    (Some(Value::Symbol(rest)), None) if rest != "&" => rest.clone(),
                    _ => {
                        return Err(Error::MalformedBinding(
                            "'&' must be followed by exactly one parameter name".to_owned(),
                        ));
                    }
                };
                if params.contains(&rest) {
                    return Err(Error::MalformedBinding(format!(
                        "Duplicate parameter name: {rest}"
                    )));
                }
                return Ok((params, Some(rest)));
            }
            Value::Symbol(name) => {
                if params.contains(name) {
                    return Err(Error::MalformedBinding(format!(
                        "Duplicate parameter name: {name}"
                    )));
                }
                params.push(name.clone());
            }
            other => {
                return Err(Error::MalformedBinding(format!(
                    "fn* parameters must be symbols, got {}",
                    other.type_name()
                )));
            }
        }
    }

    Ok((params, None))
}

/// Evaluate quote special form
pub(crate) fn eval_quote(args: &[Value], _env: &Environment) -> Result<Step, Error> {
    match args {
        [expr] => Ok(Step::Return(expr.clone())),
        _ => Err(special_form_arity("quote", Arity::Exact(1), args.len())),
    }
}

/// Evaluate quasiquote special form
pub(crate) fn eval_quasiquote(args: &[Value], env: &Environment) -> Result<Step, Error> {
    match args {
        [expr] => Ok(Step::Continue(quasiquote_expand(expr), env.clone())),
        _ => Err(special_form_arity("quasiquote", Arity::Exact(1), args.len())),
    }
}

/// Evaluate defmacro! special form
pub(crate) fn eval_defmacro(args: &[Value], env: &Environment) -> Result<Step, Error> {
    match args {
        [Value::Symbol(name), expr] => {
            let value = eval_with_depth_tracking(expr, env)?.to_macro()?;
            tracing::debug!(%name, "defmacro!");
            env.set(name.clone(), value.clone());
            Ok(Step::Return(value))
        }
        [other, _] => Err(Error::MalformedBinding(format!(
            "defmacro! requires a symbol, got {}",
            other.type_name()
        ))),
        _ => Err(special_form_arity("defmacro!", Arity::Exact(2), args.len())),
    }
}

/// Evaluate macroexpand special form
pub(crate) fn eval_macroexpand(args: &[Value], env: &Environment) -> Result<Step, Error> {
    match args {
        [expr] => Ok(Step::Return(macroexpand(expr.clone(), env)?)),
        _ => Err(special_form_arity("macroexpand", Arity::Exact(1), args.len())),
    }
}

/// Evaluate try* special form: `(try* expr)` or `(try* expr (catch* name handler))`
pub(crate) fn eval_try(args: &[Value], env: &Environment) -> Result<Step, Error> {
    match args {
        [body] => Ok(Step::Continue(body.clone(), env.clone())),
        [body, handler] => {
            let (name, handler_body) = parse_catch(handler)?;
            match eval_with_depth_tracking(body, env) {
                Ok(value) => Ok(Step::Return(value)),
                Err(err) => {
                    tracing::debug!(error = %err, "caught by try*");
                    let child = Environment::with_parent(env);
                    child.set(name, err.into_thrown_value());
                    Ok(Step::Continue(handler_body, child))
                }
            }
        }
        _ => Err(special_form_arity("try*", Arity::Range(1, 2), args.len())),
    }
}

fn parse_catch(handler: &Value) -> Result<(String, Value), Error> {
    if let Value::List(items) = handler
        && let [Value::Symbol(head), Value::Symbol(name), body] = items.as_slice()
        && head == "catch*"
    {
        return Ok((name.clone(), body.clone()));
    }
    Err(Error::MalformedBinding(
        "try* handler must have the form (catch* symbol body)".to_owned(),
    ))
}

/// Create a root environment with the builtin library installed
pub fn create_global_env() -> Environment {
    let env = Environment::new();
    for builtin_op in get_builtin_ops() {
        env.set(builtin_op.id, builtin_op.into_value());
    }
    env
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod environment_tests {
    use super::*;
    use crate::ast::{sym, val};

    #[test]
    fn test_set_shadows_without_touching_outer() {
        let outer = Environment::new();
        outer.set("x", val(1));
        let inner = Environment::with_parent(&outer);
        inner.set("x", val(2));

        assert_eq!(inner.get("x").unwrap(), val(2));
        assert_eq!(outer.get("x").unwrap(), val(1));
    }

    #[test]
    fn test_find_returns_defining_frame() {
        let outer = Environment::new();
        outer.set("x", val(1));
        let inner = Environment::with_parent(&outer);
        inner.set("y", val(2));

        assert_eq!(inner.find("x").unwrap(), outer);
        assert_eq!(inner.find("y").unwrap(), inner);
        assert_eq!(
            inner.find("z").unwrap_err(),
            Error::NameNotFound("z".to_owned())
        );
    }

    #[test]
    fn test_get_if_reports_absence() {
        let env = Environment::new();
        assert_eq!(env.get_if("missing"), None);
        assert!(matches!(env.get("missing"), Err(Error::NameNotFound(_))));
    }

    #[test]
    fn test_bind_positional_and_variadic() {
        let root = Environment::new();
        let params = vec!["a".to_owned(), "b".to_owned()];

        let env = Environment::bind(&root, &params, None, vec![val(1), val(2)]).unwrap();
        assert_eq!(env.get("a").unwrap(), val(1));
        assert_eq!(env.get("b").unwrap(), val(2));

        let err = Environment::bind(&root, &params, None, vec![val(1)]).unwrap_err();
        assert_eq!(
            err,
            Error::BindingArityMismatch {
                expected: Arity::Exact(2),
                got: 1
            }
        );

        let env = Environment::bind(&root, &params[..1], Some("rest"), vec![val(1), val(2), val(3)])
            .unwrap();
        assert_eq!(env.get("rest").unwrap(), val([2, 3]));

        let env = Environment::bind(&root, &params[..1], Some("rest"), vec![val(1)]).unwrap();
        assert_eq!(env.get("rest").unwrap(), Value::list(vec![]));

        let err = Environment::bind(&root, &params, Some("rest"), vec![val(1)]).unwrap_err();
        assert!(matches!(
            err,
            Error::BindingArityMismatch {
                expected: Arity::AtLeast(2),
                got: 1
            }
        ));
    }

    #[test]
    fn test_self_evaluating_values_without_reader() {
        let env = create_global_env();
        for value in [
            Value::Nil,
            Value::True,
            Value::False,
            val(5),
            val("s"),
            Value::atom(val(1)),
        ] {
            assert_eq!(eval(&value, &env).unwrap(), value);
        }
        let plus = env.get("+").unwrap();
        assert_eq!(eval(&plus, &env).unwrap(), plus);
        assert_eq!(
            eval(&sym("nope"), &env).unwrap_err(),
            Error::NameNotFound("nope".to_owned())
        );
    }

    #[test]
    fn test_get_all_bindings_sorted_and_shadowed() {
        let outer = Environment::new();
        outer.set("b", val(1));
        outer.set("a", val(1));
        let inner = Environment::with_parent(&outer);
        inner.set("b", val(2));

        let bindings = inner.get_all_bindings();
        assert_eq!(
            bindings,
            vec![("a".to_owned(), val(1)), ("b".to_owned(), val(2))]
        );
    }
}
