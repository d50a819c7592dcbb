//! Built-in operations: the core function library and the special form table.
//!
//! ## Functions vs Special Forms
//!
//! - **Functions**: Evaluate all arguments before application (e.g., `+`, `cons`, `swap!`)
//! - **Special Forms**: Control evaluation of arguments (e.g., `if`, `let*`, `try*`)
//!
//! Special forms live in a static table consulted by the evaluator before any
//! environment lookup, so their names cannot be shadowed. Functions are
//! installed into the root environment by `create_global_env` and can be
//! rebound like any other name.
//!
//! ## Error Handling
//!
//! - **Type Safety**: numeric operations reject non-integers (`(+ 1 "2")` errors)
//! - **Overflow Detection**: arithmetic reports overflow and division by zero
//! - **Arity Checking**: every builtin validates its argument count
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with typed parameters (`NumberType`, `&str`,
//!    `Value`, `ValueIter<'_>`, `NumIter<'_>`) and an `Into<Value>` or
//!    `Result<_, Error>` return type
//! 2. **Add it to `get_builtin_ops`** with its identifier and arity
//! 3. **Add tests** covering edge cases and error conditions

use crate::Error;
use crate::ast::{MapEntries, NumberType, Value, check_plain_text, insert_pairs, kw};
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};
use crate::evaluator::{
    Environment, NumIter, Step, ValueIter, apply, eval_def, eval_defmacro, eval_do, eval_fn,
    eval_if, eval_let, eval_macroexpand, eval_quasiquote, eval_quote, eval_try,
};
use crate::printer::pr_seq;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::LazyLock;

/// Number of arguments an operation accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Inclusive bounds
    Range(usize, usize),
    Any,
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Range(min, max) => (min..=max).contains(&count),
            Arity::Any => true,
        }
    }

    pub fn validate(self, count: usize) -> Result<(), Error> {
        if self.accepts(count) {
            Ok(())
        } else {
            Err(Error::arity_error(self, count))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Handler for a special form: receives the unevaluated arguments and the
/// current environment
pub type SpecialFormFn = fn(&[Value], &Environment) -> Result<Step, Error>;

/// Definition of a special form
#[derive(Debug, Clone, Copy)]
pub struct SpecialForm {
    pub id: &'static str,
    pub handler: SpecialFormFn,
    /// Argument count, not counting the head symbol
    pub arity: Arity,
}

static SPECIAL_FORMS: LazyLock<Vec<SpecialForm>> = LazyLock::new(|| {
    vec![
        SpecialForm {
            id: "def!",
            handler: eval_def,
            arity: Arity::Exact(2),
        },
        SpecialForm {
            id: "let*",
            handler: eval_let,
            arity: Arity::Exact(2),
        },
        SpecialForm {
            id: "do",
            handler: eval_do,
            arity: Arity::Any,
        },
        SpecialForm {
            id: "if",
            handler: eval_if,
            arity: Arity::Range(2, 3),
        },
        SpecialForm {
            id: "fn*",
            handler: eval_fn,
            arity: Arity::Exact(2),
        },
        SpecialForm {
            id: "quote",
            handler: eval_quote,
            arity: Arity::Exact(1),
        },
        SpecialForm {
            id: "quasiquote",
            handler: eval_quasiquote,
            arity: Arity::Exact(1),
        },
        SpecialForm {
            id: "defmacro!",
            handler: eval_defmacro,
            arity: Arity::Exact(2),
        },
        SpecialForm {
            id: "macroexpand",
            handler: eval_macroexpand,
            arity: Arity::Exact(1),
        },
        SpecialForm {
            id: "try*",
            handler: eval_try,
            arity: Arity::Range(1, 2),
        },
    ]
});

/// Lazy static map from id to SpecialForm (private - use find_special_form)
static SPECIAL_FORM_TABLE: LazyLock<HashMap<&'static str, &'static SpecialForm>> =
    LazyLock::new(|| {
        let forms: &'static [SpecialForm] = SPECIAL_FORMS.as_slice();
        forms.iter().map(|form| (form.id, form)).collect()
    });

/// Find a special form by its head symbol
pub(crate) fn find_special_form(id: &str) -> Option<&'static SpecialForm> {
    SPECIAL_FORM_TABLE.get(id).copied()
}

pub fn is_special_form(id: &str) -> bool {
    SPECIAL_FORM_TABLE.contains_key(id)
}

/// Definition of a builtin function
pub(crate) struct BuiltinOp {
    pub id: &'static str,
    pub func: Rc<OperationFn>,
    pub arity: Arity,
}

impl BuiltinOp {
    /// Wrap the operation with its arity check and turn it into a value
    pub(crate) fn into_value(self) -> Value {
        let BuiltinOp { id, func, arity } = self;
        let checked: Rc<OperationFn> = Rc::new(move |args: Vec<Value>| {
            arity.validate(args.len())?;
            func(args)
        });
        Value::builtin(id, checked)
    }
}

//
// Builtin Function Implementations
//

fn builtin_add(args: NumIter<'_>) -> Result<NumberType, Error> {
    let mut sum = 0 as NumberType;
    for arg in args {
        sum = sum
            .checked_add(arg)
            .ok_or_else(|| Error::EvalError("Integer overflow in addition".into()))?;
    }
    Ok(sum)
}

fn builtin_sub(first: NumberType, rest: NumIter<'_>) -> Result<NumberType, Error> {
    let mut iter = rest.peekable();

    if iter.peek().is_none() {
        return first
            .checked_neg()
            .ok_or_else(|| Error::EvalError("Integer overflow in negation".into()));
    }

    let mut result = first;
    for n in iter {
        result = result
            .checked_sub(n)
            .ok_or_else(|| Error::EvalError("Integer overflow in subtraction".into()))?;
    }

    Ok(result)
}

fn builtin_mul(args: NumIter<'_>) -> Result<NumberType, Error> {
    let mut product = 1 as NumberType;
    for n in args {
        product = product
            .checked_mul(n)
            .ok_or_else(|| Error::EvalError("Integer overflow in multiplication".into()))?;
    }
    Ok(product)
}

// Integer division truncating toward zero
fn builtin_div(first: NumberType, rest: NumIter<'_>) -> Result<NumberType, Error> {
    let mut quotient = first;
    for n in rest {
        if n == 0 {
            return Err(Error::EvalError("Division by zero".into()));
        }
        quotient = quotient
            .checked_div(n)
            .ok_or_else(|| Error::EvalError("Integer overflow in division".into()))?;
    }
    Ok(quotient)
}

// Macro to generate chained numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $op:tt) => {
        fn $name(first: NumberType, rest: NumIter<'_>) -> bool {
            // All adjacent pairs must satisfy the comparison
            let mut prev = first;
            for current in rest {
                if !(prev $op current) {
                    return false;
                }
                prev = current;
            }
            true
        }
    };
}

numeric_comparison!(builtin_lt, <);
numeric_comparison!(builtin_gt, >);
numeric_comparison!(builtin_le, <=);
numeric_comparison!(builtin_ge, >=);

fn builtin_equal(first: Value, second: Value) -> bool {
    first == second
}

fn builtin_pr_str(args: ValueIter<'_>) -> String {
    pr_seq(args, true, " ")
}

fn builtin_str(args: ValueIter<'_>) -> String {
    pr_seq(args, false, "")
}

fn builtin_prn(args: ValueIter<'_>) -> Value {
    println!("{}", pr_seq(args, true, " "));
    Value::Nil
}

fn builtin_println(args: ValueIter<'_>) -> Value {
    println!("{}", pr_seq(args, false, " "));
    Value::Nil
}

#[cfg(feature = "reader")]
fn builtin_read_string(source: &str) -> Result<Value, Error> {
    crate::reader::parse(source)
}

fn builtin_slurp(path: &str) -> Result<String, Error> {
    let contents = std::fs::read_to_string(path)
        .map_err(|err| Error::EvalError(format!("slurp: cannot read '{path}': {err}")))?;
    check_plain_text(&contents, &format!("slurp: '{path}'"))?;
    Ok(contents)
}

fn builtin_list(args: ValueIter<'_>) -> Value {
    Value::list(args.cloned().collect())
}

fn builtin_vector(args: ValueIter<'_>) -> Value {
    Value::vector(args.cloned().collect())
}

fn builtin_vec(items: ValueIter<'_>) -> Value {
    Value::vector(items.cloned().collect())
}

fn builtin_is_empty(items: ValueIter<'_>) -> bool {
    items.len() == 0
}

fn builtin_count(items: ValueIter<'_>) -> NumberType {
    items.len() as NumberType
}

fn builtin_cons(first: Value, rest: ValueIter<'_>) -> Value {
    let mut items = Vec::with_capacity(rest.len() + 1);
    items.push(first);
    items.extend(rest.cloned());
    Value::list(items)
}

fn builtin_concat(args: ValueIter<'_>) -> Result<Value, Error> {
    let mut items = Vec::new();
    for arg in args {
        match arg {
            Value::List(seq) | Value::Vector(seq) => items.extend(seq.iter().cloned()),
            Value::Nil => {}
            other => {
                return Err(Error::TypeError(format!(
                    "concat expects lists or vectors, got {}",
                    other.type_name()
                )));
            }
        }
    }
    Ok(Value::list(items))
}

fn builtin_nth(items: ValueIter<'_>, index: NumberType) -> Result<Value, Error> {
    let items = items.as_slice();
    usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i))
        .cloned()
        .ok_or_else(|| {
            Error::EvalError(format!(
                "nth: index {index} out of range for sequence of length {}",
                items.len()
            ))
        })
}

fn builtin_first(mut items: ValueIter<'_>) -> Value {
    items.next().cloned().unwrap_or(Value::Nil)
}

fn builtin_rest(items: ValueIter<'_>) -> Value {
    Value::list(items.skip(1).cloned().collect())
}

fn builtin_apply(func: Value, args: ValueIter<'_>) -> Result<Value, Error> {
    let args = args.as_slice();
    let Some((last, init)) = args.split_last() else {
        return Err(Error::arity_error(Arity::AtLeast(2), 1));
    };
    let mut call_args = init.to_vec();
    match last {
        Value::List(seq) | Value::Vector(seq) => call_args.extend(seq.iter().cloned()),
        Value::Nil => {}
        other => {
            return Err(Error::TypeError(format!(
                "apply expects a list or vector as its last argument, got {}",
                other.type_name()
            )));
        }
    }
    apply(&func, call_args)
}

fn builtin_map(func: Value, items: ValueIter<'_>) -> Result<Value, Error> {
    let mapped = items
        .map(|item| apply(&func, vec![item.clone()]))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::list(mapped))
}

fn builtin_atom(value: Value) -> Value {
    Value::atom(value)
}

fn builtin_deref(atom: Value) -> Result<Value, Error> {
    match &atom {
        Value::Atom(cell) => Ok(cell.borrow().clone()),
        other => Err(Error::TypeError(format!(
            "deref expects an atom, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_reset(atom: Value, value: Value) -> Result<Value, Error> {
    match &atom {
        Value::Atom(cell) => {
            *cell.borrow_mut() = value.clone();
            Ok(value)
        }
        other => Err(Error::TypeError(format!(
            "reset! expects an atom, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_swap(atom: Value, func: Value, extra: ValueIter<'_>) -> Result<Value, Error> {
    let cell = match &atom {
        Value::Atom(cell) => cell,
        other => {
            return Err(Error::TypeError(format!(
                "swap! expects an atom, got {}",
                other.type_name()
            )));
        }
    };
    let current = cell.borrow().clone();
    let mut args = Vec::with_capacity(extra.len() + 1);
    args.push(current);
    args.extend(extra.cloned());

    // The function may itself read the atom, so no borrow is held across the call
    let updated = apply(&func, args)?;
    *cell.borrow_mut() = updated.clone();
    Ok(updated)
}

fn builtin_throw(value: Value) -> Result<Value, Error> {
    Err(Error::UserThrow(value))
}

// Macro to generate single-argument type predicates
macro_rules! value_predicate {
    ($name:ident, $pattern:pat) => {
        fn $name(value: Value) -> bool {
            matches!(value, $pattern)
        }
    };
}

value_predicate!(builtin_is_nil, Value::Nil);
value_predicate!(builtin_is_true, Value::True);
value_predicate!(builtin_is_false, Value::False);
value_predicate!(builtin_is_symbol, Value::Symbol(_));
value_predicate!(builtin_is_number, Value::Integer(_));
value_predicate!(builtin_is_list, Value::List(_));
value_predicate!(builtin_is_vector, Value::Vector(_));
value_predicate!(builtin_is_sequential, Value::List(_) | Value::Vector(_));
value_predicate!(builtin_is_map, Value::HashMap(_));
value_predicate!(builtin_is_atom, Value::Atom(_));

fn builtin_is_keyword(value: Value) -> bool {
    value.is_keyword()
}

fn builtin_is_string(value: Value) -> bool {
    matches!(value, Value::Str(_)) && !value.is_keyword()
}

fn builtin_is_fn(value: Value) -> bool {
    value.is_function() && !value.is_macro()
}

fn builtin_is_macro(value: Value) -> bool {
    value.is_macro()
}

fn builtin_symbol(name: &str) -> Value {
    Value::Symbol(name.to_owned())
}

fn builtin_keyword(name: Value) -> Result<Value, Error> {
    match &name {
        Value::Str(_) if name.is_keyword() => Ok(name.clone()),
        Value::Str(s) => Ok(kw(s)),
        other => Err(Error::TypeError(format!(
            "keyword expects a string, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_hash_map(args: ValueIter<'_>) -> Result<Value, Error> {
    Value::hash_map_from_pairs(args.as_slice())
}

fn map_entries(map: &Value, op: &str) -> Result<MapEntries, Error> {
    match map {
        Value::HashMap(entries) => Ok(MapEntries::clone(entries)),
        other => Err(Error::TypeError(format!(
            "{op} expects a hash-map, got {}",
            other.type_name()
        ))),
    }
}

fn map_key<'a>(key: &'a Value, op: &str) -> Result<&'a str, Error> {
    match key {
        Value::Str(s) => Ok(s),
        other => Err(Error::TypeError(format!(
            "{op} expects string or keyword keys, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_assoc(map: Value, pairs: ValueIter<'_>) -> Result<Value, Error> {
    let mut entries = map_entries(&map, "assoc")?;
    insert_pairs(&mut entries, pairs.as_slice())?;
    Ok(Value::hash_map(entries))
}

fn builtin_dissoc(map: Value, keys: ValueIter<'_>) -> Result<Value, Error> {
    let mut entries = map_entries(&map, "dissoc")?;
    for key in keys {
        entries.remove(map_key(key, "dissoc")?);
    }
    Ok(Value::hash_map(entries))
}

fn builtin_get(map: Value, key: Value) -> Result<Value, Error> {
    match &map {
        Value::Nil => Ok(Value::Nil),
        Value::HashMap(entries) => Ok(entries
            .get(map_key(&key, "get")?)
            .cloned()
            .unwrap_or(Value::Nil)),
        other => Err(Error::TypeError(format!(
            "get expects a hash-map, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_contains(map: Value, key: Value) -> Result<bool, Error> {
    match &map {
        Value::Nil => Ok(false),
        Value::HashMap(entries) => Ok(entries.contains_key(map_key(&key, "contains?")?)),
        other => Err(Error::TypeError(format!(
            "contains? expects a hash-map, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_keys(map: Value) -> Result<Value, Error> {
    let entries = map_entries(&map, "keys")?;
    Ok(Value::list(entries.into_keys().map(Value::Str).collect()))
}

fn builtin_vals(map: Value) -> Result<Value, Error> {
    let entries = map_entries(&map, "vals")?;
    Ok(Value::list(entries.into_values().collect()))
}

/// All builtin functions, freshly wrapped through the typed adapter layer.
///
/// Function values hold `Rc`s, so the registry is built per environment
/// rather than shared in a static.
pub(crate) fn get_builtin_ops() -> Vec<BuiltinOp> {
    fn builtin_fixed<Args, F>(f: F) -> Rc<OperationFn>
    where
        F: IntoOperation<Args>,
    {
        <F as IntoOperation<Args>>::into_operation(f)
    }

    fn builtin_variadic<Args, F>(f: F) -> Rc<OperationFn>
    where
        F: IntoVariadicOperation<Args>,
    {
        <F as IntoVariadicOperation<Args>>::into_variadic_operation(f)
    }

    fn op(id: &'static str, func: Rc<OperationFn>, arity: Arity) -> BuiltinOp {
        BuiltinOp { id, func, arity }
    }

    type Num = NumberType;
    type Rest = ValueIter<'static>;
    type Nums = NumIter<'static>;

    #[cfg_attr(not(feature = "reader"), allow(unused_mut))]
    let mut ops = vec![
        // Arithmetic
        op("+", builtin_variadic::<(Nums,), _>(builtin_add), Arity::Any),
        op("-", builtin_variadic::<(Num, Nums), _>(builtin_sub), Arity::AtLeast(1)),
        op("*", builtin_variadic::<(Nums,), _>(builtin_mul), Arity::Any),
        op("/", builtin_variadic::<(Num, Nums), _>(builtin_div), Arity::AtLeast(2)),
        // Comparison
        op("=", builtin_fixed::<(Value, Value), _>(builtin_equal), Arity::Exact(2)),
        op("<", builtin_variadic::<(Num, Nums), _>(builtin_lt), Arity::AtLeast(2)),
        op("<=", builtin_variadic::<(Num, Nums), _>(builtin_le), Arity::AtLeast(2)),
        op(">", builtin_variadic::<(Num, Nums), _>(builtin_gt), Arity::AtLeast(2)),
        op(">=", builtin_variadic::<(Num, Nums), _>(builtin_ge), Arity::AtLeast(2)),
        // Printing
        op("pr-str", builtin_variadic::<(Rest,), _>(builtin_pr_str), Arity::Any),
        op("str", builtin_variadic::<(Rest,), _>(builtin_str), Arity::Any),
        op("prn", builtin_variadic::<(Rest,), _>(builtin_prn), Arity::Any),
        op("println", builtin_variadic::<(Rest,), _>(builtin_println), Arity::Any),
        // Files
        op("slurp", builtin_fixed::<(&str,), _>(builtin_slurp), Arity::Exact(1)),
        // Sequences
        op("list", builtin_variadic::<(Rest,), _>(builtin_list), Arity::Any),
        op("list?", builtin_fixed::<(Value,), _>(builtin_is_list), Arity::Exact(1)),
        op("vector", builtin_variadic::<(Rest,), _>(builtin_vector), Arity::Any),
        op("vector?", builtin_fixed::<(Value,), _>(builtin_is_vector), Arity::Exact(1)),
        op("vec", builtin_fixed::<(Rest,), _>(builtin_vec), Arity::Exact(1)),
        op(
            "sequential?",
            builtin_fixed::<(Value,), _>(builtin_is_sequential),
            Arity::Exact(1),
        ),
        op("empty?", builtin_fixed::<(Rest,), _>(builtin_is_empty), Arity::Exact(1)),
        op("count", builtin_fixed::<(Rest,), _>(builtin_count), Arity::Exact(1)),
        op("cons", builtin_fixed::<(Value, Rest), _>(builtin_cons), Arity::Exact(2)),
        op("concat", builtin_variadic::<(Rest,), _>(builtin_concat), Arity::Any),
        op("nth", builtin_fixed::<(Rest, Num), _>(builtin_nth), Arity::Exact(2)),
        op("first", builtin_fixed::<(Rest,), _>(builtin_first), Arity::Exact(1)),
        op("rest", builtin_fixed::<(Rest,), _>(builtin_rest), Arity::Exact(1)),
        // Higher-order
        op("apply", builtin_variadic::<(Value, Rest), _>(builtin_apply), Arity::AtLeast(2)),
        op("map", builtin_fixed::<(Value, Rest), _>(builtin_map), Arity::Exact(2)),
        // Atoms
        op("atom", builtin_fixed::<(Value,), _>(builtin_atom), Arity::Exact(1)),
        op("atom?", builtin_fixed::<(Value,), _>(builtin_is_atom), Arity::Exact(1)),
        op("deref", builtin_fixed::<(Value,), _>(builtin_deref), Arity::Exact(1)),
        op("reset!", builtin_fixed::<(Value, Value), _>(builtin_reset), Arity::Exact(2)),
        op(
            "swap!",
            builtin_variadic::<(Value, Value, Rest), _>(builtin_swap),
            Arity::AtLeast(2),
        ),
        // Errors
        op("throw", builtin_fixed::<(Value,), _>(builtin_throw), Arity::Exact(1)),
        // Type predicates
        op("nil?", builtin_fixed::<(Value,), _>(builtin_is_nil), Arity::Exact(1)),
        op("true?", builtin_fixed::<(Value,), _>(builtin_is_true), Arity::Exact(1)),
        op("false?", builtin_fixed::<(Value,), _>(builtin_is_false), Arity::Exact(1)),
        op("symbol?", builtin_fixed::<(Value,), _>(builtin_is_symbol), Arity::Exact(1)),
        op("keyword?", builtin_fixed::<(Value,), _>(builtin_is_keyword), Arity::Exact(1)),
        op("string?", builtin_fixed::<(Value,), _>(builtin_is_string), Arity::Exact(1)),
        op("number?", builtin_fixed::<(Value,), _>(builtin_is_number), Arity::Exact(1)),
        op("fn?", builtin_fixed::<(Value,), _>(builtin_is_fn), Arity::Exact(1)),
        op("macro?", builtin_fixed::<(Value,), _>(builtin_is_macro), Arity::Exact(1)),
        op("map?", builtin_fixed::<(Value,), _>(builtin_is_map), Arity::Exact(1)),
        // Constructors
        op("symbol", builtin_fixed::<(&str,), _>(builtin_symbol), Arity::Exact(1)),
        op("keyword", builtin_fixed::<(Value,), _>(builtin_keyword), Arity::Exact(1)),
        // Hash-maps
        op("hash-map", builtin_variadic::<(Rest,), _>(builtin_hash_map), Arity::Any),
        op("assoc", builtin_variadic::<(Value, Rest), _>(builtin_assoc), Arity::AtLeast(1)),
        op("dissoc", builtin_variadic::<(Value, Rest), _>(builtin_dissoc), Arity::AtLeast(1)),
        op("get", builtin_fixed::<(Value, Value), _>(builtin_get), Arity::Exact(2)),
        op(
            "contains?",
            builtin_fixed::<(Value, Value), _>(builtin_contains),
            Arity::Exact(2),
        ),
        op("keys", builtin_fixed::<(Value,), _>(builtin_keys), Arity::Exact(1)),
        op("vals", builtin_fixed::<(Value,), _>(builtin_vals), Arity::Exact(1)),
    ];

    #[cfg(feature = "reader")]
    ops.push(op(
        "read-string",
        builtin_fixed::<(&str,), _>(builtin_read_string),
        Arity::Exact(1),
    ));

    ops
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{empty_list, sym, val};
    use crate::printer::pr_str;

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> Option<Value> {
        Some(val(value))
    }

    /// Invoke a builtin through the registry using the erased signature,
    /// including the arity check applied when it is installed.
    fn call_builtin(name: &str, args: &[Value]) -> Result<Value, Error> {
        let op = get_builtin_ops()
            .into_iter()
            .find(|op| op.id == name)
            .unwrap_or_else(|| panic!("builtin not found: {name}"));
        match &op.into_value() {
            Value::BuiltinFunction { func, .. } => func(args.to_vec()),
            other => panic!("expected builtin function, got {other:?}"),
        }
    }

    fn map_of(pairs: &[Value]) -> Value {
        Value::hash_map_from_pairs(pairs).unwrap()
    }

    #[test]
    fn test_special_form_table() {
        let if_form = find_special_form("if").unwrap();
        assert_eq!(if_form.id, "if");
        assert_eq!(if_form.arity, Arity::Range(2, 3));

        for name in [
            "def!",
            "let*",
            "do",
            "if",
            "fn*",
            "quote",
            "quasiquote",
            "defmacro!",
            "macroexpand",
            "try*",
        ] {
            assert!(is_special_form(name), "{name} should be a special form");
        }

        // catch* is only meaningful inside try*, and functions are not forms
        assert!(!is_special_form("catch*"));
        assert!(!is_special_form("+"));
        assert!(find_special_form("unknown").is_none());
    }

    #[test]
    fn test_builtin_registry_ids_are_unique() {
        let ops = get_builtin_ops();
        let mut ids: Vec<_> = ops.iter().map(|op| op.id).collect();
        ids.sort_unstable();
        let before = ids.len();
        ids.dedup();
        assert_eq!(before, ids.len());
        assert!(ids.iter().all(|id| !is_special_form(id)));
    }

    /// Macro to create test cases, invoking builtins via the registry.
    macro_rules! test {
        ($name:expr, $args:expr, $expected:expr) => {
            ($name, call_builtin($name, $args), $expected)
        };
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_builtin_function_implementations() {
        type TestCase = (&'static str, Result<Value, Error>, Option<Value>);

        let int_list = val([1, 2, 3]);
        let int_vector = Value::vector(vec![val(1), val(2), val(3)]);
        let many_ones: Vec<Value> = (0..100).map(|_| val(1)).collect();
        let plus = get_builtin_ops()
            .into_iter()
            .find(|op| op.id == "+")
            .map(BuiltinOp::into_value)
            .unwrap();
        let map_ab = map_of(&[kw("a"), val(1), val("b"), val(2)]);

        let test_cases: Vec<TestCase> = vec![
            // =================================================================
            // ARITHMETIC
            // =================================================================
            test!("+", &[], success(0)),
            test!("+", &[val(5)], success(5)),
            test!("+", &[val(1), val(2), val(3)], success(6)),
            test!("+", &many_ones, success(100)),
            test!("+", &[val(i64::MAX), val(1)], None), // Overflow
            test!("+", &[val(1), val("2")], None),
            test!("-", &[val(5)], success(-5)),
            test!("-", &[val(10), val(3), val(2)], success(5)),
            test!("-", &[], None),
            test!("-", &[val(i64::MIN)], None),
            test!("*", &[], success(1)),
            test!("*", &[val(2), val(3), val(4)], success(24)),
            test!("*", &[val(i64::MAX), val(2)], None),
            test!("/", &[val(20), val(2)], success(10)),
            test!("/", &[val(7), val(2)], success(3)),
            test!("/", &[val(-7), val(2)], success(-3)),
            test!("/", &[val(100), val(5), val(2)], success(10)),
            test!("/", &[val(1), val(0)], None),
            test!("/", &[val(i64::MIN), val(-1)], None),
            test!("/", &[val(1)], None),
            // =================================================================
            // COMPARISON
            // =================================================================
            test!("<", &[val(1), val(2)], success(true)),
            test!("<", &[val(2), val(1)], success(false)),
            test!("<", &[val(1), val(2), val(3)], success(true)),
            test!("<", &[val(1), val(3), val(2)], success(false)),
            test!("<=", &[val(2), val(2)], success(true)),
            test!(">", &[val(9), val(6), val(2)], success(true)),
            test!(">", &[val(4), val(4)], success(false)),
            test!(">=", &[val(4), val(4), val(3)], success(true)),
            test!("<", &[val(1)], None),
            test!("<", &[val(1), val("2")], None),
            test!("=", &[val(1), val(1)], success(true)),
            test!("=", &[val(1), val(2)], success(false)),
            test!("=", &[val(1), val("1")], success(false)),
            test!("=", &[int_list.clone(), int_vector.clone()], success(true)),
            test!("=", &[val("a"), kw("a")], success(false)),
            test!("=", &[empty_list(), Value::Nil], success(false)),
            test!("=", &[map_ab.clone(), map_ab.clone()], success(true)),
            test!("=", &[val(1)], None),
            // =================================================================
            // PRINTING
            // =================================================================
            test!("pr-str", &[], success("")),
            test!("pr-str", &[val("a"), val(1), kw("k")], success("\"a\" 1 :k")),
            test!("str", &[val("a"), val(1), kw("k")], success("a1:k")),
            test!("str", &[int_list.clone()], success("(1 2 3)")),
            test!("str", &[], success("")),
            // =================================================================
            // SEQUENCES
            // =================================================================
            test!("list", &[], Some(empty_list())),
            test!("list", &[val(1), val(2), val(3)], Some(int_list.clone())),
            test!("list?", &[int_list.clone()], success(true)),
            test!("list?", &[int_vector.clone()], success(false)),
            test!("vector", &[val(1), val(2), val(3)], Some(int_vector.clone())),
            test!("vector?", &[int_vector.clone()], success(true)),
            test!("vector?", &[int_list.clone()], success(false)),
            test!("vec", &[int_list.clone()], Some(int_vector.clone())),
            test!("sequential?", &[int_vector.clone()], success(true)),
            test!("sequential?", &[val("abc")], success(false)),
            test!("empty?", &[empty_list()], success(true)),
            test!("empty?", &[Value::Nil], success(true)),
            test!("empty?", &[int_list.clone()], success(false)),
            test!("empty?", &[val(1)], None),
            test!("count", &[int_vector.clone()], success(3)),
            test!("count", &[Value::Nil], success(0)),
            test!("count", &[val("abc")], None),
            test!("cons", &[val(0), int_vector.clone()], Some(val([0, 1, 2, 3]))),
            test!("cons", &[val(0), Value::Nil], Some(val([0]))),
            test!("cons", &[val(0), val(1)], None),
            test!(
                "concat",
                &[int_list.clone(), int_vector.clone()],
                Some(val([1, 2, 3, 1, 2, 3]))
            ),
            test!("concat", &[], Some(empty_list())),
            test!("concat", &[empty_list(), Value::Nil, val([7])], Some(val([7]))),
            test!("concat", &[val(1)], None),
            test!("nth", &[int_list.clone(), val(0)], success(1)),
            test!("nth", &[int_vector.clone(), val(2)], success(3)),
            test!("nth", &[int_list.clone(), val(3)], None),
            test!("nth", &[int_list.clone(), val(-1)], None),
            test!("first", &[int_list.clone()], success(1)),
            test!("first", &[empty_list()], Some(Value::Nil)),
            test!("first", &[Value::Nil], Some(Value::Nil)),
            test!("rest", &[int_vector.clone()], Some(val([2, 3]))),
            test!("rest", &[empty_list()], Some(empty_list())),
            test!("rest", &[Value::Nil], Some(empty_list())),
            // =================================================================
            // HIGHER-ORDER
            // =================================================================
            test!("apply", &[plus.clone(), int_list.clone()], success(6)),
            test!("apply", &[plus.clone(), val(10), val(20), int_vector.clone()], success(36)),
            test!("apply", &[plus.clone(), Value::Nil], success(0)),
            test!("apply", &[plus.clone(), val(1)], None),
            test!("apply", &[val(1), empty_list()], None),
            test!("map", &[plus.clone(), int_list.clone()], Some(int_list.clone())),
            test!("map", &[plus.clone(), empty_list()], Some(empty_list())),
            // =================================================================
            // ATOMS AND ERRORS
            // =================================================================
            test!("atom?", &[Value::atom(val(1))], success(true)),
            test!("atom?", &[val(1)], success(false)),
            test!("deref", &[Value::atom(val(7))], success(7)),
            test!("deref", &[val(7)], None),
            test!("reset!", &[Value::atom(val(1)), val(2)], success(2)),
            test!("reset!", &[val(1), val(2)], None),
            test!("swap!", &[Value::atom(val(1)), plus.clone(), val(2), val(3)], success(6)),
            test!("swap!", &[val(1), plus.clone()], None),
            test!("throw", &[val("boom")], None),
            // =================================================================
            // PREDICATES AND CONSTRUCTORS
            // =================================================================
            test!("nil?", &[Value::Nil], success(true)),
            test!("nil?", &[empty_list()], success(false)),
            test!("true?", &[Value::True], success(true)),
            test!("true?", &[val(1)], success(false)),
            test!("false?", &[Value::False], success(true)),
            test!("false?", &[Value::Nil], success(false)),
            test!("symbol?", &[sym("a")], success(true)),
            test!("symbol?", &[val("a")], success(false)),
            test!("keyword?", &[kw("a")], success(true)),
            test!("keyword?", &[val("a")], success(false)),
            test!("string?", &[val("a")], success(true)),
            test!("string?", &[kw("a")], success(false)),
            test!("number?", &[val(1)], success(true)),
            test!("number?", &[val("1")], success(false)),
            test!("fn?", &[plus.clone()], success(true)),
            test!("fn?", &[val(1)], success(false)),
            test!("macro?", &[plus.clone()], success(false)),
            test!("map?", &[map_ab.clone()], success(true)),
            test!("map?", &[int_list.clone()], success(false)),
            test!("symbol", &[val("abc")], Some(sym("abc"))),
            test!("symbol", &[val(1)], None),
            test!("symbol", &[kw("abc")], None),
            test!("keyword", &[val("abc")], Some(kw("abc"))),
            test!("keyword", &[kw("abc")], Some(kw("abc"))),
            test!("keyword", &[val(1)], None),
            // =================================================================
            // HASH-MAPS
            // =================================================================
            test!("hash-map", &[], Some(map_of(&[]))),
            test!("hash-map", &[kw("a"), val(1), val("b"), val(2)], Some(map_ab.clone())),
            test!("hash-map", &[kw("a")], None),
            test!("hash-map", &[val(1), val(2)], None),
            test!(
                "assoc",
                &[map_of(&[kw("a"), val(1)]), val("b"), val(2)],
                Some(map_ab.clone())
            ),
            test!(
                "assoc",
                &[map_ab.clone(), kw("a"), val(9)],
                Some(map_of(&[kw("a"), val(9), val("b"), val(2)]))
            ),
            test!("assoc", &[map_ab.clone(), kw("a")], None),
            test!("assoc", &[int_list.clone(), kw("a"), val(1)], None),
            test!(
                "dissoc",
                &[map_ab.clone(), val("b"), val("missing")],
                Some(map_of(&[kw("a"), val(1)]))
            ),
            test!("dissoc", &[map_ab.clone(), val(1)], None),
            test!("get", &[map_ab.clone(), kw("a")], success(1)),
            test!("get", &[map_ab.clone(), val("a")], Some(Value::Nil)),
            test!("get", &[Value::Nil, kw("a")], Some(Value::Nil)),
            test!("get", &[int_list.clone(), kw("a")], None),
            test!("contains?", &[map_ab.clone(), val("b")], success(true)),
            test!("contains?", &[map_ab.clone(), kw("b")], success(false)),
            // Plain strings sort before keywords
            test!("keys", &[map_ab.clone()], Some(val([val("b"), kw("a")]))),
            test!("vals", &[map_ab.clone()], Some(val([2, 1]))),
            test!("keys", &[Value::Nil], None),
        ];

        for (test_expr, result, expected) in test_cases {
            match (result, expected) {
                (Ok(actual), Some(expected_val)) => {
                    assert_eq!(actual, expected_val, "Failed for test case: {test_expr}");
                }
                (Err(_), None) => {} // Expected error
                (actual, expected) => panic!(
                    "Unexpected result for test case: {test_expr}\nGot result: {actual:?}, Expected: {expected:?}"
                ),
            }
        }
    }

    #[test]
    fn test_keys_follow_key_order() {
        // "b" sorts before the keyword sentinel, so it comes first
        let map = map_of(&[kw("z"), val(1), val("b"), val(2)]);
        let keys = call_builtin("keys", &[map]).unwrap();
        assert_eq!(pr_str(&keys, true), "(\"b\" :z)");
    }

    #[test]
    fn test_builtin_results_do_not_alias_inputs() {
        let map = map_of(&[kw("a"), val(1)]);
        let updated = call_builtin("assoc", &[map.clone(), kw("b"), val(2)]).unwrap();
        assert_eq!(pr_str(&map, true), "{:a 1}");
        assert_eq!(pr_str(&updated, true), "{:a 1 :b 2}");

        let atom = Value::atom(val(1));
        call_builtin("reset!", &[atom.clone(), val(5)]).unwrap();
        assert_eq!(call_builtin("deref", &[atom]).unwrap(), val(5));
    }

    #[test]
    fn test_throw_carries_value() {
        let payload = val([1, 2]);
        match call_builtin("throw", &[payload.clone()]).unwrap_err() {
            Error::UserThrow(value) => assert_eq!(value, payload),
            other => panic!("Expected UserThrow, got {other:?}"),
        }
    }

    #[test]
    fn test_arity_errors_from_registry() {
        match call_builtin("count", &[empty_list(), empty_list()]).unwrap_err() {
            Error::ArityError { expected, got, .. } => {
                assert_eq!(expected, Arity::Exact(1));
                assert_eq!(got, 2);
            }
            other => panic!("Expected ArityError, got {other:?}"),
        }
        match call_builtin("swap!", &[Value::atom(val(1))]).unwrap_err() {
            Error::ArityError { expected, got, .. } => {
                assert_eq!(expected, Arity::AtLeast(2));
                assert_eq!(got, 1);
            }
            other => panic!("Expected ArityError, got {other:?}"),
        }
    }

    #[test]
    fn test_arity_validation() {
        use Arity::*;

        Exact(2).validate(2).unwrap();
        Exact(2).validate(1).unwrap_err();
        Exact(2).validate(3).unwrap_err();

        AtLeast(1).validate(1).unwrap();
        AtLeast(1).validate(2).unwrap();
        AtLeast(1).validate(0).unwrap_err();

        Range(1, 3).validate(1).unwrap();
        Range(1, 3).validate(3).unwrap();
        Range(1, 3).validate(0).unwrap_err();
        Range(1, 3).validate(4).unwrap_err();

        Any.validate(0).unwrap();
        Any.validate(100).unwrap();

        assert_eq!(Exact(2).to_string(), "2");
        assert_eq!(AtLeast(1).to_string(), "at least 1");
        assert_eq!(Range(2, 3).to_string(), "2 to 3");
        assert_eq!(Any.to_string(), "any number of");

        match Exact(2).validate(1).unwrap_err() {
            Error::ArityError { expected, got, .. } => {
                assert_eq!(expected, Exact(2));
                assert_eq!(got, 1);
            }
            _ => panic!("Expected ArityError"),
        }
    }
}
