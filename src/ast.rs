//! This module defines the runtime value model shared by the reader, the
//! evaluator and the builtin library. The main enum, [`Value`], is a closed
//! set of variants covering every datum a program can produce: the `nil`,
//! `true` and `false` singletons, integers, symbols, strings and keywords,
//! lists, vectors, hash-maps, atoms and functions.
//!
//! Sequences and maps are immutable and shared through `Rc`, so cloning a
//! `Value` is cheap and evaluation always builds new collections instead of
//! mutating existing ones. [`Value::Atom`] is the only mutable kind.
//!
//! Ergonomic helpers such as [`val`], [`sym`], [`kw`] and [`empty_list`] are
//! provided for building values in code and tests, together with `From`
//! conversions from common Rust types.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::Error;
use crate::evaluator::Environment;
use crate::evaluator::intooperation::OperationFn;

/// Type alias for number values in interpreter
pub type NumberType = i64;

/// First character of every keyword string.
///
/// Keywords share the string variant; this sentinel tells them apart. The
/// reader never produces it at the start of a string literal's value unless
/// the literal itself begins with it.
pub const KEYWORD_PREFIX: char = '\u{29E}';

/// Reject text arriving from outside the interpreter (files, command-line
/// arguments) that contains [`KEYWORD_PREFIX`], so no string can pass for a
/// keyword.
pub(crate) fn check_plain_text(text: &str, origin: &str) -> Result<(), Error> {
    if text.contains(KEYWORD_PREFIX) {
        return Err(Error::EvalError(format!(
            "{origin} contains the reserved character U+029E"
        )));
    }
    Ok(())
}

/// Key-ordered entries of a hash-map value
pub type MapEntries = BTreeMap<String, Value>;

/// User-defined function captured by `fn*`
#[derive(Clone)]
pub struct Closure {
    /// Positional parameter names
    pub params: Vec<String>,
    /// Name of the variadic collector following `&`, if any
    pub rest: Option<String>,
    pub body: Value,
    /// Defining environment
    pub env: Environment,
    pub is_macro: bool,
}

impl Closure {
    /// Bind `args` into a fresh child of the defining environment.
    pub fn bind_arguments(&self, args: Vec<Value>) -> Result<Environment, Error> {
        Environment::bind(&self.env, &self.params, self.rest.as_deref(), args)
    }
}

/// Core value type in interpreter
#[derive(Clone)]
pub enum Value {
    Nil,
    True,
    False,
    /// Numbers (signed 64-bit integers only)
    Integer(NumberType),
    /// Symbols (identifiers)
    Symbol(String),
    /// Strings and keywords (keywords start with [`KEYWORD_PREFIX`])
    Str(String),
    List(Rc<Vec<Value>>),
    Vector(Rc<Vec<Value>>),
    HashMap(Rc<MapEntries>),
    /// Mutable reference cell
    Atom(Rc<RefCell<Value>>),
    /// Native functions
    /// Equality is identity of the shared function object.
    BuiltinFunction {
        id: String,
        func: Rc<OperationFn>,
        is_macro: bool,
    },
    /// User-defined functions and macros
    Function(Rc<Closure>),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::True => write!(f, "True"),
            Value::False => write!(f, "False"),
            Value::Integer(n) => write!(f, "Integer({n})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Str(s) => match s.strip_prefix(KEYWORD_PREFIX) {
                Some(name) => write!(f, "Keyword({name})"),
                None => write!(f, "Str({s:?})"),
            },
            Value::List(items) => {
                write!(f, "List(")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v:?}")?;
                }
                write!(f, ")")
            }
            Value::Vector(items) => {
                write!(f, "Vector(")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v:?}")?;
                }
                write!(f, ")")
            }
            Value::HashMap(entries) => f.debug_map().entries(entries.iter()).finish(),
            Value::Atom(cell) => write!(f, "Atom({:?})", cell.borrow()),
            Value::BuiltinFunction { id, is_macro, .. } => {
                write!(f, "BuiltinFunction({id}, macro={is_macro})")
            }
            Value::Function(closure) => write!(
                f,
                "Function(params={:?}, rest={:?}, body={:?}, macro={})",
                closure.params, closure.rest, closure.body, closure.is_macro
            ),
        }
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        if b { Value::True } else { Value::False }
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Integer(n as NumberType)
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(NumberType);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(|x| x.into()).collect())
    }
}

// Fallible conversions from `Value` back into primitive Rust types.

impl TryFrom<Value> for NumberType {
    type Error = Error;

    fn try_from(value: Value) -> Result<NumberType, Error> {
        if let Value::Integer(n) = value {
            Ok(n)
        } else {
            Err(Error::TypeError(format!(
                "expected number, got {}",
                value.type_name()
            )))
        }
    }
}

/// Helper function for creating symbols
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating keywords from their bare name (`kw("a")` is `:a`)
pub fn kw<S: AsRef<str>>(name: S) -> Value {
    Value::Str(format!("{KEYWORD_PREFIX}{}", name.as_ref()))
}

/// Helper function for creating Values from anything convertible
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for creating the empty list
pub fn empty_list() -> Value {
    Value::list(Vec::new())
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(items))
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Vector(Rc::new(items))
    }

    pub fn hash_map(entries: MapEntries) -> Value {
        Value::HashMap(Rc::new(entries))
    }

    pub fn atom(value: Value) -> Value {
        Value::Atom(Rc::new(RefCell::new(value)))
    }

    /// Wrap a native function under the given id
    pub fn builtin(id: impl Into<String>, func: Rc<OperationFn>) -> Value {
        Value::BuiltinFunction {
            id: id.into(),
            func,
            is_macro: false,
        }
    }

    /// Build a hash-map from a flattened `key value key value ...` sequence.
    ///
    /// Keys must be strings or keywords; later duplicates win.
    pub fn hash_map_from_pairs(items: &[Value]) -> Result<Value, Error> {
        let mut entries = MapEntries::new();
        insert_pairs(&mut entries, items)?;
        Ok(Value::hash_map(entries))
    }

    pub fn is_keyword(&self) -> bool {
        matches!(self, Value::Str(s) if s.starts_with(KEYWORD_PREFIX))
    }

    /// Everything except `nil` and `false` is true
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::False)
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::BuiltinFunction { .. } | Value::Function(_))
    }

    pub fn is_macro(&self) -> bool {
        match self {
            Value::BuiltinFunction { is_macro, .. } => *is_macro,
            Value::Function(closure) => closure.is_macro,
            _ => false,
        }
    }

    /// Elements of a list or vector
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Vector(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Elements of a non-empty list or vector
    pub(crate) fn as_pair(&self) -> Option<&[Value]> {
        self.as_sequence().filter(|items| !items.is_empty())
    }

    /// Copy of this function value flagged for expansion-time invocation
    pub(crate) fn to_macro(&self) -> Result<Value, Error> {
        match self {
            Value::BuiltinFunction { id, func, .. } => Ok(Value::BuiltinFunction {
                id: id.clone(),
                func: Rc::clone(func),
                is_macro: true,
            }),
            Value::Function(closure) => Ok(Value::Function(Rc::new(Closure {
                is_macro: true,
                ..Closure::clone(closure)
            }))),
            other => Err(Error::TypeError(format!(
                "defmacro! requires a function, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::True | Value::False => "boolean",
            Value::Integer(_) => "number",
            Value::Symbol(_) => "symbol",
            Value::Str(_) if self.is_keyword() => "keyword",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Vector(_) => "vector",
            Value::HashMap(_) => "hash-map",
            Value::Atom(_) => "atom",
            Value::BuiltinFunction { .. } | Value::Function(_) => "function",
        }
    }
}

/// Insert a flattened `key value ...` sequence into `entries`
pub(crate) fn insert_pairs(entries: &mut MapEntries, items: &[Value]) -> Result<(), Error> {
    if items.len() % 2 != 0 {
        return Err(Error::EvalError(
            "hash-map requires an even number of key/value forms".to_owned(),
        ));
    }
    for pair in items.chunks_exact(2) {
        match &pair[0] {
            Value::Str(key) => {
                entries.insert(key.clone(), pair[1].clone());
            }
            other => {
                return Err(Error::TypeError(format!(
                    "hash-map keys must be strings or keywords, got {}",
                    other.type_name()
                )));
            }
        }
    }
    Ok(())
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&crate::printer::pr_str(self, true))
    }
}

// Nested values are released from a work list rather than by recursion, so
// dropping a list nested hundreds of thousands of levels deep is safe.
impl Drop for Value {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.take_owned_children(&mut pending);
        while let Some(mut value) = pending.pop() {
            value.take_owned_children(&mut pending);
        }
    }
}

impl Value {
    /// Move out the children this value holds the last reference to
    fn take_owned_children(&mut self, out: &mut Vec<Value>) {
        match self {
            Value::List(items) | Value::Vector(items) => {
                if let Some(items) = Rc::get_mut(items) {
                    out.append(items);
                }
            }
            Value::HashMap(entries) => {
                if let Some(entries) = Rc::get_mut(entries) {
                    out.extend(std::mem::take(entries).into_values());
                }
            }
            Value::Atom(cell) => {
                if let Some(cell) = Rc::get_mut(cell) {
                    out.push(std::mem::replace(cell.get_mut(), Value::Nil));
                }
            }
            Value::Function(closure) => {
                if let Some(closure) = Rc::get_mut(closure) {
                    out.push(std::mem::replace(&mut closure.body, Value::Nil));
                    closure.env.take_owned_bindings(out);
                }
            }
            _ => {}
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        crate::with_stack_headroom(|| self.eq_nested(other))
    }
}

impl Value {
    fn eq_nested(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) | (Value::True, Value::True) | (Value::False, Value::False) => {
                true
            }
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            // Lists and vectors compare equal element-wise across kinds
            (
                Value::List(a) | Value::Vector(a),
                Value::List(b) | Value::Vector(b),
            ) => a == b,
            (Value::HashMap(a), Value::HashMap(b)) => a == b,
            (Value::Atom(a), Value::Atom(b)) => Rc::ptr_eq(a, b),
            (Value::BuiltinFunction { func: f1, .. }, Value::BuiltinFunction { func: f2, .. }) => {
                Rc::ptr_eq(f1, f2)
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}
