//! tailisp - a small make-a-lisp interpreter
//!
//! This crate reads parenthesized forms, evaluates them against a lexically
//! scoped environment and prints the result. The evaluator is a trampoline:
//! special forms in tail position and closure calls hand the next expression
//! back to the loop instead of recursing, so deeply tail-recursive programs
//! run in constant native stack space.
//!
//! ```lisp
//! (def! fact (fn* (n acc) (if (= n 0) acc (fact (- n 1) (* n acc)))))
//! (fact 20 1)                             ; => 2432902008176640000
//! (defmacro! unless (fn* (p a b) `(if ~p ~b ~a)))
//! (unless false 7 8)                      ; => 7
//! `(1 ~@(list 2 3) 4)                     ; => (1 2 3 4)
//! (let* (a (atom 0)) (swap! a + 5) @a)    ; => 5
//! ```
//!
//! ## Language
//!
//! Values are integers, strings, keywords, symbols, `nil`/`true`/`false`,
//! lists, vectors, hash-maps, atoms and functions. The special forms are
//! `def!`, `let*`, `do`, `if`, `fn*`, `quote`, `quasiquote`, `defmacro!`,
//! `macroexpand` and `try*`/`catch*`. Everything else is a function call.
//!
//! Truthiness follows Lisp convention: only `nil` and `false` are false.
//!
//! ## Modules
//!
//! - `ast`: the runtime value model
//! - `evaluator`: environments, the evaluation loop and special forms
//! - `builtinops`: the core function library and the special form table
//! - `printer`: textual rendering of values
//! - `reader`: text to value parsing (feature `reader`)
//! - `interpreter`: root environment with prelude, `eval` and file loading (feature `reader`)

use std::fmt;

use crate::ast::Value;
use crate::builtinops::Arity;

/// Maximum reader nesting depth to prevent stack overflow on hostile input
pub const MAX_PARSE_DEPTH: usize = 256;

/// Maximum depth of non-tail evaluation
/// Tail calls run in the evaluator loop and do not count against this limit;
/// only argument evaluation, `if` conditions, non-final `do` forms and other
/// nested evaluations do.
pub const MAX_EVAL_DEPTH: usize = 512;

/// Remaining native stack below which recursion moves to a fresh segment
const STACK_RED_ZONE: usize = 128 * 1024;

/// Size of each stack segment allocated once the red zone is reached
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Run `f`, first switching to a newly allocated stack segment if the
/// current one is nearly exhausted.
///
/// Every recursion over runtime data (evaluation, printing, equality)
/// goes through here, so deeply nested values and the full
/// [`MAX_EVAL_DEPTH`] fit whatever stack the calling thread was given.
pub(crate) fn with_stack_headroom<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, f)
}

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, unbalanced closers)
    InvalidSyntax,
    /// Input ended before the form was complete (unterminated string, unclosed parens)
    Incomplete,
    /// Form nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Extra input found after a complete form
    TrailingContent,
    /// Valid syntax that this implementation intentionally does not support
    Unsupported,
    /// Implementation-imposed limit exceeded (integer overflow)
    ImplementationLimit,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context and found token extracted from input at a given offset
    pub fn with_context_and_found(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
        found: Option<String>,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let context_start = error_offset.saturating_sub(20);

        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.len() < input.len() {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context), found)
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed reader input
    SyntaxError(ParseError),
    /// Environment lookup reached the root frame without finding the name
    NameNotFound(String),
    /// The evaluated head of a call is not a function (carries its printed form)
    NotCallable(String),
    /// A closure was called with the wrong number of arguments
    BindingArityMismatch { expected: Arity, got: usize },
    /// A special form was used with the wrong number of arguments
    SpecialFormArityError {
        form: String,
        expected: Arity,
        got: usize,
    },
    /// Bad binding syntax in `def!`, `let*`, `fn*` or `catch*`
    MalformedBinding(String),
    /// A value raised by the `throw` builtin
    UserThrow(Value),
    /// A builtin was called with the wrong number of arguments
    ArityError {
        expected: Arity,
        got: usize,
        expression: Option<String>,
    },
    TypeError(String),
    EvalError(String),
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: Arity, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError with expression context
    pub fn arity_error_with_expr(expected: Arity, got: usize, expression: String) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression),
        }
    }

    /// The value a `catch*` handler sees for this error.
    ///
    /// Thrown values pass through unchanged; every other error is caught as
    /// its message string.
    pub fn into_thrown_value(self) -> Value {
        match self {
            Error::UserThrow(value) => value,
            other => Value::Str(other.to_string()),
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::SyntaxError(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::SyntaxError(e) => {
                write!(f, "SyntaxError: {}", e.message)?;
                if let Some(found) = &e.found {
                    write!(f, "\nFound: {found}")?;
                }
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::NameNotFound(name) => write!(f, "'{name}' not found"),
            Error::NotCallable(value) => write!(f, "Cannot apply non-function: {value}"),
            Error::BindingArityMismatch { expected, got } => write!(
                f,
                "BindingArityMismatch: function expected {expected} arguments, got {got}"
            ),
            Error::SpecialFormArityError {
                form,
                expected,
                got,
            } => write!(
                f,
                "SpecialFormArityError: {form} expected {expected} arguments, got {got}"
            ),
            Error::MalformedBinding(msg) => write!(f, "MalformedBinding: {msg}"),
            Error::UserThrow(value) => write!(f, "Uncaught exception: {value}"),
            Error::ArityError {
                expected,
                got,
                expression,
            } => match expression {
                Some(expr) => write!(
                    f,
                    "ArityError: expression {expr}: expected {expected} arguments, got {got}"
                ),
                None => write!(
                    f,
                    "ArityError: function expected {expected} arguments but got {got}"
                ),
            },
            Error::TypeError(msg) => write!(f, "Type error: {msg}"),
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod printer;

#[cfg(feature = "reader")]
pub mod interpreter;

#[cfg(feature = "reader")]
pub mod reader;

#[cfg(feature = "reader")]
pub use interpreter::Interpreter;
