//! Textual rendering of values.
//!
//! `pr_str(value, true)` produces the readable form that the reader can parse
//! back (strings quoted and escaped). `pr_str(value, false)` is the display
//! form used by `str` and `println`, with raw string contents.

use std::fmt::Write;

use crate::ast::{KEYWORD_PREFIX, Value};

pub fn pr_str(value: &Value, readably: bool) -> String {
    let mut out = String::new();
    write_value(&mut out, value, readably);
    out
}

/// Print every value and join the results with `separator`
pub fn pr_seq<'a>(
    values: impl IntoIterator<Item = &'a Value>,
    readably: bool,
    separator: &str,
) -> String {
    let mut out = String::new();
    for (i, value) in values.into_iter().enumerate() {
        if i > 0 {
            out.push_str(separator);
        }
        write_value(&mut out, value, readably);
    }
    out
}

fn write_value(out: &mut String, value: &Value, readably: bool) {
    crate::with_stack_headroom(|| write_nested(out, value, readably));
}

fn write_nested(out: &mut String, value: &Value, readably: bool) {
    match value {
        Value::Nil => out.push_str("nil"),
        Value::True => out.push_str("true"),
        Value::False => out.push_str("false"),
        Value::Integer(n) => {
            let _ = write!(out, "{n}");
        }
        Value::Symbol(name) => out.push_str(name),
        Value::Str(s) => match s.strip_prefix(KEYWORD_PREFIX) {
            Some(name) => {
                out.push(':');
                out.push_str(name);
            }
            None if readably => write_escaped(out, s),
            None => out.push_str(s),
        },
        Value::List(items) => write_delimited(out, items, readably, '(', ')'),
        Value::Vector(items) => write_delimited(out, items, readably, '[', ']'),
        Value::HashMap(entries) => {
            out.push('{');
            for (i, (key, item)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_value(out, &Value::Str(key.clone()), readably);
                out.push(' ');
                write_value(out, item, readably);
            }
            out.push('}');
        }
        Value::Atom(cell) => {
            out.push_str("(atom ");
            write_value(out, &cell.borrow(), readably);
            out.push(')');
        }
        Value::BuiltinFunction { id, is_macro, .. } => {
            let kind = if *is_macro { "builtin-macro" } else { "builtin-function" };
            let _ = write!(out, "#<{kind}:{id}>");
        }
        Value::Function(closure) if closure.is_macro => out.push_str("#<macro>"),
        Value::Function(_) => out.push_str("#<function>"),
    }
}

fn write_delimited(out: &mut String, items: &[Value], readably: bool, open: char, close: char) {
    out.push(open);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        write_value(out, item, readably);
    }
    out.push(close);
}

fn write_escaped(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
}
