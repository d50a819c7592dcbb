use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::char,
    combinator::value,
    error::ErrorKind,
    multi::many0,
    sequence::preceded,
};

use crate::ast::{KEYWORD_PREFIX, NumberType, Value, kw, sym};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Characters that end an atom token
const DELIMITERS: &str = "[]{}()'`~^@\",;";

/// Reader failure carrying the classification the caller reports
#[derive(Debug)]
struct ReadError<'a> {
    input: &'a str,
    kind: ParseErrorKind,
    message: String,
}

impl<'a> ReadError<'a> {
    fn new(input: &'a str, kind: ParseErrorKind, message: impl Into<String>) -> Self {
        ReadError {
            input,
            kind,
            message: message.into(),
        }
    }

    /// Unrecoverable: no other alternative should be tried
    fn fail<T>(
        input: &'a str,
        kind: ParseErrorKind,
        message: impl Into<String>,
    ) -> IResult<&'a str, T, Self> {
        Err(nom::Err::Failure(Self::new(input, kind, message)))
    }
}

impl<'a> nom::error::ParseError<&'a str> for ReadError<'a> {
    fn from_error_kind(input: &'a str, kind: ErrorKind) -> Self {
        ReadError::new(
            input,
            ParseErrorKind::InvalidSyntax,
            format!("Unexpected input ({})", kind.description()),
        )
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

type ReadResult<'a, T> = IResult<&'a str, T, ReadError<'a>>;

/// Skip whitespace, commas and `;` comments
fn skip_ignored(input: &str) -> ReadResult<'_, ()> {
    value(
        (),
        many0(alt((
            value((), take_while1(|c: char| c.is_whitespace() || c == ',')),
            value((), preceded(char(';'), take_while(|c: char| c != '\n'))),
        ))),
    )
    .parse(input)
}

/// Parse one form, dispatching on its first character
fn parse_form(input: &str, depth: usize) -> ReadResult<'_, Value> {
    if depth >= MAX_PARSE_DEPTH {
        return ReadError::fail(
            input,
            ParseErrorKind::TooDeeplyNested,
            format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
        );
    }

    let (input, _) = skip_ignored(input)?;
    match input.chars().next() {
        None => ReadError::fail(input, ParseErrorKind::Incomplete, "Unexpected end of input"),
        Some('(') => {
            let (rest, items) = parse_sequence(input, ')', depth)?;
            Ok((rest, Value::list(items)))
        }
        Some('[') => {
            let (rest, items) = parse_sequence(input, ']', depth)?;
            Ok((rest, Value::vector(items)))
        }
        Some('{') => {
            let (rest, items) = parse_sequence(input, '}', depth)?;
            match Value::hash_map_from_pairs(&items) {
                Ok(map) => Ok((rest, map)),
                Err(err) => ReadError::fail(
                    input,
                    ParseErrorKind::InvalidSyntax,
                    format!("Invalid hash-map literal: {err}"),
                ),
            }
        }
        Some(c @ (')' | ']' | '}')) => ReadError::fail(
            input,
            ParseErrorKind::InvalidSyntax,
            format!("Unexpected '{c}'"),
        ),
        Some('\'') => parse_reader_macro(&input[1..], "quote", depth),
        Some('`') => parse_reader_macro(&input[1..], "quasiquote", depth),
        Some('@') => parse_reader_macro(&input[1..], "deref", depth),
        Some('~') => match input[1..].strip_prefix('@') {
            Some(rest) => parse_reader_macro(rest, "splice-unquote", depth),
            None => parse_reader_macro(&input[1..], "unquote", depth),
        },
        Some('^') => ReadError::fail(
            input,
            ParseErrorKind::Unsupported,
            "Metadata ('^') is not supported",
        ),
        Some('"') => parse_string(input),
        Some(_) => parse_atom(input),
    }
}

/// Parse the elements of a delimited sequence; `input` starts at the opener
fn parse_sequence(input: &str, close: char, depth: usize) -> ReadResult<'_, Vec<Value>> {
    if depth + 1 >= MAX_PARSE_DEPTH {
        return ReadError::fail(
            input,
            ParseErrorKind::TooDeeplyNested,
            format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
        );
    }
    let open = match close {
        ')' => '(',
        ']' => '[',
        _ => '{',
    };
    let (mut input, _) = char(open).parse(input)?;
    let mut items = Vec::new();

    loop {
        let (rest, _) = skip_ignored(input)?;
        match rest.chars().next() {
            None => {
                return ReadError::fail(
                    rest,
                    ParseErrorKind::Incomplete,
                    format!("Expected '{close}', got end of input"),
                );
            }
            Some(c) if c == close => return Ok((&rest[c.len_utf8()..], items)),
            Some(_) => {
                let (rest, item) = parse_form(rest, depth + 1)?;
                items.push(item);
                input = rest;
            }
        }
    }
}

/// `'x` style shorthand: wrap the next form as `(name x)`
fn parse_reader_macro<'a>(input: &'a str, name: &str, depth: usize) -> ReadResult<'a, Value> {
    let (rest, form) = parse_form(input, depth + 1)?;
    Ok((rest, Value::list(vec![sym(name), form])))
}

/// Parse a string literal
fn parse_string(input: &str) -> ReadResult<'_, Value> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => return Ok((char_iter.as_str(), Value::Str(text))),
            Some('\\') => {
                match char_iter.next() {
                    Some('n') => text.push('\n'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some(other) => {
                        return ReadError::fail(
                            remaining,
                            ParseErrorKind::InvalidSyntax,
                            format!("Unknown escape sequence '\\{other}' in string"),
                        );
                    }
                    None => {
                        return ReadError::fail(
                            char_iter.as_str(),
                            ParseErrorKind::Incomplete,
                            "Unterminated string",
                        );
                    }
                }
                remaining = char_iter.as_str();
            }
            Some(KEYWORD_PREFIX) => return reserved_character(remaining),
            Some(ch) => {
                text.push(ch);
                remaining = char_iter.as_str();
            }
            None => {
                return ReadError::fail(remaining, ParseErrorKind::Incomplete, "Unterminated string");
            }
        }
    }
}

/// Parse an atom token: nil, booleans, integers, keywords and symbols
fn parse_atom(input: &str) -> ReadResult<'_, Value> {
    let (rest, token) =
        take_while1(|c: char| !c.is_whitespace() && !DELIMITERS.contains(c)).parse(input)?;
    if let Some(offset) = token.find(KEYWORD_PREFIX) {
        return reserved_character(&input[offset..]);
    }

    let atom = match token {
        "nil" => Value::Nil,
        "true" => Value::True,
        "false" => Value::False,
        _ if is_integer_literal(token) => match token.parse::<NumberType>() {
            Ok(n) => Value::Integer(n),
            Err(_) => {
                return ReadError::fail(
                    input,
                    ParseErrorKind::ImplementationLimit,
                    format!("Integer literal out of range: {token}"),
                );
            }
        },
        _ => match token.strip_prefix(':') {
            Some(name) => kw(name),
            None => sym(token),
        },
    };
    Ok((rest, atom))
}

/// The keyword marker is never valid source text, so no string or symbol can
/// pass for a keyword
fn reserved_character<T>(input: &str) -> ReadResult<'_, T> {
    ReadError::fail(
        input,
        ParseErrorKind::InvalidSyntax,
        format!("Reserved character {KEYWORD_PREFIX:?} (U+029E) is not allowed in source text"),
    )
}

fn is_integer_literal(token: &str) -> bool {
    let digits = token.strip_prefix('-').unwrap_or(token);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Convert a reader failure into a `ParseError` pointing at its position
fn to_parse_error(input: &str, error: nom::Err<ReadError<'_>>) -> Error {
    let error = match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => e,
        nom::Err::Incomplete(_) => {
            return ParseError::from_message(ParseErrorKind::Incomplete, "Incomplete input").into();
        }
    };
    let byte_offset = input.len().saturating_sub(error.input.len());
    let char_offset = input[..byte_offset].chars().count();
    let found = error.input.chars().next().map(String::from);
    ParseError::with_context_and_found(error.kind, error.message, input, char_offset, found).into()
}

/// Read the remaining input after a form, skipping ignorable characters
fn rest_after_ignored(input: &str) -> &str {
    match skip_ignored(input) {
        Ok((rest, ())) => rest,
        Err(_) => input,
    }
}

/// Parse a single form from text.
///
/// Input containing only whitespace, commas and comments yields `nil`.
/// Anything but ignorable characters after the form is an error.
pub fn parse(input: &str) -> Result<Value, Error> {
    let start = rest_after_ignored(input);
    if start.is_empty() {
        return Ok(Value::Nil);
    }

    let (rest, form) = parse_form(start, 0).map_err(|e| to_parse_error(input, e))?;
    let rest = rest_after_ignored(rest);
    if !rest.is_empty() {
        let offset = input[..input.len() - rest.len()].chars().count();
        return Err(ParseError::with_context_and_found(
            ParseErrorKind::TrailingContent,
            "Unexpected content after the first form",
            input,
            offset,
            rest.chars().next().map(String::from),
        )
        .into());
    }
    Ok(form)
}

/// Parse every form in the text, in order
pub fn parse_all(input: &str) -> Result<Vec<Value>, Error> {
    let mut forms = Vec::new();
    let mut rest = rest_after_ignored(input);
    while !rest.is_empty() {
        let (next, form) = parse_form(rest, 0).map_err(|e| to_parse_error(input, e))?;
        forms.push(form);
        rest = rest_after_ignored(next);
    }
    Ok(forms)
}
