//! Quasiquote expansion.
//!
//! A quasiquoted template is rewritten into ordinary code built from `quote`,
//! `cons` and `concat`, which the evaluator then runs in tail position.

use crate::ast::{Value, sym};

/// Rewrite a quasiquoted template into an equivalent expression
///
/// - a non-sequence or empty sequence becomes `(quote ast)`
/// - `(unquote x)` becomes `x`
/// - a head of the form `(splice-unquote x)` becomes `(concat x <rest>)`
/// - anything else becomes `(cons <head> <rest>)`
pub fn quasiquote_expand(ast: &Value) -> Value {
    crate::with_stack_headroom(|| expand(ast))
}

fn expand(ast: &Value) -> Value {
    let Some(items) = ast.as_pair() else {
        return Value::list(vec![sym("quote"), ast.clone()]);
    };

    if let [Value::Symbol(head), arg] = items
        && head == "unquote"
    {
        return arg.clone();
    }

    let (first, rest) = (&items[0], Value::list(items[1..].to_vec()));

    if let Some([Value::Symbol(head), arg]) = first.as_pair()
        && head == "splice-unquote"
    {
        return Value::list(vec![sym("concat"), arg.clone(), quasiquote_expand(&rest)]);
    }

    Value::list(vec![
        sym("cons"),
        quasiquote_expand(first),
        quasiquote_expand(&rest),
    ])
}


#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod property_tests {
    use super::*;
    use crate::ast::val;
    use crate::evaluator::{create_global_env, eval};
    use proptest::prelude::*;

    fn eval_quasiquoted(template: &Value) -> Value {
        let env = create_global_env();
        eval(&quasiquote_expand(template), &env).unwrap()
    }

    proptest! {
        #[test]
        fn quasiquote_without_unquotes_is_quote(items in prop::collection::vec(any::<i64>(), 0..8)) {
            let template = Value::list(items.iter().copied().map(val).collect());
            prop_assert_eq!(eval_quasiquoted(&template), template);
        }

        #[test]
        fn splice_inserts_elements_in_place(
            before in prop::collection::vec(any::<i64>(), 0..4),
            spliced in prop::collection::vec(any::<i64>(), 0..4),
            after in prop::collection::vec(any::<i64>(), 0..4),
        ) {
            let quoted = Value::list(vec![
                sym("quote"),
                Value::list(spliced.iter().copied().map(val).collect()),
            ]);
            let mut template: Vec<Value> = before.iter().copied().map(val).collect();
            template.push(Value::list(vec![sym("splice-unquote"), quoted]));
            template.extend(after.iter().copied().map(val));

            let expected: Vec<Value> = before
                .iter()
                .chain(&spliced)
                .chain(&after)
                .copied()
                .map(val)
                .collect();
            prop_assert_eq!(eval_quasiquoted(&Value::list(template)), Value::list(expected));
        }
    }
}
