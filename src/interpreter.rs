//! A ready-to-use interpreter: the root environment with the builtin library,
//! `eval`, `*ARGV*` and a small prelude defined in the language itself.

use crate::Error;
use crate::ast::{Value, check_plain_text};
use crate::builtinops::Arity;
use crate::evaluator::{Environment, apply, create_global_env, eval};
use crate::printer::pr_str;
use crate::reader::parse_all;

/// Definitions evaluated in every new interpreter, in order
const PRELUDE: &[&str] = &[
    "(def! not (fn* (a) (if a false true)))",
    r#"(def! load-file (fn* (f) (eval (read-string (str "(do " (slurp f) "\nnil)")))))"#,
    r#"(defmacro! cond (fn* (& xs)
         (if (> (count xs) 0)
           (list 'if (first xs)
                 (if (> (count xs) 1) (nth xs 1) (throw "odd number of forms to cond"))
                 (cons 'cond (rest (rest xs)))))))"#,
    "(defmacro! or (fn* (& xs)
       (if (empty? xs)
         nil
         (if (= 1 (count xs))
           (first xs)
           `(let* (or__value ~(first xs)) (if or__value or__value (or ~@(rest xs))))))))",
];

pub struct Interpreter {
    env: Environment,
}

impl Interpreter {
    /// Build the root environment and evaluate the prelude in it
    pub fn new() -> Result<Self, Error> {
        let env = create_global_env();

        // `eval` always evaluates in the root environment, whatever the caller's scope
        let root = env.clone();
        env.register_builtin_function("eval", move |args: &[Value]| match args {
            [form] => eval(form, &root),
            _ => Err(Error::arity_error(Arity::Exact(1), args.len())),
        });
        env.set("*ARGV*", Value::list(vec![]));

        let interpreter = Interpreter { env };
        for definition in PRELUDE {
            interpreter.eval_str(definition)?;
        }
        tracing::debug!(definitions = PRELUDE.len(), "prelude loaded");
        Ok(interpreter)
    }

    /// Read and evaluate every form in `source`, returning the last result
    /// (`nil` when there are no forms)
    pub fn eval_str(&self, source: &str) -> Result<Value, Error> {
        let mut result = Value::Nil;
        for form in parse_all(source)? {
            result = eval(&form, &self.env)?;
        }
        Ok(result)
    }

    /// Read, evaluate and print: the readable form of the result
    pub fn rep(&self, line: &str) -> Result<String, Error> {
        Ok(pr_str(&self.eval_str(line)?, true))
    }

    /// Bind `*ARGV*` to the given command-line arguments as strings
    pub fn set_argv<I, S>(&self, args: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = Vec::new();
        for arg in args {
            let arg = arg.into();
            check_plain_text(&arg, "command-line argument")?;
            argv.push(Value::Str(arg));
        }
        self.env.set("*ARGV*", Value::list(argv));
        Ok(())
    }

    /// Evaluate every form of a source file through `load-file`
    pub fn load_file(&self, path: &str) -> Result<Value, Error> {
        tracing::info!(%path, "loading file");
        let load_file = self.env.get("load-file")?;
        apply(&load_file, vec![Value::Str(path.to_owned())])
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }
}
