use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;
use tailisp::Interpreter;
use tailisp::ast::Value;
use tailisp::evaluator::Environment;
use tracing_subscriber::EnvFilter;

fn main() {
    // Diagnostics go to stderr so program output on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = panic::catch_unwind(|| run(args));

    match result {
        Ok(code) => process::exit(code),
        Err(panic_info) => {
            eprintln!("The interpreter encountered an unexpected error and must exit.");

            if let Some(msg) = panic_info.downcast_ref::<&str>() {
                eprintln!("Error: {msg}");
            } else if let Some(msg) = panic_info.downcast_ref::<String>() {
                eprintln!("Error: {msg}");
            } else {
                eprintln!("Error: Unknown panic occurred");
            }

            process::exit(1);
        }
    }
}

/// Run a script when a file is given, otherwise start the REPL; returns the exit code
fn run(args: Vec<String>) -> i32 {
    let interpreter = match Interpreter::new() {
        Ok(interpreter) => interpreter,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };

    if let Some((file, script_args)) = args.split_first() {
        if let Err(e) = interpreter.set_argv(script_args) {
            eprintln!("Error: {e}");
            return 1;
        }
        return match interpreter.load_file(file) {
            Ok(_) => 0,
            Err(e) => {
                eprintln!("Error: {e}");
                1
            }
        };
    }

    run_repl(&interpreter)
}

fn run_repl(interpreter: &Interpreter) -> i32 {
    println!("tailisp - a small Lisp with tail calls, macros and quasiquote");
    println!("Enter forms like: (+ 1 2)");
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            eprintln!("Could not initialize REPL: {err}");
            return 1;
        }
    };

    loop {
        match rl.readline("user> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(interpreter.env());
                        continue;
                    }
                    ":quit" | ":exit" => break,
                    _ => {}
                }

                match interpreter.rep(line) {
                    Ok(printed) => println!("{printed}"),
                    Err(e) => println!("Error: {e}"),
                }
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(err) => {
                println!("Error: {err:?}");
                return 1;
            }
        }
    }

    0
}

fn print_help() {
    println!("Commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+D     - Exit the interpreter");
    println!();
    println!("Special forms:");
    println!("  def! let* do if fn* quote quasiquote defmacro! macroexpand try*/catch*");
    println!();
    println!("Examples:");
    println!("  (def! fact (fn* (n acc) (if (= n 0) acc (fact (- n 1) (* n acc)))))");
    println!("  (fact 20 1)");
    println!("  (defmacro! unless (fn* (p a b) `(if ~p ~b ~a)))");
    println!("  (try* (throw {{:code 7}}) (catch* e (get e :code)))");
    println!("  (load-file \"script.lisp\")");
    println!();
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    // Separate builtin functions from everything defined in the language
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::BuiltinFunction { .. } => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in functions ({}):", builtins.len());
        // Print in columns for readability
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("Defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
