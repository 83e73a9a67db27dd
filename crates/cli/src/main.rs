//! Weft CLI
//!
//! Three entry modes, exit code 0 on success and -1 on evaluation errors:
//!
//! - `weft -e "(expr)"`: evaluate one expression, print the result
//! - `weft script.weft [args...]`: evaluate `(load-file "script.weft")` with
//!   the extra arguments bound as `args`
//! - `weft`: interactive REPL with history at `./weft-history.txt`

use clap::Parser as ClapParser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::process;
use weft_cli::config::WeftConfig;
use weft_cli::eval::Env;
use weft_runtime::value::Value;

const HISTORY_FILE: &str = "./weft-history.txt";

#[derive(ClapParser)]
#[command(name = "weft")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Weft dataflow wire runtime", long_about = None)]
struct Cli {
    /// Script file to evaluate
    script: Option<PathBuf>,

    /// Arguments handed to the script (bound as `args`)
    args: Vec<String>,

    /// Evaluate one expression and exit
    #[arg(short = 'e', long = "eval", value_name = "EXPR", conflicts_with = "script")]
    expr: Option<String>,

    /// Configuration file
    #[arg(long, value_name = "PATH", default_value = "weft.toml")]
    config: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match WeftConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("weft: bad configuration: {}", e);
            process::exit(-1);
        }
    };
    if let Some(root) = &config.root_path {
        weft_runtime::ffi::set_root_path(root);
    }

    let mut env = Env::new(config);
    bind_args(&mut env, &cli.args);

    let code = if let Some(expr) = &cli.expr {
        eval_once(&mut env, expr)
    } else if let Some(script) = &cli.script {
        eval_once(&mut env, &format!("(load-file {:?})", script.to_string_lossy()))
    } else {
        repl(&mut env)
    };

    weft_runtime::mesh::run_exit_callbacks();
    process::exit(code);
}

fn bind_args(env: &mut Env, args: &[String]) {
    // Reachable from scripts as `args`
    let seq = Value::Seq(args.iter().map(|a| Value::String(a.clone())).collect());
    env.define("args", seq);
}

fn eval_once(env: &mut Env, src: &str) -> i32 {
    match env.eval_str(src) {
        Ok(Value::None) => 0,
        Ok(value) => {
            println!("{}", value);
            0
        }
        Err(e) => {
            eprintln!("weft: {}", e);
            -1
        }
    }
}

fn repl(env: &mut Env) -> i32 {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("weft: cannot start the REPL: {}", e);
            return -1;
        }
    };
    let _ = editor.load_history(HISTORY_FILE);

    loop {
        match editor.readline("weft> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                match env.eval_str(line) {
                    Ok(Value::None) => {}
                    Ok(value) => println!("{}", value),
                    Err(e) => eprintln!("weft: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("weft: readline: {}", e);
                break;
            }
        }
    }
    let _ = editor.save_history(HISTORY_FILE);
    0
}
