//! rell - console and script runner
//!
//! Usage:
//!   rell                    # interactive console
//!   rell script.rell        # run a script, print its product
//!   rell -e "1 + 2"         # evaluate one expression and exit
//!   rell --check script.rell  # scan only, report syntax errors
//!
//! Console commands:
//!   :quit, :q               # exit
//!   :help                   # show help
//!
//! Diagnostics go through `tracing`; set RELL_LOG=debug to watch the
//! collector and evaluator at work.

use clap::Parser as ClapParser;
use rell_runtime::{HostError, Runtime, scan_source};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "rell")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "The Rell language", long_about = None)]
struct Args {
    /// Script to run (starts the console if not given)
    file: Option<PathBuf>,

    /// Evaluate one expression and print its product
    #[arg(short = 'e', long = "eval")]
    expression: Option<String>,

    /// Scan the input without evaluating it; exit status reports
    /// whether it is well-formed
    #[arg(long)]
    check: bool,

    /// GC ballast multiplier for allocation-heavy workloads
    #[arg(long, default_value_t = 1)]
    scale: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("RELL_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), String> {
    let mut runtime = Runtime::startup(args.scale.max(1));

    if args.check {
        let (name, source) = match (&args.expression, &args.file) {
            (Some(expression), _) => ("eval".to_string(), expression.clone()),
            (None, Some(file)) => {
                let source = std::fs::read_to_string(file)
                    .map_err(|err| format!("cannot read {}: {err}", file.display()))?;
                (file.display().to_string(), source)
            }
            (None, None) => return Err("--check needs a script or -e expression".to_string()),
        };
        return check_source(&mut runtime, &name, &source);
    }
    if let Some(expression) = args.expression {
        return eval_and_print(&mut runtime, &expression, true);
    }
    if let Some(file) = args.file {
        let source = std::fs::read_to_string(&file)
            .map_err(|err| format!("cannot read {}: {err}", file.display()))?;
        return eval_and_print(&mut runtime, &source, false);
    }
    console(&mut runtime)
}

/// Scan only: well-formed input passes silently, a syntax error becomes
/// the process's failure message. Nothing is evaluated.
fn check_source(runtime: &mut Runtime, name: &str, source: &str) -> Result<(), String> {
    match scan_source(runtime.machine(), name, source) {
        Ok(_) => Ok(()),
        Err(err) => Err(format!("{name}: {err}")),
    }
}

/// Evaluate one source string; print the molded product when asked.
/// Uncaught errors are already rendered by the runtime.
fn eval_and_print(runtime: &mut Runtime, source: &str, print: bool) -> Result<(), String> {
    match runtime.eval_text(source) {
        Ok(handle) => {
            if print {
                println!("{}", runtime.mold_of(&handle));
            }
            runtime.release(handle);
            Ok(())
        }
        Err(HostError::Halted) => Err("** halted".to_string()),
        Err(err) => Err(err.to_string()),
    }
}

fn console(runtime: &mut Runtime) -> Result<(), String> {
    let mut editor =
        DefaultEditor::new().map_err(|err| format!("cannot start line editor: {err}"))?;
    println!("rell {} - :help for help, :quit to exit", env!("CARGO_PKG_VERSION"));

    loop {
        match editor.readline(">> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                match line {
                    ":quit" | ":q" => return Ok(()),
                    ":help" => {
                        println!(":quit, :q   exit");
                        println!(":help       this text");
                        println!("anything else evaluates and prints its product");
                        continue;
                    }
                    _ => {}
                }
                match runtime.eval_text(line) {
                    Ok(handle) => {
                        let molded = runtime.mold_of(&handle);
                        if !molded.is_empty() {
                            println!("== {molded}");
                        }
                        runtime.release(handle);
                    }
                    // Errors print and the session continues; only a
                    // halt tears the console down.
                    Err(HostError::Halted) => return Err("** halted".to_string()),
                    Err(err) => println!("{err}"),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => return Ok(()),
            Err(err) => return Err(format!("line editor failed: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_eval_flag_runs_expression() {
        let mut runtime = Runtime::startup(1);
        assert!(eval_and_print(&mut runtime, "1 + 2", false).is_ok());
    }

    #[test]
    fn test_script_file_runs() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "x: 40 + 2").expect("write script");
        let args = Args {
            file: Some(file.path().to_path_buf()),
            expression: None,
            check: false,
            scale: 1,
        };
        assert!(run(args).is_ok());
    }

    #[test]
    fn test_uncaught_error_fails_the_run() {
        let args = Args {
            file: None,
            expression: Some("1 / 0".to_string()),
            check: false,
            scale: 1,
        };
        let err = run(args).unwrap_err();
        assert!(err.contains("zero-divide"));
    }

    #[test]
    fn test_check_passes_well_formed_source() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "f: func [a] [a + 1]").expect("write script");
        let args = Args {
            file: Some(file.path().to_path_buf()),
            expression: None,
            check: true,
            scale: 1,
        };
        assert!(run(args).is_ok());
    }

    #[test]
    fn test_check_reports_syntax_error_without_evaluating() {
        // The expression would divide by zero if run; --check only scans,
        // so the unclosed block is the failure it reports.
        let args = Args {
            file: None,
            expression: Some("[1 / 0".to_string()),
            check: true,
            scale: 1,
        };
        let err = run(args).unwrap_err();
        assert!(err.contains("missing closing"));
        assert!(!err.contains("zero-divide"));
    }

    #[test]
    fn test_check_without_input_is_an_error() {
        let args = Args {
            file: None,
            expression: None,
            check: true,
            scale: 1,
        };
        assert!(run(args).is_err());
    }
}
