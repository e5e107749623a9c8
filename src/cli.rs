use crate::config::types::{EvaluatorConfig, ExecutionResult};
use crate::exec::evaluator::Evaluator;
use crate::observability::audit::init_audit_logger;
use crate::observability::metrics::get_metrics;
use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Smoke program for `self-test`
const SELF_TEST_PROGRAM: &str = r#"
print("Hello from pybox!")
import math
print(f"Pi = {math.pi:.2f}")
for i in range(3):
    print(f"Count: {i}")
"#;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Evaluator configuration file (JSON)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Append audit events as JSON lines to this file
    #[arg(long, global = true, value_name = "FILE")]
    audit_log: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate source code given on the command line
    Exec {
        /// Source code as string
        #[arg(long)]
        code: String,
    },
    /// Evaluate the contents of a file
    Run {
        /// Path to the program
        file: PathBuf,
    },
    /// List primitives and which best-effort modules are available
    Capabilities,
    /// Run the built-in smoke program
    SelfTest,
    /// Evaluate a program, then print metrics in Prometheus text format
    #[command(group(ArgGroup::new("program").required(true).args(["code", "file"])))]
    Metrics {
        /// Source code as string
        #[arg(long)]
        code: Option<String>,
        /// Path to the program
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

pub fn run() -> Result<()> {
    // Initialize structured logging
    env_logger::init();

    let cli = Cli::parse();

    let mut config = EvaluatorConfig::load_or_default(cli.config.as_ref())
        .context("failed to load evaluator configuration")?;
    if cli.audit_log.is_some() {
        config.audit_log = cli.audit_log.clone();
    }

    if let Err(e) = init_audit_logger(config.audit_log.clone()) {
        eprintln!("Failed to initialize audit logger: {}", e);
        std::process::exit(1);
    }

    let evaluator = Evaluator::new(config).context("invalid evaluator configuration")?;

    let mut out = io::stdout().lock();
    let success = match cli.command {
        Commands::Exec { code } => emit_json(&mut out, &evaluator, &code)?,
        Commands::Run { file } => emit_json(&mut out, &evaluator, &read_program(&file)?)?,
        Commands::Capabilities => {
            let report = evaluator.capabilities();
            emit(&mut out, &format!("{}\n", serde_json::to_string_pretty(&report)?))?;
            true
        }
        Commands::SelfTest => self_test(&mut out, &evaluator)?,
        Commands::Metrics { code, file } => {
            let code = match (code, file) {
                (Some(code), _) => code,
                (None, Some(file)) => read_program(&file)?,
                (None, None) => String::new(),
            };
            let result = evaluator.evaluate(&code);
            log::info!("metrics run finished: success={}", result.success);
            emit(&mut out, &get_metrics().export_prometheus())?;
            true
        }
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

fn read_program(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))
}

/// Write `text` and flush. A reader that went away (`pybox exec ... | head`)
/// is not an error; the rest of the output is dropped.
fn emit(out: &mut impl Write, text: &str) -> Result<()> {
    match out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        result => result.context("failed to write to stdout"),
    }
}

/// Print the result object; empty code is refused before evaluation
fn emit_json(out: &mut impl Write, evaluator: &Evaluator, code: &str) -> Result<bool> {
    if code.is_empty() {
        emit(out, &format!("{}\n", no_code_response()))?;
        return Ok(false);
    }

    let result = evaluator.evaluate(code);
    emit(out, &format!("{}\n", serde_json::to_string(&result)?))?;
    Ok(result.success)
}

fn no_code_response() -> serde_json::Value {
    serde_json::json!({"error": "No code provided", "success": false})
}

fn self_test(out: &mut impl Write, evaluator: &Evaluator) -> Result<bool> {
    emit(out, "Testing Python execution...\n")?;
    let result = evaluator.evaluate(SELF_TEST_PROGRAM);
    emit(out, &render_report(&result))?;
    Ok(result.success)
}

fn render_report(result: &ExecutionResult) -> String {
    let mut report = format!(
        "Success: {}\nOutput:\n{}\n",
        if result.success { "True" } else { "False" },
        result.output
    );
    if !result.error.is_empty() {
        report.push_str(&format!("Error: {}\n", result.error));
    }
    report.push_str(&format!("Time: {:.3}s\n", result.execution_time));
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exec_with_global_flags() {
        let cli = Cli::try_parse_from([
            "pybox",
            "exec",
            "--code",
            "print(1)",
            "--audit-log",
            "/tmp/audit.log",
        ])
        .unwrap();
        assert_eq!(cli.audit_log, Some(PathBuf::from("/tmp/audit.log")));
        assert!(matches!(cli.command, Commands::Exec { ref code } if code == "print(1)"));
    }

    #[test]
    fn test_parse_run_requires_file() {
        assert!(Cli::try_parse_from(["pybox", "run"]).is_err());
        let cli = Cli::try_parse_from(["pybox", "--config", "c.json", "run", "prog.py"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.json")));
        assert!(matches!(cli.command, Commands::Run { .. }));
    }

    #[test]
    fn test_no_code_response_shape() {
        assert_eq!(
            no_code_response().to_string(),
            r#"{"error":"No code provided","success":false}"#
        );
    }

    #[test]
    fn test_empty_code_refused() {
        let mut out = Vec::new();
        assert!(!emit_json(&mut out, &Evaluator::default(), "").unwrap());
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\"error\":\"No code provided\",\"success\":false}\n"
        );
    }

    #[test]
    fn test_result_line_written() {
        let mut out = Vec::new();
        assert!(emit_json(&mut out, &Evaluator::default(), "print(2)").unwrap());
        let line = String::from_utf8(out).unwrap();
        assert!(line.starts_with(r#"{"success":true,"output":"2\n","error":"","#));
        assert!(line.ends_with("}\n"));
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "no space left"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_closed_reader_is_not_an_error() {
        assert!(emit_json(&mut ClosedPipe, &Evaluator::default(), "print(1)").unwrap());
        assert!(self_test(&mut ClosedPipe, &Evaluator::default()).unwrap());
        assert!(emit(&mut FullDisk, "x\n").is_err());
    }

    #[test]
    fn test_parse_metrics_needs_a_program() {
        assert!(Cli::try_parse_from(["pybox", "metrics"]).is_err());
        let cli = Cli::try_parse_from(["pybox", "metrics", "--code", "print(1)"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Metrics { code: Some(ref code), file: None } if code == "print(1)"
        ));
        assert!(Cli::try_parse_from(["pybox", "metrics", "--code", "x", "--file", "p.py"]).is_err());
    }

    #[test]
    fn test_self_test_program() {
        let result = Evaluator::default().evaluate(SELF_TEST_PROGRAM);
        assert!(result.success, "{}", result.error);
        assert_eq!(
            result.output,
            "Hello from pybox!\nPi = 3.14\nCount: 0\nCount: 1\nCount: 2\n"
        );

        let report = render_report(&result);
        assert!(report.starts_with("Success: True\nOutput:\nHello from pybox!\n"));
        assert!(!report.contains("Error:"));
        assert!(report.ends_with("s\n"));
    }
}
