//! Core types and structures for the pybox evaluator
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Default recursion limit for evaluated code
pub const DEFAULT_RECURSION_LIMIT: usize = 1000;

/// Default worker thread stack (MB)
pub const DEFAULT_WORKER_STACK_MB: usize = 256;

/// A single evaluation request: the source text to run
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub code: String,
}

/// Result of one evaluation
///
/// `success` is true iff no fault was raised and nothing was written to
/// the error stream. Serialized as exactly four fields.
#[derive(Default, Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    /// Overall success flag
    pub success: bool,
    /// Captured standard output
    pub output: String,
    /// Fault text, captured standard error, or an evaluator failure
    pub error: String,
    /// Wall clock time from invocation start to result finalization (seconds)
    pub execution_time: f64,
}

impl ExecutionResult {
    /// Result for a failure of the evaluation machinery itself
    pub fn evaluator_failure(message: impl std::fmt::Display, execution_time: f64) -> Self {
        ExecutionResult {
            success: false,
            output: String::new(),
            error: format!("Execution failed: {}", message),
            execution_time,
        }
    }
}

/// How one evaluation ended
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    /// No fault and nothing on the error stream
    #[serde(rename = "OK")]
    Ok,
    /// Submitted code raised (including syntax errors)
    #[serde(rename = "FAULT")]
    Fault,
    /// Ran to completion but wrote to the error stream
    #[serde(rename = "STDERR")]
    StderrOutput,
    /// The evaluation machinery itself failed
    #[serde(rename = "IE")]
    EvaluatorFailure,
}

impl ExecutionStatus {
    pub fn is_success(self) -> bool {
        self == ExecutionStatus::Ok
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Ok => write!(f, "OK"),
            ExecutionStatus::Fault => write!(f, "FAULT"),
            ExecutionStatus::StderrOutput => write!(f, "STDERR"),
            ExecutionStatus::EvaluatorFailure => write!(f, "IE"),
        }
    }
}

/// The specific evidence that decided the status
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VerdictCause {
    CleanRun,
    RaisedFault,
    SyntaxFault,
    StderrWrite,
    WorkerSpawnFailed,
    WorkerPanicked,
}

/// A fault raised by submitted code, flattened to text so it can leave
/// the worker thread
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaultEvidence {
    /// Short category name, e.g. `ZeroDivisionError`
    pub kind: String,
    /// `str()` of the exception
    pub message: String,
    /// Full trace, ending with the qualified `Category: message` line
    pub traceback: String,
    pub syntax: bool,
}

/// Everything observed while running one program
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunEvidence {
    pub stdout: String,
    pub stderr: String,
    pub fault: Option<FaultEvidence>,
    pub output_integrity: OutputIntegrity,
    /// Bytes dropped from either stream by the output caps
    pub dropped_bytes: usize,
}

/// Why a result was classified the way it was
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VerdictProvenance {
    pub status: ExecutionStatus,
    pub cause: VerdictCause,
    pub evidence_sources: Vec<String>,
    pub fault_kind: Option<String>,
    pub output_integrity: OutputIntegrity,
    pub execution_time: f64,
}

/// Output integrity classification
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutputIntegrity {
    #[default]
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "truncated_by_limit")]
    TruncatedByLimit,
}

impl std::fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::TruncatedByLimit => write!(f, "truncated_by_limit"),
        }
    }
}

/// Byte caps for the captured streams; `None` means unbounded
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputLimits {
    pub stdout_limit: Option<usize>,
    pub stderr_limit: Option<usize>,
}

/// Evaluator configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Maximum nesting of user function calls
    pub recursion_limit: usize,
    /// Stack size of the worker thread running the interpreter (MB)
    pub worker_stack_mb: usize,
    /// Caps on captured output
    pub output_limits: OutputLimits,
    /// Best-effort modules to leave out of the capability set
    pub denied_modules: Vec<String>,
    /// Append audit events as JSON lines to this file
    pub audit_log: Option<PathBuf>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            worker_stack_mb: DEFAULT_WORKER_STACK_MB,
            output_limits: OutputLimits::default(),
            denied_modules: Vec::new(),
            audit_log: None,
        }
    }
}

/// Custom error types for pybox
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_serializes_exactly_four_fields() {
        let result = ExecutionResult {
            success: true,
            output: "hi\n".to_string(),
            error: String::new(),
            execution_time: 0.25,
        };
        let json = serde_json::to_value(&result).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), 4);
        assert_eq!(object["success"], true);
        assert_eq!(object["output"], "hi\n");
        assert_eq!(object["error"], "");
        assert_eq!(object["execution_time"], 0.25);
    }

    #[test]
    fn test_evaluator_failure_prefix() {
        let result = ExecutionResult::evaluator_failure("worker panicked", 0.1);
        assert!(!result.success);
        assert_eq!(result.error, "Execution failed: worker panicked");
    }

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config: EvaluatorConfig = serde_json::from_str(r#"{"recursion_limit": 50}"#).unwrap();
        assert_eq!(config.recursion_limit, 50);
        assert_eq!(config.worker_stack_mb, DEFAULT_WORKER_STACK_MB);
        assert!(config.denied_modules.is_empty());
        assert_eq!(config.output_limits, OutputLimits::default());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_string(&ExecutionStatus::Ok).unwrap(), "\"OK\"");
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::StderrOutput).unwrap(),
            "\"STDERR\""
        );
        assert_eq!(serde_json::to_string(&VerdictCause::RaisedFault).unwrap(), "\"raised_fault\"");
        assert!(ExecutionStatus::Ok.is_success());
        assert!(!ExecutionStatus::Fault.is_success());
        assert_eq!(ExecutionStatus::EvaluatorFailure.to_string(), "IE");
    }

    #[test]
    fn test_output_integrity_display() {
        assert_eq!(format!("{}", OutputIntegrity::Complete), "complete");
        assert_eq!(format!("{}", OutputIntegrity::TruncatedByLimit), "truncated_by_limit");
    }
}
