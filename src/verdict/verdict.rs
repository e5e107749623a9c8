/// Outcome classification
/// Turns what one run produced (captured streams, an optional fault) into
/// the success flag, the `error` text and the provenance behind them.
use crate::config::types::*;

/// A classified run, before timing is attached
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    pub status: ExecutionStatus,
    pub cause: VerdictCause,
    pub error: String,
    pub evidence_sources: Vec<String>,
    pub fault_kind: Option<String>,
}

impl Verdict {
    /// Attach timing and output to produce the caller-facing result
    pub fn into_result(self, evidence: RunEvidence, execution_time: f64) -> ExecutionResult {
        ExecutionResult {
            success: self.status.is_success(),
            output: evidence.stdout,
            error: self.error,
            execution_time,
        }
    }

    pub fn provenance(&self, integrity: OutputIntegrity, execution_time: f64) -> VerdictProvenance {
        VerdictProvenance {
            status: self.status,
            cause: self.cause,
            evidence_sources: self.evidence_sources.clone(),
            fault_kind: self.fault_kind.clone(),
            output_integrity: integrity,
            execution_time,
        }
    }
}

/// Verdict classifier - pure function over run evidence
pub struct VerdictClassifier;

impl VerdictClassifier {
    /// A raised fault wins over stderr contents; stderr contents alone
    /// still mean failure.
    pub fn classify(evidence: &RunEvidence) -> Verdict {
        if let Some(fault) = &evidence.fault {
            return Self::classify_fault(fault);
        }
        if !evidence.stderr.is_empty() {
            return Verdict {
                status: ExecutionStatus::StderrOutput,
                cause: VerdictCause::StderrWrite,
                error: evidence.stderr.clone(),
                evidence_sources: vec!["stderr".to_string()],
                fault_kind: None,
            };
        }
        Verdict {
            status: ExecutionStatus::Ok,
            cause: VerdictCause::CleanRun,
            error: String::new(),
            evidence_sources: vec!["fault".to_string(), "stderr".to_string()],
            fault_kind: None,
        }
    }

    /// Verdict for a failure of the worker rather than the submitted code
    pub fn classify_evaluator_failure(cause: VerdictCause, message: &str) -> Verdict {
        Verdict {
            status: ExecutionStatus::EvaluatorFailure,
            cause,
            error: format!("Execution failed: {}", message),
            evidence_sources: vec!["worker".to_string()],
            fault_kind: None,
        }
    }

    fn classify_fault(fault: &FaultEvidence) -> Verdict {
        let cause = if fault.syntax {
            VerdictCause::SyntaxFault
        } else {
            VerdictCause::RaisedFault
        };
        Verdict {
            status: ExecutionStatus::Fault,
            cause,
            error: Self::render_fault(fault),
            evidence_sources: vec!["fault".to_string(), "traceback".to_string()],
            fault_kind: Some(fault.kind.clone()),
        }
    }

    /// `"<Category>: <message>\n"` followed by the full trace
    pub fn render_fault(fault: &FaultEvidence) -> String {
        format!("{}: {}\n{}", fault.kind, fault.message, fault.traceback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_division() -> FaultEvidence {
        FaultEvidence {
            kind: "ZeroDivisionError".to_string(),
            message: "division by zero".to_string(),
            traceback: "Traceback (most recent call last):\n  File \"<string>\", line 1, in <module>\nZeroDivisionError: division by zero\n".to_string(),
            syntax: false,
        }
    }

    #[test]
    fn test_classify_clean_run() {
        let evidence = RunEvidence {
            stdout: "Hello, World!\n".to_string(),
            ..Default::default()
        };
        let verdict = VerdictClassifier::classify(&evidence);
        assert_eq!(verdict.status, ExecutionStatus::Ok);
        assert_eq!(verdict.cause, VerdictCause::CleanRun);

        let result = verdict.into_result(evidence, 0.01);
        assert!(result.success);
        assert_eq!(result.output, "Hello, World!\n");
        assert_eq!(result.error, "");
    }

    #[test]
    fn test_classify_fault_renders_header_and_trace() {
        let evidence = RunEvidence {
            stdout: "before\n".to_string(),
            fault: Some(zero_division()),
            ..Default::default()
        };
        let verdict = VerdictClassifier::classify(&evidence);
        assert_eq!(verdict.status, ExecutionStatus::Fault);
        assert_eq!(verdict.fault_kind.as_deref(), Some("ZeroDivisionError"));
        assert!(verdict.error.starts_with(
            "ZeroDivisionError: division by zero\nTraceback (most recent call last):\n"
        ));

        let result = verdict.into_result(evidence, 0.01);
        assert!(!result.success);
        assert_eq!(result.output, "before\n");
    }

    #[test]
    fn test_fault_precedes_stderr() {
        let evidence = RunEvidence {
            stderr: "warning\n".to_string(),
            fault: Some(zero_division()),
            ..Default::default()
        };
        let verdict = VerdictClassifier::classify(&evidence);
        assert_eq!(verdict.cause, VerdictCause::RaisedFault);
        assert!(!verdict.error.contains("warning"));
    }

    #[test]
    fn test_stderr_alone_is_failure() {
        let evidence = RunEvidence {
            stdout: "partial\n".to_string(),
            stderr: "oops\n".to_string(),
            ..Default::default()
        };
        let verdict = VerdictClassifier::classify(&evidence);
        assert_eq!(verdict.status, ExecutionStatus::StderrOutput);
        assert_eq!(verdict.error, "oops\n");
    }

    #[test]
    fn test_empty_message_keeps_separator() {
        let fault = FaultEvidence {
            kind: "SystemExit".to_string(),
            message: String::new(),
            traceback: "Traceback (most recent call last):\nSystemExit\n".to_string(),
            syntax: false,
        };
        assert!(VerdictClassifier::render_fault(&fault).starts_with("SystemExit: \n"));
    }

    #[test]
    fn test_syntax_fault_cause() {
        let fault = FaultEvidence {
            kind: "SyntaxError".to_string(),
            message: "invalid syntax (<string>, line 1)".to_string(),
            traceback: String::new(),
            syntax: true,
        };
        let evidence = RunEvidence {
            fault: Some(fault),
            ..Default::default()
        };
        assert_eq!(
            VerdictClassifier::classify(&evidence).cause,
            VerdictCause::SyntaxFault
        );
    }

    #[test]
    fn test_evaluator_failure_provenance() {
        let verdict =
            VerdictClassifier::classify_evaluator_failure(VerdictCause::WorkerPanicked, "boom");
        assert_eq!(verdict.error, "Execution failed: boom");
        let provenance = verdict.provenance(OutputIntegrity::Complete, 0.5);
        assert_eq!(provenance.status, ExecutionStatus::EvaluatorFailure);
        assert_eq!(provenance.execution_time, 0.5);
    }
}
