use crate::capability::{CapabilityReport, CapabilitySet};
use crate::config::types::{
    EvalError, EvaluatorConfig, ExecutionResult, FaultEvidence, OutputIntegrity, Result,
    RunEvidence, VerdictCause, VerdictProvenance,
};
use crate::config::validator::validate_strict;
/// Sandboxed evaluation of one program per call
use crate::exec::capture::CapturedStreams;
use crate::interp::{Fault, Interpreter};
use crate::observability::audit::{events, CorrelationIds};
use crate::observability::metrics::get_metrics;
use crate::verdict::verdict::{Verdict, VerdictClassifier};
use std::any::Any;
use std::thread;
use std::time::{Duration, Instant};

/// Everything known about one evaluation
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub result: ExecutionResult,
    pub provenance: VerdictProvenance,
    pub capabilities: CapabilityReport,
    pub run_id: String,
}

/// What the worker thread hands back. Only owned text crosses the thread
/// boundary; interpreter values never leave the worker.
struct WorkerOutput {
    evidence: RunEvidence,
    capabilities: CapabilityReport,
}

/// Runs untrusted programs against a fresh capability set
///
/// Holds configuration only. Every call builds its own interpreter, sinks and
/// namespace on a dedicated worker thread, so one `Evaluator` can be shared by
/// concurrent callers without locking.
#[derive(Debug, Clone)]
pub struct Evaluator {
    config: EvaluatorConfig,
}

impl Evaluator {
    /// Create an evaluator; invalid configuration is rejected up front
    pub fn new(config: EvaluatorConfig) -> Result<Self> {
        // Warnings are logged by the validator; errors are fatal here
        validate_strict(&config).map_err(|err| {
            events::configuration_violation(&err.to_string());
            err
        })?;

        Ok(Self { config })
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Evaluate `code` and return the four-field result. Never panics outward.
    pub fn evaluate(&self, code: &str) -> ExecutionResult {
        self.evaluate_detailed(code).result
    }

    /// Evaluate `code`, keeping the provenance and capability report
    pub fn evaluate_detailed(&self, code: &str) -> Evaluation {
        let start = Instant::now();
        let correlation = CorrelationIds::new();
        let metrics = get_metrics();

        metrics.active_evaluations.inc();
        events::evaluation_start(&correlation, code.len());

        let (verdict, evidence, capabilities) = match self.spawn_worker(code) {
            Ok(output) => {
                let verdict = VerdictClassifier::classify(&output.evidence);
                (verdict, output.evidence, output.capabilities)
            }
            Err((cause, message)) => {
                log::error!("Evaluation {} failed: {}", correlation.run_id, message);
                events::evaluator_failure(&correlation, &message);
                let verdict = VerdictClassifier::classify_evaluator_failure(cause, &message);
                (verdict, RunEvidence::default(), CapabilityReport::default())
            }
        };

        events::capability_decision(&correlation, &capabilities);
        if let Some(fault) = &evidence.fault {
            events::execution_fault(&correlation, &fault.kind, &fault.message);
        }
        if evidence.output_integrity == OutputIntegrity::TruncatedByLimit {
            events::output_truncated(&correlation, evidence.dropped_bytes);
            metrics.output_truncated.inc();
        }

        let elapsed = start.elapsed();
        let provenance = verdict.provenance(evidence.output_integrity, elapsed.as_secs_f64());
        Self::record(&verdict, &capabilities, elapsed);
        events::evaluation_end(&correlation, &provenance);
        metrics.active_evaluations.dec();

        Evaluation {
            result: verdict.into_result(evidence, elapsed.as_secs_f64()),
            provenance,
            capabilities,
            run_id: correlation.run_id,
        }
    }

    /// The capability set a program would see under this configuration
    pub fn capabilities(&self) -> CapabilityReport {
        let mut interp = Interpreter::new(
            CapturedStreams::new(&self.config.output_limits),
            self.config.recursion_limit,
        );
        CapabilitySet::build(&self.config.denied_modules).install(&mut interp)
    }

    fn spawn_worker(
        &self,
        code: &str,
    ) -> std::result::Result<WorkerOutput, (VerdictCause, String)> {
        let spawn_failed = |reason: String| {
            let err = EvalError::Worker(format!("failed to spawn worker thread: {}", reason));
            (VerdictCause::WorkerSpawnFailed, err.to_string())
        };
        let stack_bytes = self
            .config
            .worker_stack_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| spawn_failed("stack size overflows".to_string()))?;

        let code = code.to_string();
        let config = self.config.clone();

        let handle = thread::Builder::new()
            .name("pybox-eval".to_string())
            .stack_size(stack_bytes)
            .spawn(move || run_worker(&code, &config))
            .map_err(|e| spawn_failed(e.to_string()))?;

        handle
            .join()
            .map_err(|payload| (VerdictCause::WorkerPanicked, describe_panic(payload.as_ref())))
    }

    fn record(verdict: &Verdict, capabilities: &CapabilityReport, elapsed: Duration) {
        let metrics = get_metrics();
        metrics.record_execution(verdict.status);
        metrics.record_verdict_cause(verdict.cause);
        metrics.modules_skipped.add(capabilities.skipped.len() as u64);
        metrics.evaluation_duration.observe(elapsed);
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self {
            config: EvaluatorConfig::default(),
        }
    }
}

/// Body of the worker thread: one interpreter, one program, then teardown
fn run_worker(code: &str, config: &EvaluatorConfig) -> WorkerOutput {
    let mut interp = Interpreter::new(
        CapturedStreams::new(&config.output_limits),
        config.recursion_limit,
    );
    let capabilities = CapabilitySet::build(&config.denied_modules).install(&mut interp);

    let fault = interp.run(code).err().map(|fault| fault_evidence(&fault));

    let streams = interp.into_streams();
    let output_integrity = streams.combined_integrity();
    let dropped_bytes = streams.stdout.dropped_bytes() + streams.stderr.dropped_bytes();

    WorkerOutput {
        evidence: RunEvidence {
            stdout: streams.stdout.into_string(),
            stderr: streams.stderr.into_string(),
            fault,
            output_integrity,
            dropped_bytes,
        },
        capabilities,
    }
}

fn fault_evidence(fault: &Fault) -> FaultEvidence {
    FaultEvidence {
        kind: fault.kind().name().to_string(),
        message: fault.message(),
        traceback: fault.traceback(),
        syntax: fault.is_syntax(),
    }
}

fn describe_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("worker panicked: {}", message)
    } else {
        "worker panicked".to_string()
    }
}

/// Evaluate with the default configuration
pub fn evaluate(code: &str) -> ExecutionResult {
    Evaluator::default().evaluate(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{ExecutionStatus, OutputLimits};

    #[test]
    fn test_hello_world() {
        let result = evaluate("print(\"Hello, World!\")");
        assert!(result.success);
        assert_eq!(result.output, "Hello, World!\n");
        assert_eq!(result.error, "");
        assert!(result.execution_time >= 0.0);
    }

    #[test]
    fn test_fault_keeps_prior_output() {
        let result = evaluate("print('before')\nx = 1 / 0\nprint('after')");
        assert!(!result.success);
        assert_eq!(result.output, "before\n");
        assert!(result
            .error
            .starts_with("ZeroDivisionError: division by zero\nTraceback (most recent call last):\n"));
        assert!(result.error.contains("line 2, in <module>"));
        assert!(result.error.ends_with("ZeroDivisionError: division by zero\n"));
    }

    #[test]
    fn test_stderr_write_fails_without_fault() {
        let result = evaluate("import sys\nprint('ok')\nsys.stderr.write('careful\\n')");
        assert!(!result.success);
        assert_eq!(result.output, "ok\n");
        assert_eq!(result.error, "careful\n");
    }

    #[test]
    fn test_syntax_error_provenance() {
        let evaluation = Evaluator::default().evaluate_detailed("print(1 +)");
        assert!(!evaluation.result.success);
        assert!(evaluation.result.error.starts_with("SyntaxError: "));
        assert_eq!(evaluation.provenance.status, ExecutionStatus::Fault);
        assert_eq!(evaluation.provenance.cause, VerdictCause::SyntaxFault);
    }

    #[test]
    fn test_empty_code_runs_clean() {
        let result = evaluate("");
        assert!(result.success);
        assert_eq!(result.output, "");
    }

    #[test]
    fn test_recursion_limit_applies() {
        let config = EvaluatorConfig {
            recursion_limit: 50,
            ..Default::default()
        };
        let evaluator = Evaluator::new(config).unwrap();

        let ok = evaluator.evaluate("def f(n):\n    return 0 if n == 0 else 1 + f(n - 1)\nprint(f(20))");
        assert!(ok.success);
        assert_eq!(ok.output, "20\n");

        let deep = evaluator.evaluate("def f(n):\n    return f(n + 1)\nf(0)");
        assert!(!deep.success);
        assert!(deep.error.starts_with("RecursionError: maximum recursion depth exceeded"));
    }

    #[test]
    fn test_output_limit_truncates() {
        let config = EvaluatorConfig {
            output_limits: OutputLimits {
                stdout_limit: Some(8),
                stderr_limit: None,
            },
            ..Default::default()
        };
        let evaluation = Evaluator::new(config)
            .unwrap()
            .evaluate_detailed("for i in range(100):\n    print(i)");
        assert!(evaluation.result.success);
        assert!(evaluation.result.output.len() <= 8);
        assert_eq!(
            evaluation.provenance.output_integrity,
            OutputIntegrity::TruncatedByLimit
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EvaluatorConfig {
            recursion_limit: 0,
            ..Default::default()
        };
        assert!(matches!(Evaluator::new(config), Err(EvalError::Config(_))));
    }

    #[test]
    fn test_denied_module_is_absent() {
        let config = EvaluatorConfig {
            denied_modules: vec!["os".to_string()],
            ..Default::default()
        };
        let evaluator = Evaluator::new(config).unwrap();
        assert!(!evaluator.capabilities().is_available("os"));

        let result = evaluator.evaluate("os.getcwd()");
        assert!(!result.success);
        assert!(result.error.starts_with("NameError: name 'os' is not defined"));
    }

    #[test]
    fn test_capabilities_report() {
        let report = Evaluator::default().capabilities();
        assert!(report.is_available("print"));
        assert!(report.is_available("math"));
        assert!(!report.is_available("np"));
        assert!(report.skipped.iter().any(|s| s.binding == "np"));
    }

    #[test]
    fn test_unspawnable_worker_is_an_evaluator_failure() {
        let config = EvaluatorConfig {
            worker_stack_mb: usize::MAX,
            ..Default::default()
        };
        let evaluation = Evaluator::new(config).unwrap().evaluate_detailed("print(1)");
        assert!(!evaluation.result.success);
        assert_eq!(evaluation.result.output, "");
        assert_eq!(
            evaluation.result.error,
            "Execution failed: Worker error: failed to spawn worker thread: stack size overflows"
        );
        assert_eq!(evaluation.provenance.status, ExecutionStatus::EvaluatorFailure);
        assert_eq!(evaluation.provenance.cause, VerdictCause::WorkerSpawnFailed);
    }

    #[test]
    fn test_describe_panic_payloads() {
        assert_eq!(describe_panic(&"boom"), "worker panicked: boom");
        assert_eq!(
            describe_panic(&String::from("bad state")),
            "worker panicked: bad state"
        );
        assert_eq!(describe_panic(&42u8), "worker panicked");
    }

    #[test]
    fn test_run_ids_differ() {
        let evaluator = Evaluator::default();
        let a = evaluator.evaluate_detailed("x = 1");
        let b = evaluator.evaluate_detailed("x = 1");
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.result.output, b.result.output);
    }
}
