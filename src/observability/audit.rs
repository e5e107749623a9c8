/// Audit event logging for pybox
/// Structured records of each evaluation: start, capability decision,
/// fault, and final status, tied together by correlation ids.
use crate::capability::CapabilityReport;
use crate::config::types::{EvalError, Result, VerdictProvenance};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::SystemTime;
use uuid::Uuid;

/// Audit event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditSeverity {
    High,
    Medium,
    Low,
    Debug,
}

/// Types of audit events we track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    EvaluationStart,
    EvaluationEnd,
    CapabilityDecision,
    ExecutionFault,
    OutputTruncated,
    EvaluatorFailure,
    ConfigurationViolation,
}

impl AuditEventType {
    /// Get the default severity for this event type
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            AuditEventType::EvaluationStart => AuditSeverity::Debug,
            AuditEventType::EvaluationEnd => AuditSeverity::Low,
            AuditEventType::CapabilityDecision => AuditSeverity::Debug,
            AuditEventType::ExecutionFault => AuditSeverity::Low,
            AuditEventType::OutputTruncated => AuditSeverity::Medium,
            AuditEventType::EvaluatorFailure => AuditSeverity::High,
            AuditEventType::ConfigurationViolation => AuditSeverity::Medium,
        }
    }
}

/// Correlation identifiers for event tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationIds {
    /// Unique request identifier
    pub request_id: String,
    /// Unique run identifier (one evaluation)
    pub run_id: String,
    /// Host process
    pub process_id: u32,
}

impl CorrelationIds {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            run_id: Uuid::new_v4().to_string(),
            process_id: std::process::id(),
        }
    }

    /// Reuse a caller-supplied request id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Individual audit event
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub timestamp: SystemTime,
    pub details: String,
    pub correlation: Option<CorrelationIds>,
    pub capability_report: Option<CapabilityReport>,
    pub verdict_provenance: Option<VerdictProvenance>,
    /// Length of the submitted source in bytes; the source itself is never logged
    pub code_bytes: Option<usize>,
}

impl AuditEvent {
    /// Create a new audit event with default severity
    pub fn new(event_type: AuditEventType, details: String) -> Self {
        Self {
            severity: event_type.default_severity(),
            event_type,
            timestamp: SystemTime::now(),
            details,
            correlation: None,
            capability_report: None,
            verdict_provenance: None,
            code_bytes: None,
        }
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_correlation(mut self, correlation: CorrelationIds) -> Self {
        self.correlation = Some(correlation);
        self
    }

    pub fn with_capability_report(mut self, report: CapabilityReport) -> Self {
        self.capability_report = Some(report);
        self
    }

    pub fn with_verdict_provenance(mut self, provenance: VerdictProvenance) -> Self {
        self.verdict_provenance = Some(provenance);
        self
    }

    pub fn with_code_bytes(mut self, code_bytes: usize) -> Self {
        self.code_bytes = Some(code_bytes);
        self
    }

    /// One JSON object per event, the audit file's line format
    pub fn to_json(&self) -> serde_json::Value {
        let mut entry = serde_json::json!({
            "timestamp": self.timestamp
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64(),
            "event_type": self.event_type,
            "severity": self.severity,
            "details": self.details,
        });

        if let Some(correlation) = &self.correlation {
            entry["correlation"] =
                serde_json::to_value(correlation).unwrap_or(serde_json::Value::Null);
        }
        if let Some(report) = &self.capability_report {
            entry["capability_report"] =
                serde_json::to_value(report).unwrap_or(serde_json::Value::Null);
        }
        if let Some(provenance) = &self.verdict_provenance {
            entry["verdict_provenance"] =
                serde_json::to_value(provenance).unwrap_or(serde_json::Value::Null);
        }
        if let Some(code_bytes) = self.code_bytes {
            entry["code_bytes"] = serde_json::json!(code_bytes);
        }
        entry
    }
}

/// Routes events to `log` and, when configured, to a JSON-lines file
pub struct AuditLogger {
    audit_file: Option<Arc<Mutex<File>>>,
    audit_path: Option<PathBuf>,
}

impl AuditLogger {
    /// Create a logger; `None` keeps events in the `log` stream only
    pub fn new(audit_path: Option<PathBuf>) -> Result<Self> {
        let Some(path) = audit_path else {
            return Ok(Self {
                audit_file: None,
                audit_path: None,
            });
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                EvalError::Config(format!("Failed to create audit log directory: {}", e))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| EvalError::Config(format!("Failed to open audit log: {}", e)))?;

        Ok(Self {
            audit_file: Some(Arc::new(Mutex::new(file))),
            audit_path: Some(path),
        })
    }

    pub fn log_event(&self, event: &AuditEvent) {
        match event.severity {
            AuditSeverity::High => error!("AUDIT {:?}: {}", event.event_type, event.details),
            AuditSeverity::Medium => warn!("AUDIT {:?}: {}", event.event_type, event.details),
            AuditSeverity::Low => info!("AUDIT {:?}: {}", event.event_type, event.details),
            AuditSeverity::Debug => debug!("AUDIT {:?}: {}", event.event_type, event.details),
        }

        let Some(file) = &self.audit_file else {
            return;
        };
        if let Ok(mut file) = file.lock() {
            if let Err(e) = writeln!(file, "{}", event.to_json()) {
                error!("Failed to write to audit log: {}", e);
            }
            if let Err(e) = file.flush() {
                error!("Failed to flush audit log: {}", e);
            }
        } else {
            error!("Failed to acquire lock on audit file");
        }
    }

    /// Get the audit log file path
    pub fn audit_path(&self) -> Option<&Path> {
        self.audit_path.as_deref()
    }
}

/// Global audit logger instance
static AUDIT_LOGGER: OnceLock<AuditLogger> = OnceLock::new();

/// Initialize the global audit logger. A second call keeps the first logger.
pub fn init_audit_logger(audit_path: Option<PathBuf>) -> Result<()> {
    let logger = AuditLogger::new(audit_path)?;
    if AUDIT_LOGGER.set(logger).is_err() {
        warn!("Audit logger already initialized");
    } else {
        debug!("Audit logger initialized");
    }
    Ok(())
}

/// Log an audit event using the global logger, or `log` alone before init
pub fn log_audit_event(event: AuditEvent) {
    match AUDIT_LOGGER.get() {
        Some(logger) => logger.log_event(&event),
        None => match event.severity {
            AuditSeverity::High => error!("AUDIT {:?}: {}", event.event_type, event.details),
            AuditSeverity::Medium => warn!("AUDIT {:?}: {}", event.event_type, event.details),
            AuditSeverity::Low => info!("AUDIT {:?}: {}", event.event_type, event.details),
            AuditSeverity::Debug => debug!("AUDIT {:?}: {}", event.event_type, event.details),
        },
    }
}

/// Convenience functions for the evaluation lifecycle
pub mod events {
    use super::*;

    pub fn evaluation_start(correlation: &CorrelationIds, code_bytes: usize) {
        log_audit_event(
            AuditEvent::new(
                AuditEventType::EvaluationStart,
                format!("Evaluation {} started", correlation.run_id),
            )
            .with_correlation(correlation.clone())
            .with_code_bytes(code_bytes),
        );
    }

    pub fn capability_decision(correlation: &CorrelationIds, report: &CapabilityReport) {
        let skipped: Vec<&str> = report.skipped.iter().map(|s| s.binding.as_str()).collect();
        let details = if skipped.is_empty() {
            format!("{} modules available", report.modules.len())
        } else {
            format!(
                "{} modules available, skipped: {}",
                report.modules.len(),
                skipped.join(", ")
            )
        };
        log_audit_event(
            AuditEvent::new(AuditEventType::CapabilityDecision, details)
                .with_correlation(correlation.clone())
                .with_capability_report(report.clone()),
        );
    }

    pub fn execution_fault(correlation: &CorrelationIds, kind: &str, message: &str) {
        log_audit_event(
            AuditEvent::new(
                AuditEventType::ExecutionFault,
                format!("{}: {}", kind, message),
            )
            .with_correlation(correlation.clone()),
        );
    }

    pub fn output_truncated(correlation: &CorrelationIds, dropped_bytes: usize) {
        log_audit_event(
            AuditEvent::new(
                AuditEventType::OutputTruncated,
                format!("Output cap reached, {} bytes dropped", dropped_bytes),
            )
            .with_correlation(correlation.clone()),
        );
    }

    pub fn evaluator_failure(correlation: &CorrelationIds, message: &str) {
        log_audit_event(
            AuditEvent::new(AuditEventType::EvaluatorFailure, message.to_string())
                .with_correlation(correlation.clone()),
        );
    }

    pub fn evaluation_end(correlation: &CorrelationIds, provenance: &VerdictProvenance) {
        log_audit_event(
            AuditEvent::new(
                AuditEventType::EvaluationEnd,
                format!(
                    "Evaluation {} finished: {} in {:.3}s",
                    correlation.run_id, provenance.status, provenance.execution_time
                ),
            )
            .with_correlation(correlation.clone())
            .with_verdict_provenance(provenance.clone()),
        );
    }

    pub fn configuration_violation(message: &str) {
        log_audit_event(AuditEvent::new(
            AuditEventType::ConfigurationViolation,
            message.to_string(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{ExecutionStatus, OutputIntegrity, VerdictCause};

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = CorrelationIds::new();
        let b = CorrelationIds::new();
        assert_ne!(a.run_id, b.run_id);
        assert_ne!(a.request_id, a.run_id);
        assert_eq!(b.clone().with_request_id("req-1").request_id, "req-1");
    }

    #[test]
    fn test_default_severity() {
        assert_eq!(
            AuditEventType::EvaluatorFailure.default_severity(),
            AuditSeverity::High
        );
        assert_eq!(
            AuditEventType::EvaluationStart.default_severity(),
            AuditSeverity::Debug
        );
    }

    #[test]
    fn test_event_json_carries_provenance() {
        let provenance = VerdictProvenance {
            status: ExecutionStatus::Fault,
            cause: VerdictCause::RaisedFault,
            evidence_sources: vec!["fault".to_string()],
            fault_kind: Some("ValueError".to_string()),
            output_integrity: OutputIntegrity::Complete,
            execution_time: 0.02,
        };
        let event = AuditEvent::new(AuditEventType::EvaluationEnd, "done".to_string())
            .with_correlation(CorrelationIds::new())
            .with_verdict_provenance(provenance)
            .with_code_bytes(12);
        let json = event.to_json();
        assert_eq!(json["event_type"], "EvaluationEnd");
        assert_eq!(json["verdict_provenance"]["status"], "FAULT");
        assert_eq!(json["verdict_provenance"]["fault_kind"], "ValueError");
        assert_eq!(json["code_bytes"], 12);
        assert!(json["correlation"]["run_id"].is_string());
    }

    #[test]
    fn test_logger_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.log");
        let logger = AuditLogger::new(Some(path.clone())).unwrap();
        assert_eq!(logger.audit_path(), Some(path.as_path()));

        logger.log_event(&AuditEvent::new(
            AuditEventType::EvaluationStart,
            "first".to_string(),
        ));
        logger.log_event(&AuditEvent::new(
            AuditEventType::EvaluationEnd,
            "second".to_string(),
        ));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["details"], "second");
    }

    #[test]
    fn test_logger_without_file() {
        let logger = AuditLogger::new(None).unwrap();
        assert!(logger.audit_path().is_none());
        logger.log_event(&AuditEvent::new(
            AuditEventType::CapabilityDecision,
            "no file".to_string(),
        ));
    }
}
