// Config validation
// Run at startup so that a bad config fails fast with actionable errors

use crate::config::presets::get_manifest;
use crate::config::types::{EvalError, EvaluatorConfig, Result};

/// Recursion limits above this are unlikely to fit any sensible worker stack
const MAX_RECURSION_LIMIT: usize = 100_000;
const MAX_WORKER_STACK_MB: usize = 4096;

/// Validation result with detailed errors
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Collect every problem with `config` without failing
pub fn validate_config(config: &EvaluatorConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_limits(config, &mut result);
    validate_output_limits(config, &mut result);
    validate_denied_modules(config, &mut result);
    validate_audit_log(config, &mut result);

    result
}

/// Validate and fail on the first sign of an invalid config
pub fn validate_strict(config: &EvaluatorConfig) -> Result<ValidationResult> {
    let result = validate_config(config);
    for warning in &result.warnings {
        log::warn!("config: {}", warning);
    }

    if !result.is_valid() {
        let error_msg = format!("Config validation failed:\n{}", result.errors.join("\n"));
        return Err(EvalError::Config(error_msg));
    }

    Ok(result)
}

fn validate_limits(config: &EvaluatorConfig, result: &mut ValidationResult) {
    if config.recursion_limit == 0 {
        result.add_error("recursion_limit cannot be zero".to_string());
    } else if config.recursion_limit > MAX_RECURSION_LIMIT {
        result.add_warning(format!(
            "recursion_limit {} is very high (> {}), deep recursion may exhaust the worker stack",
            config.recursion_limit, MAX_RECURSION_LIMIT
        ));
    }

    if config.worker_stack_mb == 0 {
        result.add_error("worker_stack_mb cannot be zero".to_string());
    } else if config.worker_stack_mb < 8 {
        result.add_warning(format!(
            "worker_stack_mb {} is very low (< 8MB), recursion may overflow before recursion_limit",
            config.worker_stack_mb
        ));
    } else if config.worker_stack_mb > MAX_WORKER_STACK_MB {
        result.add_warning(format!(
            "worker_stack_mb {} is very high (> {}MB), the worker thread may fail to spawn",
            config.worker_stack_mb, MAX_WORKER_STACK_MB
        ));
    }
}

fn validate_output_limits(config: &EvaluatorConfig, result: &mut ValidationResult) {
    if config.output_limits.stdout_limit == Some(0) {
        result.add_warning("stdout_limit is zero, all program output will be dropped".to_string());
    }

    // An empty stderr capture would turn stderr-only failures into successes
    if config.output_limits.stderr_limit == Some(0) {
        result.add_error("stderr_limit cannot be zero".to_string());
    }
}

fn validate_denied_modules(config: &EvaluatorConfig, result: &mut ValidationResult) {
    let manifest = get_manifest();
    for name in &config.denied_modules {
        if manifest.is_primitive(name) {
            result.add_error(format!(
                "denied_modules entry '{}' is a primitive and cannot be removed",
                name
            ));
        } else if !manifest
            .modules
            .iter()
            .any(|b| b.binding == name || b.module == name)
        {
            result.add_warning(format!("denied_modules entry '{}' is not a known module", name));
        }
    }
}

fn validate_audit_log(config: &EvaluatorConfig, result: &mut ValidationResult) {
    let Some(path) = &config.audit_log else {
        return;
    };

    if path.is_dir() {
        result.add_error(format!("audit_log {} is a directory", path.display()));
        return;
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            result.add_error(format!(
                "audit_log directory does not exist: {}",
                parent.display()
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = EvaluatorConfig::default();
        let result = validate_config(&config);
        assert!(result.is_valid());
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_zero_recursion_limit() {
        let config = EvaluatorConfig {
            recursion_limit: 0,
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("recursion_limit")));
    }

    #[test]
    fn test_zero_stderr_limit_rejected() {
        let mut config = EvaluatorConfig::default();
        config.output_limits.stderr_limit = Some(0);
        assert!(validate_strict(&config).is_err());
    }

    #[test]
    fn test_zero_stdout_limit_only_warns() {
        let mut config = EvaluatorConfig::default();
        config.output_limits.stdout_limit = Some(0);
        let result = validate_strict(&config).unwrap();
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_huge_worker_stack_only_warns() {
        let config = EvaluatorConfig {
            worker_stack_mb: 1 << 20,
            ..Default::default()
        };
        let result = validate_strict(&config).unwrap();
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("may fail to spawn"));
    }

    #[test]
    fn test_denying_primitive_is_error() {
        let config = EvaluatorConfig {
            denied_modules: vec!["print".to_string()],
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(!result.is_valid());
    }

    #[test]
    fn test_unknown_denied_module_warns() {
        let config = EvaluatorConfig {
            denied_modules: vec!["socket".to_string(), "os".to_string()],
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("socket"));
    }

    #[test]
    fn test_audit_log_in_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = EvaluatorConfig {
            audit_log: Some(dir.path().join("nope").join("audit.jsonl")),
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(!result.is_valid());

        let config = EvaluatorConfig {
            audit_log: Some(dir.path().join("audit.jsonl")),
            ..Default::default()
        };
        assert!(validate_config(&config).is_valid());
    }
}
