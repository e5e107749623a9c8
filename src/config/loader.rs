//! Configuration file loading
use crate::config::types::{EvalError, EvaluatorConfig, Result};
use std::path::Path;

impl EvaluatorConfig {
    /// Load configuration from a JSON file; missing fields take their defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| EvalError::Config(format!("Failed to read config file: {}", e)))?;

        let config: EvaluatorConfig = serde_json::from_str(&config_content)
            .map_err(|e| EvalError::Config(format!("Failed to parse config JSON: {}", e)))?;

        log::debug!("Loaded evaluator config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Load from `path` when given, otherwise use defaults
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"recursion_limit": 200, "output_limits": {{"stdout_limit": 4096}}, "denied_modules": ["os"]}}"#
        )
        .unwrap();

        let config = EvaluatorConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.recursion_limit, 200);
        assert_eq!(config.output_limits.stdout_limit, Some(4096));
        assert_eq!(config.output_limits.stderr_limit, None);
        assert_eq!(config.denied_modules, vec!["os".to_string()]);
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EvaluatorConfig::load_from_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = EvaluatorConfig::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config JSON"));
    }

    #[test]
    fn test_load_or_default_without_path() {
        let config = EvaluatorConfig::load_or_default(None::<&Path>).unwrap();
        assert_eq!(config, EvaluatorConfig::default());
    }
}
