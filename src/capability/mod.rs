//! Capability set
//!
//! The closed, enumerable table of names that evaluated code can resolve.
//! Built fresh for every evaluation: primitives are always present, best-effort
//! modules are added only when their provider succeeds.
//!
//! This is a policy layer, not a security boundary. `__import__`, `os`, `sys`,
//! `getattr` and `setattr` remain reachable from evaluated code.

pub mod modules;
pub mod primitives;

use crate::config::presets::get_manifest;
use crate::interp::value::{Args, Builtin, Value};
use crate::interp::{Interpreter, PyResult};
use serde::Serialize;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

/// Why a module provider could not supply its module
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("No module named '{0}'")]
    NotFound(String),

    #[error("provider for '{module}' failed: {reason}")]
    Failed { module: String, reason: String },
}

/// A best-effort binding that was left out of the namespace
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedModule {
    pub binding: String,
    pub module: String,
    pub reason: String,
}

/// What one evaluation's namespace ended up containing
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CapabilityReport {
    pub primitives: Vec<String>,
    pub modules: Vec<String>,
    pub skipped: Vec<SkippedModule>,
}

impl CapabilityReport {
    pub fn is_available(&self, binding: &str) -> bool {
        self.primitives.iter().any(|p| p == binding) || self.modules.iter().any(|m| m == binding)
    }
}

/// Names and values to install into one interpreter
pub struct CapabilitySet {
    primitives: Vec<(&'static str, Value)>,
    bindings: Vec<(&'static str, Value)>,
    /// Every loaded module and submodule, by dotted name, for `import`
    importable: Vec<(String, Value)>,
    skipped: Vec<SkippedModule>,
}

impl CapabilitySet {
    /// Build the set, leaving out modules named in `denied`
    pub fn build(denied: &[String]) -> Self {
        let manifest = get_manifest();
        let mut loaded: HashMap<&'static str, Result<Value, ProviderError>> = HashMap::new();
        let mut bindings = Vec::new();
        let mut skipped = Vec::new();

        for binding in manifest.allowed_modules(denied) {
            let root_name = binding.module.split('.').next().unwrap_or(binding.module);
            let root = loaded
                .entry(root_name)
                .or_insert_with(|| modules::load(root_name))
                .clone();

            match root.and_then(|root| descend(&root, binding.module)) {
                Ok(value) => bindings.push((binding.binding, value)),
                Err(err) => {
                    log::debug!("skipping module binding '{}': {}", binding.binding, err);
                    skipped.push(SkippedModule {
                        binding: binding.binding.to_string(),
                        module: binding.module.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        let mut importable = Vec::new();
        for value in loaded.into_values().flatten() {
            collect_importable(&value, &mut importable);
        }

        CapabilitySet {
            primitives: primitives::table(),
            bindings,
            importable,
            skipped,
        }
    }

    /// Install everything into `interp`. Modules are bound as globals and
    /// registered for `import` under their dotted names.
    pub fn install(self, interp: &mut Interpreter) -> CapabilityReport {
        let mut report = CapabilityReport {
            skipped: self.skipped,
            ..Default::default()
        };

        for (name, value) in self.primitives {
            interp.define_builtin(name, value);
            report.primitives.push(name.to_string());
        }
        for (dotted, value) in self.importable {
            interp.register_module(&dotted, value);
        }
        for (binding, value) in self.bindings {
            interp.set_global(binding, value);
            report.modules.push(binding.to_string());
        }

        report
    }
}

/// `numpy` -> the loaded root; `matplotlib.pyplot` -> its `pyplot` attribute
fn descend(root: &Value, dotted: &str) -> Result<Value, ProviderError> {
    let mut current = root.clone();
    for part in dotted.split('.').skip(1) {
        let next = match &current {
            Value::Module(module) => module.get(part),
            _ => None,
        };
        current = next.ok_or_else(|| ProviderError::NotFound(dotted.to_string()))?;
    }
    Ok(current)
}

fn collect_importable(value: &Value, out: &mut Vec<(String, Value)>) {
    let Value::Module(module) = value else {
        return;
    };
    out.push((module.name.clone(), value.clone()));
    let prefix = format!("{}.", module.name);
    for name in module.names() {
        let Some(child) = module.get(&name) else {
            continue;
        };
        if matches!(&child, Value::Module(sub) if sub.name.starts_with(&prefix)) {
            collect_importable(&child, out);
        }
    }
}

/// A builtin function carrying help text
pub fn documented(
    name: &str,
    doc: &'static str,
    func: impl Fn(&mut Interpreter, Args) -> PyResult<Value> + 'static,
) -> Value {
    Value::Builtin(Rc::new(Builtin {
        name: Rc::from(name),
        doc: Some(doc),
        func: Rc::new(func),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::capture::CapturedStreams;

    fn install(denied: &[String]) -> (Interpreter, CapabilityReport) {
        let mut interp = Interpreter::new(CapturedStreams::default(), 1000);
        let report = CapabilitySet::build(denied).install(&mut interp);
        (interp, report)
    }

    #[test]
    fn test_primitives_match_manifest() {
        let (_, report) = install(&[]);
        let manifest = get_manifest();
        assert_eq!(
            report.primitives.len(),
            manifest.primitives.len() + manifest.exceptions.len()
        );
        for name in manifest.primitives.iter().chain(manifest.exceptions.iter()) {
            assert!(report.is_available(name), "missing primitive {}", name);
        }
    }

    #[test]
    fn test_standard_modules_installed_and_scientific_skipped() {
        let (interp, report) = install(&[]);
        for name in ["math", "random", "json", "datetime", "time", "re", "os", "sys"] {
            assert!(report.modules.iter().any(|m| m == name), "missing module {}", name);
            assert!(interp.global(name).is_some());
        }
        for name in ["numpy", "np", "pandas", "pd", "matplotlib", "plt"] {
            assert!(interp.global(name).is_none());
            assert!(report.skipped.iter().any(|s| s.binding == name));
        }
        let np = report.skipped.iter().find(|s| s.binding == "np").unwrap();
        assert_eq!(np.reason, "No module named 'numpy'");
    }

    #[test]
    fn test_submodules_are_importable() {
        let (interp, _) = install(&[]);
        let names = interp.module_names();
        assert!(names.contains(&"os".to_string()));
        assert!(names.contains(&"os.path".to_string()));
    }

    #[test]
    fn test_denied_module_is_absent() {
        let (interp, report) = install(&["os".to_string()]);
        assert!(interp.global("os").is_none());
        assert!(!report.is_available("os"));
        assert!(!interp.module_names().contains(&"os.path".to_string()));
    }
}
