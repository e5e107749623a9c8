/// Capability manifest
///
/// The fixed list of names the restricted namespace may expose. Primitives are
/// always installed; best-effort modules only when their provider succeeds and
/// the configuration does not deny them.
use std::sync::OnceLock;

/// Builtin functions and types always present in the namespace
pub const PRIMITIVES: &[&str] = &[
    "print",
    "len",
    "range",
    "str",
    "int",
    "float",
    "list",
    "dict",
    "tuple",
    "set",
    "bool",
    "abs",
    "max",
    "min",
    "sum",
    "sorted",
    "enumerate",
    "zip",
    "map",
    "filter",
    "type",
    "isinstance",
    "hasattr",
    "getattr",
    "setattr",
    "dir",
    "help",
    "__import__",
];

/// Exception categories exposed by name
pub const EXCEPTION_NAMES: &[&str] = &[
    "ValueError",
    "TypeError",
    "KeyError",
    "IndexError",
    "AttributeError",
    "NameError",
    "ZeroDivisionError",
    "Exception",
];

/// A best-effort module binding: the namespace name and the module it loads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleBinding {
    pub binding: &'static str,
    pub module: &'static str,
}

const fn bind(binding: &'static str, module: &'static str) -> ModuleBinding {
    ModuleBinding { binding, module }
}

/// Best-effort modules in installation order
pub const BEST_EFFORT_MODULES: &[ModuleBinding] = &[
    bind("math", "math"),
    bind("random", "random"),
    bind("json", "json"),
    bind("datetime", "datetime"),
    bind("time", "time"),
    bind("re", "re"),
    bind("os", "os"),
    bind("sys", "sys"),
    bind("numpy", "numpy"),
    bind("np", "numpy"),
    bind("pandas", "pandas"),
    bind("pd", "pandas"),
    bind("matplotlib", "matplotlib"),
    bind("plt", "matplotlib.pyplot"),
];

/// Limits the hosting platform is expected to enforce around each call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLimits {
    /// Wall clock timeout (seconds)
    pub timeout_sec: u64,
    /// Memory ceiling (MB)
    pub memory_mb: u64,
}

/// Everything a deployment needs to know about the namespace
#[derive(Debug, Clone)]
pub struct CapabilityManifest {
    pub primitives: Vec<&'static str>,
    pub exceptions: Vec<&'static str>,
    pub modules: Vec<ModuleBinding>,
    pub host_limits: HostLimits,
}

impl CapabilityManifest {
    fn new() -> Self {
        Self {
            primitives: PRIMITIVES.to_vec(),
            exceptions: EXCEPTION_NAMES.to_vec(),
            modules: BEST_EFFORT_MODULES.to_vec(),
            host_limits: HostLimits {
                timeout_sec: 30,
                memory_mb: 1024,
            },
        }
    }

    /// Is `name` one of the always-present primitives or exceptions
    pub fn is_primitive(&self, name: &str) -> bool {
        self.primitives.contains(&name) || self.exceptions.contains(&name)
    }

    /// Distinct module names, in first-seen order
    pub fn module_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Vec::new();
        for binding in &self.modules {
            if !names.contains(&binding.module) {
                names.push(binding.module);
            }
        }
        names
    }

    /// Bindings that survive a deny list; denying a module drops its aliases too
    pub fn allowed_modules(&self, denied: &[String]) -> Vec<ModuleBinding> {
        self.modules
            .iter()
            .copied()
            .filter(|b| {
                !denied
                    .iter()
                    .any(|d| d == b.binding || d == b.module || b.module.starts_with(&format!("{}.", d)))
            })
            .collect()
    }
}

/// Global manifest
pub fn get_manifest() -> &'static CapabilityManifest {
    static MANIFEST: OnceLock<CapabilityManifest> = OnceLock::new();
    MANIFEST.get_or_init(CapabilityManifest::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_contents() {
        let manifest = get_manifest();
        assert_eq!(manifest.primitives.len(), 28);
        assert_eq!(manifest.exceptions.len(), 8);
        assert!(manifest.is_primitive("print"));
        assert!(manifest.is_primitive("ZeroDivisionError"));
        assert!(!manifest.is_primitive("open"));
        assert!(!manifest.is_primitive("round"));
    }

    #[test]
    fn test_module_names_are_distinct() {
        let names = get_manifest().module_names();
        assert_eq!(names.iter().filter(|n| **n == "numpy").count(), 1);
        assert!(names.contains(&"matplotlib.pyplot"));
    }

    #[test]
    fn test_denied_module_drops_alias() {
        let allowed = get_manifest().allowed_modules(&["numpy".to_string(), "matplotlib".to_string()]);
        assert!(allowed.iter().all(|b| b.binding != "np" && b.binding != "numpy"));
        assert!(allowed.iter().all(|b| b.binding != "plt"));
        assert!(allowed.iter().any(|b| b.binding == "math"));
    }

    #[test]
    fn test_host_limits() {
        let limits = get_manifest().host_limits;
        assert_eq!(limits.timeout_sec, 30);
        assert_eq!(limits.memory_mb, 1024);
    }
}
