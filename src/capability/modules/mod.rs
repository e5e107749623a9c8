//! Module providers
//!
//! Each provider builds a fresh module object for one evaluation. Names the
//! crate ships no implementation for (numeric arrays, dataframes, plotting)
//! report `No module named ...` and are skipped by the capability layer.

pub mod datetime;
pub mod json;
pub mod math;
pub mod os;
pub mod random;
pub mod re;
pub mod sys;
pub mod time;

use crate::capability::ProviderError;
use crate::interp::fault::type_error;
use crate::interp::value::{Args, Module, Value};
use crate::interp::PyResult;
use std::rc::Rc;

/// Builds one module
pub type Provider = fn() -> Result<Rc<Module>, ProviderError>;

/// Providers shipped with the crate, by top-level module name
pub const PROVIDERS: &[(&str, Provider)] = &[
    ("math", math::provide),
    ("random", random::provide),
    ("json", json::provide),
    ("datetime", datetime::provide),
    ("time", time::provide),
    ("re", re::provide),
    ("os", os::provide),
    ("sys", sys::provide),
];

/// Run the provider for `name`
pub fn load(name: &str) -> Result<Value, ProviderError> {
    let provider = PROVIDERS
        .iter()
        .find(|(module, _)| *module == name)
        .map(|(_, provider)| *provider)
        .ok_or_else(|| ProviderError::NotFound(name.to_string()))?;
    provider().map(Value::Module)
}

/// Positional argument `index` as a float, for numeric functions
pub(crate) fn float_arg(args: &Args, index: usize, func: &str) -> PyResult<f64> {
    match args.get(index) {
        Some(value) => value.expect_float(func),
        None => Err(type_error(format!(
            "{}() missing required argument (pos {})",
            func,
            index + 1
        ))),
    }
}

/// Positional argument `index` as an int
pub(crate) fn int_arg(args: &Args, index: usize, func: &str) -> PyResult<i64> {
    match args.get(index) {
        Some(value) => value.expect_int(""),
        None => Err(type_error(format!(
            "{}() missing required argument (pos {})",
            func,
            index + 1
        ))),
    }
}

/// Positional argument `index` as a string
pub(crate) fn str_arg(args: &Args, index: usize, func: &str) -> PyResult<Rc<str>> {
    match args.get(index) {
        Some(value) => value.expect_str(func),
        None => Err(type_error(format!(
            "{}() missing required argument (pos {})",
            func,
            index + 1
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_provider_loads() {
        for (name, _) in PROVIDERS {
            let module = load(name).unwrap();
            match module {
                Value::Module(m) => assert_eq!(m.name, *name),
                _ => panic!("{} did not produce a module", name),
            }
        }
    }

    #[test]
    fn test_unknown_module_not_found() {
        assert_eq!(
            load("pandas").unwrap_err(),
            ProviderError::NotFound("pandas".to_string())
        );
    }
}
