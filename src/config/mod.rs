//! Configuration
//!
//! Evaluator settings, file loading, validation, and the capability manifest.

pub mod loader;
pub mod presets;
pub mod types;
pub mod validator;
