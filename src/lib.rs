//! pybox: an in-process restricted evaluator for untrusted Python-style scripts
//!
//! `evaluate(code)` runs one program against a fresh, closed capability set
//! and returns `{success, output, error, execution_time}`. Output goes to
//! per-call sinks; nothing process-global is redirected, so concurrent calls
//! in one process do not interfere.
//!
//! The capability set is a policy layer, not a security boundary: `__import__`,
//! `os`, `sys`, `getattr` and `setattr` remain reachable. Wall-clock timeouts,
//! memory ceilings and process isolation belong to the host.
//!
//! # Architecture
//!
//! ## Interpreter ([`interp`])
//! - [`interp::lexer`], [`interp::parser`]: source to AST
//! - [`interp::interpreter`]: tree-walking evaluation with captured streams
//! - [`interp::fault`]: exception hierarchy and traceback rendering
//!
//! ## Capabilities ([`capability`])
//! - [`capability::primitives`]: always-present builtins
//! - [`capability::modules`]: best-effort module providers
//!
//! ## Execution Control ([`exec`])
//! - [`exec::capture`]: bounded per-call output sinks
//! - [`exec::evaluator`]: worker-thread evaluation and result assembly
//!
//! ## Verdict ([`verdict`])
//! - [`verdict::verdict`]: success/error classification with provenance
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: structured audit events
//! - [`observability::metrics`]: Prometheus metrics export
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: shared types and the crate error
//! - [`config::loader`]: JSON configuration files
//! - [`config::validator`]: configuration checks
//! - [`config::presets`]: the capability manifest

// Interpreter
pub mod interp;

// Capabilities
pub mod capability;

// Execution Control
pub mod exec;

// Verdict
pub mod verdict;

// Observability
pub mod observability;

// Configuration
pub mod config;

// CLI entrypoint for the pybox binary
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use exec::evaluator::{evaluate, Evaluation, Evaluator};
