//! Execution control
//!
//! Per-call output capture and the worker-thread evaluator that ties the
//! interpreter, capability set and verdict together.

pub mod capture;
pub mod evaluator;
