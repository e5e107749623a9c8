//! Embedded interpreter for the evaluated language
//!
//! Source text flows through [`lexer`] and [`parser`] into an [`ast`], which
//! [`interpreter`] walks. Values live in [`value`]; operators, methods and
//! constructors of builtin types in [`ops`], [`methods`] and [`types`].

pub mod ast;
pub mod fault;
pub mod format;
pub mod heap;
pub mod interpreter;
pub mod lexer;
pub mod methods;
pub mod ops;
pub mod parser;
pub mod types;
pub mod value;

pub use fault::{ExcKind, Fault, PyResult};
pub use interpreter::Interpreter;
pub use value::Value;
