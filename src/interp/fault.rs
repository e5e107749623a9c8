//! Execution faults raised by evaluated code.
//!
//! A [`Fault`] carries the raised exception object plus the propagation
//! trace collected while the fault unwinds through call frames.

use crate::interp::format;
use crate::interp::interpreter::DEFAULT_RECURSION_LIMIT;
use crate::interp::value::Value;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// The closed exception hierarchy known to the interpreter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExcKind {
    BaseException,
    SystemExit,
    Exception,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    KeyError,
    IndexError,
    ValueError,
    JsonDecodeError,
    RegexError,
    TypeError,
    NameError,
    UnboundLocalError,
    AttributeError,
    ImportError,
    ModuleNotFoundError,
    RuntimeError,
    RecursionError,
    NotImplementedError,
    AssertionError,
    StopIteration,
    SyntaxError,
    IndentationError,
    OsError,
    FileNotFoundError,
}

impl ExcKind {
    pub fn name(self) -> &'static str {
        match self {
            ExcKind::BaseException => "BaseException",
            ExcKind::SystemExit => "SystemExit",
            ExcKind::Exception => "Exception",
            ExcKind::ArithmeticError => "ArithmeticError",
            ExcKind::ZeroDivisionError => "ZeroDivisionError",
            ExcKind::OverflowError => "OverflowError",
            ExcKind::LookupError => "LookupError",
            ExcKind::KeyError => "KeyError",
            ExcKind::IndexError => "IndexError",
            ExcKind::ValueError => "ValueError",
            ExcKind::JsonDecodeError => "JSONDecodeError",
            ExcKind::RegexError => "error",
            ExcKind::TypeError => "TypeError",
            ExcKind::NameError => "NameError",
            ExcKind::UnboundLocalError => "UnboundLocalError",
            ExcKind::AttributeError => "AttributeError",
            ExcKind::ImportError => "ImportError",
            ExcKind::ModuleNotFoundError => "ModuleNotFoundError",
            ExcKind::RuntimeError => "RuntimeError",
            ExcKind::RecursionError => "RecursionError",
            ExcKind::NotImplementedError => "NotImplementedError",
            ExcKind::AssertionError => "AssertionError",
            ExcKind::StopIteration => "StopIteration",
            ExcKind::SyntaxError => "SyntaxError",
            ExcKind::IndentationError => "IndentationError",
            ExcKind::OsError => "OSError",
            ExcKind::FileNotFoundError => "FileNotFoundError",
        }
    }

    /// Name as printed on the last line of a trace.
    pub fn qualified_name(self) -> &'static str {
        match self {
            ExcKind::JsonDecodeError => "json.decoder.JSONDecodeError",
            ExcKind::RegexError => "re.error",
            other => other.name(),
        }
    }

    pub fn parent(self) -> Option<ExcKind> {
        let parent = match self {
            ExcKind::BaseException => return None,
            ExcKind::SystemExit | ExcKind::Exception => ExcKind::BaseException,
            ExcKind::ArithmeticError
            | ExcKind::LookupError
            | ExcKind::ValueError
            | ExcKind::TypeError
            | ExcKind::NameError
            | ExcKind::AttributeError
            | ExcKind::ImportError
            | ExcKind::RuntimeError
            | ExcKind::AssertionError
            | ExcKind::StopIteration
            | ExcKind::SyntaxError
            | ExcKind::OsError
            | ExcKind::RegexError => ExcKind::Exception,
            ExcKind::ZeroDivisionError | ExcKind::OverflowError => ExcKind::ArithmeticError,
            ExcKind::KeyError | ExcKind::IndexError => ExcKind::LookupError,
            ExcKind::JsonDecodeError => ExcKind::ValueError,
            ExcKind::UnboundLocalError => ExcKind::NameError,
            ExcKind::ModuleNotFoundError => ExcKind::ImportError,
            ExcKind::RecursionError | ExcKind::NotImplementedError => ExcKind::RuntimeError,
            ExcKind::IndentationError => ExcKind::SyntaxError,
            ExcKind::FileNotFoundError => ExcKind::OsError,
        };
        Some(parent)
    }

    pub fn is_subclass_of(self, other: ExcKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}

/// A raised exception instance as seen by evaluated code.
#[derive(Debug)]
pub struct ExceptionObj {
    pub kind: ExcKind,
    pub args: Vec<Value>,
}

impl ExceptionObj {
    pub fn new(kind: ExcKind, args: Vec<Value>) -> Self {
        Self { kind, args }
    }

    /// `str(exc)`
    pub fn message(&self) -> String {
        match self.args.as_slice() {
            [] => String::new(),
            [single] if self.kind == ExcKind::KeyError => format::repr(single),
            [single] => format::to_str(single),
            many => format::repr(&Value::tuple(many.to_vec())),
        }
    }

    /// `repr(exc)`
    pub fn repr(&self) -> String {
        let args: Vec<String> = self.args.iter().map(format::repr).collect();
        format!("{}({})", self.kind.name(), args.join(", "))
    }
}

/// Location of a parse-time error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxFault {
    message: String,
    line: usize,
    col: usize,
    indentation: bool,
}

impl SyntaxFault {
    pub fn new(message: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            message: message.into(),
            line,
            col,
            indentation: false,
        }
    }

    pub fn indentation(message: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            indentation: true,
            ..Self::new(message, line, col)
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn col(&self) -> usize {
        self.col
    }

    pub fn is_indentation(&self) -> bool {
        self.indentation
    }
}

impl fmt::Display for SyntaxFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (<string>, line {})", self.message, self.line)
    }
}

/// One entry of the propagation trace, innermost first while unwinding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub line: usize,
    pub name: String,
}

#[derive(Debug, Clone)]
struct FaultData {
    exception: Rc<ExceptionObj>,
    frames: Vec<TraceFrame>,
    pending_line: Option<usize>,
    syntax: Option<(SyntaxFault, Option<String>)>,
}

/// An exception propagating through the interpreter.
#[derive(Debug, Clone)]
pub struct Fault(Box<FaultData>);

pub type PyResult<T> = std::result::Result<T, Fault>;

impl Fault {
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let args = if message.is_empty() {
            Vec::new()
        } else {
            vec![Value::str(&message)]
        };
        Self::from_exception(Rc::new(ExceptionObj::new(kind, args)))
    }

    pub fn from_exception(exception: Rc<ExceptionObj>) -> Self {
        Fault(Box::new(FaultData {
            exception,
            frames: Vec::new(),
            pending_line: None,
            syntax: None,
        }))
    }

    /// Syntax errors keep the offending source line for the trace.
    pub fn syntax(fault: SyntaxFault, source_line: Option<String>) -> Self {
        let kind = if fault.is_indentation() {
            ExcKind::IndentationError
        } else {
            ExcKind::SyntaxError
        };
        let exception = ExceptionObj::new(kind, vec![Value::str(&fault.to_string())]);
        let mut this = Self::from_exception(Rc::new(exception));
        this.0.syntax = Some((fault, source_line));
        this
    }

    pub fn kind(&self) -> ExcKind {
        self.0.exception.kind
    }

    /// Raised by the parser rather than by running code
    pub fn is_syntax(&self) -> bool {
        self.0.syntax.is_some()
    }

    pub fn exception(&self) -> &Rc<ExceptionObj> {
        &self.0.exception
    }

    pub fn frames(&self) -> &[TraceFrame] {
        &self.0.frames
    }

    /// Record the line of the innermost statement that was executing in
    /// the current frame. Outer statements of the same frame keep it.
    pub fn at_line(mut self, line: usize) -> Self {
        if self.0.pending_line.is_none() {
            self.0.pending_line = Some(line);
        }
        self
    }

    /// Close the current frame while unwinding out of it.
    pub fn leave_frame(mut self, name: &str) -> Self {
        if let Some(line) = self.0.pending_line.take() {
            self.0.frames.push(TraceFrame {
                line,
                name: name.to_string(),
            });
        }
        self
    }

    /// Trace text in the conventional "most recent call last" layout.
    pub fn traceback(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        let mut previous: Option<&TraceFrame> = None;
        let mut count = 0;
        for frame in self.0.frames.iter().rev() {
            if previous != Some(frame) {
                push_repeats(&mut out, count);
                previous = Some(frame);
                count = 0;
            }
            count += 1;
            if count > RECURSIVE_CUTOFF {
                continue;
            }
            out.push_str(&format!(
                "  File \"<string>\", line {}, in {}\n",
                frame.line, frame.name
            ));
        }
        push_repeats(&mut out, count);
        if let Some((syntax, source_line)) = &self.0.syntax {
            out.push_str(&format!("  File \"<string>\", line {}\n", syntax.line()));
            if let Some(text) = source_line {
                let trimmed = text.trim_start();
                let indent = text.len() - trimmed.len();
                out.push_str(&format!("    {}\n", trimmed.trim_end()));
                let caret = syntax.col().saturating_sub(1).saturating_sub(indent);
                out.push_str(&format!("    {}^\n", " ".repeat(caret)));
            }
            out.push_str(&format!("{}: {}\n", self.kind().qualified_name(), syntax.message()));
        } else {
            out.push_str(&self.summary());
            out.push('\n');
        }
        out
    }

    /// `Category: message`, or just the category when the message is empty.
    pub fn summary(&self) -> String {
        let message = self.message();
        if message.is_empty() {
            self.kind().qualified_name().to_string()
        } else {
            format!("{}: {}", self.kind().qualified_name(), message)
        }
    }

    pub fn message(&self) -> String {
        self.0.exception.message()
    }
}

/// Identical consecutive frames printed before collapsing the rest.
const RECURSIVE_CUTOFF: usize = 3;

fn push_repeats(out: &mut String, count: usize) {
    if count > RECURSIVE_CUTOFF {
        let more = count - RECURSIVE_CUTOFF;
        out.push_str(&format!(
            "  [Previous line repeated {} more time{}]\n",
            more,
            if more == 1 { "" } else { "s" }
        ));
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

pub fn type_error(message: impl Into<String>) -> Fault {
    Fault::new(ExcKind::TypeError, message)
}

pub fn value_error(message: impl Into<String>) -> Fault {
    Fault::new(ExcKind::ValueError, message)
}

pub fn index_error(message: impl Into<String>) -> Fault {
    Fault::new(ExcKind::IndexError, message)
}

pub fn name_error(name: &str) -> Fault {
    Fault::new(
        ExcKind::NameError,
        format!("name '{}' is not defined", name),
    )
}

pub fn attribute_error(message: impl Into<String>) -> Fault {
    Fault::new(ExcKind::AttributeError, message)
}

pub fn zero_division(message: impl Into<String>) -> Fault {
    Fault::new(ExcKind::ZeroDivisionError, message)
}

pub fn overflow_error() -> Fault {
    Fault::new(
        ExcKind::OverflowError,
        "integer result exceeds the 64-bit range",
    )
}

pub fn key_error(key: Value) -> Fault {
    Fault::from_exception(Rc::new(ExceptionObj::new(ExcKind::KeyError, vec![key])))
}

thread_local! {
    static NESTING: Cell<usize> = const { Cell::new(0) };
    static NESTING_LIMIT: Cell<usize> = const { Cell::new(DEFAULT_RECURSION_LIMIT) };
}

/// Suffix for faults raised while comparing nested values.
pub const IN_COMPARISON: &str = " in comparison";
/// Suffix for faults raised while rendering nested values.
pub const WHILE_REPR: &str = " while getting the repr of an object";

/// Cap the depth of structural walks (equality, ordering, hashing, repr)
/// on the current thread.
pub fn set_nesting_limit(limit: usize) {
    NESTING_LIMIT.with(|cell| cell.set(limit));
}

/// One level of a walk into a nested value.
///
/// Walks over lists, tuples and dicts recurse on the native stack, so a
/// value nested deeper than the limit raises `RecursionError` instead of
/// exhausting the worker's stack. The level is released on drop.
pub struct NestingGuard(());

impl NestingGuard {
    pub fn enter(context: &str) -> PyResult<Self> {
        let depth = NESTING.with(Cell::get);
        if depth >= NESTING_LIMIT.with(Cell::get) {
            return Err(Fault::new(
                ExcKind::RecursionError,
                format!("maximum recursion depth exceeded{}", context),
            ));
        }
        NESTING.with(|cell| cell.set(depth + 1));
        Ok(NestingGuard(()))
    }
}

impl Drop for NestingGuard {
    fn drop(&mut self) {
        NESTING.with(|cell| cell.set(cell.get().saturating_sub(1)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy() {
        assert!(ExcKind::ZeroDivisionError.is_subclass_of(ExcKind::ArithmeticError));
        assert!(ExcKind::KeyError.is_subclass_of(ExcKind::Exception));
        assert!(ExcKind::ModuleNotFoundError.is_subclass_of(ExcKind::ImportError));
        assert!(!ExcKind::SystemExit.is_subclass_of(ExcKind::Exception));
        assert!(!ExcKind::ValueError.is_subclass_of(ExcKind::TypeError));
    }

    #[test]
    fn test_traceback_layout() {
        let fault = zero_division("division by zero")
            .at_line(3)
            .leave_frame("divide")
            .at_line(5)
            .leave_frame("<module>");
        assert_eq!(
            fault.traceback(),
            "Traceback (most recent call last):\n  File \"<string>\", line 5, in <module>\n  File \"<string>\", line 3, in divide\nZeroDivisionError: division by zero\n"
        );
    }

    #[test]
    fn test_nesting_guard_limits_depth() {
        set_nesting_limit(2);
        let outer = NestingGuard::enter(IN_COMPARISON).unwrap();
        let inner = NestingGuard::enter(IN_COMPARISON).unwrap();
        let err = NestingGuard::enter(IN_COMPARISON).err().unwrap();
        assert_eq!(err.kind(), ExcKind::RecursionError);
        assert_eq!(err.message(), "maximum recursion depth exceeded in comparison");
        drop(inner);
        assert!(NestingGuard::enter(WHILE_REPR).is_ok());
        drop(outer);
        set_nesting_limit(DEFAULT_RECURSION_LIMIT);
    }

    #[test]
    fn test_repeated_frames_are_collapsed() {
        let mut fault = Fault::new(ExcKind::RecursionError, "maximum recursion depth exceeded");
        for _ in 0..10 {
            fault = fault.at_line(2).leave_frame("f");
        }
        fault = fault.at_line(4).leave_frame("<module>");
        let trace = fault.traceback();
        assert_eq!(trace.matches("in f\n").count(), 3);
        assert!(trace.contains("  [Previous line repeated 7 more times]\n"));
        assert!(trace.ends_with("RecursionError: maximum recursion depth exceeded\n"));
    }

    #[test]
    fn test_inner_line_wins() {
        let fault = value_error("bad").at_line(4).at_line(2).leave_frame("<module>");
        assert_eq!(fault.frames()[0].line, 4);
    }

    #[test]
    fn test_key_error_message_uses_repr() {
        let fault = key_error(Value::str("missing"));
        assert_eq!(fault.summary(), "KeyError: 'missing'");
    }

    #[test]
    fn test_empty_message_summary() {
        let fault = Fault::new(ExcKind::ValueError, "");
        assert_eq!(fault.summary(), "ValueError");
    }
}
