//! `sys`: interpreter facts and the per-call standard streams.

use crate::capability::ProviderError;
use crate::exec::capture::Stream;
use crate::interp::fault::{attribute_error, type_error, ExcKind, ExceptionObj, Fault};
use crate::interp::value::{Args, Module, NativeObject, Value};
use crate::interp::{Interpreter, PyResult};
use std::any::Any;
use std::rc::Rc;

/// `sys.stdout` / `sys.stderr`: a writable handle onto a captured stream
pub struct StreamHandle {
    stream: Stream,
}

impl StreamHandle {
    pub fn new(stream: Stream) -> Self {
        Self { stream }
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }
}

impl NativeObject for StreamHandle {
    fn type_name(&self) -> &str {
        "_io.TextIOWrapper"
    }

    fn repr(&self) -> String {
        format!(
            "<_io.TextIOWrapper name='{}' mode='w' encoding='utf-8'>",
            self.stream.name()
        )
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "name" => Some(Value::str(self.stream.name())),
            "mode" => Some(Value::str("w")),
            "encoding" => Some(Value::str("utf-8")),
            _ => None,
        }
    }

    fn method_names(&self) -> &'static [&'static str] {
        &["flush", "writable", "write"]
    }

    fn call_method(&self, interp: &mut Interpreter, name: &str, args: Args) -> PyResult<Value> {
        args.no_keywords(name)?;
        match name {
            "write" => {
                args.check("write", 1, 1)?;
                let Value::Str(text) = &args.positional[0] else {
                    return Err(type_error(format!(
                        "write() argument must be str, not {}",
                        args.positional[0].type_name()
                    )));
                };
                interp.write(self.stream, text);
                Ok(Value::Int(text.chars().count() as i64))
            }
            "flush" => {
                args.check("flush", 0, 0)?;
                Ok(Value::None)
            }
            "writable" => {
                args.check("writable", 0, 0)?;
                Ok(Value::Bool(true))
            }
            other => Err(attribute_error(format!(
                "'TextIOWrapper' object has no attribute '{}'",
                other
            ))),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Send `text` to a `file=` target: a captured stream or any object with `write`
pub fn write_to(interp: &mut Interpreter, target: &Value, text: &str) -> PyResult<()> {
    if let Some(handle) = target.as_any_native::<StreamHandle>() {
        interp.write(handle.stream(), text);
        return Ok(());
    }
    let write = interp.get_attribute(target, "write")?;
    interp.call(&write, Args::new(vec![Value::str(text)]))?;
    Ok(())
}

fn platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}

pub fn provide() -> Result<Rc<Module>, ProviderError> {
    let module = Module::new("sys", Some("Access to interpreter facts and the standard streams."));

    module.set(
        "version",
        Value::string(format!("3.11.0 (pybox {})", env!("CARGO_PKG_VERSION"))),
    );
    module.set(
        "version_info",
        Value::tuple(vec![
            Value::Int(3),
            Value::Int(11),
            Value::Int(0),
            Value::str("final"),
            Value::Int(0),
        ]),
    );
    module.set("platform", Value::str(platform()));
    module.set("maxsize", Value::Int(i64::MAX));
    module.set(
        "byteorder",
        Value::str(if cfg!(target_endian = "little") { "little" } else { "big" }),
    );
    module.set("argv", Value::list(vec![Value::str("")]));
    module.set("stdout", Value::native(StreamHandle::new(Stream::Stdout)));
    module.set("stderr", Value::native(StreamHandle::new(Stream::Stderr)));

    module.add_fn("getrecursionlimit", |interp, args| {
        args.check("getrecursionlimit", 0, 0)?;
        Ok(Value::Int(interp.recursion_limit() as i64))
    });
    module.add_fn("exit", |_, args| {
        args.no_keywords("exit")?;
        args.check("exit", 0, 1)?;
        Err(Fault::from_exception(Rc::new(ExceptionObj::new(
            ExcKind::SystemExit,
            args.positional,
        ))))
    });

    Ok(Rc::new(module))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySet;
    use crate::exec::capture::CapturedStreams;

    fn run(source: &str) -> (PyResult<()>, CapturedStreams) {
        let mut interp = Interpreter::new(CapturedStreams::default(), 1000);
        CapabilitySet::build(&[]).install(&mut interp);
        let result = interp.run(source);
        (result, interp.into_streams())
    }

    #[test]
    fn test_print_to_stderr() {
        let (result, streams) = run("import sys\nprint('oops', file=sys.stderr)\nprint('fine')");
        assert!(result.is_ok());
        assert_eq!(streams.stderr.contents(), "oops\n");
        assert_eq!(streams.stdout.contents(), "fine\n");
    }

    #[test]
    fn test_stream_write_returns_length() {
        let (result, streams) = run("n = sys.stdout.write('héllo')\nprint(n)");
        assert!(result.is_ok());
        assert_eq!(streams.stdout.contents(), "héllo5\n");
    }

    #[test]
    fn test_exit_raises_system_exit() {
        let (result, _) = run("sys.exit(3)");
        let fault = result.unwrap_err();
        assert_eq!(fault.kind(), ExcKind::SystemExit);
        assert_eq!(fault.message(), "3");
    }

    #[test]
    fn test_recursion_limit_visible() {
        let (_, streams) = run("print(sys.getrecursionlimit(), sys.maxsize)");
        assert_eq!(streams.stdout.contents(), "1000 9223372036854775807\n");
    }
}
