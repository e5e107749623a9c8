//! Builtins that are always present in the namespace.

use crate::capability::{documented, modules};
use crate::exec::capture::Stream;
use crate::interp::ast::{BinOp, CmpOp};
use crate::interp::fault::{overflow_error, type_error, value_error, ExcKind, Fault};
use crate::interp::value::{Args, BuiltinType, Function, TypeObj, Value};
use crate::interp::{format, methods, ops, types, Interpreter, PyResult};

/// Every primitive name with its value
pub fn table() -> Vec<(&'static str, Value)> {
    let mut table = vec![
        ("print", documented("print", PRINT_DOC, print)),
        ("len", documented("len", "Return the number of items in a container.", len)),
        ("abs", documented("abs", "Return the absolute value of the argument.", abs)),
        (
            "max",
            documented("max", "With a single iterable argument, return its biggest item.", |i, a| {
                extremum(i, a, "max", CmpOp::Gt)
            }),
        ),
        (
            "min",
            documented("min", "With a single iterable argument, return its smallest item.", |i, a| {
                extremum(i, a, "min", CmpOp::Lt)
            }),
        ),
        (
            "sum",
            documented(
                "sum",
                "Return the sum of a 'start' value (default: 0) plus an iterable of numbers.",
                sum,
            ),
        ),
        (
            "sorted",
            documented(
                "sorted",
                "Return a new list containing all items from the iterable in ascending order.",
                sorted,
            ),
        ),
        (
            "isinstance",
            documented(
                "isinstance",
                "Return whether an object is an instance of a class or of a subclass thereof.",
                isinstance,
            ),
        ),
        (
            "hasattr",
            documented("hasattr", "Return whether the object has an attribute with the given name.", hasattr),
        ),
        (
            "getattr",
            documented("getattr", "Get a named attribute from an object.", getattr),
        ),
        (
            "setattr",
            documented("setattr", "Sets the named attribute on the given object to the specified value.", setattr),
        ),
        (
            "dir",
            documented("dir", "Show attributes of an object, or the names of the current scope.", dir),
        ),
        ("help", documented("help", "Define the builtin 'help'.", help)),
        (
            "__import__",
            documented("__import__", "Import a module by name.", import),
        ),
    ];

    let types = [
        ("range", BuiltinType::Range),
        ("str", BuiltinType::Str),
        ("int", BuiltinType::Int),
        ("float", BuiltinType::Float),
        ("list", BuiltinType::List),
        ("dict", BuiltinType::Dict),
        ("tuple", BuiltinType::Tuple),
        ("set", BuiltinType::Set),
        ("bool", BuiltinType::Bool),
        ("enumerate", BuiltinType::Enumerate),
        ("zip", BuiltinType::Zip),
        ("map", BuiltinType::Map),
        ("filter", BuiltinType::Filter),
        ("type", BuiltinType::Type),
    ];
    table.extend(
        types
            .into_iter()
            .map(|(name, t)| (name, Value::Type(TypeObj::Builtin(t)))),
    );

    let exceptions = [
        ("ValueError", ExcKind::ValueError),
        ("TypeError", ExcKind::TypeError),
        ("KeyError", ExcKind::KeyError),
        ("IndexError", ExcKind::IndexError),
        ("AttributeError", ExcKind::AttributeError),
        ("NameError", ExcKind::NameError),
        ("ZeroDivisionError", ExcKind::ZeroDivisionError),
        ("Exception", ExcKind::Exception),
    ];
    table.extend(
        exceptions
            .into_iter()
            .map(|(name, kind)| (name, Value::Type(TypeObj::Exception(kind)))),
    );

    table
}

const PRINT_DOC: &str = "Prints the values to a stream, or to sys.stdout by default.\n\n  sep\n    string inserted between values, default a space.\n  end\n    string appended after the last value, default a newline.\n  file\n    a file-like object (stream); defaults to the current sys.stdout.";

fn text_option(value: Option<Value>, name: &str, default: &str) -> PyResult<String> {
    match value {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(type_error(format!(
            "{} must be None or a string, not {}",
            name,
            other.type_name()
        ))),
    }
}

fn print(interp: &mut Interpreter, mut args: Args) -> PyResult<Value> {
    let sep = text_option(args.take_keyword("sep"), "sep", " ")?;
    let end = text_option(args.take_keyword("end"), "end", "\n")?;
    let file = args.take_keyword("file");
    args.take_keyword("flush");
    args.reject_unknown_keywords("print")?;

    let parts = args
        .positional
        .iter()
        .map(format::try_to_str)
        .collect::<PyResult<Vec<String>>>()?;
    let mut text = parts.join(&sep);
    text.push_str(&end);

    match file {
        None | Some(Value::None) => interp.write(Stream::Stdout, &text),
        Some(target) => modules::sys::write_to(interp, &target, &text)?,
    }
    Ok(Value::None)
}

fn len(_interp: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.no_keywords("len")?;
    args.check("len", 1, 1)?;
    Ok(Value::Int(ops::length(&args.positional[0])? as i64))
}

fn abs(_interp: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.no_keywords("abs")?;
    args.check("abs", 1, 1)?;
    match &args.positional[0] {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        value @ (Value::Int(_) | Value::Bool(_)) => {
            let n = value.as_int().unwrap_or(0);
            n.checked_abs()
                .map(Value::Int)
                .ok_or_else(overflow_error)
        }
        other => Err(type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

/// `max`/`min`: one iterable or several arguments, optional `key` and `default`
fn extremum(interp: &mut Interpreter, mut args: Args, name: &str, op: CmpOp) -> PyResult<Value> {
    let key = args.take_keyword("key").filter(|k| !matches!(k, Value::None));
    let default = args.take_keyword("default");
    args.reject_unknown_keywords(name)?;

    let items = match args.positional.len() {
        0 => {
            return Err(type_error(format!(
                "{} expected at least 1 argument, got 0",
                name
            )))
        }
        1 => interp.collect(&args.positional[0])?,
        _ => {
            if default.is_some() {
                return Err(type_error(format!(
                    "Cannot specify a default for {}() with multiple positional arguments",
                    name
                )));
            }
            args.positional
        }
    };

    let mut items = items.into_iter();
    let Some(mut best) = items.next() else {
        return default.ok_or_else(|| value_error(format!("{}() iterable argument is empty", name)));
    };
    let mut best_key = match &key {
        Some(func) => interp.call(func, Args::new(vec![best.clone()]))?,
        None => best.clone(),
    };
    for item in items {
        let item_key = match &key {
            Some(func) => interp.call(func, Args::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        if ops::compare(op, &item_key, &best_key)? {
            best = item;
            best_key = item_key;
        }
    }
    Ok(best)
}

fn sum(interp: &mut Interpreter, mut args: Args) -> PyResult<Value> {
    let start_kw = args.take_keyword("start");
    args.reject_unknown_keywords("sum")?;
    args.check("sum", 1, 2)?;
    let start = match (args.get(1), start_kw.as_ref()) {
        (Some(_), Some(_)) => {
            return Err(type_error("sum() got multiple values for argument 'start'"))
        }
        (Some(v), None) | (None, Some(v)) => v.clone(),
        (None, None) => Value::Int(0),
    };
    if matches!(start, Value::Str(_)) {
        return Err(type_error("sum() can't sum strings [use ''.join(seq) instead]"));
    }

    let mut cursor = interp.iterate(&args.positional[0])?;
    let mut total = start;
    while let Some(item) = cursor.next(interp)? {
        total = ops::binary_op(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn sorted(interp: &mut Interpreter, mut args: Args) -> PyResult<Value> {
    let key = args.take_keyword("key");
    let reverse = args.take_keyword("reverse");
    args.reject_unknown_keywords("sorted")?;
    if args.len() != 1 {
        return Err(type_error(format!(
            "sorted expected 1 argument, got {}",
            args.len()
        )));
    }
    let reverse = reverse.map(|r| ops::truthy(&r)).unwrap_or(false);
    let mut items = interp.collect(&args.positional[0])?;
    methods::sort_values(interp, &mut items, key, reverse)?;
    Ok(Value::list(items))
}

fn matches_classinfo(value: &Value, classinfo: &Value) -> PyResult<bool> {
    match classinfo {
        Value::Type(typ) => Ok(types::is_instance(value, typ)),
        Value::Tuple(options) => {
            for option in options.iter() {
                if matches_classinfo(value, option)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(type_error(
            "isinstance() arg 2 must be a type, a tuple of types, or a union",
        )),
    }
}

fn isinstance(_interp: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.no_keywords("isinstance")?;
    args.check("isinstance", 2, 2)?;
    matches_classinfo(&args.positional[0], &args.positional[1]).map(Value::Bool)
}

fn attribute_name(value: &Value) -> PyResult<String> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(type_error(format!(
            "attribute name must be string, not '{}'",
            other.type_name()
        ))),
    }
}

fn hasattr(interp: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.no_keywords("hasattr")?;
    args.check("hasattr", 2, 2)?;
    let name = attribute_name(&args.positional[1])?;
    interp.has_attribute(&args.positional[0], &name).map(Value::Bool)
}

fn getattr(interp: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.no_keywords("getattr")?;
    args.check("getattr", 2, 3)?;
    let name = attribute_name(&args.positional[1])?;
    match interp.get_attribute(&args.positional[0], &name) {
        Err(fault) if fault.kind() == ExcKind::AttributeError => match args.get(2) {
            Some(default) => Ok(default.clone()),
            None => Err(fault),
        },
        other => other,
    }
}

fn setattr(interp: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.no_keywords("setattr")?;
    args.check("setattr", 3, 3)?;
    let name = attribute_name(&args.positional[1])?;
    interp.set_attribute(&args.positional[0], &name, args.positional[2].clone())?;
    Ok(Value::None)
}

fn names_list(names: Vec<String>) -> Value {
    Value::list(names.into_iter().map(Value::string).collect())
}

fn dir(interp: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.no_keywords("dir")?;
    args.check("dir", 0, 1)?;
    Ok(match args.get(0) {
        // Builtins only see the module scope of the caller
        None => names_list(interp.global_names()),
        Some(obj) => names_list(interp.attribute_names(obj)),
    })
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("    {}", line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parameter list as written in the `def` line, with evaluated defaults
fn signature(func: &Function) -> String {
    let params = &func.def.params;
    let render = |name: &str, default: Option<&Option<Value>>| match default {
        Some(Some(value)) => format!("{}={}", name, format::repr(value)),
        _ => name.to_string(),
    };
    let mut parts: Vec<String> = params
        .positional
        .iter()
        .enumerate()
        .map(|(i, p)| render(&p.name, func.defaults.get(i)))
        .collect();
    if let Some(name) = &params.vararg {
        parts.push(format!("*{}", name));
    } else if !params.kwonly.is_empty() {
        parts.push("*".to_string());
    }
    parts.extend(
        params
            .kwonly
            .iter()
            .enumerate()
            .map(|(i, p)| render(&p.name, func.kw_defaults.get(i))),
    );
    if let Some(name) = &params.kwarg {
        parts.push(format!("**{}", name));
    }
    parts.join(", ")
}

fn help_text(interp: &Interpreter, obj: &Value) -> String {
    match obj {
        Value::Function(func) => {
            let mut text = format!(
                "Help on function {} in module __main__:\n\n{}({})\n",
                func.name,
                func.name,
                signature(func)
            );
            if let Some(doc) = &func.def.doc {
                text.push_str(&indent(doc));
                text.push('\n');
            }
            text
        }
        Value::Builtin(builtin) => {
            let short = builtin.name.rsplit('.').next().unwrap_or(&builtin.name);
            let mut text = format!("Help on built-in function {}:\n\n{}(...)\n", short, short);
            if let Some(doc) = builtin.doc {
                text.push_str(&indent(doc));
                text.push('\n');
            }
            text
        }
        Value::Module(module) => {
            let mut text = format!("Help on built-in module {}:\n\nNAME\n    {}\n", module.name, module.name);
            if let Some(doc) = module.doc {
                text.push_str(&format!("\nDESCRIPTION\n{}\n", indent(doc)));
            }
            let names: Vec<String> = module
                .names()
                .into_iter()
                .filter(|n| !n.starts_with('_'))
                .collect();
            if !names.is_empty() {
                text.push_str(&format!("\nCONTENTS\n{}\n", indent(&names.join("\n"))));
            }
            text
        }
        Value::Type(typ) => {
            let mut text = format!("Help on class {}:\n\nclass {}\n", typ.name(), typ.name());
            let names = interp.attribute_names(obj);
            if !names.is_empty() {
                text.push_str(" |  Methods defined here:\n |\n");
                for name in names.iter().filter(|n| !n.starts_with('_')) {
                    text.push_str(&format!(" |  {}(...)\n", name));
                }
            }
            text
        }
        Value::Str(topic) => format!("No Python documentation found for {}.\n", format::quote_str(topic)),
        other => help_text(interp, &Value::Type(other.type_of())),
    }
}

fn help(interp: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.no_keywords("help")?;
    args.check("help", 0, 1)?;
    let text = match args.get(0) {
        None => "Type help(object) for help about object.\n".to_string(),
        Some(obj) => format!("{}\n", help_text(interp, obj)),
    };
    interp.write(Stream::Stdout, &text);
    Ok(Value::None)
}

/// `__import__(name, globals=None, locals=None, fromlist=(), level=0)`
fn import(interp: &mut Interpreter, mut args: Args) -> PyResult<Value> {
    let fromlist = args.take(3, "fromlist");
    let level = args.take(4, "level");
    args.take_keyword("globals");
    args.take_keyword("locals");
    args.reject_unknown_keywords("__import__")?;
    args.check("__import__", 1, 5)?;

    let name = args.positional[0].expect_str("__import__")?;
    if let Some(level) = level {
        if level.expect_int("")? != 0 {
            return Err(Fault::new(
                ExcKind::ImportError,
                "attempted relative import with no known parent package",
            ));
        }
    }
    if name.is_empty() {
        return Err(value_error("Empty module name"));
    }

    let module = interp.import_module(&name)?;
    let wants_leaf = fromlist.map(|f| ops::truthy(&f)).unwrap_or(false);
    if wants_leaf || !name.contains('.') {
        return Ok(module);
    }
    let root = name.split('.').next().unwrap_or(&name);
    interp.import_module(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySet;
    use crate::exec::capture::CapturedStreams;

    fn run(source: &str) -> (PyResult<()>, String) {
        let mut interp = Interpreter::new(CapturedStreams::default(), 1000);
        CapabilitySet::build(&[]).install(&mut interp);
        let result = interp.run(source);
        (result, interp.into_streams().stdout.into_string())
    }

    fn output(source: &str) -> String {
        let (result, out) = run(source);
        if let Err(fault) = result {
            panic!("unexpected fault: {}", fault.summary());
        }
        out
    }

    #[test]
    fn test_print_separator_and_end() {
        assert_eq!(output("print(1, 'a', None, sep='-', end='!')"), "1-a-None!");
        assert_eq!(output("print()"), "\n");
        let (result, _) = run("print(1, sep=3)");
        assert_eq!(result.unwrap_err().message(), "sep must be None or a string, not int");
    }

    #[test]
    fn test_max_min_with_key_and_default() {
        assert_eq!(output("print(max([3, 9, 2]), min(4, 1, 7))"), "9 1\n");
        assert_eq!(output("print(max(['aa', 'b', 'ccc'], key=len))"), "ccc\n");
        assert_eq!(output("print(min([], default='none'))"), "none\n");
        let (result, _) = run("max([])");
        assert_eq!(result.unwrap_err().message(), "max() iterable argument is empty");
    }

    #[test]
    fn test_sum_and_sorted() {
        assert_eq!(output("print(sum([1, 2, 3]), sum([0.5, 0.5], 1))"), "6 2.0\n");
        assert_eq!(output("print(sorted([3, 1, 2], reverse=True))"), "[3, 2, 1]\n");
        assert_eq!(output("print(sorted({'b': 1, 'a': 2}))"), "['a', 'b']\n");
        let (result, _) = run("sum(['a'], '')");
        assert_eq!(result.unwrap_err().kind(), ExcKind::TypeError);
    }

    #[test]
    fn test_start_and_base_by_keyword() {
        assert_eq!(
            output("print(sum([1, 2], start=10), int('ff', base=16), int('11', 2))"),
            "13 255 3\n"
        );
        let (result, _) = run("sum([1], 0, start=1)");
        assert_eq!(
            result.unwrap_err().message(),
            "sum() got multiple values for argument 'start'"
        );
        let (result, _) = run("int('7', 8, base=8)");
        assert_eq!(result.unwrap_err().kind(), ExcKind::TypeError);
    }

    #[test]
    fn test_isinstance_and_attributes() {
        assert_eq!(output("print(isinstance(True, int), isinstance('x', (int, str)))"), "True True\n");
        assert_eq!(output("print(hasattr('x', 'upper'), hasattr(1, 'nope'))"), "True False\n");
        assert_eq!(output("print(getattr([], 'nope', 'fallback'))"), "fallback\n");
        assert_eq!(
            output("def f():\n    pass\nsetattr(f, 'tag', 7)\nprint(f.tag)"),
            "7\n"
        );
    }

    #[test]
    fn test_disallowed_names_fault() {
        for name in ["open", "round", "eval", "exec", "compile", "input", "remove"] {
            let (result, _) = run(name);
            let fault = result.unwrap_err();
            assert_eq!(fault.kind(), ExcKind::NameError, "{} should be undefined", name);
            assert_eq!(fault.message(), format!("name '{}' is not defined", name));
        }
    }

    #[test]
    fn test_import_builtin() {
        assert_eq!(output("m = __import__('math')\nprint(m.floor(2.5))"), "2\n");
        assert_eq!(output("p = __import__('os.path')\nprint(p.__name__)"), "os\n");
        let (result, _) = run("__import__('numpy')");
        assert_eq!(result.unwrap_err().kind(), ExcKind::ModuleNotFoundError);
    }

    #[test]
    fn test_help_writes_to_stdout() {
        let out = output("def f(a, b=2):\n    'Adds things.'\n    return a + b\nhelp(f)");
        assert!(out.starts_with("Help on function f in module __main__:"));
        assert!(out.contains("f(a, b=2)"));
        assert!(out.contains("    Adds things."));
        assert!(output("help(len)").contains("Return the number of items in a container."));
    }

    #[test]
    fn test_dir_of_module_scope() {
        let out = output("x = 1\nprint('x' in dir(), 'math' in dir())");
        assert_eq!(out, "True True\n");
    }
}
