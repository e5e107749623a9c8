//! Calling type objects: `int("7")`, `list(it)`, `ValueError("x")`.

use crate::interp::fault::{overflow_error, type_error, value_error, ExcKind, ExceptionObj, Fault, PyResult};
use crate::interp::format;
use crate::interp::interpreter::Interpreter;
use crate::interp::methods;
use crate::interp::ops;
use crate::interp::value::{Args, BuiltinType, Dict, IterObj, IterState, RangeObj, SliceObj, TypeObj, Value};
use std::rc::Rc;

pub fn construct(interp: &mut Interpreter, typ: &TypeObj, args: Args) -> PyResult<Value> {
    match typ {
        TypeObj::Builtin(t) => construct_builtin(interp, *t, args),
        TypeObj::Exception(kind) => {
            args.no_keywords(kind.name())?;
            Ok(Value::Exception(Rc::new(ExceptionObj::new(*kind, args.positional))))
        }
        TypeObj::Native(native) => match &native.ctor {
            Some(ctor) => {
                let ctor = ctor.clone();
                ctor(interp, args)
            }
            None => Err(type_error(format!(
                "cannot create '{}' instances",
                native.name
            ))),
        },
    }
}

fn construct_builtin(interp: &mut Interpreter, t: BuiltinType, mut args: Args) -> PyResult<Value> {
    match t {
        BuiltinType::Int => {
            let base = args.take_keyword("base");
            args.reject_unknown_keywords("int")?;
            args.check("int", 0, 2)?;
            let base = match (args.get(1), base.as_ref()) {
                (Some(_), Some(_)) => {
                    return Err(type_error(
                        "argument for int() given by name ('base') and position (2)",
                    ))
                }
                (Some(b), None) | (None, Some(b)) => Some(b.expect_int("")?),
                (None, None) => None,
            };
            match args.get(0) {
                None => Ok(Value::Int(0)),
                Some(value) => to_int(value, base),
            }
        }
        BuiltinType::Float => {
            args.no_keywords("float")?;
            args.check("float", 0, 1)?;
            match args.get(0) {
                None => Ok(Value::Float(0.0)),
                Some(value) => to_float(value).map(Value::Float),
            }
        }
        BuiltinType::Str => {
            args.no_keywords("str")?;
            args.check("str", 0, 1)?;
            Ok(match args.get(0) {
                None => Value::str(""),
                Some(Value::Str(s)) => Value::Str(s.clone()),
                Some(value) => Value::string(format::try_to_str(value)?),
            })
        }
        BuiltinType::Bool => {
            args.no_keywords("bool")?;
            args.check("bool", 0, 1)?;
            Ok(Value::Bool(args.get(0).map(ops::truthy).unwrap_or(false)))
        }
        BuiltinType::List => {
            args.no_keywords("list")?;
            args.check("list", 0, 1)?;
            let items = match args.get(0) {
                Some(value) => interp.collect(value)?,
                None => Vec::new(),
            };
            Ok(Value::list(items))
        }
        BuiltinType::Tuple => {
            args.no_keywords("tuple")?;
            args.check("tuple", 0, 1)?;
            Ok(match args.get(0) {
                Some(Value::Tuple(items)) => Value::Tuple(items.clone()),
                Some(value) => Value::tuple(interp.collect(value)?),
                None => Value::tuple(Vec::new()),
            })
        }
        BuiltinType::Set => {
            args.no_keywords("set")?;
            args.check("set", 0, 1)?;
            let mut set = Dict::new();
            if let Some(value) = args.get(0) {
                for item in interp.collect(value)? {
                    set.insert(ops::hash_key(&item)?, item, Value::None);
                }
            }
            Ok(Value::set(set))
        }
        BuiltinType::Dict => {
            args.check("dict", 0, 1)?;
            let dict = Rc::new(std::cell::RefCell::new(Dict::new()));
            if let Some(source) = args.get(0) {
                methods::dict_update(interp, &dict, source)?;
            }
            for (key, value) in std::mem::take(&mut args.keywords) {
                let key = Value::string(key);
                let hash = ops::hash_key(&key)?;
                dict.borrow_mut().insert(hash, key, value);
            }
            Ok(Value::Dict(dict))
        }
        BuiltinType::Range => {
            args.no_keywords("range")?;
            args.check("range", 1, 3)?;
            let ints = args
                .positional
                .iter()
                .map(|v| v.expect_int(""))
                .collect::<PyResult<Vec<i64>>>()?;
            let (start, stop, step) = match *ints.as_slice() {
                [stop] => (0, stop, 1),
                [start, stop] => (start, stop, 1),
                [start, stop, step, ..] => (start, stop, step),
                [] => return Err(type_error("range expected at least 1 argument, got 0")),
            };
            if step == 0 {
                return Err(value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range(RangeObj { start, stop, step }))
        }
        BuiltinType::Slice => {
            args.check("slice", 1, 3)?;
            let p = &args.positional;
            let (start, stop, step) = match p.len() {
                1 => (Value::None, p[0].clone(), Value::None),
                2 => (p[0].clone(), p[1].clone(), Value::None),
                _ => (p[0].clone(), p[1].clone(), p[2].clone()),
            };
            Ok(Value::Slice(Rc::new(SliceObj { start, stop, step })))
        }
        BuiltinType::Map => {
            if args.len() < 2 {
                return Err(type_error("map() must have at least two arguments."));
            }
            let func = args.positional.remove(0);
            let mut inners = Vec::with_capacity(args.len());
            for iterable in &args.positional {
                inners.push(interp.iterate(iterable)?);
            }
            Ok(iterator(BuiltinType::Map, IterState::Map { func, inners }))
        }
        BuiltinType::Filter => {
            args.check("filter", 2, 2)?;
            let inner = interp.iterate(&args.positional[1])?;
            Ok(iterator(
                BuiltinType::Filter,
                IterState::Filter {
                    func: args.positional[0].clone(),
                    inner: Box::new(inner),
                },
            ))
        }
        BuiltinType::Zip => {
            args.take_keyword("strict");
            args.reject_unknown_keywords("zip")?;
            let mut inners = Vec::with_capacity(args.len());
            for iterable in &args.positional {
                inners.push(interp.iterate(iterable)?);
            }
            Ok(iterator(BuiltinType::Zip, IterState::Zip { inners }))
        }
        BuiltinType::Enumerate => {
            let start = args.take(1, "start");
            let iterable = args.take(0, "iterable");
            args.reject_unknown_keywords("enumerate")?;
            let Some(iterable) = iterable else {
                return Err(type_error("enumerate() missing required argument 'iterable'"));
            };
            let count = match start {
                Some(v) => v.expect_int("")?,
                None => 0,
            };
            let inner = interp.iterate(&iterable)?;
            Ok(iterator(
                BuiltinType::Enumerate,
                IterState::Enumerate {
                    inner: Box::new(inner),
                    count,
                },
            ))
        }
        BuiltinType::Type => {
            if args.len() == 3 {
                // Building a class this way is class creation in disguise.
                return Err(Fault::new(ExcKind::NameError, "__build_class__ not found"));
            }
            args.check("type", 1, 1)?;
            Ok(Value::Type(args.positional[0].type_of()))
        }
        BuiltinType::NoneType => {
            args.check("NoneType", 0, 0)?;
            Ok(Value::None)
        }
        other => Err(type_error(format!(
            "cannot create '{}' instances",
            other.name()
        ))),
    }
}

fn iterator(kind: BuiltinType, state: IterState) -> Value {
    Value::Iterator(Rc::new(IterObj::new(kind, state)))
}

/// `int(value[, base])`
pub fn to_int(value: &Value, base: Option<i64>) -> PyResult<Value> {
    if let Some(base) = base {
        let Value::Str(text) = value else {
            return Err(type_error("int() can't convert non-string with explicit base"));
        };
        return parse_int(text, base).map(Value::Int);
    }
    match value {
        Value::Int(_) | Value::Bool(_) => Ok(Value::Int(value.as_int().unwrap_or(0))),
        Value::Float(f) => float_to_int(*f).map(Value::Int),
        Value::Str(text) => parse_int(text, 10).map(Value::Int),
        other => Err(type_error(format!(
            "int() argument must be a string, a bytes-like object or a real number, not '{}'",
            other.type_name()
        ))),
    }
}

pub fn float_to_int(f: f64) -> PyResult<i64> {
    if f.is_nan() {
        return Err(value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(Fault::new(
            ExcKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    let truncated = f.trunc();
    if truncated < -9.223_372_036_854_776e18 || truncated >= 9.223_372_036_854_776e18 {
        return Err(overflow_error());
    }
    Ok(truncated as i64)
}

/// Parse an integer literal the way `int(text, base)` does: surrounding
/// whitespace, a sign, an optional prefix matching the base, underscores
/// between digits.
pub fn parse_int(text: &str, base: i64) -> PyResult<i64> {
    let invalid = || {
        value_error(format!(
            "invalid literal for int() with base {}: {}",
            base,
            format::quote_str(text)
        ))
    };
    if base != 0 && !(2..=36).contains(&base) {
        return Err(value_error("int() base must be >= 2 and <= 36, or 0"));
    }
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = digits.to_ascii_lowercase();
    let (radix, body, prefixed) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &digits[2..], true),
        (0 | 8, Some("0o")) => (8, &digits[2..], true),
        (0 | 2, Some("0b")) => (2, &digits[2..], true),
        (0, _) => {
            if digits.len() > 1 && digits.starts_with('0') && digits.chars().any(|c| c != '0' && c != '_') {
                return Err(invalid());
            }
            (10, digits, false)
        }
        (b, _) => (b as u32, digits, false),
    };
    // An underscore may directly follow a base prefix: `0x_ff`.
    let body = if prefixed { body.strip_prefix('_').unwrap_or(body) } else { body };
    if body.is_empty() || body.starts_with('_') || body.ends_with('_') || body.contains("__") {
        return Err(invalid());
    }
    let cleaned: String = body.chars().filter(|c| *c != '_').collect();
    if !cleaned.chars().all(|c| c.is_digit(radix)) {
        return Err(invalid());
    }
    let magnitude = i128::from_str_radix(&cleaned, radix).map_err(|_| overflow_error())?;
    let value = if negative { -magnitude } else { magnitude };
    i64::try_from(value).map_err(|_| overflow_error())
}

/// `float(value)`
pub fn to_float(value: &Value) -> PyResult<f64> {
    match value {
        Value::Float(f) => Ok(*f),
        Value::Int(_) | Value::Bool(_) => Ok(value.as_float().unwrap_or(0.0)),
        Value::Str(text) => parse_float(text).ok_or_else(|| {
            value_error(format!(
                "could not convert string to float: {}",
                format::quote_str(text)
            ))
        }),
        other => Err(type_error(format!(
            "float() argument must be a string or a real number, not '{}'",
            other.type_name()
        ))),
    }
}

fn parse_float(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let (sign, body) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1.0, &trimmed[1..]),
        Some(b'+') => (1.0, &trimmed[1..]),
        _ => (1.0, trimmed),
    };
    let lower = body.to_ascii_lowercase();
    match lower.as_str() {
        "inf" | "infinity" => return Some(sign * f64::INFINITY),
        "nan" => return Some(f64::NAN),
        _ => {}
    }
    if body.is_empty()
        || body.starts_with('_')
        || body.ends_with('_')
        || body.contains("__")
        || !body.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-' | '_'))
    {
        return None;
    }
    let cleaned: String = body.chars().filter(|c| *c != '_').collect();
    cleaned.parse::<f64>().ok().map(|f| sign * f)
}

/// `isinstance(value, typ)` for a single type object.
pub fn is_instance(value: &Value, typ: &TypeObj) -> bool {
    match (value, typ) {
        (Value::Exception(exc), TypeObj::Exception(kind)) => exc.kind.is_subclass_of(*kind),
        (Value::Native(obj), TypeObj::Native(native)) => obj.type_name() == native.name,
        (_, TypeObj::Builtin(BuiltinType::Object)) => true,
        (Value::Exception(_) | Value::Native(_), _) => false,
        (_, TypeObj::Builtin(t)) => value.builtin_type().is_subtype_of(*t),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_bases() {
        assert_eq!(parse_int(" 42 ", 10).unwrap(), 42);
        assert_eq!(parse_int("-1_000", 10).unwrap(), -1000);
        assert_eq!(parse_int("ff", 16).unwrap(), 255);
        assert_eq!(parse_int("0x1F", 0).unwrap(), 31);
        assert_eq!(parse_int("0b101", 2).unwrap(), 5);
        assert_eq!(parse_int("z", 36).unwrap(), 35);
    }

    #[test]
    fn test_parse_int_rejects_garbage() {
        let err = parse_int("abc", 10).unwrap_err();
        assert_eq!(err.message(), "invalid literal for int() with base 10: 'abc'");
        assert!(parse_int("1__0", 10).is_err());
        assert!(parse_int("", 10).is_err());
        assert!(parse_int("012", 0).is_err());
        assert_eq!(parse_int("99999999999999999999", 10).unwrap_err().kind(), ExcKind::OverflowError);
    }

    #[test]
    fn test_parse_float_forms() {
        assert_eq!(parse_float("  3.5 "), Some(3.5));
        assert_eq!(parse_float("1e3"), Some(1000.0));
        assert_eq!(parse_float("-inf"), Some(f64::NEG_INFINITY));
        assert!(parse_float("nan").unwrap().is_nan());
        assert_eq!(parse_float("abc"), None);
    }

    #[test]
    fn test_float_to_int_edges() {
        assert_eq!(float_to_int(-2.7).unwrap(), -2);
        assert_eq!(float_to_int(f64::NAN).unwrap_err().kind(), ExcKind::ValueError);
        assert_eq!(float_to_int(f64::INFINITY).unwrap_err().kind(), ExcKind::OverflowError);
    }

    #[test]
    fn test_is_instance_respects_bool_subtyping() {
        assert!(is_instance(&Value::Bool(true), &TypeObj::Builtin(BuiltinType::Int)));
        assert!(!is_instance(&Value::Int(1), &TypeObj::Builtin(BuiltinType::Bool)));
        let exc = Value::Exception(Rc::new(ExceptionObj::new(ExcKind::KeyError, vec![])));
        assert!(is_instance(&exc, &TypeObj::Exception(ExcKind::LookupError)));
    }
}
