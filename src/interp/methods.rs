//! Methods of the builtin types (`str`, `list`, `dict`, `set`, `tuple`,
//! `int`, `float`).

use crate::interp::ast::BinOp;
use crate::interp::fault::{
    attribute_error, index_error, key_error, type_error, value_error, ExcKind, Fault, PyResult,
};
use crate::interp::format;
use crate::interp::interpreter::Interpreter;
use crate::interp::ops;
use crate::interp::value::{Args, BuiltinType, Dict, IterState, NativeObject, Value};
use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

const STR_METHODS: &[&str] = &[
    "capitalize", "casefold", "center", "count", "endswith", "find", "format", "index",
    "isalnum", "isalpha", "isascii", "isdecimal", "isdigit", "isidentifier", "islower",
    "isnumeric", "isprintable", "isspace", "istitle", "isupper", "join", "ljust", "lower",
    "lstrip", "partition", "removeprefix", "removesuffix", "replace", "rfind", "rindex",
    "rjust", "rpartition", "rsplit", "rstrip", "split", "splitlines", "startswith", "strip",
    "swapcase", "title", "upper", "zfill",
];

const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove",
    "reverse", "sort",
];

const DICT_METHODS: &[&str] = &[
    "clear", "copy", "fromkeys", "get", "items", "keys", "pop", "popitem", "setdefault",
    "update", "values",
];

const SET_METHODS: &[&str] = &[
    "add", "clear", "copy", "difference", "difference_update", "discard", "intersection",
    "intersection_update", "isdisjoint", "issubset", "issuperset", "pop", "remove",
    "symmetric_difference", "symmetric_difference_update", "union", "update",
];

const TUPLE_METHODS: &[&str] = &["count", "index"];
const INT_METHODS: &[&str] = &["bit_length", "conjugate", "is_integer"];
const FLOAT_METHODS: &[&str] = &["conjugate", "is_integer"];

/// Method names of a builtin value, for `dir()` and `hasattr()`.
pub fn method_names(value: &Value) -> &'static [&'static str] {
    match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Int(_) | Value::Bool(_) => INT_METHODS,
        Value::Float(_) => FLOAT_METHODS,
        Value::Native(obj) => obj.method_names(),
        _ => &[],
    }
}

/// Method names reachable through the type object, e.g. `str.upper`.
pub fn type_method_names(typ: BuiltinType) -> &'static [&'static str] {
    match typ {
        BuiltinType::Str => STR_METHODS,
        BuiltinType::List => LIST_METHODS,
        BuiltinType::Dict => DICT_METHODS,
        BuiltinType::Set => SET_METHODS,
        BuiltinType::Tuple => TUPLE_METHODS,
        BuiltinType::Int | BuiltinType::Bool => INT_METHODS,
        BuiltinType::Float => FLOAT_METHODS,
        _ => &[],
    }
}

pub fn has_method(value: &Value, name: &str) -> bool {
    method_names(value).contains(&name)
}

/// Invoke `receiver.name(*args)`.
pub fn call_method(interp: &mut Interpreter, receiver: &Value, name: &str, args: Args) -> PyResult<Value> {
    match receiver {
        Value::Str(s) => str_method(interp, s, name, args),
        Value::List(l) => list_method(interp, receiver, l, name, args),
        Value::Dict(d) => dict_method(interp, d, name, args),
        Value::Set(s) => set_method(interp, s, name, args),
        Value::Tuple(t) => tuple_method(t, name, args),
        Value::Int(_) | Value::Bool(_) => int_method(receiver.as_int().unwrap_or(0), name, args),
        Value::Float(f) => float_method(*f, name, args),
        Value::Native(obj) => obj.call_method(interp, name, args),
        other => Err(no_attribute(other, name)),
    }
}

fn no_attribute(value: &Value, name: &str) -> Fault {
    attribute_error(format!(
        "'{}' object has no attribute '{}'",
        value.type_name(),
        name
    ))
}

fn method_error(type_name: &str, name: &str) -> Fault {
    attribute_error(format!("'{}' object has no attribute '{}'", type_name, name))
}

fn opt_str(value: Option<&Value>, func: &str) -> PyResult<Option<Rc<str>>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.clone())),
        Some(other) => Err(type_error(format!(
            "{}() arg must be None or str, not {}",
            func,
            other.type_name()
        ))),
    }
}

fn arg_str(args: &Args, index: usize, func: &str) -> PyResult<Rc<str>> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s.clone()),
        Some(other) => Err(type_error(format!(
            "{}() argument {} must be str, not {}",
            func,
            index + 1,
            other.type_name()
        ))),
        None => Err(type_error(format!("{}() missing required argument", func))),
    }
}

/// Character-index window `[start, end)` from optional slice-style bounds.
fn window(len: usize, start: Option<&Value>, end: Option<&Value>) -> PyResult<(usize, usize)> {
    let resolve = |v: Option<&Value>, default: usize| -> PyResult<usize> {
        match v {
            None | Some(Value::None) => Ok(default),
            Some(v) => {
                let i = v.expect_int("")?;
                let len = len as i64;
                Ok(if i < 0 { (i + len).max(0) } else { i.min(len) } as usize)
            }
        }
    };
    Ok((resolve(start, 0)?, resolve(end, len)?))
}

fn find_chars(hay: &[char], needle: &[char], start: usize, end: usize, reverse: bool) -> Option<usize> {
    if end < start || needle.len() > end - start {
        return None;
    }
    let last = end - needle.len();
    let matches_at = |i: usize| hay[i..i + needle.len()] == *needle;
    if reverse {
        (start..=last).rev().find(|&i| matches_at(i))
    } else {
        (start..=last).find(|&i| matches_at(i))
    }
}

fn str_method(interp: &mut Interpreter, s: &Rc<str>, name: &str, mut args: Args) -> PyResult<Value> {
    let text: &str = s;
    let result = match name {
        "upper" => Value::string(text.to_uppercase()),
        "lower" | "casefold" => Value::string(text.to_lowercase()),
        "title" => Value::string(title_case(text)),
        "capitalize" => {
            let mut chars = text.chars();
            let out = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            };
            Value::string(out)
        }
        "swapcase" => Value::string(
            text.chars()
                .flat_map(|c| {
                    if c.is_uppercase() {
                        c.to_lowercase().collect::<Vec<_>>()
                    } else {
                        c.to_uppercase().collect::<Vec<_>>()
                    }
                })
                .collect(),
        ),
        "strip" | "lstrip" | "rstrip" => {
            args.check(name, 0, 1)?;
            let chars = opt_str(args.get(0), name)?;
            let pred = |c: char| match &chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            let out = match name {
                "strip" => text.trim_matches(pred),
                "lstrip" => text.trim_start_matches(pred),
                _ => text.trim_end_matches(pred),
            };
            Value::str(out)
        }
        "split" | "rsplit" => {
            let sep = args.take(0, "sep");
            let maxsplit = args.take(1, "maxsplit").map(|v| v.expect_int("")).transpose()?.unwrap_or(-1);
            let sep = opt_str(sep.as_ref(), name)?;
            let parts = split(text, sep.as_deref(), maxsplit, name == "rsplit")?;
            Value::list(parts.into_iter().map(Value::string).collect())
        }
        "splitlines" => {
            let keepends = args.take(0, "keepends").map(|v| ops::truthy(&v)).unwrap_or(false);
            let mut lines = Vec::new();
            let mut current = String::new();
            let mut chars = text.chars().peekable();
            while let Some(c) = chars.next() {
                if c == '\n' || c == '\r' {
                    let mut ending = c.to_string();
                    if c == '\r' && chars.peek() == Some(&'\n') {
                        chars.next();
                        ending.push('\n');
                    }
                    if keepends {
                        current.push_str(&ending);
                    }
                    lines.push(Value::string(std::mem::take(&mut current)));
                } else {
                    current.push(c);
                }
            }
            if !current.is_empty() {
                lines.push(Value::string(current));
            }
            Value::list(lines)
        }
        "join" => {
            args.check("join", 1, 1)?;
            let items = interp.collect(&args.positional[0])?;
            let mut out = String::new();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(text);
                }
                match item {
                    Value::Str(part) => out.push_str(part),
                    other => {
                        return Err(type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            i,
                            other.type_name()
                        )))
                    }
                }
            }
            Value::string(out)
        }
        "replace" => {
            args.check("replace", 2, 3)?;
            let old = arg_str(&args, 0, "replace")?;
            let new = arg_str(&args, 1, "replace")?;
            let count = args.get(2).map(|v| v.expect_int("")).transpose()?.unwrap_or(-1);
            let out = if count < 0 {
                text.replace(&*old, &new)
            } else if old.is_empty() {
                let mut out = String::new();
                let mut n = 0;
                for c in text.chars() {
                    if n < count {
                        out.push_str(&new);
                        n += 1;
                    }
                    out.push(c);
                }
                if n < count {
                    out.push_str(&new);
                }
                out
            } else {
                text.replacen(&*old, &new, count as usize)
            };
            Value::string(out)
        }
        "find" | "rfind" | "index" | "rindex" => {
            args.check(name, 1, 3)?;
            let needle: Vec<char> = arg_str(&args, 0, name)?.chars().collect();
            let hay: Vec<char> = text.chars().collect();
            let (start, end) = window(hay.len(), args.get(1), args.get(2))?;
            let reverse = name.starts_with('r');
            match find_chars(&hay, &needle, start, end, reverse) {
                Some(i) => Value::Int(i as i64),
                None if name.ends_with("find") => Value::Int(-1),
                None => return Err(value_error("substring not found")),
            }
        }
        "count" => {
            args.check("count", 1, 3)?;
            let needle: Vec<char> = arg_str(&args, 0, "count")?.chars().collect();
            let hay: Vec<char> = text.chars().collect();
            let (start, end) = window(hay.len(), args.get(1), args.get(2))?;
            let mut n = 0;
            if needle.is_empty() {
                n = end.saturating_sub(start) + 1;
            } else {
                let mut i = start;
                while let Some(found) = find_chars(&hay, &needle, i, end, false) {
                    n += 1;
                    i = found + needle.len();
                }
            }
            Value::Int(n as i64)
        }
        "startswith" | "endswith" => {
            args.check(name, 1, 3)?;
            let hay: Vec<char> = text.chars().collect();
            let (start, end) = window(hay.len(), args.get(1), args.get(2))?;
            let window_text: String = if start <= end { hay[start..end].iter().collect() } else { String::new() };
            let candidates = match &args.positional[0] {
                Value::Str(p) => vec![p.clone()],
                Value::Tuple(items) => items
                    .iter()
                    .map(|v| v.expect_str(name))
                    .collect::<PyResult<Vec<_>>>()?,
                other => {
                    return Err(type_error(format!(
                        "{} first arg must be str or a tuple of str, not {}",
                        name,
                        other.type_name()
                    )))
                }
            };
            let hit = candidates.iter().any(|p| {
                if name == "startswith" {
                    window_text.starts_with(&**p)
                } else {
                    window_text.ends_with(&**p)
                }
            });
            Value::Bool(hit)
        }
        "isdigit" | "isdecimal" | "isnumeric" => Value::Bool(!text.is_empty() && text.chars().all(|c| c.is_numeric())),
        "isalpha" => Value::Bool(!text.is_empty() && text.chars().all(char::is_alphabetic)),
        "isalnum" => Value::Bool(!text.is_empty() && text.chars().all(char::is_alphanumeric)),
        "isspace" => Value::Bool(!text.is_empty() && text.chars().all(char::is_whitespace)),
        "isascii" => Value::Bool(text.is_ascii()),
        "isprintable" => Value::Bool(text.chars().all(|c| !c.is_control())),
        "isupper" => Value::Bool(
            text.chars().any(char::is_uppercase) && !text.chars().any(char::is_lowercase),
        ),
        "islower" => Value::Bool(
            text.chars().any(char::is_lowercase) && !text.chars().any(char::is_uppercase),
        ),
        "istitle" => Value::Bool(!text.is_empty() && title_case(text) == text && text.chars().any(char::is_alphabetic)),
        "isidentifier" => {
            let mut chars = text.chars();
            let ok = match chars.next() {
                Some(c) => (c == '_' || c.is_alphabetic()) && chars.all(|c| c == '_' || c.is_alphanumeric()),
                None => false,
            };
            Value::Bool(ok)
        }
        "center" | "ljust" | "rjust" => {
            args.check(name, 1, 2)?;
            let width = args.positional[0].expect_int("")?.max(0) as usize;
            let fill = match args.get(1) {
                Some(Value::Str(f)) if f.chars().count() == 1 => f.chars().next().unwrap_or(' '),
                Some(_) => {
                    return Err(type_error(
                        "The fill character must be exactly one character long",
                    ))
                }
                None => ' ',
            };
            let len = text.chars().count();
            if len >= width {
                Value::str(text)
            } else {
                let total = width - len;
                let (left, right) = match name {
                    "ljust" => (0, total),
                    "rjust" => (total, 0),
                    _ => {
                        let left = total / 2 + (total & width & 1);
                        (left, total - left)
                    }
                };
                let pad = |n: usize| fill.to_string().repeat(n);
                Value::string(format!("{}{}{}", pad(left), text, pad(right)))
            }
        }
        "zfill" => {
            args.check("zfill", 1, 1)?;
            let width = args.positional[0].expect_int("")?.max(0) as usize;
            let len = text.chars().count();
            if len >= width {
                Value::str(text)
            } else {
                let (sign, rest) = match text.chars().next() {
                    Some(c @ ('+' | '-')) => (c.to_string(), &text[1..]),
                    _ => (String::new(), text),
                };
                Value::string(format!("{}{}{}", sign, "0".repeat(width - len), rest))
            }
        }
        "partition" | "rpartition" => {
            args.check(name, 1, 1)?;
            let sep = arg_str(&args, 0, name)?;
            if sep.is_empty() {
                return Err(value_error("empty separator"));
            }
            let found = if name == "partition" { text.find(&*sep) } else { text.rfind(&*sep) };
            let parts = match found {
                Some(i) => [&text[..i], &*sep, &text[i + sep.len()..]],
                None if name == "partition" => [text, "", ""],
                None => ["", "", text],
            };
            Value::tuple(parts.iter().map(|p| Value::str(p)).collect())
        }
        "removeprefix" => {
            let prefix = arg_str(&args, 0, name)?;
            Value::str(text.strip_prefix(&*prefix).unwrap_or(text))
        }
        "removesuffix" => {
            let suffix = arg_str(&args, 0, name)?;
            Value::str(text.strip_suffix(&*suffix).unwrap_or(text))
        }
        "format" => Value::string(str_format(interp, text, args)?),
        _ => return Err(method_error("str", name)),
    };
    Ok(result)
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_cased = false;
    for c in text.chars() {
        if prev_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_cased = c.is_alphabetic();
    }
    out
}

fn split(text: &str, sep: Option<&str>, maxsplit: i64, from_right: bool) -> PyResult<Vec<String>> {
    let limit = if maxsplit < 0 { usize::MAX } else { maxsplit as usize };
    match sep {
        Some("") => Err(value_error("empty separator")),
        Some(sep) => {
            let parts: Vec<String> = if from_right {
                let mut parts: Vec<String> = text
                    .rsplitn(limit.saturating_add(1), sep)
                    .map(str::to_string)
                    .collect();
                parts.reverse();
                parts
            } else {
                text.splitn(limit.saturating_add(1), sep).map(str::to_string).collect()
            };
            Ok(parts)
        }
        None => {
            let words: Vec<&str> = text.split_whitespace().collect();
            if words.len() <= limit.saturating_add(1) || limit == usize::MAX {
                return Ok(words.into_iter().map(str::to_string).collect());
            }
            // With a limit the unsplit remainder keeps its inner whitespace.
            let mut parts = Vec::new();
            if from_right {
                let mut rest = text.trim_end();
                for _ in 0..limit {
                    let cut = rest.rfind(char::is_whitespace).unwrap_or(0);
                    parts.push(rest[cut..].trim_start().to_string());
                    rest = rest[..cut].trim_end();
                }
                parts.push(rest.trim_start().to_string());
                parts.reverse();
            } else {
                let mut rest = text.trim_start();
                for _ in 0..limit {
                    let cut = rest.find(char::is_whitespace).unwrap_or(rest.len());
                    parts.push(rest[..cut].to_string());
                    rest = rest[cut..].trim_start();
                }
                parts.push(rest.trim_end().to_string());
            }
            Ok(parts)
        }
    }
}

/// `template.format(*args, **kwargs)`
pub fn str_format(interp: &mut Interpreter, template: &str, args: Args) -> PyResult<String> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut auto_index = 0usize;
    let mut numbering: Option<bool> = None;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                out.push('}');
                i += 2;
                continue;
            }
            return Err(value_error("Single '}' encountered in format string"));
        }
        if c != '{' {
            out.push(c);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'{') {
            out.push('{');
            i += 2;
            continue;
        }
        // Find the matching close brace, allowing one level of nesting in the spec.
        let mut depth = 1;
        let mut j = i + 1;
        while j < chars.len() && depth > 0 {
            match chars[j] {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }
            if depth > 0 {
                j += 1;
            }
        }
        if j >= chars.len() {
            return Err(value_error("expected '}' before end of string"));
        }
        let field: String = chars[i + 1..j].iter().collect();
        i = j + 1;

        let (head, spec) = match field.find(':') {
            Some(pos) => (&field[..pos], Some(&field[pos + 1..])),
            None => (field.as_str(), None),
        };
        let (name, conversion) = match head.find('!') {
            Some(pos) => (&head[..pos], head[pos + 1..].chars().next()),
            None => (head, None),
        };
        let value = resolve_field(interp, name, &args, &mut auto_index, &mut numbering)?;
        let value = match conversion {
            None => value,
            Some('r') | Some('a') => Value::string(format::try_repr(&value)?),
            Some('s') => Value::string(format::try_to_str(&value)?),
            Some(other) => {
                return Err(value_error(format!(
                    "Unknown conversion specifier {}",
                    other
                )))
            }
        };
        let spec = match spec {
            Some(spec) if spec.contains('{') => str_format(interp, spec, args.clone())?,
            Some(spec) => spec.to_string(),
            None => String::new(),
        };
        out.push_str(&format::format_value(&value, &spec)?);
    }
    Ok(out)
}

fn resolve_field(
    interp: &mut Interpreter,
    name: &str,
    args: &Args,
    auto_index: &mut usize,
    numbering: &mut Option<bool>,
) -> PyResult<Value> {
    let first_end = name.find(['.', '[']).unwrap_or(name.len());
    let (first, mut rest) = name.split_at(first_end);
    let mut value = if first.is_empty() || first.chars().all(|c| c.is_ascii_digit()) {
        let manual = !first.is_empty();
        match numbering {
            Some(m) if *m != manual => {
                let msg = if manual {
                    "cannot switch from automatic field numbering to manual field specification"
                } else {
                    "cannot switch from manual field specification to automatic field numbering"
                };
                return Err(value_error(msg));
            }
            _ => *numbering = Some(manual),
        }
        let index = if manual {
            first.parse::<usize>().map_err(|_| value_error("Too many decimal digits in format string"))?
        } else {
            *auto_index += 1;
            *auto_index - 1
        };
        args.positional.get(index).cloned().ok_or_else(|| {
            index_error(format!(
                "Replacement index {} out of range for positional args tuple",
                index
            ))
        })?
    } else {
        args.keywords
            .iter()
            .find(|(k, _)| k == first)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| key_error(Value::str(first)))?
    };
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            value = interp.get_attribute(&value, &after[..end])?;
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = after
                .find(']')
                .ok_or_else(|| value_error("Missing ']' in format string"))?;
            let key = &after[..end];
            let index = match key.parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => Value::str(key),
            };
            value = ops::get_item(&value, &index)?;
            rest = &after[end + 1..];
        } else {
            return Err(value_error("Only '.' or '[' may follow ']' in format field specifier"));
        }
    }
    Ok(value)
}

/// Stable merge sort with a fallible comparator.
fn merge_sort(
    idx: &mut Vec<usize>,
    less_or_equal: &mut dyn FnMut(usize, usize) -> PyResult<bool>,
) -> PyResult<()> {
    if idx.len() <= 1 {
        return Ok(());
    }
    let mut right = idx.split_off(idx.len() / 2);
    merge_sort(idx, less_or_equal)?;
    merge_sort(&mut right, less_or_equal)?;
    let left = std::mem::take(idx);
    let (mut i, mut j) = (0, 0);
    idx.reserve(left.len() + right.len());
    while i < left.len() && j < right.len() {
        if less_or_equal(left[i], right[j])? {
            idx.push(left[i]);
            i += 1;
        } else {
            idx.push(right[j]);
            j += 1;
        }
    }
    idx.extend_from_slice(&left[i..]);
    idx.extend_from_slice(&right[j..]);
    Ok(())
}

/// Sort in place the way `list.sort` does: stable, optional key function,
/// `reverse` keeps equal elements in their original order.
pub fn sort_values(
    interp: &mut Interpreter,
    items: &mut Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> PyResult<()> {
    let keys: Vec<Value> = match key {
        Some(func) if !matches!(func, Value::None) => {
            let mut keys = Vec::with_capacity(items.len());
            for item in items.iter() {
                keys.push(interp.call(&func, Args::new(vec![item.clone()]))?);
            }
            keys
        }
        _ => items.clone(),
    };
    let mut idx: Vec<usize> = (0..items.len()).collect();
    let mut cmp = |a: usize, b: usize| -> PyResult<bool> {
        let (x, y) = if reverse { (&keys[b], &keys[a]) } else { (&keys[a], &keys[b]) };
        // `a` stays first unless `y < x`, mirroring a `<`-only comparison.
        let order = ops::partial_order(y, x, "<")?;
        Ok(order != Some(Ordering::Less))
    };
    merge_sort(&mut idx, &mut cmp)?;
    let sorted: Vec<Value> = idx.into_iter().map(|i| items[i].clone()).collect();
    *items = sorted;
    Ok(())
}

fn list_method(
    interp: &mut Interpreter,
    receiver: &Value,
    list: &Rc<RefCell<Vec<Value>>>,
    name: &str,
    mut args: Args,
) -> PyResult<Value> {
    if name != "sort" {
        args.no_keywords(name)?;
    }
    match name {
        "append" => {
            args.check("list.append", 1, 1)?;
            list.borrow_mut().push(args.positional[0].clone());
        }
        "extend" => {
            args.check("list.extend", 1, 1)?;
            let items = interp.collect(&args.positional[0])?;
            list.borrow_mut().extend(items);
        }
        "insert" => {
            args.check("insert", 2, 2)?;
            let index = args.positional[0].expect_int("")?;
            let mut items = list.borrow_mut();
            let len = items.len() as i64;
            let pos = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(pos as usize, args.positional[1].clone());
        }
        "pop" => {
            args.check("pop", 0, 1)?;
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return Err(index_error("pop from empty list"));
            }
            let index = match args.get(0) {
                Some(v) => v.expect_int("")?,
                None => -1,
            };
            let pos = ops::normalize_index(index, items.len())
                .ok_or_else(|| index_error("pop index out of range"))?;
            return Ok(items.remove(pos));
        }
        "remove" => {
            args.check("list.remove", 1, 1)?;
            let target = &args.positional[0];
            let items = list.borrow().clone();
            match ops::position_of(&items, target)? {
                Some(pos) => {
                    list.borrow_mut().remove(pos);
                }
                None => return Err(value_error("list.remove(x): x not in list")),
            }
        }
        "index" => {
            args.check("index", 1, 3)?;
            let target = &args.positional[0];
            let items = list.borrow().clone();
            let (start, end) = window(items.len(), args.get(1), args.get(2))?;
            let found = ops::position_of(items.get(start..end).unwrap_or(&[]), target)?;
            return match found {
                Some(i) => Ok(Value::Int((start + i) as i64)),
                None => Err(value_error(format!("{} is not in list", format::repr(target)))),
            };
        }
        "count" => {
            args.check("count", 1, 1)?;
            let target = &args.positional[0];
            let items = list.borrow().clone();
            return Ok(Value::Int(ops::count_of(&items, target)? as i64));
        }
        "sort" => {
            if !args.positional.is_empty() {
                return Err(type_error("sort() takes no positional arguments"));
            }
            let key = args.take_keyword("key");
            let reverse = args.take_keyword("reverse").map(|v| ops::truthy(&v)).unwrap_or(false);
            args.reject_unknown_keywords("sort")?;
            let mut items = list.borrow().clone();
            sort_values(interp, &mut items, key, reverse)?;
            *list.borrow_mut() = items;
        }
        "reverse" => {
            args.check("reverse", 0, 0)?;
            list.borrow_mut().reverse();
        }
        "copy" => {
            args.check("copy", 0, 0)?;
            return Ok(Value::list(list.borrow().clone()));
        }
        "clear" => {
            args.check("clear", 0, 0)?;
            list.borrow_mut().clear();
        }
        _ => return Err(no_attribute(receiver, name)),
    }
    Ok(Value::None)
}

/// Insert every `(key, value)` pair from a mapping or an iterable of pairs.
pub fn dict_update(interp: &mut Interpreter, target: &Rc<RefCell<Dict>>, source: &Value) -> PyResult<()> {
    if let Value::Dict(other) = source {
        let pairs: Vec<(Value, Value)> = other
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (k, v) in pairs {
            let hash = ops::hash_key(&k)?;
            target.borrow_mut().insert(hash, k, v);
        }
        return Ok(());
    }
    let items = interp.collect(source)?;
    for (i, item) in items.into_iter().enumerate() {
        let pair = interp.collect(&item).map_err(|_| {
            type_error(format!(
                "cannot convert dictionary update sequence element #{} to a sequence",
                i
            ))
        })?;
        if pair.len() != 2 {
            return Err(value_error(format!(
                "dictionary update sequence element #{} has length {}; 2 is required",
                i,
                pair.len()
            )));
        }
        let mut pair = pair.into_iter();
        let (k, v) = (pair.next().unwrap_or(Value::None), pair.next().unwrap_or(Value::None));
        let hash = ops::hash_key(&k)?;
        target.borrow_mut().insert(hash, k, v);
    }
    Ok(())
}

fn dict_method(interp: &mut Interpreter, dict: &Rc<RefCell<Dict>>, name: &str, mut args: Args) -> PyResult<Value> {
    if name != "update" {
        args.no_keywords(name)?;
    }
    let result = match name {
        "keys" | "values" | "items" => {
            args.check(name, 0, 0)?;
            let kind = match name {
                "keys" => ViewKind::Keys,
                "values" => ViewKind::Values,
                _ => ViewKind::Items,
            };
            Value::native(DictView {
                dict: dict.clone(),
                kind,
            })
        }
        "get" => {
            args.check("get", 1, 2)?;
            let hash = ops::hash_key(&args.positional[0])?;
            let found = dict.borrow().get(&hash).cloned();
            found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None))
        }
        "pop" => {
            args.check("pop", 1, 2)?;
            let key = &args.positional[0];
            let hash = ops::hash_key(key)?;
            let removed = dict.borrow_mut().remove(&hash);
            match (removed, args.get(1)) {
                (Some((_, v)), _) => v,
                (None, Some(default)) => default.clone(),
                (None, None) => return Err(key_error(key.clone())),
            }
        }
        "popitem" => {
            args.check("popitem", 0, 0)?;
            let last = dict.borrow_mut().pop_last();
            match last {
                Some((k, v)) => Value::tuple(vec![k, v]),
                None => return Err(Fault::new(ExcKind::KeyError, "popitem(): dictionary is empty")),
            }
        }
        "setdefault" => {
            args.check("setdefault", 1, 2)?;
            let key = args.positional[0].clone();
            let hash = ops::hash_key(&key)?;
            let existing = dict.borrow().get(&hash).cloned();
            match existing {
                Some(v) => v,
                None => {
                    let default = args.get(1).cloned().unwrap_or(Value::None);
                    dict.borrow_mut().insert(hash, key, default.clone());
                    default
                }
            }
        }
        "update" => {
            args.check("update", 0, 1)?;
            if let Some(source) = args.positional.first().cloned() {
                dict_update(interp, dict, &source)?;
            }
            for (k, v) in std::mem::take(&mut args.keywords) {
                let key = Value::string(k);
                let hash = ops::hash_key(&key)?;
                dict.borrow_mut().insert(hash, key, v);
            }
            Value::None
        }
        "copy" => {
            args.check("copy", 0, 0)?;
            Value::dict(dict.borrow().clone())
        }
        "clear" => {
            args.check("clear", 0, 0)?;
            dict.borrow_mut().clear();
            Value::None
        }
        "fromkeys" => return dict_fromkeys(interp, args),
        _ => return Err(method_error("dict", name)),
    };
    Ok(result)
}

/// `dict.fromkeys(iterable, value=None)`
pub fn dict_fromkeys(interp: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("fromkeys", 1, 2)?;
    let keys = interp.collect(&args.positional[0])?;
    let value = args.get(1).cloned().unwrap_or(Value::None);
    let mut out = Dict::new();
    for key in keys {
        let hash = ops::hash_key(&key)?;
        out.insert(hash, key, value.clone());
    }
    Ok(Value::dict(out))
}

fn to_set(interp: &mut Interpreter, value: &Value) -> PyResult<Dict> {
    if let Value::Set(s) = value {
        return Ok(s.borrow().clone());
    }
    let mut out = Dict::new();
    for item in interp.collect(value)? {
        let hash = ops::hash_key(&item)?;
        out.insert(hash, item, Value::None);
    }
    Ok(out)
}

fn set_method(interp: &mut Interpreter, set: &Rc<RefCell<Dict>>, name: &str, args: Args) -> PyResult<Value> {
    args.no_keywords(name)?;
    let op = match name {
        "union" | "update" => Some(BinOp::BitOr),
        "intersection" | "intersection_update" => Some(BinOp::BitAnd),
        "difference" | "difference_update" => Some(BinOp::Sub),
        "symmetric_difference" | "symmetric_difference_update" => Some(BinOp::BitXor),
        _ => None,
    };
    if let Some(op) = op {
        if name.starts_with("symmetric") {
            args.check(name, 1, 1)?;
        }
        let mut acc = set.borrow().clone();
        for other in &args.positional {
            let other = to_set(interp, other)?;
            acc = ops::set_op(op, &acc, &other);
        }
        if name == "update" || name.ends_with("_update") {
            *set.borrow_mut() = acc;
            return Ok(Value::None);
        }
        return Ok(Value::set(acc));
    }
    let result = match name {
        "add" => {
            args.check("set.add", 1, 1)?;
            let item = args.positional[0].clone();
            let hash = ops::hash_key(&item)?;
            set.borrow_mut().insert(hash, item, Value::None);
            Value::None
        }
        "remove" | "discard" => {
            args.check(name, 1, 1)?;
            let item = &args.positional[0];
            let hash = ops::hash_key(item)?;
            let removed = set.borrow_mut().remove(&hash);
            if removed.is_none() && name == "remove" {
                return Err(key_error(item.clone()));
            }
            Value::None
        }
        "pop" => {
            args.check("pop", 0, 0)?;
            let first = set.borrow_mut().pop_first();
            match first {
                Some((k, _)) => k,
                None => return Err(Fault::new(ExcKind::KeyError, "pop from an empty set")),
            }
        }
        "clear" => {
            args.check("clear", 0, 0)?;
            set.borrow_mut().clear();
            Value::None
        }
        "copy" => {
            args.check("copy", 0, 0)?;
            Value::set(set.borrow().clone())
        }
        "issubset" | "issuperset" | "isdisjoint" => {
            args.check(name, 1, 1)?;
            let other = to_set(interp, &args.positional[0])?;
            let mine = set.borrow();
            let result = match name {
                "issubset" => mine.hashed().all(|(h, _)| other.contains(h)),
                "issuperset" => other.hashed().all(|(h, _)| mine.contains(h)),
                _ => !mine.hashed().any(|(h, _)| other.contains(h)),
            };
            Value::Bool(result)
        }
        _ => return Err(method_error("set", name)),
    };
    Ok(result)
}

fn tuple_method(items: &Rc<Vec<Value>>, name: &str, args: Args) -> PyResult<Value> {
    args.no_keywords(name)?;
    match name {
        "count" => {
            args.check("count", 1, 1)?;
            let target = &args.positional[0];
            Ok(Value::Int(ops::count_of(items, target)? as i64))
        }
        "index" => {
            args.check("index", 1, 3)?;
            let target = &args.positional[0];
            let (start, end) = window(items.len(), args.get(1), args.get(2))?;
            ops::position_of(items.get(start..end).unwrap_or(&[]), target)?
                .map(|i| Value::Int((start + i) as i64))
                .ok_or_else(|| value_error("tuple.index(x): x not in tuple"))
        }
        _ => Err(method_error("tuple", name)),
    }
}

fn int_method(value: i64, name: &str, args: Args) -> PyResult<Value> {
    args.check(name, 0, 0)?;
    match name {
        "bit_length" => Ok(Value::Int(64 - value.unsigned_abs().leading_zeros() as i64)),
        "conjugate" => Ok(Value::Int(value)),
        "is_integer" => Ok(Value::Bool(true)),
        _ => Err(method_error("int", name)),
    }
}

fn float_method(value: f64, name: &str, args: Args) -> PyResult<Value> {
    args.check(name, 0, 0)?;
    match name {
        "is_integer" => Ok(Value::Bool(value.is_finite() && value.fract() == 0.0)),
        "conjugate" => Ok(Value::Float(value)),
        _ => Err(method_error("float", name)),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ViewKind {
    Keys,
    Values,
    Items,
}

/// Live `dict.keys()` / `values()` / `items()` view.
struct DictView {
    dict: Rc<RefCell<Dict>>,
    kind: ViewKind,
}

impl DictView {
    fn snapshot(&self) -> Vec<Value> {
        let dict = self.dict.borrow();
        match self.kind {
            ViewKind::Keys => dict.keys(),
            ViewKind::Values => dict.values(),
            ViewKind::Items => dict.items(),
        }
    }
}

impl NativeObject for DictView {
    fn type_name(&self) -> &str {
        match self.kind {
            ViewKind::Keys => "dict_keys",
            ViewKind::Values => "dict_values",
            ViewKind::Items => "dict_items",
        }
    }

    fn repr(&self) -> String {
        format!("{}({})", self.type_name(), format::repr(&Value::list(self.snapshot())))
    }

    fn iterate(&self) -> Option<PyResult<IterState>> {
        Some(Ok(IterState::items(self.snapshot())))
    }

    fn length(&self) -> Option<usize> {
        Some(self.dict.borrow().len())
    }

    fn contains(&self, item: &Value) -> Option<PyResult<bool>> {
        let result = match self.kind {
            ViewKind::Keys => ops::hash_key(item).map(|h| self.dict.borrow().contains(&h)),
            _ => ops::position_of(&self.snapshot(), item).map(|found| found.is_some()),
        };
        Some(result)
    }

    fn equals(&self, other: &Value) -> Option<PyResult<bool>> {
        let other = other.as_any_native::<DictView>()?;
        Some(ops::equals(&Value::list(self.snapshot()), &Value::list(other.snapshot())))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_whitespace_with_limit() {
        assert_eq!(split("  a b   c ", None, -1, false).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(split("a b  c d", None, 1, false).unwrap(), vec!["a", "b  c d"]);
        assert_eq!(split("a b  c d", None, 1, true).unwrap(), vec!["a b  c", "d"]);
    }

    #[test]
    fn test_split_with_separator() {
        assert_eq!(split("a,b,,c", Some(","), -1, false).unwrap(), vec!["a", "b", "", "c"]);
        assert_eq!(split("a,b,c", Some(","), 1, true).unwrap(), vec!["a,b", "c"]);
        assert!(split("abc", Some(""), -1, false).is_err());
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("hello wORLD"), "Hello World");
        assert_eq!(title_case("they're"), "They'Re");
    }

    #[test]
    fn test_find_chars_bounds() {
        let hay: Vec<char> = "abcabc".chars().collect();
        let needle: Vec<char> = "bc".chars().collect();
        assert_eq!(find_chars(&hay, &needle, 0, 6, false), Some(1));
        assert_eq!(find_chars(&hay, &needle, 0, 6, true), Some(4));
        assert_eq!(find_chars(&hay, &needle, 5, 6, false), None);
    }
}
