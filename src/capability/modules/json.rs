//! `json`: encoding and decoding backed by `serde_json`.

use crate::capability::ProviderError;
use crate::interp::fault::{overflow_error, type_error, value_error, ExcKind, Fault};
use crate::interp::value::{Args, Dict, Module, TypeObj, Value};
use crate::interp::{format, methods, ops, Interpreter, PyResult};
use std::rc::Rc;

/// Convert parsed JSON into runtime values
fn from_json(value: serde_json::Value) -> PyResult<Value> {
    Ok(match value {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None if n.is_u64() => return Err(overflow_error()),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::string(s),
        serde_json::Value::Array(items) => Value::list(
            items
                .into_iter()
                .map(from_json)
                .collect::<PyResult<Vec<_>>>()?,
        ),
        serde_json::Value::Object(map) => {
            let mut dict = Dict::new();
            for (key, item) in map {
                let key = Value::string(key);
                dict.insert(ops::hash_key(&key)?, key, from_json(item)?);
            }
            Value::dict(dict)
        }
    })
}

/// Rephrase a `serde_json` error the way the decoder reports it
fn decode_error(err: &serde_json::Error, source: &str) -> Fault {
    let text = err.to_string();
    let reason = text.rsplit_once(" at line ").map(|(r, _)| r).unwrap_or(&text);
    let reason = match reason {
        "expected value" | "EOF while parsing a value" => "Expecting value",
        "trailing characters" => "Extra data",
        "key must be a string" | "EOF while parsing an object" => {
            "Expecting property name enclosed in double quotes"
        }
        "expected `:`" => "Expecting ':' delimiter",
        "expected `,` or `]`" | "expected `,` or `}`" | "EOF while parsing a list" => {
            "Expecting ',' delimiter"
        }
        "EOF while parsing a string" => "Unterminated string starting at",
        "trailing comma" => "Illegal trailing comma before end of array",
        "invalid escape" => "Invalid \\escape",
        "control character (\\u0000-\\u001F) found while parsing a string" => {
            "Invalid control character at"
        }
        other => other,
    };

    let line = err.line().max(1);
    let column = err.column().max(1);
    let line_start: usize = source
        .split_inclusive('\n')
        .take(line - 1)
        .map(|l| l.chars().count())
        .sum();
    Fault::new(
        ExcKind::JsonDecodeError,
        format!(
            "{}: line {} column {} (char {})",
            reason,
            line,
            column,
            line_start + column - 1
        ),
    )
}

fn loads(args: Args) -> PyResult<Value> {
    args.no_keywords("loads")?;
    args.check("loads", 1, 1)?;
    let source = match &args.positional[0] {
        Value::Str(s) => s.clone(),
        other => {
            return Err(type_error(format!(
                "the JSON object must be str, bytes or bytearray, not {}",
                other.type_name()
            )))
        }
    };
    let parsed: serde_json::Value =
        serde_json::from_str(&source).map_err(|e| decode_error(&e, &source))?;
    from_json(parsed)
}

struct EncodeOptions {
    indent: Option<String>,
    item_separator: String,
    key_separator: String,
    sort_keys: bool,
    ensure_ascii: bool,
}

impl EncodeOptions {
    fn from_args(args: &mut Args) -> PyResult<Self> {
        let indent = match args.take_keyword("indent") {
            None | Some(Value::None) => None,
            Some(Value::Str(s)) => Some(s.to_string()),
            Some(other) => {
                let n = other.expect_int("")?;
                Some(" ".repeat(n.max(0) as usize))
            }
        };
        let sort_keys = args.take_keyword("sort_keys").map(|v| ops::truthy(&v)).unwrap_or(false);
        let ensure_ascii = args.take_keyword("ensure_ascii").map(|v| ops::truthy(&v)).unwrap_or(true);
        let (item_separator, key_separator) = match args.take_keyword("separators") {
            None | Some(Value::None) => {
                let item = if indent.is_some() { "," } else { ", " };
                (item.to_string(), ": ".to_string())
            }
            Some(Value::Tuple(pair)) if pair.len() == 2 => (
                pair[0].expect_str("separators")?.to_string(),
                pair[1].expect_str("separators")?.to_string(),
            ),
            Some(_) => return Err(value_error("separators must be a (item, key) pair")),
        };
        Ok(Self {
            indent,
            item_separator,
            key_separator,
            sort_keys,
            ensure_ascii,
        })
    }
}

struct Encoder<'a> {
    options: &'a EncodeOptions,
    /// Containers on the current path, for cycle detection
    stack: Vec<usize>,
    out: String,
}

impl Encoder<'_> {
    fn string(&mut self, text: &str) {
        let quoted = serde_json::to_string(text).unwrap_or_else(|_| format!("\"{}\"", text));
        if !self.options.ensure_ascii {
            self.out.push_str(&quoted);
            return;
        }
        for c in quoted.chars() {
            if c.is_ascii() && c != '\x7f' {
                self.out.push(c);
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    self.out.push_str(&format!("\\u{:04x}", unit));
                }
            }
        }
    }

    fn float(&mut self, f: f64) {
        if f.is_nan() {
            self.out.push_str("NaN");
        } else if f.is_infinite() {
            self.out.push_str(if f > 0.0 { "Infinity" } else { "-Infinity" });
        } else {
            self.out.push_str(&format::float_repr(f));
        }
    }

    fn newline(&mut self, depth: usize) {
        if let Some(indent) = &self.options.indent {
            self.out.push('\n');
            self.out.push_str(&indent.repeat(depth));
        }
    }

    fn enter(&mut self, value: &Value) -> PyResult<()> {
        if let Some(id) = value.identity() {
            if self.stack.contains(&id) {
                return Err(value_error("Circular reference detected"));
            }
            self.stack.push(id);
        }
        Ok(())
    }

    fn key_text(key: &Value) -> PyResult<String> {
        Ok(match key {
            Value::Str(s) => s.to_string(),
            Value::Bool(true) => "true".to_string(),
            Value::Bool(false) => "false".to_string(),
            Value::None => "null".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format::float_repr(*f),
            other => {
                return Err(type_error(format!(
                    "keys must be str, int, float, bool or None, not {}",
                    other.type_name()
                )))
            }
        })
    }

    fn encode(&mut self, interp: &mut Interpreter, value: &Value, depth: usize) -> PyResult<()> {
        match value {
            Value::None => self.out.push_str("null"),
            Value::Bool(b) => self.out.push_str(if *b { "true" } else { "false" }),
            Value::Int(i) => self.out.push_str(&i.to_string()),
            Value::Float(f) => self.float(*f),
            Value::Str(s) => self.string(s),
            Value::List(_) | Value::Tuple(_) => {
                let items = interp.collect(value)?;
                if items.is_empty() {
                    self.out.push_str("[]");
                    return Ok(());
                }
                self.enter(value)?;
                self.out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(&self.options.item_separator);
                    }
                    self.newline(depth + 1);
                    self.encode(interp, item, depth + 1)?;
                }
                self.newline(depth);
                self.out.push(']');
                self.stack.pop();
            }
            Value::Dict(dict) => {
                let mut keys = dict.borrow().keys();
                if keys.is_empty() {
                    self.out.push_str("{}");
                    return Ok(());
                }
                if self.options.sort_keys {
                    methods::sort_values(interp, &mut keys, None, false)?;
                }
                self.enter(value)?;
                self.out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    let item = dict.borrow().get(&ops::hash_key(key)?).cloned().unwrap_or(Value::None);
                    if i > 0 {
                        self.out.push_str(&self.options.item_separator);
                    }
                    self.newline(depth + 1);
                    self.string(&Self::key_text(key)?);
                    self.out.push_str(&self.options.key_separator);
                    self.encode(interp, &item, depth + 1)?;
                }
                self.newline(depth);
                self.out.push('}');
                self.stack.pop();
            }
            other => {
                return Err(type_error(format!(
                    "Object of type {} is not JSON serializable",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }
}

fn dumps(interp: &mut Interpreter, mut args: Args) -> PyResult<Value> {
    let options = EncodeOptions::from_args(&mut args)?;
    args.reject_unknown_keywords("dumps")?;
    args.check("dumps", 1, 1)?;
    let mut encoder = Encoder {
        options: &options,
        stack: Vec::new(),
        out: String::new(),
    };
    encoder.encode(interp, &args.positional[0], 0)?;
    Ok(Value::string(encoder.out))
}

pub fn provide() -> Result<Rc<Module>, ProviderError> {
    let module = Module::new("json", Some("JSON (JavaScript Object Notation) encoder and decoder."));
    module.add_fn("dumps", dumps);
    module.add_fn("loads", |_, args| loads(args));
    module.set(
        "JSONDecodeError",
        Value::Type(TypeObj::Exception(ExcKind::JsonDecodeError)),
    );
    Ok(Rc::new(module))
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

    #[test]
    fn test_dumps_default_separators() {
        let (result, out) = run("print(json.dumps({'a': [1, 2.0, None, True], 'b': 'é'}))");
        assert!(result.is_ok());
        assert_eq!(out, "{\"a\": [1, 2.0, null, true], \"b\": \"\\u00e9\"}\n");
    }

    #[test]
    fn test_dumps_indent_and_sort_keys() {
        let (result, out) = run("print(json.dumps({'b': 1, 'a': [1]}, indent=2, sort_keys=True))");
        assert!(result.is_ok());
        assert_eq!(out, "{\n  \"a\": [\n    1\n  ],\n  \"b\": 1\n}\n");
    }

    #[test]
    fn test_loads_preserves_order() {
        let (result, out) = run("d = json.loads('{\"z\": 1, \"a\": {\"x\": [1.5, \"s\"]}}')\nprint(list(d), d['a'])");
        assert!(result.is_ok());
        assert_eq!(out, "['z', 'a'] {'x': [1.5, 's']}\n");
    }

    #[test]
    fn test_loads_error_is_decode_error() {
        let (result, out) = run("try:\n    json.loads('')\nexcept ValueError as e:\n    print(e)");
        assert!(result.is_ok());
        assert_eq!(out, "Expecting value: line 1 column 1 (char 0)\n");
        let (result, _) = run("json.loads('[1, 2')");
        let fault = result.unwrap_err();
        assert_eq!(fault.kind(), ExcKind::JsonDecodeError);
        assert!(fault.summary().starts_with("json.decoder.JSONDecodeError: "));
    }

    #[test]
    fn test_unserializable_and_circular() {
        let (result, _) = run("json.dumps({1, 2})");
        assert_eq!(
            result.unwrap_err().message(),
            "Object of type set is not JSON serializable"
        );
        let (result, _) = run("a = []\na.append(a)\njson.dumps(a)");
        assert_eq!(result.unwrap_err().message(), "Circular reference detected");
    }
}
