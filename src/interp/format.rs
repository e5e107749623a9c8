//! Text rendering of values: `repr`, `str`, format specs and `%`-formatting.

use crate::interp::fault::{type_error, value_error, NestingGuard, PyResult, WHILE_REPR};
use crate::interp::value::{TypeObj, Value};
use std::collections::HashSet;

/// `repr(value)`. Values nested past the recursion limit render as `...`;
/// use [`try_repr`] where the program should see the fault.
pub fn repr(value: &Value) -> String {
    try_repr(value).unwrap_or_else(|_| "...".to_string())
}

/// `str(value)`, with the same fallback as [`repr`].
pub fn to_str(value: &Value) -> String {
    try_to_str(value).unwrap_or_else(|_| "...".to_string())
}

pub fn try_repr(value: &Value) -> PyResult<String> {
    let mut seen = HashSet::new();
    repr_inner(value, &mut seen)
}

pub fn try_to_str(value: &Value) -> PyResult<String> {
    Ok(match value {
        Value::Str(s) => s.to_string(),
        Value::Exception(exc) => exc.message(),
        Value::Native(obj) => obj.to_str(),
        other => try_repr(other)?,
    })
}

fn repr_inner(value: &Value, seen: &mut HashSet<usize>) -> PyResult<String> {
    Ok(match value {
        Value::None => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => float_repr(*f),
        Value::Str(s) => quote_str(s),
        Value::Ellipsis => "Ellipsis".to_string(),
        Value::List(items) => guarded(value, seen, "[...]", |seen| {
            let items = items.borrow().clone();
            Ok(format!("[{}]", join_repr(&items, seen)?))
        })?,
        Value::Tuple(items) => {
            let _guard = NestingGuard::enter(WHILE_REPR)?;
            if items.len() == 1 {
                format!("({},)", repr_inner(&items[0], seen)?)
            } else {
                format!("({})", join_repr(items, seen)?)
            }
        }
        Value::Dict(dict) => guarded(value, seen, "{...}", |seen| {
            let pairs: Vec<(Value, Value)> = dict
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let parts = pairs
                .iter()
                .map(|(k, v)| Ok(format!("{}: {}", repr_inner(k, seen)?, repr_inner(v, seen)?)))
                .collect::<PyResult<Vec<String>>>()?;
            Ok(format!("{{{}}}", parts.join(", ")))
        })?,
        Value::Set(set) => {
            let keys = set.borrow().keys();
            if keys.is_empty() {
                "set()".to_string()
            } else {
                let _guard = NestingGuard::enter(WHILE_REPR)?;
                format!("{{{}}}", join_repr(&keys, seen)?)
            }
        }
        Value::Range(r) => {
            if r.step == 1 {
                format!("range({}, {})", r.start, r.stop)
            } else {
                format!("range({}, {}, {})", r.start, r.stop, r.step)
            }
        }
        Value::Slice(s) => format!(
            "slice({}, {}, {})",
            repr_inner(&s.start, seen)?,
            repr_inner(&s.stop, seen)?,
            repr_inner(&s.step, seen)?
        ),
        Value::Function(f) => format!("<function {} at {:#x}>", f.name, address(value)),
        Value::Builtin(b) => format!("<built-in function {}>", short(&b.name)),
        Value::Method(m) => format!(
            "<built-in method {} of {} object at {:#x}>",
            m.name,
            m.receiver.type_name(),
            address(&m.receiver)
        ),
        Value::Module(m) => format!("<module '{}' (built-in)>", m.name),
        Value::Type(t) => type_repr(t),
        Value::Exception(exc) => exc.repr(),
        Value::Iterator(it) => format!("<{} object at {:#x}>", it.name, address(value)),
        Value::Native(obj) => obj.repr(),
    })
}

fn short(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

pub fn type_repr(t: &TypeObj) -> String {
    format!("<class '{}'>", t.qualified_name())
}

fn address(value: &Value) -> usize {
    value.identity().unwrap_or(0)
}

/// Render `inner` unless `value` is already being rendered further up,
/// in which case emit the recursion marker.
fn guarded(
    value: &Value,
    seen: &mut HashSet<usize>,
    marker: &str,
    inner: impl FnOnce(&mut HashSet<usize>) -> PyResult<String>,
) -> PyResult<String> {
    let id = address(value);
    if !seen.insert(id) {
        return Ok(marker.to_string());
    }
    let out = NestingGuard::enter(WHILE_REPR).and_then(|_guard| inner(seen));
    seen.remove(&id);
    out
}

fn join_repr(items: &[Value], seen: &mut HashSet<usize>) -> PyResult<String> {
    Ok(items
        .iter()
        .map(|v| repr_inner(v, seen))
        .collect::<PyResult<Vec<_>>>()?
        .join(", "))
}

/// String literal form, single-quoted unless the text holds only single quotes.
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Shortest round-tripping float text, always distinguishable from an int.
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let text = format!("{:e}", f);
        return python_exponent(&text);
    }
    let text = format!("{}", f);
    if text.contains('.') {
        text
    } else {
        format!("{}.0", text)
    }
}

/// Rust writes `1e16` / `1.5e-7`; the conventional form is `1e+16` / `1.5e-07`.
fn python_exponent(text: &str) -> String {
    let Some((mantissa, exp)) = text.split_once('e') else {
        return text.to_string();
    };
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(d) => ('-', d),
        None => ('+', exp),
    };
    format!("{}e{}{:0>2}", mantissa, sign, digits)
}

/// Parsed format specification (`[[fill]align][sign][#][0][width][,][.precision][type]`).
#[derive(Debug, Clone, Default)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> PyResult<Spec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i) {
        if matches!(c, '+' | '-' | ' ') {
            out.sign = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'#') {
        out.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        out.zero = true;
        i += 1;
    }
    let mut width = String::new();
    while let Some(c) = chars.get(i).filter(|c| c.is_ascii_digit()) {
        width.push(*c);
        i += 1;
    }
    if !width.is_empty() {
        out.width = width.parse().map_err(|_| value_error("Too many decimal digits in format string"))?;
    }
    if let Some(&c) = chars.get(i) {
        if c == ',' || c == '_' {
            out.grouping = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let mut precision = String::new();
        while let Some(c) = chars.get(i).filter(|c| c.is_ascii_digit()) {
            precision.push(*c);
            i += 1;
        }
        if precision.is_empty() {
            return Err(value_error("Format specifier missing precision"));
        }
        out.precision = Some(
            precision
                .parse()
                .map_err(|_| value_error("Too many decimal digits in format string"))?,
        );
    }
    if let Some(&c) = chars.get(i) {
        out.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(value_error("Invalid format specifier"));
    }
    Ok(out)
}

/// `format(value, spec)`
pub fn format_value(value: &Value, spec: &str) -> PyResult<String> {
    if let Value::Native(obj) = value {
        if let Some(result) = obj.format(spec) {
            return result;
        }
    }
    if spec.is_empty() {
        return try_to_str(value);
    }
    let parsed = parse_spec(spec)?;
    match value {
        Value::Bool(b) if parsed.kind.is_none() => Ok(pad(&parsed, if *b { "True" } else { "False" }.into(), false)),
        Value::Int(_) | Value::Bool(_) => format_int(value.as_int().unwrap_or(0), &parsed),
        Value::Float(f) => format_float(*f, &parsed),
        Value::Str(s) => {
            match parsed.kind {
                None | Some('s') => {}
                Some(k) => {
                    return Err(value_error(format!(
                        "Unknown format code '{}' for object of type 'str'",
                        k
                    )))
                }
            }
            if parsed.sign.is_some() {
                return Err(value_error("Sign not allowed in string format specifier"));
            }
            let mut text = s.to_string();
            if let Some(p) = parsed.precision {
                text = text.chars().take(p).collect();
            }
            Ok(pad(&parsed, text, false))
        }
        other => {
            if parsed.kind.is_some() || parsed.precision.is_some() {
                return Err(type_error(format!(
                    "unsupported format string passed to {}.__format__",
                    other.type_name()
                )));
            }
            Ok(pad(&parsed, try_to_str(other)?, false))
        }
    }
}

fn format_int(n: i64, spec: &Spec) -> PyResult<String> {
    let kind = spec.kind.unwrap_or('d');
    if matches!(kind, 'e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') {
        return format_float(n as f64, spec);
    }
    if spec.precision.is_some() {
        return Err(value_error("Precision not allowed in integer format specifier"));
    }
    let magnitude = n.unsigned_abs();
    let (digits, prefix) = match kind {
        'd' | 'n' => (magnitude.to_string(), ""),
        'b' => (format!("{:b}", magnitude), "0b"),
        'o' => (format!("{:o}", magnitude), "0o"),
        'x' => (format!("{:x}", magnitude), "0x"),
        'X' => (format!("{:X}", magnitude), "0X"),
        'c' => {
            let c = u32::try_from(n)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| crate::interp::fault::overflow_error())?;
            return Ok(pad(spec, c.to_string(), false));
        }
        other => {
            return Err(value_error(format!(
                "Unknown format code '{}' for object of type 'int'",
                other
            )))
        }
    };
    let digits = match (spec.grouping, kind) {
        (Some(sep), 'd' | 'n') => group(&digits, sep, 3),
        (Some('_'), _) => group(&digits, '_', 4),
        _ => digits,
    };
    let prefix = if spec.alternate { prefix } else { "" };
    Ok(finish_number(spec, n < 0, &format!("{}{}", prefix, digits)))
}

fn format_float(f: f64, spec: &Spec) -> PyResult<String> {
    let kind = spec.kind;
    let negative = f.is_sign_negative() && !f.is_nan();
    let abs = f.abs();
    let body = if abs.is_nan() || abs.is_infinite() {
        let word = if abs.is_nan() { "nan" } else { "inf" };
        if matches!(kind, Some('E') | Some('F') | Some('G')) {
            word.to_uppercase()
        } else {
            word.to_string()
        }
    } else {
        match kind {
            Some('f') | Some('F') => format!("{:.*}", spec.precision.unwrap_or(6), abs),
            Some('e') | Some('E') => {
                let text = python_exponent(&format!("{:.*e}", spec.precision.unwrap_or(6), abs));
                if kind == Some('E') {
                    text.to_uppercase()
                } else {
                    text
                }
            }
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), abs * 100.0),
            Some('g') | Some('G') => {
                let text = general(abs, spec.precision.unwrap_or(6), spec.alternate);
                if kind == Some('G') {
                    text.to_uppercase()
                } else {
                    text
                }
            }
            None => match spec.precision {
                Some(p) => {
                    let text = general(abs, p, false);
                    if text.contains(['.', 'e', 'n', 'i']) {
                        text
                    } else {
                        format!("{}.0", text)
                    }
                }
                None => float_repr(abs),
            },
            Some(other) => {
                return Err(value_error(format!(
                    "Unknown format code '{}' for object of type 'float'",
                    other
                )))
            }
        }
    };
    let body = match spec.grouping {
        Some(sep) => {
            let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
            format!("{}{}", group(&body[..split], sep, 3), &body[split..])
        }
        None => body,
    };
    Ok(finish_number(spec, negative, &body))
}

/// `%g` semantics: precision counts significant digits, trailing zeros dropped.
fn general(abs: f64, precision: usize, keep_zeros: bool) -> String {
    let p = precision.max(1);
    if abs == 0.0 {
        return if keep_zeros { format!("{:.*}", p - 1, 0.0) } else { "0".to_string() };
    }
    let exp = abs.log10().floor() as i32;
    // Rounding can bump the exponent (9.99 -> 10.0); recompute from the rounded text.
    let sci = format!("{:.*e}", p - 1, abs);
    let exp = sci
        .split_once('e')
        .and_then(|(_, e)| e.parse::<i32>().ok())
        .unwrap_or(exp);
    if exp < -4 || exp >= p as i32 {
        let (mantissa, _) = sci.split_once('e').unwrap_or((&sci, ""));
        let mantissa = if keep_zeros { mantissa.to_string() } else { trim_zeros(mantissa) };
        python_exponent(&format!("{}e{}", mantissa, exp))
    } else {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        let text = format!("{:.*}", decimals, abs);
        if keep_zeros {
            text
        } else {
            trim_zeros(&text)
        }
    }
}

fn trim_zeros(text: &str) -> String {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text.to_string()
    }
}

fn group(digits: &str, sep: char, size: usize) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::new();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % size == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

fn finish_number(spec: &Spec, negative: bool, body: &str) -> String {
    let sign = if negative {
        "-"
    } else {
        match spec.sign {
            Some('+') => "+",
            Some(' ') => " ",
            _ => "",
        }
    };
    if spec.zero && spec.align.is_none() && spec.fill.is_none() {
        let len = sign.chars().count() + body.chars().count();
        let zeros = spec.width.saturating_sub(len);
        return format!("{}{}{}", sign, "0".repeat(zeros), body);
    }
    if spec.align == Some('=') {
        let len = sign.chars().count() + body.chars().count();
        let fill = spec.fill.unwrap_or(' ').to_string();
        return format!("{}{}{}", sign, fill.repeat(spec.width.saturating_sub(len)), body);
    }
    pad(spec, format!("{}{}", sign, body), true)
}

fn pad(spec: &Spec, text: String, numeric: bool) -> String {
    let len = text.chars().count();
    if len >= spec.width {
        return text;
    }
    let fill = spec.fill.unwrap_or(' ');
    let total = spec.width - len;
    let align = spec.align.unwrap_or(if numeric { '>' } else { '<' });
    let fill_str = |n: usize| fill.to_string().repeat(n);
    match align {
        '>' | '=' => format!("{}{}", fill_str(total), text),
        '^' => format!("{}{}{}", fill_str(total / 2), text, fill_str(total - total / 2)),
        _ => format!("{}{}", text, fill_str(total)),
    }
}

/// printf-style `fmt % args`.
pub fn percent_format(fmt: &str, args: &Value) -> PyResult<String> {
    let (values, mapping) = match args {
        Value::Tuple(items) => (items.to_vec(), None),
        Value::Dict(_) => (vec![args.clone()], Some(args.clone())),
        other => (vec![other.clone()], None),
    };
    let mut next = 0usize;
    let mut out = String::new();
    let chars: Vec<char> = fmt.chars().collect();
    let mut i = 0;
    let take = |next: &mut usize| -> PyResult<Value> {
        let v = values
            .get(*next)
            .cloned()
            .ok_or_else(|| type_error("not enough arguments for format string"))?;
        *next += 1;
        Ok(v)
    };
    while i < chars.len() {
        let c = chars[i];
        if c != '%' {
            out.push(c);
            i += 1;
            continue;
        }
        i += 1;
        let Some(&first) = chars.get(i) else {
            return Err(value_error("incomplete format"));
        };
        if first == '%' {
            out.push('%');
            i += 1;
            continue;
        }
        let mut key_value = None;
        if first == '(' {
            let close = chars[i..]
                .iter()
                .position(|&c| c == ')')
                .ok_or_else(|| value_error("incomplete format key"))?;
            let key: String = chars[i + 1..i + close].iter().collect();
            i += close + 1;
            let map = mapping
                .as_ref()
                .ok_or_else(|| type_error("format requires a mapping"))?;
            if let Value::Dict(d) = map {
                let hk = crate::interp::ops::hash_key(&Value::str(&key))?;
                let found = d.borrow().get(&hk).cloned();
                key_value = Some(found.ok_or_else(|| crate::interp::fault::key_error(Value::str(&key)))?);
            }
        }
        let mut flags = String::new();
        while let Some(&f) = chars.get(i).filter(|c| matches!(c, '-' | '+' | ' ' | '#' | '0')) {
            flags.push(f);
            i += 1;
        }
        let mut width = String::new();
        if chars.get(i) == Some(&'*') {
            width = take(&mut next)?.expect_int("")?.to_string();
            i += 1;
        }
        while let Some(&d) = chars.get(i).filter(|c| c.is_ascii_digit()) {
            width.push(d);
            i += 1;
        }
        let mut precision = None;
        if chars.get(i) == Some(&'.') {
            i += 1;
            let mut p = String::new();
            while let Some(&d) = chars.get(i).filter(|c| c.is_ascii_digit()) {
                p.push(d);
                i += 1;
            }
            precision = Some(p.parse::<usize>().unwrap_or(0));
        }
        let Some(&conv) = chars.get(i) else {
            return Err(value_error("incomplete format"));
        };
        i += 1;
        let value = match key_value {
            Some(v) => v,
            None => take(&mut next)?,
        };
        let mut spec = String::new();
        if flags.contains('-') {
            spec.push('<');
        } else if !flags.contains('0') && !width.is_empty() {
            spec.push('>');
        }
        if flags.contains('+') {
            spec.push('+');
        } else if flags.contains(' ') {
            spec.push(' ');
        }
        if flags.contains('#') {
            spec.push('#');
        }
        if flags.contains('0') && !flags.contains('-') {
            spec.push('0');
        }
        spec.push_str(&width);
        let piece = match conv {
            's' | 'r' | 'a' => {
                let text = if conv == 's' { try_to_str(&value)? } else { try_repr(&value)? };
                let text = match precision {
                    Some(p) => text.chars().take(p).collect(),
                    None => text,
                };
                format_value(&Value::string(text), spec.trim_start_matches(['+', ' ', '#', '0']))?
            }
            'd' | 'i' | 'u' => {
                let n = match &value {
                    Value::Float(f) => f.trunc() as i64,
                    other => other.as_int().ok_or_else(|| {
                        type_error(format!(
                            "%{} format: a real number is required, not {}",
                            conv,
                            other.type_name()
                        ))
                    })?,
                };
                format_value(&Value::Int(n), &spec)?
            }
            'x' | 'X' | 'o' => {
                let n = value.as_int().ok_or_else(|| {
                    type_error(format!(
                        "%{} format: an integer is required, not {}",
                        conv,
                        value.type_name()
                    ))
                })?;
                spec.push(conv);
                format_value(&Value::Int(n), &spec)?
            }
            'c' => match &value {
                Value::Str(s) if s.chars().count() == 1 => s.to_string(),
                other => {
                    let n = other.expect_int("")?;
                    format_value(&Value::Int(n), "c")?
                }
            },
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                let f = value.as_float().ok_or_else(|| {
                    type_error(format!("must be real number, not {}", value.type_name()))
                })?;
                spec.push('.');
                spec.push_str(&precision.unwrap_or(6).to_string());
                spec.push(conv);
                format_value(&Value::Float(f), &spec)?
            }
            other => {
                return Err(value_error(format!(
                    "unsupported format character '{}' (0x{:x}) at index {}",
                    other,
                    other as u32,
                    i - 1
                )))
            }
        };
        out.push_str(&piece);
    }
    if mapping.is_none() && next < values.len() {
        return Err(type_error("not all arguments converted during string formatting"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_repr() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(-2.5), "-2.5");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(123456.789), "123456.789");
    }

    #[test]
    fn test_quote_str() {
        assert_eq!(quote_str("hi"), "'hi'");
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(quote_str("a\nb"), "'a\\nb'");
    }

    #[test]
    fn test_container_repr() {
        let list = Value::list(vec![Value::Int(1), Value::str("a"), Value::None]);
        assert_eq!(repr(&list), "[1, 'a', None]");
        assert_eq!(repr(&Value::tuple(vec![Value::Int(1)])), "(1,)");
    }

    #[test]
    fn test_self_referencing_list() {
        let list = Value::list(vec![]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert_eq!(repr(&list), "[[...]]");
    }

    #[test]
    fn test_format_specs() {
        assert_eq!(format_value(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_value(&Value::Int(42), "05d").unwrap(), "00042");
        assert_eq!(format_value(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_value(&Value::str("ab"), "^6").unwrap(), "  ab  ");
        assert_eq!(format_value(&Value::str("ab"), "*>4").unwrap(), "**ab");
        assert_eq!(format_value(&Value::Int(255), "#x").unwrap(), "0xff");
        assert_eq!(format_value(&Value::Float(0.25), ".1%").unwrap(), "25.0%");
        assert_eq!(format_value(&Value::Float(1234.5), ".3g").unwrap(), "1.23e+03");
        assert_eq!(format_value(&Value::Int(-5), "+d").unwrap(), "-5");
        assert_eq!(format_value(&Value::Int(5), "+d").unwrap(), "+5");
    }

    #[test]
    fn test_percent_format() {
        let args = Value::tuple(vec![Value::str("x"), Value::Int(3), Value::Float(2.5)]);
        assert_eq!(percent_format("%s=%d (%.2f)", &args).unwrap(), "x=3 (2.50)");
        assert_eq!(percent_format("%5s|", &Value::str("ab")).unwrap(), "   ab|");
        assert_eq!(percent_format("100%%", &Value::tuple(vec![])).unwrap(), "100%");
        assert!(percent_format("%d %d", &Value::Int(1)).is_err());
    }
}
