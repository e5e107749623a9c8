//! Operators on values that need no interpreter state.

use crate::interp::ast::{BinOp, CmpOp, UnaryOp};
use crate::interp::fault::{
    index_error, key_error, overflow_error, type_error, value_error, zero_division, ExcKind, Fault,
    NestingGuard, PyResult, IN_COMPARISON,
};
use crate::interp::format;
use crate::interp::value::{Dict, HashKey, RangeObj, SliceObj, Value};
use std::cmp::Ordering;
use std::rc::Rc;

/// Longest sequence a repetition may produce.
const MAX_REPEAT_LEN: usize = 1 << 28;

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::None => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Str(s) => !s.is_empty(),
        Value::List(l) => !l.borrow().is_empty(),
        Value::Tuple(t) => !t.is_empty(),
        Value::Dict(d) | Value::Set(d) => !d.borrow().is_empty(),
        Value::Range(r) => !r.is_empty(),
        Value::Native(obj) => match obj.length() {
            Some(n) => n > 0,
            None => obj.truthy(),
        },
        _ => true,
    }
}

pub fn length(value: &Value) -> PyResult<usize> {
    match value {
        Value::Str(s) => Ok(s.chars().count()),
        Value::List(l) => Ok(l.borrow().len()),
        Value::Tuple(t) => Ok(t.len()),
        Value::Dict(d) | Value::Set(d) => Ok(d.borrow().len()),
        Value::Range(r) => r.len(),
        Value::Native(obj) => obj.length().ok_or_else(|| no_len(value)),
        other => Err(no_len(other)),
    }
}

fn no_len(value: &Value) -> Fault {
    type_error(format!("object of type '{}' has no len()", value.type_name()))
}

pub fn hash_key(value: &Value) -> PyResult<HashKey> {
    Ok(match value {
        Value::None => HashKey::None,
        Value::Bool(b) => HashKey::Int(*b as i64),
        Value::Int(i) => HashKey::Int(*i),
        Value::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 9.2e18 {
                HashKey::Int(*f as i64)
            } else {
                HashKey::Float(f.to_bits())
            }
        }
        Value::Str(s) => HashKey::Str(s.clone()),
        Value::Ellipsis => HashKey::Type("Ellipsis".to_string()),
        Value::Tuple(items) => {
            let _guard = NestingGuard::enter("")?;
            HashKey::Tuple(items.iter().map(hash_key).collect::<PyResult<_>>()?)
        }
        Value::Range(r) => {
            let (len, start, step) = r.hash_parts();
            HashKey::Range(len, start, step)
        }
        Value::Type(t) => HashKey::Type(format::type_repr(t)),
        Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::Slice(_) => {
            return Err(type_error(format!(
                "unhashable type: '{}'",
                value.type_name()
            )))
        }
        Value::Native(obj) => match obj.hash_key() {
            Some(key) => key,
            None => HashKey::Ptr(value.identity().unwrap_or(0)),
        },
        Value::Method(m) => {
            HashKey::Tuple(vec![hash_key(&m.receiver)?, HashKey::Str(m.name.clone())])
        }
        other => HashKey::Ptr(other.identity().unwrap_or(0)),
    })
}

/// `a == b`
pub fn equals(a: &Value, b: &Value) -> PyResult<bool> {
    Ok(match (a, b) {
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::None, Value::None) | (Value::Ellipsis, Value::Ellipsis) => true,
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => a.as_int() == b.as_int(),
        (Value::Float(_) | Value::Int(_) | Value::Bool(_), Value::Float(_) | Value::Int(_) | Value::Bool(_)) => {
            a.as_float() == b.as_float()
        }
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (x, y) = (x.borrow().clone(), y.borrow().clone());
            return seq_equals(&x, &y);
        }
        (Value::Tuple(x), Value::Tuple(y)) => return seq_equals(x, y),
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let pairs: Vec<(Value, Option<Value>)> = {
                let (x, y) = (x.borrow(), y.borrow());
                if x.len() != y.len() {
                    return Ok(false);
                }
                x.hashed()
                    .filter_map(|(hash, _)| x.get(hash).map(|xv| (xv.clone(), y.get(hash).cloned())))
                    .collect()
            };
            let _guard = NestingGuard::enter(IN_COMPARISON)?;
            for (xv, yv) in &pairs {
                match yv {
                    Some(yv) if same_or_equal(xv, yv)? => {}
                    _ => return Ok(false),
                }
            }
            true
        }
        (Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.hashed().all(|(hash, _)| y.contains(hash))
        }
        (Value::Range(x), Value::Range(y)) => x.same_sequence(y),
        (Value::Slice(x), Value::Slice(y)) => {
            equals(&x.start, &y.start)? && equals(&x.stop, &y.stop)? && equals(&x.step, &y.step)?
        }
        (Value::Type(x), Value::Type(y)) => x == y,
        (Value::Method(x), Value::Method(y)) => x.name == y.name && x.receiver.is(&y.receiver),
        (Value::Native(obj), other) => return obj.equals(other).unwrap_or_else(|| Ok(a.is(b))),
        (other, Value::Native(obj)) => return obj.equals(other).unwrap_or_else(|| Ok(a.is(b))),
        _ => a.is(b),
    })
}

/// Identity first, then `==`; the test behind `in`, `index` and `count`.
pub fn same_or_equal(a: &Value, b: &Value) -> PyResult<bool> {
    if a.is(b) {
        return Ok(true);
    }
    equals(a, b)
}

/// Index of the first element of `items` matching `target`.
pub fn position_of(items: &[Value], target: &Value) -> PyResult<Option<usize>> {
    for (i, item) in items.iter().enumerate() {
        if same_or_equal(item, target)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

pub fn count_of(items: &[Value], target: &Value) -> PyResult<usize> {
    let mut n = 0;
    for item in items {
        if same_or_equal(item, target)? {
            n += 1;
        }
    }
    Ok(n)
}

fn seq_equals(x: &[Value], y: &[Value]) -> PyResult<bool> {
    if x.len() != y.len() {
        return Ok(false);
    }
    let _guard = NestingGuard::enter(IN_COMPARISON)?;
    for (a, b) in x.iter().zip(y) {
        if !same_or_equal(a, b)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Ordering used by `<`, `sorted`, `min` and `max`. `None` means the
/// values are unordered (NaN); an error means the types do not compare.
pub fn partial_order(a: &Value, b: &Value, symbol: &str) -> PyResult<Option<Ordering>> {
    match (a, b) {
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
            Ok(a.as_int().partial_cmp(&b.as_int()))
        }
        (Value::Float(_) | Value::Int(_) | Value::Bool(_), Value::Float(_) | Value::Int(_) | Value::Bool(_)) => {
            Ok(a.as_float().partial_cmp(&b.as_float()))
        }
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow().clone(), y.borrow().clone());
            seq_order(&x, &y, symbol)
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_order(x, y, symbol),
        (Value::Native(obj), other) => match obj.compare(other) {
            Some(order) => Ok(Some(order)),
            None => Err(unorderable(a, b, symbol)),
        },
        (other, Value::Native(obj)) => match obj.compare(other) {
            Some(order) => Ok(Some(order.reverse())),
            None => Err(unorderable(a, b, symbol)),
        },
        _ => Err(unorderable(a, b, symbol)),
    }
}

fn seq_order(x: &[Value], y: &[Value], symbol: &str) -> PyResult<Option<Ordering>> {
    let _guard = NestingGuard::enter(IN_COMPARISON)?;
    for (a, b) in x.iter().zip(y) {
        if same_or_equal(a, b)? {
            continue;
        }
        return partial_order(a, b, symbol);
    }
    Ok(Some(x.len().cmp(&y.len())))
}

fn unorderable(a: &Value, b: &Value, symbol: &str) -> Fault {
    type_error(format!(
        "'{}' not supported between instances of '{}' and '{}'",
        symbol,
        a.type_name(),
        b.type_name()
    ))
}

/// Comparison operators other than membership.
pub fn compare(op: CmpOp, a: &Value, b: &Value) -> PyResult<bool> {
    match op {
        CmpOp::Eq => equals(a, b),
        CmpOp::NotEq => equals(a, b).map(|eq| !eq),
        CmpOp::Is => Ok(a.is(b)),
        CmpOp::IsNot => Ok(!a.is(b)),
        CmpOp::In | CmpOp::NotIn => Err(type_error("membership test needs the interpreter")),
        CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
            if let (Value::Set(x), Value::Set(y)) = (a, b) {
                return Ok(set_compare(op, &x.borrow(), &y.borrow()));
            }
            let order = partial_order(a, b, op.symbol())?;
            Ok(match (op, order) {
                (_, None) => false,
                (CmpOp::Lt, Some(o)) => o == Ordering::Less,
                (CmpOp::LtE, Some(o)) => o != Ordering::Greater,
                (CmpOp::Gt, Some(o)) => o == Ordering::Greater,
                (_, Some(o)) => o != Ordering::Less,
            })
        }
    }
}

fn set_compare(op: CmpOp, x: &Dict, y: &Dict) -> bool {
    let subset = |a: &Dict, b: &Dict| a.hashed().all(|(h, _)| b.contains(h));
    match op {
        CmpOp::Lt => x.len() < y.len() && subset(x, y),
        CmpOp::LtE => subset(x, y),
        CmpOp::Gt => x.len() > y.len() && subset(y, x),
        _ => subset(y, x),
    }
}

/// Membership for containers that can answer without iteration.
/// Returns `None` when the container must be iterated.
pub fn contains(container: &Value, item: &Value) -> PyResult<Option<bool>> {
    Ok(Some(match container {
        Value::Str(s) => match item {
            Value::Str(needle) => s.contains(needle.as_ref()),
            other => {
                return Err(type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                )))
            }
        },
        Value::List(l) => {
            let items = l.borrow().clone();
            position_of(&items, item)?.is_some()
        }
        Value::Tuple(t) => position_of(t, item)?.is_some(),
        Value::Dict(d) | Value::Set(d) => d.borrow().contains(&hash_key(item)?),
        Value::Range(r) => match item {
            Value::Int(_) | Value::Bool(_) => r.contains(item.as_int().unwrap_or(0)),
            Value::Float(f) if f.fract() == 0.0 => r.contains(*f as i64),
            _ => false,
        },
        Value::Native(obj) => match obj.contains(item) {
            Some(result) => result?,
            None => return Ok(None),
        },
        Value::Iterator(_) => return Ok(None),
        other => {
            return Err(type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            )))
        }
    }))
}

pub fn unary_op(op: UnaryOp, value: &Value) -> PyResult<Value> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!truthy(v))),
        (UnaryOp::Neg, Value::Int(_) | Value::Bool(_)) => value
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(overflow_error),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Int(_) | Value::Bool(_)) => Ok(Value::Int(value.as_int().unwrap_or(0))),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Invert, Value::Int(_) | Value::Bool(_)) => Ok(Value::Int(!value.as_int().unwrap_or(0))),
        (op, v) => {
            let symbol = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                _ => "~",
            };
            Err(type_error(format!(
                "bad operand type for unary {}: '{}'",
                symbol,
                v.type_name()
            )))
        }
    }
}

pub fn binary_op(op: BinOp, a: &Value, b: &Value) -> PyResult<Value> {
    if let Value::Native(obj) = a {
        if let Some(result) = obj.binary_op(op, b, false) {
            return result;
        }
    }
    if let Value::Native(obj) = b {
        if let Some(result) = obj.binary_op(op, a, true) {
            return result;
        }
    }
    match (a, b) {
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
            int_op(op, a.as_int().unwrap_or(0), b.as_int().unwrap_or(0))
        }
        (Value::Float(_) | Value::Int(_) | Value::Bool(_), Value::Float(_) | Value::Int(_) | Value::Bool(_)) => {
            match float_op(op, a.as_float().unwrap_or(0.0), b.as_float().unwrap_or(0.0)) {
                Some(result) => result,
                None => Err(unsupported(op, a, b)),
            }
        }
        _ => sequence_op(op, a, b),
    }
}

fn int_op(op: BinOp, x: i64, y: i64) -> PyResult<Value> {
    let checked = |r: Option<i64>| r.map(Value::Int).ok_or_else(overflow_error);
    match op {
        BinOp::Add => checked(x.checked_add(y)),
        BinOp::Sub => checked(x.checked_sub(y)),
        BinOp::Mul => checked(x.checked_mul(y)),
        BinOp::Div => {
            if y == 0 {
                return Err(zero_division("division by zero"));
            }
            Ok(Value::Float(x as f64 / y as f64))
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let q = x.checked_div(y).ok_or_else(overflow_error)?;
            let adjust = x % y != 0 && ((x < 0) != (y < 0));
            Ok(Value::Int(if adjust { q - 1 } else { q }))
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(zero_division("integer modulo by zero"));
            }
            let r = x.checked_rem(y).unwrap_or(0);
            Ok(Value::Int(if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }))
        }
        BinOp::Pow => {
            if y < 0 {
                if x == 0 {
                    return Err(zero_division("0.0 cannot be raised to a negative power"));
                }
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            let exp = u32::try_from(y).map_err(|_| overflow_error())?;
            checked(x.checked_pow(exp))
        }
        BinOp::LShift => {
            if y < 0 {
                return Err(value_error("negative shift count"));
            }
            if x == 0 {
                return Ok(Value::Int(0));
            }
            if y >= 63 {
                return Err(overflow_error());
            }
            let shifted = x << y;
            if shifted >> y != x {
                return Err(overflow_error());
            }
            Ok(Value::Int(shifted))
        }
        BinOp::RShift => {
            if y < 0 {
                return Err(value_error("negative shift count"));
            }
            Ok(Value::Int(if y >= 64 { if x < 0 { -1 } else { 0 } } else { x >> y }))
        }
        BinOp::BitAnd => Ok(Value::Int(x & y)),
        BinOp::BitOr => Ok(Value::Int(x | y)),
        BinOp::BitXor => Ok(Value::Int(x ^ y)),
        BinOp::MatMul => Err(type_error(
            "unsupported operand type(s) for @: 'int' and 'int'",
        )),
    }
}

fn float_op(op: BinOp, x: f64, y: f64) -> Option<PyResult<Value>> {
    let result = match op {
        BinOp::Add => Ok(x + y),
        BinOp::Sub => Ok(x - y),
        BinOp::Mul => Ok(x * y),
        BinOp::Div => {
            if y == 0.0 {
                Err(zero_division("float division by zero"))
            } else {
                Ok(x / y)
            }
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                Err(zero_division("float floor division by zero"))
            } else {
                Ok((x / y).floor())
            }
        }
        BinOp::Mod => {
            if y == 0.0 {
                Err(zero_division("float modulo"))
            } else {
                let r = x % y;
                Ok(if r != 0.0 && ((r < 0.0) != (y < 0.0)) { r + y } else { r })
            }
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                Err(zero_division("0.0 cannot be raised to a negative power"))
            } else if x < 0.0 && y.fract() != 0.0 {
                Err(value_error("negative number cannot be raised to a fractional power"))
            } else {
                let r = x.powf(y);
                if r.is_infinite() && x.is_finite() && y.is_finite() {
                    Err(Fault::new(ExcKind::OverflowError, "(34, 'Numerical result out of range')"))
                } else {
                    Ok(r)
                }
            }
        }
        _ => return None,
    };
    Some(result.map(Value::Float))
}

fn sequence_op(op: BinOp, a: &Value, b: &Value) -> PyResult<Value> {
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            let mut out = String::with_capacity(x.len() + y.len());
            out.push_str(x);
            out.push_str(y);
            Ok(Value::string(out))
        }
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            let mut items = x.to_vec();
            items.extend(y.iter().cloned());
            Ok(Value::tuple(items))
        }
        (BinOp::Add, Value::Str(_) | Value::List(_) | Value::Tuple(_), other) => Err(type_error(format!(
            "can only concatenate {} (not \"{}\") to {}",
            a.type_name(),
            other.type_name(),
            a.type_name()
        ))),
        (BinOp::Mul, Value::Str(_) | Value::List(_) | Value::Tuple(_), Value::Int(_) | Value::Bool(_)) => {
            repeat(a, b.as_int().unwrap_or(0))
        }
        (BinOp::Mul, Value::Int(_) | Value::Bool(_), Value::Str(_) | Value::List(_) | Value::Tuple(_)) => {
            repeat(b, a.as_int().unwrap_or(0))
        }
        (BinOp::Mod, Value::Str(fmt), args) => Ok(Value::string(format::percent_format(fmt, args)?)),
        (BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor, Value::Set(x), Value::Set(y)) => {
            Ok(Value::set(set_op(op, &x.borrow(), &y.borrow())))
        }
        (BinOp::BitOr, Value::Dict(x), Value::Dict(y)) => {
            let mut merged = x.borrow().clone();
            let y = y.borrow();
            for (hash, key) in y.hashed() {
                if let Some(value) = y.get(hash) {
                    merged.insert(hash.clone(), key.clone(), value.clone());
                }
            }
            Ok(Value::dict(merged))
        }
        _ => Err(unsupported(op, a, b)),
    }
}

pub fn set_op(op: BinOp, x: &Dict, y: &Dict) -> Dict {
    let mut out = Dict::new();
    match op {
        BinOp::BitOr => {
            out = x.clone();
            for (hash, key) in y.hashed() {
                out.insert(hash.clone(), key.clone(), Value::None);
            }
        }
        BinOp::BitAnd => {
            for (hash, key) in x.hashed() {
                if y.contains(hash) {
                    out.insert(hash.clone(), key.clone(), Value::None);
                }
            }
        }
        BinOp::Sub => {
            for (hash, key) in x.hashed() {
                if !y.contains(hash) {
                    out.insert(hash.clone(), key.clone(), Value::None);
                }
            }
        }
        _ => {
            for (hash, key) in x.hashed() {
                if !y.contains(hash) {
                    out.insert(hash.clone(), key.clone(), Value::None);
                }
            }
            for (hash, key) in y.hashed() {
                if !x.contains(hash) {
                    out.insert(hash.clone(), key.clone(), Value::None);
                }
            }
        }
    }
    out
}

fn repeat(seq: &Value, times: i64) -> PyResult<Value> {
    let times = times.max(0) as usize;
    let len = length(seq)?;
    if len.saturating_mul(times) > MAX_REPEAT_LEN {
        return Err(Fault::new(ExcKind::OverflowError, "repeated sequence is too long"));
    }
    Ok(match seq {
        Value::Str(s) => Value::string(s.repeat(times)),
        Value::List(l) => {
            let items = l.borrow();
            Value::list(items.iter().cloned().cycle().take(items.len() * times).collect())
        }
        Value::Tuple(t) => Value::tuple(t.iter().cloned().cycle().take(t.len() * times).collect()),
        _ => unreachable!("repeat is only called for sequences"),
    })
}

fn unsupported(op: BinOp, a: &Value, b: &Value) -> Fault {
    type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        a.type_name(),
        b.type_name()
    ))
}

/// Map a possibly negative index onto `0..len`.
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    if index >= 0 && index < len {
        Some(index as usize)
    } else {
        None
    }
}

/// Resolve slice bounds against a sequence length.
pub fn slice_indices(slice: &SliceObj, len: usize) -> PyResult<(i64, i64, i64)> {
    let bound = |v: &Value| -> PyResult<Option<i64>> {
        match v {
            Value::None => Ok(None),
            Value::Int(_) | Value::Bool(_) => Ok(v.as_int()),
            _ => Err(type_error(
                "slice indices must be integers or None or have an __index__ method",
            )),
        }
    };
    let step = bound(&slice.step)?.unwrap_or(1);
    if step == 0 {
        return Err(value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
    let adjust = |v: Option<i64>, default: i64| match v {
        None => default,
        Some(i) if i < 0 => (i + len).max(lower),
        Some(i) => i.min(upper),
    };
    let start = adjust(bound(&slice.start)?, if step > 0 { lower } else { upper });
    let stop = adjust(bound(&slice.stop)?, if step > 0 { upper } else { lower });
    Ok((start, stop, step))
}

pub fn slice_positions(slice: &SliceObj, len: usize) -> PyResult<Vec<usize>> {
    let (start, stop, step) = slice_indices(slice, len)?;
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        i += step;
    }
    Ok(out)
}

fn index_of(index: &Value, container: &str) -> PyResult<i64> {
    index.as_int().ok_or_else(|| {
        type_error(format!(
            "{} indices must be integers or slices, not {}",
            container,
            index.type_name()
        ))
    })
}

/// `container[index]`
pub fn get_item(container: &Value, index: &Value) -> PyResult<Value> {
    match container {
        Value::List(list) => {
            let items = list.borrow();
            if let Value::Slice(slice) = index {
                let picked = slice_positions(slice, items.len())?
                    .into_iter()
                    .map(|i| items[i].clone())
                    .collect();
                return Ok(Value::list(picked));
            }
            let i = index_of(index, "list")?;
            normalize_index(i, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| index_error("list index out of range"))
        }
        Value::Tuple(items) => {
            if let Value::Slice(slice) = index {
                let picked = slice_positions(slice, items.len())?
                    .into_iter()
                    .map(|i| items[i].clone())
                    .collect();
                return Ok(Value::tuple(picked));
            }
            let i = index_of(index, "tuple")?;
            normalize_index(i, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| index_error("tuple index out of range"))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            if let Value::Slice(slice) = index {
                let picked: String = slice_positions(slice, chars.len())?
                    .into_iter()
                    .map(|i| chars[i])
                    .collect();
                return Ok(Value::string(picked));
            }
            let i = index_of(index, "string")?;
            normalize_index(i, chars.len())
                .map(|i| Value::string(chars[i].to_string()))
                .ok_or_else(|| index_error("string index out of range"))
        }
        Value::Range(r) => {
            if let Value::Slice(slice) = index {
                let (start, stop, step) = slice_indices(slice, r.len()?)?;
                return slice_range(r, start, stop, step).map(Value::Range);
            }
            let i = index_of(index, "range")?;
            r.item(i)
                .map(Value::Int)
                .ok_or_else(|| index_error("range object index out of range"))
        }
        Value::Dict(dict) => {
            let hash = hash_key(index)?;
            let found = dict.borrow().get(&hash).cloned();
            found.ok_or_else(|| key_error(index.clone()))
        }
        Value::Native(obj) => match obj.get_item(index) {
            Some(result) => result,
            None => Err(not_subscriptable(container)),
        },
        other => Err(not_subscriptable(other)),
    }
}

/// The sub-range picked by resolved slice indices. Bounds are computed in
/// 128 bits; when the natural stop leaves the 64-bit range the tightest
/// stop past the last element is used instead.
fn slice_range(r: &RangeObj, start: i64, stop: i64, step: i64) -> PyResult<RangeObj> {
    let at = |i: i128| r.start as i128 + r.step as i128 * i;
    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    let count = if step > 0 {
        (stop - start + step - 1) / step
    } else {
        (start - stop - step - 1) / -step
    }
    .max(0);
    let first = at(start);
    let stride = r.step as i128 * step;
    if count == 0 {
        let first = i64::try_from(first).unwrap_or(r.start);
        return Ok(RangeObj { start: first, stop: first, step: 1 });
    }
    let last = first + stride * (count - 1);
    let natural = first + stride * count;
    let stop = i64::try_from(natural).or_else(|_| i64::try_from(last + stride.signum()));
    match (i64::try_from(first), stop, i64::try_from(stride)) {
        (Ok(start), Ok(stop), Ok(step)) => Ok(RangeObj { start, stop, step }),
        _ => Err(overflow_error()),
    }
}

fn not_subscriptable(value: &Value) -> Fault {
    type_error(format!("'{}' object is not subscriptable", value.type_name()))
}

/// `container[index] = value` for non-slice indices.
pub fn set_item(container: &Value, index: &Value, value: Value) -> PyResult<()> {
    match container {
        Value::List(list) => {
            let i = index_of(index, "list")?;
            let mut items = list.borrow_mut();
            let len = items.len();
            let slot = normalize_index(i, len)
                .ok_or_else(|| index_error("list assignment index out of range"))?;
            items[slot] = value;
            Ok(())
        }
        Value::Dict(dict) => {
            let hash = hash_key(index)?;
            dict.borrow_mut().insert(hash, index.clone(), value);
            Ok(())
        }
        other => Err(type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// `list[slice] = items`
pub fn set_slice(list: &Value, slice: &SliceObj, items: Vec<Value>) -> PyResult<()> {
    let Value::List(list) = list else {
        return Err(type_error(format!(
            "'{}' object does not support item assignment",
            list.type_name()
        )));
    };
    let mut target = list.borrow_mut();
    let (start, stop, step) = slice_indices(slice, target.len())?;
    if step == 1 {
        let start = start.max(0) as usize;
        let stop = (stop.max(start as i64) as usize).min(target.len());
        target.splice(start..stop, items);
        return Ok(());
    }
    let positions = slice_positions(slice, target.len())?;
    if positions.len() != items.len() {
        return Err(value_error(format!(
            "attempt to assign sequence of size {} to extended slice of size {}",
            items.len(),
            positions.len()
        )));
    }
    for (pos, item) in positions.into_iter().zip(items) {
        target[pos] = item;
    }
    Ok(())
}

/// `del container[index]`
pub fn del_item(container: &Value, index: &Value) -> PyResult<()> {
    match container {
        Value::List(list) => {
            let mut items = list.borrow_mut();
            if let Value::Slice(slice) = index {
                let mut positions = slice_positions(slice, items.len())?;
                positions.sort_unstable();
                for pos in positions.into_iter().rev() {
                    items.remove(pos);
                }
                return Ok(());
            }
            let i = index_of(index, "list")?;
            let len = items.len();
            let slot = normalize_index(i, len)
                .ok_or_else(|| index_error("list assignment index out of range"))?;
            items.remove(slot);
            Ok(())
        }
        Value::Dict(dict) => {
            let hash = hash_key(index)?;
            let removed = dict.borrow_mut().remove(&hash);
            removed.map(|_| ()).ok_or_else(|| key_error(index.clone()))
        }
        other => Err(type_error(format!(
            "'{}' object does not support item deletion",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::fault::set_nesting_limit;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    fn test_floor_division_and_modulo_follow_floor_semantics() {
        assert_eq!(binary_op(BinOp::FloorDiv, &int(-7), &int(2)).unwrap().as_int(), Some(-4));
        assert_eq!(binary_op(BinOp::Mod, &int(-7), &int(2)).unwrap().as_int(), Some(1));
        assert_eq!(binary_op(BinOp::Mod, &int(7), &int(-2)).unwrap().as_int(), Some(-1));
    }

    #[test]
    fn test_division_by_zero_messages() {
        let err = binary_op(BinOp::Div, &int(1), &int(0)).unwrap_err();
        assert_eq!(err.summary(), "ZeroDivisionError: division by zero");
        let err = binary_op(BinOp::Mod, &int(1), &int(0)).unwrap_err();
        assert_eq!(err.message(), "integer modulo by zero");
        let err = binary_op(BinOp::Div, &Value::Float(1.0), &int(0)).unwrap_err();
        assert_eq!(err.message(), "float division by zero");
    }

    #[test]
    fn test_overflow_is_reported() {
        let err = binary_op(BinOp::Mul, &int(i64::MAX), &int(2)).unwrap_err();
        assert_eq!(err.kind(), ExcKind::OverflowError);
        let err = binary_op(BinOp::Pow, &int(10), &int(30)).unwrap_err();
        assert_eq!(err.kind(), ExcKind::OverflowError);
    }

    #[test]
    fn test_mixed_type_errors() {
        let err = binary_op(BinOp::Add, &Value::str("a"), &int(1)).unwrap_err();
        assert_eq!(err.message(), "can only concatenate str (not \"int\") to str");
        let err = binary_op(BinOp::Sub, &Value::str("a"), &int(1)).unwrap_err();
        assert_eq!(err.message(), "unsupported operand type(s) for -: 'str' and 'int'");
    }

    #[test]
    fn test_numeric_equality_across_types() {
        assert!(equals(&int(1), &Value::Float(1.0)).unwrap());
        assert!(equals(&Value::Bool(true), &int(1)).unwrap());
        assert_eq!(hash_key(&Value::Float(2.0)).unwrap(), hash_key(&int(2)).unwrap());
    }

    fn nested_lists(depth: usize) -> Value {
        let mut value = Value::list(vec![]);
        for _ in 0..depth {
            value = Value::list(vec![value]);
        }
        value
    }

    #[test]
    fn test_deep_comparison_is_a_recursion_error() {
        set_nesting_limit(50);
        let (a, b) = (nested_lists(200), nested_lists(200));
        let err = equals(&a, &b).unwrap_err();
        assert_eq!(err.kind(), ExcKind::RecursionError);
        assert_eq!(err.message(), "maximum recursion depth exceeded in comparison");
        let err = compare(CmpOp::Lt, &a, &b).unwrap_err();
        assert_eq!(err.kind(), ExcKind::RecursionError);

        let (a, b) = (nested_lists(20), nested_lists(20));
        assert!(equals(&a, &b).unwrap());
        assert!(!compare(CmpOp::Lt, &a, &b).unwrap());
    }

    #[test]
    fn test_self_containing_lists() {
        set_nesting_limit(50);
        let a = Value::list(vec![]);
        let b = Value::list(vec![]);
        if let (Value::List(x), Value::List(y)) = (&a, &b) {
            x.borrow_mut().push(a.clone());
            y.borrow_mut().push(b.clone());
        }
        assert!(equals(&a, &a).unwrap());
        assert_eq!(equals(&a, &b).unwrap_err().kind(), ExcKind::RecursionError);
        assert_eq!(format::repr(&a), "[[...]]");
        if let (Value::List(x), Value::List(y)) = (&a, &b) {
            x.borrow_mut().clear();
            y.borrow_mut().clear();
        }
    }

    #[test]
    fn test_deep_tuple_hash_is_a_recursion_error() {
        set_nesting_limit(50);
        let mut value = Value::tuple(vec![]);
        for _ in 0..200 {
            value = Value::tuple(vec![value]);
        }
        let err = hash_key(&value).unwrap_err();
        assert_eq!(err.kind(), ExcKind::RecursionError);
    }

    #[test]
    fn test_range_slice_at_bounds() {
        let whole = Value::Range(RangeObj { start: i64::MIN, stop: i64::MAX, step: i64::MAX });
        let tail = SliceObj { start: int(1), stop: Value::None, step: Value::None };
        let picked = get_item(&whole, &Value::Slice(Rc::new(tail))).unwrap();
        assert_eq!(length(&picked).unwrap(), 2);
        assert_eq!(get_item(&picked, &int(0)).unwrap().as_int(), Some(-1));

        let huge = Value::Range(RangeObj { start: i64::MIN, stop: i64::MAX, step: 1 });
        assert_eq!(length(&huge).unwrap_err().kind(), ExcKind::OverflowError);
        assert_eq!(get_item(&huge, &int(-1)).unwrap().as_int(), Some(i64::MAX - 1));
        assert_eq!(contains(&huge, &int(0)).unwrap(), Some(true));
    }

    #[test]
    fn test_slices() {
        let list = Value::list((0..10).map(int).collect());
        let slice = SliceObj { start: int(1), stop: int(8), step: int(3) };
        let picked = get_item(&list, &Value::Slice(Rc::new(slice))).unwrap();
        assert_eq!(format::repr(&picked), "[1, 4, 7]");
        let reversed = SliceObj { start: Value::None, stop: Value::None, step: int(-1) };
        let text = get_item(&Value::str("abc"), &Value::Slice(Rc::new(reversed))).unwrap();
        assert_eq!(text.as_str(), Some("cba"));
    }

    #[test]
    fn test_index_errors() {
        let list = Value::list(vec![int(1)]);
        let err = get_item(&list, &int(5)).unwrap_err();
        assert_eq!(err.summary(), "IndexError: list index out of range");
        let err = get_item(&list, &Value::str("x")).unwrap_err();
        assert_eq!(err.message(), "list indices must be integers or slices, not str");
    }

    #[test]
    fn test_unhashable() {
        let err = hash_key(&Value::list(vec![])).unwrap_err();
        assert_eq!(err.summary(), "TypeError: unhashable type: 'list'");
    }

    #[test]
    fn test_ordering_errors() {
        let err = compare(CmpOp::Lt, &int(1), &Value::str("a")).unwrap_err();
        assert_eq!(err.message(), "'<' not supported between instances of 'int' and 'str'");
        assert!(compare(CmpOp::Lt, &Value::tuple(vec![int(1), int(2)]), &Value::tuple(vec![int(1), int(3)])).unwrap());
    }
}
