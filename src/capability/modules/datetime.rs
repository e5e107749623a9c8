//! `datetime`: naive dates, datetimes and durations backed by `chrono`.

use crate::capability::modules::str_arg;
use crate::capability::ProviderError;
use crate::interp::ast::BinOp;
use crate::interp::fault::{type_error, value_error, zero_division, ExcKind, Fault};
use crate::interp::value::{Args, HashKey, Module, NativeFn, NativeObject, NativeType, TypeObj, Value};
use crate::interp::{Interpreter, PyResult};
use chrono::format::{Item, StrftimeItems};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use std::any::Any;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Write;
use std::rc::Rc;

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

fn out_of_range() -> Fault {
    Fault::new(ExcKind::OverflowError, "date value out of range")
}

/// Python `strftime` directives mapped onto chrono's; `%f` is microseconds
pub(crate) fn strftime(moment: &NaiveDateTime, format: &str) -> PyResult<String> {
    let mut translated = String::with_capacity(format.len());
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            translated.push(c);
            continue;
        }
        match chars.next() {
            Some('f') => translated.push_str("%6f"),
            Some(next) => {
                translated.push('%');
                translated.push(next);
            }
            None => translated.push('%'),
        }
    }

    let items: Vec<Item> = StrftimeItems::new(&translated).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(value_error("Invalid format string"));
    }
    let mut out = String::new();
    write!(out, "{}", moment.format_with_items(items.into_iter()))
        .map_err(|_| value_error("Invalid format string"))?;
    Ok(out)
}

fn iso_datetime(moment: &NaiveDateTime, sep: &str) -> String {
    let mut text = format!(
        "{}{}{:02}:{:02}:{:02}",
        moment.date().format("%Y-%m-%d"),
        sep,
        moment.hour(),
        moment.minute(),
        moment.second()
    );
    let micros = moment.nanosecond() / 1000;
    if micros != 0 {
        text.push_str(&format!(".{:06}", micros));
    }
    text
}

/// Integer parameters taken by position or name, with defaults after `required`
fn int_params(args: &mut Args, names: &[&str], required: usize, defaults: &[i64], func: &str) -> PyResult<Vec<i64>> {
    if args.len() > names.len() {
        return Err(type_error(format!(
            "{}() takes at most {} arguments ({} given)",
            func,
            names.len(),
            args.len()
        )));
    }
    let mut values = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        match args.take(i, name) {
            Some(value) => values.push(value.expect_int("")?),
            None if i < required => {
                return Err(type_error(format!(
                    "{}() missing required argument '{}' (pos {})",
                    func,
                    name,
                    i + 1
                )))
            }
            None => values.push(defaults[i - required]),
        }
    }
    args.reject_unknown_keywords(func)?;
    Ok(values)
}

fn make_date(year: i64, month: i64, day: i64) -> PyResult<NaiveDate> {
    if !(1..=9999).contains(&year) {
        return Err(value_error(format!("year {} is out of range", year)));
    }
    if !(1..=12).contains(&month) {
        return Err(value_error("month must be in 1..12"));
    }
    NaiveDate::from_ymd_opt(year as i32, month as u32, day.clamp(0, 32) as u32)
        .ok_or_else(|| value_error("day is out of range for month"))
}

fn make_datetime(fields: &[i64]) -> PyResult<NaiveDateTime> {
    let date = make_date(fields[0], fields[1], fields[2])?;
    let limits = [("hour", 23), ("minute", 59), ("second", 59), ("microsecond", 999_999)];
    for ((name, max), value) in limits.iter().zip(&fields[3..]) {
        if !(0..=*max).contains(value) {
            return Err(value_error(format!("{} must be in 0..{}", name, max)));
        }
    }
    date.and_hms_micro_opt(
        fields[3] as u32,
        fields[4] as u32,
        fields[5] as u32,
        fields[6] as u32,
    )
    .ok_or_else(out_of_range)
}

fn parse_isoformat(text: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn invalid_isoformat(text: &str) -> Fault {
    value_error(format!(
        "Invalid isoformat string: {}",
        crate::interp::format::quote_str(text)
    ))
}

/// `datetime.timedelta`, stored as whole microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeDelta {
    micros: i64,
}

impl TimeDelta {
    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    pub fn days(&self) -> i64 {
        self.micros.div_euclid(MICROS_PER_DAY)
    }

    pub fn seconds(&self) -> i64 {
        self.micros.rem_euclid(MICROS_PER_DAY) / MICROS_PER_SECOND
    }

    pub fn microseconds(&self) -> i64 {
        self.micros.rem_euclid(MICROS_PER_SECOND)
    }

    fn chrono(&self) -> chrono::Duration {
        chrono::Duration::microseconds(self.micros)
    }

    fn checked(micros: Option<i64>) -> PyResult<Value> {
        micros
            .map(|m| Value::native(TimeDelta::from_micros(m)))
            .ok_or_else(|| Fault::new(ExcKind::OverflowError, "timedelta value out of range"))
    }

    fn scaled(&self, factor: &Value) -> Option<PyResult<Value>> {
        match factor {
            Value::Int(_) | Value::Bool(_) => {
                let n = factor.as_int().unwrap_or(0);
                Some(Self::checked(self.micros.checked_mul(n)))
            }
            Value::Float(f) => Some(float_micros(self.micros as f64 * f)),
            _ => None,
        }
    }
}

fn float_micros(micros: f64) -> PyResult<Value> {
    if !micros.is_finite() || micros.abs() >= i64::MAX as f64 {
        return Err(Fault::new(ExcKind::OverflowError, "timedelta value out of range"));
    }
    Ok(Value::native(TimeDelta::from_micros(micros.round() as i64)))
}

fn as_timedelta(value: &Value) -> Option<TimeDelta> {
    value.as_any_native::<TimeDelta>().copied()
}

impl NativeObject for TimeDelta {
    fn type_name(&self) -> &str {
        "datetime.timedelta"
    }

    fn repr(&self) -> String {
        let mut parts = Vec::new();
        if self.days() != 0 {
            parts.push(format!("days={}", self.days()));
        }
        if self.seconds() != 0 {
            parts.push(format!("seconds={}", self.seconds()));
        }
        if self.microseconds() != 0 {
            parts.push(format!("microseconds={}", self.microseconds()));
        }
        if parts.is_empty() {
            parts.push("0".to_string());
        }
        format!("datetime.timedelta({})", parts.join(", "))
    }

    fn to_str(&self) -> String {
        let seconds = self.seconds();
        let mut text = String::new();
        let days = self.days();
        if days != 0 {
            let plural = if days.abs() == 1 { "" } else { "s" };
            text.push_str(&format!("{} day{}, ", days, plural));
        }
        text.push_str(&format!(
            "{}:{:02}:{:02}",
            seconds / 3600,
            seconds % 3600 / 60,
            seconds % 60
        ));
        if self.microseconds() != 0 {
            text.push_str(&format!(".{:06}", self.microseconds()));
        }
        text
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "days" => Some(Value::Int(self.days())),
            "seconds" => Some(Value::Int(self.seconds())),
            "microseconds" => Some(Value::Int(self.microseconds())),
            _ => None,
        }
    }

    fn method_names(&self) -> &'static [&'static str] {
        &["total_seconds"]
    }

    fn call_method(&self, _interp: &mut Interpreter, name: &str, args: Args) -> PyResult<Value> {
        match name {
            "total_seconds" => {
                args.check("total_seconds", 0, 0)?;
                Ok(Value::Float(self.micros as f64 / MICROS_PER_SECOND as f64))
            }
            other => Err(type_error(format!("unknown timedelta method {}", other))),
        }
    }

    fn binary_op(&self, op: BinOp, other: &Value, reflected: bool) -> Option<PyResult<Value>> {
        if let Some(rhs) = as_timedelta(other) {
            let (a, b) = if reflected { (rhs.micros, self.micros) } else { (self.micros, rhs.micros) };
            return match op {
                BinOp::Add => Some(Self::checked(a.checked_add(b))),
                BinOp::Sub => Some(Self::checked(a.checked_sub(b))),
                BinOp::Div if b == 0 => Some(Err(zero_division("division by zero"))),
                BinOp::Div => Some(Ok(Value::Float(a as f64 / b as f64))),
                BinOp::FloorDiv if b == 0 => Some(Err(zero_division("integer division or modulo by zero"))),
                BinOp::FloorDiv => Some(Ok(Value::Int(a.div_euclid(b)))),
                BinOp::Mod if b == 0 => Some(Err(zero_division("integer division or modulo by zero"))),
                BinOp::Mod => Some(Self::checked(Some(a.rem_euclid(b)))),
                _ => None,
            };
        }
        match (op, reflected) {
            (BinOp::Mul, _) => self.scaled(other),
            (BinOp::Div, false) => match other.as_float() {
                Some(d) if d == 0.0 => Some(Err(zero_division("division by zero"))),
                Some(d) => Some(float_micros(self.micros as f64 / d)),
                None => None,
            },
            (BinOp::FloorDiv, false) => match other {
                Value::Int(0) => Some(Err(zero_division("integer division or modulo by zero"))),
                Value::Int(n) => Some(Self::checked(Some(self.micros.div_euclid(*n)))),
                _ => None,
            },
            _ => None,
        }
    }

    fn compare(&self, other: &Value) -> Option<Ordering> {
        as_timedelta(other).map(|rhs| self.cmp(&rhs))
    }

    fn equals(&self, other: &Value) -> Option<PyResult<bool>> {
        Some(Ok(as_timedelta(other) == Some(*self)))
    }

    fn hash_key(&self) -> Option<HashKey> {
        Some(HashKey::Tuple(vec![HashKey::Str(Rc::from("timedelta")), HashKey::Int(self.micros)]))
    }

    fn truthy(&self) -> bool {
        self.micros != 0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `datetime.date`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Date(pub NaiveDate);

fn as_date(value: &Value) -> Option<NaiveDate> {
    value.as_any_native::<Date>().map(|d| d.0)
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(chrono::NaiveTime::MIN)
}

impl NativeObject for Date {
    fn type_name(&self) -> &str {
        "datetime.date"
    }

    fn repr(&self) -> String {
        format!(
            "datetime.date({}, {}, {})",
            self.0.year(),
            self.0.month(),
            self.0.day()
        )
    }

    fn to_str(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "year" => Some(Value::Int(self.0.year() as i64)),
            "month" => Some(Value::Int(self.0.month() as i64)),
            "day" => Some(Value::Int(self.0.day() as i64)),
            _ => None,
        }
    }

    fn method_names(&self) -> &'static [&'static str] {
        &["isoformat", "isoweekday", "replace", "strftime", "weekday"]
    }

    fn call_method(&self, _interp: &mut Interpreter, name: &str, mut args: Args) -> PyResult<Value> {
        match name {
            "isoformat" => {
                args.check("isoformat", 0, 0)?;
                Ok(Value::string(self.to_str()))
            }
            "strftime" => {
                args.check("strftime", 1, 1)?;
                let format = str_arg(&args, 0, "strftime")?;
                strftime(&midnight(self.0), &format).map(Value::string)
            }
            "weekday" => Ok(Value::Int(self.0.weekday().num_days_from_monday() as i64)),
            "isoweekday" => Ok(Value::Int(self.0.weekday().number_from_monday() as i64)),
            "replace" => {
                let defaults = [self.0.year() as i64, self.0.month() as i64, self.0.day() as i64];
                let fields = int_params(&mut args, &["year", "month", "day"], 0, &defaults, "replace")?;
                Ok(Value::native(Date(make_date(fields[0], fields[1], fields[2])?)))
            }
            other => Err(type_error(format!("unknown date method {}", other))),
        }
    }

    fn binary_op(&self, op: BinOp, other: &Value, reflected: bool) -> Option<PyResult<Value>> {
        if let Some(delta) = as_timedelta(other) {
            let days = match (op, reflected) {
                (BinOp::Add, _) => delta.days(),
                (BinOp::Sub, false) => -delta.days(),
                _ => return None,
            };
            let shifted = self
                .0
                .checked_add_signed(chrono::Duration::days(days))
                .filter(|d| d.year() >= 1 && d.year() <= 9999);
            return Some(shifted.map(|d| Value::native(Date(d))).ok_or_else(out_of_range));
        }
        match (op, as_date(other)) {
            (BinOp::Sub, Some(rhs)) => {
                let (a, b) = if reflected { (rhs, self.0) } else { (self.0, rhs) };
                let days = a.signed_duration_since(b).num_days();
                Some(Ok(Value::native(TimeDelta::from_micros(days * MICROS_PER_DAY))))
            }
            _ => None,
        }
    }

    fn compare(&self, other: &Value) -> Option<Ordering> {
        as_date(other).map(|rhs| self.0.cmp(&rhs))
    }

    fn equals(&self, other: &Value) -> Option<PyResult<bool>> {
        Some(Ok(as_date(other) == Some(self.0)))
    }

    fn hash_key(&self) -> Option<HashKey> {
        Some(HashKey::Tuple(vec![
            HashKey::Str(Rc::from("date")),
            HashKey::Int(self.0.num_days_from_ce() as i64),
        ]))
    }

    fn format(&self, spec: &str) -> Option<PyResult<String>> {
        if spec.is_empty() {
            return Some(Ok(self.to_str()));
        }
        Some(strftime(&midnight(self.0), spec))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `datetime.datetime` (naive, local wall clock)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTime(pub NaiveDateTime);

fn as_datetime(value: &Value) -> Option<NaiveDateTime> {
    value.as_any_native::<DateTime>().map(|d| d.0)
}

impl NativeObject for DateTime {
    fn type_name(&self) -> &str {
        "datetime.datetime"
    }

    fn repr(&self) -> String {
        let m = &self.0;
        let mut fields = vec![
            m.year().to_string(),
            m.month().to_string(),
            m.day().to_string(),
            m.hour().to_string(),
            m.minute().to_string(),
        ];
        let micros = m.nanosecond() / 1000;
        if m.second() != 0 || micros != 0 {
            fields.push(m.second().to_string());
        }
        if micros != 0 {
            fields.push(micros.to_string());
        }
        format!("datetime.datetime({})", fields.join(", "))
    }

    fn to_str(&self) -> String {
        iso_datetime(&self.0, " ")
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        let m = &self.0;
        let value = match name {
            "year" => m.year() as i64,
            "month" => m.month() as i64,
            "day" => m.day() as i64,
            "hour" => m.hour() as i64,
            "minute" => m.minute() as i64,
            "second" => m.second() as i64,
            "microsecond" => (m.nanosecond() / 1000) as i64,
            _ => return None,
        };
        Some(Value::Int(value))
    }

    fn method_names(&self) -> &'static [&'static str] {
        &[
            "date",
            "isoformat",
            "isoweekday",
            "replace",
            "strftime",
            "timestamp",
            "weekday",
        ]
    }

    fn call_method(&self, _interp: &mut Interpreter, name: &str, mut args: Args) -> PyResult<Value> {
        match name {
            "date" => {
                args.check("date", 0, 0)?;
                Ok(Value::native(Date(self.0.date())))
            }
            "isoformat" => {
                let sep = args.take(0, "sep");
                args.reject_unknown_keywords("isoformat")?;
                let sep = match sep {
                    Some(value) => value.expect_str("isoformat")?.to_string(),
                    None => "T".to_string(),
                };
                Ok(Value::string(iso_datetime(&self.0, &sep)))
            }
            "strftime" => {
                args.check("strftime", 1, 1)?;
                let format = str_arg(&args, 0, "strftime")?;
                strftime(&self.0, &format).map(Value::string)
            }
            "timestamp" => {
                args.check("timestamp", 0, 0)?;
                let micros = match Local.from_local_datetime(&self.0).earliest() {
                    Some(local) => local.timestamp_micros(),
                    None => self.0.and_utc().timestamp_micros(),
                };
                Ok(Value::Float(micros as f64 / MICROS_PER_SECOND as f64))
            }
            "weekday" => Ok(Value::Int(self.0.weekday().num_days_from_monday() as i64)),
            "isoweekday" => Ok(Value::Int(self.0.weekday().number_from_monday() as i64)),
            "replace" => {
                let m = &self.0;
                let defaults = [
                    m.year() as i64,
                    m.month() as i64,
                    m.day() as i64,
                    m.hour() as i64,
                    m.minute() as i64,
                    m.second() as i64,
                    (m.nanosecond() / 1000) as i64,
                ];
                let fields = int_params(&mut args, &DATETIME_FIELDS, 0, &defaults, "replace")?;
                Ok(Value::native(DateTime(make_datetime(&fields)?)))
            }
            other => Err(type_error(format!("unknown datetime method {}", other))),
        }
    }

    fn binary_op(&self, op: BinOp, other: &Value, reflected: bool) -> Option<PyResult<Value>> {
        if let Some(delta) = as_timedelta(other) {
            let shifted = match (op, reflected) {
                (BinOp::Add, _) => self.0.checked_add_signed(delta.chrono()),
                (BinOp::Sub, false) => self.0.checked_sub_signed(delta.chrono()),
                _ => return None,
            };
            let shifted = shifted.filter(|d| d.year() >= 1 && d.year() <= 9999);
            return Some(shifted.map(|d| Value::native(DateTime(d))).ok_or_else(out_of_range));
        }
        match (op, as_datetime(other)) {
            (BinOp::Sub, Some(rhs)) => {
                let (a, b) = if reflected { (rhs, self.0) } else { (self.0, rhs) };
                let micros = a.signed_duration_since(b).num_microseconds();
                Some(TimeDelta::checked(micros))
            }
            _ => None,
        }
    }

    fn compare(&self, other: &Value) -> Option<Ordering> {
        as_datetime(other).map(|rhs| self.0.cmp(&rhs))
    }

    fn equals(&self, other: &Value) -> Option<PyResult<bool>> {
        Some(Ok(as_datetime(other) == Some(self.0)))
    }

    fn hash_key(&self) -> Option<HashKey> {
        Some(HashKey::Tuple(vec![
            HashKey::Str(Rc::from("datetime")),
            HashKey::Int(self.0.and_utc().timestamp_micros()),
        ]))
    }

    fn format(&self, spec: &str) -> Option<PyResult<String>> {
        if spec.is_empty() {
            return Some(Ok(self.to_str()));
        }
        Some(strftime(&self.0, spec))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

const DATETIME_FIELDS: [&str; 7] = ["year", "month", "day", "hour", "minute", "second", "microsecond"];

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn datetime_ctor(_: &mut Interpreter, mut args: Args) -> PyResult<Value> {
    let fields = int_params(&mut args, &DATETIME_FIELDS, 3, &[0, 0, 0, 0], "datetime")?;
    Ok(Value::native(DateTime(make_datetime(&fields)?)))
}

fn date_ctor(_: &mut Interpreter, mut args: Args) -> PyResult<Value> {
    let fields = int_params(&mut args, &["year", "month", "day"], 3, &[], "date")?;
    Ok(Value::native(Date(make_date(fields[0], fields[1], fields[2])?)))
}

fn timedelta_ctor(_: &mut Interpreter, mut args: Args) -> PyResult<Value> {
    const UNITS: [(&str, i64); 7] = [
        ("days", MICROS_PER_DAY),
        ("seconds", MICROS_PER_SECOND),
        ("microseconds", 1),
        ("milliseconds", 1000),
        ("minutes", 60 * MICROS_PER_SECOND),
        ("hours", 3600 * MICROS_PER_SECOND),
        ("weeks", 7 * MICROS_PER_DAY),
    ];
    if args.len() > UNITS.len() {
        return Err(type_error(format!(
            "timedelta() takes at most 7 arguments ({} given)",
            args.len()
        )));
    }
    let mut whole: i128 = 0;
    let mut fraction: f64 = 0.0;
    for (i, (name, scale)) in UNITS.iter().enumerate() {
        match args.take(i, name) {
            None => {}
            Some(Value::Float(f)) => fraction += f * *scale as f64,
            Some(value @ (Value::Int(_) | Value::Bool(_))) => {
                whole += value.as_int().unwrap_or(0) as i128 * *scale as i128
            }
            Some(other) => {
                return Err(type_error(format!(
                    "unsupported type for timedelta {} component: {}",
                    name,
                    other.type_name()
                )))
            }
        }
    }
    args.reject_unknown_keywords("timedelta")?;
    let total = whole as f64 + fraction;
    if fraction == 0.0 {
        return TimeDelta::checked(i64::try_from(whole).ok());
    }
    float_micros(total)
}

fn datetime_type() -> Value {
    let mut attrs: HashMap<String, Value> = HashMap::new();
    attrs.insert(
        "now".to_string(),
        Value::builtin("datetime.now", |_, args| {
            args.check("now", 0, 0)?;
            Ok(Value::native(DateTime(now())))
        }),
    );
    attrs.insert(
        "today".to_string(),
        Value::builtin("datetime.today", |_, args| {
            args.check("today", 0, 0)?;
            Ok(Value::native(DateTime(now())))
        }),
    );
    attrs.insert(
        "fromisoformat".to_string(),
        Value::builtin("datetime.fromisoformat", |_, args| {
            args.check("fromisoformat", 1, 1)?;
            let text = str_arg(&args, 0, "fromisoformat")?;
            parse_isoformat(&text)
                .map(|m| Value::native(DateTime(m)))
                .ok_or_else(|| invalid_isoformat(&text))
        }),
    );
    attrs.insert(
        "strptime".to_string(),
        Value::builtin("datetime.strptime", |_, args| {
            args.check("strptime", 2, 2)?;
            let text = str_arg(&args, 0, "strptime")?;
            let format = str_arg(&args, 1, "strptime")?;
            let chrono_format = format.replace("%f", "%6f");
            NaiveDateTime::parse_from_str(&text, &chrono_format)
                .or_else(|_| {
                    NaiveDate::parse_from_str(&text, &chrono_format).map(midnight)
                })
                .map(|m| Value::native(DateTime(m)))
                .map_err(|_| {
                    value_error(format!(
                        "time data {} does not match format {}",
                        crate::interp::format::quote_str(&text),
                        crate::interp::format::quote_str(&format)
                    ))
                })
        }),
    );
    Value::Type(TypeObj::Native(Rc::new(NativeType {
        name: "datetime.datetime".to_string(),
        ctor: Some(Rc::new(datetime_ctor) as NativeFn),
        attrs,
    })))
}

fn date_type() -> Value {
    let mut attrs: HashMap<String, Value> = HashMap::new();
    attrs.insert(
        "today".to_string(),
        Value::builtin("date.today", |_, args| {
            args.check("today", 0, 0)?;
            Ok(Value::native(Date(now().date())))
        }),
    );
    attrs.insert(
        "fromisoformat".to_string(),
        Value::builtin("date.fromisoformat", |_, args| {
            args.check("fromisoformat", 1, 1)?;
            let text = str_arg(&args, 0, "fromisoformat")?;
            NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                .map(|d| Value::native(Date(d)))
                .map_err(|_| invalid_isoformat(&text))
        }),
    );
    Value::Type(TypeObj::Native(Rc::new(NativeType {
        name: "datetime.date".to_string(),
        ctor: Some(Rc::new(date_ctor) as NativeFn),
        attrs,
    })))
}

fn timedelta_type() -> Value {
    Value::Type(TypeObj::Native(Rc::new(NativeType {
        name: "datetime.timedelta".to_string(),
        ctor: Some(Rc::new(timedelta_ctor) as NativeFn),
        attrs: HashMap::new(),
    })))
}

pub fn provide() -> Result<Rc<Module>, ProviderError> {
    let module = Module::new("datetime", Some("Fast implementation of the datetime type."));
    module.set("datetime", datetime_type());
    module.set("date", date_type());
    module.set("timedelta", timedelta_type());
    module.set("MINYEAR", Value::Int(1));
    module.set("MAXYEAR", Value::Int(9999));
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

    fn output(source: &str) -> String {
        let (result, out) = run(source);
        if let Err(fault) = result {
            panic!("unexpected fault: {}", fault.summary());
        }
        out
    }

    #[test]
    fn test_construct_and_render() {
        let out = output(
            "from datetime import datetime\nd = datetime(2024, 2, 29, 13, 5)\nprint(d)\nprint(f'{d!r}')\nprint(d.isoformat(), d.year, d.weekday())",
        );
        assert_eq!(
            out,
            "2024-02-29 13:05:00\ndatetime.datetime(2024, 2, 29, 13, 5)\n2024-02-29T13:05:00 2024 3\n"
        );
    }

    #[test]
    fn test_invalid_fields() {
        let (result, _) = run("datetime.datetime(2023, 2, 29)");
        assert_eq!(result.unwrap_err().message(), "day is out of range for month");
        let (result, _) = run("datetime.datetime(2023, 13, 1)");
        assert_eq!(result.unwrap_err().message(), "month must be in 1..12");
    }

    #[test]
    fn test_timedelta_arithmetic() {
        let out = output(
            "from datetime import datetime, timedelta\nd = datetime(2024, 1, 31) + timedelta(days=1, hours=2)\nprint(d)\ndelta = d - datetime(2024, 1, 1)\nprint(delta, delta.days, delta.seconds, delta.total_seconds())\nprint([timedelta(minutes=-1)])\nprint(timedelta(hours=1) * 2 == timedelta(hours=2), timedelta(0) or 'empty')",
        );
        assert_eq!(
            out,
            "2024-02-01 02:00:00\n31 days, 2:00:00 31 7200 2685600.0\n[datetime.timedelta(days=-1, seconds=86340)]\nTrue empty\n"
        );
    }

    #[test]
    fn test_strftime_and_parsing() {
        let out = output(
            "d = datetime.datetime.fromisoformat('2021-07-04T09:30:15.250000')\nprint(d.strftime('%Y/%m/%d %H:%M:%S.%f %A'))\nprint(f'{d:%b %d}')\nprint(datetime.datetime.strptime('05/06/2020', '%d/%m/%Y').month)",
        );
        assert_eq!(out, "2021/07/04 09:30:15.250000 Sunday\nJul 04\n6\n");
        let (result, _) = run("datetime.datetime.fromisoformat('yesterday')");
        assert_eq!(result.unwrap_err().message(), "Invalid isoformat string: 'yesterday'");
    }

    #[test]
    fn test_dates() {
        let out = output(
            "a = datetime.date(2024, 3, 1)\nb = datetime.date(2024, 2, 1)\nprint(a - b, a > b, a.replace(day=15))\nprint(datetime.date.today() <= datetime.date.today())",
        );
        assert_eq!(out, "29 days, 0:00:00 True 2024-03-15\nTrue\n");
    }
}
