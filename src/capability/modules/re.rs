//! `re`: regular expressions over the `regex` crate.
//!
//! Pattern syntax is the `regex` crate's, which shares the common subset
//! (classes, groups, named groups, repetition, anchors). Look-around and
//! backreferences are rejected with `re.error`.

use crate::capability::ProviderError;
use crate::interp::fault::{index_error, type_error, ExcKind, Fault};
use crate::interp::format;
use crate::interp::value::{
    Args, BuiltinType, Dict, IterObj, IterState, Module, NativeObject, TypeObj, Value,
};
use crate::interp::{ops, Interpreter, PyResult};
use regex::{Regex, RegexBuilder};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

const IGNORECASE: i64 = 2;
const MULTILINE: i64 = 8;
const DOTALL: i64 = 16;
const VERBOSE: i64 = 64;

/// Entries kept before the compile cache is flushed
const CACHE_LIMIT: usize = 256;

fn regex_error(message: impl Into<String>) -> Fault {
    Fault::new(ExcKind::RegexError, message)
}

/// The one-line reason out of a multi-line `regex` syntax report
fn describe(err: &regex::Error) -> String {
    let text = err.to_string();
    text.lines()
        .find_map(|line| line.trim().strip_prefix("error: "))
        .unwrap_or(text.lines().next().unwrap_or("invalid pattern"))
        .to_string()
}

/// A compiled pattern plus its anchored variants
pub struct Pattern {
    source: String,
    flags: i64,
    search: Regex,
    prefix: Regex,
    whole: Regex,
}

impl Pattern {
    fn compile(source: &str, flags: i64) -> PyResult<Self> {
        let translated = source.replace("\\Z", "\\z");
        // a trailing comment in verbose mode must not swallow the closing group
        let tail = if flags & VERBOSE != 0 { "\n" } else { "" };
        let build = |pattern: String| {
            RegexBuilder::new(&pattern)
                .case_insensitive(flags & IGNORECASE != 0)
                .multi_line(flags & MULTILINE != 0)
                .dot_matches_new_line(flags & DOTALL != 0)
                .ignore_whitespace(flags & VERBOSE != 0)
                .build()
                .map_err(|e| regex_error(describe(&e)))
        };
        Ok(Self {
            source: source.to_string(),
            flags,
            search: build(translated.clone())?,
            prefix: build(format!("\\A(?:{}{})", translated, tail))?,
            whole: build(format!("\\A(?:{}{})\\z", translated, tail))?,
        })
    }

    fn group_count(&self) -> usize {
        self.search.captures_len() - 1
    }

    fn names(&self) -> Rc<Vec<Option<String>>> {
        Rc::new(
            self.search
                .capture_names()
                .map(|name| name.map(str::to_string))
                .collect(),
        )
    }

    fn captures(&self, regex: &Regex, text: &Rc<str>) -> Option<MatchObj> {
        regex
            .captures(text)
            .map(|caps| MatchObj::new(text.clone(), &caps, self.names()))
    }

    fn all_matches(&self, text: &Rc<str>) -> Vec<MatchObj> {
        let names = self.names();
        self.search
            .captures_iter(text)
            .map(|caps| MatchObj::new(text.clone(), &caps, names.clone()))
            .collect()
    }

    fn findall(&self, text: &Rc<str>) -> Value {
        let groups = self.group_count();
        let items = self
            .all_matches(text)
            .into_iter()
            .map(|m| match groups {
                0 => m.group_text(0),
                1 => m.group_text(1),
                _ => Value::tuple((1..=groups).map(|g| m.group_text(g)).collect()),
            })
            .collect();
        Value::list(items)
    }

    fn split(&self, text: &Rc<str>, maxsplit: i64) -> Value {
        let mut pieces = Vec::new();
        let mut last = 0;
        for (n, m) in self.all_matches(text).into_iter().enumerate() {
            if maxsplit > 0 && n as i64 >= maxsplit {
                break;
            }
            let (start, end) = m.spans[0].unwrap_or((last, last));
            pieces.push(Value::str(&text[last..start]));
            for g in 1..m.spans.len() {
                pieces.push(m.group(g));
            }
            last = end;
        }
        pieces.push(Value::str(&text[last..]));
        Value::list(pieces)
    }

    fn substitute(
        &self,
        interp: &mut Interpreter,
        repl: &Value,
        text: &Rc<str>,
        count: i64,
    ) -> PyResult<(String, i64)> {
        let template = match repl {
            Value::Str(s) => Some(Template::parse(s, self)?),
            other if other.is_callable() => None,
            other => {
                return Err(type_error(format!(
                    "expected str instance, {} found",
                    other.type_name()
                )))
            }
        };
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        let mut done = 0;
        for m in self.all_matches(text) {
            if count > 0 && done >= count {
                break;
            }
            let (start, end) = m.spans[0].unwrap_or((last, last));
            out.push_str(&text[last..start]);
            match &template {
                Some(template) => template.expand(&m, &mut out),
                None => {
                    let replaced = interp.call(repl, Args::new(vec![Value::native(m)]))?;
                    out.push_str(&replaced.expect_str("sub")?);
                }
            }
            last = end;
            done += 1;
        }
        out.push_str(&text[last..]);
        Ok((out, done))
    }
}

impl NativeObject for Pattern {
    fn type_name(&self) -> &str {
        "re.Pattern"
    }

    fn repr(&self) -> String {
        let mut names = Vec::new();
        for (bit, name) in [
            (IGNORECASE, "re.IGNORECASE"),
            (MULTILINE, "re.MULTILINE"),
            (DOTALL, "re.DOTALL"),
            (VERBOSE, "re.VERBOSE"),
        ] {
            if self.flags & bit != 0 {
                names.push(name);
            }
        }
        if names.is_empty() {
            format!("re.compile({})", format::quote_str(&self.source))
        } else {
            format!(
                "re.compile({}, {})",
                format::quote_str(&self.source),
                names.join("|")
            )
        }
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "pattern" => Some(Value::str(&self.source)),
            "flags" => Some(Value::Int(self.flags)),
            "groups" => Some(Value::Int(self.group_count() as i64)),
            _ => None,
        }
    }

    fn method_names(&self) -> &'static [&'static str] {
        &[
            "findall",
            "finditer",
            "fullmatch",
            "match",
            "search",
            "split",
            "sub",
            "subn",
        ]
    }

    fn call_method(&self, interp: &mut Interpreter, name: &str, mut args: Args) -> PyResult<Value> {
        match name {
            "search" | "match" | "fullmatch" => {
                let text = text_arg(&mut args, 0, name)?;
                args.reject_unknown_keywords(name)?;
                let regex = match name {
                    "search" => &self.search,
                    "match" => &self.prefix,
                    _ => &self.whole,
                };
                Ok(self.captures(regex, &text).map(Value::native).unwrap_or(Value::None))
            }
            "findall" => {
                let text = text_arg(&mut args, 0, name)?;
                args.reject_unknown_keywords(name)?;
                Ok(self.findall(&text))
            }
            "finditer" => {
                let text = text_arg(&mut args, 0, name)?;
                args.reject_unknown_keywords(name)?;
                Ok(match_iterator(self.all_matches(&text)))
            }
            "split" => {
                let text = text_arg(&mut args, 0, name)?;
                let maxsplit = int_option(&mut args, 1, "maxsplit")?;
                args.reject_unknown_keywords(name)?;
                Ok(self.split(&text, maxsplit))
            }
            "sub" | "subn" => {
                let repl = args
                    .take(0, "repl")
                    .ok_or_else(|| missing_argument(name, "repl"))?;
                let text = text_arg(&mut args, 1, name)?;
                let count = int_option(&mut args, 2, "count")?;
                args.reject_unknown_keywords(name)?;
                let (out, done) = self.substitute(interp, &repl, &text, count)?;
                Ok(if name == "sub" {
                    Value::string(out)
                } else {
                    Value::tuple(vec![Value::string(out), Value::Int(done)])
                })
            }
            other => Err(type_error(format!("unknown pattern method {}", other))),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One successful match; spans are byte offsets into `text`
pub struct MatchObj {
    text: Rc<str>,
    spans: Vec<Option<(usize, usize)>>,
    names: Rc<Vec<Option<String>>>,
}

impl MatchObj {
    fn new(text: Rc<str>, caps: &regex::Captures<'_>, names: Rc<Vec<Option<String>>>) -> Self {
        let spans = (0..caps.len())
            .map(|i| caps.get(i).map(|m| (m.start(), m.end())))
            .collect();
        Self { text, spans, names }
    }

    fn group(&self, index: usize) -> Value {
        match self.spans[index] {
            Some((start, end)) => Value::str(&self.text[start..end]),
            None => Value::None,
        }
    }

    /// Group text with non-participating groups as `''`, as `findall` reports them
    fn group_text(&self, index: usize) -> Value {
        match self.group(index) {
            Value::None => Value::str(""),
            found => found,
        }
    }

    fn resolve(&self, group: &Value) -> PyResult<usize> {
        let index = match group {
            Value::Int(_) | Value::Bool(_) => usize::try_from(group.as_int().unwrap_or(-1)).ok(),
            Value::Str(name) => self
                .names
                .iter()
                .position(|n| n.as_deref() == Some(&**name)),
            _ => None,
        };
        index
            .filter(|i| *i < self.spans.len())
            .ok_or_else(|| index_error("no such group"))
    }

    fn char_offset(&self, byte: usize) -> i64 {
        self.text[..byte].chars().count() as i64
    }

    fn span(&self, index: usize) -> (i64, i64) {
        match self.spans[index] {
            Some((start, end)) => (self.char_offset(start), self.char_offset(end)),
            None => (-1, -1),
        }
    }

    fn group_arg(&self, args: &Args) -> PyResult<usize> {
        match args.get(0) {
            Some(group) => self.resolve(group),
            None => Ok(0),
        }
    }
}

impl NativeObject for MatchObj {
    fn type_name(&self) -> &str {
        "re.Match"
    }

    fn repr(&self) -> String {
        let (start, end) = self.span(0);
        format!(
            "<re.Match object; span=({}, {}), match={}>",
            start,
            end,
            format::repr(&self.group(0))
        )
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "string" => Some(Value::Str(self.text.clone())),
            "lastindex" => Some(
                (1..self.spans.len())
                    .rev()
                    .find(|i| self.spans[*i].is_some())
                    .map(|i| Value::Int(i as i64))
                    .unwrap_or(Value::None),
            ),
            _ => None,
        }
    }

    fn method_names(&self) -> &'static [&'static str] {
        &["end", "group", "groupdict", "groups", "span", "start"]
    }

    fn call_method(&self, _interp: &mut Interpreter, name: &str, mut args: Args) -> PyResult<Value> {
        match name {
            "group" => {
                args.no_keywords("group")?;
                match args.len() {
                    0 => Ok(self.group(0)),
                    1 => Ok(self.group(self.resolve(&args.positional[0])?)),
                    _ => Ok(Value::tuple(
                        args.positional
                            .iter()
                            .map(|g| self.resolve(g).map(|i| self.group(i)))
                            .collect::<PyResult<Vec<_>>>()?,
                    )),
                }
            }
            "groups" => {
                let default = args.take(0, "default").unwrap_or(Value::None);
                args.reject_unknown_keywords("groups")?;
                Ok(Value::tuple(
                    (1..self.spans.len())
                        .map(|i| match self.group(i) {
                            Value::None => default.clone(),
                            found => found,
                        })
                        .collect(),
                ))
            }
            "groupdict" => {
                let mut dict = Dict::new();
                for (i, name) in self.names.iter().enumerate() {
                    if let Some(name) = name {
                        let key = Value::str(name);
                        dict.insert(ops::hash_key(&key)?, key, self.group(i));
                    }
                }
                Ok(Value::dict(dict))
            }
            "start" | "end" | "span" => {
                args.check(name, 0, 1)?;
                let (start, end) = self.span(self.group_arg(&args)?);
                Ok(match name {
                    "start" => Value::Int(start),
                    "end" => Value::Int(end),
                    _ => Value::tuple(vec![Value::Int(start), Value::Int(end)]),
                })
            }
            other => Err(type_error(format!("unknown match method {}", other))),
        }
    }

    fn get_item(&self, index: &Value) -> Option<PyResult<Value>> {
        Some(self.resolve(index).map(|i| self.group(i)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Replacement template for `sub`: literal text and group references
struct Template {
    pieces: Vec<Piece>,
}

enum Piece {
    Text(String),
    Group(usize),
}

impl Template {
    fn parse(repl: &str, pattern: &Pattern) -> PyResult<Self> {
        let mut pieces = Vec::new();
        let mut text = String::new();
        let chars: Vec<char> = repl.chars().collect();
        let mut i = 0;
        let push_group = |text: &mut String, pieces: &mut Vec<Piece>, index: usize| -> PyResult<()> {
            if index > pattern.group_count() {
                return Err(regex_error(format!("invalid group reference {}", index)));
            }
            if !text.is_empty() {
                pieces.push(Piece::Text(std::mem::take(text)));
            }
            pieces.push(Piece::Group(index));
            Ok(())
        };
        while i < chars.len() {
            let c = chars[i];
            if c != '\\' || i + 1 == chars.len() {
                text.push(c);
                i += 1;
                continue;
            }
            let next = chars[i + 1];
            i += 2;
            match next {
                'n' => text.push('\n'),
                't' => text.push('\t'),
                'r' => text.push('\r'),
                '\\' => text.push('\\'),
                d if d.is_ascii_digit() => {
                    let mut digits = d.to_string();
                    if i < chars.len() && chars[i].is_ascii_digit() {
                        digits.push(chars[i]);
                        i += 1;
                    }
                    let index = digits.parse().unwrap_or(0);
                    push_group(&mut text, &mut pieces, index)?;
                }
                'g' if i < chars.len() && chars[i] == '<' => {
                    let close = chars[i..]
                        .iter()
                        .position(|c| *c == '>')
                        .ok_or_else(|| regex_error("missing >, unterminated name"))?;
                    let name: String = chars[i + 1..i + close].iter().collect();
                    i += close + 1;
                    let index = match name.parse::<usize>() {
                        Ok(index) => index,
                        Err(_) => pattern
                            .search
                            .capture_names()
                            .position(|n| n == Some(name.as_str()))
                            .ok_or_else(|| index_error(format!("unknown group name '{}'", name)))?,
                    };
                    push_group(&mut text, &mut pieces, index)?;
                }
                other if other.is_ascii_alphabetic() => {
                    return Err(regex_error(format!(
                        "bad escape \\{} at position {}",
                        other,
                        i - 2
                    )))
                }
                other => {
                    text.push('\\');
                    text.push(other);
                }
            }
        }
        if !text.is_empty() {
            pieces.push(Piece::Text(text));
        }
        Ok(Self { pieces })
    }

    fn expand(&self, m: &MatchObj, out: &mut String) {
        for piece in &self.pieces {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Group(index) => {
                    if let Some((start, end)) = m.spans[*index] {
                        out.push_str(&m.text[start..end]);
                    }
                }
            }
        }
    }
}

fn missing_argument(func: &str, name: &str) -> Fault {
    type_error(format!("{}() missing required argument '{}'", func, name))
}

fn text_arg(args: &mut Args, index: usize, func: &str) -> PyResult<Rc<str>> {
    match args.take(index, "string") {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(type_error(format!(
            "expected string or bytes-like object, got '{}'",
            other.type_name()
        ))),
        None => Err(missing_argument(func, "string")),
    }
}

fn int_option(args: &mut Args, index: usize, key: &str) -> PyResult<i64> {
    args.take(index, key).map(|v| v.expect_int("")).transpose().map(|v| v.unwrap_or(0))
}

fn match_iterator(matches: Vec<MatchObj>) -> Value {
    Value::Iterator(Rc::new(IterObj {
        name: "callable_iterator",
        kind: BuiltinType::ListIterator,
        state: RefCell::new(IterState::items(matches.into_iter().map(Value::native).collect())),
    }))
}

/// Compiled patterns keyed by source and flags, shared by one module instance
#[derive(Default)]
struct PatternCache {
    entries: HashMap<(String, i64), Rc<Pattern>>,
}

impl PatternCache {
    fn get(&mut self, source: &str, flags: i64) -> PyResult<Rc<Pattern>> {
        if let Some(found) = self.entries.get(&(source.to_string(), flags)) {
            return Ok(found.clone());
        }
        if self.entries.len() >= CACHE_LIMIT {
            self.entries.clear();
        }
        let compiled = Rc::new(Pattern::compile(source, flags)?);
        self.entries.insert((source.to_string(), flags), compiled.clone());
        Ok(compiled)
    }
}

type SharedCache = Rc<RefCell<PatternCache>>;

/// Pattern argument of a module-level function: source text or a compiled
/// pattern. Leaves the remaining arguments shaped for the pattern method.
fn pattern_arg(cache: &SharedCache, args: &mut Args, flags_index: usize) -> PyResult<Rc<Pattern>> {
    let flags = int_option(args, flags_index, "flags")?;
    args.positional.truncate(flags_index);
    let pattern = match args.take_keyword("pattern") {
        Some(pattern) => pattern,
        None if !args.is_empty() => args.positional.remove(0),
        None => return Err(missing_argument("re", "pattern")),
    };
    match &pattern {
        Value::Str(source) => cache.borrow_mut().get(source, flags),
        Value::Native(obj) => match obj.as_any().downcast_ref::<Pattern>() {
            Some(compiled) if flags == 0 => cache.borrow_mut().get(&compiled.source, compiled.flags),
            Some(_) => Err(Fault::new(
                ExcKind::ValueError,
                "cannot process flags argument with a compiled pattern",
            )),
            None => Err(type_error("first argument must be string or compiled pattern")),
        },
        _ => Err(type_error("first argument must be string or compiled pattern")),
    }
}

/// Escape everything that has a meaning inside a pattern
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if "()[]{}?*+-|^$\\.&~# \t\n\r\u{b}\u{c}".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn provide() -> Result<Rc<Module>, ProviderError> {
    let module = Module::new("re", Some("Support for regular expressions (RE)."));
    let cache: SharedCache = Rc::default();

    for (names, bit) in [
        (["I", "IGNORECASE"], IGNORECASE),
        (["M", "MULTILINE"], MULTILINE),
        (["S", "DOTALL"], DOTALL),
        (["X", "VERBOSE"], VERBOSE),
    ] {
        for name in names {
            module.set(name, Value::Int(bit));
        }
    }
    module.set("error", Value::Type(TypeObj::Exception(ExcKind::RegexError)));

    let c = cache.clone();
    module.add_fn("compile", move |_, mut args| {
        let pattern = pattern_arg(&c, &mut args, 1)?;
        args.reject_unknown_keywords("compile")?;
        Ok(Value::Native(pattern))
    });

    // (name, index of the `flags` positional)
    for (name, flags_index) in [
        ("search", 2),
        ("match", 2),
        ("fullmatch", 2),
        ("findall", 2),
        ("finditer", 2),
        ("split", 3),
        ("sub", 4),
        ("subn", 4),
    ] {
        let c = cache.clone();
        module.add_fn(name, move |interp, mut args| {
            let pattern = pattern_arg(&c, &mut args, flags_index)?;
            pattern.call_method(interp, name, args)
        });
    }

    module.add_fn("escape", |_, args| {
        args.check("escape", 1, 1)?;
        let text = args.positional[0].expect_str("escape")?;
        Ok(Value::string(escape(&text)))
    });
    module.add_fn("purge", move |_, args| {
        args.check("purge", 0, 0)?;
        cache.borrow_mut().entries.clear();
        Ok(Value::None)
    });

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
    fn test_search_and_groups() {
        let out = output(
            "m = re.search(r'(?P<user>\\w+)@(\\w+)\\.com', 'mail bob@example.com now')\nprint(m.group(), m.group('user'), m.group(2), m.span(), m.groups())\nprint(m['user'], m.groupdict())",
        );
        assert_eq!(
            out,
            "bob@example.com bob example (5, 20) ('bob', 'example')\nbob {'user': 'bob'}\n"
        );
    }

    #[test]
    fn test_match_is_anchored() {
        let out = output(
            "print(re.match('b', 'ab'), re.match('a', 'ab') is not None)\nprint(re.fullmatch(r'\\d+', '123'), re.fullmatch(r'\\d+', '123x'))",
        );
        assert_eq!(
            out,
            "None True\n<re.Match object; span=(0, 3), match='123'> None\n"
        );
    }

    #[test]
    fn test_findall_shapes() {
        let out = output(
            "print(re.findall(r'\\d+', 'a1b22c333'))\nprint(re.findall(r'(\\w)=(\\d)', 'a=1, b=2'))\nprint(re.findall('A', 'aAa', re.I))",
        );
        assert_eq!(out, "['1', '22', '333']\n[('a', '1'), ('b', '2')]\n['a', 'A', 'a']\n");
    }

    #[test]
    fn test_sub_and_split() {
        let out = output(
            "print(re.sub(r'(\\w+) (\\w+)', r'\\2 \\1', 'hello world'))\nprint(re.sub(r'\\d', lambda m: str(int(m.group()) * 2), 'a1b2'))\nprint(re.subn('o', '0', 'foo boo', count=3))\nprint(re.split(r'[,;]\\s*', 'a, b;c'), re.split(r'(-)', 'x-y'))",
        );
        assert_eq!(
            out,
            "world hello\na2b4\n('f00 b0o', 3)\n['a', 'b', 'c'] ['x', '-', 'y']\n"
        );
    }

    #[test]
    fn test_compiled_pattern() {
        let out = output(
            "p = re.compile(r'[a-z]+', re.IGNORECASE)\nprint(p, p.pattern, p.groups)\nprint([m.group() for m in p.finditer('Ab 12 cD')])\nprint(re.escape('a.b c'))",
        );
        assert_eq!(
            out,
            "re.compile('[a-z]+', re.IGNORECASE) [a-z]+ 0\n['Ab', 'cD']\na\\.b\\ c\n"
        );
    }

    #[test]
    fn test_invalid_pattern_raises_re_error() {
        let (result, _) = run("re.compile('(abc')");
        let fault = result.unwrap_err();
        assert_eq!(fault.kind(), ExcKind::RegexError);
        assert!(fault.summary().starts_with("re.error: "));
        let out = output("try:\n    re.compile('[')\nexcept re.error:\n    print('caught')");
        assert_eq!(out, "caught\n");
    }
}
