//! Tokenizer for submitted source.
//!
//! Produces a flat token stream with explicit `Newline`, `Indent` and
//! `Dedent` markers so the parser never has to look at whitespace.

use crate::interp::fault::SyntaxFault;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    /// `9223372036854775808`, valid only as the operand of unary minus.
    MinIntMagnitude,
    Float(f64),
    Str(String),
    FStr(Vec<FPiece>),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

/// One piece of an f-string body.
#[derive(Debug, Clone, PartialEq)]
pub enum FPiece {
    Literal(String),
    Field {
        source: String,
        line: usize,
        conversion: Option<char>,
        spec: Vec<FPiece>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
    pub col: usize,
}

const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "...", "->", "**", "//", "==", "!=", "<=", ">=", "<<", ">>",
    "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=", ":=", "+", "-", "*", "/", "%", "@",
    "&", "|", "^", "~", "<", ">", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "=",
];

pub struct Lexer<'a> {
    src: &'a [char],
    pos: usize,
    line: usize,
    col: usize,
    indents: Vec<usize>,
    depth: usize,
    base_depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxFault> {
    let chars: Vec<char> = source.chars().collect();
    Lexer::new(&chars, 1).run()
}

/// Tokenize an embedded expression (f-string field) that starts on `line`.
pub fn tokenize_fragment(source: &str, line: usize) -> Result<Vec<Token>, SyntaxFault> {
    let chars: Vec<char> = source.chars().collect();
    let mut lexer = Lexer::new(&chars, line);
    // Fragments behave as if inside brackets: newlines never end them.
    lexer.depth = 1;
    lexer.base_depth = 1;
    lexer.at_line_start = false;
    lexer.run()
}

impl<'a> Lexer<'a> {
    fn new(src: &'a [char], line: usize) -> Self {
        Self {
            src,
            pos: 0,
            line,
            col: 1,
            indents: vec![0],
            depth: 0,
            base_depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.src.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn error(&self, msg: impl Into<String>) -> SyntaxFault {
        SyntaxFault::new(msg, self.line, self.col)
    }

    fn push(&mut self, tok: Tok, line: usize, col: usize) {
        self.tokens.push(Token { tok, line, col });
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxFault> {
        loop {
            if self.at_line_start && self.depth == 0 {
                if !self.handle_indentation()? {
                    break;
                }
            }
            let Some(c) = self.peek() else { break };
            let (line, col) = (self.line, self.col);
            match c {
                ' ' | '\t' | '\x0c' | '\r' => {
                    self.bump();
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                '\\' if self.peek_at(1) == Some('\r') && self.peek_at(2) == Some('\n') => {
                    self.bump();
                    self.bump();
                    self.bump();
                }
                '\n' => {
                    self.bump();
                    if self.depth == 0 {
                        let last_is_newline = matches!(
                            self.tokens.last().map(|t| &t.tok),
                            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent)
                        );
                        if !last_is_newline {
                            self.push(Tok::Newline, line, col);
                        }
                        self.at_line_start = true;
                    }
                }
                c if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) => {
                    let tok = self.number()?;
                    self.push(tok, line, col);
                }
                c if c == '_' || c.is_alphabetic() => {
                    let word = self.identifier();
                    if let Some(quote) = self.peek().filter(|q| *q == '\'' || *q == '"') {
                        if let Some(prefix) = string_prefix(&word) {
                            let tok = self.string(quote, prefix)?;
                            self.push(tok, line, col);
                            continue;
                        }
                    }
                    self.push(Tok::Name(word), line, col);
                }
                '\'' | '"' => {
                    let tok = self.string(c, StringPrefix::default())?;
                    self.push(tok, line, col);
                }
                _ => {
                    let op = self.operator()?;
                    match op {
                        "(" | "[" | "{" => self.depth += 1,
                        ")" | "]" | "}" => {
                            if self.depth == 0 {
                                return Err(SyntaxFault::new(
                                    format!("unmatched '{}'", op),
                                    line,
                                    col,
                                ));
                            }
                            self.depth -= 1;
                        }
                        _ => {}
                    }
                    self.push(Tok::Op(op), line, col);
                }
            }
        }

        let (line, col) = (self.line, self.col);
        if self.depth > self.base_depth {
            return Err(SyntaxFault::new("unexpected EOF while parsing", line, col));
        }
        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Dedent)
        ) {
            self.push(Tok::Newline, line, col);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent, line, col);
        }
        self.push(Tok::Eof, line, col);
        Ok(self.tokens)
    }

    /// Measure leading whitespace of a logical line and emit indent
    /// changes. Returns false at end of input.
    fn handle_indentation(&mut self) -> Result<bool, SyntaxFault> {
        loop {
            let mut width = 0usize;
            while let Some(c) = self.peek() {
                match c {
                    ' ' => width += 1,
                    '\t' => width = (width / 8 + 1) * 8,
                    '\x0c' | '\r' => {}
                    _ => break,
                }
                self.bump();
            }
            match self.peek() {
                None => return Ok(false),
                Some('\n') => {
                    self.bump();
                    continue;
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                    continue;
                }
                Some(_) => {
                    self.at_line_start = false;
                    let current = self.indents.last().copied().unwrap_or(0);
                    let (line, col) = (self.line, self.col);
                    if width > current {
                        if self.tokens.is_empty() {
                            return Err(SyntaxFault::indentation("unexpected indent", line, col));
                        }
                        self.indents.push(width);
                        self.push(Tok::Indent, line, col);
                    } else if width < current {
                        while self.indents.last().copied().unwrap_or(0) > width {
                            self.indents.pop();
                            self.push(Tok::Dedent, line, col);
                        }
                        if self.indents.last().copied().unwrap_or(0) != width {
                            return Err(SyntaxFault::indentation(
                                "unindent does not match any outer indentation level",
                                line,
                                col,
                            ));
                        }
                    }
                    return Ok(true);
                }
            }
        }
    }

    fn identifier(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        word
    }

    fn number(&mut self) -> Result<Tok, SyntaxFault> {
        let (line, col) = (self.line, self.col);
        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.bump();
                self.bump();
                let mut digits = String::new();
                while let Some(c) = self.peek() {
                    if c == '_' {
                        self.bump();
                    } else if c.is_digit(radix) {
                        digits.push(c);
                        self.bump();
                    } else if c.is_alphanumeric() {
                        return Err(self.error("invalid digit in numeric literal"));
                    } else {
                        break;
                    }
                }
                return i64::from_str_radix(&digits, radix)
                    .map(Tok::Int)
                    .map_err(|_| SyntaxFault::new("invalid numeric literal", line, col));
            }
        }

        let mut text = String::new();
        let mut is_float = false;
        self.digits(&mut text);
        if self.peek() == Some('.') {
            is_float = true;
            text.push('.');
            self.bump();
            self.digits(&mut text);
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = self.peek_at(1);
            let has_exponent = match sign {
                Some('+') | Some('-') => self.peek_at(2).is_some_and(|d| d.is_ascii_digit()),
                Some(d) => d.is_ascii_digit(),
                None => false,
            };
            if has_exponent {
                is_float = true;
                text.push('e');
                self.bump();
                if let Some(s @ ('+' | '-')) = self.peek() {
                    text.push(s);
                    self.bump();
                }
                self.digits(&mut text);
            }
        }
        if self.peek().is_some_and(|c| c == '_' || c.is_alphabetic()) {
            return Err(self.error("invalid decimal literal"));
        }
        if is_float {
            text.parse::<f64>()
                .map(Tok::Float)
                .map_err(|_| SyntaxFault::new("invalid decimal literal", line, col))
        } else {
            match text.parse::<i64>() {
                Ok(value) => Ok(Tok::Int(value)),
                Err(_) if text.parse::<u64>() == Ok(i64::MIN.unsigned_abs()) => Ok(Tok::MinIntMagnitude),
                Err(_) => Err(SyntaxFault::new(
                    "integer literal exceeds the 64-bit range",
                    line,
                    col,
                )),
            }
        }
    }

    fn digits(&mut self, text: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else if c == '_' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn operator(&mut self) -> Result<&'static str, SyntaxFault> {
        for op in OPERATORS {
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek_at(i) == Some(c));
            if matches {
                for _ in 0..op.chars().count() {
                    self.bump();
                }
                return Ok(op);
            }
        }
        let c = self.peek().unwrap_or(' ');
        Err(self.error(format!("invalid character '{}' (U+{:04X})", c, c as u32)))
    }

    fn string(&mut self, quote: char, prefix: StringPrefix) -> Result<Tok, SyntaxFault> {
        let (line, col) = (self.line, self.col);
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        let quote_len = if triple { 3 } else { 1 };
        for _ in 0..quote_len {
            self.bump();
        }

        // Collect the raw body first; escapes are resolved afterwards so
        // f-string fields see their source text untouched.
        let mut raw = String::new();
        loop {
            let Some(c) = self.peek() else {
                let msg = if triple {
                    "unterminated triple-quoted string literal"
                } else {
                    "unterminated string literal"
                };
                return Err(SyntaxFault::new(msg, line, col));
            };
            if c == quote {
                if !triple {
                    self.bump();
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.bump();
                    self.bump();
                    self.bump();
                    break;
                }
            }
            if c == '\n' && !triple {
                return Err(SyntaxFault::new("unterminated string literal", line, col));
            }
            if c == '\\' {
                raw.push(c);
                self.bump();
                if let Some(next) = self.bump() {
                    raw.push(next);
                }
                continue;
            }
            raw.push(c);
            self.bump();
        }

        if prefix.formatted {
            let pieces = parse_fstring(&raw, prefix.raw, line)?;
            Ok(Tok::FStr(pieces))
        } else if prefix.raw {
            Ok(Tok::Str(raw))
        } else {
            Ok(Tok::Str(unescape(&raw, line, col)?))
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StringPrefix {
    raw: bool,
    formatted: bool,
}

fn string_prefix(word: &str) -> Option<StringPrefix> {
    let lower = word.to_ascii_lowercase();
    match lower.as_str() {
        "r" => Some(StringPrefix { raw: true, formatted: false }),
        "u" => Some(StringPrefix::default()),
        "f" => Some(StringPrefix { raw: false, formatted: true }),
        "rf" | "fr" => Some(StringPrefix { raw: true, formatted: true }),
        _ => None,
    }
}

fn unescape(raw: &str, line: usize, col: usize) -> Result<String, SyntaxFault> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(esc) = chars.next() else {
            out.push('\\');
            break;
        };
        match esc {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0'..='7' => {
                let mut value = esc.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(value).unwrap_or('\u{fffd}'));
            }
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            'x' | 'u' | 'U' => {
                let len = match esc {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let hex: String = chars.by_ref().take(len).collect();
                let code = u32::from_str_radix(&hex, 16).ok().filter(|_| hex.len() == len);
                match code.and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => {
                        return Err(SyntaxFault::new(
                            format!("(unicode error) truncated \\{}XX escape", esc),
                            line,
                            col,
                        ))
                    }
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// Split an f-string body into literal text and replacement fields.
fn parse_fstring(raw: &str, is_raw: bool, line: usize) -> Result<Vec<FPiece>, SyntaxFault> {
    let chars: Vec<char> = raw.chars().collect();
    let (pieces, end) = parse_fstring_pieces(&chars, 0, is_raw, line, false)?;
    debug_assert_eq!(end, chars.len());
    Ok(pieces)
}

fn parse_fstring_pieces(
    chars: &[char],
    mut i: usize,
    is_raw: bool,
    line: usize,
    in_spec: bool,
) -> Result<(Vec<FPiece>, usize), SyntaxFault> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let flush = |literal: &mut String, pieces: &mut Vec<FPiece>| -> Result<(), SyntaxFault> {
        if !literal.is_empty() {
            let text = if is_raw {
                std::mem::take(literal)
            } else {
                unescape(&std::mem::take(literal), line, 1)?
            };
            pieces.push(FPiece::Literal(text));
        }
        Ok(())
    };

    while i < chars.len() {
        let c = chars[i];
        if in_spec && c == '}' {
            break;
        }
        if c == '{' {
            if !in_spec && chars.get(i + 1) == Some(&'{') {
                literal.push('{');
                i += 2;
                continue;
            }
            flush(&mut literal, &mut pieces)?;
            let (field, next) = parse_fstring_field(chars, i + 1, is_raw, line)?;
            pieces.extend(field);
            i = next;
            continue;
        }
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                literal.push('}');
                i += 2;
                continue;
            }
            return Err(SyntaxFault::new(
                "f-string: single '}' is not allowed",
                line,
                1,
            ));
        }
        literal.push(c);
        i += 1;
    }
    flush(&mut literal, &mut pieces)?;
    Ok((pieces, i))
}

/// Parse `expr[=][!conv][:spec]}` starting right after the opening brace.
fn parse_fstring_field(
    chars: &[char],
    start: usize,
    is_raw: bool,
    line: usize,
) -> Result<(Vec<FPiece>, usize), SyntaxFault> {
    let mut depth = 0usize;
    let mut i = start;
    let mut quote: Option<char> = None;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '}' if depth > 0 => depth -= 1,
            '}' | ':' if depth == 0 => break,
            '!' if depth == 0 && chars.get(i + 1) != Some(&'=') => break,
            _ => {}
        }
        i += 1;
    }
    if i >= chars.len() {
        return Err(SyntaxFault::new("f-string: expecting '}'", line, 1));
    }

    let mut source: String = chars[start..i].iter().collect();
    let mut pieces = Vec::new();
    let mut conversion = None;
    let trimmed = source.trim_end();
    if trimmed.ends_with('=')
        && !trimmed.ends_with("==")
        && !trimmed.ends_with("!=")
        && !trimmed.ends_with("<=")
        && !trimmed.ends_with(">=")
    {
        pieces.push(FPiece::Literal(source.clone()));
        let cut = trimmed.len() - 1;
        source.truncate(cut);
        conversion = Some('r');
    }
    if source.trim().is_empty() {
        return Err(SyntaxFault::new(
            "f-string: valid expression required before '}'",
            line,
            1,
        ));
    }

    if chars[i] == '!' {
        let conv = chars.get(i + 1).copied();
        match conv {
            Some(c @ ('r' | 's' | 'a')) => conversion = Some(c),
            _ => {
                return Err(SyntaxFault::new(
                    "f-string: invalid conversion character: expected 's', 'r', or 'a'",
                    line,
                    1,
                ))
            }
        }
        i += 2;
    }

    let mut spec = Vec::new();
    if chars.get(i) == Some(&':') {
        let (spec_pieces, next) = parse_fstring_pieces(chars, i + 1, is_raw, line, true)?;
        spec = spec_pieces;
        i = next;
    }
    if chars.get(i) != Some(&'}') {
        return Err(SyntaxFault::new("f-string: expecting '}'", line, 1));
    }
    pieces.push(FPiece::Field {
        source,
        line,
        conversion,
        spec,
    });
    Ok((pieces, i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_simple_statement() {
        assert_eq!(
            kinds("x = 1\n"),
            vec![
                Tok::Name("x".into()),
                Tok::Op("="),
                Tok::Int(1),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_indent_and_dedent() {
        let toks = kinds("if x:\n    y\nz\n");
        assert!(toks.contains(&Tok::Indent));
        assert!(toks.contains(&Tok::Dedent));
    }

    #[test]
    fn test_brackets_join_lines() {
        let toks = kinds("f(1,\n  2)\n");
        assert_eq!(toks.iter().filter(|t| **t == Tok::Newline).count(), 1);
    }

    #[test]
    fn test_numeric_literals() {
        assert_eq!(kinds("0x1F")[0], Tok::Int(31));
        assert_eq!(kinds("9223372036854775807")[0], Tok::Int(i64::MAX));
        assert_eq!(kinds("9_223_372_036_854_775_808")[0], Tok::MinIntMagnitude);
        assert_eq!(kinds("1_000")[0], Tok::Int(1000));
        assert_eq!(kinds("2.5e3")[0], Tok::Float(2500.0));
        assert_eq!(kinds(".5")[0], Tok::Float(0.5));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(kinds(r#""a\tb\n""#)[0], Tok::Str("a\tb\n".into()));
        assert_eq!(kinds(r#"r"a\n""#)[0], Tok::Str("a\\n".into()));
    }

    #[test]
    fn test_fstring_fields() {
        let toks = kinds("f\"pi = {math.pi:.2f}!\"");
        match &toks[0] {
            Tok::FStr(pieces) => {
                assert_eq!(pieces.len(), 3);
                match &pieces[1] {
                    FPiece::Field { source, spec, .. } => {
                        assert_eq!(source, "math.pi");
                        assert_eq!(spec, &vec![FPiece::Literal(".2f".into())]);
                    }
                    other => panic!("unexpected piece {:?}", other),
                }
            }
            other => panic!("unexpected token {:?}", other),
        }
    }

    #[test]
    fn test_bad_dedent_is_indentation_error() {
        let err = tokenize("if x:\n    a\n  b\n").unwrap_err();
        assert!(err.is_indentation());
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("x = 'abc\n").unwrap_err();
        assert_eq!(err.message(), "unterminated string literal");
    }
}
