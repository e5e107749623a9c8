//! Recursive-descent parser producing [`ast`](crate::interp::ast) nodes.

use crate::interp::ast::*;
use crate::interp::fault::SyntaxFault;
use crate::interp::lexer::{tokenize, tokenize_fragment, FPiece, Tok, Token};
use std::collections::HashSet;
use std::rc::Rc;

/// Bracket and unary nesting allowed before the parser gives up.
const MAX_NESTING: usize = 200;
const MAX_BLOCK_NESTING: usize = 100;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

type ParseResult<T> = Result<T, SyntaxFault>;

pub fn parse(source: &str) -> ParseResult<Vec<Stmt>> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    parser.parse_module()
}

fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
    blocks: usize,
    loops: usize,
    functions: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            nesting: 0,
            blocks: 0,
            loops: 0,
            functions: 0,
        }
    }

    // ---- token helpers ----

    fn token(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &Tok {
        &self.token().tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)].tok
    }

    fn line(&self) -> usize {
        self.token().line
    }

    fn advance(&mut self) -> Token {
        let token = self.token().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> SyntaxFault {
        let token = self.token();
        SyntaxFault::new(message, token.line, token.col)
    }

    fn invalid(&self) -> SyntaxFault {
        match self.peek() {
            Tok::Eof => self.error("unexpected EOF while parsing"),
            Tok::Indent => SyntaxFault::indentation("unexpected indent", self.line(), self.token().col),
            _ => self.error("invalid syntax"),
        }
    }

    fn check_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.check_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> ParseResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else if op == ":" {
            Err(self.error("expected ':'"))
        } else if matches!(op, ")" | "]" | "}") && matches!(self.peek(), Tok::Newline | Tok::Eof) {
            Err(self.error(format!("'{}' was never closed", opening(op))))
        } else {
            Err(self.invalid())
        }
    }

    fn check_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.check_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> ParseResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.invalid())
        }
    }

    fn expect_name(&mut self) -> ParseResult<String> {
        match self.peek().clone() {
            Tok::Name(name) if !is_keyword(&name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.invalid()),
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof) || self.check_op(";")
    }

    fn starts_expression(&self) -> bool {
        match self.peek() {
            Tok::Name(n) => {
                !is_keyword(n) || matches!(n.as_str(), "None" | "True" | "False" | "not" | "lambda" | "await" | "yield")
            }
            Tok::Int(_) | Tok::MinIntMagnitude | Tok::Float(_) | Tok::Str(_) | Tok::FStr(_) => true,
            Tok::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+" | "~" | "..." | "*"),
            _ => false,
        }
    }

    fn nest(&mut self) -> ParseResult<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error("too many nested parentheses"));
        }
        Ok(())
    }

    fn unnest(&mut self) {
        self.nesting -= 1;
    }

    // ---- statements ----

    fn parse_module(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut body = Vec::new();
        while !matches!(self.peek(), Tok::Eof) {
            if matches!(self.peek(), Tok::Newline) {
                self.advance();
                continue;
            }
            body.extend(self.parse_statement()?);
        }
        Ok(body)
    }

    fn parse_statement(&mut self) -> ParseResult<Vec<Stmt>> {
        let Tok::Name(word) = self.peek().clone() else {
            if matches!(self.peek(), Tok::Indent) {
                return Err(self.invalid());
            }
            if self.check_op("@") {
                return Ok(vec![self.parse_decorated()?]);
            }
            return self.parse_simple_statements();
        };
        let line = self.line();
        let kind = match word.as_str() {
            "if" => {
                self.advance();
                self.parse_if()?
            }
            "while" => {
                self.advance();
                let test = self.parse_named_test()?;
                let body = self.parse_loop_body("while", line)?;
                let orelse = self.parse_else_block()?;
                StmtKind::While { test, body, orelse }
            }
            "for" => {
                self.advance();
                let target = self.parse_target_list()?;
                self.expect_kw("in")?;
                let iter = self.parse_star_expressions()?;
                let body = self.parse_loop_body("for", line)?;
                let orelse = self.parse_else_block()?;
                StmtKind::For {
                    target,
                    iter,
                    body,
                    orelse,
                }
            }
            "try" => {
                self.advance();
                self.parse_try(line)?
            }
            "def" => {
                self.advance();
                StmtKind::FunctionDef(self.parse_def(Vec::new(), line)?)
            }
            "class" => {
                self.advance();
                self.parse_class(line)?
            }
            "with" | "async" => {
                return Err(self.error(format!("'{}' statements are not supported", word)))
            }
            _ => return self.parse_simple_statements(),
        };
        Ok(vec![Stmt { kind, line }])
    }

    fn parse_decorated(&mut self) -> ParseResult<Stmt> {
        let mut decorators = Vec::new();
        while self.eat_op("@") {
            decorators.push(self.parse_named_test()?);
            if !matches!(self.peek(), Tok::Newline) {
                return Err(self.invalid());
            }
            self.advance();
        }
        let line = self.line();
        if self.eat_kw("def") {
            let def = self.parse_def(decorators, line)?;
            Ok(Stmt {
                kind: StmtKind::FunctionDef(def),
                line,
            })
        } else if self.eat_kw("class") {
            let kind = self.parse_class(line)?;
            Ok(Stmt { kind, line })
        } else {
            Err(self.invalid())
        }
    }

    fn parse_simple_statements(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            let line = self.line();
            let kind = self.parse_small_statement()?;
            stmts.push(Stmt { kind, line });
            if self.eat_op(";") {
                if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                    break;
                }
                continue;
            }
            break;
        }
        match self.peek() {
            Tok::Newline => {
                self.advance();
            }
            Tok::Eof => {}
            _ => return Err(self.invalid()),
        }
        Ok(stmts)
    }

    fn parse_small_statement(&mut self) -> ParseResult<StmtKind> {
        if let Tok::Name(word) = self.peek().clone() {
            match word.as_str() {
                "pass" => {
                    self.advance();
                    return Ok(StmtKind::Pass);
                }
                "break" | "continue" => {
                    if self.loops == 0 {
                        let message = if word == "break" {
                            "'break' outside loop"
                        } else {
                            "'continue' not properly in loop"
                        };
                        return Err(self.error(message));
                    }
                    self.advance();
                    return Ok(if word == "break" {
                        StmtKind::Break
                    } else {
                        StmtKind::Continue
                    });
                }
                "return" => {
                    if self.functions == 0 {
                        return Err(self.error("'return' outside function"));
                    }
                    self.advance();
                    let value = if self.at_statement_end() {
                        None
                    } else {
                        Some(self.parse_star_expressions()?)
                    };
                    return Ok(StmtKind::Return(value));
                }
                "raise" => {
                    self.advance();
                    if self.at_statement_end() {
                        return Ok(StmtKind::Raise {
                            exc: None,
                            cause: None,
                        });
                    }
                    let exc = self.parse_test()?;
                    let cause = if self.eat_kw("from") {
                        Some(self.parse_test()?)
                    } else {
                        None
                    };
                    return Ok(StmtKind::Raise {
                        exc: Some(exc),
                        cause,
                    });
                }
                "assert" => {
                    self.advance();
                    let test = self.parse_test()?;
                    let msg = if self.eat_op(",") {
                        Some(self.parse_test()?)
                    } else {
                        None
                    };
                    return Ok(StmtKind::Assert { test, msg });
                }
                "del" => {
                    self.advance();
                    let mut targets = Vec::new();
                    loop {
                        let target = self.parse_bitor()?;
                        check_delete_target(&target).map_err(|m| self.error(m))?;
                        targets.push(target);
                        if !self.eat_op(",") || self.at_statement_end() {
                            break;
                        }
                    }
                    return Ok(StmtKind::Delete(targets));
                }
                "global" | "nonlocal" => {
                    self.advance();
                    if word == "nonlocal" && self.functions == 0 {
                        return Err(self.error("nonlocal declaration not allowed at module level"));
                    }
                    let mut names = vec![self.expect_name()?];
                    while self.eat_op(",") {
                        names.push(self.expect_name()?);
                    }
                    return Ok(if word == "global" {
                        StmtKind::Global(names)
                    } else {
                        StmtKind::Nonlocal(names)
                    });
                }
                "import" => {
                    self.advance();
                    let mut names = Vec::new();
                    loop {
                        let name = self.parse_dotted_name()?;
                        let asname = if self.eat_kw("as") {
                            Some(self.expect_name()?)
                        } else {
                            None
                        };
                        names.push(Alias { name, asname });
                        if !self.eat_op(",") {
                            break;
                        }
                    }
                    return Ok(StmtKind::Import(names));
                }
                "from" => {
                    self.advance();
                    return self.parse_from_import();
                }
                "yield" | "await" => {
                    return Err(self.error(format!("'{}' is not supported", word)));
                }
                _ => {}
            }
        }
        self.parse_expression_statement()
    }

    fn parse_dotted_name(&mut self) -> ParseResult<String> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn parse_from_import(&mut self) -> ParseResult<StmtKind> {
        let mut module = String::new();
        loop {
            if self.eat_op(".") {
                module.push('.');
            } else if self.eat_op("...") {
                module.push_str("...");
            } else {
                break;
            }
        }
        if !self.check_kw("import") {
            module.push_str(&self.parse_dotted_name()?);
        }
        self.expect_kw("import")?;
        if self.eat_op("*") {
            return Ok(StmtKind::ImportFrom {
                module,
                names: vec![Alias {
                    name: "*".to_string(),
                    asname: None,
                }],
            });
        }
        let parenthesized = self.eat_op("(");
        let mut names = Vec::new();
        loop {
            let name = self.expect_name()?;
            let asname = if self.eat_kw("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            names.push(Alias { name, asname });
            if !self.eat_op(",") {
                break;
            }
            if parenthesized && self.check_op(")") {
                break;
            }
        }
        if parenthesized {
            self.expect_op(")")?;
        }
        Ok(StmtKind::ImportFrom { module, names })
    }

    fn parse_expression_statement(&mut self) -> ParseResult<StmtKind> {
        let first = self.parse_star_expressions()?;

        if self.check_op(":") {
            self.advance();
            check_assign_target(&first).map_err(|m| self.error(m))?;
            if matches!(first, Expr::Tuple(_) | Expr::List(_)) {
                return Err(self.error("only single target (not tuple) can be annotated"));
            }
            self.parse_test()?;
            let value = if self.eat_op("=") {
                Some(self.parse_star_expressions()?)
            } else {
                None
            };
            return Ok(StmtKind::AnnAssign {
                target: first,
                value,
            });
        }

        if let Tok::Op(op) = self.peek().clone() {
            if let Some(bin) = augmented_op(op) {
                self.advance();
                if !matches!(first, Expr::Name(_) | Expr::Attribute(..) | Expr::Subscript(..)) {
                    return Err(self.error(format!(
                        "'{}' is an illegal expression for augmented assignment",
                        describe(&first)
                    )));
                }
                let value = self.parse_star_expressions()?;
                return Ok(StmtKind::AugAssign {
                    target: first,
                    op: bin,
                    value,
                });
            }
        }

        if self.check_op("=") {
            let mut targets = vec![first];
            let mut value = None;
            while self.eat_op("=") {
                if self.check_kw("yield") {
                    return Err(self.error("'yield' is not supported"));
                }
                let next = self.parse_star_expressions()?;
                if let Some(previous) = value.replace(next) {
                    targets.push(previous);
                }
            }
            for target in &targets {
                check_assign_target(target).map_err(|m| self.error(m))?;
            }
            let value = value.ok_or_else(|| self.invalid())?;
            return Ok(StmtKind::Assign { targets, value });
        }

        if let Expr::Starred(_) = first {
            return Err(self.error("can't use starred expression here"));
        }
        Ok(StmtKind::Expr(first))
    }

    fn parse_block(&mut self, header: &str, header_line: usize) -> ParseResult<Vec<Stmt>> {
        self.expect_op(":")?;
        if !matches!(self.peek(), Tok::Newline) {
            return self.parse_simple_statements();
        }
        self.advance();
        if !matches!(self.peek(), Tok::Indent) {
            let token = self.token();
            return Err(SyntaxFault::indentation(
                format!(
                    "expected an indented block after {} on line {}",
                    header, header_line
                ),
                token.line,
                token.col,
            ));
        }
        self.advance();
        self.blocks += 1;
        if self.blocks > MAX_BLOCK_NESTING {
            return Err(self.error("too many statically nested blocks"));
        }
        let mut body = Vec::new();
        while !matches!(self.peek(), Tok::Dedent | Tok::Eof) {
            if matches!(self.peek(), Tok::Newline) {
                self.advance();
                continue;
            }
            body.extend(self.parse_statement()?);
        }
        self.blocks -= 1;
        if matches!(self.peek(), Tok::Dedent) {
            self.advance();
        }
        Ok(body)
    }

    fn parse_loop_body(&mut self, keyword: &str, line: usize) -> ParseResult<Vec<Stmt>> {
        self.loops += 1;
        let body = self.parse_block(&format!("'{}' statement", keyword), line);
        self.loops -= 1;
        body
    }

    fn parse_else_block(&mut self) -> ParseResult<Vec<Stmt>> {
        let line = self.line();
        if self.eat_kw("else") {
            self.parse_block("'else' statement", line)
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_if(&mut self) -> ParseResult<StmtKind> {
        let line = self.tokens[self.pos.saturating_sub(1)].line;
        let test = self.parse_named_test()?;
        let body = self.parse_block("'if' statement", line)?;
        let elif_line = self.line();
        let orelse = if self.eat_kw("elif") {
            let kind = self.parse_if()?;
            vec![Stmt {
                kind,
                line: elif_line,
            }]
        } else {
            self.parse_else_block()?
        };
        Ok(StmtKind::If { test, body, orelse })
    }

    fn parse_try(&mut self, line: usize) -> ParseResult<StmtKind> {
        let body = self.parse_block("'try' statement", line)?;
        let mut handlers = Vec::new();
        while self.check_kw("except") {
            let handler_line = self.line();
            self.advance();
            let (typ, name) = if self.check_op(":") {
                (None, None)
            } else {
                let typ = self.parse_test()?;
                let typ = if self.check_op(",") {
                    let mut items = vec![typ];
                    while self.eat_op(",") {
                        items.push(self.parse_test()?);
                    }
                    Expr::Tuple(items)
                } else {
                    typ
                };
                let name = if self.eat_kw("as") {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                (Some(typ), name)
            };
            let handler_body = self.parse_block("'except' statement", handler_line)?;
            handlers.push(Handler {
                typ,
                name,
                body: handler_body,
                line: handler_line,
            });
        }
        let orelse = if handlers.is_empty() {
            Vec::new()
        } else {
            self.parse_else_block()?
        };
        let finally_line = self.line();
        let finalbody = if self.eat_kw("finally") {
            self.parse_block("'finally' statement", finally_line)?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        })
    }

    fn parse_class(&mut self, line: usize) -> ParseResult<StmtKind> {
        let name = self.expect_name()?;
        if self.eat_op("(") {
            if !self.check_op(")") {
                self.parse_call_args()?;
            }
            self.expect_op(")")?;
        }
        let saved = (self.loops, self.functions);
        self.loops = 0;
        self.functions = 0;
        let body = self.parse_block(&format!("class definition on line {}", line), line);
        (self.loops, self.functions) = saved;
        body?;
        Ok(StmtKind::ClassDef { name })
    }

    fn parse_def(&mut self, decorators: Vec<Expr>, line: usize) -> ParseResult<Rc<FunctionDef>> {
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.parse_params(")", true)?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.parse_test()?;
        }
        let saved = self.loops;
        self.loops = 0;
        self.functions += 1;
        let body = self.parse_block(&format!("function definition on line {}", line), line);
        self.functions -= 1;
        self.loops = saved;
        let body = body?;
        let doc = match body.first().map(|s| &s.kind) {
            Some(StmtKind::Expr(Expr::Const(Const::Str(text)))) => Some(text.to_string()),
            _ => None,
        };
        Ok(Rc::new(build_function(name, params, body, decorators, doc, line)))
    }

    /// Parameter list up to `close`. Annotations are parsed and dropped.
    fn parse_params(&mut self, close: &str, annotations: bool) -> ParseResult<Params> {
        let mut params = Params::default();
        let mut seen_star = false;
        let mut seen_default = false;
        let mut names = HashSet::new();
        while !self.check_op(close) {
            if self.eat_op("**") {
                let name = self.expect_name()?;
                if annotations && self.eat_op(":") {
                    self.parse_test()?;
                }
                if !names.insert(name.clone()) {
                    return Err(self.error(format!("duplicate argument '{}' in function definition", name)));
                }
                params.kwarg = Some(name);
                self.eat_op(",");
                break;
            }
            if self.eat_op("*") {
                if seen_star {
                    return Err(self.error("* argument may appear only once"));
                }
                seen_star = true;
                if let Tok::Name(_) = self.peek() {
                    let name = self.expect_name()?;
                    if annotations && self.eat_op(":") {
                        self.parse_test()?;
                    }
                    if !names.insert(name.clone()) {
                        return Err(self.error(format!("duplicate argument '{}' in function definition", name)));
                    }
                    params.vararg = Some(name);
                } else if self.check_op(close) || (self.check_op(",") && matches!(self.peek_at(1), Tok::Op(o) if *o == close)) {
                    return Err(self.error("named arguments must follow bare *"));
                }
            } else if self.eat_op("/") {
                // Positional-only marker; parameters stay bindable by position.
            } else {
                let name = self.expect_name()?;
                if annotations && self.eat_op(":") {
                    self.parse_test()?;
                }
                let default = if self.eat_op("=") {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                if !names.insert(name.clone()) {
                    return Err(self.error(format!("duplicate argument '{}' in function definition", name)));
                }
                let param = Param {
                    name,
                    default: default.clone(),
                };
                if seen_star {
                    params.kwonly.push(param);
                } else {
                    if default.is_some() {
                        seen_default = true;
                    } else if seen_default {
                        return Err(self.error("non-default argument follows default argument"));
                    }
                    params.positional.push(param);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    // ---- expressions ----

    /// Comma-separated expressions, possibly starred; a tuple when a comma appears.
    fn parse_star_expressions(&mut self) -> ParseResult<Expr> {
        let first = self.parse_star_or_test()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if !self.starts_expression() {
                break;
            }
            items.push(self.parse_star_or_test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_star_or_test(&mut self) -> ParseResult<Expr> {
        if self.eat_op("*") {
            let inner = self.parse_bitor()?;
            return Ok(Expr::Starred(Box::new(inner)));
        }
        self.parse_test()
    }

    /// Loop and comprehension targets.
    fn parse_target_list(&mut self) -> ParseResult<Expr> {
        let first = self.parse_target_item()?;
        let target = if self.check_op(",") {
            let mut items = vec![first];
            while self.eat_op(",") {
                if self.check_kw("in") {
                    break;
                }
                items.push(self.parse_target_item()?);
            }
            Expr::Tuple(items)
        } else {
            first
        };
        check_assign_target(&target).map_err(|m| self.error(m))?;
        Ok(target)
    }

    fn parse_target_item(&mut self) -> ParseResult<Expr> {
        if self.eat_op("*") {
            return Ok(Expr::Starred(Box::new(self.parse_bitor()?)));
        }
        self.parse_bitor()
    }

    /// `if`/`while` conditions accept `:=` nowhere; kept as a separate
    /// entry point so the error message names the construct.
    fn parse_named_test(&mut self) -> ParseResult<Expr> {
        let test = self.parse_test()?;
        if self.check_op(":=") {
            return Err(self.error("assignment expressions are not supported"));
        }
        Ok(test)
    }

    fn parse_test(&mut self) -> ParseResult<Expr> {
        self.nest()?;
        let result = self.parse_test_inner();
        self.unnest();
        result
    }

    fn parse_test_inner(&mut self) -> ParseResult<Expr> {
        if self.check_kw("lambda") {
            self.advance();
            return self.parse_lambda();
        }
        let body = self.parse_or()?;
        if self.check_kw("if") {
            self.advance();
            let test = self.parse_or()?;
            if !self.eat_kw("else") {
                return Err(self.error("expected 'else' after 'if' expression"));
            }
            let orelse = self.parse_test()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn parse_lambda(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        let params = self.parse_params(":", false)?;
        self.expect_op(":")?;
        let saved = self.loops;
        self.loops = 0;
        self.functions += 1;
        let body = self.parse_test();
        self.functions -= 1;
        self.loops = saved;
        let body = body?;
        let stmt = Stmt {
            kind: StmtKind::Return(Some(body)),
            line,
        };
        let def = build_function("<lambda>".to_string(), params, vec![stmt], Vec::new(), None, line);
        Ok(Expr::Lambda(Rc::new(def)))
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_kw("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_kw("and") {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if self.eat_kw("not") {
            self.nest()?;
            let operand = self.parse_not();
            self.unnest();
            return Ok(Expr::UnaryOp(UnaryOp::Not, Box::new(operand?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "is" => {
                    if matches!(self.peek_at(1), Tok::Name(m) if m == "not") {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                Tok::Name(n) if n == "not" && matches!(self.peek_at(1), Tok::Name(m) if m == "in") => {
                    self.advance();
                    CmpOp::NotIn
                }
                _ => break,
            };
            self.advance();
            ops.push((op, self.parse_bitor()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), ops))
        }
    }

    fn parse_bitor(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_bitxor()?;
        while self.eat_op("|") {
            let right = self.parse_bitxor()?;
            left = Expr::BinOp(Box::new(left), BinOp::BitOr, Box::new(right));
        }
        Ok(left)
    }

    fn parse_bitxor(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_bitand()?;
        while self.eat_op("^") {
            let right = self.parse_bitand()?;
            left = Expr::BinOp(Box::new(left), BinOp::BitXor, Box::new(right));
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_shift()?;
        while self.eat_op("&") {
            let right = self.parse_shift()?;
            left = Expr::BinOp(Box::new(left), BinOp::BitAnd, Box::new(right));
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_arith()?;
        loop {
            let op = if self.eat_op("<<") {
                BinOp::LShift
            } else if self.eat_op(">>") {
                BinOp::RShift
            } else {
                break;
            };
            let right = self.parse_arith()?;
            left = Expr::BinOp(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_arith(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                break;
            };
            let right = self.parse_term()?;
            left = Expr::BinOp(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_factor()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("%") {
                BinOp::Mod
            } else if self.eat_op("@") {
                BinOp::MatMul
            } else {
                break;
            };
            let right = self.parse_factor()?;
            left = Expr::BinOp(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> ParseResult<Expr> {
        let op = if self.check_op("-") {
            Some(UnaryOp::Neg)
        } else if self.check_op("+") {
            Some(UnaryOp::Pos)
        } else if self.check_op("~") {
            Some(UnaryOp::Invert)
        } else {
            None
        };
        if let Some(op) = op {
            self.advance();
            if op == UnaryOp::Neg
                && *self.peek() == Tok::MinIntMagnitude
                && !matches!(self.peek_at(1), Tok::Op("**"))
            {
                self.advance();
                return Ok(Expr::Const(Const::Int(i64::MIN)));
            }
            self.nest()?;
            let operand = self.parse_factor();
            self.unnest();
            let operand = operand?;
            // Fold negative literals so `-1` stays a constant.
            if op == UnaryOp::Neg {
                match operand {
                    Expr::Const(Const::Int(i)) if i != i64::MIN => {
                        return Ok(Expr::Const(Const::Int(-i)))
                    }
                    Expr::Const(Const::Float(f)) => return Ok(Expr::Const(Const::Float(-f))),
                    _ => {}
                }
            }
            return Ok(Expr::UnaryOp(op, Box::new(operand)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> ParseResult<Expr> {
        let base = self.parse_primary()?;
        if self.eat_op("**") {
            self.nest()?;
            let exponent = self.parse_factor();
            self.unnest();
            return Ok(Expr::BinOp(Box::new(base), BinOp::Pow, Box::new(exponent?)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.eat_op("(") {
                self.nest()?;
                let args = if self.check_op(")") {
                    Ok(Vec::new())
                } else {
                    self.parse_call_args()
                };
                self.unnest();
                let args = args?;
                self.expect_op(")")?;
                expr = Expr::Call(Box::new(expr), args);
            } else if self.eat_op("[") {
                self.nest()?;
                let index = self.parse_subscript_list();
                self.unnest();
                let index = index?;
                self.expect_op("]")?;
                expr = Expr::Subscript(Box::new(expr), Box::new(index));
            } else if self.eat_op(".") {
                let name = match self.peek().clone() {
                    Tok::Name(n) => {
                        self.advance();
                        n
                    }
                    _ => return Err(self.invalid()),
                };
                expr = Expr::Attribute(Box::new(expr), name);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> ParseResult<Vec<Arg>> {
        let mut args = Vec::new();
        let mut seen_keyword = false;
        loop {
            if self.check_op(")") {
                break;
            }
            if self.eat_op("**") {
                args.push(Arg::DoubleStar(self.parse_test()?));
                seen_keyword = true;
            } else if self.eat_op("*") {
                args.push(Arg::Star(self.parse_test()?));
            } else if matches!(self.peek(), Tok::Name(_)) && matches!(self.peek_at(1), Tok::Op("=")) {
                let name = self.expect_name()?;
                self.advance();
                args.push(Arg::Keyword(name, self.parse_test()?));
                seen_keyword = true;
            } else {
                let value = self.parse_test()?;
                if self.check_kw("for") {
                    let generators = self.parse_comprehension_clauses()?;
                    let genexp = Expr::GeneratorExp(Box::new(value), generators);
                    if !args.is_empty() || (self.check_op(",") && !matches!(self.peek_at(1), Tok::Op(")"))) {
                        return Err(self.error("Generator expression must be parenthesized"));
                    }
                    self.eat_op(",");
                    args.push(Arg::Positional(genexp));
                    break;
                }
                if seen_keyword {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(Arg::Positional(value));
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(args)
    }

    fn parse_subscript_list(&mut self) -> ParseResult<Expr> {
        let first = self.parse_subscript_item()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op("]") {
                break;
            }
            items.push(self.parse_subscript_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_subscript_item(&mut self) -> ParseResult<Expr> {
        let start = if self.check_op(":") {
            None
        } else {
            let value = self.parse_test()?;
            if !self.check_op(":") {
                return Ok(value);
            }
            Some(Box::new(value))
        };
        self.expect_op(":")?;
        let ends_item = |p: &Self| p.check_op("]") || p.check_op(",") || p.check_op(":");
        let stop = if ends_item(self) {
            None
        } else {
            Some(Box::new(self.parse_test()?))
        };
        let step = if self.eat_op(":") {
            if self.check_op("]") || self.check_op(",") {
                None
            } else {
                Some(Box::new(self.parse_test()?))
            }
        } else {
            None
        };
        Ok(Expr::Slice(start, stop, step))
    }

    fn parse_comprehension_clauses(&mut self) -> ParseResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.eat_kw("for") {
            let target = self.parse_target_list()?;
            self.expect_kw("in")?;
            let iter = self.parse_or()?;
            let mut ifs = Vec::new();
            while self.eat_kw("if") {
                ifs.push(self.parse_or()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }

    fn parse_atom(&mut self) -> ParseResult<Expr> {
        let token = self.token().clone();
        match token.tok {
            Tok::Int(i) => {
                self.advance();
                Ok(Expr::Const(Const::Int(i)))
            }
            Tok::MinIntMagnitude => Err(self.error("integer literal exceeds the 64-bit range")),
            Tok::Float(f) => {
                self.advance();
                Ok(Expr::Const(Const::Float(f)))
            }
            Tok::Str(_) | Tok::FStr(_) => self.parse_strings(),
            Tok::Name(name) => match name.as_str() {
                "None" => {
                    self.advance();
                    Ok(Expr::Const(Const::None))
                }
                "True" => {
                    self.advance();
                    Ok(Expr::Const(Const::Bool(true)))
                }
                "False" => {
                    self.advance();
                    Ok(Expr::Const(Const::Bool(false)))
                }
                "yield" | "await" => Err(self.error(format!("'{}' is not supported", name))),
                n if is_keyword(n) => Err(self.invalid()),
                _ => {
                    self.advance();
                    Ok(Expr::Name(name))
                }
            },
            Tok::Op("...") => {
                self.advance();
                Ok(Expr::Const(Const::Ellipsis))
            }
            Tok::Op("(") => {
                self.advance();
                self.nest()?;
                let inner = self.parse_paren_body();
                self.unnest();
                let inner = inner?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Tok::Op("[") => {
                self.advance();
                self.nest()?;
                let inner = self.parse_list_body();
                self.unnest();
                let inner = inner?;
                self.expect_op("]")?;
                Ok(inner)
            }
            Tok::Op("{") => {
                self.advance();
                self.nest()?;
                let inner = self.parse_brace_body();
                self.unnest();
                let inner = inner?;
                self.expect_op("}")?;
                Ok(inner)
            }
            _ => Err(self.invalid()),
        }
    }

    fn parse_paren_body(&mut self) -> ParseResult<Expr> {
        if self.check_op(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        if self.check_kw("yield") {
            return Err(self.error("'yield' is not supported"));
        }
        let first = self.parse_star_or_test()?;
        if self.check_kw("for") {
            let generators = self.parse_comprehension_clauses()?;
            return Ok(Expr::GeneratorExp(Box::new(first), generators));
        }
        if !self.check_op(",") {
            if let Expr::Starred(_) = first {
                return Err(self.error("cannot use starred expression here"));
            }
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op(")") {
                break;
            }
            items.push(self.parse_star_or_test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_list_body(&mut self) -> ParseResult<Expr> {
        if self.check_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.parse_star_or_test()?;
        if self.check_kw("for") {
            let generators = self.parse_comprehension_clauses()?;
            return Ok(Expr::ListComp(Box::new(first), generators));
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op("]") {
                break;
            }
            items.push(self.parse_star_or_test()?);
        }
        Ok(Expr::List(items))
    }

    fn parse_brace_body(&mut self) -> ParseResult<Expr> {
        if self.check_op("}") {
            return Ok(Expr::Dict(Vec::new()));
        }
        if self.eat_op("**") {
            let mapping = self.parse_bitor()?;
            return self.parse_dict_rest(vec![(None, mapping)]);
        }
        let first = self.parse_star_or_test()?;
        if self.eat_op(":") {
            let value = self.parse_test()?;
            if self.check_kw("for") {
                let generators = self.parse_comprehension_clauses()?;
                return Ok(Expr::DictComp(Box::new(first), Box::new(value), generators));
            }
            return self.parse_dict_rest(vec![(Some(first), value)]);
        }
        if self.check_kw("for") {
            let generators = self.parse_comprehension_clauses()?;
            return Ok(Expr::SetComp(Box::new(first), generators));
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op("}") {
                break;
            }
            items.push(self.parse_star_or_test()?);
        }
        Ok(Expr::Set(items))
    }

    fn parse_dict_rest(&mut self, mut entries: Vec<(Option<Expr>, Expr)>) -> ParseResult<Expr> {
        while self.eat_op(",") {
            if self.check_op("}") {
                break;
            }
            if self.eat_op("**") {
                entries.push((None, self.parse_bitor()?));
                continue;
            }
            let key = self.parse_test()?;
            self.expect_op(":")?;
            let value = self.parse_test()?;
            entries.push((Some(key), value));
        }
        Ok(Expr::Dict(entries))
    }

    /// Adjacent string literals concatenate; any f-string makes the whole
    /// run formatted.
    fn parse_strings(&mut self) -> ParseResult<Expr> {
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;
        loop {
            match self.peek().clone() {
                Tok::Str(text) => {
                    self.advance();
                    push_literal(&mut parts, &text);
                }
                Tok::FStr(pieces) => {
                    self.advance();
                    formatted = true;
                    for part in convert_pieces(&pieces)? {
                        match part {
                            FStringPart::Literal(text) => push_literal(&mut parts, &text),
                            field => parts.push(field),
                        }
                    }
                }
                _ => break,
            }
        }
        if !formatted {
            let text = match parts.pop() {
                Some(FStringPart::Literal(text)) => text,
                _ => String::new(),
            };
            return Ok(Expr::Const(Const::Str(Rc::from(text))));
        }
        Ok(Expr::FString(parts))
    }
}

fn opening(close: &str) -> &'static str {
    match close {
        ")" => "(",
        "]" => "[",
        _ => "{",
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if let Some(FStringPart::Literal(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_string()));
    }
}

fn convert_pieces(pieces: &[FPiece]) -> ParseResult<Vec<FStringPart>> {
    let mut parts = Vec::with_capacity(pieces.len());
    for piece in pieces {
        match piece {
            FPiece::Literal(text) => parts.push(FStringPart::Literal(text.clone())),
            FPiece::Field {
                source,
                line,
                conversion,
                spec,
            } => {
                let expr = parse_fragment(source, *line)?;
                parts.push(FStringPart::Field {
                    expr: Box::new(expr),
                    conversion: *conversion,
                    spec: convert_pieces(spec)?,
                });
            }
        }
    }
    Ok(parts)
}

/// Parse the expression inside an f-string replacement field.
fn parse_fragment(source: &str, line: usize) -> ParseResult<Expr> {
    let tokens = tokenize_fragment(source, line)
        .map_err(|e| SyntaxFault::new(format!("f-string: {}", e.message()), e.line(), e.col()))?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_star_expressions()?;
    while matches!(parser.peek(), Tok::Newline) {
        parser.advance();
    }
    if !matches!(parser.peek(), Tok::Eof) {
        return Err(SyntaxFault::new("f-string: invalid syntax", line, 1));
    }
    Ok(expr)
}

fn augmented_op(op: &str) -> Option<BinOp> {
    Some(match op {
        "+=" => BinOp::Add,
        "-=" => BinOp::Sub,
        "*=" => BinOp::Mul,
        "/=" => BinOp::Div,
        "//=" => BinOp::FloorDiv,
        "%=" => BinOp::Mod,
        "**=" => BinOp::Pow,
        "@=" => BinOp::MatMul,
        "<<=" => BinOp::LShift,
        ">>=" => BinOp::RShift,
        "&=" => BinOp::BitAnd,
        "|=" => BinOp::BitOr,
        "^=" => BinOp::BitXor,
        _ => return None,
    })
}

fn describe(expr: &Expr) -> &'static str {
    match expr {
        Expr::Call(..) => "function call",
        Expr::Const(Const::None) | Expr::Const(Const::Bool(_)) | Expr::Const(Const::Ellipsis) => "constant",
        Expr::Const(_) | Expr::FString(_) => "literal",
        Expr::BinOp(..) | Expr::UnaryOp(..) => "expression",
        Expr::And(..) | Expr::Or(..) => "expression",
        Expr::Compare(..) => "comparison",
        Expr::IfExp { .. } => "conditional expression",
        Expr::Lambda(_) => "lambda",
        Expr::ListComp(..) => "list comprehension",
        Expr::SetComp(..) => "set comprehension",
        Expr::DictComp(..) => "dict comprehension",
        Expr::GeneratorExp(..) => "generator expression",
        Expr::Dict(_) => "dict literal",
        Expr::Set(_) => "set display",
        Expr::Tuple(_) => "tuple",
        Expr::List(_) => "list",
        _ => "expression",
    }
}

fn check_assign_target(expr: &Expr) -> Result<(), String> {
    match expr {
        Expr::Name(_) | Expr::Attribute(..) | Expr::Subscript(..) => Ok(()),
        Expr::Tuple(items) | Expr::List(items) => {
            let starred = items.iter().filter(|e| matches!(e, Expr::Starred(_))).count();
            if starred > 1 {
                return Err("multiple starred expressions in assignment".to_string());
            }
            for item in items {
                match item {
                    Expr::Starred(inner) => check_assign_target(inner)?,
                    other => check_assign_target(other)?,
                }
            }
            Ok(())
        }
        Expr::Starred(_) => Err("starred assignment target must be in a list or tuple".to_string()),
        other => Err(format!("cannot assign to {}", describe(other))),
    }
}

fn check_delete_target(expr: &Expr) -> Result<(), String> {
    match expr {
        Expr::Name(_) | Expr::Attribute(..) | Expr::Subscript(..) => Ok(()),
        Expr::Tuple(items) | Expr::List(items) => items.iter().try_for_each(check_delete_target),
        other => Err(format!("cannot delete {}", describe(other))),
    }
}

fn build_function(
    name: String,
    params: Params,
    body: Vec<Stmt>,
    decorators: Vec<Expr>,
    doc: Option<String>,
    line: usize,
) -> FunctionDef {
    let mut bound = HashSet::new();
    let mut globals = HashSet::new();
    let mut nonlocals = HashSet::new();
    collect_bindings(&body, &mut bound, &mut globals, &mut nonlocals);
    for p in params.positional.iter().chain(params.kwonly.iter()) {
        bound.insert(p.name.clone());
    }
    bound.extend(params.vararg.iter().cloned());
    bound.extend(params.kwarg.iter().cloned());
    let locals = bound
        .into_iter()
        .filter(|n| !globals.contains(n) && !nonlocals.contains(n))
        .collect();
    FunctionDef {
        name,
        params,
        body,
        decorators,
        doc,
        line,
        locals,
        globals,
        nonlocals,
    }
}

/// Names a function body binds, without descending into nested functions.
fn collect_bindings(
    body: &[Stmt],
    bound: &mut HashSet<String>,
    globals: &mut HashSet<String>,
    nonlocals: &mut HashSet<String>,
) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => {
                for target in targets {
                    target_names(target, bound);
                }
            }
            StmtKind::AugAssign { target, .. } | StmtKind::AnnAssign { target, .. } => {
                target_names(target, bound)
            }
            StmtKind::For {
                target,
                body,
                orelse,
                ..
            } => {
                target_names(target, bound);
                collect_bindings(body, bound, globals, nonlocals);
                collect_bindings(orelse, bound, globals, nonlocals);
            }
            StmtKind::If { body, orelse, .. } | StmtKind::While { body, orelse, .. } => {
                collect_bindings(body, bound, globals, nonlocals);
                collect_bindings(orelse, bound, globals, nonlocals);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                collect_bindings(body, bound, globals, nonlocals);
                for handler in handlers {
                    if let Some(name) = &handler.name {
                        bound.insert(name.clone());
                    }
                    collect_bindings(&handler.body, bound, globals, nonlocals);
                }
                collect_bindings(orelse, bound, globals, nonlocals);
                collect_bindings(finalbody, bound, globals, nonlocals);
            }
            StmtKind::FunctionDef(def) => {
                bound.insert(def.name.clone());
            }
            StmtKind::ClassDef { name } => {
                bound.insert(name.clone());
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    target_names(target, bound);
                }
            }
            StmtKind::Global(names) => globals.extend(names.iter().cloned()),
            StmtKind::Nonlocal(names) => nonlocals.extend(names.iter().cloned()),
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let name = match &alias.asname {
                        Some(asname) => asname.clone(),
                        None => alias.name.split('.').next().unwrap_or(&alias.name).to_string(),
                    };
                    bound.insert(name);
                }
            }
            StmtKind::ImportFrom { names, .. } => {
                for alias in names {
                    if alias.name != "*" {
                        bound.insert(alias.asname.clone().unwrap_or_else(|| alias.name.clone()));
                    }
                }
            }
            _ => {}
        }
    }
}

fn target_names(target: &Expr, bound: &mut HashSet<String>) {
    match target {
        Expr::Name(name) => {
            bound.insert(name.clone());
        }
        Expr::Tuple(items) | Expr::List(items) => {
            for item in items {
                target_names(item, bound);
            }
        }
        Expr::Starred(inner) => target_names(inner, bound),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Vec<Stmt> {
        parse(src).unwrap_or_else(|e| panic!("parse failed: {}", e))
    }

    #[test]
    fn test_operator_precedence() {
        let stmts = parse_ok("x = 1 + 2 * 3 ** 2\n");
        let StmtKind::Assign { value, .. } = &stmts[0].kind else {
            panic!("expected assignment");
        };
        let Expr::BinOp(_, BinOp::Add, right) = value else {
            panic!("expected addition at the top, got {:?}", value);
        };
        assert!(matches!(**right, Expr::BinOp(_, BinOp::Mul, _)));
    }

    #[test]
    fn test_most_negative_literal() {
        let stmts = parse_ok("x = -9223372036854775808\n");
        let StmtKind::Assign { value, .. } = &stmts[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value, Expr::Const(Const::Int(i64::MIN))));

        let stmts = parse_ok("y = -9223372036854775807 - 1\n");
        let StmtKind::Assign { value, .. } = &stmts[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value, Expr::BinOp(_, BinOp::Sub, _)));

        let err = parse("z = 9223372036854775808\n").unwrap_err();
        assert_eq!(err.message(), "integer literal exceeds the 64-bit range");
        assert!(parse("w = -9223372036854775808 ** 2\n").is_err());
        assert!(parse("v = -9223372036854775809\n").is_err());
    }

    #[test]
    fn test_statement_lines() {
        let stmts = parse_ok("a = 1\n\n\nif a:\n    b = 2\n");
        assert_eq!(stmts[0].line, 1);
        assert_eq!(stmts[1].line, 4);
    }

    #[test]
    fn test_function_locals_analysis() {
        let stmts = parse_ok("def f(a, *rest, k=1, **kw):\n    global g\n    x = 1\n    for i in a: pass\n    g = 2\n");
        let StmtKind::FunctionDef(def) = &stmts[0].kind else {
            panic!("expected def");
        };
        for name in ["a", "rest", "k", "kw", "x", "i"] {
            assert!(def.locals.contains(name), "missing local {}", name);
        }
        assert!(!def.locals.contains("g"));
        assert!(def.globals.contains("g"));
    }

    #[test]
    fn test_comprehensions_and_slices() {
        parse_ok("y = [i * 2 for i in range(10) if i % 2]\n");
        parse_ok("z = {k: v for k, v in d.items()}\n");
        parse_ok("s = total(x for x in xs)\n");
        parse_ok("t = a[1:2, ::3]\n");
    }

    #[test]
    fn test_fstring_field_parses_expression() {
        let stmts = parse_ok("s = f'{a + 1!r:>{width}}'\n");
        let StmtKind::Assign { value: Expr::FString(parts), .. } = &stmts[0].kind else {
            panic!("expected f-string");
        };
        match &parts[0] {
            FStringPart::Field { conversion, spec, .. } => {
                assert_eq!(*conversion, Some('r'));
                assert_eq!(spec.len(), 2);
            }
            other => panic!("unexpected part {:?}", other),
        }
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(parse("x = = 1\n").unwrap_err().message(), "invalid syntax");
        assert_eq!(parse("f() = 1\n").unwrap_err().message(), "cannot assign to function call");
        assert_eq!(parse("break\n").unwrap_err().message(), "'break' outside loop");
        assert_eq!(parse("return 1\n").unwrap_err().message(), "'return' outside function");
        assert!(parse("if x:\npass\n").unwrap_err().is_indentation());
        assert!(parse("print('a'\n").is_err());
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let worker = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                let src = format!("x = {}1{}\n", "(".repeat(500), ")".repeat(500));
                parse(&src).unwrap_err().message().to_string()
            })
            .unwrap();
        assert_eq!(worker.join().unwrap(), "too many nested parentheses");
    }

    #[test]
    fn test_unsupported_statements() {
        assert!(parse("with x as y:\n    pass\n").is_err());
        assert!(parse("def g():\n    yield 1\n").is_err());
    }
}
