//! Parser for deva source
//!
//! Hand-rolled tokenizer and recursive-descent parser. Statements are
//! semicolon-terminated; `if`/`while`/`for` take a bare condition and a
//! braced body. `#` and `//` start line comments, `/* ... */` blocks.
//!
//! The parser produces a raw AST; scope ids and expression types are filled
//! in afterwards by the semantic checker.

use std::rc::Rc;

use crate::ast::{
    BinaryOp, Expr, ExprNode, FuncDecl, NodeInfo, Param, Program, Stmt, StmtNode, UnaryOp,
};
use crate::error::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Ident,
    Number,
    Str,
    Punct,
}

/// A token with source position information.
#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    text: String,
    line: u32,
}

const KEYWORDS: &[&str] = &[
    "def", "class", "new", "local", "const", "if", "else", "while", "for", "in", "break",
    "continue", "return", "import", "true", "false", "null",
];

fn is_keyword(s: &str) -> bool {
    KEYWORDS.contains(&s)
}

// ---------------------------------------------------------------------------
// tokenizer
// ---------------------------------------------------------------------------

struct Tokenizer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    file: Rc<str>,
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str, file: Rc<str>) -> Self {
        Tokenizer { src: src.as_bytes(), pos: 0, line: 1, file }
    }

    fn error(&self, msg: impl Into<String>) -> CompileError {
        CompileError::syntax(&self.file, self.line, msg)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) -> Result<(), CompileError> {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'#') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek2() == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek2() == Some(b'*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some(b'*') if self.peek() == Some(b'/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => return Err(self.error("unterminated block comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let line = self.line;
            let c = match self.peek() {
                Some(c) => c,
                None => break,
            };
            if c.is_ascii_alphabetic() || c == b'_' {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || c == b'_' {
                        self.bump();
                    } else {
                        break;
                    }
                }
                let text = std::str::from_utf8(&self.src[start..self.pos])
                    .expect("identifier bytes are ASCII")
                    .to_string();
                tokens.push(Token { kind: TokenKind::Ident, text, line });
            } else if c.is_ascii_digit() {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() || c == b'.' || c == b'e' || c == b'E' {
                        // exponent sign
                        if (c == b'e' || c == b'E')
                            && matches!(self.peek2(), Some(b'+') | Some(b'-'))
                        {
                            self.bump();
                        }
                        self.bump();
                    } else {
                        break;
                    }
                }
                let text = std::str::from_utf8(&self.src[start..self.pos])
                    .expect("number bytes are ASCII")
                    .to_string();
                if text.parse::<f64>().is_err() {
                    return Err(self.error(format!("malformed number literal '{}'", text)));
                }
                tokens.push(Token { kind: TokenKind::Number, text, line });
            } else if c == b'"' || c == b'\'' {
                let quote = c;
                self.bump();
                // collect raw bytes so multi-byte UTF-8 passes through intact
                let mut raw = Vec::new();
                loop {
                    match self.bump() {
                        Some(b'\\') => match self.bump() {
                            Some(b'n') => raw.push(b'\n'),
                            Some(b't') => raw.push(b'\t'),
                            Some(b'r') => raw.push(b'\r'),
                            Some(b'\\') => raw.push(b'\\'),
                            Some(b'"') => raw.push(b'"'),
                            Some(b'\'') => raw.push(b'\''),
                            Some(e) => {
                                return Err(
                                    self.error(format!("unknown escape '\\{}'", e as char))
                                )
                            }
                            None => return Err(self.error("unterminated string literal")),
                        },
                        Some(c) if c == quote => break,
                        Some(c) => raw.push(c),
                        None => return Err(self.error("unterminated string literal")),
                    }
                }
                let text = String::from_utf8(raw)
                    .map_err(|_| self.error("string literal is not valid UTF-8"))?;
                tokens.push(Token { kind: TokenKind::Str, text, line });
            } else {
                // multi-character punctuation first
                const TWO: &[&str] = &[
                    "==", "!=", "<=", ">=", "&&", "||", "+=", "-=", "*=", "/=", "%=",
                ];
                let pair = [c, self.peek2().unwrap_or(0)];
                let two = std::str::from_utf8(&pair)
                    .ok()
                    .and_then(|p| TWO.iter().find(|t| **t == p).copied());
                if let Some(two) = two {
                    self.bump();
                    self.bump();
                    tokens.push(Token {
                        kind: TokenKind::Punct,
                        text: two.to_string(),
                        line,
                    });
                    continue;
                }
                const ONE: &[u8] = b"+-*/%<>=!()[]{},.;:";
                if ONE.contains(&c) {
                    self.bump();
                    tokens.push(Token {
                        kind: TokenKind::Punct,
                        text: (c as char).to_string(),
                        line,
                    });
                } else {
                    return Err(self.error(format!("unexpected character '{}'", c as char)));
                }
            }
        }
        Ok(tokens)
    }
}

// ---------------------------------------------------------------------------
// parser
// ---------------------------------------------------------------------------

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    file: Rc<str>,
}

impl Parser {
    pub fn new(source: &str, filename: &str) -> Result<Self, CompileError> {
        let file: Rc<str> = Rc::from(filename);
        let tokens = Tokenizer::new(source, file.clone()).tokenize()?;
        Ok(Parser { tokens, pos: 0, file })
    }

    pub fn parse(mut self) -> Result<Program, CompileError> {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            statements.push(self.parse_statement()?);
        }
        Ok(Program { file: self.file, statements })
    }

    // -- token helpers ------------------------------------------------------

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn current_line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn info(&self) -> NodeInfo {
        NodeInfo::new(self.file.clone(), self.current_line())
    }

    fn error(&self, msg: impl Into<String>) -> CompileError {
        CompileError::syntax(&self.file, self.current_line(), msg)
    }

    fn check(&self, text: &str) -> bool {
        self.current().map(|t| t.text == text).unwrap_or(false)
    }

    fn advance(&mut self) -> Result<Token, CompileError> {
        let tok = self
            .current()
            .cloned()
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(tok)
    }

    fn consume(&mut self, text: &str) -> Result<(), CompileError> {
        if self.check(text) {
            self.pos += 1;
            Ok(())
        } else {
            let found = self
                .current()
                .map(|t| format!("'{}'", t.text))
                .unwrap_or_else(|| "end of input".to_string());
            Err(self.error(format!("expected '{}', found {}", text, found)))
        }
    }

    fn eat(&mut self, text: &str) -> bool {
        if self.check(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<String, CompileError> {
        let tok = self.advance()?;
        if tok.kind != TokenKind::Ident || is_keyword(&tok.text) {
            return Err(CompileError::syntax(
                &self.file,
                tok.line,
                format!("expected {}, found '{}'", what, tok.text),
            ));
        }
        Ok(tok.text)
    }

    /// Member names after `.` may collide with keywords (`x.new`, `x.delete`).
    fn expect_member_name(&mut self) -> Result<String, CompileError> {
        let tok = self.advance()?;
        if tok.kind != TokenKind::Ident {
            return Err(CompileError::syntax(
                &self.file,
                tok.line,
                format!("expected member name, found '{}'", tok.text),
            ));
        }
        Ok(tok.text)
    }

    // -- statements ---------------------------------------------------------

    fn parse_statement(&mut self) -> Result<StmtNode, CompileError> {
        let info = self.info();
        if self.check("def") {
            let func = self.parse_func_decl()?;
            return Ok(StmtNode { info, stmt: Stmt::FuncDef(func) });
        }
        if self.check("class") {
            return self.parse_class_def(info);
        }
        if self.eat("local") {
            let name = self.expect_identifier("variable name")?;
            let init = if self.eat("=") { Some(self.parse_expr()?) } else { None };
            self.consume(";")?;
            return Ok(StmtNode { info, stmt: Stmt::LocalDecl { name, init } });
        }
        if self.eat("const") {
            let name = self.expect_identifier("constant name")?;
            self.consume("=")?;
            let init = self.parse_expr()?;
            self.consume(";")?;
            return Ok(StmtNode { info, stmt: Stmt::ConstDecl { name, init } });
        }
        if self.eat("if") {
            return self.parse_if(info);
        }
        if self.eat("while") {
            let cond = self.parse_expr()?;
            let body = self.parse_braced_body()?;
            return Ok(StmtNode { info, stmt: Stmt::While { cond, body } });
        }
        if self.eat("for") {
            let key = self.expect_identifier("loop variable")?;
            let value = if self.eat(",") {
                Some(self.expect_identifier("loop variable")?)
            } else {
                None
            };
            self.consume("in")?;
            let iterable = self.parse_expr()?;
            let body = self.parse_braced_body()?;
            return Ok(StmtNode {
                info,
                stmt: Stmt::ForIn { key, value, iterable, body },
            });
        }
        if self.eat("break") {
            self.consume(";")?;
            return Ok(StmtNode { info, stmt: Stmt::Break });
        }
        if self.eat("continue") {
            self.consume(";")?;
            return Ok(StmtNode { info, stmt: Stmt::Continue });
        }
        if self.eat("return") {
            let value = if self.check(";") { None } else { Some(self.parse_expr()?) };
            self.consume(";")?;
            return Ok(StmtNode { info, stmt: Stmt::Return(value) });
        }
        if self.eat("import") {
            let module = self.expect_identifier("module name")?;
            self.consume(";")?;
            return Ok(StmtNode { info, stmt: Stmt::Import { module } });
        }
        if self.check("{") {
            let body = self.parse_braced_body()?;
            return Ok(StmtNode { info, stmt: Stmt::Block(body) });
        }

        // expression statement, assignment, or augmented assignment
        let expr = self.parse_expr()?;
        const AUG: &[(&str, BinaryOp)] = &[
            ("+=", BinaryOp::Add),
            ("-=", BinaryOp::Sub),
            ("*=", BinaryOp::Mul),
            ("/=", BinaryOp::Div),
            ("%=", BinaryOp::Mod),
        ];
        for &(text, op) in AUG {
            if self.eat(text) {
                self.check_assign_target(&expr)?;
                let value = self.parse_expr()?;
                self.consume(";")?;
                return Ok(StmtNode {
                    info,
                    stmt: Stmt::AugAssign { target: expr, op, value },
                });
            }
        }
        if self.eat("=") {
            self.check_assign_target(&expr)?;
            let value = self.parse_expr()?;
            self.consume(";")?;
            return Ok(StmtNode { info, stmt: Stmt::Assign { target: expr, value } });
        }
        self.consume(";")?;
        Ok(StmtNode { info, stmt: Stmt::Expr(expr) })
    }

    fn check_assign_target(&self, target: &ExprNode) -> Result<(), CompileError> {
        match &target.expr {
            Expr::Ident(_) | Expr::Index { .. } | Expr::Dot { .. } | Expr::Slice2 { .. }
            | Expr::Slice3 { .. } => Ok(()),
            _ => Err(CompileError::syntax(
                &self.file,
                target.info.line,
                "invalid assignment target",
            )),
        }
    }

    fn parse_if(&mut self, info: NodeInfo) -> Result<StmtNode, CompileError> {
        let cond = self.parse_expr()?;
        let then_body = self.parse_braced_body()?;
        let else_body = if self.eat("else") {
            if self.check("if") {
                let nested_info = self.info();
                self.consume("if")?;
                Some(vec![self.parse_if(nested_info)?])
            } else {
                Some(self.parse_braced_body()?)
            }
        } else {
            None
        };
        Ok(StmtNode { info, stmt: Stmt::If { cond, then_body, else_body } })
    }

    fn parse_braced_body(&mut self) -> Result<Vec<StmtNode>, CompileError> {
        self.consume("{")?;
        let mut body = Vec::new();
        while !self.check("}") {
            if self.is_at_end() {
                return Err(self.error("unterminated block, missing '}'"));
            }
            body.push(self.parse_statement()?);
        }
        self.consume("}")?;
        Ok(body)
    }

    fn parse_func_decl(&mut self) -> Result<FuncDecl, CompileError> {
        let info = self.info();
        self.consume("def")?;
        // constructors and destructors are spelled `new` and `delete`, so
        // keywords are acceptable method names
        let name = self.expect_member_name()?;
        self.consume("(")?;
        let mut params = Vec::new();
        let mut seen_default = false;
        if !self.check(")") {
            loop {
                let pname = self.expect_identifier("parameter name")?;
                let default = if self.eat("=") {
                    seen_default = true;
                    Some(self.parse_default_literal()?)
                } else {
                    if seen_default {
                        return Err(self.error(format!(
                            "parameter '{}' without default follows defaulted parameters",
                            pname
                        )));
                    }
                    None
                };
                if params.iter().any(|p: &Param| p.name == pname) {
                    return Err(self.error(format!("duplicate parameter '{}'", pname)));
                }
                params.push(Param { name: pname, default });
                if !self.eat(",") {
                    break;
                }
            }
        }
        self.consume(")")?;
        let body = self.parse_braced_body()?;
        Ok(FuncDecl { info, name, params, body })
    }

    /// Parameter defaults are restricted to literals.
    fn parse_default_literal(&mut self) -> Result<ExprNode, CompileError> {
        let info = self.info();
        let negate = self.eat("-");
        let tok = self.advance()?;
        let expr = match (tok.kind, tok.text.as_str()) {
            (TokenKind::Number, _) => {
                let n: f64 = tok.text.parse().expect("validated by the tokenizer");
                Expr::Number(if negate { -n } else { n })
            }
            (TokenKind::Str, _) if !negate => Expr::Str(tok.text),
            (TokenKind::Ident, "true") if !negate => Expr::Bool(true),
            (TokenKind::Ident, "false") if !negate => Expr::Bool(false),
            (TokenKind::Ident, "null") if !negate => Expr::Null,
            _ => {
                return Err(CompileError::syntax(
                    &self.file,
                    tok.line,
                    "parameter default must be a literal",
                ))
            }
        };
        Ok(ExprNode { info, expr })
    }

    fn parse_class_def(&mut self, info: NodeInfo) -> Result<StmtNode, CompileError> {
        self.consume("class")?;
        let name = self.expect_identifier("class name")?;
        let mut bases = Vec::new();
        if self.eat(":") {
            loop {
                bases.push(self.expect_identifier("base class name")?);
                if !self.eat(",") {
                    break;
                }
            }
        }
        self.consume("{")?;
        let mut methods = Vec::new();
        while !self.check("}") {
            if !self.check("def") {
                return Err(self.error("class bodies may only contain method definitions"));
            }
            methods.push(self.parse_func_decl()?);
        }
        self.consume("}")?;
        Ok(StmtNode { info, stmt: Stmt::ClassDef { name, bases, methods } })
    }

    // -- expressions --------------------------------------------------------

    fn parse_expr(&mut self) -> Result<ExprNode, CompileError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<ExprNode, CompileError> {
        let mut lhs = self.parse_and()?;
        while self.check("||") {
            let info = self.info();
            self.consume("||")?;
            let rhs = self.parse_and()?;
            lhs = ExprNode {
                info,
                expr: Expr::Binary { op: BinaryOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) },
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<ExprNode, CompileError> {
        let mut lhs = self.parse_equality()?;
        while self.check("&&") {
            let info = self.info();
            self.consume("&&")?;
            let rhs = self.parse_equality()?;
            lhs = ExprNode {
                info,
                expr: Expr::Binary { op: BinaryOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) },
            };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<ExprNode, CompileError> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = if self.check("==") {
                BinaryOp::Eq
            } else if self.check("!=") {
                BinaryOp::Neq
            } else {
                break;
            };
            let info = self.info();
            self.advance()?;
            let rhs = self.parse_relational()?;
            lhs = ExprNode {
                info,
                expr: Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
            };
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<ExprNode, CompileError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = if self.check("<=") {
                BinaryOp::Lte
            } else if self.check(">=") {
                BinaryOp::Gte
            } else if self.check("<") {
                BinaryOp::Lt
            } else if self.check(">") {
                BinaryOp::Gt
            } else {
                break;
            };
            let info = self.info();
            self.advance()?;
            let rhs = self.parse_additive()?;
            lhs = ExprNode {
                info,
                expr: Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
            };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<ExprNode, CompileError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.check("+") {
                BinaryOp::Add
            } else if self.check("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            let info = self.info();
            self.advance()?;
            let rhs = self.parse_multiplicative()?;
            lhs = ExprNode {
                info,
                expr: Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
            };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<ExprNode, CompileError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.check("*") {
                BinaryOp::Mul
            } else if self.check("/") {
                BinaryOp::Div
            } else if self.check("%") {
                BinaryOp::Mod
            } else {
                break;
            };
            let info = self.info();
            self.advance()?;
            let rhs = self.parse_unary()?;
            lhs = ExprNode {
                info,
                expr: Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<ExprNode, CompileError> {
        let info = self.info();
        if self.eat("-") {
            let operand = self.parse_unary()?;
            return Ok(ExprNode {
                info,
                expr: Expr::Unary { op: UnaryOp::Neg, operand: Box::new(operand) },
            });
        }
        if self.eat("!") {
            let operand = self.parse_unary()?;
            return Ok(ExprNode {
                info,
                expr: Expr::Unary { op: UnaryOp::Not, operand: Box::new(operand) },
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<ExprNode, CompileError> {
        let mut expr = self.parse_primary()?;
        loop {
            let info = self.info();
            if self.eat("(") {
                let mut args = Vec::new();
                if !self.check(")") {
                    loop {
                        args.push(self.parse_expr()?);
                        if !self.eat(",") {
                            break;
                        }
                    }
                }
                self.consume(")")?;
                expr = ExprNode {
                    info,
                    expr: Expr::Call { callee: Box::new(expr), args },
                };
            } else if self.eat("[") {
                expr = self.parse_index_or_slice(expr, info)?;
            } else if self.eat(".") {
                let member = self.expect_member_name()?;
                expr = ExprNode {
                    info,
                    expr: Expr::Dot { target: Box::new(expr), member },
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_index_or_slice(
        &mut self,
        target: ExprNode,
        info: NodeInfo,
    ) -> Result<ExprNode, CompileError> {
        let first = self.parse_expr()?;
        if self.eat(":") {
            let end = self.parse_expr()?;
            if self.eat(":") {
                let step = self.parse_expr()?;
                self.consume("]")?;
                return Ok(ExprNode {
                    info,
                    expr: Expr::Slice3 {
                        target: Box::new(target),
                        start: Box::new(first),
                        end: Box::new(end),
                        step: Box::new(step),
                    },
                });
            }
            self.consume("]")?;
            return Ok(ExprNode {
                info,
                expr: Expr::Slice2 {
                    target: Box::new(target),
                    start: Box::new(first),
                    end: Box::new(end),
                },
            });
        }
        self.consume("]")?;
        Ok(ExprNode {
            info,
            expr: Expr::Index { target: Box::new(target), index: Box::new(first) },
        })
    }

    fn parse_primary(&mut self) -> Result<ExprNode, CompileError> {
        let info = self.info();
        let tok = self.advance()?;
        let expr = match tok.kind {
            TokenKind::Number => {
                Expr::Number(tok.text.parse().expect("validated by the tokenizer"))
            }
            TokenKind::Str => Expr::Str(tok.text),
            TokenKind::Ident => match tok.text.as_str() {
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                "null" => Expr::Null,
                "new" => return self.parse_new(info),
                text if is_keyword(text) => {
                    return Err(CompileError::syntax(
                        &self.file,
                        tok.line,
                        format!("unexpected keyword '{}'", text),
                    ))
                }
                _ => Expr::Ident(tok.text),
            },
            TokenKind::Punct => match tok.text.as_str() {
                "(" => {
                    let inner = self.parse_expr()?;
                    self.consume(")")?;
                    return Ok(inner);
                }
                "[" => {
                    let mut items = Vec::new();
                    if !self.check("]") {
                        loop {
                            items.push(self.parse_expr()?);
                            if !self.eat(",") {
                                break;
                            }
                        }
                    }
                    self.consume("]")?;
                    Expr::VecLiteral(items)
                }
                "{" => {
                    let mut pairs = Vec::new();
                    if !self.check("}") {
                        loop {
                            let key = self.parse_expr()?;
                            self.consume(":")?;
                            let value = self.parse_expr()?;
                            pairs.push((key, value));
                            if !self.eat(",") {
                                break;
                            }
                        }
                    }
                    self.consume("}")?;
                    Expr::MapLiteral(pairs)
                }
                text => {
                    return Err(CompileError::syntax(
                        &self.file,
                        tok.line,
                        format!("unexpected token '{}'", text),
                    ))
                }
            },
        };
        Ok(ExprNode { info, expr })
    }

    /// `new path.to.Class(args...)`
    fn parse_new(&mut self, info: NodeInfo) -> Result<ExprNode, CompileError> {
        let mut class_path = vec![self.expect_identifier("class name")?];
        while self.eat(".") {
            class_path.push(self.expect_identifier("class name")?);
        }
        self.consume("(")?;
        let mut args = Vec::new();
        if !self.check(")") {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat(",") {
                    break;
                }
            }
        }
        self.consume(")")?;
        Ok(ExprNode { info, expr: Expr::New { class_path, args } })
    }
}

/// Convenience entry point: tokenize and parse one source unit.
pub fn parse_source(source: &str, filename: &str) -> Result<Program, CompileError> {
    Parser::new(source, filename)?.parse()
}

/// True when `source` contains unterminated braces, brackets or parens — the
/// interactive shell's cue to keep reading lines before compiling.
pub fn is_incomplete(source: &str) -> bool {
    let mut depth: i64 = 0;
    let mut in_str = false;
    let mut quote = b'"';
    let mut prev = 0u8;
    for &c in source.as_bytes() {
        if in_str {
            if c == quote && prev != b'\\' {
                in_str = false;
            }
        } else {
            match c {
                b'"' | b'\'' => {
                    in_str = true;
                    quote = c;
                }
                b'{' | b'[' | b'(' => depth += 1,
                b'}' | b']' | b')' => depth -= 1,
                _ => {}
            }
        }
        prev = c;
    }
    depth > 0 || in_str
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arithmetic_precedence() {
        let prog = parse_source("x = 2 + 3 * 4;", "t.dv").unwrap();
        assert_eq!(prog.statements.len(), 1);
        let Stmt::Assign { value, .. } = &prog.statements[0].stmt else {
            panic!("expected assignment");
        };
        let Expr::Binary { op: BinaryOp::Add, rhs, .. } = &value.expr else {
            panic!("expected addition at the root");
        };
        assert!(matches!(rhs.expr, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_parse_function_with_defaults() {
        let prog = parse_source("def f(a, b = 5, c = \"x\") { return a; }", "t.dv").unwrap();
        let Stmt::FuncDef(func) = &prog.statements[0].stmt else {
            panic!("expected function definition");
        };
        assert_eq!(func.name, "f");
        assert_eq!(func.params.len(), 3);
        assert!(func.params[0].default.is_none());
        assert!(matches!(
            func.params[1].default.as_ref().unwrap().expr,
            Expr::Number(n) if n == 5.0
        ));
    }

    #[test]
    fn test_rejects_default_before_plain_param() {
        let err = parse_source("def f(a = 1, b) { }", "t.dv").unwrap_err();
        assert!(err.message.contains("default"));
    }

    #[test]
    fn test_parse_class_with_base() {
        let prog = parse_source(
            "class Dog : Animal { def new(self, name) { self.name = name; } }",
            "t.dv",
        )
        .unwrap();
        let Stmt::ClassDef { name, bases, methods } = &prog.statements[0].stmt else {
            panic!("expected class definition");
        };
        assert_eq!(name, "Dog");
        assert_eq!(bases, &["Animal".to_string()]);
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].params[0].name, "self");
    }

    #[test]
    fn test_parse_for_in_pair() {
        let prog = parse_source("for k, v in m { print(k); }", "t.dv").unwrap();
        let Stmt::ForIn { key, value, .. } = &prog.statements[0].stmt else {
            panic!("expected for-in");
        };
        assert_eq!(key, "k");
        assert_eq!(value.as_deref(), Some("v"));
    }

    #[test]
    fn test_parse_slices() {
        let prog = parse_source("x = v[1:3]; y = v[0:9:2];", "t.dv").unwrap();
        let Stmt::Assign { value, .. } = &prog.statements[0].stmt else { panic!() };
        assert!(matches!(value.expr, Expr::Slice2 { .. }));
        let Stmt::Assign { value, .. } = &prog.statements[1].stmt else { panic!() };
        assert!(matches!(value.expr, Expr::Slice3 { .. }));
    }

    #[test]
    fn test_parse_new_with_path() {
        let prog = parse_source("d = new zoo.Dog(\"rex\");", "t.dv").unwrap();
        let Stmt::Assign { value, .. } = &prog.statements[0].stmt else { panic!() };
        let Expr::New { class_path, args } = &value.expr else { panic!() };
        assert_eq!(class_path, &["zoo".to_string(), "Dog".to_string()]);
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_line_numbers_survive_comments() {
        let src = "# leading comment\nx = 1;\n/* block\ncomment */\ny = 2;\n";
        let prog = parse_source(src, "t.dv").unwrap();
        assert_eq!(prog.statements[0].info.line, 2);
        assert_eq!(prog.statements[1].info.line, 5);
    }

    #[test]
    fn test_reports_unterminated_string() {
        let err = parse_source("x = \"oops;", "t.dv").unwrap_err();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_incomplete_detection() {
        assert!(is_incomplete("def f() {"));
        assert!(is_incomplete("x = [1, 2,"));
        assert!(!is_incomplete("def f() { }"));
        assert!(!is_incomplete("x = \"{\";"));
    }

    #[test]
    fn test_method_call_chain() {
        let prog = parse_source("v.append(3);", "t.dv").unwrap();
        let Stmt::Expr(expr) = &prog.statements[0].stmt else { panic!() };
        let Expr::Call { callee, args } = &expr.expr else { panic!() };
        assert!(matches!(callee.expr, Expr::Dot { .. }));
        assert_eq!(args.len(), 1);
    }
}
