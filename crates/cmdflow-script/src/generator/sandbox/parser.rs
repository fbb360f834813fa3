//! Recursive-descent parser for generator snippets

use super::ast::{
    AssignOp, BinaryOp, Expr, Lambda, LambdaBody, LogicalOp, Pattern, PatternField, Stmt,
    TemplatePart, UnaryOp,
};
use super::lexer::{tokenize, RawPart, Spanned, Token};
use crate::error::{CompileError, CompileResult};
use std::sync::Arc;

static EOF: Token = Token::Eof;

/// Deepest syntax tree a snippet may build; bounds parser and evaluator recursion
const MAX_DEPTH: usize = 128;

const KEYWORDS: [&str; 18] = [
    "const", "let", "var", "if", "else", "for", "while", "return", "throw", "break", "continue",
    "new", "typeof", "function", "true", "false", "null", "undefined",
];

/// Parse a whole generator: exactly one function expression
pub(crate) fn parse_function(src: &str) -> CompileResult<Arc<Lambda>> {
    let mut parser = Parser::new(tokenize(src)?, 0);
    let expr = parser.expression()?;
    parser.eat_punct(";");
    parser.expect_eof()?;
    match expr {
        Expr::Lambda(lambda) => Ok(lambda),
        _ => Err(CompileError::Syntax(
            "generator must be a single function expression".into(),
        )),
    }
}

/// Parse a standalone expression, as found inside `${...}`, starting at the
/// nesting depth of the enclosing template
fn parse_expression(src: &str, depth: usize) -> CompileResult<Expr> {
    let mut parser = Parser::new(tokenize(src)?, depth);
    let expr = parser.expression()?;
    parser.expect_eof()?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>, depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth,
        }
    }

    fn deepen(&mut self) -> CompileResult<()> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(format_args!("nesting deeper than {MAX_DEPTH} levels")));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> CompileResult<T>) -> CompileResult<T> {
        self.deepen()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .or_else(|| self.tokens.last())
            .map_or(&EOF, |s| &s.token)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl std::fmt::Display) -> CompileError {
        let line = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |s| s.line);
        CompileError::Syntax(format!("{message} at line {line}"))
    }

    fn unexpected(&self) -> CompileError {
        let found = match self.peek() {
            Token::Ident(name) => format!("'{name}'"),
            Token::Num(n) => format!("number {n}"),
            Token::Str(_) => "string".to_string(),
            Token::Template(_) => "template literal".to_string(),
            Token::Punct(p) => format!("'{p}'"),
            Token::Eof => "end of input".to_string(),
        };
        self.error(format_args!("unexpected {found}"))
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Token::Punct(q) if *q == p)
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == kw)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.is_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> CompileResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error(format_args!("expected '{p}'")))
        }
    }

    fn expect_eof(&self) -> CompileResult<()> {
        if matches!(self.peek(), Token::Eof) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_ident(&mut self) -> CompileResult<String> {
        match self.peek() {
            Token::Ident(name) if !KEYWORDS.contains(&name.as_str()) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Any identifier, keywords included (property names)
    fn expect_name(&mut self) -> CompileResult<String> {
        let name = match self.peek() {
            Token::Ident(name) | Token::Str(name) => name.clone(),
            Token::Num(n) => super::value::number_to_string(*n),
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(name)
    }

    // ---- statements ----

    fn block(&mut self) -> CompileResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if matches!(self.peek(), Token::Eof) {
                return Err(self.error("expected '}'"));
            }
            body.push(self.nested(Self::statement)?);
        }
        self.advance();
        Ok(body)
    }

    fn body(&mut self) -> CompileResult<Vec<Stmt>> {
        if self.is_punct("{") {
            self.nested(Self::block)
        } else {
            Ok(vec![self.nested(Self::statement)?])
        }
    }

    fn statement(&mut self) -> CompileResult<Stmt> {
        let keyword = match self.peek() {
            Token::Ident(name) => name.clone(),
            Token::Punct("{") => return Ok(Stmt::Block(self.block()?)),
            Token::Punct(";") => {
                self.advance();
                return Ok(Stmt::Block(Vec::new()));
            }
            _ => String::new(),
        };
        let stmt = match keyword.as_str() {
            "const" | "let" | "var" => self.declaration()?,
            "if" => {
                self.advance();
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                let then = self.body()?;
                let otherwise = if self.eat_keyword("else") {
                    self.body()?
                } else {
                    Vec::new()
                };
                return Ok(Stmt::If {
                    test,
                    then,
                    otherwise,
                });
            }
            "for" => return self.for_statement(),
            "while" => {
                self.advance();
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                let body = self.body()?;
                return Ok(Stmt::While { test, body });
            }
            "return" => {
                self.advance();
                if self.is_punct(";") || self.is_punct("}") || matches!(self.peek(), Token::Eof) {
                    Stmt::Return(None)
                } else {
                    Stmt::Return(Some(self.expression()?))
                }
            }
            "throw" => {
                self.advance();
                Stmt::Throw(self.expression()?)
            }
            "break" => {
                self.advance();
                Stmt::Break
            }
            "continue" => {
                self.advance();
                Stmt::Continue
            }
            _ => Stmt::Expr(self.expression()?),
        };
        self.eat_punct(";");
        Ok(stmt)
    }

    fn declaration(&mut self) -> CompileResult<Stmt> {
        let constant = self.is_keyword("const");
        self.advance();
        let mut decls = Vec::new();
        loop {
            let pattern = self.pattern()?;
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            decls.push((pattern, init));
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Stmt::Declare { constant, decls })
    }

    fn for_statement(&mut self) -> CompileResult<Stmt> {
        self.advance();
        self.expect_punct("(")?;

        let checkpoint = self.pos;
        if self.is_keyword("const") || self.is_keyword("let") || self.is_keyword("var") {
            self.advance();
            let binding = self.pattern()?;
            if self.eat_keyword("of") {
                let iterable = self.expression()?;
                self.expect_punct(")")?;
                let body = self.body()?;
                return Ok(Stmt::ForOf {
                    binding,
                    iterable,
                    body,
                });
            }
            self.pos = checkpoint;
        }

        let init = if self.is_punct(";") {
            None
        } else if self.is_keyword("const") || self.is_keyword("let") || self.is_keyword("var") {
            Some(Box::new(self.declaration()?))
        } else {
            Some(Box::new(Stmt::Expr(self.expression()?)))
        };
        self.expect_punct(";")?;
        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;
        let body = self.body()?;
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn pattern(&mut self) -> CompileResult<Pattern> {
        if !self.eat_punct("{") {
            return Ok(Pattern::Ident(self.expect_ident()?));
        }
        let mut fields = Vec::new();
        while !self.eat_punct("}") {
            let key = self.expect_name()?;
            let local = if self.eat_punct(":") {
                self.expect_ident()?
            } else {
                key.clone()
            };
            let default = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            fields.push(PatternField {
                key,
                local,
                default,
            });
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(Pattern::Object(fields))
    }

    // ---- expressions ----

    pub(crate) fn expression(&mut self) -> CompileResult<Expr> {
        self.assignment()
    }

    fn arrow_ahead(&self) -> bool {
        match self.peek() {
            Token::Ident(name) if !KEYWORDS.contains(&name.as_str()) => {
                matches!(self.peek_at(1), Token::Punct("=>"))
            }
            Token::Punct("(") => {
                let mut depth = 0usize;
                let mut offset = 0;
                loop {
                    match self.peek_at(offset) {
                        Token::Punct("(" | "{" | "[") => depth += 1,
                        Token::Punct(")" | "}" | "]") => {
                            depth = depth.saturating_sub(1);
                            if depth == 0 {
                                return matches!(self.peek_at(offset + 1), Token::Punct("=>"));
                            }
                        }
                        Token::Eof => return false,
                        _ => {}
                    }
                    offset += 1;
                }
            }
            _ => false,
        }
    }

    fn arrow(&mut self) -> CompileResult<Expr> {
        let params = if self.eat_punct("(") {
            let mut params = Vec::new();
            while !self.eat_punct(")") {
                params.push(self.pattern()?);
                if !self.eat_punct(",") {
                    self.expect_punct(")")?;
                    break;
                }
            }
            params
        } else {
            vec![Pattern::Ident(self.expect_ident()?)]
        };
        self.expect_punct("=>")?;
        let body = if self.is_punct("{") {
            LambdaBody::Block(self.block()?)
        } else {
            LambdaBody::Expr(Box::new(self.assignment()?))
        };
        Ok(Expr::Lambda(Arc::new(Lambda { params, body })))
    }

    fn function(&mut self) -> CompileResult<Expr> {
        self.advance();
        if matches!(self.peek(), Token::Ident(_)) {
            self.expect_ident()?;
        }
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.eat_punct(")") {
            params.push(self.pattern()?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        let body = LambdaBody::Block(self.block()?);
        Ok(Expr::Lambda(Arc::new(Lambda { params, body })))
    }

    fn assignment(&mut self) -> CompileResult<Expr> {
        self.nested(Self::assignment_expr)
    }

    fn assignment_expr(&mut self) -> CompileResult<Expr> {
        if self.arrow_ahead() {
            return self.arrow();
        }
        let target = self.conditional()?;
        let op = match self.peek() {
            Token::Punct("=") => AssignOp::Assign,
            Token::Punct("+=") => AssignOp::Add,
            Token::Punct("-=") => AssignOp::Sub,
            _ => return Ok(target),
        };
        if !matches!(
            target,
            Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }
        ) {
            return Err(self.error("invalid assignment target"));
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> CompileResult<Expr> {
        let test = self.logical(0)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let then = self.assignment()?;
        self.expect_punct(":")?;
        let otherwise = self.assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    /// `??` < `||` < `&&`, then binary operators
    fn logical(&mut self, level: u8) -> CompileResult<Expr> {
        let (punct, op) = match level {
            0 => ("??", LogicalOp::Nullish),
            1 => ("||", LogicalOp::Or),
            2 => ("&&", LogicalOp::And),
            _ => return self.binary(0),
        };
        let base = self.depth;
        let mut left = self.logical(level + 1)?;
        while self.eat_punct(punct) {
            self.deepen()?;
            let right = self.logical(level + 1)?;
            left = Expr::Logical {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth = base;
        Ok(left)
    }

    fn binary(&mut self, level: usize) -> CompileResult<Expr> {
        const LEVELS: [&[(&str, BinaryOp)]; 4] = [
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNe),
                ("==", BinaryOp::LooseEq),
                ("!=", BinaryOp::LooseNe),
            ],
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
        ];
        let Some(ops) = LEVELS.get(level) else {
            return self.unary();
        };
        let base = self.depth;
        let mut left = self.binary(level + 1)?;
        'outer: loop {
            for (punct, op) in *ops {
                if self.eat_punct(punct) {
                    self.deepen()?;
                    let right = self.binary(level + 1)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            self.depth = base;
            return Ok(left);
        }
    }

    fn unary(&mut self) -> CompileResult<Expr> {
        let op = match self.peek() {
            Token::Punct("!") => Some(UnaryOp::Not),
            Token::Punct("-") => Some(UnaryOp::Neg),
            Token::Punct("+") => Some(UnaryOp::Plus),
            Token::Ident(name) if name == "typeof" => Some(UnaryOp::TypeOf),
            Token::Punct(p @ ("++" | "--")) => {
                let delta = if *p == "++" { 1.0 } else { -1.0 };
                self.advance();
                let target = self.nested(Self::unary)?;
                return Ok(Expr::Update {
                    target: Box::new(target),
                    delta,
                    prefix: true,
                });
            }
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let expr = self.nested(Self::unary)?;
            return Ok(Expr::Unary {
                op,
                expr: Box::new(expr),
            });
        }
        let expr = self.call_member()?;
        let delta = match self.peek() {
            Token::Punct("++") => 1.0,
            Token::Punct("--") => -1.0,
            _ => return Ok(expr),
        };
        self.advance();
        Ok(Expr::Update {
            target: Box::new(expr),
            delta,
            prefix: false,
        })
    }

    fn arguments(&mut self) -> CompileResult<Vec<Expr>> {
        let mut args = Vec::new();
        while !self.eat_punct(")") {
            args.push(self.assignment()?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok(args)
    }

    fn call_member(&mut self) -> CompileResult<Expr> {
        let base = self.depth;
        let mut expr = self.primary()?;
        loop {
            if matches!(self.peek(), Token::Punct("." | "?." | "[" | "(")) {
                self.deepen()?;
            }
            if self.eat_punct(".") {
                let property = self.expect_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: false,
                };
            } else if self.eat_punct("?.") {
                let property = self.expect_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: true,
                };
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                self.depth = base;
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> CompileResult<Expr> {
        match self.peek().clone() {
            Token::Num(n) => {
                self.advance();
                Ok(Expr::Num(n))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            Token::Template(parts) => {
                self.advance();
                let mut out = Vec::with_capacity(parts.len());
                for part in parts {
                    out.push(match part {
                        RawPart::Text(text) => TemplatePart::Text(text),
                        RawPart::Expr(src) => {
                            TemplatePart::Expr(parse_expression(&src, self.depth)?)
                        }
                    });
                }
                Ok(Expr::Template(out))
            }
            Token::Ident(name) => match name.as_str() {
                "true" | "false" => {
                    self.advance();
                    Ok(Expr::Bool(name == "true"))
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Null)
                }
                "undefined" => {
                    self.advance();
                    Ok(Expr::Undefined)
                }
                "function" => self.function(),
                "new" => {
                    self.advance();
                    let class = self.expect_ident()?;
                    let args = if self.eat_punct("(") {
                        self.arguments()?
                    } else {
                        Vec::new()
                    };
                    Ok(Expr::New { class, args })
                }
                _ => Ok(Expr::Ident(self.expect_ident()?)),
            },
            Token::Punct("(") => {
                self.advance();
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Token::Punct("[") => {
                self.advance();
                let mut items = Vec::new();
                while !self.eat_punct("]") {
                    items.push(self.assignment()?);
                    if !self.eat_punct(",") {
                        self.expect_punct("]")?;
                        break;
                    }
                }
                Ok(Expr::Array(items))
            }
            Token::Punct("{") => {
                self.advance();
                let mut entries = Vec::new();
                while !self.eat_punct("}") {
                    let key = self.expect_name()?;
                    let value = if self.eat_punct(":") {
                        self.assignment()?
                    } else {
                        Expr::Ident(key.clone())
                    };
                    entries.push((key, value));
                    if !self.eat_punct(",") {
                        self.expect_punct("}")?;
                        break;
                    }
                }
                Ok(Expr::Object(entries))
            }
            _ => Err(self.unexpected()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrow_with_expression_body() {
        let lambda = parse_function("(config, branches) => config.name").unwrap();
        assert_eq!(lambda.params.len(), 2);
        assert!(matches!(lambda.body, LambdaBody::Expr(_)));
    }

    #[test]
    fn function_keyword_with_block() {
        let lambda = parse_function("function (config) { const x = 1; return `${x}`; }").unwrap();
        let LambdaBody::Block(body) = &lambda.body else {
            panic!("expected block body");
        };
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn destructured_params() {
        let lambda = parse_function("({ name, port: p = 80 }) => name").unwrap();
        let Pattern::Object(fields) = &lambda.params[0] else {
            panic!("expected object pattern");
        };
        assert_eq!(fields[1].key, "port");
        assert_eq!(fields[1].local, "p");
        assert_eq!(fields[1].default, Some(Expr::Num(80.0)));
    }

    #[test]
    fn precedence() {
        let expr = parse_expression("1 + 2 * 3 === 7 && !false", 0).unwrap();
        assert!(matches!(
            expr,
            Expr::Logical {
                op: LogicalOp::And,
                ..
            }
        ));
    }

    #[test]
    fn for_loops() {
        parse_function("(c) => { for (const x of c.items) { if (x) continue; } return '' }")
            .unwrap();
        parse_function("(c) => { let s = ''; for (let i = 0; i < 3; i++) s += i; return s }")
            .unwrap();
    }

    fn too_deep(src: &str) -> bool {
        matches!(parse_function(src), Err(CompileError::Syntax(m)) if m.contains("nesting deeper"))
    }

    #[test]
    fn deep_nesting_is_a_compile_error() {
        let parens = format!("() => {}1{}", "(".repeat(50_000), ")".repeat(50_000));
        assert!(too_deep(&parens));
        assert!(too_deep(&format!("() => {}x", "!".repeat(50_000))));
        assert!(too_deep(&format!("() => 1{}", " + 1".repeat(50_000))));
        assert!(too_deep(&format!("() => x{}", ".y".repeat(50_000))));
        assert!(too_deep(&format!("() => {}{}", "{".repeat(50_000), "}".repeat(50_000))));
        let holes = format!("() => {}1{}", "`${".repeat(200), "}`".repeat(200));
        assert!(too_deep(&holes));
    }

    #[test]
    fn moderate_nesting_parses() {
        parse_function(&format!("() => {}1{}", "(".repeat(40), ")".repeat(40))).unwrap();
        parse_function(&format!("(c) => c.a{}", " + c.b".repeat(60))).unwrap();
    }

    #[test]
    fn rejects_non_functions_and_garbage() {
        assert!(parse_function("1 + 2").is_err());
        assert!(parse_function("(c) => { return ").is_err());
        assert!(parse_function("(c) => c.").is_err());
        assert!(matches!(
            parse_function("(c) => c) extra"),
            Err(CompileError::Syntax(_))
        ));
    }
}
