//! Tokenizer for generator snippets

use crate::error::{CompileError, CompileResult};

/// Punctuators, longest first so matching is greedy
const PUNCTUATORS: [&str; 38] = [
    "===", "!==", "...", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "+=", "-=", "++",
    "--", "(", ")", "{", "}", "[", "]", ",", ";", ":", ".", "?", "+", "-", "*", "/", "%", "!", "<",
    ">", "=", "|", "&",
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Num(f64),
    Str(String),
    Template(Vec<RawPart>),
    Punct(&'static str),
    Eof,
}

/// Template literal piece before its expressions are parsed
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RawPart {
    Text(String),
    Expr(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub(crate) token: Token,
    pub(crate) line: usize,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

pub(crate) fn tokenize(src: &str) -> CompileResult<Vec<Spanned>> {
    let mut lexer = Lexer {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
    };
    let mut out = Vec::new();
    loop {
        lexer.skip_trivia()?;
        let line = lexer.line;
        let Some(c) = lexer.peek() else {
            out.push(Spanned {
                token: Token::Eof,
                line,
            });
            return Ok(out);
        };
        let token = if c.is_ascii_digit()
            || (c == '.' && lexer.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
        {
            lexer.number()?
        } else if c == '_' || c == '$' || c.is_alphabetic() {
            lexer.ident()
        } else if c == '\'' || c == '"' {
            lexer.string(c)?
        } else if c == '`' {
            lexer.template()?
        } else {
            lexer.punct()?
        };
        out.push(Spanned { token, line });
    }
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl std::fmt::Display) -> CompileError {
        CompileError::Syntax(format!("{message} at line {}", self.line))
    }

    fn skip_trivia(&mut self) -> CompileResult<()> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => return Err(self.error("unterminated comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn number(&mut self) -> CompileResult<Token> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.' || c == '_')
        {
            self.bump();
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        text.parse::<f64>()
            .map(Token::Num)
            .map_err(|_| self.error(format_args!("invalid number '{text}'")))
    }

    fn ident(&mut self) -> Token {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c == '_' || c == '$' || c.is_alphanumeric())
        {
            self.bump();
        }
        Token::Ident(self.chars[start..self.pos].iter().collect())
    }

    fn escape(&mut self) -> CompileResult<char> {
        let Some(c) = self.bump() else {
            return Err(self.error("unterminated escape"));
        };
        Ok(match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'v' => '\u{b}',
            'u' => {
                let mut code = String::new();
                if self.peek() == Some('{') {
                    self.bump();
                    while let Some(d) = self.bump() {
                        if d == '}' {
                            break;
                        }
                        code.push(d);
                    }
                } else {
                    for _ in 0..4 {
                        if let Some(d) = self.bump() {
                            code.push(d);
                        }
                    }
                }
                u32::from_str_radix(&code, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error(format_args!("invalid unicode escape '{code}'")))?
            }
            other => other,
        })
    }

    fn string(&mut self, quote: char) -> CompileResult<Token> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(Token::Str(out)),
                Some('\\') => out.push(self.escape()?),
                Some('\n') | None => return Err(self.error("unterminated string")),
                Some(c) => out.push(c),
            }
        }
    }

    fn template(&mut self) -> CompileResult<Token> {
        self.bump();
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('`') => break,
                Some('\\') => text.push(self.escape()?),
                Some('$') if self.peek() == Some('{') => {
                    self.bump();
                    if !text.is_empty() {
                        parts.push(RawPart::Text(std::mem::take(&mut text)));
                    }
                    parts.push(RawPart::Expr(self.template_expr()?));
                }
                Some(c) => text.push(c),
                None => return Err(self.error("unterminated template literal")),
            }
        }
        if !text.is_empty() {
            parts.push(RawPart::Text(text));
        }
        Ok(Token::Template(parts))
    }

    /// Source of a `${...}` hole, up to its matching brace
    fn template_expr(&mut self) -> CompileResult<String> {
        let mut depth = 0usize;
        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(self.error("unterminated template expression"));
            };
            match c {
                '{' => depth += 1,
                '}' if depth == 0 => return Ok(out),
                '}' => depth -= 1,
                '\'' | '"' | '`' => {
                    out.push(c);
                    loop {
                        let Some(inner) = self.bump() else {
                            return Err(self.error("unterminated string"));
                        };
                        out.push(inner);
                        if inner == '\\' {
                            if let Some(escaped) = self.bump() {
                                out.push(escaped);
                            }
                        } else if inner == c {
                            break;
                        }
                    }
                    continue;
                }
                _ => {}
            }
            out.push(c);
        }
    }

    fn punct(&mut self) -> CompileResult<Token> {
        for p in PUNCTUATORS {
            let matches = p
                .chars()
                .enumerate()
                .all(|(i, pc)| self.peek_at(i) == Some(pc));
            if matches {
                for _ in 0..p.len() {
                    self.bump();
                }
                return Ok(Token::Punct(p));
            }
        }
        let c = self.peek().unwrap_or('?');
        Err(self.error(format_args!("unexpected character '{c}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn arrow_and_operators() {
        assert_eq!(
            tokens("(a) => a === 1.5"),
            vec![
                Token::Punct("("),
                Token::Ident("a".into()),
                Token::Punct(")"),
                Token::Punct("=>"),
                Token::Ident("a".into()),
                Token::Punct("==="),
                Token::Num(1.5),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn strings_and_comments() {
        assert_eq!(
            tokens("'it\\'s' // trailing\n/* block */ \"x\\ty\""),
            vec![Token::Str("it's".into()), Token::Str("x\ty".into()), Token::Eof]
        );
    }

    #[test]
    fn template_parts() {
        assert_eq!(
            tokens("`echo ${config.name} {${ {a: 1}.a }}`"),
            vec![
                Token::Template(vec![
                    RawPart::Text("echo ".into()),
                    RawPart::Expr("config.name".into()),
                    RawPart::Text(" {".into()),
                    RawPart::Expr(" {a: 1}.a ".into()),
                    RawPart::Text("}".into()),
                ]),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = tokenize("a\nb\n'open").unwrap_err();
        assert_eq!(err, CompileError::Syntax("unterminated string at line 3".into()));
        assert!(tokenize("a # b").is_err());
    }
}
