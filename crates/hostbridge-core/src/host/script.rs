//! A small expression evaluator over the host object model.
//!
//! Supported: identifiers (resolved on the global object), `a.b` and `a[b]`
//! member access, calls with a receiver, `new` with or without arguments,
//! number/string/boolean/`null`/`undefined` literals, unary minus on numbers
//! and array literals. Enough to drive bindings the way host code would.

use super::object::PropertyKey;
use super::value::{HostValue, number_to_string};
use crate::context::ExecutionContext;
use crate::error::{BridgeError, BridgeResult, HostException};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Dot,
    Comma,
    Minus,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Semicolon,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Ident(String),
    Literal(HostValue),
    Array(Vec<Expr>),
    Member(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    New(Box<Expr>, Vec<Expr>),
    Negate(Box<Expr>),
}

fn script_error(offset: usize, message: impl Into<String>) -> BridgeError {
    BridgeError::Script {
        offset,
        message: message.into(),
    }
}

// ============================================================================
// Lexer
// ============================================================================

fn tokenize(source: &str) -> BridgeResult<Vec<(Token, usize)>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        let start = pos;
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => {
                pos += 1;
                continue;
            }
            b'.' if !bytes.get(pos + 1).is_some_and(u8::is_ascii_digit) => {
                tokens.push((Token::Dot, start));
                pos += 1;
            }
            b',' => {
                tokens.push((Token::Comma, start));
                pos += 1;
            }
            b'-' => {
                tokens.push((Token::Minus, start));
                pos += 1;
            }
            b'(' => {
                tokens.push((Token::LParen, start));
                pos += 1;
            }
            b')' => {
                tokens.push((Token::RParen, start));
                pos += 1;
            }
            b'[' => {
                tokens.push((Token::LBracket, start));
                pos += 1;
            }
            b']' => {
                tokens.push((Token::RBracket, start));
                pos += 1;
            }
            b';' => {
                tokens.push((Token::Semicolon, start));
                pos += 1;
            }
            b'\'' | b'"' => {
                let quote = c;
                pos += 1;
                let mut text = String::new();
                loop {
                    let Some(&b) = bytes.get(pos) else {
                        return Err(script_error(start, "unterminated string"));
                    };
                    if b == quote {
                        pos += 1;
                        break;
                    }
                    if b == b'\\' {
                        let escaped = source[pos + 1..]
                            .chars()
                            .next()
                            .ok_or_else(|| script_error(pos, "unterminated escape"))?;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            '0' => '\0',
                            other => other,
                        });
                        pos += 1 + escaped.len_utf8();
                        continue;
                    }
                    let ch = source[pos..]
                        .chars()
                        .next()
                        .ok_or_else(|| script_error(pos, "invalid character"))?;
                    text.push(ch);
                    pos += ch.len_utf8();
                }
                tokens.push((Token::Str(text), start));
            }
            b'0'..=b'9' | b'.' => {
                while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.' || bytes[pos] == b'_') {
                    pos += 1;
                }
                if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
                    pos += 1;
                    if pos < bytes.len() && (bytes[pos] == b'+' || bytes[pos] == b'-') {
                        pos += 1;
                    }
                    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
                let text: String = source[start..pos].chars().filter(|c| *c != '_').collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| script_error(start, format!("invalid number '{text}'")))?;
                tokens.push((Token::Number(n), start));
            }
            c if c.is_ascii_alphabetic() || c == b'_' || c == b'$' => {
                while pos < bytes.len()
                    && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_' || bytes[pos] == b'$')
                {
                    pos += 1;
                }
                tokens.push((Token::Ident(source[start..pos].to_string()), start));
            }
            _ => {
                let ch = source[pos..].chars().next().unwrap_or('?');
                return Err(script_error(start, format!("unexpected character '{ch}'")));
            }
        }
    }
    tokens.push((Token::Eof, source.len()));
    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> BridgeResult<()> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(script_error(
                self.offset(),
                format!("expected {expected:?}, found {:?}", self.peek()),
            ))
        }
    }

    fn parse_program(&mut self) -> BridgeResult<Expr> {
        let expr = self.parse_expression()?;
        while *self.peek() == Token::Semicolon {
            self.advance();
        }
        if *self.peek() != Token::Eof {
            return Err(script_error(
                self.offset(),
                format!("unexpected {:?}", self.peek()),
            ));
        }
        Ok(expr)
    }

    fn parse_expression(&mut self) -> BridgeResult<Expr> {
        if *self.peek() == Token::Minus {
            self.advance();
            return Ok(Expr::Negate(Box::new(self.parse_expression()?)));
        }
        let base = if matches!(self.peek(), Token::Ident(name) if name == "new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        self.parse_postfix(base, true)
    }

    fn parse_new(&mut self) -> BridgeResult<Expr> {
        self.advance();
        let callee = if matches!(self.peek(), Token::Ident(name) if name == "new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        let callee = self.parse_postfix(callee, false)?;
        let args = if *self.peek() == Token::LParen {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr::New(Box::new(callee), args))
    }

    fn parse_postfix(&mut self, mut expr: Expr, allow_calls: bool) -> BridgeResult<Expr> {
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let offset = self.offset();
                    let Token::Ident(name) = self.advance() else {
                        return Err(script_error(offset, "expected property name"));
                    };
                    expr = Expr::Member(Box::new(expr), Box::new(Expr::Literal(HostValue::string(&name))));
                }
                Token::LBracket => {
                    self.advance();
                    let key = self.parse_expression()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Member(Box::new(expr), Box::new(key));
                }
                Token::LParen if allow_calls => {
                    let args = self.parse_arguments()?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_arguments(&mut self) -> BridgeResult<Vec<Expr>> {
        self.expect(Token::LParen)?;
        let args = self.parse_list(Token::RParen)?;
        self.expect(Token::RParen)?;
        Ok(args)
    }

    fn parse_list(&mut self, close: Token) -> BridgeResult<Vec<Expr>> {
        let mut items = Vec::new();
        while *self.peek() != close {
            items.push(self.parse_expression()?);
            if *self.peek() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        Ok(items)
    }

    fn parse_primary(&mut self) -> BridgeResult<Expr> {
        let offset = self.offset();
        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(HostValue::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(HostValue::string(&s))),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(HostValue::Bool(true)),
                "false" => Expr::Literal(HostValue::Bool(false)),
                "null" => Expr::Literal(HostValue::Null),
                "undefined" => Expr::Literal(HostValue::Undefined),
                _ => Expr::Ident(name),
            }),
            Token::LParen => {
                let inner = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                let items = self.parse_list(Token::RBracket)?;
                self.expect(Token::RBracket)?;
                Ok(Expr::Array(items))
            }
            other => Err(script_error(offset, format!("unexpected {other:?}"))),
        }
    }
}

// ============================================================================
// Evaluation
// ============================================================================

fn to_key(cx: &ExecutionContext, value: HostValue) -> BridgeResult<PropertyKey> {
    Ok(match value {
        HostValue::String(s) => PropertyKey::String(s),
        HostValue::Symbol(id) => PropertyKey::Symbol(id),
        HostValue::Number(n) => PropertyKey::from(number_to_string(n).as_str()),
        HostValue::Bool(b) => PropertyKey::from(if b { "true" } else { "false" }),
        HostValue::Undefined => PropertyKey::from("undefined"),
        HostValue::Null => PropertyKey::from("null"),
        HostValue::Object(_) => {
            return Err(BridgeError::type_error(format!(
                "cannot use {} as a property key",
                cx.describe_value(&value)
            )));
        }
    })
}

fn eval(cx: &ExecutionContext, expr: &Expr) -> BridgeResult<HostValue> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => {
            let global = cx.global()?;
            if !cx.has(global, name.as_str())? {
                return Err(BridgeError::Thrown(HostException::reference_error(format!(
                    "{name} is not defined"
                ))));
            }
            cx.get_value(&HostValue::Object(cx.env.global), &PropertyKey::from(name.as_str()))
        }
        Expr::Array(items) => {
            let values = items
                .iter()
                .map(|item| eval(cx, item))
                .collect::<BridgeResult<Vec<_>>>()?;
            cx.scope(|inner: &ExecutionContext| {
                let handles = values
                    .into_iter()
                    .map(|value| inner.alloc(value))
                    .collect::<BridgeResult<Vec<_>>>()?;
                let array = inner.array(&handles)?;
                inner.value(array)
            })
        }
        Expr::Member(object, key) => {
            let object = eval(cx, object)?;
            let key = to_key(cx, eval(cx, key)?)?;
            cx.get_value(&object, &key)
        }
        Expr::Call(callee, args) => {
            let (this, function) = match callee.as_ref() {
                Expr::Member(object, key) => {
                    let this = eval(cx, object)?;
                    let key = to_key(cx, eval(cx, key)?)?;
                    let function = cx.get_value(&this, &key)?;
                    (this, function)
                }
                other => (HostValue::Undefined, eval(cx, other)?),
            };
            let args = args
                .iter()
                .map(|arg| eval(cx, arg))
                .collect::<BridgeResult<Vec<_>>>()?;
            cx.call_value(function, this, args, None)
        }
        Expr::New(callee, args) => {
            let callee = eval(cx, callee)?;
            let args = args
                .iter()
                .map(|arg| eval(cx, arg))
                .collect::<BridgeResult<Vec<_>>>()?;
            cx.construct_value(callee, args)
        }
        Expr::Negate(inner) => match eval(cx, inner)? {
            HostValue::Number(n) => Ok(HostValue::Number(-n)),
            other => Err(BridgeError::type_error(format!(
                "cannot negate {}",
                cx.describe_value(&other)
            ))),
        },
    }
}

/// Parse and evaluate `source` in the context's environment.
pub(crate) fn evaluate(cx: &ExecutionContext, source: &str) -> BridgeResult<HostValue> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_program()?;
    tracing::trace!(source, "evaluating host expression");
    eval(cx, &expr)
}
