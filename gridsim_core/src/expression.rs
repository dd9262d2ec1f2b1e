//! Constraint condition language.
//!
//! Conditions are small boolean expressions over sampled variables and the
//! game state, e.g. `field_position >= 80 && completion_rate > 0.4`.
//!
//! ## Precedence Levels (lowest to highest)
//!
//! 1. `||` - left associative, short-circuit
//! 2. `&&` - left associative, short-circuit
//! 3. `==`, `!=`, `<`, `<=`, `>`, `>=`
//! 4. `+`, `-`
//! 5. `*`, `/`, `%`
//! 6. Unary `-`, `!`
//!
//! Booleans are numbers: `true` is 1.0, `false` is 0.0, and a condition
//! holds when it evaluates to a non-zero value.

use crate::error::ExprError;

/// Lexical token.
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    True,
    False,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Not,
    And,
    Or,
    EqEq,
    BangEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Parsed condition AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Name resolution for evaluation.
pub trait Bindings {
    fn lookup(&self, name: &str) -> Option<f64>;
}

impl<F> Bindings for F
where
    F: Fn(&str) -> Option<f64>,
{
    fn lookup(&self, name: &str) -> Option<f64> {
        self(name)
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos] as char;
        let start = pos;

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && bytes.get(pos + 1).is_some_and(|b| b.is_ascii_digit())) {
            while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                pos += 1;
            }
            let text = &source[start..pos];
            let value = text
                .parse::<f64>()
                .map_err(|_| ExprError::parse(start, format!("invalid number '{}'", text)))?;
            tokens.push((Token::Number(value), start));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_' || bytes[pos] == b'.') {
                pos += 1;
            }
            let word = &source[start..pos];
            let token = match word {
                "true" => Token::True,
                "false" => Token::False,
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                _ => Token::Ident(word.to_string()),
            };
            tokens.push((token, start));
            continue;
        }

        let next = bytes.get(pos + 1).map(|b| *b as char);
        let (token, width) = match (c, next) {
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::BangEq, 2),
            ('<', Some('=')) => (Token::LtEq, 2),
            ('>', Some('=')) => (Token::GtEq, 2),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('!', _) => (Token::Not, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            _ => return Err(ExprError::parse(start, format!("unexpected character '{}'", c))),
        };
        tokens.push((token, start));
        pos += width;
    }

    Ok(tokens)
}

/// Token stream with one token of lookahead.
struct TokenStream {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl TokenStream {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, o)| *o).unwrap_or(self.end)
    }
}

/// Returns (precedence, op); all binary operators are left associative.
fn binary_op_info(token: &Token) -> Option<(u8, BinaryOp)> {
    match token {
        Token::Or => Some((10, BinaryOp::Or)),
        Token::And => Some((20, BinaryOp::And)),
        Token::EqEq => Some((30, BinaryOp::Eq)),
        Token::BangEq => Some((30, BinaryOp::Ne)),
        Token::Lt => Some((30, BinaryOp::Lt)),
        Token::LtEq => Some((30, BinaryOp::Le)),
        Token::Gt => Some((30, BinaryOp::Gt)),
        Token::GtEq => Some((30, BinaryOp::Ge)),
        Token::Plus => Some((40, BinaryOp::Add)),
        Token::Minus => Some((40, BinaryOp::Sub)),
        Token::Star => Some((50, BinaryOp::Mul)),
        Token::Slash => Some((50, BinaryOp::Div)),
        Token::Percent => Some((50, BinaryOp::Mod)),
        _ => None,
    }
}

fn parse_pratt(stream: &mut TokenStream, min_prec: u8) -> Result<Expr, ExprError> {
    let mut left = parse_prefix(stream)?;

    while let Some((prec, op)) = stream.peek().and_then(binary_op_info) {
        if prec < min_prec {
            break;
        }
        stream.advance();
        let right = parse_pratt(stream, prec + 1)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }

    Ok(left)
}

fn parse_prefix(stream: &mut TokenStream) -> Result<Expr, ExprError> {
    let offset = stream.offset();
    match stream.advance() {
        Some(Token::Number(v)) => Ok(Expr::Number(v)),
        Some(Token::True) => Ok(Expr::Number(1.0)),
        Some(Token::False) => Ok(Expr::Number(0.0)),
        Some(Token::Ident(name)) => Ok(Expr::Ident(name)),
        Some(Token::Minus) => Ok(Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(parse_prefix(stream)?),
        }),
        Some(Token::Not) => Ok(Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(parse_prefix(stream)?),
        }),
        Some(Token::LParen) => {
            let inner = parse_pratt(stream, 0)?;
            match stream.advance() {
                Some(Token::RParen) => Ok(inner),
                _ => Err(ExprError::parse(stream.offset(), "expected ')'")),
            }
        }
        Some(other) => Err(ExprError::parse(offset, format!("unexpected token {:?}", other))),
        None => Err(ExprError::parse(offset, "unexpected end of expression")),
    }
}

impl Expr {
    /// Parses a condition.
    pub fn parse(source: &str) -> Result<Expr, ExprError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExprError::parse(0, "empty expression"));
        }

        let mut stream = TokenStream {
            tokens,
            pos: 0,
            end: source.len(),
        };
        let expr = parse_pratt(&mut stream, 0)?;

        if stream.peek().is_some() {
            return Err(ExprError::parse(stream.offset(), "trailing input"));
        }
        Ok(expr)
    }

    /// Evaluates to a number.
    pub fn eval(&self, bindings: &dyn Bindings) -> Result<f64, ExprError> {
        match self {
            Expr::Number(v) => Ok(*v),
            Expr::Ident(name) => bindings
                .lookup(name)
                .ok_or_else(|| ExprError::UnknownIdentifier(name.clone())),
            Expr::Unary { op, operand } => {
                let v = operand.eval(bindings)?;
                Ok(match op {
                    UnaryOp::Neg => -v,
                    UnaryOp::Not => truth(v == 0.0),
                })
            }
            Expr::Binary { op, left, right } => {
                let l = left.eval(bindings)?;
                match op {
                    BinaryOp::And if l == 0.0 => return Ok(0.0),
                    BinaryOp::Or if l != 0.0 => return Ok(1.0),
                    _ => {}
                }
                let r = right.eval(bindings)?;
                Ok(match op {
                    BinaryOp::And | BinaryOp::Or => truth(r != 0.0),
                    BinaryOp::Eq => truth(l == r),
                    BinaryOp::Ne => truth(l != r),
                    BinaryOp::Lt => truth(l < r),
                    BinaryOp::Le => truth(l <= r),
                    BinaryOp::Gt => truth(l > r),
                    BinaryOp::Ge => truth(l >= r),
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                    BinaryOp::Mod => l % r,
                })
            }
        }
    }

    /// Evaluates as a condition.
    pub fn holds(&self, bindings: &dyn Bindings) -> Result<bool, ExprError> {
        Ok(self.eval(bindings)? != 0.0)
    }

    /// Every identifier the expression references.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Ident(name) => out.push(name),
            Expr::Unary { operand, .. } => operand.collect_identifiers(out),
            Expr::Binary { left, right, .. } => {
                left.collect_identifiers(out);
                right.collect_identifiers(out);
            }
        }
    }
}

fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}
