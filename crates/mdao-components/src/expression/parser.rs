//! Expression parsing using recursive descent.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! additive       := multiplicative (('+' | '-') multiplicative)*
//! multiplicative := unary (('*' | '/') unary)*
//! unary          := ('-' | '+') unary | power
//! power          := primary (('**' | '^') unary)?
//! primary        := number | name | name '(' args ')' | '(' additive ')'
//! ```

use std::f64::consts::{E, PI};

use super::ast::{BinaryOp, Equation, Expr, UnaryOp};
use super::functions::Function;
use crate::error::{Error, Result};

/// Parse a mathematical expression from a string.
pub fn parse_expression(input: &str) -> Result<Expr> {
    let mut parser = ExprParser::new(input);
    parser.parse()
}

/// Parse `output = expression`.
pub fn parse_equation(input: &str) -> Result<Equation> {
    let Some((lhs, rhs)) = input.split_once('=') else {
        return Err(Error::Parse {
            expr: input.to_string(),
            pos: input.len(),
            msg: "expected 'output = expression'".to_string(),
        });
    };
    let output = lhs.trim();
    if !is_identifier(output) {
        return Err(Error::Parse {
            expr: input.to_string(),
            pos: 0,
            msg: format!("'{}' is not a valid output name", output),
        });
    }
    let expr = parse_expression(rhs).map_err(|err| match err {
        Error::Parse { pos, msg, .. } => Error::Parse {
            expr: input.to_string(),
            pos: pos + lhs.len() + 1,
            msg,
        },
        other => other,
    })?;
    Ok(Equation {
        output: output.to_string(),
        expr,
    })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Expression parser using recursive descent.
struct ExprParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> ExprParser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn error(&self, msg: impl Into<String>) -> Error {
        Error::Parse {
            expr: self.input.to_string(),
            pos: self.pos,
            msg: msg.into(),
        }
    }

    fn parse(&mut self) -> Result<Expr> {
        self.skip_whitespace();
        let expr = self.parse_additive()?;
        self.skip_whitespace();
        match self.peek() {
            None => Ok(expr),
            Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.as_bytes().get(self.pos).map(|&b| b as char)
    }

    fn advance(&mut self) {
        if self.pos < self.input.len() {
            self.pos += 1;
        }
    }

    fn check_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;

        loop {
            self.skip_whitespace();
            let op = match self.peek() {
                Some('+') => BinaryOp::Add,
                Some('-') => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;

        loop {
            self.skip_whitespace();
            let op = match self.peek() {
                Some('*') if !self.check_str("**") => BinaryOp::Mul,
                Some('/') => BinaryOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        self.skip_whitespace();
        match self.peek() {
            Some('-') => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(match operand {
                    Expr::Constant(v) => Expr::Constant(-v),
                    operand => Expr::UnaryOp {
                        op: UnaryOp::Neg,
                        operand: Box::new(operand),
                    },
                })
            }
            Some('+') => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;

        self.skip_whitespace();
        if self.check_str("**") || self.peek() == Some('^') {
            if self.peek() == Some('*') {
                self.advance();
            }
            self.advance();
            // Right associative; binds tighter than a unary minus on its left.
            let exp = self.parse_unary()?;
            Ok(Expr::BinaryOp {
                op: BinaryOp::Pow,
                left: Box::new(base),
                right: Box::new(exp),
            })
        } else {
            Ok(base)
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        self.skip_whitespace();

        match self.peek() {
            Some('(') => {
                self.advance();
                let expr = self.parse_additive()?;
                self.skip_whitespace();
                if self.peek() != Some(')') {
                    return Err(self.error("expected ')'"));
                }
                self.advance();
                Ok(expr)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.parse_number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.parse_identifier(),
            Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn parse_number(&mut self) -> Result<Expr> {
        let start = self.pos;
        let mut has_dot = false;
        let mut has_exp = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.advance();
            } else if c == '.' && !has_dot && !has_exp {
                has_dot = true;
                self.advance();
            } else if (c == 'e' || c == 'E') && !has_exp {
                has_exp = true;
                self.advance();
                if self.peek() == Some('+') || self.peek() == Some('-') {
                    self.advance();
                }
            } else {
                break;
            }
        }

        let num_str = &self.input[start..self.pos];
        if matches!(self.peek(), Some(c) if c.is_ascii_alphabetic() || c == '_') {
            return Err(self.error(format!("unexpected name after number '{}'", num_str)));
        }
        let value: f64 = num_str
            .parse()
            .map_err(|_| self.error(format!("invalid number '{}'", num_str)))?;
        Ok(Expr::Constant(value))
    }

    fn parse_identifier(&mut self) -> Result<Expr> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        let ident = &self.input[start..self.pos];

        self.skip_whitespace();
        if self.peek() == Some('(') {
            let func = Function::from_name(ident)
                .ok_or_else(|| Error::UnknownFunction(ident.to_string()))?;
            self.advance();
            let args = self.parse_function_args()?;
            let arity_ok = match func.arity() {
                Some(n) => args.len() == n,
                None => !args.is_empty(),
            };
            if !arity_ok {
                return Err(Error::Arity {
                    name: func.name().to_string(),
                    expected: func.arity().unwrap_or(1),
                    actual: args.len(),
                });
            }
            return Ok(Expr::Function { func, args });
        }

        match ident {
            "pi" => Ok(Expr::Constant(PI)),
            "e" => Ok(Expr::Constant(E)),
            _ => Ok(Expr::Variable(ident.to_string())),
        }
    }

    fn parse_function_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();

        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.advance();
            return Ok(args);
        }

        loop {
            let arg = self.parse_additive()?;
            args.push(arg);

            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.advance();
                }
                Some(')') => {
                    self.advance();
                    break;
                }
                _ => return Err(self.error("expected ',' or ')' in function arguments")),
            }
        }

        Ok(args)
    }
}
