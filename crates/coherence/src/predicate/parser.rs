// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Predicate expression parser.
//!
//! Parses SQL-like row predicates into an AST.

use super::PredicateError;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Greater than (>)
    Gt,
    /// Less than (<)
    Lt,
    /// Greater than or equal (>=)
    Ge,
    /// Less than or equal (<=)
    Le,
    /// Equal (= or ==)
    Eq,
    /// Not equal (<> or !=)
    Ne,
    /// LIKE pattern matching
    Like,
}

/// Operand of a comparison: a literal or a field of the row key.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    Field(String),
}

/// Parsed predicate AST node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// left op right
    Comparison {
        left: Operand,
        op: Operator,
        right: Operand,
    },
    /// operand IN (v1, v2, ...)
    In { operand: Operand, list: Vec<Operand> },
    /// operand IS [NOT] NULL
    IsNull { operand: Operand, negated: bool },
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    /// Matches every row.
    True,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Identifier(String),
    Integer(i64),
    Float(f64),
    String(String),
    Operator(Operator),
    And,
    Or,
    Not,
    In,
    Is,
    Null,
    True,
    False,
    Comma,
    LParen,
    RParen,
    Eof,
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn next_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek_char(), Some(ch) if ch.is_whitespace()) {
            self.next_char();
        }
    }

    fn read_identifier(&mut self) -> &'a str {
        let start = self.pos;
        while matches!(self.peek_char(), Some(ch) if ch.is_alphanumeric() || ch == '_' || ch == '.')
        {
            self.next_char();
        }
        let input = self.input;
        &input[start..self.pos]
    }

    fn read_number(&mut self) -> Result<Token, PredicateError> {
        let start = self.pos;
        let mut has_dot = false;

        if self.peek_char() == Some('-') {
            self.next_char();
        }

        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_digit() {
                self.next_char();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.next_char();
            } else {
                break;
            }
        }

        let text = &self.input[start..self.pos];
        if has_dot {
            text.parse()
                .map(Token::Float)
                .map_err(|_| PredicateError::Parse(format!("invalid number '{}'", text)))
        } else {
            text.parse()
                .map(Token::Integer)
                .map_err(|_| PredicateError::Parse(format!("invalid number '{}'", text)))
        }
    }

    // Single-quoted, '' escapes a quote.
    fn read_string(&mut self) -> Result<String, PredicateError> {
        self.next_char();
        let mut out = String::new();

        while let Some(ch) = self.next_char() {
            if ch == '\'' {
                if self.peek_char() == Some('\'') {
                    self.next_char();
                    out.push('\'');
                    continue;
                }
                return Ok(out);
            }
            out.push(ch);
        }

        Err(PredicateError::Parse("unterminated string".to_string()))
    }

    fn next_token(&mut self) -> Result<Token, PredicateError> {
        self.skip_whitespace();

        let ch = match self.peek_char() {
            Some(c) => c,
            None => return Ok(Token::Eof),
        };

        match ch {
            '>' => {
                self.next_char();
                if self.peek_char() == Some('=') {
                    self.next_char();
                    return Ok(Token::Operator(Operator::Ge));
                }
                return Ok(Token::Operator(Operator::Gt));
            }
            '<' => {
                self.next_char();
                if self.peek_char() == Some('=') {
                    self.next_char();
                    return Ok(Token::Operator(Operator::Le));
                }
                if self.peek_char() == Some('>') {
                    self.next_char();
                    return Ok(Token::Operator(Operator::Ne));
                }
                return Ok(Token::Operator(Operator::Lt));
            }
            '=' => {
                self.next_char();
                if self.peek_char() == Some('=') {
                    self.next_char();
                }
                return Ok(Token::Operator(Operator::Eq));
            }
            '!' => {
                self.next_char();
                if self.peek_char() == Some('=') {
                    self.next_char();
                    return Ok(Token::Operator(Operator::Ne));
                }
                return Err(PredicateError::Parse("expected '=' after '!'".to_string()));
            }
            '(' => {
                self.next_char();
                return Ok(Token::LParen);
            }
            ')' => {
                self.next_char();
                return Ok(Token::RParen);
            }
            ',' => {
                self.next_char();
                return Ok(Token::Comma);
            }
            '\'' => return self.read_string().map(Token::String),
            _ => {}
        }

        if ch.is_ascii_digit()
            || (ch == '-' && self.input[self.pos + 1..].starts_with(|c: char| c.is_ascii_digit()))
        {
            return self.read_number();
        }

        if ch.is_alphabetic() || ch == '_' {
            let ident = self.read_identifier();
            return Ok(match ident.to_ascii_uppercase().as_str() {
                "AND" => Token::And,
                "OR" => Token::Or,
                "NOT" => Token::Not,
                "IN" => Token::In,
                "IS" => Token::Is,
                "NULL" => Token::Null,
                "TRUE" => Token::True,
                "FALSE" => Token::False,
                "LIKE" => Token::Operator(Operator::Like),
                _ => Token::Identifier(ident.to_string()),
            });
        }

        Err(PredicateError::Parse(format!(
            "unexpected character '{}' at offset {}",
            ch, self.pos
        )))
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, PredicateError> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Self { lexer, current })
    }

    fn advance(&mut self) -> Result<(), PredicateError> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), PredicateError> {
        if self.current != token {
            return Err(PredicateError::Parse(format!(
                "expected {}, got {:?}",
                what, self.current
            )));
        }
        self.advance()
    }

    fn parse_or(&mut self) -> Result<Expression, PredicateError> {
        let mut left = self.parse_and()?;

        while self.current == Token::Or {
            self.advance()?;
            let right = self.parse_and()?;
            left = Expression::Or(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, PredicateError> {
        let mut left = self.parse_not()?;

        while self.current == Token::And {
            self.advance()?;
            let right = self.parse_not()?;
            left = Expression::And(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expression, PredicateError> {
        if self.current == Token::Not {
            self.advance()?;
            let expr = self.parse_not()?;
            return Ok(Expression::Not(Box::new(expr)));
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expression, PredicateError> {
        if self.current == Token::LParen {
            self.advance()?;
            let expr = self.parse_or()?;
            self.expect(Token::RParen, "closing parenthesis")?;
            return Ok(expr);
        }

        // bare TRUE selects everything
        if self.current == Token::True {
            self.advance()?;
            if matches!(self.current, Token::Eof | Token::RParen | Token::And | Token::Or) {
                return Ok(Expression::True);
            }
            return self.parse_predicate_tail(Operand::Boolean(true));
        }

        let left = self.parse_operand()?;
        self.parse_predicate_tail(left)
    }

    fn parse_predicate_tail(&mut self, left: Operand) -> Result<Expression, PredicateError> {
        match self.current.clone() {
            Token::Operator(op) => {
                self.advance()?;
                let right = self.parse_operand()?;
                Ok(Expression::Comparison { left, op, right })
            }
            Token::In => {
                self.advance()?;
                self.expect(Token::LParen, "'(' after IN")?;
                let mut list = vec![self.parse_operand()?];
                while self.current == Token::Comma {
                    self.advance()?;
                    list.push(self.parse_operand()?);
                }
                self.expect(Token::RParen, "')' closing IN list")?;
                Ok(Expression::In {
                    operand: left,
                    list,
                })
            }
            Token::Is => {
                self.advance()?;
                let negated = if self.current == Token::Not {
                    self.advance()?;
                    true
                } else {
                    false
                };
                self.expect(Token::Null, "NULL after IS")?;
                Ok(Expression::IsNull {
                    operand: left,
                    negated,
                })
            }
            other => Err(PredicateError::Parse(format!(
                "expected operator, got {:?}",
                other
            ))),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, PredicateError> {
        let operand = match &self.current {
            Token::Identifier(name) => Operand::Field(name.clone()),
            Token::Integer(n) => Operand::Integer(*n),
            Token::Float(f) => Operand::Float(*f),
            Token::String(s) => Operand::String(s.clone()),
            Token::True => Operand::Boolean(true),
            Token::False => Operand::Boolean(false),
            Token::Null => Operand::Null,
            _ => {
                return Err(PredicateError::Parse(format!(
                    "expected value, got {:?}",
                    self.current
                )))
            }
        };

        self.advance()?;
        Ok(operand)
    }
}

/// Parse a predicate string into an AST.
pub fn parse_expression(expression: &str) -> Result<Expression, PredicateError> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(PredicateError::EmptyExpression);
    }

    let mut parser = Parser::new(trimmed)?;
    let expr = parser.parse_or()?;
    if parser.current != Token::Eof {
        return Err(PredicateError::Parse(format!(
            "trailing input at {:?}",
            parser.current
        )));
    }
    Ok(expr)
}
