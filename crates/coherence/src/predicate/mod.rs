// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Row predicates.
//!
//! Mass-delete events and predicate-scoped interest registrations carry a
//! [`Predicate`]: an SQL-like boolean expression over row-key fields. The
//! expression text is what travels on the wire; it is re-parsed on receipt.
//!
//! # Supported Syntax
//!
//! ```text
//! expression ::= condition
//!              | expression AND expression
//!              | expression OR expression
//!              | NOT expression
//!              | '(' expression ')'
//!              | TRUE
//!
//! condition  ::= operand operator operand
//!              | operand IN '(' operand (',' operand)* ')'
//!              | operand IS [NOT] NULL
//!
//! operator   ::= '>' | '<' | '>=' | '<=' | '=' | '<>' | '!=' | LIKE
//! operand    ::= field | integer | float | 'string' | TRUE | FALSE | NULL
//! ```

mod evaluator;
mod parser;

pub use parser::{parse_expression, Expression, Operand, Operator};

use crate::event::RowKey;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Predicate parse/evaluation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredicateError {
    #[error("empty predicate expression")]
    EmptyExpression,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

/// Parsed row predicate. Equality is by expression text.
#[derive(Clone)]
pub struct Predicate {
    text: Arc<str>,
    expression: Arc<Expression>,
}

impl Predicate {
    /// Parse a predicate from its text form.
    pub fn parse(text: &str) -> Result<Self, PredicateError> {
        let expression = parse_expression(text)?;
        Ok(Self {
            text: Arc::from(text),
            expression: Arc::new(expression),
        })
    }

    /// Predicate matching every row.
    pub fn all() -> Self {
        Self {
            text: Arc::from("TRUE"),
            expression: Arc::new(Expression::True),
        }
    }

    /// Expression text, exactly as parsed.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    /// Strict evaluation: unknown fields and type mismatches are errors.
    pub fn evaluate(&self, row: &RowKey) -> Result<bool, PredicateError> {
        evaluator::evaluate(&self.expression, row)
    }

    /// Lenient evaluation used during dispatch: errors count as "no match".
    pub fn matches(&self, row: &RowKey) -> bool {
        match self.evaluate(row) {
            Ok(matched) => matched,
            Err(e) => {
                log::debug!("[PREDICATE] '{}' on {}: {}", self.text, row, e);
                false
            }
        }
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&&*self.text).finish()
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl std::str::FromStr for Predicate {
    type Err = PredicateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_is_lenient() {
        let p = Predicate::parse("region = 'emea'").unwrap();
        assert!(p.matches(&RowKey::new().with("region", "emea")));
        assert!(!p.matches(&RowKey::new().with("id", 1)));
        assert!(p.evaluate(&RowKey::new().with("id", 1)).is_err());
    }

    #[test]
    fn test_all() {
        let p = Predicate::all();
        assert!(p.matches(&RowKey::new()));
        assert_eq!(p, Predicate::parse("TRUE").unwrap());
    }

    #[test]
    fn test_from_str_and_display() {
        let p: Predicate = "id IN (1, 2)".parse().unwrap();
        assert_eq!(p.to_string(), "id IN (1, 2)");
        assert!("".parse::<Predicate>().is_err());
    }
}
