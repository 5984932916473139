// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Predicate evaluation against row keys.
//!
//! Comparisons involving NULL are false (SQL three-valued logic collapsed to
//! false); only `IS NULL` / `IS NOT NULL` test for it.

use super::parser::{Expression, Operand, Operator};
use super::PredicateError;
use crate::event::{RowKey, Value};
use std::borrow::Cow;
use std::cmp::Ordering;

pub(crate) fn evaluate(expr: &Expression, row: &RowKey) -> Result<bool, PredicateError> {
    match expr {
        Expression::True => Ok(true),

        Expression::Comparison { left, op, right } => {
            let l = resolve(left, row)?;
            let r = resolve(right, row)?;
            compare(&l, *op, &r)
        }

        Expression::In { operand, list } => {
            let value = resolve(operand, row)?;
            for candidate in list {
                let candidate = resolve(candidate, row)?;
                if compare(&value, Operator::Eq, &candidate)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }

        Expression::IsNull { operand, negated } => {
            let value = resolve(operand, row)?;
            Ok(value.is_null() != *negated)
        }

        Expression::And(left, right) => {
            if !evaluate(left, row)? {
                return Ok(false);
            }
            evaluate(right, row)
        }

        Expression::Or(left, right) => {
            if evaluate(left, row)? {
                return Ok(true);
            }
            evaluate(right, row)
        }

        Expression::Not(inner) => Ok(!evaluate(inner, row)?),
    }
}

fn resolve<'a>(operand: &'a Operand, row: &'a RowKey) -> Result<Cow<'a, Value>, PredicateError> {
    Ok(match operand {
        Operand::Integer(n) => Cow::Owned(Value::Int(*n)),
        Operand::Float(f) => Cow::Owned(Value::Float(*f)),
        Operand::String(s) => Cow::Owned(Value::Str(s.clone())),
        Operand::Boolean(b) => Cow::Owned(Value::Bool(*b)),
        Operand::Null => Cow::Owned(Value::Null),
        Operand::Field(name) => Cow::Borrowed(
            row.get(name)
                .ok_or_else(|| PredicateError::UnknownField(name.clone()))?,
        ),
    })
}

fn compare(left: &Value, op: Operator, right: &Value) -> Result<bool, PredicateError> {
    if left.is_null() || right.is_null() {
        return Ok(false);
    }

    if op == Operator::Like {
        return match (left, right) {
            (Value::Str(text), Value::Str(pattern)) => Ok(like_match(text, pattern)),
            _ => Err(PredicateError::TypeMismatch(
                "LIKE requires string operands".to_string(),
            )),
        };
    }

    match (left, right) {
        (Value::Int(a), Value::Int(b))
        | (Value::Timestamp(a), Value::Timestamp(b))
        | (Value::Timestamp(a), Value::Int(b))
        | (Value::Int(a), Value::Timestamp(b)) => Ok(apply(a.cmp(b), op)),
        (Value::Float(a), Value::Float(b)) => Ok(compare_float(*a, op, *b)),
        (Value::Int(a), Value::Float(b)) => Ok(compare_float(*a as f64, op, *b)),
        (Value::Float(a), Value::Int(b)) => Ok(compare_float(*a, op, *b as f64)),
        (Value::Str(a), Value::Str(b)) => Ok(apply(a.cmp(b), op)),
        (Value::Bool(a), Value::Bool(b)) => equality_only(a == b, op, "Boolean"),
        (Value::Bytes(a), Value::Bytes(b)) => equality_only(a == b, op, "Bytes"),
        _ => Err(PredicateError::TypeMismatch(format!(
            "cannot compare {} with {}",
            left, right
        ))),
    }
}

fn apply(ordering: Ordering, op: Operator) -> bool {
    match op {
        Operator::Gt => ordering == Ordering::Greater,
        Operator::Lt => ordering == Ordering::Less,
        Operator::Ge => ordering != Ordering::Less,
        Operator::Le => ordering != Ordering::Greater,
        Operator::Eq => ordering == Ordering::Equal,
        Operator::Ne => ordering != Ordering::Equal,
        Operator::Like => false,
    }
}

fn equality_only(equal: bool, op: Operator, kind: &str) -> Result<bool, PredicateError> {
    match op {
        Operator::Eq => Ok(equal),
        Operator::Ne => Ok(!equal),
        _ => Err(PredicateError::TypeMismatch(format!(
            "{} only supports = and <>",
            kind
        ))),
    }
}

fn compare_float(a: f64, op: Operator, b: f64) -> bool {
    const EPSILON: f64 = 1e-9;
    match op {
        Operator::Gt => a > b,
        Operator::Lt => a < b,
        Operator::Ge => a >= b || (a - b).abs() < EPSILON,
        Operator::Le => a <= b || (a - b).abs() < EPSILON,
        Operator::Eq => (a - b).abs() < EPSILON,
        Operator::Ne => (a - b).abs() >= EPSILON,
        Operator::Like => false,
    }
}

/// SQL LIKE: `%` matches any run (including empty), `_` exactly one char.
fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    // iterative matcher with single backtrack point
    let (mut t, mut p) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '%')
}
