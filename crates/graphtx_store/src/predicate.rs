//! Predicate trees and row ranges.
//!
//! A [`Predicate`] is what a query translator produces from a query string
//! and its bound parameters. Stores evaluate it against stored rows.

use crate::value::{Fields, Identity, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Comparison operator for [`Predicate::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        }
    }
}

/// A boolean filter over the fields of one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    /// Matches every row.
    True,
    /// `field <op> value`. Nulls and mismatched types never compare.
    Compare {
        /// Field name.
        field: String,
        /// Operator.
        op: CompareOp,
        /// Right-hand operand.
        value: Value,
    },
    /// Field is null or missing.
    IsNull(String),
    /// Field value is one of the listed values.
    In(String, Vec<Value>),
    /// Reference field (1:1 or collection) points at the identity.
    RefersTo(String, Identity),
    /// All sub-predicates hold.
    And(Vec<Predicate>),
    /// At least one sub-predicate holds.
    Or(Vec<Predicate>),
    /// Negation.
    Not(Box<Predicate>),
}

impl Predicate {
    /// `field = value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    /// `field <op> value`
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Reference field points at `target`.
    pub fn refers_to(field: impl Into<String>, target: Identity) -> Self {
        Predicate::RefersTo(field.into(), target)
    }

    /// Conjunction, flattening nested `And`s.
    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::True, p) | (p, Predicate::True) => p,
            (Predicate::And(mut a), Predicate::And(b)) => {
                a.extend(b);
                Predicate::And(a)
            }
            (Predicate::And(mut a), p) => {
                a.push(p);
                Predicate::And(a)
            }
            (p, q) => Predicate::And(vec![p, q]),
        }
    }

    /// Evaluates the predicate against a row's fields.
    #[must_use]
    pub fn matches(&self, fields: &Fields) -> bool {
        match self {
            Predicate::True => true,
            Predicate::Compare { field, op, value } => fields
                .get(field)
                .and_then(|actual| compare_values(actual, value))
                .is_some_and(|ord| op.holds(ord)),
            Predicate::IsNull(field) => fields.get(field).map_or(true, Value::is_null),
            Predicate::In(field, values) => fields
                .get(field)
                .is_some_and(|actual| !actual.is_null() && values.contains(actual)),
            Predicate::RefersTo(field, target) => {
                fields.get(field).is_some_and(|v| v.refers_to(target))
            }
            Predicate::And(preds) => preds.iter().all(|p| p.matches(fields)),
            Predicate::Or(preds) => preds.iter().any(|p| p.matches(fields)),
            Predicate::Not(p) => !p.matches(fields),
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(y)),
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Bytes(x), Value::Bytes(y)) => Some(x.cmp(y)),
        (Value::Uuid(x), Value::Uuid(y)) => Some(x.cmp(y)),
        (Value::Ref(x), Value::Ref(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// A zero-based, inclusive window over query results.
///
/// `start = None` means "from the first row", `end = None` means "to the
/// last row". Validation of `start > end` is the caller's job; a window
/// with `start > end` simply selects nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowRange {
    /// First row index to return.
    pub start: Option<u64>,
    /// Last row index to return.
    pub end: Option<u64>,
}

impl RowRange {
    /// The unbounded range.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    /// A range with optional bounds.
    #[must_use]
    pub const fn new(start: Option<u64>, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// Returns true when neither bound is set.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Returns the slice bounds this range selects from `len` rows.
    #[must_use]
    pub fn window(&self, len: usize) -> std::ops::Range<usize> {
        let start = self
            .start
            .map_or(0, |s| usize::try_from(s).unwrap_or(usize::MAX))
            .min(len);
        let end = self
            .end
            .map_or(len, |e| usize::try_from(e).map_or(len, |e| e.saturating_add(1)))
            .min(len);
        start..end.max(start)
    }

    /// Applies the window to an ordered buffer.
    #[must_use]
    pub fn apply<T>(&self, mut rows: Vec<T>) -> Vec<T> {
        let window = self.window(rows.len());
        rows.truncate(window.end);
        rows.drain(..window.start);
        rows
    }
}
