//! Snapshot filters.
//!
//! A filter scopes which persisted records a reconciliation considers. It is
//! either an opaque predicate, evaluated in-process, or a declarative
//! [`Expr`] that adapters can translate into their query language.

use crate::Entity;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Comparison operator for a declarative filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// SQL spelling of the operator.
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    fn accepts(&self, ord: Ordering) -> bool {
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

/// Declarative filter over top-level record fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Expr {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Expr::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut parts) => {
                parts.push(other);
                Expr::And(parts)
            }
            first => Expr::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut parts) => {
                parts.push(other);
                Expr::Or(parts)
            }
            first => Expr::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Evaluate against a field lookup.
    ///
    /// A missing field or a type mismatch never satisfies an ordering
    /// comparison or `Eq`; `Ne` holds whenever `Eq` does not.
    pub fn evaluate(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> bool {
        match self {
            Expr::Compare { field, op, value } => {
                let actual = lookup(field);
                match op {
                    CompareOp::Eq => actual.as_ref().is_some_and(|a| json_eq(a, value)),
                    CompareOp::Ne => !actual.as_ref().is_some_and(|a| json_eq(a, value)),
                    _ => actual
                        .as_ref()
                        .and_then(|a| json_cmp(a, value))
                        .is_some_and(|ord| op.accepts(ord)),
                }
            }
            Expr::And(parts) => parts.iter().all(|p| p.evaluate(lookup)),
            Expr::Or(parts) => parts.iter().any(|p| p.evaluate(lookup)),
            Expr::Not(inner) => !inner.evaluate(lookup),
        }
    }
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => number_cmp(x, y) == Some(Ordering::Equal),
        _ => a == b,
    }
}

fn json_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => number_cmp(x, y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Integers compare exactly; floats only when either side is one.
fn number_cmp(x: &Number, y: &Number) -> Option<Ordering> {
    fn integer(n: &Number) -> Option<i128> {
        n.as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
    }

    match (integer(x), integer(y)) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
    }
}

/// Scope for a snapshot read.
pub enum Filter<R> {
    /// Opaque predicate. Cannot be pushed down to a remote store.
    Predicate(Arc<dyn Fn(&R) -> bool + Send + Sync>),
    /// Declarative expression. Translatable to a query language.
    Expr(Expr),
}

impl<R> Filter<R> {
    pub fn predicate(f: impl Fn(&R) -> bool + Send + Sync + 'static) -> Self {
        Filter::Predicate(Arc::new(f))
    }

    pub fn expr(expr: Expr) -> Self {
        Filter::Expr(expr)
    }

    /// The declarative form, if this filter has one.
    pub fn as_expr(&self) -> Option<&Expr> {
        match self {
            Filter::Expr(expr) => Some(expr),
            Filter::Predicate(_) => None,
        }
    }
}

impl<R: Entity> Filter<R> {
    /// Evaluate in-process.
    pub fn matches(&self, record: &R) -> bool {
        match self {
            Filter::Predicate(f) => f(record),
            Filter::Expr(expr) => expr.evaluate(&|name| record.field(name)),
        }
    }
}

impl<R> Clone for Filter<R> {
    fn clone(&self) -> Self {
        match self {
            Filter::Predicate(f) => Filter::Predicate(Arc::clone(f)),
            Filter::Expr(expr) => Filter::Expr(expr.clone()),
        }
    }
}

impl<R> fmt::Debug for Filter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Predicate(_) => f.write_str("Filter::Predicate(..)"),
            Filter::Expr(expr) => f.debug_tuple("Filter::Expr").field(expr).finish(),
        }
    }
}

impl<R> From<Expr> for Filter<R> {
    fn from(expr: Expr) -> Self {
        Filter::Expr(expr)
    }
}
