//! Pushdown of declarative filters into PostgreSQL.
//!
//! An [`Expr`] becomes a boolean SQL expression over the JSONB `payload`
//! column. Field names and values are always bound as parameters, never
//! spliced into the SQL text.
//!
//! The generated SQL keeps the in-process semantics of
//! [`Expr::evaluate`](roster_engine::Expr::evaluate): a missing field or a
//! type mismatch fails `Eq` and every ordering comparison, `Ne` is the
//! negation of `Eq`, and strings order bytewise (`COLLATE "C"`).

use roster_engine::{CompareOp, Expr};
use serde_json::Value;

/// A bound parameter for a pushed-down filter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Json(Value),
}

/// A `WHERE` fragment plus its parameters, numbered from some offset.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlWhere {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl SqlWhere {
    /// Translate `expr`; the first parameter is `$first_param`.
    pub fn push_down(expr: &Expr, first_param: usize) -> Self {
        let mut builder = Builder {
            params: Vec::new(),
            first_param,
        };
        let sql = builder.expr(expr);
        Self {
            sql,
            params: builder.params,
        }
    }

    /// Index of the next free parameter after this fragment's.
    pub fn next_param(&self, first_param: usize) -> usize {
        first_param + self.params.len()
    }
}

struct Builder {
    params: Vec<SqlParam>,
    first_param: usize,
}

impl Builder {
    fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.first_param + self.params.len() - 1)
    }

    fn expr(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Compare { field, op, value } => self.compare(field, *op, value),
            Expr::And(parts) => self.join(parts, " AND ", "TRUE"),
            Expr::Or(parts) => self.join(parts, " OR ", "FALSE"),
            Expr::Not(inner) => format!("NOT ({})", self.expr(inner)),
        }
    }

    fn join(&mut self, parts: &[Expr], separator: &str, empty: &str) -> String {
        if parts.is_empty() {
            return empty.to_string();
        }
        let clauses: Vec<String> = parts
            .iter()
            .map(|part| format!("({})", self.expr(part)))
            .collect();
        clauses.join(separator)
    }

    fn compare(&mut self, field: &str, op: CompareOp, value: &Value) -> String {
        match op {
            CompareOp::Eq | CompareOp::Ne => {
                let field = self.bind(SqlParam::Text(field.to_string()));
                let value = self.bind(SqlParam::Json(value.clone()));
                let eq = format!("COALESCE((payload -> {field}) = {value}, FALSE)");
                if op == CompareOp::Eq {
                    eq
                } else {
                    format!("NOT {eq}")
                }
            }
            _ => match value {
                Value::Number(_) => {
                    let field = self.bind(SqlParam::Text(field.to_string()));
                    let value = self.bind(SqlParam::Json(value.clone()));
                    format!(
                        "COALESCE(jsonb_typeof(payload -> {field}) = 'number' AND (payload -> {field}) {} {value}, FALSE)",
                        op.as_sql()
                    )
                }
                Value::String(s) => {
                    let field = self.bind(SqlParam::Text(field.to_string()));
                    let value = self.bind(SqlParam::Text(s.clone()));
                    format!(
                        "COALESCE(jsonb_typeof(payload -> {field}) = 'string' AND (payload ->> {field}) COLLATE \"C\" {} {value}, FALSE)",
                        op.as_sql()
                    )
                }
                // Only numbers and strings are ordered.
                _ => "FALSE".to_string(),
            },
        }
    }
}
