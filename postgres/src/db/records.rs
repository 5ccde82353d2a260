//! Database operations for the records table.

use crate::error::map_json;
use crate::query::{SqlParam, SqlWhere};
use roster_engine::{Entity, Result};
use serde::Serialize;
use serde_json::Value;
use sqlx::{PgConnection, PgPool, Row};
use std::fmt::Write;

/// A stored record row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: Value,
    pub payload: Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredRow {
            id: row.try_get("id")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl StoredRow {
    /// Decode into a record. The `id` column is authoritative and is written
    /// back onto the decoded payload.
    pub fn decode<R: Entity>(self) -> Result<R> {
        let id: R::Id =
            serde_json::from_value(self.id).map_err(|e| map_json(e, "decode record id"))?;
        let mut record: R =
            serde_json::from_value(self.payload).map_err(|e| map_json(e, "decode record"))?;
        record.set_id(id);
        Ok(record)
    }
}

pub fn encode_id<I: Serialize>(id: &I) -> Result<Value> {
    serde_json::to_value(id).map_err(|e| map_json(e, "encode record id"))
}

pub fn encode_payload<R: Serialize>(record: &R) -> Result<Value> {
    serde_json::to_value(record).map_err(|e| map_json(e, "encode record"))
}

fn scoped(select: &str, filter: Option<&SqlWhere>) -> (String, usize) {
    let mut sql = format!("{} FROM records WHERE collection = $1", select);
    let mut next = 2;
    if let Some(filter) = filter {
        let _ = write!(sql, " AND ({})", filter.sql);
        next = filter.next_param(2);
    }
    (sql, next)
}

/// `SELECT` for a collection, optionally filtered and windowed.
pub fn select_sql(filter: Option<&SqlWhere>, windowed: bool) -> String {
    let (mut sql, next) = scoped("SELECT id, payload", filter);
    sql.push_str(" ORDER BY id");
    if windowed {
        let _ = write!(sql, " LIMIT ${} OFFSET ${}", next, next + 1);
    }
    sql
}

pub fn count_sql(filter: Option<&SqlWhere>) -> String {
    scoped("SELECT COUNT(*)", filter).0
}

/// Rows of `collection` matching `filter`, in identity order.
///
/// `window` is `(limit, offset)`.
pub async fn select_rows(
    pool: &PgPool,
    collection: &str,
    filter: Option<&SqlWhere>,
    window: Option<(i64, i64)>,
) -> std::result::Result<Vec<StoredRow>, sqlx::Error> {
    let sql = select_sql(filter, window.is_some());
    let mut query = sqlx::query_as::<_, StoredRow>(&sql).bind(collection);
    for param in filter.map(|f| f.params.clone()).unwrap_or_default() {
        query = match param {
            SqlParam::Text(text) => query.bind(text),
            SqlParam::Json(value) => query.bind(value),
        };
    }
    if let Some((limit, offset)) = window {
        query = query.bind(limit).bind(offset);
    }
    query.fetch_all(pool).await
}

pub async fn count_rows(
    pool: &PgPool,
    collection: &str,
    filter: Option<&SqlWhere>,
) -> std::result::Result<i64, sqlx::Error> {
    let sql = count_sql(filter);
    let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(collection);
    for param in filter.map(|f| f.params.clone()).unwrap_or_default() {
        query = match param {
            SqlParam::Text(text) => query.bind(text),
            SqlParam::Json(value) => query.bind(value),
        };
    }
    query.fetch_one(pool).await
}

/// Get a row by collection and id.
pub async fn select_row(
    pool: &PgPool,
    collection: &str,
    id: &Value,
) -> std::result::Result<Option<StoredRow>, sqlx::Error> {
    sqlx::query_as::<_, StoredRow>(
        "SELECT id, payload FROM records WHERE collection = $1 AND id = $2",
    )
    .bind(collection)
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn insert_row(
    conn: &mut PgConnection,
    collection: &str,
    id: &Value,
    payload: &Value,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO records (collection, id, payload) VALUES ($1, $2, $3)")
        .bind(collection)
        .bind(id)
        .bind(payload)
        .execute(conn)
        .await?;
    Ok(())
}

/// Draw the next value of `sequence`.
pub async fn next_id(
    conn: &mut PgConnection,
    sequence: &str,
) -> std::result::Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT nextval($1::regclass)")
        .bind(sequence)
        .fetch_one(conn)
        .await
}

/// Returns the number of rows updated (0 or 1).
pub async fn update_row(
    conn: &mut PgConnection,
    collection: &str,
    id: &Value,
    payload: &Value,
) -> std::result::Result<u64, sqlx::Error> {
    let result =
        sqlx::query("UPDATE records SET payload = $3 WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .bind(payload)
            .execute(conn)
            .await?;
    Ok(result.rows_affected())
}

/// Returns the number of rows deleted (0 or 1).
pub async fn delete_row(
    conn: &mut PgConnection,
    collection: &str,
    id: &Value,
) -> std::result::Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM records WHERE collection = $1 AND id = $2")
        .bind(collection)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}
