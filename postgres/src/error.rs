//! Mapping of database failures onto the engine's error taxonomy.

use roster_engine::Error;

/// How a database failure should be reported to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Constraint or concurrency violation: surfaced, never retried.
    Conflict,
    /// Connection-level trouble: worth re-running the pipeline.
    Transient,
    Permanent,
}

/// Classify a PostgreSQL SQLSTATE code.
pub fn classify_sqlstate(code: &str) -> FailureKind {
    match code {
        // serialization_failure, deadlock_detected
        "40001" | "40P01" => FailureKind::Conflict,
        // too_many_connections, admin/crash shutdown, cannot_connect_now
        "53300" | "57P01" | "57P02" | "57P03" => FailureKind::Transient,
        c if c.starts_with("23") => FailureKind::Conflict,
        c if c.starts_with("08") => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}

/// Classify a driver error.
pub fn classify(err: &sqlx::Error) -> FailureKind {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .map_or(FailureKind::Permanent, |code| classify_sqlstate(&code)),
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}

/// Convert a driver error raised while doing `context`.
pub fn map_sqlx(err: sqlx::Error, context: &str) -> Error {
    let message = format!("{}: {}", context, err);
    let mapped = match classify(&err) {
        FailureKind::Conflict => Error::conflict(message),
        FailureKind::Transient => Error::transient(message),
        FailureKind::Permanent => Error::store(message),
    };
    mapped.with_source(err)
}

/// Convert a (de)serialization failure of a stored row.
pub fn map_json(err: serde_json::Error, context: &str) -> Error {
    Error::store(format!("{}: {}", context, err)).with_source(err)
}
