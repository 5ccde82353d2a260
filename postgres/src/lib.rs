//! # Roster Postgres
//!
//! PostgreSQL adapter for [`roster_engine`].
//!
//! Records of every collection share one `records` table:
//!
//! | column       | type  |                                  |
//! |--------------|-------|----------------------------------|
//! | `collection` | TEXT  | collection name                  |
//! | `id`         | JSONB | record identity, as JSON         |
//! | `payload`    | JSONB | the serialized record            |
//!
//! [`PgStore`] implements the engine's store traits on top of it. New
//! records can draw identities from the `records_id_seq` sequence (see
//! [`PgStore::with_generated_ids`]).
//! Declarative filters are pushed down as SQL over `payload`
//! (see [`query`]); predicate filters are evaluated after the fetch.
//! Driver errors are classified by SQLSTATE (see [`error`]) so integrity
//! violations surface as conflicts and connection loss is retried.

pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod query;
pub mod store;

pub use config::{Config, ConfigError, SyncJob};
pub use document::{load_documents, Document, DocumentKey};
pub use error::{classify, classify_sqlstate, map_sqlx, FailureKind};
pub use query::{SqlParam, SqlWhere};
pub use store::{PgStore, PgUnitOfWork, DEFAULT_ID_SEQUENCE};
