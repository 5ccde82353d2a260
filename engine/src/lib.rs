//! # Roster Engine
//!
//! Key-based list reconciliation over transactional keyed stores.
//!
//! Given the list of records a caller wants to exist, the engine reads the
//! persisted records in scope, works out what to insert, update and delete,
//! and applies all of it in one atomic commit.
//!
//! ## Design Principles
//!
//! - **Store-agnostic**: the engine talks to a [`Store`] / [`UnitOfWork`]
//!   pair; adapters own all IO
//! - **All-or-nothing**: a reconciliation commits its whole batch or nothing
//! - **Explicit policy**: which of add/update/remove may run is a [`Policy`]
//!   value passed per call, never global state
//! - **Typed failures**: every outcome is a [`Result`] over [`Error`]
//!
//! ## Core Concepts
//!
//! ### Entities and keys
//!
//! Records implement [`Entity`], which gives them a store identity. The key
//! a reconciliation matches on is a separate closure, so a list can be
//! matched by e.g. a product code while rows are identified by number.
//! A record still carrying the default identity is new; stores configured
//! to assign identities give it one on insert.
//!
//! ### Filters
//!
//! A [`Filter`] scopes the snapshot. Records outside the filter are never
//! touched. [`Filter::Expr`] filters are declarative and can be pushed down
//! to a database; [`Filter::Predicate`] filters run in-process.
//!
//! ### Reconciliation
//!
//! [`Reconciler`] runs one read-compute-commit pipeline. [`Partition`] is
//! the pure computation underneath it.
//!
//! ### Context
//!
//! [`Context`] wraps a store with a [`RetryConfig`] and a cancellation
//! token and adds single-record commands and paging.
//!
//! ## Quick Start
//!
//! ```rust
//! use roster_engine::{Context, Entity, MemoryStore, RetryConfig};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Product {
//!     id: u64,
//!     sku: String,
//!     price: i64,
//! }
//!
//! impl Entity for Product {
//!     type Id = u64;
//!     fn id(&self) -> u64 { self.id }
//!     fn set_id(&mut self, id: u64) { self.id = id; }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = MemoryStore::with_records(vec![
//!     Product { id: 1, sku: "A".into(), price: 10 },
//!     Product { id: 2, sku: "B".into(), price: 20 },
//! ])
//! .with_id_generator(|last: Option<&u64>| last.map_or(1, |id| id + 1));
//! let ctx = Context::new(store).with_retry(RetryConfig::no_retry());
//!
//! let desired = vec![
//!     Product { id: 0, sku: "B".into(), price: 25 },
//!     Product { id: 0, sku: "C".into(), price: 30 },
//! ];
//! let summary = ctx
//!     .sync_from_list(desired, |p: &Product| p.sku.clone(), None)
//!     .await
//!     .unwrap();
//!
//! assert_eq!(summary.added, vec!["C".to_string()]);
//! assert_eq!(summary.updated, vec!["B".to_string()]);
//! assert_eq!(summary.removed, vec!["A".to_string()]);
//! assert_eq!(ctx.store().get(&2).await.unwrap().price, 25);
//! assert_eq!(ctx.store().get(&3).await.unwrap().sku, "C");
//! # });
//! ```

pub mod commands;
pub mod entity;
pub mod error;
pub mod filter;
pub mod naming;
pub mod paging;
pub mod policy;
pub mod reconcile;
pub mod retry;
pub mod sorting;
pub mod store;

// Re-export main types at crate root
pub use commands::Context;
pub use entity::Entity;
pub use error::{BoxError, Error, Result};
pub use filter::{CompareOp, Expr, Filter};
pub use naming::{collection_name, to_snake_case};
pub use paging::{paginate, Page, PageRequest};
pub use policy::Policy;
pub use reconcile::{KeyFn, Matched, Partition, ReconcileRequest, ReconcileSummary, Reconciler};
pub use retry::{execute_with_retry, RetryConfig};
pub use sorting::{sort_by_key, SortDirection, Sorter};
pub use store::{
    CommitStats, IdGenerator, MemoryStore, MemoryUnitOfWork, Staged, StagedBatch, Store,
    UnitOfWork,
};

pub use tokio_util::sync::CancellationToken;
