//! End-to-end reconciliation scenarios against the in-memory store.

use async_trait::async_trait;
use roster_engine::{
    CancellationToken, CommitStats, Context, Entity, Error, Expr, Filter, MemoryStore,
    MemoryUnitOfWork, Policy, ReconcileRequest, Reconciler, Result, RetryConfig, Store,
    UnitOfWork,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Row {
    id: u64,
    name: String,
    #[serde(default)]
    tenant: String,
}

impl Row {
    fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            tenant: "acme".to_string(),
        }
    }

    fn tenant(mut self, tenant: &str) -> Self {
        self.tenant = tenant.to_string();
        self
    }
}

impl Entity for Row {
    type Id = u64;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

fn snapshot_ab() -> MemoryStore<Row> {
    MemoryStore::with_records(vec![Row::new(1, "a"), Row::new(2, "b")])
}

fn by_id(desired: Vec<Row>) -> ReconcileRequest<Row, u64> {
    ReconcileRequest::new(desired).key_of(|r: &Row| r.id)
}

async fn run(store: &MemoryStore<Row>, request: &ReconcileRequest<Row, u64>) -> Result<Vec<Row>> {
    Reconciler::new(store)
        .reconcile(request, &CancellationToken::new())
        .await?;
    Ok(store.records().await)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn scenario_a_full_policy() {
    let store = snapshot_ab();
    let request = by_id(vec![Row::new(2, "B"), Row::new(3, "c")]);

    let summary = Reconciler::new(&store)
        .reconcile(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.added, vec![3]);
    assert_eq!(summary.updated, vec![2]);
    assert_eq!(summary.removed, vec![1]);
    assert_eq!(
        summary.stats,
        CommitStats {
            inserted: 1,
            updated: 1,
            removed: 1
        }
    );
    assert_eq!(store.records().await, vec![Row::new(2, "B"), Row::new(3, "c")]);
}

#[tokio::test]
async fn scenario_b_remove_disabled() {
    let store = snapshot_ab();
    let request =
        by_id(vec![Row::new(2, "B"), Row::new(3, "c")]).policy(Policy::add_or_update());

    let rows = run(&store, &request).await.unwrap();

    assert_eq!(
        rows,
        vec![Row::new(1, "a"), Row::new(2, "B"), Row::new(3, "c")]
    );
}

#[tokio::test]
async fn scenario_c_empty_desired_removes_everything() {
    let store = snapshot_ab();
    let request = by_id(vec![]);

    let summary = Reconciler::new(&store)
        .reconcile(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.added.is_empty());
    assert!(summary.updated.is_empty());
    assert_eq!(summary.removed, vec![1, 2]);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn scenario_d_duplicate_desired_key_last_wins() {
    let store = snapshot_ab();
    let request = by_id(vec![
        Row::new(2, "first"),
        Row::new(4, "x"),
        Row::new(2, "second"),
    ])
    .policy(Policy::add_or_update());

    let rows = run(&store, &request).await.unwrap();

    assert_eq!(rows[1], Row::new(2, "second"));
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn scenario_e_conflict_fails_whole_batch() {
    let store = MemoryStore::with_records(vec![Row::new(1, "a"), Row::new(2, "b")])
        .with_unique_index("name", |r: &Row| Some(r.name.clone()));
    let request = by_id(vec![
        Row::new(1, "a"),
        Row::new(2, "b2"),
        Row::new(3, "fresh"),
        Row::new(4, "a"),
    ])
    .policy(Policy::add_or_update());

    let err = run(&store, &request).await.unwrap_err();

    assert!(matches!(err, Error::PersistenceConflict { .. }));
    assert!(err.to_string().contains("unique index 'name'"));
    assert_eq!(store.records().await, vec![Row::new(1, "a"), Row::new(2, "b")]);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn filter_scopes_removal() {
    let store = MemoryStore::with_records(vec![
        Row::new(1, "a"),
        Row::new(2, "b").tenant("globex"),
        Row::new(3, "c"),
    ]);
    let request = by_id(vec![Row::new(3, "C")]).filter(Expr::eq("tenant", "acme"));

    let rows = run(&store, &request).await.unwrap();

    assert_eq!(
        rows,
        vec![Row::new(2, "b").tenant("globex"), Row::new(3, "C")]
    );
}

#[tokio::test]
async fn predicate_filter_scopes_removal() {
    let store = MemoryStore::with_records((1..=6).map(|i| Row::new(i, "x")));
    let request = by_id(vec![]).filter(Filter::predicate(|r: &Row| r.id % 2 == 0));

    let rows = run(&store, &request).await.unwrap();

    let ids: Vec<u64> = rows.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 3, 5]);
}

#[tokio::test]
async fn reconcile_twice_is_stable() {
    let store = snapshot_ab();
    let request = by_id(vec![Row::new(2, "B"), Row::new(3, "c")]);
    let cancel = CancellationToken::new();

    Reconciler::new(&store)
        .reconcile(&request, &cancel)
        .await
        .unwrap();
    let after_first = store.records().await;

    let second = Reconciler::new(&store)
        .reconcile(&request, &cancel)
        .await
        .unwrap();

    assert!(second.added.is_empty());
    assert!(second.removed.is_empty());
    assert_eq!(second.updated, vec![2, 3]);
    assert_eq!(store.records().await, after_first);
}

#[tokio::test]
async fn all_flags_disabled_touches_nothing() {
    let store = snapshot_ab();
    let request = by_id(vec![Row::new(9, "z")]).policy(Policy::new(false, false, false));

    let summary = Reconciler::new(&store)
        .reconcile(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.is_noop());
    assert_eq!(summary.stats, CommitStats::default());
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn duplicate_snapshot_key_is_reported_not_resolved() {
    let store = MemoryStore::with_records(vec![Row::new(1, "dup"), Row::new(2, "dup")]);
    let request = ReconcileRequest::new(vec![Row::new(3, "dup")]).key_of(|r: &Row| r.name.clone());

    let err = Reconciler::new(&store)
        .reconcile(&request, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DuplicateSnapshotKey(_)));
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn reused_unique_value_across_remove_and_add() {
    // "a" moves from id 1 (removed) to id 5 (added) in one batch.
    let store = snapshot_ab().with_unique_index("name", |r: &Row| Some(r.name.clone()));
    let request = by_id(vec![Row::new(2, "b"), Row::new(5, "a")]);

    let rows = run(&store, &request).await.unwrap();

    assert_eq!(rows, vec![Row::new(2, "b"), Row::new(5, "a")]);
}

#[tokio::test]
async fn filter_on_large_identities_removes_only_the_exact_match() {
    const BIG: u64 = 1 << 53;
    let store = MemoryStore::with_records(vec![Row::new(BIG, "even"), Row::new(BIG + 1, "odd")]);
    let request = by_id(vec![]).filter(Expr::eq("id", BIG + 1));

    let rows = run(&store, &request).await.unwrap();

    assert_eq!(rows, vec![Row::new(BIG, "even")]);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Product {
    id: u64,
    sku: String,
    price: u32,
}

impl Product {
    fn new(id: u64, sku: &str, price: u32) -> Self {
        Self {
            id,
            sku: sku.to_string(),
            price,
        }
    }
}

impl Entity for Product {
    type Id = u64;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

#[tokio::test]
async fn new_records_keyed_by_sku_get_store_identities() {
    let store = MemoryStore::with_records(vec![Product::new(1, "A-1", 10)])
        .with_id_generator(|last: Option<&u64>| last.map_or(1, |id| id + 1));
    let request = ReconcileRequest::new(vec![
        Product::new(0, "A-1", 12),
        Product::new(0, "B-2", 20),
        Product::new(0, "C-3", 30),
    ])
    .key_of(|p: &Product| p.sku.clone());

    let summary = Reconciler::new(&store)
        .reconcile(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.added, vec!["B-2".to_string(), "C-3".to_string()]);
    assert_eq!(summary.updated, vec!["A-1".to_string()]);
    assert_eq!(
        store.records().await,
        vec![
            Product::new(1, "A-1", 12),
            Product::new(2, "B-2", 20),
            Product::new(3, "C-3", 30),
        ]
    );

    let ctx = Context::new(store).with_retry(RetryConfig::no_retry());
    let id = ctx.add_and_save(Product::new(0, "D-4", 40)).await.unwrap();
    assert_eq!(id, 4);
}

// ============================================================================
// Fault injection
// ============================================================================

/// Wraps a memory store and fails the first `failures` commits.
#[derive(Clone)]
struct FlakyStore {
    inner: MemoryStore<Row>,
    failures: Arc<AtomicU32>,
    begins: Arc<AtomicU32>,
    transient: bool,
}

impl FlakyStore {
    fn new(inner: MemoryStore<Row>, failures: u32, transient: bool) -> Self {
        Self {
            inner,
            failures: Arc::new(AtomicU32::new(failures)),
            begins: Arc::new(AtomicU32::new(0)),
            transient,
        }
    }

    fn begins(&self) -> u32 {
        self.begins.load(Ordering::SeqCst)
    }
}

struct FlakyUnit {
    inner: MemoryUnitOfWork<Row>,
    fail: Option<Error>,
}

#[async_trait]
impl Store<Row> for FlakyStore {
    type Uow = FlakyUnit;

    async fn begin(&self) -> Result<FlakyUnit> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
            .map(|_| {
                if self.transient {
                    Error::transient("connection reset by peer")
                } else {
                    Error::store("disk full")
                }
            });
        Ok(FlakyUnit {
            inner: self.inner.begin().await?,
            fail,
        })
    }
}

#[async_trait]
impl UnitOfWork<Row> for FlakyUnit {
    async fn query(&mut self, filter: Option<&Filter<Row>>) -> Result<Vec<Row>> {
        self.inner.query(filter).await
    }

    async fn find(&mut self, id: &u64) -> Result<Option<Row>> {
        self.inner.find(id).await
    }

    fn add_range(&mut self, records: Vec<Row>) {
        self.inner.add_range(records);
    }

    fn remove_range(&mut self, records: Vec<Row>) {
        self.inner.remove_range(records);
    }

    fn copy_fields(&mut self, source: &Row, target: Row) {
        self.inner.copy_fields(source, target);
    }

    async fn commit(self) -> Result<CommitStats> {
        match self.fail {
            Some(err) => Err(err),
            None => self.inner.commit().await,
        }
    }
}

fn fast_retry(attempts: u32) -> RetryConfig {
    RetryConfig::new(attempts)
        .with_initial_delay(Duration::from_millis(1))
        .with_jitter(false)
}

#[tokio::test]
async fn transient_commit_failure_is_retried_from_fresh_snapshot() {
    let flaky = FlakyStore::new(snapshot_ab(), 2, true);
    let ctx = Context::new(flaky.clone()).with_retry(fast_retry(3));

    let summary = ctx
        .sync_from_list(vec![Row::new(2, "B")], |r: &Row| r.id, None)
        .await
        .unwrap();

    assert_eq!(summary.removed, vec![1]);
    assert_eq!(flaky.begins(), 3);
    assert_eq!(flaky.inner.records().await, vec![Row::new(2, "B")]);
}

#[tokio::test]
async fn transient_failures_exhaust_attempts() {
    let flaky = FlakyStore::new(snapshot_ab(), 5, true);
    let ctx = Context::new(flaky.clone()).with_retry(fast_retry(2));

    let err = ctx
        .sync_from_list(vec![], |r: &Row| r.id, None)
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(flaky.begins(), 2);
    assert_eq!(flaky.inner.len().await, 2);
}

#[tokio::test]
async fn permanent_store_failure_is_not_retried() {
    let flaky = FlakyStore::new(snapshot_ab(), 1, false);
    let ctx = Context::new(flaky.clone()).with_retry(fast_retry(5));

    let err = ctx
        .add_or_update_from_list(vec![Row::new(7, "g")], |r: &Row| r.id, None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StoreFailure { transient: false, .. }));
    assert_eq!(flaky.begins(), 1);
    assert!(flaky.inner.get(&7).await.is_none());
}

#[tokio::test]
async fn conflicts_surface_without_retry() {
    let store = snapshot_ab().with_unique_index("name", |r: &Row| Some(r.name.clone()));
    let flaky = FlakyStore::new(store, 0, true);
    let ctx = Context::new(flaky.clone()).with_retry(fast_retry(5));

    let err = ctx
        .add_or_update_from_list(vec![Row::new(3, "a")], |r: &Row| r.id, None)
        .await
        .unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(flaky.begins(), 1);
}

#[tokio::test]
async fn pre_cancelled_token_skips_snapshot_read() {
    let flaky = FlakyStore::new(snapshot_ab(), 0, true);
    let cancel = CancellationToken::new();
    let request = by_id(vec![]);
    cancel.cancel();

    let err = Reconciler::new(&flaky)
        .reconcile(&request, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(flaky.begins(), 0);
    assert_eq!(flaky.inner.len().await, 2);
}

#[tokio::test]
async fn read_only_policy_never_opens_a_unit_of_work() {
    let flaky = FlakyStore::new(snapshot_ab(), 0, true);
    let request = by_id(vec![Row::new(9, "z")]).policy(Policy::new(false, false, false));

    let summary = Reconciler::new(&flaky)
        .reconcile(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.is_noop());
    assert_eq!(flaky.begins(), 0);
}

/// Cancels its token while the snapshot is being read. A hanging store never
/// finishes the read.
#[derive(Clone)]
struct CancellingStore {
    inner: MemoryStore<Row>,
    cancel: CancellationToken,
    hang: bool,
}

struct CancellingUnit {
    inner: MemoryUnitOfWork<Row>,
    cancel: CancellationToken,
    hang: bool,
}

#[async_trait]
impl Store<Row> for CancellingStore {
    type Uow = CancellingUnit;

    async fn begin(&self) -> Result<CancellingUnit> {
        Ok(CancellingUnit {
            inner: self.inner.begin().await?,
            cancel: self.cancel.clone(),
            hang: self.hang,
        })
    }
}

#[async_trait]
impl UnitOfWork<Row> for CancellingUnit {
    async fn query(&mut self, filter: Option<&Filter<Row>>) -> Result<Vec<Row>> {
        self.cancel.cancel();
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.inner.query(filter).await
    }

    async fn find(&mut self, id: &u64) -> Result<Option<Row>> {
        self.inner.find(id).await
    }

    fn add_range(&mut self, records: Vec<Row>) {
        self.inner.add_range(records);
    }

    fn remove_range(&mut self, records: Vec<Row>) {
        self.inner.remove_range(records);
    }

    fn copy_fields(&mut self, source: &Row, target: Row) {
        self.inner.copy_fields(source, target);
    }

    async fn commit(self) -> Result<CommitStats> {
        self.inner.commit().await
    }
}

async fn reconcile_cancelling(hang: bool) -> (Result<()>, MemoryStore<Row>) {
    let cancel = CancellationToken::new();
    let store = CancellingStore {
        inner: snapshot_ab(),
        cancel: cancel.clone(),
        hang,
    };
    let request = by_id(vec![Row::new(3, "c")]);

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        Reconciler::new(&store).reconcile(&request, &cancel),
    )
    .await
    .expect("reconcile did not observe cancellation")
    .map(|_| ());
    (outcome, store.inner)
}

#[tokio::test]
async fn cancellation_after_read_discards_staged_batch() {
    let (outcome, store) = reconcile_cancelling(false).await;

    assert!(matches!(outcome, Err(Error::Cancelled)));
    assert_eq!(store.records().await, vec![Row::new(1, "a"), Row::new(2, "b")]);
}

#[tokio::test]
async fn cancellation_interrupts_pending_read() {
    let (outcome, store) = reconcile_cancelling(true).await;

    assert!(matches!(outcome, Err(Error::Cancelled)));
    assert_eq!(store.len().await, 2);
}
