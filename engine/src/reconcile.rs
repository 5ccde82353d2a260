//! List reconciliation.
//!
//! Brings the persisted records matching a filter in line with a desired
//! list, matching records by a caller-supplied key.
//!
//! # Algorithm
//!
//! 1. Index the desired list by key (the last record for a key wins)
//! 2. Read the filtered snapshot, detached, and index it by key
//! 3. Partition: desired-only keys are added, shared keys are updated,
//!    snapshot-only keys are removed; each set only if the policy allows it
//! 4. Stage removals, then additions, then field copies
//! 5. Commit the batch atomically
//!
//! Removals go first so a backing store with immediate unique checks does
//! not trip over a value moving from a removed record to an added one.

use crate::{
    error::Result, CommitStats, Entity, Error, Filter, Policy, Store, UnitOfWork,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Key extractor shared across retries.
pub type KeyFn<R, K> = Arc<dyn Fn(&R) -> K + Send + Sync>;

/// A desired record paired with the snapshot record it will overwrite.
#[derive(Debug, Clone, Copy)]
pub struct Matched<'a, R> {
    pub desired: &'a R,
    pub current: &'a R,
}

/// The three disjoint change sets of one reconciliation.
#[derive(Debug)]
pub struct Partition<'a, R, K> {
    pub to_add: Vec<(K, &'a R)>,
    pub to_update: Vec<(K, Matched<'a, R>)>,
    pub to_remove: Vec<(K, &'a R)>,
}

impl<'a, R, K> Partition<'a, R, K>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Partition `desired` against `snapshot`.
    ///
    /// Duplicate keys in `desired` collapse to the last occurrence. A
    /// duplicate key in `snapshot` is a data-integrity violation and fails
    /// with [`Error::DuplicateSnapshotKey`].
    pub fn compute(
        desired: &'a [R],
        snapshot: &'a [R],
        key_of: impl Fn(&R) -> K,
        policy: Policy,
    ) -> Result<Self> {
        let desired_keys: Vec<K> = desired.iter().map(&key_of).collect();
        let mut last_by_key: HashMap<&K, usize> = HashMap::with_capacity(desired.len());
        for (i, key) in desired_keys.iter().enumerate() {
            last_by_key.insert(key, i);
        }

        let mut snapshot_by_key: HashMap<K, usize> = HashMap::with_capacity(snapshot.len());
        for (i, record) in snapshot.iter().enumerate() {
            let key = key_of(record);
            if snapshot_by_key.contains_key(&key) {
                return Err(Error::DuplicateSnapshotKey(format!("{:?}", key)));
            }
            snapshot_by_key.insert(key, i);
        }

        let mut to_add = Vec::new();
        let mut to_update = Vec::new();
        for (i, (record, key)) in desired.iter().zip(desired_keys.iter()).enumerate() {
            if last_by_key.get(key) != Some(&i) {
                continue;
            }
            match snapshot_by_key.get(key) {
                None if policy.allow_add => to_add.push((key.clone(), record)),
                Some(&j) if policy.allow_update => to_update.push((
                    key.clone(),
                    Matched {
                        desired: record,
                        current: &snapshot[j],
                    },
                )),
                _ => {}
            }
        }

        let mut to_remove = Vec::new();
        if policy.allow_remove {
            let mut removals: Vec<(usize, K)> = snapshot_by_key
                .into_iter()
                .filter(|(key, _)| !last_by_key.contains_key(key))
                .map(|(key, i)| (i, key))
                .collect();
            removals.sort_by_key(|(i, _)| *i);
            to_remove = removals
                .into_iter()
                .map(|(i, key)| (key, &snapshot[i]))
                .collect();
        }

        Ok(Self {
            to_add,
            to_update,
            to_remove,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }

    pub fn summary(&self) -> ReconcileSummary<K> {
        ReconcileSummary {
            added: self.to_add.iter().map(|(k, _)| k.clone()).collect(),
            updated: self.to_update.iter().map(|(k, _)| k.clone()).collect(),
            removed: self.to_remove.iter().map(|(k, _)| k.clone()).collect(),
            stats: CommitStats::default(),
        }
    }
}

impl<'a, R: Entity, K> Partition<'a, R, K> {
    /// Stage this partition on a unit of work: removals, additions, then
    /// field copies.
    pub fn stage<U: UnitOfWork<R>>(&self, uow: &mut U) {
        if !self.to_remove.is_empty() {
            uow.remove_range(self.to_remove.iter().map(|(_, r)| (*r).clone()).collect());
        }
        if !self.to_add.is_empty() {
            uow.add_range(self.to_add.iter().map(|(_, r)| (*r).clone()).collect());
        }
        for (_, m) in &self.to_update {
            uow.copy_fields(m.desired, m.current.clone());
        }
    }
}

/// Keys touched by a successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary<K> {
    pub added: Vec<K>,
    pub updated: Vec<K>,
    pub removed: Vec<K>,
    /// What the store reported applying.
    pub stats: CommitStats,
}

impl<K> Default for ReconcileSummary<K> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
            stats: CommitStats::default(),
        }
    }
}

impl<K> ReconcileSummary<K> {
    /// True when nothing was staged.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Inputs of one reconciliation.
///
/// ```
/// use roster_engine::{Expr, Policy, ReconcileRequest};
/// # struct Employee { id: u64 }
///
/// let request = ReconcileRequest::new(Vec::<Employee>::new())
///     .key_of(|e: &Employee| e.id)
///     .filter(Expr::eq("active", true))
///     .policy(Policy::add_or_update());
/// assert_eq!(request.desired().len(), 0);
/// ```
pub struct ReconcileRequest<R, K> {
    desired: Vec<R>,
    key_of: Option<KeyFn<R, K>>,
    filter: Option<Filter<R>>,
    policy: Policy,
}

impl<R, K> ReconcileRequest<R, K> {
    /// Start a request for `desired` with the full sync policy.
    pub fn new(desired: Vec<R>) -> Self {
        Self {
            desired,
            key_of: None,
            filter: None,
            policy: Policy::sync(),
        }
    }

    pub fn key_of(mut self, key_of: impl Fn(&R) -> K + Send + Sync + 'static) -> Self {
        self.key_of = Some(Arc::new(key_of));
        self
    }

    pub fn filter(mut self, filter: impl Into<Filter<R>>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn desired(&self) -> &[R] {
        &self.desired
    }

    fn require_key_of(&self) -> Result<&KeyFn<R, K>> {
        self.key_of
            .as_ref()
            .ok_or_else(|| Error::invalid_argument("key extractor is required"))
    }
}

impl<R, K> Debug for ReconcileRequest<R, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileRequest")
            .field("desired", &self.desired.len())
            .field("key_of", &self.key_of.is_some())
            .field("filter", &self.filter.is_some())
            .field("policy", &self.policy)
            .finish()
    }
}

/// Runs reconciliations against a store.
pub struct Reconciler<'s, S> {
    store: &'s S,
}

impl<S> Clone for Reconciler<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for Reconciler<'_, S> {}

impl<'s, S> Reconciler<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Compute the partition for `request` without staging anything.
    pub async fn plan<R, K>(
        self,
        request: &ReconcileRequest<R, K>,
    ) -> Result<ReconcileSummary<K>>
    where
        S: Store<R>,
        R: Entity,
        K: Eq + Hash + Clone + Debug + Send + Sync,
    {
        let key_of = request.require_key_of()?;
        if request.policy.is_read_only() {
            return Ok(ReconcileSummary::default());
        }
        let mut uow = self.store.begin().await?;
        let snapshot = uow.query(request.filter.as_ref()).await?;
        let partition =
            Partition::compute(&request.desired, &snapshot, |r| key_of(r), request.policy)?;
        Ok(partition.summary())
    }

    /// Reconcile the store with `request`.
    ///
    /// The token is checked before the snapshot read, raced against it, and
    /// checked again before commit. Once commit starts it runs to completion.
    /// A policy with every flag disabled returns an empty summary without
    /// opening a unit of work.
    #[tracing::instrument(
        name = "reconcile",
        skip_all,
        fields(desired = request.desired.len(), policy = ?request.policy)
    )]
    pub async fn reconcile<R, K>(
        self,
        request: &ReconcileRequest<R, K>,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary<K>>
    where
        S: Store<R>,
        R: Entity,
        K: Eq + Hash + Clone + Debug + Send + Sync,
    {
        let key_of = request.require_key_of()?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if request.policy.is_read_only() {
            tracing::debug!("policy allows no changes, skipping snapshot read");
            return Ok(ReconcileSummary::default());
        }

        let mut uow = self.store.begin().await?;
        let snapshot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            snapshot = uow.query(request.filter.as_ref()) => snapshot?,
        };

        let mut summary = {
            let partition =
                Partition::compute(&request.desired, &snapshot, |r| key_of(r), request.policy)?;
            partition.stage(&mut uow);
            partition.summary()
        };
        tracing::debug!(
            snapshot = snapshot.len(),
            add = summary.added.len(),
            update = summary.updated.len(),
            remove = summary.removed.len(),
            "partition computed"
        );

        if summary.is_noop() {
            return Ok(summary);
        }
        if cancel.is_cancelled() {
            tracing::debug!("cancelled before commit, discarding staged changes");
            return Err(Error::Cancelled);
        }

        summary.stats = uow.commit().await.map_err(|err| {
            tracing::warn!(error = %err, "reconcile commit failed");
            err
        })?;
        tracing::debug!(applied = summary.stats.total(), "reconcile committed");
        Ok(summary)
    }
}
