//! Store boundary: units of work and an in-memory store.
//!
//! A [`Store`] hands out one [`UnitOfWork`] per operation. Reads through a
//! unit are detached copies; mutations are only staged until
//! [`UnitOfWork::commit`] applies the whole batch or none of it.

use crate::paging::{paginate, Page, PageRequest};
use crate::{error::Result, Entity, Error, Filter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Counts of what a commit applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitStats {
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
}

impl CommitStats {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.removed
    }
}

/// Source of units of work.
#[async_trait]
pub trait Store<R: Entity>: Send + Sync {
    type Uow: UnitOfWork<R>;

    /// Acquire a fresh unit of work. Never reused across operations.
    async fn begin(&self) -> Result<Self::Uow>;
}

/// Staging and commit boundary around one batch of mutations.
///
/// Dropping a unit without committing discards everything staged.
#[async_trait]
pub trait UnitOfWork<R: Entity>: Send {
    /// Detached read of every record matching `filter`.
    async fn query(&mut self, filter: Option<&Filter<R>>) -> Result<Vec<R>>;

    /// Detached read of one record by identity.
    async fn find(&mut self, id: &R::Id) -> Result<Option<R>>;

    /// One page of the records matching `filter`, in identity order.
    async fn query_page(
        &mut self,
        filter: Option<&Filter<R>>,
        request: PageRequest,
    ) -> Result<Page<R>> {
        request.validate()?;
        let mut records = self.query(filter).await?;
        records.sort_by_key(|r| r.id());
        paginate(records, request)
    }

    /// Stage inserts.
    fn add_range(&mut self, records: Vec<R>);

    /// Stage deletes.
    fn remove_range(&mut self, records: Vec<R>);

    /// Stage an in-place update of `target` with `source`'s non-identity
    /// fields.
    fn copy_fields(&mut self, source: &R, target: R);

    /// Apply everything staged atomically.
    async fn commit(self) -> Result<CommitStats>;

    /// Insert `record` on its own and commit, returning the identity the
    /// store gave it. Stores that assign identities override this.
    async fn insert_one(mut self, record: R) -> Result<R::Id>
    where
        Self: Sized,
    {
        let id = record.id();
        self.add_range(vec![record]);
        self.commit().await?;
        Ok(id)
    }
}

/// A staged mutation.
#[derive(Debug, Clone)]
pub enum Staged<R: Entity> {
    Insert(R),
    Update(R),
    Remove(R::Id),
}

/// Ordered list of staged mutations, shared by adapters.
#[derive(Debug, Clone)]
pub struct StagedBatch<R: Entity> {
    ops: Vec<Staged<R>>,
}

impl<R: Entity> Default for StagedBatch<R> {
    fn default() -> Self {
        Self { ops: Vec::new() }
    }
}

impl<R: Entity> StagedBatch<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_range(&mut self, records: Vec<R>) {
        self.ops.extend(records.into_iter().map(Staged::Insert));
    }

    pub fn remove_range(&mut self, records: Vec<R>) {
        self.ops
            .extend(records.into_iter().map(|r| Staged::Remove(r.id())));
    }

    pub fn copy_fields(&mut self, source: &R, mut target: R) {
        target.copy_fields_from(source);
        self.ops.push(Staged::Update(target));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Staged<R>> {
        self.ops.iter()
    }

    pub fn into_ops(self) -> Vec<Staged<R>> {
        self.ops
    }
}

type IndexKeyFn<R> = Arc<dyn Fn(&R) -> Option<String> + Send + Sync>;

/// Produces a fresh identity from the greatest identity currently stored.
pub type IdGenerator<R> =
    Arc<dyn Fn(Option<&<R as Entity>::Id>) -> <R as Entity>::Id + Send + Sync>;

struct UniqueIndex<R> {
    name: String,
    key: IndexKeyFn<R>,
}

/// In-process store keeping records ordered by identity.
///
/// Cloning is cheap and clones share state. Optional unique secondary
/// indexes are checked at commit, after the whole batch is applied to a
/// working copy, so a batch that removes and re-adds a unique value passes.
/// With an identity generator, inserted records that
/// [need an identity](Entity::needs_identity) get one at commit.
pub struct MemoryStore<R: Entity> {
    records: Arc<RwLock<BTreeMap<R::Id, R>>>,
    indexes: Arc<Vec<UniqueIndex<R>>>,
    id_generator: Option<IdGenerator<R>>,
}

impl<R: Entity> Clone for MemoryStore<R> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            indexes: Arc::clone(&self.indexes),
            id_generator: self.id_generator.clone(),
        }
    }
}

impl<R: Entity> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Entity> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(BTreeMap::new())),
            indexes: Arc::new(Vec::new()),
            id_generator: None,
        }
    }

    /// Create a store pre-populated with `records`. Later duplicates of an
    /// identity replace earlier ones.
    pub fn with_records(records: impl IntoIterator<Item = R>) -> Self {
        let map = records.into_iter().map(|r| (r.id(), r)).collect();
        Self {
            records: Arc::new(RwLock::new(map)),
            indexes: Arc::new(Vec::new()),
            id_generator: None,
        }
    }

    /// Assign identities to inserted records that still carry the default
    /// one. `generate` receives the greatest identity stored so far.
    ///
    /// ```
    /// # use roster_engine::{Entity, MemoryStore};
    /// # #[derive(Clone, serde::Serialize, serde::Deserialize)]
    /// # struct Row { id: u64 }
    /// # impl Entity for Row {
    /// #     type Id = u64;
    /// #     fn id(&self) -> u64 { self.id }
    /// #     fn set_id(&mut self, id: u64) { self.id = id; }
    /// # }
    /// let store = MemoryStore::<Row>::new()
    ///     .with_id_generator(|last: Option<&u64>| last.map_or(1, |id| id + 1));
    /// ```
    pub fn with_id_generator(
        mut self,
        generate: impl Fn(Option<&R::Id>) -> R::Id + Send + Sync + 'static,
    ) -> Self {
        self.id_generator = Some(Arc::new(generate));
        self
    }

    /// Add a unique secondary index. Records whose key function returns
    /// `None` are not indexed.
    ///
    /// Must be called before the store is cloned.
    pub fn with_unique_index(
        mut self,
        name: impl Into<String>,
        key: impl Fn(&R) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        let mut indexes: Vec<UniqueIndex<R>> = match Arc::try_unwrap(self.indexes) {
            Ok(indexes) => indexes,
            Err(shared) => shared
                .iter()
                .map(|ix| UniqueIndex {
                    name: ix.name.clone(),
                    key: Arc::clone(&ix.key),
                })
                .collect(),
        };
        indexes.push(UniqueIndex {
            name: name.into(),
            key: Arc::new(key),
        });
        self.indexes = Arc::new(indexes);
        self
    }

    /// All records, in identity order.
    pub async fn records(&self) -> Vec<R> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn get(&self, id: &R::Id) -> Option<R> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_indexes(&self, records: &BTreeMap<R::Id, R>) -> Result<()> {
        for index in self.indexes.iter() {
            let mut seen: HashMap<String, &R::Id> = HashMap::new();
            for (id, record) in records {
                let Some(value) = (index.key)(record) else {
                    continue;
                };
                if let Some(other) = seen.insert(value.clone(), id) {
                    return Err(Error::conflict(format!(
                        "unique index '{}' violated: value '{}' held by {:?} and {:?}",
                        index.name, value, other, id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Apply `batch`, returning the stats and the identities inserted.
    async fn apply(&self, batch: StagedBatch<R>) -> Result<(CommitStats, Vec<R::Id>)> {
        let mut guard = self.records.write().await;
        let mut working = guard.clone();
        let mut stats = CommitStats::default();
        let mut inserted = Vec::new();

        for op in batch.into_ops() {
            match op {
                Staged::Remove(id) => {
                    if working.remove(&id).is_none() {
                        return Err(Error::conflict(format!(
                            "record {:?} was removed concurrently",
                            id
                        )));
                    }
                    stats.removed += 1;
                }
                Staged::Insert(mut record) => {
                    if let Some(generate) = &self.id_generator {
                        if record.needs_identity() {
                            record.set_id(generate(working.keys().next_back()));
                        }
                    }
                    let id = record.id();
                    if working.contains_key(&id) {
                        return Err(Error::conflict(format!(
                            "duplicate identity {:?}",
                            id
                        )));
                    }
                    inserted.push(id.clone());
                    working.insert(id, record);
                    stats.inserted += 1;
                }
                Staged::Update(record) => match working.get_mut(&record.id()) {
                    Some(slot) => {
                        *slot = record;
                        stats.updated += 1;
                    }
                    None => {
                        return Err(Error::conflict(format!(
                            "record {:?} was removed concurrently",
                            record.id()
                        )));
                    }
                },
            }
        }

        self.check_indexes(&working)?;
        *guard = working;
        Ok((stats, inserted))
    }
}

/// Unit of work over a [`MemoryStore`].
pub struct MemoryUnitOfWork<R: Entity> {
    store: MemoryStore<R>,
    staged: StagedBatch<R>,
}

impl<R: Entity> MemoryUnitOfWork<R> {
    pub fn staged(&self) -> &StagedBatch<R> {
        &self.staged
    }
}

#[async_trait]
impl<R: Entity> Store<R> for MemoryStore<R> {
    type Uow = MemoryUnitOfWork<R>;

    async fn begin(&self) -> Result<Self::Uow> {
        Ok(MemoryUnitOfWork {
            store: self.clone(),
            staged: StagedBatch::new(),
        })
    }
}

#[async_trait]
impl<R: Entity> UnitOfWork<R> for MemoryUnitOfWork<R> {
    async fn query(&mut self, filter: Option<&Filter<R>>) -> Result<Vec<R>> {
        let records = self.store.records.read().await;
        Ok(records
            .values()
            .filter(|r| filter.map_or(true, |f| f.matches(r)))
            .cloned()
            .collect())
    }

    async fn find(&mut self, id: &R::Id) -> Result<Option<R>> {
        Ok(self.store.get(id).await)
    }

    fn add_range(&mut self, records: Vec<R>) {
        self.staged.add_range(records);
    }

    fn remove_range(&mut self, records: Vec<R>) {
        self.staged.remove_range(records);
    }

    fn copy_fields(&mut self, source: &R, target: R) {
        self.staged.copy_fields(source, target);
    }

    async fn commit(self) -> Result<CommitStats> {
        if self.staged.is_empty() {
            return Ok(CommitStats::default());
        }
        let (stats, _) = self.store.apply(self.staged).await?;
        Ok(stats)
    }

    async fn insert_one(mut self, record: R) -> Result<R::Id> {
        self.staged.add_range(vec![record]);
        let (_, inserted) = self.store.apply(self.staged).await?;
        inserted
            .into_iter()
            .next()
            .ok_or_else(|| Error::store("insert reported no identity"))
    }
}
