//! PostgreSQL-backed store.
//!
//! Every collection lives in the shared `records` table as JSONB rows keyed
//! by `(collection, id)`. Reads go straight to the pool and return detached
//! records. Staged mutations are applied inside one transaction at commit.
//! A store configured with an identity sequence draws identities for
//! inserted records that [need one](Entity::needs_identity).

use crate::db::{self, encode_id, encode_payload, Pool};
use crate::error::{map_json, map_sqlx};
use crate::query::SqlWhere;
use async_trait::async_trait;
use roster_engine::paging::page_number;
use roster_engine::{
    collection_name, paginate, CommitStats, Entity, Error, Filter, Page, PageRequest, Result,
    Staged, StagedBatch, Store, UnitOfWork,
};
use serde_json::Value;
use std::marker::PhantomData;

/// Sequence created by the bundled migrations.
pub const DEFAULT_ID_SEQUENCE: &str = "records_id_seq";

/// Store for records of type `R` in one collection.
pub struct PgStore<R> {
    pool: Pool,
    collection: String,
    id_sequence: Option<String>,
    _marker: PhantomData<fn() -> R>,
}

impl<R> Clone for PgStore<R> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            collection: self.collection.clone(),
            id_sequence: self.id_sequence.clone(),
            _marker: PhantomData,
        }
    }
}

impl<R: Entity> PgStore<R> {
    /// Store for `R` under its default collection name.
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            collection: collection_name::<R>(),
            id_sequence: None,
            _marker: PhantomData,
        }
    }
}

impl<R> PgStore<R> {
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Draw identities for new records from [`DEFAULT_ID_SEQUENCE`].
    pub fn with_generated_ids(self) -> Self {
        self.with_id_sequence(DEFAULT_ID_SEQUENCE)
    }

    /// Draw identities for new records from `sequence`. The identity type
    /// must deserialize from a JSON integer.
    pub fn with_id_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.id_sequence = Some(sequence.into());
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl<R: Entity> Store<R> for PgStore<R> {
    type Uow = PgUnitOfWork<R>;

    async fn begin(&self) -> Result<Self::Uow> {
        Ok(PgUnitOfWork {
            store: self.clone(),
            staged: StagedBatch::new(),
        })
    }
}

/// Unit of work over a [`PgStore`].
pub struct PgUnitOfWork<R: Entity> {
    store: PgStore<R>,
    staged: StagedBatch<R>,
}

impl<R: Entity> PgUnitOfWork<R> {
    fn collection(&self) -> &str {
        &self.store.collection
    }

    async fn select(&self, filter: Option<&SqlWhere>) -> Result<Vec<R>> {
        db::select_rows(&self.store.pool, self.collection(), filter, None)
            .await
            .map_err(|e| map_sqlx(e, "query records"))?
            .into_iter()
            .map(|row| row.decode())
            .collect()
    }

    /// Apply the staged batch in one transaction, returning the stats and
    /// the identities inserted.
    async fn apply(self) -> Result<(CommitStats, Vec<R::Id>)> {
        let mut inserted = Vec::new();
        if self.staged.is_empty() {
            return Ok((CommitStats::default(), inserted));
        }

        let collection = self.store.collection.as_str();
        let sequence = self.store.id_sequence.as_deref();
        let mut tx = self
            .store
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx(e, "begin transaction"))?;
        let mut stats = CommitStats::default();

        for op in self.staged.into_ops() {
            match op {
                Staged::Remove(id) => {
                    let key = encode_id(&id)?;
                    let affected = db::delete_row(&mut *tx, collection, &key)
                        .await
                        .map_err(|e| map_sqlx(e, "delete record"))?;
                    if affected == 0 {
                        return Err(Error::conflict(format!(
                            "record {:?} was removed concurrently",
                            id
                        )));
                    }
                    stats.removed += 1;
                }
                Staged::Insert(mut record) => {
                    if let Some(sequence) = sequence {
                        if record.needs_identity() {
                            let next = db::next_id(&mut *tx, sequence)
                                .await
                                .map_err(|e| map_sqlx(e, "draw identity"))?;
                            let id = serde_json::from_value(Value::from(next))
                                .map_err(|e| map_json(e, "decode drawn identity"))?;
                            record.set_id(id);
                        }
                    }
                    let id = record.id();
                    let key = encode_id(&id)?;
                    let payload = encode_payload(&record)?;
                    db::insert_row(&mut *tx, collection, &key, &payload)
                        .await
                        .map_err(|e| map_sqlx(e, "insert record"))?;
                    inserted.push(id);
                    stats.inserted += 1;
                }
                Staged::Update(record) => {
                    let key = encode_id(&record.id())?;
                    let payload = encode_payload(&record)?;
                    let affected = db::update_row(&mut *tx, collection, &key, &payload)
                        .await
                        .map_err(|e| map_sqlx(e, "update record"))?;
                    if affected == 0 {
                        return Err(Error::conflict(format!(
                            "record {:?} was removed concurrently",
                            record.id()
                        )));
                    }
                    stats.updated += 1;
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx(e, "commit transaction"))?;
        tracing::debug!(
            collection,
            inserted = stats.inserted,
            updated = stats.updated,
            removed = stats.removed,
            "records committed"
        );
        Ok((stats, inserted))
    }
}

#[async_trait]
impl<R: Entity> UnitOfWork<R> for PgUnitOfWork<R> {
    async fn query(&mut self, filter: Option<&Filter<R>>) -> Result<Vec<R>> {
        match filter {
            None => self.select(None).await,
            Some(Filter::Expr(expr)) => self.select(Some(&SqlWhere::push_down(expr, 2))).await,
            Some(predicate) => {
                let records = self.select(None).await?;
                Ok(records.into_iter().filter(|r| predicate.matches(r)).collect())
            }
        }
    }

    async fn find(&mut self, id: &R::Id) -> Result<Option<R>> {
        let id = encode_id(id)?;
        db::select_row(&self.store.pool, self.collection(), &id)
            .await
            .map_err(|e| map_sqlx(e, "find record"))?
            .map(|row| row.decode())
            .transpose()
    }

    async fn query_page(
        &mut self,
        filter: Option<&Filter<R>>,
        request: PageRequest,
    ) -> Result<Page<R>> {
        request.validate()?;
        let pushed = match filter {
            None => None,
            Some(Filter::Expr(expr)) => Some(SqlWhere::push_down(expr, 2)),
            Some(Filter::Predicate(_)) => {
                // Predicates only run in-process.
                let mut records = self.query(filter).await?;
                records.sort_by_key(|r| r.id());
                return paginate(records, request);
            }
        };

        let pool = &self.store.pool;
        let total = db::count_rows(pool, self.collection(), pushed.as_ref())
            .await
            .map_err(|e| map_sqlx(e, "count records"))?;
        let total = usize::try_from(total).unwrap_or(0);

        let limit = i64::try_from(request.page_size).unwrap_or(i64::MAX);
        let offset = i64::try_from(request.skip()).unwrap_or(i64::MAX);
        let items = db::select_rows(
            pool,
            self.collection(),
            pushed.as_ref(),
            Some((limit, offset)),
        )
        .await
        .map_err(|e| map_sqlx(e, "query page"))?
        .into_iter()
        .map(|row| row.decode())
        .collect::<Result<Vec<R>>>()?;

        Ok(Page {
            items,
            page_number: page_number(request.page_number, request.page_size, total),
            total,
        })
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
        let (stats, _) = self.apply().await?;
        Ok(stats)
    }

    async fn insert_one(mut self, record: R) -> Result<R::Id> {
        self.staged.add_range(vec![record]);
        let (_, inserted) = self.apply().await?;
        inserted
            .into_iter()
            .next()
            .ok_or_else(|| Error::store("insert reported no identity"))
    }
}
