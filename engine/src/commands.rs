//! High-level command surface over a store.
//!
//! [`Context`] bundles a store with a retry policy and a cancellation token
//! and exposes the list reconciliations alongside single-record commands.
//! Every command runs inside [`execute_with_retry`], so a transient store
//! failure re-runs the whole read-compute-commit pipeline.

use crate::paging::{paginate, Page, PageRequest};
use crate::reconcile::{ReconcileRequest, ReconcileSummary, Reconciler};
use crate::retry::{execute_with_retry, RetryConfig};
use crate::sorting::Sorter;
use crate::{error::Result, Entity, Error, Filter, Policy, Store, UnitOfWork};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use tokio_util::sync::CancellationToken;

pub struct Context<S> {
    store: S,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl<S> Context<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: RetryConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Use `cancel` for every command issued through this context.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `f` under this context's retry policy. `f` is invoked once per
    /// attempt and must redo all of its reads.
    pub async fn execute_resilient<'c, T, F, Fut>(&'c self, mut f: F) -> Result<T>
    where
        F: FnMut(&'c S) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let store = &self.store;
        execute_with_retry(&self.retry, &self.cancel, || f(store)).await
    }

    /// Reconcile under this context's retry policy and cancellation token.
    pub async fn reconcile<R, K>(
        &self,
        request: &ReconcileRequest<R, K>,
    ) -> Result<ReconcileSummary<K>>
    where
        S: Store<R>,
        R: Entity,
        K: Eq + Hash + Clone + Debug + Send + Sync,
    {
        let reconciler = Reconciler::new(&self.store);
        execute_with_retry(&self.retry, &self.cancel, || {
            reconciler.reconcile(request, &self.cancel)
        })
        .await
    }

    async fn reconcile_list<R, K>(
        &self,
        desired: Vec<R>,
        key_of: impl Fn(&R) -> K + Send + Sync + 'static,
        filter: Option<Filter<R>>,
        policy: Policy,
    ) -> Result<ReconcileSummary<K>>
    where
        S: Store<R>,
        R: Entity,
        K: Eq + Hash + Clone + Debug + Send + Sync,
    {
        let mut request = ReconcileRequest::new(desired).key_of(key_of).policy(policy);
        if let Some(filter) = filter {
            request = request.filter(filter);
        }
        self.reconcile(&request).await
    }

    /// Add, update and remove so the filtered records mirror `desired`.
    pub async fn sync_from_list<R, K>(
        &self,
        desired: Vec<R>,
        key_of: impl Fn(&R) -> K + Send + Sync + 'static,
        filter: Option<Filter<R>>,
    ) -> Result<ReconcileSummary<K>>
    where
        S: Store<R>,
        R: Entity,
        K: Eq + Hash + Clone + Debug + Send + Sync,
    {
        self.reconcile_list(desired, key_of, filter, Policy::sync())
            .await
    }

    /// Add new and update existing records; never remove.
    pub async fn add_or_update_from_list<R, K>(
        &self,
        desired: Vec<R>,
        key_of: impl Fn(&R) -> K + Send + Sync + 'static,
        filter: Option<Filter<R>>,
    ) -> Result<ReconcileSummary<K>>
    where
        S: Store<R>,
        R: Entity,
        K: Eq + Hash + Clone + Debug + Send + Sync,
    {
        self.reconcile_list(desired, key_of, filter, Policy::add_or_update())
            .await
    }

    /// Add new and remove missing records; never touch existing ones.
    pub async fn add_or_remove_from_list<R, K>(
        &self,
        desired: Vec<R>,
        key_of: impl Fn(&R) -> K + Send + Sync + 'static,
        filter: Option<Filter<R>>,
    ) -> Result<ReconcileSummary<K>>
    where
        S: Store<R>,
        R: Entity,
        K: Eq + Hash + Clone + Debug + Send + Sync,
    {
        self.reconcile_list(desired, key_of, filter, Policy::add_or_remove())
            .await
    }

    /// Insert `entity` and return the identity the store gave it.
    pub async fn add_and_save<R>(&self, entity: R) -> Result<R::Id>
    where
        S: Store<R>,
        R: Entity,
    {
        let entity = &entity;
        self.execute_resilient(|store| async move {
            store.begin().await?.insert_one(entity.clone()).await
        })
        .await
    }

    /// Copy `entity`'s fields onto the stored record identified by `id`.
    pub async fn update_and_save<R>(&self, entity: &R, id: &R::Id) -> Result<()>
    where
        S: Store<R>,
        R: Entity,
    {
        self.execute_resilient(|store| async move {
            let mut uow = store.begin().await?;
            let current = uow
                .find(id)
                .await?
                .ok_or_else(|| Error::not_found(format!("{:?}", id)))?;
            uow.copy_fields(entity, current);
            uow.commit().await?;
            Ok(())
        })
        .await
    }

    /// Remove the stored record identified by `id`.
    pub async fn remove_and_save<R>(&self, id: &R::Id) -> Result<()>
    where
        S: Store<R>,
        R: Entity,
    {
        self.execute_resilient(|store| async move {
            let mut uow = store.begin().await?;
            let current = uow
                .find(id)
                .await?
                .ok_or_else(|| Error::not_found(format!("{:?}", id)))?;
            uow.remove_range(vec![current]);
            uow.commit().await?;
            Ok(())
        })
        .await
    }

    pub async fn find<R>(&self, id: &R::Id) -> Result<Option<R>>
    where
        S: Store<R>,
        R: Entity,
    {
        self.execute_resilient(|store| async move { store.begin().await?.find(id).await })
            .await
    }

    /// One page of the records matching `filter`, in identity order.
    pub async fn page<R>(
        &self,
        filter: Option<&Filter<R>>,
        request: PageRequest,
    ) -> Result<Page<R>>
    where
        S: Store<R>,
        R: Entity,
    {
        request.validate()?;
        self.execute_resilient(|store| async move {
            store.begin().await?.query_page(filter, request).await
        })
        .await
    }

    /// One page of the records matching `filter`, ordered by `sorter`.
    ///
    /// Every match is read and sorted before the page is cut.
    pub async fn page_sorted<R>(
        &self,
        filter: Option<&Filter<R>>,
        request: PageRequest,
        sorter: &Sorter<'_, R>,
    ) -> Result<Page<R>>
    where
        S: Store<R>,
        R: Entity,
    {
        request.validate()?;
        let mut records = self
            .execute_resilient(|store| async move { store.begin().await?.query(filter).await })
            .await?;
        sorter.sort(&mut records);
        paginate(records, request)
    }
}
