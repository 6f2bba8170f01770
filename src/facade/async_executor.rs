use crate::core::{DbError, EntityRef, Result, Value};
use crate::executor::{GraphExecutor, UnitOfWork};
use crate::include::IncludeTree;
use crate::storage::{Pagination, Predicate};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Async surface of the engine.
///
/// Every call runs one complete synchronous unit of work off the calling
/// task; nothing inside a unit of work is concurrent.
#[async_trait]
pub trait AsyncGraphOps: Send + Sync {
    async fn get(&self, entity_type: String, key: Value, include: IncludeTree) -> Result<Option<EntityRef>>;

    async fn list(
        &self,
        entity_type: String,
        predicate: Predicate,
        pagination: Pagination,
        include: IncludeTree,
    ) -> Result<Vec<EntityRef>>;

    async fn create(&self, entity: EntityRef, include: IncludeTree) -> Result<EntityRef>;

    async fn update(&self, entity: EntityRef, include: IncludeTree) -> Result<EntityRef>;

    async fn delete(&self, entity_type: String, key: Value, include: IncludeTree) -> Result<bool>;
}

/// Shares one [`GraphExecutor`] between tasks and hands each call to the
/// blocking pool.
#[derive(Clone)]
pub struct AsyncGraphExecutor {
    inner: Arc<GraphExecutor>,
}

impl AsyncGraphExecutor {
    pub fn new(executor: GraphExecutor) -> Self {
        Self {
            inner: Arc::new(executor),
        }
    }

    pub fn from_shared(executor: Arc<GraphExecutor>) -> Self {
        Self { inner: executor }
    }

    pub fn executor(&self) -> &GraphExecutor {
        &self.inner
    }

    /// Runs `work` inside one fresh unit of work on a blocking worker.
    ///
    /// Use this to share the identity map and tracker across several
    /// operations from async code.
    pub async fn run<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let executor = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut uow = executor.unit_of_work();
            work(&mut uow)
        })
        .await
        .map_err(|e| {
            debug!("unit of work did not complete: {}", e);
            DbError::ExecutionError(format!("unit of work did not complete: {}", e))
        })?
    }
}

#[async_trait]
impl AsyncGraphOps for AsyncGraphExecutor {
    async fn get(&self, entity_type: String, key: Value, include: IncludeTree) -> Result<Option<EntityRef>> {
        self.run(move |uow| uow.get(&entity_type, &key, &include)).await
    }

    async fn list(
        &self,
        entity_type: String,
        predicate: Predicate,
        pagination: Pagination,
        include: IncludeTree,
    ) -> Result<Vec<EntityRef>> {
        self.run(move |uow| uow.list(&entity_type, &predicate, &pagination, &include))
            .await
    }

    async fn create(&self, entity: EntityRef, include: IncludeTree) -> Result<EntityRef> {
        self.run(move |uow| uow.create(&entity, &include)).await
    }

    async fn update(&self, entity: EntityRef, include: IncludeTree) -> Result<EntityRef> {
        self.run(move |uow| uow.update(&entity, &include)).await
    }

    async fn delete(&self, entity_type: String, key: Value, include: IncludeTree) -> Result<bool> {
        self.run(move |uow| uow.delete(&entity_type, &key, &include)).await
    }
}
