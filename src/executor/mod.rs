//! Graph executor: runs get/list/create/update/delete on a root (or a batch
//! of roots) and cascades them across the associations of an include tree.

mod fetch;
pub mod listener;
mod persist;
mod remove;
pub mod unit_of_work;

pub use listener::{EntityListener, ListenerRegistry};
pub use unit_of_work::UnitOfWork;

use crate::cascade::IncludeTypes;
use crate::config::EngineConfig;
use crate::core::{EntityRef, Result, Value};
use crate::include::IncludeTree;
use crate::schema::MetadataRegistry;
use crate::storage::{Pagination, Predicate, StorageRegistry};
use crate::strategy::{AssociationStrategy, StrategyRegistry};
use std::sync::Arc;

/// Entry point of the engine.
///
/// Holds the immutable collaborators (metadata, backends, strategies,
/// listeners, config). Every top-level call runs in a fresh [`UnitOfWork`];
/// use [`GraphExecutor::unit_of_work`] to share one across several calls.
pub struct GraphExecutor {
    registry: Arc<MetadataRegistry>,
    storage: Arc<StorageRegistry>,
    strategies: StrategyRegistry,
    listeners: ListenerRegistry,
    config: EngineConfig,
}

impl GraphExecutor {
    pub fn new(registry: Arc<MetadataRegistry>, storage: Arc<StorageRegistry>) -> Self {
        Self {
            registry,
            storage,
            strategies: StrategyRegistry::with_default_strategies(),
            listeners: ListenerRegistry::new(),
            config: EngineConfig::default(),
        }
    }

    /// Executor over one in-memory backend per stored type.
    pub fn in_memory(registry: MetadataRegistry) -> Self {
        let storage = StorageRegistry::in_memory(&registry);
        Self::new(Arc::new(registry), Arc::new(storage))
    }

    pub fn with_config(mut self, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn with_listener(mut self, entity_type: &str, listener: Arc<dyn EntityListener>) -> Self {
        self.listeners.register(entity_type, listener);
        self
    }

    /// Registers a strategy that is consulted before the built-in ones.
    pub fn with_strategy(mut self, strategy: Box<dyn AssociationStrategy>) -> Self {
        self.strategies.register_first(strategy);
        self
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    pub fn storage(&self) -> &StorageRegistry {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn unit_of_work(&self) -> UnitOfWork<'_> {
        UnitOfWork::new(
            &self.registry,
            &self.storage,
            &self.strategies,
            &self.listeners,
            &self.config,
        )
    }

    // ========================================================================
    // Include trees
    // ========================================================================

    /// Tree without edges for `entity_type`, with the FETCH mask.
    pub fn include(&self, entity_type: &str) -> IncludeTree {
        IncludeTree::empty(entity_type)
    }

    /// Tree without edges whose later `include` calls expand defaults
    /// matching `mask`.
    pub fn include_for(&self, entity_type: &str, mask: IncludeTypes) -> IncludeTree {
        IncludeTree::new(entity_type, mask)
    }

    pub fn fetch_tree(&self, entity_type: &str) -> Result<IncludeTree> {
        IncludeTree::for_fetch(&self.registry, entity_type)
    }

    pub fn persist_tree(&self, entity_type: &str) -> Result<IncludeTree> {
        IncludeTree::for_persist(&self.registry, entity_type)
    }

    pub fn remove_tree(&self, entity_type: &str) -> Result<IncludeTree> {
        IncludeTree::for_remove(&self.registry, entity_type)
    }

    pub fn parse_include(&self, entity_type: &str, text: &str) -> Result<IncludeTree> {
        IncludeTree::parse(&self.registry, entity_type, text)
    }

    // ========================================================================
    // One unit of work per call
    // ========================================================================

    pub fn get(&self, entity_type: &str, key: &Value, include: &IncludeTree) -> Result<Option<EntityRef>> {
        self.unit_of_work().get(entity_type, key, include)
    }

    pub fn get_many(&self, entity_type: &str, keys: &[Value], include: &IncludeTree) -> Result<Vec<EntityRef>> {
        self.unit_of_work().get_many(entity_type, keys, include)
    }

    pub fn list(
        &self,
        entity_type: &str,
        predicate: &Predicate,
        pagination: &Pagination,
        include: &IncludeTree,
    ) -> Result<Vec<EntityRef>> {
        self.unit_of_work().list(entity_type, predicate, pagination, include)
    }

    pub fn first(&self, entity_type: &str, predicate: &Predicate, include: &IncludeTree) -> Result<Option<EntityRef>> {
        self.unit_of_work().first(entity_type, predicate, include)
    }

    pub fn count(&self, entity_type: &str, predicate: &Predicate) -> Result<usize> {
        self.unit_of_work().count(entity_type, predicate)
    }

    pub fn create(&self, entity: &EntityRef, include: &IncludeTree) -> Result<EntityRef> {
        self.unit_of_work().create(entity, include)
    }

    pub fn create_all(&self, entities: &[EntityRef], include: &IncludeTree) -> Result<Vec<EntityRef>> {
        self.unit_of_work().create_all(entities, include)
    }

    pub fn update(&self, entity: &EntityRef, include: &IncludeTree) -> Result<EntityRef> {
        self.unit_of_work().update(entity, include)
    }

    pub fn update_all(&self, entities: &[EntityRef], include: &IncludeTree) -> Result<Vec<EntityRef>> {
        self.unit_of_work().update_all(entities, include)
    }

    pub fn delete(&self, entity_type: &str, key: &Value, include: &IncludeTree) -> Result<bool> {
        self.unit_of_work().delete(entity_type, key, include)
    }

    pub fn delete_entity(&self, entity: &EntityRef, include: &IncludeTree) -> Result<()> {
        self.unit_of_work().delete_entity(entity, include)
    }

    pub fn delete_all(&self, entities: &[EntityRef], include: &IncludeTree) -> Result<usize> {
        self.unit_of_work().delete_all(entities, include)
    }
}
