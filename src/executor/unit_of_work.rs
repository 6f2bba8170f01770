use super::ListenerRegistry;
use crate::cascade::{CascadeOperation, CascadeTracker};
use crate::config::EngineConfig;
use crate::core::{DbError, EntityRef, Result, Value, dedup_refs};
use crate::identity::IdentityMap;
use crate::include::{IncludeNode, IncludeTree};
use crate::schema::{EntityType, MetadataRegistry};
use crate::storage::{Pagination, Predicate, StorageBackend, StorageRegistry};
use crate::strategy::{AssociationContext, StrategyRegistry};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info_span;

/// One logical call tree: its own Identity Map, Cascade Tracker and
/// bookkeeping of what has been written or is being deleted.
///
/// Several operations issued on the same unit of work share that state, so
/// an entity loaded by one call is the same handle in the next. A unit of
/// work is single-threaded and must not outlive its executor.
pub struct UnitOfWork<'e> {
    pub(super) registry: &'e MetadataRegistry,
    pub(super) storage: &'e StorageRegistry,
    pub(super) strategies: &'e StrategyRegistry,
    pub(super) listeners: &'e ListenerRegistry,
    pub(super) config: &'e EngineConfig,
    pub(super) identity: IdentityMap,
    pub(super) tracker: CascadeTracker,
    pub(super) written: HashSet<(String, Value)>,
    pub(super) deleting: HashSet<(String, Value)>,
    pub(super) depth: usize,
}

impl<'e> UnitOfWork<'e> {
    pub(crate) fn new(
        registry: &'e MetadataRegistry,
        storage: &'e StorageRegistry,
        strategies: &'e StrategyRegistry,
        listeners: &'e ListenerRegistry,
        config: &'e EngineConfig,
    ) -> Self {
        Self {
            registry,
            storage,
            strategies,
            listeners,
            config,
            identity: IdentityMap::new(),
            tracker: CascadeTracker::new(),
            written: HashSet::new(),
            deleting: HashSet::new(),
            depth: 0,
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Loads one root and fetches the associations in `include`.
    pub fn get(&mut self, entity_type: &str, key: &Value, include: &IncludeTree) -> Result<Option<EntityRef>> {
        let span = info_span!("cascade.get", entity_type = %entity_type, key = %key);
        let _enter = span.enter();

        let meta = self.root_meta(entity_type, include)?;
        let record = match self.backend(entity_type)?.get(key)? {
            Some(record) => record,
            None => return Ok(None),
        };
        let roots = self.materialize(meta, vec![record])?;
        self.fetch_relations(&roots, include)?;
        Ok(roots.into_iter().next())
    }

    /// Loads the roots stored under `keys`, in key order; absent keys are skipped.
    pub fn get_many(&mut self, entity_type: &str, keys: &[Value], include: &IncludeTree) -> Result<Vec<EntityRef>> {
        let span = info_span!("cascade.get_many", entity_type = %entity_type, keys = keys.len());
        let _enter = span.enter();

        let meta = self.root_meta(entity_type, include)?;
        let loaded = self.load_many(meta, keys)?;
        let roots = dedup_refs(keys.iter().filter_map(|key| loaded.get(key).cloned()));
        self.fetch_relations(&roots, include)?;
        Ok(roots)
    }

    pub fn list(
        &mut self,
        entity_type: &str,
        predicate: &Predicate,
        pagination: &Pagination,
        include: &IncludeTree,
    ) -> Result<Vec<EntityRef>> {
        let span = info_span!("cascade.list", entity_type = %entity_type, predicate = %predicate);
        let _enter = span.enter();

        let meta = self.root_meta(entity_type, include)?;
        let records = self.backend(entity_type)?.list(predicate, pagination)?;
        let roots = self.materialize(meta, records)?;
        self.fetch_relations(&roots, include)?;
        Ok(roots)
    }

    pub fn first(
        &mut self,
        entity_type: &str,
        predicate: &Predicate,
        include: &IncludeTree,
    ) -> Result<Option<EntityRef>> {
        let span = info_span!("cascade.first", entity_type = %entity_type, predicate = %predicate);
        let _enter = span.enter();

        let meta = self.root_meta(entity_type, include)?;
        let record = match self.backend(entity_type)?.first(predicate, &Pagination::all())? {
            Some(record) => record,
            None => return Ok(None),
        };
        let roots = self.materialize(meta, vec![record])?;
        self.fetch_relations(&roots, include)?;
        Ok(roots.into_iter().next())
    }

    pub fn count(&mut self, entity_type: &str, predicate: &Predicate) -> Result<usize> {
        self.registry.entity(entity_type)?;
        self.backend(entity_type)?.count(predicate)
    }

    /// Children of one association of `parent`, fetched along the
    /// association's default sub-tree. The parent's slot is left untouched.
    pub fn resolve(&mut self, parent: &EntityRef, association: &str) -> Result<Vec<EntityRef>> {
        let registry = self.registry;
        let parent_type = parent.type_name()?;
        let parent_meta = registry.entity(&parent_type)?;
        let meta = registry.association(&parent_type, association)?;
        let mut tree = IncludeTree::empty(parent_type.as_str());
        tree.include(registry, association)?;
        let node: IncludeNode = match tree.get(association) {
            Some(node) => node.clone(),
            None => return Err(DbError::unknown_association(parent_type.as_str(), association)),
        };

        let strategies = self.strategies;
        let context = AssociationContext::new(registry, parent_meta, meta)?;
        let strategy = strategies.strategy_for(&meta.topology)?;
        let related = self.nested(|uow| strategy.resolve_one(uow, &context, parent, &node))?;
        Ok(related.entities())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Creates the root, then cascades into every association of `include`
    /// whose policy has CREATE or UPDATE.
    pub fn create(&mut self, entity: &EntityRef, include: &IncludeTree) -> Result<EntityRef> {
        let span = info_span!("cascade.create", entity_type = %include.entity_type());
        let _enter = span.enter();

        self.create_roots(std::slice::from_ref(entity), include)?;
        Ok(entity.clone())
    }

    pub fn create_all(&mut self, entities: &[EntityRef], include: &IncludeTree) -> Result<Vec<EntityRef>> {
        let span = info_span!("cascade.create_all", entity_type = %include.entity_type(), count = entities.len());
        let _enter = span.enter();

        self.create_roots(entities, include)?;
        Ok(entities.to_vec())
    }

    /// Updates the root (checking its version when it carries one), then
    /// cascades like [`create`](Self::create).
    pub fn update(&mut self, entity: &EntityRef, include: &IncludeTree) -> Result<EntityRef> {
        let span = info_span!("cascade.update", entity_type = %include.entity_type());
        let _enter = span.enter();

        self.update_roots(std::slice::from_ref(entity), include)?;
        Ok(entity.clone())
    }

    pub fn update_all(&mut self, entities: &[EntityRef], include: &IncludeTree) -> Result<Vec<EntityRef>> {
        let span = info_span!("cascade.update_all", entity_type = %include.entity_type(), count = entities.len());
        let _enter = span.enter();

        self.update_roots(entities, include)?;
        Ok(entities.to_vec())
    }

    /// Deletes the root stored under `key` together with its delete cascade.
    /// Returns `false` when nothing was stored under the key.
    pub fn delete(&mut self, entity_type: &str, key: &Value, include: &IncludeTree) -> Result<bool> {
        let span = info_span!("cascade.delete", entity_type = %entity_type, key = %key);
        let _enter = span.enter();

        let meta = self.root_meta(entity_type, include)?;
        if !self.needs_root_for_delete(meta, include)? {
            let deleted = self.backend(entity_type)?.delete(key)?;
            self.identity.evict(entity_type, key);
            return Ok(deleted);
        }

        let record = match self.backend(entity_type)?.get(key)? {
            Some(record) => record,
            None => return Ok(false),
        };
        let roots = self.materialize(meta, vec![record])?;
        Ok(self.delete_entities(meta, &roots, include)? > 0)
    }

    /// Deletes an entity that is assumed to be stored; a missing record is
    /// reported as `NotFound`.
    pub fn delete_entity(&mut self, entity: &EntityRef, include: &IncludeTree) -> Result<()> {
        let span = info_span!("cascade.delete_entity", entity_type = %include.entity_type());
        let _enter = span.enter();

        self.delete_roots(std::slice::from_ref(entity), include)?;
        Ok(())
    }

    /// Deletes every entity (all of `include`'s type); returns how many
    /// records were removed.
    pub fn delete_all(&mut self, entities: &[EntityRef], include: &IncludeTree) -> Result<usize> {
        let span = info_span!("cascade.delete_all", entity_type = %include.entity_type(), count = entities.len());
        let _enter = span.enter();

        self.delete_roots(entities, include)
    }

    // ========================================================================
    // State shared with strategies
    // ========================================================================

    pub fn registry(&self) -> &'e MetadataRegistry {
        self.registry
    }

    pub fn config(&self) -> &'e EngineConfig {
        self.config
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    pub fn identity(&self) -> &IdentityMap {
        &self.identity
    }

    pub fn tracker(&self) -> &CascadeTracker {
        &self.tracker
    }

    pub fn backend(&self, entity_type: &str) -> Result<Arc<dyn StorageBackend>> {
        self.storage.backend(entity_type)
    }

    /// Whether (type, key) has been created or updated in this unit of work.
    pub fn was_written(&self, entity_type: &str, key: &Value) -> bool {
        self.written.contains(&(entity_type.to_string(), key.clone()))
    }

    /// Canonical handle for (type, key), if one is cached.
    pub fn cached(&self, entity_type: &str, key: &Value) -> Option<EntityRef> {
        self.identity.get(entity_type, key)
    }

    /// Runs `step` one cascade level deeper.
    pub fn nested<T, F>(&mut self, step: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        if self.depth >= self.config.max_depth {
            return Err(DbError::DepthExceeded(self.config.max_depth));
        }
        self.depth += 1;
        let result = step(self);
        self.depth -= 1;
        result
    }

    /// Parents whose (operation, key, association) edge has not been handed
    /// out yet. Parents without identity of their own (embeddable types,
    /// unsaved instances) always pass.
    pub(super) fn untraversed(
        &mut self,
        operation: CascadeOperation,
        parent_meta: &EntityType,
        parents: &[EntityRef],
        association: &str,
    ) -> Result<Vec<EntityRef>> {
        let mut pending = Vec::new();
        for parent in dedup_refs(parents.iter().cloned()) {
            let key = parent.key()?;
            if !parent_meta.is_stored()
                || key.is_null()
                || self
                    .tracker
                    .should_traverse(operation, &parent_meta.name, &key, association)
            {
                pending.push(parent);
            }
        }
        Ok(pending)
    }

    fn root_meta(&self, entity_type: &str, include: &IncludeTree) -> Result<&'e EntityType> {
        if include.entity_type() != entity_type {
            return Err(DbError::TypeMismatch(format!(
                "include tree for '{}' used on '{}'",
                include.entity_type(),
                entity_type
            )));
        }
        self.registry.entity(entity_type)
    }

    fn roots_meta(&self, entities: &[EntityRef], include: &IncludeTree) -> Result<&'e EntityType> {
        for entity in entities {
            let entity_type = entity.type_name()?;
            if entity_type != include.entity_type() {
                return Err(DbError::TypeMismatch(format!(
                    "'{}' instance passed with an include tree for '{}'",
                    entity_type,
                    include.entity_type()
                )));
            }
        }
        self.registry.entity(include.entity_type())
    }

    fn create_roots(&mut self, entities: &[EntityRef], include: &IncludeTree) -> Result<()> {
        let meta = self.roots_meta(entities, include)?;
        let roots = dedup_refs(entities.iter().cloned());
        self.write_created(meta, &roots)?;
        self.persist_relations(&roots, include)
    }

    fn update_roots(&mut self, entities: &[EntityRef], include: &IncludeTree) -> Result<()> {
        let meta = self.roots_meta(entities, include)?;
        let roots = dedup_refs(entities.iter().cloned());
        self.write_updated(meta, &roots)?;
        self.persist_relations(&roots, include)
    }

    fn delete_roots(&mut self, entities: &[EntityRef], include: &IncludeTree) -> Result<usize> {
        let meta = self.roots_meta(entities, include)?;
        let roots = dedup_refs(entities.iter().cloned());
        let backend = self.backend(&meta.name)?;
        let mut keys = Vec::with_capacity(roots.len());
        for root in &roots {
            let key = root.key()?;
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        let mut stored = backend.get_many(&keys)?;
        let mut records = Vec::with_capacity(keys.len());
        for key in &keys {
            match stored.remove(key) {
                Some(record) => records.push(record),
                None => return Err(DbError::not_found(&meta.name, key.clone())),
            }
        }
        // The cascade reads links from what is stored, not from the
        // caller's possibly partial handles.
        let loaded = self.materialize(meta, records)?;
        self.delete_entities(meta, &loaded, include)
    }

    fn needs_root_for_delete(&self, meta: &EntityType, include: &IncludeTree) -> Result<bool> {
        if self.config.load_before_delete || self.listeners.has_listeners(&meta.name) || !include.is_empty() {
            return Ok(true);
        }
        let forced = include.with_forced(self.registry, crate::cascade::IncludeTypes::REMOVE)?;
        Ok(!forced.is_empty())
    }
}
