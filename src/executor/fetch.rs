use super::UnitOfWork;
use crate::cascade::CascadeOperation;
use crate::core::{Entity, EntityRef, Record, Result, Value, dedup_refs};
use crate::include::IncludeTree;
use crate::schema::EntityType;
use crate::storage::{Pagination, Predicate};
use crate::strategy::AssociationContext;
use std::collections::{HashMap, HashSet};
use tracing::{Level, event};

impl<'e> UnitOfWork<'e> {
    /// Fetches every association present in `tree` onto `parents`, one
    /// strategy call per edge for all parents that still need it.
    pub fn fetch_relations(&mut self, parents: &[EntityRef], tree: &IncludeTree) -> Result<()> {
        if parents.is_empty() || tree.is_empty() {
            return Ok(());
        }
        let registry = self.registry;
        let strategies = self.strategies;
        let parent_meta = registry.entity(tree.entity_type())?;

        for edge in tree.edges() {
            let association = registry.association(&parent_meta.name, edge.association())?;
            let revisit = self.already_fetched(parent_meta, parents, &association.name)?;
            let pending = self.untraversed(CascadeOperation::Fetch, parent_meta, parents, &association.name)?;
            if !pending.is_empty() {
                let strategy = strategies.strategy_for(&association.topology)?;
                let context = AssociationContext::new(registry, parent_meta, association)?;
                event!(
                    Level::DEBUG,
                    entity_type = %parent_meta.name,
                    association = %association.name,
                    strategy = strategy.name(),
                    parents = pending.len(),
                    "fetch edge"
                );
                self.nested(|uow| strategy.fetch_onto(uow, &context, &pending, edge.node()))?;
            }

            // A refused edge keeps its earlier children, but a deeper request
            // still has to reach below them.
            let nested = edge.node().nested();
            if !revisit.is_empty() && !nested.is_empty() {
                self.nested(|uow| uow.fetch_relations(&revisit, nested))?;
            }
        }
        Ok(())
    }

    /// Children already in the slot of parents whose fetch edge was handed
    /// out earlier in this unit of work.
    fn already_fetched(
        &self,
        parent_meta: &EntityType,
        parents: &[EntityRef],
        association: &str,
    ) -> Result<Vec<EntityRef>> {
        if !parent_meta.is_stored() {
            return Ok(Vec::new());
        }
        let mut children = Vec::new();
        for parent in parents {
            let key = parent.key()?;
            if !key.is_null()
                && self
                    .tracker
                    .was_traversed(CascadeOperation::Fetch, &parent_meta.name, &key, association)
            {
                children.extend(parent.related(association)?);
            }
        }
        Ok(dedup_refs(children))
    }

    /// Canonical instances for `keys`. Keys whose canonical instance is
    /// already loaded cost no backend call; the rest are read with grouped
    /// `get_many` calls of at most `batch_size` keys. Absent keys are missing
    /// from the result.
    pub fn load_many(&mut self, meta: &EntityType, keys: &[Value]) -> Result<HashMap<Value, EntityRef>> {
        let mut found = HashMap::new();
        let mut missing = Vec::new();
        let mut seen = HashSet::new();
        for key in keys {
            if key.is_null() || !seen.insert(key.clone()) {
                continue;
            }
            match self.identity.get_loaded(&meta.name, key)? {
                Some(entity) => {
                    found.insert(key.clone(), entity);
                }
                None => missing.push(key.clone()),
            }
        }
        if missing.is_empty() {
            return Ok(found);
        }

        let backend = self.backend(&meta.name)?;
        for chunk in missing.chunks(self.batch_size()) {
            let mut records = backend.get_many(chunk)?;
            let ordered: Vec<Record> = chunk.iter().filter_map(|key| records.remove(key)).collect();
            for entity in self.materialize(meta, ordered)? {
                let key = entity.key()?;
                found.insert(key, entity);
            }
        }
        Ok(found)
    }

    /// Turns stored records into canonical instances and runs `after_load`.
    pub fn materialize(&mut self, meta: &EntityType, records: Vec<Record>) -> Result<Vec<EntityRef>> {
        let mut entities = Vec::with_capacity(records.len());
        for record in records {
            let loaded = EntityRef::new(Entity::from_record(meta.name.as_str(), record));
            let canonical = self.identity.remap_or_cache(loaded)?;
            self.after_load(meta, &canonical)?;
            entities.push(canonical);
        }
        Ok(entities)
    }

    /// Records of `entity_type` whose `field` is one of `values`, one `list`
    /// call per `batch_size` values.
    pub fn list_where_in(&self, entity_type: &str, field: &str, values: &[Value]) -> Result<Vec<Record>> {
        let backend = self.backend(entity_type)?;
        let mut records = Vec::new();
        for chunk in values.chunks(self.batch_size()) {
            let predicate = Predicate::is_in(field, chunk.to_vec());
            records.extend(backend.list(&predicate, &Pagination::all())?);
        }
        Ok(records)
    }

    pub(crate) fn after_load(&self, meta: &EntityType, entity: &EntityRef) -> Result<()> {
        if !self.listeners.has_listeners(&meta.name) {
            return Ok(());
        }
        let guard = entity.read()?;
        self.listeners
            .notify(&meta.name, |listener| listener.after_load(&guard))
    }
}
