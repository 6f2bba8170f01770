use super::UnitOfWork;
use crate::cascade::{CascadeOperation, IncludeTypes};
use crate::core::{EntityRef, Result, dedup_refs};
use crate::include::IncludeTree;
use crate::schema::EntityType;
use crate::strategy::AssociationContext;
use tracing::{Level, event};

impl<'e> UnitOfWork<'e> {
    /// Runs the delete cascade of `parents` along `tree`, after adding every
    /// association whose default policy has DELETE or DELETE_ORPHANS.
    pub fn remove_relations(&mut self, parents: &[EntityRef], tree: &IncludeTree) -> Result<()> {
        if parents.is_empty() {
            return Ok(());
        }
        let registry = self.registry;
        let strategies = self.strategies;
        let tree = tree.with_forced(registry, IncludeTypes::REMOVE)?;
        let parent_meta = registry.entity(tree.entity_type())?;

        for edge in tree.edges() {
            let association = registry.association(&parent_meta.name, edge.association())?;
            let pending = self.untraversed(CascadeOperation::Remove, parent_meta, parents, &association.name)?;
            if pending.is_empty() {
                continue;
            }
            let strategy = strategies.strategy_for(&association.topology)?;
            let context = AssociationContext::new(registry, parent_meta, association)?;
            event!(
                Level::DEBUG,
                entity_type = %parent_meta.name,
                association = %association.name,
                strategy = strategy.name(),
                policy = %edge.node().policy(),
                parents = pending.len(),
                "remove edge"
            );
            self.nested(|uow| strategy.remove(uow, &context, &pending, edge.node()))?;
        }
        Ok(())
    }

    /// Deletes `entities` of type `meta`: listeners, the cascade along
    /// `tree`, then the records themselves with one backend call. Entities
    /// already being deleted in this unit of work are skipped, which stops
    /// delete cascades from looping. Returns how many records were removed.
    pub fn delete_entities(&mut self, meta: &EntityType, entities: &[EntityRef], tree: &IncludeTree) -> Result<usize> {
        let mut targets = Vec::new();
        let mut keys = Vec::new();
        for entity in dedup_refs(entities.iter().cloned()) {
            let key = entity.key()?;
            if key.is_null() || !self.deleting.insert((meta.name.clone(), key.clone())) {
                continue;
            }
            targets.push(entity);
            keys.push(key);
        }
        if targets.is_empty() {
            return Ok(0);
        }

        let listeners = self.listeners;
        for entity in &targets {
            let guard = entity.read()?;
            listeners.notify(&meta.name, |listener| listener.before_delete(&guard))?;
        }

        self.remove_relations(&targets, tree)?;

        let mut deleted = 0;
        let backend = self.backend(&meta.name)?;
        for chunk in keys.chunks(self.batch_size()) {
            deleted += backend.delete_many(chunk)?;
        }

        for (entity, key) in targets.iter().zip(&keys) {
            let guard = entity.read()?;
            listeners.notify(&meta.name, |listener| listener.after_delete(&guard))?;
            self.identity.evict(&meta.name, key);
        }
        Ok(deleted)
    }
}
