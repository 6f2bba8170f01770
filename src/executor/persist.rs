use super::UnitOfWork;
use crate::cascade::{CascadeOperation, IncludeType, IncludeTypes};
use crate::core::{EntityRef, Record, Result, Value, dedup_refs};
use crate::include::IncludeTree;
use crate::schema::EntityType;
use crate::strategy::{AssociationContext, embedded};
use std::collections::HashSet;
use tracing::{Level, event};

impl<'e> UnitOfWork<'e> {
    /// Cascades a write into every association of `tree` whose policy has
    /// CREATE or UPDATE. Parents that never set the association are skipped.
    pub fn persist_relations(&mut self, parents: &[EntityRef], tree: &IncludeTree) -> Result<()> {
        if parents.is_empty() || tree.is_empty() {
            return Ok(());
        }
        let registry = self.registry;
        let strategies = self.strategies;
        let parent_meta = registry.entity(tree.entity_type())?;

        for edge in tree.edges() {
            if !edge.node().policy().matches_any_of(IncludeTypes::PERSIST) {
                continue;
            }
            let association = registry.association(&parent_meta.name, edge.association())?;
            let mut holders = Vec::new();
            for parent in parents {
                if parent.has_relation(&association.name)? {
                    holders.push(parent.clone());
                }
            }
            let pending = self.untraversed(CascadeOperation::Persist, parent_meta, &holders, &association.name)?;
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
                parents = pending.len(),
                "persist edge"
            );
            self.nested(|uow| strategy.persist(uow, &context, &pending, edge.node()))?;
        }
        Ok(())
    }

    /// Creates or updates `children` as `policy` allows, then cascades into
    /// their own associations along `nested`.
    ///
    /// A child counts as persisted when it has a key and either the key is
    /// backend-generated or the backend confirms the record exists. Reference
    /// stubs are never written, and a child already written in this unit of
    /// work is not written again.
    pub fn save_children(
        &mut self,
        meta: &EntityType,
        children: &[EntityRef],
        policy: IncludeTypes,
        nested: &IncludeTree,
    ) -> Result<()> {
        let children = dedup_refs(children.iter().cloned());
        if children.is_empty() {
            return Ok(());
        }

        let mut to_create = Vec::new();
        let mut to_update = Vec::new();
        let mut unconfirmed = Vec::new();
        for child in &children {
            let (key, is_reference) = {
                let guard = child.read()?;
                (guard.key().clone(), guard.is_reference())
            };
            if key.is_null() {
                to_create.push(child.clone());
            } else if is_reference || self.was_written(&meta.name, &key) {
                continue;
            } else if meta.generated_key() {
                to_update.push(child.clone());
            } else {
                unconfirmed.push((child.clone(), key));
            }
        }

        if !unconfirmed.is_empty() {
            let backend = self.backend(&meta.name)?;
            let keys: Vec<Value> = unconfirmed.iter().map(|(_, key)| key.clone()).collect();
            let mut stored = HashSet::new();
            for chunk in keys.chunks(self.batch_size()) {
                stored.extend(backend.get_many(chunk)?.into_keys());
            }
            for (child, key) in unconfirmed {
                if stored.contains(&key) {
                    to_update.push(child);
                } else {
                    to_create.push(child);
                }
            }
        }

        if policy.contains(IncludeType::Create) {
            self.write_created(meta, &to_create)?;
        }
        if policy.contains(IncludeType::Update) {
            self.write_updated(meta, &to_update)?;
        }

        let mut keyed = Vec::new();
        for child in children {
            if !child.key()?.is_null() {
                keyed.push(child);
            }
        }
        self.persist_relations(&keyed, nested)
    }

    /// Creates `entities` with one backend call and copies the stored record
    /// (generated key, initial version) back onto each instance.
    pub(crate) fn write_created(&mut self, meta: &EntityType, entities: &[EntityRef]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let listeners = self.listeners;
        let mut records = Vec::with_capacity(entities.len());
        for entity in entities {
            let mut guard = entity.write()?;
            listeners.notify(&meta.name, |listener| listener.before_create(&mut guard))?;
            records.push(embedded::inline_record(self.registry, meta, &guard)?);
        }

        let stored = self.backend(&meta.name)?.create_many(records)?;
        for (entity, record) in entities.iter().zip(stored) {
            self.written.insert((meta.name.clone(), record.key.clone()));
            entity.write()?.apply_record(record);
            self.identity.remap_or_cache(entity.clone())?;
            let guard = entity.read()?;
            listeners.notify(&meta.name, |listener| listener.after_create(&guard))?;
        }
        Ok(())
    }

    /// Updates `entities` with one backend call; the backend checks and
    /// bumps the version, which is copied back onto each instance.
    pub(crate) fn write_updated(&mut self, meta: &EntityType, entities: &[EntityRef]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let listeners = self.listeners;
        let mut records: Vec<Record> = Vec::with_capacity(entities.len());
        for entity in entities {
            let mut guard = entity.write()?;
            listeners.notify(&meta.name, |listener| listener.before_update(&mut guard))?;
            records.push(embedded::inline_record(self.registry, meta, &guard)?);
        }

        let stored = self.backend(&meta.name)?.update_many(records)?;
        for (entity, record) in entities.iter().zip(stored) {
            self.written.insert((meta.name.clone(), record.key.clone()));
            entity.write()?.apply_record(record);
            self.identity.remap_or_cache(entity.clone())?;
            let guard = entity.read()?;
            listeners.notify(&meta.name, |listener| listener.after_update(&guard))?;
        }
        Ok(())
    }
}
