use super::{AssociationContext, AssociationStrategy, held_children, parent_keys};
use crate::cascade::{IncludeType, IncludeTypes};
use crate::core::{EntityRef, Related, Result, Value};
use crate::executor::UnitOfWork;
use crate::include::IncludeNode;
use crate::schema::Topology;
use crate::storage::{Pagination, Predicate};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Each child's `remote_field` holds the parent key; the parent side is a
/// view computed by querying children.
pub struct InverseForeignKeyStrategy;

fn remote_field<'a>(context: &AssociationContext<'a>) -> &'a str {
    match &context.association.topology {
        Topology::InverseForeignKey { remote_field } => remote_field,
        _ => &context.association.name,
    }
}

impl InverseForeignKeyStrategy {
    /// Children currently linked to any of `parent_keys` in storage.
    fn linked(
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        parent_keys: &[Value],
    ) -> Result<Vec<EntityRef>> {
        if parent_keys.is_empty() {
            return Ok(Vec::new());
        }
        let records = uow.list_where_in(&context.target.name, remote_field(context), parent_keys)?;
        uow.materialize(context.target, records)
    }

    /// Sets `remote_field` to `value` on the given child keys with one patch,
    /// keeping cached instances in step.
    fn relink(
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        child_keys: Vec<Value>,
        value: Value,
    ) -> Result<()> {
        if child_keys.is_empty() {
            return Ok(());
        }
        let field = remote_field(context);
        for key in &child_keys {
            if let Some(child) = uow.cached(&context.target.name, key) {
                child.write()?.set_field(field, value.clone());
            }
        }
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), value);
        uow.backend(&context.target.name)?
            .patch(&fields, &Predicate::KeyIn(child_keys), &Pagination::all())?;
        Ok(())
    }
}

impl AssociationStrategy for InverseForeignKeyStrategy {
    fn name(&self) -> &'static str {
        "inverse_foreign_key"
    }

    fn can_handle(&self, topology: &Topology) -> bool {
        matches!(topology, Topology::InverseForeignKey { .. })
    }

    fn resolve(
        &self,
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        parents: &[EntityRef],
        node: &IncludeNode,
    ) -> Result<Vec<Related>> {
        let keys = parent_keys(parents)?;
        let children = Self::linked(uow, context, &keys)?;

        let field = remote_field(context);
        let mut by_parent: HashMap<Value, Vec<EntityRef>> = HashMap::new();
        for child in &children {
            by_parent.entry(child.field(field)?).or_default().push(child.clone());
        }
        uow.fetch_relations(&children, node.nested())?;

        let mut resolved = Vec::with_capacity(parents.len());
        for parent in parents {
            let key = parent.key()?;
            let children = by_parent.get(&key).cloned().unwrap_or_default();
            resolved.push(context.related(children));
        }
        Ok(resolved)
    }

    fn persist(
        &self,
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        parents: &[EntityRef],
        node: &IncludeNode,
    ) -> Result<()> {
        let field = remote_field(context);
        let target = &context.target.name;

        // Point every held child at its parent before it is written.
        let mut relinked: Vec<(EntityRef, Value, bool)> = Vec::new();
        for parent in parents {
            let parent_key = parent.key()?;
            if parent_key.is_null() {
                continue;
            }
            for child in parent.related(context.name())? {
                let (child_key, current) = {
                    let guard = child.read()?;
                    (guard.key().clone(), guard.field(field).cloned().unwrap_or_default())
                };
                if current != parent_key {
                    child.write()?.set_field(field, parent_key.clone());
                    let written_before = uow.was_written(target, &child_key);
                    relinked.push((child, parent_key.clone(), written_before));
                }
            }
        }

        let children = held_children(parents, context.name())?;
        uow.save_children(context.target, &children, node.policy(), node.nested())?;
        let mut held_keys = HashSet::new();
        for child in &children {
            held_keys.insert(child.key()?);
        }

        // Links the child write above did not carry to storage.
        let mut pending: HashMap<Value, Vec<Value>> = HashMap::new();
        for (child, parent_key, written_before) in relinked {
            let child_key = child.key()?;
            if child_key.is_null() {
                return Err(context.transient_child());
            }
            if written_before || !uow.was_written(target, &child_key) {
                pending.entry(parent_key).or_default().push(child_key);
            }
        }
        for (parent_key, child_keys) in pending {
            Self::relink(uow, context, child_keys, parent_key)?;
        }

        // Children still linked in storage but no longer held.
        let keys = parent_keys(parents)?;
        let stale_records: Vec<_> = uow
            .list_where_in(target, field, &keys)?
            .into_iter()
            .filter(|record| !held_keys.contains(&record.key))
            .collect();
        if stale_records.is_empty() {
            return Ok(());
        }
        if node.policy().contains(IncludeType::DeleteOrphans) {
            let stale = uow.materialize(context.target, stale_records)?;
            uow.delete_entities(context.target, &stale, node.nested())?;
        } else {
            let stale_keys = stale_records.into_iter().map(|record| record.key).collect();
            Self::relink(uow, context, stale_keys, Value::Null)?;
        }
        Ok(())
    }

    fn remove(
        &self,
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        parents: &[EntityRef],
        node: &IncludeNode,
    ) -> Result<()> {
        let policy = node.policy();
        if !policy.matches_any_of(IncludeTypes::REMOVE) {
            return Ok(());
        }
        let keys = parent_keys(parents)?;
        let children = Self::linked(uow, context, &keys)?;
        if children.is_empty() {
            return Ok(());
        }

        if !policy.contains(IncludeType::Delete) {
            // DELETE_ORPHANS alone: detach first. A child has a single owner,
            // so every detached child is an orphan.
            let mut child_keys = Vec::with_capacity(children.len());
            for child in &children {
                child_keys.push(child.key()?);
            }
            Self::relink(uow, context, child_keys, Value::Null)?;
        }
        uow.delete_entities(context.target, &children, node.nested())?;
        Ok(())
    }
}
