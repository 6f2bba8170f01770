use super::{AssociationContext, AssociationStrategy, distinct, held_children, link_keys};
use crate::cascade::{IncludeType, IncludeTypes};
use crate::core::{EntityRef, Related, Result, Value};
use crate::executor::UnitOfWork;
use crate::include::IncludeNode;
use crate::schema::Topology;
use crate::storage::{Pagination, Predicate};
use std::collections::BTreeMap;

/// The parent's `local_field` holds the child key, or a list of child keys
/// for a collection. Attaching and detaching patches the parent record.
pub struct OwningForeignKeyStrategy;

fn local_field<'a>(context: &AssociationContext<'a>) -> &'a str {
    match &context.association.topology {
        Topology::OwningForeignKey { local_field } => local_field,
        // Only reachable through a misrouted call; fall back to the name.
        _ => &context.association.name,
    }
}

impl OwningForeignKeyStrategy {
    /// Value the foreign key must hold for `related`.
    fn link_value(context: &AssociationContext<'_>, related: &Related) -> Result<Value> {
        match related {
            Related::One(None) => Ok(Value::Null),
            Related::One(Some(child)) => {
                let key = child.key()?;
                if key.is_null() {
                    return Err(context.transient_child());
                }
                Ok(key)
            }
            Related::Many(children) => {
                let mut keys = Vec::with_capacity(children.len());
                for child in children {
                    let key = child.key()?;
                    if key.is_null() {
                        return Err(context.transient_child());
                    }
                    keys.push(key);
                }
                Ok(Value::List(keys))
            }
        }
    }

    /// Writes `value` to the parents' foreign key, in memory and, for stored
    /// parents, with one patch per parent.
    fn set_link(
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        parent: &EntityRef,
        value: Value,
    ) -> Result<()> {
        let field = local_field(context);
        let key = {
            let mut guard = parent.write()?;
            guard.set_field(field, value.clone());
            guard.key().clone()
        };
        if context.parent.is_stored() && !key.is_null() {
            let mut fields = BTreeMap::new();
            fields.insert(field.to_string(), value);
            uow.backend(&context.parent.name)?
                .patch(&fields, &Predicate::KeyIn(vec![key]), &Pagination::all())?;
        }
        Ok(())
    }

    /// Deletes the children among `candidates` that no parent record links
    /// to any more.
    fn sweep_orphans(
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        candidates: Vec<Value>,
        node: &IncludeNode,
    ) -> Result<()> {
        if candidates.is_empty() || !context.parent.is_stored() {
            return Ok(());
        }
        let field = local_field(context);
        let parents = uow.backend(&context.parent.name)?;
        let mut orphans = Vec::new();
        for key in candidates {
            if parents.count(&Predicate::contains(field, key.clone()))? == 0 {
                orphans.push(key);
            }
        }
        if orphans.is_empty() {
            return Ok(());
        }
        let loaded = uow.load_many(context.target, &orphans)?;
        let children: Vec<EntityRef> = orphans.iter().filter_map(|key| loaded.get(key).cloned()).collect();
        uow.delete_entities(context.target, &children, node.nested())?;
        Ok(())
    }
}

impl AssociationStrategy for OwningForeignKeyStrategy {
    fn name(&self) -> &'static str {
        "owning_foreign_key"
    }

    fn can_handle(&self, topology: &Topology) -> bool {
        matches!(topology, Topology::OwningForeignKey { .. })
    }

    fn resolve(
        &self,
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        parents: &[EntityRef],
        node: &IncludeNode,
    ) -> Result<Vec<Related>> {
        let field = local_field(context);
        let mut per_parent = Vec::with_capacity(parents.len());
        for parent in parents {
            per_parent.push(link_keys(&parent.field(field)?));
        }

        let wanted = distinct(per_parent.iter().flatten().cloned());
        let loaded = uow.load_many(context.target, &wanted)?;
        let children: Vec<EntityRef> = wanted.iter().filter_map(|key| loaded.get(key).cloned()).collect();
        uow.fetch_relations(&children, node.nested())?;

        Ok(per_parent
            .into_iter()
            .map(|keys| {
                let children = keys.iter().filter_map(|key| loaded.get(key).cloned()).collect();
                context.related(children)
            })
            .collect())
    }

    fn persist(
        &self,
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        parents: &[EntityRef],
        node: &IncludeNode,
    ) -> Result<()> {
        let children = held_children(parents, context.name())?;
        uow.save_children(context.target, &children, node.policy(), node.nested())?;

        let field = local_field(context);
        let mut replaced = Vec::new();
        for parent in parents {
            let related = match parent.read()?.relation(context.name()) {
                Some(related) => related.clone(),
                None => continue,
            };
            let value = Self::link_value(context, &related)?;
            let current = parent.field(field)?;
            if current != value {
                let kept = link_keys(&value);
                replaced.extend(link_keys(&current).into_iter().filter(|key| !kept.contains(key)));
                Self::set_link(uow, context, parent, value)?;
            }
        }

        if node.policy().contains(IncludeType::DeleteOrphans) {
            Self::sweep_orphans(uow, context, distinct(replaced), node)?;
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
        let field = local_field(context);
        let mut keys = Vec::new();
        for parent in parents {
            keys.extend(link_keys(&parent.field(field)?));
        }
        let keys = distinct(keys);
        if keys.is_empty() {
            return Ok(());
        }

        if policy.contains(IncludeType::Delete) {
            let loaded = uow.load_many(context.target, &keys)?;
            let children: Vec<EntityRef> = keys.iter().filter_map(|key| loaded.get(key).cloned()).collect();
            uow.delete_entities(context.target, &children, node.nested())?;
            return Ok(());
        }

        // DELETE_ORPHANS alone: detach, then sweep what lost its last owner.
        for parent in parents {
            if !parent.field(field)?.is_null() {
                Self::set_link(uow, context, parent, Value::Null)?;
            }
        }
        Self::sweep_orphans(uow, context, keys, node)
    }
}
