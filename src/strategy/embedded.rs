use super::{AssociationContext, AssociationStrategy, held_children};
use crate::core::{DbError, Entity, EntityRef, Record, Related, Result, Value};
use crate::executor::UnitOfWork;
use crate::include::IncludeNode;
use crate::schema::{EntityType, MetadataRegistry, Topology};
use crate::storage::{Pagination, Predicate};
use std::collections::BTreeMap;

/// Children live inline in the parent's `local_field`: a map for a single
/// child, a list of maps for a collection. They have no storage or identity
/// of their own, so they are never put in the identity map.
pub struct EmbeddedStrategy;

fn inline_field<'a>(context: &AssociationContext<'a>) -> &'a str {
    match &context.association.topology {
        Topology::Embedded { local_field } => local_field,
        _ => &context.association.name,
    }
}

/// Record of `entity` with every embedded relation it holds serialized into
/// its inline field. Relations that were never set keep the stored value.
pub fn inline_record(registry: &MetadataRegistry, meta: &EntityType, entity: &Entity) -> Result<Record> {
    let mut record = entity.to_record();
    for association in &meta.associations {
        if let Topology::Embedded { local_field } = &association.topology {
            if let Some(related) = entity.relation(&association.name) {
                let target = registry.target_of(association)?;
                record
                    .fields
                    .insert(local_field.clone(), inline_value(registry, target, related)?);
            }
        }
    }
    Ok(record)
}

/// Inline form of an embedded relation.
pub fn inline_value(registry: &MetadataRegistry, meta: &EntityType, related: &Related) -> Result<Value> {
    match related {
        Related::One(None) => Ok(Value::Null),
        Related::One(Some(child)) => embed(registry, meta, child),
        Related::Many(children) => {
            let mut items = Vec::with_capacity(children.len());
            for child in children {
                items.push(embed(registry, meta, child)?);
            }
            Ok(Value::List(items))
        }
    }
}

fn embed(registry: &MetadataRegistry, meta: &EntityType, child: &EntityRef) -> Result<Value> {
    let guard = child.read()?;
    let record = inline_record(registry, meta, &guard)?;
    let mut map = record.fields;
    if !record.key.is_null() {
        map.insert(meta.key_field.clone(), record.key);
    }
    Ok(Value::Map(map))
}

/// Rebuilds the children held inline in `value`.
fn extract(meta: &EntityType, value: &Value) -> Result<Vec<Entity>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Map(map) => Ok(vec![unembed(meta, map)]),
        Value::List(items) => items
            .iter()
            .map(|item| match item {
                Value::Map(map) => Ok(unembed(meta, map)),
                other => Err(DbError::TypeMismatch(format!(
                    "embedded '{}' expected a map, found {}",
                    meta.name,
                    other.type_name()
                ))),
            })
            .collect(),
        other => Err(DbError::TypeMismatch(format!(
            "embedded '{}' expected a map or list, found {}",
            meta.name,
            other.type_name()
        ))),
    }
}

fn unembed(meta: &EntityType, map: &BTreeMap<String, Value>) -> Entity {
    let mut fields = map.clone();
    let key = fields.remove(&meta.key_field).unwrap_or_default();
    Entity::from_record(meta.name.as_str(), Record { key, fields })
}

impl EmbeddedStrategy {
    /// Children held by `parent`: the relation when set, otherwise whatever
    /// is stored inline.
    fn children_of(context: &AssociationContext<'_>, parent: &EntityRef) -> Result<Vec<EntityRef>> {
        if parent.has_relation(context.name())? {
            return parent.related(context.name());
        }
        let value = parent.field(inline_field(context))?;
        Ok(extract(context.target, &value)?
            .into_iter()
            .map(EntityRef::new)
            .collect())
    }
}

impl AssociationStrategy for EmbeddedStrategy {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn can_handle(&self, topology: &Topology) -> bool {
        matches!(topology, Topology::Embedded { .. })
    }

    fn resolve(
        &self,
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        parents: &[EntityRef],
        node: &IncludeNode,
    ) -> Result<Vec<Related>> {
        let field = inline_field(context);
        let mut per_parent = Vec::with_capacity(parents.len());
        let mut all = Vec::new();
        for parent in parents {
            let value = parent.field(field)?;
            let children: Vec<EntityRef> = extract(context.target, &value)?
                .into_iter()
                .map(EntityRef::new)
                .collect();
            for child in &children {
                uow.after_load(context.target, child)?;
            }
            all.extend(children.iter().cloned());
            per_parent.push(children);
        }
        uow.fetch_relations(&all, node.nested())?;
        Ok(per_parent.into_iter().map(|children| context.related(children)).collect())
    }

    fn persist(
        &self,
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        parents: &[EntityRef],
        node: &IncludeNode,
    ) -> Result<()> {
        // Children have no storage; only their own links are cascaded.
        let children = held_children(parents, context.name())?;
        uow.persist_relations(&children, node.nested())?;

        let registry = uow.registry();
        let field = inline_field(context);
        for parent in parents {
            let (key, value, current) = {
                let guard = parent.read()?;
                let related = match guard.relation(context.name()) {
                    Some(related) => related,
                    None => continue,
                };
                (
                    guard.key().clone(),
                    inline_value(registry, context.target, related)?,
                    guard.field(field).cloned().unwrap_or_default(),
                )
            };
            if value == current {
                continue;
            }
            parent.write()?.set_field(field, value.clone());
            if context.parent.is_stored() && !key.is_null() {
                let mut fields = BTreeMap::new();
                fields.insert(field.to_string(), value);
                uow.backend(&context.parent.name)?
                    .patch(&fields, &Predicate::KeyIn(vec![key]), &Pagination::all())?;
            }
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
        // Inline children disappear with the parent record; only their own
        // associations need a cascade.
        let mut children = Vec::new();
        for parent in parents {
            children.extend(Self::children_of(context, parent)?);
        }
        uow.remove_relations(&children, node.nested())
    }
}
