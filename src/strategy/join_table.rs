use super::{AssociationContext, AssociationStrategy, distinct, held_children, parent_keys};
use crate::cascade::IncludeType;
use crate::core::{EntityRef, Record, Related, Result, Value};
use crate::executor::UnitOfWork;
use crate::include::IncludeNode;
use crate::schema::Topology;
use crate::storage::Predicate;
use log::debug;
use std::collections::{HashMap, HashSet};

/// Membership rows of a separate join type pair the parent key
/// (`local_field`) with the child key (`remote_field`).
pub struct JoinTableStrategy;

struct JoinFields<'a> {
    join_type: &'a str,
    local_field: &'a str,
    remote_field: &'a str,
}

fn join_fields<'a>(context: &AssociationContext<'a>) -> JoinFields<'a> {
    match &context.association.topology {
        Topology::JoinTable {
            join_type,
            local_field,
            remote_field,
        } => JoinFields {
            join_type,
            local_field,
            remote_field,
        },
        _ => JoinFields {
            join_type: &context.association.target,
            local_field: &context.parent.key_field,
            remote_field: &context.target.key_field,
        },
    }
}

/// One stored join row reduced to its pair.
struct JoinRow {
    key: Value,
    parent: Value,
    child: Value,
}

impl JoinTableStrategy {
    fn rows(uow: &UnitOfWork<'_>, fields: &JoinFields<'_>, parent_keys: &[Value]) -> Result<Vec<JoinRow>> {
        if parent_keys.is_empty() {
            return Ok(Vec::new());
        }
        let records = uow.list_where_in(fields.join_type, fields.local_field, parent_keys)?;
        Ok(records
            .into_iter()
            .map(|record| JoinRow {
                parent: record.field(fields.local_field).clone(),
                child: record.field(fields.remote_field).clone(),
                key: record.key,
            })
            .collect())
    }

    fn delete_rows(uow: &UnitOfWork<'_>, fields: &JoinFields<'_>, row_keys: &[Value]) -> Result<()> {
        if row_keys.is_empty() {
            return Ok(());
        }
        let backend = uow.backend(fields.join_type)?;
        for chunk in row_keys.chunks(uow.batch_size()) {
            backend.delete_many(chunk)?;
        }
        Ok(())
    }

    /// Deletes the children among `candidates` that no join row references.
    fn sweep_orphans(
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        fields: &JoinFields<'_>,
        candidates: Vec<Value>,
        node: &IncludeNode,
    ) -> Result<()> {
        let backend = uow.backend(fields.join_type)?;
        let mut orphans = Vec::new();
        for key in candidates {
            if backend.count(&Predicate::eq(fields.remote_field, key.clone()))? == 0 {
                orphans.push(key);
            }
        }
        Self::delete_children(uow, context, orphans, node)
    }

    fn delete_children(
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        keys: Vec<Value>,
        node: &IncludeNode,
    ) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let loaded = uow.load_many(context.target, &keys)?;
        let children: Vec<EntityRef> = keys.iter().filter_map(|key| loaded.get(key).cloned()).collect();
        uow.delete_entities(context.target, &children, node.nested())?;
        Ok(())
    }
}

impl AssociationStrategy for JoinTableStrategy {
    fn name(&self) -> &'static str {
        "join_table"
    }

    fn can_handle(&self, topology: &Topology) -> bool {
        matches!(topology, Topology::JoinTable { .. })
    }

    fn resolve(
        &self,
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        parents: &[EntityRef],
        node: &IncludeNode,
    ) -> Result<Vec<Related>> {
        let fields = join_fields(context);
        let rows = Self::rows(uow, &fields, &parent_keys(parents)?)?;

        let child_keys = distinct(rows.iter().map(|row| row.child.clone()));
        let loaded = uow.load_many(context.target, &child_keys)?;
        let children: Vec<EntityRef> = child_keys.iter().filter_map(|key| loaded.get(key).cloned()).collect();
        uow.fetch_relations(&children, node.nested())?;

        let mut by_parent: HashMap<&Value, Vec<Value>> = HashMap::new();
        for row in &rows {
            by_parent.entry(&row.parent).or_default().push(row.child.clone());
        }
        let mut resolved = Vec::with_capacity(parents.len());
        for parent in parents {
            let key = parent.key()?;
            let keys = by_parent.get(&key).cloned().unwrap_or_default();
            let children = distinct(keys)
                .iter()
                .filter_map(|child| loaded.get(child).cloned())
                .collect();
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
        let fields = join_fields(context);
        let children = held_children(parents, context.name())?;
        uow.save_children(context.target, &children, node.policy(), node.nested())?;

        let mut desired: Vec<(Value, Value)> = Vec::new();
        for parent in parents {
            let parent_key = parent.key()?;
            if parent_key.is_null() {
                continue;
            }
            for child in parent.related(context.name())? {
                let child_key = child.key()?;
                if child_key.is_null() {
                    return Err(context.transient_child());
                }
                let pair = (parent_key.clone(), child_key);
                if !desired.contains(&pair) {
                    desired.push(pair);
                }
            }
        }

        // Existing pairs are left alone, which makes repeated persists
        // idempotent; duplicates and pairs no longer held are stale.
        let rows = Self::rows(uow, &fields, &parent_keys(parents)?)?;
        let mut present = HashSet::new();
        let mut stale_rows = Vec::new();
        let mut unlinked = Vec::new();
        for row in rows {
            let pair = (row.parent, row.child);
            if desired.contains(&pair) && present.insert(pair.clone()) {
                continue;
            }
            stale_rows.push(row.key);
            unlinked.push(pair.1);
        }

        let missing: Vec<Record> = desired
            .into_iter()
            .filter(|pair| !present.contains(pair))
            .map(|(parent_key, child_key)| {
                Record::new(Value::Null)
                    .with_field(fields.local_field, parent_key)
                    .with_field(fields.remote_field, child_key)
            })
            .collect();
        if !missing.is_empty() {
            debug!("inserting {} '{}' rows", missing.len(), fields.join_type);
            uow.backend(fields.join_type)?.create_many(missing)?;
        }

        Self::delete_rows(uow, &fields, &stale_rows)?;
        if node.policy().contains(IncludeType::DeleteOrphans) {
            Self::sweep_orphans(uow, context, &fields, distinct(unlinked), node)?;
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
        let fields = join_fields(context);
        let rows = Self::rows(uow, &fields, &parent_keys(parents)?)?;
        if rows.is_empty() {
            return Ok(());
        }
        let row_keys: Vec<Value> = rows.iter().map(|row| row.key.clone()).collect();
        let child_keys = distinct(rows.into_iter().map(|row| row.child));

        // Rows of a deleted parent are always removed.
        Self::delete_rows(uow, &fields, &row_keys)?;

        let policy = node.policy();
        if policy.contains(IncludeType::Delete) {
            Self::delete_children(uow, context, child_keys, node)
        } else if policy.contains(IncludeType::DeleteOrphans) {
            Self::sweep_orphans(uow, context, &fields, child_keys, node)
        } else {
            Ok(())
        }
    }
}
