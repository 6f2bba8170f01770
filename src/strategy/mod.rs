//! One strategy per association topology behind a uniform contract.
//!
//! The executor never looks at a topology itself: it asks the
//! [`StrategyRegistry`] for the strategy that handles the association and
//! calls one of its operations with the parents that still need the edge.

pub mod embedded;
pub mod inverse;
pub mod join_table;
pub mod owning;

pub use embedded::EmbeddedStrategy;
pub use inverse::InverseForeignKeyStrategy;
pub use join_table::JoinTableStrategy;
pub use owning::OwningForeignKeyStrategy;

use crate::core::{DbError, EntityRef, Related, Result, Value};
use crate::executor::UnitOfWork;
use crate::include::IncludeNode;
use crate::schema::{Association, EntityType, MetadataRegistry, Topology};
use std::collections::HashSet;

/// Metadata for one association edge, resolved once per call.
#[derive(Debug, Clone, Copy)]
pub struct AssociationContext<'r> {
    pub parent: &'r EntityType,
    pub association: &'r Association,
    pub target: &'r EntityType,
}

impl<'r> AssociationContext<'r> {
    pub fn new(
        registry: &'r MetadataRegistry,
        parent: &'r EntityType,
        association: &'r Association,
    ) -> Result<Self> {
        Ok(Self {
            parent,
            association,
            target: registry.target_of(association)?,
        })
    }

    pub fn name(&self) -> &'r str {
        &self.association.name
    }

    /// Error for a link that would point at a child without key.
    pub fn transient_child(&self) -> DbError {
        DbError::TransientChild {
            entity: self.parent.name.clone(),
            association: self.association.name.clone(),
        }
    }

    /// Wraps resolved children in the association's cardinality.
    pub fn related(&self, children: Vec<EntityRef>) -> Related {
        if self.association.is_many() {
            Related::Many(children)
        } else {
            Related::One(children.into_iter().next())
        }
    }
}

/// Topology-specific half of a cascade.
///
/// Every operation receives all parents that still need this edge, so
/// implementations issue grouped backend calls rather than one per parent.
pub trait AssociationStrategy: Send + Sync {
    /// Strategy name for logs
    fn name(&self) -> &'static str;

    fn can_handle(&self, topology: &Topology) -> bool;

    /// Children of every parent, aligned with `parents`. Parents are not
    /// modified; the children are fetched further along `node`'s nested tree.
    fn resolve(
        &self,
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        parents: &[EntityRef],
        node: &IncludeNode,
    ) -> Result<Vec<Related>>;

    /// Children of a single parent.
    fn resolve_one(
        &self,
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        parent: &EntityRef,
        node: &IncludeNode,
    ) -> Result<Related> {
        let mut resolved = self.resolve(uow, context, std::slice::from_ref(parent), node)?;
        Ok(resolved.pop().unwrap_or_else(|| context.related(Vec::new())))
    }

    /// Resolves and stores the children on each parent's association slot.
    fn fetch_onto(
        &self,
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        parents: &[EntityRef],
        node: &IncludeNode,
    ) -> Result<()> {
        let resolved = self.resolve(uow, context, parents, node)?;
        for (parent, related) in parents.iter().zip(resolved) {
            parent.write()?.set_relation(context.name(), related);
        }
        Ok(())
    }

    /// Saves the children held by each parent (subject to CREATE/UPDATE) and
    /// reconciles the stored link.
    fn persist(
        &self,
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        parents: &[EntityRef],
        node: &IncludeNode,
    ) -> Result<()>;

    /// Deletes (DELETE) or detaches and sweeps (DELETE_ORPHANS) the children
    /// of parents that are about to be deleted.
    fn remove(
        &self,
        uow: &mut UnitOfWork<'_>,
        context: &AssociationContext<'_>,
        parents: &[EntityRef],
        node: &IncludeNode,
    ) -> Result<()>;
}

/// Registry of association strategies, consulted in registration order.
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn AssociationStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    pub fn register(&mut self, strategy: Box<dyn AssociationStrategy>) {
        self.strategies.push(strategy);
    }

    /// Registers `strategy` ahead of every strategy already present.
    pub fn register_first(&mut self, strategy: Box<dyn AssociationStrategy>) {
        self.strategies.insert(0, strategy);
    }

    /// Registry with one strategy for each built-in topology.
    pub fn with_default_strategies() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(OwningForeignKeyStrategy));
        registry.register(Box::new(InverseForeignKeyStrategy));
        registry.register(Box::new(JoinTableStrategy));
        registry.register(Box::new(EmbeddedStrategy));
        registry
    }

    pub fn strategy_for(&self, topology: &Topology) -> Result<&dyn AssociationStrategy> {
        self.strategies
            .iter()
            .find(|strategy| strategy.can_handle(topology))
            .map(|strategy| strategy.as_ref())
            .ok_or_else(|| {
                DbError::InvalidConfiguration(format!("no strategy handles topology '{}'", topology))
            })
    }

    pub fn list_strategies(&self) -> Vec<&str> {
        self.strategies.iter().map(|strategy| strategy.name()).collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_default_strategies()
    }
}

// ============================================================================
// Helpers shared by the topologies
// ============================================================================

/// Distinct non-null keys of `parents`, in first-seen order.
pub(crate) fn parent_keys(parents: &[EntityRef]) -> Result<Vec<Value>> {
    let mut keys = Vec::new();
    for parent in parents {
        keys.push(parent.key()?);
    }
    Ok(distinct(keys))
}

/// Drops nulls and duplicates, keeping first-seen order.
pub(crate) fn distinct(values: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|value| !value.is_null() && seen.insert(value.clone()))
        .collect()
}

/// Keys held by a foreign key field: nothing for `Null`, each element of a
/// list, or the scalar itself.
pub(crate) fn link_keys(value: &Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::List(items) => items.iter().filter(|item| !item.is_null()).cloned().collect(),
        scalar => vec![scalar.clone()],
    }
}

/// Every child currently held by the parents' association slot.
pub(crate) fn held_children(parents: &[EntityRef], association: &str) -> Result<Vec<EntityRef>> {
    let mut children = Vec::new();
    for parent in parents {
        children.extend(parent.related(association)?);
    }
    Ok(crate::core::dedup_refs(children))
}
