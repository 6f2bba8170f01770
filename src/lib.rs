// ============================================================================
// MemoCascade Library
// ============================================================================

//! Cascading persistence over pluggable record stores.
//!
//! Entity types and their associations are declared once in a
//! [`MetadataRegistry`]. Each call to the [`GraphExecutor`] carries an
//! [`IncludeTree`] that says which associations to follow and which
//! operations (fetch, create, update, delete, delete-orphans) cascade along
//! them. Within one [`UnitOfWork`] every stored record maps to one shared
//! [`EntityRef`], and every association edge is visited at most once per
//! operation, so cyclic graphs terminate.
//!
//! ```
//! use memocascade::{
//!     Association, Entity, EntityRef, EntityType, GraphExecutor, IncludeTypes,
//!     MetadataRegistry, Topology, Value,
//! };
//!
//! # fn main() -> memocascade::Result<()> {
//! let registry = MetadataRegistry::builder()
//!     .register(
//!         EntityType::new("Order", "id").sequence_key().association(
//!             Association::many("items", "LineItem", Topology::inverse("orderId"))
//!                 .cascade(IncludeTypes::ALL | IncludeTypes::FETCH),
//!         ),
//!     )
//!     .register(EntityType::new("LineItem", "id").sequence_key())
//!     .build()?;
//! let executor = GraphExecutor::in_memory(registry);
//!
//! let item = EntityRef::new(Entity::new("LineItem").with_field("sku", "A-1"));
//! let order = EntityRef::new(Entity::new("Order").with_many("items", vec![item.clone()]));
//! let tree = executor.persist_tree("Order")?;
//! executor.create(&order, &tree)?;
//! assert_eq!(item.field("orderId")?, order.key()?);
//!
//! let loaded = executor.get("Order", &order.key()?, &executor.fetch_tree("Order")?)?;
//! assert_eq!(loaded.map(|o| o.related("items").map(|i| i.len())).transpose()?, Some(1));
//! let key: Value = order.key()?;
//! assert!(executor.delete("Order", &key, &executor.remove_tree("Order")?)?);
//! # Ok(())
//! # }
//! ```

pub mod cascade;
pub mod config;
pub mod core;
pub mod executor;
pub mod facade;
pub mod identity;
pub mod include;
pub mod prelude;
pub mod schema;
pub mod storage;
pub mod strategy;

// Re-export main types for convenience
pub use cascade::{CascadeOperation, CascadeTracker, IncludeType, IncludeTypes};
pub use config::EngineConfig;
pub use core::{DbError, Entity, EntityRef, EntityState, Record, Related, Result, Value};
pub use executor::{EntityListener, GraphExecutor, ListenerRegistry, UnitOfWork};
pub use facade::{AsyncGraphExecutor, AsyncGraphOps};
pub use identity::IdentityMap;
pub use include::{IncludeEdge, IncludeNode, IncludeTree};
pub use schema::{Association, Cardinality, EntityType, KeyGeneration, MetadataRegistry, Topology};
pub use storage::{
    BackendCallCounts, InMemoryBackend, Pagination, Predicate, StorageBackend, StorageRegistry,
};
pub use strategy::{AssociationContext, AssociationStrategy, StrategyRegistry};
