//! Everything an application needs to declare metadata and run cascades.
//!
//! `use memocascade::prelude::*;` brings in the executor, the metadata
//! builders, include trees and the entity handle types. Backend and strategy
//! extension points stay under their own modules.

pub use crate::{
    Association, AsyncGraphExecutor, AsyncGraphOps, Cardinality, DbError, EngineConfig, Entity,
    EntityListener, EntityRef, EntityType, GraphExecutor, IncludeTree, IncludeType, IncludeTypes,
    MetadataRegistry, Pagination, Predicate, Record, Related, Result, Topology, UnitOfWork, Value,
};
