//! Declarative association and entity-type metadata.

pub mod association;
pub mod entity_type;
pub mod registry;

pub use association::{Association, Cardinality, Topology};
pub use entity_type::{EntityType, KeyGeneration};
pub use registry::{MetadataRegistry, MetadataRegistryBuilder};
