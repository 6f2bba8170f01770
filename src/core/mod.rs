pub mod entity;
pub mod error;
pub mod value;

pub use entity::{Entity, EntityRef, EntityState, Record, Related, dedup_refs};
pub use error::{DbError, Result};
pub use value::Value;
