use super::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("Entity '{entity}' with key {key} not found")]
    NotFound { entity: String, key: Value },

    #[error("Entity '{entity}' with key {key} already exists")]
    AlreadyExists { entity: String, key: Value },

    #[error(
        "Optimistic conflict on '{entity}' key {key}: expected version {expected}, stored version {actual}"
    )]
    OptimisticConflict {
        entity: String,
        key: Value,
        expected: i64,
        actual: i64,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Entity type '{0}' is not registered")]
    UnknownEntityType(String),

    #[error("Association '{association}' not found on entity '{entity}'")]
    UnknownAssociation { entity: String, association: String },

    #[error("Include parse error at position {position}: {message}")]
    IncludeParse { position: usize, message: String },

    #[error("Association '{association}' on '{entity}' links a child that was never persisted")]
    TransientChild { entity: String, association: String },

    #[error("Cascade depth limit {0} exceeded")]
    DepthExceeded(usize),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    pub fn not_found(entity: impl Into<String>, key: Value) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key,
        }
    }

    pub fn already_exists(entity: impl Into<String>, key: Value) -> Self {
        Self::AlreadyExists {
            entity: entity.into(),
            key,
        }
    }

    pub fn unknown_association(entity: impl Into<String>, association: impl Into<String>) -> Self {
        Self::UnknownAssociation {
            entity: entity.into(),
            association: association.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::OptimisticConflict { .. } | Self::AlreadyExists { .. }
        )
    }

    /// Errors raised while building metadata or include trees, before any
    /// backend call.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_)
                | Self::UnknownEntityType(_)
                | Self::UnknownAssociation { .. }
                | Self::IncludeParse { .. }
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidConfiguration(err.to_string())
    }
}
