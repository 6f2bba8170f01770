use super::{InMemoryBackend, StorageBackend};
use crate::core::{DbError, Result};
use crate::schema::MetadataRegistry;
use std::collections::HashMap;
use std::sync::Arc;

/// Backends by entity type name.
#[derive(Default, Clone)]
pub struct StorageRegistry {
    backends: HashMap<String, Arc<dyn StorageBackend>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`InMemoryBackend`] per stored (non-embeddable) type.
    pub fn in_memory(registry: &MetadataRegistry) -> Self {
        let mut storage = Self::new();
        for entity_type in registry.entity_types().filter(|entity_type| entity_type.is_stored()) {
            storage.register(Arc::new(InMemoryBackend::new(entity_type)));
        }
        storage
    }

    /// Registers `backend` under its own entity type, replacing any previous one.
    pub fn register(&mut self, backend: Arc<dyn StorageBackend>) -> &mut Self {
        self.backends.insert(backend.entity_type().to_string(), backend);
        self
    }

    pub fn backend(&self, entity_type: &str) -> Result<Arc<dyn StorageBackend>> {
        self.backends.get(entity_type).cloned().ok_or_else(|| {
            DbError::InvalidConfiguration(format!("no storage backend for '{}'", entity_type))
        })
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.backends.contains_key(entity_type)
    }

    pub fn entity_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}
