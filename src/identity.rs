use crate::core::{EntityRef, Result, Value};
use std::collections::HashMap;

/// Per-unit-of-work cache from (entity type, key) to one canonical handle.
///
/// The first handle cached for an identity stays canonical for the whole
/// unit of work. A fully loaded instance arriving later is merged into that
/// handle in place, so holders of an earlier reference stub observe the
/// loaded data. Transient instances (null key) are never cached.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<(String, Value), EntityRef>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remap_or_cache(&mut self, entity: EntityRef) -> Result<EntityRef> {
        let (identity, is_reference) = {
            let guard = entity.read()?;
            if guard.is_transient() {
                return Ok(entity.clone());
            }
            (
                (guard.type_name().to_string(), guard.key().clone()),
                guard.is_reference(),
            )
        };

        let canonical = match self.entries.get(&identity) {
            None => {
                self.entries.insert(identity, entity.clone());
                return Ok(entity);
            }
            Some(canonical) if canonical.ptr_eq(&entity) => return Ok(entity),
            Some(canonical) => canonical.clone(),
        };

        // A stub never overwrites what is already cached.
        if !is_reference {
            let incoming = entity.read()?;
            canonical.write()?.absorb(&incoming);
        }
        Ok(canonical)
    }

    /// Element-wise [`remap_or_cache`](Self::remap_or_cache), keeping input order.
    pub fn remap_or_cache_all(&mut self, entities: Vec<EntityRef>) -> Result<Vec<EntityRef>> {
        entities
            .into_iter()
            .map(|entity| self.remap_or_cache(entity))
            .collect()
    }

    pub fn get(&self, entity_type: &str, key: &Value) -> Option<EntityRef> {
        self.entries
            .get(&(entity_type.to_string(), key.clone()))
            .cloned()
    }

    /// Canonical handle for the identity, only when it holds loaded data.
    pub fn get_loaded(&self, entity_type: &str, key: &Value) -> Result<Option<EntityRef>> {
        match self.get(entity_type, key) {
            Some(entity) if !entity.is_reference()? => Ok(Some(entity)),
            _ => Ok(None),
        }
    }

    pub fn evict(&mut self, entity_type: &str, key: &Value) -> Option<EntityRef> {
        self.entries.remove(&(entity_type.to_string(), key.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
