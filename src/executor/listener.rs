use crate::core::{Entity, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Lifecycle hooks for one entity type. Every hook defaults to a no-op; an
/// error returned from a hook aborts the running cascade.
pub trait EntityListener: Send + Sync {
    fn before_create(&self, _entity: &mut Entity) -> Result<()> {
        Ok(())
    }

    fn after_create(&self, _entity: &Entity) -> Result<()> {
        Ok(())
    }

    fn before_update(&self, _entity: &mut Entity) -> Result<()> {
        Ok(())
    }

    fn after_update(&self, _entity: &Entity) -> Result<()> {
        Ok(())
    }

    fn before_delete(&self, _entity: &Entity) -> Result<()> {
        Ok(())
    }

    fn after_delete(&self, _entity: &Entity) -> Result<()> {
        Ok(())
    }

    fn after_load(&self, _entity: &Entity) -> Result<()> {
        Ok(())
    }
}

/// Listeners by entity type name, called in registration order.
#[derive(Default, Clone)]
pub struct ListenerRegistry {
    listeners: HashMap<String, Vec<Arc<dyn EntityListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity_type: impl Into<String>, listener: Arc<dyn EntityListener>) {
        self.listeners.entry(entity_type.into()).or_default().push(listener);
    }

    pub fn has_listeners(&self, entity_type: &str) -> bool {
        self.listeners
            .get(entity_type)
            .is_some_and(|listeners| !listeners.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.values().all(Vec::is_empty)
    }

    pub(crate) fn notify<F>(&self, entity_type: &str, mut hook: F) -> Result<()>
    where
        F: FnMut(&dyn EntityListener) -> Result<()>,
    {
        if let Some(listeners) = self.listeners.get(entity_type) {
            for listener in listeners {
                hook(listener.as_ref())?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .listeners
            .iter()
            .map(|(entity_type, listeners)| (entity_type.as_str(), listeners.len()))
            .collect();
        f.debug_struct("ListenerRegistry").field("listeners", &counts).finish()
    }
}
