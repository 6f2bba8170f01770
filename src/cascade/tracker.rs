use crate::core::Value;
use std::collections::HashSet;
use std::fmt;

/// Operation a cascade edge is traversed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CascadeOperation {
    Fetch,
    Persist,
    Remove,
}

impl fmt::Display for CascadeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Fetch => "fetch",
            Self::Persist => "persist",
            Self::Remove => "remove",
        };
        write!(f, "{label}")
    }
}

/// Visited-edge set for one unit of work.
///
/// Each (operation, parent type, parent key, association) is handed out
/// exactly once; every later request for the same edge is refused.
#[derive(Debug, Default)]
pub struct CascadeTracker {
    visited: HashSet<String>,
}

impl CascadeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the edge and reports whether it was new.
    pub fn should_traverse(
        &mut self,
        operation: CascadeOperation,
        parent_type: &str,
        parent_key: &Value,
        association: &str,
    ) -> bool {
        self.visited
            .insert(edge_key(operation, parent_type, parent_key, association))
    }

    pub fn was_traversed(
        &self,
        operation: CascadeOperation,
        parent_type: &str,
        parent_key: &Value,
        association: &str,
    ) -> bool {
        self.visited
            .contains(&edge_key(operation, parent_type, parent_key, association))
    }

    pub fn len(&self) -> usize {
        self.visited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }
}

// The key's type tag keeps Integer(5) and Text("5") apart.
fn edge_key(
    operation: CascadeOperation,
    parent_type: &str,
    parent_key: &Value,
    association: &str,
) -> String {
    format!(
        "{}|{}|{}:{}|{}",
        operation,
        parent_type,
        parent_key.type_name(),
        parent_key,
        association
    )
}
