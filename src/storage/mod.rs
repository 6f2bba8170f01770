pub mod memory;
pub mod predicate;
pub mod registry;

pub use memory::InMemoryBackend;
pub use predicate::{Pagination, Predicate};
pub use registry::StorageRegistry;

use crate::core::{Record, Result, Value};
use std::collections::{BTreeMap, HashMap};

/// Storage backend trait - one instance per stored entity type.
///
/// Backends only ever see [`Record`]s. A missing key is reported as an empty
/// result (`None`, `false`, absent map entry), never as a default value.
pub trait StorageBackend: Send + Sync {
    /// Name of the entity type this backend stores
    fn entity_type(&self) -> &str;

    /// Get one record by key
    fn get(&self, key: &Value) -> Result<Option<Record>>;

    /// Get several records by key; absent keys are simply missing from the map
    fn get_many(&self, keys: &[Value]) -> Result<HashMap<Value, Record>> {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(record) = self.get(key)? {
                found.insert(key.clone(), record);
            }
        }
        Ok(found)
    }

    /// Insert a new record; fails with `AlreadyExists` on a live key.
    /// Returns the stored record, with generated key and initial version.
    fn create(&self, record: Record) -> Result<Record>;

    fn create_many(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        records.into_iter().map(|record| self.create(record)).collect()
    }

    /// Replace an existing record; fails with `NotFound` on a missing key and
    /// `OptimisticConflict` on a stale version. Returns the stored record.
    fn update(&self, record: Record) -> Result<Record>;

    fn update_many(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        records.into_iter().map(|record| self.update(record)).collect()
    }

    /// Delete by key; `false` when nothing was stored under it
    fn delete(&self, key: &Value) -> Result<bool>;

    fn delete_many(&self, keys: &[Value]) -> Result<usize> {
        let mut deleted = 0;
        for key in keys {
            if self.delete(key)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn first(&self, predicate: &Predicate, pagination: &Pagination) -> Result<Option<Record>> {
        let window = Pagination {
            offset: pagination.offset,
            limit: Some(1),
        };
        Ok(self.list(predicate, &window)?.into_iter().next())
    }

    fn list(&self, predicate: &Predicate, pagination: &Pagination) -> Result<Vec<Record>>;

    /// Set `fields` on every matching record; returns how many were touched.
    /// Patching never changes a record's version.
    fn patch(
        &self,
        fields: &BTreeMap<String, Value>,
        predicate: &Predicate,
        pagination: &Pagination,
    ) -> Result<usize>;

    fn count(&self, predicate: &Predicate) -> Result<usize>;

    /// Per-method call counters, for backends that keep them
    fn call_counts(&self) -> Option<BackendCallCounts> {
        None
    }
}

/// Number of calls received per backend method. Batch forms count once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCallCounts {
    pub get: usize,
    pub get_many: usize,
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub list: usize,
    pub patch: usize,
    pub count: usize,
}

impl BackendCallCounts {
    pub fn reads(&self) -> usize {
        self.get + self.get_many + self.list + self.count
    }

    pub fn writes(&self) -> usize {
        self.create + self.update + self.delete + self.patch
    }

    pub fn total(&self) -> usize {
        self.reads() + self.writes()
    }
}
