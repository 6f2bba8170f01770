use super::{BackendCallCounts, Pagination, Predicate, StorageBackend};
use crate::core::{DbError, Record, Result, Value};
use crate::schema::{EntityType, KeyGeneration};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use uuid::Uuid;

/// Map-backed store for one entity type.
///
/// Records are kept in insertion order (by slot id), which is the order
/// `list` returns them in. Generated keys come from an atomic sequence or
/// from random v4 UUIDs depending on the type's [`KeyGeneration`].
pub struct InMemoryBackend {
    entity_type: String,
    key_generation: KeyGeneration,
    version_field: Option<String>,
    rows: RwLock<Rows>,
    sequence: AtomicI64,
    counters: CallCounters,
}

#[derive(Default)]
struct Rows {
    slots: BTreeMap<u64, Record>,
    index: HashMap<Value, u64>,
    next_slot: u64,
}

impl Rows {
    fn record(&self, key: &Value) -> Option<&Record> {
        self.index.get(key).and_then(|slot| self.slots.get(slot))
    }

    fn remove(&mut self, key: &Value) -> bool {
        match self.index.remove(key) {
            Some(slot) => self.slots.remove(&slot).is_some(),
            None => false,
        }
    }

    fn matching<'a>(&'a self, predicate: &'a Predicate) -> impl Iterator<Item = &'a Record> + 'a {
        self.slots.values().filter(move |record| predicate.matches(record))
    }
}

#[derive(Default)]
struct CallCounters {
    get: AtomicUsize,
    get_many: AtomicUsize,
    create: AtomicUsize,
    update: AtomicUsize,
    delete: AtomicUsize,
    list: AtomicUsize,
    patch: AtomicUsize,
    count: AtomicUsize,
}

impl CallCounters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BackendCallCounts {
        BackendCallCounts {
            get: self.get.load(Ordering::Relaxed),
            get_many: self.get_many.load(Ordering::Relaxed),
            create: self.create.load(Ordering::Relaxed),
            update: self.update.load(Ordering::Relaxed),
            delete: self.delete.load(Ordering::Relaxed),
            list: self.list.load(Ordering::Relaxed),
            patch: self.patch.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.get,
            &self.get_many,
            &self.create,
            &self.update,
            &self.delete,
            &self.list,
            &self.patch,
            &self.count,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl InMemoryBackend {
    pub fn new(entity_type: &EntityType) -> Self {
        Self {
            entity_type: entity_type.name.clone(),
            key_generation: entity_type.key_generation,
            version_field: entity_type.version_field.clone(),
            rows: RwLock::new(Rows::default()),
            sequence: AtomicI64::new(0),
            counters: CallCounters::default(),
        }
    }

    pub fn reset_call_counts(&self) {
        self.counters.reset();
    }

    fn next_key(&self) -> Result<Value> {
        match self.key_generation {
            KeyGeneration::Sequence => Ok(Value::Integer(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)),
            KeyGeneration::Uuid => Ok(Value::Text(Uuid::new_v4().to_string())),
            KeyGeneration::Assigned => Err(DbError::InvalidConfiguration(format!(
                "'{}' uses assigned keys but a record without key was created",
                self.entity_type
            ))),
        }
    }

    fn insert(&self, rows: &mut Rows, mut record: Record) -> Result<Record> {
        if record.key.is_null() {
            record.key = self.next_key()?;
        } else if let (KeyGeneration::Sequence, Some(key)) = (self.key_generation, record.key.as_i64()) {
            // Explicit keys must not collide with later generated ones.
            self.sequence.fetch_max(key, Ordering::SeqCst);
        }

        if rows.index.contains_key(&record.key) {
            return Err(DbError::already_exists(&self.entity_type, record.key));
        }
        if let Some(version_field) = &self.version_field {
            record.fields.insert(version_field.clone(), Value::Integer(1));
        }

        let slot = rows.next_slot;
        rows.next_slot += 1;
        rows.index.insert(record.key.clone(), slot);
        rows.slots.insert(slot, record.clone());
        debug!("created '{}' key {}", self.entity_type, record.key);
        Ok(record)
    }

    fn replace(&self, rows: &mut Rows, mut record: Record) -> Result<Record> {
        let slot = match rows.index.get(&record.key) {
            Some(slot) => *slot,
            None => return Err(DbError::not_found(&self.entity_type, record.key)),
        };

        if let Some(version_field) = &self.version_field {
            let stored = rows
                .slots
                .get(&slot)
                .and_then(|existing| existing.field(version_field).as_i64())
                .unwrap_or(0);
            if let Some(expected) = record.field(version_field).as_i64() {
                if expected != stored {
                    return Err(DbError::OptimisticConflict {
                        entity: self.entity_type.clone(),
                        key: record.key,
                        expected,
                        actual: stored,
                    });
                }
            }
            record
                .fields
                .insert(version_field.clone(), Value::Integer(stored + 1));
        }

        rows.slots.insert(slot, record.clone());
        debug!("updated '{}' key {}", self.entity_type, record.key);
        Ok(record)
    }
}

impl StorageBackend for InMemoryBackend {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn get(&self, key: &Value) -> Result<Option<Record>> {
        CallCounters::bump(&self.counters.get);
        let rows = self.rows.read()?;
        Ok(rows.record(key).cloned())
    }

    fn get_many(&self, keys: &[Value]) -> Result<HashMap<Value, Record>> {
        CallCounters::bump(&self.counters.get_many);
        let rows = self.rows.read()?;
        Ok(keys
            .iter()
            .filter_map(|key| rows.record(key).map(|record| (key.clone(), record.clone())))
            .collect())
    }

    fn create(&self, record: Record) -> Result<Record> {
        CallCounters::bump(&self.counters.create);
        let mut rows = self.rows.write()?;
        self.insert(&mut rows, record)
    }

    fn create_many(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        CallCounters::bump(&self.counters.create);
        let mut rows = self.rows.write()?;
        records
            .into_iter()
            .map(|record| self.insert(&mut rows, record))
            .collect()
    }

    fn update(&self, record: Record) -> Result<Record> {
        CallCounters::bump(&self.counters.update);
        let mut rows = self.rows.write()?;
        self.replace(&mut rows, record)
    }

    fn update_many(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        CallCounters::bump(&self.counters.update);
        let mut rows = self.rows.write()?;
        records
            .into_iter()
            .map(|record| self.replace(&mut rows, record))
            .collect()
    }

    fn delete(&self, key: &Value) -> Result<bool> {
        CallCounters::bump(&self.counters.delete);
        let removed = self.rows.write()?.remove(key);
        if removed {
            debug!("deleted '{}' key {}", self.entity_type, key);
        }
        Ok(removed)
    }

    fn delete_many(&self, keys: &[Value]) -> Result<usize> {
        CallCounters::bump(&self.counters.delete);
        let mut rows = self.rows.write()?;
        let deleted = keys.iter().filter(|key| rows.remove(key)).count();
        debug!("deleted {} of {} '{}' records", deleted, keys.len(), self.entity_type);
        Ok(deleted)
    }

    fn list(&self, predicate: &Predicate, pagination: &Pagination) -> Result<Vec<Record>> {
        CallCounters::bump(&self.counters.list);
        let rows = self.rows.read()?;
        Ok(pagination
            .paginate(rows.matching(predicate))
            .into_iter()
            .cloned()
            .collect())
    }

    fn patch(
        &self,
        fields: &BTreeMap<String, Value>,
        predicate: &Predicate,
        pagination: &Pagination,
    ) -> Result<usize> {
        CallCounters::bump(&self.counters.patch);
        let mut rows = self.rows.write()?;
        let slots: Vec<u64> = pagination.paginate(
            rows.slots
                .iter()
                .filter(|(_, record)| predicate.matches(record))
                .map(|(slot, _)| *slot),
        );
        for slot in &slots {
            if let Some(record) = rows.slots.get_mut(slot) {
                for (name, value) in fields {
                    record.fields.insert(name.clone(), value.clone());
                }
            }
        }
        debug!("patched {} '{}' records where {}", slots.len(), self.entity_type, predicate);
        Ok(slots.len())
    }

    fn count(&self, predicate: &Predicate) -> Result<usize> {
        CallCounters::bump(&self.counters.count);
        let rows = self.rows.read()?;
        Ok(rows.matching(predicate).count())
    }

    fn call_counts(&self) -> Option<BackendCallCounts> {
        Some(self.counters.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines() -> InMemoryBackend {
        InMemoryBackend::new(&EntityType::new("LineItem", "id").sequence_key().versioned("version"))
    }

    #[test]
    fn test_create_assigns_sequence_key_and_version() {
        let backend = lines();
        let first = backend.create(Record::new(Value::Null).with_field("qty", 1)).unwrap();
        let second = backend.create(Record::new(Value::Null).with_field("qty", 2)).unwrap();
        assert_eq!(first.key, Value::Integer(1));
        assert_eq!(second.key, Value::Integer(2));
        assert_eq!(first.field("version"), &Value::Integer(1));
    }

    #[test]
    fn test_explicit_key_advances_sequence() {
        let backend = lines();
        backend.create(Record::new(10)).unwrap();
        let generated = backend.create(Record::new(Value::Null)).unwrap();
        assert_eq!(generated.key, Value::Integer(11));
    }

    #[test]
    fn test_uuid_keys() {
        let backend = InMemoryBackend::new(&EntityType::new("Enrollment", "id").uuid_key());
        let record = backend.create(Record::new(Value::Null)).unwrap();
        assert_eq!(record.key.as_str().map(str::len), Some(36));
    }

    #[test]
    fn test_assigned_key_is_required() {
        let backend = InMemoryBackend::new(&EntityType::new("Product", "sku"));
        assert!(backend.create(Record::new(Value::Null)).unwrap_err().is_configuration());
    }

    #[test]
    fn test_create_on_live_key_fails() {
        let backend = lines();
        backend.create(Record::new(1)).unwrap();
        let err = backend.create(Record::new(1)).unwrap_err();
        assert!(matches!(err, DbError::AlreadyExists { .. }));
    }

    #[test]
    fn test_update_checks_and_bumps_version() {
        let backend = lines();
        let created = backend.create(Record::new(Value::Null).with_field("qty", 1)).unwrap();

        let updated = backend.update(created.clone().with_field("qty", 2)).unwrap();
        assert_eq!(updated.field("version"), &Value::Integer(2));

        let err = backend.update(created.with_field("qty", 3)).unwrap_err();
        assert_eq!(
            err,
            DbError::OptimisticConflict {
                entity: "LineItem".into(),
                key: Value::Integer(1),
                expected: 1,
                actual: 2,
            }
        );

        // No version carried: unconditional write.
        let forced = backend.update(Record::new(1).with_field("qty", 4)).unwrap();
        assert_eq!(forced.field("version"), &Value::Integer(3));
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let backend = lines();
        assert!(backend.update(Record::new(99)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_list_patch_count_delete() {
        let backend = lines();
        for order in [5, 5, 6] {
            backend.create(Record::new(Value::Null).with_field("orderId", order)).unwrap();
        }
        let of_five = Predicate::eq("orderId", 5);
        assert_eq!(backend.list(&of_five, &Pagination::all()).unwrap().len(), 2);
        assert_eq!(backend.first(&of_five, &Pagination::all()).unwrap().unwrap().key, Value::Integer(1));

        let mut detach = BTreeMap::new();
        detach.insert("orderId".to_string(), Value::Null);
        assert_eq!(backend.patch(&detach, &of_five, &Pagination::all()).unwrap(), 2);
        assert_eq!(backend.count(&Predicate::is_null("orderId")).unwrap(), 2);
        // Patch leaves the version alone.
        assert_eq!(backend.get(&Value::Integer(1)).unwrap().unwrap().field("version"), &Value::Integer(1));

        assert_eq!(backend.delete_many(&[Value::Integer(1), Value::Integer(7)]).unwrap(), 1);
        assert!(!backend.delete(&Value::Integer(1)).unwrap());
        assert!(backend.get(&Value::Integer(1)).unwrap().is_none());
        assert_eq!(backend.count(&Predicate::All).unwrap(), 2);
    }

    #[test]
    fn test_call_counts() {
        let backend = lines();
        backend
            .create_many(vec![Record::new(Value::Null), Record::new(Value::Null)])
            .unwrap();
        backend.get_many(&[Value::Integer(1), Value::Integer(2)]).unwrap();
        let counts = backend.call_counts().unwrap();
        assert_eq!(counts.create, 1);
        assert_eq!(counts.get_many, 1);
        assert_eq!(counts.total(), 2);

        backend.reset_call_counts();
        assert_eq!(backend.call_counts().unwrap().total(), 0);
    }
}
