use super::{DbError, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Stored shape of an entity: its key plus scalar fields. This is all a
/// storage backend ever sees.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: Value,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(key: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Field lookup where a missing field reads as `Null`.
    pub fn field(&self, name: &str) -> &Value {
        self.fields.get(name).unwrap_or(&Value::Null)
    }
}

/// Load state of an entity instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityState {
    /// Only the key is known; no other field has been loaded.
    Reference,
    /// Fields reflect a full record (or a new instance built by the caller).
    Loaded,
}

/// Value of an association slot on an entity.
#[derive(Clone)]
pub enum Related {
    One(Option<EntityRef>),
    Many(Vec<EntityRef>),
}

impl Related {
    pub fn entities(&self) -> Vec<EntityRef> {
        match self {
            Self::One(child) => child.iter().cloned().collect(),
            Self::Many(children) => children.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(child) => child.is_none(),
            Self::Many(children) => children.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::One(child) => usize::from(child.is_some()),
            Self::Many(children) => children.len(),
        }
    }
}

impl fmt::Debug for Related {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One(child) => f.debug_tuple("One").field(child).finish(),
            Self::Many(children) => f.debug_tuple("Many").field(children).finish(),
        }
    }
}

/// A keyed, mutable record participating in associations.
///
/// Scalar fields live in `fields`; association slots live in `relations`.
/// A relation that is absent from the map has never been set or loaded,
/// which the engine treats as "nothing to do".
#[derive(Clone)]
pub struct Entity {
    type_name: String,
    key: Value,
    state: EntityState,
    fields: BTreeMap<String, Value>,
    relations: BTreeMap<String, Related>,
}

impl Entity {
    /// New instance without a key yet (transient until written).
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            key: Value::Null,
            state: EntityState::Loaded,
            fields: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Key-only placeholder for a not-yet-loaded instance.
    pub fn reference(type_name: impl Into<String>, key: impl Into<Value>) -> Self {
        Self {
            type_name: type_name.into(),
            key: key.into(),
            state: EntityState::Reference,
            fields: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    pub fn from_record(type_name: impl Into<String>, record: Record) -> Self {
        Self {
            type_name: type_name.into(),
            key: record.key,
            state: EntityState::Loaded,
            fields: record.fields,
            relations: BTreeMap::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Value>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_one(mut self, association: impl Into<String>, child: Option<EntityRef>) -> Self {
        self.relations.insert(association.into(), Related::One(child));
        self
    }

    pub fn with_many(mut self, association: impl Into<String>, children: Vec<EntityRef>) -> Self {
        self.relations.insert(association.into(), Related::Many(children));
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn key(&self) -> &Value {
        &self.key
    }

    pub fn set_key(&mut self, key: impl Into<Value>) {
        self.key = key.into();
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn is_reference(&self) -> bool {
        self.state == EntityState::Reference
    }

    pub fn is_transient(&self) -> bool {
        self.key.is_null()
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn relation(&self, association: &str) -> Option<&Related> {
        self.relations.get(association)
    }

    pub fn set_relation(&mut self, association: impl Into<String>, related: Related) {
        self.relations.insert(association.into(), related);
    }

    pub fn clear_relation(&mut self, association: &str) -> Option<Related> {
        self.relations.remove(association)
    }

    pub fn relations(&self) -> &BTreeMap<String, Related> {
        &self.relations
    }

    pub fn to_record(&self) -> Record {
        Record {
            key: self.key.clone(),
            fields: self.fields.clone(),
        }
    }

    /// Overwrite key and fields with what the backend stored and mark the
    /// instance loaded. Relations are left untouched.
    pub fn apply_record(&mut self, record: Record) {
        self.key = record.key;
        self.fields = record.fields;
        self.state = EntityState::Loaded;
    }

    /// Absorb a fuller instance of the same identity: fields and state are
    /// taken from `other`, relations are merged with `other` winning.
    pub fn absorb(&mut self, other: &Entity) {
        self.key = other.key.clone();
        self.fields = other.fields.clone();
        self.state = other.state;
        for (name, related) in &other.relations {
            self.relations.insert(name.clone(), related.clone());
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("type_name", &self.type_name)
            .field("key", &self.key)
            .field("state", &self.state)
            .field("fields", &self.fields)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Shared handle to one entity instance.
///
/// The identity map hands out clones of the same handle for the same
/// (type, key), so mutations through one handle are visible through all.
#[derive(Clone)]
pub struct EntityRef(Arc<RwLock<Entity>>);

impl EntityRef {
    pub fn new(entity: Entity) -> Self {
        Self(Arc::new(RwLock::new(entity)))
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, Entity>> {
        self.0.read().map_err(DbError::from)
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, Entity>> {
        self.0.write().map_err(DbError::from)
    }

    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn key(&self) -> Result<Value> {
        Ok(self.read()?.key().clone())
    }

    pub fn type_name(&self) -> Result<String> {
        Ok(self.read()?.type_name().to_string())
    }

    pub fn is_reference(&self) -> Result<bool> {
        Ok(self.read()?.is_reference())
    }

    pub fn field(&self, name: &str) -> Result<Value> {
        Ok(self.read()?.field(name).cloned().unwrap_or_default())
    }

    /// Children currently held in an association slot (empty when unset).
    pub fn related(&self, association: &str) -> Result<Vec<EntityRef>> {
        Ok(self
            .read()?
            .relation(association)
            .map(Related::entities)
            .unwrap_or_default())
    }

    pub fn has_relation(&self, association: &str) -> Result<bool> {
        Ok(self.read()?.relation(association).is_some())
    }
}

impl From<Entity> for EntityRef {
    fn from(entity: Entity) -> Self {
        Self::new(entity)
    }
}

impl fmt::Debug for EntityRef {
    // Graphs may be cyclic, so only the identity is printed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Ok(entity) => write!(f, "{}#{}", entity.type_name(), entity.key()),
            Err(_) => write!(f, "<locked entity>"),
        }
    }
}

/// Remove duplicate handles, keeping first-seen order.
pub fn dedup_refs(entities: impl IntoIterator<Item = EntityRef>) -> Vec<EntityRef> {
    let mut unique: Vec<EntityRef> = Vec::new();
    for entity in entities {
        if !unique.iter().any(|seen| seen.ptr_eq(&entity)) {
            unique.push(entity);
        }
    }
    unique
}
