use super::Association;
use serde::{Deserialize, Serialize};

/// Who assigns the key of a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyGeneration {
    /// The caller sets the key before create.
    #[default]
    Assigned,
    /// The backend assigns increasing integers.
    Sequence,
    /// The backend assigns random UUID text.
    Uuid,
}

/// Declarative metadata of one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    pub key_field: String,
    #[serde(default)]
    pub key_generation: KeyGeneration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_field: Option<String>,
    /// Embeddable types have no storage of their own and only live inline in
    /// a parent record.
    #[serde(default)]
    pub embeddable: bool,
    #[serde(default)]
    pub associations: Vec<Association>,
}

impl EntityType {
    pub fn new(name: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_field: key_field.into(),
            key_generation: KeyGeneration::Assigned,
            version_field: None,
            embeddable: false,
            associations: Vec::new(),
        }
    }

    pub fn sequence_key(mut self) -> Self {
        self.key_generation = KeyGeneration::Sequence;
        self
    }

    pub fn uuid_key(mut self) -> Self {
        self.key_generation = KeyGeneration::Uuid;
        self
    }

    pub fn versioned(mut self, version_field: impl Into<String>) -> Self {
        self.version_field = Some(version_field.into());
        self
    }

    pub fn embeddable(mut self) -> Self {
        self.embeddable = true;
        self
    }

    pub fn association(mut self, association: Association) -> Self {
        self.associations.push(association);
        self
    }

    pub fn find_association(&self, name: &str) -> Option<&Association> {
        self.associations.iter().find(|association| association.name == name)
    }

    pub fn generated_key(&self) -> bool {
        self.key_generation != KeyGeneration::Assigned
    }

    pub fn is_stored(&self) -> bool {
        !self.embeddable
    }
}
