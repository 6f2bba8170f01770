use crate::cascade::IncludeTypes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether an association holds a single child or a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

/// Where the link between parent and child is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topology {
    /// `local_field` on the parent holds the child key (a list of keys for
    /// `Many`).
    OwningForeignKey { local_field: String },
    /// `remote_field` on each child holds the parent key.
    InverseForeignKey { remote_field: String },
    /// Rows of `join_type` pair `local_field` (parent key) with
    /// `remote_field` (child key).
    JoinTable {
        join_type: String,
        local_field: String,
        remote_field: String,
    },
    /// Children are stored inline in the parent's `local_field`.
    Embedded { local_field: String },
}

impl Topology {
    pub fn owning(local_field: impl Into<String>) -> Self {
        Self::OwningForeignKey {
            local_field: local_field.into(),
        }
    }

    pub fn inverse(remote_field: impl Into<String>) -> Self {
        Self::InverseForeignKey {
            remote_field: remote_field.into(),
        }
    }

    pub fn join_table(
        join_type: impl Into<String>,
        local_field: impl Into<String>,
        remote_field: impl Into<String>,
    ) -> Self {
        Self::JoinTable {
            join_type: join_type.into(),
            local_field: local_field.into(),
            remote_field: remote_field.into(),
        }
    }

    pub fn embedded(local_field: impl Into<String>) -> Self {
        Self::Embedded {
            local_field: local_field.into(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::OwningForeignKey { .. } => "owning_foreign_key",
            Self::InverseForeignKey { .. } => "inverse_foreign_key",
            Self::JoinTable { .. } => "join_table",
            Self::Embedded { .. } => "embedded",
        }
    }

    /// True when the parent side of this topology stores the link.
    pub fn owns_link(&self) -> bool {
        !matches!(self, Self::InverseForeignKey { .. })
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind_name())
    }
}

/// Declarative description of one relation from a parent type to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub topology: Topology,
    #[serde(default)]
    pub default_policy: IncludeTypes,
    /// Name of the association on `target` describing the same link from
    /// the other side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse_of: Option<String>,
}

impl Association {
    pub fn new(
        name: impl Into<String>,
        target: impl Into<String>,
        cardinality: Cardinality,
        topology: Topology,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality,
            topology,
            default_policy: IncludeTypes::NONE,
            inverse_of: None,
        }
    }

    pub fn one(name: impl Into<String>, target: impl Into<String>, topology: Topology) -> Self {
        Self::new(name, target, Cardinality::One, topology)
    }

    pub fn many(name: impl Into<String>, target: impl Into<String>, topology: Topology) -> Self {
        Self::new(name, target, Cardinality::Many, topology)
    }

    pub fn cascade(mut self, policy: IncludeTypes) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn inverse_of(mut self, association: impl Into<String>) -> Self {
        self.inverse_of = Some(association.into());
        self
    }

    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}
