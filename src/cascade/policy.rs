use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;

/// One operation that may propagate across an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IncludeType {
    Fetch = 0b0_0001,
    Create = 0b0_0010,
    Update = 0b0_0100,
    Delete = 0b0_1000,
    DeleteOrphans = 0b1_0000,
}

impl IncludeType {
    pub const VARIANTS: [IncludeType; 5] = [
        Self::Fetch,
        Self::Create,
        Self::Update,
        Self::Delete,
        Self::DeleteOrphans,
    ];

    pub const fn bit(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Fetch => "FETCH",
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::DeleteOrphans => "DELETE_ORPHANS",
        }
    }
}

impl fmt::Display for IncludeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of [`IncludeType`] bits.
///
/// `ALL` is CREATE | UPDATE | DELETE. FETCH and DELETE_ORPHANS are opt-in and
/// never part of `ALL`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct IncludeTypes(u8);

impl IncludeTypes {
    pub const NONE: Self = Self(0);
    pub const FETCH: Self = Self(IncludeType::Fetch.bit());
    pub const CREATE: Self = Self(IncludeType::Create.bit());
    pub const UPDATE: Self = Self(IncludeType::Update.bit());
    pub const DELETE: Self = Self(IncludeType::Delete.bit());
    pub const DELETE_ORPHANS: Self = Self(IncludeType::DeleteOrphans.bit());
    pub const ALL: Self = Self(Self::CREATE.0 | Self::UPDATE.0 | Self::DELETE.0);
    /// Bits that make an edge part of a create/update cascade.
    pub const PERSIST: Self = Self(Self::CREATE.0 | Self::UPDATE.0);
    /// Bits that make an edge part of a delete cascade.
    pub const REMOVE: Self = Self(Self::DELETE.0 | Self::DELETE_ORPHANS.0);

    pub const fn value(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, include_type: IncludeType) -> bool {
        self.0 & include_type.bit() != 0
    }

    /// True iff the two sets share at least one bit.
    pub const fn matches_any_of(self, other: IncludeTypes) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: IncludeTypes) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersection(self, other: IncludeTypes) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn with(self, include_type: IncludeType) -> Self {
        Self(self.0 | include_type.bit())
    }

    pub fn iter(self) -> impl Iterator<Item = IncludeType> {
        IncludeType::VARIANTS
            .into_iter()
            .filter(move |include_type| self.contains(*include_type))
    }

    /// Names for the text form; uses `ALL` / `NONE` where they apply.
    pub fn names(self) -> Vec<String> {
        if self.is_empty() {
            return vec!["NONE".to_string()];
        }
        let mut names = Vec::new();
        let mut rest = self;
        if self.intersection(Self::ALL) == Self::ALL {
            names.push("ALL".to_string());
            rest = Self(self.0 & !Self::ALL.0);
        }
        names.extend(rest.iter().map(|include_type| include_type.name().to_string()));
        names
    }
}

impl From<IncludeType> for IncludeTypes {
    fn from(include_type: IncludeType) -> Self {
        Self(include_type.bit())
    }
}

impl FromIterator<IncludeType> for IncludeTypes {
    fn from_iter<I: IntoIterator<Item = IncludeType>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

impl BitOr for IncludeTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOr<IncludeType> for IncludeTypes {
    type Output = Self;

    fn bitor(self, rhs: IncludeType) -> Self {
        self.with(rhs)
    }
}

impl BitOr for IncludeType {
    type Output = IncludeTypes;

    fn bitor(self, rhs: Self) -> IncludeTypes {
        IncludeTypes::from(self).with(rhs)
    }
}

impl BitOrAssign for IncludeTypes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for IncludeTypes {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl fmt::Debug for IncludeTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IncludeTypes({})", self.names().join("|"))
    }
}

impl fmt::Display for IncludeTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(", "))
    }
}

impl FromStr for IncludeTypes {
    type Err = DbError;

    /// Parses one name: an [`IncludeType`] name, `ALL` or `NONE`
    /// (case-insensitive).
    fn from_str(name: &str) -> Result<Self> {
        let upper = name.trim().to_ascii_uppercase();
        match upper.as_str() {
            "ALL" => return Ok(Self::ALL),
            "NONE" => return Ok(Self::NONE),
            _ => {}
        }
        IncludeType::VARIANTS
            .into_iter()
            .find(|include_type| include_type.name() == upper)
            .map(Self::from)
            .ok_or_else(|| DbError::InvalidConfiguration(format!("unknown include type '{}'", name)))
    }
}

impl TryFrom<Vec<String>> for IncludeTypes {
    type Error = DbError;

    fn try_from(names: Vec<String>) -> Result<Self> {
        names
            .iter()
            .try_fold(Self::NONE, |acc, name| -> Result<Self> {
                Ok(acc | name.parse::<IncludeTypes>()?)
            })
    }
}

impl From<IncludeTypes> for Vec<String> {
    fn from(types: IncludeTypes) -> Self {
        types.names()
    }
}
