use crate::core::{Record, Value};
use std::fmt;

/// Filter over stored records.
///
/// Only the forms the cascade engine issues are modelled; a field that is
/// missing from a record reads as `Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All,
    KeyIn(Vec<Value>),
    Eq(String, Value),
    In(String, Vec<Value>),
    /// Field equals the value, or is a list holding it.
    Contains(String, Value),
    IsNull(String),
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In(field.into(), values)
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Contains(field.into(), value.into())
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull(field.into())
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            Self::All => other,
            first => Self::And(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::All => true,
            Self::KeyIn(keys) => keys.contains(&record.key),
            Self::Eq(field, value) => record.field(field) == value,
            Self::In(field, values) => {
                let actual = record.field(field);
                values.iter().any(|value| value == actual)
            }
            Self::Contains(field, value) => record.field(field).contains(value),
            Self::IsNull(field) => record.field(field).is_null(),
            Self::Not(inner) => !inner.matches(record),
            Self::And(parts) => parts.iter().all(|part| part.matches(record)),
            Self::Or(parts) => parts.iter().any(|part| part.matches(record)),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "TRUE"),
            Self::KeyIn(keys) => write!(f, "KEY IN {}", Value::List(keys.clone())),
            Self::Eq(field, value) => write!(f, "{} = {}", field, value),
            Self::In(field, values) => write!(f, "{} IN {}", field, Value::List(values.clone())),
            Self::Contains(field, value) => write!(f, "{} CONTAINS {}", field, value),
            Self::IsNull(field) => write!(f, "{} IS NULL", field),
            Self::Not(inner) => write!(f, "NOT ({})", inner),
            Self::And(parts) => join(f, parts, " AND "),
            Self::Or(parts) => join(f, parts, " OR "),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, parts: &[Predicate], separator: &str) -> fmt::Result {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        write!(f, "({})", part)?;
    }
    Ok(())
}

/// Offset/limit window applied after filtering, in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pagination {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Pagination {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn first() -> Self {
        Self::new(0, 1)
    }

    pub fn paginate<I: Iterator>(&self, items: I) -> Vec<I::Item> {
        let skipped = items.skip(self.offset);
        match self.limit {
            Some(limit) => skipped.take(limit).collect(),
            None => skipped.collect(),
        }
    }
}
