//! Metadata record model.
//!
//! # Responsibility
//! - Represent typed attribute rows attached to a parent atom.
//! - Normalize records into content-addressed snapshots.
//! - Validate desired records before any storage mutation.
//!
//! # Invariants
//! - Two records are the same record when their snapshots are equal.
//! - Snapshot ordering never depends on attribute insertion order.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static KIND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_.\-]{0,63}$").expect("valid kind regex"));
static ATTRIBUTE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("valid attribute name regex"));

/// Storage-assigned row identity. Not part of record equality.
pub type MetadataId = i64;

/// Stable id of the parent atom a record is attached to.
pub type TaskId = Uuid;

/// Typed attribute value.
///
/// Serialized untagged so the stored JSON stays plain (`1000`, `"single"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl AttributeValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Attribute map. `BTreeMap` keeps keys sorted, which makes both equality and
/// the serialized form canonical.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Content-addressed identity of a record: kind plus attributes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetadataSnapshot {
    pub kind: String,
    pub attributes: Attributes,
}

/// Which record kinds a query or reconciliation pass covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindScope {
    All,
    Exact(String),
    AnyOf(Vec<String>),
}

impl KindScope {
    pub fn exact(kind: impl Into<String>) -> Self {
        Self::Exact(kind.into())
    }

    /// Returns whether `kind` falls inside this scope.
    pub fn contains(&self, kind: &str) -> bool {
        match self {
            Self::All => true,
            Self::Exact(expected) => expected == kind,
            Self::AnyOf(kinds) => kinds.iter().any(|candidate| candidate == kind),
        }
    }
}

impl Display for KindScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "*"),
            Self::Exact(kind) => write!(f, "{kind}"),
            Self::AnyOf(kinds) => write!(f, "{}", kinds.join("|")),
        }
    }
}

/// A record that is desired but not necessarily persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataDraft {
    pub kind: String,
    pub attributes: Attributes,
    /// Kept when already known (e.g. imported data); otherwise assigned on persist.
    pub created_at_ms: Option<i64>,
}

impl MetadataDraft {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: Attributes::new(),
            created_at_ms: None,
        }
    }

    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_created_at(mut self, created_at_ms: i64) -> Self {
        self.created_at_ms = Some(created_at_ms);
        self
    }

    /// Normalized identity of this draft.
    pub fn snapshot(&self) -> MetadataSnapshot {
        MetadataSnapshot {
            kind: self.kind.clone(),
            attributes: self.attributes.clone(),
        }
    }

    /// Checks structural validity of the draft.
    ///
    /// # Errors
    /// - `InvalidKind` when the kind is not a lowercase identifier.
    /// - `EmptyAttributes` when no attribute is set.
    /// - `InvalidAttributeName` for any malformed attribute key.
    pub fn validate(&self) -> Result<(), MetadataValidationError> {
        if !KIND_RE.is_match(&self.kind) {
            return Err(MetadataValidationError::InvalidKind(self.kind.clone()));
        }
        if self.attributes.is_empty() {
            return Err(MetadataValidationError::EmptyAttributes {
                kind: self.kind.clone(),
            });
        }
        if let Some(name) = self
            .attributes
            .keys()
            .find(|name| !ATTRIBUTE_NAME_RE.is_match(name))
        {
            return Err(MetadataValidationError::InvalidAttributeName(name.clone()));
        }
        Ok(())
    }
}

/// Persisted metadata row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    pub id: MetadataId,
    pub task_id: TaskId,
    pub kind: String,
    pub attributes: Attributes,
    pub created_at_ms: i64,
}

impl MetadataRecord {
    /// Strips storage identity, parent and timestamp.
    pub fn snapshot(&self) -> MetadataSnapshot {
        MetadataSnapshot {
            kind: self.kind.clone(),
            attributes: self.attributes.clone(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}

/// Rejection reasons for malformed records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValidationError {
    InvalidKind(String),
    EmptyAttributes {
        kind: String,
    },
    InvalidAttributeName(String),
    KindOutOfScope {
        kind: String,
        scope: String,
    },
    MissingAttribute {
        kind: String,
        name: &'static str,
    },
    InvalidAttributeValue {
        name: &'static str,
        message: String,
    },
}

impl Display for MetadataValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKind(kind) => write!(f, "invalid metadata kind `{kind}`"),
            Self::EmptyAttributes { kind } => {
                write!(f, "metadata of kind `{kind}` has no attributes")
            }
            Self::InvalidAttributeName(name) => write!(f, "invalid attribute name `{name}`"),
            Self::KindOutOfScope { kind, scope } => {
                write!(f, "metadata kind `{kind}` is outside scope `{scope}`")
            }
            Self::MissingAttribute { kind, name } => {
                write!(f, "metadata of kind `{kind}` is missing attribute `{name}`")
            }
            Self::InvalidAttributeValue { name, message } => {
                write!(f, "invalid value for attribute `{name}`: {message}")
            }
        }
    }
}

impl Error for MetadataValidationError {}
