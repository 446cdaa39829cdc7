use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Attribute holding a node's identifier. Present on every node.
pub const ID_FIELD: &str = "_id";
/// Attribute holding a root's version number.
pub const VERSION_FIELD: &str = "version";
/// Stamped by the document layer on a node's first save.
pub const CREATED_AT_FIELD: &str = "created_at";
/// Stamped by the document layer on every save of a dirty node.
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// Field names that callers may not use for attributes or relations.
pub const RESERVED_FIELDS: [&str; 4] = [ID_FIELD, VERSION_FIELD, CREATED_AT_FIELD, UPDATED_AT_FIELD];

/// Unique identifier for a node in a document tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Error returned when a string is not a valid entity id.
#[derive(Debug, thiserror::Error)]
#[error("invalid entity id {input:?}: {source}")]
pub struct ParseIdError {
    pub input: String,
    #[source]
    pub source: uuid::Error,
}

impl FromStr for EntityId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|source| ParseIdError {
                input: s.to_string(),
                source,
            })
    }
}

/// Format an instant the way `created_at`/`updated_at` are stored.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
