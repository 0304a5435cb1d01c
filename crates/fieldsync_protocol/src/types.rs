//! Identifier types shared by both sync endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Client-generated stable identifier for a record.
///
/// Assigned once at creation time and never regenerated. The server
/// deduplicates retried creates by this id (upsert), so a `create` that
/// was accepted on a timed-out attempt is recognized instead of
/// duplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusinessId(Uuid);

impl BusinessId {
    /// Generates a fresh business id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for BusinessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for BusinessId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// The kind of record being synchronized.
///
/// Entities and curations share sync semantics; the kind travels on
/// create items so the server can route storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A canonical business record (e.g., a place).
    Entity,
    /// An annotation attached to an entity by a curator.
    Curation,
}

/// Server-assigned identity for an accepted record.
///
/// Present once the record has been accepted remotely. `version` starts
/// at 1 on acceptance and is advanced only by the server; the client
/// never guesses or increments it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRef {
    /// Server-side identifier.
    pub server_id: String,
    /// Optimistic-lock version counter.
    pub version: u64,
}

impl ServerRef {
    /// Creates a new server reference.
    pub fn new(server_id: impl Into<String>, version: u64) -> Self {
        Self {
            server_id: server_id.into(),
            version,
        }
    }
}
