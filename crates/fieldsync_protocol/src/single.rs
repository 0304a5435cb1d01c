//! Single-item contract: `PATCH` / `DELETE /entities/{business_id}`.
//!
//! The expected version travels in the [`VERSION_HEADER`] request header
//! and is compared server-side (optimistic locking). A mismatch yields a
//! `409` whose body is [`ConflictBody`] — the server's current version
//! and payload, never a generic error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request header carrying the client's expected version.
pub const VERSION_HEADER: &str = "If-Match-Version";

/// Body of a single-item `PATCH`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecordRequest {
    /// Domain payload replacing the record's fields.
    pub payload: Value,
}

/// Body of a `409` conflict response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictBody {
    /// Server's current version.
    pub current_version: u64,
    /// Server's current payload.
    pub current_payload: Value,
}

/// Typed outcome of a single-item call.
#[derive(Debug, Clone, PartialEq)]
pub enum SingleOutcome {
    /// The update was accepted; the server advanced to this version.
    Updated {
        /// Version after the update.
        version: u64,
    },
    /// The delete was accepted.
    Deleted,
    /// Version mismatch; the server's current state.
    Conflict(ConflictBody),
}
