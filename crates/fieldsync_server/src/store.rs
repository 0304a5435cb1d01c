//! Authoritative record store.
//!
//! Records are keyed by their client-generated business id, which makes
//! creates idempotent: a retried create after a lost acknowledgment
//! binds to the already-stored record instead of duplicating it. Every
//! accepted write advances the version by exactly one; a write carrying
//! a stale version is rejected with the server's current state, never
//! silently merged.

use fieldsync_protocol::{BusinessId, RecordKind};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// A record as the server stores it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Server-assigned identifier.
    pub server_id: String,
    /// Client-generated stable identifier.
    pub business_id: BusinessId,
    /// Record kind.
    pub kind: RecordKind,
    /// Monotonic version; 1 on creation, +1 per accepted write.
    pub version: u64,
    /// Domain payload.
    pub payload: Value,
}

/// Why a version-checked write was not applied.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteFailure {
    /// No record with that business id.
    NotFound,
    /// Version mismatch; carries the server's current state.
    Conflict {
        /// Current version.
        current_version: u64,
        /// Current payload.
        current_payload: Value,
    },
}

/// In-memory authoritative store.
pub struct RecordStore {
    records: RwLock<HashMap<BusinessId, StoredRecord>>,
    next_ids: RwLock<HashMap<RecordKind, u64>>,
}

impl RecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            next_ids: RwLock::new(HashMap::new()),
        }
    }

    fn assign_server_id(&self, kind: RecordKind) -> String {
        let mut next_ids = self.next_ids.write();
        let counter = next_ids.entry(kind).or_insert(0);
        *counter += 1;
        let prefix = match kind {
            RecordKind::Entity => "e",
            RecordKind::Curation => "c",
        };
        format!("{prefix}-{counter}")
    }

    /// Creates a record, or returns the existing one when the business
    /// id is already known (idempotent retry).
    pub fn create(&self, business_id: BusinessId, kind: RecordKind, payload: Value) -> (String, u64) {
        if let Some(existing) = self.records.read().get(&business_id) {
            return (existing.server_id.clone(), existing.version);
        }

        let server_id = self.assign_server_id(kind);
        let record = StoredRecord {
            server_id: server_id.clone(),
            business_id,
            kind,
            version: 1,
            payload,
        };
        // Racing creates for the same business id settle on whichever
        // insert wins; the loser's retry is deduplicated above.
        let mut records = self.records.write();
        let entry = records.entry(business_id).or_insert(record);
        (entry.server_id.clone(), entry.version)
    }

    /// Replaces a record's payload if `expected_version` matches.
    pub fn update(
        &self,
        business_id: BusinessId,
        expected_version: u64,
        payload: Value,
    ) -> Result<u64, WriteFailure> {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(&business_id) else {
            return Err(WriteFailure::NotFound);
        };

        if record.version != expected_version {
            return Err(WriteFailure::Conflict {
                current_version: record.version,
                current_payload: record.payload.clone(),
            });
        }

        record.version += 1;
        record.payload = payload;
        Ok(record.version)
    }

    /// Removes a record if `expected_version` matches. Deleting an
    /// unknown record succeeds (the delete is idempotent).
    pub fn delete(&self, business_id: BusinessId, expected_version: u64) -> Result<(), WriteFailure> {
        let mut records = self.records.write();
        let Some(record) = records.get(&business_id) else {
            return Ok(());
        };

        if record.version != expected_version {
            return Err(WriteFailure::Conflict {
                current_version: record.version,
                current_payload: record.payload.clone(),
            });
        }

        records.remove(&business_id);
        Ok(())
    }

    /// Advances a record as if another client had written it,
    /// bypassing the version check. Returns the new version. Intended
    /// for tests and tooling that simulate a concurrent writer.
    pub fn apply_external_edit(&self, business_id: BusinessId, payload: Value) -> Option<u64> {
        let mut records = self.records.write();
        let record = records.get_mut(&business_id)?;
        record.version += 1;
        record.payload = payload;
        Some(record.version)
    }

    /// Fetches a record by business id.
    pub fn get(&self, business_id: BusinessId) -> Option<StoredRecord> {
        self.records.read().get(&business_id).cloned()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}
