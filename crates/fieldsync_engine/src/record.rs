//! Local records and the record store adapter interface.
//!
//! The record store is owned by the host application; the engine only
//! reads and writes through the narrow [`RecordStore`] trait. The
//! in-memory implementation here is what the reference integration
//! tests (and hosts without their own store) use.

use crate::error::{SyncError, SyncResult};
use fieldsync_protocol::{BusinessId, RecordKind, ServerRef};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque local handle, stable for the lifetime of the record on this
/// device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LocalId(u64);

impl LocalId {
    /// Wraps a raw local handle.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw handle.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sync lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Created locally, not yet queued.
    LocalOnly,
    /// Queued for creation on the server.
    PendingCreate,
    /// Queued for update against the last known version.
    PendingUpdate,
    /// Queued for deletion.
    PendingDelete,
    /// Local and remote state agree.
    Synced,
    /// A version mismatch or item failure awaits explicit resolution.
    /// Excluded from automatic batching.
    Conflict,
}

impl SyncStatus {
    /// Returns true if a queue item for this record may enter a batch.
    pub fn is_batchable(&self) -> bool {
        !matches!(self, SyncStatus::Conflict)
    }
}

/// A local record (entity or curation) with its sync metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Opaque local handle.
    pub local_id: LocalId,
    /// Client-generated stable identifier; never regenerated.
    pub business_id: BusinessId,
    /// Record kind.
    pub kind: RecordKind,
    /// Server identity, present once accepted remotely.
    pub server_ref: Option<ServerRef>,
    /// Sync lifecycle state.
    pub sync_status: SyncStatus,
    /// Domain payload (opaque to the engine).
    pub payload: Value,
    /// Server payload as of the last acknowledged sync; the baseline the
    /// field-group merge diffs against.
    pub base_payload: Option<Value>,
    /// Timestamp of the last local mutation (milliseconds since epoch).
    pub updated_at_local: u64,
}

impl Record {
    /// Creates a fresh local record with a generated business id.
    pub fn new_local(local_id: LocalId, kind: RecordKind, payload: Value) -> Self {
        Self {
            local_id,
            business_id: BusinessId::generate(),
            kind,
            server_ref: None,
            sync_status: SyncStatus::LocalOnly,
            payload,
            base_payload: None,
            updated_at_local: now_millis(),
        }
    }

    /// Last known server version, if any.
    pub fn version(&self) -> Option<u64> {
        self.server_ref.as_ref().map(|r| r.version)
    }

    /// Marks a local mutation, refreshing the local timestamp.
    pub fn touch(&mut self) {
        self.updated_at_local = now_millis();
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The narrow interface the engine consumes from the host's store.
pub trait RecordStore: Send + Sync {
    /// Fetches a record by local handle.
    fn get(&self, local_id: LocalId) -> SyncResult<Option<Record>>;

    /// Inserts or replaces a record.
    fn put(&self, record: Record) -> SyncResult<()>;

    /// Removes a record entirely (used after server-acknowledged
    /// deletes; records are purged, not merely marked).
    fn delete(&self, local_id: LocalId) -> SyncResult<()>;

    /// Lists records in a given sync status.
    fn list_by_status(&self, status: SyncStatus) -> SyncResult<Vec<Record>>;
}

/// An in-memory record store.
///
/// Intended for tests and hosts without their own persistence. An
/// optional capacity bound makes `put` of a new record fail with the
/// quota error once reached, so hosts can exercise the quota path.
pub struct MemoryRecordStore {
    records: RwLock<HashMap<LocalId, Record>>,
    capacity: Option<usize>,
}

impl MemoryRecordStore {
    /// Creates an unbounded in-memory store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            capacity: None,
        }
    }

    /// Creates a store that holds at most `capacity` records.
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, local_id: LocalId) -> SyncResult<Option<Record>> {
        Ok(self.records.read().get(&local_id).cloned())
    }

    fn put(&self, record: Record) -> SyncResult<()> {
        let mut records = self.records.write();
        if let Some(capacity) = self.capacity {
            if records.len() >= capacity && !records.contains_key(&record.local_id) {
                return Err(SyncError::Quota(format!(
                    "record store at capacity ({capacity})"
                )));
            }
        }
        records.insert(record.local_id, record);
        Ok(())
    }

    fn delete(&self, local_id: LocalId) -> SyncResult<()> {
        self.records.write().remove(&local_id);
        Ok(())
    }

    fn list_by_status(&self, status: SyncStatus) -> SyncResult<Vec<Record>> {
        let mut records: Vec<Record> = self
            .records
            .read()
            .values()
            .filter(|r| r.sync_status == status)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.local_id);
        Ok(records)
    }
}
