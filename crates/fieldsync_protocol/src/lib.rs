//! # FieldSync Protocol
//!
//! Wire contract types for FieldSync synchronization.
//!
//! This crate provides:
//! - `BulkSyncRequest` / `BulkSyncResponse` for the `POST /sync` endpoint
//! - `ItemOutcome` — one strongly-typed tagged result per batch item
//! - Single-item contract types (`PATCH`/`DELETE /entities/{id}`)
//! - Identifier types (`BusinessId`, `ServerRef`, `RecordKind`)
//!
//! This is a pure protocol crate with no I/O operations. All bodies are
//! JSON via serde.
//!
//! ## Key Invariants
//!
//! - Every response item echoes the client-supplied `business_id`, so
//!   results are matched back to queue items without relying on array
//!   order.
//! - Per-item outcomes are independent: a bulk response mixes `created`,
//!   `updated`, `deleted` and `failed` entries freely (partial success,
//!   not cross-item atomic).
//! - A version mismatch is reported as a conflict carrying the server's
//!   current version and payload, never as a generic error.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bulk;
mod single;
mod types;

pub use bulk::{
    BulkSyncRequest, BulkSyncResponse, CreateItem, CreatedItem, DeleteItem, DeletedItem,
    FailedItem, FailureReason, ItemOutcome, UpdateItem, UpdatedItem,
};
pub use single::{ConflictBody, SingleOutcome, UpdateRecordRequest, VERSION_HEADER};
pub use types::{BusinessId, RecordKind, ServerRef};
