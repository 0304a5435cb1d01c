//! # FieldSync Engine
//!
//! Offline-first sync engine for field-collected records.
//!
//! This crate provides:
//! - Durable, coalescing queue of pending local operations
//! - Sync coordinator (drain → bulk submit → reconcile)
//! - Optimistic-locking conflict detection and field-group resolution
//! - Retry with exponential backoff and a dead-letter pool
//! - HTTP transport abstraction with in-process loopback
//! - Pluggable local record store
//!
//! ## Architecture
//!
//! The engine implements a **queue-then-reconcile** model:
//! 1. Local mutations are applied to the record store immediately and
//!    queued for upload (the device works fully offline)
//! 2. A sync cycle drains a bounded batch and submits it as one bulk
//!    request
//! 3. Per-item results update record status; version mismatches go
//!    through one automatic resolution pass before surfacing to the
//!    host
//!
//! ## Key Invariants
//!
//! - Local edits are never lost: queue items are removed only after a
//!   confirmed server outcome, and an item amended mid-flight re-arms
//!   instead of being acknowledged away
//! - At most one outstanding queue item per record; per-record operation
//!   order is preserved
//! - Every accepted write advances the server version by exactly one;
//!   stale writes are rejected, never silently merged server-side
//! - Creates are idempotent: the client-generated business id is the
//!   server's dedup key, so a retried create binds to the same record

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod http;
mod queue;
mod record;
mod resolver;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use coordinator::{Mutation, SyncCoordinator, SyncReport, SyncStats};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpRequest, HttpResponse, HttpTransport, LoopbackClient, LoopbackServer};
pub use queue::{AckOutcome, EnqueueOutcome, FailOutcome, QueueItem, QueueOp, SyncQueue};
pub use record::{LocalId, MemoryRecordStore, Record, RecordStore, SyncStatus};
pub use resolver::{merge_by_field, resolve, touched_fields, Resolution};
pub use transport::{MockTransport, SyncTransport};
