//! # FieldSync Server
//!
//! Reference sync service for FieldSync clients.
//!
//! This crate provides:
//! - Bulk endpoint (`POST /sync`) with partial-success semantics
//! - Single-item endpoints (`PATCH`/`DELETE /entities/{id}`) with
//!   optimistic locking via the `If-Match-Version` header
//! - Idempotent creates keyed by client-generated business ids
//! - Optional bearer-token authentication
//!
//! # Architecture
//!
//! The service is framework-agnostic. [`Router`] maps HTTP-shaped
//! requests (method, path, headers, body) onto [`SyncService`], which
//! applies them to an in-memory [`RecordStore`]. Embedders mount the
//! router behind any HTTP listener; the engine's test suite drives it
//! in-process through a loopback client.
//!
//! # Versioning
//!
//! Every accepted write advances a record's version by exactly one. A
//! write carrying a stale version is rejected with the server's current
//! version and payload — per item on the bulk endpoint, as a `409` on
//! the single-item endpoints — so the client can resolve without an
//! extra round trip. The server never merges concurrent writes itself.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod router;
mod service;
mod store;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use router::Router;
pub use service::{SingleReply, SyncService};
pub use store::{RecordStore, StoredRecord, WriteFailure};
