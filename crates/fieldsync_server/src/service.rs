//! Typed handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::{RecordStore, WriteFailure};
use fieldsync_protocol::{
    BulkSyncRequest, BulkSyncResponse, BusinessId, ConflictBody, CreatedItem, DeletedItem,
    FailedItem, UpdatedItem,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Typed reply of a single-item handler.
#[derive(Debug, Clone, PartialEq)]
pub enum SingleReply {
    /// The update was accepted at this version.
    Updated {
        /// Version after the update.
        version: u64,
    },
    /// The delete was accepted.
    Deleted,
    /// Version mismatch; the server's current state.
    Conflict(ConflictBody),
}

/// Handler for sync requests.
///
/// Bulk processing is partial-success: each item is applied and judged
/// independently, so one bad item never poisons the batch. The whole
/// request is rejected only for request-level faults (oversized batch,
/// malformed body).
pub struct SyncService {
    config: ServerConfig,
    store: Arc<RecordStore>,
}

impl SyncService {
    /// Creates a new service over the given store.
    pub fn new(config: ServerConfig, store: Arc<RecordStore>) -> Self {
        Self { config, store }
    }

    /// Service configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The underlying store (for inspection in tests and tools).
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Handles `POST /sync`.
    pub fn handle_bulk(&self, request: BulkSyncRequest) -> ServerResult<BulkSyncResponse> {
        if request.len() > self.config.max_batch_size {
            return Err(ServerError::InvalidRequest(format!(
                "batch of {} items exceeds limit of {}",
                request.len(),
                self.config.max_batch_size
            )));
        }

        let mut response = BulkSyncResponse::default();

        for item in request.create {
            if let Err(detail) = validate_payload(&item.payload) {
                response.failed.push(FailedItem::validation(item.business_id, detail));
                continue;
            }
            let (server_id, version) = self.store.create(item.business_id, item.kind, item.payload);
            response.created.push(CreatedItem {
                business_id: item.business_id,
                server_id,
                version,
            });
        }

        for item in request.update {
            if let Err(detail) = validate_payload(&item.payload) {
                response.failed.push(FailedItem::validation(item.business_id, detail));
                continue;
            }
            match self.store.update(item.business_id, item.version, item.payload) {
                Ok(version) => response.updated.push(UpdatedItem {
                    business_id: item.business_id,
                    version,
                }),
                Err(failure) => response.failed.push(failed_item(item.business_id, failure)),
            }
        }

        for item in request.delete {
            match self.store.delete(item.business_id, item.version) {
                Ok(()) => response.deleted.push(DeletedItem {
                    business_id: item.business_id,
                }),
                Err(failure) => response.failed.push(failed_item(item.business_id, failure)),
            }
        }

        info!(
            created = response.created.len(),
            updated = response.updated.len(),
            deleted = response.deleted.len(),
            failed = response.failed.len(),
            "bulk sync processed"
        );
        Ok(response)
    }

    /// Handles `PATCH /entities/{business_id}`.
    pub fn handle_update(
        &self,
        business_id: BusinessId,
        expected_version: u64,
        payload: Value,
    ) -> ServerResult<SingleReply> {
        validate_payload(&payload).map_err(ServerError::InvalidRequest)?;

        match self.store.update(business_id, expected_version, payload) {
            Ok(version) => Ok(SingleReply::Updated { version }),
            Err(WriteFailure::NotFound) => {
                Err(ServerError::NotFound(business_id.to_string()))
            }
            Err(WriteFailure::Conflict {
                current_version,
                current_payload,
            }) => {
                debug!(%business_id, expected_version, current_version, "update conflict");
                Ok(SingleReply::Conflict(ConflictBody {
                    current_version,
                    current_payload,
                }))
            }
        }
    }

    /// Handles `DELETE /entities/{business_id}`.
    pub fn handle_delete(
        &self,
        business_id: BusinessId,
        expected_version: u64,
    ) -> ServerResult<SingleReply> {
        match self.store.delete(business_id, expected_version) {
            Ok(()) => Ok(SingleReply::Deleted),
            Err(WriteFailure::NotFound) => Ok(SingleReply::Deleted),
            Err(WriteFailure::Conflict {
                current_version,
                current_payload,
            }) => {
                debug!(%business_id, expected_version, current_version, "delete conflict");
                Ok(SingleReply::Conflict(ConflictBody {
                    current_version,
                    current_payload,
                }))
            }
        }
    }
}

fn validate_payload(payload: &Value) -> Result<(), String> {
    if payload.is_object() {
        Ok(())
    } else {
        Err("payload must be a JSON object".to_string())
    }
}

fn failed_item(business_id: BusinessId, failure: WriteFailure) -> FailedItem {
    match failure {
        WriteFailure::NotFound => FailedItem::not_found(business_id),
        WriteFailure::Conflict {
            current_version,
            current_payload,
        } => FailedItem::conflict(business_id, current_version, current_payload),
    }
}
