//! Bulk sync contract: `POST /sync`.

use crate::types::{BusinessId, RecordKind, ServerRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A create item in a bulk request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateItem {
    /// Client-generated stable identifier (server dedup key).
    pub business_id: BusinessId,
    /// Record kind.
    pub kind: RecordKind,
    /// Domain payload.
    pub payload: Value,
}

/// An update item in a bulk request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateItem {
    /// Client-generated stable identifier.
    pub business_id: BusinessId,
    /// Last known server version (optimistic-lock token).
    pub version: u64,
    /// Domain payload.
    pub payload: Value,
}

/// A delete item in a bulk request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteItem {
    /// Client-generated stable identifier.
    pub business_id: BusinessId,
    /// Last known server version (optimistic-lock token).
    pub version: u64,
}

/// Body of `POST /sync`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkSyncRequest {
    /// Records to create (upserted by business id).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub create: Vec<CreateItem>,
    /// Records to update (version-checked).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update: Vec<UpdateItem>,
    /// Records to delete (version-checked).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<DeleteItem>,
}

impl BulkSyncRequest {
    /// Returns true if the request carries no operations.
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    /// Total number of items across all three arrays.
    pub fn len(&self) -> usize {
        self.create.len() + self.update.len() + self.delete.len()
    }
}

/// A successful create acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedItem {
    /// Echoed client identifier.
    pub business_id: BusinessId,
    /// Server-assigned identifier.
    pub server_id: String,
    /// Version assigned on acceptance (1 for a fresh create, the
    /// existing version for a deduplicated retry).
    pub version: u64,
}

/// A successful update acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatedItem {
    /// Echoed client identifier.
    pub business_id: BusinessId,
    /// Version after the update.
    pub version: u64,
}

/// A successful delete acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedItem {
    /// Echoed client identifier.
    pub business_id: BusinessId,
}

/// Why a bulk item was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Malformed payload; fatal for this item, never retried.
    Validation,
    /// Version mismatch; carries the server's current state.
    Conflict,
    /// The record does not exist on the server.
    NotFound,
    /// Server-side item-level fault; retryable.
    Internal,
}

impl FailureReason {
    /// Returns true if resubmitting the same item can succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureReason::Internal)
    }
}

/// A failed bulk item.
///
/// Conflict entries carry the server's current version and payload so
/// the client can resolve without a second round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    /// Echoed client identifier.
    pub business_id: BusinessId,
    /// Failure class.
    pub reason: FailureReason,
    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Server's current version (conflict entries only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<u64>,
    /// Server's current payload (conflict entries only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_payload: Option<Value>,
}

impl FailedItem {
    /// Creates a validation failure entry.
    pub fn validation(business_id: BusinessId, detail: impl Into<String>) -> Self {
        Self {
            business_id,
            reason: FailureReason::Validation,
            detail: Some(detail.into()),
            current_version: None,
            current_payload: None,
        }
    }

    /// Creates a not-found failure entry.
    pub fn not_found(business_id: BusinessId) -> Self {
        Self {
            business_id,
            reason: FailureReason::NotFound,
            detail: None,
            current_version: None,
            current_payload: None,
        }
    }

    /// Creates a conflict entry carrying the server's current state.
    pub fn conflict(business_id: BusinessId, current_version: u64, current_payload: Value) -> Self {
        Self {
            business_id,
            reason: FailureReason::Conflict,
            detail: None,
            current_version: Some(current_version),
            current_payload: Some(current_payload),
        }
    }

    /// Creates an internal-error entry.
    pub fn internal(business_id: BusinessId, detail: impl Into<String>) -> Self {
        Self {
            business_id,
            reason: FailureReason::Internal,
            detail: Some(detail.into()),
            current_version: None,
            current_payload: None,
        }
    }
}

/// Body of a `200` response to `POST /sync`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkSyncResponse {
    /// Accepted creates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created: Vec<CreatedItem>,
    /// Accepted updates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated: Vec<UpdatedItem>,
    /// Accepted deletes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted: Vec<DeletedItem>,
    /// Items that were not applied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<FailedItem>,
}

impl BulkSyncResponse {
    /// Total number of per-item results.
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len() + self.failed.len()
    }

    /// Returns true if the response carries no results.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes the four wire arrays into one tagged result per item.
    ///
    /// This is the only place the ad-hoc response shape is interpreted;
    /// downstream code matches on [`ItemOutcome`] exclusively.
    pub fn into_outcomes(self) -> Vec<ItemOutcome> {
        let mut outcomes =
            Vec::with_capacity(self.len());

        for item in self.created {
            outcomes.push(ItemOutcome::Created {
                business_id: item.business_id,
                server_ref: ServerRef::new(item.server_id, item.version),
            });
        }
        for item in self.updated {
            outcomes.push(ItemOutcome::Updated {
                business_id: item.business_id,
                version: item.version,
            });
        }
        for item in self.deleted {
            outcomes.push(ItemOutcome::Deleted {
                business_id: item.business_id,
            });
        }
        for item in self.failed {
            if item.reason == FailureReason::Conflict {
                outcomes.push(ItemOutcome::Conflicted {
                    business_id: item.business_id,
                    current_version: item.current_version.unwrap_or(0),
                    current_payload: item.current_payload.unwrap_or(Value::Null),
                });
            } else {
                outcomes.push(ItemOutcome::Failed {
                    business_id: item.business_id,
                    reason: item.reason,
                    detail: item.detail,
                });
            }
        }

        outcomes
    }
}

/// One strongly-typed result per batch item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    /// The record was created (or recognized as an already-accepted
    /// retry) and bound to a server identity.
    Created {
        /// Echoed client identifier.
        business_id: BusinessId,
        /// Assigned server identity and version.
        server_ref: ServerRef,
    },
    /// The record was updated.
    Updated {
        /// Echoed client identifier.
        business_id: BusinessId,
        /// Version after the update.
        version: u64,
    },
    /// The record was deleted.
    Deleted {
        /// Echoed client identifier.
        business_id: BusinessId,
    },
    /// Version mismatch; the server reports its current state.
    Conflicted {
        /// Echoed client identifier.
        business_id: BusinessId,
        /// Server's current version.
        current_version: u64,
        /// Server's current payload.
        current_payload: Value,
    },
    /// Item-level failure (validation, not found, internal).
    Failed {
        /// Echoed client identifier.
        business_id: BusinessId,
        /// Failure class.
        reason: FailureReason,
        /// Human-readable detail.
        detail: Option<String>,
    },
}

impl ItemOutcome {
    /// The business id this outcome refers to.
    pub fn business_id(&self) -> BusinessId {
        match self {
            ItemOutcome::Created { business_id, .. }
            | ItemOutcome::Updated { business_id, .. }
            | ItemOutcome::Deleted { business_id }
            | ItemOutcome::Conflicted { business_id, .. }
            | ItemOutcome::Failed { business_id, .. } => *business_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bid() -> BusinessId {
        BusinessId::generate()
    }

    #[test]
    fn request_wire_shape() {
        let id = bid();
        let request = BulkSyncRequest {
            create: vec![CreateItem {
                business_id: id,
                kind: RecordKind::Entity,
                payload: json!({"name": "spring"}),
            }],
            update: vec![],
            delete: vec![DeleteItem {
                business_id: id,
                version: 2,
            }],
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["create"][0]["business_id"], json!(id.to_string()));
        assert_eq!(value["create"][0]["payload"]["name"], json!("spring"));
        assert_eq!(value["delete"][0]["version"], json!(2));
        // Empty arrays are omitted entirely.
        assert!(value.get("update").is_none());
    }

    #[test]
    fn response_roundtrip() {
        let id = bid();
        let response = BulkSyncResponse {
            created: vec![CreatedItem {
                business_id: id,
                server_id: "e-1".into(),
                version: 1,
            }],
            updated: vec![],
            deleted: vec![],
            failed: vec![FailedItem::validation(bid(), "payload must be an object")],
        };

        let json = serde_json::to_string(&response).unwrap();
        let decoded: BulkSyncResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn conflict_decodes_as_conflicted_outcome() {
        let id = bid();
        let response = BulkSyncResponse {
            failed: vec![FailedItem::conflict(id, 5, json!({"name": "remote"}))],
            ..Default::default()
        };

        let outcomes = response.into_outcomes();
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            ItemOutcome::Conflicted {
                business_id,
                current_version,
                current_payload,
            } => {
                assert_eq!(*business_id, id);
                assert_eq!(*current_version, 5);
                assert_eq!(current_payload["name"], json!("remote"));
            }
            other => panic!("expected conflict outcome, got {other:?}"),
        }
    }

    #[test]
    fn outcomes_cover_all_arrays() {
        let ids: Vec<BusinessId> = (0..4).map(|_| bid()).collect();
        let response = BulkSyncResponse {
            created: vec![CreatedItem {
                business_id: ids[0],
                server_id: "e-1".into(),
                version: 1,
            }],
            updated: vec![UpdatedItem {
                business_id: ids[1],
                version: 4,
            }],
            deleted: vec![DeletedItem {
                business_id: ids[2],
            }],
            failed: vec![FailedItem::internal(ids[3], "disk full")],
        };

        let outcomes = response.into_outcomes();
        let got: Vec<BusinessId> = outcomes.iter().map(ItemOutcome::business_id).collect();
        assert_eq!(got, ids);
        assert!(matches!(
            outcomes[3],
            ItemOutcome::Failed {
                reason: FailureReason::Internal,
                ..
            }
        ));
    }

    #[test]
    fn failure_reason_retryability() {
        assert!(FailureReason::Internal.is_retryable());
        assert!(!FailureReason::Validation.is_retryable());
        assert!(!FailureReason::NotFound.is_retryable());
        assert!(!FailureReason::Conflict.is_retryable());
    }

    #[test]
    fn missing_arrays_default_to_empty() {
        let decoded: BulkSyncResponse = serde_json::from_str("{}").unwrap();
        assert!(decoded.is_empty());

        let decoded: BulkSyncRequest =
            serde_json::from_str(r#"{"create": []}"#).unwrap();
        assert!(decoded.is_empty());
    }
}
