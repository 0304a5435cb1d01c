//! Conflict resolution.
//!
//! A pure decision function invoked by the coordinator when the server
//! reports a version mismatch. The default policy is deterministic and
//! documented, not a heuristic:
//!
//! - a pending delete always wins, reissued against the server's
//!   current version;
//! - otherwise last-writer-wins by field-group: top-level fields the
//!   client did not touch in this pending operation are taken from the
//!   server's current payload, touched fields overwrite the server's
//!   value. The merge is resubmitted once, tagged with the server's
//!   current version. A second mismatch surfaces the record for manual
//!   resolution instead of looping.

use crate::queue::{QueueItem, QueueOp};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Outcome of the resolution decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Reissue the delete against the server's current version.
    DeleteWins {
        /// Version to tag the delete with.
        version: u64,
    },
    /// Resubmit a merged payload against the server's current version.
    Resubmit {
        /// Version to tag the update with.
        version: u64,
        /// Field-group merge of local and server payloads.
        merged: Value,
    },
    /// No automatic resolution; surface to the host.
    Manual,
}

/// Decides how to resolve a server-reported version mismatch for the
/// given pending item.
///
/// `base_payload` is the server payload as of the last acknowledged
/// sync (what the local edit was made against); `server_payload` is the
/// server's current payload reported with the conflict.
pub fn resolve(
    item: &QueueItem,
    base_payload: Option<&Value>,
    server_version: u64,
    server_payload: &Value,
) -> Resolution {
    match item.op {
        QueueOp::Delete => Resolution::DeleteWins {
            version: server_version,
        },
        QueueOp::Update => {
            let Some(snapshot) = item.snapshot.as_ref() else {
                return Resolution::Manual;
            };
            Resolution::Resubmit {
                version: server_version,
                merged: merge_by_field(snapshot, base_payload, server_payload),
            }
        }
        // Creates are deduplicated by business id server-side and
        // should never version-conflict.
        QueueOp::Create => Resolution::Manual,
    }
}

/// Top-level keys whose values differ between the local snapshot and
/// the baseline it was edited against. When no baseline is known, every
/// snapshot key counts as touched.
pub fn touched_fields(snapshot: &Map<String, Value>, base: Option<&Value>) -> BTreeSet<String> {
    let Some(Value::Object(base)) = base else {
        return snapshot.keys().cloned().collect();
    };

    snapshot
        .iter()
        .filter(|(key, value)| base.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .collect()
}

/// Last-writer-wins by field-group.
///
/// Starts from the server's current payload and overwrites exactly the
/// fields the client touched. Non-object payloads fall back to
/// whole-value last-writer-wins (the local snapshot).
pub fn merge_by_field(snapshot: &Value, base: Option<&Value>, server: &Value) -> Value {
    let (Value::Object(snapshot_map), Value::Object(server_map)) = (snapshot, server) else {
        return snapshot.clone();
    };

    let touched = touched_fields(snapshot_map, base);

    let mut merged = server_map.clone();
    for key in &touched {
        match snapshot_map.get(key) {
            Some(value) => {
                merged.insert(key.clone(), value.clone());
            }
            None => {
                // Touched by removal.
                merged.remove(key);
            }
        }
    }

    // A field deleted locally (present in base, absent from snapshot)
    // counts as touched too.
    if let Some(Value::Object(base_map)) = base {
        for key in base_map.keys() {
            if !snapshot_map.contains_key(key) {
                merged.remove(key);
            }
        }
    }

    Value::Object(merged)
}
