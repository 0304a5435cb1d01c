//! Durable, ordered log of pending local operations.
//!
//! The queue is FIFO across all records; batching may reorder *between*
//! records but per-record order is preserved by a stronger structural
//! rule: a record has at most one outstanding item at a time. A new
//! local edit amends the existing item's snapshot (coalescing) instead
//! of appending a second item; deletes supersede and cancel any pending
//! create or update.
//!
//! Items are removed only after confirmed server outcome (`ack`), so a
//! process restart never loses a pending mutation. Entries are
//! serde-serializable; hosts persist them via [`SyncQueue::entries`] and
//! restore with [`SyncQueue::from_entries`].

use crate::record::{now_millis, LocalId};
use fieldsync_protocol::{BusinessId, RecordKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

/// The kind of pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOp {
    /// Create the record on the server.
    Create,
    /// Update the record against its last known version.
    Update,
    /// Delete the record against its last known version.
    Delete,
}

/// A pending operation referencing a record in the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Queue-assigned identifier.
    pub item_id: u64,
    /// Operation kind.
    pub op: QueueOp,
    /// The local record this operation refers to.
    pub record_ref: LocalId,
    /// The record's stable business identifier.
    pub business_id: BusinessId,
    /// Record kind (creates carry it on the wire).
    pub kind: RecordKind,
    /// Payload captured at enqueue time; `None` for deletes.
    pub snapshot: Option<Value>,
    /// Last known server version for updates/deletes.
    pub base_version: Option<u64>,
    /// Bumped on every amend; `ack` removes the item only if the
    /// revision still matches what was drained, so a mid-flight edit is
    /// never lost.
    pub revision: u32,
    /// Item-level retry counter.
    pub attempt_count: u32,
    /// Last item-level error, if any.
    pub last_error: Option<String>,
    /// Enqueue timestamp (milliseconds since epoch).
    pub enqueued_at: u64,
}

/// Result of an `enqueue` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new item was appended.
    Appended(u64),
    /// An existing pending item absorbed the edit.
    Coalesced(u64),
    /// A delete replaced a pending update.
    Superseded(u64),
    /// A delete cancelled a pending create; nothing remains to send and
    /// the caller may purge the local record.
    Cancelled,
}

/// Result of an `ack` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The item was removed.
    Removed,
    /// The item was amended mid-flight and survives as a pending update
    /// against the acknowledged version.
    Rearmed,
}

/// Result of a `fail` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The item stays queued for the next cycle.
    Queued,
    /// The item exhausted its attempts and moved to the dead-letter
    /// pool.
    DeadLettered,
}

/// The pending-operation queue.
pub struct SyncQueue {
    entries: VecDeque<QueueItem>,
    dead_letter: Vec<QueueItem>,
    next_item_id: u64,
}

impl SyncQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            dead_letter: Vec::new(),
            next_item_id: 1,
        }
    }

    /// Restores a queue from persisted entries.
    pub fn from_entries(entries: Vec<QueueItem>, dead_letter: Vec<QueueItem>) -> Self {
        let next_item_id = entries
            .iter()
            .chain(dead_letter.iter())
            .map(|e| e.item_id)
            .max()
            .map_or(1, |max| max + 1);
        Self {
            entries: entries.into(),
            dead_letter,
            next_item_id,
        }
    }

    /// Snapshot of all live entries, in order (for host persistence).
    pub fn entries(&self) -> Vec<QueueItem> {
        self.entries.iter().cloned().collect()
    }

    /// Appends or coalesces a pending operation.
    ///
    /// Coalescing rules:
    /// - an edit while a create/update is pending amends that item's
    ///   snapshot and bumps its revision;
    /// - a delete supersedes a pending update and cancels a pending
    ///   create outright;
    /// - anything enqueued after a pending delete is absorbed by it
    ///   (delete has priority).
    pub fn enqueue(
        &mut self,
        op: QueueOp,
        record_ref: LocalId,
        business_id: BusinessId,
        kind: RecordKind,
        snapshot: Option<Value>,
        base_version: Option<u64>,
    ) -> EnqueueOutcome {
        if let Some(pos) = self.entries.iter().position(|e| e.record_ref == record_ref) {
            let existing = &mut self.entries[pos];
            return match (existing.op, op) {
                (QueueOp::Create, QueueOp::Delete) => {
                    // The server never saw this record.
                    self.entries.remove(pos);
                    EnqueueOutcome::Cancelled
                }
                (QueueOp::Update, QueueOp::Delete) => {
                    existing.op = QueueOp::Delete;
                    existing.snapshot = None;
                    existing.base_version = base_version.or(existing.base_version);
                    existing.revision += 1;
                    existing.attempt_count = 0;
                    existing.last_error = None;
                    EnqueueOutcome::Superseded(existing.item_id)
                }
                (QueueOp::Delete, _) => {
                    // Delete has priority; later edits are absorbed.
                    EnqueueOutcome::Coalesced(existing.item_id)
                }
                _ => {
                    existing.snapshot = snapshot;
                    if base_version.is_some() {
                        existing.base_version = base_version;
                    }
                    existing.revision += 1;
                    EnqueueOutcome::Coalesced(existing.item_id)
                }
            };
        }

        let item_id = self.next_item_id;
        self.next_item_id += 1;
        self.entries.push_back(QueueItem {
            item_id,
            op,
            record_ref,
            business_id,
            kind,
            snapshot,
            base_version,
            revision: 0,
            attempt_count: 0,
            last_error: None,
            enqueued_at: now_millis(),
        });
        EnqueueOutcome::Appended(item_id)
    }

    /// Returns up to `max_items` items in FIFO order without removing
    /// them. Items are removed only on `ack`.
    pub fn drain(&self, max_items: usize) -> Vec<QueueItem> {
        self.drain_filtered(max_items, |_| true)
    }

    /// Like [`drain`](Self::drain), skipping items the predicate
    /// rejects (used to exclude records parked in conflict status).
    pub fn drain_filtered(
        &self,
        max_items: usize,
        predicate: impl Fn(&QueueItem) -> bool,
    ) -> Vec<QueueItem> {
        self.entries
            .iter()
            .filter(|e| predicate(e))
            .take(max_items)
            .cloned()
            .collect()
    }

    /// Removes an item after confirmed server outcome.
    ///
    /// If the item was amended while in flight (revision advanced past
    /// `drained_revision`), the amended edit must not be lost: the item
    /// survives, re-armed as an update against `acked_version`.
    pub fn ack(
        &mut self,
        item_id: u64,
        drained_revision: u32,
        acked_version: Option<u64>,
    ) -> AckOutcome {
        let Some(pos) = self.entries.iter().position(|e| e.item_id == item_id) else {
            return AckOutcome::Removed;
        };

        if self.entries[pos].revision == drained_revision {
            self.entries.remove(pos);
            return AckOutcome::Removed;
        }

        let item = &mut self.entries[pos];
        if item.op == QueueOp::Create {
            item.op = QueueOp::Update;
        }
        item.base_version = acked_version.or(item.base_version);
        item.attempt_count = 0;
        item.last_error = None;
        AckOutcome::Rearmed
    }

    /// Records an item-level failure.
    ///
    /// The attempt counter advances; once it reaches `max_attempts` the
    /// item moves to the dead-letter pool, surfaced to the caller and
    /// never silently dropped.
    pub fn fail(
        &mut self,
        item_id: u64,
        error: impl Into<String>,
        max_attempts: u32,
    ) -> FailOutcome {
        let Some(pos) = self.entries.iter().position(|e| e.item_id == item_id) else {
            return FailOutcome::Queued;
        };

        let item = &mut self.entries[pos];
        item.attempt_count += 1;
        item.last_error = Some(error.into());
        let exhausted = item.attempt_count >= max_attempts;

        if exhausted {
            if let Some(item) = self.entries.remove(pos) {
                self.dead_letter.push(item);
            }
            FailOutcome::DeadLettered
        } else {
            FailOutcome::Queued
        }
    }

    /// Moves an item straight to the dead-letter pool (non-retryable
    /// error classes such as validation failures).
    pub fn fail_fatal(&mut self, item_id: u64, error: impl Into<String>) -> FailOutcome {
        if let Some(pos) = self.entries.iter().position(|e| e.item_id == item_id) {
            if let Some(mut item) = self.entries.remove(pos) {
                item.attempt_count += 1;
                item.last_error = Some(error.into());
                self.dead_letter.push(item);
            }
        }
        FailOutcome::DeadLettered
    }

    /// Annotates an item without advancing its attempt counter (used
    /// for conflicts awaiting explicit resolution; those are excluded
    /// from batching by record status, not by retry exhaustion).
    pub fn record_error(&mut self, item_id: u64, error: impl Into<String>) {
        if let Some(item) = self.entries.iter_mut().find(|e| e.item_id == item_id) {
            item.last_error = Some(error.into());
        }
    }

    /// The pending item for a record, if any.
    pub fn pending_for(&self, record_ref: LocalId) -> Option<&QueueItem> {
        self.entries.iter().find(|e| e.record_ref == record_ref)
    }

    /// Dead-letter pool snapshot.
    pub fn dead_letter_items(&self) -> Vec<QueueItem> {
        self.dead_letter.clone()
    }

    /// Moves a dead-letter item back into the queue with a reset
    /// attempt counter. Returns false if the item is unknown.
    pub fn retry_dead_letter(&mut self, item_id: u64) -> bool {
        let Some(pos) = self.dead_letter.iter().position(|e| e.item_id == item_id) else {
            return false;
        };
        let mut item = self.dead_letter.remove(pos);
        item.attempt_count = 0;
        item.last_error = None;
        self.entries.push_back(item);
        true
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no items are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SyncQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn enqueue_create(queue: &mut SyncQueue, id: u64) -> (LocalId, BusinessId) {
        let local = LocalId::new(id);
        let bid = BusinessId::generate();
        queue.enqueue(
            QueueOp::Create,
            local,
            bid,
            RecordKind::Entity,
            Some(json!({"n": id})),
            None,
        );
        (local, bid)
    }

    #[test]
    fn enqueue_assigns_increasing_ids() {
        let mut queue = SyncQueue::new();
        let a = queue.enqueue(
            QueueOp::Create,
            LocalId::new(1),
            BusinessId::generate(),
            RecordKind::Entity,
            Some(json!({})),
            None,
        );
        let b = queue.enqueue(
            QueueOp::Create,
            LocalId::new(2),
            BusinessId::generate(),
            RecordKind::Curation,
            Some(json!({})),
            None,
        );
        assert_eq!(a, EnqueueOutcome::Appended(1));
        assert_eq!(b, EnqueueOutcome::Appended(2));
    }

    #[test]
    fn edit_coalesces_into_pending_item() {
        let mut queue = SyncQueue::new();
        let (local, bid) = enqueue_create(&mut queue, 1);

        let outcome = queue.enqueue(
            QueueOp::Update,
            local,
            bid,
            RecordKind::Entity,
            Some(json!({"n": 99})),
            None,
        );

        assert_eq!(outcome, EnqueueOutcome::Coalesced(1));
        assert_eq!(queue.len(), 1);
        let item = queue.pending_for(local).unwrap();
        // The create stays a create; only the snapshot is amended.
        assert_eq!(item.op, QueueOp::Create);
        assert_eq!(item.snapshot, Some(json!({"n": 99})));
        assert_eq!(item.revision, 1);
    }

    #[test]
    fn delete_supersedes_pending_update() {
        let mut queue = SyncQueue::new();
        let local = LocalId::new(1);
        let bid = BusinessId::generate();
        queue.enqueue(
            QueueOp::Update,
            local,
            bid,
            RecordKind::Entity,
            Some(json!({"n": 1})),
            Some(3),
        );

        let outcome = queue.enqueue(QueueOp::Delete, local, bid, RecordKind::Entity, None, Some(3));

        assert_eq!(outcome, EnqueueOutcome::Superseded(1));
        let item = queue.pending_for(local).unwrap();
        assert_eq!(item.op, QueueOp::Delete);
        assert!(item.snapshot.is_none());
    }

    #[test]
    fn delete_cancels_pending_create() {
        let mut queue = SyncQueue::new();
        let (local, bid) = enqueue_create(&mut queue, 1);

        let outcome = queue.enqueue(QueueOp::Delete, local, bid, RecordKind::Entity, None, None);

        assert_eq!(outcome, EnqueueOutcome::Cancelled);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_does_not_remove() {
        let mut queue = SyncQueue::new();
        enqueue_create(&mut queue, 1);
        enqueue_create(&mut queue, 2);
        enqueue_create(&mut queue, 3);

        let batch = queue.drain(2);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].item_id, 1);
        assert_eq!(batch[1].item_id, 2);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn ack_removes_when_revision_matches() {
        let mut queue = SyncQueue::new();
        enqueue_create(&mut queue, 1);

        let drained = queue.drain(10);
        let outcome = queue.ack(drained[0].item_id, drained[0].revision, Some(1));
        assert_eq!(outcome, AckOutcome::Removed);
        assert!(queue.is_empty());
    }

    #[test]
    fn ack_rearms_amended_item_as_update() {
        let mut queue = SyncQueue::new();
        let (local, bid) = enqueue_create(&mut queue, 1);
        let drained = queue.drain(10);

        // Edit lands while the batch is in flight.
        queue.enqueue(
            QueueOp::Update,
            local,
            bid,
            RecordKind::Entity,
            Some(json!({"n": 2})),
            None,
        );

        let outcome = queue.ack(drained[0].item_id, drained[0].revision, Some(1));
        assert_eq!(outcome, AckOutcome::Rearmed);

        let item = queue.pending_for(local).unwrap();
        assert_eq!(item.op, QueueOp::Update);
        assert_eq!(item.base_version, Some(1));
        assert_eq!(item.snapshot, Some(json!({"n": 2})));
    }

    #[test]
    fn fail_moves_to_dead_letter_at_ceiling() {
        let mut queue = SyncQueue::new();
        enqueue_create(&mut queue, 1);

        assert_eq!(queue.fail(1, "server hiccup", 3), FailOutcome::Queued);
        assert_eq!(queue.fail(1, "server hiccup", 3), FailOutcome::Queued);
        assert_eq!(queue.fail(1, "server hiccup", 3), FailOutcome::DeadLettered);

        assert!(queue.is_empty());
        let dead = queue.dead_letter_items();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempt_count, 3);
        assert_eq!(dead[0].last_error.as_deref(), Some("server hiccup"));
    }

    #[test]
    fn fail_fatal_skips_retries() {
        let mut queue = SyncQueue::new();
        enqueue_create(&mut queue, 1);

        assert_eq!(
            queue.fail_fatal(1, "payload must be an object"),
            FailOutcome::DeadLettered
        );
        assert!(queue.is_empty());
        assert_eq!(queue.dead_letter_items().len(), 1);
    }

    #[test]
    fn retry_dead_letter_requeues() {
        let mut queue = SyncQueue::new();
        enqueue_create(&mut queue, 1);
        queue.fail_fatal(1, "rejected");

        assert!(queue.retry_dead_letter(1));
        assert_eq!(queue.len(), 1);
        assert!(queue.dead_letter_items().is_empty());
        assert_eq!(queue.pending_for(LocalId::new(1)).unwrap().attempt_count, 0);

        assert!(!queue.retry_dead_letter(42));
    }

    #[test]
    fn record_error_leaves_attempts_alone() {
        let mut queue = SyncQueue::new();
        enqueue_create(&mut queue, 1);

        queue.record_error(1, "unresolved conflict");
        let item = queue.pending_for(LocalId::new(1)).unwrap();
        assert_eq!(item.attempt_count, 0);
        assert_eq!(item.last_error.as_deref(), Some("unresolved conflict"));
    }

    #[test]
    fn persistence_roundtrip() {
        let mut queue = SyncQueue::new();
        enqueue_create(&mut queue, 1);
        enqueue_create(&mut queue, 2);
        queue.fail_fatal(1, "rejected");

        let json = serde_json::to_string(&queue.entries()).unwrap();
        let entries: Vec<QueueItem> = serde_json::from_str(&json).unwrap();
        let restored = SyncQueue::from_entries(entries, queue.dead_letter_items());

        assert_eq!(restored.len(), 1);
        assert_eq!(restored.dead_letter_items().len(), 1);

        // New ids continue past everything restored.
        let outcome = restored_enqueue(restored);
        assert_eq!(outcome, EnqueueOutcome::Appended(3));
    }

    fn restored_enqueue(mut queue: SyncQueue) -> EnqueueOutcome {
        queue.enqueue(
            QueueOp::Create,
            LocalId::new(9),
            BusinessId::generate(),
            RecordKind::Entity,
            Some(json!({})),
            None,
        )
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Action {
            Create(u64),
            Update(u64),
            Delete(u64),
        }

        fn action_strategy() -> impl Strategy<Value = Action> {
            (0u64..5, 0u8..3).prop_map(|(id, kind)| match kind {
                0 => Action::Create(id),
                1 => Action::Update(id),
                _ => Action::Delete(id),
            })
        }

        proptest! {
            #[test]
            fn at_most_one_outstanding_item_per_record(
                actions in proptest::collection::vec(action_strategy(), 0..40)
            ) {
                let mut queue = SyncQueue::new();
                let bids: Vec<BusinessId> =
                    (0..5).map(|_| BusinessId::generate()).collect();

                for action in actions {
                    let (op, id) = match action {
                        Action::Create(id) => (QueueOp::Create, id),
                        Action::Update(id) => (QueueOp::Update, id),
                        Action::Delete(id) => (QueueOp::Delete, id),
                    };
                    let snapshot = match op {
                        QueueOp::Delete => None,
                        _ => Some(json!({"id": id})),
                    };
                    queue.enqueue(
                        op,
                        LocalId::new(id),
                        bids[id as usize],
                        RecordKind::Entity,
                        snapshot,
                        None,
                    );
                }

                let entries = queue.entries();
                // One outstanding item per record, at most.
                let mut refs: Vec<LocalId> =
                    entries.iter().map(|e| e.record_ref).collect();
                refs.sort();
                refs.dedup();
                prop_assert_eq!(refs.len(), entries.len());

                // FIFO: item ids strictly increase front to back.
                for window in entries.windows(2) {
                    prop_assert!(window[0].item_id < window[1].item_id);
                }
            }
        }
    }
}
