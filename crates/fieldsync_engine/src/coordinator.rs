//! Sync coordinator.
//!
//! The coordinator drains the queue into a bounded batch, submits it as
//! one bulk request, interprets per-item results, and updates the
//! record store and queue accordingly. It owns its own in-progress flag
//! (single-flight per local replica) instead of any module-level state,
//! so two concurrent mutation paths can never both upload the same
//! queue state.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::queue::{AckOutcome, EnqueueOutcome, FailOutcome, QueueItem, QueueOp, SyncQueue};
use crate::record::{LocalId, Record, RecordStore, SyncStatus};
use crate::resolver::{self, Resolution};
use crate::transport::SyncTransport;
use fieldsync_protocol::{
    BulkSyncRequest, BusinessId, CreateItem, DeleteItem, FailureReason, ItemOutcome, RecordKind,
    ServerRef, SingleOutcome, UpdateItem,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A local mutation handed to [`SyncCoordinator::enqueue_mutation`].
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Create a new record.
    Create {
        /// Record kind.
        kind: RecordKind,
        /// Initial payload.
        payload: Value,
    },
    /// Replace the record's payload.
    Update {
        /// New payload.
        payload: Value,
    },
    /// Delete the record.
    Delete,
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Records created on the server.
    pub records_created: u64,
    /// Records updated on the server.
    pub records_updated: u64,
    /// Records deleted on the server.
    pub records_deleted: u64,
    /// Conflicts resolved automatically.
    pub conflicts_resolved: u64,
    /// Conflicts surfaced for manual resolution.
    pub conflicts_unresolved: u64,
    /// Whole-batch retries performed.
    pub retries: u64,
    /// Items moved to the dead-letter pool.
    pub dead_lettered: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Records created on the server this cycle.
    pub created: u64,
    /// Records updated on the server this cycle.
    pub updated: u64,
    /// Records deleted on the server this cycle.
    pub deleted: u64,
    /// Conflicts resolved by one automatic resubmission.
    pub conflicts_resolved: u64,
    /// Records left in conflict status for manual resolution.
    pub conflicts_unresolved: Vec<BusinessId>,
    /// Items moved to the dead-letter pool this cycle.
    pub dead_lettered: Vec<BusinessId>,
    /// Items still queued after the cycle.
    pub remaining: usize,
    /// Duration of the cycle.
    pub duration: Duration,
}

type ConflictCallback = Box<dyn Fn(&Record) + Send + Sync>;

/// Clears the in-progress flag when a cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A conflict reported by the bulk response, pending resolution.
struct PendingConflict {
    item: QueueItem,
    current_version: u64,
    current_payload: Value,
}

/// The sync coordinator.
///
/// Constructed once per process and shared by reference; all public
/// methods take `&self`.
pub struct SyncCoordinator<T: SyncTransport, S: RecordStore> {
    config: SyncConfig,
    transport: Arc<T>,
    store: Arc<S>,
    /// Queue plus the store-mutation critical section: every local
    /// read-modify-write of a record happens while holding this lock,
    /// so a reconciling cycle cannot race a concurrent UI edit.
    local: Mutex<SyncQueue>,
    in_progress: AtomicBool,
    cancelled: AtomicBool,
    paused_for_auth: AtomicBool,
    quota_exceeded: AtomicBool,
    stats: RwLock<SyncStats>,
    on_conflict: RwLock<Option<ConflictCallback>>,
}

impl<T: SyncTransport, S: RecordStore> SyncCoordinator<T, S> {
    /// Creates a new coordinator with an empty queue.
    pub fn new(config: SyncConfig, transport: T, store: Arc<S>) -> Self {
        Self::with_queue(config, transport, store, SyncQueue::new())
    }

    /// Creates a coordinator resuming a queue restored from host
    /// persistence.
    pub fn with_queue(config: SyncConfig, transport: T, store: Arc<S>, queue: SyncQueue) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            store,
            local: Mutex::new(queue),
            in_progress: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            paused_for_auth: AtomicBool::new(false),
            quota_exceeded: AtomicBool::new(false),
            stats: RwLock::new(SyncStats::default()),
            on_conflict: RwLock::new(None),
        }
    }

    /// Registers the callback invoked when a record enters conflict
    /// status and needs a human decision.
    pub fn set_on_conflict(&self, callback: impl Fn(&Record) + Send + Sync + 'static) {
        *self.on_conflict.write() = Some(Box::new(callback));
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Number of queued items.
    pub fn pending_count(&self) -> usize {
        self.local.lock().len()
    }

    /// Items that exhausted retries or hit non-retryable errors.
    pub fn get_dead_letter_items(&self) -> Vec<QueueItem> {
        self.local.lock().dead_letter_items()
    }

    /// Requeues a dead-letter item for another attempt.
    pub fn retry_dead_letter(&self, item_id: u64) -> bool {
        self.local.lock().retry_dead_letter(item_id)
    }

    /// Snapshot of queue entries for host persistence.
    pub fn queue_snapshot(&self) -> (Vec<QueueItem>, Vec<QueueItem>) {
        let local = self.local.lock();
        (local.entries(), local.dead_letter_items())
    }

    /// Requests cancellation of an in-flight cycle. The in-flight
    /// network call completes (avoiding ambiguous partial application)
    /// and its results are committed, but no new call starts.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clears the auth pause after the host re-authenticated.
    pub fn resume_after_auth(&self) {
        self.paused_for_auth.store(false, Ordering::SeqCst);
    }

    /// Returns true if syncing is paused awaiting re-authentication.
    pub fn is_paused_for_auth(&self) -> bool {
        self.paused_for_auth.load(Ordering::SeqCst)
    }

    /// Clears the quota latch after the host freed local storage.
    pub fn clear_quota(&self) {
        self.quota_exceeded.store(false, Ordering::SeqCst);
    }

    /// Appends a local mutation to the sync queue, coalescing with any
    /// pending item for the same record.
    pub fn enqueue_mutation(
        &self,
        local_id: LocalId,
        mutation: Mutation,
    ) -> SyncResult<EnqueueOutcome> {
        if self.quota_exceeded.load(Ordering::SeqCst) {
            return Err(SyncError::Quota(
                "enqueue blocked until the host frees local storage".into(),
            ));
        }

        let mut local = self.local.lock();
        match mutation {
            Mutation::Create { kind, payload } => {
                if self.store.get(local_id)?.is_some() {
                    return Err(SyncError::Validation(format!(
                        "record {local_id} already exists"
                    )));
                }
                let mut record = Record::new_local(local_id, kind, payload.clone());
                record.sync_status = SyncStatus::PendingCreate;
                let business_id = record.business_id;
                self.put_record(record)?;
                Ok(local.enqueue(
                    QueueOp::Create,
                    local_id,
                    business_id,
                    kind,
                    Some(payload),
                    None,
                ))
            }
            Mutation::Update { payload } => {
                let mut record = self
                    .store
                    .get(local_id)?
                    .ok_or(SyncError::RecordNotFound(local_id))?;
                if record.sync_status == SyncStatus::PendingDelete {
                    return Err(SyncError::Validation(format!(
                        "record {local_id} is pending delete"
                    )));
                }

                record.payload = payload.clone();
                record.touch();
                if matches!(
                    record.sync_status,
                    SyncStatus::Synced | SyncStatus::Conflict | SyncStatus::LocalOnly
                ) {
                    // A conflicted record re-arms against the server
                    // version captured when the conflict was recorded.
                    record.sync_status = if record.server_ref.is_some() {
                        SyncStatus::PendingUpdate
                    } else {
                        SyncStatus::PendingCreate
                    };
                }
                let business_id = record.business_id;
                let kind = record.kind;
                let version = record.version();
                let op = if record.server_ref.is_some() {
                    QueueOp::Update
                } else {
                    QueueOp::Create
                };
                self.put_record(record)?;
                Ok(local.enqueue(op, local_id, business_id, kind, Some(payload), version))
            }
            Mutation::Delete => {
                let mut record = self
                    .store
                    .get(local_id)?
                    .ok_or(SyncError::RecordNotFound(local_id))?;
                let outcome = local.enqueue(
                    QueueOp::Delete,
                    local_id,
                    record.business_id,
                    record.kind,
                    None,
                    record.version(),
                );
                if outcome == EnqueueOutcome::Cancelled {
                    // The server never saw this record; purge locally.
                    self.store.delete(local_id)?;
                } else {
                    record.sync_status = SyncStatus::PendingDelete;
                    record.touch();
                    self.put_record(record)?;
                }
                Ok(outcome)
            }
        }
    }

    /// Runs one sync cycle: drain, submit, reconcile.
    ///
    /// Refuses to start while another cycle is in progress or while the
    /// coordinator is paused awaiting re-authentication.
    pub fn run_sync_cycle(&self) -> SyncResult<SyncReport> {
        if self.paused_for_auth.load(Ordering::SeqCst) {
            return Err(SyncError::PausedForAuth);
        }
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::CycleInProgress);
        }
        let _guard = CycleGuard(&self.in_progress);
        self.cancelled.store(false, Ordering::SeqCst);

        let start = Instant::now();
        let result = self.run_cycle_inner(start);
        match &result {
            Ok(report) => {
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
                info!(
                    created = report.created,
                    updated = report.updated,
                    deleted = report.deleted,
                    remaining = report.remaining,
                    "sync cycle complete"
                );
            }
            Err(e) => {
                self.stats.write().last_error = Some(e.to_string());
                warn!(error = %e, "sync cycle failed");
            }
        }
        result
    }

    fn run_cycle_inner(&self, start: Instant) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();

        // Drain a bounded batch, excluding records parked in conflict
        // status; their items stay queued until explicitly resolved.
        let batch: Vec<QueueItem> = {
            let local = self.local.lock();
            local.drain_filtered(self.config.batch_size_limit, |item| {
                matches!(
                    self.store.get(item.record_ref),
                    Ok(Some(record)) if record.sync_status.is_batchable()
                ) || item.op == QueueOp::Delete
            })
        };

        if batch.is_empty() {
            report.remaining = self.pending_count();
            report.duration = start.elapsed();
            return Ok(report);
        }

        let request = self.partition(&batch);
        debug!(
            creates = request.create.len(),
            updates = request.update.len(),
            deletes = request.delete.len(),
            "submitting batch"
        );

        let response = self.submit_with_retry(&request)?;
        let outcomes = response.into_outcomes();

        // Phase 1: apply definitive outcomes; collect conflicts.
        let mut conflicts: Vec<PendingConflict> = Vec::new();
        for outcome in outcomes {
            let Some(item) = batch
                .iter()
                .find(|i| i.business_id == outcome.business_id())
            else {
                warn!(business_id = %outcome.business_id(), "response item matches no queued item");
                continue;
            };

            match outcome {
                ItemOutcome::Created {
                    server_ref,
                    ..
                } => {
                    self.apply_accepted(item, server_ref, &mut report, AcceptedKind::Created)?;
                }
                ItemOutcome::Updated { version, .. } => {
                    let server_ref = self
                        .store
                        .get(item.record_ref)?
                        .and_then(|r| r.server_ref)
                        .map(|r| ServerRef::new(r.server_id, version))
                        .unwrap_or_else(|| ServerRef::new(String::new(), version));
                    self.apply_accepted(item, server_ref, &mut report, AcceptedKind::Updated)?;
                }
                ItemOutcome::Deleted { .. } => {
                    let mut local = self.local.lock();
                    self.store.delete(item.record_ref)?;
                    local.ack(item.item_id, item.revision, None);
                    report.deleted += 1;
                    self.stats.write().records_deleted += 1;
                }
                ItemOutcome::Conflicted {
                    current_version,
                    current_payload,
                    ..
                } => {
                    conflicts.push(PendingConflict {
                        item: item.clone(),
                        current_version,
                        current_payload,
                    });
                }
                ItemOutcome::Failed { reason, detail, .. } => {
                    self.apply_failure(item, reason, detail, &mut report)?;
                }
            }
        }

        // Phase 2: at most one automatic resolution per conflict per
        // cycle. After cancellation no new network call starts; the
        // item stays queued and the conflict is re-detected (and
        // resolved) on the next cycle.
        for conflict in conflicts {
            if self.cancelled.load(Ordering::SeqCst) {
                self.defer_conflict(&conflict.item, &SyncError::Cancelled)?;
                continue;
            }
            self.resolve_conflict(conflict, &mut report)?;
        }

        report.remaining = self.pending_count();
        report.duration = start.elapsed();
        Ok(report)
    }

    /// Partitions a drained batch into the three wire arrays. Per-item
    /// results are matched back by business id, so relative order
    /// between the arrays is irrelevant; per-record order is guaranteed
    /// by the one-outstanding-item queue invariant.
    fn partition(&self, batch: &[QueueItem]) -> BulkSyncRequest {
        let mut request = BulkSyncRequest::default();
        for item in batch {
            match item.op {
                QueueOp::Create => request.create.push(CreateItem {
                    business_id: item.business_id,
                    kind: item.kind,
                    payload: item.snapshot.clone().unwrap_or(Value::Null),
                }),
                QueueOp::Update => request.update.push(UpdateItem {
                    business_id: item.business_id,
                    version: item.base_version.unwrap_or(0),
                    payload: item.snapshot.clone().unwrap_or(Value::Null),
                }),
                QueueOp::Delete => request.delete.push(DeleteItem {
                    business_id: item.business_id,
                    version: item.base_version.unwrap_or(0),
                }),
            }
        }
        request
    }

    /// Submits the bulk request, retrying transport failures with
    /// exponential backoff. Per-item failures inside a successful
    /// response are NOT transport failures and are never retried here.
    fn submit_with_retry(
        &self,
        request: &BulkSyncRequest,
    ) -> SyncResult<fieldsync_protocol::BulkSyncResponse> {
        let retry = &self.config.retry;
        let mut last_error = None;

        for attempt in 0..retry.max_attempts {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(SyncError::Cancelled);
            }
            if attempt > 0 {
                std::thread::sleep(retry.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }

            match self.transport.submit_batch(request) {
                Ok(response) => return Ok(response),
                Err(SyncError::Auth(message)) => {
                    // Pause the whole engine; queued work is kept.
                    self.paused_for_auth.store(true, Ordering::SeqCst);
                    warn!("sync paused: authentication required");
                    return Err(SyncError::Auth(message));
                }
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    debug!(attempt, error = %e, "retrying batch after transport failure");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| SyncError::Protocol("no submit attempts made".into())))
    }

    fn apply_accepted(
        &self,
        item: &QueueItem,
        server_ref: ServerRef,
        report: &mut SyncReport,
        kind: AcceptedKind,
    ) -> SyncResult<()> {
        let mut local = self.local.lock();
        let acked_version = server_ref.version;
        let ack = local.ack(item.item_id, item.revision, Some(acked_version));

        if let Some(mut record) = self.store.get(item.record_ref)? {
            record.server_ref = Some(server_ref);
            record.base_payload = item.snapshot.clone();
            record.sync_status = match ack {
                AckOutcome::Removed => SyncStatus::Synced,
                // Amended mid-flight: the newer edit is still pending.
                AckOutcome::Rearmed => SyncStatus::PendingUpdate,
            };
            self.store.put(record)?;
        }

        match kind {
            AcceptedKind::Created => {
                report.created += 1;
                self.stats.write().records_created += 1;
            }
            AcceptedKind::Updated => {
                report.updated += 1;
                self.stats.write().records_updated += 1;
            }
        }
        Ok(())
    }

    fn apply_failure(
        &self,
        item: &QueueItem,
        reason: FailureReason,
        detail: Option<String>,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let message = detail.unwrap_or_else(|| format!("{reason:?}"));
        let mut local = self.local.lock();

        let outcome = if reason.is_retryable() {
            local.fail(item.item_id, &message, self.config.max_item_attempts)
        } else {
            local.fail_fatal(item.item_id, &message)
        };

        if outcome == FailOutcome::DeadLettered {
            report.dead_lettered.push(item.business_id);
            self.stats.write().dead_lettered += 1;
            warn!(business_id = %item.business_id, %message, "item dead-lettered");

            // Surface the record through the manual-resolution funnel.
            // Items that are merely re-queued keep their record
            // batchable for the next cycle.
            if let Some(mut record) = self.store.get(item.record_ref)? {
                record.sync_status = SyncStatus::Conflict;
                self.store.put(record)?;
            }
        }
        Ok(())
    }

    fn resolve_conflict(
        &self,
        conflict: PendingConflict,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let PendingConflict {
            item,
            current_version,
            current_payload,
        } = conflict;

        let base_payload = self
            .store
            .get(item.record_ref)?
            .and_then(|r| r.base_payload);

        let resolution = resolver::resolve(
            &item,
            base_payload.as_ref(),
            current_version,
            &current_payload,
        );

        match resolution {
            Resolution::DeleteWins { version } => {
                match self.transport.delete_record(item.business_id, version) {
                    Ok(SingleOutcome::Deleted) => {
                        let mut local = self.local.lock();
                        self.store.delete(item.record_ref)?;
                        local.ack(item.item_id, item.revision, None);
                        report.deleted += 1;
                        report.conflicts_resolved += 1;
                        let mut stats = self.stats.write();
                        stats.records_deleted += 1;
                        stats.conflicts_resolved += 1;
                        Ok(())
                    }
                    Ok(SingleOutcome::Conflict(body)) => self.park_conflict(
                        &item,
                        body.current_version,
                        body.current_payload,
                        report,
                    ),
                    Ok(SingleOutcome::Updated { .. }) => self.park_conflict(
                        &item,
                        current_version,
                        current_payload,
                        report,
                    ),
                    Err(e) => self.defer_conflict(&item, &e),
                }
            }
            Resolution::Resubmit { version, merged } => {
                match self
                    .transport
                    .update_record(item.business_id, version, &merged)
                {
                    Ok(SingleOutcome::Updated { version }) => {
                        let mut local = self.local.lock();
                        let ack = local.ack(item.item_id, item.revision, Some(version));
                        if let Some(mut record) = self.store.get(item.record_ref)? {
                            if let Some(server_ref) = record.server_ref.as_mut() {
                                server_ref.version = version;
                            }
                            record.base_payload = Some(merged.clone());
                            match ack {
                                AckOutcome::Removed => {
                                    record.payload = merged;
                                    record.sync_status = SyncStatus::Synced;
                                }
                                AckOutcome::Rearmed => {
                                    record.sync_status = SyncStatus::PendingUpdate;
                                }
                            }
                            self.store.put(record)?;
                        }
                        report.updated += 1;
                        report.conflicts_resolved += 1;
                        let mut stats = self.stats.write();
                        stats.records_updated += 1;
                        stats.conflicts_resolved += 1;
                        Ok(())
                    }
                    // A second mismatch is surfaced, never retried
                    // automatically (avoids livelock).
                    Ok(SingleOutcome::Conflict(body)) => self.park_conflict(
                        &item,
                        body.current_version,
                        body.current_payload,
                        report,
                    ),
                    Ok(SingleOutcome::Deleted) => self.park_conflict(
                        &item,
                        current_version,
                        current_payload,
                        report,
                    ),
                    Err(e) => self.defer_conflict(&item, &e),
                }
            }
            Resolution::Manual => {
                self.park_conflict(&item, current_version, current_payload, report)
            }
        }
    }

    /// Marks the record conflicted, records the server's current state
    /// on it (so a later human edit re-arms against the right version),
    /// keeps the queue item, and notifies the host.
    fn park_conflict(
        &self,
        item: &QueueItem,
        current_version: u64,
        current_payload: Value,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let parked = {
            let mut local = self.local.lock();
            local.record_error(item.item_id, "unresolved conflict; manual resolution required");

            if let Some(mut record) = self.store.get(item.record_ref)? {
                record.sync_status = SyncStatus::Conflict;
                match record.server_ref.as_mut() {
                    Some(server_ref) => server_ref.version = current_version,
                    None => {
                        record.server_ref = Some(ServerRef::new(String::new(), current_version));
                    }
                }
                record.base_payload = Some(current_payload);
                self.store.put(record.clone())?;
                Some(record)
            } else {
                None
            }
        };

        report.conflicts_unresolved.push(item.business_id);
        self.stats.write().conflicts_unresolved += 1;
        warn!(business_id = %item.business_id, "record parked in conflict status");

        if let Some(record) = parked {
            if let Some(callback) = self.on_conflict.read().as_ref() {
                callback(&record);
            }
        }
        Ok(())
    }

    /// A transport failure (or cancellation) during resolution leaves
    /// the item queued with its original version token. The next cycle
    /// hits the version mismatch again and merges against the server's
    /// then-current payload; advancing the token here would let a plain
    /// resubmission bypass the field-group merge.
    fn defer_conflict(&self, item: &QueueItem, error: &SyncError) -> SyncResult<()> {
        if let SyncError::Auth(_) = error {
            self.paused_for_auth.store(true, Ordering::SeqCst);
        }
        self.local
            .lock()
            .record_error(item.item_id, error.to_string());
        Ok(())
    }

    fn put_record(&self, record: Record) -> SyncResult<()> {
        match self.store.put(record) {
            Err(SyncError::Quota(message)) => {
                self.quota_exceeded.store(true, Ordering::SeqCst);
                Err(SyncError::Quota(message))
            }
            other => other,
        }
    }
}

#[derive(Clone, Copy)]
enum AcceptedKind {
    Created,
    Updated,
}
