//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use fieldsync_protocol::{BulkSyncRequest, BulkSyncResponse, BusinessId, SingleOutcome};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;

/// A sync transport handles communication with the authoritative
/// service.
///
/// This trait abstracts the network layer, allowing different
/// implementations (HTTP, in-process loopback, mock for testing). The
/// bulk call carries a whole queue batch; the single-item calls serve
/// the conflict resolver's one-shot resubmission and delete-wins paths.
pub trait SyncTransport: Send + Sync {
    /// Submits a bulk batch (`POST /sync`).
    fn submit_batch(&self, request: &BulkSyncRequest) -> SyncResult<BulkSyncResponse>;

    /// Updates a single record against an expected version
    /// (`PATCH /entities/{id}`).
    fn update_record(
        &self,
        business_id: BusinessId,
        expected_version: u64,
        payload: &Value,
    ) -> SyncResult<SingleOutcome>;

    /// Deletes a single record against an expected version
    /// (`DELETE /entities/{id}`).
    fn delete_record(
        &self,
        business_id: BusinessId,
        expected_version: u64,
    ) -> SyncResult<SingleOutcome>;
}

type BulkScript = SyncResult<BulkSyncResponse>;
type SingleScript = SyncResult<SingleOutcome>;

/// A mock transport for testing.
///
/// Responses are scripted in FIFO order; submitted requests are
/// captured for assertions.
#[derive(Default)]
pub struct MockTransport {
    bulk_responses: Mutex<VecDeque<BulkScript>>,
    single_responses: Mutex<VecDeque<SingleScript>>,
    bulk_requests: Mutex<Vec<BulkSyncRequest>>,
    single_requests: Mutex<Vec<(BusinessId, u64)>>,
}

impl MockTransport {
    /// Creates a new mock transport with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the next bulk response.
    pub fn push_bulk_response(&self, response: BulkSyncResponse) {
        self.bulk_responses.lock().push_back(Ok(response));
    }

    /// Scripts the next bulk call to fail.
    pub fn push_bulk_error(&self, error: SyncError) {
        self.bulk_responses.lock().push_back(Err(error));
    }

    /// Scripts the next single-item outcome.
    pub fn push_single_outcome(&self, outcome: SingleOutcome) {
        self.single_responses.lock().push_back(Ok(outcome));
    }

    /// Scripts the next single-item call to fail.
    pub fn push_single_error(&self, error: SyncError) {
        self.single_responses.lock().push_back(Err(error));
    }

    /// Bulk requests captured so far.
    pub fn bulk_requests(&self) -> Vec<BulkSyncRequest> {
        self.bulk_requests.lock().clone()
    }

    /// Single-item calls captured so far (business id, expected
    /// version).
    pub fn single_requests(&self) -> Vec<(BusinessId, u64)> {
        self.single_requests.lock().clone()
    }
}

impl SyncTransport for MockTransport {
    fn submit_batch(&self, request: &BulkSyncRequest) -> SyncResult<BulkSyncResponse> {
        self.bulk_requests.lock().push(request.clone());
        self.bulk_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Protocol("no mock bulk response scripted".into())))
    }

    fn update_record(
        &self,
        business_id: BusinessId,
        expected_version: u64,
        _payload: &Value,
    ) -> SyncResult<SingleOutcome> {
        self.single_requests
            .lock()
            .push((business_id, expected_version));
        self.single_responses.lock().pop_front().unwrap_or_else(|| {
            Err(SyncError::Protocol(
                "no mock single-item response scripted".into(),
            ))
        })
    }

    fn delete_record(
        &self,
        business_id: BusinessId,
        expected_version: u64,
    ) -> SyncResult<SingleOutcome> {
        self.single_requests
            .lock()
            .push((business_id, expected_version));
        self.single_responses.lock().pop_front().unwrap_or_else(|| {
            Err(SyncError::Protocol(
                "no mock single-item response scripted".into(),
            ))
        })
    }
}
