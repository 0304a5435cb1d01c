//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait so different
//! libraries (reqwest, ureq, hyper) or an in-process loopback can sit
//! underneath. Bodies are JSON; transport-level failures and HTTP
//! status codes are translated into the engine's error taxonomy here,
//! in one place.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use fieldsync_protocol::{
    BulkSyncRequest, BulkSyncResponse, BusinessId, ConflictBody, SingleOutcome,
    UpdateRecordRequest, VERSION_HEADER,
};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Default deadline for a single request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// An HTTP request handed to the client implementation.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method (`POST`, `PATCH`, `DELETE`).
    pub method: String,
    /// Full request URL.
    pub url: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// JSON body; empty for deletes.
    pub body: Vec<u8>,
    /// Deadline the client implementation must enforce; an expired
    /// deadline is reported as a transport failure.
    pub timeout: Duration,
}

/// An HTTP response returned by the client implementation.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

/// HTTP client abstraction.
///
/// Implementations return `Err` only for transport-level failures
/// (timeout, connection refused); any response with a status code is
/// `Ok` and classified by the transport.
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the response.
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    bearer_token: Option<String>,
    timeout: Duration,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            bearer_token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Attaches a bearer token sent on every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Sets the per-request deadline carried to the client.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self, extra: Vec<(String, String)>) -> Vec<(String, String)> {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(token) = &self.bearer_token {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        headers.extend(extra);
        headers
    }

    fn send(
        &self,
        method: &str,
        path: &str,
        extra_headers: Vec<(String, String)>,
        body: Vec<u8>,
    ) -> SyncResult<HttpResponse> {
        let url = format!("{}{}", self.base_url, path);
        debug!(method, path, "sync request");

        let response = self
            .client
            .send(HttpRequest {
                method: method.to_string(),
                url,
                headers: self.headers(extra_headers),
                body,
                timeout: self.timeout,
            })
            .map_err(|e| {
                warn!(method, path, error = %e, "transport failure");
                SyncError::transport_retryable(e)
            })?;

        match response.status {
            200..=299 | 409 => Ok(response),
            401 | 403 => Err(SyncError::Auth(body_text(&response))),
            400 | 422 => Err(SyncError::Validation(body_text(&response))),
            408 | 429 | 500..=599 => {
                warn!(method, path, status = response.status, "retryable status");
                Err(SyncError::transport_retryable(format!(
                    "HTTP {}: {}",
                    response.status,
                    body_text(&response)
                )))
            }
            status => Err(SyncError::transport_fatal(format!(
                "unexpected HTTP {status}: {}",
                body_text(&response)
            ))),
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(response: &HttpResponse) -> SyncResult<T> {
        serde_json::from_slice(&response.body)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
    }

    fn single_outcome(
        response: HttpResponse,
        on_success: impl Fn(&HttpResponse) -> SyncResult<SingleOutcome>,
    ) -> SyncResult<SingleOutcome> {
        if response.status == 409 {
            let body: ConflictBody = Self::decode(&response)?;
            return Ok(SingleOutcome::Conflict(body));
        }
        on_success(&response)
    }
}

fn body_text(response: &HttpResponse) -> String {
    String::from_utf8_lossy(&response.body).into_owned()
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn submit_batch(&self, request: &BulkSyncRequest) -> SyncResult<BulkSyncResponse> {
        let body = serde_json::to_vec(request)
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;
        let response = self.send("POST", "/sync", vec![], body)?;
        if response.status == 409 {
            // The bulk endpoint reports conflicts per item, never as a
            // whole-request status.
            return Err(SyncError::Protocol("unexpected 409 from /sync".into()));
        }
        Self::decode(&response)
    }

    fn update_record(
        &self,
        business_id: BusinessId,
        expected_version: u64,
        payload: &Value,
    ) -> SyncResult<SingleOutcome> {
        let body = serde_json::to_vec(&UpdateRecordRequest {
            payload: payload.clone(),
        })
        .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;

        let response = self.send(
            "PATCH",
            &format!("/entities/{business_id}"),
            vec![(VERSION_HEADER.to_string(), expected_version.to_string())],
            body,
        )?;

        Self::single_outcome(response, |response| {
            #[derive(serde::Deserialize)]
            struct UpdatedBody {
                version: u64,
            }
            let body: UpdatedBody = Self::decode(response)?;
            Ok(SingleOutcome::Updated {
                version: body.version,
            })
        })
    }

    fn delete_record(
        &self,
        business_id: BusinessId,
        expected_version: u64,
    ) -> SyncResult<SingleOutcome> {
        let response = self.send(
            "DELETE",
            &format!("/entities/{business_id}"),
            vec![(VERSION_HEADER.to_string(), expected_version.to_string())],
            Vec::new(),
        )?;

        Self::single_outcome(response, |_| Ok(SingleOutcome::Deleted))
    }
}

/// Trait for servers that can handle loopback requests in-process.
pub trait LoopbackServer: Send + Sync {
    /// Handles a request and returns (status, body).
    fn handle(
        &self,
        method: &str,
        path: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> (u16, Vec<u8>);
}

/// A loopback HTTP client that routes requests directly to an
/// in-process server. Useful for testing without network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        // Strip the base URL down to the path.
        let path = request
            .url
            .find("://")
            .and_then(|i| request.url[i + 3..].find('/').map(|j| &request.url[i + 3 + j..]))
            .unwrap_or(&request.url);

        let (status, body) =
            self.server
                .handle(&request.method, path, &request.headers, &request.body);
        Ok(HttpResponse { status, body })
    }
}
