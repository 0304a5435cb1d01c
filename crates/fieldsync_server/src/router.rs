//! HTTP-shaped request routing.
//!
//! The router is framework-agnostic: it takes the method, path, headers
//! and body and returns a status code and body. Embedders mount it
//! behind whatever HTTP listener they run; tests drive it in-process.

use crate::error::{ServerError, ServerResult};
use crate::service::{SingleReply, SyncService};
use fieldsync_protocol::{BusinessId, UpdateRecordRequest, VERSION_HEADER};
use serde::Serialize;
use tracing::debug;

/// Routes sync requests to the service.
pub struct Router {
    service: SyncService,
}

impl Router {
    /// Creates a router over the given service.
    pub fn new(service: SyncService) -> Self {
        Self { service }
    }

    /// The underlying service.
    pub fn service(&self) -> &SyncService {
        &self.service
    }

    /// Handles one request, returning `(status, body)`.
    pub fn handle(
        &self,
        method: &str,
        path: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> (u16, Vec<u8>) {
        match self.dispatch(method, path, headers, body) {
            Ok(response) => response,
            Err(e) => {
                debug!(method, path, error = %e, "request rejected");
                json_response(e.status_code(), &ErrorBody { error: e.to_string() })
            }
        }
    }

    fn dispatch(
        &self,
        method: &str,
        path: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> ServerResult<(u16, Vec<u8>)> {
        self.check_auth(headers)?;

        if method == "POST" && path == "/sync" {
            let request = decode_body(body)?;
            let response = self.service.handle_bulk(request)?;
            return Ok(json_response(200, &response));
        }

        if let Some(business_id) = path.strip_prefix("/entities/") {
            let business_id: BusinessId = business_id.parse().map_err(|_| {
                ServerError::InvalidRequest(format!("malformed business id in path: {path}"))
            })?;

            return match method {
                "PATCH" => {
                    let expected_version = expected_version(headers)?;
                    let request: UpdateRecordRequest = decode_body(body)?;
                    let reply =
                        self.service
                            .handle_update(business_id, expected_version, request.payload)?;
                    Ok(reply_response(reply))
                }
                "DELETE" => {
                    let expected_version = expected_version(headers)?;
                    let reply = self.service.handle_delete(business_id, expected_version)?;
                    Ok(reply_response(reply))
                }
                other => Err(ServerError::InvalidRequest(format!(
                    "method {other} not supported on {path}"
                ))),
            };
        }

        Err(ServerError::NotFound(format!("no route for {method} {path}")))
    }

    fn check_auth(&self, headers: &[(String, String)]) -> ServerResult<()> {
        let Some(expected) = &self.service.config().bearer_token else {
            return Ok(());
        };

        let supplied = header_value(headers, "Authorization")
            .and_then(|value| value.strip_prefix("Bearer "));

        match supplied {
            Some(token) if token == expected => Ok(()),
            Some(_) => Err(ServerError::AuthenticationFailed("invalid token".into())),
            None => Err(ServerError::AuthenticationFailed(
                "missing bearer token".into(),
            )),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct UpdatedBody {
    version: u64,
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn expected_version(headers: &[(String, String)]) -> ServerResult<u64> {
    let value = header_value(headers, VERSION_HEADER).ok_or_else(|| {
        ServerError::InvalidRequest(format!("missing {VERSION_HEADER} header"))
    })?;
    value.parse().map_err(|_| {
        ServerError::InvalidRequest(format!("malformed {VERSION_HEADER} header: {value}"))
    })
}

fn decode_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> ServerResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| ServerError::InvalidRequest(format!("malformed request body: {e}")))
}

fn json_response<T: Serialize>(status: u16, body: &T) -> (u16, Vec<u8>) {
    match serde_json::to_vec(body) {
        Ok(bytes) => (status, bytes),
        Err(e) => (500, format!("{{\"error\":\"encode failure: {e}\"}}").into_bytes()),
    }
}

fn reply_response(reply: SingleReply) -> (u16, Vec<u8>) {
    match reply {
        SingleReply::Updated { version } => json_response(200, &UpdatedBody { version }),
        SingleReply::Deleted => (200, b"{}".to_vec()),
        SingleReply::Conflict(body) => json_response(409, &body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::store::RecordStore;
    use fieldsync_protocol::{BulkSyncResponse, ConflictBody};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn router() -> Router {
        Router::new(SyncService::new(
            ServerConfig::default(),
            Arc::new(RecordStore::new()),
        ))
    }

    fn post_sync(router: &Router, body: Value) -> (u16, Value) {
        let (status, body) = router.handle(
            "POST",
            "/sync",
            &[],
            &serde_json::to_vec(&body).unwrap(),
        );
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn bulk_create_roundtrip() {
        let router = router();
        let id = BusinessId::generate();

        let (status, body) = post_sync(
            &router,
            json!({
                "create": [{"business_id": id, "kind": "entity", "payload": {"name": "spring"}}]
            }),
        );

        assert_eq!(status, 200);
        let response: BulkSyncResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.created[0].business_id, id);
        assert_eq!(response.created[0].version, 1);
    }

    #[test]
    fn malformed_body_is_400() {
        let router = router();
        let (status, _) = router.handle("POST", "/sync", &[], b"{not json");
        assert_eq!(status, 400);
    }

    #[test]
    fn unknown_route_is_404() {
        let router = router();
        let (status, _) = router.handle("GET", "/nope", &[], b"");
        assert_eq!(status, 404);
    }

    #[test]
    fn patch_requires_version_header() {
        let router = router();
        let id = BusinessId::generate();

        let (status, body) = router.handle(
            "PATCH",
            &format!("/entities/{id}"),
            &[],
            &serde_json::to_vec(&json!({"payload": {}})).unwrap(),
        );

        assert_eq!(status, 400);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert!(body["error"].as_str().unwrap().contains(VERSION_HEADER));
    }

    #[test]
    fn patch_conflict_is_409_with_current_state() {
        let router = router();
        let id = BusinessId::generate();
        router
            .service()
            .store()
            .create(id, fieldsync_protocol::RecordKind::Entity, json!({"n": 1}));

        let (status, body) = router.handle(
            "PATCH",
            &format!("/entities/{id}"),
            &[(VERSION_HEADER.to_string(), "9".to_string())],
            &serde_json::to_vec(&json!({"payload": {"n": 2}})).unwrap(),
        );

        assert_eq!(status, 409);
        let conflict: ConflictBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(conflict.current_version, 1);
        assert_eq!(conflict.current_payload, json!({"n": 1}));
    }

    #[test]
    fn delete_roundtrip() {
        let router = router();
        let id = BusinessId::generate();
        router
            .service()
            .store()
            .create(id, fieldsync_protocol::RecordKind::Entity, json!({}));

        let (status, _) = router.handle(
            "DELETE",
            &format!("/entities/{id}"),
            &[(VERSION_HEADER.to_string(), "1".to_string())],
            b"",
        );

        assert_eq!(status, 200);
        assert!(router.service().store().is_empty());
    }

    #[test]
    fn bearer_token_enforced() {
        let router = Router::new(SyncService::new(
            ServerConfig::new().with_bearer_token("s3cret"),
            Arc::new(RecordStore::new()),
        ));

        let (status, _) = router.handle("POST", "/sync", &[], b"{}");
        assert_eq!(status, 401);

        let (status, _) = router.handle(
            "POST",
            "/sync",
            &[("Authorization".to_string(), "Bearer wrong".to_string())],
            b"{}",
        );
        assert_eq!(status, 401);

        let (status, _) = router.handle(
            "POST",
            "/sync",
            &[("authorization".to_string(), "Bearer s3cret".to_string())],
            b"{}",
        );
        assert_eq!(status, 200);
    }

    #[test]
    fn malformed_business_id_is_400() {
        let router = router();
        let (status, _) = router.handle(
            "PATCH",
            "/entities/not-a-uuid",
            &[(VERSION_HEADER.to_string(), "1".to_string())],
            b"{\"payload\": {}}",
        );
        assert_eq!(status, 400);
    }
}
