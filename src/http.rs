//! HTTP host for the RTE and the package importer
//!
//! A browser shell exposes `window.API` / `window.API_1484_11` and forwards
//! each call here; SCO content never talks to this server directly.
//!
//! ## Session API
//! - `POST /sessions` - Launch a SCO session (JSON `LaunchRequest`)
//! - `POST /sessions/{id}/call` - Invoke an RTE API method
//! - `DELETE /sessions/{id}` - Page unloaded without Terminate
//!
//! ## Import API
//! - `POST /import?title=&slug=&summary=` - Convert a SCORM ZIP into a course draft
//!
//! ## Debug
//! - `GET /debug/stream?session=<id>` - WebSocket of debug events, optionally for one session
//!
//! ## Example Usage
//!
//! ```bash
//! # Launch
//! curl -X POST -d '{"package_id":"sha256-abc","sco_id":"item-1","version":"1.2","learner_id":"u1"}' \
//!      http://localhost:8091/sessions
//!
//! # Call the API
//! curl -X POST -d '{"method":"LMSInitialize","args":[""]}' \
//!      http://localhost:8091/sessions/<id>/call
//!
//! # Import a package
//! curl -X POST --data-binary @course.zip \
//!      "http://localhost:8091/import?title=Fire%20Safety&slug=fire-safety"
//! ```

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::convert::{import_package_with_limit, CourseMetadata};
use crate::debug_stream::{handle_debug_websocket, DebugBroadcaster, StreamFilter};
use crate::error::ScormError;
use crate::package::{compute_package_id, DEFAULT_MAX_EXTRACTED_BYTES};
use crate::rte::{method_names, LaunchRequest, RteEngine, RteSession, SessionState};

type SharedSession = Arc<Mutex<RteSession>>;

#[derive(Debug, Deserialize)]
struct CallRequest {
    method: String,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CallResponse {
    result: String,
    error_code: u16,
    terminated: bool,
}

#[derive(Debug, Serialize)]
struct LaunchResponse {
    session_id: String,
    version: String,
    api: Vec<&'static str>,
}

/// HTTP server state
pub struct HttpServer {
    engine: Arc<RteEngine>,
    sessions: RwLock<HashMap<String, SharedSession>>,
    debug_broadcaster: Arc<DebugBroadcaster>,
    bind_addr: SocketAddr,
    max_package_bytes: usize,
    max_extracted_bytes: u64,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(
        engine: Arc<RteEngine>,
        debug_broadcaster: Arc<DebugBroadcaster>,
        bind_addr: SocketAddr,
    ) -> Self {
        Self {
            engine,
            sessions: RwLock::new(HashMap::new()),
            debug_broadcaster,
            bind_addr,
            max_package_bytes: usize::MAX,
            max_extracted_bytes: DEFAULT_MAX_EXTRACTED_BYTES,
        }
    }

    /// Reject package uploads larger than this
    pub fn with_max_package_bytes(mut self, max: usize) -> Self {
        self.max_package_bytes = max;
        self
    }

    /// Reject packages whose entries decompress to more than this
    pub fn with_max_extracted_bytes(mut self, max: u64) -> Self {
        self.max_extracted_bytes = max;
        self
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), ScormError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route requests to handlers
    async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();

        debug!(method = %method, path = %path, "Incoming request");

        let result = match (method, path.as_str()) {
            // Health check
            (Method::GET, "/health") => self.handle_health().await,

            // Session API
            (Method::POST, "/sessions") => self.handle_launch(req).await,
            (Method::POST, p) if p.starts_with("/sessions/") && p.ends_with("/call") => {
                let id = p
                    .strip_prefix("/sessions/")
                    .and_then(|rest| rest.strip_suffix("/call"))
                    .unwrap_or("");
                self.handle_call(req, id).await
            }
            (Method::DELETE, p) if p.starts_with("/sessions/") => {
                let id = p.strip_prefix("/sessions/").unwrap_or("");
                self.handle_unload(id).await
            }

            // Import API
            (Method::POST, "/import") => self.handle_import(req).await,

            // WebSocket upgrade for debug streaming
            (Method::GET, "/debug/stream") if hyper_tungstenite::is_upgrade_request(&req) => {
                Ok(self.handle_debug_stream(req))
            }

            // Not found
            _ => Ok(text_response(StatusCode::NOT_FOUND, "Not Found")),
        };

        match result {
            Ok(response) => Ok(response),
            Err(e) => {
                error!(error = %e, "Request error");
                Ok(text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Error: {}", e),
                ))
            }
        }
    }

    /// Health check endpoint
    async fn handle_health(&self) -> Result<Response<Full<Bytes>>, ScormError> {
        let body = serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "sessions": self.sessions.read().await.len(),
            "debug_subscribers": self.debug_broadcaster.subscriber_count(),
        });
        json_response(StatusCode::OK, &body)
    }

    /// POST /sessions - Launch a SCO session
    async fn handle_launch(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, ScormError> {
        let Some(body) = read_body(req.into_body(), MAX_JSON_BODY_BYTES).await? else {
            return Ok(too_large(MAX_JSON_BODY_BYTES));
        };
        let request: LaunchRequest = match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                return Ok(text_response(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid launch request: {}", e),
                ))
            }
        };

        if let Some(ref id) = request.session_id {
            if self.sessions.read().await.contains_key(id) {
                return Ok(text_response(
                    StatusCode::CONFLICT,
                    format!("Session {} is already running", id),
                ));
            }
        }

        let session = match self.engine.launch(request).await {
            Ok(session) => session,
            Err(ScormError::Launch(message)) => {
                return Ok(text_response(StatusCode::BAD_REQUEST, message));
            }
            Err(e) => return Err(e),
        };

        let response = LaunchResponse {
            session_id: session.session_id().to_string(),
            version: session.version().to_string(),
            api: method_names(session.version()),
        };
        self.sessions
            .write()
            .await
            .insert(response.session_id.clone(), Arc::new(Mutex::new(session)));

        json_response(StatusCode::CREATED, &response)
    }

    /// POST /sessions/{id}/call - Invoke an RTE API method
    async fn handle_call(
        &self,
        req: Request<Incoming>,
        session_id: &str,
    ) -> Result<Response<Full<Bytes>>, ScormError> {
        let Some(session) = self.sessions.read().await.get(session_id).cloned() else {
            return Ok(text_response(StatusCode::NOT_FOUND, "Session not found"));
        };

        let Some(body) = read_body(req.into_body(), MAX_JSON_BODY_BYTES).await? else {
            return Ok(too_large(MAX_JSON_BODY_BYTES));
        };
        let call: CallRequest = match serde_json::from_slice(&body) {
            Ok(call) => call,
            Err(e) => {
                return Ok(text_response(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid call: {}", e),
                ))
            }
        };

        let response = {
            let mut session = session.lock().await;
            let result = session.invoke(&call.method, &call.args);
            CallResponse {
                result,
                error_code: session.last_error_code(),
                terminated: session.state() == SessionState::Terminated,
            }
        };

        if response.terminated {
            self.close_session(session_id).await;
        }

        json_response(StatusCode::OK, &response)
    }

    /// Drop a terminated session and log the outcome of its final flush
    async fn close_session(&self, session_id: &str) {
        let Some(session) = self.sessions.write().await.remove(session_id) else {
            return;
        };
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let mut session = session.lock().await;
            match session.closed().await {
                Ok(ack) => info!(
                    session_id = %session_id,
                    seq = ack.seq,
                    paths = ack.paths_written,
                    "Session closed"
                ),
                Err(e) => warn!(session_id = %session_id, error = %e, "Final commit failed"),
            }
        });
    }

    /// DELETE /sessions/{id} - Page unloaded without Terminate
    async fn handle_unload(&self, session_id: &str) -> Result<Response<Full<Bytes>>, ScormError> {
        let Some(session) = self.sessions.write().await.remove(session_id) else {
            return Ok(text_response(StatusCode::NOT_FOUND, "Session not found"));
        };

        // a call still holding the session unloads it on drop
        if let Ok(session) = Arc::try_unwrap(session) {
            session.into_inner().unload();
        }

        let body = serde_json::json!({ "session_id": session_id, "unloaded": true });
        json_response(StatusCode::ACCEPTED, &body)
    }

    /// POST /import - Convert a SCORM package into a course draft
    async fn handle_import(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, ScormError> {
        let metadata: CourseMetadata = match serde_urlencoded::from_str(req.uri().query().unwrap_or(""))
        {
            Ok(metadata) => metadata,
            Err(e) => {
                return Ok(text_response(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid query: {}", e),
                ))
            }
        };

        let Some(data) = read_body(req.into_body(), self.max_package_bytes).await? else {
            return Ok(too_large(self.max_package_bytes));
        };

        let package_id = compute_package_id(&data);
        self.debug_broadcaster.import_start(&package_id, data.len());

        let max_extracted_bytes = self.max_extracted_bytes;
        let result = tokio::task::spawn_blocking(move || {
            import_package_with_limit(&data, &metadata, max_extracted_bytes)
        })
            .await
            .map_err(|e| ScormError::Internal(format!("Import task failed: {}", e)))?;

        match result {
            Ok(outcome) => {
                self.debug_broadcaster.import_complete(
                    &package_id,
                    outcome.course.lesson_count(),
                    outcome.warnings.len(),
                );
                json_response(StatusCode::OK, &outcome)
            }
            Err(failure) => {
                warn!(package_id = %package_id, errors = failure.errors.len(), "Import rejected");
                self.debug_broadcaster.import_failed(&failure.messages());
                json_response(StatusCode::UNPROCESSABLE_ENTITY, &failure)
            }
        }
    }

    /// GET /debug/stream - WebSocket of debug events
    fn handle_debug_stream(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let filter: StreamFilter =
            serde_urlencoded::from_str(req.uri().query().unwrap_or("")).unwrap_or_default();
        match hyper_tungstenite::upgrade(req, None) {
            Ok((response, websocket)) => {
                let broadcaster = Arc::clone(&self.debug_broadcaster);
                debug!(session = ?filter.session, "Debug client connecting");
                tokio::spawn(async move {
                    match websocket.await {
                        Ok(ws) => handle_debug_websocket(ws, broadcaster, filter).await,
                        Err(e) => error!(error = %e, "WebSocket upgrade failed"),
                    }
                });

                let (parts, _) = response.into_parts();
                Response::from_parts(parts, Full::new(Bytes::new()))
            }
            Err(e) => {
                error!(error = %e, "WebSocket upgrade error");
                text_response(
                    StatusCode::BAD_REQUEST,
                    format!("WebSocket upgrade failed: {}", e),
                )
            }
        }
    }
}

/// Launch and call bodies are small JSON documents
const MAX_JSON_BODY_BYTES: usize = 1024 * 1024;

/// Buffer a request body, `None` once it passes `limit` bytes
async fn read_body<B>(body: B, limit: usize) -> Result<Option<Bytes>, ScormError>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(Some(collected.to_bytes())),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Ok(None),
        Err(e) => Err(ScormError::Internal(format!("Failed to read body: {}", e))),
    }
}

fn too_large(limit: usize) -> Response<Full<Bytes>> {
    text_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        format!("Body exceeds {} bytes", limit),
    )
}

fn json_response<T: Serialize>(
    status: StatusCode,
    body: &T,
) -> Result<Response<Full<Bytes>>, ScormError> {
    let body = serde_json::to_vec(body)?;
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

fn text_response(status: StatusCode, message: impl Into<String>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.into())));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_request_defaults_args() {
        let call: CallRequest = serde_json::from_str(r#"{"method":"LMSGetLastError"}"#).unwrap();
        assert_eq!(call.method, "LMSGetLastError");
        assert!(call.args.is_empty());
    }

    #[test]
    fn test_import_query() {
        let metadata: CourseMetadata =
            serde_urlencoded::from_str("title=Fire%20Safety&slug=fire-safety").unwrap();
        assert_eq!(metadata.title, "Fire Safety");
        assert_eq!(metadata.slug, "fire-safety");
        assert_eq!(metadata.summary, "");
    }

    #[test]
    fn test_debug_stream_filter_query() {
        let filter: StreamFilter = serde_urlencoded::from_str("session=abc-123").unwrap();
        assert_eq!(filter.session.as_deref(), Some("abc-123"));
        let filter: StreamFilter = serde_urlencoded::from_str("").unwrap();
        assert_eq!(filter, StreamFilter::default());
    }

    #[tokio::test]
    async fn test_read_body_stops_at_limit() {
        let body = Full::new(Bytes::from(vec![7u8; 64]));
        let data = read_body(body, 64).await.unwrap();
        assert_eq!(data.map(|b| b.len()), Some(64));

        let body = Full::new(Bytes::from(vec![7u8; 65]));
        assert!(read_body(body, 64).await.unwrap().is_none());

        let response = too_large(64);
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_json_response_headers() {
        let response = json_response(StatusCode::CREATED, &serde_json::json!({"ok": true})).unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
