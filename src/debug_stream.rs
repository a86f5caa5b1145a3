//! Debug Stream - Real-time debugging events for elohim-scorm
//!
//! `GET /debug/stream` upgrades to a WebSocket that receives:
//! - RTE API calls (method, arguments, result, error code)
//! - Session lifecycle (launch, unload, finalize)
//! - Commit pipeline (flushes, failures)
//! - Package import (start, outcome)
//!
//! `?session=<id>` narrows the stream to one session. A client can change
//! the filter later by sending `{"session": "<id>"}` (or `{"session": null}`).
//! Nothing a subscriber sends ever reaches a session.

use futures_util::{SinkExt, StreamExt};
use hyper_tungstenite::tungstenite::Message;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::rte::Rollup;

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// Debug event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugEvent {
    pub timestamp: String,
    pub source: String,
    pub event_type: String,
    pub level: Level,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl DebugEvent {
    pub fn new(event_type: &str, level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            source: "scorm".to_string(),
            event_type: event_type.to_string(),
            level,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Session the event concerns, if any
    pub fn session_id(&self) -> Option<&str> {
        self.data.as_ref()?.get("session_id")?.as_str()
    }
}

/// Fan-out of debug events to any number of subscribers
#[derive(Clone)]
pub struct DebugBroadcaster {
    tx: broadcast::Sender<DebugEvent>,
}

impl DebugBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1000);
        Self { tx }
    }

    /// Send to current subscribers; dropped when there are none
    pub fn emit(&self, event: DebugEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DebugEvent> {
        self.tx.subscribe()
    }

    /// Connected debug clients
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn rte_api(&self, session_id: &str, method: &str, args: &[&str], result: &str, error_code: u16) {
        let level = if error_code == 0 { Level::Debug } else { Level::Warn };
        let message = format!("{}({}) = \"{}\" [{}]", method, args.join(", "), result, error_code);
        self.emit(DebugEvent::new("rte_api", level, message).with_data(serde_json::json!({
            "session_id": session_id,
            "method": method,
            "args": args,
            "result": result,
            "error_code": error_code
        })));
    }

    pub fn session_launched(&self, session_id: &str, version: &str, entry: &str) {
        let message = format!("Session {} launched (SCORM {}, entry '{}')", session_id, version, entry);
        self.emit(DebugEvent::new("session", Level::Info, message).with_data(serde_json::json!({
            "session_id": session_id,
            "version": version,
            "entry": entry
        })));
    }

    pub fn session_unloaded(&self, session_id: &str) {
        let message = format!("Session {} unloaded without Terminate", session_id);
        self.emit(
            DebugEvent::new("session", Level::Warn, message)
                .with_data(serde_json::json!({ "session_id": session_id })),
        );
    }

    pub fn session_finalized(&self, session_id: &str, rollup: &Rollup) {
        let message = format!(
            "Session {} finalized: score {}, total time {}",
            session_id,
            rollup.score_label(),
            rollup.total_time
        );
        self.emit(DebugEvent::new("session", Level::Info, message).with_data(serde_json::json!({
            "session_id": session_id,
            "rollup": rollup
        })));
    }

    pub fn commit_flushed(&self, session_id: &str, seq: u64, paths_written: usize) {
        let message = format!("Flushed seq {} ({} paths)", seq, paths_written);
        self.emit(DebugEvent::new("commit_flushed", Level::Debug, message).with_data(serde_json::json!({
            "session_id": session_id,
            "seq": seq,
            "paths_written": paths_written
        })));
    }

    pub fn commit_failed(&self, session_id: &str, seq: u64, attempts: u32, error: &str) {
        let message = format!("Flush of seq {} failed after {} attempts: {}", seq, attempts, error);
        self.emit(DebugEvent::new("commit_failed", Level::Error, message).with_data(serde_json::json!({
            "session_id": session_id,
            "seq": seq,
            "attempts": attempts,
            "error": error
        })));
    }

    pub fn import_start(&self, package_id: &str, size_bytes: usize) {
        let message = format!("Importing {} ({} bytes)", package_id, size_bytes);
        self.emit(DebugEvent::new("import", Level::Info, message).with_data(serde_json::json!({
            "package_id": package_id,
            "size_bytes": size_bytes
        })));
    }

    pub fn import_complete(&self, package_id: &str, lessons: usize, warnings: usize) {
        let level = if warnings == 0 { Level::Info } else { Level::Warn };
        let message = format!("Imported {}: {} lessons, {} warnings", package_id, lessons, warnings);
        self.emit(DebugEvent::new("import", level, message).with_data(serde_json::json!({
            "package_id": package_id,
            "lessons": lessons,
            "warnings": warnings
        })));
    }

    pub fn import_failed(&self, errors: &[String]) {
        let message = format!("Import failed: {}", errors.join("; "));
        self.emit(
            DebugEvent::new("import", Level::Error, message)
                .with_data(serde_json::json!({ "errors": errors })),
        );
    }
}

impl Default for DebugBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Which events one subscriber wants
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamFilter {
    #[serde(default)]
    pub session: Option<String>,
}

impl StreamFilter {
    /// Events without a session (imports, lag notices) always pass
    pub fn accepts(&self, event: &DebugEvent) -> bool {
        match (&self.session, event.session_id()) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        }
    }
}

/// Serve one debug WebSocket until the client goes away
pub async fn handle_debug_websocket(
    websocket: hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>,
    broadcaster: Arc<DebugBroadcaster>,
    mut filter: StreamFilter,
) {
    let (mut sink, mut incoming) = websocket.split();
    let mut events = broadcaster.subscribe();

    let hello = DebugEvent::new("connected", Level::Info, "Debug stream connected to elohim-scorm")
        .with_data(serde_json::json!({ "session": filter.session }));
    if send_event(&mut sink, &hello).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) if filter.accepts(&event) => {
                    if send_event(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    let notice = DebugEvent::new("lag", Level::Warn, format!("Dropped {} events", skipped));
                    if send_event(&mut sink, &notice).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            message = incoming.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(update) = serde_json::from_str::<StreamFilter>(text.as_str()) {
                        debug!(session = ?update.session, "Debug client changed filter");
                        filter = update;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("Debug client disconnected");
}

async fn send_event<S>(sink: &mut S, event: &DebugEvent) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
{
    let json = serde_json::to_string(event).map_err(|_| ())?;
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rte_api_event_shape() {
        let broadcaster = DebugBroadcaster::new();
        let mut rx = broadcaster.subscribe();
        broadcaster.rte_api("s1", "SetValue", &["cmi.location", "p3"], "true", 0);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, "rte_api");
        assert_eq!(event.source, "scorm");
        assert_eq!(event.level, Level::Debug);
        assert_eq!(event.session_id(), Some("s1"));
        let data = event.data.unwrap();
        assert_eq!(data["method"], "SetValue");
        assert_eq!(data["args"][1], "p3");
        assert_eq!(data["error_code"], 0);
    }

    #[test]
    fn test_level_serializes_lowercase() {
        let event = DebugEvent::new("commit_failed", Level::Error, "boom");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["level"], "error");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_filter_by_session() {
        let broadcaster = DebugBroadcaster::new();
        let mut rx = broadcaster.subscribe();
        broadcaster.commit_flushed("s1", 1, 2);
        broadcaster.commit_flushed("s2", 1, 2);
        broadcaster.import_start("sha256-abc", 10);

        let filter: StreamFilter = serde_json::from_str(r#"{"session":"s2"}"#).unwrap();
        let mut kept = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if filter.accepts(&event) {
                kept.push(event.session_id().map(str::to_string));
            }
        }
        assert_eq!(kept, vec![Some("s2".to_string()), None]);
        assert!(StreamFilter::default().accepts(&DebugEvent::new("x", Level::Info, "y")));
    }

    #[test]
    fn test_emit_without_subscribers() {
        let broadcaster = DebugBroadcaster::default();
        assert_eq!(broadcaster.subscriber_count(), 0);
        broadcaster.commit_flushed("s1", 1, 2);
    }
}
