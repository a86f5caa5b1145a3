//! In-process persistence for tests and embedding

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::Persistence;
use crate::commit::{FlushAck, FlushPayload, SessionRecord, SessionSnapshot};
use crate::error::ScormError;
use crate::rte::Rollup;

#[derive(Default)]
pub struct MemoryPersistence {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored record, including per-path sequence numbers
    pub async fn record(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionSnapshot>, ScormError> {
        Ok(self.sessions.read().await.get(session_id).map(SessionRecord::snapshot))
    }

    async fn flush_session(
        &self,
        session_id: &str,
        payload: &FlushPayload,
    ) -> Result<FlushAck, ScormError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionRecord::new(session_id));
        Ok(record.apply(payload))
    }

    async fn finalize_session(
        &self,
        session_id: &str,
        rollup: &Rollup,
    ) -> Result<FlushAck, ScormError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| ScormError::SessionNotFound(session_id.to_string()))?;
        Ok(record.finalize(rollup))
    }
}
