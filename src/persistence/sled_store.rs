//! Sled-backed session store
//!
//! Tracks one MessagePack-encoded [`SessionRecord`] per session id in the
//! `sessions` tree. Writes are flushed to disk before they are acknowledged.

use async_trait::async_trait;
use sled::{Db, Tree};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::Persistence;
use crate::commit::{FlushAck, FlushPayload, SessionRecord, SessionSnapshot};
use crate::error::ScormError;
use crate::rte::Rollup;

pub struct SledPersistence {
    db: Db,
    sessions: Tree,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl SledPersistence {
    /// Open or create the session database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ScormError> {
        let db = sled::open(path.as_ref())?;
        let sessions = db.open_tree("sessions")?;
        info!(path = %path.as_ref().display(), sessions = sessions.len(), "Opened session database");
        Ok(Self {
            db,
            sessions,
            write_lock: Mutex::new(()),
        })
    }

    fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, ScormError> {
        if let Some(value) = self.sessions.get(session_id.as_bytes())? {
            let record: SessionRecord = rmp_serde::from_slice(&value)
                .map_err(|e| ScormError::Serialization(format!("Deserialization error: {}", e)))?;
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    async fn put(&self, record: &SessionRecord) -> Result<(), ScormError> {
        let value = rmp_serde::to_vec_named(record)
            .map_err(|e| ScormError::Serialization(format!("Serialization error: {}", e)))?;
        self.sessions.insert(record.session_id.as_bytes(), value)?;
        self.db.flush_async().await?;
        Ok(())
    }

    /// List all stored session ids
    pub fn list_sessions(&self) -> Result<Vec<String>, ScormError> {
        let mut ids = Vec::new();
        for item in self.sessions.iter() {
            let (key, _) = item?;
            if let Ok(id) = String::from_utf8(key.to_vec()) {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl Persistence for SledPersistence {
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionSnapshot>, ScormError> {
        Ok(self.get(session_id)?.map(|record| record.snapshot()))
    }

    async fn flush_session(
        &self,
        session_id: &str,
        payload: &FlushPayload,
    ) -> Result<FlushAck, ScormError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .get(session_id)?
            .unwrap_or_else(|| SessionRecord::new(session_id));
        let ack = record.apply(payload);
        self.put(&record).await?;
        debug!(session_id = %session_id, seq = ack.seq, "Stored session payload");
        Ok(ack)
    }

    async fn finalize_session(
        &self,
        session_id: &str,
        rollup: &Rollup,
    ) -> Result<FlushAck, ScormError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .get(session_id)?
            .ok_or_else(|| ScormError::SessionNotFound(session_id.to_string()))?;
        let ack = record.finalize(rollup);
        self.put(&record).await?;
        Ok(ack)
    }
}
