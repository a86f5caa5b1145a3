//! Durable storage for session state
//!
//! Backends store a [`SessionRecord`] per session id and apply payloads to
//! it, so merge semantics are identical whichever backend is configured.

pub mod memory;
pub mod sled_store;

use async_trait::async_trait;

use crate::commit::{FlushAck, FlushPayload, SessionSnapshot};
use crate::error::ScormError;
use crate::rte::Rollup;

pub use memory::MemoryPersistence;
pub use sled_store::SledPersistence;

/// Storage used by commit workers and the launcher
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Everything stored for `session_id`, or `None` for a first launch
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionSnapshot>, ScormError>;

    /// Merge a payload into the stored session
    async fn flush_session(
        &self,
        session_id: &str,
        payload: &FlushPayload,
    ) -> Result<FlushAck, ScormError>;

    /// Record the rollup of a terminated session
    async fn finalize_session(&self, session_id: &str, rollup: &Rollup)
        -> Result<FlushAck, ScormError>;
}
