//! Commit/Persistence Pipeline
//!
//! Sessions never await storage. Commit and Terminate hand a [`FlushPayload`]
//! to a per-session [`worker`] over an mpsc channel; failures come back on a
//! second channel and surface on the session's next API call.
//!
//! ## Architecture
//!
//! ```text
//! RteSession ──try_send(CommitJob)──► CommitWorker ──► Persistence
//!     ▲                                   │  retry with backoff,
//!     │                                   │  retain + merge on failure
//!     └──────── CommitFailure ◄───────────┘
//! ```

pub mod worker;

use crate::cmi::{InteractionRecord, ObjectiveRecord, ScormVersion};
use crate::rte::Rollup;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::oneshot;

pub use worker::{spawn_worker, CommitHandle};

// ============================================================================
// Payloads
// ============================================================================

/// One batch of data model changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlushPayload {
    pub session_id: String,
    /// Monotonic per session, continues across launches
    pub seq: u64,
    pub version: ScormVersion,
    pub package_id: String,
    pub sco_id: String,
    /// Current values of the paths changed since the last commit
    pub values: BTreeMap<String, String>,
    /// Size of every collection
    pub counts: BTreeMap<String, usize>,
    pub interactions: Vec<InteractionRecord>,
    pub objectives: Vec<ObjectiveRecord>,
}

impl FlushPayload {
    /// Fold a newer payload into a retained one
    pub fn merge(mut self, newer: FlushPayload) -> FlushPayload {
        self.seq = self.seq.max(newer.seq);
        self.values.extend(newer.values);
        for (collection, count) in newer.counts {
            let slot = self.counts.entry(collection).or_insert(0);
            *slot = (*slot).max(count);
        }
        self.interactions = upsert_by_index(self.interactions, newer.interactions, |r| r.index);
        self.objectives = upsert_by_index(self.objectives, newer.objectives, |r| r.index);
        self
    }
}

fn upsert_by_index<T>(older: Vec<T>, newer: Vec<T>, index: impl Fn(&T) -> usize) -> Vec<T> {
    let mut merged: BTreeMap<usize, T> = older.into_iter().map(|r| (index(&r), r)).collect();
    for record in newer {
        merged.insert(index(&record), record);
    }
    merged.into_values().collect()
}

/// Receipt for a durable write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlushAck {
    pub session_id: String,
    pub seq: u64,
    /// Paths whose stored value this write replaced
    pub paths_written: usize,
    pub finalized: bool,
}

/// Everything persisted for a session, as loaded at launch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub version: Option<ScormVersion>,
    pub package_id: String,
    pub sco_id: String,
    pub values: BTreeMap<String, String>,
    pub counts: BTreeMap<String, usize>,
    pub interactions: Vec<InteractionRecord>,
    pub objectives: Vec<ObjectiveRecord>,
    pub last_seq: u64,
    pub rollup: Option<Rollup>,
}

/// Stored value with the sequence number that wrote it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    pub seq: u64,
    pub value: String,
}

/// Durable form of a session, shared by the persistence backends
///
/// Applying a payload is idempotent: values merge last-write-wins per path
/// by sequence number, counts only grow and records upsert by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub version: Option<ScormVersion>,
    pub package_id: String,
    pub sco_id: String,
    pub values: BTreeMap<String, StoredValue>,
    pub counts: BTreeMap<String, usize>,
    pub interactions: BTreeMap<usize, InteractionRecord>,
    pub objectives: BTreeMap<usize, ObjectiveRecord>,
    pub last_seq: u64,
    pub rollup: Option<Rollup>,
    pub updated_at: String,
}

impl SessionRecord {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            version: None,
            package_id: String::new(),
            sco_id: String::new(),
            values: BTreeMap::new(),
            counts: BTreeMap::new(),
            interactions: BTreeMap::new(),
            objectives: BTreeMap::new(),
            last_seq: 0,
            rollup: None,
            updated_at: now(),
        }
    }

    pub fn apply(&mut self, payload: &FlushPayload) -> FlushAck {
        self.version = Some(payload.version);
        self.package_id = payload.package_id.clone();
        self.sco_id = payload.sco_id.clone();

        let mut paths_written = 0;
        for (path, value) in &payload.values {
            let newer = self
                .values
                .get(path)
                .map(|stored| stored.seq <= payload.seq)
                .unwrap_or(true);
            if newer {
                self.values.insert(
                    path.clone(),
                    StoredValue { seq: payload.seq, value: value.clone() },
                );
                paths_written += 1;
            }
        }
        for (collection, count) in &payload.counts {
            let slot = self.counts.entry(collection.clone()).or_insert(0);
            *slot = (*slot).max(*count);
        }
        if payload.seq >= self.last_seq {
            for record in &payload.interactions {
                self.interactions.insert(record.index, record.clone());
            }
            for record in &payload.objectives {
                self.objectives.insert(record.index, record.clone());
            }
        }
        self.last_seq = self.last_seq.max(payload.seq);
        self.updated_at = now();

        FlushAck {
            session_id: self.session_id.clone(),
            seq: payload.seq,
            paths_written,
            finalized: false,
        }
    }

    pub fn finalize(&mut self, rollup: &Rollup) -> FlushAck {
        self.rollup = Some(rollup.clone());
        self.updated_at = now();
        FlushAck {
            session_id: self.session_id.clone(),
            seq: self.last_seq,
            paths_written: 0,
            finalized: true,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            version: self.version,
            package_id: self.package_id.clone(),
            sco_id: self.sco_id.clone(),
            values: self
                .values
                .iter()
                .map(|(path, stored)| (path.clone(), stored.value.clone()))
                .collect(),
            counts: self.counts.clone(),
            interactions: self.interactions.values().cloned().collect(),
            objectives: self.objectives.values().cloned().collect(),
            last_seq: self.last_seq,
            rollup: self.rollup.clone(),
        }
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ============================================================================
// Jobs
// ============================================================================

/// Work sent from a session to its worker
#[derive(Debug)]
pub enum CommitJob {
    /// Commit: flush with retries
    Flush(FlushPayload),
    /// Terminate: flush, then finalize, then acknowledge
    Finalize {
        payload: FlushPayload,
        rollup: Rollup,
        ack: oneshot::Sender<Result<FlushAck, String>>,
    },
    /// Page unload without Terminate: one attempt, nobody waits
    Unload(FlushPayload),
}

/// Deferred failure reported back to the session
#[derive(Debug, Clone, PartialEq)]
pub struct CommitFailure {
    pub seq: u64,
    pub message: String,
}

// ============================================================================
// Configuration
// ============================================================================

/// Retry and queueing settings for commit workers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Delay before the first retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Retry delay ceiling
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Attempts per flush, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Jobs a session may queue before Commit reports failure
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How often an idle worker retries a payload that exhausted its attempts
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    4
}

fn default_queue_capacity() -> usize {
    64
}

fn default_retry_interval_ms() -> u64 {
    30_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: default_max_attempts(),
            queue_capacity: default_queue_capacity(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl PipelineConfig {
    /// Delay after failed attempt `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self.initial_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }

    /// Period of the idle retry, never zero
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.max(1))
    }
}
