//! Per-session commit worker
//!
//! One tokio task per session drains [`CommitJob`]s in order. A payload that
//! cannot be written after `max_attempts` is retained and merged into the
//! next job, so nothing the SCO committed is dropped while the session lives.
//! A worker with nothing queued retries the retained payload every
//! `retry_interval`, one attempt per tick.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{CommitFailure, CommitJob, FlushAck, FlushPayload, PipelineConfig};
use crate::debug_stream::DebugBroadcaster;
use crate::error::ScormError;
use crate::persistence::Persistence;
use crate::rte::Rollup;

/// Session-side end of the pipeline
pub struct CommitHandle {
    session_id: String,
    jobs: mpsc::Sender<CommitJob>,
    failures: mpsc::UnboundedReceiver<CommitFailure>,
}

impl CommitHandle {
    /// Hand a job to the worker without waiting
    pub fn submit(&self, job: CommitJob) -> Result<(), ScormError> {
        self.jobs.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ScormError::Persistence(format!(
                "commit queue full for session {}",
                self.session_id
            )),
            mpsc::error::TrySendError::Closed(_) => {
                ScormError::PipelineClosed(self.session_id.clone())
            }
        })
    }

    /// Most recent deferred failure, if any arrived since the last check
    pub fn take_failure(&mut self) -> Option<CommitFailure> {
        let mut latest = None;
        while let Ok(failure) = self.failures.try_recv() {
            latest = Some(failure);
        }
        latest
    }
}

/// Start the worker task for one session
///
/// Must be called from within a tokio runtime.
pub fn spawn_worker(
    session_id: &str,
    persistence: Arc<dyn Persistence>,
    config: PipelineConfig,
    debug_broadcaster: Option<Arc<DebugBroadcaster>>,
) -> CommitHandle {
    let (job_tx, job_rx) = mpsc::channel(config.queue_capacity.max(1));
    let (failure_tx, failure_rx) = mpsc::unbounded_channel();

    let worker = CommitWorker {
        session_id: session_id.to_string(),
        persistence,
        config,
        debug_broadcaster,
        retained: None,
        failures: failure_tx,
    };
    tokio::spawn(worker.run(job_rx));

    CommitHandle {
        session_id: session_id.to_string(),
        jobs: job_tx,
        failures: failure_rx,
    }
}

struct CommitWorker {
    session_id: String,
    persistence: Arc<dyn Persistence>,
    config: PipelineConfig,
    debug_broadcaster: Option<Arc<DebugBroadcaster>>,
    /// Payload whose write failed, merged into the next flush
    retained: Option<FlushPayload>,
    failures: mpsc::UnboundedSender<CommitFailure>,
}

impl CommitWorker {
    async fn run(mut self, mut jobs: mpsc::Receiver<CommitJob>) {
        debug!(session_id = %self.session_id, "Commit worker started");

        let mut retry = tokio::time::interval(self.config.retry_interval());
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let job = tokio::select! {
                biased;
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
                _ = retry.tick(), if self.retained.is_some() => {
                    self.retry_retained().await;
                    continue;
                }
            };

            match job {
                CommitJob::Flush(payload) => {
                    let attempts = self.config.max_attempts;
                    let _ = self.flush(payload, attempts).await;
                }
                CommitJob::Finalize { payload, rollup, ack } => {
                    let attempts = self.config.max_attempts;
                    let result = match self.flush(payload, attempts).await {
                        Ok(_) => self.finalize(&rollup).await,
                        Err(e) => Err(e),
                    };
                    let _ = ack.send(result);
                }
                CommitJob::Unload(payload) => {
                    if self.flush(payload, 1).await.is_err() {
                        warn!(
                            session_id = %self.session_id,
                            "Best-effort unload flush lost"
                        );
                    }
                }
            }

            if self.retained.is_some() {
                retry.reset();
            }
        }

        if let Some(retained) = self.retained.take() {
            warn!(
                session_id = %self.session_id,
                seq = retained.seq,
                paths = retained.values.len(),
                "Commit worker stopped with unwritten changes"
            );
        }
        debug!(session_id = %self.session_id, "Commit worker stopped");
    }

    async fn flush(&mut self, payload: FlushPayload, max_attempts: u32) -> Result<FlushAck, String> {
        let payload = match self.retained.take() {
            Some(retained) => retained.merge(payload),
            None => payload,
        };
        let max_attempts = max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match self.persistence.flush_session(&self.session_id, &payload).await {
                Ok(ack) => {
                    info!(
                        session_id = %self.session_id,
                        seq = ack.seq,
                        paths_written = ack.paths_written,
                        attempt = attempt + 1,
                        "Flushed session changes"
                    );
                    if let Some(ref broadcaster) = self.debug_broadcaster {
                        broadcaster.commit_flushed(&self.session_id, ack.seq, ack.paths_written);
                    }
                    return Ok(ack);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        error!(
                            session_id = %self.session_id,
                            seq = payload.seq,
                            attempts = attempt,
                            error = %e,
                            "Flush failed, retaining payload for next commit"
                        );
                        if let Some(ref broadcaster) = self.debug_broadcaster {
                            broadcaster.commit_failed(&self.session_id, payload.seq, attempt, &e.to_string());
                        }
                        let message = e.to_string();
                        let _ = self.failures.send(CommitFailure {
                            seq: payload.seq,
                            message: message.clone(),
                        });
                        self.retained = Some(payload);
                        return Err(message);
                    }

                    let delay = self.config.backoff(attempt - 1);
                    warn!(
                        session_id = %self.session_id,
                        seq = payload.seq,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Flush failed, retrying..."
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One quiet attempt at the retained payload; its failure was already reported
    async fn retry_retained(&mut self) {
        let Some(payload) = self.retained.take() else {
            return;
        };
        match self.persistence.flush_session(&self.session_id, &payload).await {
            Ok(ack) => {
                info!(
                    session_id = %self.session_id,
                    seq = ack.seq,
                    paths_written = ack.paths_written,
                    "Flushed retained changes"
                );
                if let Some(ref broadcaster) = self.debug_broadcaster {
                    broadcaster.commit_flushed(&self.session_id, ack.seq, ack.paths_written);
                }
            }
            Err(e) => {
                debug!(
                    session_id = %self.session_id,
                    seq = payload.seq,
                    error = %e,
                    "Retained changes still unwritten"
                );
                self.retained = Some(payload);
            }
        }
    }

    async fn finalize(&mut self, rollup: &Rollup) -> Result<FlushAck, String> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match self.persistence.finalize_session(&self.session_id, rollup).await {
                Ok(ack) => {
                    info!(
                        session_id = %self.session_id,
                        completion = ?rollup.completion_status,
                        success = ?rollup.success_status,
                        score = %rollup.score_label(),
                        total_time = %rollup.total_time,
                        "Session finalized"
                    );
                    if let Some(ref broadcaster) = self.debug_broadcaster {
                        broadcaster.session_finalized(&self.session_id, rollup);
                    }
                    return Ok(ack);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        error!(
                            session_id = %self.session_id,
                            attempts = attempt,
                            error = %e,
                            "Finalize failed"
                        );
                        if let Some(ref broadcaster) = self.debug_broadcaster {
                            broadcaster.commit_failed(&self.session_id, 0, attempt, &e.to_string());
                        }
                        return Err(e.to_string());
                    }
                    tokio::time::sleep(self.config.backoff(attempt - 1)).await;
                }
            }
        }
    }
}
