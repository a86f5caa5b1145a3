//! RTE session state machine
//!
//! Every API method is synchronous and returns the SCORM string result.
//! Failures never escape as `Result`s; they set the session's last error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::api::ApiMethod;
use super::errors::{error_string, RteError, RteErrorKind};
use super::rollup::{self, Rollup};
use crate::cmi::{DataModel, ScormVersion};
use crate::commit::{CommitHandle, CommitJob, FlushAck, FlushPayload};
use crate::debug_stream::DebugBroadcaster;
use crate::error::ScormError;

const TRUE: &str = "true";
const FALSE: &str = "false";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotInitialized,
    Running,
    Terminated,
}

/// Identity of a session, fixed at launch
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub session_id: String,
    pub package_id: String,
    pub sco_id: String,
    pub version: ScormVersion,
}

/// One SCO launch attempt
pub struct RteSession {
    identity: SessionIdentity,
    state: SessionState,
    model: DataModel,
    /// Paths changed since the last accepted commit
    dirty: BTreeSet<String>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    last_error: RteError,
    seq: u64,
    pipeline: CommitHandle,
    closed: Option<oneshot::Receiver<Result<FlushAck, String>>>,
    rollup: Option<Rollup>,
    debug_broadcaster: Option<Arc<DebugBroadcaster>>,
}

impl RteSession {
    pub(crate) fn new(
        identity: SessionIdentity,
        model: DataModel,
        last_seq: u64,
        pipeline: CommitHandle,
        debug_broadcaster: Option<Arc<DebugBroadcaster>>,
    ) -> Self {
        Self {
            identity,
            state: SessionState::NotInitialized,
            model,
            dirty: BTreeSet::new(),
            started_at: None,
            ended_at: None,
            last_error: RteError::none(),
            seq: last_seq,
            pipeline,
            closed: None,
            rollup: None,
            debug_broadcaster,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn session_id(&self) -> &str {
        &self.identity.session_id
    }

    pub fn package_id(&self) -> &str {
        &self.identity.package_id
    }

    pub fn sco_id(&self) -> &str {
        &self.identity.sco_id
    }

    pub fn version(&self) -> ScormVersion {
        self.identity.version
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn model(&self) -> &DataModel {
        &self.model
    }

    pub fn dirty_paths(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Rollup computed at Terminate
    pub fn rollup(&self) -> Option<&Rollup> {
        self.rollup.as_ref()
    }

    pub fn last_error(&self) -> &RteError {
        &self.last_error
    }

    pub fn last_error_code(&self) -> u16 {
        self.last_error.code(self.identity.version)
    }

    /// Wait until the final flush and finalization issued by Terminate complete
    pub async fn closed(&mut self) -> Result<FlushAck, ScormError> {
        let rx = self.closed.take().ok_or_else(|| {
            ScormError::Internal(format!(
                "session {} has not been terminated",
                self.identity.session_id
            ))
        })?;
        match rx.await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(message)) => Err(ScormError::Persistence(message)),
            Err(_) => Err(ScormError::PipelineClosed(self.identity.session_id.clone())),
        }
    }

    /// Page unload: discard the session, with a best-effort flush if it is still running
    pub fn unload(self) {
        drop(self)
    }

    // ========================================================================
    // RTE API
    // ========================================================================

    /// `Initialize("")` / `LMSInitialize("")`
    pub fn initialize(&mut self, param: &str) -> String {
        let outcome = self.sequence_check(
            RteErrorKind::AlreadyInitialized,
            RteErrorKind::ContentTerminated,
            true,
        )
        .and_then(|_| require_empty(param))
        .map(|_| {
            self.state = SessionState::Running;
            self.started_at = Some(Utc::now());
            info!(
                session_id = %self.identity.session_id,
                version = %self.identity.version,
                "SCO initialized"
            );
            TRUE.to_string()
        });
        self.finish(ApiMethod::Initialize, &[param], outcome, FALSE)
    }

    /// `GetValue(path)` / `LMSGetValue(path)`
    pub fn get_value(&mut self, path: &str) -> String {
        let outcome = self
            .sequence_check(RteErrorKind::GetBeforeInit, RteErrorKind::GetAfterTerminate, false)
            .and_then(|_| {
                if path.is_empty() {
                    return Err(RteError::new(
                        RteErrorKind::GeneralGetFailure,
                        "GetValue requires an element name",
                    ));
                }
                self.model.get(path).map_err(|e| RteError::from_data_model(&e, false))
            });
        self.finish(ApiMethod::GetValue, &[path], outcome, "")
    }

    /// `SetValue(path, value)` / `LMSSetValue(path, value)`
    pub fn set_value(&mut self, path: &str, value: &str) -> String {
        let outcome = self
            .sequence_check(RteErrorKind::SetBeforeInit, RteErrorKind::SetAfterTerminate, false)
            .and_then(|_| {
                if path.is_empty() {
                    return Err(RteError::new(
                        RteErrorKind::GeneralSetFailure,
                        "SetValue requires an element name",
                    ));
                }
                self.model
                    .set(path, value)
                    .map_err(|e| RteError::from_data_model(&e, true))?;
                self.dirty.insert(path.to_string());
                Ok(TRUE.to_string())
            });
        self.finish(ApiMethod::SetValue, &[path, value], outcome, FALSE)
    }

    /// `Commit("")` / `LMSCommit("")`
    pub fn commit(&mut self, param: &str) -> String {
        let outcome = self
            .sequence_check(RteErrorKind::CommitBeforeInit, RteErrorKind::CommitAfterTerminate, false)
            .and_then(|_| require_empty(param))
            .and_then(|_| {
                let payload = self.build_payload(None);
                let seq = payload.seq;
                self.pipeline
                    .submit(CommitJob::Flush(payload))
                    .map_err(|e| RteError::new(RteErrorKind::GeneralCommitFailure, e.to_string()))?;
                self.seq = seq;
                self.dirty.clear();
                Ok(TRUE.to_string())
            });
        self.finish(ApiMethod::Commit, &[param], outcome, FALSE)
    }

    /// `Terminate("")` / `LMSFinish("")`
    pub fn terminate(&mut self, param: &str) -> String {
        let outcome = self
            .sequence_check(
                RteErrorKind::TerminateBeforeInit,
                RteErrorKind::TerminateAfterTerminate,
                false,
            )
            .and_then(|_| require_empty(param))
            .and_then(|_| {
                let rollup = rollup::compute(&self.model);
                let total_time_path = self.model.schema().paths.total_time;
                let payload = self.build_payload(Some((total_time_path, &rollup.total_time)));
                let seq = payload.seq;

                let (ack_tx, ack_rx) = oneshot::channel();
                self.pipeline
                    .submit(CommitJob::Finalize {
                        payload,
                        rollup: rollup.clone(),
                        ack: ack_tx,
                    })
                    .map_err(|e| RteError::new(RteErrorKind::GeneralCommitFailure, e.to_string()))?;
                self.seq = seq;

                if let Err(e) = self.model.seed(total_time_path, &rollup.total_time) {
                    warn!(session_id = %self.identity.session_id, error = %e, "Could not record total time");
                }
                self.dirty.clear();
                self.closed = Some(ack_rx);
                self.state = SessionState::Terminated;
                self.ended_at = Some(Utc::now());
                info!(
                    session_id = %self.identity.session_id,
                    completion = ?rollup.completion_status,
                    success = ?rollup.success_status,
                    score = %rollup.score_label(),
                    total_time = %rollup.total_time,
                    "SCO terminated"
                );
                self.rollup = Some(rollup);
                Ok(TRUE.to_string())
            });
        self.finish(ApiMethod::Terminate, &[param], outcome, FALSE)
    }

    /// `GetLastError()` / `LMSGetLastError()`
    pub fn get_last_error(&mut self) -> String {
        self.observe_deferred_only();
        let code = self.last_error_code().to_string();
        self.emit(ApiMethod::GetLastError, &[], &code, 0);
        code
    }

    /// `GetErrorString(code)` / `LMSGetErrorString(code)`
    pub fn get_error_string(&mut self, code: &str) -> String {
        self.observe_deferred_only();
        let result = code
            .trim()
            .parse::<u16>()
            .map(|c| error_string(self.identity.version, c).to_string())
            .unwrap_or_default();
        self.emit(ApiMethod::GetErrorString, &[code], &result, 0);
        result
    }

    /// `GetDiagnostic(code)` / `LMSGetDiagnostic(code)`
    ///
    /// An empty code, or the code of the last error, returns that error's
    /// diagnostic. Any other code returns its standard description.
    pub fn get_diagnostic(&mut self, code: &str) -> String {
        self.observe_deferred_only();
        let last_code = self.last_error_code();
        let code = code.trim();
        let result = if code.is_empty() || code.parse::<u16>().ok() == Some(last_code) {
            if self.last_error.diagnostic.is_empty() {
                error_string(self.identity.version, last_code).to_string()
            } else {
                self.last_error.diagnostic.clone()
            }
        } else {
            code.parse::<u16>()
                .map(|c| error_string(self.identity.version, c).to_string())
                .unwrap_or_default()
        };
        self.emit(ApiMethod::GetDiagnostic, &[code], &result, 0);
        result
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Lifecycle gate shared by every state-dependent call
    fn sequence_check(
        &self,
        before_init: RteErrorKind,
        after_terminate: RteErrorKind,
        is_initialize: bool,
    ) -> Result<(), RteError> {
        match (self.state, is_initialize) {
            (SessionState::NotInitialized, true) | (SessionState::Running, false) => Ok(()),
            (SessionState::Running, true) => {
                Err(RteError::new(before_init, "the session is already running"))
            }
            (SessionState::NotInitialized, false) => {
                Err(RteError::new(before_init, "Initialize has not been called"))
            }
            (SessionState::Terminated, _) => {
                Err(RteError::new(after_terminate, "the session has been terminated"))
            }
        }
    }

    /// Record the outcome of a call and emit its debug event
    ///
    /// A failing call reports its own error. A succeeding call reports a
    /// commit failure that arrived from the worker since the previous call.
    fn finish(
        &mut self,
        method: ApiMethod,
        args: &[&str],
        outcome: Result<String, RteError>,
        failure_result: &str,
    ) -> String {
        let deferred = self.pipeline.take_failure();
        let result = match outcome {
            Ok(result) => {
                self.last_error = match deferred {
                    Some(failure) => RteError::new(
                        RteErrorKind::GeneralCommitFailure,
                        format!("commit seq {} failed: {}", failure.seq, failure.message),
                    ),
                    None => RteError::none(),
                };
                result
            }
            Err(err) => {
                debug!(
                    session_id = %self.identity.session_id,
                    method = method.name(self.identity.version),
                    code = err.code(self.identity.version),
                    diagnostic = %err.diagnostic,
                    "RTE call failed"
                );
                self.last_error = err;
                failure_result.to_string()
            }
        };
        let code = self.last_error_code();
        self.emit(method, args, &result, code);
        result
    }

    /// Error queries report a pending commit failure without clearing anything else
    fn observe_deferred_only(&mut self) {
        if let Some(failure) = self.pipeline.take_failure() {
            self.last_error = RteError::new(
                RteErrorKind::GeneralCommitFailure,
                format!("commit seq {} failed: {}", failure.seq, failure.message),
            );
        }
    }

    pub(crate) fn fail(&mut self, method: Option<ApiMethod>, name: &str, args: &[&str], err: RteError) {
        self.last_error = err;
        let code = self.last_error_code();
        let label = method.map(|m| m.name(self.identity.version)).unwrap_or(name);
        if let Some(ref broadcaster) = self.debug_broadcaster {
            broadcaster.rte_api(&self.identity.session_id, label, args, "", code);
        }
    }

    fn emit(&self, method: ApiMethod, args: &[&str], result: &str, code: u16) {
        if let Some(ref broadcaster) = self.debug_broadcaster {
            broadcaster.rte_api(
                &self.identity.session_id,
                method.name(self.identity.version),
                args,
                result,
                code,
            );
        }
    }

    /// Payload for the dirty set, plus an LMS-side value written alongside it
    ///
    /// Carries the next sequence number; the caller advances `seq` only once
    /// the worker has accepted the job.
    fn build_payload(&self, extra: Option<(&str, &str)>) -> FlushPayload {
        let mut values: std::collections::BTreeMap<String, String> = self
            .dirty
            .iter()
            .filter_map(|path| self.model.value(path).map(|v| (path.clone(), v.to_string())))
            .collect();
        if let Some((path, value)) = extra {
            values.insert(path.to_string(), value.to_string());
        }
        FlushPayload {
            session_id: self.identity.session_id.clone(),
            seq: self.seq + 1,
            version: self.identity.version,
            package_id: self.identity.package_id.clone(),
            sco_id: self.identity.sco_id.clone(),
            values,
            counts: self.model.counts().clone(),
            interactions: self.model.interactions(),
            objectives: self.model.objectives(),
        }
    }
}

impl Drop for RteSession {
    fn drop(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        let payload = self.build_payload(None);
        warn!(
            session_id = %self.identity.session_id,
            dirty = self.dirty.len(),
            "Session dropped while running, sending best-effort flush"
        );
        if let Some(ref broadcaster) = self.debug_broadcaster {
            broadcaster.session_unloaded(&self.identity.session_id);
        }
        if let Err(e) = self.pipeline.submit(CommitJob::Unload(payload)) {
            warn!(session_id = %self.identity.session_id, error = %e, "Unload flush not queued");
        }
    }
}

fn require_empty(param: &str) -> Result<(), RteError> {
    if param.is_empty() {
        Ok(())
    } else {
        Err(RteError::new(
            RteErrorKind::GeneralArgument,
            format!("expected an empty string parameter, got '{}'", param),
        ))
    }
}
