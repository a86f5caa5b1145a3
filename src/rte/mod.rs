//! RTE Session Manager
//!
//! [`RteEngine::launch`] builds an [`RteSession`] per SCO launch attempt:
//!
//! ```text
//! LaunchRequest ──► load snapshot ──► restore values + counts
//!                        │                    │
//!                        │                    ├── seed LMS elements (learner, entry, credit, ...)
//!                        │                    │
//!                        └── last_seq ────────┴──► spawn commit worker ──► RteSession
//! ```

pub mod api;
pub mod errors;
pub mod rollup;
pub mod session;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cmi::{DataModel, ScormVersion};
use crate::commit::{spawn_worker, PipelineConfig, SessionSnapshot};
use crate::debug_stream::DebugBroadcaster;
use crate::error::ScormError;
use crate::persistence::Persistence;

pub use api::{method_names, ApiMethod};
pub use errors::{error_string, ErrorCategory, RteError, RteErrorKind};
pub use rollup::{CompletionStatus, Rollup, SuccessStatus};
pub use session::{RteSession, SessionIdentity, SessionState};

/// Everything the LMS knows when a SCO is launched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchRequest {
    /// Reusing an id resumes that session's persisted state. Generated if absent.
    #[serde(default)]
    pub session_id: Option<String>,
    pub package_id: String,
    pub sco_id: String,
    /// `1.2`, `2004` or any label [`ScormVersion::parse`] accepts
    pub version: String,
    pub learner_id: String,
    #[serde(default)]
    pub learner_name: String,
    /// `credit` unless given
    #[serde(default)]
    pub credit: Option<String>,
    /// `normal` unless given
    #[serde(default)]
    pub mode: Option<String>,
    /// Manifest `datafromlms`
    #[serde(default)]
    pub launch_data: Option<String>,
    /// Manifest `masteryscore` (1.2) or minimum normalized measure (2004)
    #[serde(default)]
    pub mastery_score: Option<String>,
    #[serde(default)]
    pub max_time_allowed: Option<String>,
    #[serde(default)]
    pub time_limit_action: Option<String>,
}

/// Launches sessions against one persistence backend
pub struct RteEngine {
    persistence: Arc<dyn Persistence>,
    pipeline: PipelineConfig,
    debug_broadcaster: Option<Arc<DebugBroadcaster>>,
}

impl RteEngine {
    pub fn new(persistence: Arc<dyn Persistence>, pipeline: PipelineConfig) -> Self {
        Self {
            persistence,
            pipeline,
            debug_broadcaster: None,
        }
    }

    /// Set debug broadcaster for API call events
    pub fn with_debug_broadcaster(mut self, broadcaster: Arc<DebugBroadcaster>) -> Self {
        self.debug_broadcaster = Some(broadcaster);
        self
    }

    pub fn persistence(&self) -> Arc<dyn Persistence> {
        Arc::clone(&self.persistence)
    }

    /// Create a session for one SCO launch attempt
    pub async fn launch(&self, request: LaunchRequest) -> Result<RteSession, ScormError> {
        let version = ScormVersion::parse(&request.version).ok_or_else(|| {
            ScormError::Launch(format!("unsupported SCORM version '{}'", request.version))
        })?;
        let session_id = request
            .session_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let snapshot = self.persistence.load_session(&session_id).await?;
        if let Some(stored) = snapshot.as_ref().and_then(|s| s.version) {
            if stored != version {
                return Err(ScormError::Launch(format!(
                    "session {} was recorded as SCORM {}, not {}",
                    session_id, stored, version
                )));
            }
        }

        let mut model = DataModel::new(version);
        let entry = entry_for(&model, snapshot.as_ref());
        if let Some(ref snapshot) = snapshot {
            model.restore(&snapshot.values, &snapshot.counts);
        }
        seed_launch_values(&mut model, &request, entry, &session_id);

        let last_seq = snapshot.as_ref().map(|s| s.last_seq).unwrap_or(0);
        let pipeline = spawn_worker(
            &session_id,
            Arc::clone(&self.persistence),
            self.pipeline.clone(),
            self.debug_broadcaster.clone(),
        );

        info!(
            session_id = %session_id,
            package_id = %request.package_id,
            sco_id = %request.sco_id,
            version = %version,
            entry = %entry,
            last_seq = last_seq,
            "Launched SCO session"
        );
        if let Some(ref broadcaster) = self.debug_broadcaster {
            broadcaster.session_launched(&session_id, version.as_str(), entry);
        }

        let identity = SessionIdentity {
            session_id,
            package_id: request.package_id,
            sco_id: request.sco_id,
            version,
        };
        Ok(RteSession::new(
            identity,
            model,
            last_seq,
            pipeline,
            self.debug_broadcaster.clone(),
        ))
    }
}

/// `ab-initio` on first launch, `resume` after a suspend, otherwise empty
fn entry_for(model: &DataModel, snapshot: Option<&SessionSnapshot>) -> &'static str {
    match snapshot {
        None => "ab-initio",
        Some(snapshot) => {
            let exit_path = model.schema().paths.exit;
            if snapshot.values.get(exit_path).map(String::as_str) == Some("suspend") {
                "resume"
            } else {
                ""
            }
        }
    }
}

fn seed_launch_values(model: &mut DataModel, request: &LaunchRequest, entry: &str, session_id: &str) {
    let paths = model.schema().paths;
    let mut seeds: Vec<(&str, &str)> = vec![
        (paths.learner_id, request.learner_id.as_str()),
        (paths.learner_name, request.learner_name.as_str()),
        (paths.credit, request.credit.as_deref().unwrap_or("credit")),
        (paths.entry, entry),
        (paths.mode, request.mode.as_deref().unwrap_or("normal")),
    ];
    let optional = [
        (paths.launch_data, &request.launch_data),
        (paths.mastery, &request.mastery_score),
        (paths.max_time_allowed, &request.max_time_allowed),
        (paths.time_limit_action, &request.time_limit_action),
    ];
    for (path, value) in optional {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            seeds.push((path, value));
        }
    }

    for (path, value) in seeds {
        if let Err(e) = model.seed(path, value) {
            warn!(session_id = %session_id, path = %path, error = %e, "Skipping invalid launch value");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn snapshot_with_exit(path: &str, exit: &str) -> SessionSnapshot {
        let mut values = BTreeMap::new();
        values.insert(path.to_string(), exit.to_string());
        SessionSnapshot {
            session_id: "s1".to_string(),
            version: Some(ScormVersion::Scorm2004),
            package_id: String::new(),
            sco_id: String::new(),
            values,
            counts: BTreeMap::new(),
            interactions: Vec::new(),
            objectives: Vec::new(),
            last_seq: 3,
            rollup: None,
        }
    }

    #[test]
    fn test_entry_values() {
        let model = DataModel::new(ScormVersion::Scorm2004);
        assert_eq!(entry_for(&model, None), "ab-initio");
        assert_eq!(entry_for(&model, Some(&snapshot_with_exit("cmi.exit", "suspend"))), "resume");
        assert_eq!(entry_for(&model, Some(&snapshot_with_exit("cmi.exit", "normal"))), "");
    }

    #[test]
    fn test_invalid_seed_is_skipped() {
        let mut model = DataModel::new(ScormVersion::Scorm12);
        let request = LaunchRequest {
            learner_id: "learner-7".to_string(),
            learner_name: "Rivera, Sam".to_string(),
            mastery_score: Some("not-a-number".to_string()),
            ..Default::default()
        };
        seed_launch_values(&mut model, &request, "ab-initio", "s1");
        assert_eq!(model.get("cmi.core.student_id").unwrap(), "learner-7");
        assert_eq!(model.get("cmi.core.entry").unwrap(), "ab-initio");
        assert_eq!(model.get("cmi.student_data.mastery_score").unwrap(), "");
    }
}
