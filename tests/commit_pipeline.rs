//! Integration tests for the commit pipeline
//!
//! Sessions hand payloads to their worker without waiting, so these tests
//! poll storage (or GetLastError) with a deadline instead of sleeping blind.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use elohim_scorm::commit::SessionRecord;
use elohim_scorm::rte::Rollup;
use elohim_scorm::{
    FlushAck, FlushPayload, LaunchRequest, MemoryPersistence, Persistence, PipelineConfig,
    RteEngine, ScormError, ScormVersion, SessionSnapshot, SledPersistence,
};

fn fast_pipeline(max_attempts: u32) -> PipelineConfig {
    PipelineConfig {
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
        max_attempts,
        queue_capacity: 16,
        retry_interval_ms: 20,
    }
}

fn request(session_id: &str, version: &str) -> LaunchRequest {
    LaunchRequest {
        session_id: Some(session_id.to_string()),
        package_id: "sha256-pipeline".to_string(),
        sco_id: "sco-1".to_string(),
        version: version.to_string(),
        learner_id: "learner-1".to_string(),
        ..Default::default()
    }
}

/// Poll until `check` passes or two seconds elapse
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Memory store whose flushes fail while `failures_left` is positive
struct FlakyPersistence {
    inner: MemoryPersistence,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl FlakyPersistence {
    fn new(failures: u32) -> Self {
        Self {
            inner: MemoryPersistence::new(),
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Persistence for FlakyPersistence {
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionSnapshot>, ScormError> {
        self.inner.load_session(session_id).await
    }

    async fn flush_session(
        &self,
        session_id: &str,
        payload: &FlushPayload,
    ) -> Result<FlushAck, ScormError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ScormError::Persistence("store unavailable".to_string()));
        }
        self.inner.flush_session(session_id, payload).await
    }

    async fn finalize_session(&self, session_id: &str, rollup: &Rollup) -> Result<FlushAck, ScormError> {
        self.inner.finalize_session(session_id, rollup).await
    }
}

/// Memory store whose flushes wait for permits on `gate`
struct GatedPersistence {
    inner: MemoryPersistence,
    gate: tokio::sync::Semaphore,
    entered: AtomicU32,
    flushed: std::sync::Mutex<Vec<u64>>,
}

impl GatedPersistence {
    fn closed() -> Self {
        Self {
            inner: MemoryPersistence::new(),
            gate: tokio::sync::Semaphore::new(0),
            entered: AtomicU32::new(0),
            flushed: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn entered(&self) -> u32 {
        self.entered.load(Ordering::SeqCst)
    }

    fn flushed(&self) -> Vec<u64> {
        self.flushed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Persistence for GatedPersistence {
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionSnapshot>, ScormError> {
        self.inner.load_session(session_id).await
    }

    async fn flush_session(
        &self,
        session_id: &str,
        payload: &FlushPayload,
    ) -> Result<FlushAck, ScormError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await.unwrap();
        let ack = self.inner.flush_session(session_id, payload).await?;
        self.flushed.lock().unwrap().push(payload.seq);
        Ok(ack)
    }

    async fn finalize_session(&self, session_id: &str, rollup: &Rollup) -> Result<FlushAck, ScormError> {
        self.inner.finalize_session(session_id, rollup).await
    }
}

/// Replaying the same payload leaves the record as it was
#[tokio::test]
async fn test_replayed_flush_is_idempotent() {
    let persistence = MemoryPersistence::new();
    let payload = FlushPayload {
        session_id: "s-replay".to_string(),
        seq: 4,
        version: ScormVersion::Scorm2004,
        package_id: "pkg".to_string(),
        sco_id: "sco".to_string(),
        values: [("cmi.location".to_string(), "page-9".to_string())].into_iter().collect(),
        counts: [("cmi.interactions".to_string(), 2)].into_iter().collect(),
        interactions: Vec::new(),
        objectives: Vec::new(),
    };

    persistence.flush_session("s-replay", &payload).await.unwrap();
    let first = persistence.record("s-replay").await.unwrap();
    persistence.flush_session("s-replay", &payload).await.unwrap();
    let second = persistence.record("s-replay").await.unwrap();

    assert_eq!(first.values, second.values);
    assert_eq!(first.counts, second.counts);
    assert_eq!(second.last_seq, 4);

    // An older payload arriving late loses to the stored value
    let mut stale = payload.clone();
    stale.seq = 2;
    stale.values.insert("cmi.location".to_string(), "page-1".to_string());
    stale.counts.insert("cmi.interactions".to_string(), 1);
    let mut record = SessionRecord::new("s-replay");
    record.apply(&payload);
    let ack = record.apply(&stale);
    assert_eq!(ack.paths_written, 0);
    assert_eq!(record.values["cmi.location"].value, "page-9");
    assert_eq!(record.counts["cmi.interactions"], 2);
}

/// Suspend data written in one attempt is readable in the next
#[tokio::test]
async fn test_suspend_and_resume() {
    let persistence = Arc::new(MemoryPersistence::new());
    let engine = RteEngine::new(persistence.clone(), fast_pipeline(3));
    let suspend = "slide=7;answers=b,c,a";

    let mut first = engine.launch(request("s-resume", "1.2")).await.unwrap();
    first.initialize("");
    assert_eq!(first.get_value("cmi.core.entry"), "ab-initio");
    assert_eq!(first.set_value("cmi.suspend_data", suspend), "true");
    assert_eq!(first.set_value("cmi.core.lesson_location", "slide-7"), "true");
    assert_eq!(first.set_value("cmi.core.exit", "suspend"), "true");
    assert_eq!(first.set_value("cmi.core.session_time", "00:01:30"), "true");
    assert_eq!(first.terminate(""), "true");
    first.closed().await.unwrap();

    let mut second = engine.launch(request("s-resume", "1.2")).await.unwrap();
    second.initialize("");
    assert_eq!(second.get_value("cmi.suspend_data"), suspend);
    assert_eq!(second.get_value("cmi.core.lesson_location"), "slide-7");
    assert_eq!(second.get_value("cmi.core.entry"), "resume");
    assert_eq!(second.get_value("cmi.core.total_time"), "0000:01:30.00");

    second.set_value("cmi.core.session_time", "00:00:45");
    second.terminate("");
    second.closed().await.unwrap();

    let record = persistence.record("s-resume").await.unwrap();
    assert_eq!(record.rollup.unwrap().total_time, "0000:02:15.00");
}

/// Sequence numbers continue across launches of the same session
#[tokio::test]
async fn test_seq_continues_across_launches() {
    let persistence = Arc::new(MemoryPersistence::new());
    let engine = RteEngine::new(persistence.clone(), fast_pipeline(3));

    let mut first = engine.launch(request("s-seq", "2004")).await.unwrap();
    first.initialize("");
    first.set_value("cmi.location", "a");
    first.commit("");
    first.set_value("cmi.location", "b");
    first.terminate("");
    let ack = first.closed().await.unwrap();
    assert_eq!(ack.seq, 2);

    let mut second = engine.launch(request("s-seq", "2004")).await.unwrap();
    second.initialize("");
    assert_eq!(second.get_value("cmi.location"), "b");
    assert_eq!(second.get_value("cmi.entry"), "");
    second.set_value("cmi.location", "c");
    second.terminate("");
    let ack = second.closed().await.unwrap();
    assert_eq!(ack.seq, 3);

    let record = persistence.record("s-seq").await.unwrap();
    assert_eq!(record.values["cmi.location"].seq, 3);
    assert_eq!(record.values["cmi.location"].value, "c");
}

/// Transient store failures are retried inside one Commit
#[tokio::test]
async fn test_commit_retries_transient_failure() {
    let persistence = Arc::new(FlakyPersistence::new(2));
    let engine = RteEngine::new(persistence.clone(), fast_pipeline(4));

    let mut session = engine.launch(request("s-retry", "2004")).await.unwrap();
    session.initialize("");
    session.set_value("cmi.location", "page-2");
    assert_eq!(session.commit(""), "true");

    let stored = eventually(|| {
        let persistence = Arc::clone(&persistence);
        async move { persistence.inner.record("s-retry").await.is_some() }
    })
    .await;
    assert!(stored);
    assert_eq!(persistence.attempts(), 3);
    assert_eq!(session.get_last_error(), "0");
}

/// A commit that exhausts its attempts surfaces on a later call and is retried with the next one
#[tokio::test]
async fn test_exhausted_commit_reports_deferred_failure() {
    let persistence = Arc::new(FlakyPersistence::new(1));
    let engine = RteEngine::new(persistence.clone(), fast_pipeline(1));

    let mut session = engine.launch(request("s-deferred", "2004")).await.unwrap();
    session.initialize("");
    session.set_value("cmi.location", "page-5");
    assert_eq!(session.commit(""), "true");

    let mut observed = false;
    for _ in 0..200 {
        if session.get_last_error() == "391" {
            observed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(observed);
    assert!(!session.get_diagnostic("391").is_empty());

    // The next successful call clears it
    assert_eq!(session.get_value("cmi.location"), "page-5");
    assert_eq!(session.get_last_error(), "0");

    // Retained changes ride along with the next commit
    session.set_value("cmi.suspend_data", "x=1");
    assert_eq!(session.commit(""), "true");
    let stored = eventually(|| {
        let persistence = Arc::clone(&persistence);
        async move {
            persistence
                .inner
                .record("s-deferred")
                .await
                .map(|r| r.values.contains_key("cmi.location") && r.values.contains_key("cmi.suspend_data"))
                .unwrap_or(false)
        }
    })
    .await;
    assert!(stored);
}

/// 1.2 reports a deferred commit failure as a general exception
#[tokio::test]
async fn test_12_deferred_failure_code() {
    let persistence = Arc::new(FlakyPersistence::new(1));
    let engine = RteEngine::new(persistence.clone(), fast_pipeline(1));

    let mut session = engine.launch(request("s-deferred-12", "1.2")).await.unwrap();
    session.initialize("");
    session.set_value("cmi.core.lesson_location", "p1");
    session.commit("");

    let reported = eventually(|| {
        let persistence = Arc::clone(&persistence);
        async move { persistence.attempts() >= 1 }
    })
    .await;
    assert!(reported);

    let mut code = String::new();
    for _ in 0..200 {
        code = session.get_last_error();
        if code != "0" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(code, "101");
}

/// An idle worker keeps retrying retained changes without waiting for another Commit
#[tokio::test]
async fn test_idle_worker_retries_retained_payload() {
    let persistence = Arc::new(FlakyPersistence::new(1));
    let engine = RteEngine::new(persistence.clone(), fast_pipeline(1));

    let mut session = engine.launch(request("s-idle", "2004")).await.unwrap();
    session.initialize("");
    session.set_value("cmi.location", "page-6");
    assert_eq!(session.commit(""), "true");

    let stored = eventually(|| {
        let persistence = Arc::clone(&persistence);
        async move { persistence.inner.record("s-idle").await.is_some() }
    })
    .await;
    assert!(stored);
    assert_eq!(persistence.attempts(), 2);

    let record = persistence.inner.record("s-idle").await.unwrap();
    assert_eq!(record.values["cmi.location"].value, "page-6");
    // the exhausted attempt was still reported once
    assert_eq!(session.get_last_error(), "391");
}

/// A Commit the queue refuses does not use up a sequence number
#[tokio::test]
async fn test_refused_commit_keeps_seq_contiguous() {
    let persistence = Arc::new(GatedPersistence::closed());
    let mut config = fast_pipeline(1);
    config.queue_capacity = 1;
    let engine = RteEngine::new(persistence.clone(), config);

    let mut session = engine.launch(request("s-full", "2004")).await.unwrap();
    session.initialize("");

    session.set_value("cmi.location", "a");
    assert_eq!(session.commit(""), "true");
    let waiting = eventually(|| {
        let persistence = Arc::clone(&persistence);
        async move { persistence.entered() == 1 }
    })
    .await;
    assert!(waiting);

    session.set_value("cmi.location", "b");
    assert_eq!(session.commit(""), "true");
    session.set_value("cmi.location", "c");
    assert_eq!(session.commit(""), "false");
    assert_eq!(session.get_last_error(), "391");

    persistence.gate.add_permits(16);
    let drained = eventually(|| {
        let persistence = Arc::clone(&persistence);
        async move { persistence.flushed().len() == 2 }
    })
    .await;
    assert!(drained);

    session.set_value("cmi.location", "d");
    assert_eq!(session.commit(""), "true");
    let drained = eventually(|| {
        let persistence = Arc::clone(&persistence);
        async move { persistence.flushed().len() == 3 }
    })
    .await;
    assert!(drained);

    assert_eq!(session.terminate(""), "true");
    let ack = session.closed().await.unwrap();
    assert_eq!(ack.seq, 4);
    assert_eq!(persistence.flushed(), vec![1, 2, 3, 4]);

    let record = persistence.inner.record("s-full").await.unwrap();
    assert_eq!(record.values["cmi.location"].value, "d");
}

/// Dropping a running session sends one best-effort flush
#[tokio::test]
async fn test_unload_flushes_once() {
    let persistence = Arc::new(FlakyPersistence::new(0));
    let engine = RteEngine::new(persistence.clone(), fast_pipeline(4));

    let mut session = engine.launch(request("s-unload", "2004")).await.unwrap();
    session.initialize("");
    session.set_value("cmi.location", "page-3");
    session.unload();

    let stored = eventually(|| {
        let persistence = Arc::clone(&persistence);
        async move { persistence.inner.record("s-unload").await.is_some() }
    })
    .await;
    assert!(stored);
    let record = persistence.inner.record("s-unload").await.unwrap();
    assert_eq!(record.values["cmi.location"].value, "page-3");
    assert!(record.rollup.is_none());
}

/// A lost unload flush is tolerated: the next launch starts over
#[tokio::test]
async fn test_lost_unload_is_tolerated() {
    let persistence = Arc::new(FlakyPersistence::new(u32::MAX));
    let engine = RteEngine::new(persistence.clone(), fast_pipeline(4));

    let mut session = engine.launch(request("s-lost", "2004")).await.unwrap();
    session.initialize("");
    session.set_value("cmi.location", "page-8");
    drop(session);

    let attempted = eventually(|| {
        let persistence = Arc::clone(&persistence);
        async move { persistence.attempts() >= 1 }
    })
    .await;
    assert!(attempted);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(persistence.attempts(), 1);

    let mut relaunched = engine.launch(request("s-lost", "2004")).await.unwrap();
    relaunched.initialize("");
    assert_eq!(relaunched.get_value("cmi.entry"), "ab-initio");
}

/// Sessions sharing a store never see each other's data
#[tokio::test]
async fn test_concurrent_sessions_are_isolated() {
    let persistence = Arc::new(MemoryPersistence::new());
    let engine = Arc::new(RteEngine::new(persistence.clone(), fast_pipeline(3)));

    let mut handles = Vec::new();
    for n in 0..4 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let id = format!("s-concurrent-{}", n);
            let mut session = engine.launch(request(&id, "2004")).await.unwrap();
            session.initialize("");
            for i in 0..=n {
                session.set_value(&format!("cmi.interactions.{}.id", i), &format!("q{}-{}", n, i));
            }
            session.set_value("cmi.location", &format!("page-{}", n));
            session.commit("");
            session.terminate("");
            session.closed().await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for n in 0..4usize {
        let record = persistence.record(&format!("s-concurrent-{}", n)).await.unwrap();
        assert_eq!(record.values["cmi.location"].value, format!("page-{}", n));
        assert_eq!(record.counts["cmi.interactions"], n + 1);
        assert_eq!(record.interactions.len(), n + 1);
        assert_eq!(
            record.interactions[&0].id.as_deref(),
            Some(format!("q{}-0", n).as_str())
        );
    }
}

/// Sled-backed sessions resume like memory-backed ones
#[tokio::test]
async fn test_sled_backed_resume() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(SledPersistence::open(temp_dir.path().join("sessions.sled")).unwrap());
    let engine = RteEngine::new(store.clone(), fast_pipeline(3));

    let mut session = engine.launch(request("s-sled", "2004")).await.unwrap();
    session.initialize("");
    session.set_value("cmi.suspend_data", "chapter=3");
    session.set_value("cmi.exit", "suspend");
    session.terminate("");
    session.closed().await.unwrap();

    assert_eq!(store.list_sessions().unwrap(), vec!["s-sled".to_string()]);

    let mut resumed = engine.launch(request("s-sled", "2004")).await.unwrap();
    resumed.initialize("");
    assert_eq!(resumed.get_value("cmi.suspend_data"), "chapter=3");
    assert_eq!(resumed.get_value("cmi.entry"), "resume");
}
