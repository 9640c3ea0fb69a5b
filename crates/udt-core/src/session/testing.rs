//! In-memory collaboration server for tests
//!
//! Keeps every version of each session's dataset and answers diff requests
//! with the patch codec, the same way the real server does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::message::{DiffSet, SessionInfo, SessionSummary};
use super::transport::SessionTransport;
use crate::error::{DatasetError, DatasetResult, TransportError, TransportErrorKind};
use crate::models::{Dataset, Sample, Summary, SAMPLES_KEY, SUMMARY_KEY};
use crate::patch::{self, PatchOp};

#[derive(Default)]
pub(crate) struct MemorySessionServer {
    /// Per-session dataset history; index == version
    sessions: Mutex<HashMap<String, Vec<Value>>>,
    calls: AtomicUsize,
    offline: AtomicBool,
    next_id: AtomicUsize,
}

impl MemorySessionServer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Create a session directly, without counting a call
    pub(crate) fn create(&self, dataset: Dataset) -> SessionInfo {
        let id = format!("session{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let doc = serde_json::to_value(&dataset).unwrap();
        self.sessions.lock().unwrap().insert(id.clone(), vec![doc]);
        SessionInfo {
            session_id: id,
            version: 0,
        }
    }

    /// Current summary, without counting a call
    pub(crate) fn summary(&self, session_id: &str) -> SessionSummary {
        let dataset = self.latest(session_id).unwrap();
        SessionSummary {
            summary_version: self.latest_version(session_id).unwrap(),
            summary: dataset.summary(),
            name: dataset.name,
            interface: dataset.interface,
        }
    }

    /// Current dataset, without counting a call
    pub(crate) fn dataset(&self, session_id: &str) -> Dataset {
        self.latest(session_id).unwrap()
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of transport calls served or refused
    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin(&self, endpoint: &str) -> DatasetResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::new(
                TransportErrorKind::Unreachable,
                endpoint,
                "server offline",
            )
            .into());
        }
        Ok(())
    }

    fn history(&self, session_id: &str) -> DatasetResult<Vec<Value>> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| DatasetError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    fn latest(&self, session_id: &str) -> DatasetResult<Dataset> {
        let history = self.history(session_id)?;
        let doc = history.last().cloned().unwrap_or(Value::Null);
        Dataset::from_value(doc)
    }

    fn latest_version(&self, session_id: &str) -> DatasetResult<u64> {
        Ok(self.history(session_id)?.len() as u64 - 1)
    }
}

/// The server-side document diffs are computed over: the dataset plus its summary
///
/// The summary is built from the raw sample list, so a top-level property of
/// an unexpected type does not hide the samples.
fn session_view(doc: &Value) -> Value {
    let samples: Vec<Sample> = doc
        .get(SAMPLES_KEY)
        .and_then(Value::as_array)
        .map(|samples| samples.iter().cloned().filter_map(Sample::from_value).collect())
        .unwrap_or_default();
    let mut view = doc.clone();
    if let Value::Object(map) = &mut view {
        map.insert(SUMMARY_KEY.to_string(), json!(Summary::from_samples(&samples)));
    }
    view
}

#[async_trait]
impl SessionTransport for MemorySessionServer {
    async fn create_session(&self, dataset: &Dataset) -> DatasetResult<SessionInfo> {
        self.begin("create_session")?;
        Ok(self.create(dataset.clone()))
    }

    async fn fetch_summary(&self, session_id: &str) -> DatasetResult<SessionSummary> {
        self.begin("fetch_summary")?;
        self.history(session_id)?;
        Ok(self.summary(session_id))
    }

    async fn fetch_diffs_since(&self, session_id: &str, version: u64) -> DatasetResult<DiffSet> {
        self.begin("fetch_diffs_since")?;
        let history = self.history(session_id)?;
        let latest_version = history.len() as u64 - 1;
        let patch = match (history.get(version as usize), history.last()) {
            (Some(base), Some(latest)) => patch::diff(&session_view(base), &session_view(latest)),
            _ => Vec::new(),
        };
        Ok(DiffSet {
            patch,
            latest_version,
        })
    }

    async fn send_patch(&self, session_id: &str, patch: &[PatchOp]) -> DatasetResult<()> {
        self.begin("send_patch")?;
        let mut sessions = self.sessions.lock().unwrap();
        let history = sessions
            .get_mut(session_id)
            .ok_or_else(|| DatasetError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        let latest = history.last().cloned().unwrap_or(Value::Null);
        let outcome = patch::apply(&latest, patch);
        history.push(outcome.document);
        Ok(())
    }

    async fn fetch_dataset(&self, session_id: &str) -> DatasetResult<Dataset> {
        self.begin("fetch_dataset")?;
        self.latest(session_id)
    }

    async fn fetch_sample_by_index(&self, session_id: &str, index: usize) -> DatasetResult<Sample> {
        self.begin("fetch_sample_by_index")?;
        self.latest(session_id)?
            .samples
            .get(index)
            .cloned()
            .ok_or_else(|| DatasetError::SampleNotFound {
                id: index.to_string(),
            })
    }

    async fn fetch_sample_by_id(&self, session_id: &str, sample_id: &str) -> DatasetResult<Sample> {
        self.begin("fetch_sample_by_id")?;
        let dataset = self.latest(session_id)?;
        dataset
            .samples
            .into_iter()
            .find(|s| s.id() == Some(sample_id))
            .ok_or_else(|| DatasetError::SampleNotFound {
                id: sample_id.to_string(),
            })
    }
}
