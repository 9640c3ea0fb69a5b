//! Collaborative dataset
//!
//! Dataset backend bound to a collaboration server session. Reads of
//! name, interface and summary are served from the local [`Mirror`];
//! sample bodies always round-trip to the server. Writes are sent as JSON
//! patches and show up in the mirror once the [`DiffPoller`] sees the new
//! version.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::mirror::Mirror;
use super::poller::{DiffPoller, PollerState, DEFAULT_POLLING_INTERVAL};
use super::transport::{
    HttpSessionTransport, SessionTransport, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SERVER_URL,
};
use crate::error::{DatasetError, DatasetResult};
use crate::events::{DatasetEvent, EventBus};
use crate::models::{Dataset, Projection, Sample, Summary, SAMPLES_KEY, SUMMARY_KEY};
use crate::patch::{self, pointer, PatchOp};

/// Connection settings for a collaborative dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub server_url: String,
    pub request_timeout: Duration,
    pub polling_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            polling_interval: DEFAULT_POLLING_INTERVAL,
        }
    }
}

impl SessionOptions {
    pub fn validate(&self) -> DatasetResult<()> {
        if self.server_url.trim().is_empty() {
            return Err(DatasetError::Validation(
                "collaboration server URL is required".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(DatasetError::Validation(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        if self.polling_interval.is_zero() {
            return Err(DatasetError::Validation(
                "polling interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Dataset stored in a collaboration server session
pub struct CollaborativeDataset {
    transport: Arc<dyn SessionTransport>,
    mirror: Arc<Mirror>,
    events: EventBus,
    polling_interval: Duration,
    session_id: Option<String>,
    poller: Option<DiffPoller>,
}

impl CollaborativeDataset {
    /// Create a dataset talking HTTP to the configured server
    ///
    /// No session exists until [`set_dataset`](Self::set_dataset) or
    /// [`join_session`](Self::join_session) is called.
    pub fn new(options: &SessionOptions) -> DatasetResult<Self> {
        options.validate()?;
        let transport = HttpSessionTransport::new(&options.server_url, options.request_timeout)?;
        Ok(Self::with_transport(
            Arc::new(transport),
            options.polling_interval,
        ))
    }

    /// Create a dataset over any transport
    pub fn with_transport(transport: Arc<dyn SessionTransport>, polling_interval: Duration) -> Self {
        Self {
            transport,
            mirror: Arc::new(Mirror::new()),
            events: EventBus::new(),
            polling_interval,
            session_id: None,
            poller: None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Last version merged into the mirror
    pub fn version(&self) -> Option<u64> {
        self.mirror.version()
    }

    /// Current mirror projection without fetching
    pub fn projection(&self) -> Option<Arc<Projection>> {
        self.mirror.get()
    }

    pub fn poller_state(&self) -> PollerState {
        self.poller
            .as_ref()
            .map(DiffPoller::state)
            .unwrap_or(PollerState::Stopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DatasetEvent> {
        self.events.subscribe()
    }

    pub fn is_writable(&self) -> bool {
        true
    }

    /// Start a new session seeded with `dataset`
    ///
    /// Any previous session is left and its poller stopped.
    pub async fn create_session(&mut self, dataset: &Dataset) -> DatasetResult<String> {
        let mut dataset = dataset.clone();
        dataset.assign_sample_ids();

        let info = self.transport.create_session(&dataset).await?;
        info!(
            "Created collaborative session {} at version {}",
            info.session_id, info.version
        );

        self.stop_poller().await;
        self.mirror.clear();
        self.mirror.set_version(info.version);
        self.session_id = Some(info.session_id.clone());
        self.start_poller(&info.session_id);

        self.load_projection().await?;
        Ok(info.session_id)
    }

    /// Join an existing session
    ///
    /// Fails with `SessionNotFound` if the server does not know the id; the
    /// dataset is then left without a session.
    pub async fn join_session(&mut self, session_id: &str) -> DatasetResult<()> {
        self.stop_poller().await;
        self.mirror.clear();
        self.session_id = Some(session_id.to_string());

        if let Err(e) = self.load_projection().await {
            self.session_id = None;
            return Err(e);
        }

        info!("Joined collaborative session {}", session_id);
        self.start_poller(session_id);
        Ok(())
    }

    /// Stop background polling
    pub async fn close(&mut self) {
        self.stop_poller().await;
    }

    /// True iff a session exists and the mirror holds a summary
    pub async fn is_ready(&self) -> bool {
        self.session_id.is_some() && self.mirror.is_initialized()
    }

    /// Summary from the mirror, fetched on first use
    pub async fn get_summary(&self) -> DatasetResult<Summary> {
        Ok(self.current_projection().await?.summary.clone())
    }

    pub async fn get_dataset_property(&self, key: &str) -> DatasetResult<Option<Value>> {
        Ok(self.current_projection().await?.property(key))
    }

    /// Write a top-level property
    ///
    /// The mirror is updated before the request is sent and is not rolled
    /// back if the request fails.
    pub async fn set_dataset_property(&self, key: &str, value: Value) -> DatasetResult<()> {
        let session_id = self.require_session()?;
        if key == SAMPLES_KEY || key == SUMMARY_KEY {
            return Err(DatasetError::InvalidProperty {
                key: key.to_string(),
            });
        }

        let exists = self.current_projection().await?.property(key).is_some();
        self.mirror
            .update(|projection| projection.with_property(key, value.clone()))?;

        let path = pointer([key]);
        let op = if exists {
            PatchOp::replace(path, value)
        } else {
            PatchOp::add(path, value)
        };
        self.transport.send_patch(session_id, &[op]).await?;

        self.events.emit(DatasetEvent::DatasetPropertyChanged {
            key: key.to_string(),
        });
        Ok(())
    }

    /// Fetch a sample by position
    pub async fn get_sample_by_index(&self, index: usize) -> DatasetResult<Sample> {
        let session_id = self.require_session()?;
        self.transport.fetch_sample_by_index(session_id, index).await
    }

    /// Fetch a sample by `_id`
    pub async fn get_sample(&self, sample_id: &str) -> DatasetResult<Sample> {
        let session_id = self.require_session()?;
        self.transport.fetch_sample_by_id(session_id, sample_id).await
    }

    /// Replace a sample
    ///
    /// Resolves once the server accepted the patch; the summary catches up
    /// on a later poll.
    pub async fn set_sample(&self, sample_id: &str, sample: Sample) -> DatasetResult<()> {
        let session_id = self.require_session()?;
        let index = self
            .current_projection()
            .await?
            .summary
            .position(sample_id)
            .ok_or_else(|| DatasetError::SampleNotFound {
                id: sample_id.to_string(),
            })?;

        let mut sample = sample;
        if sample.id().is_none() {
            sample.set_id(sample_id);
        }

        let op = PatchOp::replace(
            pointer([SAMPLES_KEY, index.to_string().as_str()]),
            sample.into_value(),
        );
        self.transport.send_patch(session_id, &[op]).await
    }

    /// Append samples, returning their ids
    ///
    /// Positions are taken from the mirror's summary length; a concurrent
    /// append by another writer since the last poll lands on the same
    /// indices.
    pub async fn add_samples(&self, samples: Vec<Sample>) -> DatasetResult<Vec<String>> {
        let session_id = self.require_session()?;
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        let start = self.current_projection().await?.summary.len();

        let mut ids = Vec::with_capacity(samples.len());
        let ops: Vec<PatchOp> = samples
            .into_iter()
            .enumerate()
            .map(|(offset, mut sample)| {
                ids.push(sample.ensure_id());
                PatchOp::add(
                    pointer([SAMPLES_KEY, (start + offset).to_string().as_str()]),
                    sample.into_value(),
                )
            })
            .collect();

        debug!("Adding {} sample(s) at index {}", ops.len(), start);
        self.transport.send_patch(session_id, &ops).await?;
        Ok(ids)
    }

    /// Remove samples by id, returning how many were found
    pub async fn remove_samples(&self, sample_ids: &[String]) -> DatasetResult<usize> {
        let session_id = self.require_session()?;
        let projection = self.current_projection().await?;

        // highest index first so earlier removals do not shift later ones
        let ops: Vec<PatchOp> = projection
            .summary
            .samples
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, entry)| sample_ids.contains(&entry.id))
            .map(|(index, _)| PatchOp::remove(pointer([SAMPLES_KEY, index.to_string().as_str()])))
            .collect();

        if ops.is_empty() {
            return Ok(0);
        }
        self.transport.send_patch(session_id, &ops).await?;
        Ok(ops.len())
    }

    /// Replace the whole dataset
    ///
    /// Without a session this creates one. Otherwise the latest remote
    /// dataset is downloaded, diffed against `dataset` and the difference
    /// sent as one patch.
    pub async fn set_dataset(&mut self, dataset: Dataset) -> DatasetResult<()> {
        let Some(session_id) = self.session_id.clone() else {
            self.create_session(&dataset).await?;
            self.events.emit(DatasetEvent::DatasetReloaded);
            return Ok(());
        };

        let mut dataset = dataset;
        dataset.assign_sample_ids();

        let latest = self.transport.fetch_dataset(&session_id).await?;
        let patch = patch::diff(&latest.to_value()?, &dataset.to_value()?);
        if patch.is_empty() {
            debug!("Dataset unchanged, nothing to send");
            return Ok(());
        }

        debug!("Sending {} op(s) to session {}", patch.len(), session_id);
        self.transport.send_patch(&session_id, &patch).await
    }

    /// Download the full dataset
    ///
    /// Always a full transfer; prefer the summary and per-sample reads.
    pub async fn get_dataset(&self) -> DatasetResult<Dataset> {
        let session_id = self.require_session()?;
        self.transport.fetch_dataset(session_id).await
    }

    fn require_session(&self) -> DatasetResult<&str> {
        self.session_id.as_deref().ok_or(DatasetError::NoSession)
    }

    /// Mirror projection, fetching the session summary if absent
    async fn current_projection(&self) -> DatasetResult<Arc<Projection>> {
        if let Some(projection) = self.mirror.get() {
            return Ok(projection);
        }
        self.load_projection().await
    }

    async fn load_projection(&self) -> DatasetResult<Arc<Projection>> {
        let session_id = self.require_session()?;
        let summary = self.transport.fetch_summary(session_id).await?;
        let version = summary.summary_version;
        let projection = Arc::new(summary.into_projection());
        self.mirror.set(Projection::clone(&projection), version);
        Ok(projection)
    }

    fn start_poller(&mut self, session_id: &str) {
        self.poller = Some(DiffPoller::spawn(
            session_id,
            self.transport.clone(),
            self.mirror.clone(),
            self.events.clone(),
            self.polling_interval,
        ));
    }

    async fn stop_poller(&mut self) {
        if let Some(mut poller) = self.poller.take() {
            poller.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::MemorySessionServer;
    use serde_json::json;

    const INTERVAL: Duration = Duration::from_millis(20);

    fn collaborative(server: &Arc<MemorySessionServer>) -> CollaborativeDataset {
        CollaborativeDataset::with_transport(server.clone(), INTERVAL)
    }

    fn sample(value: Value) -> Sample {
        Sample::from_value(value).unwrap()
    }

    fn image_dataset(urls: &[&str]) -> Dataset {
        serde_json::from_value(json!({
            "interface": {"type": "image_classification"},
            "samples": urls.iter().map(|u| json!({"imageUrl": u})).collect::<Vec<_>>()
        }))
        .unwrap()
    }

    /// Wait for summary-changed events until `check` holds on the summary
    async fn settle<F>(
        ds: &CollaborativeDataset,
        rx: &mut broadcast::Receiver<DatasetEvent>,
        check: F,
    ) -> Summary
    where
        F: Fn(&Summary) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let summary = ds.get_summary().await.unwrap();
                if check(&summary) {
                    return summary;
                }
                let _ = rx.recv().await;
            }
        })
        .await
        .expect("summary did not converge")
    }

    #[test]
    fn test_session_options_validation() {
        assert!(SessionOptions::default().validate().is_ok());

        let options = SessionOptions {
            polling_interval: Duration::ZERO,
            ..SessionOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(DatasetError::Validation(_))
        ));

        let options = SessionOptions {
            server_url: "  ".to_string(),
            ..SessionOptions::default()
        };
        assert!(matches!(
            CollaborativeDataset::new(&options),
            Err(DatasetError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_operations_require_session() {
        let server = Arc::new(MemorySessionServer::new());
        let ds = collaborative(&server);

        assert!(!ds.is_ready().await);
        assert!(matches!(ds.get_summary().await, Err(DatasetError::NoSession)));
        assert!(matches!(
            ds.add_samples(vec![Sample::new()]).await,
            Err(DatasetError::NoSession)
        ));
        assert!(matches!(ds.get_dataset().await, Err(DatasetError::NoSession)));
        assert_eq!(ds.poller_state(), PollerState::Stopped);
    }

    #[tokio::test]
    async fn test_basic_annotation_flow() {
        let server = Arc::new(MemorySessionServer::new());
        let mut ds = collaborative(&server);
        let mut rx = ds.subscribe();

        ds.set_dataset(image_dataset(&[])).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), DatasetEvent::DatasetReloaded);
        assert!(ds.is_ready().await);

        let iface = ds.get_dataset_property("interface").await.unwrap().unwrap();
        assert_eq!(iface["type"], "image_classification");

        // add two samples
        ds.add_samples(vec![
            sample(json!({"imageUrl": "https://example.com/image1.png"})),
            sample(json!({"imageUrl": "https://example.com/image2.png"})),
        ])
        .await
        .unwrap();
        let summary = settle(&ds, &mut rx, |s| s.len() == 2).await;
        assert!(summary.samples.iter().all(|s| !s.has_annotation));
        assert!(!summary.samples[0].id.is_empty());

        // annotate the first one
        let first = summary.samples[0].id.clone();
        let mut annotated = ds.get_sample(&first).await.unwrap();
        annotated.insert("annotation", json!("bat"));
        ds.set_sample(&first, annotated).await.unwrap();
        settle(&ds, &mut rx, |s| s.samples[0].has_annotation).await;
        assert!(ds.get_sample(&first).await.unwrap().has_annotation());

        // remove it
        assert_eq!(ds.remove_samples(&[first.clone()]).await.unwrap(), 1);
        let summary = settle(&ds, &mut rx, |s| s.len() == 1).await;
        assert!(!summary.contains(&first));

        let full = ds.get_dataset().await.unwrap();
        assert_eq!(full.interface["type"], "image_classification");
        assert_eq!(
            full.samples[0].get("imageUrl"),
            Some(&json!("https://example.com/image2.png"))
        );

        // bulk replace through set_dataset
        let mut next = full.clone();
        next.samples
            .push(sample(json!({"imageUrl": "https://example.com/image3.png"})));
        ds.set_dataset(next).await.unwrap();
        let summary = settle(&ds, &mut rx, |s| s.len() == 2).await;
        assert_eq!(summary.len(), server.dataset(ds.session_id().unwrap()).samples.len());

        ds.close().await;
        assert_eq!(ds.poller_state(), PollerState::Stopped);
    }

    #[tokio::test]
    async fn test_set_dataset_property_is_optimistic() {
        let server = Arc::new(MemorySessionServer::new());
        let mut ds = collaborative(&server);
        let mut rx = ds.subscribe();
        ds.set_dataset(image_dataset(&["a"])).await.unwrap();

        ds.set_dataset_property("name", json!("birds")).await.unwrap();
        assert_eq!(
            ds.get_dataset_property("name").await.unwrap(),
            Some(json!("birds"))
        );
        let session_id = ds.session_id().unwrap().to_string();
        assert_eq!(server.dataset(&session_id).name.as_deref(), Some("birds"));

        let mut saw_property_event = false;
        while let Ok(event) = rx.try_recv() {
            if event
                == (DatasetEvent::DatasetPropertyChanged {
                    key: "name".to_string(),
                })
            {
                saw_property_event = true;
            }
        }
        assert!(saw_property_event);

        // a failed write keeps the optimistic value
        server.set_offline(true);
        let err = ds
            .set_dataset_property("name", json!("offline"))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(
            ds.get_dataset_property("name").await.unwrap(),
            Some(json!("offline"))
        );

        server.set_offline(false);
        assert!(matches!(
            ds.set_dataset_property("samples", json!([])).await,
            Err(DatasetError::InvalidProperty { .. })
        ));
        ds.close().await;
    }

    #[tokio::test]
    async fn test_set_unknown_sample_fails() {
        let server = Arc::new(MemorySessionServer::new());
        let mut ds = collaborative(&server);
        ds.set_dataset(image_dataset(&["a"])).await.unwrap();

        let err = ds.set_sample("missing", Sample::new()).await.unwrap_err();
        assert!(matches!(err, DatasetError::SampleNotFound { .. }));
        assert_eq!(ds.remove_samples(&["missing".to_string()]).await.unwrap(), 0);
        ds.close().await;
    }

    #[tokio::test]
    async fn test_join_unknown_session() {
        let server = Arc::new(MemorySessionServer::new());
        let mut ds = collaborative(&server);

        let err = ds.join_session("nope").await.unwrap_err();
        assert!(matches!(err, DatasetError::SessionNotFound { .. }));
        assert!(ds.session_id().is_none());
        assert_eq!(ds.poller_state(), PollerState::Stopped);
    }

    #[tokio::test]
    async fn test_two_clients_converge() {
        let server = Arc::new(MemorySessionServer::new());
        let mut a = collaborative(&server);
        a.set_dataset(image_dataset(&["http://example.com/image1.png"]))
            .await
            .unwrap();
        let session_id = a.session_id().unwrap().to_string();

        let mut b = collaborative(&server);
        b.join_session(&session_id).await.unwrap();
        let sample = b.get_sample_by_index(0).await.unwrap();
        assert_eq!(
            sample.get("imageUrl"),
            Some(&json!("http://example.com/image1.png"))
        );

        // a writes, b observes
        let mut rx_b = b.subscribe();
        let id = sample.id().unwrap().to_string();
        let mut annotated = sample.clone();
        annotated.insert("annotation", json!({"label": "cat"}));
        a.set_sample(&id, annotated.clone()).await.unwrap();
        settle(&b, &mut rx_b, |s| s.samples[0].has_annotation).await;
        assert_eq!(b.get_sample_by_index(0).await.unwrap(), annotated);

        // b writes, a observes
        let mut rx_a = a.subscribe();
        b.add_samples(vec![sample_from_b()]).await.unwrap();
        settle(&a, &mut rx_a, |s| s.len() == 2).await;
        assert_eq!(
            a.get_sample_by_index(1).await.unwrap(),
            b.get_sample_by_index(1).await.unwrap()
        );

        a.close().await;
        b.close().await;
    }

    fn sample_from_b() -> Sample {
        sample(json!({"_id": "from-b", "imageUrl": "http://example.com/b.png"}))
    }
}
