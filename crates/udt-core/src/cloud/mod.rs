//! Cloud dataset backend
//!
//! Stores a dataset as a project inside an [`ObjectStore`]:
//!
//! ```text
//! <privacy>/<project>/index.json            name, interface and other properties
//! <privacy>/<project>/samples/<_id>.json    one object per sample
//! ```
//!
//! Sample order is the store's key order, so it does not follow insertion
//! order. The summary is cached and dropped after every write.

mod store;

pub use store::{DirectoryObjectStore, MemoryObjectStore, ObjectStore};

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{DatasetError, DatasetResult};
use crate::events::{DatasetEvent, EventBus};
use crate::models::{Dataset, Projection, Sample, Summary, SAMPLES_KEY, SUMMARY_KEY};
use crate::session::Mirror;

const INDEX_FILE: &str = "index.json";

/// Access level a project is stored under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataPrivacy {
    #[default]
    Private,
    Protected,
    Public,
}

impl DataPrivacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataPrivacy::Private => "private",
            DataPrivacy::Protected => "protected",
            DataPrivacy::Public => "public",
        }
    }
}

impl fmt::Display for DataPrivacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataPrivacy {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "private" => Ok(DataPrivacy::Private),
            "protected" => Ok(DataPrivacy::Protected),
            "public" => Ok(DataPrivacy::Public),
            other => Err(DatasetError::Validation(format!(
                "unknown privacy level '{}'",
                other
            ))),
        }
    }
}

/// Check that `name` can be used as a project directory
pub fn validate_project_name(name: &str) -> DatasetResult<()> {
    if name.trim().is_empty() {
        return Err(DatasetError::Validation(
            "project name is required".to_string(),
        ));
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(DatasetError::Validation(format!(
            "project name '{}' is not a valid directory name",
            name
        )));
    }
    Ok(())
}

/// Dataset stored as a project in an object store
pub struct CloudDataset {
    store: Arc<dyn ObjectStore>,
    privacy: DataPrivacy,
    project: String,
    cache: Mirror,
    events: EventBus,
}

impl CloudDataset {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        project: &str,
        privacy: DataPrivacy,
    ) -> DatasetResult<Self> {
        validate_project_name(project)?;
        Ok(Self {
            store,
            privacy,
            project: project.to_string(),
            cache: Mirror::new(),
            events: EventBus::new(),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn privacy(&self) -> DataPrivacy {
        self.privacy
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DatasetEvent> {
        self.events.subscribe()
    }

    pub fn is_writable(&self) -> bool {
        true
    }

    /// True iff the store answers a listing
    pub async fn is_ready(&self) -> bool {
        self.store.list(&self.project_prefix()).await.is_ok()
    }

    /// Select another project without touching the store
    pub fn set_project(&mut self, project: &str) -> DatasetResult<()> {
        validate_project_name(project)?;
        self.project = project.to_string();
        self.cache.clear();
        Ok(())
    }

    /// Names of every project at this privacy level
    pub async fn projects(&self) -> DatasetResult<Vec<String>> {
        let prefix = format!("{}/", self.privacy);
        let keys = self.store.list(&prefix).await?;
        let projects: BTreeSet<String> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(prefix.as_str()))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Ok(projects.into_iter().collect())
    }

    /// Delete every object of a project
    pub async fn remove_project(&mut self, project: &str) -> DatasetResult<()> {
        validate_project_name(project)?;
        let keys = self.store.list(&self.prefix_of(project)).await?;
        let removals = keys.iter().map(|key| self.store.remove(key));
        try_join_all(removals).await?;
        info!("Removed project {} ({} objects)", project, keys.len());

        if project == self.project {
            self.cache.clear();
        }
        Ok(())
    }

    /// Summary, loading every sample on a cache miss
    pub async fn get_summary(&self) -> DatasetResult<Summary> {
        Ok(self.projection().await?.summary.clone())
    }

    pub async fn get_dataset_property(&self, key: &str) -> DatasetResult<Option<Value>> {
        if key == SAMPLES_KEY {
            let samples = self.load_samples().await?;
            return Ok(Some(serde_json::to_value(samples)?));
        }
        Ok(self.projection().await?.property(key))
    }

    /// Write a top-level property
    ///
    /// `name` renames the project and `samples` writes each given sample;
    /// anything else goes into the index.
    pub async fn set_dataset_property(&mut self, key: &str, value: Value) -> DatasetResult<()> {
        match key {
            SUMMARY_KEY => {
                return Err(DatasetError::InvalidProperty {
                    key: key.to_string(),
                })
            }
            SAMPLES_KEY => {
                let samples: Vec<Sample> = serde_json::from_value(value)?;
                self.write_samples(samples).await?;
                self.events.emit(DatasetEvent::SummaryChanged);
            }
            "name" => {
                let name = value.as_str().ok_or_else(|| {
                    DatasetError::Validation("dataset name must be a string".to_string())
                })?;
                self.rename_project(name).await?;
            }
            _ => {
                let mut index = self.read_index().await?;
                index.insert(key.to_string(), value);
                self.write_index(&index).await?;
            }
        }

        self.cache.invalidate();
        self.events.emit(DatasetEvent::DatasetPropertyChanged {
            key: key.to_string(),
        });
        Ok(())
    }

    /// Fetch the sample at `index` in key order
    pub async fn get_sample_by_index(&self, index: usize) -> DatasetResult<Sample> {
        let keys = self.store.list(&self.samples_prefix()).await?;
        let key = keys.get(index).ok_or_else(|| DatasetError::SampleNotFound {
            id: index.to_string(),
        })?;
        self.read_sample(key)
            .await?
            .ok_or_else(|| DatasetError::SampleNotFound {
                id: index.to_string(),
            })
    }

    pub async fn get_sample(&self, sample_id: &str) -> DatasetResult<Sample> {
        self.read_sample(&self.sample_key(sample_id))
            .await?
            .ok_or_else(|| DatasetError::SampleNotFound {
                id: sample_id.to_string(),
            })
    }

    /// Replace a sample, storing it under its own `_id`
    pub async fn set_sample(&mut self, sample_id: &str, sample: Sample) -> DatasetResult<()> {
        let mut sample = sample;
        if sample.id().is_none() {
            sample.set_id(sample_id);
        }

        self.store.remove(&self.sample_key(sample_id)).await?;
        self.write_samples(vec![sample]).await?;

        self.cache.invalidate();
        self.events.emit(DatasetEvent::SummaryChanged);
        Ok(())
    }

    pub async fn add_samples(&mut self, samples: Vec<Sample>) -> DatasetResult<Vec<String>> {
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        let ids = self.write_samples(samples).await?;

        self.cache.invalidate();
        self.events.emit(DatasetEvent::SummaryChanged);
        Ok(ids)
    }

    pub async fn remove_samples(&mut self, sample_ids: &[String]) -> DatasetResult<usize> {
        let keys = self.store.list(&self.samples_prefix()).await?;
        let targets: Vec<&String> = keys
            .iter()
            .filter(|key| sample_ids.iter().any(|id| **key == self.sample_key(id)))
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        try_join_all(targets.iter().map(|key| self.store.remove(key))).await?;

        self.cache.invalidate();
        self.events.emit(DatasetEvent::SummaryChanged);
        Ok(targets.len())
    }

    /// Recreate the project from a full dataset
    ///
    /// The dataset's name becomes the project; whatever was stored under
    /// that project before is removed. This rewrites every sample.
    pub async fn set_dataset(&mut self, dataset: Dataset) -> DatasetResult<()> {
        let mut dataset = dataset;
        dataset.assign_sample_ids();

        let project = dataset.name.clone().unwrap_or_else(|| self.project.clone());
        validate_project_name(&project)?;
        self.remove_project(&project).await?;
        self.project = project;
        dataset.name = Some(self.project.clone());

        let samples = std::mem::take(&mut dataset.samples);
        let mut index = match dataset.to_value()? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        index.remove(SAMPLES_KEY);
        self.write_index(&index).await?;
        self.write_samples(samples).await?;

        debug!("Stored dataset as project {}", self.project);
        self.cache.invalidate();
        self.events.emit(DatasetEvent::DatasetReloaded);
        Ok(())
    }

    /// Assemble the full dataset from the index and every sample
    pub async fn get_dataset(&self) -> DatasetResult<Dataset> {
        let mut doc = self.read_index().await?;
        let samples = self.load_samples().await?;
        doc.insert(SAMPLES_KEY.to_string(), serde_json::to_value(samples)?);
        Dataset::from_value(Value::Object(doc))
    }

    async fn projection(&self) -> DatasetResult<Arc<Projection>> {
        if let Some(projection) = self.cache.get() {
            return Ok(projection);
        }

        let mut dataset = self.get_dataset().await?;
        dataset.name = Some(self.project.clone());
        let projection = Projection::from_dataset(&dataset);
        self.cache.set_projection(projection.clone());
        Ok(Arc::new(projection))
    }

    async fn rename_project(&mut self, name: &str) -> DatasetResult<()> {
        validate_project_name(name)?;
        if name == self.project {
            return Ok(());
        }

        let mut dataset = self.get_dataset().await?;
        dataset.name = Some(name.to_string());
        let old = self.project.clone();
        self.remove_project(&old).await?;
        self.set_dataset(dataset).await?;
        info!("Renamed project {} to {}", old, name);
        Ok(())
    }

    async fn load_samples(&self) -> DatasetResult<Vec<Sample>> {
        let keys = self.store.list(&self.samples_prefix()).await?;
        let samples = try_join_all(keys.iter().map(|key| self.read_sample(key))).await?;
        Ok(samples.into_iter().flatten().collect())
    }

    async fn read_sample(&self, key: &str) -> DatasetResult<Option<Sample>> {
        let Some(data) = self.store.get(key).await? else {
            return Ok(None);
        };
        let value: Value = serde_json::from_slice(&data)?;
        Sample::from_value(value).map(Some).ok_or_else(|| {
            DatasetError::Validation(format!("object '{}' is not a JSON object", key))
        })
    }

    /// Write samples concurrently, returning their ids
    async fn write_samples(&self, samples: Vec<Sample>) -> DatasetResult<Vec<String>> {
        let mut ids = Vec::with_capacity(samples.len());
        let mut writes = Vec::with_capacity(samples.len());
        for mut sample in samples {
            let id = sample.ensure_id();
            let key = self.sample_key(&id);
            let data = serde_json::to_vec(&sample)?;
            ids.push(id);
            writes.push(async move { self.store.put(&key, data).await });
        }
        try_join_all(writes).await?;
        Ok(ids)
    }

    async fn read_index(&self) -> DatasetResult<Map<String, Value>> {
        let index = match self.store.get(&self.index_key()).await? {
            Some(data) => serde_json::from_slice(&data)?,
            None => Map::new(),
        };
        Ok(index)
    }

    async fn write_index(&self, index: &Map<String, Value>) -> DatasetResult<()> {
        let data = serde_json::to_vec(index)?;
        self.store.put(&self.index_key(), data).await
    }

    fn prefix_of(&self, project: &str) -> String {
        format!("{}/{}/", self.privacy, project)
    }

    fn project_prefix(&self) -> String {
        self.prefix_of(&self.project)
    }

    fn index_key(&self) -> String {
        format!("{}{}", self.project_prefix(), INDEX_FILE)
    }

    fn samples_prefix(&self) -> String {
        format!("{}{}/", self.project_prefix(), SAMPLES_KEY)
    }

    fn sample_key(&self, sample_id: &str) -> String {
        format!("{}{}.json", self.samples_prefix(), sample_id)
    }
}
