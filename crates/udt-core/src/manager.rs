//! Backend dispatch
//!
//! [`DatasetManager`] wraps one of the three backends and forwards every
//! dataset operation to it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::info;

use crate::cloud::{CloudDataset, DirectoryObjectStore};
use crate::config::Config;
use crate::error::{DatasetError, DatasetResult};
use crate::events::DatasetEvent;
use crate::local::{FileBlobStore, LocalDataset};
use crate::models::{Dataset, Sample, Summary};
use crate::session::CollaborativeDataset;

/// Which backend a manager uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Cloud,
    #[default]
    Collaborative,
    Local,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Cloud => "cloud",
            BackendKind::Collaborative => "collaborative",
            BackendKind::Local => "local",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cloud" => Ok(BackendKind::Cloud),
            "collaborative" => Ok(BackendKind::Collaborative),
            "local" => Ok(BackendKind::Local),
            other => Err(DatasetError::Validation(format!(
                "unknown backend '{}'",
                other
            ))),
        }
    }
}

/// A dataset on any backend
pub enum DatasetManager {
    Cloud(CloudDataset),
    Collaborative(CollaborativeDataset),
    Local(LocalDataset),
}

impl DatasetManager {
    /// Build the backend named by the configuration
    ///
    /// A collaborative manager joins `session_id` when one is configured;
    /// otherwise it has no session until a dataset is set.
    pub async fn open(config: &Config) -> DatasetResult<Self> {
        let manager = match config.backend {
            BackendKind::Cloud => {
                let store = DirectoryObjectStore::new(config.objects_dir());
                let project = config.project.as_deref().unwrap_or_default();
                DatasetManager::Cloud(CloudDataset::new(
                    Arc::new(store),
                    project,
                    config.privacy,
                )?)
            }
            BackendKind::Collaborative => {
                let mut dataset = CollaborativeDataset::new(&config.session_options()?)?;
                if let Some(session_id) = config.session_id.as_deref() {
                    dataset.join_session(session_id).await?;
                }
                DatasetManager::Collaborative(dataset)
            }
            BackendKind::Local => DatasetManager::Local(LocalDataset::new(FileBlobStore::new(
                config.local_dataset_path(),
            ))),
        };

        info!("Opened {} dataset", manager.kind());
        Ok(manager)
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            DatasetManager::Cloud(_) => BackendKind::Cloud,
            DatasetManager::Collaborative(_) => BackendKind::Collaborative,
            DatasetManager::Local(_) => BackendKind::Local,
        }
    }

    /// Session id, for collaborative datasets in a session
    pub fn session_id(&self) -> Option<&str> {
        match self {
            DatasetManager::Collaborative(ds) => ds.session_id(),
            _ => None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DatasetEvent> {
        match self {
            DatasetManager::Cloud(ds) => ds.subscribe(),
            DatasetManager::Collaborative(ds) => ds.subscribe(),
            DatasetManager::Local(ds) => ds.subscribe(),
        }
    }

    pub fn is_writable(&self) -> bool {
        match self {
            DatasetManager::Cloud(ds) => ds.is_writable(),
            DatasetManager::Collaborative(ds) => ds.is_writable(),
            DatasetManager::Local(ds) => ds.is_writable(),
        }
    }

    /// Release background resources
    pub async fn close(&mut self) {
        if let DatasetManager::Collaborative(ds) = self {
            ds.close().await;
        }
    }

    pub async fn is_ready(&self) -> bool {
        match self {
            DatasetManager::Cloud(ds) => ds.is_ready().await,
            DatasetManager::Collaborative(ds) => ds.is_ready().await,
            DatasetManager::Local(ds) => ds.is_ready().await,
        }
    }

    pub async fn get_summary(&self) -> DatasetResult<Summary> {
        match self {
            DatasetManager::Cloud(ds) => ds.get_summary().await,
            DatasetManager::Collaborative(ds) => ds.get_summary().await,
            DatasetManager::Local(ds) => ds.get_summary().await,
        }
    }

    pub async fn get_dataset_property(&self, key: &str) -> DatasetResult<Option<Value>> {
        match self {
            DatasetManager::Cloud(ds) => ds.get_dataset_property(key).await,
            DatasetManager::Collaborative(ds) => ds.get_dataset_property(key).await,
            DatasetManager::Local(ds) => ds.get_dataset_property(key).await,
        }
    }

    pub async fn set_dataset_property(&mut self, key: &str, value: Value) -> DatasetResult<()> {
        match self {
            DatasetManager::Cloud(ds) => ds.set_dataset_property(key, value).await,
            DatasetManager::Collaborative(ds) => ds.set_dataset_property(key, value).await,
            DatasetManager::Local(ds) => ds.set_dataset_property(key, value).await,
        }
    }

    pub async fn get_sample_by_index(&self, index: usize) -> DatasetResult<Sample> {
        match self {
            DatasetManager::Cloud(ds) => ds.get_sample_by_index(index).await,
            DatasetManager::Collaborative(ds) => ds.get_sample_by_index(index).await,
            DatasetManager::Local(ds) => ds.get_sample_by_index(index).await,
        }
    }

    pub async fn get_sample(&self, sample_id: &str) -> DatasetResult<Sample> {
        match self {
            DatasetManager::Cloud(ds) => ds.get_sample(sample_id).await,
            DatasetManager::Collaborative(ds) => ds.get_sample(sample_id).await,
            DatasetManager::Local(ds) => ds.get_sample(sample_id).await,
        }
    }

    pub async fn set_sample(&mut self, sample_id: &str, sample: Sample) -> DatasetResult<()> {
        match self {
            DatasetManager::Cloud(ds) => ds.set_sample(sample_id, sample).await,
            DatasetManager::Collaborative(ds) => ds.set_sample(sample_id, sample).await,
            DatasetManager::Local(ds) => ds.set_sample(sample_id, sample).await,
        }
    }

    pub async fn add_samples(&mut self, samples: Vec<Sample>) -> DatasetResult<Vec<String>> {
        match self {
            DatasetManager::Cloud(ds) => ds.add_samples(samples).await,
            DatasetManager::Collaborative(ds) => ds.add_samples(samples).await,
            DatasetManager::Local(ds) => ds.add_samples(samples).await,
        }
    }

    pub async fn remove_samples(&mut self, sample_ids: &[String]) -> DatasetResult<usize> {
        match self {
            DatasetManager::Cloud(ds) => ds.remove_samples(sample_ids).await,
            DatasetManager::Collaborative(ds) => ds.remove_samples(sample_ids).await,
            DatasetManager::Local(ds) => ds.remove_samples(sample_ids).await,
        }
    }

    pub async fn set_dataset(&mut self, dataset: Dataset) -> DatasetResult<()> {
        match self {
            DatasetManager::Cloud(ds) => ds.set_dataset(dataset).await,
            DatasetManager::Collaborative(ds) => ds.set_dataset(dataset).await,
            DatasetManager::Local(ds) => ds.set_dataset(dataset).await,
        }
    }

    pub async fn get_dataset(&self) -> DatasetResult<Dataset> {
        match self {
            DatasetManager::Cloud(ds) => ds.get_dataset().await,
            DatasetManager::Collaborative(ds) => ds.get_dataset().await,
            DatasetManager::Local(ds) => ds.get_dataset().await,
        }
    }
}

impl From<CloudDataset> for DatasetManager {
    fn from(ds: CloudDataset) -> Self {
        DatasetManager::Cloud(ds)
    }
}

impl From<CollaborativeDataset> for DatasetManager {
    fn from(ds: CollaborativeDataset) -> Self {
        DatasetManager::Collaborative(ds)
    }
}

impl From<LocalDataset> for DatasetManager {
    fn from(ds: LocalDataset) -> Self {
        DatasetManager::Local(ds)
    }
}
