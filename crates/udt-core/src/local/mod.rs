//! Local dataset backend
//!
//! Keeps the entire dataset as one JSON blob in a [`BlobStore`]. Every
//! operation reads the blob, and every write replaces it. There is no
//! server and nothing to poll, so the backend is always ready.

mod store;

pub use store::{BlobStore, FileBlobStore, MemoryBlobStore};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{DatasetError, DatasetResult};
use crate::events::{DatasetEvent, EventBus};
use crate::models::{Dataset, Sample, Summary, SAMPLES_KEY, SUMMARY_KEY};

/// Name given to a dataset created from nothing
pub const DEFAULT_DATASET_NAME: &str = "New Dataset";

/// Dataset persisted as a single blob
pub struct LocalDataset {
    store: Box<dyn BlobStore>,
    events: EventBus,
}

impl LocalDataset {
    pub fn new(store: impl BlobStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            events: EventBus::new(),
        }
    }

    /// Local dataset kept only in memory
    pub fn in_memory() -> Self {
        Self::new(MemoryBlobStore::new())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DatasetEvent> {
        self.events.subscribe()
    }

    pub fn is_writable(&self) -> bool {
        true
    }

    pub async fn is_ready(&self) -> bool {
        true
    }

    pub async fn get_summary(&self) -> DatasetResult<Summary> {
        Ok(self.load()?.summary())
    }

    pub async fn get_dataset_property(&self, key: &str) -> DatasetResult<Option<Value>> {
        let dataset = self.load()?;
        if key == SUMMARY_KEY {
            return Ok(serde_json::to_value(dataset.summary()).ok());
        }
        Ok(dataset.property(key))
    }

    /// Write a top-level property
    ///
    /// An object value is merged into an existing object; anything else
    /// replaces the old value.
    pub async fn set_dataset_property(&mut self, key: &str, value: Value) -> DatasetResult<()> {
        if key == SUMMARY_KEY {
            return Err(DatasetError::InvalidProperty {
                key: key.to_string(),
            });
        }

        let mut doc = self.load()?.to_value()?;
        if let Value::Object(map) = &mut doc {
            match map.get_mut(key) {
                Some(existing) => merge_value(existing, value),
                None => {
                    map.insert(key.to_string(), value);
                }
            }
        }
        let mut dataset = Dataset::from_value(doc)?;
        if key == SAMPLES_KEY {
            dataset.assign_sample_ids();
        }
        self.save(&dataset)?;

        self.events.emit(DatasetEvent::DatasetPropertyChanged {
            key: key.to_string(),
        });
        if key == SAMPLES_KEY {
            self.events.emit(DatasetEvent::SummaryChanged);
        }
        Ok(())
    }

    pub async fn get_sample_by_index(&self, index: usize) -> DatasetResult<Sample> {
        self.load()?
            .samples
            .get(index)
            .cloned()
            .ok_or_else(|| DatasetError::SampleNotFound {
                id: index.to_string(),
            })
    }

    pub async fn get_sample(&self, sample_id: &str) -> DatasetResult<Sample> {
        let dataset = self.load()?;
        dataset
            .position(sample_id)
            .map(|index| dataset.samples[index].clone())
            .ok_or_else(|| DatasetError::SampleNotFound {
                id: sample_id.to_string(),
            })
    }

    /// Replace the sample with this id, appending it if there is none
    pub async fn set_sample(&mut self, sample_id: &str, sample: Sample) -> DatasetResult<()> {
        let mut dataset = self.load()?;
        let mut sample = sample;
        if sample.id().is_none() {
            sample.set_id(sample_id);
        }

        match dataset.position(sample_id) {
            Some(index) => dataset.samples[index] = sample,
            None => {
                debug!("Sample {} not found, appending", sample_id);
                dataset.samples.push(sample);
            }
        }
        self.save(&dataset)?;
        self.events.emit(DatasetEvent::SummaryChanged);
        Ok(())
    }

    pub async fn add_samples(&mut self, samples: Vec<Sample>) -> DatasetResult<Vec<String>> {
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        let mut dataset = self.load()?;
        let ids = samples
            .into_iter()
            .map(|mut sample| {
                let id = sample.ensure_id();
                dataset.samples.push(sample);
                id
            })
            .collect();
        self.save(&dataset)?;
        self.events.emit(DatasetEvent::SummaryChanged);
        Ok(ids)
    }

    pub async fn remove_samples(&mut self, sample_ids: &[String]) -> DatasetResult<usize> {
        let mut dataset = self.load()?;
        let before = dataset.samples.len();
        dataset
            .samples
            .retain(|s| !s.id().is_some_and(|id| sample_ids.iter().any(|r| r == id)));

        let removed = before - dataset.samples.len();
        if removed > 0 {
            self.save(&dataset)?;
            self.events.emit(DatasetEvent::SummaryChanged);
        }
        Ok(removed)
    }

    /// Replace the stored dataset
    pub async fn set_dataset(&mut self, dataset: Dataset) -> DatasetResult<()> {
        let mut dataset = dataset;
        if dataset.name.is_none() {
            dataset.name = Some(DEFAULT_DATASET_NAME.to_string());
        }
        dataset.assign_sample_ids();
        self.save(&dataset)?;
        self.events.emit(DatasetEvent::DatasetReloaded);
        Ok(())
    }

    pub async fn get_dataset(&self) -> DatasetResult<Dataset> {
        self.load()
    }

    fn load(&self) -> DatasetResult<Dataset> {
        match self.store.get()? {
            Some(content) => Ok(serde_json::from_str(&content)?),
            None => Ok(Dataset::named(DEFAULT_DATASET_NAME)),
        }
    }

    fn save(&self, dataset: &Dataset) -> DatasetResult<()> {
        let content = serde_json::to_string(dataset)?;
        self.store.set(&content)
    }
}

/// Merge `value` into `target`, recursing through objects on both sides
fn merge_value(target: &mut Value, value: Value) {
    match (target, value) {
        (Value::Object(target), Value::Object(value)) => {
            for (key, value) in value {
                match target.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, value) => *target = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample(value: Value) -> Sample {
        Sample::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_starts_with_default_dataset() {
        let ds = LocalDataset::in_memory();
        assert!(ds.is_ready().await);

        let dataset = ds.get_dataset().await.unwrap();
        assert_eq!(dataset.name.as_deref(), Some(DEFAULT_DATASET_NAME));
        assert_eq!(dataset.interface, json!({}));
        assert!(ds.get_summary().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sample_lifecycle() {
        let mut ds = LocalDataset::in_memory();
        let mut rx = ds.subscribe();

        let ids = ds
            .add_samples(vec![
                sample(json!({"imageUrl": "https://example.com/image1.png"})),
                sample(json!({"imageUrl": "https://example.com/image2.png"})),
            ])
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), DatasetEvent::SummaryChanged);

        let summary = ds.get_summary().await.unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary.annotated_count(), 0);

        let mut annotated = ds.get_sample(&ids[0]).await.unwrap();
        annotated.insert("annotation", json!("bat"));
        ds.set_sample(&ids[0], annotated).await.unwrap();
        assert!(ds.get_summary().await.unwrap().samples[0].has_annotation);

        assert_eq!(ds.remove_samples(&[ids[0].clone()]).await.unwrap(), 1);
        assert_eq!(ds.remove_samples(&["missing".to_string()]).await.unwrap(), 0);
        let remaining = ds.get_sample_by_index(0).await.unwrap();
        assert_eq!(remaining.id(), Some(ids[1].as_str()));
        assert!(matches!(
            ds.get_sample_by_index(1).await,
            Err(DatasetError::SampleNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_sample_appends_unknown_id() {
        let mut ds = LocalDataset::in_memory();
        ds.set_sample("fresh", sample(json!({"imageUrl": "x"})))
            .await
            .unwrap();

        let stored = ds.get_sample("fresh").await.unwrap();
        assert_eq!(stored.get("imageUrl"), Some(&json!("x")));
        assert_eq!(ds.get_summary().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_property_merge() {
        let mut ds = LocalDataset::in_memory();
        ds.set_dataset_property("interface", json!({"type": "image_classification"}))
            .await
            .unwrap();
        ds.set_dataset_property("interface", json!({"labels": ["cat", "dog"]}))
            .await
            .unwrap();

        assert_eq!(
            ds.get_dataset_property("interface").await.unwrap(),
            Some(json!({"type": "image_classification", "labels": ["cat", "dog"]}))
        );

        // non-objects replace
        ds.set_dataset_property("name", json!("birds")).await.unwrap();
        assert_eq!(
            ds.get_dataset_property("name").await.unwrap(),
            Some(json!("birds"))
        );

        assert!(matches!(
            ds.set_dataset_property("summary", json!({})).await,
            Err(DatasetError::InvalidProperty { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_samples_property_assigns_ids() {
        let mut ds = LocalDataset::in_memory();
        let mut rx = ds.subscribe();
        ds.set_dataset_property("samples", json!([{"imageUrl": "a"}, {"imageUrl": "b"}]))
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            DatasetEvent::DatasetPropertyChanged {
                key: "samples".to_string()
            }
        );
        assert_eq!(rx.recv().await.unwrap(), DatasetEvent::SummaryChanged);

        let dataset = ds.get_dataset().await.unwrap();
        assert!(dataset.samples.iter().all(|s| s.id().is_some()));
    }

    #[tokio::test]
    async fn test_set_dataset_dedupes_ids() {
        let mut ds = LocalDataset::in_memory();
        let mut rx = ds.subscribe();

        let dataset: Dataset = serde_json::from_value(json!({
            "samples": [{"_id": "a"}, {"_id": "a"}, {}]
        }))
        .unwrap();
        ds.set_dataset(dataset).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), DatasetEvent::DatasetReloaded);

        let stored = ds.get_dataset().await.unwrap();
        assert_eq!(stored.name.as_deref(), Some(DEFAULT_DATASET_NAME));
        let mut ids: Vec<_> = stored.samples.iter().filter_map(Sample::id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn test_file_backed_dataset_persists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dataset.json");

        let mut ds = LocalDataset::new(FileBlobStore::new(&path));
        ds.set_dataset(Dataset::named("birds")).await.unwrap();
        ds.add_samples(vec![sample(json!({"_id": "a"}))])
            .await
            .unwrap();
        drop(ds);

        let reopened = LocalDataset::new(FileBlobStore::new(&path));
        let dataset = reopened.get_dataset().await.unwrap();
        assert_eq!(dataset.name.as_deref(), Some("birds"));
        assert_eq!(dataset.samples.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_an_error() {
        let store = MemoryBlobStore::new();
        store.set("not json").unwrap();
        let ds = LocalDataset::new(store);
        assert!(matches!(
            ds.get_summary().await,
            Err(DatasetError::Json(_))
        ));
    }
}
