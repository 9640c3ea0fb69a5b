//! Data models for datasets, samples and summaries
//!
//! These types are the wire and storage representation of the UDT format.
//! Samples are kept as opaque JSON objects; only `_id` and `annotation`
//! have meaning here.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{DatasetError, DatasetResult};

/// Top-level key holding the sample list
pub const SAMPLES_KEY: &str = "samples";

/// Top-level key holding the derived summary in a mirror projection
pub const SUMMARY_KEY: &str = "summary";

/// Generate a fresh sample id (`s` followed by 8 random hex chars)
pub fn new_sample_id() -> String {
    format!("s{}", &Uuid::new_v4().simple().to_string()[..8])
}

/// A single sample: an arbitrary JSON object identified by `_id`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sample(Map<String, Value>);

impl Sample {
    /// Create an empty sample without an id
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value, returning `None` unless it is an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// The sample's `_id`, if it has a string one
    pub fn id(&self) -> Option<&str> {
        self.0.get("_id").and_then(Value::as_str)
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.0.insert("_id".to_string(), Value::String(id.into()));
    }

    /// Assign a generated id if the sample has none, returning the id
    pub fn ensure_id(&mut self) -> String {
        if let Some(id) = self.id() {
            return id.to_string();
        }
        let id = new_sample_id();
        self.set_id(id.clone());
        id
    }

    pub fn annotation(&self) -> Option<&Value> {
        self.0.get("annotation")
    }

    /// True iff `annotation` is present and non-empty
    ///
    /// Null, `false`, empty strings, empty arrays and empty objects all count
    /// as "no annotation".
    pub fn has_annotation(&self) -> bool {
        match self.annotation() {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
            Some(Value::Number(_)) => true,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Sample {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A full dataset: name, interface and the ordered sample list
///
/// Unknown top-level keys are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "empty_object")]
    pub interface: Value,
    #[serde(default)]
    pub samples: Vec<Sample>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Dataset {
    fn default() -> Self {
        Self {
            name: None,
            interface: empty_object(),
            samples: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl Dataset {
    /// Create an empty dataset with the given name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Compute the summary over every sample
    pub fn summary(&self) -> Summary {
        Summary::from_samples(&self.samples)
    }

    /// Give every sample a unique `_id`
    ///
    /// Missing ids are generated; duplicated ids are replaced on the later
    /// occurrence.
    pub fn assign_sample_ids(&mut self) {
        let mut used = HashSet::new();
        for sample in &mut self.samples {
            let mut id = sample.ensure_id();
            while used.contains(&id) {
                id = new_sample_id();
                sample.set_id(id.clone());
            }
            used.insert(id);
        }
    }

    /// Position of the sample with the given id
    pub fn position(&self, id: &str) -> Option<usize> {
        self.samples.iter().position(|s| s.id() == Some(id))
    }

    /// Read a top-level property as JSON
    pub fn property(&self, key: &str) -> Option<Value> {
        match key {
            "name" => self.name.clone().map(Value::String),
            "interface" => Some(self.interface.clone()),
            SAMPLES_KEY => serde_json::to_value(&self.samples).ok(),
            _ => self.extra.get(key).cloned(),
        }
    }

    pub fn to_value(&self) -> DatasetResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: Value) -> DatasetResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Per-sample entry of a summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "hasAnnotation")]
    pub has_annotation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brush: Option<Value>,
}

impl SummaryEntry {
    pub fn from_sample(sample: &Sample) -> Self {
        Self {
            id: sample.id().unwrap_or_default().to_string(),
            has_annotation: sample.has_annotation(),
            brush: sample.get("brush").cloned(),
        }
    }
}

/// Lightweight projection of a dataset's annotation state
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub samples: Vec<SummaryEntry>,
}

impl Summary {
    pub fn from_samples(samples: &[Sample]) -> Self {
        Self {
            samples: samples.iter().map(SummaryEntry::from_sample).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Index of the sample with the given id
    pub fn position(&self, id: &str) -> Option<usize> {
        self.samples.iter().position(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn annotated_count(&self) -> usize {
        self.samples.iter().filter(|s| s.has_annotation).count()
    }
}

/// The `{summary, name, interface}` view of a dataset held by a mirror
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    #[serde(default)]
    pub summary: Summary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "empty_object")]
    pub interface: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            summary: Summary::default(),
            name: None,
            interface: empty_object(),
            extra: Map::new(),
        }
    }
}

impl Projection {
    /// Project a full dataset, dropping sample bodies
    pub fn from_dataset(dataset: &Dataset) -> Self {
        Self {
            summary: dataset.summary(),
            name: dataset.name.clone(),
            interface: dataset.interface.clone(),
            extra: dataset.extra.clone(),
        }
    }

    /// Read a top-level property as JSON
    pub fn property(&self, key: &str) -> Option<Value> {
        match key {
            SUMMARY_KEY => serde_json::to_value(&self.summary).ok(),
            "name" => self.name.clone().map(Value::String),
            "interface" => Some(self.interface.clone()),
            _ => self.extra.get(key).cloned(),
        }
    }

    /// Return a copy with one top-level property replaced
    pub fn with_property(&self, key: &str, value: Value) -> DatasetResult<Self> {
        if key == SUMMARY_KEY || key == SAMPLES_KEY {
            return Err(DatasetError::InvalidProperty {
                key: key.to_string(),
            });
        }
        let mut doc = self.to_value()?;
        if let Value::Object(map) = &mut doc {
            map.insert(key.to_string(), value);
        }
        Self::from_value(doc)
    }

    pub fn to_value(&self) -> DatasetResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: Value) -> DatasetResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

pub(crate) fn empty_object() -> Value {
    Value::Object(Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(value: Value) -> Sample {
        Sample::from_value(value).unwrap()
    }

    #[test]
    fn test_has_annotation() {
        assert!(!sample(json!({"_id": "a"})).has_annotation());
        assert!(!sample(json!({"annotation": null})).has_annotation());
        assert!(!sample(json!({"annotation": ""})).has_annotation());
        assert!(!sample(json!({"annotation": []})).has_annotation());
        assert!(!sample(json!({"annotation": {}})).has_annotation());
        assert!(!sample(json!({"annotation": false})).has_annotation());
        assert!(sample(json!({"annotation": "bat"})).has_annotation());
        assert!(sample(json!({"annotation": ["cat"]})).has_annotation());
        assert!(sample(json!({"annotation": {"label": "x"}})).has_annotation());
        assert!(sample(json!({"annotation": 3})).has_annotation());
    }

    #[test]
    fn test_new_sample_id_format() {
        let id = new_sample_id();
        assert!(id.starts_with('s'));
        assert_eq!(id.len(), 9);
        assert_ne!(id, new_sample_id());
    }

    #[test]
    fn test_dataset_defaults_from_json() {
        let ds: Dataset = serde_json::from_value(json!({
            "interface": {"type": "image_classification"},
            "samples": [{"imageUrl": "a"}],
            "training": {"epochs": 3}
        }))
        .unwrap();

        assert!(ds.name.is_none());
        assert_eq!(ds.samples.len(), 1);
        assert_eq!(ds.extra["training"], json!({"epochs": 3}));

        let empty: Dataset = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty.interface, json!({}));
        assert!(empty.samples.is_empty());
    }

    #[test]
    fn test_projection_interface_defaults_to_object() {
        let projection = Projection::from_value(json!({"name": "birds"})).unwrap();
        assert_eq!(projection.interface, json!({}));
        assert_eq!(projection.property("interface"), Some(json!({})));
        assert_eq!(Projection::default().interface, json!({}));
    }

    #[test]
    fn test_assign_sample_ids_dedupes() {
        let mut ds = Dataset::default();
        ds.samples = vec![
            sample(json!({"_id": "dup"})),
            sample(json!({"_id": "dup"})),
            sample(json!({"imageUrl": "x"})),
        ];
        ds.assign_sample_ids();

        let ids: HashSet<_> = ds.samples.iter().map(|s| s.id().unwrap()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ds.samples[0].id(), Some("dup"));
    }

    #[test]
    fn test_summary_matches_sample_count() {
        let mut ds = Dataset::named("birds");
        ds.samples = vec![
            sample(json!({"_id": "a", "annotation": "bat"})),
            sample(json!({"_id": "b"})),
        ];

        let summary = ds.summary();
        assert_eq!(summary.len(), ds.samples.len());
        assert_eq!(summary.annotated_count(), 1);
        assert_eq!(summary.position("b"), Some(1));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["samples"][0], json!({"_id": "a", "hasAnnotation": true}));
    }

    #[test]
    fn test_projection_with_property_is_copy() {
        let projection = Projection::from_dataset(&Dataset::named("old"));
        let renamed = projection
            .with_property("name", json!("new"))
            .unwrap();

        assert_eq!(projection.name.as_deref(), Some("old"));
        assert_eq!(renamed.name.as_deref(), Some("new"));

        let custom = renamed.with_property("training", json!({"lr": 1})).unwrap();
        assert_eq!(custom.property("training"), Some(json!({"lr": 1})));

        assert!(matches!(
            projection.with_property("summary", json!({})),
            Err(DatasetError::InvalidProperty { .. })
        ));
    }
}
