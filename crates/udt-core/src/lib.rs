//! UDT Core Library
//!
//! Dataset managers for the Universal Data Tool format. A dataset is a
//! name, an interface description and an ordered list of samples; every
//! backend exposes the same operations over it.
//!
//! # Architecture
//!
//! - **Collaborative**: the dataset lives in a session on a collaboration
//!   server. A local mirror holds the summary and is kept current by a
//!   background diff poller; writes go out as JSON patches.
//! - **Local**: the whole dataset as one JSON blob on disk.
//! - **Cloud**: one object per sample in an object store, grouped into
//!   projects.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let mut manager = DatasetManager::open(&config).await?;
//!
//! manager.set_dataset(dataset).await?;
//! let summary = manager.get_summary().await?;
//! ```
//!
//! # Modules
//!
//! - `manager`: Backend dispatch (main entry point)
//! - `models`: Datasets, samples and summaries
//! - `patch`: JSON Patch diff and apply
//! - `session`: Collaboration server transport, mirror and poller
//! - `local`: Single-blob backend
//! - `cloud`: Object store backend
//! - `events`: Change notifications
//! - `config`: Application configuration

pub mod cloud;
pub mod config;
pub mod error;
pub mod events;
pub mod local;
pub mod manager;
pub mod models;
pub mod patch;
pub mod session;

pub use cloud::{CloudDataset, DataPrivacy, DirectoryObjectStore, MemoryObjectStore, ObjectStore};
pub use config::Config;
pub use error::{DatasetError, DatasetResult, PatchError, TransportError, TransportErrorKind};
pub use events::{DatasetEvent, EventBus};
pub use local::{BlobStore, FileBlobStore, LocalDataset, MemoryBlobStore};
pub use manager::{BackendKind, DatasetManager};
pub use models::{Dataset, Projection, Sample, Summary, SummaryEntry};
pub use patch::PatchOp;
pub use session::{
    CollaborativeDataset, DiffPoller, HttpSessionTransport, Mirror, PollerState, SessionOptions,
    SessionTransport,
};
