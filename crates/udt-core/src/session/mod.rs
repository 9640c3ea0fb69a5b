//! Collaborative sessions
//!
//! A session lives on a collaboration server. This module holds the HTTP
//! transport, the local mirror of the session summary, the background diff
//! poller that keeps it current, and the [`CollaborativeDataset`] facade
//! built from them.

mod dataset;
mod message;
mod mirror;
mod poller;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use dataset::{CollaborativeDataset, SessionOptions};
pub use message::{DiffSet, SessionId, SessionInfo, SessionSummary};
pub use mirror::{without_sample_ops, MergeOutcome, Mirror, MirrorState};
pub use poller::{DiffPoller, PollerState, DEFAULT_POLLING_INTERVAL};
pub use transport::{
    HttpSessionTransport, SessionTransport, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SERVER_URL,
};
