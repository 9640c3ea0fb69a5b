//! Collaboration server message types
//!
//! JSON bodies exchanged with the collaboration server REST API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{Dataset, Projection, Summary};
use crate::patch::PatchOp;

/// Server-assigned session identifier
pub type SessionId = String;

/// Body of `POST /api/session`
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest<'a> {
    pub udt: &'a Dataset,
}

/// Response of `POST /api/session`
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionResponse {
    pub short_id: SessionId,
    pub summary_version: u64,
}

/// A freshly created session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub version: u64,
}

impl From<CreateSessionResponse> for SessionInfo {
    fn from(res: CreateSessionResponse) -> Self {
        Self {
            session_id: res.short_id,
            version: res.summary_version,
        }
    }
}

/// Response of `GET /api/session/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub summary_version: u64,
    #[serde(default)]
    pub summary: Summary,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "crate::models::empty_object")]
    pub interface: Value,
}

impl SessionSummary {
    pub fn into_projection(self) -> Projection {
        Projection {
            summary: self.summary,
            name: self.name,
            interface: self.interface,
            extra: Map::new(),
        }
    }
}

/// Response of `GET /api/session/{id}/diffs?since={version}`
///
/// `latest_version == since` means nothing changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSet {
    #[serde(default)]
    pub patch: Vec<PatchOp>,
    pub latest_version: u64,
}

/// Body of `PATCH /api/session/{id}`
#[derive(Debug, Clone, Serialize)]
pub struct PatchRequest<'a> {
    pub patch: &'a [PatchOp],
}
