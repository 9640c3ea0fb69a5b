//! Session transport
//!
//! Request/response client for the collaboration server. Every call is
//! bounded by the client timeout and fails with a typed error; nothing is
//! retried here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::message::{
    CreateSessionRequest, CreateSessionResponse, DiffSet, PatchRequest, SessionInfo,
    SessionSummary,
};
use crate::error::{DatasetError, DatasetResult, TransportError, TransportErrorKind};
use crate::models::{Dataset, Sample};
use crate::patch::PatchOp;

/// Public collaboration server used when none is configured
pub const DEFAULT_SERVER_URL: &str = "https://collaboration.universaldatatool.com";

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Longest error body kept in a transport error message, in chars
const MAX_ERROR_BODY: usize = 200;

/// Operations offered by a collaboration server
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Create a session seeded with `dataset`
    async fn create_session(&self, dataset: &Dataset) -> DatasetResult<SessionInfo>;

    /// Fetch the summary, name, interface and current version
    async fn fetch_summary(&self, session_id: &str) -> DatasetResult<SessionSummary>;

    /// Fetch the patch from `version` to the latest version
    async fn fetch_diffs_since(&self, session_id: &str, version: u64) -> DatasetResult<DiffSet>;

    /// Submit a patch against the full dataset
    async fn send_patch(&self, session_id: &str, patch: &[PatchOp]) -> DatasetResult<()>;

    /// Download the full dataset
    async fn fetch_dataset(&self, session_id: &str) -> DatasetResult<Dataset>;

    async fn fetch_sample_by_index(&self, session_id: &str, index: usize) -> DatasetResult<Sample>;

    async fn fetch_sample_by_id(&self, session_id: &str, sample_id: &str) -> DatasetResult<Sample>;
}

/// What a 404 from an endpoint means
#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    Server,
    Session(&'a str),
    Sample(&'a str),
}

/// HTTP implementation of [`SessionTransport`]
#[derive(Debug, Clone)]
pub struct HttpSessionTransport {
    base_url: String,
    client: Client,
}

impl HttpSessionTransport {
    /// Create a transport for `server_url` with the given request timeout
    pub fn new(server_url: &str, timeout: Duration) -> DatasetResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("udt-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DatasetError::Validation(format!("failed to build HTTP client: {}", e)))?;
        Self::with_client(server_url, client)
    }

    /// Create a transport around a preconfigured client
    pub fn with_client(server_url: &str, client: Client) -> DatasetResult<Self> {
        Ok(Self {
            base_url: normalize_url(server_url)?,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn sessions_url(&self) -> String {
        format!("{}/api/session", self.base_url)
    }

    fn session_url(&self, session_id: &str) -> String {
        format!("{}/api/session/{}", self.base_url, session_id)
    }

    /// `/api/session/{id}/sample/{sample}` with each segment percent-encoded
    fn sample_url(&self, session_id: &str, sample: &str) -> DatasetResult<String> {
        let invalid = || DatasetError::Validation(format!("invalid server URL '{}'", self.base_url));
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["api", "session", session_id, "sample", sample]);
        Ok(url.to_string())
    }

    /// Send a request and check the status
    async fn execute(
        &self,
        request: RequestBuilder,
        endpoint: &str,
        target: Target<'_>,
    ) -> DatasetResult<Response> {
        debug!("Requesting {}", endpoint);
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(&e, endpoint))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match (status, target) {
            (StatusCode::NOT_FOUND, Target::Session(id)) => Err(DatasetError::SessionNotFound {
                session_id: id.to_string(),
            }),
            (StatusCode::NOT_FOUND, Target::Sample(id)) => Err(DatasetError::SampleNotFound {
                id: id.to_string(),
            }),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(TransportError::new(
                    TransportErrorKind::Status(status.as_u16()),
                    endpoint,
                    truncate_body(&body),
                )
                .into())
            }
        }
    }

    /// Send a request and decode the JSON body
    async fn fetch<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        endpoint: &str,
        target: Target<'_>,
    ) -> DatasetResult<T> {
        let response = self.execute(request, endpoint, target).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| transport_error(&e, endpoint).into())
    }
}

#[async_trait]
impl SessionTransport for HttpSessionTransport {
    async fn create_session(&self, dataset: &Dataset) -> DatasetResult<SessionInfo> {
        let endpoint = self.sessions_url();
        let request = self
            .client
            .post(&endpoint)
            .json(&CreateSessionRequest { udt: dataset });
        let res: CreateSessionResponse = self.fetch(request, &endpoint, Target::Server).await?;
        Ok(res.into())
    }

    async fn fetch_summary(&self, session_id: &str) -> DatasetResult<SessionSummary> {
        let endpoint = self.session_url(session_id);
        let request = self.client.get(&endpoint);
        self.fetch(request, &endpoint, Target::Session(session_id))
            .await
    }

    async fn fetch_diffs_since(&self, session_id: &str, version: u64) -> DatasetResult<DiffSet> {
        let endpoint = format!("{}/diffs?since={}", self.session_url(session_id), version);
        let request = self.client.get(&endpoint);
        self.fetch(request, &endpoint, Target::Session(session_id))
            .await
    }

    async fn send_patch(&self, session_id: &str, patch: &[PatchOp]) -> DatasetResult<()> {
        let endpoint = self.session_url(session_id);
        let request = self.client.patch(&endpoint).json(&PatchRequest { patch });
        self.execute(request, &endpoint, Target::Session(session_id))
            .await?;
        Ok(())
    }

    async fn fetch_dataset(&self, session_id: &str) -> DatasetResult<Dataset> {
        let endpoint = format!("{}/download", self.session_url(session_id));
        let request = self.client.get(&endpoint);
        self.fetch(request, &endpoint, Target::Session(session_id))
            .await
    }

    async fn fetch_sample_by_index(&self, session_id: &str, index: usize) -> DatasetResult<Sample> {
        let id = index.to_string();
        let endpoint = self.sample_url(session_id, &id)?;
        let request = self.client.get(&endpoint);
        self.fetch(request, &endpoint, Target::Sample(&id)).await
    }

    async fn fetch_sample_by_id(&self, session_id: &str, sample_id: &str) -> DatasetResult<Sample> {
        let endpoint = self.sample_url(session_id, sample_id)?;
        let request = self.client.get(&endpoint);
        self.fetch(request, &endpoint, Target::Sample(sample_id))
            .await
    }
}

/// Trim whitespace and trailing slashes, and require an http(s) URL
fn normalize_url(url: &str) -> DatasetResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    let parsed = reqwest::Url::parse(trimmed)
        .map_err(|e| DatasetError::Validation(format!("invalid server URL '{}': {}", url, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DatasetError::Validation(format!(
            "server URL '{}' must use http or https",
            url
        )));
    }

    Ok(trimmed.to_string())
}

/// Keep at most `MAX_ERROR_BODY` chars of an error body
fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY).collect()
}

fn transport_error(err: &reqwest::Error, endpoint: &str) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_decode() {
        TransportErrorKind::MalformedResponse
    } else {
        TransportErrorKind::Unreachable
    };
    TransportError::new(kind, endpoint, err.to_string())
}
