//! Diff poller
//!
//! Background task that keeps a [`Mirror`] converging toward the server.
//! Each tick either initializes the mirror from the session summary or
//! merges the diffs since the mirror's version. Failures are logged and the
//! next tick retries. The task ends when stopped or when the server no
//! longer knows the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::mirror::{MergeOutcome, Mirror};
use super::transport::SessionTransport;
use crate::error::{DatasetError, DatasetResult};
use crate::events::{DatasetEvent, EventBus};

/// Default delay between ticks
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(1000);

/// Poller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Not running (never started or cancelled)
    Stopped,
    /// Waiting on the server
    Polling,
    /// Merging a received patch
    Applying,
    /// Sleeping until the next tick
    Idle,
}

/// Everything a tick needs
struct PollContext {
    session_id: String,
    transport: Arc<dyn SessionTransport>,
    mirror: Arc<Mirror>,
    events: EventBus,
    state_tx: watch::Sender<PollerState>,
}

/// Handle to a running poller task
///
/// Dropping the handle cancels the task.
pub struct DiffPoller {
    session_id: String,
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<PollerState>,
    task: Option<JoinHandle<()>>,
}

impl DiffPoller {
    /// Spawn a poller for `session_id`
    ///
    /// The first tick fires after one `interval`.
    pub fn spawn(
        session_id: &str,
        transport: Arc<dyn SessionTransport>,
        mirror: Arc<Mirror>,
        events: EventBus,
        interval: Duration,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(PollerState::Idle);

        let ctx = PollContext {
            session_id: session_id.to_string(),
            transport,
            mirror,
            events,
            state_tx,
        };

        info!("Starting diff poller for session {}", session_id);
        let task = tokio::spawn(poll_loop(ctx, interval, stop_rx));

        Self {
            session_id: session_id.to_string(),
            stop_tx,
            state_rx,
            task: Some(task),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> PollerState {
        *self.state_rx.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<PollerState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the poller and wait for the task to exit
    ///
    /// Safe to call at any time and more than once. A tick that is waiting
    /// on the server is abandoned; once this returns no further request is
    /// made and no timer remains scheduled.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Diff poller task for session {} failed: {}", self.session_id, e);
                }
            }
            info!("Stopped diff poller for session {}", self.session_id);
        }
    }
}

impl Drop for DiffPoller {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn poll_loop(ctx: PollContext, interval: Duration, mut stop_rx: watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow() {
            break;
        }

        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if *stop_rx.borrow() {
            break;
        }

        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            result = tick(&ctx) => match result {
                Err(DatasetError::SessionNotFound { .. }) => {
                    warn!("Session {} is gone, stopping diff poller", ctx.session_id);
                    break;
                }
                Err(e) => warn!("Polling session {} failed: {}", ctx.session_id, e),
                Ok(_) => {}
            }
        }

        let _ = ctx.state_tx.send(PollerState::Idle);
    }

    let _ = ctx.state_tx.send(PollerState::Stopped);
}

/// Run one poll; returns whether the mirror changed
async fn tick(ctx: &PollContext) -> DatasetResult<bool> {
    let _ = ctx.state_tx.send(PollerState::Polling);
    let snapshot = ctx.mirror.snapshot();

    let (Some(_), Some(version)) = (snapshot.projection, snapshot.version) else {
        let summary = ctx.transport.fetch_summary(&ctx.session_id).await?;
        let _ = ctx.state_tx.send(PollerState::Applying);
        let version = summary.summary_version;
        ctx.mirror.set(summary.into_projection(), version);
        debug!("Initialized mirror for session {} at version {}", ctx.session_id, version);
        ctx.events.emit(DatasetEvent::SummaryChanged);
        return Ok(true);
    };

    let diffs = ctx
        .transport
        .fetch_diffs_since(&ctx.session_id, version)
        .await?;
    if diffs.latest_version == version {
        debug!("Session {} unchanged at version {}", ctx.session_id, version);
        return Ok(false);
    }

    let _ = ctx.state_tx.send(PollerState::Applying);
    match ctx
        .mirror
        .apply_patch(&diffs.patch, version, diffs.latest_version)?
    {
        MergeOutcome::Applied { skipped } => {
            for e in &skipped {
                warn!("Session {}: {}", ctx.session_id, e);
            }
            debug!(
                "Session {} advanced {} -> {}",
                ctx.session_id, version, diffs.latest_version
            );
            ctx.events.emit(DatasetEvent::SummaryChanged);
            Ok(true)
        }
        MergeOutcome::Stale => {
            debug!("Discarded diffs for session {} from stale version {}", ctx.session_id, version);
            Ok(false)
        }
    }
}
