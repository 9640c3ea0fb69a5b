//! Watch command handler

use anyhow::{bail, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use udt_core::{BackendKind, DatasetEvent, DatasetManager};

use crate::output::Output;

/// Print dataset events until Ctrl-C
pub async fn watch(manager: &mut DatasetManager, output: &Output) -> Result<()> {
    if manager.kind() != BackendKind::Collaborative {
        bail!(
            "Only collaborative datasets change remotely; the {} backend has nothing to watch",
            manager.kind()
        );
    }
    if manager.session_id().is_none() {
        bail!(
            "Not in a collaborative session. Join one with:\n  \
             udt --session <ID> watch"
        );
    }

    let mut events = manager.subscribe();
    output.message("Watching for changes (Ctrl-C to stop)...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    let summary = match event {
                        DatasetEvent::DatasetPropertyChanged { .. } => None,
                        _ => manager.get_summary().await.ok(),
                    };
                    output.print_event(&event, summary.as_ref());
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Missed {} event(s)", missed);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.close().await;
    output.success("Stopped watching");
    Ok(())
}
