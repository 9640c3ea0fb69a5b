//! Dataset change notifications
//!
//! Every backend owns an [`EventBus`]. Subscribers get a broadcast receiver;
//! dropping the receiver unsubscribes.

use tokio::sync::broadcast;

/// Capacity of the per-backend event channel
const EVENT_CAPACITY: usize = 64;

/// Events emitted by a dataset backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetEvent {
    /// The whole dataset was replaced
    DatasetReloaded,
    /// The sample summary changed
    SummaryChanged,
    /// A top-level dataset property changed
    DatasetPropertyChanged { key: String },
}

impl DatasetEvent {
    /// Event name as used by UDT frontends
    pub fn name(&self) -> &'static str {
        match self {
            DatasetEvent::DatasetReloaded => "dataset-reloaded",
            DatasetEvent::SummaryChanged => "summary-changed",
            DatasetEvent::DatasetPropertyChanged { .. } => "dataset-property-changed",
        }
    }
}

/// Fan-out channel for [`DatasetEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DatasetEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<DatasetEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; a bus without subscribers drops it
    pub fn emit(&self, event: DatasetEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
