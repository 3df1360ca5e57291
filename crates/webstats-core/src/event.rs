//! Event bus for webstats using tokio::broadcast
//!
//! Lets embedding code follow what the placeholder cache does (for example to
//! tell the operator when a migration finished).

use crate::storage::BackendKind;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted by the placeholder cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// Initial load from the backend completed
    Loaded { cells: usize },
    /// The in-memory table was written to the backend
    Saved { kind: BackendKind, cells: usize },
    /// Columns no longer configured were dropped
    Pruned { columns: Vec<String> },
    /// Rows were removed on operator request
    PlayerDeleted { ids: Vec<Uuid> },
    Migrated { from: BackendKind, to: BackendKind },
    /// The new backend could not be opened; the old one stays active
    MigrationFailed { to: BackendKind, reason: String },
}

/// Event bus for broadcasting cache events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create with default capacity (64 events)
    pub fn default_capacity() -> Self {
        Self::new(64)
    }

    pub fn publish(&self, event: CacheEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::default_capacity()
    }
}
