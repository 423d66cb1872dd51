//! Row change events.
//!
//! Every successful mutation publishes one [`ChangeEvent`]. Subscribers get
//! every event for every owner; they are expected to refetch through an
//! owner-scoped read rather than trust the payload.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: String,
    pub record_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, table: impl Into<String>, record_id: Uuid) -> Self {
        Self {
            kind,
            table: table.into(),
            record_id,
            at: OffsetDateTime::now_utc(),
        }
    }
}

/// Broadcast fan-out of change events.
///
/// Slow subscribers lose the oldest events rather than block publishers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event; returns how many subscribers received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        tracing::debug!(
            target: "shelf-events",
            kind = ?event.kind,
            table = %event.table,
            record_id = %event.record_id,
            "publishing change event"
        );
        // No subscribers is the normal idle state.
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
