//! Change-notification events
//!
//! Every committed write to a lead or task is announced on the [`EventBus`].
//! Delivery is in-process and best-effort: a subscriber that falls more than
//! the channel capacity behind loses the oldest events. Work that must happen
//! is therefore done in the writing transaction or re-derived by the daily
//! sweep; handlers only add follow-on work and must be idempotent, since a
//! change can also be seen twice.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::ids::LeadId;
use crate::model::{Interaction, Lead, Task};

/// Document change announced after commit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChangeEvent {
    /// Lead created (`before` absent), updated, or deleted (`after` absent)
    LeadChanged {
        before: Option<Box<Lead>>,
        after: Option<Box<Lead>>,
        /// Set when the deletion retired the secondary lead of a merge
        merged_into: Option<LeadId>,
    },

    /// Task created, updated, or deleted
    TaskChanged {
        before: Option<Box<Task>>,
        after: Option<Box<Task>>,
    },

    /// Interaction appended to a lead's log
    InteractionAppended {
        lead_id: LeadId,
        interaction: Box<Interaction>,
    },
}

impl ChangeEvent {
    pub fn lead_created(lead: Lead) -> Self {
        ChangeEvent::LeadChanged {
            before: None,
            after: Some(Box::new(lead)),
            merged_into: None,
        }
    }

    pub fn lead_updated(before: Lead, after: Lead) -> Self {
        ChangeEvent::LeadChanged {
            before: Some(Box::new(before)),
            after: Some(Box::new(after)),
            merged_into: None,
        }
    }

    pub fn lead_deleted(before: Lead, merged_into: Option<LeadId>) -> Self {
        ChangeEvent::LeadChanged {
            before: Some(Box::new(before)),
            after: None,
            merged_into,
        }
    }

    pub fn task_updated(before: Task, after: Task) -> Self {
        ChangeEvent::TaskChanged {
            before: Some(Box::new(before)),
            after: Some(Box::new(after)),
        }
    }

    /// Short label for logging
    pub fn label(&self) -> &'static str {
        match self {
            ChangeEvent::LeadChanged { before: None, .. } => "lead_created",
            ChangeEvent::LeadChanged { after: None, .. } => "lead_deleted",
            ChangeEvent::LeadChanged { .. } => "lead_updated",
            ChangeEvent::TaskChanged { .. } => "task_changed",
            ChangeEvent::InteractionAppended { .. } => "interaction_appended",
        }
    }
}

/// Central change distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block writers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use afc_common::events::{ChangeEvent, EventBus};
/// use afc_common::model::Lead;
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(ChangeEvent::lead_created(Lead::new("Amira", chrono::Utc::now())));
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChangeEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered before the oldest are
    /// dropped for lagging subscribers.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ChangeEvent,
    ) -> Result<usize, broadcast::error::SendError<ChangeEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ChangeEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::debug!(event = e.0.label(), "No subscribers for change event");
        }
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
