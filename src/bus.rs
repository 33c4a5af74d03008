//! Topic-based event fan-out for state changes.
//!
//! The store publishes one typed [`Event`] per committed transition;
//! subscribers (the assigner, UI gateways, the auto-apply actor) each hold
//! an independent `broadcast` receiver. Publishing never blocks and never
//! fails the committing caller; a subscriber that falls behind loses the
//! lagged events rather than stalling anyone.
//!
//! Per task id, events are observed in commit order because the committing
//! call publishes synchronously after its transaction commits. No global
//! order across tasks is promised.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::incident::IncidentKind;
use crate::models::reviewer::Presence;

/// Default capacity of the broadcast ring buffer.
const DEFAULT_CAPACITY: usize = 256;

/// A state-change notification published after commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum Event {
    /// A task entered the review queue.
    #[serde(rename = "task.enqueued")]
    TaskEnqueued {
        task_id: String,
        candidate_id: String,
        job_id: String,
        ats_score: f64,
        timestamp: DateTime<Utc>,
    },
    /// A task was bound to a reviewer.
    #[serde(rename = "task.assigned")]
    TaskAssigned {
        task_id: String,
        reviewer_id: String,
        deadline_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    /// The holding reviewer explicitly started work.
    #[serde(rename = "task.started")]
    TaskStarted {
        task_id: String,
        reviewer_id: String,
        timestamp: DateTime<Utc>,
    },
    /// The holding reviewer submitted an edited resume.
    #[serde(rename = "task.completed")]
    TaskCompleted {
        task_id: String,
        reviewer_id: String,
        new_resume_url: String,
        completion_seconds: i64,
        timestamp: DateTime<Utc>,
    },
    /// The holding reviewer declared failure; the task returns to the queue.
    #[serde(rename = "task.failed")]
    TaskFailed {
        task_id: String,
        reviewer_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// The deadline monitor returned an expired task to the queue.
    #[serde(rename = "task.requeued")]
    TaskRequeued {
        task_id: String,
        retry_count: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// A pre-deadline warning mark was reached.
    #[serde(rename = "task.warning")]
    TaskWarning {
        task_id: String,
        reviewer_id: String,
        minutes_remaining: u32,
        timestamp: DateTime<Utc>,
    },
    /// A reviewer's presence changed.
    #[serde(rename = "reviewer.presence")]
    ReviewerPresence {
        reviewer_id: String,
        presence: Presence,
        timestamp: DateTime<Utc>,
    },
    /// The strike machine recorded a warning or violation.
    #[serde(rename = "reviewer.strike")]
    ReviewerStrike {
        reviewer_id: String,
        kind: IncidentKind,
        warnings: u32,
        violations: u32,
        timestamp: DateTime<Utc>,
    },
    /// A reviewer account was suspended.
    #[serde(rename = "reviewer.suspended")]
    ReviewerSuspended {
        reviewer_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Topic string as it appears on the wire.
    #[must_use]
    pub fn topic(&self) -> &'static str {
        match self {
            Self::TaskEnqueued { .. } => "task.enqueued",
            Self::TaskAssigned { .. } => "task.assigned",
            Self::TaskStarted { .. } => "task.started",
            Self::TaskCompleted { .. } => "task.completed",
            Self::TaskFailed { .. } => "task.failed",
            Self::TaskRequeued { .. } => "task.requeued",
            Self::TaskWarning { .. } => "task.warning",
            Self::ReviewerPresence { .. } => "reviewer.presence",
            Self::ReviewerStrike { .. } => "reviewer.strike",
            Self::ReviewerSuspended { .. } => "reviewer.suspended",
        }
    }
}

/// Cloneable handle to the broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus with the default ring-buffer capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with an explicit ring-buffer capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Fire-and-forget: an absent or lagging subscriber never affects the
    /// publisher.
    pub fn publish(&self, event: Event) {
        let topic = event.topic();
        match self.tx.send(event) {
            Ok(receivers) => debug!(topic, receivers, "event published"),
            Err(_) => debug!(topic, "event dropped: no subscribers"),
        }
    }

    /// Obtain an independent receiver positioned at the current tail.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
