//! Reviewer model, presence, and strike accounting fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access role of a reviewer account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerRole {
    /// Full administrative access.
    Admin,
    /// Team lead with reporting access.
    Manager,
    /// Regular reviewer.
    Employee,
}

/// Availability of a reviewer for assignment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// Connected and free to take a task.
    Available,
    /// Holding exactly one task.
    Busy,
    /// Disconnected or withdrawn from the pool.
    Offline,
}

/// A human reviewer persisted in the task store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Reviewer {
    /// Unique record identifier.
    pub id: String,
    /// Display name for UI surfaces.
    pub display_name: String,
    /// Access role.
    pub role: ReviewerRole,
    /// Current availability.
    pub presence: Presence,
    /// Missed-deadline warnings accumulated since the last violation.
    pub warnings: u32,
    /// Violations accumulated; three suspend the account.
    pub violations: u32,
    /// Number of tasks ever completed; the fairness ordering key.
    pub tasks_completed: u64,
    /// Running average of assignment-to-completion seconds.
    pub avg_completion_seconds: f64,
    /// Last heartbeat or presence update.
    pub last_heartbeat_at: DateTime<Utc>,
    /// False once the account is suspended; only an admin reset re-enables.
    pub active: bool,
    /// Back reference to the held task, maintained in the same
    /// transaction as every task status change.
    pub current_task_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Reviewer {
    /// Construct a new available reviewer with a fresh heartbeat.
    #[must_use]
    pub fn new(display_name: String, role: ReviewerRole) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            display_name,
            role,
            presence: Presence::Available,
            warnings: 0,
            violations: 0,
            tasks_completed: 0,
            avg_completion_seconds: 0.0,
            last_heartbeat_at: now,
            active: true,
            current_task_id: None,
            created_at: now,
        }
    }

    /// Whether the reviewer can be handed a task right now.
    #[must_use]
    pub fn is_assignable(&self, now: DateTime<Utc>, ttl: chrono::Duration, violation_cap: u32) -> bool {
        self.active
            && self.presence == Presence::Available
            && self.current_task_id.is_none()
            && self.violations < violation_cap
            && self.last_heartbeat_at > now - ttl
    }
}
