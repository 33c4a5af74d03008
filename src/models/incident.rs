//! Immutable audit records for missed-deadline strikes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a recorded strike.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    /// A single recoverable missed deadline.
    Warning,
    /// Three warnings compounded into a violation.
    Violation,
    /// Third violation; the account is disabled pending human review.
    Suspension,
}

/// An audit row written whenever the strike machine fires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Incident {
    /// Unique record identifier.
    pub id: String,
    /// Reviewer the strike was recorded against.
    pub reviewer_id: String,
    /// Severity reached by this strike.
    pub kind: IncidentKind,
    /// Human-readable cause, e.g. `sla exceeded by 4 minutes`.
    pub reason: String,
    /// Task whose deadline was missed, when applicable.
    pub task_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Incident {
    /// Construct a new incident record.
    #[must_use]
    pub fn new(
        reviewer_id: String,
        kind: IncidentKind,
        reason: String,
        task_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            reviewer_id,
            kind,
            reason,
            task_id,
            created_at: Utc::now(),
        }
    }
}
