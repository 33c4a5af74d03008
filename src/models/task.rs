//! Review task model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for a review task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue for assignment.
    Queued,
    /// Bound to exactly one reviewer with a running deadline.
    Assigned,
    /// Reviewer explicitly started working on it.
    InProgress,
    /// Reviewer submitted an edited resume.
    Completed,
    /// Reviewer declared the task impossible to complete.
    Failed,
    /// Abandoned after exceeding the retry cap.
    Timeout,
}

impl TaskStatus {
    /// Whether the status admits no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// Expiry and reviewer-declared failure both route the task back to
    /// `Queued`; `Timeout` is reachable only from `Queued` when the retry
    /// cap is exceeded.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Assigned | Self::Timeout)
                | (Self::Assigned, Self::InProgress)
                | (
                    Self::Assigned | Self::InProgress,
                    Self::Completed | Self::Failed | Self::Queued
                )
        )
    }
}

/// A resume review task persisted in the task store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    /// Unique record identifier.
    pub id: String,
    /// Candidate whose resume is under review.
    pub candidate_id: String,
    /// Job posting the resume is matched against.
    pub job_id: String,
    /// ATS score that caused queuing, in `[0, 1)`.
    pub ats_score: f64,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Reviewer currently holding the task, when assigned or in progress.
    pub assigned_to: Option<String>,
    /// When the current assignment was made.
    pub assigned_at: Option<DateTime<Utc>>,
    /// SLA deadline for the current assignment.
    pub deadline_at: Option<DateTime<Utc>>,
    /// When the reviewer explicitly started work.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached `Completed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// Resume URL snapshot taken at queue time.
    pub old_resume_url: Option<String>,
    /// Edited resume URL set on completion.
    pub new_resume_url: Option<String>,
    /// Number of times the task has been requeued.
    pub retry_count: u32,
    /// Keywords the ATS matcher flagged as missing; opaque to the core.
    pub missing_keywords: Vec<String>,
    /// Matcher suggestions for the reviewer; opaque to the core.
    pub suggestions: Vec<String>,
    /// Free-form notes accumulated across attempts.
    pub notes: Option<String>,
    /// Creation timestamp; also the FIFO ordering key.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Construct a new queued task.
    #[must_use]
    pub fn new(
        candidate_id: String,
        job_id: String,
        ats_score: f64,
        old_resume_url: Option<String>,
        missing_keywords: Vec<String>,
        suggestions: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            candidate_id,
            job_id,
            ats_score,
            status: TaskStatus::Queued,
            assigned_to: None,
            assigned_at: None,
            deadline_at: None,
            started_at: None,
            completed_at: None,
            old_resume_url,
            new_resume_url: None,
            retry_count: 0,
            missing_keywords,
            suggestions,
            notes: None,
            created_at: Utc::now(),
        }
    }
}
