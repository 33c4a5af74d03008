//! Application records produced when a review task completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A submitted application for a `(candidate, job)` pair.
///
/// The pair is unique; completing another review task for the same pair
/// updates the existing row in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Application {
    /// Unique record identifier.
    pub id: String,
    /// Candidate the application belongs to.
    pub candidate_id: String,
    /// Job applied for.
    pub job_id: String,
    /// Resume URL submitted with the application.
    pub resume_url: String,
    /// ATS score of the resume at submission time.
    pub ats_score_at_submission: f64,
    /// False for applications produced through human review.
    pub auto_submitted: bool,
    /// Submission timestamp.
    pub submitted_at: DateTime<Utc>,
}

impl Application {
    /// Construct a human-review application record.
    #[must_use]
    pub fn new(
        candidate_id: String,
        job_id: String,
        resume_url: String,
        ats_score_at_submission: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            candidate_id,
            job_id,
            resume_url,
            ats_score_at_submission,
            auto_submitted: false,
            submitted_at: Utc::now(),
        }
    }
}
