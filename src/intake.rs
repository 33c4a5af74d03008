//! Intake API for upstream collaborators.
//!
//! The ATS scorer and job ingester talk to the core through these three
//! entry points. `ingest_score` is the convenience split: scores below
//! the threshold become review tasks, scores at or above it are handed
//! straight to the auto-apply collaborator without touching the store.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::models::reviewer::Presence;
use crate::models::task::Task;
use crate::persistence::store::{NewTask, TaskStore};
use crate::{AppError, Result};

/// Wire message for `enqueue_task` and `ingest_score`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMatch {
    /// Candidate whose resume was scored.
    pub candidate_id: String,
    /// Job the resume was matched against.
    pub job_id: String,
    /// ATS score in `[0, 1]`.
    pub ats_score: f64,
    /// Keywords the matcher flagged as missing; passed through opaquely.
    #[serde(default)]
    pub missing_keywords: Vec<String>,
    /// Matcher suggestions; passed through opaquely.
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Current resume URL snapshot.
    #[serde(default)]
    pub old_resume_url: Option<String>,
}

/// Wire message for `presence_set`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSet {
    /// Reviewer whose presence changes.
    pub reviewer_id: String,
    /// Requested presence.
    pub presence: Presence,
}

/// Hand-off payload for the auto-apply collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoApplyRequest {
    pub candidate_id: String,
    pub job_id: String,
    pub ats_score: f64,
    #[serde(default)]
    pub resume_url: Option<String>,
}

/// Where `ingest_score` routed a match.
#[derive(Debug)]
pub enum IngestDisposition {
    /// Below the threshold; a review task was queued.
    Queued(Task),
    /// At or above the threshold; forwarded to auto-apply.
    AutoApplied,
}

/// Intake service shared by whatever transport fronts the collaborators.
#[derive(Clone)]
pub struct IntakeService {
    store: TaskStore,
    auto_apply_tx: mpsc::Sender<AutoApplyRequest>,
    score_threshold: f64,
}

impl IntakeService {
    /// Create the intake service.
    #[must_use]
    pub fn new(
        store: TaskStore,
        auto_apply_tx: mpsc::Sender<AutoApplyRequest>,
        score_threshold: f64,
    ) -> Self {
        Self {
            store,
            auto_apply_tx,
            score_threshold,
        }
    }

    /// Queue a review task. Not idempotent: repeated calls create
    /// independent tasks; collaborators deduplicate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` on malformed input or
    /// `AppError::ScoreAboveThreshold` when the score qualifies for
    /// auto-apply.
    pub async fn enqueue_task(&self, request: ScoredMatch) -> Result<Task> {
        let task = self
            .store
            .enqueue(NewTask {
                candidate_id: request.candidate_id,
                job_id: request.job_id,
                ats_score: request.ats_score,
                old_resume_url: request.old_resume_url,
                missing_keywords: request.missing_keywords,
                suggestions: request.suggestions,
            })
            .await?;

        info!(task_id = %task.id, ats_score = task.ats_score, "review task queued");
        Ok(task)
    }

    /// Set a reviewer's presence. Idempotent: the latest value wins.
    ///
    /// # Errors
    ///
    /// Surfaces the store errors (`NotFound`, `Suspended`,
    /// `IllegalTransition`).
    pub async fn set_presence(&self, request: PresenceSet) -> Result<()> {
        self.store
            .set_presence(&request.reviewer_id, request.presence)
            .await?;
        Ok(())
    }

    /// Split an incoming score on the auto-apply threshold.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` on malformed input or
    /// `AppError::Transient` when the auto-apply collaborator is gone.
    pub async fn ingest_score(&self, request: ScoredMatch) -> Result<IngestDisposition> {
        if !request.ats_score.is_finite() || !(0.0..=1.0).contains(&request.ats_score) {
            return Err(AppError::Validation(format!(
                "ats_score {} outside [0, 1]",
                request.ats_score
            )));
        }

        if request.ats_score >= self.score_threshold {
            debug!(
                candidate_id = %request.candidate_id,
                job_id = %request.job_id,
                ats_score = request.ats_score,
                "score at or above threshold; forwarding to auto-apply"
            );
            self.auto_apply_tx
                .send(AutoApplyRequest {
                    candidate_id: request.candidate_id,
                    job_id: request.job_id,
                    ats_score: request.ats_score,
                    resume_url: request.old_resume_url,
                })
                .await
                .map_err(|_| AppError::Transient("auto-apply channel closed".into()))?;
            return Ok(IngestDisposition::AutoApplied);
        }

        let task = self.enqueue_task(request).await?;
        Ok(IngestDisposition::Queued(task))
    }
}
