//! Application repository for `SQLite` persistence.
//!
//! Applications are written by the store inside the completion transaction;
//! this repository serves the read side, plus the candidate resume mirror.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::models::application::Application;
use crate::Result;

use super::parse_ts;

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
pub(crate) struct ApplicationRow {
    id: String,
    candidate_id: String,
    job_id: String,
    resume_url: String,
    ats_score_at_submission: f64,
    auto_submitted: i64,
    submitted_at: String,
}

impl ApplicationRow {
    /// Convert a database row into the domain model.
    pub(crate) fn into_application(self) -> Result<Application> {
        Ok(Application {
            id: self.id,
            candidate_id: self.candidate_id,
            job_id: self.job_id,
            resume_url: self.resume_url,
            ats_score_at_submission: self.ats_score_at_submission,
            auto_submitted: self.auto_submitted != 0,
            submitted_at: parse_ts(&self.submitted_at)?,
        })
    }
}

/// Repository wrapper around `SQLite` for application records.
#[derive(Clone)]
pub struct ApplicationRepo {
    db: Arc<SqlitePool>,
}

impl ApplicationRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Retrieve the application for a `(candidate, job)` pair, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` if the query fails.
    pub async fn get_for(&self, candidate_id: &str, job_id: &str) -> Result<Option<Application>> {
        let row: Option<ApplicationRow> = sqlx::query_as(
            "SELECT * FROM applications WHERE candidate_id = ?1 AND job_id = ?2",
        )
        .bind(candidate_id)
        .bind(job_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(ApplicationRow::into_application).transpose()
    }

    /// List every application, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` if the query fails.
    pub async fn list_all(&self) -> Result<Vec<Application>> {
        let rows: Vec<ApplicationRow> =
            sqlx::query_as("SELECT * FROM applications ORDER BY submitted_at DESC")
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(ApplicationRow::into_application).collect()
    }

    /// Current resume URL mirrored for a candidate, if known.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` if the query fails.
    pub async fn candidate_resume(&self, candidate_id: &str) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT resume_url FROM candidates WHERE id = ?1")
                .bind(candidate_id)
                .fetch_optional(self.db.as_ref())
                .await?;

        Ok(row.and_then(|(url,)| url))
    }
}
