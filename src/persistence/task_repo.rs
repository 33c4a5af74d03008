//! Task repository for `SQLite` persistence.
//!
//! Read-side queries plus the row-mapping helpers shared with the
//! transactional store. All status-changing writes live in
//! [`store`](super::store) so they stay inside one transaction.

use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;

use chrono::{DateTime, Utc};

use crate::models::task::{Task, TaskStatus};
use crate::{AppError, Result};

use super::{fmt_ts, parse_opt_ts, parse_ts};

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
pub(crate) struct TaskRow {
    id: String,
    candidate_id: String,
    job_id: String,
    ats_score: f64,
    status: String,
    assigned_to: Option<String>,
    assigned_at: Option<String>,
    deadline_at: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    old_resume_url: Option<String>,
    new_resume_url: Option<String>,
    retry_count: i64,
    missing_keywords: String,
    suggestions: String,
    notes: Option<String>,
    created_at: String,
}

impl TaskRow {
    /// Convert a database row into the domain model.
    pub(crate) fn into_task(self) -> Result<Task> {
        let status = parse_task_status(&self.status)?;
        let missing_keywords: Vec<String> = serde_json::from_str(&self.missing_keywords)
            .map_err(|err| AppError::Fatal(format!("invalid missing_keywords: {err}")))?;
        let suggestions: Vec<String> = serde_json::from_str(&self.suggestions)
            .map_err(|err| AppError::Fatal(format!("invalid suggestions: {err}")))?;
        let retry_count = u32::try_from(self.retry_count)
            .map_err(|_| AppError::Fatal(format!("negative retry_count on task {}", self.id)))?;

        Ok(Task {
            id: self.id,
            candidate_id: self.candidate_id,
            job_id: self.job_id,
            ats_score: self.ats_score,
            status,
            assigned_to: self.assigned_to,
            assigned_at: parse_opt_ts(self.assigned_at.as_deref())?,
            deadline_at: parse_opt_ts(self.deadline_at.as_deref())?,
            started_at: parse_opt_ts(self.started_at.as_deref())?,
            completed_at: parse_opt_ts(self.completed_at.as_deref())?,
            old_resume_url: self.old_resume_url,
            new_resume_url: self.new_resume_url,
            retry_count,
            missing_keywords,
            suggestions,
            notes: self.notes,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub(crate) fn parse_task_status(s: &str) -> Result<TaskStatus> {
    match s {
        "queued" => Ok(TaskStatus::Queued),
        "assigned" => Ok(TaskStatus::Assigned),
        "in_progress" => Ok(TaskStatus::InProgress),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        "timeout" => Ok(TaskStatus::Timeout),
        other => Err(AppError::Fatal(format!("invalid task status: {other}"))),
    }
}

pub(crate) fn task_status_str(s: TaskStatus) -> &'static str {
    match s {
        TaskStatus::Queued => "queued",
        TaskStatus::Assigned => "assigned",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Timeout => "timeout",
    }
}

/// Per-status task counts for the admin surface and startup recovery log.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TaskCounts {
    pub queued: u64,
    pub assigned: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
    pub timeout: u64,
}

/// Repository wrapper around `SQLite` for task records.
#[derive(Clone)]
pub struct TaskRepo {
    db: Arc<SqlitePool>,
}

impl TaskRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Retrieve a task by its ID.
    ///
    /// Returns `Ok(None)` if the task does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(TaskRow::into_task).transpose()
    }

    /// Retrieve the oldest queued task, the next claim candidate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` if the query fails.
    pub async fn oldest_queued(&self) -> Result<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks WHERE status = 'queued' ORDER BY created_at LIMIT 1",
        )
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(TaskRow::into_task).transpose()
    }

    /// List tasks in the given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` if the query fails.
    pub async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT * FROM tasks WHERE status = ?1 ORDER BY created_at")
                .bind(task_status_str(status))
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// List in-flight tasks whose deadline has already passed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` if the query fails.
    pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks \
             WHERE status IN ('assigned', 'in_progress') AND deadline_at < ?1 \
             ORDER BY deadline_at",
        )
        .bind(fmt_ts(now))
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// List in-flight tasks whose deadline is still ahead, for the
    /// pre-warning sweep.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` if the query fails.
    pub async fn list_pending_deadlines(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks \
             WHERE status IN ('assigned', 'in_progress') AND deadline_at >= ?1 \
             ORDER BY deadline_at",
        )
        .bind(fmt_ts(now))
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// Count tasks grouped by status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` if the query fails.
    pub async fn counts(&self) -> Result<TaskCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
                .fetch_all(self.db.as_ref())
                .await?;

        let mut counts = TaskCounts::default();
        for (status, count) in rows {
            let count = u64::try_from(count).unwrap_or(0);
            match parse_task_status(&status)? {
                TaskStatus::Queued => counts.queued = count,
                TaskStatus::Assigned => counts.assigned = count,
                TaskStatus::InProgress => counts.in_progress = count,
                TaskStatus::Completed => counts.completed = count,
                TaskStatus::Failed => counts.failed = count,
                TaskStatus::Timeout => counts.timeout = count,
            }
        }
        Ok(counts)
    }
}
