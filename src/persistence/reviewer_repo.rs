//! Reviewer repository for `SQLite` persistence.
//!
//! Account creation and read-side queries, including the fairness pick
//! used by the assigner. Presence and counter writes live in
//! [`store`](super::store) so they commit together with task transitions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::models::reviewer::{Presence, Reviewer, ReviewerRole};
use crate::{AppError, Result};

use super::{fmt_ts, parse_ts};

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
pub(crate) struct ReviewerRow {
    id: String,
    display_name: String,
    role: String,
    presence: String,
    warnings: i64,
    violations: i64,
    tasks_completed: i64,
    avg_completion_seconds: f64,
    last_heartbeat_at: String,
    active: i64,
    current_task_id: Option<String>,
    created_at: String,
}

impl ReviewerRow {
    /// Convert a database row into the domain model.
    pub(crate) fn into_reviewer(self) -> Result<Reviewer> {
        let role = parse_role(&self.role)?;
        let presence = parse_presence(&self.presence)?;
        let warnings = u32::try_from(self.warnings)
            .map_err(|_| AppError::Fatal(format!("negative warnings on reviewer {}", self.id)))?;
        let violations = u32::try_from(self.violations)
            .map_err(|_| AppError::Fatal(format!("negative violations on reviewer {}", self.id)))?;
        let tasks_completed = u64::try_from(self.tasks_completed).map_err(|_| {
            AppError::Fatal(format!("negative tasks_completed on reviewer {}", self.id))
        })?;

        Ok(Reviewer {
            id: self.id,
            display_name: self.display_name,
            role,
            presence,
            warnings,
            violations,
            tasks_completed,
            avg_completion_seconds: self.avg_completion_seconds,
            last_heartbeat_at: parse_ts(&self.last_heartbeat_at)?,
            active: self.active != 0,
            current_task_id: self.current_task_id,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub(crate) fn parse_role(s: &str) -> Result<ReviewerRole> {
    match s {
        "admin" => Ok(ReviewerRole::Admin),
        "manager" => Ok(ReviewerRole::Manager),
        "employee" => Ok(ReviewerRole::Employee),
        other => Err(AppError::Fatal(format!("invalid reviewer role: {other}"))),
    }
}

pub(crate) fn role_str(role: ReviewerRole) -> &'static str {
    match role {
        ReviewerRole::Admin => "admin",
        ReviewerRole::Manager => "manager",
        ReviewerRole::Employee => "employee",
    }
}

pub(crate) fn parse_presence(s: &str) -> Result<Presence> {
    match s {
        "available" => Ok(Presence::Available),
        "busy" => Ok(Presence::Busy),
        "offline" => Ok(Presence::Offline),
        other => Err(AppError::Fatal(format!("invalid presence: {other}"))),
    }
}

pub(crate) fn presence_str(presence: Presence) -> &'static str {
    match presence {
        Presence::Available => "available",
        Presence::Busy => "busy",
        Presence::Offline => "offline",
    }
}

/// Repository wrapper around `SQLite` for reviewer records.
#[derive(Clone)]
pub struct ReviewerRepo {
    db: Arc<SqlitePool>,
}

impl ReviewerRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a new reviewer account.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` if the insert fails.
    pub async fn create(&self, reviewer: &Reviewer) -> Result<Reviewer> {
        sqlx::query(
            "INSERT INTO reviewers (id, display_name, role, presence, warnings, violations,
             tasks_completed, avg_completion_seconds, last_heartbeat_at, active,
             current_task_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(&reviewer.id)
        .bind(&reviewer.display_name)
        .bind(role_str(reviewer.role))
        .bind(presence_str(reviewer.presence))
        .bind(i64::from(reviewer.warnings))
        .bind(i64::from(reviewer.violations))
        .bind(i64::try_from(reviewer.tasks_completed).unwrap_or(i64::MAX))
        .bind(reviewer.avg_completion_seconds)
        .bind(fmt_ts(reviewer.last_heartbeat_at))
        .bind(i64::from(reviewer.active))
        .bind(&reviewer.current_task_id)
        .bind(fmt_ts(reviewer.created_at))
        .execute(self.db.as_ref())
        .await?;

        Ok(reviewer.clone())
    }

    /// Retrieve a reviewer by ID.
    ///
    /// Returns `Ok(None)` if the reviewer does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Reviewer>> {
        let row: Option<ReviewerRow> = sqlx::query_as("SELECT * FROM reviewers WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(ReviewerRow::into_reviewer).transpose()
    }

    /// Pick the best-fit assignable reviewer under the fairness policy:
    /// fewest completed tasks, ties broken by least-recent heartbeat.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` if the query fails.
    pub async fn pick_assignable(
        &self,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
        violation_cap: u32,
    ) -> Result<Option<Reviewer>> {
        let cutoff = fmt_ts(now - ttl);
        let row: Option<ReviewerRow> = sqlx::query_as(
            "SELECT * FROM reviewers \
             WHERE presence = 'available' AND active = 1 AND current_task_id IS NULL \
               AND violations < ?1 AND last_heartbeat_at > ?2 \
             ORDER BY tasks_completed ASC, last_heartbeat_at ASC \
             LIMIT 1",
        )
        .bind(i64::from(violation_cap))
        .bind(cutoff)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(ReviewerRow::into_reviewer).transpose()
    }

    /// List every reviewer, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` if the query fails.
    pub async fn list_all(&self) -> Result<Vec<Reviewer>> {
        let rows: Vec<ReviewerRow> =
            sqlx::query_as("SELECT * FROM reviewers ORDER BY created_at DESC")
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(ReviewerRow::into_reviewer).collect()
    }

    /// Count suspended accounts (`active = 0`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` if the query fails.
    pub async fn count_suspended(&self) -> Result<u64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reviewers WHERE active = 0")
            .fetch_one(self.db.as_ref())
            .await?;

        Ok(u64::try_from(count.0).unwrap_or(0))
    }
}
