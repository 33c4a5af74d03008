//! Incident repository for `SQLite` persistence.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::models::incident::{Incident, IncidentKind};
use crate::{AppError, Result};

use super::{fmt_ts, parse_ts};

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
pub(crate) struct IncidentRow {
    id: String,
    reviewer_id: String,
    kind: String,
    reason: String,
    task_id: Option<String>,
    created_at: String,
}

impl IncidentRow {
    /// Convert a database row into the domain model.
    pub(crate) fn into_incident(self) -> Result<Incident> {
        Ok(Incident {
            id: self.id,
            reviewer_id: self.reviewer_id,
            kind: parse_kind(&self.kind)?,
            reason: self.reason,
            task_id: self.task_id,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub(crate) fn parse_kind(s: &str) -> Result<IncidentKind> {
    match s {
        "warning" => Ok(IncidentKind::Warning),
        "violation" => Ok(IncidentKind::Violation),
        "suspension" => Ok(IncidentKind::Suspension),
        other => Err(AppError::Fatal(format!("invalid incident kind: {other}"))),
    }
}

pub(crate) fn kind_str(kind: IncidentKind) -> &'static str {
    match kind {
        IncidentKind::Warning => "warning",
        IncidentKind::Violation => "violation",
        IncidentKind::Suspension => "suspension",
    }
}

/// Repository wrapper around `SQLite` for the incident audit log.
#[derive(Clone)]
pub struct IncidentRepo {
    db: Arc<SqlitePool>,
}

impl IncidentRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Append an incident record. Incidents are immutable once written.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` if the insert fails.
    pub async fn create(&self, incident: &Incident) -> Result<Incident> {
        sqlx::query(
            "INSERT INTO incidents (id, reviewer_id, kind, reason, task_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&incident.id)
        .bind(&incident.reviewer_id)
        .bind(kind_str(incident.kind))
        .bind(&incident.reason)
        .bind(&incident.task_id)
        .bind(fmt_ts(incident.created_at))
        .execute(self.db.as_ref())
        .await?;

        Ok(incident.clone())
    }

    /// List incidents recorded against a reviewer, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` if the query fails.
    pub async fn list_for_reviewer(&self, reviewer_id: &str) -> Result<Vec<Incident>> {
        let rows: Vec<IncidentRow> = sqlx::query_as(
            "SELECT * FROM incidents WHERE reviewer_id = ?1 ORDER BY created_at DESC",
        )
        .bind(reviewer_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(IncidentRow::into_incident).collect()
    }

    /// Retrieve the most recent incident for a reviewer, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` if the query fails.
    pub async fn latest_for_reviewer(&self, reviewer_id: &str) -> Result<Option<Incident>> {
        let row: Option<IncidentRow> = sqlx::query_as(
            "SELECT * FROM incidents WHERE reviewer_id = ?1 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(reviewer_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(IncidentRow::into_incident).transpose()
    }
}
