//! Retention service for time-based data purge.
//!
//! Runs as a background task deleting terminal tasks (completed, failed,
//! timeout) older than `retention_days`, then the incidents that have
//! lost their anchor: rows pointing at a task that no longer exists, and
//! rows belonging to reviewers who have been offline since before the
//! cutoff. Incidents of active reviewers are kept whatever their age —
//! they are the evidence behind the strike counters. Applications and
//! reviewer accounts are never purged; they are the pipeline's product.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Result;

use super::fmt_ts;

const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn the retention purge background task.
///
/// The task runs hourly; see [`purge`] for what each pass deletes.
#[must_use]
pub fn spawn_retention_task(
    db: Arc<SqlitePool>,
    retention_days: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("retention task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = purge(&db, retention_days).await {
                        error!(%err, "retention purge failed");
                    }
                }
            }
        }
    })
}

/// Delete terminal tasks past the retention window, then orphaned and
/// stale-reviewer incidents.
///
/// Tasks go first so the incident pass sees their rows as gone. An old
/// incident survives only while both its task (if any) still exists and
/// its reviewer has been seen since the cutoff.
///
/// # Errors
///
/// Returns `AppError::Transient` if a delete fails.
pub async fn purge(db: &SqlitePool, retention_days: u32) -> Result<()> {
    let cutoff = fmt_ts(Utc::now() - chrono::Duration::days(i64::from(retention_days)));

    let tasks = sqlx::query(
        "DELETE FROM tasks \
         WHERE status IN ('completed', 'failed', 'timeout') AND created_at < ?1",
    )
    .bind(&cutoff)
    .execute(db)
    .await?;

    let incidents = sqlx::query(
        "DELETE FROM incidents \
         WHERE created_at < ?1 \
           AND ((task_id IS NOT NULL AND task_id NOT IN (SELECT id FROM tasks)) \
                OR reviewer_id IN (SELECT id FROM reviewers \
                                   WHERE presence = 'offline' AND last_heartbeat_at < ?1))",
    )
    .bind(&cutoff)
    .execute(db)
    .await?;

    info!(
        retention_days,
        tasks = tasks.rows_affected(),
        incidents = incidents.rows_affected(),
        "retention purge completed"
    );
    Ok(())
}
