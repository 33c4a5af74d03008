//! Transactional task store — the linearization point for every state
//! transition.
//!
//! Each operation is a single `SQLite` transaction; events go out on the
//! bus only after the transaction commits, so a crash between commit and
//! publish can at worst drop an event, never emit one for uncommitted
//! state. Operations that touch both a task and its reviewer read and
//! write in task-first, reviewer-second order.
//!
//! Guarded `UPDATE ... WHERE status = ...` statements carry the claim
//! semantics: a contender that lost the race affects zero rows and rolls
//! back, so a task can never be bound to two reviewers.

use std::sync::Arc;

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::bus::{Event, EventBus};
use crate::config::GlobalConfig;
use crate::models::incident::{Incident, IncidentKind};
use crate::models::reviewer::{Presence, Reviewer};
use crate::models::task::{Task, TaskStatus};
use crate::{AppError, Result};

use super::incident_repo::kind_str;
use super::reviewer_repo::{presence_str, ReviewerRow};
use super::task_repo::TaskRow;
use super::fmt_ts;

/// Input to [`TaskStore::enqueue`].
#[derive(Debug, Clone)]
pub struct NewTask {
    pub candidate_id: String,
    pub job_id: String,
    pub ats_score: f64,
    pub old_resume_url: Option<String>,
    pub missing_keywords: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Result of a claim attempt.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The task was atomically bound to the reviewer.
    Claimed(Task),
    /// The queue is empty.
    NoQueuedTask,
    /// The reviewer is no longer eligible (busy, stale, or suspended).
    NoCandidateReviewer,
}

/// What a [`TaskStore::expire`] call did, for the monitor's log line.
#[derive(Debug)]
pub struct ExpiryReport {
    pub task_id: String,
    pub reviewer_id: String,
    pub incident_kind: IncidentKind,
    pub retry_count: u32,
    pub suspended: bool,
}

/// Shared handle over the pool, the event bus, and the thresholds.
#[derive(Clone)]
pub struct TaskStore {
    db: Arc<SqlitePool>,
    bus: EventBus,
    config: Arc<GlobalConfig>,
}

impl TaskStore {
    /// Create a new store handle.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>, bus: EventBus, config: Arc<GlobalConfig>) -> Self {
        Self { db, bus, config }
    }

    /// The underlying pool, for constructing read-side repositories.
    #[must_use]
    pub fn db(&self) -> Arc<SqlitePool> {
        Arc::clone(&self.db)
    }

    /// The event bus this store publishes on.
    #[must_use]
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Insert a new queued task.
    ///
    /// Duplicate enqueues for the same `(candidate, job)` are permitted and
    /// dispatched independently; collaborators deduplicate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` on malformed input,
    /// `AppError::ScoreAboveThreshold` when the score qualifies for
    /// auto-apply, or `AppError::Transient` on database failure.
    pub async fn enqueue(&self, new: NewTask) -> Result<Task> {
        if new.candidate_id.trim().is_empty() || new.job_id.trim().is_empty() {
            return Err(AppError::Validation(
                "candidate_id and job_id must not be empty".into(),
            ));
        }
        if !new.ats_score.is_finite() || !(0.0..=1.0).contains(&new.ats_score) {
            return Err(AppError::Validation(format!(
                "ats_score {} outside [0, 1]",
                new.ats_score
            )));
        }
        if new.ats_score >= self.config.score_threshold {
            return Err(AppError::ScoreAboveThreshold(new.ats_score));
        }

        let task = Task::new(
            new.candidate_id,
            new.job_id,
            new.ats_score,
            new.old_resume_url,
            new.missing_keywords,
            new.suggestions,
        );
        let missing_keywords = encode_string_list(&task.missing_keywords)?;
        let suggestions = encode_string_list(&task.suggestions)?;

        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO tasks (id, candidate_id, job_id, ats_score, status, retry_count,
             old_resume_url, missing_keywords, suggestions, created_at)
             VALUES (?1, ?2, ?3, ?4, 'queued', 0, ?5, ?6, ?7, ?8)",
        )
        .bind(&task.id)
        .bind(&task.candidate_id)
        .bind(&task.job_id)
        .bind(task.ats_score)
        .bind(&task.old_resume_url)
        .bind(&missing_keywords)
        .bind(&suggestions)
        .bind(fmt_ts(task.created_at))
        .execute(&mut *tx)
        .await?;

        // Seed the resume mirror without clobbering a newer value.
        if task.old_resume_url.is_some() {
            sqlx::query(
                "INSERT INTO candidates (id, resume_url) VALUES (?1, ?2)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(&task.candidate_id)
            .bind(&task.old_resume_url)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.bus.publish(Event::TaskEnqueued {
            task_id: task.id.clone(),
            candidate_id: task.candidate_id.clone(),
            job_id: task.job_id.clone(),
            ats_score: task.ats_score,
            timestamp: Utc::now(),
        });

        Ok(task)
    }

    /// Atomically bind the oldest queued task to the given reviewer.
    ///
    /// Eligibility is re-verified inside the transaction: the reviewer must
    /// be available, active, task-free, below the violation cap, and have a
    /// heartbeat fresher than the presence TTL.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` on database failure.
    pub async fn claim_next_task_for(&self, reviewer_id: &str) -> Result<ClaimOutcome> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let Some(mut task) = fetch_oldest_queued(&mut tx).await? else {
            return Ok(ClaimOutcome::NoQueuedTask);
        };

        let Some(reviewer) = fetch_reviewer(&mut tx, reviewer_id).await? else {
            return Ok(ClaimOutcome::NoCandidateReviewer);
        };
        let eligible = reviewer.is_assignable(
            now,
            self.config.presence_ttl(),
            self.config.sla.violations_before_suspension,
        );
        if !eligible {
            return Ok(ClaimOutcome::NoCandidateReviewer);
        }

        let deadline = now + self.config.sla_window();

        let claimed = sqlx::query(
            "UPDATE tasks SET status = 'assigned', assigned_to = ?1,
             assigned_at = ?2, deadline_at = ?3
             WHERE id = ?4 AND status = 'queued'",
        )
        .bind(reviewer_id)
        .bind(fmt_ts(now))
        .bind(fmt_ts(deadline))
        .bind(&task.id)
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            return Ok(ClaimOutcome::NoQueuedTask);
        }

        let bound = sqlx::query(
            "UPDATE reviewers SET presence = 'busy', current_task_id = ?1
             WHERE id = ?2 AND presence = 'available'
               AND current_task_id IS NULL AND active = 1",
        )
        .bind(&task.id)
        .bind(reviewer_id)
        .execute(&mut *tx)
        .await?;
        if bound.rows_affected() == 0 {
            return Ok(ClaimOutcome::NoCandidateReviewer);
        }

        tx.commit().await?;

        task.status = TaskStatus::Assigned;
        task.assigned_to = Some(reviewer_id.to_owned());
        task.assigned_at = Some(now);
        task.deadline_at = Some(deadline);

        self.bus.publish(Event::TaskAssigned {
            task_id: task.id.clone(),
            reviewer_id: reviewer_id.to_owned(),
            deadline_at: deadline,
            timestamp: Utc::now(),
        });
        self.bus.publish(Event::ReviewerPresence {
            reviewer_id: reviewer_id.to_owned(),
            presence: Presence::Busy,
            timestamp: Utc::now(),
        });

        Ok(ClaimOutcome::Claimed(task))
    }

    /// Mark an assigned task as explicitly started by its reviewer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound`, `AppError::NotOwner`,
    /// `AppError::IllegalTransition`, or `AppError::Suspended` per the
    /// gateway contract; `AppError::Transient` on database failure.
    pub async fn start(&self, task_id: &str, reviewer_id: &str) -> Result<Task> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let mut task = require_owned_task(&mut tx, task_id, reviewer_id).await?;
        if task.status != TaskStatus::Assigned {
            return Err(AppError::IllegalTransition(format!(
                "cannot start task in status {:?}",
                task.status
            )));
        }
        require_active_reviewer(&mut tx, reviewer_id).await?;

        sqlx::query(
            "UPDATE tasks SET status = 'in_progress', started_at = ?1
             WHERE id = ?2 AND status = 'assigned'",
        )
        .bind(fmt_ts(now))
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        task.status = TaskStatus::InProgress;
        task.started_at = Some(now);

        self.bus.publish(Event::TaskStarted {
            task_id: task_id.to_owned(),
            reviewer_id: reviewer_id.to_owned(),
            timestamp: Utc::now(),
        });

        Ok(task)
    }

    /// Complete a task: record the edited resume, update reviewer counters,
    /// mirror the candidate's resume, and upsert the application row. One
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound`, `AppError::NotOwner`,
    /// `AppError::IllegalTransition`, or `AppError::Suspended` per the
    /// gateway contract; `AppError::Transient` on database failure.
    pub async fn complete(
        &self,
        task_id: &str,
        reviewer_id: &str,
        new_resume_url: &str,
        notes: Option<&str>,
    ) -> Result<Task> {
        if new_resume_url.trim().is_empty() {
            return Err(AppError::Validation("new_resume_url must not be empty".into()));
        }

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let mut task = require_owned_task(&mut tx, task_id, reviewer_id).await?;
        if !matches!(task.status, TaskStatus::Assigned | TaskStatus::InProgress) {
            return Err(AppError::IllegalTransition(format!(
                "cannot complete task in status {:?}",
                task.status
            )));
        }
        let reviewer = require_active_reviewer(&mut tx, reviewer_id).await?;

        let assigned_at = task.assigned_at.ok_or_else(|| {
            AppError::Fatal(format!("task {task_id} is {:?} without assigned_at", task.status))
        })?;
        let completion_seconds = (now - assigned_at).num_seconds().max(0);

        let new_notes = notes.map(|n| append_note(task.notes.as_deref(), n));
        sqlx::query(
            "UPDATE tasks SET status = 'completed', completed_at = ?1,
             new_resume_url = ?2, notes = COALESCE(?3, notes)
             WHERE id = ?4",
        )
        .bind(fmt_ts(now))
        .bind(new_resume_url)
        .bind(&new_notes)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        // Running average over assignment-to-completion seconds.
        let n = reviewer.tasks_completed;
        #[allow(clippy::cast_precision_loss)]
        let new_avg = (reviewer.avg_completion_seconds * n as f64 + completion_seconds as f64)
            / (n + 1) as f64;
        sqlx::query(
            "UPDATE reviewers SET tasks_completed = tasks_completed + 1,
             avg_completion_seconds = ?1, current_task_id = NULL, presence = 'available'
             WHERE id = ?2",
        )
        .bind(new_avg)
        .bind(reviewer_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO candidates (id, resume_url) VALUES (?1, ?2)
             ON CONFLICT (id) DO UPDATE SET resume_url = excluded.resume_url",
        )
        .bind(&task.candidate_id)
        .bind(new_resume_url)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO applications (id, candidate_id, job_id, resume_url,
             ats_score_at_submission, auto_submitted, submitted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
             ON CONFLICT (candidate_id, job_id) DO UPDATE SET
                 resume_url = excluded.resume_url,
                 ats_score_at_submission = excluded.ats_score_at_submission,
                 auto_submitted = 0,
                 submitted_at = excluded.submitted_at",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&task.candidate_id)
        .bind(&task.job_id)
        .bind(new_resume_url)
        .bind(task.ats_score)
        .bind(fmt_ts(now))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        task.status = TaskStatus::Completed;
        task.completed_at = Some(now);
        task.new_resume_url = Some(new_resume_url.to_owned());
        if let Some(appended) = new_notes {
            task.notes = Some(appended);
        }

        self.bus.publish(Event::TaskCompleted {
            task_id: task_id.to_owned(),
            reviewer_id: reviewer_id.to_owned(),
            new_resume_url: new_resume_url.to_owned(),
            completion_seconds,
            timestamp: Utc::now(),
        });
        self.bus.publish(Event::ReviewerPresence {
            reviewer_id: reviewer_id.to_owned(),
            presence: Presence::Available,
            timestamp: Utc::now(),
        });

        Ok(task)
    }

    /// Reviewer-declared failure: the task returns to the queue for another
    /// reviewer, with the reason appended to its notes.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound`, `AppError::NotOwner`,
    /// `AppError::IllegalTransition`, or `AppError::Suspended` per the
    /// gateway contract; `AppError::Transient` on database failure.
    pub async fn fail(&self, task_id: &str, reviewer_id: &str, reason: &str) -> Result<Task> {
        let mut tx = self.db.begin().await?;

        let mut task = require_owned_task(&mut tx, task_id, reviewer_id).await?;
        if !matches!(task.status, TaskStatus::Assigned | TaskStatus::InProgress) {
            return Err(AppError::IllegalTransition(format!(
                "cannot fail task in status {:?}",
                task.status
            )));
        }
        require_active_reviewer(&mut tx, reviewer_id).await?;

        let new_notes = append_note(task.notes.as_deref(), &format!("failed: {reason}"));
        sqlx::query(
            "UPDATE tasks SET status = 'queued', assigned_to = NULL, assigned_at = NULL,
             deadline_at = NULL, started_at = NULL, retry_count = retry_count + 1, notes = ?1
             WHERE id = ?2",
        )
        .bind(&new_notes)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE reviewers SET current_task_id = NULL, presence = 'available'
             WHERE id = ?1",
        )
        .bind(reviewer_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        task.status = TaskStatus::Queued;
        task.assigned_to = None;
        task.assigned_at = None;
        task.deadline_at = None;
        task.started_at = None;
        task.retry_count += 1;
        task.notes = Some(new_notes);

        self.bus.publish(Event::TaskFailed {
            task_id: task_id.to_owned(),
            reviewer_id: reviewer_id.to_owned(),
            reason: reason.to_owned(),
            timestamp: Utc::now(),
        });
        self.bus.publish(Event::ReviewerPresence {
            reviewer_id: reviewer_id.to_owned(),
            presence: Presence::Available,
            timestamp: Utc::now(),
        });

        Ok(task)
    }

    /// Requeue an expired task and apply the strike machine to the holding
    /// reviewer, writing the incident in the same transaction.
    ///
    /// Idempotent: returns `Ok(None)` when the task was already moved on by
    /// a concurrent actor or its deadline has not actually passed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Fatal` on an invariant violation (an in-flight
    /// task without holder or deadline) or `AppError::Transient` on
    /// database failure.
    pub async fn expire(&self, task_id: &str) -> Result<Option<ExpiryReport>> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let Some(task) = fetch_task(&mut tx, task_id).await? else {
            return Ok(None);
        };
        if !matches!(task.status, TaskStatus::Assigned | TaskStatus::InProgress) {
            return Ok(None);
        }
        let deadline = task.deadline_at.ok_or_else(|| {
            AppError::Fatal(format!("task {task_id} is {:?} without deadline_at", task.status))
        })?;
        if deadline >= now {
            return Ok(None);
        }
        let reviewer_id = task.assigned_to.clone().ok_or_else(|| {
            AppError::Fatal(format!("task {task_id} is {:?} without assigned_to", task.status))
        })?;
        let reviewer = fetch_reviewer(&mut tx, &reviewer_id)
            .await?
            .ok_or_else(|| {
                AppError::Fatal(format!("task {task_id} held by unknown reviewer {reviewer_id}"))
            })?;

        // Strike machine: warnings roll into a violation, the third
        // violation suspends the account.
        let (warnings, violations, strike_kind) =
            if reviewer.warnings + 1 >= self.config.sla.warnings_before_violation {
                (0, reviewer.violations + 1, IncidentKind::Violation)
            } else {
                (reviewer.warnings + 1, reviewer.violations, IncidentKind::Warning)
            };
        let suspended = violations >= self.config.sla.violations_before_suspension;
        let incident_kind = if suspended {
            IncidentKind::Suspension
        } else {
            strike_kind
        };

        sqlx::query(
            "UPDATE tasks SET status = 'queued', assigned_to = NULL, assigned_at = NULL,
             deadline_at = NULL, started_at = NULL, retry_count = retry_count + 1
             WHERE id = ?1 AND status IN ('assigned', 'in_progress')",
        )
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        let presence = if suspended {
            Presence::Offline
        } else if reviewer.presence == Presence::Busy {
            Presence::Available
        } else {
            reviewer.presence
        };
        sqlx::query(
            "UPDATE reviewers SET warnings = ?1, violations = ?2, current_task_id = NULL,
             presence = ?3, active = ?4
             WHERE id = ?5",
        )
        .bind(i64::from(warnings))
        .bind(i64::from(violations))
        .bind(presence_str(presence))
        .bind(i64::from(reviewer.active && !suspended))
        .bind(&reviewer_id)
        .execute(&mut *tx)
        .await?;

        let late_minutes = (now - deadline).num_minutes().max(0);
        let incident = Incident::new(
            reviewer_id.clone(),
            incident_kind,
            format!("sla exceeded by {late_minutes} minutes"),
            Some(task_id.to_owned()),
        );
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
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let retry_count = task.retry_count + 1;

        self.bus.publish(Event::ReviewerStrike {
            reviewer_id: reviewer_id.clone(),
            kind: strike_kind,
            warnings,
            violations,
            timestamp: Utc::now(),
        });
        if suspended {
            self.bus.publish(Event::ReviewerSuspended {
                reviewer_id: reviewer_id.clone(),
                timestamp: Utc::now(),
            });
        }
        self.bus.publish(Event::TaskRequeued {
            task_id: task_id.to_owned(),
            retry_count,
            reason: "sla exceeded".into(),
            timestamp: Utc::now(),
        });
        if presence != reviewer.presence {
            self.bus.publish(Event::ReviewerPresence {
                reviewer_id: reviewer_id.clone(),
                presence,
                timestamp: Utc::now(),
            });
        }

        Ok(Some(ExpiryReport {
            task_id: task_id.to_owned(),
            reviewer_id,
            incident_kind,
            retry_count,
            suspended,
        }))
    }

    /// Caller-requested presence change.
    ///
    /// `offline` is always accepted; `available` is rejected while the
    /// reviewer holds a task; `busy` belongs to the engine. Every call
    /// refreshes the heartbeat.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound`, `AppError::Suspended`, or
    /// `AppError::IllegalTransition` per the contract above;
    /// `AppError::Transient` on database failure.
    pub async fn set_presence(&self, reviewer_id: &str, requested: Presence) -> Result<Reviewer> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let mut reviewer = fetch_reviewer(&mut tx, reviewer_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("reviewer {reviewer_id} not found")))?;
        if !reviewer.active {
            return Err(AppError::Suspended(format!(
                "reviewer {reviewer_id} is suspended"
            )));
        }
        match requested {
            Presence::Offline => {}
            Presence::Available => {
                if reviewer.current_task_id.is_some() {
                    return Err(AppError::IllegalTransition(
                        "cannot go available while holding a task".into(),
                    ));
                }
            }
            Presence::Busy => {
                return Err(AppError::IllegalTransition(
                    "busy is set by the engine, not by callers".into(),
                ));
            }
        }

        sqlx::query("UPDATE reviewers SET presence = ?1, last_heartbeat_at = ?2 WHERE id = ?3")
            .bind(presence_str(requested))
            .bind(fmt_ts(now))
            .bind(reviewer_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let changed = reviewer.presence != requested;
        reviewer.presence = requested;
        reviewer.last_heartbeat_at = now;

        if changed {
            self.bus.publish(Event::ReviewerPresence {
                reviewer_id: reviewer_id.to_owned(),
                presence: requested,
                timestamp: Utc::now(),
            });
        }

        Ok(reviewer)
    }

    /// Refresh a reviewer's heartbeat.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown reviewers,
    /// `AppError::Suspended` for inactive ones, or `AppError::Transient`
    /// on database failure.
    pub async fn heartbeat(&self, reviewer_id: &str) -> Result<()> {
        let updated =
            sqlx::query("UPDATE reviewers SET last_heartbeat_at = ?1 WHERE id = ?2 AND active = 1")
                .bind(fmt_ts(Utc::now()))
                .bind(reviewer_id)
                .execute(self.db.as_ref())
                .await?;
        if updated.rows_affected() > 0 {
            return Ok(());
        }

        let row: Option<(i64,)> = sqlx::query_as("SELECT active FROM reviewers WHERE id = ?1")
            .bind(reviewer_id)
            .fetch_optional(self.db.as_ref())
            .await?;
        match row {
            None => Err(AppError::NotFound(format!("reviewer {reviewer_id} not found"))),
            Some(_) => Err(AppError::Suspended(format!(
                "reviewer {reviewer_id} is suspended"
            ))),
        }
    }

    /// Engine-internal disconnect path: force presence to `offline` without
    /// touching any held task, which stays in flight until its deadline.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` on database failure.
    pub async fn mark_offline(&self, reviewer_id: &str) -> Result<()> {
        let updated =
            sqlx::query("UPDATE reviewers SET presence = 'offline' WHERE id = ?1 AND presence != 'offline'")
                .bind(reviewer_id)
                .execute(self.db.as_ref())
                .await?;

        if updated.rows_affected() > 0 {
            self.bus.publish(Event::ReviewerPresence {
                reviewer_id: reviewer_id.to_owned(),
                presence: Presence::Offline,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    /// Mark an available reviewer offline when their heartbeat has gone
    /// stale. Returns whether a row changed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` on database failure.
    pub async fn mark_offline_if_stale(&self, reviewer_id: &str) -> Result<bool> {
        let cutoff = fmt_ts(Utc::now() - self.config.presence_ttl());
        let updated = sqlx::query(
            "UPDATE reviewers SET presence = 'offline'
             WHERE id = ?1 AND presence = 'available' AND last_heartbeat_at <= ?2",
        )
        .bind(reviewer_id)
        .bind(cutoff)
        .execute(self.db.as_ref())
        .await?;

        let changed = updated.rows_affected() > 0;
        if changed {
            self.bus.publish(Event::ReviewerPresence {
                reviewer_id: reviewer_id.to_owned(),
                presence: Presence::Offline,
                timestamp: Utc::now(),
            });
        }
        Ok(changed)
    }

    /// Abandon a queued task that has exhausted its retries. Returns
    /// whether the task was transitioned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transient` on database failure.
    pub async fn mark_timeout(&self, task_id: &str) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE tasks SET status = 'timeout'
             WHERE id = ?1 AND status = 'queued' AND retry_count > ?2",
        )
        .bind(task_id)
        .bind(i64::from(self.config.sla.max_retries))
        .execute(self.db.as_ref())
        .await?;

        let changed = updated.rows_affected() > 0;
        if changed {
            info!(task_id, "task abandoned after exceeding retry cap");
        }
        Ok(changed)
    }

    /// Admin reset: clear the strike counters and re-enable a suspended
    /// account. The reviewer comes back `offline` and must reconnect.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown reviewers or
    /// `AppError::Transient` on database failure.
    pub async fn reinstate(&self, reviewer_id: &str) -> Result<Reviewer> {
        let mut tx = self.db.begin().await?;

        let mut reviewer = fetch_reviewer(&mut tx, reviewer_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("reviewer {reviewer_id} not found")))?;

        sqlx::query(
            "UPDATE reviewers SET warnings = 0, violations = 0, active = 1,
             presence = 'offline'
             WHERE id = ?1",
        )
        .bind(reviewer_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let was_offline = reviewer.presence == Presence::Offline;
        reviewer.warnings = 0;
        reviewer.violations = 0;
        reviewer.active = true;
        reviewer.presence = Presence::Offline;

        if !was_offline {
            self.bus.publish(Event::ReviewerPresence {
                reviewer_id: reviewer_id.to_owned(),
                presence: Presence::Offline,
                timestamp: Utc::now(),
            });
        }
        info!(reviewer_id, "reviewer reinstated by admin");

        Ok(reviewer)
    }
}

/// Append a line to the accumulated task notes.
fn append_note(existing: Option<&str>, line: &str) -> String {
    match existing {
        Some(prior) if !prior.is_empty() => format!("{prior}\n{line}"),
        _ => line.to_owned(),
    }
}

fn encode_string_list(list: &[String]) -> Result<String> {
    serde_json::to_string(list)
        .map_err(|err| AppError::Fatal(format!("failed to encode string list: {err}")))
}

async fn fetch_task(tx: &mut Transaction<'_, Sqlite>, id: &str) -> Result<Option<Task>> {
    let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    row.map(TaskRow::into_task).transpose()
}

async fn fetch_oldest_queued(tx: &mut Transaction<'_, Sqlite>) -> Result<Option<Task>> {
    let row: Option<TaskRow> =
        sqlx::query_as("SELECT * FROM tasks WHERE status = 'queued' ORDER BY created_at LIMIT 1")
            .fetch_optional(&mut **tx)
            .await?;
    row.map(TaskRow::into_task).transpose()
}

async fn fetch_reviewer(tx: &mut Transaction<'_, Sqlite>, id: &str) -> Result<Option<Reviewer>> {
    let row: Option<ReviewerRow> = sqlx::query_as("SELECT * FROM reviewers WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    row.map(ReviewerRow::into_reviewer).transpose()
}

/// Fetch a task and enforce that the caller holds it.
async fn require_owned_task(
    tx: &mut Transaction<'_, Sqlite>,
    task_id: &str,
    reviewer_id: &str,
) -> Result<Task> {
    let task = fetch_task(tx, task_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("task {task_id} not found")))?;
    if task.assigned_to.as_deref() != Some(reviewer_id) {
        return Err(AppError::NotOwner(format!(
            "task {task_id} is not held by reviewer {reviewer_id}"
        )));
    }
    Ok(task)
}

/// Fetch a reviewer and enforce that the account is not suspended.
async fn require_active_reviewer(
    tx: &mut Transaction<'_, Sqlite>,
    reviewer_id: &str,
) -> Result<Reviewer> {
    let reviewer = fetch_reviewer(tx, reviewer_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("reviewer {reviewer_id} not found")))?;
    if !reviewer.active {
        return Err(AppError::Suspended(format!(
            "reviewer {reviewer_id} is suspended"
        )));
    }
    Ok(reviewer)
}
