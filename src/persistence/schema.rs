//! `SQLite` schema definitions and bootstrap logic.
//!
//! Applied idempotently with `IF NOT EXISTS` on every startup. The indexes
//! back the hot queries: FIFO claim on `(status, created_at)`, fairness
//! pick on the reviewer eligibility columns, and the deadline sweep on
//! `(status, deadline_at)`.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table and index definitions to the connected database.
///
/// # Errors
///
/// Returns `AppError::Transient` if any schema statement fails.
pub async fn apply_schema(db: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS tasks (
    id               TEXT PRIMARY KEY,
    candidate_id     TEXT NOT NULL,
    job_id           TEXT NOT NULL,
    ats_score        REAL NOT NULL,
    status           TEXT NOT NULL
        CHECK (status IN ('queued', 'assigned', 'in_progress', 'completed', 'failed', 'timeout')),
    assigned_to      TEXT,
    assigned_at      TEXT,
    deadline_at      TEXT,
    started_at       TEXT,
    completed_at     TEXT,
    old_resume_url   TEXT,
    new_resume_url   TEXT,
    retry_count      INTEGER NOT NULL DEFAULT 0,
    missing_keywords TEXT NOT NULL,
    suggestions      TEXT NOT NULL,
    notes            TEXT,
    created_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_status_created ON tasks (status, created_at);
CREATE INDEX IF NOT EXISTS idx_tasks_status_deadline ON tasks (status, deadline_at)
    WHERE status IN ('assigned', 'in_progress');

CREATE TABLE IF NOT EXISTS reviewers (
    id                     TEXT PRIMARY KEY,
    display_name           TEXT NOT NULL,
    role                   TEXT NOT NULL
        CHECK (role IN ('admin', 'manager', 'employee')),
    presence               TEXT NOT NULL
        CHECK (presence IN ('available', 'busy', 'offline')),
    warnings               INTEGER NOT NULL DEFAULT 0,
    violations             INTEGER NOT NULL DEFAULT 0,
    tasks_completed        INTEGER NOT NULL DEFAULT 0,
    avg_completion_seconds REAL NOT NULL DEFAULT 0,
    last_heartbeat_at      TEXT NOT NULL,
    active                 INTEGER NOT NULL DEFAULT 1,
    current_task_id        TEXT,
    created_at             TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reviewers_eligibility
    ON reviewers (presence, active, tasks_completed, last_heartbeat_at);

CREATE TABLE IF NOT EXISTS incidents (
    id          TEXT PRIMARY KEY,
    reviewer_id TEXT NOT NULL,
    kind        TEXT NOT NULL
        CHECK (kind IN ('warning', 'violation', 'suspension')),
    reason      TEXT NOT NULL,
    task_id     TEXT,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_incidents_reviewer ON incidents (reviewer_id, created_at);

CREATE TABLE IF NOT EXISTS applications (
    id                      TEXT PRIMARY KEY,
    candidate_id            TEXT NOT NULL,
    job_id                  TEXT NOT NULL,
    resume_url              TEXT NOT NULL,
    ats_score_at_submission REAL NOT NULL,
    auto_submitted          INTEGER NOT NULL DEFAULT 0,
    submitted_at            TEXT NOT NULL,
    UNIQUE (candidate_id, job_id)
);

CREATE TABLE IF NOT EXISTS candidates (
    id         TEXT PRIMARY KEY,
    resume_url TEXT
);
";

    sqlx::raw_sql(ddl).execute(db).await?;
    Ok(())
}
