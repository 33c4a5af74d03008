//! Shared construction helpers for store-level unit tests.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use spark_dispatch::bus::EventBus;
use spark_dispatch::config::GlobalConfig;
use spark_dispatch::models::reviewer::{Reviewer, ReviewerRole};
use spark_dispatch::persistence::db;
use spark_dispatch::persistence::reviewer_repo::ReviewerRepo;
use spark_dispatch::persistence::store::{NewTask, TaskStore};

/// Default config with a writable scratch data dir.
pub fn test_config() -> GlobalConfig {
    GlobalConfig::from_toml_str("data_dir = '/tmp/spark-dispatch-test'").expect("valid test config")
}

/// Build a store over a fresh in-memory database.
pub async fn test_store() -> (TaskStore, Arc<SqlitePool>) {
    test_store_with(test_config()).await
}

/// Build a store over a fresh in-memory database with a custom config.
pub async fn test_store_with(config: GlobalConfig) -> (TaskStore, Arc<SqlitePool>) {
    let db = Arc::new(db::connect_memory().await.expect("db"));
    let store = TaskStore::new(Arc::clone(&db), EventBus::new(), Arc::new(config));
    (store, db)
}

/// A below-threshold match ready to enqueue.
pub fn sample_match(candidate: &str, job: &str, score: f64) -> NewTask {
    NewTask {
        candidate_id: candidate.to_owned(),
        job_id: job.to_owned(),
        ats_score: score,
        old_resume_url: Some(format!("https://resumes.test/{candidate}/v1.pdf")),
        missing_keywords: vec!["kubernetes".into(), "terraform".into()],
        suggestions: vec!["Add these important keywords: kubernetes, terraform".into()],
    }
}

/// Create an available reviewer with the given completion count.
pub async fn create_reviewer(db: &Arc<SqlitePool>, name: &str, completed: u64) -> Reviewer {
    let mut reviewer = Reviewer::new(name.to_owned(), ReviewerRole::Employee);
    reviewer.tasks_completed = completed;
    ReviewerRepo::new(Arc::clone(db))
        .create(&reviewer)
        .await
        .expect("create reviewer")
}

/// Create a reviewer with preset strike counters.
pub async fn create_struck_reviewer(
    db: &Arc<SqlitePool>,
    name: &str,
    warnings: u32,
    violations: u32,
) -> Reviewer {
    let mut reviewer = Reviewer::new(name.to_owned(), ReviewerRole::Employee);
    reviewer.warnings = warnings;
    reviewer.violations = violations;
    ReviewerRepo::new(Arc::clone(db))
        .create(&reviewer)
        .await
        .expect("create reviewer")
}

/// Format a timestamp the way the persistence layer stores them.
pub fn ts(when: DateTime<Utc>) -> String {
    when.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Backdate an in-flight task's deadline so a sweep sees it as expired.
pub async fn backdate_deadline(db: &SqlitePool, task_id: &str, minutes_ago: i64) {
    let past = Utc::now() - chrono::Duration::minutes(minutes_ago);
    sqlx::query("UPDATE tasks SET deadline_at = ?1 WHERE id = ?2")
        .bind(ts(past))
        .bind(task_id)
        .execute(db)
        .await
        .expect("backdate deadline");
}
