//! Unit tests for the deadline strike machine: warning accrual, violation
//! promotion, suspension, and the admin reset.

use std::sync::Arc;

use spark_dispatch::models::incident::IncidentKind;
use spark_dispatch::models::reviewer::Presence;
use spark_dispatch::models::task::TaskStatus;
use spark_dispatch::persistence::incident_repo::IncidentRepo;
use spark_dispatch::persistence::reviewer_repo::ReviewerRepo;
use spark_dispatch::persistence::store::{ClaimOutcome, TaskStore};
use spark_dispatch::persistence::task_repo::TaskRepo;
use spark_dispatch::AppError;

use super::util;

/// Assign a fresh task to the reviewer and backdate its deadline.
async fn assign_expired_task(
    store: &TaskStore,
    db: &Arc<sqlx::SqlitePool>,
    reviewer_id: &str,
) -> String {
    store
        .enqueue(util::sample_match("cand-1", "job-1", 0.7))
        .await
        .expect("enqueue");
    let ClaimOutcome::Claimed(task) = store
        .claim_next_task_for(reviewer_id)
        .await
        .expect("claim")
    else {
        panic!("expected claim");
    };
    util::backdate_deadline(db, &task.id, 4).await;
    task.id
}

#[tokio::test]
async fn first_expiry_records_a_warning_and_requeues() {
    let (store, db) = util::test_store().await;
    let reviewer = util::create_reviewer(&db, "Dana", 0).await;
    let task_id = assign_expired_task(&store, &db, &reviewer.id).await;

    let report = store
        .expire(&task_id)
        .await
        .expect("expire")
        .expect("applied");
    assert_eq!(report.incident_kind, IncidentKind::Warning);
    assert_eq!(report.retry_count, 1);
    assert!(!report.suspended);

    let task = TaskRepo::new(Arc::clone(&db))
        .get_by_id(&task_id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.retry_count, 1);
    assert!(task.assigned_to.is_none());

    let after = ReviewerRepo::new(Arc::clone(&db))
        .get_by_id(&reviewer.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(after.warnings, 1);
    assert_eq!(after.violations, 0);
    assert_eq!(after.presence, Presence::Available, "eligible again");
    assert!(after.active);

    let incident = IncidentRepo::new(Arc::clone(&db))
        .latest_for_reviewer(&reviewer.id)
        .await
        .expect("query")
        .expect("written");
    assert_eq!(incident.kind, IncidentKind::Warning);
    assert!(incident.reason.contains("sla exceeded by"));
    assert_eq!(incident.task_id.as_deref(), Some(task_id.as_str()));
}

#[tokio::test]
async fn third_lapse_promotes_warnings_to_a_violation() {
    let (store, db) = util::test_store().await;
    let reviewer = util::create_struck_reviewer(&db, "Dana", 2, 1).await;
    let task_id = assign_expired_task(&store, &db, &reviewer.id).await;

    let report = store
        .expire(&task_id)
        .await
        .expect("expire")
        .expect("applied");
    assert_eq!(report.incident_kind, IncidentKind::Violation);
    assert!(!report.suspended);

    let after = ReviewerRepo::new(Arc::clone(&db))
        .get_by_id(&reviewer.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(after.warnings, 0, "warnings reset on promotion");
    assert_eq!(after.violations, 2);
    assert!(after.active, "two violations do not suspend");
}

#[tokio::test]
async fn third_violation_suspends_the_account() {
    let (store, db) = util::test_store().await;
    let reviewer = util::create_struck_reviewer(&db, "Dana", 2, 2).await;
    let task_id = assign_expired_task(&store, &db, &reviewer.id).await;

    let report = store
        .expire(&task_id)
        .await
        .expect("expire")
        .expect("applied");
    assert_eq!(report.incident_kind, IncidentKind::Suspension);
    assert!(report.suspended);

    let after = ReviewerRepo::new(Arc::clone(&db))
        .get_by_id(&reviewer.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(after.warnings, 0);
    assert_eq!(after.violations, 3);
    assert!(!after.active);
    assert_eq!(after.presence, Presence::Offline);

    let incident = IncidentRepo::new(Arc::clone(&db))
        .latest_for_reviewer(&reviewer.id)
        .await
        .expect("query")
        .expect("written");
    assert_eq!(incident.kind, IncidentKind::Suspension);
}

#[tokio::test]
async fn suspension_is_sticky_until_admin_reset() {
    let (store, db) = util::test_store().await;
    let reviewer = util::create_struck_reviewer(&db, "Dana", 2, 2).await;
    let task_id = assign_expired_task(&store, &db, &reviewer.id).await;
    store
        .expire(&task_id)
        .await
        .expect("expire")
        .expect("applied");

    // Every reviewer-facing operation now refuses.
    let err = store
        .set_presence(&reviewer.id, Presence::Available)
        .await
        .expect_err("suspended");
    assert!(matches!(err, AppError::Suspended(_)));

    let err = store.heartbeat(&reviewer.id).await.expect_err("suspended");
    assert!(matches!(err, AppError::Suspended(_)));

    let outcome = store
        .claim_next_task_for(&reviewer.id)
        .await
        .expect("claim");
    assert!(matches!(
        outcome,
        spark_dispatch::persistence::store::ClaimOutcome::NoCandidateReviewer
    ));

    // The explicit admin reset re-enables the account.
    let reinstated = store.reinstate(&reviewer.id).await.expect("reinstate");
    assert!(reinstated.active);
    assert_eq!(reinstated.warnings, 0);
    assert_eq!(reinstated.violations, 0);
    assert_eq!(reinstated.presence, Presence::Offline, "must reconnect");

    store
        .set_presence(&reviewer.id, Presence::Available)
        .await
        .expect("presence accepted after reset");
}

#[tokio::test]
async fn expire_is_idempotent() {
    let (store, db) = util::test_store().await;
    let reviewer = util::create_reviewer(&db, "Dana", 0).await;
    let task_id = assign_expired_task(&store, &db, &reviewer.id).await;

    store
        .expire(&task_id)
        .await
        .expect("expire")
        .expect("applied");
    let second = store.expire(&task_id).await.expect("expire");
    assert!(second.is_none(), "task already requeued");

    let after = ReviewerRepo::new(Arc::clone(&db))
        .get_by_id(&reviewer.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(after.warnings, 1, "no double strike");
}

#[tokio::test]
async fn expire_ignores_unexpired_tasks() {
    let (store, db) = util::test_store().await;
    let reviewer = util::create_reviewer(&db, "Dana", 0).await;
    store
        .enqueue(util::sample_match("cand-1", "job-1", 0.7))
        .await
        .expect("enqueue");
    let ClaimOutcome::Claimed(task) = store
        .claim_next_task_for(&reviewer.id)
        .await
        .expect("claim")
    else {
        panic!("expected claim");
    };

    let report = store.expire(&task.id).await.expect("expire");
    assert!(report.is_none(), "deadline is still ahead");

    let after = ReviewerRepo::new(Arc::clone(&db))
        .get_by_id(&reviewer.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(after.warnings, 0);
}

#[tokio::test]
async fn expiry_of_a_disconnected_reviewer_keeps_them_offline() {
    let (store, db) = util::test_store().await;
    let reviewer = util::create_reviewer(&db, "Dana", 0).await;
    let task_id = assign_expired_task(&store, &db, &reviewer.id).await;

    // The gateway dropped the session while the task was held.
    store.mark_offline(&reviewer.id).await.expect("offline");

    store
        .expire(&task_id)
        .await
        .expect("expire")
        .expect("applied");

    let after = ReviewerRepo::new(Arc::clone(&db))
        .get_by_id(&reviewer.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(after.presence, Presence::Offline, "strike does not reconnect them");
    assert_eq!(after.warnings, 1);
    assert!(after.current_task_id.is_none());
}
