//! Unit tests for task store operation contracts: enqueue, claim, start,
//! complete, fail, and the retry-cap timeout.

use std::sync::Arc;

use spark_dispatch::models::reviewer::Presence;
use spark_dispatch::models::task::TaskStatus;
use spark_dispatch::persistence::application_repo::ApplicationRepo;
use spark_dispatch::persistence::reviewer_repo::ReviewerRepo;
use spark_dispatch::persistence::store::ClaimOutcome;
use spark_dispatch::persistence::task_repo::TaskRepo;
use spark_dispatch::AppError;

use super::util;

#[tokio::test]
async fn enqueue_persists_a_queued_task() {
    let (store, db) = util::test_store().await;

    let task = store
        .enqueue(util::sample_match("cand-1", "job-1", 0.82))
        .await
        .expect("enqueue");

    let fetched = TaskRepo::new(Arc::clone(&db))
        .get_by_id(&task.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(fetched.status, TaskStatus::Queued);
    assert_eq!(fetched.candidate_id, "cand-1");
    assert!((fetched.ats_score - 0.82).abs() < f64::EPSILON);
    assert_eq!(fetched.retry_count, 0);
    assert_eq!(fetched.missing_keywords, vec!["kubernetes", "terraform"]);
}

#[tokio::test]
async fn enqueue_rejects_scores_at_or_above_threshold() {
    let (store, _db) = util::test_store().await;

    let err = store
        .enqueue(util::sample_match("cand-1", "job-1", 0.90))
        .await
        .expect_err("0.90 bypasses the queue");
    assert!(matches!(err, AppError::ScoreAboveThreshold(_)));

    let err = store
        .enqueue(util::sample_match("cand-1", "job-1", 0.97))
        .await
        .expect_err("0.97 bypasses the queue");
    assert!(matches!(err, AppError::ScoreAboveThreshold(_)));

    // Strictly below slips in.
    store
        .enqueue(util::sample_match("cand-1", "job-1", 0.8999))
        .await
        .expect("0.8999 queues");
}

#[tokio::test]
async fn enqueue_rejects_malformed_input() {
    let (store, _db) = util::test_store().await;

    let err = store
        .enqueue(util::sample_match("", "job-1", 0.5))
        .await
        .expect_err("empty candidate");
    assert!(matches!(err, AppError::Validation(_)));

    let err = store
        .enqueue(util::sample_match("cand-1", "job-1", -0.1))
        .await
        .expect_err("negative score");
    assert!(matches!(err, AppError::Validation(_)));

    let err = store
        .enqueue(util::sample_match("cand-1", "job-1", f64::NAN))
        .await
        .expect_err("nan score");
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn duplicate_enqueues_create_independent_tasks() {
    let (store, db) = util::test_store().await;

    store
        .enqueue(util::sample_match("cand-1", "job-1", 0.7))
        .await
        .expect("first");
    store
        .enqueue(util::sample_match("cand-1", "job-1", 0.7))
        .await
        .expect("second");

    let queued = TaskRepo::new(Arc::clone(&db))
        .list_by_status(TaskStatus::Queued)
        .await
        .expect("list");
    assert_eq!(queued.len(), 2);
}

#[tokio::test]
async fn claim_binds_oldest_task_and_marks_reviewer_busy() {
    let (store, db) = util::test_store().await;
    let reviewer = util::create_reviewer(&db, "Dana", 5).await;

    let first = store
        .enqueue(util::sample_match("cand-1", "job-1", 0.7))
        .await
        .expect("enqueue first");
    store
        .enqueue(util::sample_match("cand-2", "job-2", 0.6))
        .await
        .expect("enqueue second");

    let outcome = store
        .claim_next_task_for(&reviewer.id)
        .await
        .expect("claim");
    let ClaimOutcome::Claimed(task) = outcome else {
        panic!("expected a claim, got {outcome:?}");
    };

    assert_eq!(task.id, first.id, "FIFO by created_at");
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.assigned_to.as_deref(), Some(reviewer.id.as_str()));

    let deadline = task.deadline_at.expect("deadline set");
    let assigned = task.assigned_at.expect("assigned_at set");
    assert_eq!((deadline - assigned).num_minutes(), 20);

    let bound = ReviewerRepo::new(Arc::clone(&db))
        .get_by_id(&reviewer.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(bound.presence, Presence::Busy);
    assert_eq!(bound.current_task_id.as_deref(), Some(task.id.as_str()));
}

#[tokio::test]
async fn claim_reports_empty_queue() {
    let (store, db) = util::test_store().await;
    let reviewer = util::create_reviewer(&db, "Dana", 0).await;

    let outcome = store
        .claim_next_task_for(&reviewer.id)
        .await
        .expect("claim");
    assert!(matches!(outcome, ClaimOutcome::NoQueuedTask));
}

#[tokio::test]
async fn claim_rejects_ineligible_reviewers() {
    let (store, db) = util::test_store().await;
    store
        .enqueue(util::sample_match("cand-1", "job-1", 0.7))
        .await
        .expect("enqueue");

    // Unknown reviewer.
    let outcome = store.claim_next_task_for("ghost").await.expect("claim");
    assert!(matches!(outcome, ClaimOutcome::NoCandidateReviewer));

    // Busy reviewer: wins the first claim, loses the second.
    let busy = util::create_reviewer(&db, "Busy", 0).await;
    let outcome = store.claim_next_task_for(&busy.id).await.expect("claim");
    assert!(matches!(outcome, ClaimOutcome::Claimed(_)));
    store
        .enqueue(util::sample_match("cand-2", "job-2", 0.7))
        .await
        .expect("enqueue");
    let outcome = store.claim_next_task_for(&busy.id).await.expect("claim");
    assert!(matches!(outcome, ClaimOutcome::NoCandidateReviewer));

    // Stale heartbeat.
    let stale = util::create_reviewer(&db, "Stale", 0).await;
    sqlx::query("UPDATE reviewers SET last_heartbeat_at = ?1 WHERE id = ?2")
        .bind(util::ts(chrono::Utc::now() - chrono::Duration::minutes(10)))
        .bind(&stale.id)
        .execute(db.as_ref())
        .await
        .expect("age heartbeat");
    let outcome = store.claim_next_task_for(&stale.id).await.expect("claim");
    assert!(matches!(outcome, ClaimOutcome::NoCandidateReviewer));
}

#[tokio::test]
async fn single_assignment_under_racing_claims() {
    let (store, db) = util::test_store().await;
    let first = util::create_reviewer(&db, "First", 0).await;
    let second = util::create_reviewer(&db, "Second", 0).await;
    store
        .enqueue(util::sample_match("cand-1", "job-1", 0.7))
        .await
        .expect("enqueue");

    let (a, b) = tokio::join!(
        store.claim_next_task_for(&first.id),
        store.claim_next_task_for(&second.id),
    );

    let claims = [a.expect("claim a"), b.expect("claim b")]
        .into_iter()
        .filter(|o| matches!(o, ClaimOutcome::Claimed(_)))
        .count();
    assert_eq!(claims, 1, "exactly one reviewer may win the task");
}

#[tokio::test]
async fn start_moves_assigned_to_in_progress() {
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

    let started = store.start(&task.id, &reviewer.id).await.expect("start");
    assert_eq!(started.status, TaskStatus::InProgress);
    assert!(started.started_at.is_some());

    // Starting twice is a client bug.
    let err = store
        .start(&task.id, &reviewer.id)
        .await
        .expect_err("double start");
    assert!(matches!(err, AppError::IllegalTransition(_)));
}

#[tokio::test]
async fn start_enforces_ownership() {
    let (store, db) = util::test_store().await;
    let owner = util::create_reviewer(&db, "Owner", 0).await;
    let intruder = util::create_reviewer(&db, "Intruder", 0).await;
    store
        .enqueue(util::sample_match("cand-1", "job-1", 0.7))
        .await
        .expect("enqueue");
    let ClaimOutcome::Claimed(task) = store
        .claim_next_task_for(&owner.id)
        .await
        .expect("claim")
    else {
        panic!("expected claim");
    };

    let err = store
        .start(&task.id, &intruder.id)
        .await
        .expect_err("not the owner");
    assert!(matches!(err, AppError::NotOwner(_)));

    let err = store
        .start("no-such-task", &owner.id)
        .await
        .expect_err("unknown task");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn complete_updates_reviewer_candidate_and_application() {
    let (store, db) = util::test_store().await;
    let reviewer = util::create_reviewer(&db, "Dana", 5).await;
    store
        .enqueue(util::sample_match("cand-1", "job-1", 0.82))
        .await
        .expect("enqueue");
    let ClaimOutcome::Claimed(task) = store
        .claim_next_task_for(&reviewer.id)
        .await
        .expect("claim")
    else {
        panic!("expected claim");
    };
    store.start(&task.id, &reviewer.id).await.expect("start");

    let completed = store
        .complete(&task.id, &reviewer.id, "https://resumes.test/cand-1/v2.pdf", Some("tightened summary"))
        .await
        .expect("complete");
    assert_eq!(completed.status, TaskStatus::Completed);
    assert!(completed.completed_at.is_some());

    let after = ReviewerRepo::new(Arc::clone(&db))
        .get_by_id(&reviewer.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(after.tasks_completed, 6);
    assert_eq!(after.presence, Presence::Available);
    assert!(after.current_task_id.is_none());

    let applications = ApplicationRepo::new(Arc::clone(&db));
    let application = applications
        .get_for("cand-1", "job-1")
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(application.resume_url, "https://resumes.test/cand-1/v2.pdf");
    assert!((application.ats_score_at_submission - 0.82).abs() < f64::EPSILON);
    assert!(!application.auto_submitted);

    let resume = applications
        .candidate_resume("cand-1")
        .await
        .expect("query")
        .expect("mirrored");
    assert_eq!(resume, "https://resumes.test/cand-1/v2.pdf");
}

#[tokio::test]
async fn recompletion_updates_the_application_in_place() {
    let (store, db) = util::test_store().await;
    let reviewer = util::create_reviewer(&db, "Dana", 0).await;

    for version in ["v2", "v3"] {
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
        store
            .complete(
                &task.id,
                &reviewer.id,
                &format!("https://resumes.test/cand-1/{version}.pdf"),
                None,
            )
            .await
            .expect("complete");
    }

    let applications = ApplicationRepo::new(Arc::clone(&db))
        .list_all()
        .await
        .expect("list");
    assert_eq!(applications.len(), 1, "(candidate, job) stays unique");
    assert_eq!(
        applications[0].resume_url,
        "https://resumes.test/cand-1/v3.pdf"
    );
}

#[tokio::test]
async fn complete_rejects_wrong_states_and_missing_url() {
    let (store, db) = util::test_store().await;
    let reviewer = util::create_reviewer(&db, "Dana", 0).await;
    let task = store
        .enqueue(util::sample_match("cand-1", "job-1", 0.7))
        .await
        .expect("enqueue");

    // Completing a queued task is a client bug; ownership fails first.
    let err = store
        .complete(&task.id, &reviewer.id, "https://resumes.test/u.pdf", None)
        .await
        .expect_err("queued task");
    assert!(matches!(err, AppError::NotOwner(_)));

    let ClaimOutcome::Claimed(task) = store
        .claim_next_task_for(&reviewer.id)
        .await
        .expect("claim")
    else {
        panic!("expected claim");
    };
    let err = store
        .complete(&task.id, &reviewer.id, "  ", None)
        .await
        .expect_err("blank url");
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn fail_requeues_with_incremented_retry_and_notes() {
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

    let failed = store
        .fail(&task.id, &reviewer.id, "resume file is corrupted")
        .await
        .expect("fail");
    assert_eq!(failed.status, TaskStatus::Queued);
    assert_eq!(failed.retry_count, 1);
    assert!(failed.assigned_to.is_none());
    assert!(failed.deadline_at.is_none());
    assert!(failed
        .notes
        .as_deref()
        .expect("notes")
        .contains("resume file is corrupted"));

    let after = ReviewerRepo::new(Arc::clone(&db))
        .get_by_id(&reviewer.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(after.presence, Presence::Available);
    assert!(after.current_task_id.is_none());
}

#[tokio::test]
async fn mark_timeout_applies_only_past_the_retry_cap() {
    let (store, db) = util::test_store().await;
    let task = store
        .enqueue(util::sample_match("cand-1", "job-1", 0.7))
        .await
        .expect("enqueue");

    assert!(
        !store.mark_timeout(&task.id).await.expect("under cap"),
        "retry_count 0 is under the cap"
    );

    sqlx::query("UPDATE tasks SET retry_count = 4 WHERE id = ?1")
        .bind(&task.id)
        .execute(db.as_ref())
        .await
        .expect("bump retries");
    assert!(store.mark_timeout(&task.id).await.expect("over cap"));

    let after = TaskRepo::new(Arc::clone(&db))
        .get_by_id(&task.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(after.status, TaskStatus::Timeout);

    // Terminal: a second call is a no-op.
    assert!(!store.mark_timeout(&task.id).await.expect("idempotent"));
}
