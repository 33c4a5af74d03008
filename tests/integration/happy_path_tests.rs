//! End-to-end happy path: enqueue through intake, automatic assignment,
//! reviewer start and completion through a gateway session.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use spark_dispatch::dispatch::assigner;
use spark_dispatch::gateway::{ActionKind, ReviewerSession, TaskAction};
use spark_dispatch::models::reviewer::Presence;
use spark_dispatch::models::task::TaskStatus;
use spark_dispatch::persistence::application_repo::ApplicationRepo;
use spark_dispatch::persistence::reviewer_repo::ReviewerRepo;
use spark_dispatch::persistence::task_repo::TaskRepo;

use super::test_helpers as helpers;

#[tokio::test]
async fn enqueue_assign_start_complete() {
    let (store, db, config) = helpers::fast_store().await;
    let (intake, _auto_apply) = helpers::intake_for(&store);
    let reviewer = helpers::create_reviewer(&db, "Dana", 5).await;

    let ct = CancellationToken::new();
    let assigner_handle = assigner::spawn_assigner(store.clone(), Arc::clone(&config), ct.clone());

    let session = ReviewerSession::connect(
        store.clone(),
        &reviewer.id,
        Duration::from_secs(30),
        ct.clone(),
    )
    .await
    .expect("connect");

    let queued = intake
        .enqueue_task(helpers::scored_match("cand-1", "job-1", 0.82))
        .await
        .expect("enqueue");

    // The enqueue event wakes the assigner; wait for the binding.
    let tasks = TaskRepo::new(Arc::clone(&db));
    let mut assigned = None;
    for _ in 0..100 {
        if let Some(task) = tasks.get_by_id(&queued.id).await.expect("query") {
            if task.status == TaskStatus::Assigned {
                assigned = Some(task);
                break;
            }
        }
        sleep(Duration::from_millis(50)).await;
    }
    let assigned = assigned.expect("task assigned within the window");
    assert_eq!(assigned.assigned_to.as_deref(), Some(reviewer.id.as_str()));
    let deadline = assigned.deadline_at.expect("deadline");
    let assigned_at = assigned.assigned_at.expect("assigned_at");
    assert_eq!((deadline - assigned_at).num_minutes(), 20);

    session
        .act(TaskAction {
            action: ActionKind::Start,
            task_id: queued.id.clone(),
            new_resume_url: None,
            notes: None,
            reason: None,
        })
        .await
        .expect("start");

    let completed = session
        .act(TaskAction {
            action: ActionKind::Complete,
            task_id: queued.id.clone(),
            new_resume_url: Some("https://resumes.test/cand-1/v2.pdf".into()),
            notes: Some("tightened the summary".into()),
            reason: None,
        })
        .await
        .expect("complete");
    assert_eq!(completed.status, TaskStatus::Completed);
    assert!(completed.completed_at.expect("completed_at") >= assigned_at);

    // Reviewer counters and presence.
    let after = ReviewerRepo::new(Arc::clone(&db))
        .get_by_id(&reviewer.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(after.tasks_completed, 6);
    assert_eq!(after.presence, Presence::Available);
    assert!(after.current_task_id.is_none());

    // Application row and resume mirror.
    let applications = ApplicationRepo::new(Arc::clone(&db));
    let application = applications
        .get_for("cand-1", "job-1")
        .await
        .expect("query")
        .expect("exists");
    assert!((application.ats_score_at_submission - 0.82).abs() < f64::EPSILON);
    assert!(!application.auto_submitted);
    assert_eq!(application.resume_url, "https://resumes.test/cand-1/v2.pdf");
    assert_eq!(
        applications
            .candidate_resume("cand-1")
            .await
            .expect("query")
            .expect("mirrored"),
        "https://resumes.test/cand-1/v2.pdf"
    );

    ct.cancel();
    session.close().await;
    let _ = assigner_handle.await;
}

#[tokio::test]
async fn assignment_events_reach_subscribers_in_order() {
    let (store, db, config) = helpers::fast_store().await;
    let (intake, _auto_apply) = helpers::intake_for(&store);
    let _reviewer = helpers::create_reviewer(&db, "Dana", 0).await;

    let mut events = store.bus().subscribe();
    let ct = CancellationToken::new();
    let assigner_handle = assigner::spawn_assigner(store.clone(), Arc::clone(&config), ct.clone());

    intake
        .enqueue_task(helpers::scored_match("cand-1", "job-1", 0.5))
        .await
        .expect("enqueue");

    let mut seen = Vec::new();
    for _ in 0..4 {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Ok(event)) => seen.push(event.topic().to_owned()),
            _ => break,
        }
        if seen.contains(&"reviewer.presence".to_owned())
            && seen.contains(&"task.assigned".to_owned())
        {
            break;
        }
    }

    assert_eq!(seen.first().map(String::as_str), Some("task.enqueued"));
    assert!(seen.iter().any(|t| t == "task.assigned"));

    ct.cancel();
    let _ = assigner_handle.await;
}
