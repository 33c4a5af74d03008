//! Queue-draining assigner loop.
//!
//! Runs a pass every `assign_tick` and additionally whenever the bus
//! announces a new queued task or a reviewer going available. Each pass
//! repeatedly pairs the oldest queued task with the best-fit reviewer
//! (fewest completed tasks, least-recent heartbeat on ties) until either
//! side runs out. Multiple instances may run concurrently; the store's
//! guarded claims keep them from colliding.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use chrono::Utc;

use crate::bus::{Event, EventBus};
use crate::config::GlobalConfig;
use crate::models::reviewer::Presence;
use crate::persistence::reviewer_repo::ReviewerRepo;
use crate::persistence::store::{ClaimOutcome, TaskStore};
use crate::persistence::task_repo::TaskRepo;
use crate::Result;

/// Upper bound on pairings attempted in one pass. A pass that hits the
/// bound simply resumes on the next tick.
const MAX_PASS_ITERATIONS: u32 = 256;

/// Spawn the assigner loop.
#[must_use]
pub fn spawn_assigner(
    store: TaskStore,
    config: Arc<GlobalConfig>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            run(store, config, cancel).await;
        }
        .instrument(info_span!("assigner")),
    )
}

async fn run(store: TaskStore, config: Arc<GlobalConfig>, cancel: CancellationToken) {
    let bus: EventBus = store.bus();
    let mut events = bus.subscribe();
    let mut interval = tokio::time::interval(config.assign_tick());
    let mut backoff = config.assign_tick();

    loop {
        let wake = tokio::select! {
            () = cancel.cancelled() => {
                info!("assigner shutting down");
                break;
            }
            _ = interval.tick() => true,
            event = events.recv() => match event {
                Ok(Event::TaskEnqueued { .. }) => true,
                Ok(Event::ReviewerPresence { presence: Presence::Available, .. }) => true,
                Ok(_) => false,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "assigner lagged behind the bus; running a pass");
                    true
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    warn!("event bus closed; assigner stopping");
                    break;
                }
            },
        };

        if !wake {
            continue;
        }

        match drain_pass(&store, &config).await {
            Ok(assigned) => {
                if assigned > 0 {
                    debug!(assigned, "assigner pass complete");
                }
                backoff = config.assign_tick();
            }
            Err(err) if err.is_transient() => {
                warn!(%err, "assigner pass failed; backing off");
                backoff = (backoff * 2).min(config.backoff_cap());
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(backoff) => {}
                }
            }
            Err(err) => {
                // Fatal errors halt the component; the orchestrator restarts it.
                tracing::error!(%err, "assigner halted on fatal error");
                break;
            }
        }
    }
}

/// Pair queued tasks with reviewers until one side is exhausted.
/// Returns the number of assignments made.
async fn drain_pass(store: &TaskStore, config: &GlobalConfig) -> Result<u32> {
    let tasks = TaskRepo::new(store.db());
    let reviewers = ReviewerRepo::new(store.db());
    let mut assigned = 0;

    for _ in 0..MAX_PASS_ITERATIONS {
        let Some(task) = tasks.oldest_queued().await? else {
            break;
        };

        // Over-retried tasks are abandoned instead of re-assigned.
        if task.retry_count > config.sla.max_retries {
            store.mark_timeout(&task.id).await?;
            continue;
        }

        let Some(reviewer) = reviewers
            .pick_assignable(
                Utc::now(),
                config.presence_ttl(),
                config.sla.violations_before_suspension,
            )
            .await?
        else {
            break;
        };

        match store.claim_next_task_for(&reviewer.id).await? {
            ClaimOutcome::Claimed(task) => {
                info!(
                    task_id = %task.id,
                    reviewer_id = %reviewer.id,
                    "task assigned"
                );
                assigned += 1;
            }
            ClaimOutcome::NoQueuedTask => break,
            ClaimOutcome::NoCandidateReviewer => {
                // The pick went stale between the read and the claim; take
                // the reviewer out of the pool if the heartbeat lapsed and
                // retry with the next candidate.
                if store.mark_offline_if_stale(&reviewer.id).await? {
                    debug!(reviewer_id = %reviewer.id, "stale reviewer marked offline");
                }
            }
        }
    }

    Ok(assigned)
}
