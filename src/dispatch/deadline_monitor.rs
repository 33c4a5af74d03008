//! Deadline monitor sweep.
//!
//! Every `deadline_tick` the monitor requeues expired tasks (striking the
//! holding reviewer, see [`TaskStore::expire`]) and emits pre-deadline
//! warnings for tasks whose remaining time has reached one of the
//! configured minute marks. Warnings are deduplicated through the
//! [`WarningLedger`] and never mutate the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::bus::{Event, EventBus};
use crate::config::GlobalConfig;
use crate::models::task::Task;
use crate::persistence::store::TaskStore;
use crate::persistence::task_repo::TaskRepo;
use crate::Result;

use super::warning_ledger::WarningLedger;

/// Spawn the deadline monitor loop.
#[must_use]
pub fn spawn_deadline_monitor(
    store: TaskStore,
    config: Arc<GlobalConfig>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            run(store, config, cancel).await;
        }
        .instrument(info_span!("deadline_monitor")),
    )
}

async fn run(store: TaskStore, config: Arc<GlobalConfig>, cancel: CancellationToken) {
    let ledger = WarningLedger::new(config.warning_ledger_ttl());
    let mut interval = tokio::time::interval(config.deadline_tick());
    let mut backoff = config.deadline_tick();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("deadline monitor shutting down");
                break;
            }
            _ = interval.tick() => {}
        }

        match sweep(&store, &config, &ledger).await {
            Ok(()) => backoff = config.deadline_tick(),
            Err(err) if err.is_transient() => {
                warn!(%err, "deadline sweep failed; backing off");
                backoff = (backoff * 2).min(config.backoff_cap());
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(backoff) => {}
                }
            }
            Err(err) => {
                tracing::error!(%err, "deadline monitor halted on fatal error");
                break;
            }
        }
    }
}

/// One full sweep: expiries first, then pre-warnings, then ledger upkeep.
pub async fn sweep(store: &TaskStore, config: &GlobalConfig, ledger: &WarningLedger) -> Result<()> {
    let now = Utc::now();
    let tasks = TaskRepo::new(store.db());

    for task in tasks.list_expired(now).await? {
        // Each expiry is its own transaction; one bad row must not stall
        // the rest of the sweep.
        match store.expire(&task.id).await {
            Ok(Some(report)) => {
                info!(
                    task_id = %report.task_id,
                    reviewer_id = %report.reviewer_id,
                    kind = ?report.incident_kind,
                    retry_count = report.retry_count,
                    "expired task requeued"
                );
            }
            Ok(None) => {
                debug!(task_id = %task.id, "task moved on before expiry took hold");
            }
            Err(err) if err.is_transient() => {
                warn!(task_id = %task.id, %err, "expiry deferred to next sweep");
            }
            Err(err) => return Err(err),
        }
    }

    emit_warnings(
        &store.bus(),
        &tasks.list_pending_deadlines(now).await?,
        &config.sla.warning_marks,
        ledger,
        now,
    );

    ledger.prune(now);
    Ok(())
}

/// Publish `task.warning` for every in-flight task sitting at a configured
/// minutes-remaining mark, once per `(task, minute)` pair.
fn emit_warnings(
    bus: &EventBus,
    pending: &[Task],
    marks: &[u32],
    ledger: &WarningLedger,
    now: DateTime<Utc>,
) {
    for task in pending {
        let (Some(deadline), Some(reviewer_id)) = (task.deadline_at, task.assigned_to.as_deref())
        else {
            continue;
        };

        let remaining_seconds = (deadline - now).num_seconds();
        if remaining_seconds <= 0 {
            continue;
        }
        // Ceiling in minutes: 241..300 seconds left reads as "5 minutes".
        let minutes_remaining = u32::try_from((remaining_seconds + 59) / 60).unwrap_or(u32::MAX);

        if !marks.contains(&minutes_remaining) {
            continue;
        }
        if !ledger.try_acquire(&task.id, minutes_remaining, now) {
            continue;
        }

        debug!(task_id = %task.id, minutes_remaining, "pre-deadline warning");
        bus.publish(Event::TaskWarning {
            task_id: task.id.clone(),
            reviewer_id: reviewer_id.to_owned(),
            minutes_remaining,
            timestamp: now,
        });
    }
}
