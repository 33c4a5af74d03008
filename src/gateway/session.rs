//! Per-reviewer gateway session actor.
//!
//! The session owns no task state; every action is forwarded to the store
//! and ownership is enforced there. The actor enforces the heartbeat
//! contract: any command resets the liveness window, and a window that
//! elapses with no traffic closes the session and marks the reviewer
//! offline. A held task is deliberately left untouched on close — the
//! deadline monitor requeues it if the reviewer never returns, so a
//! transient disconnect neither punishes the reviewer nor duplicates work.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::models::task::Task;
use crate::persistence::reviewer_repo::ReviewerRepo;
use crate::persistence::store::TaskStore;
use crate::{AppError, Result};

const COMMAND_BUFFER: usize = 16;

/// Reviewer-initiated action verb.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Begin working on an assigned task.
    Start,
    /// Submit the edited resume.
    Complete,
    /// Declare the task impossible; it returns to the queue.
    Fail,
}

/// Wire message for a reviewer-initiated task action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAction {
    /// Action verb.
    pub action: ActionKind,
    /// Task the action applies to; must be held by the caller.
    pub task_id: String,
    /// Edited resume URL; required for `complete`.
    #[serde(default)]
    pub new_resume_url: Option<String>,
    /// Free-form notes attached on completion.
    #[serde(default)]
    pub notes: Option<String>,
    /// Failure reason; recorded for `fail`.
    #[serde(default)]
    pub reason: Option<String>,
}

enum SessionCommand {
    Action {
        action: TaskAction,
        reply: oneshot::Sender<Result<Task>>,
    },
    Heartbeat {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Handle to a running session; dropping it closes the session.
#[derive(Debug)]
pub struct SessionHandle {
    reviewer_id: String,
    tx: mpsc::Sender<SessionCommand>,
    join: JoinHandle<()>,
}

impl SessionHandle {
    /// The reviewer this session belongs to.
    #[must_use]
    pub fn reviewer_id(&self) -> &str {
        &self.reviewer_id
    }

    /// Forward a task action and wait for the store's verdict.
    ///
    /// # Errors
    ///
    /// Surfaces the store error (`NotOwner`, `IllegalTransition`,
    /// `Suspended`, ...) or `AppError::Transient` if the session already
    /// closed.
    pub async fn act(&self, action: TaskAction) -> Result<Task> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Action { action, reply })
            .await
            .map_err(|_| AppError::Transient("session closed".into()))?;
        rx.await
            .map_err(|_| AppError::Transient("session closed".into()))?
    }

    /// Refresh the liveness window and the stored heartbeat.
    ///
    /// # Errors
    ///
    /// Surfaces `AppError::Suspended` for suspended accounts or
    /// `AppError::Transient` if the session already closed.
    pub async fn heartbeat(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Heartbeat { reply })
            .await
            .map_err(|_| AppError::Transient("session closed".into()))?;
        rx.await
            .map_err(|_| AppError::Transient("session closed".into()))?
    }

    /// Close the session and wait for the actor to finish.
    pub async fn close(self) {
        drop(self.tx);
        let _ = self.join.await;
    }
}

/// Factory for per-reviewer gateway sessions.
pub struct ReviewerSession;

impl ReviewerSession {
    /// Open a session for an authenticated reviewer.
    ///
    /// Restores presence to `available` when the reviewer is active and
    /// holds no task; otherwise the prior presence is preserved and only
    /// the heartbeat is refreshed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown reviewers or
    /// `AppError::Suspended` for suspended accounts.
    pub async fn connect(
        store: TaskStore,
        reviewer_id: &str,
        presence_ttl: Duration,
        cancel: CancellationToken,
    ) -> Result<SessionHandle> {
        let repo = ReviewerRepo::new(store.db());
        let reviewer = repo
            .get_by_id(reviewer_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("reviewer {reviewer_id} not found")))?;
        if !reviewer.active {
            return Err(AppError::Suspended(format!(
                "reviewer {reviewer_id} is suspended"
            )));
        }

        if reviewer.current_task_id.is_none() {
            store
                .set_presence(reviewer_id, crate::models::reviewer::Presence::Available)
                .await?;
        } else {
            store.heartbeat(reviewer_id).await?;
        }

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let id = reviewer_id.to_owned();
        let span = info_span!("reviewer_session", reviewer_id = %id);
        let join = tokio::spawn(
            run(store, id.clone(), rx, presence_ttl, cancel).instrument(span),
        );

        info!(reviewer_id, "reviewer session opened");
        Ok(SessionHandle {
            reviewer_id: id,
            tx,
            join,
        })
    }
}

async fn run(
    store: TaskStore,
    reviewer_id: String,
    mut rx: mpsc::Receiver<SessionCommand>,
    presence_ttl: Duration,
    cancel: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            () = cancel.cancelled() => {
                info!("session cancelled by server shutdown");
                break;
            }
            () = tokio::time::sleep(presence_ttl) => {
                warn!("heartbeat missed; closing session");
                break;
            }
            cmd = rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => {
                    info!("session handle dropped");
                    break;
                }
            },
        };

        match command {
            SessionCommand::Heartbeat { reply } => {
                let result = store.heartbeat(&reviewer_id).await;
                let drop_session = matches!(result, Err(AppError::Suspended(_)));
                let _ = reply.send(result);
                if drop_session {
                    break;
                }
            }
            SessionCommand::Action { action, reply } => {
                let result = dispatch_action(&store, &reviewer_id, action).await;
                let drop_session = matches!(result, Err(AppError::Suspended(_)));
                let _ = reply.send(result);
                if drop_session {
                    warn!("suspended mid-session; dropping");
                    break;
                }
            }
        }
    }

    // The held task, if any, stays in flight; only presence changes here.
    if let Err(err) = store.mark_offline(&reviewer_id).await {
        warn!(%err, "failed to mark reviewer offline on close");
    }
}

async fn dispatch_action(
    store: &TaskStore,
    reviewer_id: &str,
    action: TaskAction,
) -> Result<Task> {
    match action.action {
        ActionKind::Start => store.start(&action.task_id, reviewer_id).await,
        ActionKind::Complete => {
            let url = action.new_resume_url.as_deref().ok_or_else(|| {
                AppError::Validation("complete requires new_resume_url".into())
            })?;
            store
                .complete(&action.task_id, reviewer_id, url, action.notes.as_deref())
                .await
        }
        ActionKind::Fail => {
            let reason = action.reason.as_deref().unwrap_or("unspecified");
            store.fail(&action.task_id, reviewer_id, reason).await
        }
    }
}
