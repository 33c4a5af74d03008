//! Local IPC server for `dispatchctl` commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Each request is one JSON object per
//! line, tagged by `command` and deserialized straight into
//! [`AdminCommand`], so required fields and the presence vocabulary are
//! enforced by serde against the domain types rather than checked by hand.
//!
//! ## Protocol
//!
//! ```json
//! {"command": "stats"}
//! {"command": "reinstate", "id": "rev-123"}
//! {"command": "presence", "id": "rev-123", "presence": "offline"}
//! {"command": "enqueue", "candidate_id": "c1", "job_id": "j1", "ats_score": 0.8}
//! ```
//!
//! Replies mirror the store's verdict: `{"ok": true, "data": ...}` on
//! success, `{"ok": false, "error": "<AppError display>"}` otherwise, so
//! `dispatchctl` shows the same error taxonomy the gateway surfaces.

use std::sync::Arc;

use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::intake::{IntakeService, PresenceSet, ScoredMatch};
use crate::models::reviewer::Presence;
use crate::persistence::reviewer_repo::ReviewerRepo;
use crate::persistence::store::TaskStore;
use crate::persistence::task_repo::TaskRepo;
use crate::{AppError, Result};

/// Shared state for the admin IPC surface.
pub struct AdminState {
    /// Store handle for reinstate and stats.
    pub store: TaskStore,
    /// Intake service for enqueue and presence commands.
    pub intake: IntakeService,
    /// Socket identifier; must match `dispatchctl --ipc-name`.
    pub ipc_name: String,
    /// Shared-secret authentication token, when configured.
    pub auth_token: Option<String>,
}

/// One admin request: optional shared secret plus the tagged command.
#[derive(Debug, Deserialize)]
struct AdminRequest {
    auth_token: Option<String>,
    #[serde(flatten)]
    command: AdminCommand,
}

/// The admin command vocabulary.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum AdminCommand {
    /// Task status counts and reviewer pool health.
    Stats,
    /// Admin reset of a suspended reviewer account.
    Reinstate { id: String },
    /// Presence change through the intake contract.
    Presence { id: String, presence: Presence },
    /// Queue a review task by hand, mostly to smoke-test a deployment.
    Enqueue {
        candidate_id: String,
        job_id: String,
        ats_score: f64,
        #[serde(default)]
        old_resume_url: Option<String>,
    },
}

impl AdminCommand {
    fn name(&self) -> &'static str {
        match self {
            Self::Stats => "stats",
            Self::Reinstate { .. } => "reinstate",
            Self::Presence { .. } => "presence",
            Self::Enqueue { .. } => "enqueue",
        }
    }
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Config` if the socket cannot be bound.
pub fn spawn_ipc_server(
    state: Arc<AdminState>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let listener = bind(&state.ipc_name)?;
    info!(ipc_name = %state.ipc_name, "admin socket listening");

    let span = info_span!("admin_ipc", ipc_name = %state.ipc_name);
    Ok(tokio::spawn(
        accept_loop(listener, state, ct).instrument(span),
    ))
}

fn bind(ipc_name: &str) -> Result<Listener> {
    let ns_name = ipc_name
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Config(format!("invalid ipc socket name '{ipc_name}': {err}")))?;

    ListenerOptions::new()
        .name(ns_name)
        .create_tokio()
        .map_err(|err| AppError::Config(format!("failed to bind admin socket: {err}")))
}

async fn accept_loop(listener: Listener, state: Arc<AdminState>, ct: CancellationToken) {
    loop {
        tokio::select! {
            () = ct.cancelled() => {
                info!("admin socket closed");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok(stream) => {
                    tokio::spawn(
                        serve_client(stream, Arc::clone(&state))
                            .instrument(info_span!("admin_client")),
                    );
                }
                Err(err) => warn!(%err, "admin accept failed"),
            }
        }
    }
}

/// Serve one `dispatchctl` invocation: read request lines until EOF,
/// answering each with a single reply line.
async fn serve_client(stream: Stream, state: Arc<AdminState>) {
    let (reader, mut writer) = stream.split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let raw = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(%err, "admin socket read failed");
                break;
            }
        };
        if raw.trim().is_empty() {
            continue;
        }

        let reply = reply_line(handle_request(&state, raw.trim()).await);
        if let Err(err) = writer.write_all(reply.as_bytes()).await {
            warn!(%err, "admin reply write failed");
            break;
        }
    }

    debug!("admin client disconnected");
}

/// Parse, authorize, and execute one request line.
async fn handle_request(
    state: &AdminState,
    raw: &str,
) -> std::result::Result<serde_json::Value, String> {
    let request: AdminRequest = serde_json::from_str(raw)
        .map_err(|err| format!("malformed admin request: {err}"))?;

    if let Some(ref expected) = state.auth_token {
        if request.auth_token.as_deref() != Some(expected.as_str()) {
            warn!(command = request.command.name(), "admin request rejected: bad token");
            return Err("unauthorized".into());
        }
    }

    let command = request.command.name();
    execute(state, request.command)
        .await
        .map_err(|err| {
            debug!(command, %err, "admin command failed");
            err.to_string()
        })
}

/// Run one admin command against the store and intake service.
async fn execute(state: &AdminState, command: AdminCommand) -> Result<serde_json::Value> {
    match command {
        AdminCommand::Stats => {
            let counts = TaskRepo::new(state.store.db()).counts().await?;
            let suspended = ReviewerRepo::new(state.store.db()).count_suspended().await?;
            Ok(serde_json::json!({
                "tasks": counts,
                "suspended_reviewers": suspended,
            }))
        }
        AdminCommand::Reinstate { id } => {
            let reviewer = state.store.reinstate(&id).await?;
            info!(reviewer_id = %id, "reinstated via admin socket");
            Ok(serde_json::json!({
                "reviewer_id": reviewer.id,
                "active": reviewer.active,
                "warnings": reviewer.warnings,
                "violations": reviewer.violations,
            }))
        }
        AdminCommand::Presence { id, presence } => {
            state
                .intake
                .set_presence(PresenceSet {
                    reviewer_id: id.clone(),
                    presence,
                })
                .await?;
            Ok(serde_json::json!({
                "reviewer_id": id,
                "presence": presence,
            }))
        }
        AdminCommand::Enqueue {
            candidate_id,
            job_id,
            ats_score,
            old_resume_url,
        } => {
            let task = state
                .intake
                .enqueue_task(ScoredMatch {
                    candidate_id,
                    job_id,
                    ats_score,
                    missing_keywords: Vec::new(),
                    suggestions: Vec::new(),
                    old_resume_url,
                })
                .await?;
            Ok(serde_json::json!({
                "task_id": task.id,
                "status": task.status,
            }))
        }
    }
}

/// Render an execution result as one newline-terminated reply.
fn reply_line(result: std::result::Result<serde_json::Value, String>) -> String {
    let reply = match result {
        Ok(data) => serde_json::json!({ "ok": true, "data": data }),
        Err(error) => serde_json::json!({ "ok": false, "error": error }),
    };
    let mut line = reply.to_string();
    line.push('\n');
    line
}
