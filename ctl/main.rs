#![forbid(unsafe_code)]

//! `dispatchctl` — local CLI companion for `spark-dispatch`.
//!
//! Connects to the admin IPC socket, sends one JSON command line, and
//! renders the reply. Designed for operators with shell access to the
//! dispatch host.

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(
    name = "dispatchctl",
    about = "Local CLI for the spark-dispatch server",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the server's `ipc_name` config).
    #[arg(long, default_value = "spark-dispatch")]
    ipc_name: String,

    /// Shared-secret token; required when the server was started with
    /// `SPARK_DISPATCH_IPC_TOKEN` set.
    #[arg(long, env = "SPARK_DISPATCH_IPC_TOKEN")]
    auth_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show task status counts and reviewer pool health.
    Stats,

    /// Reset a suspended reviewer's strike counters and re-enable the
    /// account.
    Reinstate {
        /// Reviewer ID.
        id: String,
    },

    /// Set a reviewer's presence.
    Presence {
        /// Reviewer ID.
        id: String,
        /// Target presence: available or offline.
        presence: String,
    },

    /// Queue a review task by hand (deployment smoke test).
    Enqueue {
        /// Candidate ID.
        candidate_id: String,
        /// Job ID.
        job_id: String,
        /// ATS score in [0, 1); scores at or above the threshold are
        /// rejected.
        ats_score: f64,
        /// Current resume URL snapshot.
        #[arg(long)]
        old_resume_url: Option<String>,
    },
}

impl Cli {
    /// The request line for this invocation, with the shared secret
    /// attached when configured.
    fn request_json(&self) -> serde_json::Value {
        let mut request = match &self.command {
            Command::Stats => serde_json::json!({ "command": "stats" }),
            Command::Reinstate { id } => {
                serde_json::json!({ "command": "reinstate", "id": id })
            }
            Command::Presence { id, presence } => {
                serde_json::json!({ "command": "presence", "id": id, "presence": presence })
            }
            Command::Enqueue {
                candidate_id,
                job_id,
                ats_score,
                old_resume_url,
            } => serde_json::json!({
                "command": "enqueue",
                "candidate_id": candidate_id,
                "job_id": job_id,
                "ats_score": ats_score,
                "old_resume_url": old_resume_url,
            }),
        };

        if let Some(ref token) = self.auth_token {
            request["auth_token"] = serde_json::json!(token);
        }
        request
    }
}

/// Server reply envelope; `error` carries the store's error taxonomy.
#[derive(Debug, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

fn main() {
    let args = Cli::parse();
    if let Err(message) = run(&args) {
        eprintln!("dispatchctl: {message}");
        std::process::exit(1);
    }
}

fn run(args: &Cli) -> Result<(), String> {
    let request = args.request_json().to_string();

    let raw = exchange(&args.ipc_name, &request).map_err(|err| {
        format!(
            "cannot reach spark-dispatch on socket '{}': {err} — is the server running?",
            args.ipc_name
        )
    })?;

    let reply: Reply = serde_json::from_str(raw.trim())
        .map_err(|err| format!("unreadable server reply: {err}"))?;

    if !reply.ok {
        return Err(reply
            .error
            .unwrap_or_else(|| "server reported an unspecified error".into()));
    }

    match reply.data {
        Some(data) => {
            let rendered = serde_json::to_string_pretty(&data)
                .map_err(|err| format!("unprintable server reply: {err}"))?;
            println!("{rendered}");
        }
        None => println!("ok"),
    }
    Ok(())
}

/// One request/reply round-trip over the admin socket.
fn exchange(ipc_name: &str, request: &str) -> std::io::Result<String> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    stream.write_all(request.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reply = String::new();
    BufReader::new(&stream).read_line(&mut reply)?;
    Ok(reply)
}
