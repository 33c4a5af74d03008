//! Reviewer gateway sessions.
//!
//! One logical session per connected reviewer; the transport in front of
//! it (WebSocket, IPC, test harness) is out of scope and only needs the
//! command channel exposed by [`session::SessionHandle`].

pub mod session;

pub use session::{ActionKind, ReviewerSession, SessionHandle, TaskAction};
