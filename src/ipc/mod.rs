//! Local admin IPC modules.

pub mod server;

pub use server::{spawn_ipc_server, AdminState};
