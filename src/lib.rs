#![forbid(unsafe_code)]

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod gateway;
pub mod intake;
pub mod ipc;
pub mod models;
pub mod persistence;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
