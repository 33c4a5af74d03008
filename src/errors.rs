//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Bad input to the intake API or reviewer gateway.
    Validation(String),
    /// ATS score at or above the auto-apply threshold; the task never
    /// enters the human queue.
    ScoreAboveThreshold(f64),
    /// Requested entity does not exist.
    NotFound(String),
    /// Caller acted on a task held by a different reviewer.
    NotOwner(String),
    /// Requested state change is not permitted from the current state.
    IllegalTransition(String),
    /// Reviewer is suspended (`active = false`); the session must be dropped.
    Suspended(String),
    /// Retryable failure: database timeout, lock contention, bus publish.
    Transient(String),
    /// Unrecoverable failure: schema drift or a detected invariant violation.
    Fatal(String),
}

impl AppError {
    /// Whether the error is safe to retry on the next tick.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::ScoreAboveThreshold(score) => {
                write!(f, "score above threshold: {score} qualifies for auto-apply")
            }
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::NotOwner(msg) => write!(f, "not owner: {msg}"),
            Self::IllegalTransition(msg) => write!(f, "illegal transition: {msg}"),
            Self::Suspended(msg) => write!(f, "suspended: {msg}"),
            Self::Transient(msg) => write!(f, "transient: {msg}"),
            Self::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Transient(err.to_string())
    }
}
