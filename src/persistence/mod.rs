//! Persistence layer modules.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{AppError, Result};

pub mod application_repo;
pub mod db;
pub mod incident_repo;
pub mod retention;
pub mod reviewer_repo;
pub mod schema;
pub mod store;
pub mod task_repo;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;

/// Format a timestamp as fixed-width RFC 3339 with microseconds.
///
/// Fixed width keeps lexicographic TEXT comparison in SQL equal to
/// chronological comparison.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored RFC 3339 timestamp back into `DateTime<Utc>`.
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| AppError::Fatal(format!("invalid stored timestamp '{raw}': {err}")))
}

/// Parse an optional stored timestamp column.
pub(crate) fn parse_opt_ts(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_ts).transpose()
}
