//! Relational persistence for runs and URL tests.
//!
//! SQLite through sync Diesel with r2d2 pooling, wrapped in spawn_blocking
//! for async callers. Counter maintenance lives in database triggers, not
//! here; see `migrations`.

pub mod migrations;
pub mod pool;
pub mod records;
pub mod runs;

pub use pool::{create_pool, ping, run_blocking, SqlitePool};
pub use runs::RunRepository;
pub use url_tests::UrlTestRepository;

use chrono::{DateTime, Utc};

/// Parse a stored RFC 3339 timestamp, falling back to the epoch for rows
/// written by hand or by older tooling.
#[must_use]
pub fn parse_datetime(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
}
