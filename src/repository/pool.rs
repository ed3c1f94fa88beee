//! Diesel connection pool management for SQLite.
//!
//! diesel-async only supports Postgres/MySQL, so SQLite operations use sync
//! Diesel with r2d2 pooling, wrapped in spawn_blocking.

use std::time::Duration;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};

use crate::error::{PumpkinError, PumpkinResult};

/// Diesel error type alias.
pub type DieselError = diesel::result::Error;

/// Connection pool for SQLite using r2d2.
pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

/// Pooled connection type.
pub type PooledConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Applies the standard pragmas whenever the pool opens a connection.
#[derive(Debug, Clone, Copy)]
struct PragmaCustomizer;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        init_connection_pragmas(conn).map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Create a Diesel connection pool from a database URL.
///
/// Accepts either a bare filesystem path or a `sqlite:`-prefixed URL.
/// Connections are established lazily; an unreachable database surfaces as
/// `DatabaseUnavailable` on first use rather than at startup.
#[must_use]
pub fn create_pool(database_url: &str) -> SqlitePool {
    let url = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);

    let manager = ConnectionManager::<SqliteConnection>::new(url);

    Pool::builder()
        .max_size(10)
        .connection_timeout(Duration::from_secs(5))
        .connection_customizer(Box::new(PragmaCustomizer))
        .build_unchecked(manager)
}

/// Initialize SQLite pragmas for a connection.
///
/// `foreign_keys` must be on for the cascade deletes the schema relies on.
pub fn init_connection_pragmas(conn: &mut SqliteConnection) -> Result<(), DieselError> {
    diesel::sql_query("PRAGMA journal_mode = WAL").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous = NORMAL").execute(conn)?;
    diesel::sql_query("PRAGMA foreign_keys = ON").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout = 5000").execute(conn)?;
    diesel::sql_query("PRAGMA temp_store = MEMORY").execute(conn)?;
    Ok(())
}

/// Run a blocking Diesel operation asynchronously.
///
/// Wraps a sync closure in spawn_blocking so Diesel can be used from async
/// contexts without stalling the runtime. Pool exhaustion and connection
/// failures surface as `DatabaseUnavailable`.
pub async fn run_blocking<F, T>(pool: SqlitePool, f: F) -> PumpkinResult<T>
where
    F: FnOnce(&mut SqliteConnection) -> PumpkinResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| PumpkinError::DatabaseUnavailable(e.to_string()))?;
        f(&mut conn)
    })
    .await
    .map_err(|e| PumpkinError::DatabaseUnavailable(format!("worker task failed: {e}")))?
}

/// Cheap connectivity probe for `/health` and reconciler preconditions.
pub async fn ping(pool: &SqlitePool) -> PumpkinResult<()> {
    run_blocking(pool.clone(), |conn| {
        diesel::sql_query("SELECT 1").execute(conn)?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_opens_and_pings() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("ping.db");
        let pool = create_pool(&db.display().to_string());
        ping(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn sqlite_prefix_is_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("prefixed.db");
        let pool = create_pool(&format!("sqlite://{}", db.display()));
        ping(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_database_reports_unavailable() {
        let pool = create_pool("/no/such/dir/at/all.db");
        let err = ping(&pool).await.unwrap_err();
        assert!(matches!(err, PumpkinError::DatabaseUnavailable(_)));
    }
}
