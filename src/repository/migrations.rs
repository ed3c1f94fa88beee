//! Embedded schema migrations.
//!
//! The counter trigger is the single source of truth for `runs.passed` /
//! `runs.failed` / `runs.tests_completed`; application code never computes
//! them. `updated_at` is likewise refreshed by trigger on every run update.

use diesel::connection::SimpleConnection;

use super::pool::{run_blocking, SqlitePool};
use crate::error::PumpkinResult;

/// Current schema version recorded in `schema_meta`.
pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    run_timestamp TEXT NOT NULL,
    total_urls INTEGER NOT NULL,
    parallel_workers INTEGER NOT NULL,
    duration_ms INTEGER,
    tests_completed INTEGER NOT NULL DEFAULT 0 CHECK (tests_completed >= 0),
    passed INTEGER NOT NULL DEFAULT 0 CHECK (passed >= 0),
    failed INTEGER NOT NULL DEFAULT 0 CHECK (failed >= 0),
    status TEXT NOT NULL DEFAULT 'RUNNING'
        CHECK (status IN ('RUNNING', 'COMPLETED', 'PARTIAL', 'FAILED')),
    notes TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS url_tests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    test_run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    test_timestamp TEXT NOT NULL,
    url TEXT NOT NULL CHECK (length(url) <= 2048),
    domain TEXT NOT NULL CHECK (length(domain) <= 512),
    browser TEXT NOT NULL,
    user_agent TEXT NOT NULL DEFAULT '',
    page_title TEXT,
    status TEXT NOT NULL
        CHECK (status IN ('PASSED', 'FAILED', 'TIMEOUT', 'ERROR')),
    error_message TEXT,
    test_duration_ms INTEGER NOT NULL DEFAULT 0,
    scroll_duration_ms INTEGER NOT NULL DEFAULT 0,
    dns_lookup_ms REAL,
    tcp_connection_ms REAL,
    tls_negotiation_ms REAL,
    time_to_first_byte_ms REAL,
    response_time_ms REAL,
    dom_content_loaded_ms REAL,
    dom_interactive_ms REAL,
    total_page_load_ms REAL,
    doc_transfer_size INTEGER,
    doc_encoded_size INTEGER,
    doc_decoded_size INTEGER,
    total_resources INTEGER NOT NULL DEFAULT 0,
    total_transfer_size INTEGER NOT NULL DEFAULT 0,
    total_encoded_size INTEGER NOT NULL DEFAULT 0,
    resources_by_type TEXT NOT NULL DEFAULT '{}',
    http_response_codes TEXT NOT NULL DEFAULT '{}',
    screenshot_path TEXT NOT NULL,
    har_path TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS status_histogram (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_test_id INTEGER NOT NULL REFERENCES url_tests(id) ON DELETE CASCADE,
    status_code INTEGER NOT NULL,
    response_count INTEGER NOT NULL CHECK (response_count >= 0),
    UNIQUE (url_test_id, status_code)
);

CREATE TABLE IF NOT EXISTS resource_types (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_test_id INTEGER NOT NULL REFERENCES url_tests(id) ON DELETE CASCADE,
    resource_type TEXT NOT NULL,
    resource_count INTEGER NOT NULL CHECK (resource_count >= 0),
    UNIQUE (url_test_id, resource_type)
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS trg_url_tests_counters
AFTER INSERT ON url_tests
BEGIN
    UPDATE runs SET
        tests_completed = tests_completed + 1,
        passed = passed + (NEW.status = 'PASSED'),
        failed = failed + (NEW.status <> 'PASSED'),
        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
    WHERE id = NEW.test_run_id;
END;

CREATE TRIGGER IF NOT EXISTS trg_runs_touch_updated_at
AFTER UPDATE ON runs
FOR EACH ROW
WHEN NEW.updated_at = OLD.updated_at
BEGIN
    UPDATE runs SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
    WHERE id = NEW.id;
END;

CREATE INDEX IF NOT EXISTS idx_runs_timestamp ON runs (run_timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_url_tests_run ON url_tests (test_run_id);
CREATE INDEX IF NOT EXISTS idx_url_tests_timestamp ON url_tests (test_timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_url_tests_domain ON url_tests (domain);
CREATE INDEX IF NOT EXISTS idx_url_tests_status ON url_tests (status);
CREATE INDEX IF NOT EXISTS idx_url_tests_page_load ON url_tests (total_page_load_ms);
CREATE INDEX IF NOT EXISTS idx_url_tests_ttfb ON url_tests (time_to_first_byte_ms);
CREATE INDEX IF NOT EXISTS idx_status_histogram_code ON status_histogram (status_code);

CREATE VIEW IF NOT EXISTS v_latest_test_run AS
SELECT r.*,
       (SELECT AVG(t.total_page_load_ms) FROM url_tests t WHERE t.test_run_id = r.id)
           AS avg_total_page_load_ms,
       (SELECT AVG(t.time_to_first_byte_ms) FROM url_tests t WHERE t.test_run_id = r.id)
           AS avg_time_to_first_byte_ms
FROM runs r
ORDER BY r.run_timestamp DESC
LIMIT 1;

CREATE VIEW IF NOT EXISTS v_performance_trends AS
SELECT t.id, t.test_run_id, r.run_timestamp, t.test_timestamp, t.domain, t.url,
       t.status, t.total_page_load_ms, t.time_to_first_byte_ms,
       t.dom_content_loaded_ms
FROM url_tests t
JOIN runs r ON r.id = t.test_run_id;

CREATE VIEW IF NOT EXISTS v_tests_with_errors AS
SELECT t.*
FROM url_tests t
WHERE t.status <> 'PASSED'
   OR EXISTS (SELECT 1 FROM status_histogram sh
              WHERE sh.url_test_id = t.id AND sh.status_code >= 400);

INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1');
"#;

/// Apply the schema to a pooled database. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> PumpkinResult<()> {
    run_blocking(pool.clone(), |conn| {
        conn.batch_execute(SCHEMA_SQL)?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use diesel::prelude::*;

    use super::*;
    use crate::repository::pool::create_pool;

    #[derive(QueryableByName)]
    struct MetaValue {
        #[diesel(sql_type = diesel::sql_types::Text)]
        value: String,
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(&dir.path().join("m.db").display().to_string());
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let version = run_blocking(pool, |conn| {
            let row: MetaValue = diesel::sql_query(
                "SELECT value FROM schema_meta WHERE key = 'schema_version'",
            )
            .get_result(conn)?;
            Ok(row.value)
        })
        .await
        .unwrap();
        assert_eq!(version, SCHEMA_VERSION.to_string());
    }
}
