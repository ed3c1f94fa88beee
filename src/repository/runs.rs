//! Run repository: creation, lifecycle transitions, and run-level reads.
//!
//! Counters (`passed`, `failed`, `tests_completed`) and `updated_at` are
//! maintained by triggers; this repository only ever writes `status`,
//! `duration_ms`, and the immutable creation fields.

use chrono::{NaiveDate, SecondsFormat, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use super::pool::{run_blocking, SqlitePool};
use super::records::{NewRun, RunRecord};
use crate::error::{PumpkinError, PumpkinResult};
use crate::models::{Run, RunStatus};
use crate::schema::runs;

#[derive(QueryableByName)]
struct LastInsertRowId {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    id: i64,
}

#[derive(QueryableByName)]
struct RunAverages {
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Double>)]
    avg_load: Option<f64>,
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Double>)]
    avg_ttfb: Option<f64>,
}

#[derive(QueryableByName)]
struct DayRow {
    #[diesel(sql_type = diesel::sql_types::Text)]
    day: String,
}

/// Repository for the `runs` table.
#[derive(Clone)]
pub struct RunRepository {
    pool: SqlitePool,
}

impl RunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new run in `RUNNING` state. Returns `(id, uuid)`.
    pub async fn create(
        &self,
        total_urls: i64,
        parallel_workers: i64,
        notes: Option<String>,
    ) -> PumpkinResult<(i64, String)> {
        let pool = self.pool.clone();
        let uuid = Uuid::new_v4().to_string();
        let returned_uuid = uuid.clone();

        let id = run_blocking(pool, move |conn| {
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            let new_run = NewRun {
                uuid: &uuid,
                run_timestamp: &now,
                total_urls,
                parallel_workers,
                status: RunStatus::Running.as_str(),
                notes: notes.as_deref(),
                created_at: &now,
                updated_at: &now,
            };
            diesel::insert_into(runs::table)
                .values(&new_run)
                .execute(conn)?;
            let row: LastInsertRowId =
                diesel::sql_query("SELECT last_insert_rowid() AS id").get_result(conn)?;
            Ok(row.id)
        })
        .await?;

        Ok((id, returned_uuid))
    }

    /// Fetch one run.
    pub async fn get(&self, id: i64) -> PumpkinResult<Option<Run>> {
        let pool = self.pool.clone();
        let record = run_blocking(pool, move |conn| {
            Ok(runs::table.find(id).first::<RunRecord>(conn).optional()?)
        })
        .await?;
        Ok(record.map(RunRecord::into_run))
    }

    /// Most recent runs, newest first.
    pub async fn list(&self, limit: i64) -> PumpkinResult<Vec<Run>> {
        let pool = self.pool.clone();
        let records = run_blocking(pool, move |conn| {
            Ok(runs::table
                .order(runs::run_timestamp.desc())
                .limit(limit)
                .load::<RunRecord>(conn)?)
        })
        .await?;
        Ok(records.into_iter().map(RunRecord::into_run).collect())
    }

    /// The newest run with its per-test averages, if any run exists.
    pub async fn latest_with_averages(
        &self,
    ) -> PumpkinResult<Option<(Run, Option<f64>, Option<f64>)>> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| {
            let record = runs::table
                .order(runs::run_timestamp.desc())
                .first::<RunRecord>(conn)
                .optional()?;
            let Some(record) = record else {
                return Ok(None);
            };
            let averages: RunAverages = diesel::sql_query(
                "SELECT AVG(total_page_load_ms) AS avg_load, \
                        AVG(time_to_first_byte_ms) AS avg_ttfb \
                 FROM url_tests WHERE test_run_id = ?",
            )
            .bind::<diesel::sql_types::BigInt, _>(record.id)
            .get_result(conn)?;
            Ok(Some((
                record.into_run(),
                averages.avg_load,
                averages.avg_ttfb,
            )))
        })
        .await
    }

    /// Move a RUNNING run to a terminal state and record its duration.
    /// Any transition out of a terminal state is rejected.
    pub async fn transition(
        &self,
        id: i64,
        target: RunStatus,
        duration_ms: i64,
    ) -> PumpkinResult<Run> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| {
            conn.transaction::<_, PumpkinError, _>(|conn| {
                let record = runs::table
                    .find(id)
                    .first::<RunRecord>(conn)
                    .optional()?
                    .ok_or(PumpkinError::RunMissing(id))?;

                let current = RunStatus::parse(&record.status).unwrap_or(RunStatus::Failed);
                if current.is_terminal() || !target.is_terminal() {
                    return Err(PumpkinError::RunClosed(id));
                }

                diesel::update(runs::table.find(id))
                    .set((
                        runs::status.eq(target.as_str()),
                        runs::duration_ms.eq(Some(duration_ms)),
                    ))
                    .execute(conn)?;

                let updated = runs::table.find(id).first::<RunRecord>(conn)?;
                Ok(updated.into_run())
            })
        })
        .await
    }

    /// Calendar days having at least one run, newest first.
    pub async fn available_dates(&self) -> PumpkinResult<Vec<NaiveDate>> {
        let pool = self.pool.clone();
        let days = run_blocking(pool, move |conn| {
            let rows: Vec<DayRow> = diesel::sql_query(
                "SELECT DISTINCT date(run_timestamp) AS day FROM runs ORDER BY day DESC",
            )
            .load(conn)?;
            Ok(rows)
        })
        .await?;
        Ok(days
            .into_iter()
            .filter_map(|row| NaiveDate::parse_from_str(&row.day, "%Y-%m-%d").ok())
            .collect())
    }

    /// Runs whose timestamp falls on the given UTC calendar day, newest
    /// first. `date` must already be validated as `YYYY-MM-DD`.
    pub async fn list_by_date(&self, date: NaiveDate) -> PumpkinResult<Vec<Run>> {
        let pool = self.pool.clone();
        let prefix = format!("{}%", date.format("%Y-%m-%d"));
        let records = run_blocking(pool, move |conn| {
            Ok(runs::table
                .filter(runs::run_timestamp.like(prefix))
                .order(runs::run_timestamp.desc())
                .load::<RunRecord>(conn)?)
        })
        .await?;
        Ok(records.into_iter().map(RunRecord::into_run).collect())
    }
}
