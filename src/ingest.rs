//! Ingestion of finished measurements.
//!
//! Sits between the scheduler's result stream and the repository: enriches
//! a passed measurement with its HAR-derived histogram, writes it in one
//! transaction, and applies the retry ladder for transient failures.

use tracing::{info, warn};

use crate::error::{PumpkinError, PumpkinResult};
use crate::har;
use crate::models::{TestMeasurement, TestStatus};
use crate::repository::UrlTestRepository;

/// Writes one URL test with its derived tables.
#[derive(Clone)]
pub struct Ingestor {
    tests: UrlTestRepository,
}

impl Ingestor {
    pub fn new(tests: UrlTestRepository) -> Self {
        Self { tests }
    }

    /// Enrich and persist one measurement for `run_id`, returning the new
    /// row id and the status that was actually recorded.
    ///
    /// Passed measurements get their status histogram derived from the HAR
    /// on disk. Synthetic measurements (timeout, crash) keep their empty
    /// derived maps. A connection-class failure is retried once; a
    /// persistent failure is retried as a FAILED row so the run's counters
    /// still account for the URL, and only then dropped.
    pub async fn ingest(
        &self,
        run_id: i64,
        measurement: TestMeasurement,
    ) -> PumpkinResult<(i64, TestStatus)> {
        let mut measurement = measurement;
        if measurement.status == TestStatus::Passed {
            let analysis = har::analyze_file(&measurement.har_path);
            measurement.response_codes = analysis.response_codes;
        }

        match self.insert_with_reconnect(run_id, &measurement).await {
            Ok(id) => {
                info!(
                    url = %measurement.url,
                    status = measurement.status.as_str(),
                    test_id = id,
                    "ingested url test"
                );
                Ok((id, measurement.status))
            }
            Err(e @ (PumpkinError::RunMissing(_) | PumpkinError::RunClosed(_))) => Err(e),
            Err(e) => {
                warn!(url = %measurement.url, error = %e, "ingest failed, recording FAILED row");
                let mut fallback = measurement.clone();
                fallback.status = TestStatus::Failed;
                fallback.error_message = Some(format!("ingest failure: {e}"));
                fallback.response_codes.clear();
                fallback.resources.by_type.clear();
                match self.insert_with_reconnect(run_id, &fallback).await {
                    Ok(id) => Ok((id, TestStatus::Failed)),
                    Err(second) => {
                        warn!(url = %measurement.url, error = %second, "dropping measurement");
                        Err(PumpkinError::IngestPersistent(second.to_string()))
                    }
                }
            }
        }
    }

    async fn insert_with_reconnect(
        &self,
        run_id: i64,
        measurement: &TestMeasurement,
    ) -> PumpkinResult<i64> {
        match self.tests.insert_measurement(run_id, measurement).await {
            Err(e) if e.is_connection_error() => {
                warn!(url = %measurement.url, error = %e, "connection dropped, retrying once");
                self.tests
                    .insert_measurement(run_id, measurement)
                    .await
                    .map(|(id, _)| id)
            }
            other => other.map(|(id, _)| id),
        }
    }
}
