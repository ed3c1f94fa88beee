//! Bounded-parallelism batch scheduler.
//!
//! URL jobs flow through a bounded channel to `W` worker tasks; finished
//! measurements flow through a result channel to a single ingest loop, so
//! database writes are serialized without any application-level locking.
//! A job failure of any kind never escapes: it becomes a synthetic
//! measurement and is ingested like the rest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use crate::artifacts::{ArtifactStore, TestArtifacts};
use crate::coordinator::RunOutcome;
use crate::error::{PumpkinError, PumpkinResult};
use crate::ingest::Ingestor;
use crate::models::{TestMeasurement, TestStatus};

/// Wall-clock budget for one job, navigation through HAR flush.
pub const JOB_DEADLINE: Duration = Duration::from_secs(120);

/// Backstop slack on top of the tester's own deadline enforcement.
const DEADLINE_SLACK: Duration = Duration::from_secs(2);

/// Runs the full measurement protocol for one URL. The production
/// implementation drives a browser; tests substitute stubs.
#[async_trait]
pub trait UrlTester: Send + Sync {
    /// Browser family label used for synthetic measurements.
    fn family(&self) -> &str;

    /// Measure one URL into the pre-allocated artifact paths.
    async fn test_url(
        &self,
        url: &str,
        artifacts: &TestArtifacts,
    ) -> PumpkinResult<TestMeasurement>;
}

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub job_deadline: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            job_deadline: JOB_DEADLINE,
        }
    }
}

/// What a finished batch looked like.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub duration_ms: i64,
    pub outcome: RunOutcome,
    pub passed: usize,
    pub failed: usize,
    pub ingested: usize,
}

#[derive(Debug, Clone)]
struct UrlJob {
    index: usize,
    url: String,
}

/// Fan the URL list out to `workers` browser workers and ingest every
/// result. Completes only after each job has either ingested a
/// measurement or been accounted for by a synthetic error row.
pub async fn run_batch(
    run_id: i64,
    urls: &[String],
    config: &SchedulerConfig,
    tester: Arc<dyn UrlTester>,
    store: &ArtifactStore,
    ingestor: &Ingestor,
) -> PumpkinResult<BatchReport> {
    let started = Instant::now();
    let total = urls.len();

    if total == 0 {
        return Ok(BatchReport {
            duration_ms: 0,
            outcome: RunOutcome::AllPassed,
            passed: 0,
            failed: 0,
            ingested: 0,
        });
    }

    let workers = config.workers.max(1);
    let (job_tx, job_rx) = mpsc::channel::<UrlJob>(total);
    for (index, url) in urls.iter().enumerate() {
        job_tx
            .send(UrlJob {
                index,
                url: url.clone(),
            })
            .await
            .map_err(|_| PumpkinError::RunAborted("job queue closed".into()))?;
    }
    drop(job_tx);
    let job_rx = Arc::new(Mutex::new(job_rx));

    let (result_tx, mut result_rx) = mpsc::channel::<TestMeasurement>(workers);

    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let job_rx = Arc::clone(&job_rx);
        let result_tx = result_tx.clone();
        let tester = Arc::clone(&tester);
        let store = store.clone();
        let job_deadline = config.job_deadline;
        handles.push(tokio::spawn(async move {
            worker_loop(worker_id, run_id, job_rx, result_tx, tester, store, job_deadline).await;
        }));
    }
    drop(result_tx);

    let mut passed = 0usize;
    let mut failed = 0usize;
    let mut ingested = 0usize;
    while let Some(measurement) = result_rx.recv().await {
        let url = measurement.url.clone();
        match ingestor.ingest(run_id, measurement).await {
            Ok((_, recorded)) => {
                ingested += 1;
                if recorded == TestStatus::Passed {
                    passed += 1;
                } else {
                    failed += 1;
                }
            }
            Err(e) => {
                warn!(run_id, url = %url, error = %e, "measurement not persisted");
                failed += 1;
            }
        }
    }

    for handle in handles {
        let _ = handle.await;
    }

    let outcome = if passed == total {
        RunOutcome::AllPassed
    } else if passed == 0 {
        RunOutcome::NoneCompleted
    } else {
        RunOutcome::SomePassed
    };

    Ok(BatchReport {
        duration_ms: started.elapsed().as_millis() as i64,
        outcome,
        passed,
        failed,
        ingested,
    })
}

async fn worker_loop(
    worker_id: usize,
    run_id: i64,
    job_rx: Arc<Mutex<mpsc::Receiver<UrlJob>>>,
    result_tx: mpsc::Sender<TestMeasurement>,
    tester: Arc<dyn UrlTester>,
    store: ArtifactStore,
    job_deadline: Duration,
) {
    loop {
        let job = {
            let mut rx = job_rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        info!(worker_id, run_id, job = job.index, url = %job.url, "job start");
        let measurement = run_job(&job, Arc::clone(&tester), &store, job_deadline).await;
        info!(
            worker_id,
            run_id,
            job = job.index,
            url = %job.url,
            status = measurement.status.as_str(),
            duration_ms = measurement.test_duration_ms,
            "job finished"
        );

        if result_tx.send(measurement).await.is_err() {
            break;
        }
    }
}

/// Execute one job with crash containment: a timeout, driver error, or
/// panic inside the tester all collapse into a synthetic measurement.
async fn run_job(
    job: &UrlJob,
    tester: Arc<dyn UrlTester>,
    store: &ArtifactStore,
    job_deadline: Duration,
) -> TestMeasurement {
    let started_at = Utc::now();
    let job_started = Instant::now();
    let plan = store.plan(&job.url, started_at);

    let synthetic = |status: TestStatus, message: Option<String>, elapsed_ms: i64| {
        TestMeasurement::synthetic(
            &job.url,
            tester.family(),
            status,
            message,
            started_at,
            elapsed_ms,
            plan.screenshot_path.clone(),
            plan.har_path.clone(),
        )
    };

    if let Err(e) = store.allocate(&plan) {
        warn!(url = %job.url, error = %e, "artifact allocation failed");
        return synthetic(TestStatus::Error, Some(e.to_string()), 0);
    }

    // The tester runs in its own task so a panic is contained to this job.
    let mut handle = tokio::spawn({
        let url = job.url.clone();
        let plan = plan.clone();
        let tester = Arc::clone(&tester);
        async move { tester.test_url(&url, &plan).await }
    });

    match timeout(job_deadline + DEADLINE_SLACK, &mut handle).await {
        Ok(Ok(Ok(measurement))) => measurement,
        Ok(Ok(Err(PumpkinError::DriverTimeout(_)))) => synthetic(
            TestStatus::Timeout,
            None,
            job_started.elapsed().as_millis() as i64,
        ),
        Ok(Ok(Err(e))) => synthetic(
            TestStatus::Error,
            Some(e.to_string()),
            job_started.elapsed().as_millis() as i64,
        ),
        Ok(Err(join_err)) => synthetic(
            TestStatus::Error,
            Some(format!("worker crashed: {join_err}")),
            job_started.elapsed().as_millis() as i64,
        ),
        Err(_) => {
            handle.abort();
            synthetic(
                TestStatus::Timeout,
                None,
                job_started.elapsed().as_millis() as i64,
            )
        }
    }
}
