//! End-to-end scheduler tests over stub URL testers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use pumpkin::artifacts::{ArtifactStore, TestArtifacts};
use pumpkin::coordinator::{RunCoordinator, RunOutcome};
use pumpkin::error::{PumpkinError, PumpkinResult};
use pumpkin::ingest::Ingestor;
use pumpkin::models::{
    NavigationTiming, ResourceSummary, RunStatus, TestMeasurement, TestStatus,
};
use pumpkin::repository::migrations::run_migrations;
use pumpkin::repository::{create_pool, RunRepository, UrlTestRepository};
use pumpkin::scheduler::{run_batch, SchedulerConfig, UrlTester};

struct Harness {
    coordinator: RunCoordinator,
    runs: RunRepository,
    tests: UrlTestRepository,
    ingestor: Ingestor,
    store: ArtifactStore,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let pool = create_pool(&dir.path().join("pumpkin.db").display().to_string());
    run_migrations(&pool).await.unwrap();
    let runs = RunRepository::new(pool.clone());
    let tests = UrlTestRepository::new(pool.clone());
    Harness {
        coordinator: RunCoordinator::new(runs.clone()),
        runs,
        ingestor: Ingestor::new(tests.clone()),
        tests,
        store: ArtifactStore::new(dir.path().join("test-history")),
        _dir: dir,
    }
}

/// Per-URL behavior of the stub tester.
#[derive(Clone)]
enum Behavior {
    /// Write both artifacts; the HAR carries these status codes.
    Pass {
        statuses: Vec<i64>,
        by_type: Vec<(&'static str, i64)>,
        title: &'static str,
    },
    /// Write a partial HAR, then report the driver deadline.
    TimeoutAfterPartialHar,
    /// Panic inside the worker.
    Panic,
    /// Never return; only the scheduler backstop can end this job.
    Hang,
}

struct StubTester {
    behaviors: HashMap<String, Behavior>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    per_job_delay: Duration,
}

impl StubTester {
    fn new(behaviors: Vec<(&str, Behavior)>) -> Arc<Self> {
        Self::with_delay(behaviors, Duration::ZERO)
    }

    fn with_delay(behaviors: Vec<(&str, Behavior)>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behaviors: behaviors
                .into_iter()
                .map(|(url, b)| (url.to_string(), b))
                .collect(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            per_job_delay: delay,
        })
    }

    fn har_body(statuses: &[i64]) -> String {
        let entries: Vec<String> = statuses
            .iter()
            .map(|s| {
                format!(
                    r#"{{"request":{{"method":"GET","url":"https://stub/{s}"}},"response":{{"status":{s}}}}}"#
                )
            })
            .collect();
        format!(r#"{{"log":{{"version":"1.2","entries":[{}]}}}}"#, entries.join(","))
    }
}

#[async_trait]
impl UrlTester for StubTester {
    fn family(&self) -> &str {
        "stub"
    }

    async fn test_url(
        &self,
        url: &str,
        artifacts: &TestArtifacts,
    ) -> PumpkinResult<TestMeasurement> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let result = self.run(url, artifacts).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl StubTester {
    async fn run(&self, url: &str, artifacts: &TestArtifacts) -> PumpkinResult<TestMeasurement> {
        if !self.per_job_delay.is_zero() {
            tokio::time::sleep(self.per_job_delay).await;
        }
        let behavior = self
            .behaviors
            .get(url)
            .cloned()
            .unwrap_or(Behavior::Pass {
                statuses: vec![200],
                by_type: vec![],
                title: "Stubbed",
            });

        match behavior {
            Behavior::Pass {
                statuses,
                by_type,
                title,
            } => {
                std::fs::write(&artifacts.screenshot_path, b"\x89PNG").unwrap();
                std::fs::write(&artifacts.har_path, Self::har_body(&statuses)).unwrap();
                let mut resources = ResourceSummary::default();
                for (kind, count) in by_type {
                    resources.by_type.insert(kind.to_string(), count);
                    resources.total_resources += count;
                }
                resources.total_transfer_size = 14_000;
                Ok(TestMeasurement {
                    url: url.to_string(),
                    domain: pumpkin::models::domain_of(url),
                    browser: "stub".to_string(),
                    user_agent: "StubBrowser/1.0".to_string(),
                    page_title: Some(title.to_string()),
                    status: TestStatus::Passed,
                    error_message: None,
                    started_at: Utc::now(),
                    test_duration_ms: 5,
                    scroll_duration_ms: 1,
                    timing: NavigationTiming {
                        dns_lookup_ms: Some(12.3),
                        time_to_first_byte_ms: Some(88.0),
                        total_page_load_ms: Some(640.5),
                        doc_transfer_size: Some(14_000),
                        ..Default::default()
                    },
                    resources,
                    response_codes: Default::default(),
                    screenshot_path: artifacts.screenshot_path.clone(),
                    har_path: artifacts.har_path.clone(),
                })
            }
            Behavior::TimeoutAfterPartialHar => {
                std::fs::write(&artifacts.har_path, Self::har_body(&[200])).unwrap();
                Err(PumpkinError::DriverTimeout(120_000))
            }
            Behavior::Panic => panic!("stub driver exploded"),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!()
            }
        }
    }
}

#[tokio::test]
async fn empty_url_list_completes_immediately() {
    let h = harness().await;
    let (run_id, _) = h.coordinator.create_run(0, 4, None).await.unwrap();
    let tester = StubTester::new(vec![]);

    let report = run_batch(
        run_id,
        &[],
        &SchedulerConfig::default(),
        tester,
        &h.store,
        &h.ingestor,
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, RunOutcome::AllPassed);
    assert_eq!(report.duration_ms, 0);
    assert_eq!(report.ingested, 0);

    let run = h
        .coordinator
        .finalize_run(run_id, report.duration_ms, report.outcome)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.tests_completed, 0);
    assert_eq!(run.passed, 0);
    assert_eq!(run.failed, 0);
}

#[tokio::test]
async fn single_passed_url_lands_with_derived_tables() {
    let h = harness().await;
    let url = "https://example.com";
    let (run_id, _) = h.coordinator.create_run(1, 1, None).await.unwrap();
    let tester = StubTester::new(vec![(
        url,
        Behavior::Pass {
            statuses: vec![200, 200, 200, 200],
            by_type: vec![("script", 3), ("img", 1)],
            title: "Example",
        },
    )]);

    let report = run_batch(
        run_id,
        &[url.to_string()],
        &SchedulerConfig::default(),
        tester,
        &h.store,
        &h.ingestor,
    )
    .await
    .unwrap();
    assert_eq!(report.outcome, RunOutcome::AllPassed);
    assert_eq!(report.passed, 1);

    let run = h
        .coordinator
        .finalize_run(run_id, report.duration_ms, report.outcome)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.passed, 1);
    assert_eq!(run.failed, 0);
    assert_eq!(run.tests_completed, 1);

    let tests = h.tests.list_for_run(run_id).await.unwrap();
    assert_eq!(tests.len(), 1);
    let test = &tests[0];
    assert_eq!(test.status, TestStatus::Passed);
    assert_eq!(test.page_title.as_deref(), Some("Example"));
    assert_eq!(test.total_page_load_ms, Some(640.5));
    assert_eq!(test.time_to_first_byte_ms, Some(88.0));
    assert_eq!(test.domain, "example.com");

    // Normalized satellites mirror the in-row maps.
    assert_eq!(h.tests.histogram_rows(test.id).await.unwrap(), vec![(200, 4)]);
    assert_eq!(
        h.tests.resource_rows(test.id).await.unwrap(),
        vec![("img".to_string(), 1), ("script".to_string(), 3)]
    );

    let detail = h.tests.get_detail(test.id).await.unwrap().unwrap();
    assert_eq!(detail.http_response_codes.get(&200), Some(&4));
    assert_eq!(detail.resources_by_type.get("script"), Some(&3));
    assert_eq!(detail.timing.dns_lookup_ms, Some(12.3));
    assert_eq!(detail.timing.doc_transfer_size, Some(14_000));

    // Artifacts exist where the row points.
    let dir = std::path::Path::new(&detail.screenshot_path).parent().unwrap();
    assert!(dir.join("screenshot.png").is_file());
    assert!(dir.join("network.har").is_file());
}

#[tokio::test]
async fn partial_run_with_timeout_is_partial() {
    let h = harness().await;
    let good = "https://good.example";
    let slow = "https://slow.example";
    let (run_id, _) = h.coordinator.create_run(2, 2, None).await.unwrap();
    let tester = StubTester::new(vec![
        (
            good,
            Behavior::Pass {
                statuses: vec![200],
                by_type: vec![],
                title: "Good",
            },
        ),
        (slow, Behavior::TimeoutAfterPartialHar),
    ]);

    let report = run_batch(
        run_id,
        &[good.to_string(), slow.to_string()],
        &SchedulerConfig::default(),
        tester,
        &h.store,
        &h.ingestor,
    )
    .await
    .unwrap();
    assert_eq!(report.outcome, RunOutcome::SomePassed);
    assert_eq!(report.passed, 1);
    assert_eq!(report.failed, 1);

    let run = h
        .coordinator
        .finalize_run(run_id, report.duration_ms, report.outcome)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Partial);
    assert_eq!(run.passed, 1);
    assert_eq!(run.failed, 1);

    let tests = h.tests.list_for_run(run_id).await.unwrap();
    assert_eq!(tests.len(), 2);
    let timed_out = tests.iter().find(|t| t.url == slow).unwrap();
    assert_eq!(timed_out.status, TestStatus::Timeout);

    // Both artifact directories exist; the timed-out one holds whatever
    // partial HAR the driver managed to flush, and empty derived maps.
    for test in &tests {
        assert!(std::path::Path::new(&test.screenshot_path).parent().unwrap().is_dir());
    }
    let timeout_detail = h.tests.get_detail(timed_out.id).await.unwrap().unwrap();
    assert!(timeout_detail.http_response_codes.is_empty());
    assert!(h.tests.histogram_rows(timed_out.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn worker_panic_becomes_error_row() {
    let h = harness().await;
    let boom = "https://boom.example";
    let fine = "https://fine.example";
    let (run_id, _) = h.coordinator.create_run(2, 2, None).await.unwrap();
    let tester = StubTester::new(vec![
        (boom, Behavior::Panic),
        (
            fine,
            Behavior::Pass {
                statuses: vec![200],
                by_type: vec![],
                title: "Fine",
            },
        ),
    ]);

    let report = run_batch(
        run_id,
        &[boom.to_string(), fine.to_string()],
        &SchedulerConfig::default(),
        tester,
        &h.store,
        &h.ingestor,
    )
    .await
    .unwrap();
    assert_eq!(report.outcome, RunOutcome::SomePassed);

    let tests = h.tests.list_for_run(run_id).await.unwrap();
    assert_eq!(tests.len(), 2);
    let crashed = tests.iter().find(|t| t.url == boom).unwrap();
    assert_eq!(crashed.status, TestStatus::Error);
    assert!(crashed
        .error_message
        .as_deref()
        .unwrap()
        .contains("worker crashed"));
}

#[tokio::test]
async fn scheduler_backstop_cancels_hung_job() {
    let h = harness().await;
    let hung = "https://hung.example";
    let (run_id, _) = h.coordinator.create_run(1, 1, None).await.unwrap();
    let tester = StubTester::new(vec![(hung, Behavior::Hang)]);

    let config = SchedulerConfig {
        workers: 1,
        job_deadline: Duration::from_millis(100),
    };
    let report = run_batch(
        run_id,
        &[hung.to_string()],
        &config,
        tester,
        &h.store,
        &h.ingestor,
    )
    .await
    .unwrap();
    assert_eq!(report.outcome, RunOutcome::NoneCompleted);

    let tests = h.tests.list_for_run(run_id).await.unwrap();
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].status, TestStatus::Timeout);
}

#[tokio::test]
async fn worker_pool_never_exceeds_parallelism() {
    let h = harness().await;
    let urls: Vec<String> = (0..12)
        .map(|i| format!("https://site-{i}.example"))
        .collect();
    let (run_id, _) = h
        .coordinator
        .create_run(urls.len() as i64, 3, None)
        .await
        .unwrap();
    let tester = StubTester::with_delay(vec![], Duration::from_millis(40));

    let config = SchedulerConfig {
        workers: 3,
        ..Default::default()
    };
    let report = run_batch(run_id, &urls, &config, tester.clone(), &h.store, &h.ingestor)
        .await
        .unwrap();

    assert_eq!(report.ingested, 12);
    assert_eq!(report.outcome, RunOutcome::AllPassed);
    let max = tester.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 3, "observed {max} concurrent sessions");
    assert!(max >= 2, "pool never actually ran in parallel");
}

#[tokio::test]
async fn finalized_run_rejects_further_ingestion() {
    let h = harness().await;
    let (run_id, _) = h.coordinator.create_run(1, 1, None).await.unwrap();
    h.coordinator
        .finalize_run(run_id, 10, RunOutcome::AllPassed)
        .await
        .unwrap();

    let plan = h.store.plan("https://late.example", Utc::now());
    let late = TestMeasurement::synthetic(
        "https://late.example",
        "stub",
        TestStatus::Error,
        None,
        Utc::now(),
        0,
        plan.screenshot_path,
        plan.har_path,
    );
    let err = h.ingestor.ingest(run_id, late).await.unwrap_err();
    assert!(matches!(err, PumpkinError::RunClosed(_)));

    let run = h.runs.get(run_id).await.unwrap().unwrap();
    assert_eq!(run.tests_completed, 0);
}

#[tokio::test]
async fn counters_match_row_count_after_mixed_batch() {
    let h = harness().await;
    let urls: Vec<String> = vec![
        "https://ok-1.example".into(),
        "https://ok-2.example".into(),
        "https://bad.example".into(),
    ];
    let (run_id, _) = h.coordinator.create_run(3, 2, None).await.unwrap();
    let tester = StubTester::new(vec![("https://bad.example", Behavior::TimeoutAfterPartialHar)]);

    let report = run_batch(
        run_id,
        &urls,
        &SchedulerConfig::default(),
        tester,
        &h.store,
        &h.ingestor,
    )
    .await
    .unwrap();

    let run = h
        .coordinator
        .finalize_run(run_id, report.duration_ms, report.outcome)
        .await
        .unwrap();
    let row_count = h.tests.count_for_run(run_id).await.unwrap();
    assert_eq!(run.passed + run.failed, row_count);
    assert_eq!(run.tests_completed, row_count);
    assert_eq!(run.passed, 2);
    assert_eq!(run.failed, 1);
}
