//! Domain types shared across the scheduler, ingestion, and query layers.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one batch run.
///
/// Born `Running`; moves to exactly one terminal state and never again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Completed,
    Partial,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Partial => "PARTIAL",
            Self::Failed => "FAILED",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "PARTIAL" => Some(Self::Partial),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Final status of a single URL test. Fixed at insertion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    Passed,
    /// Reserved for measurements that could not be persisted on first attempt.
    Failed,
    Timeout,
    Error,
}

impl TestStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Error => "ERROR",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PASSED" => Some(Self::Passed),
            "FAILED" => Some(Self::Failed),
            "TIMEOUT" => Some(Self::Timeout),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Navigation-phase timings read from the Performance API, milliseconds.
/// A `None` means the phase was unmeasurable for that page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NavigationTiming {
    pub dns_lookup_ms: Option<f64>,
    pub tcp_connection_ms: Option<f64>,
    pub tls_negotiation_ms: Option<f64>,
    pub time_to_first_byte_ms: Option<f64>,
    pub response_time_ms: Option<f64>,
    pub dom_content_loaded_ms: Option<f64>,
    pub dom_interactive_ms: Option<f64>,
    pub total_page_load_ms: Option<f64>,
    pub doc_transfer_size: Option<i64>,
    pub doc_encoded_size: Option<i64>,
    pub doc_decoded_size: Option<i64>,
}

/// Aggregate view of all subresources loaded by a page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub total_resources: i64,
    pub total_transfer_size: i64,
    pub total_encoded_size: i64,
    /// Per initiator-type counts, e.g. `{"script": 3, "img": 1}`.
    pub by_type: BTreeMap<String, i64>,
}

/// Everything one worker produced for one URL, ready for ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestMeasurement {
    pub url: String,
    pub domain: String,
    pub browser: String,
    pub user_agent: String,
    pub page_title: Option<String>,
    pub status: TestStatus,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub test_duration_ms: i64,
    pub scroll_duration_ms: i64,
    pub timing: NavigationTiming,
    pub resources: ResourceSummary,
    /// HTTP status code histogram derived from the HAR.
    pub response_codes: BTreeMap<u16, i64>,
    pub screenshot_path: PathBuf,
    pub har_path: PathBuf,
}

impl TestMeasurement {
    /// Skeleton measurement for jobs that never produced page data
    /// (timeouts, worker crashes). Derived maps stay empty.
    #[must_use]
    pub fn synthetic(
        url: &str,
        browser: &str,
        status: TestStatus,
        error_message: Option<String>,
        started_at: DateTime<Utc>,
        test_duration_ms: i64,
        screenshot_path: PathBuf,
        har_path: PathBuf,
    ) -> Self {
        Self {
            url: url.to_string(),
            domain: domain_of(url),
            browser: browser.to_string(),
            user_agent: String::new(),
            page_title: None,
            status,
            error_message,
            started_at,
            test_duration_ms,
            scroll_duration_ms: 0,
            timing: NavigationTiming::default(),
            resources: ResourceSummary::default(),
            response_codes: BTreeMap::new(),
            screenshot_path,
            har_path,
        }
    }
}

/// Hostname of a URL, or the raw input when it does not parse.
#[must_use]
pub fn domain_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

/// One batch run as stored.
#[derive(Debug, Clone, Serialize)]
pub struct Run {
    pub id: i64,
    pub uuid: String,
    pub run_timestamp: DateTime<Utc>,
    pub total_urls: i64,
    pub parallel_workers: i64,
    pub duration_ms: Option<i64>,
    pub tests_completed: i64,
    pub passed: i64,
    pub failed: i64,
    pub status: RunStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Run projection for list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub id: i64,
    pub uuid: String,
    pub run_timestamp: DateTime<Utc>,
    pub total_urls: i64,
    pub parallel_workers: i64,
    pub duration_ms: Option<i64>,
    pub tests_completed: i64,
    pub passed: i64,
    pub failed: i64,
    pub status: RunStatus,
    pub notes: Option<String>,
}

impl From<Run> for RunSummary {
    fn from(run: Run) -> Self {
        Self {
            id: run.id,
            uuid: run.uuid,
            run_timestamp: run.run_timestamp,
            total_urls: run.total_urls,
            parallel_workers: run.parallel_workers,
            duration_ms: run.duration_ms,
            tests_completed: run.tests_completed,
            passed: run.passed,
            failed: run.failed,
            status: run.status,
            notes: run.notes,
        }
    }
}

/// Latest run with its cross-test averages.
#[derive(Debug, Clone, Serialize)]
pub struct LatestRunSummary {
    #[serde(flatten)]
    pub run: RunSummary,
    pub avg_total_page_load_ms: Option<f64>,
    pub avg_time_to_first_byte_ms: Option<f64>,
}

/// Per-test projection for list endpoints and trends.
#[derive(Debug, Clone, Serialize)]
pub struct UrlTestSummary {
    pub id: i64,
    pub uuid: String,
    pub test_run_id: i64,
    pub run_timestamp: DateTime<Utc>,
    pub test_timestamp: DateTime<Utc>,
    pub url: String,
    pub domain: String,
    pub status: TestStatus,
    pub page_title: Option<String>,
    pub total_page_load_ms: Option<f64>,
    pub time_to_first_byte_ms: Option<f64>,
    pub test_duration_ms: i64,
    pub error_message: Option<String>,
    pub screenshot_path: String,
    pub har_path: String,
}

/// Full detail row for one URL test, joined with its run timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct UrlTestDetail {
    pub id: i64,
    pub uuid: String,
    pub test_run_id: i64,
    pub run_timestamp: DateTime<Utc>,
    pub test_timestamp: DateTime<Utc>,
    pub url: String,
    pub domain: String,
    pub browser: String,
    pub user_agent: String,
    pub page_title: Option<String>,
    pub status: TestStatus,
    pub error_message: Option<String>,
    pub test_duration_ms: i64,
    pub scroll_duration_ms: i64,
    pub timing: NavigationTiming,
    pub total_resources: i64,
    pub total_transfer_size: i64,
    pub total_encoded_size: i64,
    pub resources_by_type: BTreeMap<String, i64>,
    pub http_response_codes: BTreeMap<u16, i64>,
    pub screenshot_path: String,
    pub har_path: String,
}

/// One request that came back 4xx/5xx, extracted from a test's HAR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRequest {
    pub request_url: String,
    pub status_code: u16,
    pub category: String,
}

/// One calendar-day bucket of load times for a host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAverage {
    pub date: NaiveDate,
    pub avg_load_time_ms: f64,
    pub test_count: i64,
}
