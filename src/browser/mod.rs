//! Browser driving: the capability seam and the per-URL measurement
//! protocol.
//!
//! The concrete engine sits behind [`Browser`] / [`BrowserSession`], so the
//! protocol in [`measure_url`] depends on a small capability set rather
//! than a specific browser. The production implementation lives in
//! [`webdriver`].

pub mod webdriver;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::artifacts::TestArtifacts;
use crate::error::{PumpkinError, PumpkinResult};
use crate::models::{NavigationTiming, ResourceSummary, TestMeasurement, TestStatus};

/// Navigation timeout.
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout waiting for the load event.
pub const LOAD_TIMEOUT: Duration = Duration::from_secs(60);
/// Post-load settle delay for deferred content.
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);
/// Pixels per forced-scroll increment.
pub const SCROLL_STEP_PX: f64 = 100.0;
/// Delay between scroll increments.
pub const SCROLL_INTERVAL: Duration = Duration::from_millis(100);
/// Pause at the bottom of the page before returning to the top.
pub const SCROLL_BOTTOM_DELAY: Duration = Duration::from_secs(1);
/// Pause at the top before metric extraction.
pub const SCROLL_TOP_DELAY: Duration = Duration::from_millis(500);

const METRICS_SCRIPT: &str = r#"
return (function () {
    var out = { title: document.title, userAgent: navigator.userAgent, resources: [] };
    var nav = performance.getEntriesByType('navigation')[0];
    if (nav) {
        out.navigation = {
            dns: nav.domainLookupEnd - nav.domainLookupStart,
            tcp: nav.connectEnd - nav.connectStart,
            tls: nav.secureConnectionStart > 0 ? nav.connectEnd - nav.secureConnectionStart : -1,
            ttfb: nav.responseStart - nav.requestStart,
            response: nav.responseEnd - nav.responseStart,
            domContentLoaded: nav.domContentLoadedEventEnd - nav.startTime,
            domInteractive: nav.domInteractive - nav.startTime,
            total: nav.loadEventEnd - nav.startTime,
            transferSize: nav.transferSize,
            encodedBodySize: nav.encodedBodySize,
            decodedBodySize: nav.decodedBodySize
        };
    }
    performance.getEntriesByType('resource').forEach(function (e) {
        out.resources.push({
            initiatorType: e.initiatorType || 'other',
            transferSize: e.transferSize || 0,
            encodedBodySize: e.encodedBodySize || 0
        });
    });
    return out;
})();
"#;

const DIMENSIONS_SCRIPT: &str =
    "return { height: document.body.scrollHeight, viewport: window.innerHeight };";

/// One isolated page session with HAR recording.
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigate and wait until the document DOM has loaded.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> PumpkinResult<()>;

    /// Wait for the load event.
    async fn wait_for_load(&mut self, timeout: Duration) -> PumpkinResult<()>;

    /// Evaluate a script in the page, returning its JSON value.
    async fn evaluate(&mut self, script: &str) -> PumpkinResult<Value>;

    /// Capture a full-page screenshot to `path`.
    async fn screenshot(&mut self, path: &Path) -> PumpkinResult<()>;

    /// Close the session, flushing the HAR to disk.
    async fn close(self: Box<Self>) -> PumpkinResult<()>;
}

/// A browser engine that can open isolated sessions.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Family label recorded on measurements (e.g. "chromium").
    fn family(&self) -> &str;

    /// Open a fresh context with no shared storage, recording network
    /// activity to `har_path`.
    async fn open_session(&self, har_path: &Path) -> PumpkinResult<Box<dyn BrowserSession>>;
}

/// Wall-clock budget for one job; every blocking call honors it.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    total: Duration,
}

impl Deadline {
    #[must_use]
    pub fn after(total: Duration) -> Self {
        Self {
            at: Instant::now() + total,
            total,
        }
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    #[must_use]
    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    #[must_use]
    pub fn total_ms(&self) -> u64 {
        self.total.as_millis() as u64
    }
}

async fn step<T>(
    deadline: &Deadline,
    limit: Duration,
    fut: impl std::future::Future<Output = PumpkinResult<T>>,
) -> PumpkinResult<T> {
    let budget = limit.min(deadline.remaining());
    if budget.is_zero() {
        return Err(PumpkinError::DriverTimeout(deadline.total_ms()));
    }
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(PumpkinError::DriverTimeout(deadline.total_ms())),
    }
}

async fn pause(deadline: &Deadline, delay: Duration) -> PumpkinResult<()> {
    sleep(delay.min(deadline.remaining())).await;
    if deadline.expired() {
        return Err(PumpkinError::DriverTimeout(deadline.total_ms()));
    }
    Ok(())
}

struct PageData {
    scroll_duration_ms: i64,
    timing: NavigationTiming,
    resources: ResourceSummary,
    page_title: Option<String>,
    user_agent: String,
}

/// Drive one URL through the full measurement protocol: navigate, settle,
/// forced scroll, metric extraction, screenshot, teardown. The session is
/// closed (flushing the HAR) on every path, including timeouts.
pub async fn measure_url(
    browser: &dyn Browser,
    url: &str,
    artifacts: &TestArtifacts,
    deadline: Deadline,
) -> PumpkinResult<TestMeasurement> {
    let started_at = Utc::now();
    let started = Instant::now();

    let mut session = step(
        &deadline,
        deadline.remaining(),
        browser.open_session(&artifacts.har_path),
    )
    .await?;

    let outcome = drive(session.as_mut(), url, artifacts, &deadline).await;
    let close_outcome = session.close().await;

    let data = outcome?;
    close_outcome?;

    Ok(TestMeasurement {
        url: url.to_string(),
        domain: crate::models::domain_of(url),
        browser: browser.family().to_string(),
        user_agent: data.user_agent,
        page_title: data.page_title,
        status: TestStatus::Passed,
        error_message: None,
        started_at,
        test_duration_ms: started.elapsed().as_millis() as i64,
        scroll_duration_ms: data.scroll_duration_ms,
        timing: data.timing,
        resources: data.resources,
        response_codes: Default::default(),
        screenshot_path: artifacts.screenshot_path.clone(),
        har_path: artifacts.har_path.clone(),
    })
}

async fn drive(
    session: &mut dyn BrowserSession,
    url: &str,
    artifacts: &TestArtifacts,
    deadline: &Deadline,
) -> PumpkinResult<PageData> {
    step(deadline, NAVIGATION_TIMEOUT, session.navigate(url, NAVIGATION_TIMEOUT)).await?;
    step(deadline, LOAD_TIMEOUT, session.wait_for_load(LOAD_TIMEOUT)).await?;
    pause(deadline, SETTLE_DELAY).await?;

    let scroll_duration_ms = forced_scroll(session, deadline).await?;

    let metrics = step(deadline, deadline.remaining(), session.evaluate(METRICS_SCRIPT)).await?;
    let (timing, resources, page_title, user_agent) = parse_metrics(&metrics);

    step(
        deadline,
        deadline.remaining(),
        session.screenshot(&artifacts.screenshot_path),
    )
    .await?;

    Ok(PageData {
        scroll_duration_ms,
        timing,
        resources,
        page_title,
        user_agent,
    })
}

/// Scroll to the bottom in fixed increments to trigger lazy-loaded
/// content, then return to the top. Returns the phase's wall-clock
/// duration in milliseconds.
async fn forced_scroll(
    session: &mut dyn BrowserSession,
    deadline: &Deadline,
) -> PumpkinResult<i64> {
    let phase_started = Instant::now();

    let dims = step(deadline, deadline.remaining(), session.evaluate(DIMENSIONS_SCRIPT)).await?;
    let height = dims.get("height").and_then(Value::as_f64).unwrap_or(0.0);
    let viewport = dims.get("viewport").and_then(Value::as_f64).unwrap_or(0.0);
    let target = (height - viewport).max(0.0);
    debug!(height, viewport, target, "starting forced scroll");

    let mut scrolled = 0.0;
    while scrolled < target {
        step(
            deadline,
            deadline.remaining(),
            session.evaluate("window.scrollBy(0, 100); return window.scrollY;"),
        )
        .await?;
        scrolled += SCROLL_STEP_PX;
        pause(deadline, SCROLL_INTERVAL).await?;
    }

    pause(deadline, SCROLL_BOTTOM_DELAY).await?;
    step(
        deadline,
        deadline.remaining(),
        session.evaluate("window.scrollTo(0, 0); return window.scrollY;"),
    )
    .await?;
    pause(deadline, SCROLL_TOP_DELAY).await?;

    Ok(phase_started.elapsed().as_millis() as i64)
}

/// Production [`crate::scheduler::UrlTester`]: runs the measurement
/// protocol against a real browser engine.
pub struct DriverTester {
    browser: std::sync::Arc<dyn Browser>,
}

impl DriverTester {
    pub fn new(browser: std::sync::Arc<dyn Browser>) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl crate::scheduler::UrlTester for DriverTester {
    fn family(&self) -> &str {
        self.browser.family()
    }

    async fn test_url(
        &self,
        url: &str,
        artifacts: &TestArtifacts,
    ) -> PumpkinResult<TestMeasurement> {
        measure_url(
            self.browser.as_ref(),
            url,
            artifacts,
            Deadline::after(crate::scheduler::JOB_DEADLINE),
        )
        .await
    }
}

/// Non-negative clamp: the Performance API marks unmeasurable phases with
/// negative deltas (e.g. TLS on plain http).
fn clamp_ms(value: Option<f64>) -> Option<f64> {
    value.map(|v| if v < 0.0 { 0.0 } else { v })
}

fn parse_metrics(
    metrics: &Value,
) -> (NavigationTiming, ResourceSummary, Option<String>, String) {
    let nav = metrics.get("navigation");
    let field = |name: &str| nav.and_then(|n| n.get(name)).and_then(Value::as_f64);
    let byte_field = |name: &str| nav.and_then(|n| n.get(name)).and_then(Value::as_i64);

    let timing = NavigationTiming {
        dns_lookup_ms: clamp_ms(field("dns")),
        tcp_connection_ms: clamp_ms(field("tcp")),
        tls_negotiation_ms: clamp_ms(field("tls")),
        time_to_first_byte_ms: clamp_ms(field("ttfb")),
        response_time_ms: clamp_ms(field("response")),
        dom_content_loaded_ms: clamp_ms(field("domContentLoaded")),
        dom_interactive_ms: clamp_ms(field("domInteractive")),
        total_page_load_ms: clamp_ms(field("total")),
        doc_transfer_size: byte_field("transferSize"),
        doc_encoded_size: byte_field("encodedBodySize"),
        doc_decoded_size: byte_field("decodedBodySize"),
    };

    let mut resources = ResourceSummary::default();
    if let Some(entries) = metrics.get("resources").and_then(Value::as_array) {
        for entry in entries {
            let kind = entry
                .get("initiatorType")
                .and_then(Value::as_str)
                .filter(|k| !k.is_empty())
                .unwrap_or("other");
            *resources.by_type.entry(kind.to_string()).or_insert(0) += 1;
            resources.total_resources += 1;
            resources.total_transfer_size +=
                entry.get("transferSize").and_then(Value::as_i64).unwrap_or(0);
            resources.total_encoded_size += entry
                .get("encodedBodySize")
                .and_then(Value::as_i64)
                .unwrap_or(0);
        }
    }

    let page_title = metrics
        .get("title")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    let user_agent = metrics
        .get("userAgent")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    (timing, resources, page_title, user_agent)
}
