//! WebDriver-backed browser implementation.
//!
//! Speaks the W3C WebDriver wire protocol directly over HTTP. Network
//! activity is recovered from the driver's performance log (the
//! `goog:loggingPrefs` channel) and assembled into a HAR at session close,
//! so the capability contract of [`super::Browser`] holds without a
//! CDP client dependency.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::{Browser, BrowserSession};
use crate::error::{PumpkinError, PumpkinResult};
use crate::har::{Har, HarContent, HarEntry, HarRequest, HarResponse};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Cap applied when growing the window for a full-page capture.
const MAX_CAPTURE_HEIGHT: f64 = 10_000.0;

/// Browser engine reached through a WebDriver endpoint (chromedriver,
/// geckodriver behind a proxy, a Selenium grid).
pub struct WebDriverBrowser {
    http: reqwest::Client,
    endpoint: String,
    family: String,
}

impl WebDriverBrowser {
    pub fn new(endpoint: &str, family: &str) -> PumpkinResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| PumpkinError::DriverError(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            family: family.to_string(),
        })
    }
}

#[async_trait]
impl Browser for WebDriverBrowser {
    fn family(&self) -> &str {
        &self.family
    }

    async fn open_session(&self, har_path: &Path) -> PumpkinResult<Box<dyn BrowserSession>> {
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "goog:chromeOptions": {
                        "args": [
                            "--headless=new",
                            "--disable-gpu",
                            "--hide-scrollbars",
                            "--incognito"
                        ]
                    },
                    "goog:loggingPrefs": { "performance": "ALL" }
                }
            }
        });

        let body = send(
            &self.http,
            reqwest::Method::POST,
            &format!("{}/session", self.endpoint),
            Some(&capabilities),
        )
        .await?;
        let session_id = body["value"]["sessionId"]
            .as_str()
            .or_else(|| body["sessionId"].as_str())
            .ok_or_else(|| PumpkinError::DriverError("no sessionId in response".into()))?
            .to_string();
        debug!(session_id = %session_id, "opened webdriver session");

        Ok(Box::new(WebDriverSession {
            http: self.http.clone(),
            base: format!("{}/session/{}", self.endpoint, session_id),
            har_path: har_path.to_path_buf(),
            family: self.family.clone(),
        }))
    }
}

struct WebDriverSession {
    http: reqwest::Client,
    base: String,
    har_path: PathBuf,
    family: String,
}

impl WebDriverSession {
    async fn command(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> PumpkinResult<Value> {
        let url = if path.is_empty() {
            self.base.clone()
        } else {
            format!("{}/{path}", self.base)
        };
        send(&self.http, method, &url, body).await
    }

    async fn execute(&self, script: &str) -> PumpkinResult<Value> {
        let body = json!({ "script": script, "args": [] });
        let response = self
            .command(reqwest::Method::POST, "execute/sync", Some(&body))
            .await?;
        Ok(response["value"].clone())
    }

    /// Grow the window to the document height so the capture covers the
    /// whole page, then take the screenshot.
    async fn capture_full_page(&self, path: &Path) -> PumpkinResult<()> {
        let dims = self
            .execute(
                "return { w: Math.max(document.body.scrollWidth, window.innerWidth), \
                          h: Math.max(document.body.scrollHeight, window.innerHeight) };",
            )
            .await?;
        let width = dims.get("w").and_then(Value::as_f64).unwrap_or(1280.0);
        let height = dims
            .get("h")
            .and_then(Value::as_f64)
            .unwrap_or(720.0)
            .min(MAX_CAPTURE_HEIGHT);
        let rect = json!({ "width": width, "height": height, "x": 0, "y": 0 });
        if let Err(e) = self
            .command(reqwest::Method::POST, "window/rect", Some(&rect))
            .await
        {
            debug!(error = %e, "window resize for full-page capture failed");
        }

        let response = self.command(reqwest::Method::GET, "screenshot", None).await?;
        let encoded = response["value"]
            .as_str()
            .ok_or_else(|| PumpkinError::DriverError("screenshot payload missing".into()))?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| PumpkinError::DriverError(format!("bad screenshot payload: {e}")))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Drain the performance log and write the assembled HAR. A driver
    /// without the log channel produces an empty but valid HAR.
    async fn flush_har(&self) -> PumpkinResult<()> {
        let entries = match self
            .command(
                reqwest::Method::POST,
                "log",
                Some(&json!({ "type": "performance" })),
            )
            .await
        {
            Ok(body) => body["value"].as_array().cloned().unwrap_or_default(),
            Err(e) => {
                debug!(error = %e, "performance log unavailable, writing empty HAR");
                Vec::new()
            }
        };

        let har = har_from_performance_log(&entries, &self.family);
        let raw = serde_json::to_vec(&har)
            .map_err(|e| PumpkinError::DriverError(format!("HAR serialization: {e}")))?;
        std::fs::write(&self.har_path, raw)?;
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> PumpkinResult<()> {
        let timeouts = json!({ "pageLoad": timeout.as_millis() as u64 });
        self.command(reqwest::Method::POST, "timeouts", Some(&timeouts))
            .await?;
        self.command(
            reqwest::Method::POST,
            "url",
            Some(&json!({ "url": url })),
        )
        .await?;
        Ok(())
    }

    async fn wait_for_load(&mut self, timeout: Duration) -> PumpkinResult<()> {
        let started = Instant::now();
        loop {
            let state = self.execute("return document.readyState;").await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(PumpkinError::DriverTimeout(timeout.as_millis() as u64));
            }
            sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn evaluate(&mut self, script: &str) -> PumpkinResult<Value> {
        self.execute(script).await
    }

    async fn screenshot(&mut self, path: &Path) -> PumpkinResult<()> {
        self.capture_full_page(path).await
    }

    async fn close(self: Box<Self>) -> PumpkinResult<()> {
        let flush = self.flush_har().await;
        if let Err(e) = self
            .command(reqwest::Method::DELETE, "", None)
            .await
        {
            warn!(error = %e, "webdriver session delete failed");
        }
        flush
    }
}

async fn send(
    http: &reqwest::Client,
    method: reqwest::Method,
    url: &str,
    body: Option<&Value>,
) -> PumpkinResult<Value> {
    let mut request = http.request(method, url);
    if let Some(body) = body {
        request = request.json(body);
    }
    let response = request
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                PumpkinError::DriverTimeout(0)
            } else {
                PumpkinError::DriverError(e.to_string())
            }
        })?;

    let status = response.status();
    let payload: Value = response
        .json()
        .await
        .map_err(|e| PumpkinError::DriverError(format!("bad driver response: {e}")))?;

    if !status.is_success() {
        let kind = payload["value"]["error"].as_str().unwrap_or("unknown");
        let message = payload["value"]["message"].as_str().unwrap_or("");
        if kind.contains("timeout") {
            return Err(PumpkinError::DriverTimeout(0));
        }
        return Err(PumpkinError::DriverError(format!("{kind}: {message}")));
    }
    Ok(payload)
}

#[derive(Default)]
struct PendingEntry {
    url: String,
    method: String,
    status: i64,
    mime_type: String,
    started: String,
    encoded_size: i64,
}

/// Assemble HAR entries from chromedriver performance-log messages.
/// Uncorrelated or unparsable messages are dropped, never fatal.
fn har_from_performance_log(entries: &[Value], family: &str) -> Har {
    let mut order: Vec<String> = Vec::new();
    let mut pending: HashMap<String, PendingEntry> = HashMap::new();

    for raw in entries {
        let Some(message) = raw.get("message").and_then(Value::as_str) else {
            continue;
        };
        let Ok(outer) = serde_json::from_str::<Value>(message) else {
            continue;
        };
        let inner = &outer["message"];
        let Some(method) = inner["method"].as_str() else {
            continue;
        };
        let params = &inner["params"];
        let Some(request_id) = params["requestId"].as_str() else {
            continue;
        };

        match method {
            "Network.requestWillBeSent" => {
                let entry = pending.entry(request_id.to_string()).or_default();
                if entry.url.is_empty() {
                    order.push(request_id.to_string());
                }
                entry.url = params["request"]["url"].as_str().unwrap_or("").to_string();
                entry.method = params["request"]["method"]
                    .as_str()
                    .unwrap_or("GET")
                    .to_string();
                entry.started = params["wallTime"]
                    .as_f64()
                    .map(format_wall_time)
                    .unwrap_or_default();
            }
            "Network.responseReceived" => {
                let entry = pending.entry(request_id.to_string()).or_default();
                entry.status = params["response"]["status"].as_i64().unwrap_or(-1);
                entry.mime_type = params["response"]["mimeType"]
                    .as_str()
                    .unwrap_or("")
                    .to_string();
            }
            "Network.loadingFinished" => {
                if let Some(entry) = pending.get_mut(request_id) {
                    entry.encoded_size = params["encodedDataLength"].as_i64().unwrap_or(0);
                }
            }
            _ => {}
        }
    }

    let har_entries: Vec<HarEntry> = order
        .iter()
        .filter_map(|id| pending.remove(id))
        .filter(|p| !p.url.is_empty())
        .map(|p| HarEntry {
            started_date_time: p.started,
            time: 0.0,
            request: HarRequest {
                method: p.method,
                url: p.url,
            },
            response: HarResponse {
                status: p.status,
                status_text: String::new(),
                content: HarContent {
                    size: p.encoded_size,
                    mime_type: p.mime_type,
                },
            },
        })
        .collect();

    Har::new(family, env!("CARGO_PKG_VERSION"), har_entries)
}

fn format_wall_time(seconds: f64) -> String {
    chrono::DateTime::from_timestamp_millis((seconds * 1000.0) as i64)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default()
}
