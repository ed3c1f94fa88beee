//! HTTP Archive model and post-processing.
//!
//! Parsing is deliberately lenient: every field defaults, and a file that
//! fails to parse yields an empty analysis rather than an error. The HAR is
//! a capture artifact; a broken one must never fail a test row or a query.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::FailedRequest;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Har {
    #[serde(default)]
    pub log: HarLog,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarLog {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub creator: HarCreator,
    #[serde(default)]
    pub entries: Vec<HarEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarCreator {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    #[serde(default)]
    pub started_date_time: String,
    #[serde(default)]
    pub time: f64,
    #[serde(default)]
    pub request: HarRequest,
    #[serde(default)]
    pub response: HarResponse,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarRequest {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    /// Browsers emit -1 for aborted or cacheless entries.
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub content: HarContent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub mime_type: String,
}

impl Har {
    #[must_use]
    pub fn new(creator_name: &str, creator_version: &str, entries: Vec<HarEntry>) -> Self {
        Self {
            log: HarLog {
                version: "1.2".to_string(),
                creator: HarCreator {
                    name: creator_name.to_string(),
                    version: creator_version.to_string(),
                },
                entries,
            },
        }
    }
}

/// Derived view of one HAR: status-code histogram plus 4xx/5xx inventory.
#[derive(Debug, Clone, Default)]
pub struct HarAnalysis {
    pub response_codes: BTreeMap<u16, i64>,
    pub failed_requests: Vec<FailedRequest>,
}

/// Classify an HTTP status at or above 400.
#[must_use]
pub fn failure_category(status: u16) -> &'static str {
    if status >= 500 {
        "Server Error"
    } else {
        "Client Error"
    }
}

/// Derive the histogram and failed-request list from a parsed HAR.
/// Entries with non-positive status are dropped.
#[must_use]
pub fn analyze(har: &Har) -> HarAnalysis {
    let mut analysis = HarAnalysis::default();
    for entry in &har.log.entries {
        let status = entry.response.status;
        if status <= 0 || status > i64::from(u16::MAX) {
            continue;
        }
        let status = status as u16;
        *analysis.response_codes.entry(status).or_insert(0) += 1;
        if status >= 400 {
            analysis.failed_requests.push(FailedRequest {
                request_url: entry.request.url.clone(),
                status_code: status,
                category: failure_category(status).to_string(),
            });
        }
    }
    // Ascending code, preserving capture order within one code.
    analysis.failed_requests.sort_by_key(|f| f.status_code);
    analysis
}

/// Analyze the HAR at `path`. Unreadable or malformed input logs a warning
/// and yields an empty analysis.
#[must_use]
pub fn analyze_file(path: &Path) -> HarAnalysis {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read HAR");
            return HarAnalysis::default();
        }
    };
    match serde_json::from_slice::<Har>(&raw) {
        Ok(har) => analyze(&har),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed HAR, treating as empty");
            HarAnalysis::default()
        }
    }
}
