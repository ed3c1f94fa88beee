//! Environment-driven configuration.

use std::env;
use std::fs;
use std::path::PathBuf;

use crate::error::{PumpkinError, PumpkinResult};

/// Default HTTP listen port.
pub const DEFAULT_PORT: u16 = 3000;
/// Default WebDriver endpoint (a local chromedriver).
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
/// Default browser family label recorded on measurements.
pub const DEFAULT_BROWSER: &str = "chromium";
/// Directory under the data dir that owns all per-test artifacts.
pub const TEST_HISTORY_DIR: &str = "test-history";

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Database connection string (`DATABASE_URL`, required).
    pub database_url: String,
    /// HTTP listen port.
    pub port: u16,
    /// Base data directory; artifacts live under `<data_dir>/test-history/`.
    pub data_dir: PathBuf,
    /// WebDriver endpoint the browser driver talks to.
    pub webdriver_url: String,
    /// Browser family label.
    pub browser: String,
    /// Default target for a single test invoked without an argument.
    pub test_url: Option<String>,
    /// Run id handed down by the scheduler to worker processes.
    pub test_run_id: Option<i64>,
}

impl Settings {
    /// Load settings from the environment. Fails with a one-line message
    /// naming the variable when `DATABASE_URL` is absent.
    pub fn from_env() -> PumpkinResult<Self> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| PumpkinError::BadRequest("DATABASE_URL is not set".into()))?;

        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| PumpkinError::BadRequest(format!("PORT is not a port: {raw}")))?,
            Err(_) => DEFAULT_PORT,
        };

        let test_run_id = match env::var("TEST_RUN_ID") {
            Ok(raw) => Some(raw.parse::<i64>().map_err(|_| {
                PumpkinError::BadRequest(format!("TEST_RUN_ID is not an integer: {raw}"))
            })?),
            Err(_) => None,
        };

        Ok(Self {
            database_url,
            port,
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/app")),
            webdriver_url: env::var("WEBDRIVER_URL")
                .unwrap_or_else(|_| DEFAULT_WEBDRIVER_URL.to_string()),
            browser: env::var("BROWSER").unwrap_or_else(|_| DEFAULT_BROWSER.to_string()),
            test_url: env::var("TEST_URL").ok(),
            test_run_id,
        })
    }

    /// Root directory for per-test artifacts.
    #[must_use]
    pub fn test_history_dir(&self) -> PathBuf {
        self.data_dir.join(TEST_HISTORY_DIR)
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(self.test_history_dir())?;
        Ok(())
    }
}

/// Read a URL list file: one URL per line, trimmed, blank lines skipped.
/// Every URL must start with `http://` or `https://`.
pub fn load_url_file(path: &std::path::Path) -> PumpkinResult<Vec<String>> {
    let raw = fs::read_to_string(path)
        .map_err(|e| PumpkinError::RunAborted(format!("cannot read {}: {e}", path.display())))?;

    let mut urls = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !line.starts_with("http://") && !line.starts_with("https://") {
            return Err(PumpkinError::RunAborted(format!(
                "URL without http(s) scheme: {line}"
            )));
        }
        urls.push(line.to_string());
    }
    Ok(urls)
}
