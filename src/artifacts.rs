//! Per-test artifact directories under `test-history/`.
//!
//! Each URL test owns exactly one directory holding `screenshot.png` and
//! `network.har`. The database row stores only the paths; this module owns
//! the files and the directory naming scheme.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{PumpkinError, PumpkinResult};

/// Screenshot filename inside a test directory.
pub const SCREENSHOT_FILE: &str = "screenshot.png";
/// HAR filename inside a test directory.
pub const HAR_FILE: &str = "network.har";

/// Characters that a URL is not allowed to contribute to a directory name.
const UNSAFE: &[char] = &[
    ':', '/', '?', '#', '[', ']', '@', '!', '$', '&', '\'', '(', ')', '*', '+', ',', ';', '=',
];

/// Paths for one test's artifacts. Computed before the directory exists so
/// that synthetic (timeout, crash) measurements still reference real paths.
#[derive(Debug, Clone)]
pub struct TestArtifacts {
    pub dir: PathBuf,
    pub screenshot_path: PathBuf,
    pub har_path: PathBuf,
}

/// Owns the `test-history/` tree.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical directory name: timestamp with `:` and `.` replaced by `-`,
    /// two underscores, then the sanitized URL.
    #[must_use]
    pub fn dir_name(url: &str, now: DateTime<Utc>) -> String {
        let stamp = now
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        format!("{stamp}__{}", sanitize_url(url))
    }

    /// Compute the paths a test at `now` would use, without touching disk.
    #[must_use]
    pub fn plan(&self, url: &str, now: DateTime<Utc>) -> TestArtifacts {
        let dir = self.root.join(Self::dir_name(url, now));
        TestArtifacts {
            screenshot_path: dir.join(SCREENSHOT_FILE),
            har_path: dir.join(HAR_FILE),
            dir,
        }
    }

    /// Create the planned directory. Callers never reuse the same
    /// millisecond for the same URL, so an existing directory is a conflict.
    pub fn allocate(&self, plan: &TestArtifacts) -> PumpkinResult<()> {
        if plan.dir.exists() {
            return Err(PumpkinError::ArtifactConflict(plan.dir.clone()));
        }
        fs::create_dir_all(&plan.dir)?;
        Ok(())
    }

    /// Allocate a fresh test directory for `url` at `now`.
    pub fn allocate_test_dir(&self, url: &str, now: DateTime<Utc>) -> PumpkinResult<TestArtifacts> {
        let plan = self.plan(url, now);
        self.allocate(&plan)?;
        Ok(plan)
    }

    /// Names of the direct child directories, dotfiles excluded.
    pub fn list_test_dirs(&self) -> PumpkinResult<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut dirs = Vec::new();
        for dent in fs::read_dir(&self.root)? {
            let dent = dent?;
            if !dent.file_type()?.is_dir() {
                continue;
            }
            let name = dent.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            dirs.push(name);
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Remove one named test directory and everything under it.
    pub fn remove_test_dir(&self, name: &str) -> PumpkinResult<()> {
        fs::remove_dir_all(self.root.join(name))?;
        Ok(())
    }
}

/// Strip the scheme and trailing slash, then replace URL punctuation with
/// underscores.
#[must_use]
pub fn sanitize_url(url: &str) -> String {
    let stripped = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let stripped = stripped.strip_suffix('/').unwrap_or(stripped);
    stripped
        .chars()
        .map(|c| if UNSAFE.contains(&c) { '_' } else { c })
        .collect()
}

/// The `<dirname>` segment a stored screenshot path points into, i.e. the
/// name of its parent directory.
#[must_use]
pub fn dir_name_of_path(path: &str) -> Option<String> {
    Path::new(path)
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
}
