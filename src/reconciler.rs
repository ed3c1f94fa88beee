//! Artifact reconciliation: the on-disk `test-history/` tree and the
//! `url_tests` rows must stay bijective. Directories no row references
//! are orphans and get removed.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::artifacts::ArtifactStore;
use crate::error::{PumpkinError, PumpkinResult};
use crate::repository::{ping, SqlitePool, UrlTestRepository};

/// What one reconciliation pass found and did.
#[derive(Debug, Clone)]
pub struct CleanReport {
    pub dry_run: bool,
    pub kept: usize,
    pub orphans: Vec<String>,
    pub deleted: usize,
}

/// Compares disk against the database and removes orphan directories.
pub struct Reconciler {
    pool: SqlitePool,
    tests: UrlTestRepository,
    store: ArtifactStore,
}

impl Reconciler {
    pub fn new(pool: SqlitePool, tests: UrlTestRepository, store: ArtifactStore) -> Self {
        Self { pool, tests, store }
    }

    /// Report (and unless `dry_run`, delete) artifact directories no
    /// database row references. Refuses to touch anything when the
    /// database is unreachable.
    pub async fn clean(&self, dry_run: bool) -> PumpkinResult<CleanReport> {
        ping(&self.pool)
            .await
            .map_err(|e| PumpkinError::DatabaseUnavailable(e.to_string()))?;

        let referenced: BTreeSet<String> = self
            .tests
            .referenced_artifact_dirs()
            .await?
            .into_iter()
            .collect();
        let on_disk = self.store.list_test_dirs()?;

        let mut kept = 0usize;
        let mut orphans = Vec::new();
        for dir in on_disk {
            if referenced.contains(&dir) {
                kept += 1;
            } else {
                orphans.push(dir);
            }
        }

        let mut deleted = 0usize;
        if !dry_run {
            for dir in &orphans {
                match self.store.remove_test_dir(dir) {
                    Ok(()) => {
                        info!(dir = %dir, "removed orphan artifact directory");
                        deleted += 1;
                    }
                    Err(e) => warn!(dir = %dir, error = %e, "failed to remove orphan"),
                }
            }
        }

        info!(
            dry_run,
            kept,
            orphans = orphans.len(),
            deleted,
            "reconciliation pass finished"
        );
        Ok(CleanReport {
            dry_run,
            kept,
            orphans,
            deleted,
        })
    }
}
