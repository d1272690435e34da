//! Batch-copy migration between two adapters.
//!
//! [`BatchMigrator`] scans the source in pages, writes every item to the
//! target, and optionally re-reads the copied keys from the target to
//! confirm they arrived. Individual write failures are counted and the copy
//! continues; a failed scan or validation read aborts the run.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backends::document::COMPOSITE_ATTRIBUTE;
use crate::config::MigrationConfig;
use crate::core::DataProvider;
use crate::error::DataResult;
use crate::types::{BatchGetOptions, DatabaseKey, Item, PutOptions, ScanInput};

/// One item that could not be copied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationFailure {
    /// Key of the item, or a placeholder when the item had no usable key.
    pub key: String,
    /// Error message.
    pub error: String,
}

/// Outcome of a migration run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// False when migration was disabled and nothing ran.
    pub enabled: bool,
    /// Pages read from the source.
    pub batches: u32,
    /// Items read from the source.
    pub scanned: u64,
    /// Items written to the target.
    pub copied: u64,
    /// Items that failed to copy.
    pub failed: u64,
    /// Failure details.
    pub failures: Vec<MigrationFailure>,
    /// True when the copied keys were re-read from the target.
    pub validated: bool,
    /// Copied keys not found in the target during validation.
    pub missing_keys: Vec<DatabaseKey>,
    /// Wall-clock duration.
    #[serde(with = "crate::config::humantime_serde")]
    pub elapsed: Duration,
}

impl MigrationReport {
    /// True when every scanned item was copied and validation found nothing
    /// missing.
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.missing_keys.is_empty()
    }
}

/// Copies all items from one adapter to another.
#[derive(Debug)]
pub struct BatchMigrator {
    source: Arc<dyn DataProvider>,
    target: Arc<dyn DataProvider>,
    config: MigrationConfig,
}

impl BatchMigrator {
    /// Creates a migrator.
    pub fn new(
        source: Arc<dyn DataProvider>,
        target: Arc<dyn DataProvider>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            source,
            target,
            config,
        }
    }

    /// Runs the copy.
    pub async fn run(&self) -> DataResult<MigrationReport> {
        let started = Instant::now();
        let mut report = MigrationReport {
            enabled: self.config.enabled,
            ..MigrationReport::default()
        };
        if !self.config.enabled {
            info!("Migration disabled, nothing to do");
            return Ok(report);
        }

        info!(
            source = %self.source.backend_kind(),
            target = %self.target.backend_kind(),
            batch_size = self.config.batch_size,
            "Starting migration"
        );

        let batch_size = self.config.batch_size.max(1);
        let mut copied_keys = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut input = ScanInput::new().with_limit(batch_size);
            if let Some(c) = cursor.take() {
                input = input.with_cursor(c);
            }
            let page = self.source.scan(&input).await?;
            report.batches += 1;
            report.scanned += page.items.len() as u64;

            for item in page.items {
                self.copy(item, &mut report, &mut copied_keys).await;
            }
            info!(
                batch = report.batches,
                scanned = report.scanned,
                copied = report.copied,
                failed = report.failed,
                "Migration batch finished"
            );

            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        if self.config.validate_after_migration {
            report.missing_keys = self.find_missing(&copied_keys, batch_size as usize).await?;
            report.validated = true;
            if !report.missing_keys.is_empty() {
                warn!(
                    missing = report.missing_keys.len(),
                    "Copied items missing from target"
                );
            }
        }

        report.elapsed = started.elapsed();
        info!(
            copied = report.copied,
            failed = report.failed,
            missing = report.missing_keys.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Migration finished"
        );
        Ok(report)
    }

    async fn copy(&self, mut item: Item, report: &mut MigrationReport, copied: &mut Vec<DatabaseKey>) {
        let key = match DatabaseKey::from_item(&item) {
            Ok(key) => key,
            Err(e) => {
                report.failed += 1;
                report.failures.push(MigrationFailure {
                    key: "<no key>".to_string(),
                    error: e.to_string(),
                });
                return;
            }
        };
        // Derived by the document adapter on write.
        item.remove(COMPOSITE_ATTRIBUTE);

        match self.target.put(item, &PutOptions::default()).await {
            Ok(_) => {
                report.copied += 1;
                copied.push(key);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to copy item");
                report.failed += 1;
                report.failures.push(MigrationFailure {
                    key: key.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    async fn find_missing(
        &self,
        keys: &[DatabaseKey],
        batch_size: usize,
    ) -> DataResult<Vec<DatabaseKey>> {
        let mut missing = Vec::new();
        for chunk in keys.chunks(batch_size) {
            let found = self
                .target
                .batch_get(chunk, &BatchGetOptions::default())
                .await?;

            let mut composites = HashSet::new();
            let mut primaries = HashSet::new();
            for item in &found {
                if let Ok(key) = DatabaseKey::from_item(item) {
                    primaries.insert(key.primary.to_string());
                    composites.insert(key.composite());
                }
            }
            // A target that stores mirrored sort values returns them for
            // keys written without one.
            missing.extend(
                chunk
                    .iter()
                    .filter(|key| {
                        !composites.contains(&key.composite())
                            && !(key.sort.is_none() && primaries.contains(&key.primary.to_string()))
                    })
                    .cloned(),
            );
        }
        Ok(missing)
    }
}
