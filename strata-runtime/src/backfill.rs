//! Backfill pipeline
//!
//! Migrates historical flat rows into the partitioned store program by
//! program, largest first, in bounded batches. Each batch is an idempotent
//! upsert, so an interrupted run resumes where it stopped and a repeated run
//! changes nothing. A reconciliation pass compares the two stores at the end.

use crate::bridge::SyncBridge;
use crate::eta::{format_duration_human, EtaCalculator};
use crate::metrics::BACKFILL_ROWS_TOTAL;
use crate::registry::PartitionRegistry;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_core::{Finding, FindingCheck, Program, ProgramId, SeriesKind};
use strata_storage::{ObservationStore, PageCursor, PartitionFilter};
use tracing::{debug, info, instrument, warn};

pub const BATCH_SIZE_ENV: &str = "STRATA_BACKFILL_BATCH_SIZE";
pub const BATCH_DELAY_ENV: &str = "STRATA_BACKFILL_BATCH_DELAY_MS";

const MAX_BATCH_SIZE: i64 = 10_000;

/// Configuration for the backfill pipeline
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Rows per batch (default: 500, bounds 1..=10000)
    pub batch_size: i64,
    /// Pause between batches (default: none)
    pub batch_delay: Duration,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            batch_delay: Duration::ZERO,
        }
    }
}

impl BackfillConfig {
    /// Load from the environment, falling back to defaults for unset values
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(BATCH_SIZE_ENV) {
            let size = raw.parse::<i64>().map_err(|_| {
                Error::Configuration(format!("{} must be an integer, got {:?}", BATCH_SIZE_ENV, raw))
            })?;
            config = config.with_batch_size(size)?;
        }
        if let Ok(raw) = std::env::var(BATCH_DELAY_ENV) {
            let ms = raw.parse::<u64>().map_err(|_| {
                Error::Configuration(format!("{} must be an integer, got {:?}", BATCH_DELAY_ENV, raw))
            })?;
            config.batch_delay = Duration::from_millis(ms);
        }
        Ok(config)
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Result<Self> {
        if !(1..=MAX_BATCH_SIZE).contains(&batch_size) {
            return Err(Error::Configuration(format!(
                "Batch size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, batch_size
            )));
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }
}

/// Cooperative stop signal, checked between batches
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Progress record for one program
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramProgress {
    pub program_id: ProgramId,
    pub name: String,
    pub rows_scanned: u64,
    pub rows_migrated: u64,
    pub batches: u32,
    pub partitions_created: usize,
    pub elapsed_ms: u64,
    pub completed: bool,
}

impl ProgramProgress {
    fn new(program: &Program) -> Self {
        Self {
            program_id: program.id,
            name: program.name.clone(),
            rows_scanned: 0,
            rows_migrated: 0,
            batches: 0,
            partitions_created: 0,
            elapsed_ms: 0,
            completed: false,
        }
    }
}

/// Machine-readable outcome of a backfill run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub batch_size: i64,
    pub programs: Vec<ProgramProgress>,
    pub total_rows_migrated: u64,
    pub cancelled: bool,
    pub reconciliation: Vec<Finding>,
}

impl MigrationReport {
    /// Whether any reconciliation finding blocks cutover
    pub fn blocks_promotion(&self) -> bool {
        self.reconciliation.iter().any(Finding::blocks_promotion)
    }
}

pub struct BackfillPipeline {
    store: Arc<dyn ObservationStore>,
    bridge: Arc<SyncBridge>,
    registry: Arc<PartitionRegistry>,
    config: BackfillConfig,
    cancel: CancelFlag,
}

impl BackfillPipeline {
    pub fn new(
        store: Arc<dyn ObservationStore>,
        bridge: Arc<SyncBridge>,
        registry: Arc<PartitionRegistry>,
        config: BackfillConfig,
    ) -> Self {
        Self {
            store,
            bridge,
            registry,
            config,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Migrate one program, or every program when `scope` is `None`
    #[instrument(skip(self), fields(batch_size = self.config.batch_size))]
    pub async fn migrate(&self, scope: Option<ProgramId>) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let programs = self.ordered_programs(scope).await?;
        info!(programs = programs.len(), "Starting backfill");

        let mut report = MigrationReport {
            started_at,
            finished_at: started_at,
            batch_size: self.config.batch_size,
            programs: Vec::with_capacity(programs.len()),
            total_rows_migrated: 0,
            cancelled: false,
            reconciliation: Vec::new(),
        };

        for program in &programs {
            let mut progress = ProgramProgress::new(program);
            let result = self.migrate_program(program, &mut progress).await;
            report.total_rows_migrated += progress.rows_migrated;
            report.programs.push(progress);
            match result {
                Ok(()) => {}
                Err(Error::Cancelled) => {
                    warn!(program_id = %program.id, "Backfill cancelled between batches");
                    report.cancelled = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        report.reconciliation = self.reconcile(scope, report.cancelled).await?;
        report.finished_at = Utc::now();
        info!(
            rows = report.total_rows_migrated,
            cancelled = report.cancelled,
            blocks_promotion = report.blocks_promotion(),
            "Backfill finished"
        );
        Ok(report)
    }

    /// Largest program first; ties broken by id so the order is stable
    async fn ordered_programs(&self, scope: Option<ProgramId>) -> Result<Vec<Program>> {
        let programs = match scope {
            Some(program_id) => vec![self
                .store
                .get_program(program_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Program {}", program_id)))?],
            None => self.store.list_programs().await?,
        };

        let mut sized = Vec::with_capacity(programs.len());
        for program in programs {
            let mut rows = 0;
            for kind in SeriesKind::ALL {
                rows += self.store.count_flat(kind, Some(program.id)).await?;
            }
            sized.push((rows, program));
        }
        sized.sort_by(|(a_rows, a), (b_rows, b)| b_rows.cmp(a_rows).then(a.id.cmp(&b.id)));
        Ok(sized.into_iter().map(|(_, p)| p).collect())
    }

    #[instrument(skip(self, program, progress), fields(program_id = %program.id))]
    async fn migrate_program(&self, program: &Program, progress: &mut ProgramProgress) -> Result<()> {
        let start = Instant::now();
        self.cancel.check()?;

        let precreated = self.bridge.router().precreate(program.id).await?;
        progress.partitions_created += precreated.segments_created;

        for kind in SeriesKind::ALL {
            let outcome = self.migrate_series(program, kind, progress).await;
            progress.elapsed_ms = start.elapsed().as_millis() as u64;
            outcome?;
        }

        self.registry
            .refresh_estimates(&PartitionFilter::all().program(program.id))
            .await?;

        progress.completed = true;
        progress.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            program = %program.name,
            rows_migrated = progress.rows_migrated,
            batches = progress.batches,
            partitions_created = progress.partitions_created,
            elapsed_ms = progress.elapsed_ms,
            "Program migrated"
        );
        Ok(())
    }

    async fn migrate_series(
        &self,
        program: &Program,
        kind: SeriesKind,
        progress: &mut ProgramProgress,
    ) -> Result<()> {
        let total = self.store.count_flat(kind, Some(program.id)).await?;
        let mut eta = EtaCalculator::default();
        let mut cursor: Option<PageCursor> = None;
        let mut scanned: u64 = 0;

        loop {
            self.cancel.check()?;

            let batch_start = Instant::now();
            let page = self
                .store
                .unmigrated_page(kind, program.id, cursor.as_ref(), self.config.batch_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(PageCursor::from_row(last)?);

            let outcome = self.bridge.mirror_batch(kind, &page).await?;
            scanned += page.len() as u64;
            progress.rows_scanned += page.len() as u64;
            progress.rows_migrated += outcome.inserted;
            progress.partitions_created += outcome.partitions_created;
            progress.batches += 1;
            BACKFILL_ROWS_TOTAL
                .with_label_values(&[kind.as_str()])
                .inc_by(outcome.inserted);

            let elapsed_ms = batch_start.elapsed().as_millis() as u64;
            eta.record_batch(page.len(), elapsed_ms);
            let remaining = (total as u64).saturating_sub(scanned);
            debug!(
                series = %kind,
                rows = page.len(),
                inserted = outcome.inserted,
                elapsed_ms,
                eta = %eta
                    .estimate_remaining(remaining)
                    .map(format_duration_human)
                    .unwrap_or_else(|| "unknown".to_string()),
                "Batch mirrored"
            );

            if (page.len() as i64) < self.config.batch_size {
                break;
            }
            if !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }
        }
        Ok(())
    }

    /// Compare flat and partitioned counts per series.
    ///
    /// A mismatch is a failure unless the run was cancelled, in which case
    /// the residue is expected and only warned about.
    pub async fn reconcile(&self, scope: Option<ProgramId>, cancelled: bool) -> Result<Vec<Finding>> {
        let subject = scope
            .map(|p| p.to_string())
            .unwrap_or_else(|| "all programs".to_string());

        let mut findings = Vec::with_capacity(SeriesKind::ALL.len());
        for kind in SeriesKind::ALL {
            let flat = self.store.count_flat(kind, scope).await?;
            let partitioned = self.store.count_partitioned(kind, scope).await?;
            let finding = if flat == partitioned {
                Finding::pass(
                    FindingCheck::BackfillReconciliation,
                    subject.clone(),
                    format!("{} rows in both stores", flat),
                )
            } else {
                let message = format!(
                    "Flat store has {} rows, partitioned store has {}",
                    flat, partitioned
                );
                if cancelled {
                    Finding::warn(FindingCheck::BackfillReconciliation, subject.clone(), message)
                } else {
                    Finding::fail(FindingCheck::BackfillReconciliation, subject.clone(), message)
                }
            };
            let mut finding = finding.with_series(kind).with_counts(flat, partitioned);
            if let Some(program_id) = scope {
                finding = finding.with_program(program_id);
            }
            findings.push(finding);
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_bounds() {
        assert!(BackfillConfig::default().with_batch_size(0).is_err());
        assert!(BackfillConfig::default().with_batch_size(10_001).is_err());
        assert_eq!(
            BackfillConfig::default()
                .with_batch_size(10_000)
                .unwrap()
                .batch_size,
            10_000
        );
    }

    #[test]
    fn test_cancel_flag_shared_between_clones() {
        let flag = CancelFlag::new();
        let observer = flag.clone();
        assert!(observer.check().is_ok());
        flag.cancel();
        assert!(observer.is_cancelled());
        assert!(matches!(observer.check(), Err(Error::Cancelled)));
    }
}
