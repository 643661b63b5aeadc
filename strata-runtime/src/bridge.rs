//! Synchronization bridge
//!
//! Every write lands in the flat store first and is then mirrored into the
//! partitioned store keyed by `(record_id, program_id)`. Mirroring is
//! idempotent and eventually consistent: a failed mirror leaves the flat
//! write in place and is picked up by the next backfill run.

use crate::columns::ColumnCatalog;
use crate::derived_hook::DerivedMetricHook;
use crate::metrics::SYNC_OPERATIONS_TOTAL;
use crate::registry::PartitionRegistry;
use crate::retry::RetryPolicy;
use crate::router::PartitionRouter;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use strata_core::{
    columns, DerivedMetrics, ObservationRow, PartitionKey, RecordKey, SeriesKind, SubmissionId,
};
use strata_storage::{ensure_no_key_change, ObservationStore};
use tracing::{debug, info, instrument, warn};

/// Result of mirroring a single write
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub key: RecordKey,
    /// Whether the flat store held the record
    pub found: bool,
    /// Whether the partitioned store reflects the write
    pub mirrored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived: Option<DerivedMetrics>,
}

impl SyncOutcome {
    fn new(key: RecordKey) -> Self {
        Self {
            key,
            found: true,
            mirrored: false,
            partition: None,
            derived: None,
        }
    }
}

/// Result of mirroring one backfill batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub rows: usize,
    /// Rows that were not yet in the partitioned store
    pub inserted: u64,
    pub partitions_created: usize,
    pub derived: usize,
}

pub struct SyncBridge {
    store: Arc<dyn ObservationStore>,
    router: Arc<PartitionRouter>,
    registry: Arc<PartitionRegistry>,
    catalog: Arc<ColumnCatalog>,
    hook: Arc<DerivedMetricHook>,
    retry: RetryPolicy,
}

impl SyncBridge {
    pub fn new(
        store: Arc<dyn ObservationStore>,
        router: Arc<PartitionRouter>,
        catalog: Arc<ColumnCatalog>,
        hook: Arc<DerivedMetricHook>,
    ) -> Self {
        let registry = router.registry().clone();
        Self {
            store,
            router,
            registry,
            catalog,
            hook,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn router(&self) -> &Arc<PartitionRouter> {
        &self.router
    }

    /// Write a new record to the flat store and mirror it.
    ///
    /// A redelivered insert is not an error: the stored flat row is mirrored
    /// again, which also repairs a mirror that failed the first time.
    #[instrument(skip(self, row), fields(series = %kind))]
    pub async fn insert(&self, kind: SeriesKind, row: &ObservationRow) -> Result<SyncOutcome> {
        let key = row.key()?;
        let stored = match self.store.insert_flat(kind, row).await {
            Ok(()) => None,
            Err(strata_storage::Error::AlreadyExists(_)) => {
                debug!(record = %key, "Insert redelivered; re-mirroring the stored row");
                self.store.get_flat(kind, &key).await?
            }
            Err(e) => return Err(e.into()),
        };
        let row = stored.as_ref().unwrap_or(row);

        match self.mirror_insert(kind, row).await {
            Ok(outcome) => {
                record("insert", "mirrored");
                Ok(outcome)
            }
            Err(e) => {
                record("insert", "failed");
                warn!(
                    record = %key,
                    error = %e,
                    "Mirror failed; record stays in the flat store until the next backfill"
                );
                Ok(SyncOutcome::new(key))
            }
        }
    }

    /// Upsert one flat row into the partitioned store and derive its metrics
    pub async fn mirror_insert(&self, kind: SeriesKind, row: &ObservationRow) -> Result<SyncOutcome> {
        let key = row.key()?;
        let site_id = row.site_id()?;
        let observed_at = row.observed_at()?;
        let set = self.catalog.for_kind(kind).await?;

        let handle = self
            .router
            .route(kind, key.program_id, site_id, observed_at)
            .await;

        let projected = row.project(&set.shared);
        let inserted = self
            .with_retry_policy("upsert", || {
                self.store
                    .upsert_partitioned(kind, std::slice::from_ref(&projected), &set.shared)
            })
            .await?;

        let partition = self
            .router
            .locate(
                kind,
                &PartitionKey::for_observation(key.program_id, site_id, observed_at),
            )
            .await
            .unwrap_or(handle.partition_name);
        if inserted > 0 {
            self.registry.record_rows(&partition, inserted as i64).await?;
        }

        let derived = match self.hook.apply(kind, row).await {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!(record = %key, error = %e, "Derived metrics not computed");
                None
            }
        };

        debug!(record = %key, partition = %partition, "Record mirrored");
        Ok(SyncOutcome {
            key,
            found: true,
            mirrored: true,
            partition: Some(partition),
            derived,
        })
    }

    /// Apply a targeted update to a record in both stores.
    ///
    /// Partition-key columns are immutable. Derived metrics are recomputed
    /// for this record only, and only when a measured value changed.
    #[instrument(skip(self, changes), fields(series = %kind, record = %key))]
    pub async fn update(
        &self,
        kind: SeriesKind,
        key: &RecordKey,
        changes: &ObservationRow,
    ) -> Result<SyncOutcome> {
        ensure_no_key_change(changes)?;

        if !self.store.update_flat(kind, key, changes).await? {
            record("update", "skipped");
            return Ok(SyncOutcome {
                found: false,
                ..SyncOutcome::new(*key)
            });
        }

        match self.mirror_update(kind, key, changes).await {
            Ok(outcome) => {
                record("update", "mirrored");
                Ok(outcome)
            }
            Err(e) => {
                record("update", "failed");
                warn!(error = %e, "Update mirror failed");
                Ok(SyncOutcome::new(*key))
            }
        }
    }

    async fn mirror_update(
        &self,
        kind: SeriesKind,
        key: &RecordKey,
        changes: &ObservationRow,
    ) -> Result<SyncOutcome> {
        let set = self.catalog.for_kind(kind).await?;
        let shared: Vec<&str> = changes.columns().filter(|c| set.is_shared(c)).collect();
        let mirrored_changes = changes.project(&shared);

        let present = if mirrored_changes.is_empty() {
            self.store.get_partitioned(kind, key).await?.is_some()
        } else {
            self.with_retry_policy("update", || {
                self.store.update_partitioned(kind, key, &mirrored_changes)
            })
            .await?
        };

        if !present {
            // Never mirrored; copy the full flat row instead
            let row = self
                .store
                .get_flat(kind, key)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Flat record {}", key)))?;
            return self.mirror_insert(kind, &row).await;
        }

        let recompute = [
            columns::VALUE,
            columns::MEASURED_RATE,
            columns::TARGET_RATE,
            columns::REMAINING_MATERIAL,
            columns::IS_DELETED,
        ]
        .iter()
        .any(|c| mirrored_changes.contains(c));

        let mut outcome = SyncOutcome {
            mirrored: true,
            ..SyncOutcome::new(*key)
        };
        if recompute {
            if let Some(row) = self.store.get_partitioned(kind, key).await? {
                outcome.derived = match self.hook.apply(kind, &row).await {
                    Ok(metrics) => Some(metrics),
                    Err(e) => {
                        warn!(error = %e, "Derived metrics not recomputed");
                        None
                    }
                };
            }
        }
        Ok(outcome)
    }

    /// Hard delete from both stores; absent rows are a no-op
    #[instrument(skip(self), fields(series = %kind, record = %key))]
    pub async fn delete(&self, kind: SeriesKind, key: &RecordKey) -> Result<SyncOutcome> {
        let found = self.store.delete_flat(kind, key).await?;

        match self.mirror_delete(kind, key).await {
            Ok((removed, partition)) => {
                record("delete", if removed { "mirrored" } else { "skipped" });
                Ok(SyncOutcome {
                    key: *key,
                    found,
                    mirrored: true,
                    partition,
                    derived: None,
                })
            }
            Err(e) => {
                record("delete", "failed");
                warn!(error = %e, "Delete mirror failed");
                Ok(SyncOutcome {
                    found,
                    ..SyncOutcome::new(*key)
                })
            }
        }
    }

    async fn mirror_delete(
        &self,
        kind: SeriesKind,
        key: &RecordKey,
    ) -> Result<(bool, Option<String>)> {
        let partition = match self.store.get_partitioned(kind, key).await? {
            Some(row) => {
                let placement =
                    PartitionKey::for_observation(key.program_id, row.site_id()?, row.observed_at()?);
                Some(self.router.locate(kind, &placement).await?)
            }
            None => None,
        };

        let removed = self
            .with_retry_policy("delete", || self.store.delete_partitioned(kind, key))
            .await?;
        if removed {
            if let Some(name) = &partition {
                self.registry.record_rows(name, -1).await?;
            }
        }
        Ok((removed, partition))
    }

    /// Cascade a submission delete to every record it owns, in both series.
    ///
    /// Returns how many flat records were removed.
    #[instrument(skip(self), fields(submission_id = %submission_id))]
    pub async fn on_submission_deleted(&self, submission_id: SubmissionId) -> Result<usize> {
        let mut removed = 0;
        for kind in SeriesKind::ALL {
            let keys = self
                .store
                .flat_keys_for_submission(kind, submission_id)
                .await?;
            for key in &keys {
                if self.delete(kind, key).await?.found {
                    removed += 1;
                }
            }
        }
        info!(records = removed, "Submission cascade applied");
        Ok(removed)
    }

    /// Mirror a page of flat rows in one upsert.
    ///
    /// Rows are deduplicated on their key, partitions are ensured once per
    /// distinct segment, and derived metrics are applied in series order so
    /// each reading sees its predecessor's persisted velocity.
    #[instrument(skip(self, rows), fields(series = %kind, rows = rows.len()))]
    pub async fn mirror_batch(
        &self,
        kind: SeriesKind,
        rows: &[ObservationRow],
    ) -> Result<BatchOutcome> {
        let set = self.catalog.for_kind(kind).await?;

        let mut seen = HashSet::new();
        let mut batch = Vec::with_capacity(rows.len());
        for row in rows {
            if seen.insert(row.key()?) {
                batch.push(row);
            }
        }

        let mut outcome = BatchOutcome {
            rows: batch.len(),
            ..BatchOutcome::default()
        };

        let mut placements = HashMap::new();
        for row in &batch {
            let observed_at = row.observed_at()?;
            let placement =
                PartitionKey::for_observation(row.program_id()?, row.site_id()?, observed_at);
            placements.entry(placement).or_insert(observed_at);
        }
        for (placement, observed_at) in placements {
            let handle = self
                .router
                .ensure_partition(kind, placement.program_id, placement.site_id, observed_at)
                .await?;
            if handle.created {
                outcome.partitions_created += 1;
            }
        }

        let projected: Vec<ObservationRow> =
            batch.iter().map(|row| row.project(&set.shared)).collect();
        outcome.inserted = self
            .with_retry_policy("upsert_batch", || {
                self.store.upsert_partitioned(kind, &projected, &set.shared)
            })
            .await?;

        let mut ordered = Vec::with_capacity(batch.len());
        for row in &batch {
            ordered.push(((row.observed_at()?, row.record_id()?), *row));
        }
        ordered.sort_by_key(|(order, _)| *order);
        for (_, row) in ordered {
            self.hook.apply(kind, row).await?;
            outcome.derived += 1;
        }

        record("batch", "mirrored");
        Ok(outcome)
    }

    /// Run a storage operation under the bridge's retry policy; only
    /// transient errors are retried
    async fn with_retry_policy<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = strata_storage::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.calculate_delay(attempt);
                    debug!(operation, attempt, error = %e, "Retrying after transient error");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn record(operation: &str, outcome: &str) {
    SYNC_OPERATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
}
