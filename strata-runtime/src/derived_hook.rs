//! Write hook that computes and persists derived metrics for one record

use crate::columns::ColumnCatalog;
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use strata_core::{DerivedMetrics, MetricEngine, ObservationRow, PriorReading, Reading, SeriesKind};
use strata_storage::ObservationStore;
use tracing::{debug, instrument};

pub struct DerivedMetricHook {
    store: Arc<dyn ObservationStore>,
    engine: MetricEngine,
    catalog: Arc<ColumnCatalog>,
}

impl DerivedMetricHook {
    pub fn new(
        store: Arc<dyn ObservationStore>,
        engine: MetricEngine,
        catalog: Arc<ColumnCatalog>,
    ) -> Self {
        Self {
            store,
            engine,
            catalog,
        }
    }

    pub fn engine(&self) -> &MetricEngine {
        &self.engine
    }

    /// Derive metrics for `row` against the previous reading of its series
    /// and write them onto the partitioned row.
    ///
    /// Only this record is touched; later readings keep their metrics.
    #[instrument(skip(self, row), fields(series = %kind))]
    pub async fn apply(&self, kind: SeriesKind, row: &ObservationRow) -> Result<DerivedMetrics> {
        let key = row.key()?;
        let current = Reading::from_row(row)?;
        let series_code = row.series_code()?;

        let previous = self
            .store
            .previous_in_series(
                kind,
                key.program_id,
                series_code,
                current.observed_at,
                key.record_id,
            )
            .await?
            .map(|prev| PriorReading::from_row(&prev))
            .transpose()?;

        let metrics = self.engine.compute(kind, &current, previous.as_ref());

        let set = self.catalog.for_kind(kind).await?;
        let changes = metrics.to_changes(Utc::now());
        let writable: Vec<&str> = changes
            .columns()
            .filter(|c| set.in_partitioned(c))
            .collect();
        let changes = changes.project(&writable);

        if !self.store.update_partitioned(kind, &key, &changes).await? {
            return Err(Error::NotFound(format!("Partitioned record {}", key)));
        }

        debug!(
            record = %key,
            velocity = metrics.velocity,
            trend = %metrics.trend,
            "Derived metrics written"
        );
        Ok(metrics)
    }
}
