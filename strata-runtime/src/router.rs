//! Partition router
//!
//! Resolves the program → site → month segment chain for a record and
//! creates whatever is missing. Creation is create-if-absent: losing a race
//! to another creator is success, and the registry is re-read to pick up
//! the winner's entry.

use crate::metrics::PARTITIONS_CREATED_TOTAL;
use crate::registry::PartitionRegistry;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use strata_core::{
    PartitionKey, PartitionLevel, PartitionNamer, ProgramId, SegmentSpec, SeriesKind, SiteId,
};
use strata_storage::ObservationStore;
use tracing::{debug, info, instrument, warn};

/// Where a record will be stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionHandle {
    pub table_name: String,
    pub partition_name: String,
    pub level: PartitionLevel,
    /// Whether this call physically created at least one segment
    pub created: bool,
}

impl PartitionHandle {
    fn overflow(kind: SeriesKind, partition_name: String) -> Self {
        Self {
            table_name: kind.partitioned_table().to_string(),
            partition_name,
            level: PartitionLevel::Overflow,
            created: false,
        }
    }
}

/// Outcome of eager pre-creation for one program
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrecreateReport {
    pub program_id: Option<ProgramId>,
    pub sites: usize,
    pub months: usize,
    pub segments_created: usize,
    pub segments_existing: usize,
    pub elapsed_ms: u64,
}

pub struct PartitionRouter {
    store: Arc<dyn ObservationStore>,
    registry: Arc<PartitionRegistry>,
}

impl PartitionRouter {
    pub fn new(store: Arc<dyn ObservationStore>, registry: Arc<PartitionRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &Arc<PartitionRegistry> {
        &self.registry
    }

    /// Resolve or create the full segment chain for a record.
    ///
    /// Safe under concurrent callers; every caller gets the same handle.
    #[instrument(skip(self), fields(series = %kind))]
    pub async fn ensure_partition(
        &self,
        kind: SeriesKind,
        program_id: ProgramId,
        site_id: SiteId,
        observed_at: DateTime<Utc>,
    ) -> Result<PartitionHandle> {
        let key = PartitionKey::for_observation(program_id, site_id, observed_at);
        let chain = PartitionNamer::chain(kind, &key);
        let leaf = &chain[2];

        if self.registry.contains(&leaf.partition_name).await? {
            return Ok(self.handle(leaf, false));
        }

        let mut created = false;
        for spec in &chain {
            created |= self.ensure_segment(spec).await?;
        }
        Ok(self.handle(leaf, created))
    }

    /// Like [`Self::ensure_partition`], but falls back to the deepest
    /// provisioned default segment instead of failing the write
    pub async fn route(
        &self,
        kind: SeriesKind,
        program_id: ProgramId,
        site_id: SiteId,
        observed_at: DateTime<Utc>,
    ) -> PartitionHandle {
        match self
            .ensure_partition(kind, program_id, site_id, observed_at)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                let key = PartitionKey::for_observation(program_id, site_id, observed_at);
                let fallback = self
                    .locate(kind, &key)
                    .await
                    .unwrap_or_else(|_| PartitionNamer::root_overflow(kind));
                warn!(
                    program_id = %program_id,
                    site_id = %site_id,
                    partition = %fallback,
                    error = %e,
                    "Partition provisioning failed, routing to overflow segment"
                );
                PartitionHandle::overflow(kind, fallback)
            }
        }
    }

    /// Name of the deepest registered segment that holds rows for `key`
    pub async fn locate(&self, kind: SeriesKind, key: &PartitionKey) -> Result<String> {
        let [program, site, month] = PartitionNamer::chain(kind, key);
        if self.registry.contains(&month.partition_name).await? {
            return Ok(month.partition_name);
        }
        if self.registry.contains(&site.partition_name).await? {
            return Ok(PartitionNamer::overflow(&site.partition_name));
        }
        if self.registry.contains(&program.partition_name).await? {
            return Ok(PartitionNamer::overflow(&program.partition_name));
        }
        Ok(PartitionNamer::root_overflow(kind))
    }

    /// Build program, site and month segments for every site and month in
    /// the program's date span, for both series
    #[instrument(skip(self), fields(program_id = %program_id))]
    pub async fn precreate(&self, program_id: ProgramId) -> Result<PrecreateReport> {
        let start = Instant::now();
        let program = self
            .store
            .get_program(program_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Program {}", program_id)))?;
        let sites = self.store.list_sites(program_id).await?;
        let months = program.month_starts();

        let mut report = PrecreateReport {
            program_id: Some(program_id),
            sites: sites.len(),
            months: months.len(),
            ..PrecreateReport::default()
        };

        for kind in SeriesKind::ALL {
            let mut specs = vec![PartitionNamer::program_spec(kind, program_id)];
            for site in &sites {
                specs.push(PartitionNamer::site_spec(kind, program_id, site.id));
                for month in &months {
                    let key = PartitionKey::new(program_id, site.id, *month);
                    specs.push(PartitionNamer::month_spec(kind, &key));
                }
            }
            for spec in &specs {
                if self.ensure_segment(spec).await? {
                    report.segments_created += 1;
                } else {
                    report.segments_existing += 1;
                }
            }
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            sites = report.sites,
            months = report.months,
            created = report.segments_created,
            existing = report.segments_existing,
            elapsed_ms = report.elapsed_ms,
            "Partitions pre-created"
        );
        Ok(report)
    }

    /// Create and register one segment; returns whether this call created it
    async fn ensure_segment(&self, spec: &SegmentSpec) -> Result<bool> {
        if self.registry.contains(&spec.partition_name).await? {
            return Ok(false);
        }

        let created = match self.store.create_segment(spec).await {
            Ok(()) => {
                PARTITIONS_CREATED_TOTAL
                    .with_label_values(&[spec.level.as_str()])
                    .inc();
                info!(partition = %spec.partition_name, level = %spec.level, "Partition created");
                true
            }
            Err(strata_storage::Error::AlreadyExists(_)) => {
                debug!(partition = %spec.partition_name, "Partition already exists");
                false
            }
            Err(e) => return Err(e.into()),
        };

        self.registry.register(spec).await?;
        if let Some(overflow) = PartitionNamer::overflow_spec(spec) {
            self.registry.register(&overflow).await?;
        }
        Ok(created)
    }

    fn handle(&self, spec: &SegmentSpec, created: bool) -> PartitionHandle {
        PartitionHandle {
            table_name: spec.table_name.clone(),
            partition_name: spec.partition_name.clone(),
            level: spec.level,
            created,
        }
    }
}
