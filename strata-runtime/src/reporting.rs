//! Read-only range and aggregate queries for dashboards

use crate::Result;
use std::sync::Arc;
use strata_core::{ObservationRow, ProgramId, SeriesKind, TenantId};
use strata_storage::{ObservationStore, RangeQuery, SeriesAggregate};
use tracing::{debug, instrument};

pub struct ReportingService {
    store: Arc<dyn ObservationStore>,
}

impl ReportingService {
    pub fn new(store: Arc<dyn ObservationStore>) -> Self {
        Self { store }
    }

    /// Rows of one series matching the query, ordered by `(observed_at, record_id)`
    #[instrument(skip(self, query), fields(series = %kind, program_id = %query.program_id))]
    pub async fn range(&self, kind: SeriesKind, query: &RangeQuery) -> Result<Vec<ObservationRow>> {
        if !self.owns(&query.tenant_id, query.program_id).await? {
            return Ok(Vec::new());
        }
        let rows = self.store.query_partitioned(kind, query).await?;
        debug!(rows = rows.len(), "Range query served");
        Ok(rows)
    }

    #[instrument(skip(self, query), fields(series = %kind, program_id = %query.program_id))]
    pub async fn aggregate(&self, kind: SeriesKind, query: &RangeQuery) -> Result<SeriesAggregate> {
        if !self.owns(&query.tenant_id, query.program_id).await? {
            return Ok(SeriesAggregate::default());
        }
        Ok(self.store.aggregate_partitioned(kind, query).await?)
    }

    /// Programs of other tenants read as empty, never as an error
    async fn owns(&self, tenant_id: &TenantId, program_id: ProgramId) -> Result<bool> {
        Ok(self
            .store
            .get_program(program_id)
            .await?
            .is_some_and(|p| &p.tenant_id == tenant_id))
    }
}
