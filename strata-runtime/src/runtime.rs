//! Service wiring
//!
//! One registry, one column catalog and one router per process, shared by
//! every entry point through [`Strata`].

use crate::backfill::{BackfillConfig, BackfillPipeline};
use crate::bridge::SyncBridge;
use crate::columns::ColumnCatalog;
use crate::derived_hook::DerivedMetricHook;
use crate::health::{HealthConfig, HealthMonitor};
use crate::ingest::IngestService;
use crate::registry::PartitionRegistry;
use crate::reporting::ReportingService;
use crate::retry::RetryPolicy;
use crate::router::PartitionRouter;
use crate::Result;
use std::sync::Arc;
use strata_core::{MetricEngine, MetricThresholds, SeriesKind};
use strata_storage::ObservationStore;
use tracing::info;

pub struct Strata {
    store: Arc<dyn ObservationStore>,
    registry: Arc<PartitionRegistry>,
    catalog: Arc<ColumnCatalog>,
    router: Arc<PartitionRouter>,
    bridge: Arc<SyncBridge>,
    ingest: IngestService,
    reporting: ReportingService,
}

impl Strata {
    pub fn new(store: Arc<dyn ObservationStore>, thresholds: MetricThresholds) -> Self {
        Self::with_retry(store, thresholds, RetryPolicy::default())
    }

    pub fn with_retry(
        store: Arc<dyn ObservationStore>,
        thresholds: MetricThresholds,
        retry: RetryPolicy,
    ) -> Self {
        let registry = Arc::new(PartitionRegistry::new(store.clone()));
        let catalog = Arc::new(ColumnCatalog::new(store.clone()));
        let router = Arc::new(PartitionRouter::new(store.clone(), registry.clone()));
        let hook = Arc::new(DerivedMetricHook::new(
            store.clone(),
            MetricEngine::new(thresholds),
            catalog.clone(),
        ));
        let bridge = Arc::new(
            SyncBridge::new(store.clone(), router.clone(), catalog.clone(), hook).with_retry(retry),
        );
        let ingest = IngestService::new(store.clone(), bridge.clone());
        let reporting = ReportingService::new(store.clone());

        Self {
            store,
            registry,
            catalog,
            router,
            bridge,
            ingest,
            reporting,
        }
    }

    /// Reconcile column sets for both series up front so schema problems
    /// surface at startup instead of on the first write
    pub async fn init(&self) -> Result<()> {
        for kind in SeriesKind::ALL {
            self.catalog.refresh(kind).await?;
        }
        info!(backend = self.store.backend(), "Strata runtime ready");
        Ok(())
    }

    pub fn store(&self) -> &Arc<dyn ObservationStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<PartitionRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<PartitionRouter> {
        &self.router
    }

    pub fn bridge(&self) -> &Arc<SyncBridge> {
        &self.bridge
    }

    pub fn ingest(&self) -> &IngestService {
        &self.ingest
    }

    pub fn reporting(&self) -> &ReportingService {
        &self.reporting
    }

    pub fn backfill(&self, config: BackfillConfig) -> BackfillPipeline {
        BackfillPipeline::new(
            self.store.clone(),
            self.bridge.clone(),
            self.registry.clone(),
            config,
        )
    }

    pub fn health(&self, config: HealthConfig) -> HealthMonitor {
        HealthMonitor::new(self.store.clone(), config)
    }
}
