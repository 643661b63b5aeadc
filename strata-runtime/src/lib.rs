//! # Strata Runtime
//!
//! Services over the observation store: the partition registry and router,
//! the synchronization bridge between the flat and partitioned stores, the
//! derived-metric write hook, ingestion and reporting entry points, the
//! backfill pipeline and the health monitor.

pub mod backfill;
pub mod bridge;
pub mod columns;
pub mod derived_hook;
pub mod eta;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod registry;
pub mod reporting;
pub mod retry;
pub mod router;
pub mod runtime;

// Re-export commonly used types
pub use backfill::{BackfillConfig, BackfillPipeline, CancelFlag, MigrationReport, ProgramProgress};
pub use bridge::{BatchOutcome, SyncBridge, SyncOutcome};
pub use columns::{ColumnCatalog, ColumnSet};
pub use derived_hook::DerivedMetricHook;
pub use eta::EtaCalculator;
pub use health::{HealthConfig, HealthMonitor, HealthReport};
pub use ingest::{IngestService, Submitted};
pub use registry::PartitionRegistry;
pub use reporting::ReportingService;
pub use retry::{RetryPolicy, RetryStrategy};
pub use router::{PartitionHandle, PartitionRouter, PrecreateReport};
pub use runtime::Strata;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for runtime operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] strata_storage::Error),

    #[error(transparent)]
    Core(#[from] strata_core::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unusable configuration or schema; always fatal
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether retrying the same operation could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Storage(e) if e.is_transient())
    }
}
