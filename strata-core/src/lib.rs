//! # Strata Core
//!
//! Domain model for the hierarchical partitioned observation store:
//! identifiers, programs and sites, observation rows, partition naming,
//! the derived metric engine, trend thresholds and audit findings.
//!
//! Nothing in this crate performs I/O.

pub mod derived;
pub mod finding;
pub mod ids;
pub mod observation;
pub mod partition;
pub mod program;
pub mod thresholds;

// Re-export commonly used types
pub use derived::{
    ConsumptionTrend, DerivedMetrics, GrowthTrend, MetricEngine, PriorReading, Reading, Trend,
};
pub use finding::{Finding, FindingCheck, FindingStatus, FindingSummary};
pub use ids::{ProgramId, RecordId, RecordKey, SiteId, SubmissionId, TenantId};
pub use observation::{columns, Correction, NewObservation, ObservationRow, SeriesKind};
pub use partition::{
    PartitionEntry, PartitionKey, PartitionLevel, PartitionNamer, SegmentSpec,
};
pub use program::{Phase, Program, Site};
pub use thresholds::{BandThresholds, MetricThresholds};

/// Result type for Strata core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Strata core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unusable configuration; always fatal
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid partition key: {0}")]
    InvalidKey(String),

    #[error("Invalid observation: {0}")]
    InvalidObservation(String),
}
