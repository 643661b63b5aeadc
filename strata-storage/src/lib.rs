//! # Strata Storage
//!
//! Flat (legacy) and partitioned observation storage. [`ObservationStore`]
//! is the seam; [`PostgresStorage`] implements it over declarative
//! partitioning and [`InMemoryStorage`] mirrors its semantics for tests
//! and dry runs.

pub mod circuit_breaker;
pub mod memory;
pub mod metrics;
pub mod migrations;
pub mod models;
pub mod postgres;
pub mod store;

// Re-export commonly used types
pub use circuit_breaker::CircuitBreakerConfig;
pub use memory::InMemoryStorage;
pub use models::{PartitionRegistryModel, ProgramModel, SiteModel};
pub use postgres::{PoolConfig, PostgresStorage};
pub use store::{
    ensure_no_key_change, validate_identifier, ObservationStore, PageCursor, PartitionFilter,
    RangeQuery, SeriesAggregate,
};

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for storage operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Partition key columns cannot be modified: {0}")]
    ImmutableKey(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Circuit breaker is open, rejecting database operation")]
    CircuitOpen,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same operation could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::PoolExhausted(_) | Error::ConnectionFailed(_) | Error::CircuitOpen
        )
    }
}

impl From<strata_core::Error> for Error {
    fn from(err: strata_core::Error) -> Self {
        Error::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
