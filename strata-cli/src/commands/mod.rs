//! CLI command implementations

pub mod audit;
pub mod backfill;
pub mod migrate;
pub mod partitions;
pub mod precreate;
