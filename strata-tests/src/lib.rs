//! Shared test utilities for Strata crates
//!
//! This crate provides:
//! - **Fixtures**: a seeded three-program dataset with known row counts
//! - **Builders**: fluent builders for programs and observations
//! - **Assertions**: helpers over findings and store parity
//!
//! # Example
//!
//! ```ignore
//! use strata_tests::{builders::ObservationBuilder, fixtures};
//!
//! #[tokio::test]
//! async fn test_backfill() {
//!     let storage = fixtures::memory();
//!     let dataset = fixtures::dataset::seed_three_programs(storage.as_ref()).await.unwrap();
//!     // ...
//! }
//! ```

pub mod assertions;
pub mod builders;
pub mod fixtures;

// Re-export commonly used items
pub use assertions::FindingAssertions;
pub use builders::{ObservationBuilder, ProgramBuilder};
pub use fixtures::dataset::{Dataset, SeededProgram};
