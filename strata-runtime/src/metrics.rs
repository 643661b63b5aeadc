//! Prometheus metrics for Strata runtime operations

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

lazy_static! {
    /// Segments physically created by the router
    ///
    /// Labels:
    /// - level: "program", "site", "month"
    pub static ref PARTITIONS_CREATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "strata_partitions_created_total",
        "Total number of partition segments created",
        &["level"]
    )
    .expect("strata_partitions_created_total metric registration");

    /// Registry cache lookups
    ///
    /// Labels:
    /// - result: "hit", "loaded", "absent"
    pub static ref PARTITION_CACHE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "strata_partition_cache_total",
        "Partition registry cache lookups by result",
        &["result"]
    )
    .expect("strata_partition_cache_total metric registration");

    /// Mirror operations issued by the synchronization bridge
    ///
    /// Labels:
    /// - operation: "insert", "update", "delete", "batch"
    /// - outcome: "mirrored", "skipped", "failed"
    pub static ref SYNC_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "strata_sync_operations_total",
        "Synchronization bridge mirror operations",
        &["operation", "outcome"]
    )
    .expect("strata_sync_operations_total metric registration");

    /// Rows newly inserted into the partitioned store by the backfill
    ///
    /// Labels:
    /// - series: "petri", "gasifier"
    pub static ref BACKFILL_ROWS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "strata_backfill_rows_total",
        "Rows migrated by the backfill pipeline",
        &["series"]
    )
    .expect("strata_backfill_rows_total metric registration");

    /// Health findings by check and status
    pub static ref HEALTH_FINDINGS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "strata_health_findings_total",
        "Health monitor findings",
        &["check", "status"]
    )
    .expect("strata_health_findings_total metric registration");
}
