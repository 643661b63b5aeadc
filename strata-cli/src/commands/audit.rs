//! Audit command

use crate::config::{connect, print_json};
use anyhow::Result;
use std::sync::Arc;
use strata_runtime::{HealthConfig, HealthMonitor};
use strata_storage::ObservationStore;

/// Returns `false` when any finding blocks promotion
pub async fn execute(
    database_url: &str,
    max_empty_age_days: Option<i64>,
    parity_tolerance: Option<i64>,
) -> Result<bool> {
    let mut config = HealthConfig::from_env()?;
    if let Some(days) = max_empty_age_days {
        config.empty_partition_max_age_days = days;
    }
    if let Some(tolerance) = parity_tolerance {
        config.parity_tolerance = tolerance;
    }

    let store: Arc<dyn ObservationStore> = connect(database_url).await?;
    let report = HealthMonitor::new(store, config).audit().await?;
    print_json(&report)?;
    Ok(!report.summary.blocks_promotion)
}
