//! Backfill command
//!
//! Ctrl-C stops the run between batches; the partial report is still
//! printed and a rerun resumes where this one stopped.

use crate::config::{print_json, runtime};
use anyhow::Result;
use std::time::Duration;
use strata_core::ProgramId;
use strata_runtime::BackfillConfig;
use tracing::warn;

/// Returns `false` when reconciliation found a blocking discrepancy
pub async fn execute(
    database_url: &str,
    program: Option<ProgramId>,
    batch_size: Option<i64>,
    batch_delay_ms: Option<u64>,
) -> Result<bool> {
    let mut config = BackfillConfig::from_env()?;
    if let Some(size) = batch_size {
        config = config.with_batch_size(size)?;
    }
    if let Some(ms) = batch_delay_ms {
        config = config.with_batch_delay(Duration::from_millis(ms));
    }

    let strata = runtime(database_url).await?;
    let pipeline = strata.backfill(config);

    let cancel = pipeline.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch");
            cancel.cancel();
        }
    });

    let report = pipeline.migrate(program).await?;
    print_json(&report)?;
    Ok(!report.blocks_promotion())
}
