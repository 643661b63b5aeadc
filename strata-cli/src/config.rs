//! CLI configuration: logging setup and runtime construction

use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use strata_core::MetricThresholds;
use strata_runtime::Strata;
use strata_storage::{ObservationStore, PostgresStorage};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber; `RUST_LOG` wins over `--verbose`
pub fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Reports go to stdout, logs to stderr
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

pub async fn connect(database_url: &str) -> anyhow::Result<Arc<PostgresStorage>> {
    let storage = PostgresStorage::new(database_url)
        .await
        .context("Failed to connect to database")?;
    storage.health_check().await.context("Database health check failed")?;
    Ok(Arc::new(storage))
}

/// Connect and wire the runtime with thresholds from the environment
pub async fn runtime(database_url: &str) -> anyhow::Result<Strata> {
    let thresholds = MetricThresholds::from_env().context("Invalid trend thresholds")?;
    let store: Arc<dyn ObservationStore> = connect(database_url).await?;
    let strata = Strata::new(store, thresholds);
    strata.init().await.context("Schema reconciliation failed")?;
    Ok(strata)
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
