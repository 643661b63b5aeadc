//! Migrate command

use anyhow::Result;

pub async fn execute(database_url: &str) -> Result<()> {
    let storage = crate::config::connect(database_url).await?;
    strata_storage::migrations::run_migrations(storage.pool()).await?;
    tracing::info!("Migrations applied successfully");
    Ok(())
}
