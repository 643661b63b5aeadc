//! Database migration support

use crate::Result;
use sqlx::PgPool;
use tracing::info;

/// Run all pending migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrator = sqlx::migrate!("./migrations");
    let known = migrator.iter().count();

    migrator
        .run(pool)
        .await
        .map_err(|e| crate::Error::Migration(e.to_string()))?;

    info!(migrations = known, "Schema migrations applied");
    Ok(())
}
