//! Partition registry inspection

use crate::config::{connect, print_json};
use anyhow::Result;
use strata_core::{PartitionLevel, ProgramId, SeriesKind};
use strata_storage::{ObservationStore, PartitionFilter};

pub async fn list(
    database_url: &str,
    program: Option<ProgramId>,
    series: Option<SeriesKind>,
    level: Option<PartitionLevel>,
) -> Result<()> {
    let storage = connect(database_url).await?;

    let mut filter = series.map(PartitionFilter::for_table).unwrap_or_default();
    if let Some(program_id) = program {
        filter = filter.program(program_id);
    }
    if let Some(level) = level {
        filter = filter.level(level);
    }

    let entries = storage.list_partitions(&filter).await?;
    print_json(&entries)
}
