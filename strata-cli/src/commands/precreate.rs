//! Precreate command

use crate::config::{print_json, runtime};
use anyhow::Result;
use strata_core::ProgramId;
use strata_storage::ObservationStore;

pub async fn execute(database_url: &str, program: Option<ProgramId>) -> Result<()> {
    let strata = runtime(database_url).await?;

    let program_ids = match program {
        Some(id) => vec![id],
        None => strata
            .store()
            .list_programs()
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect(),
    };

    let mut reports = Vec::with_capacity(program_ids.len());
    for program_id in program_ids {
        reports.push(strata.router().precreate(program_id).await?);
    }

    print_json(&reports)
}
