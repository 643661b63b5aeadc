//! Ingestion entry point
//!
//! Callers submit raw readings with their program, site and submission
//! identity. Record ids are generated here; nothing upstream needs to know
//! how the store is partitioned.

use crate::bridge::{SyncBridge, SyncOutcome};
use crate::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use strata_core::{Correction, NewObservation, RecordId, RecordKey, SeriesKind, SubmissionId};
use strata_storage::ObservationStore;
use tracing::{info, instrument};

/// Acknowledgement returned to the ingestion caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submitted {
    pub record_id: RecordId,
    pub outcome: SyncOutcome,
}

pub struct IngestService {
    store: Arc<dyn ObservationStore>,
    bridge: Arc<SyncBridge>,
}

impl IngestService {
    pub fn new(store: Arc<dyn ObservationStore>, bridge: Arc<SyncBridge>) -> Self {
        Self { store, bridge }
    }

    #[instrument(
        skip(self, observation),
        fields(series = %observation.kind, program_id = %observation.program_id)
    )]
    pub async fn submit(&self, observation: NewObservation) -> Result<Submitted> {
        observation.validate()?;

        let program = self
            .store
            .get_program(observation.program_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Program {}", observation.program_id)))?;
        if program.tenant_id != observation.tenant_id {
            return Err(Error::InvalidInput(format!(
                "Program {} does not belong to tenant {}",
                program.id, observation.tenant_id
            )));
        }
        let sites = self.store.list_sites(program.id).await?;
        if !sites.iter().any(|s| s.id == observation.site_id) {
            return Err(Error::InvalidInput(format!(
                "Site {} does not belong to program {}",
                observation.site_id, program.id
            )));
        }

        let kind = observation.kind;
        let phase = program
            .phase_at(observation.observed_at.date_naive())
            .map(|p| p.name.clone());
        let record_id = RecordId::new();
        let row = observation.into_row(record_id, phase.as_deref(), Utc::now());

        let outcome = self.bridge.insert(kind, &row).await?;
        info!(record_id = %record_id, mirrored = outcome.mirrored, "Observation ingested");
        Ok(Submitted { record_id, outcome })
    }

    /// Apply a notes/flag/soft-delete correction
    pub async fn correct(
        &self,
        kind: SeriesKind,
        key: &RecordKey,
        correction: Correction,
    ) -> Result<SyncOutcome> {
        if correction.is_empty() {
            return Err(Error::InvalidInput("Correction changes nothing".to_string()));
        }
        let outcome = self
            .bridge
            .update(kind, key, &correction.into_changes(Utc::now()))
            .await?;
        if !outcome.found {
            return Err(Error::NotFound(format!("Record {}", key)));
        }
        Ok(outcome)
    }

    /// Remove every record of a deleted submission
    pub async fn delete_submission(&self, submission_id: SubmissionId) -> Result<usize> {
        self.bridge.on_submission_deleted(submission_id).await
    }
}
