//! Custom assertions for common verification patterns
//!
//! Provides assertion helpers over findings and store contents that give
//! better failure messages than bare `assert!`.

use strata_core::{Finding, FindingCheck, FindingStatus, ProgramId, SeriesKind};
use strata_storage::ObservationStore;

/// Finding assertion helpers
pub struct FindingAssertions<'a> {
    findings: &'a [Finding],
}

impl<'a> FindingAssertions<'a> {
    pub fn new(findings: &'a [Finding]) -> Self {
        Self { findings }
    }

    /// Findings produced by one check
    pub fn of(&self, check: FindingCheck) -> Vec<&'a Finding> {
        self.findings.iter().filter(|f| f.check == check).collect()
    }

    /// The finding for a check and program; panics when absent
    pub fn for_program(&self, check: FindingCheck, program_id: ProgramId) -> &'a Finding {
        self.findings
            .iter()
            .find(|f| f.check == check && f.program_id == Some(program_id))
            .unwrap_or_else(|| {
                panic!("No {} finding for program {}", check, program_id)
            })
    }

    /// Assert every finding of a check has the given status
    pub fn assert_all(self, check: FindingCheck, status: FindingStatus) -> Self {
        let matching = self.of(check);
        assert!(!matching.is_empty(), "No {} findings", check);
        for finding in matching {
            assert_eq!(
                finding.status, status,
                "Expected {} for {} on {} but got {}: {}",
                status, check, finding.subject, finding.status, finding.message
            );
        }
        self
    }

    /// Assert the program's finding for a check has the given status
    pub fn assert_program(
        self,
        check: FindingCheck,
        program_id: ProgramId,
        status: FindingStatus,
    ) -> Self {
        let finding = self.for_program(check, program_id);
        assert_eq!(
            finding.status, status,
            "Expected {} for {} on program {} but got {}: {}",
            status, check, program_id, finding.status, finding.message
        );
        self
    }

    /// Assert nothing blocks promotion
    pub fn assert_no_failures(self) -> Self {
        let failed: Vec<_> = self
            .findings
            .iter()
            .filter(|f| f.blocks_promotion())
            .map(|f| format!("{} {}: {}", f.check, f.subject, f.message))
            .collect();
        assert!(failed.is_empty(), "Unexpected failures: {:#?}", failed);
        self
    }

    /// Assert every parity/reconciliation finding reports zero drift
    pub fn assert_zero_discrepancy(self) -> Self {
        for finding in self.findings.iter().filter(|f| {
            matches!(
                f.check,
                FindingCheck::RowCountParity | FindingCheck::BackfillReconciliation
            )
        }) {
            assert_eq!(
                finding.discrepancy,
                Some(0),
                "{} on {} reports drift: {}",
                finding.check,
                finding.subject,
                finding.message
            );
        }
        self
    }
}

/// Assert flat and partitioned counts match for a series, optionally per program
pub async fn assert_store_parity(
    store: &dyn ObservationStore,
    kind: SeriesKind,
    program_id: Option<ProgramId>,
) {
    let flat = store.count_flat(kind, program_id).await.expect("count flat");
    let partitioned = store
        .count_partitioned(kind, program_id)
        .await
        .expect("count partitioned");
    assert_eq!(
        flat, partitioned,
        "{} parity broken: flat={} partitioned={}",
        kind, flat, partitioned
    );
}
