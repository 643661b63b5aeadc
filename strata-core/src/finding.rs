//! Machine-readable audit findings
//!
//! Integrity problems are reported, never auto-corrected. Only
//! [`FindingStatus::Fail`] blocks promotion or cutover.

use crate::ids::ProgramId;
use crate::observation::SeriesKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingStatus {
    Pass,
    Warn,
    Fail,
}

impl FindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingStatus::Pass => "pass",
            FindingStatus::Warn => "warn",
            FindingStatus::Fail => "fail",
        }
    }
}

impl fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which audit produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCheck {
    ProgramHasPartitions,
    EmptyPartitionAge,
    RowCountParity,
    OverflowSegmentEmpty,
    BackfillReconciliation,
}

impl FindingCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingCheck::ProgramHasPartitions => "program_has_partitions",
            FindingCheck::EmptyPartitionAge => "empty_partition_age",
            FindingCheck::RowCountParity => "row_count_parity",
            FindingCheck::OverflowSegmentEmpty => "overflow_segment_empty",
            FindingCheck::BackfillReconciliation => "backfill_reconciliation",
        }
    }
}

impl fmt::Display for FindingCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub check: FindingCheck,
    pub status: FindingStatus,
    /// What the finding is about: a program id, partition name or table
    pub subject: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<SeriesKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_id: Option<ProgramId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flat_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitioned_count: Option<i64>,
    /// Signed `flat_count - partitioned_count` for parity checks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discrepancy: Option<i64>,
    pub observed_at: DateTime<Utc>,
}

impl Finding {
    pub fn new(
        check: FindingCheck,
        status: FindingStatus,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            check,
            status,
            subject: subject.into(),
            message: message.into(),
            series: None,
            program_id: None,
            flat_count: None,
            partitioned_count: None,
            discrepancy: None,
            observed_at: Utc::now(),
        }
    }

    pub fn pass(check: FindingCheck, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(check, FindingStatus::Pass, subject, message)
    }

    pub fn warn(check: FindingCheck, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(check, FindingStatus::Warn, subject, message)
    }

    pub fn fail(check: FindingCheck, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(check, FindingStatus::Fail, subject, message)
    }

    pub fn with_series(mut self, series: SeriesKind) -> Self {
        self.series = Some(series);
        self
    }

    pub fn with_program(mut self, program_id: ProgramId) -> Self {
        self.program_id = Some(program_id);
        self
    }

    /// Attach both counts and their discrepancy
    pub fn with_counts(mut self, flat: i64, partitioned: i64) -> Self {
        self.flat_count = Some(flat);
        self.partitioned_count = Some(partitioned);
        self.discrepancy = Some(flat - partitioned);
        self
    }

    pub fn blocks_promotion(&self) -> bool {
        self.status == FindingStatus::Fail
    }
}

/// Aggregate view over a list of findings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindingSummary {
    pub total: usize,
    pub passed: usize,
    pub warned: usize,
    pub failed: usize,
    pub blocks_promotion: bool,
}

impl FindingSummary {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut summary = Self::default();
        for finding in findings {
            summary.total += 1;
            match finding.status {
                FindingStatus::Pass => summary.passed += 1,
                FindingStatus::Warn => summary.warned += 1,
                FindingStatus::Fail => summary.failed += 1,
            }
        }
        summary.blocks_promotion = summary.failed > 0;
        summary
    }
}
