//! Health monitor
//!
//! Read-only audit over the registry and both stores. Every check produces
//! findings; only `fail` findings block cutover.

use crate::metrics::HEALTH_FINDINGS_TOTAL;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use strata_core::{Finding, FindingCheck, FindingSummary, PartitionLevel, SeriesKind};
use strata_storage::{ObservationStore, PartitionFilter};
use tracing::{info, instrument, warn};

pub const EMPTY_PARTITION_MAX_AGE_ENV: &str = "STRATA_HEALTH_EMPTY_PARTITION_MAX_AGE_DAYS";
pub const PARITY_TOLERANCE_ENV: &str = "STRATA_HEALTH_PARITY_TOLERANCE";

/// Configuration for the health monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// Empty month segments older than this are reported (default: 30)
    pub empty_partition_max_age_days: i64,
    /// Allowed `|flat - partitioned|` per program and series (default: 0)
    pub parity_tolerance: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            empty_partition_max_age_days: 30,
            parity_tolerance: 0,
        }
    }
}

impl HealthConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            empty_partition_max_age_days: env_i64(
                EMPTY_PARTITION_MAX_AGE_ENV,
                defaults.empty_partition_max_age_days,
            )?,
            parity_tolerance: env_i64(PARITY_TOLERANCE_ENV, defaults.parity_tolerance)?,
        })
    }
}

fn env_i64(name: &str, default: i64) -> Result<i64> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<i64>() {
            Ok(v) if v >= 0 => Ok(v),
            _ => Err(Error::Configuration(format!(
                "{} must be a non-negative integer, got {:?}",
                name, raw
            ))),
        },
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub audited_at: DateTime<Utc>,
    pub summary: FindingSummary,
    pub findings: Vec<Finding>,
}

pub struct HealthMonitor {
    store: Arc<dyn ObservationStore>,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(store: Arc<dyn ObservationStore>, config: HealthConfig) -> Self {
        Self { store, config }
    }

    pub async fn audit(&self) -> Result<HealthReport> {
        self.audit_at(Utc::now()).await
    }

    /// Run every check as of `now`
    #[instrument(skip(self))]
    pub async fn audit_at(&self, now: DateTime<Utc>) -> Result<HealthReport> {
        let mut findings = Vec::new();
        findings.extend(self.check_program_partitions().await?);
        findings.extend(self.check_empty_partitions(now).await?);
        findings.extend(self.check_parity().await?);
        findings.extend(self.check_overflow().await?);

        for finding in &findings {
            HEALTH_FINDINGS_TOTAL
                .with_label_values(&[finding.check.as_str(), finding.status.as_str()])
                .inc();
        }

        let summary = FindingSummary::from_findings(&findings);
        if summary.blocks_promotion {
            warn!(failed = summary.failed, warned = summary.warned, "Audit found failures");
        } else {
            info!(passed = summary.passed, warned = summary.warned, "Audit passed");
        }
        Ok(HealthReport {
            audited_at: now,
            summary,
            findings,
        })
    }

    /// Every program has at least one registry entry
    async fn check_program_partitions(&self) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        for program in self.store.list_programs().await? {
            let entries = self
                .store
                .list_partitions(&PartitionFilter::all().program(program.id))
                .await?;
            let finding = if entries.is_empty() {
                Finding::fail(
                    FindingCheck::ProgramHasPartitions,
                    program.id.to_string(),
                    format!("Program '{}' has no partition entries", program.name),
                )
            } else {
                Finding::pass(
                    FindingCheck::ProgramHasPartitions,
                    program.id.to_string(),
                    format!("{} partition entries", entries.len()),
                )
            };
            findings.push(finding.with_program(program.id));
        }
        Ok(findings)
    }

    /// Program, site and month segments that are both empty and older than
    /// the configured age. Overflow segments are covered by the overflow check.
    async fn check_empty_partitions(&self, now: DateTime<Utc>) -> Result<Vec<Finding>> {
        let segments = self.store.list_partitions(&PartitionFilter::all()).await?;

        let mut findings = Vec::new();
        for entry in segments
            .into_iter()
            .filter(|e| e.level != PartitionLevel::Overflow)
        {
            let age = entry.age_days(now);
            if age <= self.config.empty_partition_max_age_days {
                continue;
            }
            let rows = match self.store.segment_row_count(&entry.partition_name).await {
                Ok(rows) => rows,
                Err(strata_storage::Error::NotFound(_)) => 0,
                Err(e) => return Err(e.into()),
            };
            if rows == 0 {
                let mut finding = Finding::warn(
                    FindingCheck::EmptyPartitionAge,
                    entry.partition_name.clone(),
                    format!(
                        "Empty {} segment for {} days (limit {})",
                        entry.level, age, self.config.empty_partition_max_age_days
                    ),
                );
                if let Some(program_id) = entry.program_id {
                    finding = finding.with_program(program_id);
                }
                findings.push(finding);
            }
        }
        Ok(findings)
    }

    /// Flat and partitioned counts per program and series
    async fn check_parity(&self) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        for program in self.store.list_programs().await? {
            for kind in SeriesKind::ALL {
                let flat = self.store.count_flat(kind, Some(program.id)).await?;
                let partitioned = self.store.count_partitioned(kind, Some(program.id)).await?;
                let drift = (flat - partitioned).abs();
                let finding = if drift <= self.config.parity_tolerance {
                    Finding::pass(
                        FindingCheck::RowCountParity,
                        program.id.to_string(),
                        format!("{} rows in both stores", partitioned),
                    )
                } else {
                    Finding::fail(
                        FindingCheck::RowCountParity,
                        program.id.to_string(),
                        format!(
                            "Discrepancy of {} rows exceeds tolerance {}",
                            drift, self.config.parity_tolerance
                        ),
                    )
                };
                findings.push(
                    finding
                        .with_series(kind)
                        .with_program(program.id)
                        .with_counts(flat, partitioned),
                );
            }
        }
        Ok(findings)
    }

    /// Rows parked in default segments mean provisioning fell behind
    async fn check_overflow(&self) -> Result<Vec<Finding>> {
        let overflow = self
            .store
            .list_partitions(&PartitionFilter::all().level(PartitionLevel::Overflow))
            .await?;

        let mut findings = Vec::new();
        for entry in overflow {
            let rows = match self.store.segment_row_count(&entry.partition_name).await {
                Ok(rows) => rows,
                Err(strata_storage::Error::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            if rows > 0 {
                let mut finding = Finding::warn(
                    FindingCheck::OverflowSegmentEmpty,
                    entry.partition_name.clone(),
                    format!("{} rows in overflow segment", rows),
                );
                if let Some(program_id) = entry.program_id {
                    finding = finding.with_program(program_id);
                }
                findings.push(finding);
            }
        }
        Ok(findings)
    }
}
