//! Partition keys, deterministic segment naming and registry entries
//!
//! Every observation is placed by `(program_id, site_id, month(observed_at))`.
//! The physical layout is a three-level chain:
//!
//! ```text
//! <table>                          LIST (program_id)   + <table>_default
//!   <abbrev>_p<h12>                LIST (site_id)      + <segment>_default
//!     <abbrev>_p<h12>_s<h12>       RANGE (observed_at) + <segment>_default
//!       <abbrev>_p<h12>_s<h12>_mYYYYMM
//! ```
//!
//! Names are pure functions of the key so that concurrent creators agree on
//! the segment they are racing for.

use crate::ids::{ProgramId, SiteId};
use crate::observation::SeriesKind;
use crate::{Error, Result};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Postgres truncates identifiers beyond this many bytes
pub const MAX_IDENTIFIER_LEN: usize = 63;

const HASH_LEN: usize = 12;

/// Registry key value recorded for default segments
pub const OVERFLOW_KEY_VALUE: &str = "DEFAULT";

/// Truncate a date to the first day of its month
pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// First day of the month following `month`
pub fn next_month(month: NaiveDate) -> NaiveDate {
    let (year, m) = if month.month() == 12 {
        (month.year() + 1, 1)
    } else {
        (month.year(), month.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, m, 1).unwrap_or(NaiveDate::MAX)
}

/// Month (first day) containing the timestamp, in UTC
pub fn month_start(ts: DateTime<Utc>) -> NaiveDate {
    first_of_month(ts.date_naive())
}

/// Half-open `[start, end)` UTC bounds of a month
pub fn month_bounds(month: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = first_of_month(month);
    let end = next_month(start);
    (midnight(start), midnight(end))
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// First 12 hex digits of SHA-256 over the id's canonical text
pub fn short_hash(id: &impl fmt::Display) -> String {
    let digest = Sha256::digest(id.to_string().as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(HASH_LEN);
    hex
}

/// Level of a segment in the partition hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionLevel {
    Program,
    Site,
    Month,
    /// Default segment catching keys without a provisioned child
    Overflow,
}

impl PartitionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionLevel::Program => "program",
            PartitionLevel::Site => "site",
            PartitionLevel::Month => "month",
            PartitionLevel::Overflow => "overflow",
        }
    }
}

impl fmt::Display for PartitionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "program" => Ok(PartitionLevel::Program),
            "site" => Ok(PartitionLevel::Site),
            "month" => Ok(PartitionLevel::Month),
            "overflow" => Ok(PartitionLevel::Overflow),
            other => Err(Error::InvalidKey(format!(
                "Unknown partition level: {}",
                other
            ))),
        }
    }
}

/// Placement key of a single observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub program_id: ProgramId,
    pub site_id: SiteId,
    /// Always the first day of a month
    pub month: NaiveDate,
}

impl PartitionKey {
    pub fn new(program_id: ProgramId, site_id: SiteId, month: NaiveDate) -> Self {
        Self {
            program_id,
            site_id,
            month: first_of_month(month),
        }
    }

    pub fn for_observation(program_id: ProgramId, site_id: SiteId, observed_at: DateTime<Utc>) -> Self {
        Self::new(program_id, site_id, month_start(observed_at))
    }
}

/// Description of one physical segment, enough to create and register it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSpec {
    /// Logical partitioned table the segment belongs to
    pub table_name: String,
    pub partition_name: String,
    pub level: PartitionLevel,
    /// Direct parent; the logical table for program segments
    pub parent_partition: String,
    /// Text form of the discriminating key value (program id, site id or month)
    pub partition_key_value: String,
    pub program_id: Option<ProgramId>,
    pub site_id: Option<SiteId>,
    pub range_start: Option<DateTime<Utc>>,
    pub range_end: Option<DateTime<Utc>>,
}

impl SegmentSpec {
    /// Name of the default segment hanging off this one, if it has children
    pub fn overflow_name(&self) -> Option<String> {
        match self.level {
            PartitionLevel::Program | PartitionLevel::Site => {
                Some(PartitionNamer::overflow(&self.partition_name))
            }
            PartitionLevel::Month | PartitionLevel::Overflow => None,
        }
    }
}

/// Deterministic segment naming
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionNamer;

impl PartitionNamer {
    pub fn program_segment(kind: SeriesKind, program_id: ProgramId) -> String {
        format!("{}_p{}", kind.segment_prefix(), short_hash(&program_id))
    }

    pub fn site_segment(kind: SeriesKind, program_id: ProgramId, site_id: SiteId) -> String {
        format!(
            "{}_s{}",
            Self::program_segment(kind, program_id),
            short_hash(&site_id)
        )
    }

    pub fn month_segment(kind: SeriesKind, key: &PartitionKey) -> String {
        format!(
            "{}_m{:04}{:02}",
            Self::site_segment(kind, key.program_id, key.site_id),
            key.month.year(),
            key.month.month()
        )
    }

    /// Default segment under `parent`
    pub fn overflow(parent: &str) -> String {
        format!("{}_default", parent)
    }

    /// Default segment directly under the logical table
    pub fn root_overflow(kind: SeriesKind) -> String {
        Self::overflow(kind.partitioned_table())
    }

    pub fn program_spec(kind: SeriesKind, program_id: ProgramId) -> SegmentSpec {
        SegmentSpec {
            table_name: kind.partitioned_table().to_string(),
            partition_name: Self::program_segment(kind, program_id),
            level: PartitionLevel::Program,
            parent_partition: kind.partitioned_table().to_string(),
            partition_key_value: program_id.to_string(),
            program_id: Some(program_id),
            site_id: None,
            range_start: None,
            range_end: None,
        }
    }

    pub fn site_spec(kind: SeriesKind, program_id: ProgramId, site_id: SiteId) -> SegmentSpec {
        SegmentSpec {
            table_name: kind.partitioned_table().to_string(),
            partition_name: Self::site_segment(kind, program_id, site_id),
            level: PartitionLevel::Site,
            parent_partition: Self::program_segment(kind, program_id),
            partition_key_value: site_id.to_string(),
            program_id: Some(program_id),
            site_id: Some(site_id),
            range_start: None,
            range_end: None,
        }
    }

    pub fn month_spec(kind: SeriesKind, key: &PartitionKey) -> SegmentSpec {
        let (start, end) = month_bounds(key.month);
        SegmentSpec {
            table_name: kind.partitioned_table().to_string(),
            partition_name: Self::month_segment(kind, key),
            level: PartitionLevel::Month,
            parent_partition: Self::site_segment(kind, key.program_id, key.site_id),
            partition_key_value: crate::program::month_label(key.month),
            program_id: Some(key.program_id),
            site_id: Some(key.site_id),
            range_start: Some(start),
            range_end: Some(end),
        }
    }

    /// Default segment hanging off `parent` (a program or site segment)
    pub fn overflow_spec(parent: &SegmentSpec) -> Option<SegmentSpec> {
        let name = parent.overflow_name()?;
        Some(SegmentSpec {
            table_name: parent.table_name.clone(),
            partition_name: name,
            level: PartitionLevel::Overflow,
            parent_partition: parent.partition_name.clone(),
            partition_key_value: OVERFLOW_KEY_VALUE.to_string(),
            program_id: parent.program_id,
            site_id: parent.site_id,
            range_start: None,
            range_end: None,
        })
    }

    /// Default segment directly under the logical table
    pub fn root_overflow_spec(kind: SeriesKind) -> SegmentSpec {
        SegmentSpec {
            table_name: kind.partitioned_table().to_string(),
            partition_name: Self::root_overflow(kind),
            level: PartitionLevel::Overflow,
            parent_partition: kind.partitioned_table().to_string(),
            partition_key_value: OVERFLOW_KEY_VALUE.to_string(),
            program_id: None,
            site_id: None,
            range_start: None,
            range_end: None,
        }
    }

    /// Full chain for a key, outermost first
    pub fn chain(kind: SeriesKind, key: &PartitionKey) -> [SegmentSpec; 3] {
        [
            Self::program_spec(kind, key.program_id),
            Self::site_spec(kind, key.program_id, key.site_id),
            Self::month_spec(kind, key),
        ]
    }

    /// Reject names Postgres would silently truncate
    pub fn validate(name: &str) -> Result<()> {
        if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
            return Err(Error::InvalidKey(format!(
                "Segment name '{}' must be 1..={} bytes",
                name, MAX_IDENTIFIER_LEN
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(Error::InvalidKey(format!(
                "Segment name '{}' contains characters outside [a-z0-9_]",
                name
            )));
        }
        Ok(())
    }
}

/// One row of the partition registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionEntry {
    pub table_name: String,
    pub partition_name: String,
    pub level: PartitionLevel,
    pub partition_key_value: String,
    pub parent_partition: String,
    pub program_id: Option<ProgramId>,
    pub site_id: Option<SiteId>,
    pub range_start: Option<DateTime<Utc>>,
    pub range_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub row_count_estimate: i64,
}

impl PartitionEntry {
    pub fn from_spec(spec: &SegmentSpec, created_at: DateTime<Utc>) -> Self {
        Self {
            table_name: spec.table_name.clone(),
            partition_name: spec.partition_name.clone(),
            level: spec.level,
            partition_key_value: spec.partition_key_value.clone(),
            parent_partition: spec.parent_partition.clone(),
            program_id: spec.program_id,
            site_id: spec.site_id,
            range_start: spec.range_start,
            range_end: spec.range_end,
            created_at,
            row_count_estimate: 0,
        }
    }

    /// Whether the entry is a leaf that can actually hold rows
    pub fn is_leaf(&self) -> bool {
        matches!(self.level, PartitionLevel::Month | PartitionLevel::Overflow)
    }

    /// Age relative to `now`, in whole days
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}
