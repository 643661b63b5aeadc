//! The storage seam shared by the Postgres and in-memory backends

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_core::{
    ObservationRow, PartitionEntry, PartitionLevel, Program, ProgramId, RecordId, RecordKey,
    SegmentSpec, SeriesKind, Site, SiteId, SubmissionId, TenantId,
};

/// Registry listing filter; `None` fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionFilter {
    pub table_name: Option<String>,
    pub program_id: Option<ProgramId>,
    pub level: Option<PartitionLevel>,
}

impl PartitionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_table(kind: SeriesKind) -> Self {
        Self {
            table_name: Some(kind.partitioned_table().to_string()),
            ..Self::default()
        }
    }

    pub fn program(mut self, program_id: ProgramId) -> Self {
        self.program_id = Some(program_id);
        self
    }

    pub fn level(mut self, level: PartitionLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn matches(&self, entry: &PartitionEntry) -> bool {
        self.table_name
            .as_ref()
            .map_or(true, |t| t == &entry.table_name)
            && self
                .program_id
                .map_or(true, |p| entry.program_id == Some(p))
            && self.level.map_or(true, |l| l == entry.level)
    }
}

/// Keyset position for paging flat rows in `(observed_at, record_id)` order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub observed_at: DateTime<Utc>,
    pub record_id: RecordId,
}

impl PageCursor {
    pub fn from_row(row: &ObservationRow) -> strata_core::Result<Self> {
        Ok(Self {
            observed_at: row.observed_at()?,
            record_id: row.record_id()?,
        })
    }

    /// Whether `(observed_at, record_id)` sorts strictly after this cursor
    pub fn precedes(&self, observed_at: DateTime<Utc>, record_id: RecordId) -> bool {
        (observed_at, record_id) > (self.observed_at, self.record_id)
    }
}

/// Read-only range query over one series' partitioned table.
///
/// Always scoped by tenant and program so the planner can prune to the
/// program's segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeQuery {
    pub tenant_id: TenantId,
    pub program_id: ProgramId,
    #[serde(default)]
    pub site_id: Option<SiteId>,
    /// Inclusive lower bound
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub series_code: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl RangeQuery {
    pub fn new(tenant_id: TenantId, program_id: ProgramId) -> Self {
        Self {
            tenant_id,
            program_id,
            site_id: None,
            from: None,
            to: None,
            series_code: None,
            include_deleted: false,
            limit: None,
        }
    }

    pub fn site(mut self, site_id: SiteId) -> Self {
        self.site_id = Some(site_id);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn series(mut self, series_code: impl Into<String>) -> Self {
        self.series_code = Some(series_code.into());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a row satisfies the query; used by backends that filter in memory
    pub fn matches(&self, row: &ObservationRow) -> bool {
        let tenant_ok = row.str(strata_core::columns::TENANT_ID) == Some(self.tenant_id.as_str());
        let program_ok = row.program_id().ok() == Some(self.program_id);
        let site_ok = self.site_id.map_or(true, |s| row.site_id().ok() == Some(s));
        let series_ok = self
            .series_code
            .as_deref()
            .map_or(true, |code| row.series_code().ok() == Some(code));
        let deleted_ok = self.include_deleted || !row.is_deleted();
        let time_ok = match row.observed_at() {
            Ok(ts) => self.from.map_or(true, |f| ts >= f) && self.to.map_or(true, |t| ts < t),
            Err(_) => false,
        };
        tenant_ok && program_ok && site_ok && series_ok && deleted_ok && time_ok
    }
}

/// Aggregate over the rows a [`RangeQuery`] selects
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesAggregate {
    pub count: i64,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub avg_value: Option<f64>,
    pub latest_observed_at: Option<DateTime<Utc>>,
    pub latest_velocity: Option<f64>,
}

/// Storage operations used by the partition router, the synchronization
/// bridge, the backfill pipeline and the health monitor.
///
/// Row-level operations address records by `(record_id, program_id)`.
/// Column sets are discovered through [`ObservationStore::table_columns`];
/// writes naming a column the target table lacks fail with
/// [`crate::Error::ValidationError`].
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    // ========== Schema ==========

    /// Column names of a table in ordinal order
    async fn table_columns(&self, table: &str) -> Result<Vec<String>>;

    // ========== Hierarchy ==========

    async fn upsert_tenant(&self, tenant_id: &TenantId, name: &str) -> Result<()>;

    async fn upsert_program(&self, program: &Program) -> Result<()>;

    async fn upsert_site(&self, site: &Site) -> Result<()>;

    async fn get_program(&self, program_id: ProgramId) -> Result<Option<Program>>;

    async fn list_programs(&self) -> Result<Vec<Program>>;

    async fn list_sites(&self, program_id: ProgramId) -> Result<Vec<Site>>;

    // ========== Partition registry ==========

    async fn find_partition(&self, partition_name: &str) -> Result<Option<PartitionEntry>>;

    async fn list_partitions(&self, filter: &PartitionFilter) -> Result<Vec<PartitionEntry>>;

    /// Insert if absent; returns `false` when the entry already existed
    async fn insert_partition_entry(&self, entry: &PartitionEntry) -> Result<bool>;

    async fn adjust_row_estimate(&self, partition_name: &str, delta: i64) -> Result<()>;

    async fn set_row_estimate(&self, partition_name: &str, rows: i64) -> Result<()>;

    // ========== Physical segments ==========

    async fn segment_exists(&self, partition_name: &str) -> Result<bool>;

    /// Create a segment (plus its default child, for program and site
    /// segments), move matching rows out of the parent's default segment
    /// and attach it.
    ///
    /// Fails with [`crate::Error::AlreadyExists`] when another caller got
    /// there first.
    async fn create_segment(&self, spec: &SegmentSpec) -> Result<()>;

    /// Rows currently stored in the segment, including its descendants
    async fn segment_row_count(&self, partition_name: &str) -> Result<i64>;

    // ========== Flat (legacy) store ==========

    async fn insert_flat(&self, kind: SeriesKind, row: &ObservationRow) -> Result<()>;

    /// Targeted update; returns `false` when the record does not exist
    async fn update_flat(
        &self,
        kind: SeriesKind,
        key: &RecordKey,
        changes: &ObservationRow,
    ) -> Result<bool>;

    /// Returns `false` when the record does not exist
    async fn delete_flat(&self, kind: SeriesKind, key: &RecordKey) -> Result<bool>;

    async fn get_flat(&self, kind: SeriesKind, key: &RecordKey) -> Result<Option<ObservationRow>>;

    async fn flat_keys_for_submission(
        &self,
        kind: SeriesKind,
        submission_id: SubmissionId,
    ) -> Result<Vec<RecordKey>>;

    async fn count_flat(&self, kind: SeriesKind, program_id: Option<ProgramId>) -> Result<i64>;

    /// Flat rows of a program not yet present in the partitioned store,
    /// ordered by `(observed_at, record_id)`, strictly after `after`
    async fn unmigrated_page(
        &self,
        kind: SeriesKind,
        program_id: ProgramId,
        after: Option<&PageCursor>,
        limit: i64,
    ) -> Result<Vec<ObservationRow>>;

    // ========== Partitioned store ==========

    /// Upsert rows on the composite key, writing only `columns`.
    ///
    /// Existing rows get their non-key `columns` overwritten; every other
    /// column is preserved. Returns how many rows were newly inserted.
    async fn upsert_partitioned(
        &self,
        kind: SeriesKind,
        rows: &[ObservationRow],
        columns: &[String],
    ) -> Result<u64>;

    async fn update_partitioned(
        &self,
        kind: SeriesKind,
        key: &RecordKey,
        changes: &ObservationRow,
    ) -> Result<bool>;

    async fn delete_partitioned(&self, kind: SeriesKind, key: &RecordKey) -> Result<bool>;

    async fn get_partitioned(
        &self,
        kind: SeriesKind,
        key: &RecordKey,
    ) -> Result<Option<ObservationRow>>;

    async fn count_partitioned(
        &self,
        kind: SeriesKind,
        program_id: Option<ProgramId>,
    ) -> Result<i64>;

    /// Latest non-deleted reading of the series strictly before
    /// `(observed_at, record_id)`
    async fn previous_in_series(
        &self,
        kind: SeriesKind,
        program_id: ProgramId,
        series_code: &str,
        observed_at: DateTime<Utc>,
        record_id: RecordId,
    ) -> Result<Option<ObservationRow>>;

    async fn query_partitioned(
        &self,
        kind: SeriesKind,
        query: &RangeQuery,
    ) -> Result<Vec<ObservationRow>>;

    async fn aggregate_partitioned(
        &self,
        kind: SeriesKind,
        query: &RangeQuery,
    ) -> Result<SeriesAggregate>;
}

/// Reject column names that cannot be safely interpolated into SQL
pub fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= strata_core::partition::MAX_IDENTIFIER_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(crate::Error::ValidationError(format!(
            "Invalid identifier: {:?}",
            name
        )))
    }
}

/// Reject change sets that would move a record to another partition
pub fn ensure_no_key_change(changes: &ObservationRow) -> Result<()> {
    let touched = changes.partition_key_columns();
    if touched.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::ImmutableKey(touched.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use strata_core::columns;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("observed_at").is_ok());
        assert!(validate_identifier("petri_p0a1b2c3d4e5f_default").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("value; drop table x").is_err());
        assert!(validate_identifier("Value").is_err());
    }

    #[test]
    fn test_key_changes_rejected() {
        let ok = ObservationRow::new().with(columns::NOTES, "n");
        assert!(ensure_no_key_change(&ok).is_ok());

        let bad = ObservationRow::new().with(columns::SITE_ID, "x");
        assert!(matches!(
            ensure_no_key_change(&bad),
            Err(crate::Error::ImmutableKey(_))
        ));
    }

    #[test]
    fn test_cursor_ordering() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = RecordId::from_uuid(uuid::Uuid::from_u128(1));
        let b = RecordId::from_uuid(uuid::Uuid::from_u128(2));
        let cursor = PageCursor {
            observed_at: ts,
            record_id: a,
        };
        assert!(cursor.precedes(ts, b));
        assert!(!cursor.precedes(ts, a));
        assert!(cursor.precedes(ts + chrono::Duration::seconds(1), a));
    }

    #[test]
    fn test_range_query_matches() {
        let tenant = TenantId::new("acme");
        let program = ProgramId::new();
        let ts = Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap();
        let row = ObservationRow::new()
            .with(columns::TENANT_ID, "acme")
            .with(columns::PROGRAM_ID, program.to_string())
            .with(columns::SITE_ID, SiteId::new().to_string())
            .with(columns::SERIES_CODE, "dish-1")
            .with(columns::OBSERVED_AT, "2024-02-10T00:00:00Z");

        let q = RangeQuery::new(tenant.clone(), program);
        assert!(q.matches(&row));
        assert!(!RangeQuery::new(TenantId::new("other"), program).matches(&row));
        assert!(!q.clone().between(ts + chrono::Duration::days(1), ts + chrono::Duration::days(2)).matches(&row));
        assert!(q.clone().between(ts, ts + chrono::Duration::days(1)).matches(&row));
        assert!(!q.series("dish-2").matches(&row));
    }
}
