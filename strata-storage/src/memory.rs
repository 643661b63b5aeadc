//! In-memory storage backend
//!
//! Mirrors the observable behavior of [`crate::PostgresStorage`]: rows land
//! in the deepest provisioned segment (falling back to default segments),
//! creating a segment re-homes rows parked in its parent's default, writes
//! naming unknown columns are rejected, and registry inserts are
//! insert-if-absent. Used by tests and dry runs.

use crate::store::{
    ensure_no_key_change, ObservationStore, PageCursor, PartitionFilter, RangeQuery,
    SeriesAggregate,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use strata_core::{
    columns, ObservationRow, PartitionEntry, PartitionLevel, PartitionNamer, Program, ProgramId,
    RecordId, RecordKey, SegmentSpec, SeriesKind, Site, SiteId, SubmissionId, TenantId,
};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct StoredRow {
    segment: String,
    row: ObservationRow,
}

#[derive(Default)]
struct Inner {
    columns: HashMap<String, Vec<String>>,
    tenants: BTreeMap<TenantId, String>,
    programs: BTreeMap<ProgramId, Program>,
    sites: BTreeMap<SiteId, Site>,
    registry: BTreeMap<String, PartitionEntry>,
    segments: BTreeMap<String, PartitionLevel>,
    flat: HashMap<SeriesKind, BTreeMap<RecordKey, ObservationRow>>,
    partitioned: HashMap<SeriesKind, BTreeMap<RecordKey, StoredRow>>,
    partitioned_unavailable: bool,
}

impl Inner {
    fn check_columns<'a>(&self, table: &str, cols: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let known = self
            .columns
            .get(table)
            .ok_or_else(|| Error::NotFound(format!("Table {}", table)))?;
        for col in cols {
            if !known.iter().any(|k| k == col) {
                return Err(Error::ValidationError(format!(
                    "Unknown column: column \"{}\" of relation \"{}\" does not exist",
                    col, table
                )));
            }
        }
        Ok(())
    }

    /// Deepest provisioned segment for a row
    fn route(&self, kind: SeriesKind, row: &ObservationRow) -> Result<String> {
        let program_id = row.program_id()?;
        let site_id = row.site_id()?;
        let observed_at = row.observed_at()?;

        let program = PartitionNamer::program_segment(kind, program_id);
        if !self.segments.contains_key(&program) {
            return Ok(PartitionNamer::root_overflow(kind));
        }
        let site = PartitionNamer::site_segment(kind, program_id, site_id);
        if !self.segments.contains_key(&site) {
            return Ok(PartitionNamer::overflow(&program));
        }
        let key = strata_core::PartitionKey::for_observation(program_id, site_id, observed_at);
        let month = PartitionNamer::month_segment(kind, &key);
        if !self.segments.contains_key(&month) {
            return Ok(PartitionNamer::overflow(&site));
        }
        Ok(month)
    }

    fn partitioned_rows(&self, kind: SeriesKind) -> impl Iterator<Item = &StoredRow> {
        self.partitioned.get(&kind).into_iter().flat_map(|m| m.values())
    }

    fn entry_mut(&mut self, partition_name: &str) -> Result<&mut PartitionEntry> {
        self.registry
            .get_mut(partition_name)
            .ok_or_else(|| Error::NotFound(format!("Partition {}", partition_name)))
    }
}

fn kind_of_table(table: &str) -> Result<SeriesKind> {
    SeriesKind::ALL
        .into_iter()
        .find(|k| k.partitioned_table() == table)
        .ok_or_else(|| Error::ValidationError(format!("{} is not a partitioned table", table)))
}

fn sort_key(row: &ObservationRow) -> (Option<DateTime<Utc>>, Option<RecordId>) {
    (row.observed_at().ok(), row.record_id().ok())
}

/// In-memory [`ObservationStore`]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Empty store with the baseline schema and the two root default segments
    pub fn new() -> Self {
        let mut inner = Inner::default();
        for kind in SeriesKind::ALL {
            inner.columns.insert(
                kind.flat_table().to_string(),
                kind.flat_columns().into_iter().map(String::from).collect(),
            );
            inner.columns.insert(
                kind.partitioned_table().to_string(),
                kind.partitioned_columns().into_iter().map(String::from).collect(),
            );

            let root = PartitionNamer::root_overflow_spec(kind);
            inner
                .segments
                .insert(root.partition_name.clone(), PartitionLevel::Overflow);
            inner.registry.insert(
                root.partition_name.clone(),
                PartitionEntry::from_spec(&root, Utc::now()),
            );
        }
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Replace a table's column set, e.g. to model schema skew between the
    /// flat and partitioned tables
    pub fn with_columns<S: AsRef<str>>(self, table: &str, columns: &[S]) -> Self {
        self.inner.lock().columns.insert(
            table.to_string(),
            columns.iter().map(|c| c.as_ref().to_string()).collect(),
        );
        self
    }

    /// Make every partitioned write fail as if the connection dropped
    pub fn set_partitioned_unavailable(&self, unavailable: bool) {
        self.inner.lock().partitioned_unavailable = unavailable;
    }

    /// Segment currently holding a partitioned record
    pub fn segment_of(&self, kind: SeriesKind, key: &RecordKey) -> Option<String> {
        self.inner
            .lock()
            .partitioned
            .get(&kind)
            .and_then(|m| m.get(key))
            .map(|s| s.segment.clone())
    }

    /// Number of physical segments, root defaults included
    pub fn segment_count(&self) -> usize {
        self.inner.lock().segments.len()
    }

    fn ensure_partitioned_available(inner: &Inner) -> Result<()> {
        if inner.partitioned_unavailable {
            return Err(Error::ConnectionFailed(
                "partitioned store unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ObservationStore for InMemoryStorage {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        self.inner
            .lock()
            .columns
            .get(table)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Table {}", table)))
    }

    async fn upsert_tenant(&self, tenant_id: &TenantId, name: &str) -> Result<()> {
        self.inner
            .lock()
            .tenants
            .insert(tenant_id.clone(), name.to_string());
        Ok(())
    }

    async fn upsert_program(&self, program: &Program) -> Result<()> {
        if program.name.trim().is_empty() {
            return Err(Error::ValidationError("Program name cannot be empty".to_string()));
        }
        let mut inner = self.inner.lock();
        if !inner.tenants.contains_key(&program.tenant_id) {
            return Err(Error::NotFound(format!("Tenant {}", program.tenant_id)));
        }
        inner.programs.insert(program.id, program.clone());
        Ok(())
    }

    async fn upsert_site(&self, site: &Site) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.programs.contains_key(&site.program_id) {
            return Err(Error::NotFound(format!("Program {}", site.program_id)));
        }
        inner.sites.insert(site.id, site.clone());
        Ok(())
    }

    async fn get_program(&self, program_id: ProgramId) -> Result<Option<Program>> {
        Ok(self.inner.lock().programs.get(&program_id).cloned())
    }

    async fn list_programs(&self) -> Result<Vec<Program>> {
        Ok(self.inner.lock().programs.values().cloned().collect())
    }

    async fn list_sites(&self, program_id: ProgramId) -> Result<Vec<Site>> {
        Ok(self
            .inner
            .lock()
            .sites
            .values()
            .filter(|s| s.program_id == program_id)
            .cloned()
            .collect())
    }

    async fn find_partition(&self, partition_name: &str) -> Result<Option<PartitionEntry>> {
        Ok(self.inner.lock().registry.get(partition_name).cloned())
    }

    async fn list_partitions(&self, filter: &PartitionFilter) -> Result<Vec<PartitionEntry>> {
        let inner = self.inner.lock();
        let mut entries: Vec<PartitionEntry> = inner
            .registry
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            (&a.table_name, &a.partition_name).cmp(&(&b.table_name, &b.partition_name))
        });
        Ok(entries)
    }

    async fn insert_partition_entry(&self, entry: &PartitionEntry) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.registry.contains_key(&entry.partition_name) {
            return Ok(false);
        }
        let mut entry = entry.clone();
        entry.row_count_estimate = entry.row_count_estimate.max(0);
        inner.registry.insert(entry.partition_name.clone(), entry);
        Ok(true)
    }

    async fn adjust_row_estimate(&self, partition_name: &str, delta: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Ok(entry) = inner.entry_mut(partition_name) {
            entry.row_count_estimate = (entry.row_count_estimate + delta).max(0);
        }
        Ok(())
    }

    async fn set_row_estimate(&self, partition_name: &str, rows: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Ok(entry) = inner.entry_mut(partition_name) {
            entry.row_count_estimate = rows.max(0);
        }
        Ok(())
    }

    async fn segment_exists(&self, partition_name: &str) -> Result<bool> {
        let inner = self.inner.lock();
        Ok(inner.segments.contains_key(partition_name) || inner.columns.contains_key(partition_name))
    }

    async fn create_segment(&self, spec: &SegmentSpec) -> Result<()> {
        PartitionNamer::validate(&spec.partition_name)?;
        if spec.level == PartitionLevel::Overflow {
            return Err(Error::ValidationError(format!(
                "Overflow segment {} is created together with its parent",
                spec.partition_name
            )));
        }
        let kind = kind_of_table(&spec.table_name)?;

        let mut inner = self.inner.lock();
        if inner.segments.contains_key(&spec.partition_name) {
            return Err(Error::AlreadyExists(format!("Segment {}", spec.partition_name)));
        }
        let parent_exists = spec.parent_partition == spec.table_name
            || inner.segments.contains_key(&spec.parent_partition);
        if !parent_exists {
            return Err(Error::NotFound(format!(
                "relation \"{}\" does not exist",
                spec.parent_partition
            )));
        }

        inner
            .segments
            .insert(spec.partition_name.clone(), spec.level);
        if let Some(default_child) = spec.overflow_name() {
            inner.segments.insert(default_child, PartitionLevel::Overflow);
        }

        // Re-home rows parked in the parent's default segment
        let parent_default = PartitionNamer::overflow(&spec.parent_partition);
        let parked: Vec<(RecordKey, ObservationRow)> = inner
            .partitioned_rows(kind)
            .filter(|s| s.segment == parent_default)
            .filter_map(|s| s.row.key().ok().map(|k| (k, s.row.clone())))
            .collect();
        let mut moved = 0usize;
        for (key, row) in parked {
            let target = inner.route(kind, &row)?;
            if target != parent_default {
                if let Some(stored) = inner.partitioned.get_mut(&kind).and_then(|m| m.get_mut(&key)) {
                    stored.segment = target;
                    moved += 1;
                }
            }
        }
        drop(inner);

        if moved > 0 {
            info!(
                partition = %spec.partition_name,
                from = %parent_default,
                rows = moved,
                "Moved rows out of default segment"
            );
        }
        debug!(partition = %spec.partition_name, "Segment created and attached");
        Ok(())
    }

    async fn segment_row_count(&self, partition_name: &str) -> Result<i64> {
        let inner = self.inner.lock();
        if let Ok(kind) = kind_of_table(partition_name) {
            return Ok(inner.partitioned_rows(kind).count() as i64);
        }
        if !inner.segments.contains_key(partition_name) {
            return Err(Error::NotFound(format!(
                "relation \"{}\" does not exist",
                partition_name
            )));
        }
        let child_prefix = format!("{}_", partition_name);
        let count = SeriesKind::ALL
            .into_iter()
            .flat_map(|k| inner.partitioned_rows(k))
            .filter(|s| s.segment == partition_name || s.segment.starts_with(&child_prefix))
            .count();
        Ok(count as i64)
    }

    async fn insert_flat(&self, kind: SeriesKind, row: &ObservationRow) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_columns(kind.flat_table(), row.columns())?;
        let key = row.key()?;
        if !inner.programs.contains_key(&key.program_id) {
            return Err(Error::NotFound(format!("Program {}", key.program_id)));
        }
        let flat = inner.flat.entry(kind).or_default();
        if flat.contains_key(&key) {
            return Err(Error::AlreadyExists(format!("Record {}", key)));
        }
        flat.insert(key, row.clone());
        Ok(())
    }

    async fn update_flat(
        &self,
        kind: SeriesKind,
        key: &RecordKey,
        changes: &ObservationRow,
    ) -> Result<bool> {
        ensure_no_key_change(changes)?;
        let mut inner = self.inner.lock();
        inner.check_columns(kind.flat_table(), changes.columns())?;
        match inner.flat.get_mut(&kind).and_then(|m| m.get_mut(key)) {
            Some(row) => {
                for (col, value) in changes.iter() {
                    row.set(col.clone(), value.clone());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_flat(&self, kind: SeriesKind, key: &RecordKey) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .flat
            .get_mut(&kind)
            .and_then(|m| m.remove(key))
            .is_some())
    }

    async fn get_flat(&self, kind: SeriesKind, key: &RecordKey) -> Result<Option<ObservationRow>> {
        Ok(self
            .inner
            .lock()
            .flat
            .get(&kind)
            .and_then(|m| m.get(key))
            .cloned())
    }

    async fn flat_keys_for_submission(
        &self,
        kind: SeriesKind,
        submission_id: SubmissionId,
    ) -> Result<Vec<RecordKey>> {
        let inner = self.inner.lock();
        let mut rows: Vec<&ObservationRow> = inner
            .flat
            .get(&kind)
            .into_iter()
            .flat_map(|m| m.values())
            .filter(|r| r.submission_id().ok() == Some(submission_id))
            .collect();
        rows.sort_by_key(|r| sort_key(r));
        Ok(rows.into_iter().filter_map(|r| r.key().ok()).collect())
    }

    async fn count_flat(&self, kind: SeriesKind, program_id: Option<ProgramId>) -> Result<i64> {
        let inner = self.inner.lock();
        let count = inner
            .flat
            .get(&kind)
            .into_iter()
            .flat_map(|m| m.keys())
            .filter(|k| program_id.map_or(true, |p| k.program_id == p))
            .count();
        Ok(count as i64)
    }

    async fn unmigrated_page(
        &self,
        kind: SeriesKind,
        program_id: ProgramId,
        after: Option<&PageCursor>,
        limit: i64,
    ) -> Result<Vec<ObservationRow>> {
        if limit <= 0 {
            return Err(Error::ValidationError("Limit must be greater than 0".to_string()));
        }
        let inner = self.inner.lock();
        let migrated = inner.partitioned.get(&kind);
        let mut rows: Vec<ObservationRow> = inner
            .flat
            .get(&kind)
            .into_iter()
            .flat_map(|m| m.iter())
            .filter(|(k, _)| k.program_id == program_id)
            .filter(|(k, _)| !migrated.map_or(false, |m| m.contains_key(k)))
            .filter(|(_, row)| match (after, row.observed_at(), row.record_id()) {
                (None, _, _) => true,
                (Some(cursor), Ok(ts), Ok(id)) => cursor.precedes(ts, id),
                _ => false,
            })
            .map(|(_, row)| row.clone())
            .collect();
        rows.sort_by_key(sort_key);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn upsert_partitioned(
        &self,
        kind: SeriesKind,
        rows: &[ObservationRow],
        listed: &[String],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut inner = self.inner.lock();
        Self::ensure_partitioned_available(&inner)?;
        inner.check_columns(kind.partitioned_table(), listed.iter().map(|c| c.as_str()))?;
        for key_col in columns::PARTITION_KEY {
            if !listed.iter().any(|c| c == key_col) {
                return Err(Error::ValidationError(format!(
                    "Upsert into {} requires key column '{}'",
                    kind.partitioned_table(),
                    key_col
                )));
            }
        }

        // Validate the whole batch before touching anything
        let mut prepared = Vec::with_capacity(rows.len());
        for row in rows {
            let projected: ObservationRow = listed
                .iter()
                .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                .collect();
            let key = projected.key()?;
            let segment = inner.route(kind, &projected)?;
            prepared.push((key, segment, projected));
        }

        let table = inner.partitioned.entry(kind).or_default();
        let mut inserted = 0u64;
        for (key, segment, projected) in prepared {
            match table.get_mut(&key) {
                Some(existing) => {
                    for (col, value) in projected.iter() {
                        if !columns::is_partition_key(col) {
                            existing.row.set(col.clone(), value.clone());
                        }
                    }
                }
                None => {
                    table.insert(
                        key,
                        StoredRow {
                            segment,
                            row: projected,
                        },
                    );
                    inserted += 1;
                }
            }
        }
        Ok(inserted)
    }

    async fn update_partitioned(
        &self,
        kind: SeriesKind,
        key: &RecordKey,
        changes: &ObservationRow,
    ) -> Result<bool> {
        ensure_no_key_change(changes)?;
        let mut inner = self.inner.lock();
        Self::ensure_partitioned_available(&inner)?;
        inner.check_columns(kind.partitioned_table(), changes.columns())?;
        match inner.partitioned.get_mut(&kind).and_then(|m| m.get_mut(key)) {
            Some(stored) => {
                for (col, value) in changes.iter() {
                    stored.row.set(col.clone(), value.clone());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_partitioned(&self, kind: SeriesKind, key: &RecordKey) -> Result<bool> {
        let mut inner = self.inner.lock();
        Self::ensure_partitioned_available(&inner)?;
        Ok(inner
            .partitioned
            .get_mut(&kind)
            .and_then(|m| m.remove(key))
            .is_some())
    }

    async fn get_partitioned(
        &self,
        kind: SeriesKind,
        key: &RecordKey,
    ) -> Result<Option<ObservationRow>> {
        Ok(self
            .inner
            .lock()
            .partitioned
            .get(&kind)
            .and_then(|m| m.get(key))
            .map(|s| s.row.clone()))
    }

    async fn count_partitioned(
        &self,
        kind: SeriesKind,
        program_id: Option<ProgramId>,
    ) -> Result<i64> {
        let inner = self.inner.lock();
        let count = inner
            .partitioned
            .get(&kind)
            .into_iter()
            .flat_map(|m| m.keys())
            .filter(|k| program_id.map_or(true, |p| k.program_id == p))
            .count();
        Ok(count as i64)
    }

    async fn previous_in_series(
        &self,
        kind: SeriesKind,
        program_id: ProgramId,
        series_code: &str,
        observed_at: DateTime<Utc>,
        record_id: RecordId,
    ) -> Result<Option<ObservationRow>> {
        let inner = self.inner.lock();
        let previous = inner
            .partitioned_rows(kind)
            .map(|s| &s.row)
            .filter(|r| r.program_id().ok() == Some(program_id))
            .filter(|r| r.series_code().ok() == Some(series_code))
            .filter(|r| !r.is_deleted())
            .filter_map(|r| match (r.observed_at(), r.record_id()) {
                (Ok(ts), Ok(id)) if (ts, id) < (observed_at, record_id) => Some(((ts, id), r)),
                _ => None,
            })
            .max_by_key(|(order, _)| *order)
            .map(|(_, r)| r.clone());
        Ok(previous)
    }

    async fn query_partitioned(
        &self,
        kind: SeriesKind,
        query: &RangeQuery,
    ) -> Result<Vec<ObservationRow>> {
        let inner = self.inner.lock();
        let mut rows: Vec<ObservationRow> = inner
            .partitioned_rows(kind)
            .map(|s| &s.row)
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        rows.sort_by_key(sort_key);
        if let Some(limit) = query.limit {
            rows.truncate(limit.max(0) as usize);
        }
        Ok(rows)
    }

    async fn aggregate_partitioned(
        &self,
        kind: SeriesKind,
        query: &RangeQuery,
    ) -> Result<SeriesAggregate> {
        let rows = self
            .query_partitioned(
                kind,
                &RangeQuery {
                    limit: None,
                    ..query.clone()
                },
            )
            .await?;

        let values: Vec<f64> = rows.iter().filter_map(|r| r.f64(columns::VALUE)).collect();
        let latest = rows.last();
        Ok(SeriesAggregate {
            count: rows.len() as i64,
            min_value: values.iter().copied().reduce(f64::min),
            max_value: values.iter().copied().reduce(f64::max),
            avg_value: if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            },
            latest_observed_at: latest.and_then(|r| r.observed_at().ok()),
            latest_velocity: latest.and_then(|r| r.f64(columns::VELOCITY)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use strata_core::PartitionKey;

    async fn seeded() -> (InMemoryStorage, Program, Site) {
        let storage = InMemoryStorage::new();
        let tenant = TenantId::new("acme");
        storage.upsert_tenant(&tenant, "Acme").await.unwrap();
        let program = Program {
            id: ProgramId::new(),
            tenant_id: tenant,
            name: "trial".to_string(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 2, 28).unwrap(),
            phases: vec![],
        };
        storage.upsert_program(&program).await.unwrap();
        let site = Site::new(program.id, "north");
        storage.upsert_site(&site).await.unwrap();
        (storage, program, site)
    }

    fn row(program: &Program, site: &Site, day: u32) -> ObservationRow {
        ObservationRow::new()
            .with(columns::RECORD_ID, RecordId::new().to_string())
            .with(columns::PROGRAM_ID, program.id.to_string())
            .with(columns::SITE_ID, site.id.to_string())
            .with(columns::SUBMISSION_ID, SubmissionId::new().to_string())
            .with(columns::TENANT_ID, "acme")
            .with(columns::SERIES_CODE, "dish-1")
            .with(
                columns::OBSERVED_AT,
                strata_core::observation::format_timestamp(
                    Utc.with_ymd_and_hms(2024, 1, day, 8, 0, 0).unwrap(),
                ),
            )
            .with(columns::VALUE, day as f64)
    }

    fn cols(row: &ObservationRow) -> Vec<String> {
        row.columns().map(String::from).collect()
    }

    #[tokio::test]
    async fn test_rows_move_out_of_default_when_segments_appear() {
        let (storage, program, site) = seeded().await;
        let kind = SeriesKind::Petri;
        let r = row(&program, &site, 3);
        let key = r.key().unwrap();

        storage.upsert_partitioned(kind, &[r.clone()], &cols(&r)).await.unwrap();
        assert_eq!(
            storage.segment_of(kind, &key).unwrap(),
            PartitionNamer::root_overflow(kind)
        );

        let pk = PartitionKey::for_observation(program.id, site.id, r.observed_at().unwrap());
        let [p, s, m] = PartitionNamer::chain(kind, &pk);
        storage.create_segment(&p).await.unwrap();
        assert_eq!(
            storage.segment_of(kind, &key).unwrap(),
            PartitionNamer::overflow(&p.partition_name)
        );
        storage.create_segment(&s).await.unwrap();
        storage.create_segment(&m).await.unwrap();
        assert_eq!(storage.segment_of(kind, &key).unwrap(), m.partition_name);

        assert_eq!(storage.segment_row_count(&p.partition_name).await.unwrap(), 1);
        assert_eq!(
            storage
                .segment_row_count(&PartitionNamer::root_overflow(kind))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_create_segment_twice_is_already_exists() {
        let (storage, program, _) = seeded().await;
        let spec = PartitionNamer::program_spec(SeriesKind::Gasifier, program.id);
        storage.create_segment(&spec).await.unwrap();
        assert!(matches!(
            storage.create_segment(&spec).await,
            Err(Error::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_child_before_parent_is_not_found() {
        let (storage, program, site) = seeded().await;
        let spec = PartitionNamer::site_spec(SeriesKind::Petri, program.id, site.id);
        assert!(matches!(
            storage.create_segment(&spec).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_preserves_unlisted_columns() {
        let (storage, program, site) = seeded().await;
        let kind = SeriesKind::Petri;
        let r = row(&program, &site, 4);
        let key = r.key().unwrap();
        assert_eq!(storage.upsert_partitioned(kind, &[r.clone()], &cols(&r)).await.unwrap(), 1);

        storage
            .update_partitioned(kind, &key, &ObservationRow::new().with(columns::VELOCITY, 2.5))
            .await
            .unwrap();
        let again = r.clone().with(columns::VALUE, 99.0);
        assert_eq!(storage.upsert_partitioned(kind, &[again.clone()], &cols(&again)).await.unwrap(), 0);

        let stored = storage.get_partitioned(kind, &key).await.unwrap().unwrap();
        assert_eq!(stored.f64(columns::VALUE), Some(99.0));
        assert_eq!(stored.f64(columns::VELOCITY), Some(2.5));
    }

    #[tokio::test]
    async fn test_unknown_column_rejected() {
        let (storage, program, site) = seeded().await;
        let storage = storage.with_columns(
            SeriesKind::Petri.partitioned_table(),
            &SeriesKind::Petri
                .partitioned_columns()
                .into_iter()
                .filter(|c| *c != columns::NOTES)
                .collect::<Vec<_>>(),
        );
        let r = row(&program, &site, 5).with(columns::NOTES, "n");
        let result = storage
            .upsert_partitioned(SeriesKind::Petri, &[r.clone()], &cols(&r))
            .await;
        assert!(matches!(result, Err(Error::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_unmigrated_page_skips_mirrored_rows() {
        let (storage, program, site) = seeded().await;
        let kind = SeriesKind::Petri;
        let rows: Vec<_> = (1..=5).map(|d| row(&program, &site, d)).collect();
        for r in &rows {
            storage.insert_flat(kind, r).await.unwrap();
        }
        storage
            .upsert_partitioned(kind, &rows[..2], &cols(&rows[0]))
            .await
            .unwrap();

        let page = storage.unmigrated_page(kind, program.id, None, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].f64(columns::VALUE), Some(3.0));

        let cursor = PageCursor::from_row(&page[1]).unwrap();
        let rest = storage
            .unmigrated_page(kind, program.id, Some(&cursor), 10)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].f64(columns::VALUE), Some(5.0));
    }

    #[tokio::test]
    async fn test_registry_seeded_with_root_defaults() {
        let storage = InMemoryStorage::new();
        let overflow = storage
            .list_partitions(&PartitionFilter::all().level(PartitionLevel::Overflow))
            .await
            .unwrap();
        assert_eq!(overflow.len(), 2);
    }
}
