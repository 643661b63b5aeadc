//! Observation series, records and the column-map row representation
//!
//! The flat (legacy) and partitioned stores do not share a fixed column set,
//! so rows travel between them as [`ObservationRow`]: an ordered map from
//! column name to JSON value. Typed accessors cover the columns the engine
//! depends on; everything else is carried opaquely.

use crate::ids::{ProgramId, RecordId, RecordKey, SiteId, SubmissionId, TenantId};
use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Column names shared by the observation tables
pub mod columns {
    pub const RECORD_ID: &str = "record_id";
    pub const PROGRAM_ID: &str = "program_id";
    pub const SITE_ID: &str = "site_id";
    pub const SUBMISSION_ID: &str = "submission_id";
    pub const TENANT_ID: &str = "tenant_id";
    pub const SERIES_CODE: &str = "series_code";
    pub const OBSERVED_AT: &str = "observed_at";
    pub const VALUE: &str = "value";
    pub const PHASE_NAME: &str = "phase_name";
    pub const NOTES: &str = "notes";
    pub const FLAGGED: &str = "flagged";
    pub const IS_DELETED: &str = "is_deleted";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
    /// Only ever present in the legacy flat tables
    pub const LEGACY_BATCH_REF: &str = "legacy_batch_ref";

    // Gasifier raw columns
    pub const MEASURED_RATE: &str = "measured_rate";
    pub const TARGET_RATE: &str = "target_rate";
    pub const REMAINING_MATERIAL: &str = "remaining_material";

    // Derived columns, partitioned tables only
    pub const VELOCITY: &str = "velocity";
    pub const MOMENTUM: &str = "momentum";
    pub const TREND: &str = "trend";
    pub const FORECASTED_EXHAUSTION_AT: &str = "forecasted_exhaustion_at";
    pub const DERIVED_AT: &str = "derived_at";

    /// Columns that determine physical placement. Never updated after insert.
    pub const PARTITION_KEY: [&str; 4] = [RECORD_ID, PROGRAM_ID, SITE_ID, OBSERVED_AT];

    pub const DERIVED: [&str; 5] = [
        VELOCITY,
        MOMENTUM,
        TREND,
        FORECASTED_EXHAUSTION_AT,
        DERIVED_AT,
    ];

    pub(crate) const COMMON: [&str; 14] = [
        RECORD_ID,
        PROGRAM_ID,
        SITE_ID,
        SUBMISSION_ID,
        TENANT_ID,
        SERIES_CODE,
        OBSERVED_AT,
        VALUE,
        PHASE_NAME,
        NOTES,
        FLAGGED,
        IS_DELETED,
        CREATED_AT,
        UPDATED_AT,
    ];

    pub(crate) const GASIFIER: [&str; 3] = [MEASURED_RATE, TARGET_RATE, REMAINING_MATERIAL];

    /// Whether `column` is one of the partition-key columns
    pub fn is_partition_key(column: &str) -> bool {
        PARTITION_KEY.contains(&column)
    }
}

/// The two parallel observation series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesKind {
    /// Growth readings (growth index per dish)
    Petri,
    /// Consumption readings (linear consumption per gasifier)
    Gasifier,
}

impl SeriesKind {
    pub const ALL: [SeriesKind; 2] = [SeriesKind::Petri, SeriesKind::Gasifier];

    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesKind::Petri => "petri",
            SeriesKind::Gasifier => "gasifier",
        }
    }

    /// Legacy flat table name
    pub fn flat_table(&self) -> &'static str {
        match self {
            SeriesKind::Petri => "petri_observations",
            SeriesKind::Gasifier => "gasifier_observations",
        }
    }

    /// Partitioned table name
    pub fn partitioned_table(&self) -> &'static str {
        match self {
            SeriesKind::Petri => "petri_observations_partitioned",
            SeriesKind::Gasifier => "gasifier_observations_partitioned",
        }
    }

    /// Short prefix used in segment names
    pub fn segment_prefix(&self) -> &'static str {
        match self {
            SeriesKind::Petri => "petri",
            SeriesKind::Gasifier => "gas",
        }
    }

    /// Whether this is the consumption series (momentum, forecast)
    pub fn is_consumption(&self) -> bool {
        matches!(self, SeriesKind::Gasifier)
    }

    /// Baseline column set of the legacy flat table
    pub fn flat_columns(&self) -> Vec<&'static str> {
        let mut cols: Vec<&'static str> = columns::COMMON.to_vec();
        if self.is_consumption() {
            cols.extend_from_slice(&columns::GASIFIER);
        }
        cols.push(columns::LEGACY_BATCH_REF);
        cols
    }

    /// Baseline column set of the partitioned table
    pub fn partitioned_columns(&self) -> Vec<&'static str> {
        let mut cols: Vec<&'static str> = columns::COMMON.to_vec();
        if self.is_consumption() {
            cols.extend_from_slice(&columns::GASIFIER);
        }
        cols.extend_from_slice(&columns::DERIVED);
        cols
    }
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeriesKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "petri" => Ok(SeriesKind::Petri),
            "gasifier" | "gas" => Ok(SeriesKind::Gasifier),
            other => Err(Error::InvalidObservation(format!(
                "Unknown series kind: {}",
                other
            ))),
        }
    }
}

/// Format a timestamp the way rows carry it
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// An observation row as a column → value map
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationRow(BTreeMap<String, Value>);

impl ObservationRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from an arbitrary JSON object
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map.into_iter().collect())),
            other => Err(Error::InvalidObservation(format!(
                "Expected a JSON object for an observation row, got {}",
                other
            ))),
        }
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }

    /// Set a column (builder pattern)
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.0.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the listed columns that are present in this row
    pub fn project<S: AsRef<str>>(&self, columns: &[S]) -> ObservationRow {
        ObservationRow(
            columns
                .iter()
                .filter_map(|c| {
                    let c = c.as_ref();
                    self.0.get(c).map(|v| (c.to_string(), v.clone()))
                })
                .collect(),
        )
    }

    /// Columns of this row that change placement if modified
    pub fn partition_key_columns(&self) -> Vec<&str> {
        self.columns()
            .filter(|c| columns::is_partition_key(c))
            .collect()
    }

    fn required(&self, column: &str) -> Result<&Value> {
        match self.0.get(column) {
            Some(Value::Null) | None => Err(Error::InvalidObservation(format!(
                "Missing required column '{}'",
                column
            ))),
            Some(v) => Ok(v),
        }
    }

    fn required_str(&self, column: &str) -> Result<&str> {
        self.required(column)?.as_str().ok_or_else(|| {
            Error::InvalidObservation(format!("Column '{}' must be a string", column))
        })
    }

    fn required_uuid<T: FromStr>(&self, column: &str) -> Result<T> {
        self.required_str(column)?.parse::<T>().map_err(|_| {
            Error::InvalidObservation(format!("Column '{}' is not a valid UUID", column))
        })
    }

    pub fn record_id(&self) -> Result<RecordId> {
        self.required_uuid(columns::RECORD_ID)
    }

    pub fn program_id(&self) -> Result<ProgramId> {
        self.required_uuid(columns::PROGRAM_ID)
    }

    pub fn site_id(&self) -> Result<SiteId> {
        self.required_uuid(columns::SITE_ID)
    }

    pub fn submission_id(&self) -> Result<SubmissionId> {
        self.required_uuid(columns::SUBMISSION_ID)
    }

    pub fn tenant_id(&self) -> Result<TenantId> {
        self.required_str(columns::TENANT_ID).map(TenantId::new)
    }

    pub fn series_code(&self) -> Result<&str> {
        self.required_str(columns::SERIES_CODE)
    }

    pub fn observed_at(&self) -> Result<DateTime<Utc>> {
        self.timestamp(columns::OBSERVED_AT)?.ok_or_else(|| {
            Error::InvalidObservation(format!(
                "Missing required column '{}'",
                columns::OBSERVED_AT
            ))
        })
    }

    pub fn key(&self) -> Result<RecordKey> {
        Ok(RecordKey::new(self.record_id()?, self.program_id()?))
    }

    /// Optional timestamp column; `Ok(None)` when absent or null
    pub fn timestamp(&self, column: &str) -> Result<Option<DateTime<Utc>>> {
        match self.0.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|ts| Some(ts.with_timezone(&Utc)))
                .map_err(|e| {
                    Error::InvalidObservation(format!(
                        "Column '{}' is not an RFC 3339 timestamp: {}",
                        column, e
                    ))
                }),
            Some(other) => Err(Error::InvalidObservation(format!(
                "Column '{}' must be a timestamp string, got {}",
                column, other
            ))),
        }
    }

    /// Optional numeric column; non-numeric values read as absent
    pub fn f64(&self, column: &str) -> Option<f64> {
        self.0.get(column).and_then(Value::as_f64)
    }

    pub fn bool(&self, column: &str) -> Option<bool> {
        self.0.get(column).and_then(Value::as_bool)
    }

    pub fn str(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(Value::as_str)
    }

    pub fn is_deleted(&self) -> bool {
        self.bool(columns::IS_DELETED).unwrap_or(false)
    }
}

impl FromIterator<(String, Value)> for ObservationRow {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// An observation as submitted by the ingestion collaborator.
///
/// Carries no partitioning knowledge; the record id is generated on submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewObservation {
    pub kind: SeriesKind,
    pub tenant_id: TenantId,
    pub program_id: ProgramId,
    pub site_id: SiteId,
    pub submission_id: SubmissionId,
    pub series_code: String,
    pub observed_at: DateTime<Utc>,
    /// Growth index (petri) or cumulative linear consumption reading (gasifier)
    pub value: f64,
    #[serde(default)]
    pub measured_rate: Option<f64>,
    #[serde(default)]
    pub target_rate: Option<f64>,
    #[serde(default)]
    pub remaining_material: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewObservation {
    /// Reject input the store cannot represent
    pub fn validate(&self) -> Result<()> {
        if self.series_code.trim().is_empty() {
            return Err(Error::InvalidObservation(
                "series_code cannot be empty".to_string(),
            ));
        }
        if !self.value.is_finite() {
            return Err(Error::InvalidObservation(format!(
                "value must be finite, got {}",
                self.value
            )));
        }
        let gasifier_fields = [
            ("measured_rate", self.measured_rate),
            ("target_rate", self.target_rate),
            ("remaining_material", self.remaining_material),
        ];
        for (name, field) in gasifier_fields {
            match (self.kind, field) {
                (SeriesKind::Petri, Some(_)) => {
                    return Err(Error::InvalidObservation(format!(
                        "{} is only valid for gasifier observations",
                        name
                    )))
                }
                (SeriesKind::Gasifier, Some(v)) if !v.is_finite() => {
                    return Err(Error::InvalidObservation(format!(
                        "{} must be finite, got {}",
                        name, v
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Render as a flat-store row
    pub fn into_row(
        self,
        record_id: RecordId,
        phase_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> ObservationRow {
        let mut row = ObservationRow::new()
            .with(columns::RECORD_ID, record_id.to_string())
            .with(columns::PROGRAM_ID, self.program_id.to_string())
            .with(columns::SITE_ID, self.site_id.to_string())
            .with(columns::SUBMISSION_ID, self.submission_id.to_string())
            .with(columns::TENANT_ID, self.tenant_id.0)
            .with(columns::SERIES_CODE, self.series_code)
            .with(columns::OBSERVED_AT, format_timestamp(self.observed_at))
            .with(columns::VALUE, self.value)
            .with(columns::FLAGGED, false)
            .with(columns::IS_DELETED, false)
            .with(columns::CREATED_AT, format_timestamp(now))
            .with(columns::UPDATED_AT, format_timestamp(now));

        if let Some(phase) = phase_name {
            row.set(columns::PHASE_NAME, phase);
        }
        if let Some(notes) = self.notes {
            row.set(columns::NOTES, notes);
        }
        if self.kind.is_consumption() {
            let optional = [
                (columns::MEASURED_RATE, self.measured_rate),
                (columns::TARGET_RATE, self.target_rate),
                (columns::REMAINING_MATERIAL, self.remaining_material),
            ];
            for (column, value) in optional {
                if let Some(v) = value {
                    row.set(column, v);
                }
            }
        }
        row
    }
}

/// Correction applied to an existing record (notes, flags, soft delete)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub notes: Option<String>,
    pub flagged: Option<bool>,
    pub is_deleted: Option<bool>,
}

impl Correction {
    pub fn is_empty(&self) -> bool {
        self.notes.is_none() && self.flagged.is_none() && self.is_deleted.is_none()
    }

    /// Render as a targeted change set
    pub fn into_changes(self, now: DateTime<Utc>) -> ObservationRow {
        let mut changes = ObservationRow::new();
        if let Some(notes) = self.notes {
            changes.set(columns::NOTES, notes);
        }
        if let Some(flagged) = self.flagged {
            changes.set(columns::FLAGGED, flagged);
        }
        if let Some(deleted) = self.is_deleted {
            changes.set(columns::IS_DELETED, deleted);
        }
        if !changes.is_empty() {
            changes.set(columns::UPDATED_AT, format_timestamp(now));
        }
        changes
    }
}
