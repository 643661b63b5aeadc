//! Column reconciliation between the flat and partitioned tables
//!
//! The two stores drift: the flat table keeps legacy-only columns, the
//! partitioned table adds derived ones. The bridge only ever copies the
//! intersection. Sets are introspected once per series and cached.

use crate::{Error, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use strata_core::{columns, SeriesKind};
use strata_storage::ObservationStore;
use tracing::{info, warn};

/// Reconciled column sets for one series
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSet {
    /// Present in both tables, in flat ordinal order
    pub shared: Vec<String>,
    pub flat_only: Vec<String>,
    pub partitioned_only: Vec<String>,
    /// Every partitioned column, in ordinal order
    pub partitioned: Vec<String>,
}

impl ColumnSet {
    pub fn compute(flat: &[String], partitioned: &[String]) -> Result<Self> {
        let flat_set: HashSet<&str> = flat.iter().map(String::as_str).collect();
        let part_set: HashSet<&str> = partitioned.iter().map(String::as_str).collect();

        let shared: Vec<String> = flat
            .iter()
            .filter(|c| part_set.contains(c.as_str()))
            .cloned()
            .collect();

        let missing: Vec<&str> = columns::PARTITION_KEY
            .iter()
            .copied()
            .filter(|key| !shared.iter().any(|c| c == key))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Configuration(format!(
                "Partition key columns missing from one of the stores: {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            shared,
            flat_only: flat
                .iter()
                .filter(|c| !part_set.contains(c.as_str()))
                .cloned()
                .collect(),
            partitioned_only: partitioned
                .iter()
                .filter(|c| !flat_set.contains(c.as_str()))
                .cloned()
                .collect(),
            partitioned: partitioned.to_vec(),
        })
    }

    /// Whether a column can be written to the partitioned table
    pub fn in_partitioned(&self, column: &str) -> bool {
        self.partitioned.iter().any(|c| c == column)
    }

    pub fn is_shared(&self, column: &str) -> bool {
        self.shared.iter().any(|c| c == column)
    }
}

/// Per-series cache of [`ColumnSet`]s
pub struct ColumnCatalog {
    store: Arc<dyn ObservationStore>,
    sets: RwLock<HashMap<SeriesKind, Arc<ColumnSet>>>,
}

impl ColumnCatalog {
    pub fn new(store: Arc<dyn ObservationStore>) -> Self {
        Self {
            store,
            sets: RwLock::new(HashMap::new()),
        }
    }

    pub async fn for_kind(&self, kind: SeriesKind) -> Result<Arc<ColumnSet>> {
        if let Some(set) = self.sets.read().get(&kind) {
            return Ok(set.clone());
        }
        self.refresh(kind).await
    }

    /// Re-introspect both tables of a series
    pub async fn refresh(&self, kind: SeriesKind) -> Result<Arc<ColumnSet>> {
        let flat = self.store.table_columns(kind.flat_table()).await?;
        let partitioned = self.store.table_columns(kind.partitioned_table()).await?;
        let set = Arc::new(ColumnSet::compute(&flat, &partitioned)?);

        if !set.flat_only.is_empty() {
            warn!(
                series = %kind,
                columns = ?set.flat_only,
                "Flat-only columns will not be mirrored"
            );
        }
        info!(
            series = %kind,
            shared = set.shared.len(),
            partitioned_only = set.partitioned_only.len(),
            "Column sets reconciled"
        );

        self.sets.write().insert(kind, set.clone());
        Ok(set)
    }
}
