//! Partition registry service
//!
//! The single owner of registry reads and writes. Lookups go through a
//! process-local cache; an entry is only cached after it has been read back
//! from (or written to) the durable registry, so a cache hit always means
//! the segment exists.

use crate::metrics::PARTITION_CACHE_TOTAL;
use crate::Result;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use strata_core::{PartitionEntry, SegmentSpec};
use strata_storage::{ObservationStore, PartitionFilter};
use tracing::{debug, instrument};

pub struct PartitionRegistry {
    store: Arc<dyn ObservationStore>,
    cache: DashMap<String, PartitionEntry>,
}

impl PartitionRegistry {
    pub fn new(store: Arc<dyn ObservationStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    /// Read-through lookup by segment name
    pub async fn lookup(&self, partition_name: &str) -> Result<Option<PartitionEntry>> {
        if let Some(entry) = self.cache.get(partition_name) {
            PARTITION_CACHE_TOTAL.with_label_values(&["hit"]).inc();
            return Ok(Some(entry.clone()));
        }

        match self.store.find_partition(partition_name).await? {
            Some(entry) => {
                PARTITION_CACHE_TOTAL.with_label_values(&["loaded"]).inc();
                self.cache.insert(partition_name.to_string(), entry.clone());
                Ok(Some(entry))
            }
            None => {
                PARTITION_CACHE_TOTAL.with_label_values(&["absent"]).inc();
                Ok(None)
            }
        }
    }

    /// Whether the registry knows the segment
    pub async fn contains(&self, partition_name: &str) -> Result<bool> {
        Ok(self.lookup(partition_name).await?.is_some())
    }

    /// Record a segment; insert-if-absent, then read back the durable entry
    #[instrument(skip(self, spec), fields(partition = %spec.partition_name, level = %spec.level))]
    pub async fn register(&self, spec: &SegmentSpec) -> Result<PartitionEntry> {
        if let Some(entry) = self.cache.get(&spec.partition_name) {
            return Ok(entry.clone());
        }

        let entry = PartitionEntry::from_spec(spec, Utc::now());
        let inserted = self.store.insert_partition_entry(&entry).await?;
        let durable = if inserted {
            debug!("Registered partition");
            entry
        } else {
            // Another caller registered it first
            self.store
                .find_partition(&spec.partition_name)
                .await?
                .unwrap_or(entry)
        };
        self.cache
            .insert(durable.partition_name.clone(), durable.clone());
        Ok(durable)
    }

    /// Authoritative listing straight from the durable registry
    pub async fn list(&self, filter: &PartitionFilter) -> Result<Vec<PartitionEntry>> {
        Ok(self.store.list_partitions(filter).await?)
    }

    /// Adjust a segment's row estimate by `delta`
    pub async fn record_rows(&self, partition_name: &str, delta: i64) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        self.store.adjust_row_estimate(partition_name, delta).await?;
        if let Some(mut entry) = self.cache.get_mut(partition_name) {
            entry.row_count_estimate = (entry.row_count_estimate + delta).max(0);
        }
        Ok(())
    }

    /// Replace the estimates of every matching entry with exact counts.
    ///
    /// Returns how many entries were refreshed.
    #[instrument(skip(self))]
    pub async fn refresh_estimates(&self, filter: &PartitionFilter) -> Result<usize> {
        let entries = self.store.list_partitions(filter).await?;
        let mut refreshed = 0;
        for entry in entries {
            let rows = match self.store.segment_row_count(&entry.partition_name).await {
                Ok(rows) => rows,
                // Registered but never physically created; nothing to count
                Err(strata_storage::Error::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            self.store
                .set_row_estimate(&entry.partition_name, rows)
                .await?;
            self.cache.insert(
                entry.partition_name.clone(),
                PartitionEntry {
                    row_count_estimate: rows,
                    ..entry
                },
            );
            refreshed += 1;
        }
        Ok(refreshed)
    }

    pub fn invalidate(&self, partition_name: &str) {
        self.cache.remove(partition_name);
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
