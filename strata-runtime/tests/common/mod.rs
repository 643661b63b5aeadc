//! Shared setup for runtime integration tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use strata_core::{
    MetricThresholds, NewObservation, Phase, Program, ProgramId, SeriesKind, Site, SubmissionId,
    TenantId,
};
use strata_runtime::{RetryPolicy, Strata};
use strata_storage::{InMemoryStorage, ObservationStore};

pub struct Harness {
    pub storage: Arc<InMemoryStorage>,
    pub strata: Strata,
    pub tenant: TenantId,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_storage(InMemoryStorage::new()).await
    }

    pub async fn with_storage(storage: InMemoryStorage) -> Self {
        let storage = Arc::new(storage);
        let store: Arc<dyn ObservationStore> = storage.clone();
        let strata = Strata::with_retry(store, MetricThresholds::default(), RetryPolicy::none());
        strata.init().await.expect("runtime init");

        let tenant = TenantId::new("acme");
        storage.upsert_tenant(&tenant, "Acme Labs").await.unwrap();
        Self {
            storage,
            strata,
            tenant,
        }
    }

    /// A January..March 2024 program with the given number of sites
    pub async fn program(&self, name: &str, sites: usize) -> (Program, Vec<Site>) {
        let program = Program {
            id: ProgramId::new(),
            tenant_id: self.tenant.clone(),
            name: name.to_string(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            phases: vec![
                Phase::new(
                    "baseline",
                    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
                ),
                Phase::new(
                    "treatment",
                    NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                    NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
                ),
            ],
        };
        self.storage.upsert_program(&program).await.unwrap();

        let mut created = Vec::with_capacity(sites);
        for i in 0..sites {
            let site = Site::new(program.id, format!("site-{}", i));
            self.storage.upsert_site(&site).await.unwrap();
            created.push(site);
        }
        (program, created)
    }
}

pub fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 5, 8, 0, 0).unwrap() + Duration::days(n)
}

pub fn petri(program: &Program, site: &Site, series: &str, at: DateTime<Utc>, value: f64) -> NewObservation {
    NewObservation {
        kind: SeriesKind::Petri,
        tenant_id: program.tenant_id.clone(),
        program_id: program.id,
        site_id: site.id,
        submission_id: SubmissionId::new(),
        series_code: series.to_string(),
        observed_at: at,
        value,
        measured_rate: None,
        target_rate: None,
        remaining_material: None,
        notes: None,
    }
}

pub fn gasifier(
    program: &Program,
    site: &Site,
    series: &str,
    at: DateTime<Utc>,
    value: f64,
    measured_rate: f64,
) -> NewObservation {
    NewObservation {
        kind: SeriesKind::Gasifier,
        measured_rate: Some(measured_rate),
        ..petri(program, site, series, at, value)
    }
}
