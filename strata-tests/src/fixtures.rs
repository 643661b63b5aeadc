//! Test data factories for Strata types
//!
//! Provides pre-built stores and datasets with known row counts.

use std::sync::Arc;
use strata_core::{MetricThresholds, TenantId};
use strata_runtime::{RetryPolicy, Strata};
use strata_storage::{InMemoryStorage, ObservationStore};

/// Fresh in-memory store with the baseline schema
pub fn memory() -> Arc<InMemoryStorage> {
    Arc::new(InMemoryStorage::new())
}

/// Runtime over `storage` with default thresholds and no mirror retries
pub async fn runtime(storage: Arc<InMemoryStorage>) -> Strata {
    let store: Arc<dyn ObservationStore> = storage;
    let strata = Strata::with_retry(store, MetricThresholds::default(), RetryPolicy::none());
    strata.init().await.expect("runtime init");
    strata
}

/// Tenant fixture factories
pub mod tenant {
    use super::*;

    pub fn acme() -> TenantId {
        TenantId::new("acme")
    }

    pub fn other() -> TenantId {
        TenantId::new("globex")
    }
}

/// The three-program legacy dataset
pub mod dataset {
    use crate::builders::{at, date, ObservationBuilder, ProgramBuilder};
    use chrono::Duration;
    use strata_core::{Program, SeriesKind, Site, TenantId};
    use strata_storage::ObservationStore;

    /// A seeded program and its known flat row counts
    #[derive(Debug, Clone)]
    pub struct SeededProgram {
        pub program: Program,
        pub sites: Vec<Site>,
        pub petri_rows: i64,
        pub gasifier_rows: i64,
    }

    impl SeededProgram {
        pub fn rows(&self, kind: SeriesKind) -> i64 {
            match kind {
                SeriesKind::Petri => self.petri_rows,
                SeriesKind::Gasifier => self.gasifier_rows,
            }
        }

        pub fn total_rows(&self) -> i64 {
            self.petri_rows + self.gasifier_rows
        }
    }

    #[derive(Debug, Clone)]
    pub struct Dataset {
        pub tenant: TenantId,
        pub programs: Vec<SeededProgram>,
    }

    impl Dataset {
        pub fn total(&self, kind: SeriesKind) -> i64 {
            self.programs.iter().map(|p| p.rows(kind)).sum()
        }

        pub fn by_name(&self, name: &str) -> &SeededProgram {
            self.programs
                .iter()
                .find(|p| p.program.name == name)
                .expect("seeded program")
        }
    }

    /// `(name, sites, petri readings per site, gasifier readings per site)`
    const LAYOUT: [(&str, usize, i64, i64); 3] = [
        ("alpha", 2, 6, 3),
        ("beta", 1, 4, 4),
        ("gamma", 3, 8, 4),
    ];

    /// Seed three programs of different sizes straight into the flat store.
    ///
    /// alpha: 12 petri, 6 gasifier; beta: 4 + 4; gamma: 24 + 12. Readings
    /// span January to March 2024, one every five days per site.
    pub async fn seed_three_programs(
        store: &dyn ObservationStore,
    ) -> strata_storage::Result<Dataset> {
        let tenant = super::tenant::acme();
        store.upsert_tenant(&tenant, "Acme Labs").await?;

        let mut programs = Vec::with_capacity(LAYOUT.len());
        for (name, site_count, petri_per_site, gas_per_site) in LAYOUT {
            let program = ProgramBuilder::new(&tenant)
                .name(name)
                .span(date(2024, 1, 1), date(2024, 3, 31))
                .phase("baseline", date(2024, 1, 1), date(2024, 1, 31))
                .phase("treatment", date(2024, 2, 1), date(2024, 3, 31))
                .build();
            store.upsert_program(&program).await?;

            let mut sites = Vec::with_capacity(site_count);
            for i in 0..site_count {
                let site = Site::new(program.id, format!("{}-site-{}", name, i));
                store.upsert_site(&site).await?;
                sites.push(site);
            }

            for (s, site) in sites.iter().enumerate() {
                let series = format!("dish-{}", s);
                for n in 0..petri_per_site {
                    let row = ObservationBuilder::petri(&program, site)
                        .series(&series)
                        .observed_at(at(2024, 1, 2) + Duration::days(n * 5))
                        .value(5.0 + 2.5 * n as f64)
                        .row();
                    store.insert_flat(SeriesKind::Petri, &row).await?;
                }

                let series = format!("gx-{}", s);
                for n in 0..gas_per_site {
                    let row = ObservationBuilder::gasifier(&program, site)
                        .series(&series)
                        .observed_at(at(2024, 1, 2) + Duration::days(n * 5))
                        .value(100.0 - 4.0 * n as f64)
                        .rates(0.8 + 0.1 * n as f64, 1.0)
                        .remaining(100.0 - 4.0 * n as f64)
                        .row();
                    store.insert_flat(SeriesKind::Gasifier, &row).await?;
                }
            }

            programs.push(SeededProgram {
                program,
                petri_rows: petri_per_site * site_count as i64,
                gasifier_rows: gas_per_site * site_count as i64,
                sites,
            });
        }

        Ok(Dataset { tenant, programs })
    }
}
