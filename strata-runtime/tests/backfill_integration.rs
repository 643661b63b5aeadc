//! Integration tests for the backfill pipeline over the in-memory backend
//!
//! Legacy rows are written straight into the flat store, as they would have
//! been before the bridge existed, and then migrated.

mod common;

use chrono::Utc;
use common::{day, gasifier, petri, Harness};
use strata_core::{columns, FindingStatus, Program, RecordId, RecordKey, SeriesKind, Site};
use strata_runtime::{BackfillConfig, CancelFlag};
use strata_storage::ObservationStore;

async fn seed_legacy(h: &Harness, program: &Program, sites: &[Site], per_site: i64) {
    for site in sites {
        for n in 0..per_site {
            let row = petri(program, site, "dish-1", day(n * 3), 10.0 + n as f64)
                .into_row(RecordId::new(), None, Utc::now());
            h.storage.insert_flat(SeriesKind::Petri, &row).await.unwrap();

            let row = gasifier(program, site, "gx-1", day(n * 3), 500.0, 1.0 + n as f64 / 10.0)
                .into_row(RecordId::new(), None, Utc::now());
            h.storage.insert_flat(SeriesKind::Gasifier, &row).await.unwrap();
        }
    }
}

#[tokio::test]
async fn test_full_backfill_reaches_parity() {
    let h = Harness::new().await;
    let (small, small_sites) = h.program("small", 1).await;
    let (large, large_sites) = h.program("large", 3).await;
    let (medium, medium_sites) = h.program("medium", 2).await;
    seed_legacy(&h, &small, &small_sites, 4).await;
    seed_legacy(&h, &large, &large_sites, 10).await;
    seed_legacy(&h, &medium, &medium_sites, 7).await;

    let config = BackfillConfig::default().with_batch_size(8).unwrap();
    let report = h.strata.backfill(config).migrate(None).await.unwrap();

    let order: Vec<&str> = report.programs.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(order, vec!["large", "medium", "small"]);
    assert!(report.programs.iter().all(|p| p.completed));
    assert_eq!(report.total_rows_migrated, 2 * (4 + 30 + 14));
    assert!(!report.cancelled);

    assert_eq!(report.reconciliation.len(), 2);
    for finding in &report.reconciliation {
        assert_eq!(finding.status, FindingStatus::Pass);
        assert_eq!(finding.discrepancy, Some(0));
    }
    for kind in SeriesKind::ALL {
        assert_eq!(
            h.storage.count_flat(kind, None).await.unwrap(),
            h.storage.count_partitioned(kind, None).await.unwrap()
        );
    }
}

#[tokio::test]
async fn test_second_run_is_a_noop() {
    let h = Harness::new().await;
    let (program, sites) = h.program("spring", 2).await;
    seed_legacy(&h, &program, &sites, 5).await;

    let config = BackfillConfig::default().with_batch_size(3).unwrap();
    let first = h.strata.backfill(config.clone()).migrate(None).await.unwrap();
    let count = h
        .storage
        .count_partitioned(SeriesKind::Petri, None)
        .await
        .unwrap();

    let second = h.strata.backfill(config).migrate(None).await.unwrap();
    assert_eq!(first.total_rows_migrated, 20);
    assert_eq!(second.total_rows_migrated, 0);
    assert_eq!(second.programs[0].batches, 0);
    assert_eq!(
        h.storage
            .count_partitioned(SeriesKind::Petri, None)
            .await
            .unwrap(),
        count
    );
}

#[tokio::test]
async fn test_backfill_derives_metrics_in_series_order() {
    let h = Harness::new().await;
    let (program, sites) = h.program("spring", 1).await;

    // Written out of order on purpose
    let mut keys = Vec::new();
    for (d, value) in [(3, 30.0), (0, 10.0), (1, 25.0)] {
        let row = petri(&program, &sites[0], "dish-1", day(d), value)
            .into_row(RecordId::new(), None, Utc::now());
        keys.push((d, RecordKey::new(row.record_id().unwrap(), program.id)));
        h.storage.insert_flat(SeriesKind::Petri, &row).await.unwrap();
    }

    let config = BackfillConfig::default().with_batch_size(2).unwrap();
    h.strata.backfill(config).migrate(Some(program.id)).await.unwrap();

    keys.sort_by_key(|(d, _)| *d);
    let mut velocities = Vec::new();
    for (_, key) in &keys {
        let row = h
            .storage
            .get_partitioned(SeriesKind::Petri, key)
            .await
            .unwrap()
            .unwrap();
        velocities.push(row.f64(columns::VELOCITY).unwrap());
    }
    assert_eq!(velocities, vec![10.0, 15.0, 2.5]);
}

#[tokio::test]
async fn test_precreate_runs_before_bulk_insert() {
    let h = Harness::new().await;
    let (program, sites) = h.program("spring", 2).await;
    seed_legacy(&h, &program, &sites, 2).await;

    let report = h
        .strata
        .backfill(BackfillConfig::default())
        .migrate(Some(program.id))
        .await
        .unwrap();
    // per series: program + 2 sites + 2 × 3 months
    assert_eq!(report.programs[0].partitions_created, 18);

    let leftover = h
        .storage
        .unmigrated_page(SeriesKind::Petri, program.id, None, 10)
        .await
        .unwrap();
    assert!(leftover.is_empty());
}

#[tokio::test]
async fn test_cancelled_run_reports_residue_as_warning() {
    let h = Harness::new().await;
    let (program, sites) = h.program("spring", 1).await;
    seed_legacy(&h, &program, &sites, 3).await;

    let cancel = CancelFlag::new();
    cancel.cancel();
    let report = h
        .strata
        .backfill(BackfillConfig::default())
        .with_cancel(cancel)
        .migrate(None)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.total_rows_migrated, 0);
    assert!(!report.programs[0].completed);
    assert!(report
        .reconciliation
        .iter()
        .all(|f| f.status == FindingStatus::Warn));
    assert!(!report.blocks_promotion());

    // Resume picks everything up
    let resumed = h
        .strata
        .backfill(BackfillConfig::default())
        .migrate(None)
        .await
        .unwrap();
    assert_eq!(resumed.total_rows_migrated, 6);
    assert!(!resumed.blocks_promotion());
}

#[tokio::test]
async fn test_unknown_program_scope() {
    let h = Harness::new().await;
    let result = h
        .strata
        .backfill(BackfillConfig::default())
        .migrate(Some(strata_core::ProgramId::new()))
        .await;
    assert!(matches!(result, Err(strata_runtime::Error::NotFound(_))));
}
