//! Integration tests for the write path: ingestion → bridge → router →
//! derived metrics, over the in-memory backend.

mod common;

use chrono::Utc;
use common::{day, gasifier, petri, Harness};
use strata_core::{
    columns, Correction, ObservationRow, PartitionLevel, RecordId, RecordKey, SeriesKind,
    SubmissionId,
};
use strata_runtime::Error;
use strata_storage::{InMemoryStorage, ObservationStore, PartitionFilter};

#[tokio::test]
async fn test_submit_mirrors_into_month_segment() {
    let h = Harness::new().await;
    let (program, sites) = h.program("spring", 1).await;

    let submitted = h
        .strata
        .ingest()
        .submit(petri(&program, &sites[0], "dish-1", day(0), 12.0))
        .await
        .unwrap();
    assert!(submitted.outcome.mirrored);

    let key = RecordKey::new(submitted.record_id, program.id);
    let segment = h.storage.segment_of(SeriesKind::Petri, &key).unwrap();
    assert!(segment.ends_with("_m202401"));

    let row = h
        .storage
        .get_partitioned(SeriesKind::Petri, &key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.str(columns::PHASE_NAME), Some("baseline"));
    assert_eq!(row.f64(columns::VELOCITY), Some(12.0));
    assert_eq!(row.str(columns::TREND), Some("insufficient_data"));

    let month = h
        .strata
        .registry()
        .lookup(&segment)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(month.level, PartitionLevel::Month);
    assert_eq!(month.row_count_estimate, 1);
}

#[tokio::test]
async fn test_growth_velocities_through_ingest() {
    let h = Harness::new().await;
    let (program, sites) = h.program("spring", 1).await;

    let mut velocities = Vec::new();
    for (d, value) in [(0, 10.0), (1, 25.0), (3, 30.0)] {
        let submitted = h
            .strata
            .ingest()
            .submit(petri(&program, &sites[0], "dish-1", day(d), value))
            .await
            .unwrap();
        velocities.push(submitted.outcome.derived.unwrap().velocity);
    }
    assert_eq!(velocities, vec![10.0, 15.0, 2.5]);
}

#[tokio::test]
async fn test_consumption_momentum_through_ingest() {
    let h = Harness::new().await;
    let (program, sites) = h.program("spring", 1).await;

    let mut momenta = Vec::new();
    for (d, rate) in [(0, 1.0), (1, 1.5), (2, 0.8)] {
        let submitted = h
            .strata
            .ingest()
            .submit(gasifier(&program, &sites[0], "gx-1", day(d), 100.0, rate))
            .await
            .unwrap();
        momenta.push(submitted.outcome.derived.unwrap().momentum.unwrap());
    }
    assert_eq!(momenta[0], 0.0);
    assert!((momenta[1] - 0.5).abs() < 1e-9);
    assert!((momenta[2] + 0.7).abs() < 1e-9);
}

#[tokio::test]
async fn test_series_are_scoped_by_program() {
    let h = Harness::new().await;
    let (a, a_sites) = h.program("a", 1).await;
    let (b, b_sites) = h.program("b", 1).await;

    h.strata
        .ingest()
        .submit(petri(&a, &a_sites[0], "dish-1", day(0), 50.0))
        .await
        .unwrap();
    // Same series code, different program: bootstrap again
    let submitted = h
        .strata
        .ingest()
        .submit(petri(&b, &b_sites[0], "dish-1", day(1), 7.0))
        .await
        .unwrap();
    assert_eq!(submitted.outcome.derived.unwrap().velocity, 7.0);
}

#[tokio::test]
async fn test_tenant_mismatch_rejected() {
    let h = Harness::new().await;
    let (program, sites) = h.program("spring", 1).await;
    let mut obs = petri(&program, &sites[0], "dish-1", day(0), 1.0);
    obs.tenant_id = strata_core::TenantId::new("intruder");

    assert!(matches!(
        h.strata.ingest().submit(obs).await,
        Err(Error::InvalidInput(_))
    ));
    assert_eq!(h.storage.count_flat(SeriesKind::Petri, None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_observation_rejected() {
    let h = Harness::new().await;
    let (program, sites) = h.program("spring", 1).await;
    let mut obs = petri(&program, &sites[0], "dish-1", day(0), 1.0);
    obs.measured_rate = Some(2.0);

    assert!(matches!(
        h.strata.ingest().submit(obs).await,
        Err(Error::Core(strata_core::Error::InvalidObservation(_)))
    ));
}

#[tokio::test]
async fn test_mirror_is_idempotent() {
    let h = Harness::new().await;
    let (program, sites) = h.program("spring", 1).await;
    let submitted = h
        .strata
        .ingest()
        .submit(petri(&program, &sites[0], "dish-1", day(0), 3.0))
        .await
        .unwrap();
    let key = RecordKey::new(submitted.record_id, program.id);
    let flat = h
        .storage
        .get_flat(SeriesKind::Petri, &key)
        .await
        .unwrap()
        .unwrap();

    for _ in 0..3 {
        h.strata
            .bridge()
            .mirror_insert(SeriesKind::Petri, &flat)
            .await
            .unwrap();
    }
    assert_eq!(
        h.storage
            .count_partitioned(SeriesKind::Petri, Some(program.id))
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_redelivered_insert_is_not_an_error() {
    let h = Harness::new().await;
    let (program, sites) = h.program("spring", 1).await;
    let row = petri(&program, &sites[0], "dish-1", day(0), 4.0)
        .into_row(RecordId::new(), None, Utc::now());

    let first = h.strata.bridge().insert(SeriesKind::Petri, &row).await.unwrap();
    let again = h.strata.bridge().insert(SeriesKind::Petri, &row).await.unwrap();

    assert!(first.mirrored);
    assert!(again.mirrored);
    assert_eq!(again.key, first.key);
    assert_eq!(h.storage.count_flat(SeriesKind::Petri, None).await.unwrap(), 1);
    assert_eq!(
        h.storage.count_partitioned(SeriesKind::Petri, None).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_redelivery_repairs_failed_mirror() {
    let h = Harness::new().await;
    let (program, sites) = h.program("spring", 1).await;
    let row = petri(&program, &sites[0], "dish-1", day(0), 4.0)
        .into_row(RecordId::new(), None, Utc::now());

    h.storage.set_partitioned_unavailable(true);
    let first = h.strata.bridge().insert(SeriesKind::Petri, &row).await.unwrap();
    assert!(!first.mirrored);

    h.storage.set_partitioned_unavailable(false);
    let again = h.strata.bridge().insert(SeriesKind::Petri, &row).await.unwrap();
    assert!(again.mirrored);
    assert_eq!(h.storage.count_flat(SeriesKind::Petri, None).await.unwrap(), 1);
    assert_eq!(
        h.storage.count_partitioned(SeriesKind::Petri, None).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_site_from_another_program_rejected() {
    let h = Harness::new().await;
    let (program, _) = h.program("spring", 1).await;
    let (_, other_sites) = h.program("autumn", 1).await;

    let obs = petri(&program, &other_sites[0], "dish-1", day(0), 1.0);
    assert!(matches!(
        h.strata.ingest().submit(obs).await,
        Err(Error::InvalidInput(_))
    ));
    assert_eq!(h.storage.count_flat(SeriesKind::Petri, None).await.unwrap(), 0);
    assert!(h
        .strata
        .registry()
        .list(&PartitionFilter::for_table(SeriesKind::Petri).program(program.id))
        .await
        .unwrap()
        .iter()
        .all(|e| e.site_id != Some(other_sites[0].id)));
}

#[tokio::test]
async fn test_column_skew_copies_intersection_only() {
    let mut flat_cols = SeriesKind::Petri.flat_columns();
    flat_cols.push("lab_technician");
    let storage = InMemoryStorage::new().with_columns(SeriesKind::Petri.flat_table(), &flat_cols);
    let h = Harness::with_storage(storage).await;
    let (program, sites) = h.program("spring", 1).await;

    let row = petri(&program, &sites[0], "dish-1", day(0), 4.0)
        .into_row(RecordId::new(), None, Utc::now())
        .with("lab_technician", "kim")
        .with(columns::LEGACY_BATCH_REF, "B-17");
    let outcome = h.strata.bridge().insert(SeriesKind::Petri, &row).await.unwrap();
    assert!(outcome.mirrored);

    let mirrored = h
        .storage
        .get_partitioned(SeriesKind::Petri, &outcome.key)
        .await
        .unwrap()
        .unwrap();
    assert!(!mirrored.contains("lab_technician"));
    assert!(!mirrored.contains(columns::LEGACY_BATCH_REF));
    assert_eq!(mirrored.f64(columns::VALUE), Some(4.0));
}

#[tokio::test]
async fn test_correction_preserves_derived_columns() {
    let h = Harness::new().await;
    let (program, sites) = h.program("spring", 1).await;
    let submitted = h
        .strata
        .ingest()
        .submit(petri(&program, &sites[0], "dish-1", day(0), 9.0))
        .await
        .unwrap();
    let key = RecordKey::new(submitted.record_id, program.id);

    let outcome = h
        .strata
        .ingest()
        .correct(
            SeriesKind::Petri,
            &key,
            Correction {
                notes: Some("condensation on lid".to_string()),
                flagged: Some(true),
                is_deleted: None,
            },
        )
        .await
        .unwrap();
    assert!(outcome.mirrored);
    assert!(outcome.derived.is_none());

    let row = h
        .storage
        .get_partitioned(SeriesKind::Petri, &key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.str(columns::NOTES), Some("condensation on lid"));
    assert_eq!(row.bool(columns::FLAGGED), Some(true));
    assert_eq!(row.f64(columns::VELOCITY), Some(9.0));
}

#[tokio::test]
async fn test_empty_correction_rejected() {
    let h = Harness::new().await;
    let (program, _) = h.program("spring", 1).await;
    let key = RecordKey::new(RecordId::new(), program.id);
    assert!(matches!(
        h.strata
            .ingest()
            .correct(SeriesKind::Petri, &key, Correction::default())
            .await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_partition_key_update_rejected() {
    let h = Harness::new().await;
    let (program, sites) = h.program("spring", 2).await;
    let submitted = h
        .strata
        .ingest()
        .submit(petri(&program, &sites[0], "dish-1", day(0), 1.0))
        .await
        .unwrap();
    let key = RecordKey::new(submitted.record_id, program.id);

    let changes = ObservationRow::new().with(columns::SITE_ID, sites[1].id.to_string());
    let result = h.strata.bridge().update(SeriesKind::Petri, &key, &changes).await;
    assert!(matches!(
        result,
        Err(Error::Storage(strata_storage::Error::ImmutableKey(_)))
    ));

    let flat = h
        .storage
        .get_flat(SeriesKind::Petri, &key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(flat.site_id().unwrap(), sites[0].id);
}

#[tokio::test]
async fn test_update_of_unmirrored_record_inserts_it() {
    let h = Harness::new().await;
    let (program, sites) = h.program("spring", 1).await;
    let row = petri(&program, &sites[0], "dish-1", day(0), 5.0).into_row(
        RecordId::new(),
        None,
        Utc::now(),
    );
    let key = row.key().unwrap();
    // Legacy write that bypassed the bridge
    h.storage.insert_flat(SeriesKind::Petri, &row).await.unwrap();

    let outcome = h
        .strata
        .bridge()
        .update(
            SeriesKind::Petri,
            &key,
            &ObservationRow::new().with(columns::NOTES, "late"),
        )
        .await
        .unwrap();
    assert!(outcome.mirrored);

    let mirrored = h
        .storage
        .get_partitioned(SeriesKind::Petri, &key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mirrored.str(columns::NOTES), Some("late"));
}

#[tokio::test]
async fn test_outage_defers_mirror_without_failing_write() {
    let h = Harness::new().await;
    let (program, sites) = h.program("spring", 1).await;

    h.storage.set_partitioned_unavailable(true);
    let submitted = h
        .strata
        .ingest()
        .submit(petri(&program, &sites[0], "dish-1", day(0), 2.0))
        .await
        .unwrap();
    assert!(!submitted.outcome.mirrored);
    assert_eq!(h.storage.count_flat(SeriesKind::Petri, None).await.unwrap(), 1);
    assert_eq!(
        h.storage.count_partitioned(SeriesKind::Petri, None).await.unwrap(),
        0
    );

    h.storage.set_partitioned_unavailable(false);
    let report = h
        .strata
        .backfill(Default::default())
        .migrate(Some(program.id))
        .await
        .unwrap();
    assert_eq!(report.total_rows_migrated, 1);
    assert!(!report.blocks_promotion());
}

#[tokio::test]
async fn test_delete_is_noop_when_absent() {
    let h = Harness::new().await;
    let (program, _) = h.program("spring", 1).await;
    let key = RecordKey::new(RecordId::new(), program.id);

    let outcome = h.strata.bridge().delete(SeriesKind::Gasifier, &key).await.unwrap();
    assert!(!outcome.found);
    assert!(outcome.mirrored);
    assert!(outcome.partition.is_none());
}

#[tokio::test]
async fn test_submission_cascade_removes_both_series() {
    let h = Harness::new().await;
    let (program, sites) = h.program("spring", 1).await;
    let submission = SubmissionId::new();

    let mut p = petri(&program, &sites[0], "dish-1", day(0), 1.0);
    p.submission_id = submission;
    let mut g = gasifier(&program, &sites[0], "gx-1", day(0), 100.0, 1.0);
    g.submission_id = submission;
    let other = petri(&program, &sites[0], "dish-2", day(0), 1.0);

    let ingest = h.strata.ingest();
    let first = ingest.submit(p).await.unwrap();
    ingest.submit(g).await.unwrap();
    ingest.submit(other).await.unwrap();

    let removed = ingest.delete_submission(submission).await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(
        h.storage.count_partitioned(SeriesKind::Petri, None).await.unwrap(),
        1
    );
    assert_eq!(
        h.storage
            .count_partitioned(SeriesKind::Gasifier, None)
            .await
            .unwrap(),
        0
    );

    let segment = first.outcome.partition.unwrap();
    h.strata
        .registry()
        .refresh_estimates(&PartitionFilter::all().program(program.id))
        .await
        .unwrap();
    let entry = h.strata.registry().lookup(&segment).await.unwrap().unwrap();
    assert_eq!(entry.row_count_estimate, 1);
}
