//! Concurrent segment creation and partitioned-store outages

use chrono::{NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use strata_core::{
    columns, observation::format_timestamp, ObservationRow, PartitionKey, PartitionNamer, Program,
    ProgramId, RecordId, SeriesKind, Site, SubmissionId, TenantId,
};
use strata_storage::{Error, InMemoryStorage, ObservationStore};

async fn seeded() -> (Arc<InMemoryStorage>, Program, Site) {
    let storage = Arc::new(InMemoryStorage::new());
    let tenant = TenantId::new("chaos");
    storage.upsert_tenant(&tenant, "Chaos").await.unwrap();
    let program = Program {
        id: ProgramId::new(),
        tenant_id: tenant,
        name: "race".to_string(),
        start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        phases: vec![],
    };
    storage.upsert_program(&program).await.unwrap();
    let site = Site::new(program.id, "east");
    storage.upsert_site(&site).await.unwrap();
    (storage, program, site)
}

#[tokio::test]
async fn concurrent_creators_yield_one_winner() {
    let (storage, program, _) = seeded().await;
    let spec = PartitionNamer::program_spec(SeriesKind::Petri, program.id);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let storage = storage.clone();
        let spec = spec.clone();
        handles.push(tokio::spawn(async move { storage.create_segment(&spec).await }));
    }

    let mut created = 0;
    let mut raced = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => created += 1,
            Err(Error::AlreadyExists(_)) => raced += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(raced, 7);
    assert!(storage.segment_exists(&spec.partition_name).await.unwrap());
}

#[tokio::test]
async fn partitioned_outage_leaves_flat_store_untouched() {
    let (storage, program, site) = seeded().await;
    let row = ObservationRow::new()
        .with(columns::RECORD_ID, RecordId::new().to_string())
        .with(columns::PROGRAM_ID, program.id.to_string())
        .with(columns::SITE_ID, site.id.to_string())
        .with(columns::SUBMISSION_ID, SubmissionId::new().to_string())
        .with(columns::TENANT_ID, "chaos")
        .with(columns::SERIES_CODE, "g-1")
        .with(
            columns::OBSERVED_AT,
            format_timestamp(Utc.with_ymd_and_hms(2024, 1, 9, 0, 0, 0).unwrap()),
        )
        .with(columns::VALUE, 1.0);
    let cols: Vec<String> = row.columns().map(String::from).collect();

    storage.insert_flat(SeriesKind::Gasifier, &row).await.unwrap();
    storage.set_partitioned_unavailable(true);
    let result = storage
        .upsert_partitioned(SeriesKind::Gasifier, &[row.clone()], &cols)
        .await;
    assert!(matches!(&result, Err(e) if e.is_transient()));
    assert_eq!(storage.count_flat(SeriesKind::Gasifier, Some(program.id)).await.unwrap(), 1);
    assert_eq!(storage.count_partitioned(SeriesKind::Gasifier, None).await.unwrap(), 0);

    storage.set_partitioned_unavailable(false);
    let key = PartitionKey::for_observation(program.id, site.id, row.observed_at().unwrap());
    for spec in PartitionNamer::chain(SeriesKind::Gasifier, &key) {
        storage.create_segment(&spec).await.unwrap();
    }
    assert_eq!(
        storage
            .upsert_partitioned(SeriesKind::Gasifier, &[row], &cols)
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        storage
            .segment_row_count(&PartitionNamer::month_segment(SeriesKind::Gasifier, &key))
            .await
            .unwrap(),
        1
    );
}
