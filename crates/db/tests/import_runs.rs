//! Import run and schedule persistence. Need a live `DATABASE_URL`:
//! `cargo test -p partsync-db -- --ignored`.

use chrono::{Duration, Utc};
use partsync_core::import_run::{ImportRunStatus, RunCounts};
use partsync_db::models::import_run::{CreateImportRun, RunProgress};
use partsync_db::models::import_schedule::UpsertImportSchedule;
use partsync_db::repositories::{ImportRunRepo, ImportScheduleRepo};
use sqlx::PgPool;

fn new_run(entity: &str) -> CreateImportRun {
    CreateImportRun {
        entity_type: entity.to_string(),
        run_mode: "incremental".to_string(),
        from_date: None,
        details: serde_json::json!({}),
    }
}

fn progress(processed: u64) -> RunProgress {
    RunProgress {
        counts: RunCounts {
            processed,
            total: processed,
            ..Default::default()
        },
        errors: vec![],
        details: serde_json::json!({}),
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_transition_is_compare_and_set(pool: PgPool) {
    let run = ImportRunRepo::create(&pool, &new_run("parts")).await.unwrap();
    assert_eq!(run.status(), ImportRunStatus::Pending);

    let started = ImportRunRepo::transition(
        &pool,
        run.id,
        &[ImportRunStatus::Pending],
        ImportRunStatus::InProgress,
    )
    .await
    .unwrap();
    assert!(started.is_some());

    let again = ImportRunRepo::transition(
        &pool,
        run.id,
        &[ImportRunStatus::Pending],
        ImportRunStatus::InProgress,
    )
    .await
    .unwrap();
    assert!(again.is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_status_change_keeps_counters(pool: PgPool) {
    let run = ImportRunRepo::create(&pool, &new_run("parts")).await.unwrap();
    ImportRunRepo::transition(&pool, run.id, &[ImportRunStatus::Pending], ImportRunStatus::InProgress)
        .await
        .unwrap();
    ImportRunRepo::update_progress(&pool, run.id, &progress(1000))
        .await
        .unwrap();

    let cancelled = ImportRunRepo::transition(
        &pool,
        run.id,
        &[ImportRunStatus::InProgress],
        ImportRunStatus::Cancelled,
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(cancelled.processed_items, 1000);
    assert!(cancelled.finished_at.is_some());

    let late = ImportRunRepo::update_progress(&pool, run.id, &progress(2000))
        .await
        .unwrap();
    assert!(late.is_none(), "terminal runs are immutable");
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_find_open_and_history(pool: PgPool) {
    let a = ImportRunRepo::create(&pool, &new_run("vehicles")).await.unwrap();
    ImportRunRepo::create(&pool, &new_run("parts")).await.unwrap();

    let open = ImportRunRepo::find_open(&pool, &["vehicles", "catalog"])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(open.id, a.id);

    ImportRunRepo::finish(
        &pool,
        a.id,
        &[ImportRunStatus::Pending],
        ImportRunStatus::Completed,
        &progress(10),
    )
    .await
    .unwrap();
    assert!(ImportRunRepo::find_open(&pool, &["vehicles"]).await.unwrap().is_none());

    let all = ImportRunRepo::list_history(&pool, None, 10, 0).await.unwrap();
    assert_eq!(all.len(), 2);
    let vehicles = ImportRunRepo::list_history(&pool, Some("vehicles"), 10, 0)
        .await
        .unwrap();
    assert_eq!(vehicles.len(), 1);
    assert_eq!(vehicles[0].progress, 100.0);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_due_schedules(pool: PgPool) {
    let now = Utc::now();
    let input = UpsertImportSchedule {
        entity_type: "parts".to_string(),
        frequency: "12h".to_string(),
        full_import: false,
        active: true,
    };
    assert!(ImportScheduleRepo::insert_if_missing(&pool, &input, now - Duration::minutes(1))
        .await
        .unwrap());
    assert!(!ImportScheduleRepo::insert_if_missing(&pool, &input, now)
        .await
        .unwrap());

    let due = ImportScheduleRepo::list_due(&pool, now).await.unwrap();
    assert_eq!(due.len(), 1);

    ImportScheduleRepo::mark_run(&pool, due[0].id, now, now + Duration::hours(12))
        .await
        .unwrap();
    assert!(ImportScheduleRepo::list_due(&pool, now).await.unwrap().is_empty());
    assert_eq!(ImportScheduleRepo::list(&pool).await.unwrap().len(), 1);
}
