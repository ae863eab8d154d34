mod helpers;

use std::time::Duration;

use helpers::*;
use tokio::time::sleep;
use wallcat_core::config::ScheduleSettings;
use wallcat_core::models::UploadState;
use wallcat_reconcile::Scheduler;
use wallcat_storage::storage_key_for;

fn fast_schedule() -> ScheduleSettings {
    ScheduleSettings {
        reconcile_interval: Duration::from_millis(100),
        orphan_sweep_interval: Duration::from_millis(500),
    }
}

#[tokio::test]
async fn running_scheduler_repairs_new_stuck_data() {
    let h = setup_harness(fast_settings()).await;
    let scheduler = Scheduler::new(h.reconciler.clone(), fast_schedule());

    let record = seed_stored(&h.repo, &h.blobs).await;
    backdate_upload(&h.db.pool, record.id, Duration::from_secs(5)).await;

    assert!(scheduler.start());
    assert!(scheduler.is_running());

    sleep(Duration::from_millis(800)).await;

    let current = h.repo.get_upload(record.id).await.unwrap().unwrap();
    assert_eq!(current.upload_state, UploadState::Processing);
    assert_eq!(h.events.publish_count(), 1);

    scheduler.stop().await;
}

#[tokio::test]
async fn stopped_scheduler_runs_no_further_cycles() {
    let h = setup_harness(fast_settings()).await;
    let scheduler = Scheduler::new(h.reconciler.clone(), fast_schedule());

    scheduler.start();
    sleep(Duration::from_millis(300)).await;
    scheduler.stop().await;
    assert!(!scheduler.is_running());

    // Data that becomes stuck after stop must stay untouched.
    let record = seed_stored(&h.repo, &h.blobs).await;
    backdate_upload(&h.db.pool, record.id, Duration::from_secs(5)).await;

    sleep(Duration::from_millis(600)).await;

    let current = h.repo.get_upload(record.id).await.unwrap().unwrap();
    assert_eq!(current.upload_state, UploadState::Stored);
    assert_eq!(h.events.publish_count(), 0);
}

#[tokio::test]
async fn start_is_idempotent() {
    let h = setup_harness(fast_settings()).await;
    let scheduler = Scheduler::new(h.reconciler.clone(), fast_schedule());

    assert!(scheduler.start());
    assert!(!scheduler.start(), "second start must be a signaled no-op");
    assert!(scheduler.is_running());

    scheduler.stop().await;
    // A stopped scheduler can start again.
    assert!(scheduler.start());
    scheduler.stop().await;
}

#[tokio::test]
async fn stop_without_start_is_a_noop() {
    let h = setup_harness(fast_settings()).await;
    let scheduler = Scheduler::new(h.reconciler.clone(), fast_schedule());
    scheduler.stop().await;
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn trigger_now_works_while_stopped() {
    let h = setup_harness(default_settings()).await;
    let scheduler = Scheduler::new(h.reconciler.clone(), fast_schedule());

    let stuck = seed_uploading(&h.repo).await;
    h.blobs.insert(&storage_key_for(stuck.id), vec![6u8; 8]);
    backdate_upload(&h.db.pool, stuck.id, Duration::from_secs(900)).await;

    let stale = seed_stored(&h.repo, &h.blobs).await;
    backdate_upload(&h.db.pool, stale.id, Duration::from_secs(600)).await;

    let intent = seed_initiated(&h.repo).await;
    backdate_upload(&h.db.pool, intent.id, Duration::from_secs(5400)).await;

    assert!(!scheduler.is_running());
    scheduler.trigger_now().await.unwrap();

    let stuck = h.repo.get_upload(stuck.id).await.unwrap().unwrap();
    assert_eq!(stuck.upload_state, UploadState::Stored);
    let stale = h.repo.get_upload(stale.id).await.unwrap().unwrap();
    assert_eq!(stale.upload_state, UploadState::Processing);
    assert!(h.repo.get_upload(intent.id).await.unwrap().is_none());
    assert_eq!(h.events.publish_count(), 1);
}

#[tokio::test]
async fn trigger_now_surfaces_the_error_but_finishes_the_sweep() {
    let h = setup_harness(default_settings()).await;
    let scheduler = Scheduler::new(h.reconciler.clone(), fast_schedule());

    let intent = seed_initiated(&h.repo).await;
    backdate_upload(&h.db.pool, intent.id, Duration::from_secs(5400)).await;

    // No stuck/stored candidates exist, so the injected failure lands on
    // the orphan sweep's listing, after the intent pass already ran.
    h.blobs.fail_next();
    let result = scheduler.trigger_now().await;
    assert!(result.is_err());

    assert!(h.repo.get_upload(intent.id).await.unwrap().is_none());
}
