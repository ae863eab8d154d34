mod helpers;

use std::sync::Arc;

use helpers::{sample_metadata, setup_test_db};
use uuid::Uuid;

use wallcat_core::models::UploadState;
use wallcat_db::UploadRepository;
use wallcat_events::test_support::RecordingPublisher;
use wallcat_ingest::{IngestOutcome, IngestService, NewUpload};
use wallcat_storage::test_support::MemoryBlobStore;
use wallcat_storage::storage_key_for;

fn service(
    repo: UploadRepository,
    blobs: MemoryBlobStore,
    events: RecordingPublisher,
) -> IngestService {
    IngestService::new(
        repo,
        Arc::new(blobs),
        Arc::new(events),
        "wallcat-test".to_string(),
    )
}

#[tokio::test]
async fn happy_path_ends_in_processing_with_one_event() {
    let db = setup_test_db().await;
    let repo = UploadRepository::new(db.pool.clone());
    let blobs = MemoryBlobStore::new();
    let events = RecordingPublisher::new();
    let ingest = service(repo.clone(), blobs.clone(), events.clone());

    let outcome = ingest
        .ingest(NewUpload {
            user_id: Uuid::new_v4(),
            metadata: sample_metadata(),
            data: vec![7u8; 64],
        })
        .await
        .unwrap();

    let record = match outcome {
        IngestOutcome::Accepted(record) => record,
        other => panic!("expected Accepted, got {other:?}"),
    };

    assert_eq!(record.upload_state, UploadState::Processing);
    assert!(record.has_metadata());
    assert!(blobs.has(&storage_key_for(record.id)));
    assert_eq!(events.publish_count(), 1);
    assert_eq!(events.published()[0].upload_id, record.id);
    assert_eq!(events.published()[0].storage_bucket, "wallcat-test");
}

#[tokio::test]
async fn same_user_same_content_resolves_to_one_record() {
    let db = setup_test_db().await;
    let repo = UploadRepository::new(db.pool.clone());
    let events = RecordingPublisher::new();
    let ingest = service(repo.clone(), MemoryBlobStore::new(), events.clone());
    let user = Uuid::new_v4();

    let first = ingest
        .ingest(NewUpload {
            user_id: user,
            metadata: sample_metadata(),
            data: b"identical bytes".to_vec(),
        })
        .await
        .unwrap();

    let second = ingest
        .ingest(NewUpload {
            user_id: user,
            metadata: sample_metadata(),
            data: b"identical bytes".to_vec(),
        })
        .await
        .unwrap();

    match &second {
        IngestOutcome::Duplicate(record) => assert_eq!(record.id, first.record().id),
        other => panic!("expected Duplicate, got {other:?}"),
    }
    // The duplicate attempt publishes nothing and writes nothing.
    assert_eq!(events.publish_count(), 1);
}

#[tokio::test]
async fn different_users_get_distinct_records() {
    let db = setup_test_db().await;
    let repo = UploadRepository::new(db.pool.clone());
    let ingest = service(repo.clone(), MemoryBlobStore::new(), RecordingPublisher::new());

    let first = ingest
        .ingest(NewUpload {
            user_id: Uuid::new_v4(),
            metadata: sample_metadata(),
            data: b"shared wallpaper".to_vec(),
        })
        .await
        .unwrap();
    let second = ingest
        .ingest(NewUpload {
            user_id: Uuid::new_v4(),
            metadata: sample_metadata(),
            data: b"shared wallpaper".to_vec(),
        })
        .await
        .unwrap();

    assert!(matches!(first, IngestOutcome::Accepted(_)));
    assert!(matches!(second, IngestOutcome::Accepted(_)));
    assert_ne!(first.record().id, second.record().id);
}

#[tokio::test]
async fn blob_failure_leaves_row_recoverable() {
    let db = setup_test_db().await;
    let repo = UploadRepository::new(db.pool.clone());
    let blobs = MemoryBlobStore::new();
    let ingest = service(repo.clone(), blobs.clone(), RecordingPublisher::new());

    blobs.fail_next();
    let err = ingest
        .ingest(NewUpload {
            user_id: Uuid::new_v4(),
            metadata: sample_metadata(),
            data: b"doomed write".to_vec(),
        })
        .await;
    assert!(err.is_err());

    // The row survives in `uploading` with staged metadata, exactly what
    // the stuck-uploads pass repairs from.
    let stats = repo.get_stats().await.unwrap();
    assert_eq!(stats.uploading, 1);
}

#[tokio::test]
async fn publish_failure_leaves_row_stored() {
    let db = setup_test_db().await;
    let repo = UploadRepository::new(db.pool.clone());
    let blobs = MemoryBlobStore::new();
    let events = RecordingPublisher::new();
    let ingest = service(repo.clone(), blobs.clone(), events.clone());

    events.set_failing(true);
    let outcome = ingest
        .ingest(NewUpload {
            user_id: Uuid::new_v4(),
            metadata: sample_metadata(),
            data: b"event will fail".to_vec(),
        })
        .await
        .unwrap();

    // Intake still succeeds; the event is the reconciler's problem now.
    let record = outcome.record();
    assert_eq!(record.upload_state, UploadState::Stored);
    assert!(blobs.has(&storage_key_for(record.id)));
    assert_eq!(events.publish_count(), 0);
}
