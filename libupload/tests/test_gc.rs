mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::common::*;
use libupload::config::MonitorConfig;
use libupload::gc::{GC_LOCK_NAME, GarbageCollector};
use libupload::lock::{ClusterLock, LocalClusterLock};
use libupload::store::{MemorySessionStore, SessionStore};

async fn seed_job(
    store: &MemorySessionStore,
    host_id: HostId,
    subject_id: SubjectId,
    kind: SubjectKind,
    mode: UploadMode,
    status: UploadStatus,
    age_secs: i64,
) -> JobId {
    let mut job = UploadJob::new(
        host_id,
        subject_id,
        kind,
        mode,
        status,
        Some(format!("http://10.0.0.5/userdata/tok-{subject_id}")),
    );
    job.install_path = Some(format!("/store/{subject_id}.vhd"));
    let id = store.create(job).await.unwrap();
    store
        .update_by_id(
            id,
            JobUpdate {
                last_updated: Some(Utc::now() - chrono::Duration::seconds(age_secs)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    id
}

fn hundred_second_expiry() -> MonitorConfig {
    MonitorConfig {
        url_expiration_secs: 100,
        ..Default::default()
    }
}

#[tokio::test]
async fn sweep_reclaims_exactly_the_expired_urls() {
    let store = Arc::new(MemorySessionStore::new());
    let channel = MockChannel::new();
    let topology = MockTopology::new()
        .with_host(1, make_host(5))
        .with_service_vm(5, make_vm(90, Some("10.0.0.5")));

    let expired = seed_job(
        &store,
        5,
        40,
        SubjectKind::Template,
        UploadMode::HttpDownload,
        UploadStatus::DownloadUrlCreated,
        150,
    )
    .await;
    let live = seed_job(
        &store,
        5,
        41,
        SubjectKind::Template,
        UploadMode::HttpDownload,
        UploadStatus::DownloadUrlCreated,
        50,
    )
    .await;
    let never_created = seed_job(
        &store,
        5,
        42,
        SubjectKind::Template,
        UploadMode::HttpDownload,
        UploadStatus::DownloadUrlNotCreated,
        150,
    )
    .await;
    let push_job = seed_job(
        &store,
        5,
        43,
        SubjectKind::Template,
        UploadMode::FtpUpload,
        UploadStatus::Uploaded,
        150,
    )
    .await;

    let mut gc = GarbageCollector::new(
        store.clone(),
        channel.clone(),
        Arc::new(topology),
        Arc::new(LocalClusterLock::new()),
        &hundred_second_expiry(),
    );
    gc.run_once().await;

    assert!(store.find_by_id(expired).await.unwrap().is_none());
    for id in [live, never_created, push_job] {
        assert!(store.find_by_id(id).await.unwrap().is_some());
    }

    let sent = channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 90);
    match &sent[0].1 {
        StorageCommand::DeleteDownloadUrl(cmd) => {
            assert_eq!(cmd.install_path, "/store/40.vhd");
            assert_eq!(cmd.parent_path, "/mnt/sec");
            assert_eq!(cmd.kind, SubjectKind::Template);
        }
        other => panic!("expected a teardown command, got {other:?}"),
    }
}

#[tokio::test]
async fn volume_url_teardown_names_the_volume_copy() {
    let store = Arc::new(MemorySessionStore::new());
    let channel = MockChannel::new();
    let topology = MockTopology::new()
        .with_host(1, make_host(5))
        .with_service_vm(5, make_vm(90, Some("10.0.0.5")));

    seed_job(
        &store,
        5,
        7,
        SubjectKind::Volume,
        UploadMode::HttpDownload,
        UploadStatus::DownloadUrlCreated,
        150,
    )
    .await;

    let mut gc = GarbageCollector::new(
        store.clone(),
        channel.clone(),
        Arc::new(topology),
        Arc::new(LocalClusterLock::new()),
        &hundred_second_expiry(),
    );
    gc.run_once().await;

    let sent = channel.sent();
    assert_eq!(sent.len(), 1);
    match &sent[0].1 {
        // the agent uses the kind to also drop the volume copy behind the url
        StorageCommand::DeleteDownloadUrl(cmd) => assert_eq!(cmd.kind, SubjectKind::Volume),
        other => panic!("expected a teardown command, got {other:?}"),
    }
}

#[tokio::test]
async fn sweep_skips_while_another_instance_holds_the_lock() {
    let store = Arc::new(MemorySessionStore::new());
    let channel = MockChannel::new();
    let topology = MockTopology::new()
        .with_host(1, make_host(5))
        .with_service_vm(5, make_vm(90, Some("10.0.0.5")));
    let lock = Arc::new(LocalClusterLock::new());

    let expired = seed_job(
        &store,
        5,
        40,
        SubjectKind::Template,
        UploadMode::HttpDownload,
        UploadStatus::DownloadUrlCreated,
        150,
    )
    .await;

    assert!(
        lock.try_acquire(GC_LOCK_NAME, Duration::from_millis(10))
            .await
            .unwrap()
    );

    let mut gc = GarbageCollector::new(
        store.clone(),
        channel.clone(),
        Arc::new(topology),
        lock.clone(),
        &hundred_second_expiry(),
    );
    gc.run_once().await;
    assert!(store.find_by_id(expired).await.unwrap().is_some());
    assert_eq!(channel.sent_count(), 0);

    lock.release(GC_LOCK_NAME).await.unwrap();
    gc.run_once().await;
    assert!(store.find_by_id(expired).await.unwrap().is_none());
    assert_eq!(channel.sent_count(), 1);
}

#[tokio::test]
async fn failed_teardown_is_retried_on_the_next_sweep() {
    let store = Arc::new(MemorySessionStore::new());
    let channel = MockChannel::new();
    let topology = MockTopology::new()
        .with_host(1, make_host(5))
        .with_service_vm(5, make_vm(90, Some("10.0.0.5")));
    channel.set_unreachable(90);

    let expired = seed_job(
        &store,
        5,
        40,
        SubjectKind::Template,
        UploadMode::HttpDownload,
        UploadStatus::DownloadUrlCreated,
        150,
    )
    .await;

    let mut gc = GarbageCollector::new(
        store.clone(),
        channel.clone(),
        Arc::new(topology),
        Arc::new(LocalClusterLock::new()),
        &hundred_second_expiry(),
    );
    gc.run_once().await;
    assert!(store.find_by_id(expired).await.unwrap().is_some());
    assert_eq!(channel.sent_count(), 0);

    channel.set_reachable(90);
    gc.run_once().await;
    assert!(store.find_by_id(expired).await.unwrap().is_none());
    assert_eq!(channel.sent_count(), 1);
}
