//! Integration tests for the EtcdBackup reconciler
//!
//! These drive `process_item` against in-memory fakes for the resource
//! API, the etcd snapshotter and object storage.

mod common;

use chrono::Utc;
use common::*;
use etcd_backup_operator::crd::{AbsBackupSource, BackupPolicy, EtcdBackupStatus};
use etcd_backup_operator::reconcilers::backup::{process_item, FINALIZER_NAME};
use etcd_backup_operator::Error;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

// ============================================================================
// One-shot backups
// ============================================================================

#[tokio::test]
async fn missing_resource_is_a_no_op() {
    let h = Harness::new();
    process_item(&key("ghost"), &h.ctx).await.unwrap();
    assert_eq!(h.snapshotter.calls(), 0);
}

#[tokio::test]
async fn one_shot_backup_writes_exact_path_and_reports_success() {
    let h = Harness::new();
    h.client
        .insert(backup("nightly", s3_spec("backups/etcd.db", None), Utc::now()));

    process_item(&key("nightly"), &h.ctx).await.unwrap();

    assert_eq!(h.stored(), vec!["etcd.db".to_string()]);
    let status = h.status("nightly").unwrap();
    assert!(status.succeeded);
    assert!(status.reason.is_empty());
    assert_eq!(status.etcd_revision, 100);
    assert_eq!(status.etcd_version, "3.5.9");
    assert!(status.last_success_date.is_some());
    assert_eq!(status.last_execution_date, status.last_success_date);
}

#[tokio::test]
async fn one_shot_backup_is_idempotent() {
    let h = Harness::new();
    h.client
        .insert(backup("nightly", s3_spec("backups/etcd.db", None), Utc::now()));

    process_item(&key("nightly"), &h.ctx).await.unwrap();
    process_item(&key("nightly"), &h.ctx).await.unwrap();
    process_item(&key("nightly"), &h.ctx).await.unwrap();

    assert_eq!(h.snapshotter.calls(), 1);
    assert_eq!(h.client.status_updates(), 1);
}

#[tokio::test]
async fn failed_one_shot_is_terminal() {
    let h = Harness::new();
    h.snapshotter.fail(true);
    h.client
        .insert(backup("nightly", s3_spec("backups/etcd.db", None), Utc::now()));

    let err = process_item(&key("nightly"), &h.ctx).await.unwrap_err();
    assert!(matches!(err, Error::Snapshot(_)));

    let status = h.status("nightly").unwrap();
    assert!(!status.succeeded);
    assert!(status.reason.contains("etcd unavailable"));
    assert!(status.last_execution_date.is_some());
    assert!(status.last_success_date.is_none());

    // Redelivery after the failure does not run again.
    h.snapshotter.fail(false);
    process_item(&key("nightly"), &h.ctx).await.unwrap();
    assert_eq!(h.snapshotter.calls(), 1);
    assert!(h.stored().is_empty());
}

#[tokio::test]
async fn already_succeeded_resource_is_skipped() {
    let h = Harness::new();
    h.client.insert(with_status(
        backup("done", s3_spec("backups/etcd.db", None), Utc::now()),
        EtcdBackupStatus {
            succeeded: true,
            ..Default::default()
        },
    ));

    process_item(&key("done"), &h.ctx).await.unwrap();
    assert_eq!(h.snapshotter.calls(), 0);
    assert_eq!(h.client.status_updates(), 0);
}

#[tokio::test]
async fn validation_failure_is_reported_before_any_io() {
    let h = Harness::new();
    let mut spec = s3_spec("backups/etcd.db", None);
    spec.etcd_endpoints.clear();
    h.client.insert(backup("invalid", spec, Utc::now()));

    let err = process_item(&key("invalid"), &h.ctx).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(h.snapshotter.calls(), 0);
    assert!(h.status("invalid").unwrap().reason.contains("etcdEndpoints"));
}

#[tokio::test]
async fn negative_max_backups_fails_validation() {
    let h = Harness::new();
    let spec = s3_spec(
        "backups/etcd.db",
        Some(BackupPolicy {
            max_backups: -1,
            ..Default::default()
        }),
    );
    h.client.insert(backup("invalid", spec, Utc::now()));

    let err = process_item(&key("invalid"), &h.ctx).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(h.snapshotter.calls(), 0);
}

#[tokio::test]
async fn unknown_storage_type_fails_only_that_resource() {
    let h = Harness::new();
    let mut bad = s3_spec("backups/bad.db", None);
    bad.storage_type = "FTP".to_string();
    h.client.insert(backup("bad", bad, Utc::now()));
    h.client
        .insert(backup("good", s3_spec("backups/good.db", None), Utc::now()));

    let err = process_item(&key("bad"), &h.ctx).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(h.status("bad").unwrap().reason.contains("unknown StorageType: FTP"));

    process_item(&key("good"), &h.ctx).await.unwrap();
    assert!(h.status("good").unwrap().succeeded);
    assert_eq!(h.stored(), vec!["good.db".to_string()]);
}

#[tokio::test]
async fn malformed_path_never_reaches_storage() {
    let h = Harness::new();
    h.client
        .insert(backup("flat", s3_spec("no-separator", None), Utc::now()));

    let err = process_item(&key("flat"), &h.ctx).await.unwrap_err();
    assert!(matches!(err, Error::InvalidPath(_)));
    assert!(h.storage.objects.keys("no-separator").is_empty());
}

#[tokio::test]
async fn missing_abs_container_is_reported() {
    let h = Harness::new();
    let mut spec = s3_spec("unused/path", None);
    spec.storage_type = "ABS".to_string();
    spec.s3 = None;
    spec.abs = Some(AbsBackupSource {
        path: "backups/etcd.db".to_string(),
        abs_secret: "abs".to_string(),
    });
    h.client.insert(backup("azure", spec, Utc::now()));

    let err = process_item(&key("azure"), &h.ctx).await.unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
    assert!(h
        .status("azure")
        .unwrap()
        .reason
        .contains("container backups does not exist"));
    assert!(h.storage.blobs.blob("backups", "etcd.db").is_none());
}

#[tokio::test]
async fn lost_status_write_is_not_fatal() {
    let h = Harness::new();
    h.client
        .insert(backup("nightly", s3_spec("backups/etcd.db", None), Utc::now()));
    h.client.fail_updates(true);

    process_item(&key("nightly"), &h.ctx).await.unwrap();

    assert_eq!(h.stored(), vec!["etcd.db".to_string()]);
    assert!(h.status("nightly").is_none());
}

// ============================================================================
// Periodic scheduling
// ============================================================================

#[tokio::test]
async fn periodic_resource_is_scheduled_once() {
    let h = Harness::new();
    h.client.insert(backup(
        "hourly",
        s3_spec("backups/etcd", periodic_policy(3600, 3)),
        Utc::now(),
    ));

    process_item(&key("hourly"), &h.ctx).await.unwrap();
    process_item(&key("hourly"), &h.ctx).await.unwrap();
    process_item(&key("hourly"), &h.ctx).await.unwrap();

    assert_eq!(h.ctx.schedules.len(), 1);
    assert!(h.ctx.schedules.contains("uid-hourly"));
    // Only the finalizer write; later passes find it already set.
    assert_eq!(h.client.updates(), 1);
    let stored = h.client.object(&key("hourly")).unwrap();
    assert!(stored.finalizers().iter().any(|f| f == FINALIZER_NAME));
    assert_eq!(h.snapshotter.calls(), 0);
}

#[tokio::test]
async fn spec_change_replaces_schedule() {
    let h = Harness::new();
    h.client.insert(backup(
        "hourly",
        s3_spec("backups/etcd", periodic_policy(3600, 3)),
        Utc::now(),
    ));
    process_item(&key("hourly"), &h.ctx).await.unwrap();
    let first = h.ctx.schedules.spec("uid-hourly").unwrap();

    for interval in [1800, 900, 600] {
        h.client.edit(&key("hourly"), |b| {
            b.spec.backup_policy = periodic_policy(interval, 3);
        });
        process_item(&key("hourly"), &h.ctx).await.unwrap();
        assert_eq!(h.ctx.schedules.len(), 1);
    }

    let last = h.ctx.schedules.spec("uid-hourly").unwrap();
    assert_ne!(first, last);
    assert_eq!(last.interval_secs(), 600);
}

#[tokio::test]
async fn finalizer_write_failure_leaves_no_schedule() {
    let h = Harness::new();
    h.client.insert(backup(
        "hourly",
        s3_spec("backups/etcd", periodic_policy(3600, 0)),
        Utc::now(),
    ));
    h.client.fail_updates(true);

    assert!(process_item(&key("hourly"), &h.ctx).await.is_err());
    assert!(h.ctx.schedules.is_empty());
}

#[tokio::test]
async fn periodic_to_one_shot_stops_schedule() {
    let h = Harness::new();
    h.client.insert(backup(
        "hourly",
        s3_spec("backups/etcd", periodic_policy(3600, 3)),
        Utc::now(),
    ));
    process_item(&key("hourly"), &h.ctx).await.unwrap();
    assert_eq!(h.ctx.schedules.len(), 1);

    h.client.edit(&key("hourly"), |b| {
        b.spec.backup_policy = periodic_policy(0, 3);
    });
    process_item(&key("hourly"), &h.ctx).await.unwrap();

    assert!(h.ctx.schedules.is_empty());
    // Never ran, so the one-shot path runs now.
    assert_eq!(h.snapshotter.calls(), 1);
}

// ============================================================================
// Deletion
// ============================================================================

#[tokio::test]
async fn deleting_periodic_resource_cancels_schedule_and_releases_finalizer() {
    let h = Harness::new();
    h.client.insert(backup(
        "hourly",
        s3_spec("backups/etcd", periodic_policy(3600, 3)),
        Utc::now(),
    ));
    process_item(&key("hourly"), &h.ctx).await.unwrap();
    assert_eq!(h.ctx.schedules.len(), 1);

    h.client.edit(&key("hourly"), |b| {
        b.metadata.deletion_timestamp = Some(Time(Utc::now()));
    });
    process_item(&key("hourly"), &h.ctx).await.unwrap();

    assert!(h.ctx.schedules.is_empty());
    assert!(h.client.object(&key("hourly")).is_none());
}

#[tokio::test]
async fn deleting_without_finalizer_needs_no_update() {
    let h = Harness::new();
    let mut b = backup("once", s3_spec("backups/etcd.db", None), Utc::now());
    b.metadata.deletion_timestamp = Some(Time(Utc::now()));
    h.client.insert(b);

    process_item(&key("once"), &h.ctx).await.unwrap();
    assert_eq!(h.client.updates(), 0);
    assert_eq!(h.snapshotter.calls(), 0);
}
