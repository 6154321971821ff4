//! Reconciliation ticks against a recording data plane.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ingress_control::error::ControllerError;
use ingress_control::lifecycle::Shutdown;
use ingress_control::passthrough::{PassthroughOptions, PassthroughRouter, PassthroughTarget};
use ingress_control::resilience::Backoff;
use ingress_control::store::{ClusterSnapshot, FileStore, ResourceStore};
use ingress_control::sync::{ChangeDecision, DynamicPublisher, Reconciler, ReconcilerOptions, SyncQueue};

mod common;

use common::{annotate, declaration, endpoints, service, RecordingDataPlane};

fn snapshot(addresses: &[&str], hosts: &[&str]) -> ClusterSnapshot {
    ClusterSnapshot {
        declarations: hosts
            .iter()
            .map(|h| declaration("default", h, h, "/", "svc-a", 80))
            .collect(),
        services: vec![service("default", "svc-a", 80, 8080)],
        endpoints: vec![endpoints("default", "svc-a", addresses)],
        secrets: vec![],
    }
}

fn no_retry() -> Backoff {
    Backoff {
        initial: Duration::from_millis(1),
        retries: 0,
        ..Backoff::default()
    }
}

fn reconciler(
    store: &Arc<FileStore>,
    data_plane: &Arc<RecordingDataPlane>,
    options: ReconcilerOptions,
) -> Reconciler {
    let resources: Arc<dyn ResourceStore> = store.clone();
    Reconciler::new(
        resources,
        data_plane.clone(),
        DynamicPublisher::new(data_plane.clone(), no_retry()),
        options,
    )
}

#[tokio::test]
async fn test_endpoint_change_is_dynamic_and_host_change_reloads() {
    let store = Arc::new(FileStore::from_snapshot(snapshot(&["10.0.0.1"], &["foo.com"])));
    let dp = Arc::new(RecordingDataPlane::default());
    let mut reconciler = reconciler(&store, &dp, common::fast_reconciler_options());
    let running = reconciler.running();

    assert_eq!(reconciler.sync().await.unwrap(), ChangeDecision::FullReload);
    assert_eq!((dp.reload_count(), dp.push_count()), (1, 1));
    let first_checksum = running.load().unwrap().checksum.clone();
    assert!(first_checksum.is_some());

    assert_eq!(reconciler.sync().await.unwrap(), ChangeDecision::NoChange);
    assert_eq!((dp.reload_count(), dp.push_count()), (1, 1));

    assert!(store.replace(snapshot(&["10.0.0.1", "10.0.0.2"], &["foo.com"])));
    assert_eq!(reconciler.sync().await.unwrap(), ChangeDecision::DynamicOnly);
    assert_eq!((dp.reload_count(), dp.push_count()), (1, 2));
    assert_eq!(dp.last_push()["default-svc-a-80"].endpoints.len(), 2);
    assert_eq!(running.load().unwrap().checksum, first_checksum);

    assert!(store.replace(snapshot(&["10.0.0.1", "10.0.0.2"], &["foo.com", "bar.com"])));
    assert_eq!(reconciler.sync().await.unwrap(), ChangeDecision::FullReload);
    assert_eq!((dp.reload_count(), dp.push_count()), (2, 3));
    assert_ne!(running.load().unwrap().checksum, first_checksum);
    assert!(running.load().unwrap().server("bar.com").is_some());
}

#[tokio::test]
async fn test_failed_reload_keeps_running_config() {
    let store = Arc::new(FileStore::from_snapshot(snapshot(&["10.0.0.1"], &["foo.com"])));
    let dp = Arc::new(RecordingDataPlane::default());
    let mut reconciler = reconciler(&store, &dp, common::fast_reconciler_options());
    let running = reconciler.running();

    dp.fail_reload.store(true, Ordering::SeqCst);
    let err = reconciler.sync().await.unwrap_err();
    assert!(matches!(err, ControllerError::PublishFailure(_)));
    assert!(running.load().is_none());
    assert_eq!(dp.push_count(), 0);

    dp.fail_reload.store(false, Ordering::SeqCst);
    assert_eq!(reconciler.sync().await.unwrap(), ChangeDecision::FullReload);
    assert!(running.load().is_some());
}

#[tokio::test]
async fn test_failed_push_keeps_running_config() {
    let store = Arc::new(FileStore::from_snapshot(snapshot(&["10.0.0.1"], &["foo.com"])));
    let dp = Arc::new(RecordingDataPlane::default());
    let mut reconciler = reconciler(&store, &dp, common::fast_reconciler_options());
    let running = reconciler.running();
    reconciler.sync().await.unwrap();

    dp.fail_push.store(true, Ordering::SeqCst);
    store.replace(snapshot(&["10.0.0.9"], &["foo.com"]));
    assert!(reconciler.sync().await.is_err());
    let loaded = running.load().unwrap();
    let endpoints = &loaded.backend("default-svc-a-80").unwrap().endpoints;
    assert_eq!(endpoints[0].address, "10.0.0.1");
}

#[tokio::test]
async fn test_run_loop_syncs_on_request_and_stops() {
    let store = Arc::new(FileStore::from_snapshot(snapshot(&["10.0.0.1"], &["foo.com"])));
    let dp = Arc::new(RecordingDataPlane::default());
    let reconciler = reconciler(&store, &dp, common::fast_reconciler_options());
    let shutdown = Shutdown::new();
    let queue = SyncQueue::new();

    let task = tokio::spawn(reconciler.run(queue.clone(), shutdown.subscribe()));
    queue.enqueue("test");

    tokio::time::timeout(Duration::from_secs(5), async {
        while dp.reload_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_passthrough_table_follows_running_config() {
    let decl = annotate(
        declaration("default", "secure", "secure.example.com", "/", "svc-a", 80),
        &[("ssl-passthrough", "true")],
    );
    let mut snap = snapshot(&["10.0.0.1"], &[]);
    snap.declarations.push(decl);
    let store = Arc::new(FileStore::from_snapshot(snap));
    let dp = Arc::new(RecordingDataPlane::default());

    let mut options = common::fast_reconciler_options();
    options.synthesis.builder.enable_ssl_passthrough = true;
    let router = Arc::new(PassthroughRouter::new(None, PassthroughOptions::default()));
    let mut reconciler = reconciler(&store, &dp, options).with_passthrough(router.clone());

    assert!(router.table().is_empty());
    reconciler.sync().await.unwrap();

    let table = router.table();
    assert_eq!(
        table.resolve(Some("SECURE.example.com")),
        Some(&PassthroughTarget::new("10.96.0.1:80", false))
    );
    let running = reconciler.running().load().unwrap();
    assert_eq!(running.passthrough_backends.len(), 1);
    assert!(running.backend("default-svc-a-80").unwrap().ssl_passthrough);
}
