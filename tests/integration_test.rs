//! Gateway wiring from configuration down to a real storage backend

mod common;

use common::pointer_for;
use lfs_core::MEDIA_TYPE;
use lfs_server::{create_router, run_server_with_shutdown, AppState, GatewayConfig};
use lfs_store::{ContentStore, LocalStore, StorageConfig};
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

fn local_config(root: &std::path::Path) -> GatewayConfig {
    GatewayConfig {
        host: "127.0.0.1".to_string(),
        auth_enabled: false,
        rate_limit_rps: 0,
        storage: StorageConfig {
            kind: "local".to_string(),
            local_path: Some(root.to_path_buf()),
            s3: None,
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_local_storage_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = local_config(dir.path());
    config.port = addr.port();
    config.app_url = format!("http://{addr}");
    let state = AppState::new(config).await.unwrap();
    assert_eq!(state.store.kind(), "local");
    assert_eq!(state.config.base_url(), format!("http://{addr}/"));

    let app = create_router(Arc::new(state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = Client::new();
    let data = b"persisted to disk".to_vec();
    let pointer = pointer_for(&data);
    let lfs = format!("http://{addr}/team/assets.git/info/lfs");

    let res = client
        .post(format!("{lfs}/objects/batch"))
        .header("Accept", MEDIA_TYPE)
        .body(json!({"operation": "upload", "objects": [{"oid": pointer.oid, "size": pointer.size}]}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    let href = body["objects"][0]["actions"]["upload"]["href"].as_str().unwrap().to_string();
    assert!(href.starts_with(&lfs));

    let res = client.put(&href).body(data.clone()).send().await.unwrap();
    assert_eq!(res.status(), 200);

    // Objects land under the sharded relative path.
    let on_disk = dir.path().join(pointer.relative_path());
    assert_eq!(std::fs::read(&on_disk).unwrap(), data);

    let store = LocalStore::new(dir.path()).await.unwrap();
    assert!(store.verify(&pointer).await.unwrap());

    let res = client
        .get(format!("{lfs}/objects/{}", pointer.oid))
        .send()
        .await
        .unwrap();
    assert_eq!(res.bytes().await.unwrap().to_vec(), data);

    // Corruption on disk is caught by the verify endpoint.
    std::fs::write(&on_disk, b"persisted to d1sk").unwrap();
    let res = client
        .post(format!("{lfs}/verify"))
        .header("Accept", MEDIA_TYPE)
        .body(json!({"oid": pointer.oid, "size": pointer.size}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn test_local_storage_has_no_multipart() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(local_config(dir.path())).await.unwrap();
    assert!(!state.coordinator.is_available());
}

#[tokio::test]
async fn test_unknown_storage_kind() {
    let mut config = GatewayConfig {
        auth_enabled: false,
        ..Default::default()
    };
    config.storage.kind = "tape".to_string();
    let err = AppState::new(config).await.err().unwrap();
    assert!(err.to_string().contains("tape"));
}

#[tokio::test]
async fn test_auth_requires_secret() {
    let config = GatewayConfig {
        auth_enabled: true,
        jwt_secret: None,
        storage: StorageConfig {
            kind: "memory".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(AppState::new(config).await.is_err());
}

#[tokio::test]
async fn test_graceful_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = local_config(dir.path());
    config.port = 0;

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(run_server_with_shutdown(config, async move {
        let _ = rx.await;
    }));

    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert!(result.is_ok());
}
