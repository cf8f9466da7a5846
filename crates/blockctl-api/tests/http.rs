//! HTTP-level scenarios against a router with a running revert worker.

mod common;

use axum::body::Body;
use axum::http::StatusCode;
use blockctl_api::ApiConfig;
use blockctl_core::model::{SnapshotStatus, Volume, VolumeStatus};
use common::{json, request, volume_with_snapshot, TestServer};
use serde_json::json;

#[tokio::test]
async fn test_revert_completes_through_worker() {
    let server = TestServer::start(ApiConfig::default());
    let (volume, snapshot) = volume_with_snapshot("p1");
    server.store.insert_volume(volume.clone());
    server.store.insert_snapshot(snapshot.clone()).unwrap();

    let body = json!({"revert": {"snapshot_id": snapshot.id}}).to_string();
    let response = server
        .send(request(
            "POST",
            &format!("/v3/p1/volumes/{}/action", volume.id),
            "p1",
            "member",
            "volume 3.40",
            Body::from(body),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    assert!(server.wait_for_status(&volume, VolumeStatus::Available).await);
    assert_eq!(
        server.store.snapshot_status(snapshot.id),
        Some(SnapshotStatus::Available)
    );
}

#[tokio::test]
async fn test_revert_of_foreign_snapshot_is_mismatch() {
    let server = TestServer::start(ApiConfig::default());
    let (volume, _) = volume_with_snapshot("p1");
    let (other, foreign) = volume_with_snapshot("p1");
    server.store.insert_volume(volume.clone());
    server.store.insert_volume(other);
    server.store.insert_snapshot(foreign.clone()).unwrap();

    let body = json!({"revert": {"snapshot_id": foreign.id}}).to_string();
    let response = server
        .send(request(
            "POST",
            &format!("/v3/p1/volumes/{}/action", volume.id),
            "p1",
            "member",
            "3.40",
            Body::from(body),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["error"]["kind"], "mismatch");
    assert_eq!(server.store.volume_status(volume.id), Some(VolumeStatus::Available));
}

#[tokio::test]
async fn test_revert_missing_snapshot_is_not_found() {
    let server = TestServer::start(ApiConfig::default());
    let volume = Volume::new("p1", 1);
    server.store.insert_volume(volume.clone());

    let body = json!({"revert": {"snapshot_id": uuid::Uuid::new_v4()}}).to_string();
    let response = server
        .send(request(
            "POST",
            &format!("/v3/p1/volumes/{}/action", volume.id),
            "p1",
            "member",
            "3.40",
            Body::from(body),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(server.store.volume_status(volume.id), Some(VolumeStatus::Available));
}

#[tokio::test]
async fn test_admin_all_tenants_listing() {
    let server = TestServer::start(ApiConfig::default());
    server.store.insert_volume(Volume::new("p1", 1));
    server.store.insert_volume(Volume::new("p2", 1));

    let response = server
        .send(request(
            "GET",
            "/v3/p1/volumes/detail?all_tenants=1&with_count=1",
            "p1",
            "admin",
            "3.45",
            Body::empty(),
        ))
        .await;
    let body = json(response).await;
    assert_eq!(body["count"], 2);
    assert!(body["volumes"][0].get("os-vol-tenant-attr:tenant_id").is_some());

    let response = server
        .send(request(
            "GET",
            "/v3/p1/volumes/detail?all_tenants=1&with_count=1",
            "p1",
            "member",
            "3.45",
            Body::empty(),
        ))
        .await;
    assert_eq!(json(response).await["count"], 1);
}

#[tokio::test]
async fn test_strict_tenant_scope_rejects_member() {
    let config = ApiConfig {
        strict_tenant_scope: true,
        ..ApiConfig::default()
    };
    let server = TestServer::start(config);

    let response = server
        .send(request(
            "GET",
            "/v3/p1/volumes?all_tenants=true",
            "p1",
            "member",
            "3.0",
            Body::empty(),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_configured_filters_apply() {
    let config = ApiConfig {
        volume_filters: vec!["name".to_string()],
        ..ApiConfig::default()
    };
    let server = TestServer::start(config);
    server.store.insert_volume(Volume::new("p1", 1).with_name("keep"));

    let response = server
        .send(request(
            "GET",
            "/v3/p1/volumes?status=available",
            "p1",
            "member",
            "3.31",
            Body::empty(),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = server
        .send(request(
            "GET",
            "/v3/p1/volumes?name=keep",
            "p1",
            "member",
            "3.31",
            Body::empty(),
        ))
        .await;
    assert_eq!(json(response).await["volumes"].as_array().unwrap().len(), 1);
}
