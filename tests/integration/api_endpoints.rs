//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - Ingestion over HTTP stores snapshots and reports alert transitions
//! - Invalid input is answered with 400 and a JSON error
//! - Authentication middleware guards every route but the health check
//! - Query and rule administration endpoints return the stored state
//! - Server admin, manual resolution and agent configs work over HTTP

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use probewatch::{
    api::{ApiConfig, ApiState, spawn_api_server},
    storage::StorageBackend,
};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::helpers::{SnapshotBuilder, T0, create_service, create_test_store};

const KEY: &str = "test-key";

async fn spawn_test_api(api_keys: Vec<String>) -> (TempDir, Arc<dyn StorageBackend>, SocketAddr) {
    let (dir, store) = create_test_store().await;
    let ingest = Arc::new(create_service(store.clone(), Default::default()));
    let state = ApiState::new(ingest, None);

    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(), // Random port
        api_keys,
        enable_cors: true,
    };

    let addr = spawn_api_server(config, state).await.unwrap();
    (dir, store, addr)
}

async fn spawn_open_api() -> (TempDir, Arc<dyn StorageBackend>, SocketAddr) {
    spawn_test_api(vec![]).await
}

fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

async fn post_snapshot(
    client: &reqwest::Client,
    addr: SocketAddr,
    snapshot: &SnapshotBuilder,
) -> reqwest::Response {
    client
        .post(url(addr, "/api/v1/metrics"))
        .json(&snapshot.json())
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_dir, _store, addr) = spawn_open_api().await;

    let response = reqwest::get(url(addr, "/api/v1/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_health_degraded_when_storage_closed() {
    let (_dir, store, addr) = spawn_open_api().await;
    store.close().await.unwrap();

    let response = reqwest::get(url(addr, "/api/v1/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "degraded");
}

#[tokio::test]
async fn test_auth_required_when_keys_configured() {
    let (_dir, _store, addr) = spawn_test_api(vec!["other-key".into(), KEY.into()]).await;
    let client = reqwest::Client::new();

    // Missing header
    let response = client
        .get(url(addr, "/api/v1/servers"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());

    // Wrong scheme
    let response = client
        .get(url(addr, "/api/v1/servers"))
        .header("Authorization", format!("Token {KEY}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Unknown key
    let response = client
        .get(url(addr, "/api/v1/servers"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Any configured key
    let response = client
        .get(url(addr, "/api/v1/servers"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Ingestion is protected as well
    let response = post_snapshot(&client, addr, &SnapshotBuilder::new("web-1")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Health stays public
    let response = client
        .get(url(addr, "/api/v1/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_ingest_and_query_server() {
    let (_dir, _store, addr) = spawn_open_api().await;
    let client = reqwest::Client::new();

    let snapshot = SnapshotBuilder::new("web-1")
        .cpu(42.0)
        .disk("/dev/sda1", 55.0)
        .network("eth0", 100, 200);
    let response = post_snapshot(&client, addr, &snapshot).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert!(body["server_record_id"].is_i64());
    assert_eq!(body["alerts_triggered"], json!([]));

    let servers: Value = client
        .get(url(addr, "/api/v1/servers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(servers["count"], 1);
    assert_eq!(servers["servers"][0]["server_id"], "web-1");
    assert_eq!(servers["servers"][0]["status"], "active");

    let response = client
        .get(url(addr, "/api/v1/servers/web-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let server: Value = response.json().await.unwrap();
    assert_eq!(server["hostname"], "web-1.example.com");

    let response = client
        .get(url(addr, "/api/v1/servers/missing"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_server_metrics_endpoint() {
    let (_dir, _store, addr) = spawn_open_api().await;
    let client = reqwest::Client::new();

    for offset in [0, 60, 120] {
        let snapshot = SnapshotBuilder::new("web-1").at(offset).cpu(10.0 + offset as f64);
        post_snapshot(&client, addr, &snapshot).await;
    }

    let start = chrono::DateTime::from_timestamp(T0, 0).unwrap().to_rfc3339();
    let end = chrono::DateTime::from_timestamp(T0 + 60, 0)
        .unwrap()
        .to_rfc3339();

    let response = client
        .get(url(addr, "/api/v1/servers/web-1/metrics/cpu"))
        .query(&[("start", start.as_str()), ("end", end.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["count"], 2);
    assert_eq!(body["series"]["metric_type"], "cpu");
    assert_eq!(body["series"]["samples"][0]["total_usage"], 10.0);
    assert_eq!(body["series"]["samples"][1]["total_usage"], 70.0);

    // Reversed range
    let response = client
        .get(url(addr, "/api/v1/servers/web-1/metrics/cpu"))
        .query(&[("start", end.as_str()), ("end", start.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .get(url(addr, "/api/v1/servers/web-1/metrics/gpu"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .get(url(addr, "/api/v1/servers/missing/metrics/cpu"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_snapshot_is_bad_request() {
    let (_dir, _store, addr) = spawn_open_api().await;
    let client = reqwest::Client::new();

    let response = client
        .post(url(addr, "/api/v1/metrics"))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("malformed"));

    let response = post_snapshot(&client, addr, &SnapshotBuilder::new("web-1").cpu(-1.0)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let servers: Value = client
        .get(url(addr, "/api/v1/servers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(servers["count"], 0);
}

#[tokio::test]
async fn test_rule_crud_and_alerts() {
    let (_dir, _store, addr) = spawn_open_api().await;
    let client = reqwest::Client::new();

    let response = client
        .post(url(addr, "/api/v1/alert-rules"))
        .json(&json!({
            "metric_type": "cpu",
            "threshold": 80.0,
            "comparison": ">",
            "duration": 0
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let rule: Value = response.json().await.unwrap();
    let rule_id = rule["id"].as_i64().unwrap();
    assert_eq!(rule["enabled"], true);

    // Unknown comparison
    let response = client
        .post(url(addr, "/api/v1/alert-rules"))
        .json(&json!({ "metric_type": "cpu", "threshold": 80.0, "comparison": "!=" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post_snapshot(&client, addr, &SnapshotBuilder::new("web-1").cpu(95.0)).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["alerts_triggered"].as_array().unwrap().len(), 1);
    let alert_id = body["alerts_triggered"][0]["id"].as_i64().unwrap();

    let alerts: Value = client
        .get(url(addr, "/api/v1/alerts"))
        .query(&[("status", "active"), ("server", "web-1")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alerts["count"], 1);
    assert_eq!(alerts["alerts"][0]["metric_value"], 95.0);

    let alerts: Value = client
        .get(url(addr, "/api/v1/alerts"))
        .query(&[("server", "nobody")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alerts["count"], 0);

    let response = client
        .get(url(addr, "/api/v1/alerts"))
        .query(&[("status", "sleeping")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .get(url(addr, &format!("/api/v1/alerts/{alert_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .patch(url(addr, &format!("/api/v1/alert-rules/{rule_id}")))
        .json(&json!({ "enabled": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let rule: Value = response.json().await.unwrap();
    assert_eq!(rule["enabled"], false);

    let rules: Value = client
        .get(url(addr, "/api/v1/alert-rules"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rules["count"], 1);

    let response = client
        .delete(url(addr, &format!("/api/v1/alert-rules/{rule_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = client
        .delete(url(addr, &format!("/api/v1/alert-rules/{rule_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let alert: Value = client
        .get(url(addr, &format!("/api/v1/alerts/{alert_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alert["status"], "resolved");

    let response = client
        .get(url(addr, "/api/v1/alerts/9999"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stats_endpoint() {
    let (_dir, _store, addr) = spawn_open_api().await;

    let response = reqwest::get(url(addr, "/api/v1/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert!(body["storage"].as_str().unwrap().starts_with("SQLite"));
    assert!(body.get("maintenance").is_none());
}

#[tokio::test]
async fn test_rule_for_unknown_server_is_bad_request() {
    let (_dir, _store, addr) = spawn_open_api().await;
    let client = reqwest::Client::new();

    let response = client
        .post(url(addr, "/api/v1/alert-rules"))
        .json(&json!({
            "server_id": 4242,
            "metric_type": "cpu",
            "threshold": 80.0,
            "comparison": ">"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("4242"));

    let rules: Value = client
        .get(url(addr, "/api/v1/alert-rules"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rules["count"], 0);
}

#[tokio::test]
async fn test_full_rule_update() {
    let (_dir, _store, addr) = spawn_open_api().await;
    let client = reqwest::Client::new();

    let rule: Value = client
        .post(url(addr, "/api/v1/alert-rules"))
        .json(&json!({ "metric_type": "cpu", "threshold": 80.0, "comparison": ">", "duration": 0 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let rule_path = format!("/api/v1/alert-rules/{}", rule["id"]);

    let response = client
        .put(url(addr, &rule_path))
        .json(&json!({ "threshold": 99.0, "comparison": ">=", "duration": 30 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["threshold"], 99.0);
    assert_eq!(updated["comparison"], ">=");
    assert_eq!(updated["duration"], 30);
    assert_eq!(updated["enabled"], true);

    // 95% no longer breaches the stricter rule
    let response = post_snapshot(&client, addr, &SnapshotBuilder::new("web-1").cpu(95.0)).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["alerts_triggered"], json!([]));

    for (body, status) in [
        (json!({}), StatusCode::BAD_REQUEST),
        (json!({ "comparison": "!=" }), StatusCode::BAD_REQUEST),
        (json!({ "metric_type": "disk" }), StatusCode::BAD_REQUEST),
    ] {
        let response = client
            .patch(url(addr, &rule_path))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), status, "{body}");
    }

    let response = client
        .put(url(addr, "/api/v1/alert-rules/9999"))
        .json(&json!({ "enabled": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_manual_alert_resolution() {
    let (_dir, _store, addr) = spawn_open_api().await;
    let client = reqwest::Client::new();

    client
        .post(url(addr, "/api/v1/alert-rules"))
        .json(&json!({ "metric_type": "cpu", "threshold": 80.0, "comparison": ">", "duration": 0 }))
        .send()
        .await
        .unwrap();
    let body: Value = post_snapshot(&client, addr, &SnapshotBuilder::new("web-1").cpu(95.0))
        .await
        .json()
        .await
        .unwrap();
    let alert_id = body["alerts_triggered"][0]["id"].as_i64().unwrap();

    let response = client
        .put(url(addr, &format!("/api/v1/alerts/{alert_id}/resolve")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let alert: Value = response.json().await.unwrap();
    assert_eq!(alert["status"], "resolved");
    assert!(alert["resolved_at"].is_string());

    // Still breaching: the rule fires again on the next sample
    let body: Value = post_snapshot(
        &client,
        addr,
        &SnapshotBuilder::new("web-1").at(60).cpu(96.0),
    )
    .await
    .json()
    .await
    .unwrap();
    assert_eq!(body["alerts_triggered"].as_array().unwrap().len(), 1);
    assert_ne!(body["alerts_triggered"][0]["id"], alert_id);

    let response = client
        .put(url(addr, "/api/v1/alerts/9999/resolve"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_server_update_and_delete() {
    let (_dir, _store, addr) = spawn_open_api().await;
    let client = reqwest::Client::new();
    post_snapshot(&client, addr, &SnapshotBuilder::new("web-1")).await;

    let response = client
        .put(url(addr, "/api/v1/servers/web-1"))
        .json(&json!({ "country": "NL", "region": "Noord-Holland", "city": "Amsterdam" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let server: Value = response.json().await.unwrap();
    assert_eq!(server["country"], "NL");
    assert_eq!(server["city"], "Amsterdam");

    let response = client
        .put(url(addr, "/api/v1/servers/web-1"))
        .json(&json!({ "hostname": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .put(url(addr, "/api/v1/servers/missing"))
        .json(&json!({ "city": "Paris" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .delete(url(addr, "/api/v1/servers/web-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = client
        .get(url(addr, "/api/v1/servers/web-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .delete(url(addr, "/api/v1/servers/web-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The next snapshot registers the server again
    let response = post_snapshot(&client, addr, &SnapshotBuilder::new("web-1").at(60)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_agent_config_endpoints() {
    let (_dir, _store, addr) = spawn_open_api().await;
    let client = reqwest::Client::new();
    let path = "/api/v1/servers/web-1/agent-config";

    let response = client.get(url(addr, path)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    post_snapshot(&client, addr, &SnapshotBuilder::new("web-1")).await;

    let config: Value = client
        .get(url(addr, path))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(config["update_interval"], 60);
    assert_eq!(config["send_to_api"], true);

    let response = client
        .put(url(addr, path))
        .json(&json!({ "update_interval": 15, "send_to_api": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let config: Value = client
        .get(url(addr, path))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(config["update_interval"], 15);
    assert_eq!(config["send_to_api"], false);
    assert_eq!(config["api_url"], Value::Null);

    let response = client
        .put(url(addr, path))
        .json(&json!({ "update_interval": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
