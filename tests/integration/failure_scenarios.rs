//! Failure scenario tests
//!
//! These tests verify that:
//! - Invalid snapshots are rejected before touching storage
//! - Storage failures surface as storage errors, not validation errors
//! - A failure while evaluating alerts leaves none of the snapshot behind
//! - Hand-edited rule rows are skipped instead of failing ingestion

use assert_matches::assert_matches;
use probewatch::{
    Error, ValidationError,
    storage::backend::{Page, ServerFilter},
};

use crate::helpers::{SnapshotBuilder, cpu_rule, create_test_services, execute_sql};

#[tokio::test]
async fn test_malformed_json_is_rejected() {
    let (_dir, ingest, query) = create_test_services().await;

    let result = ingest.ingest_json(b"{\"basic_info\": ").await;
    assert_matches!(result, Err(Error::Validation(ValidationError::Malformed(_))));

    let servers = query
        .list_servers(&ServerFilter::default(), Page::default())
        .await
        .unwrap();
    assert!(servers.is_empty());
}

#[tokio::test]
async fn test_missing_server_id_is_rejected() {
    let (_dir, ingest, _query) = create_test_services().await;

    let mut snapshot = SnapshotBuilder::new("web-1").json();
    snapshot["basic_info"]
        .as_object_mut()
        .unwrap()
        .remove("server_id");

    let result = ingest
        .ingest_json(&serde_json::to_vec(&snapshot).unwrap())
        .await;
    assert_matches!(
        result,
        Err(Error::Validation(ValidationError::MissingField(
            "basic_info.server_id"
        )))
    );
}

#[tokio::test]
async fn test_negative_and_non_numeric_values_are_rejected() {
    let (_dir, ingest, query) = create_test_services().await;

    let negative = SnapshotBuilder::new("web-1").cpu(-5.0);
    let result = ingest.ingest_json(&negative.bytes()).await;
    assert_matches!(
        result,
        Err(Error::Validation(ValidationError::Negative { .. }))
    );

    let mut snapshot = SnapshotBuilder::new("web-1").json();
    snapshot["memory"]["used"] = serde_json::json!("lots");
    let result = ingest
        .ingest_json(&serde_json::to_vec(&snapshot).unwrap())
        .await;
    assert!(result.unwrap_err().is_validation());

    assert!(query.get_server("web-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_closed_storage_is_a_storage_error() {
    let (_dir, ingest, _query) = create_test_services().await;
    ingest.store().close().await.unwrap();

    let result = ingest
        .ingest_json(&SnapshotBuilder::new("web-1").bytes())
        .await;
    assert_matches!(result, Err(Error::Storage(_)));
}

#[tokio::test]
async fn test_health_reports_closed_storage() {
    let (_dir, ingest, query) = create_test_services().await;
    assert!(query.health().await.unwrap().healthy);

    ingest.store().close().await.unwrap();

    let health = query.health().await.unwrap();
    assert!(!health.healthy);
}

#[tokio::test]
async fn test_failed_alert_evaluation_leaves_no_samples() {
    let (dir, ingest, query) = create_test_services().await;
    query.create_rule(&cpu_rule(80.0, 0)).await.unwrap();
    execute_sql(&dir, "DROP TABLE rule_breaches").await;

    let snapshot = SnapshotBuilder::new("web-1").cpu(95.0).bytes();
    let result = ingest.ingest_json(&snapshot).await;
    assert_matches!(result, Err(Error::Storage(_)));

    assert!(query.get_server("web-1").await.unwrap().is_none());
    let stats = query.stats().await.unwrap();
    assert!(stats.contains("0 servers, 0 samples"), "{stats}");
}

#[tokio::test]
async fn test_rule_with_out_of_range_duration_is_skipped() {
    let (dir, ingest, query) = create_test_services().await;
    let broken = query.create_rule(&cpu_rule(80.0, 0)).await.unwrap();
    let working = query.create_rule(&cpu_rule(90.0, 0)).await.unwrap();
    execute_sql(
        &dir,
        &format!(
            "UPDATE alert_rules SET duration = 100000000000000000 WHERE id = {}",
            broken.id
        ),
    )
    .await;

    let result = ingest
        .ingest_json(&SnapshotBuilder::new("web-1").cpu(95.0).bytes())
        .await
        .unwrap();

    assert_eq!(result.alerts_triggered.len(), 1);
    assert_eq!(result.alerts_triggered[0].alert_rule_id, Some(working.id));
}
