//! Integration tests for store housekeeping

use std::time::Duration;

use chrono::Utc;
use probewatch::{
    actors::{MaintenanceHandle, MaintenanceSettings},
    storage::{MetricType, ServerStatus, backend::QueryRange},
};

use crate::helpers::{SnapshotBuilder, T0, create_test_services};

#[tokio::test]
async fn test_stale_server_is_reactivated_by_next_snapshot() {
    let (_dir, ingest, query) = create_test_services().await;
    ingest
        .ingest_json(&SnapshotBuilder::new("web-1").bytes())
        .await
        .unwrap();

    let handle = MaintenanceHandle::spawn(
        ingest.store().clone(),
        MaintenanceSettings {
            interval: Duration::from_secs(3600),
            stale_after: chrono::Duration::minutes(5),
            retention: None,
        },
    );

    let report = handle.run_now().await.unwrap();
    assert_eq!(report.servers_marked_inactive, 1);
    let server = query.get_server("web-1").await.unwrap().unwrap();
    assert_eq!(server.status, ServerStatus::Inactive);

    ingest
        .ingest_json(&SnapshotBuilder::new("web-1").at(60).bytes())
        .await
        .unwrap();
    let server = query.get_server("web-1").await.unwrap().unwrap();
    assert_eq!(server.status, ServerStatus::Active);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_retention_keeps_alerts_and_servers() {
    let (_dir, ingest, query) = create_test_services().await;
    query
        .create_rule(&crate::helpers::cpu_rule(80.0, 0))
        .await
        .unwrap();

    let result = ingest
        .ingest_json(
            &SnapshotBuilder::new("web-1")
                .cpu(90.0)
                .disk("/dev/sda1", 10.0)
                .bytes(),
        )
        .await
        .unwrap();
    let alert_id = result.alerts_triggered[0].id;

    let handle = MaintenanceHandle::spawn(
        ingest.store().clone(),
        MaintenanceSettings {
            interval: Duration::from_secs(3600),
            stale_after: chrono::Duration::days(36_500),
            retention: Some(chrono::Duration::days(30)),
        },
    );

    let report = handle.run_now().await.unwrap();
    // cpu, memory and disk rows
    assert_eq!(report.samples_deleted, 3);

    let range = QueryRange {
        start: chrono::DateTime::from_timestamp(T0 - 60, 0).unwrap(),
        end: Utc::now(),
        limit: None,
    };
    let cpu = query
        .get_server_metrics("web-1", MetricType::Cpu, &range)
        .await
        .unwrap()
        .unwrap();
    assert!(cpu.is_empty());

    assert!(query.get_server("web-1").await.unwrap().is_some());
    assert!(query.get_alert(alert_id).await.unwrap().is_some());

    handle.shutdown().await;
}
