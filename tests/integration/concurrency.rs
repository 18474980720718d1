//! Concurrency tests for the ingestion pipeline
//!
//! These tests verify that:
//! - Concurrent snapshots of one server never open duplicate alerts
//! - Snapshots of different servers are ingested side by side

use std::sync::Arc;

use futures::future::join_all;
use probewatch::storage::{
    AlertStatus,
    backend::{AlertFilter, Page, ServerFilter},
};

use crate::helpers::{SnapshotBuilder, cpu_rule, create_test_services};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_snapshots_open_a_single_alert() {
    let (_dir, ingest, query) = create_test_services().await;
    query.create_rule(&cpu_rule(80.0, 0)).await.unwrap();
    let ingest = Arc::new(ingest);

    let tasks = (0..16).map(|i| {
        let ingest = ingest.clone();
        tokio::spawn(async move {
            let snapshot = SnapshotBuilder::new("web-1").at(i).cpu(95.0);
            ingest.ingest_json(&snapshot.bytes()).await
        })
    });

    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let triggered: usize = results.iter().map(|r| r.alerts_triggered.len()).sum();
    assert_eq!(triggered, 1);

    let active = query
        .list_alerts(
            &AlertFilter {
                status: Some(AlertStatus::Active),
                ..Default::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_servers_ingest_in_parallel() {
    let (_dir, ingest, query) = create_test_services().await;
    query.create_rule(&cpu_rule(80.0, 0)).await.unwrap();
    let ingest = Arc::new(ingest);

    let tasks = (0..20).map(|i| {
        let ingest = ingest.clone();
        tokio::spawn(async move {
            let server_id = format!("node-{i:02}");
            for offset in 0..3 {
                let snapshot = SnapshotBuilder::new(&server_id)
                    .at(offset * 60)
                    .cpu(90.0)
                    .disk("/dev/sda1", 50.0);
                ingest.ingest_json(&snapshot.bytes()).await.unwrap();
            }
        })
    });

    for joined in join_all(tasks).await {
        joined.unwrap();
    }

    let servers = query
        .list_servers(&ServerFilter::default(), Page::new(1, 100))
        .await
        .unwrap();
    assert_eq!(servers.len(), 20);

    let alerts = query
        .list_alerts(&AlertFilter::default(), Page::new(1, 100))
        .await
        .unwrap();
    assert_eq!(alerts.len(), 20);
}
