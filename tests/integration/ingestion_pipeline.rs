//! Integration tests for snapshot ingestion
//!
//! These tests verify that:
//! - A snapshot registers its server and stores every metric family
//! - Resending a snapshot does not duplicate per-device rows
//! - Server metadata follows the latest snapshot

use chrono::DateTime;
use pretty_assertions::assert_eq;
use probewatch::storage::{
    MetricSeries, MetricType, ServerStatus,
    backend::{Page, QueryRange, ServerFilter},
};

use crate::helpers::{SnapshotBuilder, T0, create_test_services};

fn whole_day() -> QueryRange {
    QueryRange {
        start: DateTime::from_timestamp(T0 - 3600, 0).unwrap(),
        end: DateTime::from_timestamp(T0 + 86_400, 0).unwrap(),
        limit: None,
    }
}

#[tokio::test]
async fn test_snapshot_is_stored_across_all_families() {
    let (_dir, ingest, query) = create_test_services().await;

    let snapshot = SnapshotBuilder::new("web-1")
        .cpu(37.5)
        .memory(61.0)
        .disk("/dev/sda1", 72.0)
        .disk("/dev/sdb1", 12.0)
        .network("eth0", 1_000, 2_000);

    let result = ingest.ingest_json(&snapshot.bytes()).await.unwrap();
    assert!(result.alerts_triggered.is_empty());
    assert!(result.alerts_resolved.is_empty());

    let server = query.get_server("web-1").await.unwrap().unwrap();
    assert_eq!(server.id, result.server_record_id);
    assert_eq!(server.hostname, "web-1.example.com");
    assert_eq!(server.runtime_version, "8.3.1");
    assert_eq!(server.status, ServerStatus::Active);
    assert_eq!(server.last_seen.map(|t| t.timestamp()), Some(T0));

    let cpu = query
        .get_server_metrics("web-1", MetricType::Cpu, &whole_day())
        .await
        .unwrap()
        .unwrap();
    match cpu {
        MetricSeries::Cpu(samples) => {
            assert_eq!(samples.len(), 1);
            assert_eq!(samples[0].total_usage, 37.5);
        }
        other => panic!("unexpected series: {other:?}"),
    }

    let disks = query
        .get_server_metrics("web-1", MetricType::Disk, &whole_day())
        .await
        .unwrap()
        .unwrap();
    match disks {
        MetricSeries::Disk(samples) => {
            let devices: Vec<_> = samples.iter().map(|s| s.device.as_str()).collect();
            assert_eq!(devices, vec!["/dev/sda1", "/dev/sdb1"]);
        }
        other => panic!("unexpected series: {other:?}"),
    }

    let network = query
        .get_server_metrics("web-1", MetricType::Network, &whole_day())
        .await
        .unwrap()
        .unwrap();
    match network {
        MetricSeries::Network(samples) => {
            assert_eq!(samples.len(), 1);
            assert_eq!(samples[0].bytes_sent, 1_000);
            assert_eq!(samples[0].bytes_received, 2_000);
        }
        other => panic!("unexpected series: {other:?}"),
    }
}

#[tokio::test]
async fn test_resend_keeps_one_row_per_device() {
    let (_dir, ingest, query) = create_test_services().await;
    let snapshot = SnapshotBuilder::new("web-1")
        .disk("/dev/sda1", 50.0)
        .network("eth0", 10, 20);

    let first = ingest.ingest_json(&snapshot.bytes()).await.unwrap();
    let second = ingest.ingest_json(&snapshot.bytes()).await.unwrap();
    assert_eq!(first.server_record_id, second.server_record_id);

    let disks = query
        .get_server_metrics("web-1", MetricType::Disk, &whole_day())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(disks.len(), 1);

    let network = query
        .get_server_metrics("web-1", MetricType::Network, &whole_day())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(network.len(), 1);
}

#[tokio::test]
async fn test_samples_are_returned_in_time_order_within_range() {
    let (_dir, ingest, query) = create_test_services().await;

    for (offset, usage) in [(120, 30.0), (0, 10.0), (60, 20.0), (600, 90.0)] {
        let snapshot = SnapshotBuilder::new("web-1").at(offset).cpu(usage);
        ingest.ingest_json(&snapshot.bytes()).await.unwrap();
    }

    let range = QueryRange {
        start: DateTime::from_timestamp(T0, 0).unwrap(),
        end: DateTime::from_timestamp(T0 + 120, 0).unwrap(),
        limit: None,
    };
    let series = query
        .get_server_metrics("web-1", MetricType::Cpu, &range)
        .await
        .unwrap()
        .unwrap();

    match series {
        MetricSeries::Cpu(samples) => {
            let values: Vec<f64> = samples.iter().map(|s| s.total_usage).collect();
            assert_eq!(values, vec![10.0, 20.0, 30.0]);
        }
        other => panic!("unexpected series: {other:?}"),
    }

    let limited = QueryRange {
        limit: Some(2),
        ..range
    };
    let series = query
        .get_server_metrics("web-1", MetricType::Cpu, &limited)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(series.len(), 2);
}

#[tokio::test]
async fn test_last_seen_never_moves_backwards() {
    let (_dir, ingest, query) = create_test_services().await;

    let late = SnapshotBuilder::new("web-1").at(300);
    let early = SnapshotBuilder::new("web-1").at(100);
    ingest.ingest_json(&late.bytes()).await.unwrap();
    ingest.ingest_json(&early.bytes()).await.unwrap();

    let server = query.get_server("web-1").await.unwrap().unwrap();
    assert_eq!(server.last_seen.map(|t| t.timestamp()), Some(T0 + 300));
}

#[tokio::test]
async fn test_servers_are_listed_once_each() {
    let (_dir, ingest, query) = create_test_services().await;

    for server_id in ["db-1", "web-1", "web-2"] {
        for offset in [0, 60] {
            let snapshot = SnapshotBuilder::new(server_id).at(offset);
            ingest.ingest_json(&snapshot.bytes()).await.unwrap();
        }
    }

    let servers = query
        .list_servers(&ServerFilter::default(), Page::default())
        .await
        .unwrap();
    let ids: Vec<_> = servers.iter().map(|s| s.server_id.as_str()).collect();
    assert_eq!(ids, vec!["db-1", "web-1", "web-2"]);

    let second_page = query
        .list_servers(&ServerFilter::default(), Page::new(2, 2))
        .await
        .unwrap();
    assert_eq!(second_page.len(), 1);
    assert_eq!(second_page[0].server_id, "web-2");
}
