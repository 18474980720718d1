//! Integration tests for the alert lifecycle
//!
//! These tests verify that:
//! - An alert opens only after the breach held for the rule's duration
//! - An open alert resolves once, when the value recovers
//! - Server-specific rules shadow global rules of the same metric
//! - Rule administration (disable, delete) keeps history consistent

use assert_matches::assert_matches;
use chrono::Duration;
use pretty_assertions::assert_eq;
use probewatch::{
    alerts::AlertPolicy,
    storage::{
        AlertStatus, MetricType, NewAlertRule,
        backend::{AlertFilter, Page},
    },
};

use crate::helpers::{
    SnapshotBuilder, T0, cpu_rule, create_service, create_test_services, create_test_store,
    disk_rule,
};

fn active() -> AlertFilter {
    AlertFilter {
        status: Some(AlertStatus::Active),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_alert_opens_after_duration_and_resolves_once() {
    let (_dir, ingest, query) = create_test_services().await;
    query.create_rule(&cpu_rule(80.0, 60)).await.unwrap();

    let feed = |offset: i64, cpu: f64| SnapshotBuilder::new("web-1").at(offset).cpu(cpu).bytes();

    let result = ingest.ingest_json(&feed(0, 90.0)).await.unwrap();
    assert!(result.alerts_triggered.is_empty());

    let result = ingest.ingest_json(&feed(30, 95.0)).await.unwrap();
    assert!(result.alerts_triggered.is_empty());

    let result = ingest.ingest_json(&feed(60, 92.0)).await.unwrap();
    assert_eq!(result.alerts_triggered.len(), 1);
    let alert = &result.alerts_triggered[0];
    assert_eq!(alert.metric_type, MetricType::Cpu);
    assert_eq!(alert.metric_value, 92.0);
    assert_eq!(alert.threshold, 80.0);
    assert_eq!(alert.status, AlertStatus::Active);
    assert_eq!(alert.triggered_at.timestamp(), T0 + 60);

    // Still breaching: nothing new
    let result = ingest.ingest_json(&feed(90, 93.0)).await.unwrap();
    assert!(result.alerts_triggered.is_empty());
    assert!(result.alerts_resolved.is_empty());

    let result = ingest.ingest_json(&feed(120, 20.0)).await.unwrap();
    assert_eq!(result.alerts_resolved.len(), 1);
    let resolved = &result.alerts_resolved[0];
    assert_eq!(resolved.id, alert.id);
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert_eq!(resolved.resolved_at.map(|t| t.timestamp()), Some(T0 + 120));

    let result = ingest.ingest_json(&feed(150, 10.0)).await.unwrap();
    assert!(result.alerts_resolved.is_empty());

    let all = query
        .list_alerts(&AlertFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    assert!(query.list_alerts(&active(), Page::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dip_below_threshold_restarts_breach_timer() {
    let (_dir, ingest, query) = create_test_services().await;
    query.create_rule(&cpu_rule(80.0, 60)).await.unwrap();

    for (offset, cpu) in [(0, 90.0), (40, 50.0), (70, 90.0), (100, 90.0)] {
        let snapshot = SnapshotBuilder::new("web-1").at(offset).cpu(cpu);
        let result = ingest.ingest_json(&snapshot.bytes()).await.unwrap();
        assert!(
            result.alerts_triggered.is_empty(),
            "unexpected alert at +{offset}s"
        );
    }

    let snapshot = SnapshotBuilder::new("web-1").at(130).cpu(90.0);
    let result = ingest.ingest_json(&snapshot.bytes()).await.unwrap();
    assert_eq!(result.alerts_triggered.len(), 1);
}

#[tokio::test]
async fn test_devices_are_tracked_independently() {
    let (_dir, ingest, query) = create_test_services().await;
    query.create_rule(&disk_rule(90.0, 0)).await.unwrap();

    let snapshot = SnapshotBuilder::new("web-1")
        .disk("/dev/sda1", 95.0)
        .disk("/dev/sdb1", 40.0);
    let result = ingest.ingest_json(&snapshot.bytes()).await.unwrap();
    assert_eq!(result.alerts_triggered.len(), 1);
    assert_eq!(result.alerts_triggered[0].subject, "/dev/sda1");

    let snapshot = SnapshotBuilder::new("web-1")
        .at(60)
        .disk("/dev/sda1", 96.0)
        .disk("/dev/sdb1", 97.0);
    let result = ingest.ingest_json(&snapshot.bytes()).await.unwrap();
    assert_eq!(result.alerts_triggered.len(), 1);
    assert_eq!(result.alerts_triggered[0].subject, "/dev/sdb1");

    let open = query.list_alerts(&active(), Page::default()).await.unwrap();
    assert_eq!(open.len(), 2);
}

#[tokio::test]
async fn test_server_rule_shadows_global_rule() {
    let (_dir, ingest, query) = create_test_services().await;

    let web1 = ingest
        .ingest_json(&SnapshotBuilder::new("web-1").bytes())
        .await
        .unwrap()
        .server_record_id;

    query.create_rule(&cpu_rule(80.0, 0)).await.unwrap();
    query
        .create_rule(&NewAlertRule {
            server_id: Some(web1),
            ..cpu_rule(95.0, 0)
        })
        .await
        .unwrap();

    let result = ingest
        .ingest_json(&SnapshotBuilder::new("web-1").at(60).cpu(90.0).bytes())
        .await
        .unwrap();
    assert!(result.alerts_triggered.is_empty());

    let result = ingest
        .ingest_json(&SnapshotBuilder::new("web-2").at(60).cpu(90.0).bytes())
        .await
        .unwrap();
    assert_eq!(result.alerts_triggered.len(), 1);
    assert_eq!(result.alerts_triggered[0].threshold, 80.0);

    let result = ingest
        .ingest_json(&SnapshotBuilder::new("web-1").at(120).cpu(99.0).bytes())
        .await
        .unwrap();
    assert_eq!(result.alerts_triggered.len(), 1);
    assert_eq!(result.alerts_triggered[0].threshold, 95.0);
}

#[tokio::test]
async fn test_cooldown_delays_next_alert() {
    let (_dir, store) = create_test_store().await;
    let query = probewatch::QueryService::new(store.clone());
    let ingest = create_service(
        store,
        AlertPolicy {
            cooldown: Duration::seconds(120),
        },
    );
    query.create_rule(&cpu_rule(80.0, 0)).await.unwrap();

    let feed = |offset: i64, cpu: f64| SnapshotBuilder::new("web-1").at(offset).cpu(cpu).bytes();

    assert_eq!(ingest.ingest_json(&feed(0, 90.0)).await.unwrap().alerts_triggered.len(), 1);
    assert_eq!(ingest.ingest_json(&feed(10, 10.0)).await.unwrap().alerts_resolved.len(), 1);
    assert!(ingest.ingest_json(&feed(20, 90.0)).await.unwrap().alerts_triggered.is_empty());
    assert!(ingest.ingest_json(&feed(100, 90.0)).await.unwrap().alerts_triggered.is_empty());
    assert_eq!(ingest.ingest_json(&feed(130, 90.0)).await.unwrap().alerts_triggered.len(), 1);
}

#[tokio::test]
async fn test_disabling_rule_discards_breach_timer() {
    let (_dir, ingest, query) = create_test_services().await;
    let rule = query.create_rule(&cpu_rule(80.0, 60)).await.unwrap();

    let feed = |offset: i64| SnapshotBuilder::new("web-1").at(offset).cpu(90.0).bytes();

    ingest.ingest_json(&feed(0)).await.unwrap();

    query.set_rule_enabled(rule.id, false).await.unwrap();
    let result = ingest.ingest_json(&feed(30)).await.unwrap();
    assert!(result.alerts_triggered.is_empty());
    query.set_rule_enabled(rule.id, true).await.unwrap();

    // Timer restarts at +60 instead of continuing from +0
    let result = ingest.ingest_json(&feed(60)).await.unwrap();
    assert!(result.alerts_triggered.is_empty());

    let result = ingest.ingest_json(&feed(120)).await.unwrap();
    assert_eq!(result.alerts_triggered.len(), 1);
}

#[tokio::test]
async fn test_deleting_rule_resolves_and_keeps_history() {
    let (_dir, ingest, query) = create_test_services().await;
    let rule = query.create_rule(&cpu_rule(80.0, 0)).await.unwrap();

    let result = ingest
        .ingest_json(&SnapshotBuilder::new("web-1").cpu(90.0).bytes())
        .await
        .unwrap();
    let alert_id = result.alerts_triggered[0].id;

    assert!(query.delete_rule(rule.id).await.unwrap());
    assert!(!query.delete_rule(rule.id).await.unwrap());

    let alert = query.get_alert(alert_id).await.unwrap().unwrap();
    assert_eq!(alert.status, AlertStatus::Resolved);
    assert_matches!(alert.alert_rule_id, None);
    assert!(alert.resolved_at.is_some());

    // No rule left, nothing opens
    let result = ingest
        .ingest_json(&SnapshotBuilder::new("web-1").at(60).cpu(99.0).bytes())
        .await
        .unwrap();
    assert!(result.alerts_triggered.is_empty());
}

#[tokio::test]
async fn test_alerts_filtered_by_metric_and_server() {
    let (_dir, ingest, query) = create_test_services().await;
    query.create_rule(&cpu_rule(80.0, 0)).await.unwrap();
    query.create_rule(&disk_rule(90.0, 0)).await.unwrap();

    let web1 = ingest
        .ingest_json(
            &SnapshotBuilder::new("web-1")
                .cpu(85.0)
                .disk("/dev/sda1", 99.0)
                .bytes(),
        )
        .await
        .unwrap();
    ingest
        .ingest_json(&SnapshotBuilder::new("web-2").cpu(85.0).bytes())
        .await
        .unwrap();

    let disk_alerts = query
        .list_alerts(
            &AlertFilter {
                metric_type: Some(MetricType::Disk),
                ..Default::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(disk_alerts.len(), 1);

    let web1_alerts = query
        .list_alerts(
            &AlertFilter {
                server_id: Some(web1.server_record_id),
                ..Default::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(web1_alerts.len(), 2);
    assert!(
        web1_alerts
            .iter()
            .all(|a| a.server_id == web1.server_record_id)
    );
}
