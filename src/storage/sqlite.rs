//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `StorageBackend` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked by the writer
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Write serialization
//!
//! SQLite allows a single writer at a time. A deferred transaction that
//! reads first and writes later can fail with `SQLITE_BUSY` when another
//! writer commits in between, so every write transaction in this backend
//! goes through `write_gate`. Reads never take the gate.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use super::backend::{
    AlertFilter, HealthStatus, Ingested, Page, QueryRange, ServerFilter, StorageBackend,
    TransitionPlanner,
};
use super::error::{StorageError, StorageResult};
use super::schema::{
    AgentConfig, Alert, AlertId, AlertRuleId, AlertStatus, AlertTransition, AppliedTransitions,
    CpuSample, DiskSample, MemorySample, MetricSeries, MetricType, NetworkSample, NewAlertRule,
    RuleKey, RuleRecord, RuleStates, RuleUpdate, Server, ServerRecordId, ServerUpdate,
};
use crate::snapshot::Snapshot;

const SERVER_COLUMNS: &str = "id, server_id, hostname, ip_address, os, runtime_version, status, \
     timezone, country, region, city, created_at, updated_at, last_seen";

const RULE_COLUMNS: &str =
    "id, server_id, metric_type, threshold, comparison, duration, enabled, created_at, updated_at";

const ALERT_COLUMNS: &str = "id, server_id, alert_rule_id, metric_type, subject, metric_value, \
     threshold, status, triggered_at, resolved_at";

/// Escape `LIKE` wildcards so `pattern` matches literally (with `ESCAPE '\'`)
fn escape_like(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// SQLite storage backend
///
/// This backend stores servers, samples and alerts in a local SQLite
/// database file. It's ideal for small to medium deployments (1-100 servers).
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
    write_gate: Mutex<()>,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Configure SQLite (WAL mode, foreign keys, busy timeout)
    /// 3. Run migrations to create tables
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use probewatch::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./probewatch.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        info!("SQLite connection pool created");

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
            write_gate: Mutex::new(()),
        })
    }

    /// Helper to convert timestamp to Unix milliseconds for SQLite
    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    /// Helper to convert Unix milliseconds from SQLite to DateTime
    fn millis_to_timestamp(millis: i64) -> StorageResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| StorageError::CorruptValue(format!("timestamp {millis} out of range")))
    }

    fn optional_timestamp(millis: Option<i64>) -> StorageResult<Option<DateTime<Utc>>> {
        millis.map(Self::millis_to_timestamp).transpose()
    }

    fn server_from_row(row: &SqliteRow) -> StorageResult<Server> {
        let status: String = row.try_get("status")?;
        Ok(Server {
            id: row.try_get("id")?,
            server_id: row.try_get("server_id")?,
            hostname: row.try_get("hostname")?,
            ip_address: row.try_get("ip_address")?,
            os: row.try_get("os")?,
            runtime_version: row.try_get("runtime_version")?,
            status: status
                .parse()
                .map_err(|e| StorageError::CorruptValue(format!("{e}")))?,
            timezone: row.try_get("timezone")?,
            country: row.try_get("country")?,
            region: row.try_get("region")?,
            city: row.try_get("city")?,
            created_at: Self::millis_to_timestamp(row.try_get("created_at")?)?,
            updated_at: Self::millis_to_timestamp(row.try_get("updated_at")?)?,
            last_seen: Self::optional_timestamp(row.try_get("last_seen")?)?,
        })
    }

    fn rule_from_row(row: &SqliteRow) -> StorageResult<RuleRecord> {
        Ok(RuleRecord {
            id: row.try_get("id")?,
            server_id: row.try_get("server_id")?,
            metric_type: row.try_get("metric_type")?,
            threshold: row.try_get("threshold")?,
            comparison: row.try_get("comparison")?,
            duration: row.try_get("duration")?,
            enabled: row.try_get("enabled")?,
            created_at: Self::millis_to_timestamp(row.try_get("created_at")?)?,
            updated_at: Self::millis_to_timestamp(row.try_get("updated_at")?)?,
        })
    }

    fn alert_from_row(row: &SqliteRow) -> StorageResult<Alert> {
        let metric_type: String = row.try_get("metric_type")?;
        let status: String = row.try_get("status")?;
        Ok(Alert {
            id: row.try_get("id")?,
            server_id: row.try_get("server_id")?,
            alert_rule_id: row.try_get("alert_rule_id")?,
            metric_type: metric_type
                .parse()
                .map_err(|e| StorageError::CorruptValue(format!("{e}")))?,
            subject: row.try_get("subject")?,
            metric_value: row.try_get("metric_value")?,
            threshold: row.try_get("threshold")?,
            status: status
                .parse()
                .map_err(|e| StorageError::CorruptValue(format!("{e}")))?,
            triggered_at: Self::millis_to_timestamp(row.try_get("triggered_at")?)?,
            resolved_at: Self::optional_timestamp(row.try_get("resolved_at")?)?,
        })
    }

    fn agent_config_from_row(row: &SqliteRow) -> StorageResult<AgentConfig> {
        let update_interval: i64 = row.try_get("update_interval")?;
        Ok(AgentConfig {
            update_interval: u32::try_from(update_interval).map_err(|_| {
                StorageError::CorruptValue(format!("update interval {update_interval}"))
            })?,
            send_to_api: row.try_get("send_to_api")?,
            api_url: row.try_get("api_url")?,
            api_key: row.try_get("api_key")?,
        })
    }

    async fn count(&self, table: &str) -> StorageResult<i64> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Upsert the server and append the snapshot's samples on `conn`
    async fn write_snapshot(
        conn: &mut SqliteConnection,
        snapshot: &Snapshot,
    ) -> StorageResult<ServerRecordId> {
        let info = &snapshot.basic_info;
        let timestamp = Self::timestamp_to_millis(&info.timestamp);
        let now = Self::timestamp_to_millis(&Utc::now());

                let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM servers WHERE server_id = ?")
            .bind(&info.server_id)
            .fetch_optional(&mut *conn)
            .await?;

        let server = match existing {
            Some((id,)) => {
                sqlx::query(
                    r#"
                    UPDATE servers SET
                        hostname = ?,
                        ip_address = ?,
                        os = ?,
                        runtime_version = ?,
                        timezone = COALESCE(?, timezone),
                        status = CASE WHEN status = 'inactive' THEN 'active' ELSE status END,
                        last_seen = MAX(COALESCE(last_seen, 0), ?),
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&info.hostname)
                .bind(&info.ip_address)
                .bind(&info.os)
                .bind(&info.runtime_version)
                .bind(&info.timezone)
                .bind(timestamp)
                .bind(now)
                .bind(id)
                .execute(&mut *conn)
                .await?;

                trace!("updated server record {id}");
                id
            }
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO servers (
                        server_id, hostname, ip_address, os, runtime_version, status,
                        timezone, created_at, updated_at, last_seen
                    )
                    VALUES (?, ?, ?, ?, ?, 'active', ?, ?, ?, ?)
                    "#,
                )
                .bind(&info.server_id)
                .bind(&info.hostname)
                .bind(&info.ip_address)
                .bind(&info.os)
                .bind(&info.runtime_version)
                .bind(&info.timezone)
                .bind(now)
                .bind(now)
                .bind(timestamp)
                .execute(&mut *conn)
                .await?;

                let id = result.last_insert_rowid();
                info!("registered new server {} as record {id}", info.server_id);
                id
            }
        };

        sqlx::query("INSERT INTO cpu_samples (server_id, total_usage, timestamp) VALUES (?, ?, ?)")
            .bind(server)
            .bind(snapshot.cpu.total)
            .bind(timestamp)
            .execute(&mut *conn)
            .await?;

        let memory = &snapshot.memory;
        sqlx::query(
            r#"
            INSERT INTO memory_samples (
                server_id, total, used, free, buffers, cached, usage_percent, timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(server)
        .bind(memory.total as i64)
        .bind(memory.used as i64)
        .bind(memory.free as i64)
        .bind(memory.buffers.map(|v| v as i64))
        .bind(memory.cached.map(|v| v as i64))
        .bind(memory.usage_percent)
        .bind(timestamp)
        .execute(&mut *conn)
        .await?;

        let mut duplicates = 0;

        for disk in &snapshot.disks {
            let result = sqlx::query(
                r#"
                INSERT INTO disk_samples (
                    server_id, device, total, used, free, usage_percent, mount_point, timestamp
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (server_id, device, timestamp) DO NOTHING
                "#,
            )
            .bind(server)
            .bind(&disk.device)
            .bind(disk.total as i64)
            .bind(disk.used as i64)
            .bind(disk.free as i64)
            .bind(disk.usage_percent)
            .bind(&disk.mount_point)
            .bind(timestamp)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                duplicates += 1;
            }
        }

        for net in &snapshot.networks {
            let result = sqlx::query(
                r#"
                INSERT INTO network_samples (
                    server_id, interface, bytes_sent, bytes_received, packets_sent,
                    packets_received, errors_outgoing, errors_incoming, timestamp
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (server_id, interface, timestamp) DO NOTHING
                "#,
            )
            .bind(server)
            .bind(&net.interface)
            .bind(net.bytes_sent as i64)
            .bind(net.bytes_received as i64)
            .bind(net.packets_sent as i64)
            .bind(net.packets_received as i64)
            .bind(net.errors_outgoing as i64)
            .bind(net.errors_incoming as i64)
            .bind(timestamp)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                duplicates += 1;
            }
        }

        if duplicates > 0 {
            debug!("skipped {duplicates} already stored disk/network samples");
        }

        Ok(server)
    }

    async fn load_rules(
        conn: &mut SqliteConnection,
        server: ServerRecordId,
    ) -> StorageResult<Vec<RuleRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM alert_rules \
             WHERE enabled = 1 AND (server_id IS NULL OR server_id = ?) \
             ORDER BY id ASC"
        ))
        .bind(server)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(Self::rule_from_row).collect()
    }

    /// Breach timers, active alerts and last resolutions of a server
    async fn load_states(
        conn: &mut SqliteConnection,
        server: ServerRecordId,
    ) -> StorageResult<RuleStates> {
        let mut states = RuleStates::new();

        let breaches = sqlx::query(
            "SELECT alert_rule_id, subject, breach_started_at FROM rule_breaches WHERE server_id = ?",
        )
        .bind(server)
        .fetch_all(&mut *conn)
        .await?;

        for row in &breaches {
            let key = RuleKey::new(row.try_get("alert_rule_id")?, row.try_get::<String, _>("subject")?);
            states.entry(key).or_default().breach_started_at =
                Some(Self::millis_to_timestamp(row.try_get("breach_started_at")?)?);
        }

        let active = sqlx::query(
            "SELECT id, alert_rule_id, subject FROM alerts \
             WHERE server_id = ? AND status = 'active' AND alert_rule_id IS NOT NULL",
        )
        .bind(server)
        .fetch_all(&mut *conn)
        .await?;

        for row in &active {
            let key = RuleKey::new(row.try_get("alert_rule_id")?, row.try_get::<String, _>("subject")?);
            states.entry(key).or_default().active_alert = Some(row.try_get("id")?);
        }

        let resolved = sqlx::query(
            "SELECT alert_rule_id, subject, MAX(resolved_at) AS last_resolved FROM alerts \
             WHERE server_id = ? AND status = 'resolved' AND alert_rule_id IS NOT NULL \
             GROUP BY alert_rule_id, subject",
        )
        .bind(server)
        .fetch_all(&mut *conn)
        .await?;

        for row in &resolved {
            let key = RuleKey::new(row.try_get("alert_rule_id")?, row.try_get::<String, _>("subject")?);
            states.entry(key).or_default().last_resolved_at =
                Self::optional_timestamp(row.try_get("last_resolved")?)?;
        }

        trace!("loaded {} rule states", states.len());
        Ok(states)
    }

    async fn write_transitions(
        conn: &mut SqliteConnection,
        server: ServerRecordId,
        transitions: &[AlertTransition],
    ) -> StorageResult<AppliedTransitions> {
        let mut applied = AppliedTransitions::default();

        for transition in transitions {
            match transition {
                AlertTransition::StartBreach { key, at } => {
                    sqlx::query(
                        r#"
                        INSERT INTO rule_breaches (server_id, alert_rule_id, subject, breach_started_at)
                        VALUES (?, ?, ?, ?)
                        ON CONFLICT (server_id, alert_rule_id, subject) DO NOTHING
                        "#,
                    )
                    .bind(server)
                    .bind(key.rule_id)
                    .bind(&key.subject)
                    .bind(Self::timestamp_to_millis(at))
                    .execute(&mut *conn)
                    .await?;
                }

                AlertTransition::ClearBreach { key } => {
                    sqlx::query(
                        "DELETE FROM rule_breaches \
                         WHERE server_id = ? AND alert_rule_id = ? AND subject = ?",
                    )
                    .bind(server)
                    .bind(key.rule_id)
                    .bind(&key.subject)
                    .execute(&mut *conn)
                    .await?;
                }

                AlertTransition::Trigger(alert) => {
                    let id: Option<AlertId> = sqlx::query_scalar(
                        r#"
                        INSERT INTO alerts (
                            server_id, alert_rule_id, metric_type, subject, metric_value,
                            threshold, status, triggered_at
                        )
                        VALUES (?, ?, ?, ?, ?, ?, 'active', ?)
                        ON CONFLICT (server_id, alert_rule_id, subject) WHERE status = 'active'
                        DO NOTHING
                        RETURNING id
                        "#,
                    )
                    .bind(server)
                    .bind(alert.key.rule_id)
                    .bind(alert.metric_type.as_str())
                    .bind(&alert.key.subject)
                    .bind(alert.metric_value)
                    .bind(alert.threshold)
                    .bind(Self::timestamp_to_millis(&alert.triggered_at))
                    .fetch_optional(&mut *conn)
                    .await?;

                    sqlx::query(
                        "DELETE FROM rule_breaches \
                         WHERE server_id = ? AND alert_rule_id = ? AND subject = ?",
                    )
                    .bind(server)
                    .bind(alert.key.rule_id)
                    .bind(&alert.key.subject)
                    .execute(&mut *conn)
                    .await?;

                    match id {
                        Some(id) => applied.triggered.push(Alert {
                            id,
                            server_id: server,
                            alert_rule_id: Some(alert.key.rule_id),
                            metric_type: alert.metric_type,
                            subject: alert.key.subject.clone(),
                            metric_value: alert.metric_value,
                            threshold: alert.threshold,
                            status: AlertStatus::Active,
                            triggered_at: alert.triggered_at,
                            resolved_at: None,
                        }),
                        None => warn!(
                            "alert for rule {} ({:?}) already active, not opening another",
                            alert.key.rule_id, alert.key.subject
                        ),
                    }
                }

                AlertTransition::Resolve {
                    alert_id,
                    resolved_at,
                } => {
                    let row = sqlx::query(&format!(
                        "UPDATE alerts SET status = 'resolved', resolved_at = ? \
                         WHERE id = ? AND server_id = ? AND status = 'active' \
                         RETURNING {ALERT_COLUMNS}"
                    ))
                    .bind(Self::timestamp_to_millis(resolved_at))
                    .bind(alert_id)
                    .bind(server)
                    .fetch_optional(&mut *conn)
                    .await?;

                    match row {
                        Some(row) => applied.resolved.push(Self::alert_from_row(&row)?),
                        None => debug!("alert {alert_id} was no longer active"),
                    }
                }
            }
        }

        debug!(
            "applied transitions: {} triggered, {} resolved",
            applied.triggered.len(),
            applied.resolved.len()
        );
        Ok(applied)
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, snapshot), fields(server_id = %snapshot.server_id(), timestamp = %snapshot.timestamp()))]
    async fn persist(&self, snapshot: &Snapshot) -> StorageResult<ServerRecordId> {
        let _gate = self.write_gate.lock().await;

        // Dropping `tx` without commit rolls back everything below
        let mut tx = self.pool.begin().await?;
        let server = Self::write_snapshot(&mut tx, snapshot).await?;
        tx.commit().await?;

        debug!("snapshot persisted for server record {server}");
        Ok(server)
    }

    #[instrument(skip(self, snapshot, planner), fields(server_id = %snapshot.server_id(), timestamp = %snapshot.timestamp()))]
    async fn persist_and_evaluate(
        &self,
        snapshot: &Snapshot,
        planner: &dyn TransitionPlanner,
    ) -> StorageResult<Ingested> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        let server = Self::write_snapshot(&mut tx, snapshot).await?;

        let rules = Self::load_rules(&mut tx, server).await?;
        let applied = if rules.is_empty() {
            trace!("no enabled rules for server record {server}");
            AppliedTransitions::default()
        } else {
            let states = Self::load_states(&mut tx, server).await?;
            let transitions = planner.plan_transitions(server, rules, &states, snapshot);
            Self::write_transitions(&mut tx, server, &transitions).await?
        };

        tx.commit().await?;

        debug!("snapshot persisted and evaluated for server record {server}");
        Ok(Ingested { server, applied })
    }

    #[instrument(skip(self))]
    async fn find_server(&self, server_id: &str) -> StorageResult<Option<Server>> {
        let row = sqlx::query(&format!(
            "SELECT {SERVER_COLUMNS} FROM servers WHERE server_id = ?"
        ))
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::server_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn get_server(&self, id: ServerRecordId) -> StorageResult<Option<Server>> {
        let row = sqlx::query(&format!("SELECT {SERVER_COLUMNS} FROM servers WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::server_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list_servers(&self, filter: &ServerFilter, page: Page) -> StorageResult<Vec<Server>> {
        let rows = sqlx::query(&format!(
            "SELECT {SERVER_COLUMNS} FROM servers \
             WHERE (?1 IS NULL OR status = ?1) \
               AND (?2 IS NULL OR hostname LIKE '%' || ?2 || '%' ESCAPE '\\') \
             ORDER BY id ASC \
             LIMIT ?3 OFFSET ?4"
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.hostname.as_deref().map(escape_like))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::server_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn query_metrics(
        &self,
        server: ServerRecordId,
        metric_type: MetricType,
        range: &QueryRange,
    ) -> StorageResult<MetricSeries> {
        let start = Self::timestamp_to_millis(&range.start);
        let end = Self::timestamp_to_millis(&range.end);
        // LIMIT -1 means "no limit" in SQLite
        let limit = range.limit.map(|l| l as i64).unwrap_or(-1);

        debug!(
            "querying {metric_type} samples for server record {server} from {} to {}",
            range.start, range.end
        );

        let sql = |columns: &str, table: &str, order: &str| {
            format!(
                "SELECT {columns} FROM {table} \
                 WHERE server_id = ? AND timestamp >= ? AND timestamp <= ? \
                 ORDER BY {order} LIMIT ?"
            )
        };

        let query = match metric_type {
            MetricType::Cpu => sql("timestamp, total_usage", "cpu_samples", "timestamp ASC, id ASC"),
            MetricType::Memory => sql(
                "timestamp, total, used, free, buffers, cached, usage_percent",
                "memory_samples",
                "timestamp ASC, id ASC",
            ),
            MetricType::Disk => sql(
                "timestamp, device, total, used, free, usage_percent, mount_point",
                "disk_samples",
                "timestamp ASC, device ASC",
            ),
            MetricType::Network => sql(
                "timestamp, interface, bytes_sent, bytes_received, packets_sent, \
                 packets_received, errors_outgoing, errors_incoming",
                "network_samples",
                "timestamp ASC, interface ASC",
            ),
        };

        let rows = sqlx::query(&query)
            .bind(server)
            .bind(start)
            .bind(end)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let counter = |row: &SqliteRow, column: &str| -> StorageResult<u64> {
            Ok(row.try_get::<i64, _>(column)? as u64)
        };

        let series = match metric_type {
            MetricType::Cpu => MetricSeries::Cpu(
                rows.iter()
                    .map(|row| {
                        Ok(CpuSample {
                            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?)?,
                            total_usage: row.try_get("total_usage")?,
                        })
                    })
                    .collect::<StorageResult<_>>()?,
            ),
            MetricType::Memory => MetricSeries::Memory(
                rows.iter()
                    .map(|row| {
                        Ok(MemorySample {
                            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?)?,
                            total: counter(row, "total")?,
                            used: counter(row, "used")?,
                            free: counter(row, "free")?,
                            buffers: row.try_get::<Option<i64>, _>("buffers")?.map(|v| v as u64),
                            cached: row.try_get::<Option<i64>, _>("cached")?.map(|v| v as u64),
                            usage_percent: row.try_get("usage_percent")?,
                        })
                    })
                    .collect::<StorageResult<_>>()?,
            ),
            MetricType::Disk => MetricSeries::Disk(
                rows.iter()
                    .map(|row| {
                        Ok(DiskSample {
                            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?)?,
                            device: row.try_get("device")?,
                            total: counter(row, "total")?,
                            used: counter(row, "used")?,
                            free: counter(row, "free")?,
                            usage_percent: row.try_get("usage_percent")?,
                            mount_point: row.try_get("mount_point")?,
                        })
                    })
                    .collect::<StorageResult<_>>()?,
            ),
            MetricType::Network => MetricSeries::Network(
                rows.iter()
                    .map(|row| {
                        Ok(NetworkSample {
                            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?)?,
                            interface: row.try_get("interface")?,
                            bytes_sent: counter(row, "bytes_sent")?,
                            bytes_received: counter(row, "bytes_received")?,
                            packets_sent: counter(row, "packets_sent")?,
                            packets_received: counter(row, "packets_received")?,
                            errors_outgoing: counter(row, "errors_outgoing")?,
                            errors_incoming: counter(row, "errors_incoming")?,
                        })
                    })
                    .collect::<StorageResult<_>>()?,
            ),
        };

        debug!("query returned {} samples", series.len());
        Ok(series)
    }

    #[instrument(skip(self))]
    async fn list_alerts(&self, filter: &AlertFilter, page: Page) -> StorageResult<Vec<Alert>> {
        let rows = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts \
             WHERE (?1 IS NULL OR status = ?1) \
               AND (?2 IS NULL OR server_id = ?2) \
               AND (?3 IS NULL OR metric_type = ?3) \
             ORDER BY triggered_at DESC, id DESC \
             LIMIT ?4 OFFSET ?5"
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.server_id)
        .bind(filter.metric_type.map(|m| m.as_str()))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::alert_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn get_alert(&self, id: AlertId) -> StorageResult<Option<Alert>> {
        let row = sqlx::query(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::alert_from_row).transpose()
    }

    #[instrument(skip(self), fields(at = %resolved_at))]
    async fn resolve_alert(
        &self,
        id: AlertId,
        resolved_at: DateTime<Utc>,
    ) -> StorageResult<Option<Alert>> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        let resolved = sqlx::query(&format!(
            "UPDATE alerts SET status = 'resolved', resolved_at = ? \
             WHERE id = ? AND status = 'active' \
             RETURNING {ALERT_COLUMNS}"
        ))
        .bind(Self::timestamp_to_millis(&resolved_at))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let alert = match resolved {
            Some(row) => {
                info!("alert {id} resolved manually");
                Some(Self::alert_from_row(&row)?)
            }
            None => sqlx::query(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?"))
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .as_ref()
                .map(Self::alert_from_row)
                .transpose()?,
        };

        tx.commit().await?;
        Ok(alert)
    }

    #[instrument(skip(self, update))]
    async fn update_server(
        &self,
        id: ServerRecordId,
        update: &ServerUpdate,
    ) -> StorageResult<Option<Server>> {
        let _gate = self.write_gate.lock().await;

        let row = sqlx::query(&format!(
            "UPDATE servers SET \
                hostname = COALESCE(?1, hostname), \
                status = COALESCE(?2, status), \
                timezone = CASE WHEN ?3 IS NULL THEN timezone ELSE NULLIF(?3, '') END, \
                country = CASE WHEN ?4 IS NULL THEN country ELSE NULLIF(?4, '') END, \
                region = CASE WHEN ?5 IS NULL THEN region ELSE NULLIF(?5, '') END, \
                city = CASE WHEN ?6 IS NULL THEN city ELSE NULLIF(?6, '') END, \
                updated_at = ?7 \
             WHERE id = ?8 \
             RETURNING {SERVER_COLUMNS}"
        ))
        .bind(update.hostname.as_deref())
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.timezone.as_deref())
        .bind(update.country.as_deref())
        .bind(update.region.as_deref())
        .bind(update.city.as_deref())
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::server_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn delete_server(&self, id: ServerRecordId) -> StorageResult<bool> {
        let _gate = self.write_gate.lock().await;

        let deleted = sqlx::query("DELETE FROM servers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let found = deleted.rows_affected() > 0;
        if found {
            info!("deleted server record {id}");
        }
        Ok(found)
    }

    #[instrument(skip(self))]
    async fn get_agent_config(&self, server: ServerRecordId) -> StorageResult<Option<AgentConfig>> {
        let row = sqlx::query(
            "SELECT update_interval, send_to_api, api_url, api_key \
             FROM agent_configs WHERE server_id = ?",
        )
        .bind(server)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::agent_config_from_row).transpose()
    }

    #[instrument(skip(self, config))]
    async fn set_agent_config(
        &self,
        server: ServerRecordId,
        config: &AgentConfig,
    ) -> StorageResult<AgentConfig> {
        let _gate = self.write_gate.lock().await;
        let now = Self::timestamp_to_millis(&Utc::now());

        let row = sqlx::query(
            "INSERT INTO agent_configs \
                (server_id, update_interval, send_to_api, api_url, api_key, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
             ON CONFLICT (server_id) DO UPDATE SET \
                update_interval = excluded.update_interval, \
                send_to_api = excluded.send_to_api, \
                api_url = excluded.api_url, \
                api_key = excluded.api_key, \
                updated_at = excluded.updated_at \
             RETURNING update_interval, send_to_api, api_url, api_key",
        )
        .bind(server)
        .bind(i64::from(config.update_interval))
        .bind(config.send_to_api)
        .bind(config.api_url.as_deref())
        .bind(config.api_key.as_deref())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        debug!("stored agent config for server record {server}");
        Self::agent_config_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn list_rules(&self) -> StorageResult<Vec<RuleRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM alert_rules ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::rule_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn create_rule(&self, rule: &NewAlertRule) -> StorageResult<RuleRecord> {
        let _gate = self.write_gate.lock().await;
        let now = Self::timestamp_to_millis(&Utc::now());

        let row = sqlx::query(&format!(
            "INSERT INTO alert_rules \
                (server_id, metric_type, threshold, comparison, duration, enabled, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {RULE_COLUMNS}"
        ))
        .bind(rule.server_id)
        .bind(rule.metric_type.as_str())
        .bind(rule.threshold)
        .bind(rule.comparison.as_str())
        .bind(rule.duration as i64)
        .bind(rule.enabled)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let record = Self::rule_from_row(&row)?;
        info!(
            "created alert rule {}: {} {} {} for {}s",
            record.id, record.metric_type, record.comparison, record.threshold, record.duration
        );
        Ok(record)
    }

    #[instrument(skip(self, update))]
    async fn update_rule(
        &self,
        id: AlertRuleId,
        update: &RuleUpdate,
    ) -> StorageResult<Option<RuleRecord>> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "UPDATE alert_rules SET \
                threshold = COALESCE(?1, threshold), \
                comparison = COALESCE(?2, comparison), \
                duration = COALESCE(?3, duration), \
                enabled = COALESCE(?4, enabled), \
                updated_at = ?5 \
             WHERE id = ?6 \
             RETURNING {RULE_COLUMNS}"
        ))
        .bind(update.threshold)
        .bind(update.comparison.map(|c| c.as_str()))
        .bind(update.duration.map(i64::from))
        .bind(update.enabled)
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        if update.resets_breaches() {
            let cleared = sqlx::query("DELETE FROM rule_breaches WHERE alert_rule_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            debug!(
                "rule {id} changed, cleared {} breach timers",
                cleared.rows_affected()
            );
        }

        let record = Self::rule_from_row(&row)?;
        tx.commit().await?;

        info!(
            "updated alert rule {}: {} {} {} for {}s (enabled: {})",
            record.id,
            record.metric_type,
            record.comparison,
            record.threshold,
            record.duration,
            record.enabled
        );
        Ok(Some(record))
    }

    #[instrument(skip(self))]
    async fn delete_rule(&self, id: AlertRuleId) -> StorageResult<bool> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        let resolved = sqlx::query(
            "UPDATE alerts SET status = 'resolved', resolved_at = ? \
             WHERE alert_rule_id = ? AND status = 'active'",
        )
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM alert_rules WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let found = deleted.rows_affected() > 0;
        if found {
            info!(
                "deleted alert rule {id} (resolved {} active alerts)",
                resolved.rows_affected()
            );
        }
        Ok(found)
    }

    #[instrument(skip(self), fields(before = %last_seen_before))]
    async fn mark_stale_servers(&self, last_seen_before: DateTime<Utc>) -> StorageResult<usize> {
        let _gate = self.write_gate.lock().await;

        let result = sqlx::query(
            "UPDATE servers SET status = 'inactive', updated_at = ? \
             WHERE status = 'active' AND (last_seen IS NULL OR last_seen < ?)",
        )
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .bind(Self::timestamp_to_millis(&last_seen_before))
        .execute(&self.pool)
        .await?;

        let updated = result.rows_affected() as usize;
        if updated > 0 {
            info!("marked {updated} servers inactive");
        }
        Ok(updated)
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_samples(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let before_millis = Self::timestamp_to_millis(&before);

        info!("cleaning up samples older than {}", before);

        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut deleted = 0;
        for table in ["cpu_samples", "memory_samples", "disk_samples", "network_samples"] {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE timestamp < ?"))
                .bind(before_millis)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected() as usize;
        }

        tx.commit().await?;

        info!("deleted {} old samples", deleted);
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        // Simple ping query to verify connection
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let servers = self.count("servers").await?;

        let mut samples = 0;
        for table in ["cpu_samples", "memory_samples", "disk_samples", "network_samples"] {
            samples += self.count(table).await?;
        }

        let (active_alerts,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM alerts WHERE status = 'active'")
                .fetch_one(&self.pool)
                .await?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        let file_size_mb = file_size as f64 / 1_000_000.0;

        Ok(format!(
            "SQLite: {} servers, {} samples, {} active alerts, {:.2} MB on disk",
            servers, samples, active_alerts, file_size_mb
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
