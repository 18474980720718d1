//! Read paths and administration
//!
//! Thin layer over the storage backend that resolves external server ids
//! and validates admin payloads (rules, server edits, agent configs) before
//! they reach storage.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::snapshot::ValidationError;
use crate::storage::backend::{AlertFilter, HealthStatus, Page, QueryRange, ServerFilter};
use crate::storage::schema::{
    AgentConfig, Alert, AlertId, AlertRuleId, MetricSeries, MetricType, NewAlertRule, RuleRecord,
    RuleUpdate, Server, ServerRecordId, ServerUpdate,
};
use crate::storage::{StorageBackend, StorageError};

#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn StorageBackend>,
}

impl QueryService {
    pub fn new(store: Arc<dyn StorageBackend>) -> Self {
        Self { store }
    }

    pub async fn list_servers(&self, filter: &ServerFilter, page: Page) -> Result<Vec<Server>> {
        Ok(self.store.list_servers(filter, page).await?)
    }

    pub async fn get_server(&self, server_id: &str) -> Result<Option<Server>> {
        Ok(self.store.find_server(server_id).await?)
    }

    /// Samples of one metric family for a server, `None` if the server is unknown
    #[instrument(skip(self))]
    pub async fn get_server_metrics(
        &self,
        server_id: &str,
        metric_type: MetricType,
        range: &QueryRange,
    ) -> Result<Option<MetricSeries>> {
        let Some(server) = self.store.find_server(server_id).await? else {
            debug!("unknown server {server_id}");
            return Ok(None);
        };

        let series = self
            .store
            .query_metrics(server.id, metric_type, range)
            .await?;
        Ok(Some(series))
    }

    pub async fn list_alerts(&self, filter: &AlertFilter, page: Page) -> Result<Vec<Alert>> {
        Ok(self.store.list_alerts(filter, page).await?)
    }

    pub async fn get_alert(&self, id: AlertId) -> Result<Option<Alert>> {
        Ok(self.store.get_alert(id).await?)
    }

    /// Resolve an alert now, `None` if the alert is unknown
    pub async fn resolve_alert(&self, id: AlertId) -> Result<Option<Alert>> {
        Ok(self.store.resolve_alert(id, Utc::now()).await?)
    }

    /// Edit a server's admin fields, `None` if the server is unknown
    #[instrument(skip(self))]
    pub async fn update_server(
        &self,
        server_id: &str,
        update: &ServerUpdate,
    ) -> Result<Option<Server>> {
        if update
            .hostname
            .as_deref()
            .is_some_and(|hostname| hostname.trim().is_empty())
        {
            return Err(ValidationError::EmptyName("hostname".to_string()).into());
        }

        let Some(server) = self.store.find_server(server_id).await? else {
            return Ok(None);
        };
        Ok(self.store.update_server(server.id, update).await?)
    }

    pub async fn delete_server(&self, server_id: &str) -> Result<bool> {
        let Some(server) = self.store.find_server(server_id).await? else {
            return Ok(false);
        };
        Ok(self.store.delete_server(server.id).await?)
    }

    /// Agent config of a server, the defaults if none was stored and `None`
    /// if the server is unknown
    pub async fn get_agent_config(&self, server_id: &str) -> Result<Option<AgentConfig>> {
        let Some(server) = self.store.find_server(server_id).await? else {
            return Ok(None);
        };
        let config = self.store.get_agent_config(server.id).await?;
        Ok(Some(config.unwrap_or_default()))
    }

    #[instrument(skip(self, config))]
    pub async fn set_agent_config(
        &self,
        server_id: &str,
        config: &AgentConfig,
    ) -> Result<Option<AgentConfig>> {
        if config.update_interval == 0 {
            return Err(ValidationError::InvalidValue {
                field: "update_interval",
                reason: "must be at least one second".to_string(),
            }
            .into());
        }
        if let Some(url) = &config.api_url {
            reqwest::Url::parse(url).map_err(|e| ValidationError::InvalidValue {
                field: "api_url",
                reason: e.to_string(),
            })?;
        }

        let Some(server) = self.store.find_server(server_id).await? else {
            return Ok(None);
        };
        Ok(Some(self.store.set_agent_config(server.id, config).await?))
    }

    pub async fn list_rules(&self) -> Result<Vec<RuleRecord>> {
        Ok(self.store.list_rules().await?)
    }

    #[instrument(skip(self))]
    pub async fn create_rule(&self, rule: &NewAlertRule) -> Result<RuleRecord> {
        check_threshold(rule.threshold)?;

        let Some(server) = rule.server_id else {
            return Ok(self.store.create_rule(rule).await?);
        };
        if self.store.get_server(server).await?.is_none() {
            return Err(unknown_rule_server(server).into());
        }

        match self.store.create_rule(rule).await {
            // the server was deleted after the lookup
            Err(StorageError::ConstraintViolation(_)) => Err(unknown_rule_server(server).into()),
            result => Ok(result?),
        }
    }

    /// Apply a partial update to a rule, `None` if the rule is unknown
    #[instrument(skip(self))]
    pub async fn update_rule(
        &self,
        id: AlertRuleId,
        update: &RuleUpdate,
    ) -> Result<Option<RuleRecord>> {
        if update.is_empty() {
            return Err(ValidationError::InvalidRule("update changes nothing".to_string()).into());
        }
        if let Some(threshold) = update.threshold {
            check_threshold(threshold)?;
        }

        Ok(self.store.update_rule(id, update).await?)
    }

    pub async fn set_rule_enabled(
        &self,
        id: AlertRuleId,
        enabled: bool,
    ) -> Result<Option<RuleRecord>> {
        self.update_rule(id, &RuleUpdate::enabled(enabled)).await
    }

    pub async fn delete_rule(&self, id: AlertRuleId) -> Result<bool> {
        Ok(self.store.delete_rule(id).await?)
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        Ok(self.store.health_check().await?)
    }

    pub async fn stats(&self) -> Result<String> {
        Ok(self.store.get_stats().await?)
    }
}

fn check_threshold(threshold: f64) -> std::result::Result<(), ValidationError> {
    if threshold.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::InvalidRule(format!(
            "threshold {threshold} is not a finite number"
        )))
    }
}

fn unknown_rule_server(server: ServerRecordId) -> ValidationError {
    ValidationError::InvalidRule(format!("unknown server record {server}"))
}
