use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, instrument};

use crate::ingest::IngestResult;
use crate::snapshot::RawSnapshot;
use crate::storage::schema::AgentConfig;

const METRICS_PATH: &str = "/api/v1/metrics";

/// Pushes snapshots to the hub's ingestion endpoint and fetches the
/// collection settings the hub keeps for this server
#[derive(Debug, Clone)]
pub struct HubClient {
    client: Client,
    base_url: String,
    endpoint: String,
    api_key: Option<String>,
}

impl HubClient {
    pub fn new(hub_url: &str, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        let base_url = hub_url.trim_end_matches('/').to_string();
        Ok(Self {
            client,
            endpoint: format!("{base_url}{METRICS_PATH}"),
            base_url,
            api_key,
        })
    }

    fn config_url(&self, server_id: &str) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("invalid hub url `{}`", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("hub url `{}` cannot take a path", self.base_url))?
            .pop_if_empty()
            .extend(["api", "v1", "servers", server_id, "agent-config"]);
        Ok(url)
    }

    /// Agent config stored on the hub, `None` while the hub does not know
    /// this server yet
    #[instrument(skip(self))]
    pub async fn fetch_config(&self, server_id: &str) -> anyhow::Result<Option<AgentConfig>> {
        let mut request = self.client.get(self.config_url(server_id)?);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("request to hub failed")?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            debug!("hub has no record of {server_id} yet");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("hub refused agent config with {status}: {body}");
        }

        let config = response
            .json()
            .await
            .context("hub sent an unreadable agent config")?;
        Ok(Some(config))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    pub async fn push(&self, snapshot: &RawSnapshot) -> anyhow::Result<IngestResult> {
        let mut request = self.client.post(&self.endpoint).json(snapshot);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("request to hub failed")?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("hub rejected snapshot with {status}: {body}");
        }

        let result: IngestResult = response
            .json()
            .await
            .context("hub sent an unreadable response")?;

        debug!(
            "snapshot accepted as server record {}",
            result.server_record_id
        );
        Ok(result)
    }
}
