use crate::config::ConnectionConfig;
use crate::coordinator::DataSource;
use crate::error::{with_timeout, Result};
use crate::models::SiteSnapshot;
use crate::transport::{self, BearerToken};
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;

const SERVICE: &str = "Ntuity cloud";

/// Client for the Ntuity cloud API of one site
#[derive(Debug, Clone)]
pub struct CloudApi {
    base_url: Url,
    site_id: String,
    token: BearerToken,
    client: reqwest::Client,
    timeout: Duration,
}

impl CloudApi {
    pub fn new(
        base_url: impl Into<String>,
        site_id: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            base_url: transport::parse_base_url(&base_url.into(), SERVICE)?,
            site_id: site_id.into(),
            token: BearerToken::new(token),
            client: transport::build_client()?,
            timeout,
        })
    }

    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        Self::new(
            config.cloud_base_url.clone(),
            config.site_id.clone(),
            config.cloud_token.clone(),
            config.timeouts.cloud,
        )
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// Replaces the bearer token used for all following requests
    pub fn set_token(&self, token: impl Into<String>) {
        self.token.set(token);
    }

    async fn get(&self, segments: &[&str]) -> Result<Value> {
        let url = transport::endpoint(&self.base_url, segments);
        let request = self.client.get(url.clone()).bearer_auth(self.token.get());
        let response = transport::send(request, url.as_str(), SERVICE).await?;
        transport::read_json(response, url.as_str()).await
    }

    /// General site info (tariffs, address, ...)
    pub async fn read_site(&self) -> Result<Value> {
        self.get(&["sites", self.site_id.as_str()]).await
    }

    pub async fn read_energy_flow(&self) -> Result<Value> {
        self.get(&["sites", self.site_id.as_str(), "energy-flow", "latest"])
            .await
    }

    /// Reads site info and the latest energy flow under one shared deadline
    pub async fn read_snapshot(&self) -> Result<SiteSnapshot> {
        with_timeout("Ntuity cloud update", self.timeout, async {
            let site = self.read_site().await?;
            let flow = self.read_energy_flow().await?;
            Ok(SiteSnapshot { site, flow })
        })
        .await
    }
}

impl DataSource for CloudApi {
    type Data = SiteSnapshot;

    async fn fetch(&self) -> Result<SiteSnapshot> {
        self.read_snapshot().await
    }
}
