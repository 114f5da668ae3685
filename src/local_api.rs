use crate::config::{ConnectionConfig, Timeouts};
use crate::error::{with_timeout, Result};
use crate::models::{
    Command, DataPointValue, SiteConfiguration, SiteStatePayload, ThingStatesPayload,
};
use crate::transport::{self, BearerToken};
use reqwest::Url;
use serde::de::DeserializeOwned;

const SERVICE: &str = "BEAAM gateway";

/// Client for the local BEAAM gateway API.
///
/// Cloning is cheap and shares the underlying session and key, so per-device
/// requests can run on their own tasks.
#[derive(Debug, Clone)]
pub struct LocalApi {
    base_url: Url,
    key: BearerToken,
    client: reqwest::Client,
    timeouts: Timeouts,
}

impl LocalApi {
    pub fn new(base_url: impl Into<String>, key: impl Into<String>, timeouts: Timeouts) -> Result<Self> {
        Ok(Self {
            base_url: transport::parse_base_url(&base_url.into(), SERVICE)?,
            key: BearerToken::new(key),
            client: transport::build_client()?,
            timeouts,
        })
    }

    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        Self::new(
            config.gateway_url(),
            config.gateway_key.clone(),
            config.timeouts,
        )
    }

    /// Replaces the API key used for all following requests
    pub fn set_key(&self, key: impl Into<String>) {
        self.key.set(key);
    }

    fn url(&self, segments: &[&str]) -> Url {
        transport::endpoint(&self.base_url, segments)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let request = self.client.get(url.clone()).bearer_auth(self.key.get());
        let response = transport::send(request, url.as_str(), SERVICE).await?;
        transport::read_json(response, url.as_str()).await
    }

    /// Device structure of the site. Changes only when the installation does.
    pub async fn read_configuration(&self) -> Result<SiteConfiguration> {
        with_timeout(
            "BEAAM configuration",
            self.timeouts.configuration,
            self.get(self.url(&["api", "v1", "site", "configuration"])),
        )
        .await
    }

    pub async fn read_site_state(&self) -> Result<SiteStatePayload> {
        with_timeout(
            "BEAAM site state",
            self.timeouts.site_state,
            self.get(self.url(&["api", "v1", "site", "state"])),
        )
        .await
    }

    pub async fn read_thing_states(&self, thing_id: &str) -> Result<ThingStatesPayload> {
        with_timeout(
            format!("BEAAM state of thing {thing_id}"),
            self.timeouts.device_state,
            self.get(self.url(&["api", "v1", "things", thing_id, "states"])),
        )
        .await
    }

    /// Posts a single-command batch to the thing. No retry on failure.
    pub async fn send_command(
        &self,
        thing_id: &str,
        key: &str,
        value: impl Into<DataPointValue>,
    ) -> Result<()> {
        let url = self.url(&["api", "v1", "things", thing_id, "commands"]);
        let batch = [Command {
            key: key.to_string(),
            value: value.into(),
        }];
        let request = self
            .client
            .post(url.clone())
            .bearer_auth(self.key.get())
            .json(&batch);

        with_timeout(
            format!("BEAAM command {key} on thing {thing_id}"),
            self.timeouts.command,
            async {
                transport::send(request, url.as_str(), SERVICE).await?;
                Ok(())
            },
        )
        .await
    }
}
