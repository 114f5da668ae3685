use crate::aggregator::LocalStateAggregator;
use crate::cloud_api::CloudApi;
use crate::config::ConnectionConfig;
use crate::coordinator::{CloudCoordinator, Coordinator, LocalCoordinator};
use crate::entity::{cloud_entities, local_entities, Entity};
use crate::error::Result;
use crate::local_api::LocalApi;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Everything owned by one configured installation: both coordinators and
/// their refresh loops. Independent connections share nothing.
///
/// Dropping a connection aborts its refresh loops; [`Connection::teardown`]
/// also waits for them to stop.
pub struct Connection {
    cloud: Arc<CloudCoordinator>,
    local: Arc<LocalCoordinator>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    /// Builds both coordinators and runs their first refresh.
    ///
    /// Setup fails when the cloud cannot be read; an unreachable gateway is
    /// only logged and picked up again by the local refresh loop.
    pub async fn setup(config: ConnectionConfig) -> Result<Self> {
        config.validate()?;

        let cloud = Arc::new(Coordinator::new(
            "neoom_connect_cloud",
            CloudApi::from_config(&config)?,
            config.cloud_scan_interval,
        ));
        let local = Arc::new(Coordinator::new(
            "neoom_connect_local",
            LocalStateAggregator::new(LocalApi::from_config(&config)?),
            config.local_scan_interval,
        ));

        cloud.refresh().await?;
        if let Err(e) = local.refresh().await {
            warn!("BEAAM gateway not ready yet, retrying on the next cycle: {e}");
        }

        let tasks = vec![Arc::clone(&cloud).spawn(), Arc::clone(&local).spawn()];
        info!("neoom connection for site {} is up", config.site_id);

        Ok(Self {
            cloud,
            local,
            tasks,
        })
    }

    pub fn cloud(&self) -> &Arc<CloudCoordinator> {
        &self.cloud
    }

    pub fn local(&self) -> &Arc<LocalCoordinator> {
        &self.local
    }

    /// Cloud sensors followed by one entity set per exposed data point.
    /// Local entities only appear once the gateway configuration is loaded.
    pub fn entities(&self) -> Vec<Entity> {
        let mut entities = cloud_entities(self.cloud.site_id());
        if let Some(configuration) = self.local.configuration() {
            entities.extend(local_entities(&configuration));
        }
        entities
    }

    /// Swaps in a new cloud token and lifts an auth halt
    pub fn update_cloud_token(&self, token: impl Into<String>) {
        self.cloud.source().set_token(token);
        self.cloud.resume();
    }

    /// Swaps in a new gateway key and lifts an auth halt
    pub fn update_gateway_key(&self, key: impl Into<String>) {
        self.local.source().api().set_key(key);
        self.local.resume();
    }

    /// Stops both refresh loops. Snapshots stay readable through existing handles.
    pub async fn teardown(mut self) {
        let tasks = std::mem::take(&mut self.tasks);
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            // Aborted tasks resolve to a cancellation error
            let _ = task.await;
        }
        info!("neoom connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
