use crate::coordinator::DataSource;
use crate::error::Result;
use crate::local_api::LocalApi;
use crate::models::{DataPointRecord, LocalSnapshot, SiteConfiguration, StateMap};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Folds the site-wide records and each device's records into one map.
///
/// Site records go in first, then each device batch in iteration order; a later
/// record with the same data point id replaces an earlier one.
pub fn merge_states(
    site: Vec<DataPointRecord>,
    devices: impl IntoIterator<Item = Vec<DataPointRecord>>,
) -> StateMap {
    let mut states: StateMap = site.into_iter().collect();
    for records in devices {
        states.extend(records);
    }
    states
}

/// Builds the local [`StateMap`] from the gateway's site state and per-thing states
pub struct LocalStateAggregator {
    api: LocalApi,
    configuration: OnceCell<Arc<SiteConfiguration>>,
}

impl LocalStateAggregator {
    pub fn new(api: LocalApi) -> Self {
        Self {
            api,
            configuration: OnceCell::new(),
        }
    }

    pub fn api(&self) -> &LocalApi {
        &self.api
    }

    /// The cached gateway configuration, if it has been loaded yet
    pub fn configuration(&self) -> Option<Arc<SiteConfiguration>> {
        self.configuration.get().cloned()
    }

    /// Loads the gateway configuration on first use; later calls return the cached copy
    pub async fn ensure_configuration(&self) -> Result<Arc<SiteConfiguration>> {
        self.configuration
            .get_or_try_init(|| async {
                let configuration = self.api.read_configuration().await?;
                info!(
                    "BEAAM configuration loaded with {} things",
                    configuration.things().count()
                );
                Ok(Arc::new(configuration))
            })
            .await
            .cloned()
    }

    /// Runs one aggregation cycle.
    ///
    /// Fails only when the site state cannot be read. Every thing in
    /// `configuration` is queried concurrently; a thing whose request fails
    /// or times out contributes no records.
    pub async fn collect_states(&self, configuration: &SiteConfiguration) -> Result<StateMap> {
        let site = self.api.read_site_state().await?.into_records();

        let mut pending = JoinSet::new();
        for (thing_id, _) in configuration.things() {
            let api = self.api.clone();
            let thing_id = thing_id.to_string();
            pending.spawn(async move {
                let result = api.read_thing_states(&thing_id).await;
                (thing_id, result)
            });
        }

        // Keyed by thing id so the merge order does not depend on completion order
        let mut devices = BTreeMap::new();
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((thing_id, Ok(payload))) => {
                    devices.insert(thing_id, payload.into_records());
                }
                Ok((thing_id, Err(e))) => {
                    warn!("Skipping states of thing {thing_id}: {e}");
                }
                Err(e) => {
                    warn!("Thing state task failed: {e}");
                }
            }
        }

        debug!(
            "Collected {} site records and states of {} things",
            site.len(),
            devices.len()
        );
        Ok(merge_states(site, devices.into_values()))
    }
}

impl DataSource for LocalStateAggregator {
    type Data = LocalSnapshot;

    async fn fetch(&self) -> Result<LocalSnapshot> {
        let configuration = self.ensure_configuration().await?;
        let states = self.collect_states(&configuration).await?;
        Ok(LocalSnapshot {
            configuration,
            states,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeouts;
    use crate::error::Error;
    use crate::models::DataPointValue;
    use serde_json::json;

    fn configuration(thing_ids: &[&str]) -> SiteConfiguration {
        let things: serde_json::Map<_, _> = thing_ids
            .iter()
            .map(|id| (id.to_string(), json!({ "type": "INVERTER", "dataPoints": {} })))
            .collect();
        serde_json::from_value(json!({ "things": things })).unwrap()
    }

    fn aggregator_for(server: &mockito::ServerGuard) -> LocalStateAggregator {
        LocalStateAggregator::new(
            LocalApi::new(server.url(), "beaam_key", Timeouts::default()).unwrap(),
        )
    }

    #[test]
    fn test_merge_site_then_devices() {
        let states = merge_states(
            vec![DataPointRecord::new("A", 500.0), DataPointRecord::new("shared", 1.0)],
            vec![
                vec![DataPointRecord::new("B", 1_200_000.0)],
                vec![DataPointRecord::new("shared", 2.0)],
            ],
        );

        assert_eq!(states.len(), 3);
        assert_eq!(states.value("A"), Some(&DataPointValue::Number(500.0)));
        assert_eq!(states.value("B"), Some(&DataPointValue::Number(1_200_000.0)));
        assert_eq!(states.value("shared"), Some(&DataPointValue::Number(2.0)));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let site = vec![DataPointRecord::new("A", 1.0)];
        let devices = vec![
            vec![DataPointRecord::new("B", "IDLE")],
            vec![DataPointRecord::new("C", true)],
        ];

        let first = merge_states(site.clone(), devices.clone());
        let second = merge_states(site, devices);
        assert_eq!(first, second);
    }

    #[test]
    fn test_merge_empty() {
        assert!(merge_states(Vec::new(), Vec::<Vec<DataPointRecord>>::new()).is_empty());
    }

    #[tokio::test]
    async fn test_collect_tolerates_device_failures() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/site/state")
            .with_status(200)
            .with_body(r#"{ "energyFlow": { "states": [ { "dataPointId": "A", "value": 500 } ] } }"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/things/inv-1/states")
            .with_status(200)
            .with_body(r#"{ "states": [ { "dataPointId": "B", "value": 1200000 } ] }"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/things/inv-2/states")
            .with_status(500)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/things/inv-3/states")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let aggregator = aggregator_for(&server);
        let states = aggregator
            .collect_states(&configuration(&["inv-1", "inv-2", "inv-3"]))
            .await
            .unwrap();

        assert_eq!(states.len(), 2);
        assert_eq!(states.value("A"), Some(&DataPointValue::Number(500.0)));
        assert_eq!(states.value("B"), Some(&DataPointValue::Number(1_200_000.0)));
    }

    #[tokio::test]
    async fn test_collect_site_without_energy_flow() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/site/state")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let states = aggregator_for(&server)
            .collect_states(&SiteConfiguration::default())
            .await
            .unwrap();
        assert!(states.is_empty());
    }

    #[tokio::test]
    async fn test_collect_fails_on_site_auth() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/site/state")
            .with_status(401)
            .create_async()
            .await;

        let result = aggregator_for(&server)
            .collect_states(&configuration(&["inv-1"]))
            .await;
        assert!(matches!(result, Err(Error::AuthInvalid(_))));
    }

    #[tokio::test]
    async fn test_configuration_is_loaded_once() {
        let mut server = mockito::Server::new_async().await;
        let config_mock = server
            .mock("GET", "/api/v1/site/configuration")
            .with_status(200)
            .with_body(r#"{ "things": {} }"#)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/site/state")
            .with_status(200)
            .with_body(r#"{ "energyFlow": { "states": [ { "dataPointId": "A", "value": 1 } ] } }"#)
            .expect(2)
            .create_async()
            .await;

        let aggregator = aggregator_for(&server);
        assert!(aggregator.configuration().is_none());

        let first = aggregator.fetch().await.unwrap();
        let second = aggregator.fetch().await.unwrap();

        assert!(Arc::ptr_eq(&first.configuration, &second.configuration));
        assert_eq!(first.states, second.states);
        assert!(aggregator.configuration().is_some());
        config_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_configuration_failure_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/api/v1/site/configuration")
            .with_status(502)
            .create_async()
            .await;

        let aggregator = aggregator_for(&server);
        assert!(aggregator.fetch().await.is_err());
        assert!(aggregator.configuration().is_none());

        failing.remove_async().await;
        server
            .mock("GET", "/api/v1/site/configuration")
            .with_status(200)
            .with_body(r#"{ "things": {} }"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/site/state")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        assert!(aggregator.fetch().await.is_ok());
        assert!(aggregator.configuration().is_some());
    }
}
