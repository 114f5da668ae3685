//! Wire types for the BEAAM gateway and the Ntuity cloud, plus the
//! [`StateMap`] the local coordinator publishes.

use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A single reported value. The gateway only emits these three scalar kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataPointValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl DataPointValue {
    /// Converts a raw JSON value, returning `None` for null, arrays and objects
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    /// Numeric view of the value; numeric strings are parsed
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for DataPointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for DataPointValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for DataPointValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for DataPointValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for DataPointValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPointRecord {
    pub data_point_id: String,
    pub value: DataPointValue,
}

impl DataPointRecord {
    pub fn new(data_point_id: impl Into<String>, value: impl Into<DataPointValue>) -> Self {
        Self {
            data_point_id: data_point_id.into(),
            value: value.into(),
        }
    }
}

/// Record as it arrives on the wire, before validation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub data_point_id: Option<String>,
    #[serde(default)]
    pub value: Value,
}

impl RawRecord {
    fn into_record(self) -> Option<DataPointRecord> {
        let Some(data_point_id) = self.data_point_id else {
            debug!("Skipping state record without dataPointId");
            return None;
        };
        match DataPointValue::from_json(&self.value) {
            Some(value) => Some(DataPointRecord {
                data_point_id,
                value,
            }),
            None => {
                debug!("Skipping state record {data_point_id} with value {}", self.value);
                None
            }
        }
    }
}

fn into_records(raw: Option<Vec<RawRecord>>) -> Vec<DataPointRecord> {
    raw.unwrap_or_default()
        .into_iter()
        .filter_map(RawRecord::into_record)
        .collect()
}

/// Body of `GET /api/v1/site/state`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatePayload {
    pub energy_flow: Option<EnergyFlow>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnergyFlow {
    pub states: Option<Vec<RawRecord>>,
}

impl SiteStatePayload {
    /// Missing `energyFlow` or `states` means no records
    pub fn into_records(self) -> Vec<DataPointRecord> {
        into_records(self.energy_flow.and_then(|flow| flow.states))
    }
}

/// Body of `GET /api/v1/things/{thingId}/states`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ThingStatesPayload {
    Bare(Vec<RawRecord>),
    Wrapped { states: Option<Vec<RawRecord>> },
}

impl ThingStatesPayload {
    pub fn into_records(self) -> Vec<DataPointRecord> {
        match self {
            Self::Bare(records) => into_records(Some(records)),
            Self::Wrapped { states } => into_records(states),
        }
    }
}

/// Latest value per data point id. Rebuilt on every refresh cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateMap {
    records: HashMap<String, DataPointRecord>,
}

impl StateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `record`, replacing any earlier record with the same id
    pub fn insert(&mut self, record: DataPointRecord) -> Option<DataPointRecord> {
        self.records.insert(record.data_point_id.clone(), record)
    }

    pub fn get(&self, data_point_id: &str) -> Option<&DataPointRecord> {
        self.records.get(data_point_id)
    }

    pub fn value(&self, data_point_id: &str) -> Option<&DataPointValue> {
        self.get(data_point_id).map(|record| &record.value)
    }

    pub fn contains(&self, data_point_id: &str) -> bool {
        self.records.contains_key(data_point_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataPointRecord> {
        self.records.values()
    }
}

impl Extend<DataPointRecord> for StateMap {
    fn extend<I: IntoIterator<Item = DataPointRecord>>(&mut self, iter: I) {
        for record in iter {
            self.insert(record);
        }
    }
}

impl FromIterator<DataPointRecord> for StateMap {
    fn from_iter<I: IntoIterator<Item = DataPointRecord>>(iter: I) -> Self {
        let mut map = StateMap::new();
        map.extend(iter);
        map
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Number,
    String,
    Boolean,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPointConfig {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub controllable: bool,
    #[serde(default)]
    pub unit_of_measure: Option<String>,
}

fn unknown_thing_type() -> String {
    "Unknown".to_string()
}

/// A device behind the gateway (inverter, battery, meter, wallbox)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thing {
    #[serde(rename = "type", default = "unknown_thing_type")]
    pub thing_type: String,
    #[serde(default)]
    pub data_points: BTreeMap<String, Option<DataPointConfig>>,
}

impl Thing {
    /// Data points with a configuration body; `null` entries are skipped
    pub fn data_points(&self) -> impl Iterator<Item = (&str, &DataPointConfig)> {
        self.data_points
            .iter()
            .filter_map(|(id, dp)| dp.as_ref().map(|dp| (id.as_str(), dp)))
    }
}

/// Body of `GET /api/v1/site/configuration`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteConfiguration {
    #[serde(default)]
    pub things: BTreeMap<String, Option<Thing>>,
}

impl SiteConfiguration {
    /// Things with a configuration body, ordered by id
    pub fn things(&self) -> impl Iterator<Item = (&str, &Thing)> {
        self.things
            .iter()
            .filter_map(|(id, thing)| thing.as_ref().map(|thing| (id.as_str(), thing)))
    }
}

/// What the local coordinator publishes after each successful cycle
#[derive(Debug, Clone, Default)]
pub struct LocalSnapshot {
    pub configuration: Arc<SiteConfiguration>,
    pub states: StateMap,
}

/// What the cloud coordinator publishes. Both halves are passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteSnapshot {
    pub site: Value,
    pub flow: Value,
}

impl SiteSnapshot {
    pub fn site_value(&self, key: &str) -> Option<&Value> {
        self.site.get(key).filter(|v| !v.is_null())
    }

    pub fn flow_value(&self, key: &str) -> Option<&Value> {
        self.flow.get(key).filter(|v| !v.is_null())
    }
}

/// One entry of the batch posted to `/api/v1/things/{thingId}/commands`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub key: String,
    pub value: DataPointValue,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_site_state_records() {
        let payload: SiteStatePayload = serde_json::from_value(json!({
            "energyFlow": {
                "states": [
                    { "dataPointId": "A", "value": 500, "key": "POWER_PRODUCTION" },
                    { "dataPointId": "B", "value": "CHARGING" },
                    { "dataPointId": "C", "value": true }
                ]
            }
        }))
        .unwrap();

        let records = payload.into_records();
        assert_eq!(
            records,
            vec![
                DataPointRecord::new("A", 500.0),
                DataPointRecord::new("B", "CHARGING"),
                DataPointRecord::new("C", true),
            ]
        );
    }

    #[test]
    fn test_site_state_missing_fields_is_empty() {
        for body in [
            json!({}),
            json!({ "energyFlow": null }),
            json!({ "energyFlow": {} }),
            json!({ "energyFlow": { "states": null } }),
        ] {
            let payload: SiteStatePayload = serde_json::from_value(body.clone()).unwrap();
            assert!(payload.into_records().is_empty(), "{body} should be empty");
        }
    }

    #[test]
    fn test_unusable_records_are_skipped() {
        let payload: SiteStatePayload = serde_json::from_value(json!({
            "energyFlow": {
                "states": [
                    { "value": 1 },
                    { "dataPointId": "nulled", "value": null },
                    { "dataPointId": "listed", "value": [1, 2] },
                    { "dataPointId": "kept", "value": 3.5 }
                ]
            }
        }))
        .unwrap();

        assert_eq!(payload.into_records(), vec![DataPointRecord::new("kept", 3.5)]);
    }

    #[test]
    fn test_thing_states_shapes() {
        let wrapped: ThingStatesPayload =
            serde_json::from_value(json!({ "states": [{ "dataPointId": "B", "value": 1 }] }))
                .unwrap();
        let bare: ThingStatesPayload =
            serde_json::from_value(json!([{ "dataPointId": "B", "value": 1 }])).unwrap();
        let empty: ThingStatesPayload = serde_json::from_value(json!({})).unwrap();

        assert_eq!(wrapped.into_records(), vec![DataPointRecord::new("B", 1.0)]);
        assert_eq!(bare.into_records(), vec![DataPointRecord::new("B", 1.0)]);
        assert!(empty.into_records().is_empty());
    }

    #[test]
    fn test_state_map_last_write_wins() {
        let map: StateMap = [
            DataPointRecord::new("A", 1.0),
            DataPointRecord::new("B", 2.0),
            DataPointRecord::new("A", 3.0),
        ]
        .into_iter()
        .collect();

        assert_eq!(map.len(), 2);
        assert_eq!(map.value("A"), Some(&DataPointValue::Number(3.0)));
        assert_eq!(map.value("missing"), None);
    }

    #[test]
    fn test_configuration_decoding() {
        let config: SiteConfiguration = serde_json::from_value(json!({
            "things": {
                "inv-1": {
                    "type": "INVERTER",
                    "dataPoints": {
                        "dp-1": {
                            "key": "ACTIVE_POWER",
                            "dataType": "NUMBER",
                            "controllable": false,
                            "unitOfMeasure": "W"
                        },
                        "dp-2": {
                            "key": "SERIAL_NUMBERS",
                            "dataType": "ARRAY"
                        },
                        "dp-3": null
                    }
                },
                "ghost": null,
                "meter": { "dataPoints": {} }
            }
        }))
        .unwrap();

        let things: Vec<_> = config.things().collect();
        assert_eq!(things.len(), 2);
        let (id, inverter) = things[0];
        assert_eq!(id, "inv-1");
        assert_eq!(inverter.thing_type, "INVERTER");

        let dps: Vec<_> = inverter.data_points().collect();
        assert_eq!(dps.len(), 2);
        assert_eq!(dps[0].1.data_type, DataType::Number);
        assert_eq!(dps[0].1.unit_of_measure.as_deref(), Some("W"));
        assert_eq!(dps[1].1.data_type, DataType::Unknown);
        assert!(!dps[1].1.controllable);

        assert_eq!(things[1].1.thing_type, "Unknown");
    }

    #[test]
    fn test_command_serialization() {
        let command = Command {
            key: "PHASE_SWITCHING_MODE".to_string(),
            value: "AUTO".into(),
        };
        assert_eq!(
            serde_json::to_value(vec![command]).unwrap(),
            json!([{ "key": "PHASE_SWITCHING_MODE", "value": "AUTO" }])
        );
    }

    #[test]
    fn test_value_coercion() {
        assert_eq!(DataPointValue::Number(4.0).as_f64(), Some(4.0));
        assert_eq!(DataPointValue::from("12.5").as_f64(), Some(12.5));
        assert_eq!(DataPointValue::from("AUTO").as_f64(), None);
        assert_eq!(DataPointValue::Bool(true).as_f64(), None);
        assert_eq!(DataPointValue::from_json(&Value::Null), None);
    }
}
