//! Presentation adapters handed to the host platform: sensors, numbers and
//! selects built from the gateway configuration, plus the fixed cloud sensors.

use crate::coordinator::LocalCoordinator;
use crate::error::Result;
use crate::models::{
    DataPointConfig, DataPointValue, DataType, SiteConfiguration, SiteSnapshot, StateMap,
};
use crate::scaling::{round2, scale};
use serde_json::Value;
use std::fmt;

pub const MANUFACTURER: &str = "neoom";
pub const GATEWAY_DEVICE: &str = "BEAAM Gateway";

/// The gateway does not publish allowed values for string data points, so
/// selects only exist for keys listed here.
pub const KNOWN_OPTIONS: &[(&str, &[&str])] = &[(
    "PHASE_SWITCHING_MODE",
    &["AUTO", "FORCE_1_PHASE", "FORCE_3_PHASE"],
)];

pub fn known_options(key: &str) -> Option<&'static [&'static str]> {
    KNOWN_OPTIONS
        .iter()
        .find(|(known, _)| *known == key)
        .map(|(_, options)| *options)
}

/// What kind of entity a data point turns into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPointKind {
    NumericControllable,
    NumericReadOnly,
    EnumeratedControllable(&'static [&'static str]),
    /// Not exposed
    Opaque,
}

impl DataPointKind {
    pub fn classify(data_point: &DataPointConfig) -> Self {
        match (data_point.data_type, data_point.controllable) {
            (DataType::Number, true) => Self::NumericControllable,
            (DataType::Number, false) => Self::NumericReadOnly,
            (DataType::String, true) => known_options(&data_point.key)
                .map(Self::EnumeratedControllable)
                .unwrap_or(Self::Opaque),
            _ => Self::Opaque,
        }
    }
}

/// `INVERTER_L1_POWER` -> `Inverter L1 Power`
pub fn friendly_name(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len());
    let mut word_start = true;
    for c in raw.chars() {
        let c = if c == '_' { ' ' } else { c };
        if word_start {
            name.extend(c.to_uppercase());
        } else {
            name.extend(c.to_lowercase());
        }
        word_start = !c.is_alphabetic();
    }
    name
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub identifier: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub via_device: Option<String>,
}

impl DeviceInfo {
    pub fn for_thing(thing_id: &str, thing_type: &str) -> Self {
        Self {
            identifier: thing_id.to_string(),
            name: format!("{MANUFACTURER} {thing_type}"),
            manufacturer: MANUFACTURER.to_string(),
            model: thing_type.to_string(),
            via_device: Some(GATEWAY_DEVICE.to_string()),
        }
    }

    pub fn for_cloud_site(site_id: &str) -> Self {
        Self {
            identifier: site_id.to_string(),
            name: "Ntuity Cloud Site".to_string(),
            manufacturer: MANUFACTURER.to_string(),
            model: "Cloud API".to_string(),
            via_device: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Power,
    Energy,
    Voltage,
    Current,
    Battery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateClass {
    Measurement,
    TotalIncreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberMode {
    Box,
    Slider,
}

/// Units the host understands; anything else is shown without a unit
pub fn native_unit(raw: Option<&str>) -> Option<&'static str> {
    match raw? {
        "W" => Some("W"),
        "Wh" => Some("Wh"),
        "V" => Some("V"),
        "A" => Some("A"),
        "%" => Some("%"),
        "Hz" => Some("Hz"),
        "s" => Some("s"),
        _ => None,
    }
}

pub fn device_class(key: &str, unit: Option<&str>) -> Option<DeviceClass> {
    match unit? {
        "W" => Some(DeviceClass::Power),
        "Wh" => Some(DeviceClass::Energy),
        "V" => Some(DeviceClass::Voltage),
        "A" => Some(DeviceClass::Current),
        "%" if key.contains("SOC") => Some(DeviceClass::Battery),
        _ => None,
    }
}

pub fn state_class(key: &str) -> StateClass {
    if key.contains("ENERGY") {
        StateClass::TotalIncreasing
    } else {
        StateClass::Measurement
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub mode: NumberMode,
}

impl NumberRange {
    /// Fixed bounds per unit; the gateway does not report limits
    pub fn for_unit(unit: Option<&str>) -> Self {
        match unit {
            Some("%") => Self {
                min: 0.0,
                max: 100.0,
                step: 1.0,
                mode: NumberMode::Slider,
            },
            // Typical storage and grid limits stay well inside 20 kW
            Some("W") => Self {
                min: -20_000.0,
                max: 20_000.0,
                step: 100.0,
                mode: NumberMode::Box,
            },
            _ => Self {
                min: 0.0,
                max: 100_000.0,
                step: 1.0,
                mode: NumberMode::Box,
            },
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// The value an entity shows right now
#[derive(Debug, Clone, PartialEq)]
pub enum EntityState {
    /// Never reported, or the device is unreachable
    Unknown,
    Number { value: f64, unit: Option<String> },
    Text(String),
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Number { value, unit: Some(unit) } if !unit.is_empty() => {
                write!(f, "{value} {unit}")
            }
            Self::Number { value, .. } => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Where a local entity reads its value from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPointRef {
    pub thing_id: String,
    pub thing_type: String,
    pub data_point_id: String,
    pub key: String,
    pub unit_of_measure: Option<String>,
}

impl DataPointRef {
    fn new(thing_id: &str, thing_type: &str, data_point_id: &str, config: &DataPointConfig) -> Self {
        Self {
            thing_id: thing_id.to_string(),
            thing_type: thing_type.to_string(),
            data_point_id: data_point_id.to_string(),
            key: config.key.clone(),
            unit_of_measure: config.unit_of_measure.clone(),
        }
    }

    pub fn name(&self) -> String {
        format!(
            "{} {}",
            friendly_name(&self.thing_type),
            friendly_name(&self.key)
        )
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo::for_thing(&self.thing_id, &self.thing_type)
    }

    pub fn lookup<'a>(&self, states: &'a StateMap) -> Option<&'a DataPointValue> {
        states.value(&self.data_point_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalSensor {
    pub point: DataPointRef,
    pub unique_id: String,
    pub name: String,
    pub native_unit: Option<&'static str>,
    pub device_class: Option<DeviceClass>,
    pub state_class: StateClass,
}

impl LocalSensor {
    pub fn new(point: DataPointRef) -> Self {
        let unit = point.unit_of_measure.as_deref();
        Self {
            unique_id: format!("{}_{}", point.thing_id, point.data_point_id),
            name: point.name(),
            native_unit: native_unit(unit),
            device_class: device_class(&point.key, unit),
            state_class: state_class(&point.key),
            point,
        }
    }

    pub fn native_value<'a>(&self, states: &'a StateMap) -> Option<&'a DataPointValue> {
        self.point.lookup(states)
    }

    /// Numeric readings go through [`scale`]; power and energy get a k/M/G prefix
    pub fn state(&self, states: &StateMap) -> EntityState {
        match self.native_value(states) {
            None => EntityState::Unknown,
            Some(DataPointValue::Number(value)) => match self.native_unit {
                Some(unit) => {
                    let (value, unit) = scale(*value, unit);
                    EntityState::Number {
                        value,
                        unit: Some(unit),
                    }
                }
                None => EntityState::Number {
                    value: round2(*value),
                    unit: None,
                },
            },
            Some(other) => EntityState::Text(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalNumber {
    pub point: DataPointRef,
    pub unique_id: String,
    pub name: String,
    pub native_unit: Option<&'static str>,
    pub device_class: Option<DeviceClass>,
    pub range: NumberRange,
}

impl LocalNumber {
    pub fn new(point: DataPointRef) -> Self {
        let unit = point.unit_of_measure.as_deref();
        let device_class = match unit {
            Some("%") => Some(DeviceClass::Battery),
            Some("W") => Some(DeviceClass::Power),
            _ => None,
        };
        Self {
            unique_id: format!("{}_{}_number", point.thing_id, point.data_point_id),
            name: point.name(),
            native_unit: native_unit(unit).filter(|u| matches!(*u, "%" | "W")),
            device_class,
            range: NumberRange::for_unit(unit),
            point,
        }
    }

    pub fn native_value(&self, states: &StateMap) -> Option<f64> {
        self.point.lookup(states).and_then(DataPointValue::as_f64)
    }

    pub fn state(&self, states: &StateMap) -> EntityState {
        match self.native_value(states) {
            Some(value) => EntityState::Number {
                value,
                unit: self.native_unit.map(str::to_string),
            },
            None => EntityState::Unknown,
        }
    }

    /// Sends the new value to the gateway
    pub async fn set_native_value(&self, coordinator: &LocalCoordinator, value: f64) -> Result<()> {
        coordinator
            .send_command(&self.point.thing_id, &self.point.key, value)
            .await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalSelect {
    pub point: DataPointRef,
    pub unique_id: String,
    pub name: String,
    pub options: &'static [&'static str],
    pub icon: &'static str,
}

impl LocalSelect {
    pub fn new(point: DataPointRef, options: &'static [&'static str]) -> Self {
        Self {
            unique_id: format!("{}_{}_select", point.thing_id, point.data_point_id),
            name: point.name(),
            options,
            icon: "mdi:form-select",
            point,
        }
    }

    /// The reported value, even when it is not one of [`Self::options`]
    pub fn current_option(&self, states: &StateMap) -> Option<String> {
        self.point.lookup(states).map(DataPointValue::to_string)
    }

    pub async fn select_option(&self, coordinator: &LocalCoordinator, option: &str) -> Result<()> {
        coordinator
            .send_command(&self.point.thing_id, &self.point.key, option)
            .await
    }
}

/// A value read from the cloud site info
#[derive(Debug, Clone, PartialEq)]
pub struct CloudSensor {
    pub key: &'static str,
    pub unique_id: String,
    pub name: String,
    pub unit: &'static str,
    pub icon: &'static str,
    pub device: DeviceInfo,
}

impl CloudSensor {
    pub fn new(site_id: &str, key: &'static str, name: &str, unit: &'static str, icon: &'static str) -> Self {
        Self {
            key,
            unique_id: format!("{site_id}_{key}"),
            name: format!("{MANUFACTURER} Cloud {name}"),
            unit,
            icon,
            device: DeviceInfo::for_cloud_site(site_id),
        }
    }

    pub fn native_value<'a>(&self, snapshot: &'a SiteSnapshot) -> Option<&'a Value> {
        snapshot.site_value(self.key)
    }

    pub fn state(&self, snapshot: &SiteSnapshot) -> EntityState {
        match self.native_value(snapshot) {
            None => EntityState::Unknown,
            Some(Value::Number(n)) => match n.as_f64() {
                Some(value) => EntityState::Number {
                    value,
                    unit: Some(self.unit.to_string()),
                },
                None => EntityState::Text(n.to_string()),
            },
            Some(Value::String(s)) => EntityState::Text(s.clone()),
            Some(other) => EntityState::Text(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Cloud(CloudSensor),
    Sensor(LocalSensor),
    Number(LocalNumber),
    Select(LocalSelect),
}

impl Entity {
    pub fn unique_id(&self) -> &str {
        match self {
            Self::Cloud(e) => &e.unique_id,
            Self::Sensor(e) => &e.unique_id,
            Self::Number(e) => &e.unique_id,
            Self::Select(e) => &e.unique_id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Cloud(e) => &e.name,
            Self::Sensor(e) => &e.name,
            Self::Number(e) => &e.name,
            Self::Select(e) => &e.name,
        }
    }

    pub fn device_info(&self) -> DeviceInfo {
        match self {
            Self::Cloud(e) => e.device.clone(),
            Self::Sensor(e) => e.point.device_info(),
            Self::Number(e) => e.point.device_info(),
            Self::Select(e) => e.point.device_info(),
        }
    }

    /// Current state given the latest snapshots; a missing snapshot reads as unknown
    pub fn state(&self, cloud: Option<&SiteSnapshot>, states: Option<&StateMap>) -> EntityState {
        match (self, cloud, states) {
            (Self::Cloud(e), Some(snapshot), _) => e.state(snapshot),
            (Self::Sensor(e), _, Some(states)) => e.state(states),
            (Self::Number(e), _, Some(states)) => e.state(states),
            (Self::Select(e), _, Some(states)) => e
                .current_option(states)
                .map(EntityState::Text)
                .unwrap_or(EntityState::Unknown),
            _ => EntityState::Unknown,
        }
    }
}

/// The fixed sensors backed by the cloud coordinator
pub fn cloud_entities(site_id: &str) -> Vec<Entity> {
    vec![
        Entity::Cloud(CloudSensor::new(
            site_id,
            "electricity_price",
            "Electricity Price",
            "EUR/kWh",
            "mdi:currency-eur",
        )),
        Entity::Cloud(CloudSensor::new(
            site_id,
            "feed_in_tariff",
            "Feed-in Tariff",
            "ct/kWh",
            "mdi:cash-plus",
        )),
    ]
}

/// Entities for every exposed data point of every thing.
///
/// Numeric data points get a sensor, controllable ones additionally a number;
/// controllable strings with known options get a select.
pub fn local_entities(configuration: &SiteConfiguration) -> Vec<Entity> {
    let mut entities = Vec::new();
    for (thing_id, thing) in configuration.things() {
        for (data_point_id, data_point) in thing.data_points() {
            let point = || DataPointRef::new(thing_id, &thing.thing_type, data_point_id, data_point);
            match DataPointKind::classify(data_point) {
                DataPointKind::NumericControllable => {
                    entities.push(Entity::Sensor(LocalSensor::new(point())));
                    entities.push(Entity::Number(LocalNumber::new(point())));
                }
                DataPointKind::NumericReadOnly => {
                    entities.push(Entity::Sensor(LocalSensor::new(point())));
                }
                DataPointKind::EnumeratedControllable(options) => {
                    entities.push(Entity::Select(LocalSelect::new(point(), options)));
                }
                DataPointKind::Opaque => {}
            }
        }
    }
    entities
}
