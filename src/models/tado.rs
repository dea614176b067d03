//! Models for the subset of the tado° v2 API this integration talks to.
//!
//! Notes
//! - Every field is optional: the remote model evolves and partial payloads are normal.
//! - Date/time fields use `chrono` (`DateTime<Utc>`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =====================
// Scalar ID newtype wrappers
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HomeId(pub i64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub i64);

// =====================
// Core enums
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AirConditioningMode {
    Auto,
    Cool,
    Heat,
    Dry,
    Fan,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatteryState {
    Low,
    Normal,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HomePresence {
    Home,
    Away,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Power {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneOverlayTerminationType {
    Manual,
    TadoMode,
    Timer,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneOverlayTerminationTypeSkillBasedApp {
    Manual,
    TadoMode,
    Timer,
    NextTimeBlock,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneType {
    AirConditioning,
    Heating,
    HotWater,
}

/// Operation modes a climate zone can be asked for.
///
/// `SmartSchedule` and `Off` are local modes; the other three double as overlay
/// termination types understood by the API.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationMode {
    SmartSchedule,
    Off,
    Manual,
    Timer,
    TadoMode,
}

impl OperationMode {
    pub const ALL: [OperationMode; 5] = [
        OperationMode::Manual,
        OperationMode::Timer,
        OperationMode::TadoMode,
        OperationMode::SmartSchedule,
        OperationMode::Off,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationMode::SmartSchedule => "SMART_SCHEDULE",
            OperationMode::Off => "OFF",
            OperationMode::Manual => "MANUAL",
            OperationMode::Timer => "TIMER",
            OperationMode::TadoMode => "TADO_MODE",
        }
    }

    /// Overlay termination for modes that map onto one.
    pub fn termination(self) -> Option<ZoneOverlayTerminationTypeSkillBasedApp> {
        match self {
            OperationMode::Manual | OperationMode::Off => Some(ZoneOverlayTerminationTypeSkillBasedApp::Manual),
            OperationMode::Timer => Some(ZoneOverlayTerminationTypeSkillBasedApp::Timer),
            OperationMode::TadoMode => Some(ZoneOverlayTerminationTypeSkillBasedApp::TadoMode),
            OperationMode::SmartSchedule => None,
        }
    }
}

impl core::fmt::Display for OperationMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OperationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown operation mode: {}", s))
    }
}

// =====================
// Core datapoint structs
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Temperature {
    pub celsius: Option<f64>,
    pub fahrenheit: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureDataPoint {
    pub celsius: Option<f64>,
    pub fahrenheit: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub r#type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PercentageDataPoint {
    #[serde(rename = "type")]
    pub r#type: Option<String>,
    pub percentage: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PowerDataPoint {
    #[serde(rename = "type")]
    pub r#type: Option<String>,
    pub value: Option<Power>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SensorDataPoints {
    pub inside_temperature: Option<TemperatureDataPoint>,
    pub humidity: Option<PercentageDataPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDataPoints {
    pub heating_power: Option<PercentageDataPoint>,
    pub ac_power: Option<PowerDataPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TemperatureCapability {
    pub celsius: Option<TemperatureRange>,
    pub fahrenheit: Option<TemperatureRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TemperatureRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceType(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneOverlayType(pub String);

// Devices

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConnectionState {
    pub value: Option<bool>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_type: Option<DeviceType>,
    pub serial_no: Option<DeviceId>,
    pub short_serial_no: Option<String>,
    pub current_fw_version: Option<String>,
    pub connection_state: Option<DeviceConnectionState>,
    pub battery_state: Option<BatteryState>,
}

// Home and user

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HomeBase {
    pub id: Option<HomeId>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub id: Option<String>,
    pub homes: Option<Vec<HomeBase>>,
}

// Zone and capabilities

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub id: Option<ZoneId>,
    pub name: Option<String>,
    pub r#type: Option<ZoneType>,
    pub date_created: Option<DateTime<Utc>>,
    pub device_types: Option<Vec<DeviceType>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ZoneCapabilities {
    pub r#type: Option<ZoneType>,
    pub temperatures: Option<TemperatureCapability>,
    pub can_set_temperature: Option<bool>,
}

// Zone overlay and related

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ZoneOverlayTermination {
    pub r#type: Option<ZoneOverlayTerminationType>,
    pub duration_in_seconds: Option<i64>,
    pub remaining_time_in_seconds: Option<i64>,
    pub type_skill_based_app: Option<ZoneOverlayTerminationTypeSkillBasedApp>,
    pub expiry: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ZoneOverlay {
    pub r#type: Option<ZoneOverlayType>,
    pub setting: Option<ZoneSetting>,
    pub termination: Option<ZoneOverlayTermination>,
}

/// Request body for `PUT /homes/{home}/zones/{zone}/overlay`. Absent fields are omitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneOverlayInput {
    pub setting: ZoneSettingInput,
    pub termination: ZoneOverlayTerminationInput,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneSettingInput {
    pub r#type: ZoneType,
    pub power: Power,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<Temperature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<AirConditioningMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneOverlayTerminationInput {
    pub type_skill_based_app: ZoneOverlayTerminationTypeSkillBasedApp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_in_seconds: Option<i64>,
}

// Zone setting

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ZoneSetting {
    pub r#type: Option<ZoneType>,
    pub power: Option<Power>,
    pub temperature: Option<Temperature>,
    pub mode: Option<AirConditioningMode>,
    pub is_boost: Option<bool>,
}

// Zone state

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ZoneStateLinkReason {
    pub code: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ZoneStateLink {
    pub state: Option<String>, // ONLINE/OFFLINE
    pub reason: Option<ZoneStateLinkReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ZoneState {
    pub tado_mode: Option<HomePresence>,
    pub geolocation_override: Option<bool>,
    pub preparation: Option<Value>,
    pub setting: Option<ZoneSetting>,
    pub overlay_type: Option<ZoneOverlayType>,
    pub overlay: Option<ZoneOverlay>,
    pub link: Option<ZoneStateLink>,
    pub running_offline_schedule: Option<bool>,
    pub activity_data_points: Option<ActivityDataPoints>,
    pub sensor_data_points: Option<SensorDataPoints>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_mode_parses_case_insensitively() {
        assert_eq!("tado_mode".parse::<OperationMode>(), Ok(OperationMode::TadoMode));
        assert_eq!(" OFF ".parse::<OperationMode>(), Ok(OperationMode::Off));
        assert!("HEAT".parse::<OperationMode>().is_err());
    }

    #[test]
    fn overlay_input_omits_absent_fields() {
        let body = ZoneOverlayInput {
            setting: ZoneSettingInput {
                r#type: ZoneType::Heating,
                power: Power::Off,
                temperature: None,
                mode: None,
            },
            termination: ZoneOverlayTerminationInput {
                type_skill_based_app: ZoneOverlayTerminationTypeSkillBasedApp::Manual,
                duration_in_seconds: None,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "setting": {"type": "HEATING", "power": "OFF"},
                "termination": {"typeSkillBasedApp": "MANUAL"}
            })
        );
    }

    #[test]
    fn zone_state_fixture_parses() {
        let json = std::fs::read_to_string("tests/data/zone-state.json").expect("fixture present");
        let state: ZoneState = serde_json::from_str(&json).expect("parse zone state");
        assert_eq!(state.tado_mode, Some(HomePresence::Home));
        let inside = state
            .sensor_data_points
            .and_then(|s| s.inside_temperature)
            .and_then(|t| t.celsius);
        assert_eq!(inside, Some(20.5));
    }
}
