//! Sensor views: read-only projections of one field out of a shared cache entry.

use crate::models::tado::{Power, ZoneId, ZoneState};
use crate::services::cache::{CacheKey, Payload, SensorCache};
use crate::services::host::{ATTR_SETTING, ATTR_TIME, ATTR_UNIT_OF_MEASUREMENT, SensorState};
use crate::utils::{UNIT_CELSIUS, UNIT_PERCENT, entity_id, serde_enum_name};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKind {
    Temperature,
    Humidity,
    Heating,
    Power,
    Link,
    BridgeStatus,
    TadoMode,
}

impl FieldKind {
    /// Suffix appended to the zone (or home) name to build the entity name.
    pub fn suffix(self) -> &'static str {
        match self {
            FieldKind::Temperature => "temperature",
            FieldKind::Humidity => "humidity",
            FieldKind::Heating => "heating",
            FieldKind::Power => "power",
            FieldKind::Link => "link",
            FieldKind::BridgeStatus => "tado bridge status",
            FieldKind::TadoMode => "tado mode",
        }
    }

    pub fn unit(self) -> Option<&'static str> {
        match self {
            FieldKind::Temperature => Some(UNIT_CELSIUS),
            FieldKind::Humidity | FieldKind::Heating => Some(UNIT_PERCENT),
            _ => None,
        }
    }

    pub fn icon(self) -> Option<&'static str> {
        match self {
            FieldKind::Temperature => Some("mdi:thermometer"),
            FieldKind::Humidity => Some("mdi:water-percent"),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorValue {
    Number(f64),
    Text(String),
    Flag(bool),
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Number(n) => write!(f, "{}", n),
            SensorValue::Text(s) => f.write_str(s),
            SensorValue::Flag(b) => write!(f, "{}", b),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub value: SensorValue,
    pub attributes: BTreeMap<String, Value>,
}

impl SensorReading {
    fn new(value: SensorValue) -> Self {
        SensorReading {
            value,
            attributes: BTreeMap::new(),
        }
    }

    fn with_time(mut self, ts: Option<DateTime<Utc>>) -> Self {
        if let Some(ts) = ts {
            self.attributes.insert(
                ATTR_TIME.to_string(),
                Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        self
    }
}

/// Extract `kind` from `payload`. Missing sub-fields yield `None`.
pub fn extract(kind: FieldKind, payload: &Payload) -> Option<SensorReading> {
    match (kind, payload) {
        (FieldKind::BridgeStatus, Payload::Device(device)) => {
            let value = device.connection_state.as_ref()?.value?;
            Some(SensorReading::new(SensorValue::Flag(value)))
        }
        (FieldKind::BridgeStatus, Payload::Zone(_)) => None,
        (_, Payload::Device(_)) => None,
        (kind, Payload::Zone(state)) => extract_zone(kind, state),
    }
}

fn extract_zone(kind: FieldKind, state: &ZoneState) -> Option<SensorReading> {
    match kind {
        FieldKind::Temperature => {
            let inside = state.sensor_data_points.as_ref()?.inside_temperature.as_ref()?;
            let mut reading = SensorReading::new(SensorValue::Number(inside.celsius?)).with_time(inside.timestamp);
            if let Some(setting) = state
                .setting
                .as_ref()
                .and_then(|s| s.temperature.as_ref())
                .and_then(|t| t.celsius)
            {
                reading.attributes.insert(ATTR_SETTING.to_string(), Value::from(setting));
            }
            Some(reading)
        }
        FieldKind::Humidity => {
            let humidity = state.sensor_data_points.as_ref()?.humidity.as_ref()?;
            Some(SensorReading::new(SensorValue::Number(humidity.percentage?)).with_time(humidity.timestamp))
        }
        FieldKind::Heating => {
            let activity = state.activity_data_points.as_ref()?;
            if let Some(power) = activity.heating_power.as_ref() {
                return Some(SensorReading::new(SensorValue::Number(power.percentage?)).with_time(power.timestamp));
            }
            // air conditioning reports on/off instead of a percentage
            let ac = activity.ac_power.as_ref()?;
            let pct = match ac.value? {
                Power::On => 100.0,
                Power::Off => 0.0,
            };
            Some(SensorReading::new(SensorValue::Number(pct)).with_time(ac.timestamp))
        }
        FieldKind::Power => {
            let power = state.setting.as_ref()?.power.as_ref()?;
            Some(SensorReading::new(SensorValue::Text(serde_enum_name(power)?)))
        }
        FieldKind::Link => {
            let link = state.link.as_ref()?.state.clone()?;
            Some(SensorReading::new(SensorValue::Text(link)))
        }
        FieldKind::TadoMode => {
            let mode = state.tado_mode.as_ref()?;
            Some(SensorReading::new(SensorValue::Text(serde_enum_name(mode)?)))
        }
        FieldKind::BridgeStatus => None,
    }
}

pub struct SensorView {
    cache: Rc<RefCell<SensorCache>>,
    key: CacheKey,
    kind: FieldKind,
    name: String,
    unique_id: String,
    reading: Option<SensorReading>,
}

impl SensorView {
    /// View on the zone `zone_name` (or home, for the bridge status) behind `key`.
    pub fn new(cache: Rc<RefCell<SensorCache>>, key: CacheKey, kind: FieldKind, owner_name: &str) -> Self {
        let owner_id = match key {
            CacheKey::Zone(ZoneId(id)) => id,
            CacheKey::Device(home) => home.0,
        };
        SensorView {
            cache,
            key,
            kind,
            name: format!("{} {}", owner_name, kind.suffix()),
            unique_id: format!("{} {}", kind.suffix(), owner_id),
            reading: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn entity_id(&self) -> String {
        entity_id("sensor", &self.name)
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn key(&self) -> CacheKey {
        self.key
    }

    pub fn reading(&self) -> Option<&SensorReading> {
        self.reading.as_ref()
    }

    /// Refresh the shared cache (throttled) and re-read this view's field. A payload lacking
    /// the field keeps the previous reading.
    pub fn refresh_and_read(&mut self) -> Option<&SensorReading> {
        self.cache.borrow_mut().refresh();
        self.read_cached()
    }

    /// Re-read the field from whatever the cache currently holds.
    pub fn read_cached(&mut self) -> Option<&SensorReading> {
        let extracted = {
            let cache = self.cache.borrow();
            cache.get_data(&self.key).and_then(|payload| extract(self.kind, payload))
        };
        if let Some(reading) = extracted {
            self.reading = Some(reading);
        }
        self.reading.as_ref()
    }

    /// Host representation of the current reading.
    pub fn state(&self) -> Option<SensorState> {
        let reading = self.reading.as_ref()?;
        let mut attributes = reading.attributes.clone();
        if let Some(unit) = self.kind.unit() {
            attributes.insert(ATTR_UNIT_OF_MEASUREMENT.to_string(), Value::from(unit));
        }
        Some(SensorState {
            state: reading.value.to_string(),
            attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tado::{HomeId, ZoneState};
    use crate::services::cache::DEFAULT_REFRESH_INTERVAL;
    use crate::testing::{RecordingApi, zone_state};

    fn fixture() -> Payload {
        let json = std::fs::read_to_string("tests/data/zone-state.json").expect("fixture present");
        Payload::Zone(serde_json::from_str(&json).expect("parse zone state"))
    }

    #[test]
    fn extracts_every_zone_field_from_fixture() {
        let payload = fixture();
        let temp = extract(FieldKind::Temperature, &payload).unwrap();
        assert_eq!(temp.value, SensorValue::Number(20.5));
        assert_eq!(temp.attributes.get(ATTR_SETTING), Some(&Value::from(21.0)));
        assert_eq!(
            temp.attributes.get(ATTR_TIME),
            Some(&Value::from("2026-10-17T12:44:20.891Z"))
        );

        assert_eq!(
            extract(FieldKind::Humidity, &payload).unwrap().value,
            SensorValue::Number(54.2)
        );
        assert_eq!(
            extract(FieldKind::Heating, &payload).unwrap().value,
            SensorValue::Number(37.0)
        );
        assert_eq!(
            extract(FieldKind::Power, &payload).unwrap().value,
            SensorValue::Text("ON".to_string())
        );
        assert_eq!(
            extract(FieldKind::Link, &payload).unwrap().value,
            SensorValue::Text("ONLINE".to_string())
        );
        assert_eq!(
            extract(FieldKind::TadoMode, &payload).unwrap().value,
            SensorValue::Text("HOME".to_string())
        );
        assert!(extract(FieldKind::BridgeStatus, &payload).is_none());
    }

    #[test]
    fn extracts_bridge_status_from_device_fixture() {
        let json = std::fs::read_to_string("tests/data/devices.json").expect("fixture present");
        let devices: Vec<crate::models::tado::Device> = serde_json::from_str(&json).expect("parse devices");
        let payload = Payload::Device(devices.into_iter().next().unwrap());
        assert_eq!(
            extract(FieldKind::BridgeStatus, &payload).unwrap().value,
            SensorValue::Flag(true)
        );
        assert!(extract(FieldKind::Temperature, &payload).is_none());
    }

    #[test]
    fn air_conditioning_activity_maps_to_percentage() {
        let mut state = zone_state(24.0, 22.0);
        state.activity_data_points = Some(crate::models::tado::ActivityDataPoints {
            heating_power: None,
            ac_power: Some(crate::models::tado::PowerDataPoint {
                r#type: Some("POWER".to_string()),
                value: Some(Power::On),
                timestamp: None,
            }),
        });
        let payload = Payload::Zone(state.clone());
        assert_eq!(
            extract(FieldKind::Heating, &payload).unwrap().value,
            SensorValue::Number(100.0)
        );

        if let Some(ac) = state.activity_data_points.as_mut().and_then(|a| a.ac_power.as_mut()) {
            ac.value = Some(Power::Off);
        }
        assert_eq!(
            extract(FieldKind::Heating, &Payload::Zone(state)).unwrap().value,
            SensorValue::Number(0.0)
        );
    }

    #[test]
    fn partial_payload_leaves_fields_unset() {
        let payload = Payload::Zone(ZoneState::default());
        for kind in [
            FieldKind::Temperature,
            FieldKind::Humidity,
            FieldKind::Heating,
            FieldKind::Power,
            FieldKind::Link,
            FieldKind::TadoMode,
        ] {
            assert!(extract(kind, &payload).is_none(), "{}", kind);
        }
    }

    #[test]
    fn view_keeps_previous_reading_when_field_disappears() {
        let api = Rc::new(RecordingApi::with_zones(&[(1, 20.0)]));
        let cache = Rc::new(RefCell::new(SensorCache::new(api.clone(), DEFAULT_REFRESH_INTERVAL)));
        let key = cache.borrow_mut().register_zone_key(ZoneId(1));
        let mut view = SensorView::new(cache.clone(), key, FieldKind::Temperature, "Living Room");

        let reading = view.refresh_and_read().cloned().unwrap();
        assert_eq!(reading.value, SensorValue::Number(20.0));

        api.set_state(ZoneId(1), ZoneState::default());
        let later = std::time::Instant::now() + DEFAULT_REFRESH_INTERVAL * 2;
        assert!(cache.borrow_mut().refresh_at(later));
        assert_eq!(view.read_cached().map(|r| &r.value), Some(&SensorValue::Number(20.0)));
    }

    #[test]
    fn view_state_carries_unit_and_names() {
        let api = Rc::new(RecordingApi::with_zones(&[(3, 19.5)]));
        api.set_state(ZoneId(3), zone_state(19.5, 20.0));
        let cache = Rc::new(RefCell::new(SensorCache::new(api.clone(), DEFAULT_REFRESH_INTERVAL)));
        let key = cache.borrow_mut().register_zone_key(ZoneId(3));
        let mut view = SensorView::new(cache, key, FieldKind::Temperature, "Living Room");
        view.refresh_and_read();

        assert_eq!(view.entity_id(), "sensor.living_room_temperature");
        assert_eq!(view.unique_id(), "temperature 3");
        let state = view.state().unwrap();
        assert_eq!(state.state, "19.5");
        assert_eq!(state.attributes.get(ATTR_UNIT_OF_MEASUREMENT), Some(&Value::from("°C")));
        assert_eq!(state.attributes.get(ATTR_SETTING), Some(&Value::from(20.0)));
    }

    #[test]
    fn bridge_view_is_named_after_home() {
        let api = Rc::new(RecordingApi::with_zones(&[]));
        let cache = Rc::new(RefCell::new(SensorCache::new(api.clone(), DEFAULT_REFRESH_INTERVAL)));
        let key = cache.borrow_mut().register_device_key(HomeId(7));
        let mut view = SensorView::new(cache, key, FieldKind::BridgeStatus, "Home");
        view.refresh_and_read();
        assert_eq!(view.entity_id(), "sensor.home_tado_bridge_status");
        assert_eq!(view.state().unwrap().state, "true");
        assert!(view.state().unwrap().attributes.is_empty());
    }
}
