//! Minimal stand-in for the host framework's state machine: latest state per entity id plus
//! subscriptions that turn state changes into typed events for climate controllers.

use crate::models::tado::ZoneId;
use crate::services::sensor::FieldKind;
use log::debug;
use serde_json::Value;
use std::collections::BTreeMap;

pub const ATTR_UNIT_OF_MEASUREMENT: &str = "unit_of_measurement";
pub const ATTR_SETTING: &str = "setting";
pub const ATTR_TIME: &str = "time";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SensorState {
    pub state: String,
    pub attributes: BTreeMap<String, Value>,
}

impl SensorState {
    pub fn new(state: impl Into<String>) -> Self {
        SensorState {
            state: state.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }
}

/// A state change routed to the controller of `zone_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorEvent {
    pub zone_id: ZoneId,
    pub field: FieldKind,
    pub entity_id: String,
    pub state: SensorState,
}

#[derive(Debug, Default)]
pub struct StateRegistry {
    states: BTreeMap<String, SensorState>,
    subscriptions: BTreeMap<String, Vec<(ZoneId, FieldKind)>>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity_id: &str) -> Option<&SensorState> {
        self.states.get(entity_id)
    }

    /// Deliver future changes of `entity_id` to `zone_id` as `field` updates.
    pub fn track(&mut self, entity_id: &str, zone_id: ZoneId, field: FieldKind) {
        let subs = self.subscriptions.entry(entity_id.to_string()).or_default();
        if !subs.contains(&(zone_id, field)) {
            subs.push((zone_id, field));
            debug!("Registry: zone {} tracks {}", zone_id.0, entity_id);
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.values().map(Vec::len).sum()
    }

    /// Store the new state and return one event per subscriber. Publishing an unchanged state
    /// produces no events.
    pub fn publish(&mut self, entity_id: &str, state: SensorState) -> Vec<SensorEvent> {
        if self.states.get(entity_id) == Some(&state) {
            return Vec::new();
        }
        self.states.insert(entity_id.to_string(), state.clone());

        self.subscriptions
            .get(entity_id)
            .map(|subs| {
                subs.iter()
                    .map(|(zone_id, field)| SensorEvent {
                        zone_id: *zone_id,
                        field: *field,
                        entity_id: entity_id.to_string(),
                        state: state.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_fans_out_to_subscribers() {
        let mut reg = StateRegistry::new();
        reg.track("sensor.kitchen_temperature", ZoneId(1), FieldKind::Temperature);
        reg.track("sensor.kitchen_temperature", ZoneId(1), FieldKind::Temperature);
        reg.track("sensor.kitchen_temperature", ZoneId(2), FieldKind::Temperature);
        assert_eq!(reg.subscription_count(), 2);

        let events = reg.publish("sensor.kitchen_temperature", SensorState::new("20.5"));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].zone_id, ZoneId(1));
        assert_eq!(events[1].zone_id, ZoneId(2));
        assert_eq!(reg.get("sensor.kitchen_temperature").unwrap().state, "20.5");
    }

    #[test]
    fn unchanged_state_is_not_redelivered() {
        let mut reg = StateRegistry::new();
        reg.track("sensor.kitchen_humidity", ZoneId(1), FieldKind::Humidity);
        assert_eq!(reg.publish("sensor.kitchen_humidity", SensorState::new("50")).len(), 1);
        assert!(reg.publish("sensor.kitchen_humidity", SensorState::new("50")).is_empty());
        assert_eq!(reg.publish("sensor.kitchen_humidity", SensorState::new("51")).len(), 1);
    }

    #[test]
    fn untracked_entities_are_stored_silently() {
        let mut reg = StateRegistry::new();
        let state = SensorState::new("ONLINE").with_attribute("time", "2026-10-17T12:00:00Z");
        assert!(reg.publish("sensor.kitchen_link", state.clone()).is_empty());
        assert_eq!(reg.get("sensor.kitchen_link"), Some(&state));
    }
}
