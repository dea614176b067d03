//! In-memory `ZoneApi` that records every overlay call, shared by the unit tests.

use crate::client::{TadoClientError, ZoneApi};
use crate::models::tado::*;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetOverlay {
        zone: ZoneId,
        mode: OperationMode,
        temperature: Option<f64>,
    },
    ResetOverlay(ZoneId),
}

#[derive(Default)]
pub struct RecordingApi {
    zones: RefCell<Vec<Zone>>,
    states: RefCell<BTreeMap<ZoneId, ZoneState>>,
    capabilities: RefCell<BTreeMap<ZoneId, ZoneCapabilities>>,
    failing_states: RefCell<BTreeSet<ZoneId>>,
    fetches: RefCell<BTreeMap<ZoneId, usize>>,
    calls: RefCell<Vec<Call>>,
    homes: RefCell<Vec<HomeBase>>,
    fail_overlays: Cell<bool>,
    fail_zones: Cell<bool>,
    fail_capabilities: Cell<bool>,
}

fn unavailable() -> TadoClientError {
    TadoClientError::Transport("connection refused".to_string())
}

pub fn zone_state(inside: f64, setting: f64) -> ZoneState {
    ZoneState {
        tado_mode: Some(HomePresence::Home),
        setting: Some(ZoneSetting {
            r#type: Some(ZoneType::Heating),
            power: Some(Power::On),
            temperature: Some(Temperature {
                celsius: Some(setting),
                fahrenheit: None,
            }),
            ..Default::default()
        }),
        link: Some(ZoneStateLink {
            state: Some("ONLINE".to_string()),
            reason: None,
        }),
        activity_data_points: Some(ActivityDataPoints {
            heating_power: Some(PercentageDataPoint {
                r#type: Some("PERCENTAGE".to_string()),
                percentage: Some(0.0),
                timestamp: None,
            }),
            ac_power: None,
        }),
        sensor_data_points: Some(SensorDataPoints {
            inside_temperature: Some(TemperatureDataPoint {
                celsius: Some(inside),
                ..Default::default()
            }),
            humidity: Some(PercentageDataPoint {
                r#type: Some("PERCENTAGE".to_string()),
                percentage: Some(50.0),
                timestamp: None,
            }),
        }),
        ..Default::default()
    }
}

impl RecordingApi {
    /// Heating zones named `Zone <id>` reporting the given inside temperatures.
    pub fn with_zones(zones: &[(i64, f64)]) -> Self {
        let api = RecordingApi::default();
        for (id, inside) in zones {
            api.add_zone(*id, &format!("Zone {}", id), ZoneType::Heating);
            api.set_inside_temperature(ZoneId(*id), *inside);
        }
        api.add_home(7, "Home");
        api
    }

    pub fn add_zone(&self, id: i64, name: &str, zone_type: ZoneType) {
        self.zones.borrow_mut().push(Zone {
            id: Some(ZoneId(id)),
            name: Some(name.to_string()),
            r#type: Some(zone_type),
            ..Default::default()
        });
        self.capabilities.borrow_mut().insert(
            ZoneId(id),
            ZoneCapabilities {
                r#type: Some(zone_type),
                temperatures: Some(TemperatureCapability {
                    celsius: Some(TemperatureRange {
                        min: Some(5.0),
                        max: Some(25.0),
                        step: Some(0.1),
                    }),
                    fahrenheit: None,
                }),
                can_set_temperature: Some(true),
            },
        );
    }

    pub fn set_inside_temperature(&self, zone: ZoneId, inside: f64) {
        self.failing_states.borrow_mut().remove(&zone);
        self.states.borrow_mut().insert(zone, zone_state(inside, 21.0));
    }

    pub fn set_state(&self, zone: ZoneId, state: ZoneState) {
        self.states.borrow_mut().insert(zone, state);
    }

    pub fn fail_state(&self, zone: ZoneId) {
        self.failing_states.borrow_mut().insert(zone);
    }

    pub fn fail_overlays(&self, fail: bool) {
        self.fail_overlays.set(fail);
    }

    pub fn fail_zones(&self, fail: bool) {
        self.fail_zones.set(fail);
    }

    pub fn fail_capabilities(&self, fail: bool) {
        self.fail_capabilities.set(fail);
    }

    pub fn add_home(&self, id: i64, name: &str) {
        self.homes.borrow_mut().push(HomeBase {
            id: Some(HomeId(id)),
            name: Some(name.to_string()),
        });
    }

    pub fn clear_homes(&self) {
        self.homes.borrow_mut().clear();
    }

    pub fn state_fetches(&self, zone: ZoneId) -> usize {
        self.fetches.borrow().get(&zone).copied().unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }
}

impl ZoneApi for RecordingApi {
    fn get_zones(&self) -> Result<Vec<Zone>, TadoClientError> {
        if self.fail_zones.get() {
            return Err(unavailable());
        }
        Ok(self.zones.borrow().clone())
    }

    fn get_capabilities(&self, zone_id: ZoneId) -> Result<ZoneCapabilities, TadoClientError> {
        if self.fail_capabilities.get() {
            return Err(unavailable());
        }
        self.capabilities
            .borrow()
            .get(&zone_id)
            .cloned()
            .ok_or(TadoClientError::Http {
                status: 404,
                message: "zone not found".to_string(),
            })
    }

    fn get_state(&self, zone_id: ZoneId) -> Result<ZoneState, TadoClientError> {
        *self.fetches.borrow_mut().entry(zone_id).or_insert(0) += 1;
        if self.failing_states.borrow().contains(&zone_id) {
            return Err(unavailable());
        }
        self.states.borrow().get(&zone_id).cloned().ok_or(TadoClientError::Http {
            status: 404,
            message: "zone not found".to_string(),
        })
    }

    fn get_devices(&self) -> Result<Vec<Device>, TadoClientError> {
        Ok(vec![Device {
            device_type: Some(DeviceType("IB01".to_string())),
            serial_no: Some(DeviceId("IB0001".to_string())),
            connection_state: Some(DeviceConnectionState {
                value: Some(true),
                timestamp: None,
            }),
            ..Default::default()
        }])
    }

    fn get_me(&self) -> Result<User, TadoClientError> {
        Ok(User {
            homes: Some(self.homes.borrow().clone()),
            ..Default::default()
        })
    }

    fn set_zone_overlay(
        &self,
        zone_id: ZoneId,
        mode: OperationMode,
        temperature: Option<f64>,
    ) -> Result<(), TadoClientError> {
        if self.fail_overlays.get() {
            return Err(unavailable());
        }
        self.calls.borrow_mut().push(Call::SetOverlay {
            zone: zone_id,
            mode,
            temperature,
        });
        Ok(())
    }

    fn reset_zone_overlay(&self, zone_id: ZoneId) -> Result<(), TadoClientError> {
        if self.fail_overlays.get() {
            return Err(unavailable());
        }
        self.calls.borrow_mut().push(Call::ResetOverlay(zone_id));
        Ok(())
    }
}
