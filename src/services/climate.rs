//! Per-zone climate controller.
//!
//! The controller mirrors the zone's sensors and decides, on every temperature change, whether
//! the remote side needs a new overlay. Overlays are only sent once both current and target
//! temperature are known, and never twice for the same requested mode.
//!
//! Hysteresis (heating zones): with the device heating and the room more than `tolerance`
//! above target, the overlay is dropped and the zone returns to its schedule; with the device
//! idle and the room more than `tolerance` below target, an overlay with the target is set.
//! Anything in between is a dead band. Cooling zones use the same rule mirrored.

use crate::client::{TadoClientError, ZoneApi};
use crate::models::tado::{OperationMode, ZoneCapabilities, ZoneId, ZoneType};
use crate::services::host::{ATTR_SETTING, ATTR_UNIT_OF_MEASUREMENT, SensorState};
use crate::services::sensor::FieldKind;
use crate::utils::{UNIT_CELSIUS, to_celsius};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::fmt;
use std::rc::Rc;
use std::sync::mpsc::Sender;

pub const DEFAULT_TOLERANCE: f64 = 0.3;
pub const DEFAULT_TARGET_TEMP: f64 = 21.0;
pub const DEFAULT_MIN_TEMP: f64 = 7.0;
pub const DEFAULT_MAX_TEMP: f64 = 35.0;

/// Mode requested by `set_target_temperature`.
pub const DEFAULT_OPERATION_MODE: OperationMode = OperationMode::TadoMode;
/// Overlay termination used to switch a zone off.
pub const DEFAULT_OFF_MODE: OperationMode = OperationMode::Manual;

#[derive(Debug)]
pub enum SensorUpdateError {
    /// A value that should have been numeric was not.
    Malformed { field: String, value: String },
}

impl fmt::Display for SensorUpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorUpdateError::Malformed { field, value } => {
                write!(f, "malformed {} value: {:?}", field, value)
            }
        }
    }
}

impl std::error::Error for SensorUpdateError {}

/// Static description of a zone, fixed at setup.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneInfo {
    pub id: ZoneId,
    pub name: String,
    pub min_temp: f64,
    pub max_temp: f64,
    /// Cooling (air conditioning) zone rather than heating.
    pub ac_mode: bool,
}

impl ZoneInfo {
    pub fn from_capabilities(id: ZoneId, name: &str, caps: &ZoneCapabilities) -> Self {
        let range = caps.temperatures.as_ref().and_then(|t| t.celsius.as_ref());
        ZoneInfo {
            id,
            name: name.to_string(),
            min_temp: range.and_then(|r| r.min).unwrap_or(DEFAULT_MIN_TEMP),
            max_temp: range.and_then(|r| r.max).unwrap_or(DEFAULT_MAX_TEMP),
            ac_mode: caps.r#type.is_some_and(|t| t != ZoneType::Heating),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub current_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub current_humidity: Option<f64>,
    pub device_active: bool,
    pub away: bool,
    pub requested_mode: OperationMode,
    /// What was last sent to the remote; `None` forces the next step to re-evaluate.
    pub last_applied_mode: Option<OperationMode>,
    pub activated: bool,
}

impl ControllerState {
    pub fn new(target_temperature: Option<f64>) -> Self {
        ControllerState {
            current_temperature: None,
            target_temperature,
            current_humidity: None,
            device_active: false,
            away: false,
            requested_mode: OperationMode::SmartSchedule,
            last_applied_mode: Some(OperationMode::SmartSchedule),
            activated: false,
        }
    }
}

/// Snapshot handed to observers after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct ClimateStatus {
    pub zone_id: ZoneId,
    pub name: String,
    pub current_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub current_humidity: Option<f64>,
    pub operation_mode: OperationMode,
    pub operation_list: [OperationMode; 5],
    pub is_away: bool,
    pub is_active: bool,
    pub min_temp: f64,
    pub max_temp: f64,
    pub unit: &'static str,
}

/// Slack on the dead-band edges; sensor deltas like `21.0 - 20.7` are not exact in f64.
const DEAD_BAND_EPSILON: f64 = 1e-9;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Decision {
    RevertToSchedule,
    ApplyOverlay,
    Hold,
}

fn hysteresis(ac_mode: bool, device_active: bool, current: f64, target: f64, tolerance: f64) -> Decision {
    // overshoot: how far past the target the device has pushed the room
    let (overshoot, shortfall) = if ac_mode {
        (target - current, current - target)
    } else {
        (current - target, target - current)
    };

    let tolerance = tolerance + DEAD_BAND_EPSILON;
    if device_active {
        if overshoot > tolerance {
            Decision::RevertToSchedule
        } else {
            Decision::Hold
        }
    } else if shortfall > tolerance {
        Decision::ApplyOverlay
    } else {
        Decision::Hold
    }
}

pub struct ClimateController {
    zone: ZoneInfo,
    state: ControllerState,
    tolerance: f64,
    api: Rc<dyn ZoneApi>,
    observers: Vec<Sender<ClimateStatus>>,
}

impl ClimateController {
    pub fn new(zone: ZoneInfo, api: Rc<dyn ZoneApi>, tolerance: f64, target_temperature: Option<f64>) -> Self {
        ClimateController {
            zone,
            state: ControllerState::new(target_temperature),
            tolerance,
            api,
            observers: Vec::new(),
        }
    }

    pub fn zone(&self) -> &ZoneInfo {
        &self.zone
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn attach_observer(&mut self, tx: Sender<ClimateStatus>) {
        self.observers.push(tx);
    }

    pub fn status(&self) -> ClimateStatus {
        ClimateStatus {
            zone_id: self.zone.id,
            name: self.zone.name.clone(),
            current_temperature: self.state.current_temperature,
            target_temperature: self.state.target_temperature,
            current_humidity: self.state.current_humidity,
            operation_mode: self.state.requested_mode,
            operation_list: OperationMode::ALL,
            is_away: self.state.away,
            is_active: self.state.device_active,
            min_temp: self.zone.min_temp,
            max_temp: self.zone.max_temp,
            unit: UNIT_CELSIUS,
        }
    }

    /// Ask for `temperature` right now. `None` is ignored.
    pub fn set_target_temperature(&mut self, temperature: Option<f64>) {
        let Some(temperature) = temperature else {
            return;
        };
        if !(self.zone.min_temp..=self.zone.max_temp).contains(&temperature) {
            warn!(
                "Zone {}: target {} outside of {}..={}",
                self.zone.name, temperature, self.zone.min_temp, self.zone.max_temp
            );
        }

        self.state.requested_mode = DEFAULT_OPERATION_MODE;
        self.state.last_applied_mode = None;
        self.state.target_temperature = Some(temperature);
        self.run_control_step();
        self.notify();
    }

    pub fn set_operation_mode(&mut self, mode: OperationMode) {
        self.state.requested_mode = mode;
        self.state.last_applied_mode = None;
        self.run_control_step();
        self.notify();
    }

    /// Apply a tracked sensor's new state, re-run the control loop on temperature changes and
    /// notify observers. Malformed values are logged and leave that field unchanged.
    pub fn on_sensor_update(&mut self, field: FieldKind, state: &SensorState) -> Result<(), SensorUpdateError> {
        let result = self.apply_sensor_state(field, state);
        if let Err(e) = &result {
            error!("Zone {}: unable to update from {} sensor: {}", self.zone.name, field, e);
        }
        if field == FieldKind::Temperature {
            self.run_control_step();
        }
        self.notify();
        result
    }

    /// Mirror `state` into the controller without running the control loop or notifying.
    pub fn apply_sensor_state(&mut self, field: FieldKind, state: &SensorState) -> Result<(), SensorUpdateError> {
        match field {
            FieldKind::Temperature => {
                let unit = state.attributes.get(ATTR_UNIT_OF_MEASUREMENT).and_then(Value::as_str);
                let current = parse_number("temperature", &state.state).map(|v| to_celsius(v, unit));
                // a zone that is switched off reports no setting
                let target = match state.attributes.get(ATTR_SETTING) {
                    Some(v) => parse_value(ATTR_SETTING, v).map(|v| Some(to_celsius(v, unit))),
                    None => {
                        debug!("Zone {}: no setting reported, keeping last target", self.zone.name);
                        Ok(None)
                    }
                };
                if let Ok(c) = current {
                    self.state.current_temperature = Some(c);
                }
                if let Ok(Some(t)) = target {
                    self.state.target_temperature = Some(t);
                }
                current.and(target).map(|_| ())
            }
            FieldKind::Humidity => {
                self.state.current_humidity = Some(parse_number("humidity", &state.state)?);
                Ok(())
            }
            FieldKind::Heating => {
                self.state.device_active = parse_number("heating", &state.state)? > 0.0;
                Ok(())
            }
            FieldKind::TadoMode => {
                self.state.away = state.state == "AWAY";
                Ok(())
            }
            FieldKind::Power => {
                if state.state == "OFF" {
                    self.state.requested_mode = OperationMode::Off;
                    self.state.device_active = false;
                }
                Ok(())
            }
            FieldKind::Link | FieldKind::BridgeStatus => Ok(()),
        }
    }

    /// Decide whether the remote overlay has to change and issue at most one call.
    pub fn run_control_step(&mut self) {
        if !self.state.activated
            && self.state.current_temperature.is_some()
            && self.state.target_temperature.is_some()
        {
            self.state.activated = true;
            info!(
                "Zone {}: obtained current and target temperature, controller active",
                self.zone.name
            );
        }

        if !self.state.activated || self.state.last_applied_mode == Some(self.state.requested_mode) {
            return;
        }
        let (Some(current), Some(target)) = (self.state.current_temperature, self.state.target_temperature) else {
            return;
        };
        let zone_id = self.zone.id;

        match self.state.requested_mode {
            OperationMode::SmartSchedule => {
                info!("Zone {}: switching to smart schedule", self.zone.name);
                let result = self.api.set_zone_overlay(zone_id, OperationMode::SmartSchedule, None);
                if self.remote_ok("set schedule overlay", result) {
                    self.state.last_applied_mode = Some(OperationMode::SmartSchedule);
                }
            }
            OperationMode::Off => {
                info!("Zone {}: switching off", self.zone.name);
                let result = self.api.set_zone_overlay(zone_id, DEFAULT_OFF_MODE, None);
                if self.remote_ok("set off overlay", result) {
                    self.state.last_applied_mode = Some(OperationMode::Off);
                }
            }
            mode => {
                let decision = hysteresis(self.zone.ac_mode, self.state.device_active, current, target, self.tolerance);
                debug!(
                    "Zone {}: current={} target={} active={} -> {:?}",
                    self.zone.name, current, target, self.state.device_active, decision
                );
                match decision {
                    Decision::RevertToSchedule => {
                        info!("Zone {}: target reached, returning to schedule", self.zone.name);
                        let result = self.api.reset_zone_overlay(zone_id);
                        if !self.remote_ok("reset overlay", result) {
                            return;
                        }
                        self.state.requested_mode = OperationMode::SmartSchedule;
                    }
                    Decision::ApplyOverlay => {
                        info!("Zone {}: activating overlay at {}", self.zone.name, target);
                        let result = self.api.set_zone_overlay(zone_id, mode, Some(target));
                        if !self.remote_ok("set overlay", result) {
                            return;
                        }
                    }
                    Decision::Hold => {}
                }
                self.state.last_applied_mode = Some(self.state.requested_mode);
            }
        }
    }

    fn remote_ok(&self, what: &str, result: Result<(), TadoClientError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Zone {}: {} failed: {}", self.zone.name, what, e);
                false
            }
        }
    }

    fn notify(&mut self) {
        if self.observers.is_empty() {
            return;
        }
        let status = self.status();
        self.observers.retain(|tx| tx.send(status.clone()).is_ok());
    }
}

fn parse_number(field: &str, raw: &str) -> Result<f64, SensorUpdateError> {
    raw.trim().parse::<f64>().map_err(|_| SensorUpdateError::Malformed {
        field: field.to_string(),
        value: raw.to_string(),
    })
}

fn parse_value(field: &str, value: &Value) -> Result<f64, SensorUpdateError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| SensorUpdateError::Malformed {
            field: field.to_string(),
            value: n.to_string(),
        }),
        Value::String(s) => parse_number(field, s),
        other => Err(SensorUpdateError::Malformed {
            field: field.to_string(),
            value: other.to_string(),
        }),
    }
}
