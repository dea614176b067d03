//! Offline stand-in for the tado° API.
//!
//! Zone readings follow a daily routine with seeded noise; overlays sent by the controllers
//! override the scheduled setpoint until they are reset, and heating power reacts to the gap
//! between setpoint and room temperature.

use crate::client::{TadoClientError, ZoneApi};
use crate::models::tado::*;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::f64::consts::PI;

pub const SIM_HOME_ID: HomeId = HomeId(4_201_337);
const SIM_HOME_NAME: &str = "Simulated Home";
const ZONES: [(&str, ZoneType); 4] = [
    ("Living Room", ZoneType::Heating),
    ("Kitchen", ZoneType::Heating),
    ("Bedroom", ZoneType::Heating),
    ("Home Office", ZoneType::AirConditioning),
];

#[derive(Debug, Clone, Copy, PartialEq)]
struct SimOverlay {
    power: Power,
    temperature: Option<f64>,
}

type Clock = Box<dyn Fn() -> DateTime<Utc>>;

pub struct SimulatedTado {
    rng: RefCell<SmallRng>,
    overlays: RefCell<BTreeMap<ZoneId, SimOverlay>>,
    clock: Clock,
}

impl SimulatedTado {
    pub fn new(seed: u64) -> Self {
        Self::with_clock(seed, Box::new(Utc::now))
    }

    pub fn with_clock(seed: u64, clock: Clock) -> Self {
        info!("Simulator: {} zone(s) in home {}", ZONES.len(), SIM_HOME_ID.0);
        SimulatedTado {
            rng: RefCell::new(SmallRng::seed_from_u64(seed)),
            overlays: RefCell::new(BTreeMap::new()),
            clock,
        }
    }

    fn zone(&self, zone_id: ZoneId) -> Result<(usize, ZoneType), TadoClientError> {
        usize::try_from(zone_id.0 - 1)
            .ok()
            .and_then(|i| ZONES.get(i).map(|(_, kind)| (i, *kind)))
            .ok_or(TadoClientError::Http {
                status: 404,
                message: format!("zone {} not found", zone_id.0),
            })
    }
}

impl ZoneApi for SimulatedTado {
    fn get_zones(&self) -> Result<Vec<Zone>, TadoClientError> {
        Ok(ZONES
            .iter()
            .enumerate()
            .map(|(i, (name, kind))| Zone {
                id: Some(ZoneId(i as i64 + 1)),
                name: Some(name.to_string()),
                r#type: Some(*kind),
                ..Default::default()
            })
            .collect())
    }

    fn get_capabilities(&self, zone_id: ZoneId) -> Result<ZoneCapabilities, TadoClientError> {
        let (_, kind) = self.zone(zone_id)?;
        let (min, max) = match kind {
            ZoneType::AirConditioning => (16.0, 30.0),
            _ => (5.0, 25.0),
        };
        Ok(ZoneCapabilities {
            r#type: Some(kind),
            temperatures: Some(TemperatureCapability {
                celsius: Some(TemperatureRange {
                    min: Some(min),
                    max: Some(max),
                    step: Some(0.1),
                }),
                fahrenheit: None,
            }),
            can_set_temperature: Some(true),
        })
    }

    fn get_state(&self, zone_id: ZoneId) -> Result<ZoneState, TadoClientError> {
        let (index, kind) = self.zone(zone_id)?;
        let now = (self.clock)();
        let day_fraction = now.num_seconds_from_midnight() as f64 / 86_400.0;
        let annual_fraction = now.ordinal0() as f64 / 365.0;
        let weekday = now.weekday();
        let zone_index = index as f64;
        let overlay = self.overlays.borrow().get(&zone_id).copied();
        let mut rng = self.rng.borrow_mut();

        let outside = compute_outside_temp(day_fraction, annual_fraction, &mut rng);
        let scheduled = compute_setpoint(zone_index, day_fraction, weekday);
        let (power, setpoint) = match overlay {
            Some(SimOverlay { power: Power::Off, .. }) => (Power::Off, None),
            Some(SimOverlay { temperature, .. }) => (Power::On, temperature.or(Some(scheduled))),
            None => (Power::On, Some(scheduled)),
        };
        let inside = compute_inside_temp(setpoint.unwrap_or(scheduled - 3.0), outside, zone_index, &mut rng);
        let humidity = compute_humidity(outside, annual_fraction, zone_index, &mut rng);
        let heating = match (kind, setpoint) {
            (ZoneType::Heating, Some(sp)) => compute_heating_power(sp, inside, &mut rng),
            _ => 0.0,
        };
        let away = !is_weekend(weekday) && (0.36..0.70).contains(&day_fraction);

        Ok(ZoneState {
            tado_mode: Some(if away { HomePresence::Away } else { HomePresence::Home }),
            setting: Some(ZoneSetting {
                r#type: Some(kind),
                power: Some(power),
                temperature: setpoint.map(|c| Temperature {
                    celsius: Some(round1(c)),
                    fahrenheit: Some(round1(c * 9.0 / 5.0 + 32.0)),
                }),
                ..Default::default()
            }),
            overlay_type: overlay.map(|_| ZoneOverlayType("MANUAL".to_string())),
            link: Some(ZoneStateLink {
                state: Some("ONLINE".to_string()),
                reason: None,
            }),
            activity_data_points: Some(ActivityDataPoints {
                heating_power: (kind == ZoneType::Heating).then(|| PercentageDataPoint {
                    r#type: Some("PERCENTAGE".to_string()),
                    percentage: Some(heating.round()),
                    timestamp: Some(now),
                }),
                ac_power: (kind == ZoneType::AirConditioning).then(|| PowerDataPoint {
                    r#type: Some("POWER".to_string()),
                    value: Some(match setpoint {
                        Some(sp) if inside > sp => Power::On,
                        _ => Power::Off,
                    }),
                    timestamp: Some(now),
                }),
            }),
            sensor_data_points: Some(SensorDataPoints {
                inside_temperature: Some(TemperatureDataPoint {
                    celsius: Some(round1(inside)),
                    fahrenheit: Some(round1(inside * 9.0 / 5.0 + 32.0)),
                    timestamp: Some(now),
                    r#type: Some("TEMPERATURE".to_string()),
                }),
                humidity: Some(PercentageDataPoint {
                    r#type: Some("PERCENTAGE".to_string()),
                    percentage: Some(round1(humidity)),
                    timestamp: Some(now),
                }),
            }),
            ..Default::default()
        })
    }

    fn get_devices(&self) -> Result<Vec<Device>, TadoClientError> {
        Ok(vec![Device {
            device_type: Some(DeviceType("IB01".to_string())),
            serial_no: Some(DeviceId("IB0000000000".to_string())),
            short_serial_no: Some("IB0000000000".to_string()),
            current_fw_version: Some("118.1".to_string()),
            connection_state: Some(DeviceConnectionState {
                value: Some(true),
                timestamp: Some((self.clock)()),
            }),
            battery_state: None,
        }])
    }

    fn get_me(&self) -> Result<User, TadoClientError> {
        Ok(User {
            name: Some("Simulator".to_string()),
            homes: Some(vec![HomeBase {
                id: Some(SIM_HOME_ID),
                name: Some(SIM_HOME_NAME.to_string()),
            }]),
            ..Default::default()
        })
    }

    fn set_zone_overlay(
        &self,
        zone_id: ZoneId,
        mode: OperationMode,
        temperature: Option<f64>,
    ) -> Result<(), TadoClientError> {
        self.zone(zone_id)?;
        if mode == OperationMode::SmartSchedule {
            return self.reset_zone_overlay(zone_id);
        }
        let overlay = match temperature {
            Some(t) if mode != OperationMode::Off => SimOverlay {
                power: Power::On,
                temperature: Some(t),
            },
            _ => SimOverlay {
                power: Power::Off,
                temperature: None,
            },
        };
        info!("Simulator: zone {} overlay {} {:?}", zone_id.0, mode, overlay);
        self.overlays.borrow_mut().insert(zone_id, overlay);
        Ok(())
    }

    fn reset_zone_overlay(&self, zone_id: ZoneId) -> Result<(), TadoClientError> {
        self.zone(zone_id)?;
        info!("Simulator: zone {} back on schedule", zone_id.0);
        self.overlays.borrow_mut().remove(&zone_id);
        Ok(())
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn compute_outside_temp(day_fraction: f64, annual_fraction: f64, rng: &mut SmallRng) -> f64 {
    let seasonal = (annual_fraction * 2.0 * PI).sin() * 12.0;
    let diurnal = ((day_fraction - 0.3) * 2.0 * PI).sin() * 5.0;
    let random_variation = rng.random_range(-1.8..=1.8);
    (8.5 + seasonal + diurnal + random_variation).clamp(-12.0, 34.0)
}

fn compute_setpoint(zone_index: f64, day_fraction: f64, weekday: Weekday) -> f64 {
    let base = 19.0 + zone_index * 0.35;
    let routine = routine_profile(day_fraction, weekday) * 1.2;
    let weekend_bonus = if is_weekend(weekday) { 0.5 } else { 0.0 };
    round1((base + weekend_bonus + routine).clamp(17.5, 23.5))
}

fn compute_inside_temp(setpoint: f64, outside_temp: f64, zone_index: f64, rng: &mut SmallRng) -> f64 {
    let infiltration = (setpoint - outside_temp).max(0.0) * rng.random_range(0.02..=0.08);
    let zone_bias = (zone_index + 1.0).sin() * 0.4;
    let random = rng.random_range(-0.6..=0.6);
    (setpoint - infiltration + zone_bias + random).clamp(15.0, 26.5)
}

fn compute_humidity(outside_temp: f64, annual_fraction: f64, zone_index: f64, rng: &mut SmallRng) -> f64 {
    let seasonal = ((annual_fraction + 0.1) * 2.0 * PI).cos() * 10.0;
    let temperature_component = (18.0 - outside_temp).clamp(-12.0, 12.0) * 0.8;
    let zone_bias = (zone_index * 1.7).sin() * 3.0;
    let random = rng.random_range(-4.0..=4.0);
    (50.0 + seasonal + temperature_component + zone_bias + random).clamp(30.0, 75.0)
}

fn compute_heating_power(setpoint: f64, inside_temp: f64, rng: &mut SmallRng) -> f64 {
    let deficit = (setpoint - inside_temp).max(0.0);
    if deficit == 0.0 {
        return 0.0;
    }
    (deficit * 55.0 + rng.random_range(0.0..=8.0)).clamp(0.0, 100.0)
}

fn routine_profile(day_fraction: f64, weekday: Weekday) -> f64 {
    let morning_peak = gaussian(day_fraction, 0.27, 0.045) * 1.8;
    let evening_peak = gaussian(day_fraction, 0.77, 0.05) * 2.0;
    let midday = if is_weekend(weekday) {
        0.5 * gaussian(day_fraction, 0.45, 0.09)
    } else {
        -0.4 * gaussian(day_fraction, 0.5, 0.12)
    };
    (morning_peak + evening_peak + midday).max(0.0)
}

fn gaussian(x: f64, center: f64, width: f64) -> f64 {
    (-((x - center) * (x - center)) / (2.0 * width * width)).exp()
}

fn is_weekend(weekday: Weekday) -> bool {
    matches!(weekday, Weekday::Sat | Weekday::Sun)
}
