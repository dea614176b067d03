use crate::client::{TadoClientError, ZoneApi};
use crate::models::tado::{self, HomeId, ZoneId, ZoneType};
use crate::services::cache::{CacheKey, SensorCache};
use crate::services::climate::{ClimateController, ZoneInfo};
use crate::services::host::StateRegistry;
use crate::services::sensor::{FieldKind, SensorView};
use crate::utils::entity_id;
use log::{info, warn};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Sensors a climate controller follows.
pub const CLIMATE_SENSOR_FIELDS: [FieldKind; 5] = [
    FieldKind::Temperature,
    FieldKind::Humidity,
    FieldKind::Heating,
    FieldKind::TadoMode,
    FieldKind::Power,
];

/// Sensors exposed for every climate zone.
pub const ZONE_SENSOR_FIELDS: [FieldKind; 6] = [
    FieldKind::Temperature,
    FieldKind::Humidity,
    FieldKind::Power,
    FieldKind::Link,
    FieldKind::Heating,
    FieldKind::TadoMode,
];

#[derive(Debug)]
pub enum SetupError {
    Api(TadoClientError),
    /// Zone discovery returned nothing usable.
    NoZones,
    /// Discovery succeeded but produced no entity to register.
    NoEntities,
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Api(e) => write!(f, "api error: {}", e),
            SetupError::NoZones => write!(f, "no zones found"),
            SetupError::NoEntities => write!(f, "no entities to register"),
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::Api(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TadoClientError> for SetupError {
    fn from(value: TadoClientError) -> Self {
        SetupError::Api(value)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClimateSettings {
    pub tolerance: f64,
    pub default_target_temp: f64,
}

/// Zones that get sensor views and a controller. Hot water has neither.
fn is_climate_zone(zone_type: Option<ZoneType>) -> bool {
    matches!(zone_type, Some(ZoneType::Heating | ZoneType::AirConditioning))
}

fn zone_name(zone: &tado::Zone, id: ZoneId) -> String {
    zone.name.clone().unwrap_or_else(|| format!("Zone {}", id.0))
}

fn discover_zones(api: &dyn ZoneApi) -> Result<Vec<(ZoneId, String, Option<ZoneType>)>, SetupError> {
    let zones = api.get_zones()?;
    let found = zones
        .iter()
        .filter_map(|z| match z.id {
            Some(id) => Some((id, zone_name(z, id), z.r#type)),
            None => {
                warn!("Setup: skipping zone without id ({:?})", z.name);
                None
            }
        })
        .collect::<Vec<_>>();
    if found.is_empty() {
        return Err(SetupError::NoZones);
    }
    Ok(found)
}

/// Create one controller per zone, seed each from states already in `registry` and subscribe
/// it to its zone's sensors. Nothing is subscribed unless every zone set up.
pub fn setup_climate(
    api: &Rc<dyn ZoneApi>,
    registry: &mut StateRegistry,
    settings: ClimateSettings,
) -> Result<Vec<ClimateController>, SetupError> {
    let zones = discover_zones(api.as_ref())?;

    let mut controllers = Vec::with_capacity(zones.len());
    let mut tracked = Vec::new();
    for (zone_id, name, zone_type) in zones {
        if !is_climate_zone(zone_type) {
            info!("Setup: zone {} '{}' has no climate sensors; no controller", zone_id.0, name);
            continue;
        }
        let caps = api.get_capabilities(zone_id)?;
        let info = ZoneInfo::from_capabilities(zone_id, &name, &caps);
        let mut controller = ClimateController::new(
            info,
            Rc::clone(api),
            settings.tolerance,
            Some(settings.default_target_temp),
        );

        for field in CLIMATE_SENSOR_FIELDS {
            let entity = entity_id("sensor", &format!("{} {}", name, field.suffix()));
            if let Some(state) = registry.get(&entity) {
                // errors are logged by the controller; seeding continues
                let _ = controller.apply_sensor_state(field, state);
            }
            tracked.push((entity, zone_id, field));
        }
        info!(
            "Setup: climate zone {} '{}' (min={}, max={}, ac={})",
            zone_id.0,
            name,
            controller.zone().min_temp,
            controller.zone().max_temp,
            controller.zone().ac_mode
        );
        controllers.push(controller);
    }

    if controllers.is_empty() {
        return Err(SetupError::NoEntities);
    }
    for (entity, zone_id, field) in tracked {
        registry.track(&entity, zone_id, field);
    }
    info!("Setup: activated state tracking for {} sensor(s)", registry.subscription_count());
    Ok(controllers)
}

/// Create the sensor views for every climate zone plus the bridge status of `home_id` (the
/// account's first home when `None`), register their cache keys and prime the cache.
pub fn setup_sensors(
    api: &Rc<dyn ZoneApi>,
    cache: &Rc<RefCell<SensorCache>>,
    home_id: Option<HomeId>,
) -> Result<Vec<SensorView>, SetupError> {
    let zones = discover_zones(api.as_ref())?;

    let mut views = Vec::new();
    for (zone_id, name, zone_type) in zones {
        if !is_climate_zone(zone_type) {
            continue;
        }
        let key = cache.borrow_mut().register_zone_key(zone_id);
        for field in ZONE_SENSOR_FIELDS {
            views.push(SensorView::new(Rc::clone(cache), key, field, &name));
        }
    }

    let me = api.get_me()?;
    let homes = me.homes.unwrap_or_default();
    let home = match home_id {
        Some(id) => Some((id, homes.iter().find(|h| h.id == Some(id)).and_then(|h| h.name.clone()))),
        None => homes.iter().find_map(|h| h.id.map(|id| (id, h.name.clone()))),
    };
    match home {
        Some((home_id, name)) => {
            let key: CacheKey = cache.borrow_mut().register_device_key(home_id);
            let home_name = name.unwrap_or_else(|| format!("Home {}", home_id.0));
            views.push(SensorView::new(Rc::clone(cache), key, FieldKind::BridgeStatus, &home_name));
        }
        None => warn!("Setup: account lists no home; skipping bridge status sensor"),
    }

    if views.is_empty() {
        return Err(SetupError::NoEntities);
    }

    cache.borrow_mut().refresh();
    info!("Setup: {} sensor(s) registered", views.len());
    Ok(views)
}
