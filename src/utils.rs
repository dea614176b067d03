use serde::Serialize;

pub const UNIT_CELSIUS: &str = "°C";
pub const UNIT_FAHRENHEIT: &str = "°F";
pub const UNIT_KELVIN: &str = "K";
pub const UNIT_PERCENT: &str = "%";

/// Serialize a serde-backed enum into its string name (e.g. SCREAMING_SNAKE_CASE).
pub fn serde_enum_name<T: Serialize>(val: &T) -> Option<String> {
    serde_json::to_value(val).ok()?.as_str().map(|s| s.to_string())
}

/// Convert a temperature reported in `unit` to Celsius. Unknown or missing units are taken
/// as Celsius already.
pub fn to_celsius(value: f64, unit: Option<&str>) -> f64 {
    match unit.map(str::trim) {
        Some(UNIT_FAHRENHEIT) => (value - 32.0) * 5.0 / 9.0,
        Some(UNIT_KELVIN) => value - 273.15,
        _ => value,
    }
}

/// Host entity id for a named object, e.g. `sensor.living_room_tado_mode`.
pub fn entity_id(domain: &str, name: &str) -> String {
    format!("{}.{}", domain, name.trim().to_lowercase().replace(' ', "_"))
}
