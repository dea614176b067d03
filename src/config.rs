//! Runtime configuration from environment variables, optionally seeded from a `.env` file.

use crate::services::cache::DEFAULT_REFRESH_INTERVAL;
use crate::services::climate::{DEFAULT_TARGET_TEMP, DEFAULT_TOLERANCE};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

pub const DEFAULT_POLL_SECS: u64 = 30;
pub const DEFAULT_OVERLAY_TIMER_SECS: u64 = 3600;
pub const DEFAULT_TOKEN_FILE: &str = "token.txt";
pub const DEFAULT_SIMULATOR_SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// OAuth refresh token; `None` only when running against the simulator.
    pub tado_refresh_token: Option<String>,
    /// Where rotated refresh tokens are written back.
    pub tado_refresh_token_file: Option<PathBuf>,
    /// Home to control; defaults to the first home on the account.
    pub home_id: Option<i64>,
    pub simulate: bool,
    pub simulator_seed: u64,
    /// Minimum spacing between remote refreshes of the shared sensor cache.
    pub sensor_refresh_interval: Duration,
    pub poll_interval: Duration,
    pub tolerance: f64,
    pub default_target_temp: f64,
    pub overlay_timer: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let simulate = get("TADO_SIMULATE").map(|v| parse_flag(&v)).unwrap_or(false);
        let token_file = PathBuf::from(get("TADO_REFRESH_TOKEN_FILE").unwrap_or_else(|| DEFAULT_TOKEN_FILE.into()));

        let tado_refresh_token = match get("TADO_REFRESH_TOKEN") {
            Some(v) => Some(v),
            None => read_token_file(&token_file),
        };
        if tado_refresh_token.is_none() && !simulate {
            return Err(format!(
                "Missing refresh token: set TADO_REFRESH_TOKEN or provide {} (or set TADO_SIMULATE=true)",
                token_file.display()
            ));
        }

        let home_id = get("TADO_HOME_ID")
            .map(|v| v.parse::<i64>().map_err(|_| format!("TADO_HOME_ID must be an integer, got '{}'", v)))
            .transpose()?;

        let simulator_seed = parse_or("SIMULATOR_SEED", get("SIMULATOR_SEED"), DEFAULT_SIMULATOR_SEED)?;
        let sensor_refresh_secs = parse_or(
            "SENSOR_REFRESH_SECS",
            get("SENSOR_REFRESH_SECS"),
            DEFAULT_REFRESH_INTERVAL.as_secs(),
        )?;
        let poll_secs = parse_or("POLL_INTERVAL_SECS", get("POLL_INTERVAL_SECS"), DEFAULT_POLL_SECS)?;
        let overlay_timer_secs = parse_or("OVERLAY_TIMER_SECS", get("OVERLAY_TIMER_SECS"), DEFAULT_OVERLAY_TIMER_SECS)?;
        let tolerance = parse_or("CONTROL_TOLERANCE", get("CONTROL_TOLERANCE"), DEFAULT_TOLERANCE)?;
        let default_target_temp = parse_or("DEFAULT_TARGET_TEMP", get("DEFAULT_TARGET_TEMP"), DEFAULT_TARGET_TEMP)?;

        if poll_secs == 0 {
            return Err("POLL_INTERVAL_SECS must be greater than zero".to_string());
        }
        if !(tolerance.is_finite() && tolerance >= 0.0) {
            return Err(format!("CONTROL_TOLERANCE must be a non-negative number, got {}", tolerance));
        }

        Ok(Config {
            tado_refresh_token,
            tado_refresh_token_file: Some(token_file),
            home_id,
            simulate,
            simulator_seed,
            sensor_refresh_interval: Duration::from_secs(sensor_refresh_secs),
            poll_interval: Duration::from_secs(poll_secs),
            tolerance,
            default_target_temp,
            overlay_timer: Duration::from_secs(overlay_timer_secs),
        })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_or<T: std::str::FromStr>(key: &str, value: Option<String>, default: T) -> Result<T, String> {
    match value {
        Some(v) => v.parse::<T>().map_err(|_| format!("{} has an invalid value: '{}'", key, v)),
        None => Ok(default),
    }
}

fn read_token_file(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Apply `KEY=VALUE` lines from `path` to the process environment. Variables that are already
/// set keep their value.
pub fn load_env_file(path: &Path) -> Result<usize, String> {
    let contents = fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let mut applied = 0;
    for (key, value) in parse_env_file(&contents).map_err(|e| format!("{}:{}", path.display(), e))? {
        if env::var_os(&key).is_none() {
            // SAFETY: called once during startup, before any other thread exists.
            unsafe {
                env::set_var(&key, value);
            }
            applied += 1;
        }
    }
    Ok(applied)
}

/// Parse `.env` contents into ordered assignments. Errors carry the 1-based line number.
pub fn parse_env_file(contents: &str) -> Result<Vec<(String, String)>, String> {
    let mut pairs = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
        let (key, raw) = line
            .split_once('=')
            .ok_or_else(|| format!("{}: missing '=' in assignment", index + 1))?;
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(format!("{}: invalid variable name '{}'", index + 1, key));
        }
        let value = unquote(raw.trim()).map_err(|e| format!("{}: {}", index + 1, e))?;
        pairs.push((key.to_string(), value));
    }
    Ok(pairs)
}

fn unquote(raw: &str) -> Result<String, String> {
    let Some(quote) = raw.chars().next().filter(|c| *c == '"' || *c == '\'') else {
        // unquoted values end at an inline comment
        let value = raw.split(" #").next().unwrap_or_default();
        return Ok(value.trim_end().to_string());
    };

    let mut out = String::new();
    let mut chars = raw[1..].chars();
    while let Some(ch) = chars.next() {
        match ch {
            c if c == quote => {
                let rest = chars.as_str().trim();
                if rest.is_empty() || rest.starts_with('#') {
                    return Ok(out);
                }
                return Err(format!("unexpected text after closing quote: '{}'", rest));
            }
            '\\' if quote == '"' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => break,
            },
            c => out.push(c),
        }
    }
    Err("unterminated quoted value".to_string())
}
