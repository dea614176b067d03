pub mod models {
    pub mod tado;
}

pub mod client;
pub mod config;
pub mod utils;
pub mod services {
    pub mod cache;
    pub mod climate;
    pub mod host;
    pub mod platform;
    pub mod realtime;
    pub mod sensor;
    pub mod simulator;
}
#[cfg(test)]
pub mod testing;

use crate::client::{TadoClient, ZoneApi};
use crate::config::Config;
use crate::models::tado::HomeId;
use crate::services::cache::SensorCache;
use crate::services::platform::{self, ClimateSettings};
use crate::services::realtime::{self, Runtime};
use crate::services::simulator::{SIM_HOME_ID, SimulatedTado};
use log::{error, info, warn};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

/// Build the remote API and return it with the home it is bound to.
fn connect(cfg: &Config) -> Result<(Rc<dyn ZoneApi>, HomeId), String> {
    if cfg.simulate {
        info!("TADO_SIMULATE set; using simulated home (seed {})", cfg.simulator_seed);
        return Ok((Rc::new(SimulatedTado::new(cfg.simulator_seed)), SIM_HOME_ID));
    }

    let token = cfg
        .tado_refresh_token
        .clone()
        .ok_or_else(|| "Missing refresh token".to_string())?;
    let client = TadoClient::new(token, cfg.tado_refresh_token_file.clone(), cfg.overlay_timer)
        .map_err(|e| format!("Tado auth failed (refresh token invalid/expired?): {}", e))?;
    info!("Authenticated to Tado API");

    let home_id = match cfg.home_id {
        Some(id) => HomeId(id),
        None => {
            let me = client.get_me().map_err(|e| format!("get_me failed: {}", e))?;
            me.homes
                .as_deref()
                .unwrap_or(&[])
                .iter()
                .find_map(|h| h.id)
                .ok_or_else(|| "No homes found; ensure the account has homes".to_string())?
        }
    };
    info!("Controlling home {}", home_id.0);
    Ok((Rc::new(client.with_home(home_id)), home_id))
}

pub fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (simulate={}, poll_interval={}s, sensor_refresh={}s, tolerance={}, default_target={}, overlay_timer={}s)",
        cfg.simulate,
        cfg.poll_interval.as_secs(),
        cfg.sensor_refresh_interval.as_secs(),
        cfg.tolerance,
        cfg.default_target_temp,
        cfg.overlay_timer.as_secs()
    );

    // 2) Remote API
    let (api, home_id) = connect(&cfg)?;

    // 3) Sensors and the shared cache behind them
    let cache = Rc::new(RefCell::new(SensorCache::new(Rc::clone(&api), cfg.sensor_refresh_interval)));
    let sensors = match platform::setup_sensors(&api, &cache, Some(home_id)) {
        Ok(views) => views,
        Err(e) => {
            warn!("Sensor setup failed: {}", e);
            Vec::new()
        }
    };
    let mut runtime = Runtime::new(sensors);
    // publish initial readings so climate setup can seed from them
    runtime.poll_once();

    // 4) Climate controllers
    let settings = ClimateSettings {
        tolerance: cfg.tolerance,
        default_target_temp: cfg.default_target_temp,
    };
    match platform::setup_climate(&api, runtime.registry_mut(), settings) {
        Ok(controllers) => runtime.add_controllers(controllers),
        Err(e) => warn!("Climate setup failed: {}", e),
    }
    if runtime.entity_count() == 0 {
        return Err("Nothing to run: neither sensors nor climate zones could be set up".into());
    }

    // 5) Update loop (steady cadence), zone commands from stdin
    let commands = realtime::spawn_command_reader();
    info!(
        "Starting update loop: entities={}, interval={}s; commands on stdin: {}",
        runtime.entity_count(),
        cfg.poll_interval.as_secs(),
        realtime::COMMAND_USAGE
    );
    realtime::run_loop(&mut runtime, cfg.poll_interval, &commands)
}

fn env_file_from_cli() -> Result<Option<PathBuf>, String> {
    let mut args = std::env::args().skip(1);
    let mut env_file = None;
    while let Some(arg) = args.next() {
        let value = match arg.as_str() {
            "--env-file" => args.next(),
            s if s.starts_with("--env-file=") => Some(s["--env-file=".len()..].to_string()),
            "--" => break,
            other => return Err(format!("unrecognised argument: {}", other)),
        };
        let value = value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
        if env_file.replace(PathBuf::from(value)).is_some() {
            return Err("`--env-file` provided more than once".to_string());
        }
    }
    Ok(env_file)
}

fn load_env() -> Result<Option<(PathBuf, usize)>, String> {
    let path = match env_file_from_cli()? {
        Some(path) if !path.is_file() => return Err(format!("env file not found: {}", path.display())),
        Some(path) => path,
        None => {
            let default_path = PathBuf::from(".env");
            if !default_path.is_file() {
                return Ok(None);
            }
            default_path
        }
    };
    let applied = config::load_env_file(&path)?;
    Ok(Some((path, applied)))
}

fn main() {
    let loaded_env = match load_env() {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    if let Some((path, applied)) = loaded_env {
        info!("Environment loaded from {} ({} variable(s) applied)", path.display(), applied);
    }

    info!(
        "tado-overlay {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
