//! Blocking HTTP client for the tado° API, limited to the zone control endpoints this
//! integration needs.
//!
//! - Blocking client using `ureq` (no async).
//! - Bound to a single home once `with_home` has been called.
//!
//! Authentication
//! - OAuth2 refresh-token grant against the tado login service. tado rotates refresh tokens,
//!   so the newest one is written back to the token file when one is configured.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use http::{Response, StatusCode};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use ureq::Body;

use crate::models::tado::*;

const BASE_URL: &str = "https://my.tado.com/api/v2";
const OAUTH_TOKEN_URL: &str = "https://login.tado.com/oauth2/token";
const OAUTH_CLIENT_ID: &str = "1bb50063-6b0c-4d11-bd99-387f4a91cc46";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum TadoClientError {
    MissingAuth,
    MissingHome,
    Transport(String),
    Http { status: u16, message: String },
    Json(serde_path_to_error::Error<serde_json::Error>),
    Auth(String),
}

impl core::fmt::Display for TadoClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TadoClientError::MissingAuth => write!(f, "missing bearer token for authenticated endpoint"),
            TadoClientError::MissingHome => write!(f, "no home selected for home-scoped endpoint"),
            TadoClientError::Transport(s) => write!(f, "transport error: {}", s),
            TadoClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            TadoClientError::Json(e) => write!(f, "json error: {}", e),
            TadoClientError::Auth(e) => write!(f, "auth error: {}", e),
        }
    }
}

impl std::error::Error for TadoClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TadoClientError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_path_to_error::Error<serde_json::Error>> for TadoClientError {
    fn from(value: serde_path_to_error::Error<serde_json::Error>) -> Self {
        TadoClientError::Json(value)
    }
}

impl From<ureq::Error> for TadoClientError {
    fn from(value: ureq::Error) -> Self {
        TadoClientError::Transport(value.to_string())
    }
}

/// Remote zone control API consumed by the cache, the controllers and platform setup.
///
/// Implemented by [`TadoClient`] for the real service and by the simulator.
pub trait ZoneApi {
    fn get_zones(&self) -> Result<Vec<Zone>, TadoClientError>;
    fn get_capabilities(&self, zone_id: ZoneId) -> Result<ZoneCapabilities, TadoClientError>;
    fn get_state(&self, zone_id: ZoneId) -> Result<ZoneState, TadoClientError>;
    fn get_devices(&self) -> Result<Vec<Device>, TadoClientError>;
    fn get_me(&self) -> Result<User, TadoClientError>;
    /// Apply an overlay. `OperationMode::SmartSchedule` hands the zone back to its schedule;
    /// a missing temperature switches the zone off for the given termination.
    fn set_zone_overlay(
        &self,
        zone_id: ZoneId,
        mode: OperationMode,
        temperature: Option<f64>,
    ) -> Result<(), TadoClientError>;
    fn reset_zone_overlay(&self, zone_id: ZoneId) -> Result<(), TadoClientError>;
}

#[derive(Debug, Clone)]
struct OAuthToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug)]
struct OAuthState {
    token: Option<OAuthToken>,
    refresh_token: String,
    refresh_token_file: Option<PathBuf>,
}

pub struct TadoClient {
    agent: ureq::Agent,
    oauth: RefCell<OAuthState>,
    home_id: Option<HomeId>,
    zone_types: RefCell<BTreeMap<ZoneId, ZoneType>>,
    timer_duration: Duration,
}

impl TadoClient {
    pub fn new(
        refresh_token: impl Into<String>,
        refresh_token_file: Option<PathBuf>,
        timer_duration: Duration,
    ) -> Result<Self, TadoClientError> {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        let agent = ureq::Agent::new_with_config(config);

        let mut state = OAuthState {
            token: None,
            refresh_token: refresh_token.into(),
            refresh_token_file,
        };

        // Fetch initial token
        Self::oauth_refresh_grant(&agent, &mut state)?;

        Ok(TadoClient {
            agent,
            oauth: RefCell::new(state),
            home_id: None,
            zone_types: RefCell::new(BTreeMap::new()),
            timer_duration,
        })
    }

    /// Bind home-scoped calls to `home_id`.
    pub fn with_home(mut self, home_id: HomeId) -> Self {
        self.home_id = Some(home_id);
        self
    }

    fn url(path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", BASE_URL, path)
        } else {
            format!("{}/{}", BASE_URL, path)
        }
    }

    fn home_path(&self, suffix: &str) -> Result<String, TadoClientError> {
        let home = self.home_id.ok_or(TadoClientError::MissingHome)?;
        Ok(format!("/homes/{}{}", home.0, suffix))
    }

    fn oauth_refresh_grant(agent: &ureq::Agent, state: &mut OAuthState) -> Result<(), TadoClientError> {
        #[derive(serde::Deserialize)]
        struct R {
            access_token: String,
            expires_in: u64,
            #[serde(default)]
            refresh_token: Option<String>,
        }

        let mut resp = agent
            .post(OAUTH_TOKEN_URL)
            .header("Accept", "application/json")
            .send_form([
                ("client_id", OAUTH_CLIENT_ID),
                ("grant_type", "refresh_token"),
                ("refresh_token", state.refresh_token.as_str()),
            ])?;
        let body = resp.body_mut().read_to_string()?;
        if !resp.status().is_success() {
            return Err(TadoClientError::Auth(format!("http {}: {}", resp.status().as_u16(), body)));
        }

        let R {
            access_token,
            expires_in,
            refresh_token,
        } = decode_json(&body)?;
        state.token = Some(OAuthToken {
            access_token,
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        });

        if let Some(rotated) = refresh_token
            && rotated != state.refresh_token
        {
            state.refresh_token = rotated;
            if let Some(path) = state.refresh_token_file.as_ref() {
                match fs::write(path, &state.refresh_token) {
                    Ok(()) => debug!("Persisted rotated refresh token to {}", path.display()),
                    Err(e) => warn!("Unable to persist refresh token to {}: {}", path.display(), e),
                }
            }
        }
        Ok(())
    }

    fn get_bearer(&self) -> Result<String, TadoClientError> {
        let mut s = self.oauth.borrow_mut();
        let needs_refresh = match &s.token {
            None => true,
            Some(t) => Instant::now() + TOKEN_EXPIRY_MARGIN >= t.expires_at,
        };
        if needs_refresh {
            Self::oauth_refresh_grant(&self.agent, &mut s)?;
        }
        s.token
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or(TadoClientError::MissingAuth)
    }

    fn force_refresh(&self) -> Result<(), TadoClientError> {
        let mut s = self.oauth.borrow_mut();
        s.token = None;
        Self::oauth_refresh_grant(&self.agent, &mut s)
    }

    /// Run `call` with a bearer token; on 401 refresh the token once and repeat.
    fn execute<F>(&self, call: F) -> Result<Response<Body>, TadoClientError>
    where
        F: Fn(String) -> Result<Response<Body>, ureq::Error>,
    {
        let resp = call(format!("Bearer {}", self.get_bearer()?))?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Self::check_status(resp);
        }

        info!("Access token rejected; refreshing and retrying once");
        self.force_refresh()?;
        let resp = call(format!("Bearer {}", self.get_bearer()?))?;
        Self::check_status(resp)
    }

    fn check_status(mut resp: Response<Body>) -> Result<Response<Body>, TadoClientError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let message = resp
            .body_mut()
            .read_to_string()
            .unwrap_or_else(|_| String::from("<no body>"));
        Err(TadoClientError::Http { status, message })
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TadoClientError> {
        let url = Self::url(path);
        let mut resp = self.execute(|auth| {
            self.agent
                .get(&url)
                .header("Accept", "application/json")
                .header("Authorization", auth)
                .call()
        })?;
        let body = resp.body_mut().read_to_string()?;
        decode_json(&body)
    }

    fn zone_type(&self, zone_id: ZoneId) -> ZoneType {
        self.zone_types
            .borrow()
            .get(&zone_id)
            .copied()
            .unwrap_or(ZoneType::Heating)
    }
}

impl ZoneApi for TadoClient {
    fn get_zones(&self) -> Result<Vec<Zone>, TadoClientError> {
        let zones: Vec<Zone> = self.get_json(&self.home_path("/zones")?)?;
        let mut types = self.zone_types.borrow_mut();
        for zone in &zones {
            if let (Some(id), Some(kind)) = (zone.id, zone.r#type) {
                types.insert(id, kind);
            }
        }
        Ok(zones)
    }

    fn get_capabilities(&self, zone_id: ZoneId) -> Result<ZoneCapabilities, TadoClientError> {
        self.get_json(&self.home_path(&format!("/zones/{}/capabilities", zone_id.0))?)
    }

    fn get_state(&self, zone_id: ZoneId) -> Result<ZoneState, TadoClientError> {
        self.get_json(&self.home_path(&format!("/zones/{}/state", zone_id.0))?)
    }

    fn get_devices(&self) -> Result<Vec<Device>, TadoClientError> {
        self.get_json(&self.home_path("/devices")?)
    }

    fn get_me(&self) -> Result<User, TadoClientError> {
        self.get_json("/me")
    }

    fn set_zone_overlay(
        &self,
        zone_id: ZoneId,
        mode: OperationMode,
        temperature: Option<f64>,
    ) -> Result<(), TadoClientError> {
        let Some(body) = overlay_body(self.zone_type(zone_id), mode, temperature, self.timer_duration) else {
            return self.reset_zone_overlay(zone_id);
        };
        let url = Self::url(&self.home_path(&format!("/zones/{}/overlay", zone_id.0))?);
        debug!("PUT {} ({:?})", url, body);
        self.execute(|auth| {
            self.agent
                .put(&url)
                .header("Accept", "application/json")
                .header("Authorization", auth)
                .send_json(&body)
        })?;
        Ok(())
    }

    fn reset_zone_overlay(&self, zone_id: ZoneId) -> Result<(), TadoClientError> {
        let url = Self::url(&self.home_path(&format!("/zones/{}/overlay", zone_id.0))?);
        debug!("DELETE {}", url);
        self.execute(|auth| self.agent.delete(&url).header("Authorization", auth).call())?;
        Ok(())
    }
}

/// Decode a JSON body, naming the offending field on failure.
pub fn decode_json<T: DeserializeOwned>(body: &str) -> Result<T, TadoClientError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    Ok(serde_path_to_error::deserialize(de)?)
}

/// Build the overlay request for `mode`. `None` means the zone returns to its schedule.
pub fn overlay_body(
    zone_type: ZoneType,
    mode: OperationMode,
    temperature: Option<f64>,
    timer_duration: Duration,
) -> Option<ZoneOverlayInput> {
    let termination = mode.termination()?;
    let power_on = temperature.is_some() && mode != OperationMode::Off;
    let ac_mode = match zone_type {
        ZoneType::AirConditioning if power_on => Some(AirConditioningMode::Cool),
        _ => None,
    };

    Some(ZoneOverlayInput {
        setting: ZoneSettingInput {
            r#type: zone_type,
            power: if power_on { Power::On } else { Power::Off },
            temperature: temperature.filter(|_| power_on).map(|celsius| Temperature {
                celsius: Some(celsius),
                fahrenheit: None,
            }),
            mode: ac_mode,
        },
        termination: ZoneOverlayTerminationInput {
            type_skill_based_app: termination,
            duration_in_seconds: (termination == ZoneOverlayTerminationTypeSkillBasedApp::Timer)
                .then(|| timer_duration.as_secs() as i64),
        },
    })
}
