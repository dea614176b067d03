//! Shared, throttled cache of raw zone and device state.
//!
//! One cache serves every sensor view of an integration instance. A refresh pulls each
//! registered key from the remote API at most once per interval; a key whose fetch fails keeps
//! its previous payload.

use crate::client::ZoneApi;
use crate::models::tado::{Device, HomeId, ZoneId, ZoneState};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Monotonic guard that lets an action run at most once per interval.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_run: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Throttle {
            interval,
            last_run: None,
        }
    }

    /// Returns true and records `now` when the guarded action may run.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.last_run {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_run = Some(now);
                true
            }
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheKey {
    /// State of a single zone.
    Zone(ZoneId),
    /// State of the home's bridge device.
    Device(HomeId),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Zone(id) => write!(f, "zone {}", id.0),
            CacheKey::Device(id) => write!(f, "device {}", id.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Zone(ZoneState),
    Device(Device),
}

pub struct SensorCache {
    api: Rc<dyn ZoneApi>,
    throttle: Throttle,
    entries: BTreeMap<CacheKey, Option<Payload>>,
}

impl SensorCache {
    pub fn new(api: Rc<dyn ZoneApi>, interval: Duration) -> Self {
        SensorCache {
            api,
            throttle: Throttle::new(interval),
            entries: BTreeMap::new(),
        }
    }

    pub fn register_zone_key(&mut self, zone_id: ZoneId) -> CacheKey {
        self.register(CacheKey::Zone(zone_id))
    }

    pub fn register_device_key(&mut self, home_id: HomeId) -> CacheKey {
        self.register(CacheKey::Device(home_id))
    }

    fn register(&mut self, key: CacheKey) -> CacheKey {
        self.entries.entry(key).or_insert(None);
        key
    }

    /// Cached payload for `key`; `None` is the "no data" marker for keys never populated.
    pub fn get_data(&self, key: &CacheKey) -> Option<&Payload> {
        self.entries.get(key).and_then(|p| p.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.entries.keys()
    }

    pub fn refresh(&mut self) -> bool {
        self.refresh_at(Instant::now())
    }

    /// Refresh every key unless the last refresh happened less than one interval before
    /// `now`. Returns whether the remote API was queried.
    pub fn refresh_at(&mut self, now: Instant) -> bool {
        if !self.throttle.try_acquire(now) {
            debug!("Cache: refresh throttled (interval={}s)", self.throttle.interval().as_secs());
            return false;
        }

        info!("Cache: querying tado for {} key(s)", self.entries.len());
        let api = Rc::clone(&self.api);
        for (key, slot) in self.entries.iter_mut() {
            match fetch(api.as_ref(), key) {
                Ok(Some(payload)) => *slot = Some(payload),
                Ok(None) => warn!("Cache: {} returned no data; keeping previous payload", key),
                Err(e) => error!("Cache: unable to refresh {}: {}", key, e),
            }
        }
        true
    }
}

fn fetch(api: &dyn ZoneApi, key: &CacheKey) -> Result<Option<Payload>, crate::client::TadoClientError> {
    match key {
        CacheKey::Zone(zone_id) => api.get_state(*zone_id).map(|s| Some(Payload::Zone(s))),
        CacheKey::Device(_) => api
            .get_devices()
            .map(|devices| devices.into_iter().next().map(Payload::Device)),
    }
}
