use std::env;
use std::time::Duration;

use compact_str::CompactString;

use crate::error::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://api.thingspeak.com";
// About one day of samples at a 30 second cadence.
const DEFAULT_RESULTS: u32 = 2880;
pub const MAX_RESULTS: u32 = 8000;

/// Resolves a configuration variable by name.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Numeric payloads charted by the dashboard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Metric {
    Temperature,
    Battery,
    Speed,
}

/// Which feed slot carries each semantic role. Channels have moved these slots
/// around between deployments, so nothing downstream hardcodes them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldMapping {
    pub device_id: CompactString,
    pub trip_id: CompactString,
    pub path: CompactString,
    pub temperature: Option<CompactString>,
    pub battery: Option<CompactString>,
    pub speed: Option<CompactString>,
}

impl FieldMapping {
    /// Current scooter channel layout.
    pub fn scooter() -> Self {
        Self {
            trip_id: "field1".into(),
            device_id: "field2".into(),
            path: "field3".into(),
            speed: Some("field4".into()),
            battery: Some("field5".into()),
            temperature: None,
        }
    }

    /// Layout of the first prototype channel.
    pub fn legacy() -> Self {
        Self {
            temperature: Some("field1".into()),
            battery: Some("field2".into()),
            speed: Some("field5".into()),
            path: "field6".into(),
            device_id: "field7".into(),
            trip_id: "field8".into(),
        }
    }

    pub fn metric_slot(&self, metric: Metric) -> Option<&str> {
        match metric {
            Metric::Temperature => self.temperature.as_deref(),
            Metric::Battery => self.battery.as_deref(),
            Metric::Speed => self.speed.as_deref(),
        }
    }

    fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let mut mapping = match lookup("FEED_LAYOUT").as_deref().map(str::trim) {
            None | Some("scooter") => Self::scooter(),
            Some("legacy") => Self::legacy(),
            Some(other) => {
                return Err(Error::InvalidConfig(format!("unknown FEED_LAYOUT {other}")));
            }
        };

        if let Some(slot) = env_slot(lookup, "FIELD_DEVICE_ID") {
            mapping.device_id = slot;
        }
        if let Some(slot) = env_slot(lookup, "FIELD_TRIP_ID") {
            mapping.trip_id = slot;
        }
        if let Some(slot) = env_slot(lookup, "FIELD_PATH") {
            mapping.path = slot;
        }
        if let Some(slot) = env_slot(lookup, "FIELD_TEMPERATURE") {
            mapping.temperature = Some(slot);
        }
        if let Some(slot) = env_slot(lookup, "FIELD_BATTERY") {
            mapping.battery = Some(slot);
        }
        if let Some(slot) = env_slot(lookup, "FIELD_SPEED") {
            mapping.speed = Some(slot);
        }

        mapping.validate()?;
        Ok(mapping)
    }

    fn validate(&self) -> Result<()> {
        let roles = [&self.device_id, &self.trip_id, &self.path];
        if roles.iter().any(|slot| slot.trim().is_empty()) {
            return Err(Error::InvalidConfig("field slots must not be empty".into()));
        }
        if self.device_id == self.trip_id
            || self.device_id == self.path
            || self.trip_id == self.path
        {
            return Err(Error::InvalidConfig(format!(
                "device, trip and path must use distinct slots, got {}, {}, {}",
                self.device_id, self.trip_id, self.path
            )));
        }
        Ok(())
    }
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self::scooter()
    }
}

#[derive(Clone, Debug)]
pub struct FeedSettings {
    pub base_url: String,
    pub channel_id: String,
    pub read_api_key: Option<String>,
    pub results: u32,
    pub timeout: Duration,
    pub retries: u32,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub feed: FeedSettings,
    pub mapping: FieldMapping,
    pub refresh_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key| env::var(key).ok())
    }

    /// Reads settings through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let channel_id = lookup("THINGSPEAK_CHANNEL_ID")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::InvalidConfig("THINGSPEAK_CHANNEL_ID not set".into()))?;
        let read_api_key = lookup("THINGSPEAK_READ_API_KEY").filter(|v| !v.trim().is_empty());
        let base_url =
            lookup("THINGSPEAK_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let results = env_u64(lookup, "FEED_RESULTS", u64::from(DEFAULT_RESULTS))?;
        let results = u32::try_from(results)
            .unwrap_or(MAX_RESULTS)
            .clamp(1, MAX_RESULTS);

        let timeout = Duration::from_secs(env_u64(lookup, "FETCH_TIMEOUT_SECS", 20)?);
        let retries = u32::try_from(env_u64(lookup, "FETCH_RETRIES", 2)?)
            .map_err(|_| Error::InvalidConfig("FETCH_RETRIES too large".into()))?;
        let refresh_interval = Duration::from_secs(env_u64(lookup, "REFRESH_INTERVAL_SECS", 60)?);
        if refresh_interval.is_zero() {
            return Err(Error::InvalidConfig("REFRESH_INTERVAL_SECS must be positive".into()));
        }

        Ok(Self {
            feed: FeedSettings {
                base_url: base_url.trim_end_matches('/').to_string(),
                channel_id,
                read_api_key,
                results,
                timeout,
                retries,
            },
            mapping: FieldMapping::from_lookup(lookup)?,
            refresh_interval,
        })
    }
}

fn env_slot(lookup: Lookup<'_>, key: &str) -> Option<CompactString> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(CompactString::from)
}

fn env_u64(lookup: Lookup<'_>, key: &str, default: u64) -> Result<u64> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("{key} must be a whole number, got {value}"))),
        None => Ok(default),
    }
}
