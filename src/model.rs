use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::polyline;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// One telemetry sample as delivered by the feed. `fields` keeps every payload slot
/// verbatim; which slot means what is decided by [`crate::config::FieldMapping`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub timestamp: DateTime<Utc>,
    pub entry_id: Option<u64>,
    pub fields: BTreeMap<CompactString, String>,
}

impl RawRecord {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            entry_id: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, slot: &str, value: impl Into<String>) -> Self {
        self.fields.insert(CompactString::from(slot), value.into());
        self
    }

    pub fn field(&self, slot: &str) -> Option<&str> {
        self.fields.get(slot).map(String::as_str)
    }

    /// The slot's value when it is present and not blank.
    pub fn non_blank(&self, slot: &str) -> Option<&str> {
        self.field(slot).filter(|v| !v.trim().is_empty())
    }

    /// The slot parsed as a finite number.
    pub fn reading(&self, slot: &str) -> Option<f64> {
        self.field(slot)?
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Trip {
    samples: Vec<RawRecord>,
    trajectory: Vec<LatLon>,
}

impl Trip {
    /// Builds a trip from samples in arrival order, decoding the path segment found
    /// in `path_slot` of each sample and concatenating the results.
    pub(crate) fn from_samples(samples: Vec<RawRecord>, path_slot: &str) -> Self {
        let mut trajectory = Vec::new();
        for sample in &samples {
            let Some(segment) = sample.non_blank(path_slot) else {
                continue;
            };
            match polyline::decode(segment) {
                Ok(points) => trajectory.extend(points),
                Err(e) => warn!(
                    entry_id = ?sample.entry_id,
                    timestamp = %sample.timestamp,
                    "skipping undecodable path segment: {e}"
                ),
            }
        }
        Self {
            samples,
            trajectory,
        }
    }

    pub fn samples(&self) -> &[RawRecord] {
        &self.samples
    }

    pub fn trajectory(&self) -> &[LatLon] {
        &self.trajectory
    }

    pub fn first_sample(&self) -> Option<&RawRecord> {
        self.samples.first()
    }

    pub fn last_sample(&self) -> Option<&RawRecord> {
        self.samples.last()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.first_sample().map(|s| s.timestamp)
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_sample().map(|s| s.timestamp)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Device {
    pub trips: HashMap<CompactString, Trip>,
    /// Latest trip id, set only while that trip is still reporting.
    pub current_trip_id: Option<CompactString>,
}

impl Device {
    pub fn trip(&self, trip_id: &str) -> Option<&Trip> {
        self.trips.get(trip_id)
    }

    pub fn is_active(&self) -> bool {
        self.current_trip_id.is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct GroupedDataset {
    pub devices: HashMap<CompactString, Device>,
}

impl GroupedDataset {
    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    pub fn trip(&self, device_id: &str, trip_id: &str) -> Option<&Trip> {
        self.device(device_id)?.trip(trip_id)
    }

    pub fn is_current_trip(&self, device_id: &str, trip_id: &str) -> bool {
        self.device(device_id)
            .and_then(|d| d.current_trip_id.as_deref())
            .is_some_and(|current| current == trip_id)
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }
}
