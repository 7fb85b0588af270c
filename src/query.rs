//! Read-only views over a published dataset, matching what the dashboard pages ask
//! for: trips started inside a time window, optionally for one device, and the
//! numeric series charted for a trip.

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::Serialize;

use crate::config::{FieldMapping, Metric};
use crate::error::{Error, Result};
use crate::model::{GroupedDataset, Trip};
use crate::processor::numeric_trip_id;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TripFilter {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    device: Option<CompactString>,
}

impl TripFilter {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self> {
        if from > to {
            return Err(Error::InvalidRange(format!(
                "start {from} is after end {to}"
            )));
        }
        Ok(Self {
            from,
            to,
            device: None,
        })
    }

    #[must_use]
    pub fn for_device(mut self, device_id: impl Into<CompactString>) -> Self {
        self.device = Some(device_id.into());
        self
    }

    fn accepts(&self, device_id: &str, trip: &Trip) -> bool {
        if self.device.as_deref().is_some_and(|wanted| wanted != device_id) {
            return false;
        }
        trip.started_at()
            .is_some_and(|start| start > self.from && start < self.to)
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct TripRef<'a> {
    pub device_id: &'a str,
    pub trip_id: &'a str,
    pub trip: &'a Trip,
    pub is_current: bool,
}

impl TripRef<'_> {
    /// Identifier used to toggle a trip's visibility, `"{device}-{trip}"`.
    pub fn key(&self) -> String {
        format!("{}-{}", self.device_id, self.trip_id)
    }
}

/// Trips whose first sample falls strictly inside the filter's window.
pub fn trips_in_range<'a>(dataset: &'a GroupedDataset, filter: &TripFilter) -> Vec<TripRef<'a>> {
    let mut found: Vec<TripRef<'a>> = dataset
        .devices
        .iter()
        .flat_map(|(device_id, device)| {
            device
                .trips
                .iter()
                .filter(move |(_, trip)| filter.accepts(device_id, trip))
                .map(move |(trip_id, trip)| TripRef {
                    device_id,
                    trip_id,
                    trip,
                    is_current: device.current_trip_id.as_ref() == Some(trip_id),
                })
        })
        .collect();

    found.sort_by(|a, b| {
        a.device_id
            .cmp(b.device_id)
            .then_with(|| trip_order(a.trip_id).cmp(&trip_order(b.trip_id)))
    });
    found
}

// numeric ids ascending, then the rest lexically
fn trip_order(trip_id: &str) -> (bool, u64, &str) {
    match numeric_trip_id(trip_id) {
        Some(n) => (false, n, trip_id),
        None => (true, 0, trip_id),
    }
}

pub fn device_ids(dataset: &GroupedDataset) -> Vec<&str> {
    let mut ids: Vec<&str> = dataset.devices.keys().map(CompactString::as_str).collect();
    ids.sort_unstable();
    ids
}

/// `(timestamp, value)` pairs for one metric, skipping samples where the slot is
/// missing or not a finite number. Empty when the layout has no slot for the metric.
pub fn metric_series(trip: &Trip, mapping: &FieldMapping, metric: Metric) -> Vec<(DateTime<Utc>, f64)> {
    let Some(slot) = mapping.metric_slot(metric) else {
        return Vec::new();
    };
    trip.samples()
        .iter()
        .filter_map(|sample| sample.reading(slot).map(|value| (sample.timestamp, value)))
        .collect()
}
