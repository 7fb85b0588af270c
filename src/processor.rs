use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use compact_str::CompactString;
use tracing::{debug, trace};

use crate::config::FieldMapping;
use crate::model::{Device, GroupedDataset, RawRecord, Trip};

/// A device's latest trip counts as current while its last sample is younger than this.
pub const LIVENESS_WINDOW_SECS: i64 = 5 * 60;

/// Rebuilds the per-device, per-trip view of a flat feed window.
///
/// Records keep their input order inside each trip. Records without a device id or
/// trip id are skipped. `now` is the instant liveness is judged against.
pub fn reconstruct(
    records: &[RawRecord],
    mapping: &FieldMapping,
    now: DateTime<Utc>,
) -> GroupedDataset {
    let mut index: HashMap<CompactString, HashMap<CompactString, Vec<RawRecord>>> =
        HashMap::new();
    let mut dropped = 0_usize;

    for record in records {
        let (Some(device_id), Some(trip_id)) = (
            record.non_blank(&mapping.device_id),
            record.non_blank(&mapping.trip_id),
        ) else {
            trace!(entry_id = ?record.entry_id, "record has no device or trip id");
            dropped += 1;
            continue;
        };

        index
            .entry(CompactString::from(device_id))
            .or_default()
            .entry(CompactString::from(trip_id))
            .or_default()
            .push(record.clone());
    }

    let devices: HashMap<CompactString, Device> = index
        .into_iter()
        .map(|(device_id, samples_by_trip)| {
            let trips: HashMap<CompactString, Trip> = samples_by_trip
                .into_iter()
                .map(|(trip_id, samples)| (trip_id, Trip::from_samples(samples, &mapping.path)))
                .collect();
            let current_trip_id = current_trip_id(&trips, now);
            (
                device_id,
                Device {
                    trips,
                    current_trip_id,
                },
            )
        })
        .collect();

    debug!(
        records = records.len(),
        dropped,
        devices = devices.len(),
        "reconstructed trips"
    );

    GroupedDataset { devices }
}

/// Trip ids are decimal counters. Anything else is not a usable ordering key.
pub fn numeric_trip_id(trip_id: &str) -> Option<u64> {
    trip_id.trim().parse().ok()
}

/// The numerically largest trip id. Non-numeric ids never win.
pub fn latest_trip_id(trips: &HashMap<CompactString, Trip>) -> Option<&CompactString> {
    trips
        .keys()
        .filter_map(|id| numeric_trip_id(id).map(|n| (n, id)))
        // "7" and "07" collide; pick the same one every time
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)))
        .map(|(_, id)| id)
}

fn current_trip_id(
    trips: &HashMap<CompactString, Trip>,
    now: DateTime<Utc>,
) -> Option<CompactString> {
    let Some(latest) = latest_trip_id(trips) else {
        if !trips.is_empty() {
            debug!(trips = trips.len(), "device has no numeric trip ids");
        }
        return None;
    };

    let last_seen = trips.get(latest)?.last_seen()?;
    let elapsed = now.signed_duration_since(last_seen);
    (elapsed < Duration::seconds(LIVENESS_WINDOW_SECS)).then(|| latest.clone())
}
