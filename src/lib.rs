//! Trip reconstruction for shared scooter telemetry.
//!
//! A [`source::FeedSource`] hands over a flat window of [`model::RawRecord`]s,
//! [`processor::reconstruct`] folds them into a [`model::GroupedDataset`] of devices
//! and trips with decoded trajectories, and [`refresh::Refresher`] repeats that on a
//! timer, publishing each result to a [`state::SnapshotStore`].

pub mod config;
pub mod error;
pub mod feed_types;
pub mod model;
pub mod polyline;
pub mod processor;
pub mod query;
pub mod refresh;
pub mod source;
pub mod state;

pub use config::{Config, FieldMapping, Metric};
pub use error::{Error, Result};
pub use model::{Device, GroupedDataset, LatLon, RawRecord, Trip};
pub use processor::{LIVENESS_WINDOW_SECS, reconstruct};
pub use refresh::{Clock, RefreshFailure, RefreshOutcome, Refresher, RetryPolicy, SystemClock};
pub use source::{FeedSource, ThingSpeakSource};
pub use state::{Snapshot, SnapshotStore, StatusView};
