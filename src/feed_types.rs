use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::model::RawRecord;

/// Body of `GET /channels/{id}/feeds.json`.
#[derive(Debug, Default, Deserialize)]
pub struct FeedResponse {
    #[serde(default)]
    pub channel: Option<Channel>,
    #[serde(default)]
    pub feeds: Vec<FeedEntry>,
}

/// Channel header. `field1`..`field8` carry the human labels of each slot.
#[derive(Debug, Deserialize)]
pub struct Channel {
    pub id: Option<u64>,
    pub name: Option<String>,
    pub last_entry_id: Option<u64>,
    #[serde(flatten)]
    pub labels: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct FeedEntry {
    pub created_at: Option<String>,
    pub entry_id: Option<u64>,
    #[serde(flatten)]
    pub slots: BTreeMap<String, Value>,
}

impl FeedEntry {
    /// Converts the entry into a record, keeping every `fieldN` slot. Entries
    /// without a usable timestamp are dropped.
    pub fn into_record(self) -> Option<RawRecord> {
        let Some(timestamp) = self.created_at.as_deref().and_then(parse_timestamp) else {
            debug!(entry_id = ?self.entry_id, created_at = ?self.created_at, "dropping feed without timestamp");
            return None;
        };

        let fields = self
            .slots
            .into_iter()
            .filter(|(key, _)| key.starts_with("field"))
            .filter_map(|(key, value)| slot_text(value).map(|text| (CompactString::from(key), text)))
            .collect();

        Some(RawRecord {
            timestamp,
            entry_id: self.entry_id,
            fields,
        })
    }
}

impl FeedResponse {
    pub fn into_records(self) -> Vec<RawRecord> {
        self.feeds
            .into_iter()
            .filter_map(FeedEntry::into_record)
            .collect()
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// Slots normally arrive as strings, but numbers show up when a channel is written
// by hand.
fn slot_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
