use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::config::{FeedSettings, MAX_RESULTS};
use crate::error::{Error, Result};
use crate::feed_types::FeedResponse;
use crate::model::RawRecord;

/// Anything that can hand over a window of raw telemetry records.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RawRecord>>;
}

/// Reads a ThingSpeak channel over HTTP.
pub struct ThingSpeakSource {
    client: Client,
    settings: FeedSettings,
}

impl ThingSpeakSource {
    pub fn new(settings: FeedSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("building HTTP client: {e}")))?;
        Ok(Self { client, settings })
    }

    pub fn feeds_url(&self) -> String {
        format!(
            "{}/channels/{}/feeds.json",
            self.settings.base_url, self.settings.channel_id
        )
    }

    fn query(&self, results: u32) -> Vec<(&'static str, String)> {
        let mut query = vec![("results", results.clamp(1, MAX_RESULTS).to_string())];
        if let Some(key) = &self.settings.read_api_key {
            query.push(("api_key", key.clone()));
        }
        query
    }

    async fn fetch_window(&self, results: u32) -> Result<Vec<RawRecord>> {
        let response = self
            .client
            .get(self.feeds_url())
            .query(&self.query(results))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!(
                "channel {} returned HTTP {status}",
                self.settings.channel_id
            )));
        }

        let feed: FeedResponse = response.json().await?;
        let received = feed.feeds.len();
        let records = feed.into_records();
        debug!(received, kept = records.len(), "decoded feed window");
        Ok(records)
    }
}

#[async_trait]
impl FeedSource for ThingSpeakSource {
    async fn fetch(&self) -> Result<Vec<RawRecord>> {
        let records = self.fetch_window(self.settings.results).await?;
        info!(
            channel = %self.settings.channel_id,
            records = records.len(),
            "fetched feed window"
        );
        Ok(records)
    }
}
