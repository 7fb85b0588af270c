use anyhow::Result;
use tracing_subscriber::EnvFilter;

use scooter_telemetry::{Config, Refresher, RetryPolicy, ThingSpeakSource};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. Configuration
    let config = Config::from_env()?;
    tracing::info!(
        channel = %config.feed.channel_id,
        results = config.feed.results,
        interval_secs = config.refresh_interval.as_secs(),
        "starting telemetry poller"
    );

    // 2. Feed source and refresh cycle
    let policy = RetryPolicy::from_settings(&config.feed);
    let source = ThingSpeakSource::new(config.feed)?;
    let refresher = Refresher::new(source, config.mapping, policy);

    // 3. Poll until interrupted
    refresher
        .run(config.refresh_interval, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await;

    if let Some(snapshot) = refresher.store().current() {
        tracing::info!(
            devices = snapshot.dataset.len(),
            records = snapshot.record_count,
            fetched_at = %snapshot.fetched_at,
            "last snapshot at shutdown"
        );
    }
    Ok(())
}
