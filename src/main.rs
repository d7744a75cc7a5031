use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{self, EnvFilter};

use parqfill::config::Config;
use parqfill::runner::BackfillRunner;
use parqfill::source::HttpSource;
use parqfill::store::PartitionStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    let store = Arc::new(PartitionStore::new(&config.data_root));
    let source = Arc::new(HttpSource::new(
        &config.api_url,
        Duration::from_secs(config.timeout_secs),
    )?);
    let runner = BackfillRunner::new(store, source, config.max_in_flight);

    let summary = runner.run(config.window_days).await?;
    tracing::info!(
        missing = summary.missing,
        written = summary.written,
        skipped_empty = summary.skipped_empty,
        "Backfill complete"
    );
    Ok(())
}
