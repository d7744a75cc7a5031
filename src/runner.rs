use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;

use crate::source::DataSource;
use crate::store::PartitionStore;

/// Counters for one backfill run.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    pub missing: usize,
    pub written: usize,
    pub skipped_empty: usize,
}

/// Drives the fetch/write cycle: diff the trailing window against the
/// partition tree, fetch missing dates concurrently, persist non-empty
/// results.
pub struct BackfillRunner {
    store: Arc<PartitionStore>,
    source: Arc<dyn DataSource>,
    max_in_flight: usize,
}

impl BackfillRunner {
    pub fn new(
        store: Arc<PartitionStore>,
        source: Arc<dyn DataSource>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            store,
            source,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Inclusive window of `window_days` calendar days ending at `today`,
    /// ascending. A window reaching past chrono's date-range floor is
    /// truncated there rather than panicking.
    pub fn date_window(today: NaiveDate, window_days: u32) -> Vec<NaiveDate> {
        let start = today
            .checked_sub_signed(Duration::days(i64::from(window_days) - 1))
            .unwrap_or(NaiveDate::MIN);
        start.iter_days().take_while(|d| *d <= today).collect()
    }

    /// Window dates with no partition on disk, in chronological order.
    pub fn missing_dates(&self, today: NaiveDate, window_days: u32) -> Result<Vec<NaiveDate>> {
        let existing = self.store.list_existing_dates()?;
        Ok(Self::date_window(today, window_days)
            .into_iter()
            .filter(|date| !existing.contains(date))
            .collect())
    }

    /// Backfill the trailing window ending at the wall-clock current date.
    pub async fn run(&self, window_days: u32) -> Result<RunSummary> {
        self.run_as_of(Utc::now().date_naive(), window_days).await
    }

    /// Backfill the trailing window ending at an explicit `today`.
    ///
    /// Fetches run concurrently, capped at `max_in_flight`; writes happen as
    /// results arrive, in completion order. Empty results are skipped with no
    /// partition written. A write failure or malformed payload aborts the
    /// run, dropping any still-in-flight fetches.
    pub async fn run_as_of(&self, today: NaiveDate, window_days: u32) -> Result<RunSummary> {
        let missing = self.missing_dates(today, window_days)?;
        let mut summary = RunSummary {
            missing: missing.len(),
            ..RunSummary::default()
        };

        if missing.is_empty() {
            tracing::info!(window_days, "All dates in window already present");
            return Ok(summary);
        }
        tracing::info!(
            window_days,
            missing = missing.len(),
            from = %missing[0],
            to = %missing[missing.len() - 1],
            "Backfilling missing dates"
        );

        let mut results = stream::iter(missing)
            .map(|date| {
                let source = Arc::clone(&self.source);
                async move {
                    let records = source.fetch_date(date).await?;
                    Ok::<_, anyhow::Error>((date, records))
                }
            })
            .buffer_unordered(self.max_in_flight);

        while let Some(result) = results.next().await {
            let (date, records) = result?;
            if records.is_empty() {
                tracing::debug!(%date, "No records, skipping");
                summary.skipped_empty += 1;
                continue;
            }
            self.store.write_partition(date, &records)?;
            tracing::info!(%date, rows = records.len(), "Wrote partition");
            summary.written += 1;
        }

        Ok(summary)
    }
}
