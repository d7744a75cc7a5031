use anyhow::{bail, Context, Result};
use std::path::PathBuf;

/// Runtime configuration, read from the environment.
///
/// | Env Var | Default | Purpose |
/// |---------|---------|---------|
/// | `DATA_ROOT` | `data` | Base directory for the partition tree |
/// | `BACKFILL_API_URL` | (required) | Endpoint queried once per date |
/// | `BACKFILL_WINDOW_DAYS` | `7` | Trailing window size, including today |
/// | `BACKFILL_MAX_IN_FLIGHT` | `8` | Maximum concurrent fetches |
/// | `BACKFILL_TIMEOUT_SECS` | `60` | Per-request HTTP timeout |
/// Ten years; keeps window arithmetic well inside chrono's date range.
pub const MAX_WINDOW_DAYS: u32 = 3650;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_root: PathBuf,
    pub api_url: String,
    pub window_days: u32,
    pub max_in_flight: usize,
    pub timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let data_root = std::env::var("DATA_ROOT")
            .map_or_else(|_| PathBuf::from("data"), PathBuf::from);
        let api_url =
            std::env::var("BACKFILL_API_URL").context("BACKFILL_API_URL must be set")?;

        let window_days: u32 = parse_env("BACKFILL_WINDOW_DAYS", 7)?;
        if window_days == 0 {
            bail!("BACKFILL_WINDOW_DAYS must be at least 1");
        }
        if window_days > MAX_WINDOW_DAYS {
            bail!("BACKFILL_WINDOW_DAYS must be at most {MAX_WINDOW_DAYS}");
        }
        let max_in_flight: usize = parse_env("BACKFILL_MAX_IN_FLIGHT", 8)?;
        if max_in_flight == 0 {
            bail!("BACKFILL_MAX_IN_FLIGHT must be at least 1");
        }
        let timeout_secs: u64 = parse_env("BACKFILL_TIMEOUT_SECS", 60)?;

        Ok(Self {
            data_root,
            api_url,
            window_days,
            max_in_flight,
            timeout_secs,
        })
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(val) => val
            .parse::<T>()
            .with_context(|| format!("Invalid value for {name}: {val}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses a unique env var name so parallel tests don't race.

    #[test]
    fn parse_env_default_when_unset() {
        let value: u32 = parse_env("PARQFILL_TEST_UNSET", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn parse_env_reads_set_value() {
        std::env::set_var("PARQFILL_TEST_SET", "21");
        let value: u32 = parse_env("PARQFILL_TEST_SET", 7).unwrap();
        assert_eq!(value, 21);
    }

    #[test]
    fn parse_env_rejects_garbage() {
        std::env::set_var("PARQFILL_TEST_BAD", "not-a-number");
        assert!(parse_env::<u32>("PARQFILL_TEST_BAD", 7).is_err());
    }

    // Single test for the real env var names so parallel tests don't race.
    #[test]
    fn from_env_enforces_window_bounds() {
        std::env::set_var("BACKFILL_API_URL", "http://localhost/data");

        std::env::set_var("BACKFILL_WINDOW_DAYS", "1000000");
        assert!(Config::from_env().is_err());

        std::env::set_var("BACKFILL_WINDOW_DAYS", "0");
        assert!(Config::from_env().is_err());

        std::env::set_var("BACKFILL_WINDOW_DAYS", "14");
        let config = Config::from_env().unwrap();
        assert_eq!(config.window_days, 14);

        std::env::remove_var("BACKFILL_WINDOW_DAYS");
        std::env::remove_var("BACKFILL_API_URL");
    }
}
