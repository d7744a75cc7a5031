//! Idempotent daily backfill: fetch missing dates from an HTTP API and
//! persist each date's records as a parquet partition under a
//! `year=YYYY/month=MM/day=DD` directory tree.

pub mod config;
pub mod runner;
pub mod source;
pub mod store;
