use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::source::Record;

/// Fixed file name inside each partition directory; the directory names carry
/// all the meaning.
pub const PARTITION_FILE: &str = "file.parquet";

/// Owns the date-partitioned parquet tree under a base directory.
///
/// Layout: `base/year=YYYY/month=MM/day=DD/file.parquet`, one file per date.
/// Partitions are written once and never updated or deleted here.
pub struct PartitionStore {
    base: PathBuf,
}

impl PartitionStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Partition file path for a date. Pure, no filesystem access.
    pub fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.base
            .join(format!("year={:04}", date.year()))
            .join(format!("month={:02}", date.month()))
            .join(format!("day={:02}", date.day()))
            .join(PARTITION_FILE)
    }

    /// All dates with a partition directory on disk.
    ///
    /// A leaf `day=` directory counts even if the parquet file inside is
    /// missing. Entries that don't match the expected `key=value` prefix at
    /// a level, or whose value is not a valid calendar component, are
    /// skipped, so foreign files in the tree are tolerated. A missing base
    /// directory means no dates, not an error.
    pub fn list_existing_dates(&self) -> Result<BTreeSet<NaiveDate>> {
        let mut dates = BTreeSet::new();
        if !self.base.exists() {
            return Ok(dates);
        }
        for (year, year_path) in partition_entries(&self.base, "year=")? {
            for (month, month_path) in partition_entries(&year_path, "month=")? {
                for (day, _) in partition_entries(&month_path, "day=")? {
                    if let Some(date) = NaiveDate::from_ymd_opt(year as i32, month, day) {
                        dates.insert(date);
                    }
                }
            }
        }
        Ok(dates)
    }

    /// Write one date's records as a parquet partition.
    ///
    /// Empty `records` is a no-op: no directory is created, so the date is
    /// not marked done and will be fetched again next run. Otherwise the
    /// partition directory is created if needed and the file is written via
    /// temp-file-then-rename, replacing any prior content.
    pub fn write_partition(&self, date: NaiveDate, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut df = records_to_dataframe(records)?;

        let path = self.partition_path(date);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create partition dir: {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("parquet.tmp");
        let file = std::fs::File::create(&tmp_path)
            .with_context(|| format!("Failed to create temp file: {}", tmp_path.display()))?;
        ParquetWriter::new(file)
            .finish(&mut df)
            .context("Failed to write parquet")?;
        std::fs::rename(&tmp_path, &path).with_context(|| {
            format!(
                "Failed to rename {} → {}",
                tmp_path.display(),
                path.display()
            )
        })?;
        Ok(())
    }
}

/// Subdirectories of `dir` named `{prefix}{integer}`, with the parsed value.
/// Anything else in the directory is ignored.
fn partition_entries(dir: &Path, prefix: &str) -> Result<Vec<(u32, PathBuf)>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(value) = name.strip_prefix(prefix) else {
            continue;
        };
        let Ok(value) = value.parse::<u32>() else {
            continue;
        };
        entries.push((value, path));
    }
    Ok(entries)
}

/// Build a `DataFrame` from API records, preserving first-seen column order
/// and injecting no row index.
///
/// Per-column dtype inference: all-number columns become `Float64`, all-bool
/// columns become `Boolean`, everything else is stringified. JSON nulls and
/// missing fields both become null values.
pub fn records_to_dataframe(records: &[Record]) -> Result<DataFrame> {
    let mut field_order: Vec<&str> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !field_order.contains(&key.as_str()) {
                field_order.push(key);
            }
        }
    }

    let columns: Vec<Column> = field_order
        .iter()
        .map(|name| build_column(name, records))
        .collect();

    DataFrame::new(records.len(), columns).context("Failed to build DataFrame from records")
}

fn build_column(name: &str, records: &[Record]) -> Column {
    let values: Vec<Option<&Value>> = records
        .iter()
        .map(|record| record.get(name).filter(|v| !v.is_null()))
        .collect();

    let mut saw_value = false;
    let mut all_numbers = true;
    let mut all_bools = true;
    for value in values.iter().flatten() {
        saw_value = true;
        all_numbers &= value.is_number();
        all_bools &= value.is_boolean();
    }

    if saw_value && all_numbers {
        let floats: Vec<Option<f64>> = values.iter().map(|v| v.and_then(Value::as_f64)).collect();
        return Column::new(name.into(), floats);
    }
    if saw_value && all_bools {
        let bools: Vec<Option<bool>> = values.iter().map(|v| v.and_then(Value::as_bool)).collect();
        return Column::new(name.into(), bools);
    }

    let strings: Vec<Option<String>> = values
        .iter()
        .map(|v| {
            v.map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        })
        .collect();
    Column::new(name.into(), strings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn rec(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("expected a JSON object, got {other}"),
        }
    }

    #[test]
    fn partition_path_layout() {
        let store = PartitionStore::new("base");
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(
            store.partition_path(date),
            PathBuf::from("base/year=2024/month=03/day=07/file.parquet")
        );
    }

    #[test]
    fn missing_base_means_no_dates() {
        let dir = tempdir().unwrap();
        let store = PartitionStore::new(dir.path().join("absent"));
        assert!(store.list_existing_dates().unwrap().is_empty());
    }

    #[test]
    fn write_empty_records_is_noop() {
        let dir = tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();

        store.write_partition(date, &[]).unwrap();

        assert!(!dir.path().join("year=2024").exists());
        assert!(store.list_existing_dates().unwrap().is_empty());
    }

    #[test]
    fn write_then_list_roundtrips() {
        let dir = tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        let records = vec![
            rec(json!({"symbol": "SPY", "close": 511.2})),
            rec(json!({"symbol": "QQQ", "close": 437.8})),
        ];

        store.write_partition(date, &records).unwrap();

        assert!(store.partition_path(date).exists());
        let existing = store.list_existing_dates().unwrap();
        assert_eq!(existing.len(), 1);
        assert!(existing.contains(&date));
    }

    #[test]
    fn write_overwrites_prior_content() {
        let dir = tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();

        store
            .write_partition(date, &[rec(json!({"v": 1.0})), rec(json!({"v": 2.0}))])
            .unwrap();
        store.write_partition(date, &[rec(json!({"v": 3.0}))]).unwrap();

        let path = store.partition_path(date).to_string_lossy().to_string();
        let df = LazyFrame::scan_parquet(path.as_str().into(), ScanArgsParquet::default())
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(df.height(), 1);
    }

    #[test]
    fn list_skips_foreign_entries() {
        let dir = tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        store.write_partition(date, &[rec(json!({"v": 1.0}))]).unwrap();

        std::fs::create_dir_all(dir.path().join("_staging")).unwrap();
        std::fs::create_dir_all(dir.path().join("year=2024").join("month=bad")).unwrap();
        std::fs::create_dir_all(dir.path().join("year=2024").join("month=13").join("day=01"))
            .unwrap();
        std::fs::write(dir.path().join("README.txt"), "notes").unwrap();

        let existing = store.list_existing_dates().unwrap();
        assert_eq!(existing.into_iter().collect::<Vec<_>>(), vec![date]);
    }

    #[test]
    fn leaf_directory_counts_without_file() {
        let dir = tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        std::fs::create_dir_all(dir.path().join("year=2024").join("month=03").join("day=07"))
            .unwrap();

        let existing = store.list_existing_dates().unwrap();
        assert!(existing.contains(&NaiveDate::from_ymd_opt(2024, 3, 7).unwrap()));
    }

    #[test]
    fn dataframe_preserves_column_order() {
        let records = vec![rec(json!({"zulu": 1.0, "alpha": 2.0, "mike": 3.0}))];
        let df = records_to_dataframe(&records).unwrap();
        let names: Vec<String> = df
            .get_column_names()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(names, vec!["zulu", "alpha", "mike"]);
    }

    #[test]
    fn dataframe_infers_column_dtypes() {
        let records = vec![
            rec(json!({"price": 1.5, "active": true, "symbol": "SPY", "mixed": 1})),
            rec(json!({"price": 2, "active": false, "symbol": "QQQ", "mixed": "n/a"})),
        ];
        let df = records_to_dataframe(&records).unwrap();

        assert_eq!(*df.column("price").unwrap().dtype(), DataType::Float64);
        assert_eq!(*df.column("active").unwrap().dtype(), DataType::Boolean);
        assert_eq!(*df.column("symbol").unwrap().dtype(), DataType::String);
        assert_eq!(*df.column("mixed").unwrap().dtype(), DataType::String);
    }

    #[test]
    fn dataframe_nulls_for_missing_and_null_fields() {
        let records = vec![
            rec(json!({"a": 1.0, "b": "x"})),
            rec(json!({"a": null})),
        ];
        let df = records_to_dataframe(&records).unwrap();
        assert_eq!(df.column("a").unwrap().null_count(), 1);
        assert_eq!(df.column("b").unwrap().null_count(), 1);
    }
}
