// src/rebase/scan.rs
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, instrument};

use super::row::TimestampColumn;
use crate::error::FileError;

/// Day-granular span of the valid timestamps seen, plus how many rows
/// contributed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub min: NaiveDate,
    pub max: NaiveDate,
    pub valid_rows: u64,
}

impl DateRange {
    pub fn single(date: NaiveDate) -> Self {
        DateRange {
            min: date,
            max: date,
            valid_rows: 1,
        }
    }

    pub fn include(&mut self, date: NaiveDate) {
        self.min = self.min.min(date);
        self.max = self.max.max(date);
        self.valid_rows = self.valid_rows.saturating_add(1);
    }

    /// Min of mins, max of maxes, sum of counts.
    pub fn merge(self, other: DateRange) -> DateRange {
        DateRange {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            valid_rows: self.valid_rows.saturating_add(other.valid_rows),
        }
    }

    pub fn span_days(&self) -> i64 {
        (self.max - self.min).num_days()
    }
}

/// Result of a scan that managed to read the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileScan {
    /// Data rows read, header excluded.
    pub rows: u64,
    /// `None` when not a single row carried a parseable timestamp.
    pub range: Option<DateRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Scanned(FileScan),
    /// Header has no column with the configured timestamp name.
    MissingColumn,
}

pub(crate) fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader)
}

/// Read the header row. An empty file, or a header with no non-blank cell,
/// counts as "no header".
pub(crate) fn read_headers<R: Read>(
    rdr: &mut csv::Reader<R>,
    path: &Path,
) -> Result<StringRecord, FileError> {
    let headers = rdr.headers().map_err(|e| FileError::NoHeader {
        path: path.to_path_buf(),
        source: Some(e),
    })?;
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(FileError::NoHeader {
            path: path.to_path_buf(),
            source: None,
        });
    }
    Ok(headers.clone())
}

/// Stream `path` once and report the min/max date of its valid timestamps.
/// Rows with a missing or unparseable timestamp are skipped, not fatal.
#[instrument(level = "debug", skip(path), fields(path = %path.as_ref().display()))]
pub fn scan_file<P: AsRef<Path>>(path: P, column_name: &str) -> Result<ScanOutcome, FileError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| FileError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    scan_reader(file, path, column_name)
}

pub(crate) fn scan_reader<R: Read>(
    reader: R,
    path: &Path,
    column_name: &str,
) -> Result<ScanOutcome, FileError> {
    let mut rdr = csv_reader(reader);
    let headers = read_headers(&mut rdr, path)?;
    let Some(column) = TimestampColumn::locate(&headers, column_name) else {
        debug!(column = column_name, "timestamp column not in header");
        return Ok(ScanOutcome::MissingColumn);
    };

    let mut rows = 0u64;
    let mut range: Option<DateRange> = None;
    let mut record = StringRecord::new();
    loop {
        match rdr.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(source) => {
                return Err(FileError::Read {
                    path: path.to_path_buf(),
                    record: rows + 1,
                    source,
                })
            }
        }
        rows += 1;
        if let Some(ts) = column.read(&record) {
            let date = ts.date();
            match range.as_mut() {
                Some(r) => r.include(date),
                None => range = Some(DateRange::single(date)),
            }
        }
    }

    debug!(rows, valid = range.map_or(0, |r| r.valid_rows), "scan complete");
    Ok(ScanOutcome::Scanned(FileScan { rows, range }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn scans_min_max_and_count() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("p1.csv");
        fs::write(
            &path,
            "Timestamp,Value,Quality\n\
             2025-01-03 23:59:59,1.0,OK\n\
             2025-01-01 00:00:01,2.0,OK\n\
             2025-01-05 12:00:00,3.0,OK\n",
        )?;

        let outcome = scan_file(&path, "Timestamp")?;
        assert_eq!(
            outcome,
            ScanOutcome::Scanned(FileScan {
                rows: 3,
                range: Some(DateRange {
                    min: date("2025-01-01"),
                    max: date("2025-01-05"),
                    valid_rows: 3,
                }),
            })
        );
        Ok(())
    }

    #[test]
    fn malformed_rows_are_excluded_from_range() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("p2.csv");
        let mut f = fs::File::create(&path)?;
        writeln!(f, "Timestamp,Value")?;
        for i in 0..100u32 {
            if i == 10 || i == 50 {
                writeln!(f, "2025-13-01 00:00:00,{i}")?;
            } else {
                writeln!(f, "2025-01-{:02} 06:00:00,{i}", 1 + i % 28)?;
            }
        }
        drop(f);

        let ScanOutcome::Scanned(scan) = scan_file(&path, "Timestamp")? else {
            panic!("expected a scanned file");
        };
        assert_eq!(scan.rows, 100);
        let range = scan.range.unwrap();
        assert_eq!(range.valid_rows, 98);
        assert_eq!(range.min, date("2025-01-01"));
        assert_eq!(range.max, date("2025-01-28"));
        Ok(())
    }

    #[test]
    fn short_rows_do_not_abort_the_scan() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("short.csv");
        fs::write(
            &path,
            "Value,Timestamp\n1.0\n2.0,2025-02-02 00:00:00\n",
        )?;
        let ScanOutcome::Scanned(scan) = scan_file(&path, "Timestamp")? else {
            panic!("expected a scanned file");
        };
        assert_eq!(scan.rows, 2);
        assert_eq!(scan.range.unwrap().valid_rows, 1);
        Ok(())
    }

    #[test]
    fn file_without_valid_dates_has_no_range() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.csv");
        fs::write(&path, "Timestamp,Value\nbad,1\n")?;
        assert_eq!(
            scan_file(&path, "Timestamp")?,
            ScanOutcome::Scanned(FileScan {
                rows: 1,
                range: None
            })
        );
        Ok(())
    }

    #[test]
    fn missing_column_is_reported() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nocol.csv");
        fs::write(&path, "Time,Value\n2025-01-01 00:00:00,1\n")?;
        assert_eq!(scan_file(&path, "Timestamp")?, ScanOutcome::MissingColumn);
        Ok(())
    }

    #[test]
    fn open_and_header_failures_are_structured() -> Result<()> {
        let dir = tempdir()?;
        let missing = scan_file(dir.path().join("absent.csv"), "Timestamp").unwrap_err();
        assert_eq!(missing.kind(), "open");

        let empty = dir.path().join("blank.csv");
        fs::write(&empty, "")?;
        let err = scan_file(&empty, "Timestamp").unwrap_err();
        assert_eq!(err.kind(), "no_header");
        Ok(())
    }

    #[test]
    fn merge_takes_extremes_and_sums_counts() {
        let a = DateRange {
            min: date("2025-01-01"),
            max: date("2025-01-05"),
            valid_rows: 5,
        };
        let b = DateRange {
            min: date("2025-01-03"),
            max: date("2025-01-10"),
            valid_rows: 8,
        };
        let merged = a.merge(b);
        assert_eq!(merged.min, date("2025-01-01"));
        assert_eq!(merged.max, date("2025-01-10"));
        assert_eq!(merged.valid_rows, 13);
        assert_eq!(merged.span_days(), 9);
    }
}
