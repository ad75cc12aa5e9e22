// src/rebase/report.rs
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use super::file::RowCounts;
use super::scan::DateRange;
use super::timestamp::DayOffset;
use crate::error::FileError;

/// A file's identity inside a site: its bare file name. Input and output
/// paths are both derived from it, so no path strings are concatenated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct FileKey(String);

impl FileKey {
    /// `None` for paths without a UTF-8 final component.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| FileKey(n.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn resolve(&self, dir: &Path) -> PathBuf {
        dir.join(&self.0)
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Succeeded {
        rows_written: u64,
        rows_rebased: u64,
    },
    Failed {
        kind: &'static str,
        reason: String,
    },
    Skipped {
        reason: String,
    },
}

impl FileOutcome {
    pub fn failed(err: &FileError) -> Self {
        FileOutcome::Failed {
            kind: err.kind(),
            reason: err.to_string(),
        }
    }

    pub fn missing_column(column: &str) -> Self {
        FileOutcome::Skipped {
            reason: format!("no {column:?} column in header"),
        }
    }
}

/// Outcome of one batch: counts, the range and offset used, and every file's
/// result keyed by file name.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub today: NaiveDate,
    pub total_files: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub original_range: DateRange,
    pub offset: DayOffset,
    pub new_min_date: Option<NaiveDate>,
    pub new_max_date: Option<NaiveDate>,
    pub rows: RowCounts,
    pub files: BTreeMap<FileKey, FileOutcome>,
}

impl BatchReport {
    /// Tally per-file outcomes after all workers have joined.
    pub(crate) fn tally(
        source_dir: PathBuf,
        dest_dir: PathBuf,
        today: NaiveDate,
        original_range: DateRange,
        offset: DayOffset,
        outcomes: impl IntoIterator<Item = (FileKey, FileOutcome)>,
    ) -> Self {
        let mut report = BatchReport {
            source_dir,
            dest_dir,
            today,
            total_files: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            original_range,
            offset,
            new_min_date: offset.apply_date(original_range.min),
            new_max_date: offset.apply_date(original_range.max),
            rows: RowCounts::default(),
            files: BTreeMap::new(),
        };
        for (key, outcome) in outcomes {
            report.total_files += 1;
            match &outcome {
                FileOutcome::Succeeded {
                    rows_written,
                    rows_rebased,
                } => {
                    report.succeeded += 1;
                    report.rows.add(RowCounts {
                        rows_written: *rows_written,
                        rows_rebased: *rows_rebased,
                    });
                }
                FileOutcome::Failed { .. } => report.failed += 1,
                FileOutcome::Skipped { .. } => report.skipped += 1,
            }
            report.files.insert(key, outcome);
        }
        report
    }

    pub fn outcome(&self, file_name: &str) -> Option<&FileOutcome> {
        self.files.get(&FileKey(file_name.to_string()))
    }

    /// Failure reasons keyed by file name.
    pub fn failures(&self) -> impl Iterator<Item = (&FileKey, &str)> {
        self.files.iter().filter_map(|(k, o)| match o {
            FileOutcome::Failed { reason, .. } => Some((k, reason.as_str())),
            _ => None,
        })
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}
