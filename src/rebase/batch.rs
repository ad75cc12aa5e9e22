// src/rebase/batch.rs
use chrono::{NaiveDate, Utc};
use glob::{glob_with, MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use super::file::{rebase_file, FileRebase};
use super::pool::WorkerPool;
use super::report::{BatchReport, FileKey, FileOutcome};
use super::scan::{scan_file, DateRange, FileScan, ScanOutcome};
use super::timestamp::DayOffset;
use crate::error::{BatchError, FileError};

pub const DEFAULT_TIMESTAMP_COLUMN: &str = "Timestamp";
pub const DEFAULT_WORKERS: usize = 16;

/// What to do when the earliest date is already today or later.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetPolicy {
    /// `today - min`, which may be zero or negative.
    #[default]
    Exact,
    /// Like `Exact`, but never shifts data backwards.
    FloorAtZero,
}

impl OffsetPolicy {
    pub fn offset(&self, min: NaiveDate, today: NaiveDate) -> DayOffset {
        let exact = DayOffset::between(min, today);
        match self {
            OffsetPolicy::Exact => exact,
            OffsetPolicy::FloorAtZero => exact.max(DayOffset::ZERO),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub timestamp_column: String,
    /// Pool size for both phases; `0` means one per CPU.
    pub workers: usize,
    /// Overrides the current UTC date.
    pub today: Option<NaiveDate>,
    pub offset_policy: OffsetPolicy,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            timestamp_column: DEFAULT_TIMESTAMP_COLUMN.to_string(),
            workers: DEFAULT_WORKERS,
            today: None,
            offset_policy: OffsetPolicy::Exact,
        }
    }
}

impl BatchOptions {
    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub key: FileKey,
    pub path: PathBuf,
}

/// How a file came out of the scan phase.
#[derive(Debug)]
pub enum ScanStatus {
    Dated(FileScan),
    /// Readable, has the column, but no row parsed.
    Undated { rows: u64 },
    MissingColumn,
    Failed(FileError),
}

impl ScanStatus {
    fn from_scan(result: Result<ScanOutcome, FileError>) -> Self {
        match result {
            Ok(ScanOutcome::Scanned(scan)) if scan.range.is_some() => ScanStatus::Dated(scan),
            Ok(ScanOutcome::Scanned(scan)) => ScanStatus::Undated { rows: scan.rows },
            Ok(ScanOutcome::MissingColumn) => ScanStatus::MissingColumn,
            Err(e) => ScanStatus::Failed(e),
        }
    }

    pub fn range(&self) -> Option<DateRange> {
        match self {
            ScanStatus::Dated(scan) => scan.range,
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ScannedFile {
    pub source: SourceFile,
    pub status: ScanStatus,
}

/// Dry-run view of a plan, also what `scan` prints.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub source_dir: PathBuf,
    pub today: NaiveDate,
    pub total_files: usize,
    pub dated_files: usize,
    pub undated_files: usize,
    pub missing_column_files: usize,
    pub failed_files: usize,
    pub original_range: DateRange,
    pub offset: DayOffset,
    pub new_min_date: Option<NaiveDate>,
    pub new_max_date: Option<NaiveDate>,
}

/// A site whose scan finished with at least one dated file, and whose offset
/// is therefore fixed. The only way to start rebasing is
/// [`BatchPlan::execute`], so no file can be rewritten before every file
/// has been scanned.
#[derive(Debug)]
pub struct BatchPlan {
    source_dir: PathBuf,
    files: Vec<ScannedFile>,
    range: DateRange,
    today: NaiveDate,
    offset: DayOffset,
    timestamp_column: String,
    workers: usize,
}

/// Non-recursive, case-insensitive `*.csv` listing, sorted by path.
pub fn discover_files(source_dir: &Path) -> Result<Vec<SourceFile>, BatchError> {
    let discover_err = |reason: String| BatchError::Discover {
        dir: source_dir.to_path_buf(),
        reason,
    };
    if !source_dir.is_dir() {
        return Err(discover_err("not a directory".into()));
    }
    let dir = source_dir
        .to_str()
        .ok_or_else(|| discover_err("path is not valid UTF-8".into()))?;
    let pattern = format!("{}/*.csv", Pattern::escape(dir));
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    };

    let mut files = Vec::new();
    for entry in glob_with(&pattern, options).map_err(|e| discover_err(e.to_string()))? {
        let path = match entry {
            Ok(p) => p,
            Err(e) => {
                warn!("cannot read directory entry: {}", e);
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }
        match FileKey::from_path(&path) {
            Some(key) => files.push(SourceFile { key, path }),
            None => warn!(path = %path.display(), "skipping file with non UTF-8 name"),
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Scan phase: list the site, scan every file on the pool, and fix the
/// offset. Fails with [`BatchError::NoValidDatesInBatch`] (and writes
/// nothing) when no file has a single usable timestamp.
#[instrument(level = "info", skip(source_dir, options), fields(site = %source_dir.as_ref().display()))]
pub fn plan_batch<P: AsRef<Path>>(
    source_dir: P,
    options: &BatchOptions,
) -> Result<BatchPlan, BatchError> {
    let source_dir = source_dir.as_ref();
    let files = discover_files(source_dir)?;
    info!("scanning {} files to detect date ranges", files.len());

    let pool = WorkerPool::new(options.workers)?;
    let column = options.timestamp_column.as_str();
    let statuses = pool.map("scan", &files, |f| {
        let status = ScanStatus::from_scan(scan_file(&f.path, column));
        if let ScanStatus::Failed(e) = &status {
            warn!(file = %f.key, "scan failed: {}", e);
        }
        status
    });

    let scanned: Vec<ScannedFile> = files
        .into_iter()
        .zip(statuses)
        .map(|(source, status)| ScannedFile { source, status })
        .collect();

    let Some(range) = scanned
        .iter()
        .filter_map(|f| f.status.range())
        .reduce(DateRange::merge)
    else {
        return Err(BatchError::NoValidDatesInBatch {
            dir: source_dir.to_path_buf(),
            files: scanned.len(),
        });
    };

    let today = options.today();
    let offset = options.offset_policy.offset(range.min, today);
    if offset.days() <= 0 {
        info!(%offset, "earliest date is not in the past");
    }

    let plan = BatchPlan {
        source_dir: source_dir.to_path_buf(),
        files: scanned,
        range,
        today,
        offset,
        timestamp_column: options.timestamp_column.clone(),
        workers: pool.workers(),
    };
    let summary = plan.summary();
    info!(
        original_min = %summary.original_range.min,
        original_max = %summary.original_range.max,
        records = summary.original_range.valid_rows,
        offset = %summary.offset,
        dated = summary.dated_files,
        "offset computed"
    );
    Ok(plan)
}

impl BatchPlan {
    pub fn offset(&self) -> DayOffset {
        self.offset
    }

    pub fn range(&self) -> DateRange {
        self.range
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn files(&self) -> &[ScannedFile] {
        &self.files
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary {
            source_dir: self.source_dir.clone(),
            today: self.today,
            total_files: self.files.len(),
            dated_files: 0,
            undated_files: 0,
            missing_column_files: 0,
            failed_files: 0,
            original_range: self.range,
            offset: self.offset,
            new_min_date: self.offset.apply_date(self.range.min),
            new_max_date: self.offset.apply_date(self.range.max),
        };
        for f in &self.files {
            match f.status {
                ScanStatus::Dated(_) => summary.dated_files += 1,
                ScanStatus::Undated { .. } => summary.undated_files += 1,
                ScanStatus::MissingColumn => summary.missing_column_files += 1,
                ScanStatus::Failed(_) => summary.failed_files += 1,
            }
        }
        summary
    }

    /// Rebase phase: rewrite every readable file into `dest_dir` with the one
    /// offset fixed by the scan. Per-file failures end up in the report.
    #[instrument(level = "info", skip(self, dest_dir), fields(site = %self.source_dir.display()))]
    pub fn execute<P: AsRef<Path>>(self, dest_dir: P) -> Result<BatchReport, BatchError> {
        let dest_dir = dest_dir.as_ref();
        if same_dir(&self.source_dir, dest_dir) {
            return Err(BatchError::DestinationIsSource {
                dir: dest_dir.to_path_buf(),
            });
        }
        fs::create_dir_all(dest_dir).map_err(|source| BatchError::CreateOutputDir {
            dir: dest_dir.to_path_buf(),
            source,
        })?;

        info!(offset = %self.offset, "rebasing {} files", self.files.len());
        let pool = WorkerPool::new(self.workers)?;
        let column = self.timestamp_column.as_str();
        let offset = self.offset;
        let outcomes = pool.map("rebase", &self.files, |f| {
            let outcome = match &f.status {
                ScanStatus::Failed(e) => FileOutcome::failed(e),
                ScanStatus::MissingColumn => FileOutcome::missing_column(column),
                ScanStatus::Dated(_) | ScanStatus::Undated { .. } => {
                    let output = f.source.key.resolve(dest_dir);
                    match rebase_file(&f.source.path, &output, column, offset) {
                        Ok(FileRebase::Written(counts)) => FileOutcome::Succeeded {
                            rows_written: counts.rows_written,
                            rows_rebased: counts.rows_rebased,
                        },
                        Ok(FileRebase::MissingColumn) => FileOutcome::missing_column(column),
                        Err(e) => {
                            warn!(file = %f.source.key, "rebase failed: {}", e);
                            FileOutcome::failed(&e)
                        }
                    }
                }
            };
            (f.source.key.clone(), outcome)
        });

        let report = BatchReport::tally(
            self.source_dir,
            dest_dir.to_path_buf(),
            self.today,
            self.range,
            offset,
            outcomes,
        );
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            total = report.total_files,
            rows = report.rows.rows_written,
            "rebasing complete"
        );
        Ok(report)
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Scan `source_dir`, fix one offset, and rewrite every file into `dest_dir`.
pub fn rebase_batch<P: AsRef<Path>, Q: AsRef<Path>>(
    source_dir: P,
    dest_dir: Q,
    options: &BatchOptions,
) -> Result<BatchReport, BatchError> {
    plan_batch(source_dir, options)?.execute(dest_dir)
}
