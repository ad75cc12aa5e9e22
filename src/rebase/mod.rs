// src/rebase/mod.rs
pub mod batch;
pub mod file;
pub mod pool;
pub mod report;
pub mod row;
pub mod scan;
pub mod timestamp;

pub use batch::{
    discover_files, plan_batch, rebase_batch, BatchOptions, BatchPlan, OffsetPolicy, PlanSummary,
};
pub use file::{rebase_file, FileRebase, RowCounts};
pub use report::{BatchReport, FileKey, FileOutcome};
pub use row::{RowTransformer, TimestampColumn};
pub use scan::{scan_file, DateRange, FileScan, ScanOutcome};
pub use timestamp::{DayOffset, ParseError, Timestamp};
