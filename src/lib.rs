//! Rebase per-point CSV timeseries so that a site's data starts today.
//!
//! Every file of a site is scanned for its date range, one day offset is
//! derived from the earliest date, and every file is rewritten with that
//! offset applied to its timestamp column. Time of day, row order and all
//! other columns are kept as they were.
pub mod config;
pub mod error;
pub mod rebase;

pub use error::{BatchError, FileError};
pub use rebase::{plan_batch, rebase_batch, BatchOptions, BatchReport};
