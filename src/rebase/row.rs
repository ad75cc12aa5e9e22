// src/rebase/row.rs
use csv::StringRecord;

use super::timestamp::{DayOffset, Timestamp};

/// Position of the timestamp column inside a file's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampColumn(usize);

impl TimestampColumn {
    /// First header cell equal to `name`. Header cells are compared after
    /// trimming so `" Timestamp"` still matches.
    pub fn locate(headers: &StringRecord, name: &str) -> Option<Self> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .map(TimestampColumn)
    }

    pub fn index(&self) -> usize {
        self.0
    }

    /// The row's timestamp, if the cell exists and parses.
    pub fn read(&self, row: &StringRecord) -> Option<Timestamp> {
        row.get(self.0).and_then(|v| Timestamp::parse(v).ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Rebased,
    /// Timestamp cell missing or unparseable; row copied unchanged.
    PassedThrough,
}

/// Rewrites the timestamp cell of each row by a fixed offset. Every other cell
/// is copied verbatim and in order.
#[derive(Debug, Clone, Copy)]
pub struct RowTransformer {
    column: TimestampColumn,
    offset: DayOffset,
}

impl RowTransformer {
    pub fn new(column: TimestampColumn, offset: DayOffset) -> Self {
        RowTransformer { column, offset }
    }

    /// Fill `out` with the rebased copy of `row`. `out` is cleared first so a
    /// single buffer can be reused across a whole file.
    pub fn transform_into(&self, row: &StringRecord, out: &mut StringRecord) -> RowOutcome {
        out.clear();
        let rebased = self
            .column
            .read(row)
            .and_then(|ts| self.offset.apply(&ts))
            .map(|ts| ts.format());

        match rebased {
            Some(value) => {
                for (i, field) in row.iter().enumerate() {
                    if i == self.column.index() {
                        out.push_field(&value);
                    } else {
                        out.push_field(field);
                    }
                }
                RowOutcome::Rebased
            }
            None => {
                out.extend(row.iter());
                RowOutcome::PassedThrough
            }
        }
    }

    pub fn transform(&self, row: &StringRecord) -> (StringRecord, RowOutcome) {
        let mut out = StringRecord::with_capacity(row.as_slice().len() + 8, row.len());
        let outcome = self.transform_into(row, &mut out);
        (out, outcome)
    }
}
