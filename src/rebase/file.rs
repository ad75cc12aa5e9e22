// src/rebase/file.rs
use csv::{StringRecord, Terminator, WriterBuilder};
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::Builder;
use tracing::{debug, instrument};

use super::row::{RowOutcome, RowTransformer, TimestampColumn};
use super::scan::{csv_reader, read_headers};
use super::timestamp::DayOffset;
use crate::error::FileError;

/// Rows written for one file; `rows_written` always equals rows read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub rows_written: u64,
    pub rows_rebased: u64,
}

impl RowCounts {
    pub fn passed_through(&self) -> u64 {
        self.rows_written - self.rows_rebased
    }

    pub fn add(&mut self, other: RowCounts) {
        self.rows_written = self.rows_written.saturating_add(other.rows_written);
        self.rows_rebased = self.rows_rebased.saturating_add(other.rows_rebased);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRebase {
    Written(RowCounts),
    /// Header has no timestamp column; nothing was written.
    MissingColumn,
}

/// Rewrite `input` into `output` with every parseable timestamp moved by
/// `offset`.
///
/// Rows go to a temp file beside `output`; only a fully written file is
/// renamed over `output`. On any error the temp file is removed and `output`
/// keeps whatever it held before (or stays absent).
#[instrument(level = "debug", skip(input, output), fields(input = %input.as_ref().display()))]
pub fn rebase_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    column_name: &str,
    offset: DayOffset,
) -> Result<FileRebase, FileError> {
    let (input, output) = (input.as_ref(), output.as_ref());
    let file = File::open(input).map_err(|source| FileError::Open {
        path: input.to_path_buf(),
        source,
    })?;
    let mut rdr = csv_reader(file);
    let headers = read_headers(&mut rdr, input)?;
    let Some(column) = TimestampColumn::locate(&headers, column_name) else {
        return Ok(FileRebase::MissingColumn);
    };
    let transformer = RowTransformer::new(column, offset);

    let out_dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let stem = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut tmp = Builder::new()
        .prefix(&format!(".{stem}."))
        .suffix(".tmp")
        .tempfile_in(out_dir)
        .map_err(|e| FileError::write(output, e))?;

    let counts = {
        let mut wtr = csv_writer(&mut tmp);
        let counts = stream_rows(&mut rdr, &mut wtr, &headers, &transformer, input, output)?;
        wtr.flush().map_err(|e| FileError::write(output, e))?;
        counts
    };
    tmp.as_file()
        .sync_all()
        .map_err(|e| FileError::write(output, e))?;

    // Dropping the PersistError's file removes the temp file.
    tmp.persist(output).map_err(|e| FileError::Rename {
        path: output.to_path_buf(),
        source: e.error,
    })?;

    debug!(
        rows = counts.rows_written,
        rebased = counts.rows_rebased,
        "rebased file committed"
    );
    Ok(FileRebase::Written(counts))
}

fn csv_writer<W: Write>(inner: W) -> csv::Writer<W> {
    WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(inner)
}

/// Copy header and rows from `rdr` to `wtr`, rebasing as it goes. One record
/// buffer in, one out; memory stays flat regardless of file size.
pub(crate) fn stream_rows<R: Read, W: Write>(
    rdr: &mut csv::Reader<R>,
    wtr: &mut csv::Writer<W>,
    headers: &StringRecord,
    transformer: &RowTransformer,
    input: &Path,
    output: &Path,
) -> Result<RowCounts, FileError> {
    wtr.write_record(headers)
        .map_err(|e| FileError::write(output, e))?;

    let mut counts = RowCounts::default();
    let mut record = StringRecord::new();
    let mut rebased = StringRecord::new();
    loop {
        match rdr.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(source) => {
                return Err(FileError::Read {
                    path: input.to_path_buf(),
                    record: counts.rows_written + 1,
                    source,
                })
            }
        }
        if transformer.transform_into(&record, &mut rebased) == RowOutcome::Rebased {
            counts.rows_rebased += 1;
        }
        wtr.write_record(&rebased)
            .map_err(|e| FileError::write(output, e))?;
        counts.rows_written += 1;
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;
    use std::io;
    use tempfile::tempdir;

    fn leftover_temp_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect()
    }

    #[test]
    fn rebases_rows_and_preserves_everything_else() -> Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("in.csv");
        let output = dir.path().join("out").join("in.csv");
        fs::create_dir_all(output.parent().unwrap())?;
        fs::write(
            &input,
            "Value,Timestamp,Quality\n\
             123.4,2025-01-01 16:00:00,OK\n\
             \"1,5\",2025-01-02 00:30:00,\"needs, quoting\"\n\
             9,garbage,BAD\n",
        )?;

        let outcome = rebase_file(&input, &output, "Timestamp", DayOffset::new(59))?;
        assert_eq!(
            outcome,
            FileRebase::Written(RowCounts {
                rows_written: 3,
                rows_rebased: 2,
            })
        );
        assert_eq!(
            fs::read_to_string(&output)?,
            "Value,Timestamp,Quality\n\
             123.4,2025-03-01 16:00:00,OK\n\
             \"1,5\",2025-03-02 00:30:00,\"needs, quoting\"\n\
             9,garbage,BAD\n"
        );
        assert!(leftover_temp_files(output.parent().unwrap()).is_empty());
        Ok(())
    }

    #[test]
    fn every_row_is_written_even_when_malformed() -> Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("p.csv");
        let output = dir.path().join("p_out.csv");
        let mut body = String::from("Timestamp,Value,Status\n");
        for i in 0..100 {
            if i == 3 || i == 77 {
                body.push_str(&format!("2025-02-30 10:00:00,{i},BAD\n"));
            } else {
                body.push_str(&format!("2025-01-01 10:{:02}:00,{i},OK\n", i % 60));
            }
        }
        fs::write(&input, &body)?;

        let FileRebase::Written(counts) =
            rebase_file(&input, &output, "Timestamp", DayOffset::new(1))?
        else {
            panic!("expected output to be written");
        };
        assert_eq!(counts.rows_written, 100);
        assert_eq!(counts.rows_rebased, 98);
        assert_eq!(counts.passed_through(), 2);

        let written = fs::read_to_string(&output)?;
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 101);
        assert_eq!(lines[4], "2025-02-30 10:00:00,3,BAD");
        assert_eq!(lines[78], "2025-02-30 10:00:00,77,BAD");
        assert_eq!(lines[1], "2025-01-02 10:00:00,0,OK");
        Ok(())
    }

    #[test]
    fn replaces_existing_output() -> Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("a.csv");
        let output = dir.path().join("a_out.csv");
        fs::write(&input, "Timestamp\n2025-01-01 00:00:00\n")?;
        fs::write(&output, "stale contents\n")?;

        rebase_file(&input, &output, "Timestamp", DayOffset::new(2))?;
        assert_eq!(
            fs::read_to_string(&output)?,
            "Timestamp\n2025-01-03 00:00:00\n"
        );
        Ok(())
    }

    #[test]
    fn missing_column_writes_nothing() -> Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("b.csv");
        let output = dir.path().join("b_out.csv");
        fs::write(&input, "When,Value\n2025-01-01 00:00:00,1\n")?;

        let outcome = rebase_file(&input, &output, "Timestamp", DayOffset::new(2))?;
        assert_eq!(outcome, FileRebase::MissingColumn);
        assert!(!output.exists());
        Ok(())
    }

    #[test]
    fn read_failure_mid_file_leaves_previous_output_untouched() -> Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("c.csv");
        let out_dir = dir.path().join("out");
        fs::create_dir_all(&out_dir)?;
        let output = out_dir.join("c.csv");

        let mut body = b"Timestamp,Value\n".to_vec();
        for i in 0..500 {
            body.extend_from_slice(format!("2025-01-01 00:00:00,{i}\n").as_bytes());
        }
        // Invalid UTF-8 well past the first buffered chunk.
        body.extend_from_slice(b"2025-01-01 00:00:00,\xff\xfe\n");
        fs::write(&input, &body)?;
        fs::write(&output, "previous run\n")?;

        let err = rebase_file(&input, &output, "Timestamp", DayOffset::new(1)).unwrap_err();
        assert_eq!(err.kind(), "read");
        assert_eq!(fs::read_to_string(&output)?, "previous run\n");
        assert!(leftover_temp_files(&out_dir).is_empty());

        fs::remove_file(&output)?;
        rebase_file(&input, &output, "Timestamp", DayOffset::new(1)).unwrap_err();
        assert!(!output.exists());
        assert!(leftover_temp_files(&out_dir).is_empty());
        Ok(())
    }

    #[test]
    fn missing_output_directory_is_a_write_error() -> Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("d.csv");
        fs::write(&input, "Timestamp\n2025-01-01 00:00:00\n")?;
        let output = dir.path().join("nowhere").join("d.csv");

        let err = rebase_file(&input, &output, "Timestamp", DayOffset::new(1)).unwrap_err();
        assert_eq!(err.kind(), "write");
        assert!(!output.exists());
        Ok(())
    }

    /// Accepts `limit` bytes, then fails every write.
    struct FailingWriter {
        written: Vec<u8>,
        limit: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written.len() + buf.len() > self.limit {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failure_mid_stream_is_reported() {
        let mut body = String::from("Timestamp,Value\n");
        for i in 0..10_000 {
            body.push_str(&format!("2025-01-01 00:00:00,{i}\n"));
        }
        let mut rdr = csv_reader(body.as_bytes());
        let headers = rdr.headers().unwrap().clone();
        let column = TimestampColumn::locate(&headers, "Timestamp").unwrap();
        let transformer = RowTransformer::new(column, DayOffset::new(1));
        let mut wtr = csv_writer(FailingWriter {
            written: Vec::new(),
            limit: 4096,
        });

        let err = stream_rows(
            &mut rdr,
            &mut wtr,
            &headers,
            &transformer,
            Path::new("in.csv"),
            Path::new("out.csv"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "write");
    }
}
