use std::fs::File;
use std::path::{Path, PathBuf};

use super::RowRecord;
use crate::error::{Error, Result};
use crate::slice::Slice;

fn open(path: &Path, flexible: bool) -> Result<csv::Reader<File>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(flexible)
        .from_reader(file))
}

/// A row-level problem that leaves the reader positioned at the next row.
fn is_row_error(error: &csv::Error) -> bool {
    matches!(
        error.kind(),
        csv::ErrorKind::UnequalLengths { .. } | csv::ErrorKind::Utf8 { .. }
    )
}

/// Streams the data rows of a file whose index falls in `[start, end)`.
///
/// The header is skipped. Malformed rows are logged and dropped but still
/// take up an index, so numbering matches [`count_rows`]. Reading stops as
/// soon as the range is exhausted.
pub struct RangeReader {
    records: csv::StringRecordsIntoIter<File>,
    path: PathBuf,
    start: usize,
    end: usize,
    next_index: usize,
    done: bool,
}

impl RangeReader {
    pub fn open(path: &Path, slice: &Slice) -> Result<Self> {
        let reader = open(path, false)?;
        Ok(Self {
            records: reader.into_records(),
            path: path.to_path_buf(),
            start: slice.start,
            end: slice.end,
            next_index: 0,
            done: false,
        })
    }

    /// Every data row of `path`.
    pub fn open_all(path: &Path) -> Result<Self> {
        Self::open(
            path,
            &Slice {
                index: 0,
                start: 0,
                end: usize::MAX,
            },
        )
    }

    /// Index the next data row will get.
    #[cfg(test)]
    pub fn position(&self) -> usize {
        self.next_index
    }
}

impl Iterator for RangeReader {
    type Item = Result<RowRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.next_index >= self.end {
                return None;
            }

            let item = self.records.next()?;
            let index = self.next_index;
            self.next_index += 1;

            match item {
                Ok(record) if index >= self.start => return Some(Ok(record.into())),
                Ok(_) => continue,
                Err(e) if is_row_error(&e) => {
                    tracing::warn!(
                        row = index,
                        "Skipping malformed row in {}: {}",
                        self.path.display(),
                        e
                    );
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(Error::csv(&self.path, e)));
                }
            }
        }
    }
}

/// Collect the rows of `source` that fall in `slice`.
pub fn extract(source: &Path, slice: &Slice) -> Result<Vec<RowRecord>> {
    RangeReader::open(source, slice)?.collect()
}

/// Number of data rows in `path`, header excluded.
pub fn count_rows(path: &Path) -> Result<usize> {
    let mut reader = open(path, true)?;
    let mut count = 0;
    for record in reader.byte_records() {
        record.map_err(|e| Error::csv(path, e))?;
        count += 1;
    }
    Ok(count)
}

/// The header row of `path`. Empty for an empty file.
pub fn read_header(path: &Path) -> Result<RowRecord> {
    let mut reader = open(path, true)?;
    let header = reader.headers().map_err(|e| Error::csv(path, e))?;
    Ok(header.clone().into())
}
