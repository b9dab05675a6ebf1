use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::RowRecord;
use crate::error::{Error, Result};

/// Writes a header once, then any number of rows.
pub struct RowWriter<W: Write> {
    inner: csv::Writer<W>,
    path: PathBuf,
    rows_written: usize,
}

impl RowWriter<File> {
    /// Create (or truncate) `path` and write `header` as its first row.
    pub fn create(path: &Path, header: &RowRecord) -> Result<Self> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        Self::from_writer(file, path, header)
    }
}

impl<W: Write> RowWriter<W> {
    pub fn from_writer(writer: W, path: &Path, header: &RowRecord) -> Result<Self> {
        let inner = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(writer);
        let mut writer = Self {
            inner,
            path: path.to_path_buf(),
            rows_written: 0,
        };
        writer
            .inner
            .write_record(header.fields())
            .map_err(|e| Error::csv(&writer.path, e))?;
        Ok(writer)
    }

    pub fn write_row(&mut self, row: &RowRecord) -> Result<()> {
        self.inner
            .write_record(row.fields())
            .map_err(|e| Error::csv(&self.path, e))?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Flush and return the number of data rows written.
    pub fn finish(mut self) -> Result<usize> {
        self.inner.flush().map_err(|e| Error::io(&self.path, e))?;
        Ok(self.rows_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_written_once() {
        let mut buffer = Vec::new();
        {
            let mut writer = RowWriter::from_writer(
                &mut buffer,
                Path::new("memory.csv"),
                &RowRecord::new(["id", "value"]),
            )
            .unwrap();
            writer.write_row(&RowRecord::new(["1", "42"])).unwrap();
            writer.write_row(&RowRecord::new(["2", "44"])).unwrap();
            assert_eq!(writer.rows_written(), 2);
            writer.finish().unwrap();
        }
        assert_eq!(String::from_utf8(buffer).unwrap(), "id,value\n1,42\n2,44\n");
    }

    #[test]
    fn test_rows_may_differ_from_header_width() {
        let mut buffer = Vec::new();
        {
            let mut writer = RowWriter::from_writer(
                &mut buffer,
                Path::new("memory.csv"),
                &RowRecord::new(["id", "value"]),
            )
            .unwrap();
            writer.write_row(&RowRecord::new(["1", "2", "3"])).unwrap();
            writer.finish().unwrap();
        }
        assert_eq!(String::from_utf8(buffer).unwrap(), "id,value\n1,2,3\n");
    }
}
