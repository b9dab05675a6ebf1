//! Delimited-text rows: the shared file format of the gathered input, the
//! per-worker outputs and the aggregated output. The first row of every file
//! is a header; everything after it is a data row numbered from 0.

pub mod reader;
pub mod writer;

pub use reader::{count_rows, extract, read_header, RangeReader};
pub use writer::RowWriter;

use std::fmt;

/// One data row. Fields are kept as text; the core never interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowRecord {
    fields: Vec<String>,
}

impl RowRecord {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<csv::StringRecord> for RowRecord {
    fn from(record: csv::StringRecord) -> Self {
        Self::new(record.iter())
    }
}

impl fmt::Display for RowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields.join(","))
    }
}
