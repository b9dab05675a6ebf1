//! Result aggregation.
//!
//! Merges the per-worker output files into one file that shares a single
//! header. Rows are appended strictly in ascending slice order, then in file
//! order within a slice; completion order of the workers plays no part.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::OutputLayout;
use crate::error::Result;
use crate::records::{read_header, RangeReader, RowRecord, RowWriter};
use crate::slice::Slice;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SliceStatus {
    Complete,
    /// The worker never wrote its output file.
    Missing,
    /// Reading stopped early; rows before the failure were kept.
    Unreadable { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SliceSummary {
    pub worker_number: usize,
    pub source: PathBuf,
    pub rows: usize,
    #[serde(flatten)]
    pub status: SliceStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    pub output: PathBuf,
    pub header: Vec<String>,
    pub total_rows: usize,
    pub slices: Vec<SliceSummary>,
}

impl AggregateReport {
    /// Worker numbers whose rows are absent from the merged file.
    pub fn missing_slices(&self) -> Vec<usize> {
        self.slices
            .iter()
            .filter(|s| s.status == SliceStatus::Missing)
            .map(|s| s.worker_number)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.slices.iter().all(|s| s.status == SliceStatus::Complete)
    }
}

/// Header of the merged file: the first worker output that has one, else the
/// gathered input's, else `fallback`.
pub fn resolve_header(slices: &[Slice], layout: &OutputLayout, fallback: &[String]) -> RowRecord {
    let candidates = slices
        .iter()
        .map(|s| layout.worker_output_path(s.worker_number()))
        .chain(std::iter::once(layout.input_path()));

    for path in candidates {
        match read_header(&path) {
            Ok(header) if !header.is_empty() => return header,
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => tracing::debug!("No usable header in {}: {}", path.display(), e),
        }
    }
    RowRecord::new(fallback.iter().cloned())
}

/// Merge the outputs of `slices` into `layout.aggregate_path()`.
///
/// A missing or unreadable worker file costs only that slice's rows. Failing
/// to write the merged file is an error.
pub fn aggregate(
    slices: &[Slice],
    layout: &OutputLayout,
    fallback_header: &[String],
) -> Result<AggregateReport> {
    let mut ordered = slices.to_vec();
    ordered.sort_by_key(|s| s.index);

    let output = layout.aggregate_path();
    let header = resolve_header(&ordered, layout, fallback_header);
    let mut writer = RowWriter::create(&output, &header)?;

    let mut summaries = Vec::with_capacity(ordered.len());
    for slice in &ordered {
        let source = layout.worker_output_path(slice.worker_number());
        let (rows, status) = append_slice(&mut writer, &source)?;
        tracing::debug!(
            worker = slice.worker_number(),
            rows,
            "Aggregated {} rows from {}",
            rows,
            source.display()
        );
        summaries.push(SliceSummary {
            worker_number: slice.worker_number(),
            source,
            rows,
            status,
        });
    }

    let total_rows = writer.finish()?;
    tracing::info!(
        "Aggregated {} rows from {} slices into {}",
        total_rows,
        summaries.len(),
        output.display()
    );

    Ok(AggregateReport {
        output,
        header: header.fields().to_vec(),
        total_rows,
        slices: summaries,
    })
}

/// Copy every data row of `source` into `writer`. Read problems end up in the
/// returned status; only write failures are errors.
fn append_slice<W: std::io::Write>(
    writer: &mut RowWriter<W>,
    source: &Path,
) -> Result<(usize, SliceStatus)> {
    let reader = match RangeReader::open_all(source) {
        Ok(reader) => reader,
        Err(e) if e.is_not_found() => {
            tracing::warn!("{} is missing; its slice is omitted", source.display());
            return Ok((0, SliceStatus::Missing));
        }
        Err(e) => {
            tracing::error!("Cannot read {}: {}", source.display(), e);
            return Ok((
                0,
                SliceStatus::Unreadable {
                    message: e.to_string(),
                },
            ));
        }
    };

    let mut rows = 0;
    for row in reader {
        match row {
            Ok(row) => {
                writer.write_row(&row)?;
                rows += 1;
            }
            Err(e) => {
                tracing::error!(
                    "Stopped reading {} after {} rows: {}",
                    source.display(),
                    rows,
                    e
                );
                return Ok((
                    rows,
                    SliceStatus::Unreadable {
                        message: e.to_string(),
                    },
                ));
            }
        }
    }
    Ok((rows, SliceStatus::Complete))
}
