//! Slice planning: split `item_count` data rows into one contiguous,
//! half-open range per worker.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Half-open row range `[start, end)` over the data rows of the gathered input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl Slice {
    /// 1-based number of the worker that owns this slice.
    pub fn worker_number(&self) -> usize {
        self.index + 1
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, row: usize) -> bool {
        self.start <= row && row < self.end
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// How the last slice ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailPolicy {
    /// Last slice ends at `item_count`.
    #[default]
    Exact,
    /// Last slice ends at `item_count + 1`, matching older worker scripts that
    /// were tuned to that range. Harmless because readers stop at EOF.
    Legacy,
}

/// Plan `worker_count` slices over `item_count` rows.
///
/// Every slice but the last has `item_count / worker_count` rows; the last one
/// absorbs the remainder. With fewer items than workers the leading slices are
/// empty and the last one takes everything.
pub fn plan(item_count: usize, worker_count: usize, policy: TailPolicy) -> Result<Vec<Slice>> {
    if worker_count == 0 {
        return Err(Error::Planning(
            "worker count must be at least 1".to_string(),
        ));
    }

    let size = item_count / worker_count;
    let mut slices = Vec::with_capacity(worker_count);
    let mut start = 0;

    for index in 0..worker_count - 1 {
        let end = start + size;
        slices.push(Slice { index, start, end });
        start = end;
    }

    let end = match policy {
        TailPolicy::Exact => item_count,
        TailPolicy::Legacy => item_count + 1,
    };
    slices.push(Slice {
        index: worker_count - 1,
        start,
        end,
    });

    tracing::debug!(item_count, worker_count, ?policy, "Planned {} slices", slices.len());

    Ok(slices)
}
