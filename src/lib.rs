//! # parallelit
//!
//! Splits a delimited data file into contiguous row slices, runs one worker
//! process per slice in parallel and merges the worker outputs back into a
//! single file in slice order.
//!
//! ## Usage
//!
//! ```bash
//! parallelit run -c 4 -w "python3 worker.py" [-g ./gatherer] [-i 1000] [--stagger 2s]
//! ```
//!
//! ## Modules
//!
//! - `aggregate` - Ordered merge of the per-worker output files
//! - `cli` - Command-line arguments and command routing
//! - `config` - Layered run configuration and the output file layout
//! - `orchestrator` - Gatherer launch, staggered worker launch and cancellation
//! - `pipeline` - Run driver, interrupt handling and the run report
//! - `records` - Row records, row writer and the range extractor
//! - `slice` - Slice planning
//! - `subprocess` - Child process abstraction with a mock for tests
pub mod aggregate;
pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod records;
pub mod slice;
pub mod subprocess;

pub use error::{Error, Result};
