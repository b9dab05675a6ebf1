//! CLI argument structures

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::PartialRunConfig;
use crate::slice::TailPolicy;

/// Split a data file across parallel worker processes and merge their results
#[derive(Parser)]
#[command(name = "parallelit")]
#[command(about = "parallelit - Run one worker process per slice of a data file", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Gather (optionally), split, process in parallel and aggregate
    #[command(name = "run")]
    Run(RunArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Number of worker processes
    #[arg(short = 'c', long = "count", value_name = "N")]
    pub count: Option<usize>,

    /// Worker command, e.g. "python3 worker.py"
    #[arg(short = 'w', long, value_name = "COMMAND")]
    pub worker: Option<String>,

    /// Gatherer command; omit to use an existing input file
    #[arg(short = 'g', long, value_name = "COMMAND")]
    pub gatherer: Option<String>,

    /// Items between two worker progress lines
    #[arg(short = 'i', long = "log-interval", value_name = "N")]
    pub log_interval: Option<u64>,

    /// Delay between two worker launches, e.g. "2s" or "250ms"
    #[arg(long, value_name = "DURATION", value_parser = humantime_serde::re::humantime::parse_duration)]
    pub stagger: Option<Duration>,

    /// Directory for the input, worker outputs and the merged result
    #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// First argument passed to every worker; empty for none
    #[arg(long, value_name = "NAME")]
    pub worker_subcommand: Option<String>,

    /// Extend the last slice one row past the end of the input
    #[arg(long)]
    pub legacy_tail: bool,

    /// TOML configuration file (default: ./parallelit.toml if present)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl RunArgs {
    /// The command-line layer of the configuration. Only flags actually given
    /// are set, so lower layers keep their values.
    pub fn to_partial(&self) -> PartialRunConfig {
        PartialRunConfig {
            worker_count: self.count,
            worker: self.worker.clone(),
            gatherer: self.gatherer.clone(),
            log_interval: self.log_interval,
            stagger: self.stagger,
            output_dir: self.output_dir.clone(),
            worker_subcommand: self.worker_subcommand.clone(),
            tail_policy: self.legacy_tail.then_some(TailPolicy::Legacy),
            default_header: None,
        }
    }
}
