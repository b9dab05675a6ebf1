//! Demo worker: doubles the `value` column of its slice.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;

use parallelit::records::{RangeReader, RowRecord, RowWriter};
use parallelit::slice::Slice;

const DEFAULT_LOG_INTERVAL: usize = 1000;

#[derive(Parser)]
#[command(name = "example-worker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Work on a slice from a CSV file
    Work {
        /// Current worker number
        #[arg(short = 'n', long)]
        number: usize,

        /// First data row to process
        #[arg(short = 's', long)]
        start: usize,

        /// Data row to stop before
        #[arg(short = 'e', long)]
        end: usize,

        /// File to write the results to
        #[arg(short = 'o', long)]
        output: PathBuf,

        /// Items between two progress lines
        #[arg(short = 'i', long = "log-interval", default_value_t = DEFAULT_LOG_INTERVAL)]
        log_interval: usize,

        /// Input file the slice is taken from
        source: PathBuf,
    },
}

fn main() -> Result<()> {
    let started = Instant::now();
    let Commands::Work {
        number,
        start,
        end,
        output,
        log_interval,
        source,
    } = Cli::parse().command;

    let slice = Slice {
        index: number.saturating_sub(1),
        start,
        end,
    };
    let rows = RangeReader::open(&source, &slice)?
        .collect::<parallelit::Result<Vec<_>>>()
        .with_context(|| format!("Failed to read slice {slice} of {}", source.display()))?;
    println!("Read slice {slice} from {}", source.display());

    let mut writer = RowWriter::create(&output, &RowRecord::new(["id", "value"]))?;
    let count = rows.len();
    for (i, row) in rows.iter().enumerate() {
        if i > 0 && i % log_interval.max(1) == 0 {
            println!("At item {i}/{count}...");
        }
        let id = row.get(0).unwrap_or_default();
        let value: i64 = row
            .get(1)
            .unwrap_or_default()
            .trim()
            .parse()
            .with_context(|| format!("Row {id} has no numeric value"))?;
        writer.write_row(&RowRecord::new([id.to_string(), (value * 2).to_string()]))?;
    }
    writer.finish()?;

    println!("Done.");
    println!("runtime: {:?}", started.elapsed());
    Ok(())
}
