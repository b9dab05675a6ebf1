//! Demo gatherer: writes a small `id,value` input file.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use parallelit::records::{RowRecord, RowWriter};

const ITEMS: u32 = 163;

/// Gather raw data for parallel processing
#[derive(Parser)]
#[command(name = "example-gatherer")]
struct Args {
    /// File to write the gathered rows to
    output: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut writer = RowWriter::create(&args.output, &RowRecord::new(["id", "value"]))
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    for i in 1..=ITEMS {
        writer.write_row(&RowRecord::new([i.to_string(), (i + 20).to_string()]))?;
    }
    let rows = writer.finish()?;

    println!("Gathered {rows} rows into {}", args.output.display());
    println!("Done.");
    Ok(())
}
