use clap::Parser;
use tracing::{debug, error, trace};
use tracing_subscriber::EnvFilter;

use parallelit::cli::{execute_command, get_log_level, Cli};
use parallelit::error::Error;

/// Standard exit code for a run stopped by SIGINT
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(get_log_level(cli.verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.verbose >= 2) // Show target module for -vv and above
        .with_thread_ids(cli.verbose >= 3) // Show thread IDs for -vvv
        .with_line_number(cli.verbose >= 3) // Show line numbers for -vvv
        .init();

    debug!("parallelit started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    match execute_command(cli.command).await {
        Ok(()) => println!("Done."),
        Err(e) if matches!(e.downcast_ref::<Error>(), Some(Error::Interrupted)) => {
            eprintln!("Interrupted");
            std::process::exit(EXIT_INTERRUPTED);
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
