use std::path::Path;

use super::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::subprocess::{ExitStatus, ProcessCommandBuilder, ProcessRunner, ProcessTag};

/// Run the gatherer once as `<gatherer...> <output_path>` and wait for it.
///
/// A nonzero exit is logged and returned as the status, not as an error; only
/// a failure to start the program is an `Err`. Cancelling `token` asks the
/// gatherer to stop and returns `Error::Interrupted` without waiting for it.
pub async fn gather(
    runner: &dyn ProcessRunner,
    gatherer: &[String],
    output_path: &Path,
    token: &CancelToken,
) -> Result<ExitStatus> {
    let command = ProcessCommandBuilder::from_parts(gatherer)
        .arg(&output_path.to_string_lossy())
        .build();
    let display = command.display();
    let tag = ProcessTag::Gatherer;

    tracing::info!("{} gathering raw data into {}", tag, output_path.display());
    let mut process = runner
        .spawn(command, tag)
        .await
        .map_err(|source| Error::Spawn {
            command: display,
            source,
        })?;

    let waited = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        status = process.wait() => Some(status),
    };

    match waited {
        None => {
            if let Err(e) = process.terminate() {
                tracing::warn!("{} termination request failed: {}", tag, e);
            }
            Err(Error::Interrupted)
        }
        Some(Ok(status)) => {
            if status.success() {
                tracing::info!("{} child process exited with {}", tag, status);
            } else {
                let err = Error::ProcessExit {
                    tag: tag.to_string(),
                    status: status.clone(),
                };
                tracing::warn!("{}; continuing with whatever input exists", err);
            }
            Ok(status)
        }
        Some(Err(e)) => {
            tracing::error!("{} could not be awaited: {}", tag, e);
            Ok(ExitStatus::Error(-1))
        }
    }
}
