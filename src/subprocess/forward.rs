//! Line-by-line forwarding of child output to the parent console

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use super::runner::ProcessTag;

/// Stream source identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// Trait for processing child output line by line
#[async_trait]
pub trait StreamProcessor: Send + Sync {
    /// Process a line from the stream
    async fn process_line(&self, line: &str, source: StreamSource);
}

/// Writes each line to the parent's matching stream, prefixed with the role tag.
pub struct TaggedConsoleProcessor {
    tag: ProcessTag,
}

impl TaggedConsoleProcessor {
    pub fn new(tag: ProcessTag) -> Self {
        Self { tag }
    }

    pub fn format_line(&self, line: &str, source: StreamSource) -> String {
        match source {
            StreamSource::Stdout => format!("{} {}", self.tag, line),
            StreamSource::Stderr => format!("{} [ERROR] {}", self.tag, line),
        }
    }
}

#[async_trait]
impl StreamProcessor for TaggedConsoleProcessor {
    async fn process_line(&self, line: &str, source: StreamSource) {
        let formatted = self.format_line(line, source);
        // One write per line; lines from different children may interleave
        match source {
            StreamSource::Stdout => println!("{formatted}"),
            StreamSource::Stderr => eprintln!("{formatted}"),
        }
    }
}

/// Read `stream` until EOF, handing each line to `processor`.
///
/// Invalid UTF-8 is replaced rather than treated as an error. The stream is
/// always drained so the child never writes into a closed pipe.
pub async fn forward_lines(
    stream: impl AsyncRead + Unpin,
    source: StreamSource,
    processor: Arc<dyn StreamProcessor>,
) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf);
                processor.process_line(&line, source).await;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!("Stopped forwarding {:?}: {}", source, e);
                break;
            }
        }
    }
}
