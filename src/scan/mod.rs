//! Log sources and the fan-in that merges them into one record stream.
//!
//! Every configured source gets a [`Tailer`] task that writes raw lines into
//! its own channel, plus a collector task that wraps each line into a
//! [`Record`] and forwards it to the shared output channel. Each collector
//! holds a clone of the output sender, so the output closes once the last
//! collector finishes.

mod container;
mod file;
mod stream;

pub use container::{ContainerTailer, CONTAINER_PREFIX};
pub use file::FileTailer;
pub use stream::StreamReader;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::record::Record;
use crate::signal::ShutdownToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(5);

const LINE_BUFFER: usize = 64;
const RECORD_BUFFER: usize = 256;

/// Produces raw lines from one source until it is exhausted or shut down.
///
/// Dropping `out` when `tail` returns closes the source's line channel.
#[async_trait]
pub trait Tailer: Send {
    async fn tail(&mut self, shutdown: ShutdownToken, out: mpsc::Sender<String>);
}

/// Where lines come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A log file followed across rotations
    File(PathBuf),
    /// `docker://<name>`
    Container(String),
    /// Standard input, read to the end
    Stdin,
    /// A file read once from start to end
    Whole(PathBuf),
}

impl Source {
    /// Parse a configured source: `-` or `stdin`, `docker://<name>`, or a path.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value == "-" || value == "stdin" {
            Source::Stdin
        } else if let Some(name) = value.strip_prefix(CONTAINER_PREFIX) {
            Source::Container(name.to_string())
        } else {
            Source::File(PathBuf::from(value))
        }
    }

    /// Parse a source for one-shot analysis: stdin or a whole file.
    pub fn one_shot(value: &str) -> Self {
        match Self::parse(value) {
            Source::File(path) => Source::Whole(path),
            other => other,
        }
    }

    /// Name recorded as the filename of every record from this source.
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Open the tailer for this source.
    pub async fn open(&self, options: &ScanOptions) -> Result<Box<dyn Tailer>> {
        Ok(match self {
            Source::File(path) => Box::new(
                FileTailer::open(path, options.skip_existing)
                    .await?
                    .poll_interval(options.poll_interval)
                    .rotation_interval(options.rotation_interval),
            ),
            Source::Container(name) => Box::new(
                ContainerTailer::open(name, options.skip_existing)?
                    .poll_interval(options.poll_interval),
            ),
            Source::Stdin => Box::new(StreamReader::stdin()),
            Source::Whole(path) => Box::new(StreamReader::file(path).await?),
        })
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::File(path) | Source::Whole(path) => write!(f, "{}", path.display()),
            Source::Container(name) => write!(f, "{}{}", CONTAINER_PREFIX, name),
            Source::Stdin => write!(f, "stdin"),
        }
    }
}

/// Settings shared by every source of a scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub dry_run: bool,
    /// Only read lines written after startup
    pub skip_existing: bool,
    pub poll_interval: Duration,
    pub rotation_interval: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            skip_existing: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            rotation_interval: DEFAULT_ROTATION_INTERVAL,
        }
    }
}

pub struct Scanner {
    sources: Vec<Source>,
    options: ScanOptions,
}

impl Scanner {
    pub fn new(sources: Vec<Source>, options: ScanOptions) -> Self {
        Self { sources, options }
    }

    /// Start every source and return the merged record stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn scan(self, shutdown: ShutdownToken) -> mpsc::Receiver<Record> {
        let (tx, rx) = mpsc::channel(RECORD_BUFFER);

        for source in self.sources {
            let (line_tx, line_rx) = mpsc::channel(LINE_BUFFER);
            let name = source.name();

            let options = self.options.clone();
            let token = shutdown.clone();
            tokio::spawn(async move {
                match source.open(&options).await {
                    Ok(mut tailer) => {
                        info!("Watching {}", source);
                        tailer.tail(token, line_tx).await;
                    }
                    Err(e) => error!("Not watching {}: {:#}", source, e),
                }
            });

            tokio::spawn(collect(
                name,
                self.options.dry_run,
                line_rx,
                tx.clone(),
                shutdown.clone(),
            ));
        }

        rx
    }
}

/// Wrap lines from one source into records until the source finishes.
async fn collect(
    name: String,
    dry_run: bool,
    mut lines: mpsc::Receiver<String>,
    out: mpsc::Sender<Record>,
    shutdown: ShutdownToken,
) {
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        let record = Record::new(name.as_str(), line, dry_run);
        tokio::select! {
            _ = shutdown.cancelled() => break,
            sent = out.send(record) => if sent.is_err() { break },
        }
    }
    debug!("Source {} finished", name);
}

/// Decode one line, dropping the trailing `\n` or `\r\n`.
pub(crate) fn strip_newline(buf: &[u8]) -> String {
    String::from_utf8_lossy(buf)
        .trim_end_matches('\n')
        .trim_end_matches('\r')
        .to_string()
}
