//! Rotation-aware file tailer.
//!
//! [`FileTailer`] follows a log file the way `tail -F` does. When the file
//! at the path is replaced (different device or inode) or shrinks below the
//! read position (copy-truncate rotation), it is reopened and read from the
//! start.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{strip_newline, Tailer, DEFAULT_POLL_INTERVAL, DEFAULT_ROTATION_INTERVAL};
use crate::signal::ShutdownToken;

/// (device, inode)
type Identity = (u64, u64);

pub struct FileTailer {
    path: PathBuf,
    reader: BufReader<File>,
    identity: Identity,
    poll_interval: Duration,
    rotation_interval: Duration,
}

impl FileTailer {
    /// Open `path`. With `skip_existing` only lines written from now on are
    /// read, otherwise the file is read from the start.
    pub async fn open(path: impl Into<PathBuf>, skip_existing: bool) -> Result<Self> {
        let path = path.into();
        let (reader, identity) = open_reader(&path, skip_existing).await?;
        Ok(Self {
            path,
            reader,
            identity,
            poll_interval: DEFAULT_POLL_INTERVAL,
            rotation_interval: DEFAULT_ROTATION_INTERVAL,
        })
    }

    /// How long to sleep at end of file before reading again.
    pub fn poll_interval(mut self, d: Duration) -> Self {
        self.poll_interval = d;
        self
    }

    /// How often to check for rotation while idle.
    pub fn rotation_interval(mut self, d: Duration) -> Self {
        self.rotation_interval = d;
        self
    }

    /// True if the path now names a different file, or the file was truncated.
    async fn needs_reopen(&mut self) -> bool {
        // A missing path is likely mid-rotation, try again later
        let Ok(meta) = tokio::fs::metadata(&self.path).await else {
            return false;
        };

        if (meta.dev(), meta.ino()) != self.identity {
            info!("{} rotated, reopening", self.path.display());
            return true;
        }

        match self.reader.stream_position().await {
            Ok(pos) if meta.len() < pos => {
                info!("{} truncated, reopening", self.path.display());
                true
            }
            _ => false,
        }
    }

    async fn reopen(&mut self) -> Result<()> {
        let (reader, identity) = open_reader(&self.path, false).await?;
        self.reader = reader;
        self.identity = identity;
        Ok(())
    }
}

async fn open_reader(path: &Path, skip_existing: bool) -> Result<(BufReader<File>, Identity)> {
    let mut file = File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let meta = file
        .metadata()
        .await
        .with_context(|| format!("Failed to stat {}", path.display()))?;

    if skip_existing {
        file.seek(std::io::SeekFrom::End(0)).await?;
    }

    Ok((BufReader::new(file), (meta.dev(), meta.ino())))
}

#[async_trait]
impl Tailer for FileTailer {
    async fn tail(&mut self, shutdown: ShutdownToken, out: mpsc::Sender<String>) {
        let mut buf = Vec::new();
        let mut last_check = Instant::now();

        loop {
            if shutdown.is_cancelled() {
                return;
            }

            let read = tokio::select! {
                _ = shutdown.cancelled() => return,
                read = self.reader.read_until(b'\n', &mut buf) => read,
            };

            match read {
                // End of file, or a partial line waiting for its newline
                Ok(0) => {
                    if last_check.elapsed() >= self.rotation_interval {
                        last_check = Instant::now();
                        if self.needs_reopen().await {
                            // Flush an unterminated last line of the old file
                            if !buf.is_empty() {
                                let line = strip_newline(&buf);
                                buf.clear();
                                if !line.is_empty() && out.send(line).await.is_err() {
                                    return;
                                }
                            }
                            if let Err(e) = self.reopen().await {
                                error!("{:#}", e);
                                return;
                            }
                            continue;
                        }
                    }

                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Ok(_) => {
                    if buf.last() != Some(&b'\n') {
                        continue;
                    }
                    let line = strip_newline(&buf);
                    buf.clear();
                    if line.is_empty() {
                        continue;
                    }
                    if out.send(line).await.is_err() {
                        debug!("Line receiver for {} dropped", self.path.display());
                        return;
                    }
                }
                Err(e) => {
                    warn!("Read error on {}: {}", self.path.display(), e);
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }
    }
}
