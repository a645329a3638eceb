//! Finite sources: standard input, or a whole file read once.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use super::{strip_newline, Tailer};
use crate::signal::ShutdownToken;

/// Reads a stream to the end, then finishes.
pub struct StreamReader {
    name: String,
    reader: BufReader<Box<dyn AsyncRead + Unpin + Send>>,
}

impl StreamReader {
    pub fn new(name: impl Into<String>, reader: Box<dyn AsyncRead + Unpin + Send>) -> Self {
        Self {
            name: name.into(),
            reader: BufReader::new(reader),
        }
    }

    pub fn stdin() -> Self {
        Self::new("stdin", Box::new(tokio::io::stdin()))
    }

    pub async fn file(path: &Path) -> Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self::new(path.display().to_string(), Box::new(file)))
    }
}

#[async_trait]
impl Tailer for StreamReader {
    async fn tail(&mut self, shutdown: ShutdownToken, out: mpsc::Sender<String>) {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = tokio::select! {
                _ = shutdown.cancelled() => return,
                read = self.reader.read_until(b'\n', &mut buf) => read,
            };

            match read {
                Ok(0) => return,
                Ok(_) => {
                    let line = strip_newline(&buf);
                    if line.is_empty() {
                        continue;
                    }
                    if out.send(line).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("Read error on {}: {}", self.name, e);
                    return;
                }
            }
        }
    }
}
