//! Container log tailer.
//!
//! Follows `docker container logs -f <name>` and reads the child's standard
//! output line by line. The child is killed and reaped when tailing stops.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{strip_newline, Tailer, DEFAULT_POLL_INTERVAL};
use crate::signal::ShutdownToken;

pub const CONTAINER_PREFIX: &str = "docker://";

const DOCKER: &str = "docker";

pub struct ContainerTailer {
    name: String,
    child: Child,
    reader: BufReader<ChildStdout>,
    poll_interval: Duration,
}

impl ContainerTailer {
    /// Start following the logs of container `name`. With `skip_existing`
    /// earlier log history is not replayed.
    pub fn open(name: &str, skip_existing: bool) -> Result<Self> {
        let name = name.trim_start_matches(CONTAINER_PREFIX);
        let mut args = vec!["container", "logs", "-f"];
        if skip_existing {
            args.push("--tail=0");
        }
        args.push(name);
        Self::spawn(name, DOCKER, &args)
    }

    /// Follow the output of an arbitrary command.
    pub fn spawn(name: &str, program: &str, args: &[&str]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {} for container {}", program, name))?;

        let stdout = child
            .stdout
            .take()
            .with_context(|| format!("No stdout from {} for container {}", program, name))?;

        Ok(Self {
            name: name.to_string(),
            child,
            reader: BufReader::new(stdout),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn poll_interval(mut self, d: Duration) -> Self {
        self.poll_interval = d;
        self
    }

    /// Kill the child and wait for it so it does not linger as a zombie.
    async fn close(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("Failed to kill log follower for {}: {}", self.name, e);
        }
        if let Err(e) = self.child.wait().await {
            debug!("Failed to reap log follower for {}: {}", self.name, e);
        }
    }
}

#[async_trait]
impl Tailer for ContainerTailer {
    async fn tail(&mut self, shutdown: ShutdownToken, out: mpsc::Sender<String>) {
        let mut buf = Vec::new();

        loop {
            let read = tokio::select! {
                _ = shutdown.cancelled() => break,
                read = self.reader.read_until(b'\n', &mut buf) => read,
            };

            match read {
                Ok(n) if n > 0 && buf.last() == Some(&b'\n') => {
                    let line = strip_newline(&buf);
                    buf.clear();
                    if !line.is_empty() && out.send(line).await.is_err() {
                        break;
                    }
                }
                // End of stream, partial line, or read error: wait and retry
                other => {
                    if let Err(e) = other {
                        warn!("Read error on container {}: {}", self.name, e);
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        self.close().await;
    }
}
