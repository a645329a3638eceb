//! Passive consumers of finished records: logs and metrics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::record::{Record, Rejection};
use crate::utils::format_count_with_separator;

/// Sees every record once the pipeline is done with it.
pub trait Observer: Send {
    fn observe(&mut self, record: &Record);
}

/// Logs every actioned record.
pub struct ActionLog;

impl Observer for ActionLog {
    fn observe(&mut self, record: &Record) {
        if !record.actioned() {
            return;
        }

        let prefix = if record.dry_run { "DRY RUN " } else { "" };
        match record.unban_at {
            Some(at) => info!(
                "{}{}: banned {} with {} until {}",
                prefix,
                record.filename,
                record.ip,
                record.action,
                at.to_rfc3339()
            ),
            None => info!(
                "{}{}: banned {} with {}",
                prefix, record.filename, record.ip, record.action
            ),
        }
    }
}

/// Logs rejected records as JSON when verbose.
pub struct RejectionLog {
    verbose: bool,
}

#[derive(Serialize)]
struct RejectionEntry<'a> {
    err: String,
    line: &'a str,
}

impl RejectionLog {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Observer for RejectionLog {
    fn observe(&mut self, record: &Record) {
        if !self.verbose {
            return;
        }
        let Some(reason) = record.rejection() else {
            return;
        };

        let entry = RejectionEntry {
            err: reason.to_string(),
            line: &record.line,
        };
        match serde_json::to_string(&entry) {
            Ok(json) => debug!("{}", json),
            Err(_) => debug!("{}: {}", reason, record.line),
        }
    }
}

/// Per-pipeline counters.
#[derive(Debug, Clone)]
pub struct Metrics {
    started_at: DateTime<Utc>,
    started: Instant,
    finished: Option<Duration>,
    lines: u64,
    actioned: u64,
    rejected: u64,
    reasons: BTreeMap<String, u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            finished: None,
            lines: 0,
            actioned: 0,
            rejected: 0,
            reasons: BTreeMap::new(),
        }
    }

    pub fn observe(&mut self, record: &Record) {
        self.lines += 1;
        if record.actioned() {
            self.actioned += 1;
        }
        if let Some(reason) = record.rejection() {
            self.rejected += 1;
            *self.reasons.entry(reason.to_string()).or_insert(0) += 1;
        }
    }

    /// Freeze the elapsed time.
    pub fn finish(&mut self) {
        if self.finished.is_none() {
            self.finished = Some(self.started.elapsed());
        }
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn actioned(&self) -> u64 {
        self.actioned
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn rejected_for(&self, reason: Rejection) -> u64 {
        self.reasons.get(&reason.to_string()).copied().unwrap_or(0)
    }

    pub fn reasons(&self) -> &BTreeMap<String, u64> {
        &self.reasons
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.finished.unwrap_or_else(|| self.started.elapsed())
    }

    pub fn summary(&self) -> Summary<'_> {
        Summary(self)
    }
}

/// Human readable report of a [`Metrics`] snapshot.
pub struct Summary<'a>(&'a Metrics);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        writeln!(f, "Started:  {}", m.started_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "Elapsed:  {:.3}s", m.elapsed().as_secs_f64())?;
        writeln!(f, "Lines:    {}", format_count_with_separator(m.lines))?;
        writeln!(f, "Actioned: {}", format_count_with_separator(m.actioned))?;
        write!(f, "Rejected: {}", format_count_with_separator(m.rejected))?;
        for (reason, count) in &m.reasons {
            write!(f, "\n  {:<22} {}", reason, format_count_with_separator(*count))?;
        }
        Ok(())
    }
}
