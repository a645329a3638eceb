//! The per-line record that flows through the pipeline.
//!
//! A [`Record`] is created by the scanner for every line read from a source
//! and is then mutated by each pipeline stage in turn. Rejection is terminal:
//! once a stage rejects a record, the first reason sticks and the record can
//! never become actioned.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

/// Why a record was dropped by the pipeline.
///
/// The `Display` strings are stable and meant for log filtering.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    #[error("duplicate")]
    Duplicate,
    #[error("no match")]
    NoMatch,
    #[error("no ip found")]
    NoIp,
    #[error("no action to be done")]
    NoAction,
    #[error("ip is whitelisted")]
    Whitelisted,
    #[error("threshold not met")]
    ThresholdNotMet,
    #[error("unknown action")]
    UnknownAction,
}

/// One observed log line plus everything the pipeline derived from it.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub filename: String,
    pub line: String,
    pub started: DateTime<Utc>,
    pub dry_run: bool,

    pub ip: String,
    pub matched: bool,
    /// The body pattern that matched
    #[serde(rename = "match")]
    pub pattern: String,
    /// Index of the matched rule in the rule list
    pub rule: Option<usize>,
    pub desc: String,

    pub action: String,
    pub unban_action: String,
    /// Ban duration in hours
    pub bantime: u64,
    pub threshold: u32,

    pub unban_scheduled: bool,
    pub unban_at: Option<DateTime<Utc>>,

    rejection: Option<Rejection>,
    actioned: bool,
}

impl Record {
    pub fn new(filename: impl Into<String>, line: impl Into<String>, dry_run: bool) -> Self {
        Self {
            filename: filename.into(),
            line: line.into(),
            started: Utc::now(),
            dry_run,
            ip: String::new(),
            matched: false,
            pattern: String::new(),
            rule: None,
            desc: String::new(),
            action: String::new(),
            unban_action: String::new(),
            bantime: 0,
            threshold: 0,
            unban_scheduled: false,
            unban_at: None,
            rejection: None,
            actioned: false,
        }
    }

    /// Reject the record. The first rejection wins.
    pub fn reject(&mut self, reason: Rejection) {
        if self.rejection.is_none() {
            self.rejection = Some(reason);
            self.actioned = false;
        }
    }

    pub fn rejection(&self) -> Option<Rejection> {
        self.rejection
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }

    /// True while no stage has rejected the record.
    pub fn ok(&self) -> bool {
        self.rejection.is_none()
    }

    /// Mark the record as actioned. Ignored for rejected records.
    pub fn mark_actioned(&mut self) {
        if self.ok() {
            self.actioned = true;
        }
    }

    pub fn actioned(&self) -> bool {
        self.actioned
    }

    /// Iterate over the comma separated action names.
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.action
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// When a ban applied now should be lifted. Saturates at the latest
    /// representable time.
    pub fn release_time(&self) -> DateTime<Utc> {
        i64::try_from(self.bantime)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|ban| Utc::now().checked_add_signed(ban))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
