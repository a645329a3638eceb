//! Drops lines identical to one of the most recently seen lines.
//!
//! Some sources (container logs after a restart, overlapping files) repeat
//! lines. A small window of SHA-256 fingerprints is enough to catch this
//! without remembering whole lines.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};

use crate::pipeline::Stage;
use crate::record::{Record, Rejection};

/// Number of recent lines remembered
pub const DEFAULT_WINDOW: usize = 50;

type Fingerprint = [u8; 32];

pub struct Dedup {
    order: VecDeque<Fingerprint>,
    seen: HashSet<Fingerprint>,
    capacity: usize,
}

impl Dedup {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_WINDOW)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    fn fingerprint(line: &str) -> Fingerprint {
        Sha256::digest(line.as_bytes()).into()
    }

    /// Returns true if the line was already in the window, otherwise remembers it.
    pub fn check(&mut self, line: &str) -> bool {
        let fp = Self::fingerprint(line);
        if self.seen.contains(&fp) {
            return true;
        }

        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(fp);
        self.seen.insert(fp);
        false
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for Dedup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for Dedup {
    fn name(&self) -> &'static str {
        "dedup"
    }

    async fn handle(&mut self, record: &mut Record) {
        if record.is_rejected() {
            return;
        }
        if self.check(&record.line) {
            record.reject(Rejection::Duplicate);
        }
    }
}
