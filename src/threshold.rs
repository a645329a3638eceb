//! Hit counting before a ban is applied.
//!
//! A rule with threshold `t` lets `t` hits from an IP pass silently and acts
//! on the next one, after which the count starts over. Counts are kept per
//! rule and IP, in memory only.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::pipeline::Stage;
use crate::record::{Record, Rejection};

type Key = (Option<usize>, String);

#[derive(Debug, Default)]
pub struct Threshold {
    hits: HashMap<Key, u32>,
}

impl Threshold {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hit. Returns true if the hit should be acted on.
    pub fn hit(&mut self, rule: Option<usize>, ip: &str, threshold: u32) -> bool {
        if threshold == 0 {
            return true;
        }

        let key = (rule, ip.to_string());
        let count = self.hits.entry(key.clone()).or_insert(0);
        *count += 1;
        if *count <= threshold {
            return false;
        }

        // Only IPs part way through a count are remembered
        self.hits.remove(&key);
        true
    }

    /// Current count for a key
    pub fn count(&self, rule: Option<usize>, ip: &str) -> u32 {
        self.hits
            .get(&(rule, ip.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Stage for Threshold {
    fn name(&self) -> &'static str {
        "threshold"
    }

    async fn handle(&mut self, record: &mut Record) {
        if record.is_rejected() {
            return;
        }
        if !self.hit(record.rule, &record.ip, record.threshold) {
            record.reject(Rejection::ThresholdNotMet);
        }
    }
}
