//! IPs and networks that must never be banned.

use async_trait::async_trait;
use ipnet::IpNet;
use std::net::IpAddr;
use tracing::warn;

use crate::pipeline::Stage;
use crate::record::{Record, Rejection};

#[derive(Debug, Clone)]
enum Entry {
    Literal(String),
    Network(IpNet),
    /// Malformed CIDR, never matches
    Invalid(String),
}

/// Ordered list of literal IPs and CIDR ranges.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    entries: Vec<Entry>,
}

impl Whitelist {
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Self {
        let entries = entries
            .iter()
            .map(|raw| {
                let raw = raw.as_ref().trim();
                if raw.contains('/') {
                    match raw.parse::<IpNet>() {
                        Ok(net) => Entry::Network(net),
                        Err(_) => {
                            warn!("Ignoring malformed whitelist entry: {}", raw);
                            Entry::Invalid(raw.to_string())
                        }
                    }
                } else {
                    Entry::Literal(raw.to_string())
                }
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if `ip` equals a literal entry or falls inside a network entry.
    pub fn contains(&self, ip: &str) -> bool {
        let parsed: Option<IpAddr> = ip.parse().ok();
        self.entries.iter().any(|entry| match entry {
            Entry::Literal(lit) => {
                lit == ip
                    || matches!((parsed, lit.parse::<IpAddr>()), (Some(a), Ok(b)) if a == b)
            }
            Entry::Network(net) => parsed.map(|addr| net.contains(&addr)).unwrap_or(false),
            Entry::Invalid(_) => false,
        })
    }
}

#[async_trait]
impl Stage for Whitelist {
    fn name(&self) -> &'static str {
        "whitelist"
    }

    async fn handle(&mut self, record: &mut Record) {
        if record.is_rejected() {
            return;
        }
        if self.contains(&record.ip) {
            record.reject(Rejection::Whitelisted);
        }
    }
}
