//! Rule matching and IP extraction.

use async_trait::async_trait;
use regex::Regex;
use std::net::IpAddr;

use crate::pipeline::Stage;
use crate::record::{Record, Rejection};

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub action: String,
    /// Command template run when the ban expires
    pub unban_action: String,
    /// Ban duration in hours
    pub bantime: u64,
    pub threshold: u32,
    pub desc: String,
    ip_regex: Regex,
    patterns: Vec<Regex>,
}

impl Rule {
    pub fn new(ip_regex: Regex, patterns: Vec<Regex>) -> Self {
        Self {
            action: String::new(),
            unban_action: String::new(),
            bantime: 0,
            threshold: 0,
            desc: String::new(),
            ip_regex,
            patterns,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn with_unban_action(mut self, unban_action: impl Into<String>) -> Self {
        self.unban_action = unban_action.into();
        self
    }

    pub fn with_bantime(mut self, hours: u64) -> Self {
        self.bantime = hours;
        self
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn patterns(&self) -> &[Regex] {
        &self.patterns
    }

    pub fn ip_regex(&self) -> &Regex {
        &self.ip_regex
    }

    /// The first body pattern matching the line, if any.
    pub fn matching_pattern(&self, line: &str) -> Option<&Regex> {
        self.patterns.iter().find(|ptn| ptn.is_match(line))
    }

    /// First capture group of the IP pattern, if it is a valid address.
    pub fn find_ip(&self, line: &str) -> Option<IpAddr> {
        let caps = self.ip_regex.captures(line)?;
        let raw = caps.get(1)?.as_str().trim();
        raw.parse().ok()
    }
}

/// Tries rules in order; the first rule with a matching pattern decides.
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Fill in the record from the first matching rule, or reject it.
    pub fn apply(&self, record: &mut Record) {
        let found = self.rules.iter().enumerate().find_map(|(idx, rule)| {
            rule.matching_pattern(&record.line)
                .map(|ptn| (idx, rule, ptn.as_str().to_string()))
        });

        let Some((idx, rule, pattern)) = found else {
            record.reject(Rejection::NoMatch);
            return;
        };

        record.matched = true;
        record.pattern = pattern;
        record.rule = Some(idx);
        record.desc = rule.desc.clone();
        record.action = rule.action.clone();
        record.unban_action = rule.unban_action.clone();
        record.bantime = rule.bantime;
        record.threshold = rule.threshold;

        match rule.find_ip(&record.line) {
            Some(ip) => record.ip = ip.to_string(),
            None => {
                record.reject(Rejection::NoIp);
                return;
            }
        }

        if record.action_names().next().is_none() {
            record.reject(Rejection::NoAction);
        }
    }
}

#[async_trait]
impl Stage for RuleEngine {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn handle(&mut self, record: &mut Record) {
        if record.is_rejected() {
            return;
        }
        self.apply(record);
    }
}
