//! Validation helpers for configuration values.
//!
//! This module provides:
//! - Interval parsing (`30s`, `5m`, `1h`, `1d`)
//! - Whitelist entry checks (IP address or CIDR)

use anyhow::Result;
use ipnet::IpNet;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::ScanbanError;

/// Parse an interval like `30s`, `5m`, `1h` or `1d`.
///
/// Requires ASCII-only input to prevent Unicode-related edge cases, and a
/// non-zero amount.
///
/// # Examples
/// ```
/// use scanban::validation::parse_interval;
/// use std::time::Duration;
/// assert_eq!(parse_interval("1h").unwrap(), Duration::from_secs(3600));
/// assert!(parse_interval("4x").is_err());
/// ```
pub fn parse_interval(interval: &str) -> std::result::Result<Duration, ScanbanError> {
    let invalid = |why: &str| ScanbanError::Interval(format!("'{}': {}", interval, why));

    if !interval.is_ascii() {
        return Err(invalid("only ASCII characters allowed"));
    }
    if interval.len() < 2 {
        return Err(invalid("use a format like '30s', '5m', '1h', '1d'"));
    }

    let (num_part, suffix) = interval.split_at(interval.len() - 1);
    let multiplier: u64 = match suffix {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return Err(invalid("suffix must be s, m, h, or d")),
    };

    let amount: u32 = num_part
        .parse()
        .map_err(|_| invalid("number part must be a positive integer"))?;
    if amount == 0 {
        return Err(invalid("interval must be greater than zero"));
    }

    Ok(Duration::from_secs(u64::from(amount) * multiplier))
}

/// Check a whitelist entry: a single IP address, or a CIDR when it has a `/`.
///
/// # Examples
/// ```
/// use scanban::validation::validate_whitelist_entry;
/// assert!(validate_whitelist_entry("192.168.1.1").is_ok());
/// assert!(validate_whitelist_entry("192.168.0.0/24").is_ok());
/// assert!(validate_whitelist_entry("192.168.0.0/99").is_err());
/// ```
pub fn validate_whitelist_entry(entry: &str) -> Result<()> {
    let entry = entry.trim();
    if entry.contains('/') {
        entry
            .parse::<IpNet>()
            .map_err(|_| anyhow::anyhow!("Invalid CIDR: {}", entry))?;
    } else {
        entry
            .parse::<IpAddr>()
            .map_err(|_| anyhow::anyhow!("Invalid IP address: {}", entry))?;
    }
    Ok(())
}
