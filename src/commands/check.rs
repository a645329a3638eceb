//! Check command implementation.

use anyhow::Result;
use std::path::Path;

use crate::record::{Record, Rejection};
use crate::rules::RuleEngine;

/// Validate the configuration, list its rules, and optionally classify a line.
pub async fn run(line: Option<&str>, config_path: &Path, dropin_dir: &Path) -> Result<()> {
    let config = super::load_config(config_path, dropin_dir)?;
    let engine = RuleEngine::new(config.compile()?);
    let whitelist = config.whitelist();

    println!();
    println!("Configuration OK: {:?}", config_path);
    println!(
        "  {} sources, {} actions, {} whitelist entries",
        config.files.len(),
        config.actions.len(),
        whitelist.len()
    );
    println!();

    for (idx, rule) in engine.rules().iter().enumerate() {
        let desc = if rule.desc.is_empty() {
            "(no description)"
        } else {
            rule.desc.as_str()
        };
        println!("Rule {}: {}", idx, desc);
        for pattern in rule.patterns() {
            println!("  pattern:   {}", pattern.as_str());
        }
        println!("  ip_regex:  {}", rule.ip_regex().as_str());
        println!("  action:    {}", rule.action);
        if !rule.unban_action.is_empty() {
            println!("  unban:     {} after {}h", rule.unban_action, rule.bantime);
        }
        if rule.threshold > 0 {
            println!("  threshold: {}", rule.threshold);
        }
    }

    if let Some(line) = line {
        let mut record = Record::new("check", line, true);
        engine.apply(&mut record);
        if record.ok() && whitelist.contains(&record.ip) {
            record.reject(Rejection::Whitelisted);
        }

        println!();
        match record.rejection() {
            Some(reason) => println!("Line is not actioned: {}", reason),
            None => {
                let rule = record.rule.map(|r| r.to_string()).unwrap_or_default();
                println!("Line matches rule {} ({})", rule, record.pattern);
                println!("  ip:     {}", record.ip);
                println!("  action: {}", record.action);
                if record.threshold > 0 {
                    println!(
                        "  acted on after {} earlier hits from the same IP",
                        record.threshold
                    );
                }
            }
        }
    }
    println!();

    Ok(())
}
