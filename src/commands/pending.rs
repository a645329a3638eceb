//! Pending command: list scheduled unbans.

use anyhow::Result;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;

use crate::cmd_abstraction::ShellExecutor;
use crate::unban::UnbanList;
use crate::utils::{format_remaining, truncate};

/// Run the pending command
pub async fn run(config_path: &Path, dropin_dir: &Path) -> Result<()> {
    let config = super::load_config(config_path, dropin_dir)?;
    let list = UnbanList::load(&config.unban_list, Arc::new(ShellExecutor::new()))?;
    let mut pending = list.pending().await;

    println!();
    if pending.is_empty() {
        println!("No pending unbans ({})", list.path().display());
        println!();
        return Ok(());
    }

    pending.sort_by_key(|e| e.after);
    let now = Utc::now();

    println!("{:<40} {:<26} {:<8} ACTION", "IP", "UNBAN AT", "IN");
    for entry in &pending {
        println!(
            "{:<40} {:<26} {:<8} {}",
            entry.ip,
            entry.after.format("%Y-%m-%d %H:%M:%S UTC"),
            format_remaining(entry.after, now),
            truncate(&entry.command(), 60)
        );
    }
    println!();
    println!("{} pending unbans in {}", pending.len(), list.path().display());
    println!();

    Ok(())
}
