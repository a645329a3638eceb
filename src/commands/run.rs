//! Run command: the scanning daemon.

use anyhow::{bail, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cmd_abstraction::{CommandExecutor, ShellExecutor};
use crate::lock::LockGuard;
use crate::pipeline::Pipeline;
use crate::scan::{ScanOptions, Scanner};
use crate::signal::{ShutdownGuard, ShutdownToken};
use crate::unban::{reversal_loop, UnbanList};

/// Run the daemon until every source ends or a signal arrives.
pub async fn run(
    dry_run: bool,
    all: bool,
    config_path: &Path,
    dropin_dir: &Path,
    verbose: bool,
) -> Result<()> {
    let _lock = LockGuard::acquire()?;

    let config = super::load_config(config_path, dropin_dir)?;
    let sources = config.sources();
    if sources.is_empty() {
        bail!("No files configured in {:?}", config_path);
    }

    let executor: Arc<dyn CommandExecutor> =
        Arc::new(ShellExecutor::with_timeout(config.command_timeout()?));
    let unban_list = Arc::new(UnbanList::load(&config.unban_list, executor.clone())?);
    let rules = config.compile()?;

    info!(
        "Loaded {} rules, {} sources, {} pending unbans",
        rules.len(),
        sources.len(),
        unban_list.len().await
    );
    if dry_run {
        warn!("Dry run: no ban or unban command will be run");
    }

    let shutdown = ShutdownToken::new();
    let _signals = ShutdownGuard::new(shutdown.clone());

    let reversal = if dry_run {
        None
    } else {
        Some(tokio::spawn(reversal_loop(
            unban_list.clone(),
            config.unban_interval()?,
            shutdown.clone(),
        )))
    };

    let options = ScanOptions {
        dry_run,
        skip_existing: !all,
        ..Default::default()
    };
    let records = Scanner::new(sources, options).scan(shutdown.clone());

    let mut pipeline = Pipeline::standard(
        rules,
        config.whitelist(),
        config.action_map(),
        executor,
        unban_list.clone(),
    )
    .with_default_observers(verbose);

    pipeline.run(records, shutdown.clone()).await;

    // Sources may all be finite, stop the unban loop too
    shutdown.cancel();
    if let Some(handle) = reversal {
        if let Err(e) = handle.await {
            warn!("Unban loop ended abnormally: {}", e);
        }
    }

    let metrics = pipeline.metrics();
    info!(
        "Stopped after {} lines: {} actioned, {} rejected, {} unbans pending",
        metrics.lines(),
        metrics.actioned(),
        metrics.rejected(),
        unban_list.len().await
    );
    Ok(())
}
