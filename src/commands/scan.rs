//! Scan command: one-shot analysis of a file or stdin.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::cmd_abstraction::{CommandExecutor, ShellExecutor};
use crate::pipeline::Pipeline;
use crate::scan::{ScanOptions, Scanner, Source};
use crate::signal::{ShutdownGuard, ShutdownToken};
use crate::unban::UnbanList;

/// Run the scan command
pub async fn run(
    file: &str,
    dry_run: bool,
    config_path: &Path,
    dropin_dir: &Path,
    verbose: bool,
) -> Result<()> {
    let config = super::load_config(config_path, dropin_dir)?;

    let executor: Arc<dyn CommandExecutor> =
        Arc::new(ShellExecutor::with_timeout(config.command_timeout()?));
    let unban_list = Arc::new(UnbanList::load(&config.unban_list, executor.clone())?);

    let shutdown = ShutdownToken::new();
    let _signals = ShutdownGuard::new(shutdown.clone());

    let source = Source::one_shot(file);
    let options = ScanOptions {
        dry_run,
        skip_existing: false,
        ..Default::default()
    };
    let records = Scanner::new(vec![source.clone()], options).scan(shutdown.clone());

    let mut pipeline = Pipeline::standard(
        config.compile()?,
        config.whitelist(),
        config.action_map(),
        executor,
        unban_list,
    )
    .with_default_observers(verbose);
    pipeline.run(records, shutdown).await;

    let metrics = pipeline.metrics();
    println!();
    println!("Scanned {}", source);
    println!("{}", metrics.summary());
    println!();

    Ok(())
}
