//! scanban - scan logs and ban offending IPs.

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use scanban::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { dry_run, all } => {
            scanban::commands::run::run(dry_run, all, &cli.config, &cli.config_dir, cli.verbose)
                .await
        }
        Commands::Scan { ref file, dry_run } => {
            scanban::commands::scan::run(file, dry_run, &cli.config, &cli.config_dir, cli.verbose)
                .await
        }
        Commands::Check { ref line } => {
            scanban::commands::check::run(line.as_deref(), &cli.config, &cli.config_dir).await
        }
        Commands::Pending => scanban::commands::pending::run(&cli.config, &cli.config_dir).await,
        Commands::Version => {
            println!("scanban {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
