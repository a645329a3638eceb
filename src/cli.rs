//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{DEFAULT_CONFIG_PATH, DEFAULT_DROPIN_DIR};

#[derive(Parser)]
#[command(name = "scanban")]
#[command(author, version, about = "Scan logs and ban offending IPs")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Drop-in directory merged on top of the config file
    #[arg(long, default_value = DEFAULT_DROPIN_DIR, global = true)]
    pub config_dir: PathBuf,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output, logs every rejected line)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Tail the configured sources and ban offending IPs
    Run {
        /// Resolve and log commands without running them
        #[arg(long)]
        dry_run: bool,

        /// Scan existing file contents too, not only new lines
        #[arg(long)]
        all: bool,
    },

    /// Analyse one file (or `-` for stdin) once and print a summary
    Scan {
        /// File to scan, `-` for stdin
        file: String,

        /// Resolve and log commands without running them
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the configuration and show the compiled rules
    Check {
        /// Show how this line would be handled
        #[arg(long)]
        line: Option<String>,
    },

    /// List pending unbans
    Pending,

    /// Show version
    Version,
}
