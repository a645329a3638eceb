//! # scanban - scan logs and ban offending IPs
//!
//! scanban tails log files, container logs or standard input, matches each
//! line against an ordered list of rules, and runs shell commands (usually
//! firewall updates) against the IP found in offending lines. Every ban can
//! carry an unban command that runs once the ban time has passed, even
//! across restarts.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        scanban                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: run, scan, check, pending, version         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Config (serde_yaml)                                        │
//! │    └── Main file + drop-in directory, rule inheritance      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scanner (tokio)                                            │
//! │    ├── FileTailer (rotation aware)                          │
//! │    ├── ContainerTailer (docker logs -f)                     │
//! │    └── StreamReader (stdin, one-shot file)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pipeline (Stage trait)                                     │
//! │    └── Dedup → Rules → Whitelist → Threshold → Actions      │
//! │        → Unban scheduling → observers (logs, metrics)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  UnbanList (persisted, reaped by a background loop)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use scanban::cmd_abstraction::{CommandExecutor, ShellExecutor};
//! use scanban::config::Config;
//! use scanban::pipeline::Pipeline;
//! use scanban::scan::{ScanOptions, Scanner};
//! use scanban::signal::ShutdownToken;
//! use scanban::unban::UnbanList;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("/etc/scanban/config.yaml")?;
//!     let executor: Arc<dyn CommandExecutor> = Arc::new(ShellExecutor::new());
//!     let unban_list = Arc::new(UnbanList::load(&config.unban_list, executor.clone())?);
//!
//!     let shutdown = ShutdownToken::new();
//!     let records = Scanner::new(config.sources(), ScanOptions::default()).scan(shutdown.clone());
//!
//!     let mut pipeline = Pipeline::standard(
//!         config.compile()?,
//!         config.whitelist(),
//!         config.action_map(),
//!         executor,
//!         unban_list,
//!     )
//!     .with_default_observers(false);
//!     pipeline.run(records, shutdown).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`actions`] - Action templates and the dispatcher stage
//! - [`cli`] - Command-line interface definitions
//! - [`cmd_abstraction`] - Shell command execution behind a mockable trait
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration parsing, merging and validation
//! - [`dedup`] - Recent-line duplicate filter
//! - [`lock`] - File locking for concurrent execution prevention
//! - [`observers`] - Action/rejection logs and metrics
//! - [`pipeline`] - Stage trait and the record processing loop
//! - [`record`] - The per-line record and rejection reasons
//! - [`rules`] - Rule matching and IP extraction
//! - [`scan`] - Log sources and fan-in
//! - [`signal`] - Graceful shutdown signal handling
//! - [`threshold`] - Per rule and IP hit counting
//! - [`unban`] - Persistent unban list and reversal loop
//! - [`utils`] - Common formatting helpers
//! - [`validation`] - Interval and whitelist entry validation
//! - [`whitelist`] - Never-ban IPs and networks

pub mod actions;
pub mod cli;
pub mod cmd_abstraction;
pub mod commands;
pub mod config;
pub mod dedup;
pub mod error;
pub mod lock;
pub mod observers;
pub mod pipeline;
pub mod record;
pub mod rules;
pub mod scan;
pub mod signal;
pub mod threshold;
pub mod unban;
pub mod utils;
pub mod validation;
pub mod whitelist;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use error::ScanbanError;
pub use pipeline::{Pipeline, Stage};
pub use record::{Record, Rejection};
