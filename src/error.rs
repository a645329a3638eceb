//! Error types for scanban.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanbanError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid pattern in rule {rule}: {source}")]
    Pattern {
        rule: usize,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid interval: {0}")]
    Interval(String),

    #[error("Unban store error ({}): {reason}", .path.display())]
    Store { path: PathBuf, reason: String },
}
