//! Error types for the watch-retry-delete engine.
//!
//! Item-set failures are [`SourceError`]s and reach the orchestrator's
//! caller. Recoverable delete failures never appear here; they stay inside
//! the retry scheduler.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of an observable item set: it could not start, or it was lost
/// while running, or it was used against its contract.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The glob pattern for a directory watch did not compile.
    #[error("invalid file pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// The OS watch could not be installed.
    #[error("failed to watch directory {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The initial directory listing failed.
    #[error("failed to scan directory {}: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The watched directory disappeared or the watcher stopped reporting.
    #[error("lost watch on directory {}: {reason}", path.display())]
    Lost { path: PathBuf, reason: String },

    /// Some members of a union failed to start. The others were started.
    #[error("{} of {total} sources failed to start: {}", errors.len(), summarize(errors))]
    Partial {
        total: usize,
        errors: Vec<SourceError>,
    },

    /// The configuration names no directory to watch.
    #[error("no directories to watch")]
    NoDirectories,

    /// `subscribe` was called while another subscriber is attached.
    #[error("item set already has a subscriber")]
    AlreadySubscribed,

    /// `start` was called twice.
    #[error("item set already started")]
    AlreadyStarted,

    /// The item set was used after `dispose`.
    #[error("item set has been disposed")]
    Disposed,
}

fn summarize(errors: &[SourceError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl SourceError {
    /// Contract violations are programming errors, not environmental failures.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            SourceError::AlreadySubscribed | SourceError::AlreadyStarted | SourceError::Disposed
        )
    }
}

/// Invalid configuration values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("backoff minimum must be greater than zero")]
    ZeroMinimum,

    #[error("backoff minimum {min:?} exceeds maximum {max:?}")]
    MinimumAboveMaximum {
        min: std::time::Duration,
        max: std::time::Duration,
    },

    #[error("backoff factor must be at least 2, got {0}")]
    FactorTooSmall(u32),

    #[error("invalid value `{value}` for setting {key}")]
    InvalidSetting { key: String, value: String },
}

/// Errors that end an orchestrator run.
#[derive(Debug, Error)]
pub enum TidyError {
    /// The item set failed to start or was lost mid-run.
    #[error("item source failed: {0}")]
    Source(#[from] SourceError),

    /// `run` was called while a previous run had not finished tearing down.
    #[error("orchestrator is already running")]
    AlreadyRunning,

    /// A job's work function panicked. Not retried.
    #[error("delete job panicked: {0}")]
    JobPanicked(String),
}
