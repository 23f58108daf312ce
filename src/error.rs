//! Error types for the collector.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Result type alias for collector operations.
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Coarse classification of a [`CollectorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The change-notification subscription or watch target could not be set up.
    FatalAtInit,
    /// A wait was interrupted and may simply be retried.
    Transient,
    /// Reading or decoding notification records failed.
    ReadFailure,
    /// An external collection tool failed for one trigger.
    ToolFailure,
    /// Reading the control input failed.
    ConsoleFailure,
    /// Invalid configuration.
    Configuration,
    /// Any other I/O error.
    Io,
    /// A worker thread died unexpectedly.
    Internal,
}

/// Errors that can occur while watching and collecting.
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Notification subscription could not be opened.
    #[error("cannot open change-notification subscription: {source}")]
    SubscriptionUnavailable {
        #[source]
        source: std::io::Error,
    },

    /// The input directory could not be registered for watching.
    #[error("cannot watch {}: {source}", path.display())]
    WatchTargetUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The wait for notification readiness was interrupted.
    #[error("wait for change notifications interrupted")]
    Interrupted,

    /// Reading notification records failed.
    #[error("error while reading change notifications: {source}")]
    EventRead {
        #[source]
        source: std::io::Error,
    },

    /// The notification record stream was malformed.
    #[error("malformed notification record at byte {offset}: {reason}")]
    Decode { offset: usize, reason: &'static str },

    /// An external tool could not be started.
    #[error("failed to run {tool}: {source}")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// An external tool exited unsuccessfully.
    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },

    /// Reading the control input failed.
    #[error("error while reading control input: {source}")]
    Console {
        #[source]
        source: std::io::Error,
    },

    /// Name pattern failed to compile.
    #[error("invalid name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("cannot parse configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    /// Notify backend error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// A worker thread panicked.
    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollectorError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SubscriptionUnavailable { .. } | Self::WatchTargetUnavailable { .. } => {
                ErrorKind::FatalAtInit
            }
            Self::Interrupted => ErrorKind::Transient,
            Self::EventRead { .. } | Self::Decode { .. } | Self::Notify(_) => ErrorKind::ReadFailure,
            Self::ToolSpawn { .. } | Self::ToolFailed { .. } => ErrorKind::ToolFailure,
            Self::Console { .. } => ErrorKind::ConsoleFailure,
            Self::InvalidPattern(_) | Self::Config(_) | Self::Toml(_) => ErrorKind::Configuration,
            Self::Io(_) => ErrorKind::Io,
            Self::WorkerPanicked(_) => ErrorKind::Internal,
        }
    }

    /// Whether the pipeline can carry on after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::ToolFailure)
    }
}
