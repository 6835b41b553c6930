//! Application-wide error types.

use std::path::PathBuf;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that reach the process boundary.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Session(#[from] hls_capture::SessionError),

    #[error(transparent)]
    Fetch(#[from] hls_capture::FetchError),

    #[error("Playlist source error: {0}")]
    Source(#[from] PlaylistError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("Download incomplete: {0}")]
    Incomplete(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            _ => 1,
        }
    }
}

/// Invalid or unreadable configuration. Always fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("Invalid value for {name}: '{value}' ({reason})")]
    InvalidEnv {
        name: String,
        value: String,
        reason: String,
    },

    #[error("No channels configured; set CHANNELS or pass --channel")]
    NoChannels,

    #[error("Channel names must not be empty")]
    EmptyChannel,

    #[error("Channel '{0}' is configured more than once")]
    DuplicateChannel(String),

    #[error("Quality labels must not be empty")]
    EmptyQuality,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("Invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Failure reported by a [`crate::source::PlaylistSource`].
///
/// Transient errors make the monitor back off and retry; permanent ones end the
/// monitor run and hand it to the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct PlaylistError {
    pub message: String,
    pub transient: bool,
}

impl PlaylistError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Channel '{0}' is already scheduled")]
    DuplicateChannel(String),

    #[error("Channel '{0}' is not scheduled")]
    UnknownChannel(String),

    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("IO error while {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode archive history: {0}")]
    Encode(#[from] serde_json::Error),
}
