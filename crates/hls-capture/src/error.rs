//! Error types for segment fetching, sessions and transcoding.

use std::path::PathBuf;

use thiserror::Error;

use crate::session::SessionStatus;

/// Failure while resolving a playlist or fetching a segment.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// A single attempt failed; the retry loop may try again.
    #[error("Transient fetch failure: {reason}")]
    Transient { reason: String },

    /// All attempts failed, or the failure was not retryable.
    #[error("Fetch failed after {attempts} attempt(s): {reason}")]
    Exhausted { attempts: u32, reason: String },

    #[error("Playlist error: {0}")]
    Playlist(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    pub fn exhausted(attempts: u32, reason: impl Into<String>) -> Self {
        Self::Exhausted {
            attempts,
            reason: reason.into(),
        }
    }

    pub fn playlist(reason: impl Into<String>) -> Self {
        Self::Playlist(reason.into())
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Errors raised by [`crate::DownloadSession`].
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Output {} is already being written by another session", .0.display())]
    OutputBusy(PathBuf),

    #[error("Segment {index} could not be fetched: {source}")]
    SegmentLost {
        index: u64,
        #[source]
        source: FetchError,
    },

    #[error(transparent)]
    Fetch(FetchError),

    #[error("Journal {} is corrupt: {reason}", path.display())]
    Journal { path: PathBuf, reason: String },

    #[error("IO error while {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Session cancelled")]
    Cancelled,
}

impl From<FetchError> for SessionError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Cancelled => Self::Cancelled,
            other => Self::Fetch(other),
        }
    }
}

impl SessionError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Conversion of a finished media file failed.
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Input file {} does not exist", .0.display())]
    MissingInput(PathBuf),

    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcoder exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Failed to move {} into place: {source}", .path.display())]
    Rename {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
