//! Events emitted by live monitors.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use hls_capture::SessionReport;
use serde::Serialize;
use tokio::sync::broadcast;

use super::MonitorState;

/// Capacity of the monitor event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    StateChanged {
        channel: String,
        old_state: MonitorState,
        new_state: MonitorState,
        timestamp: DateTime<Utc>,
    },
    /// A download session was created for a live broadcast.
    SessionStarted {
        channel: String,
        identity: String,
        media_path: PathBuf,
        timestamp: DateTime<Utc>,
    },
    /// A detected broadcast was not archived.
    SessionSkipped {
        channel: String,
        identity: String,
        reason: SkipReason,
        timestamp: DateTime<Utc>,
    },
    /// A session reached a terminal state.
    SessionFinished {
        channel: String,
        identity: String,
        report: Box<SessionReport>,
        timestamp: DateTime<Utc>,
    },
    /// The playlist source failed transiently; the monitor is backing off.
    SourceError {
        channel: String,
        message: String,
        consecutive_errors: u32,
        timestamp: DateTime<Utc>,
    },
}

impl MonitorEvent {
    pub fn channel(&self) -> &str {
        match self {
            Self::StateChanged { channel, .. }
            | Self::SessionStarted { channel, .. }
            | Self::SessionSkipped { channel, .. }
            | Self::SessionFinished { channel, .. }
            | Self::SourceError { channel, .. } => channel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Recorded in the archive history.
    AlreadyArchived,
    /// The final audio file exists.
    AudioExists,
    /// Another session holds the output path.
    OutputBusy,
}

pub fn event_channel() -> (broadcast::Sender<MonitorEvent>, broadcast::Receiver<MonitorEvent>) {
    broadcast::channel(EVENT_CHANNEL_CAPACITY)
}
