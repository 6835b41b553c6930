//! Per-channel live monitoring.
//!
//! A [`LiveMonitor`] polls its channel's [`PlaylistSource`], starts a download session
//! when the channel goes live, keeps the session's playlist fresh and tells it to
//! finish once the channel goes offline.
//!
//! ```text
//! idle ──poll──▶ checking ──offline / error──▶ idle
//!                    │
//!                    └──live──▶ live ──poll──▶ checking ...
//! ```

mod events;
mod service;
mod session_task;
mod tasks;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hls_capture::{OutputRegistry, SegmentFetcher, SessionConfig, Transcoder};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::history::ArchiveHistory;
use crate::source::PlaylistSource;

pub use events::{EVENT_CHANNEL_CAPACITY, MonitorEvent, SkipReason, event_channel};
pub use service::LiveMonitor;
pub(crate) use session_task::SessionRunner;
pub use tasks::SessionTasks;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MonitorState {
    Idle,
    Checking,
    Live { identity: String },
}

impl MonitorState {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Checking => f.write_str("checking"),
            Self::Live { identity } => write!(f, "live({identity})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between live checks.
    pub poll_interval: Duration,
    /// Interval between playlist refreshes of an active session.
    pub refresh_interval: Duration,
    /// Ceiling of the backoff applied after transient source errors.
    pub source_backoff_max: Duration,
    /// On shutdown, finish and transcode active sessions instead of aborting them.
    /// Either way the media file and journal are kept for the next run to resume.
    pub finalize_on_shutdown: bool,
    pub output_dir: PathBuf,
    /// Base session settings; the quality preference comes from the channel.
    pub session: SessionConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            refresh_interval: Duration::from_secs(10),
            source_backoff_max: Duration::from_secs(600),
            finalize_on_shutdown: true,
            output_dir: PathBuf::from(crate::config::DEFAULT_OUTPUT_DIR),
            session: SessionConfig::default(),
        }
    }
}

/// Collaborators shared by every monitor.
#[derive(Clone)]
pub struct MonitorContext {
    pub source: Arc<dyn PlaylistSource>,
    pub fetcher: Arc<dyn SegmentFetcher>,
    pub transcoder: Option<Arc<dyn Transcoder>>,
    pub registry: OutputRegistry,
    pub history: Arc<ArchiveHistory>,
    pub events: broadcast::Sender<MonitorEvent>,
}

impl MonitorContext {
    pub fn new(
        source: Arc<dyn PlaylistSource>,
        fetcher: Arc<dyn SegmentFetcher>,
        history: Arc<ArchiveHistory>,
    ) -> Self {
        let (events, _) = event_channel();
        Self {
            source,
            fetcher,
            transcoder: None,
            registry: OutputRegistry::new(),
            history,
            events,
        }
    }

    pub fn with_transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: MonitorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
