//! Where live status and playlists come from.

mod kick;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hls_capture::PlaylistHandle;

pub use crate::error::PlaylistError;
pub use kick::{ChannelLive, KICK_API_BASE, KickSource, parse_channel_payload};

/// A watched channel and the qualities it should be archived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Site-unique channel slug.
    pub name: String,
    /// Ordered quality preference.
    pub quality: Vec<String>,
}

impl Channel {
    pub fn new(name: impl Into<String>, quality: Vec<String>) -> Self {
        Self {
            name: name.into(),
            quality,
        }
    }
}

/// One live broadcast as reported by the source.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveStream {
    /// Identifier of this broadcast, when the source provides one.
    pub identity: Option<String>,
    /// When the broadcast started, when known.
    pub started_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub playlist: PlaylistHandle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiveStatus {
    Offline,
    Live(LiveStream),
}

/// Reports whether a channel is live and, if so, where its playlist is.
#[async_trait]
pub trait PlaylistSource: Send + Sync + 'static {
    async fn check_live(&self, channel: &Channel) -> Result<LiveStatus, PlaylistError>;
}
