use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use hls_capture::http::build_client;
use hls_capture::playlist::{ParsedPlaylist, derive_variant_url, parse_playlist};
use hls_capture::{HttpConfig, PlaylistHandle, Variant};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{Channel, LiveStatus, LiveStream, PlaylistError, PlaylistSource};

pub const KICK_API_BASE: &str = "https://kick.com/api/v2/channels/";
const KICK_ORIGIN: &str = "https://kick.com";

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    #[serde(default)]
    livestream: Option<Livestream>,
    #[serde(default)]
    playback_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Livestream {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    is_live: Option<bool>,
    #[serde(default)]
    session_title: Option<String>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    playback_url: Option<String>,
}

/// What the channel endpoint says, before the master playlist is looked at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLive {
    pub identity: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub playback_url: Url,
}

/// Interpret a channel API payload. `Ok(None)` means offline.
pub fn parse_channel_payload(body: &[u8]) -> Result<Option<ChannelLive>, PlaylistError> {
    let response: ChannelResponse = serde_json::from_slice(body)
        .map_err(|e| PlaylistError::transient(format!("unexpected channel payload: {e}")))?;

    let Some(live) = response.livestream else {
        return Ok(None);
    };
    if live.is_live == Some(false) {
        return Ok(None);
    }

    let playback = response
        .playback_url
        .or(live.playback_url)
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| PlaylistError::transient("channel is live but has no playback URL"))?;
    let playback_url = Url::parse(playback.trim())
        .map_err(|e| PlaylistError::transient(format!("invalid playback URL {playback}: {e}")))?;

    let identity = live.id.and_then(|id| match id {
        serde_json::Value::String(s) if !s.is_empty() => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let started_at = live
        .start_time
        .as_deref()
        .and_then(parse_kick_time)
        .or_else(|| live.created_at.as_deref().and_then(parse_kick_time));

    Ok(Some(ChannelLive {
        identity,
        started_at,
        title: live.session_title.filter(|t| !t.trim().is_empty()),
        playback_url,
    }))
}

/// Kick reports times either as RFC 3339 or as a bare `YYYY-MM-DD HH:MM:SS` in UTC.
fn parse_kick_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|t| t.and_utc())
        })
}

fn classify_status(status: StatusCode, channel: &str) -> PlaylistError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            PlaylistError::permanent(format!("channel '{channel}' does not exist (HTTP {status})"))
        }
        _ => PlaylistError::transient(format!("channel API answered HTTP {status}")),
    }
}

/// [`PlaylistSource`] backed by Kick's public channel API.
#[derive(Debug, Clone)]
pub struct KickSource {
    client: Client,
    api_base: Url,
    /// Limit for master playlist requests.
    playlist_timeout: Duration,
}

impl KickSource {
    pub fn new(http: &HttpConfig) -> Result<Self, PlaylistError> {
        let mut http = http.clone();
        for (name, value) in [
            ("Accept", "application/json, text/plain, */*"),
            ("Accept-Language", "en-US,en;q=0.9"),
            ("Origin", KICK_ORIGIN),
            ("Referer", "https://kick.com/"),
        ] {
            http.headers
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
        let client =
            build_client(&http).map_err(|e| PlaylistError::permanent(e.to_string()))?;
        let api_base = Url::parse(KICK_API_BASE)
            .map_err(|e| PlaylistError::permanent(e.to_string()))?;
        Ok(Self {
            client,
            api_base,
            playlist_timeout: http.playlist_timeout,
        })
    }

    pub fn with_api_base(mut self, api_base: Url) -> Self {
        self.api_base = api_base;
        self
    }

    fn channel_url(&self, channel: &str) -> Result<Url, PlaylistError> {
        self.api_base
            .join(channel.trim().trim_matches('/'))
            .map_err(|e| PlaylistError::permanent(format!("invalid channel name '{channel}': {e}")))
    }

    /// Fetch the master playlist and list its variants. When the master cannot be
    /// read, fall back to the IVS path convention for the preferred qualities.
    pub async fn variants(&self, master: &Url, quality: &[String]) -> Vec<Variant> {
        match self.fetch_master(master).await {
            Ok(variants) if !variants.is_empty() => return variants,
            Ok(_) => debug!(url = %master, "Playback URL is not a master playlist"),
            Err(e) => warn!(url = %master, error = %e, "Failed to read master playlist"),
        }

        quality
            .iter()
            .filter_map(|q| {
                derive_variant_url(master, q).map(|url| Variant {
                    label: q.clone(),
                    url,
                    bandwidth: None,
                })
            })
            .collect()
    }

    async fn fetch_master(&self, master: &Url) -> Result<Vec<Variant>, String> {
        let response = self
            .client
            .get(master.clone())
            .timeout(self.playlist_timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        match parse_playlist(master, &body).map_err(|e| e.to_string())? {
            ParsedPlaylist::Master(variants) => Ok(variants),
            ParsedPlaylist::Media(_) => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl PlaylistSource for KickSource {
    #[instrument(skip(self, channel), fields(channel = %channel.name))]
    async fn check_live(&self, channel: &Channel) -> Result<LiveStatus, PlaylistError> {
        let url = self.channel_url(&channel.name)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PlaylistError::transient(format!("channel API request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &channel.name));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| PlaylistError::transient(format!("channel API body: {e}")))?;

        let Some(live) = parse_channel_payload(&body)? else {
            debug!("Channel is offline");
            return Ok(LiveStatus::Offline);
        };

        let variants = self.variants(&live.playback_url, &channel.quality).await;
        debug!(
            identity = live.identity.as_deref().unwrap_or("-"),
            variants = variants.len(),
            "Channel is live"
        );
        Ok(LiveStatus::Live(LiveStream {
            identity: live.identity,
            started_at: live.started_at,
            title: live.title,
            playlist: PlaylistHandle::new(live.playback_url).with_variants(variants),
        }))
    }
}
