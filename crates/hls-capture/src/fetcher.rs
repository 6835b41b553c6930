//! Segment fetching: playlist resolution plus per-segment download with retry.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::RANGE;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use crate::config::HttpConfig;
use crate::error::FetchError;
use crate::http::build_client;
use crate::playlist::{ParsedPlaylist, PlaylistHandle, ResolvedPlaylist, SegmentRef, parse_playlist};
use crate::retry::{
    RetryAction, RetryPolicy, is_retryable_reqwest_error, is_retryable_status, retry_with_backoff,
};

/// Resolves playlists into ordered segment lists and downloads single segments.
///
/// Implementations retry internally and report a segment that cannot be obtained
/// as [`FetchError::Exhausted`]; the session decides whether that is fatal.
#[async_trait]
pub trait SegmentFetcher: Send + Sync + 'static {
    async fn resolve(
        &self,
        playlist: &PlaylistHandle,
        token: &CancellationToken,
    ) -> Result<ResolvedPlaylist, FetchError>;

    async fn fetch(
        &self,
        segment: &SegmentRef,
        token: &CancellationToken,
    ) -> Result<Bytes, FetchError>;
}

/// [`SegmentFetcher`] over plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpSegmentFetcher {
    client: Client,
    retry: RetryPolicy,
    playlist_timeout: Duration,
}

impl HttpSegmentFetcher {
    pub fn new(client: Client, retry: RetryPolicy, playlist_timeout: Duration) -> Self {
        Self {
            client,
            retry,
            playlist_timeout,
        }
    }

    pub fn from_config(http: &HttpConfig, retry: RetryPolicy) -> Result<Self, FetchError> {
        Ok(Self::new(build_client(http)?, retry, http.playlist_timeout))
    }

    async fn get(
        &self,
        url: &Url,
        range: Option<(u64, u64)>,
        timeout: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        let client = &self.client;
        retry_with_backoff(&self.retry, token, move |_attempt| async move {
            let mut request = client.get(url.clone());
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }
            if let Some((offset, length)) = range.filter(|(_, len)| *len > 0) {
                request = request.header(RANGE, format!("bytes={}-{}", offset, offset + length - 1));
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if is_retryable_reqwest_error(&e) => return RetryAction::Retry(e.to_string()),
                Err(e) => return RetryAction::Fail(e.to_string()),
            };

            let status = response.status();
            if !status.is_success() {
                let reason = format!("HTTP {status} for {url}");
                return if is_retryable_status(status) {
                    RetryAction::Retry(reason)
                } else {
                    RetryAction::Fail(reason)
                };
            }

            match response.bytes().await {
                Ok(body) => RetryAction::Success(body),
                Err(e) => RetryAction::Retry(e.to_string()),
            }
        })
        .await
    }

    async fn get_playlist(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<ParsedPlaylist, FetchError> {
        let body = self
            .get(url, None, Some(self.playlist_timeout), token)
            .await?;
        parse_playlist(url, &body)
    }
}

#[async_trait]
impl SegmentFetcher for HttpSegmentFetcher {
    #[instrument(skip(self, playlist, token), fields(url = %playlist.url()))]
    async fn resolve(
        &self,
        playlist: &PlaylistHandle,
        token: &CancellationToken,
    ) -> Result<ResolvedPlaylist, FetchError> {
        match self.get_playlist(playlist.url(), token).await? {
            ParsedPlaylist::Media(resolved) => Ok(resolved),
            ParsedPlaylist::Master(variants) => {
                // Handed a master playlist: follow its best rendition.
                let chosen = PlaylistHandle::new(playlist.url().clone())
                    .with_variants(variants)
                    .select_quality(&[]);
                debug!(
                    variant = chosen.selected_label().unwrap_or_default(),
                    "Following master playlist variant"
                );
                match self.get_playlist(chosen.url(), token).await? {
                    ParsedPlaylist::Media(resolved) => Ok(resolved),
                    ParsedPlaylist::Master(_) => Err(FetchError::playlist(format!(
                        "variant {} is another master playlist",
                        chosen.url()
                    ))),
                }
            }
        }
    }

    #[instrument(skip(self, segment, token), fields(index = segment.index))]
    async fn fetch(
        &self,
        segment: &SegmentRef,
        token: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        let range = segment.byte_offset.zip(segment.length_hint);
        let body = self.get(&segment.url, range, None, token).await?;
        debug!(size = body.len(), "Downloaded segment");
        Ok(body)
    }
}
