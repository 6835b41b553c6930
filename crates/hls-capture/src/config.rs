//! Tunables for the HTTP client, download sessions and transcoding handoff.

use std::collections::HashMap;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::transcode::AudioFormat;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// HTTP client settings shared by playlist and segment requests.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    /// Timeout for a single segment request.
    pub request_timeout: Duration,
    /// Timeout for a playlist request.
    pub playlist_timeout: Duration,
    pub connect_timeout: Duration,
    /// Extra headers sent with every request (Origin, Referer...).
    pub headers: HashMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(10),
            playlist_timeout: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
            headers: HashMap::new(),
        }
    }
}

/// What happens to a media file once a session completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeConfig {
    pub enabled: bool,
    pub format: AudioFormat,
    /// Remove the media file and its journal after a successful conversion.
    pub delete_original: bool,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: AudioFormat::Mp3,
            delete_original: false,
        }
    }
}

/// Per-session download behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Ordered quality preference used when negotiating a variant.
    pub quality: Vec<String>,
    /// Upper bound on in-flight segment requests per session.
    pub max_concurrent_fetches: usize,
    /// A live session whose playlist does not advance for this long is stalled.
    pub stall_timeout: Duration,
    /// How long a live session waits for a missing segment while later ones are
    /// already buffered before skipping it. Shorter than the fetcher's
    /// [`RetryPolicy::worst_case`] means a segment can be skipped while its retries are
    /// still running.
    pub segment_wait_timeout: Duration,
    pub retry: RetryPolicy,
    pub transcode: TranscodeConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            quality: vec!["480p30".to_string()],
            max_concurrent_fetches: 4,
            stall_timeout: Duration::from_secs(120),
            segment_wait_timeout: Duration::from_secs(90),
            retry: RetryPolicy::default(),
            transcode: TranscodeConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_quality(mut self, quality: Vec<String>) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max.max(1);
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_segment_wait_timeout(mut self, timeout: Duration) -> Self {
        self.segment_wait_timeout = timeout;
        self
    }

    pub fn with_transcode(mut self, transcode: TranscodeConfig) -> Self {
        self.transcode = transcode;
        self
    }
}
