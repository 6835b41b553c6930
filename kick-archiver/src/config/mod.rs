//! Application configuration.
//!
//! One [`AppConfig`] is built at startup: defaults, then an optional TOML file, then
//! environment variables, then command line flags. It is validated once and turned
//! into the plain structs the engine components take; nothing below this module reads
//! the environment.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hls_capture::config::DEFAULT_USER_AGENT;
use hls_capture::{AudioFormat, FfmpegTranscoder, HttpConfig, RetryPolicy, SessionConfig, TranscodeConfig};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::monitor::MonitorConfig;
use crate::scheduler::{RestartTrackerConfig, SchedulerConfig};
use crate::source::Channel;

pub const DEFAULT_QUALITY: &str = "480p30";
pub const DEFAULT_OUTPUT_DIR: &str = "./kick_vod_downloads";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub channels: Vec<String>,
    /// Ordered quality preference applied to every channel.
    pub quality: Vec<String>,
    pub output_dir: PathBuf,
    pub monitor: MonitorSettings,
    pub session: SessionSettings,
    pub retry: RetrySettings,
    pub http: HttpSettings,
    pub transcode: TranscodeSettings,
    pub restart: RestartSettings,
    pub log: LogSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            quality: vec![DEFAULT_QUALITY.to_string()],
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            monitor: MonitorSettings::default(),
            session: SessionSettings::default(),
            retry: RetrySettings::default(),
            http: HttpSettings::default(),
            transcode: TranscodeSettings::default(),
            restart: RestartSettings::default(),
            log: LogSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Seconds between live checks.
    pub poll_interval_secs: u64,
    /// Seconds between playlist refreshes of an active session.
    pub refresh_interval_secs: u64,
    /// Upper bound of the backoff after transient source errors.
    pub source_backoff_max_secs: u64,
    /// Finish (and transcode) active sessions on shutdown instead of aborting them.
    pub finalize_on_shutdown: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            refresh_interval_secs: 10,
            source_backoff_max_secs: 600,
            finalize_on_shutdown: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub max_concurrent_fetches: usize,
    pub stall_timeout_secs: u64,
    pub segment_wait_timeout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 4,
            stall_timeout_secs: 120,
            segment_wait_timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            jitter: policy.jitter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub playlist_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 10,
            playlist_timeout_secs: 20,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeSettings {
    pub enabled: bool,
    pub format: AudioFormat,
    pub ffmpeg_path: PathBuf,
    pub bitrate: String,
    pub sample_rate: u32,
    pub delete_original: bool,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            format: AudioFormat::Mp3,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            bitrate: "128k".to_string(),
            sample_rate: 48_000,
            delete_original: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartSettings {
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub failure_window_secs: u64,
    /// Restarts inside the failure window that happen without delay.
    pub failure_threshold: usize,
    pub shutdown_timeout_secs: u64,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            base_backoff_secs: 1,
            max_backoff_secs: 300,
            failure_window_secs: 60,
            failure_threshold: 3,
            shutdown_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: Option<String>,
    /// Directory for daily rolling log files; console only when unset.
    pub dir: Option<PathBuf>,
    pub verbose: bool,
    pub debug_http: bool,
}

/// What the process is about to do; daemon mode needs channels, one-shot mode does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Watch,
    Fetch,
}

impl AppConfig {
    /// Defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Apply the environment variable overrides, reading values through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(raw) = get("CHANNELS") {
            self.channels = split_list(&raw);
        }
        if let Some(raw) = get("QUALITY") {
            self.quality = split_list(&raw);
        }
        if let Some(raw) = get("LIVE_CHECK_SECONDS") {
            self.monitor.poll_interval_secs = parse_env("LIVE_CHECK_SECONDS", &raw)?;
        }
        if let Some(raw) = get("REFRESH_SECONDS") {
            self.monitor.refresh_interval_secs = parse_env("REFRESH_SECONDS", &raw)?;
        }
        if let Some(raw) = get("DOWNLOAD_DIR") {
            self.output_dir = PathBuf::from(raw.trim());
        }
        if let Some(raw) = get("CONVERT_TO_MP3") {
            self.transcode.enabled = parse_bool("CONVERT_TO_MP3", &raw)?;
        }
        if let Some(raw) = get("DELETE_ORIGINAL_AFTER_CONVERT") {
            self.transcode.delete_original = parse_bool("DELETE_ORIGINAL_AFTER_CONVERT", &raw)?;
        }
        if let Some(raw) = get("FFMPEG_PATH") {
            self.transcode.ffmpeg_path = PathBuf::from(raw.trim());
        }
        if let Some(raw) = get("DEBUG_HTTP") {
            self.log.debug_http = parse_bool("DEBUG_HTTP", &raw)?;
        }
        if let Some(raw) = get("DEBUG_VERBOSE") {
            self.log.verbose = parse_bool("DEBUG_VERBOSE", &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self, mode: RunMode) -> Result<(), ConfigError> {
        if mode == RunMode::Watch && self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        let mut seen = HashSet::new();
        for channel in &self.channels {
            let name = channel.trim();
            if name.is_empty() {
                return Err(ConfigError::EmptyChannel);
            }
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateChannel(name.to_string()));
            }
        }
        if self.quality.is_empty() || self.quality.iter().any(|q| q.trim().is_empty()) {
            return Err(ConfigError::EmptyQuality);
        }

        let non_zero = [
            ("poll interval", self.monitor.poll_interval_secs),
            ("refresh interval", self.monitor.refresh_interval_secs),
            ("stall timeout", self.session.stall_timeout_secs),
            ("segment wait timeout", self.session.segment_wait_timeout_secs),
            ("request timeout", self.http.request_timeout_secs),
            ("playlist timeout", self.http.playlist_timeout_secs),
            ("max concurrent fetches", self.session.max_concurrent_fetches as u64),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero(*name));
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::Invalid {
                name: "retry.max_delay_ms",
                reason: "must not be smaller than retry.base_delay_ms".to_string(),
            });
        }
        let retry_budget = self
            .retry_policy()
            .worst_case(Duration::from_secs(self.http.request_timeout_secs));
        if Duration::from_secs(self.session.segment_wait_timeout_secs) < retry_budget {
            return Err(ConfigError::Invalid {
                name: "session.segment_wait_timeout_secs",
                reason: format!(
                    "must be at least {}s, the longest a segment can spend in retries \
                     (http.request_timeout_secs and retry.*); otherwise segments still \
                     being retried are skipped as gaps",
                    retry_budget.as_secs_f64().ceil()
                ),
            });
        }
        if self.transcode.enabled && self.transcode.bitrate.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: "transcode.bitrate",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.channels
            .iter()
            .map(|name| Channel::new(name.trim(), self.quality.clone()))
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter: self.retry.jitter,
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            user_agent: self.http.user_agent.clone(),
            request_timeout: Duration::from_secs(self.http.request_timeout_secs),
            playlist_timeout: Duration::from_secs(self.http.playlist_timeout_secs),
            connect_timeout: Duration::from_secs(self.http.connect_timeout_secs),
            ..HttpConfig::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            quality: self.quality.clone(),
            max_concurrent_fetches: self.session.max_concurrent_fetches,
            stall_timeout: Duration::from_secs(self.session.stall_timeout_secs),
            segment_wait_timeout: Duration::from_secs(self.session.segment_wait_timeout_secs),
            retry: self.retry_policy(),
            transcode: TranscodeConfig {
                enabled: self.transcode.enabled,
                format: self.transcode.format,
                delete_original: self.transcode.delete_original,
            },
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_secs(self.monitor.poll_interval_secs),
            refresh_interval: Duration::from_secs(self.monitor.refresh_interval_secs),
            source_backoff_max: Duration::from_secs(self.monitor.source_backoff_max_secs),
            finalize_on_shutdown: self.monitor.finalize_on_shutdown,
            output_dir: self.output_dir.clone(),
            session: self.session_config(),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            restart: RestartTrackerConfig {
                base_backoff: Duration::from_secs(self.restart.base_backoff_secs),
                max_backoff: Duration::from_secs(self.restart.max_backoff_secs),
                failure_window: Duration::from_secs(self.restart.failure_window_secs),
                failure_threshold: self.restart.failure_threshold,
            },
            shutdown_timeout: Duration::from_secs(self.restart.shutdown_timeout_secs),
        }
    }

    /// The ffmpeg transcoder, or `None` when conversion is disabled.
    pub fn transcoder(&self) -> Option<FfmpegTranscoder> {
        self.transcode.enabled.then(|| {
            FfmpegTranscoder::new(&self.transcode.ffmpeg_path)
                .with_bitrate(self.transcode.bitrate.clone())
                .with_sample_rate(self.transcode.sample_rate)
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env(name: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.quality, vec!["480p30"]);
        assert_eq!(config.output_dir, PathBuf::from("./kick_vod_downloads"));
        assert_eq!(config.monitor.poll_interval_secs, 60);
        assert_eq!(config.monitor.refresh_interval_secs, 10);
        assert!(config.transcode.enabled);
        assert!(!config.transcode.delete_original);
    }

    #[test]
    fn toml_overrides_only_given_fields() {
        let config = AppConfig::from_toml(
            r#"
            channels = ["xqc", "trainwreckstv"]
            output_dir = "/data/kick"

            [monitor]
            poll_interval_secs = 30

            [transcode]
            format = "opus"
            "#,
        )
        .unwrap();

        assert_eq!(config.channels, vec!["xqc", "trainwreckstv"]);
        assert_eq!(config.output_dir, PathBuf::from("/data/kick"));
        assert_eq!(config.monitor.poll_interval_secs, 30);
        assert_eq!(config.monitor.refresh_interval_secs, 10);
        assert_eq!(config.transcode.format, AudioFormat::Opus);
        assert_eq!(config.transcode.bitrate, "128k");
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = AppConfig::from_toml(r#"channels = ["a"]"#).unwrap();
        config
            .apply_env(env(&[
                ("CHANNELS", " xqc, , amouranth "),
                ("QUALITY", "720p60,480p30"),
                ("LIVE_CHECK_SECONDS", "15"),
                ("DOWNLOAD_DIR", "/tmp/out"),
                ("CONVERT_TO_MP3", "false"),
                ("DELETE_ORIGINAL_AFTER_CONVERT", "1"),
                ("DEBUG_VERBOSE", "yes"),
                ("REFRESH_SECONDS", ""),
            ]))
            .unwrap();

        assert_eq!(config.channels, vec!["xqc", "amouranth"]);
        assert_eq!(config.quality, vec!["720p60", "480p30"]);
        assert_eq!(config.monitor.poll_interval_secs, 15);
        assert_eq!(config.monitor.refresh_interval_secs, 10);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert!(!config.transcode.enabled);
        assert!(config.transcode.delete_original);
        assert!(config.log.verbose);
        assert!(config.transcoder().is_none());
    }

    #[test]
    fn malformed_environment_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[("LIVE_CHECK_SECONDS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref name, .. } if name == "LIVE_CHECK_SECONDS"));

        let err = config.apply_env(env(&[("DEBUG_HTTP", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn validation() {
        let mut config = AppConfig::default();
        assert!(matches!(config.validate(RunMode::Watch), Err(ConfigError::NoChannels)));
        assert!(config.validate(RunMode::Fetch).is_ok());

        config.channels = vec!["xqc".into(), "XQC".into()];
        assert!(matches!(
            config.validate(RunMode::Watch),
            Err(ConfigError::DuplicateChannel(_))
        ));

        config.channels = vec!["xqc".into(), " ".into()];
        assert!(matches!(config.validate(RunMode::Watch), Err(ConfigError::EmptyChannel)));

        config.channels = vec!["xqc".into()];
        config.monitor.poll_interval_secs = 0;
        assert!(matches!(config.validate(RunMode::Watch), Err(ConfigError::Zero(_))));

        config.monitor.poll_interval_secs = 60;
        config.quality = vec![];
        assert!(matches!(config.validate(RunMode::Watch), Err(ConfigError::EmptyQuality)));
    }

    #[test]
    fn segment_wait_must_cover_the_retry_budget() {
        let mut config = AppConfig {
            channels: vec!["xqc".into()],
            ..AppConfig::default()
        };
        assert!(config.validate(RunMode::Watch).is_ok());

        config.http.request_timeout_secs = 30;
        let err = config.validate(RunMode::Watch).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { name: "session.segment_wait_timeout_secs", .. }
        ));

        config.session.segment_wait_timeout_secs = 200;
        assert!(config.validate(RunMode::Watch).is_ok());

        config.http.request_timeout_secs = 10;
        config.retry.max_retries = 0;
        config.session.segment_wait_timeout_secs = 10;
        assert!(config.validate(RunMode::Watch).is_ok());
    }

    #[test]
    fn conversions_carry_settings() {
        let mut config = AppConfig::default();
        config.quality = vec!["720p60".into()];
        config.session.stall_timeout_secs = 90;
        config.retry.max_retries = 2;
        config.transcode.delete_original = true;

        let session = config.session_config();
        assert_eq!(session.quality, vec!["720p60"]);
        assert_eq!(session.stall_timeout, Duration::from_secs(90));
        assert_eq!(session.retry.max_retries, 2);
        assert!(session.transcode.delete_original);

        let monitor = config.monitor_config();
        assert_eq!(monitor.poll_interval, Duration::from_secs(60));
        assert_eq!(monitor.refresh_interval, Duration::from_secs(10));

        let channels = AppConfig {
            channels: vec![" xqc ".into()],
            ..config
        }
        .channels();
        assert_eq!(channels[0].name, "xqc");
        assert_eq!(channels[0].quality, vec!["720p60"]);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/kick.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
