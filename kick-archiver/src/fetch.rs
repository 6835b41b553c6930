//! One-shot download of a single playlist URL.

use std::sync::Arc;

use chrono::Utc;
use hls_capture::playlist::SOURCE_LABEL;
use hls_capture::{
    DownloadSession, OutputRegistry, PlaylistHandle, SegmentFetcher, SessionError, SessionMode,
    SessionReport, SessionTarget, Transcoder,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::monitor::{MonitorConfig, SessionRunner};
use crate::utils::filename::{SessionPaths, sanitize_filename, session_basename};

/// A single download requested from the command line.
#[derive(Debug, Clone)]
pub struct FetchJob {
    /// Playlist to capture, with its variants when known.
    pub playlist: PlaylistHandle,
    /// Explicit basename for the output files.
    pub name: Option<String>,
    /// Channel used to derive a basename when `name` is absent.
    pub channel: Option<String>,
    pub quality: Vec<String>,
    pub mode: SessionMode,
}

impl FetchJob {
    pub fn new(playlist: PlaylistHandle, mode: SessionMode) -> Self {
        Self {
            playlist,
            name: None,
            channel: None,
            quality: Vec::new(),
            mode,
        }
    }

    fn basename(&self, handle: &PlaylistHandle) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return sanitize_filename(name);
        }
        let channel = self.channel.as_deref().unwrap_or("vod");
        let label = handle.selected_label().unwrap_or(SOURCE_LABEL);
        session_basename(channel, Utc::now(), label)
    }
}

/// Download `job` to completion and transcode it.
///
/// A live job follows the playlist until it stalls. Cancelling `token` finalises the
/// partial file, or aborts it when `config.finalize_on_shutdown` is off. Either way the
/// media file and journal stay, and a rerun with the same `name` resumes them.
pub async fn fetch_once(
    job: FetchJob,
    config: &MonitorConfig,
    fetcher: Arc<dyn SegmentFetcher>,
    transcoder: Option<Arc<dyn Transcoder>>,
    token: CancellationToken,
) -> Result<SessionReport, SessionError> {
    let session_config = if job.quality.is_empty() {
        config.session.clone()
    } else {
        config.session.clone().with_quality(job.quality.clone())
    };
    let handle = job.playlist.select_quality(&session_config.quality);
    let basename = job.basename(&handle);
    let paths = SessionPaths::new(
        &config.output_dir,
        &basename,
        session_config.transcode.format,
    );

    let convert = session_config.transcode.enabled && transcoder.is_some();
    let target = if convert {
        SessionTarget::new(&paths.media).with_audio(&paths.audio)
    } else {
        SessionTarget::new(&paths.media)
    };

    let registry = OutputRegistry::new();
    let mut session = DownloadSession::new(job.mode, target, session_config, fetcher, &registry)?
        .with_cancellation(token.clone());
    if let Some(transcoder) = transcoder {
        session = session.with_transcoder(transcoder);
    }

    info!(
        url = %handle.url(),
        mode = %job.mode,
        media = %paths.media.display(),
        "Fetching playlist"
    );

    let report = match job.mode {
        SessionMode::Live => {
            let (_playlist_tx, playlist) = watch::channel(handle);
            SessionRunner {
                session,
                playlist,
                finish: CancellationToken::new(),
                shutdown: token,
                refresh_interval: config.refresh_interval,
                finalize_on_shutdown: config.finalize_on_shutdown,
            }
            .run()
            .await?
        }
        SessionMode::Static => {
            if let Err(e) = session.start(handle).await {
                warn!(error = %e, "Download did not complete");
            }
            if !token.is_cancelled() {
                session.finish().await?
            } else if config.finalize_on_shutdown {
                session.finish_interrupted().await?
            } else {
                session.abort().await
            }
        }
    };

    log_report(&report);
    Ok(report)
}

fn log_report(report: &SessionReport) {
    info!(
        status = %report.status,
        interrupted = report.interrupted,
        segments = report.segments_written,
        bytes = report.bytes_written,
        gaps = report.gaps.len(),
        media = %report.media_path.display(),
        audio = ?report.audio_path,
        "Fetch finished"
    );
    if let Some(error) = &report.transcode_error {
        warn!(error = %error, "Transcoding failed; media file kept");
    }
}
