use std::time::Duration;

use chrono::Utc;
use hls_capture::{DownloadSession, PlaylistHandle, RefreshOutcome, SessionError, SessionReport, SessionStatus};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{MonitorContext, MonitorEvent};

/// Drives one download session: start, refresh on a timer, then finish or abort.
pub(crate) struct SessionRunner {
    pub session: DownloadSession,
    /// Latest playlist handle from the monitor's polls.
    pub playlist: watch::Receiver<PlaylistHandle>,
    /// Cancelled by the monitor when the broadcast is over.
    pub finish: CancellationToken,
    /// Process or channel shutdown; also cancels the session's network waits.
    pub shutdown: CancellationToken,
    pub refresh_interval: Duration,
    pub finalize_on_shutdown: bool,
}

impl SessionRunner {
    #[instrument(name = "session", skip_all, fields(session = %self.session.id()))]
    pub async fn run(mut self) -> Result<SessionReport, SessionError> {
        let handle = self.playlist.borrow_and_update().clone();
        match self.session.start(handle).await {
            Ok(appended) => info!(appended, "Session started"),
            Err(SessionError::Cancelled) => debug!("Session start interrupted by shutdown"),
            Err(e) => warn!(error = %e, "Session failed during start"),
        }

        while self.session.status() == SessionStatus::Downloading {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.finish.cancelled() => break,
                _ = tokio::time::sleep(self.refresh_interval) => {}
            }

            let handle = self.playlist.borrow().clone();
            match self.session.refresh(&handle).await {
                Ok(RefreshOutcome::Appended(count)) => debug!(count, "Appended segments"),
                Ok(RefreshOutcome::Idle) => {}
                Ok(RefreshOutcome::Stalled) => {
                    info!("Live edge stalled; ending session");
                    break;
                }
                Err(SessionError::Cancelled) => break,
                Err(e) => {
                    warn!(error = %e, "Session refresh failed");
                    break;
                }
            }
        }

        if !self.shutdown.is_cancelled() {
            return self.session.finish().await;
        }
        // Cut short by shutdown: keep the media and journal so the next run resumes.
        if self.finalize_on_shutdown {
            self.session.finish_interrupted().await
        } else {
            Ok(self.session.abort().await)
        }
    }
}

/// The broadcast a monitor session task archives.
pub(crate) struct Broadcast {
    pub channel: String,
    pub identity: String,
    /// The identity came from the source rather than being made up locally.
    pub reported: bool,
}

/// Run `runner` and record its outcome.
///
/// A broadcast is written to the archive history only when its session completed
/// without being interrupted. Both this and the `SessionFinished` event happen inside
/// the session task, so they are not lost when the spawning monitor is gone.
pub(crate) async fn run_and_record(
    runner: SessionRunner,
    ctx: MonitorContext,
    broadcast: Broadcast,
) -> Result<SessionReport, SessionError> {
    let Broadcast {
        channel,
        identity,
        reported,
    } = broadcast;

    let report = match runner.run().await {
        Ok(report) => report,
        Err(e) => {
            error!(identity = %identity, error = %e, "Session ended with an error");
            return Err(e);
        }
    };
    info!(
        identity = %identity,
        status = %report.status,
        interrupted = report.interrupted,
        segments = report.segments_written,
        gaps = report.gaps.len(),
        audio = ?report.audio_path,
        "Download session ended"
    );

    if report.status == SessionStatus::Completed && !report.interrupted {
        if reported && let Err(e) = ctx.history.record(&channel, &identity).await {
            warn!(identity = %identity, error = %e, "Failed to record archived session");
        }
    } else {
        debug!(identity = %identity, "Session not archived; a later run may resume it");
    }

    ctx.emit(MonitorEvent::SessionFinished {
        channel,
        identity,
        report: Box::new(report.clone()),
        timestamp: Utc::now(),
    });
    Ok(report)
}
