use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hls_capture::journal::journal_path;
use hls_capture::playlist::SOURCE_LABEL;
use hls_capture::{
    DownloadSession, PlaylistHandle, RetryPolicy, SessionError, SessionMode, SessionReport,
    SessionStatus, SessionTarget,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::session_task::{Broadcast, run_and_record};
use super::{
    MonitorConfig, MonitorContext, MonitorEvent, MonitorState, SessionRunner, SessionTasks,
    SkipReason,
};
use crate::source::{Channel, LiveStatus, LiveStream, PlaylistError};
use crate::utils::filename::{SessionPaths, session_basename};

/// A broadcast waiting for the previous session of the channel to end.
#[derive(Debug)]
struct Detected {
    identity: String,
    reported: bool,
    stream: LiveStream,
}

/// Values made up for the current live period when the source omits them.
///
/// Kept until the channel goes offline, so a retried session of the same broadcast
/// lands on the same files and resumes them.
#[derive(Debug, Default)]
struct PeriodFallbacks {
    identity: Option<String>,
    started_at: Option<(String, DateTime<Utc>)>,
}

impl PeriodFallbacks {
    fn identity(&mut self) -> String {
        self.identity
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone()
    }

    fn started_at(&mut self, identity: &str) -> DateTime<Utc> {
        match &self.started_at {
            Some((known, started_at)) if known == identity => *started_at,
            _ => {
                let started_at = Utc::now();
                self.started_at = Some((identity.to_string(), started_at));
                started_at
            }
        }
    }
}

struct ActiveSession {
    identity: String,
    media_path: PathBuf,
    playlist: watch::Sender<PlaylistHandle>,
    finish: CancellationToken,
    /// Cancelled when the session task exits, panics included.
    done: CancellationToken,
    finishing: bool,
    /// `None` when the task was killed.
    task: JoinHandle<Option<Result<SessionReport, SessionError>>>,
}

impl ActiveSession {
    fn request_finish(&mut self) {
        if !self.finishing {
            self.finishing = true;
            self.finish.cancel();
        }
    }
}

/// Watches one channel and runs at most one download session for it at a time.
pub struct LiveMonitor {
    channel: Channel,
    config: MonitorConfig,
    ctx: MonitorContext,
    state: watch::Sender<MonitorState>,
    active: Option<ActiveSession>,
    queued: VecDeque<Detected>,
    /// Broadcasts that must not be started again while the channel stays live.
    ended: HashSet<String>,
    fallbacks: PeriodFallbacks,
    /// Identity seen by the most recent successful check.
    live_identity: Option<String>,
    source_errors: u32,
    sessions: SessionTasks,
}

impl LiveMonitor {
    pub fn new(channel: Channel, config: MonitorConfig, ctx: MonitorContext) -> Self {
        let (state, _) = watch::channel(MonitorState::Idle);
        Self {
            channel,
            config,
            ctx,
            state,
            active: None,
            queued: VecDeque::new(),
            ended: HashSet::new(),
            fallbacks: PeriodFallbacks::default(),
            live_identity: None,
            source_errors: 0,
            sessions: SessionTasks::new(),
        }
    }

    /// Publish state through an existing sender, so observers survive monitor restarts.
    pub fn with_state(mut self, state: watch::Sender<MonitorState>) -> Self {
        state.send_replace(MonitorState::Idle);
        self.state = state;
        self
    }

    /// Spawn session tasks into `sessions`, so they can be awaited if this monitor dies.
    pub fn with_sessions(mut self, sessions: SessionTasks) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn state(&self) -> watch::Receiver<MonitorState> {
        self.state.subscribe()
    }

    /// Poll until `token` is cancelled or the source reports a permanent error.
    ///
    /// An active session is finished (or aborted, per configuration) before returning.
    #[instrument(name = "monitor", skip_all, fields(channel = %self.channel.name))]
    pub async fn run(mut self, token: CancellationToken) -> Result<(), PlaylistError> {
        info!(
            poll_secs = self.config.poll_interval.as_secs(),
            refresh_secs = self.config.refresh_interval.as_secs(),
            "Monitor started"
        );

        let result = self.poll_loop(&token).await;
        if let Err(e) = &result {
            error!(error = %e, "Playlist source failed permanently; stopping monitor");
        }

        if !self.queued.is_empty() {
            warn!(queued = self.queued.len(), "Dropping queued broadcasts on monitor stop");
            self.queued.clear();
        }
        if let Some(mut active) = self.active.take() {
            active.request_finish();
            self.complete(active).await;
        }
        self.set_state(MonitorState::Idle);
        info!("Monitor stopped");
        result
    }

    async fn poll_loop(&mut self, token: &CancellationToken) -> Result<(), PlaylistError> {
        while !token.is_cancelled() {
            self.reap().await;
            self.start_queued(token).await;

            let delay = self.check(token).await?;

            self.reap().await;
            self.start_queued(token).await;
            self.wait(delay, token).await;
        }
        Ok(())
    }

    /// One live check. Returns how long to wait before the next one.
    async fn check(&mut self, token: &CancellationToken) -> Result<Duration, PlaylistError> {
        let previous = self.state.borrow().clone();
        self.set_state(MonitorState::Checking);

        let status = tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.set_state(previous);
                return Ok(Duration::ZERO);
            }
            status = self.ctx.source.check_live(&self.channel) => status,
        };

        match status {
            Ok(LiveStatus::Offline) => {
                self.source_errors = 0;
                self.on_offline();
                Ok(self.config.poll_interval)
            }
            Ok(LiveStatus::Live(stream)) => {
                self.source_errors = 0;
                self.on_live(stream, token).await;
                Ok(self.config.poll_interval)
            }
            Err(e) if e.is_transient() => {
                self.source_errors = self.source_errors.saturating_add(1);
                let delay = self.source_backoff();
                warn!(
                    error = %e,
                    consecutive_errors = self.source_errors,
                    retry_in_secs = delay.as_secs(),
                    "Live check failed"
                );
                self.ctx.emit(MonitorEvent::SourceError {
                    channel: self.channel.name.clone(),
                    message: e.to_string(),
                    consecutive_errors: self.source_errors,
                    timestamp: Utc::now(),
                });
                self.set_state(previous);
                Ok(delay)
            }
            Err(e) => {
                self.set_state(previous);
                Err(e)
            }
        }
    }

    fn source_backoff(&self) -> Duration {
        let policy = RetryPolicy {
            max_retries: 0,
            base_delay: self.config.poll_interval,
            max_delay: self.config.source_backoff_max.max(self.config.poll_interval),
            jitter: true,
        };
        policy.delay_for_attempt(self.source_errors.saturating_sub(1))
    }

    fn on_offline(&mut self) {
        if self.live_identity.take().is_some() {
            info!("Channel went offline");
        }
        self.fallbacks = PeriodFallbacks::default();
        self.ended.clear();
        if let Some(active) = self.active.as_mut()
            && !active.finishing
        {
            info!(identity = %active.identity, "Finishing session");
            active.request_finish();
        }
        self.set_state(MonitorState::Idle);
    }

    async fn on_live(&mut self, stream: LiveStream, token: &CancellationToken) {
        let reported = stream.identity.is_some();
        let identity = match &stream.identity {
            Some(identity) => identity.clone(),
            None => self.fallbacks.identity(),
        };
        if self.live_identity.as_deref() != Some(identity.as_str()) {
            info!(
                identity = %identity,
                title = stream.title.as_deref().unwrap_or_default(),
                "Channel is live"
            );
        }
        self.live_identity = Some(identity.clone());
        self.set_state(MonitorState::Live {
            identity: identity.clone(),
        });

        if let Some(active) = self.active.as_mut()
            && active.identity == identity
        {
            // Same broadcast: keep the session's playlist handle fresh.
            if !active.finishing {
                active.playlist.send_replace(stream.playlist);
            }
            return;
        }
        if let Some(queued) = self.queued.iter_mut().find(|d| d.identity == identity) {
            queued.stream = stream;
            return;
        }
        if self.ended.contains(&identity) {
            return;
        }
        if reported && self.ctx.history.contains(&self.channel.name, &identity) {
            self.skip(&identity, SkipReason::AlreadyArchived);
            return;
        }

        let detected = Detected {
            identity,
            reported,
            stream,
        };
        match self.active.as_mut() {
            Some(active) => {
                info!(
                    previous = %active.identity,
                    next = %detected.identity,
                    "New broadcast detected; queued until the previous session ends"
                );
                active.request_finish();
                self.queued.push_back(detected);
            }
            None => self.start_session(detected, token).await,
        }
    }

    fn skip(&mut self, identity: &str, reason: SkipReason) {
        info!(identity, ?reason, "Not archiving broadcast");
        self.ended.insert(identity.to_string());
        self.ctx.emit(MonitorEvent::SessionSkipped {
            channel: self.channel.name.clone(),
            identity: identity.to_string(),
            reason,
            timestamp: Utc::now(),
        });
    }

    async fn start_queued(&mut self, token: &CancellationToken) {
        while self.active.is_none() {
            let Some(next) = self.queued.pop_front() else {
                return;
            };
            let still_live = self.live_identity.as_deref() == Some(next.identity.as_str());
            self.start_session(next, token).await;
            if let Some(active) = self.active.as_mut()
                && !still_live
            {
                // Capture what is left of an earlier broadcast, then stop.
                active.request_finish();
            }
        }
    }

    async fn start_session(&mut self, detected: Detected, token: &CancellationToken) {
        let Detected {
            identity,
            reported,
            stream,
        } = detected;

        let handle = stream.playlist.select_quality(&self.channel.quality);
        let label = handle.selected_label().unwrap_or(SOURCE_LABEL).to_string();
        let started_at = match stream.started_at {
            Some(started_at) => started_at,
            None => self.fallbacks.started_at(&identity),
        };
        let basename = session_basename(&self.channel.name, started_at, &label);
        let transcode = &self.config.session.transcode;
        let paths = SessionPaths::new(&self.config.output_dir, &basename, transcode.format);

        // Audio next to a resume journal comes from an interrupted run; keep capturing.
        let convert = transcode.enabled && self.ctx.transcoder.is_some();
        if convert
            && exists(&paths.audio).await
            && !exists(&journal_path(&paths.media)).await
        {
            self.skip(&identity, SkipReason::AudioExists);
            return;
        }

        let target = if convert {
            SessionTarget::new(&paths.media).with_audio(&paths.audio)
        } else {
            SessionTarget::new(&paths.media)
        };
        let config = self
            .config
            .session
            .clone()
            .with_quality(self.channel.quality.clone());
        let session = match DownloadSession::new(
            SessionMode::Live,
            target,
            config,
            Arc::clone(&self.ctx.fetcher),
            &self.ctx.registry,
        ) {
            Ok(session) => session,
            Err(SessionError::OutputBusy(path)) => {
                // Not remembered as ended: the next poll tries again.
                warn!(identity = %identity, path = %path.display(), "Output is busy");
                self.ctx.emit(MonitorEvent::SessionSkipped {
                    channel: self.channel.name.clone(),
                    identity,
                    reason: SkipReason::OutputBusy,
                    timestamp: Utc::now(),
                });
                return;
            }
            Err(e) => {
                error!(identity = %identity, error = %e, "Failed to create session");
                return;
            }
        };

        let shutdown = token.child_token();
        let mut session = session.with_cancellation(shutdown.clone());
        if let Some(transcoder) = &self.ctx.transcoder {
            session = session.with_transcoder(Arc::clone(transcoder));
        }
        let session_id = session.id();

        let (playlist_tx, playlist_rx) = watch::channel(handle);
        let finish = CancellationToken::new();
        let done = CancellationToken::new();
        let runner = SessionRunner {
            session,
            playlist: playlist_rx,
            finish: finish.clone(),
            shutdown,
            refresh_interval: self.config.refresh_interval,
            finalize_on_shutdown: self.config.finalize_on_shutdown,
        };
        let broadcast = Broadcast {
            channel: self.channel.name.clone(),
            identity: identity.clone(),
            reported,
        };

        info!(
            identity = %identity,
            session = %session_id,
            quality = %label,
            media = %paths.media.display(),
            "Download session started"
        );
        self.ctx.emit(MonitorEvent::SessionStarted {
            channel: self.channel.name.clone(),
            identity: identity.clone(),
            media_path: paths.media.clone(),
            timestamp: Utc::now(),
        });

        let ctx = self.ctx.clone();
        let done_guard = done.clone().drop_guard();
        let task = self.sessions.spawn(async move {
            let _done = done_guard;
            run_and_record(runner, ctx, broadcast).await
        });

        self.active = Some(ActiveSession {
            identity,
            media_path: paths.media,
            playlist: playlist_tx,
            finish,
            done,
            finishing: false,
            task,
        });
    }

    /// Collect the active session if its task has exited.
    async fn reap(&mut self) {
        if let Some(active) = self.active.take_if(|a| a.done.is_cancelled()) {
            self.complete(active).await;
        }
    }

    async fn complete(&mut self, active: ActiveSession) {
        let ActiveSession {
            identity,
            media_path,
            task,
            ..
        } = active;

        let report = match task.await {
            Ok(Some(Ok(report))) => report,
            Ok(Some(Err(_))) => return,
            Ok(None) => {
                warn!(identity = %identity, "Session task was killed");
                return;
            }
            Err(e) if e.is_panic() => {
                error!(identity = %identity, media = %media_path.display(), "Session task panicked");
                return;
            }
            Err(e) => {
                warn!(identity = %identity, error = %e, "Session task was cancelled");
                return;
            }
        };

        if report.status == SessionStatus::Completed && !report.interrupted {
            // Never start this broadcast again while it stays live.
            self.ended.insert(identity);
        }
    }

    /// Sleep for `delay`, waking early on shutdown or when the active session exits.
    async fn wait(&self, delay: Duration, token: &CancellationToken) {
        let session_done = async {
            match &self.active {
                Some(active) => active.done.cancelled().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
            _ = session_done => {}
        }
    }

    fn set_state(&self, next: MonitorState) {
        let mut old = None;
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            old = Some(std::mem::replace(current, next.clone()));
            true
        });
        if let Some(old_state) = old {
            debug!(from = %old_state, to = %next, "Monitor state change");
            self.ctx.emit(MonitorEvent::StateChanged {
                channel: self.channel.name.clone(),
                old_state,
                new_state: next,
                timestamp: Utc::now(),
            });
        }
    }
}

async fn exists(path: &std::path::Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
