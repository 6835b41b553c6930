//! Fakes shared by the monitor and scheduler tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use hls_capture::journal::journal_path;
use hls_capture::{
    AudioFormat, FetchError, PlaylistHandle, ResolvedPlaylist, SegmentFetcher, SegmentRef,
    SessionConfig, SessionReport, SessionStatus, TranscodeError, Transcoder,
};
use kick_archiver::history::ArchiveHistory;
use kick_archiver::monitor::{MonitorConfig, MonitorContext, MonitorEvent, SkipReason};
use kick_archiver::source::{Channel, LiveStatus, LiveStream, PlaylistError, PlaylistSource};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use url::Url;

pub const CHANNEL: &str = "chan";

pub fn channel() -> Channel {
    Channel::new(CHANNEL, vec!["480p30".to_string()])
}

/// Live stream started at `hour`:00 UTC on 2024-05-01.
pub fn live(identity: Option<&str>, hour: u32) -> LiveStatus {
    LiveStatus::Live(LiveStream {
        identity: identity.map(str::to_string),
        started_at: Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).single(),
        title: Some("testing".to_string()),
        playlist: PlaylistHandle::parse("https://cdn.test/hls/master.m3u8").unwrap(),
    })
}

/// Live stream whose source reports no start time.
pub fn live_without_start(identity: Option<&str>) -> LiveStatus {
    let LiveStatus::Live(mut stream) = live(identity, 0) else {
        unreachable!()
    };
    stream.started_at = None;
    LiveStatus::Live(stream)
}

/// Basename of a session started by [`live`] at `hour` without quality variants.
pub fn basename(hour: u32) -> String {
    format!("{CHANNEL}_2024-05-01_{hour:02}-00_source")
}

pub struct ScriptedSource {
    status: Mutex<Result<LiveStatus, PlaylistError>>,
    checks: AtomicU32,
    panic_next: AtomicBool,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(Ok(LiveStatus::Offline)),
            checks: AtomicU32::new(0),
            panic_next: AtomicBool::new(false),
        })
    }

    pub fn set(&self, status: LiveStatus) {
        *self.status.lock() = Ok(status);
    }

    pub fn fail(&self, error: PlaylistError) {
        *self.status.lock() = Err(error);
    }

    pub fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    pub fn checks(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaylistSource for ScriptedSource {
    async fn check_live(&self, _channel: &Channel) -> Result<LiveStatus, PlaylistError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("scripted source panic");
        }
        self.status.lock().clone()
    }
}

/// Segments served by [`ListFetcher`].
pub const SEGMENT_COUNT: usize = 3;

/// Serves a fixed live playlist of three segments.
pub struct ListFetcher {
    segments: Vec<SegmentRef>,
    fetches: AtomicU32,
    failing_resolves: AtomicU32,
}

impl ListFetcher {
    pub fn new() -> Arc<Self> {
        let segments = (0..SEGMENT_COUNT as u64)
            .map(|i| {
                SegmentRef::new(i, Url::parse(&format!("https://cdn.test/seg/{i}.ts")).unwrap())
            })
            .collect();
        Arc::new(Self {
            segments,
            fetches: AtomicU32::new(0),
            failing_resolves: AtomicU32::new(0),
        })
    }

    /// Segment downloads so far.
    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Make the next `count` playlist resolutions fail.
    pub fn fail_resolves(&self, count: u32) {
        self.failing_resolves.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl SegmentFetcher for ListFetcher {
    async fn resolve(
        &self,
        _playlist: &PlaylistHandle,
        _token: &CancellationToken,
    ) -> Result<ResolvedPlaylist, FetchError> {
        let failing = self
            .failing_resolves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(FetchError::exhausted(1, "HTTP 404"));
        }
        Ok(ResolvedPlaylist {
            segments: self.segments.clone(),
            ended: false,
            target_duration: Duration::from_secs(2),
        })
    }

    async fn fetch(
        &self,
        segment: &SegmentRef,
        _token: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(format!("<segment {}>", segment.index)))
    }
}

#[derive(Default)]
pub struct StubTranscoder {
    pub calls: AtomicU32,
}

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn convert(
        &self,
        _input: &Path,
        output: &Path,
        _format: AudioFormat,
    ) -> Result<(), TranscodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, b"audio").await.unwrap();
        Ok(())
    }
}

/// Every event emitted while the log is alive, in order.
pub struct EventLog {
    events: Arc<Mutex<Vec<MonitorEvent>>>,
    _task: AbortOnDropHandle<()>,
}

impl EventLog {
    pub fn record(mut rx: broadcast::Receiver<MonitorEvent>) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => sink.lock().push(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        panic!("event log lagged by {n} events")
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self {
            events,
            _task: AbortOnDropHandle::new(task),
        }
    }

    pub fn snapshot(&self) -> Vec<MonitorEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&MonitorEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    /// Wait until an event matching `pred` has been recorded.
    pub async fn wait_for(
        &self,
        what: &str,
        pred: impl Fn(&MonitorEvent) -> bool,
    ) -> MonitorEvent {
        let found = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(event) = self.events.lock().iter().find(|e| pred(e)).cloned() {
                    return event;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        match found {
            Ok(event) => event,
            Err(_) => panic!("timed out waiting for {what}; got {:#?}", self.snapshot()),
        }
    }
}

pub fn started(identity: &str) -> impl Fn(&MonitorEvent) -> bool {
    move |event| matches!(event, MonitorEvent::SessionStarted { identity: id, .. } if id == identity)
}

pub fn finished(identity: &str) -> impl Fn(&MonitorEvent) -> bool {
    move |event| matches!(event, MonitorEvent::SessionFinished { identity: id, .. } if id == identity)
}

pub fn any_started(event: &MonitorEvent) -> bool {
    matches!(event, MonitorEvent::SessionStarted { .. })
}

pub fn skipped(reason: SkipReason) -> impl Fn(&MonitorEvent) -> bool {
    move |event| matches!(event, MonitorEvent::SessionSkipped { reason: r, .. } if *r == reason)
}

pub fn finished_status(event: &MonitorEvent) -> SessionStatus {
    finished_report(event).status
}

pub fn finished_report(event: &MonitorEvent) -> &SessionReport {
    match event {
        MonitorEvent::SessionFinished { report, .. } => report,
        other => panic!("not a finished event: {other:?}"),
    }
}

pub fn started_media(event: &MonitorEvent) -> Option<PathBuf> {
    match event {
        MonitorEvent::SessionStarted { media_path, .. } => Some(media_path.clone()),
        _ => None,
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub source: Arc<ScriptedSource>,
    pub fetcher: Arc<ListFetcher>,
    pub transcoder: Arc<StubTranscoder>,
    pub history: Arc<ArchiveHistory>,
    pub ctx: MonitorContext,
    pub events: EventLog,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new();
        let fetcher = ListFetcher::new();
        let transcoder = Arc::new(StubTranscoder::default());
        let history = Arc::new(ArchiveHistory::load(dir.path()).await);
        let ctx = MonitorContext::new(source.clone(), fetcher.clone(), history.clone())
            .with_transcoder(transcoder.clone());
        let events = EventLog::record(ctx.subscribe());
        Self {
            dir,
            source,
            fetcher,
            transcoder,
            history,
            ctx,
            events,
        }
    }

    /// Context of a freshly started process: same fakes and output directory, history
    /// reloaded from disk.
    pub async fn reopen(&self) -> (MonitorContext, Arc<ArchiveHistory>) {
        let history = Arc::new(ArchiveHistory::load(self.dir.path()).await);
        let ctx = MonitorContext::new(self.source.clone(), self.fetcher.clone(), history.clone())
            .with_transcoder(self.transcoder.clone());
        (ctx, history)
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(20),
            refresh_interval: Duration::from_millis(10),
            source_backoff_max: Duration::from_millis(40),
            finalize_on_shutdown: true,
            output_dir: self.dir.path().to_path_buf(),
            session: SessionConfig::default(),
        }
    }

    pub fn audio_path(&self, hour: u32) -> PathBuf {
        self.dir.path().join(format!("{}.mp3", basename(hour)))
    }

    pub fn media_path(&self, hour: u32) -> PathBuf {
        let name = basename(hour);
        self.dir.path().join(&name).join(format!("{name}.ts"))
    }
}

/// Poll `cond` until it holds, failing the test after five seconds.
pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

/// Whether `path` exists and is not empty.
pub fn has_content(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.len() > 0)
}

/// Segments recorded in the resume journal of `media`.
pub fn journal_entries(media: &Path) -> usize {
    std::fs::read_to_string(journal_path(media))
        .map(|raw| raw.lines().filter(|l| !l.trim().is_empty()).count())
        .unwrap_or(0)
}
