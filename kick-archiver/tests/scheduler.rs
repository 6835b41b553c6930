//! `ChannelScheduler` supervision and lifecycle.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use hls_capture::{AudioFormat, SessionStatus, TranscodeError, Transcoder};
use kick_archiver::error::SchedulerError;
use kick_archiver::monitor::{MonitorEvent, MonitorState};
use kick_archiver::scheduler::{ChannelScheduler, RestartTrackerConfig, SchedulerConfig};
use kick_archiver::source::{Channel, LiveStatus, PlaylistError};
use tokio_util::sync::CancellationToken;

fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        restart: RestartTrackerConfig {
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            failure_window: Duration::from_secs(60),
            failure_threshold: 2,
        },
        shutdown_timeout: Duration::from_secs(5),
    }
}

fn scheduler(h: &Harness, token: CancellationToken) -> ChannelScheduler {
    ChannelScheduler::new(h.ctx.clone(), h.monitor_config(), scheduler_config(), token)
}

/// Never finishes; records when its future is dropped.
#[derive(Default)]
struct StuckTranscoder {
    entered: AtomicBool,
    dropped: Arc<AtomicBool>,
}

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transcoder for StuckTranscoder {
    async fn convert(
        &self,
        _input: &Path,
        _output: &Path,
        _format: AudioFormat,
    ) -> Result<(), TranscodeError> {
        let _flag = SetOnDrop(Arc::clone(&self.dropped));
        self.entered.store(true, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[tokio::test]
async fn duplicate_and_unknown_channels_are_rejected() {
    let h = Harness::new().await;
    let mut scheduler = scheduler(&h, CancellationToken::new());

    scheduler.add_channel(channel()).unwrap();
    let err = scheduler.add_channel(channel()).unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateChannel(name) if name == CHANNEL));
    assert_eq!(scheduler.len(), 1);

    let err = scheduler.remove_channel("nobody").await.unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownChannel(_)));

    let report = scheduler.shutdown().await;
    assert_eq!((report.total, report.graceful, report.forced), (1, 1, 0));
}

#[tokio::test]
async fn cancelled_root_rejects_new_channels() {
    let h = Harness::new().await;
    let token = CancellationToken::new();
    let mut scheduler = scheduler(&h, token.clone());
    token.cancel();

    let err = scheduler.add_channel(channel()).unwrap_err();
    assert!(matches!(err, SchedulerError::ShuttingDown));
    assert!(scheduler.is_empty());
}

#[tokio::test]
async fn channel_states_follow_monitors() {
    let h = Harness::new().await;
    let mut scheduler = scheduler(&h, CancellationToken::new());
    scheduler.add_channel(channel()).unwrap();
    scheduler
        .add_channel(Channel::new("other", vec!["480p30".into()]))
        .unwrap();

    let states = scheduler.channel_states();
    assert_eq!(states.keys().collect::<Vec<_>>(), [CHANNEL, "other"]);

    h.source.set(live(Some("a"), 20));
    wait_until("both channels live", || {
        scheduler.channel_states().values().all(|s| {
            // A poll may be in flight.
            s.is_live() || *s == MonitorState::Checking
        }) && scheduler.channel_states().values().any(MonitorState::is_live)
    })
    .await;

    scheduler.shutdown().await;
}

#[tokio::test]
async fn permanent_errors_restart_the_monitor() {
    let h = Harness::new().await;
    h.source
        .fail(PlaylistError::permanent("channel does not exist"));
    let mut scheduler = scheduler(&h, CancellationToken::new());
    scheduler.add_channel(channel()).unwrap();

    // Every run ends after one check, so several checks mean several restarts.
    wait_until("restarts", || h.source.checks() >= 4).await;

    h.source.set(LiveStatus::Offline);
    let checks = h.source.checks();
    wait_until("polling resumes", || h.source.checks() >= checks + 3).await;

    let report = scheduler.shutdown().await;
    assert_eq!(report.graceful, 1);
}

#[tokio::test]
async fn panicking_monitor_is_restarted() {
    let h = Harness::new().await;
    h.source.panic_next();
    let mut scheduler = scheduler(&h, CancellationToken::new());
    scheduler.add_channel(channel()).unwrap();

    h.source.set(live(Some("a"), 20));
    h.events.wait_for("start a", started("a")).await;

    scheduler.shutdown().await;
    let end = h.events.wait_for("end a", finished("a")).await;
    assert_eq!(finished_status(&end), SessionStatus::Completed);
}

#[tokio::test]
async fn removed_channel_stops_polling() {
    let h = Harness::new().await;
    let mut scheduler = scheduler(&h, CancellationToken::new());
    scheduler.add_channel(channel()).unwrap();
    wait_until("first poll", || h.source.checks() >= 1).await;

    scheduler.remove_channel(CHANNEL).await.unwrap();
    assert!(!scheduler.contains(CHANNEL));
    let checks = h.source.checks();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.source.checks(), checks);

    // The name is free again.
    scheduler.add_channel(channel()).unwrap();
    scheduler.shutdown().await;
}

#[tokio::test]
async fn shutdown_finalises_active_sessions() {
    let h = Harness::new().await;
    let mut scheduler = scheduler(&h, CancellationToken::new());
    scheduler.add_channel(channel()).unwrap();

    h.source.set(live(Some("a"), 20));
    h.events.wait_for("start a", started("a")).await;
    wait_until("segments on disk", || has_content(&h.media_path(20))).await;

    let report = scheduler.shutdown().await;
    assert_eq!((report.total, report.graceful, report.forced), (1, 1, 0));

    let end = h.events.wait_for("end a", finished("a")).await;
    let report = finished_report(&end);
    assert_eq!(report.status, SessionStatus::Completed);
    assert!(report.interrupted);
    assert!(h.audio_path(20).exists());
    assert!(!h.history.contains(CHANNEL, "a"));
}

#[tokio::test]
async fn session_outlives_a_panicking_monitor_and_is_resumed() {
    let h = Harness::new().await;
    let mut scheduler = scheduler(&h, CancellationToken::new());
    scheduler.add_channel(channel()).unwrap();

    h.source.set(live(Some("a"), 20));
    h.events.wait_for("start a", started("a")).await;
    wait_until("all segments journaled", || {
        journal_entries(&h.media_path(20)) == SEGMENT_COUNT
    })
    .await;
    let fetched = h.fetcher.fetches();

    h.source.panic_next();
    wait_until("restarted session", || h.events.count(started("a")) == 2).await;
    h.source.set(LiveStatus::Offline);
    wait_until("both sessions ended", || h.events.count(finished("a")) == 2).await;
    scheduler.shutdown().await;

    let ends: Vec<MonitorEvent> = h
        .events
        .snapshot()
        .into_iter()
        .filter(finished("a"))
        .collect();
    assert!(finished_report(&ends[0]).interrupted);
    let last = finished_report(&ends[1]);
    assert_eq!(last.status, SessionStatus::Completed);
    assert!(!last.interrupted);
    assert_eq!(last.segments_written, SEGMENT_COUNT);

    // The orphaned session settled before its replacement started.
    let order: Vec<&str> = h
        .events
        .snapshot()
        .iter()
        .filter_map(|e| match e {
            MonitorEvent::SessionStarted { .. } => Some("start"),
            MonitorEvent::SessionFinished { .. } => Some("end"),
            _ => None,
        })
        .collect();
    assert_eq!(order, ["start", "end", "start", "end"]);
    assert_eq!(h.events.count(|e| matches!(e, MonitorEvent::SessionSkipped { .. })), 0);
    assert_eq!(h.fetcher.fetches(), fetched);
    assert!(h.history.contains(CHANNEL, "a"));
}

#[tokio::test]
async fn forced_shutdown_stops_stuck_sessions() {
    let h = Harness::new().await;
    let transcoder = Arc::new(StuckTranscoder::default());
    let ctx = h.ctx.clone().with_transcoder(transcoder.clone());
    let config = SchedulerConfig {
        shutdown_timeout: Duration::from_millis(100),
        ..scheduler_config()
    };
    let mut scheduler =
        ChannelScheduler::new(ctx, h.monitor_config(), config, CancellationToken::new());
    scheduler.add_channel(channel()).unwrap();

    h.source.set(live(Some("a"), 20));
    h.events.wait_for("start a", started("a")).await;
    wait_until("segments on disk", || has_content(&h.media_path(20))).await;

    let report = scheduler.shutdown().await;
    assert_eq!((report.total, report.graceful, report.forced), (1, 0, 1));
    assert!(transcoder.entered.load(Ordering::SeqCst));
    assert!(transcoder.dropped.load(Ordering::SeqCst), "session task still running");
    assert!(!h.audio_path(20).exists());
    assert!(h.media_path(20).exists());
    assert!(!h.history.contains(CHANNEL, "a"));
}
