use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::{RestartTracker, RestartTrackerConfig};
use crate::error::SchedulerError;
use crate::monitor::{
    LiveMonitor, MonitorConfig, MonitorContext, MonitorEvent, MonitorState, SessionTasks,
};
use crate::source::Channel;

/// How long killed session tasks get to unwind after a forced stop.
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub restart: RestartTrackerConfig,
    /// How long shutdown waits for monitors to finalise their sessions before aborting them.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            restart: RestartTrackerConfig::default(),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

/// Outcome of [`ChannelScheduler::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub total: usize,
    pub graceful: usize,
    pub forced: usize,
}

struct ChannelEntry {
    token: CancellationToken,
    state: watch::Receiver<MonitorState>,
    sessions: SessionTasks,
    task: JoinHandle<()>,
}

impl ChannelEntry {
    /// Abort the supervisor and drop its session tasks, then wait for them to unwind.
    async fn kill(self) {
        self.task.abort();
        self.sessions.kill();
        if tokio::time::timeout(KILL_GRACE, self.sessions.drain()).await.is_err() {
            warn!(sessions = self.sessions.len(), "Session tasks did not stop after kill");
        }
    }
}

/// Runs one supervised monitor per channel.
pub struct ChannelScheduler {
    ctx: MonitorContext,
    monitor_config: MonitorConfig,
    config: SchedulerConfig,
    token: CancellationToken,
    tracker: Arc<Mutex<RestartTracker>>,
    channels: HashMap<String, ChannelEntry>,
}

impl ChannelScheduler {
    /// Monitors run under child tokens of `token`; cancelling it stops them all.
    pub fn new(
        ctx: MonitorContext,
        monitor_config: MonitorConfig,
        config: SchedulerConfig,
        token: CancellationToken,
    ) -> Self {
        let tracker = RestartTracker::new(config.restart.clone());
        Self {
            ctx,
            monitor_config,
            config,
            token,
            tracker: Arc::new(Mutex::new(tracker)),
            channels: HashMap::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.ctx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Start monitoring `channel`.
    pub fn add_channel(&mut self, channel: Channel) -> Result<(), SchedulerError> {
        if self.token.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }
        if self.channels.contains_key(&channel.name) {
            return Err(SchedulerError::DuplicateChannel(channel.name));
        }

        let token = self.token.child_token();
        let (state_tx, state_rx) = watch::channel(MonitorState::Idle);
        let sessions = SessionTasks::new();
        let supervisor = Supervisor {
            channel: channel.clone(),
            monitor_config: self.monitor_config.clone(),
            ctx: self.ctx.clone(),
            state: state_tx,
            tracker: Arc::clone(&self.tracker),
            sessions: sessions.clone(),
            token: token.clone(),
        };
        let span = info_span!("channel", channel = %channel.name);
        let task = tokio::spawn(supervisor.run().instrument(span));

        info!(channel = %channel.name, quality = ?channel.quality, "Channel added");
        self.channels.insert(
            channel.name,
            ChannelEntry {
                token,
                state: state_rx,
                sessions,
                task,
            },
        );
        Ok(())
    }

    /// Stop monitoring `name`, finalising its active session first.
    pub async fn remove_channel(&mut self, name: &str) -> Result<(), SchedulerError> {
        let entry = self
            .channels
            .remove(name)
            .ok_or_else(|| SchedulerError::UnknownChannel(name.to_string()))?;
        entry.token.cancel();
        if !stop_within(entry, self.config.shutdown_timeout).await {
            warn!(channel = name, "Monitor did not stop in time; aborted");
        }
        self.tracker.lock().remove(name);
        info!(channel = name, "Channel removed");
        Ok(())
    }

    /// Current state of every monitor, by channel name.
    pub fn channel_states(&self) -> BTreeMap<String, MonitorState> {
        self.channels
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state.borrow().clone()))
            .collect()
    }

    /// Cancel every monitor and wait for them and their sessions, killing those still
    /// running after the shutdown timeout.
    pub async fn shutdown(mut self) -> ShutdownReport {
        let total = self.channels.len();
        info!(
            channels = total,
            timeout_secs = self.config.shutdown_timeout.as_secs(),
            "Shutting down channel monitors"
        );
        self.token.cancel();

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        let mut report = ShutdownReport {
            total,
            ..Default::default()
        };
        for (name, mut entry) in self.channels.drain() {
            let outcome = tokio::time::timeout_at(deadline, &mut entry.task).await;
            match outcome {
                Ok(Ok(())) => report.graceful += 1,
                Ok(Err(e)) => {
                    warn!(channel = %name, error = %e, "Supervisor task failed during shutdown");
                    entry.kill().await;
                    report.forced += 1;
                }
                Err(_) => {
                    warn!(channel = %name, "Shutdown timeout reached; aborting monitor");
                    entry.kill().await;
                    report.forced += 1;
                }
            }
        }

        info!(
            total = report.total,
            graceful = report.graceful,
            forced = report.forced,
            "Shutdown complete"
        );
        report
    }
}

/// Wait for the channel's supervisor up to `timeout`, killing it afterwards. Returns
/// whether it stopped on its own.
async fn stop_within(mut entry: ChannelEntry, timeout: Duration) -> bool {
    let outcome = tokio::time::timeout(timeout, &mut entry.task).await;
    match outcome {
        Ok(_) => true,
        Err(_) => {
            entry.kill().await;
            false
        }
    }
}

/// Restarts a channel's monitor after errors and panics until cancelled.
struct Supervisor {
    channel: Channel,
    monitor_config: MonitorConfig,
    ctx: MonitorContext,
    state: watch::Sender<MonitorState>,
    tracker: Arc<Mutex<RestartTracker>>,
    sessions: SessionTasks,
    token: CancellationToken,
}

impl Supervisor {
    async fn run(self) {
        loop {
            let run_token = self.token.child_token();
            let monitor = LiveMonitor::new(
                self.channel.clone(),
                self.monitor_config.clone(),
                self.ctx.clone(),
            )
            .with_state(self.state.clone())
            .with_sessions(self.sessions.clone());
            let handle = AbortOnDropHandle::new(tokio::spawn(monitor.run(run_token.clone())));
            let outcome = handle.await;

            // Stops any session a failed monitor left behind, and waits for it to settle
            // before a new monitor can pick the broadcast up again.
            run_token.cancel();
            if !self.sessions.is_empty() {
                info!(sessions = self.sessions.len(), "Waiting for orphaned sessions");
            }
            self.sessions.drain().await;

            let reason = match outcome {
                Ok(Ok(())) => {
                    debug!("Monitor stopped");
                    break;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) if e.is_panic() => "monitor panicked".to_string(),
                Err(e) => e.to_string(),
            };
            self.state.send_replace(MonitorState::Idle);

            if self.token.is_cancelled() {
                break;
            }
            let backoff = self.tracker.lock().record_failure(&self.channel.name);
            error!(
                error = %reason,
                restart_in_ms = backoff.as_millis() as u64,
                "Monitor failed; restarting"
            );
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}
