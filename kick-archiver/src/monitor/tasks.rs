//! Bookkeeping for session tasks that can outlive the monitor that spawned them.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Download session tasks of one channel.
///
/// A monitor that panics or is aborted leaves its session running. The channel's
/// supervisor [`drain`](Self::drain)s them before it starts a new monitor, so the new
/// one never races an old session for the same files.
#[derive(Debug, Clone, Default)]
pub struct SessionTasks {
    tracker: TaskTracker,
    kill: CancellationToken,
}

impl SessionTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task`. The handle yields `None` when the task was dropped by [`kill`](Self::kill).
    pub fn spawn<F>(&self, task: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let kill = self.kill.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = kill.cancelled() => None,
                output = task => Some(output),
            }
        })
    }

    /// Number of tasks still running.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Wait until every task spawned so far has exited.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Drop every running task at its next await point, now and for later spawns.
    pub fn kill(&self) {
        self.kill.cancel();
    }
}
