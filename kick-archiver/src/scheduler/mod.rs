//! Supervision of one [`LiveMonitor`](crate::monitor::LiveMonitor) per channel.

mod restart_tracker;
mod service;

pub use restart_tracker::{RestartTracker, RestartTrackerConfig};
pub use service::{ChannelScheduler, SchedulerConfig, ShutdownReport};
