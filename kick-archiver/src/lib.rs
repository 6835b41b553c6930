//! Watches Kick channels and archives each live broadcast as an audio file.
//!
//! A [`scheduler::ChannelScheduler`] runs one [`monitor::LiveMonitor`] per channel.
//! Monitors poll a [`source::PlaylistSource`] and drive `hls_capture` download
//! sessions while the channel is live.

pub mod config;
pub mod error;
pub mod fetch;
pub mod history;
pub mod logging;
pub mod monitor;
pub mod panic_hook;
pub mod scheduler;
pub mod source;
pub mod utils;

pub use error::{ConfigError, Error, PlaylistError, Result, SchedulerError};
