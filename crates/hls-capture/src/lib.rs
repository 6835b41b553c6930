//! Ordered, resumable HLS capture.
//!
//! A [`DownloadSession`] drives a [`SegmentFetcher`] over a playlist, writes the
//! segments to a media file strictly in media sequence order, journals each append
//! for resume, and hands the finished file to a [`Transcoder`].

pub mod config;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod journal;
pub mod playlist;
pub mod registry;
pub mod reorder;
pub mod retry;
pub mod session;
pub mod transcode;

pub use config::{HttpConfig, SessionConfig, TranscodeConfig};
pub use error::{FetchError, SessionError, TranscodeError};
pub use fetcher::{HttpSegmentFetcher, SegmentFetcher};
pub use playlist::{PlaylistHandle, ResolvedPlaylist, SegmentRef, Variant};
pub use registry::OutputRegistry;
pub use retry::RetryPolicy;
pub use session::{
    DownloadSession, RefreshOutcome, SegmentGap, SessionMode, SessionReport, SessionStatus,
    SessionTarget,
};
pub use transcode::{AudioFormat, FfmpegTranscoder, Transcoder};
