//! One acquisition of an HLS playlist into a local media file.
//!
//! ```text
//! pending ──start──▶ downloading ──finish──▶ completed
//!    │                  │    │
//!    │                  │    └──no new segments for stall_timeout──▶ stalled ──finish──▶ completed
//!    └──abort──────────▶└──segment lost (static) / io error / abort──▶ failed
//! ```
//!
//! Segments are fetched concurrently but only ever appended in ascending index
//! order through a [`ReorderBuffer`]. Every append is journaled, so a session
//! reopened on the same media path continues after the last written segment.

use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{FetchError, SessionError};
use crate::fetcher::SegmentFetcher;
use crate::journal::{JournalEntry, SegmentWriter, journal_path};
use crate::playlist::{PlaylistHandle, ResolvedPlaylist, SegmentRef};
use crate::registry::{OutputClaim, OutputRegistry};
use crate::reorder::{PushOutcome, ReorderBuffer};
use crate::transcode::Transcoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// A finished recording; every segment must be captured.
    Static,
    /// A growing playlist; unobtainable segments are skipped.
    Live,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => f.write_str("static"),
            Self::Live => f.write_str("live"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Downloading,
    Stalled,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Pending, Failed)
                | (Downloading, Stalled)
                | (Downloading, Completed)
                | (Downloading, Failed)
                | (Stalled, Completed)
                | (Stalled, Failed)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Stalled => "stalled",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Where a session writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub media_path: PathBuf,
    /// Final audio file; `None` disables transcoding for this session.
    pub audio_path: Option<PathBuf>,
}

impl SessionTarget {
    pub fn new(media_path: impl Into<PathBuf>) -> Self {
        Self {
            media_path: media_path.into(),
            audio_path: None,
        }
    }

    pub fn with_audio(mut self, audio_path: impl Into<PathBuf>) -> Self {
        self.audio_path = Some(audio_path.into());
        self
    }
}

/// Inclusive range of segment indices that never made it into the media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentGap {
    pub first: u64,
    pub last: u64,
}

impl SegmentGap {
    /// Number of indices covered.
    pub fn count(&self) -> u64 {
        self.last - self.first + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New segments were written.
    Appended(usize),
    /// Nothing new yet.
    Idle,
    /// The live edge stopped advancing; treat as end of stream.
    Stalled,
}

/// Summary produced when a session is finished or aborted.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub id: Uuid,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub media_path: PathBuf,
    /// Set only when transcoding succeeded.
    pub audio_path: Option<PathBuf>,
    pub segments_written: usize,
    pub bytes_written: u64,
    pub last_index: Option<u64>,
    pub gaps: Vec<SegmentGap>,
    pub transcode_error: Option<String>,
    /// Ended before the stream did. The media file and journal stay in place for resume.
    pub interrupted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

type Fetched = (SegmentRef, Bytes);

enum Next<T> {
    Item(T),
    Done,
    Elapsed,
}

async fn next_within<S>(stream: &mut S, limit: Option<Duration>) -> Next<S::Item>
where
    S: Stream + Unpin,
{
    match limit {
        None => stream.next().await.map_or(Next::Done, Next::Item),
        Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
            Ok(Some(item)) => Next::Item(item),
            Ok(None) => Next::Done,
            Err(_) => Next::Elapsed,
        },
    }
}

pub struct DownloadSession {
    id: Uuid,
    mode: SessionMode,
    status: SessionStatus,
    config: SessionConfig,
    target: SessionTarget,
    fetcher: Arc<dyn SegmentFetcher>,
    transcoder: Option<Arc<dyn Transcoder>>,
    token: CancellationToken,
    _claim: OutputClaim,
    playlist: Option<PlaylistHandle>,
    writer: Option<SegmentWriter>,
    cursor: Option<ReorderBuffer<Fetched>>,
    gaps: Vec<SegmentGap>,
    highest_seen: Option<u64>,
    last_advance: Instant,
    verified: bool,
    snapshot: Option<Progress>,
    interrupted: bool,
    started_at: DateTime<Utc>,
}

impl fmt::Debug for DownloadSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadSession")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("status", &self.status)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl DownloadSession {
    /// Create a pending session, claiming `target.media_path` in `registry`.
    pub fn new(
        mode: SessionMode,
        target: SessionTarget,
        config: SessionConfig,
        fetcher: Arc<dyn SegmentFetcher>,
        registry: &OutputRegistry,
    ) -> Result<Self, SessionError> {
        let claim = registry.claim(&target.media_path)?;
        Ok(Self {
            id: Uuid::new_v4(),
            mode,
            status: SessionStatus::Pending,
            config,
            target,
            fetcher,
            transcoder: None,
            token: CancellationToken::new(),
            _claim: claim,
            playlist: None,
            writer: None,
            cursor: None,
            gaps: Vec::new(),
            highest_seen: None,
            last_advance: Instant::now(),
            verified: false,
            snapshot: None,
            interrupted: false,
            started_at: Utc::now(),
        })
    }

    pub fn with_transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    /// Tie network waits of this session to `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    /// The negotiated playlist, once started.
    pub fn playlist(&self) -> Option<&PlaylistHandle> {
        self.playlist.as_ref()
    }

    pub fn last_written_index(&self) -> Option<u64> {
        self.writer.as_ref().and_then(SegmentWriter::last_index)
    }

    /// Segments in the media file, in file order.
    pub fn written(&self) -> &[JournalEntry] {
        self.writer.as_ref().map(|w| w.entries()).unwrap_or_default()
    }

    pub fn gaps(&self) -> &[SegmentGap] {
        &self.gaps
    }

    /// `pending → downloading`: negotiate quality, resolve the playlist and write
    /// every listed segment not already on disk. Returns the number appended.
    #[instrument(skip_all, fields(session = %self.id, mode = %self.mode))]
    pub async fn start(&mut self, playlist: PlaylistHandle) -> Result<usize, SessionError> {
        self.transition(SessionStatus::Downloading)?;
        let playlist = playlist.select_quality(&self.config.quality);
        info!(
            url = %playlist.url(),
            quality = playlist.selected_label().unwrap_or_default(),
            media = %self.target.media_path.display(),
            "Starting download session"
        );

        let writer = SegmentWriter::open(&self.target.media_path).await;
        let writer = self.settle(writer)?;
        self.writer = Some(writer);
        self.last_advance = Instant::now();

        let resolved = self.resolve(&playlist).await;
        self.playlist = Some(playlist);
        let resolved = self.settle(resolved.map_err(SessionError::from))?;
        let appended = self.ingest(resolved).await;
        self.settle(appended)
    }

    /// Re-resolve a live playlist and append segments beyond the last written index.
    ///
    /// A shortened playlist never rewinds the session. Failing to reach the playlist
    /// is not fatal; it simply counts as no progress towards the stall timeout.
    #[instrument(skip_all, fields(session = %self.id))]
    pub async fn refresh(&mut self, playlist: &PlaylistHandle) -> Result<RefreshOutcome, SessionError> {
        if self.status != SessionStatus::Downloading {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                to: SessionStatus::Downloading,
            });
        }

        let playlist = self.renegotiate(playlist);
        let before = self.highest_seen;
        let mut appended = 0;

        match self.resolve(&playlist).await {
            Ok(resolved) => {
                if resolved.ended && self.mode == SessionMode::Live {
                    debug!("Playlist carries ENDLIST; waiting for the stall timeout instead");
                }
                let result = self.ingest(resolved).await;
                appended = self.settle(result)?;
            }
            Err(FetchError::Cancelled) => return Err(SessionError::Cancelled),
            Err(e) => warn!(error = %e, "Playlist refresh failed"),
        }
        self.playlist = Some(playlist);

        let advanced = self.highest_seen != before;
        if !advanced
            && self.mode == SessionMode::Live
            && self.last_advance.elapsed() >= self.config.stall_timeout
        {
            self.transition(SessionStatus::Stalled)?;
            info!(
                idle_secs = self.last_advance.elapsed().as_secs(),
                last_index = ?self.last_written_index(),
                "Live edge stopped advancing; session stalled"
            );
            return Ok(RefreshOutcome::Stalled);
        }

        Ok(if appended > 0 {
            RefreshOutcome::Appended(appended)
        } else {
            RefreshOutcome::Idle
        })
    }

    /// Complete the session and hand the media file to the transcoder.
    ///
    /// A failed session is reported as-is and never transcoded. A transcoding
    /// failure leaves the session completed and the media file in place.
    #[instrument(skip_all, fields(session = %self.id))]
    pub async fn finish(self) -> Result<SessionReport, SessionError> {
        self.complete().await
    }

    /// Finish a session cut short by shutdown.
    ///
    /// Behaves like [`finish`](Self::finish), except that the media file and its journal
    /// are never deleted and the report is flagged `interrupted`, so a later session for
    /// the same output resumes where this one stopped.
    #[instrument(skip_all, fields(session = %self.id))]
    pub async fn finish_interrupted(mut self) -> Result<SessionReport, SessionError> {
        self.interrupted = true;
        self.complete().await
    }

    async fn complete(mut self) -> Result<SessionReport, SessionError> {
        match self.status {
            SessionStatus::Failed => {
                self.close().await;
                return Ok(self.report(None, None));
            }
            SessionStatus::Downloading | SessionStatus::Stalled => {}
            from => {
                return Err(SessionError::InvalidTransition {
                    from,
                    to: SessionStatus::Completed,
                });
            }
        }

        self.close().await;
        self.transition(SessionStatus::Completed)?;
        info!(
            segments = self.written().len(),
            gaps = self.gaps.len(),
            media = %self.target.media_path.display(),
            "Download session completed"
        );

        let (audio_path, transcode_error) = self.transcode().await;
        Ok(self.report(audio_path, transcode_error))
    }

    /// Stop without finalising. The partial media file and journal are kept.
    pub async fn abort(mut self) -> SessionReport {
        if !self.status.is_terminal() {
            self.status = SessionStatus::Failed;
        }
        self.interrupted = true;
        self.close().await;
        info!(
            session = %self.id,
            segments = self.written().len(),
            media = %self.target.media_path.display(),
            "Download session aborted; partial media kept"
        );
        self.report(None, None)
    }

    fn transition(&mut self, next: SessionStatus) -> Result<(), SessionError> {
        if !self.status.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        debug!(session = %self.id, from = %self.status, to = %next, "Session state change");
        self.status = next;
        Ok(())
    }

    /// Mark the session failed on any error except cancellation, which leaves the
    /// session open for `finish` or `abort`.
    fn settle<T>(&mut self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        if let Err(e) = &result
            && !matches!(e, SessionError::Cancelled)
            && !self.status.is_terminal()
        {
            error!(session = %self.id, error = %e, "Download session failed");
            self.status = SessionStatus::Failed;
        }
        result
    }

    /// Keep following the variant the session started on when it is still offered.
    fn renegotiate(&self, playlist: &PlaylistHandle) -> PlaylistHandle {
        let mut preferences: Vec<String> = self
            .playlist
            .as_ref()
            .and_then(|p| p.selected_label())
            .map(|label| vec![label.to_string()])
            .unwrap_or_default();
        preferences.extend(self.config.quality.iter().cloned());
        playlist.select_quality(&preferences)
    }

    async fn resolve(&self, playlist: &PlaylistHandle) -> Result<ResolvedPlaylist, FetchError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(FetchError::Cancelled),
            resolved = self.fetcher.resolve(playlist, &self.token) => resolved,
        }
    }

    fn writer_mut(&mut self) -> Result<&mut SegmentWriter, SessionError> {
        let status = self.status;
        self.writer
            .as_mut()
            .ok_or(SessionError::InvalidTransition {
                from: status,
                to: SessionStatus::Downloading,
            })
    }

    async fn ingest(&mut self, resolved: ResolvedPlaylist) -> Result<usize, SessionError> {
        let (Some(first), Some(last)) = (resolved.first_index(), resolved.last_index()) else {
            debug!("Playlist lists no segments");
            return Ok(0);
        };

        if self.highest_seen.is_none_or(|seen| last > seen) {
            self.highest_seen = Some(last);
            self.last_advance = Instant::now();
        }

        if !self.verified {
            self.verify_existing(&resolved).await?;
            self.verified = true;
        }

        let resume_at = self.writer_mut()?.last_index().map(|i| i + 1);
        let cursor = self
            .cursor
            .get_or_insert_with(|| ReorderBuffer::new(resume_at.unwrap_or(first)));

        if let Some(passed) = cursor.fast_forward(first) {
            let gap = SegmentGap {
                first: passed.start,
                last: passed.end - 1,
            };
            if self.mode == SessionMode::Static {
                return Err(SessionError::SegmentLost {
                    index: gap.first,
                    source: FetchError::exhausted(0, "segment is no longer listed"),
                });
            }
            warn!(
                first = gap.first,
                last = gap.last,
                "Segments rotated out of the playlist before they were fetched"
            );
            self.record_gap(gap);
        }

        let next = self.cursor.as_ref().map_or(first, ReorderBuffer::next_expected);
        let pending: Vec<SegmentRef> = resolved
            .segments
            .into_iter()
            .filter(|s| s.index >= next)
            .collect();
        self.pull(pending).await
    }

    /// Compare journal entries with the lengths the playlist states and drop
    /// everything from the first mismatch on.
    async fn verify_existing(&mut self, resolved: &ResolvedPlaylist) -> Result<(), SessionError> {
        let writer = self.writer_mut()?;
        let mismatch = resolved.segments.iter().find_map(|segment| {
            let hint = segment.length_hint?;
            let entry = writer.entry(segment.index)?;
            (entry.length != hint).then_some((segment.index, entry.length, hint))
        });

        if let Some((index, on_disk, expected)) = mismatch {
            let removed = writer.truncate_from(index).await?;
            warn!(
                index,
                on_disk,
                expected,
                removed,
                "Segment on disk does not match the playlist; refetching from it"
            );
        }
        Ok(())
    }

    async fn pull(&mut self, pending: Vec<SegmentRef>) -> Result<usize, SessionError> {
        if pending.is_empty() {
            return Ok(0);
        }
        debug!(
            count = pending.len(),
            first = pending[0].index,
            "Fetching segments"
        );

        let fetcher = Arc::clone(&self.fetcher);
        let token = self.token.clone();
        let mut results = pin!(
            futures::stream::iter(pending)
                .map(move |segment| {
                    let fetcher = Arc::clone(&fetcher);
                    let token = token.clone();
                    async move {
                        let result = fetcher.fetch(&segment, &token).await;
                        (segment, result)
                    }
                })
                .buffer_unordered(self.config.max_concurrent_fetches.max(1))
        );

        let mut appended = 0;
        let mut lost: Option<(u64, FetchError)> = None;

        loop {
            let next_expected = self.cursor.as_ref().map(ReorderBuffer::next_expected);
            if let (Some((index, _)), Some(next)) = (&lost, next_expected)
                && next >= *index
            {
                break;
            }

            let wait = self.blocked_wait();
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(SessionError::Cancelled),
                next = next_within(&mut results, wait) => next,
            };

            match next {
                Next::Done => break,
                Next::Elapsed => {
                    if let Some(index) = next_expected {
                        warn!(
                            index,
                            wait_secs = self.config.segment_wait_timeout.as_secs(),
                            "Gave up waiting for segment"
                        );
                        self.skip(index);
                    }
                }
                Next::Item((segment, Ok(data))) => {
                    let index = segment.index;
                    if let Some(cursor) = self.cursor.as_mut()
                        && cursor.push(index, (segment, data)) == PushOutcome::Stale
                    {
                        debug!(index, "Dropping late segment");
                    }
                }
                Next::Item((_, Err(FetchError::Cancelled))) => return Err(SessionError::Cancelled),
                Next::Item((segment, Err(e))) => match self.mode {
                    SessionMode::Live => {
                        warn!(index = segment.index, error = %e, "Skipping segment that could not be fetched");
                        self.skip(segment.index);
                    }
                    SessionMode::Static => {
                        error!(index = segment.index, error = %e, "Segment could not be fetched");
                        if lost.as_ref().is_none_or(|(index, _)| segment.index < *index) {
                            lost = Some((segment.index, e));
                        }
                    }
                },
            }

            appended += self.write_ready().await?;
        }

        if let Some((index, source)) = lost {
            return Err(SessionError::SegmentLost { index, source });
        }
        Ok(appended)
    }

    /// Remaining time a live session keeps waiting for the blocking segment.
    fn blocked_wait(&self) -> Option<Duration> {
        if self.mode != SessionMode::Live {
            return None;
        }
        let gap = self.cursor.as_ref()?.gap()?;
        Some(self.config.segment_wait_timeout.saturating_sub(gap.elapsed()))
    }

    fn skip(&mut self, index: u64) {
        if let Some(cursor) = self.cursor.as_mut()
            && cursor.skip(index)
        {
            self.record_gap(SegmentGap {
                first: index,
                last: index,
            });
        }
    }

    fn record_gap(&mut self, gap: SegmentGap) {
        self.gaps.push(gap);
        self.gaps.sort_by_key(|g| g.first);
        let mut merged: Vec<SegmentGap> = Vec::with_capacity(self.gaps.len());
        for gap in self.gaps.drain(..) {
            match merged.last_mut() {
                Some(previous) if gap.first <= previous.last + 1 => {
                    previous.last = previous.last.max(gap.last);
                }
                _ => merged.push(gap),
            }
        }
        self.gaps = merged;
    }

    async fn write_ready(&mut self) -> Result<usize, SessionError> {
        let mut written = 0;
        while let Some((index, (segment, data))) = self.cursor.as_mut().and_then(ReorderBuffer::pop_ready) {
            let writer = self.writer_mut()?;
            writer.append(index, segment.url.as_str(), &data).await?;
            written += 1;
            debug!(index, size = data.len(), "Segment written");
        }
        Ok(written)
    }

    async fn close(&mut self) {
        if let Some(writer) = self.writer.as_mut()
            && let Err(e) = writer.sync().await
        {
            warn!(session = %self.id, error = %e, "Failed to sync media file");
        }
    }

    async fn transcode(&mut self) -> (Option<PathBuf>, Option<String>) {
        let transcode = self.config.transcode.clone();
        let (Some(transcoder), Some(audio_path)) =
            (self.transcoder.clone(), self.target.audio_path.clone())
        else {
            return (None, None);
        };
        if !transcode.enabled {
            return (None, None);
        }
        if self.written().is_empty() {
            warn!(session = %self.id, "No segments were written; skipping transcode");
            return (None, None);
        }

        // Release the file handles before another process reads the media file.
        let snapshot = self.progress();
        self.writer = None;
        self.snapshot = Some(snapshot);

        let media_path = self.target.media_path.clone();
        match transcoder
            .convert(&media_path, &audio_path, transcode.format)
            .await
        {
            Ok(()) => {
                if transcode.delete_original && !self.interrupted {
                    remove_media(&media_path, &audio_path).await;
                }
                (Some(audio_path), None)
            }
            Err(e) => {
                error!(
                    session = %self.id,
                    error = %e,
                    media = %media_path.display(),
                    "Transcode failed; media file retained"
                );
                (None, Some(e.to_string()))
            }
        }
    }

    fn progress(&self) -> Progress {
        let written = self.written();
        Progress {
            segments: written.len(),
            bytes: written.last().map(JournalEntry::end).unwrap_or(0),
            last_index: written.last().map(|e| e.index),
        }
    }

    fn report(&self, audio_path: Option<PathBuf>, transcode_error: Option<String>) -> SessionReport {
        let progress = self.snapshot.unwrap_or_else(|| self.progress());
        SessionReport {
            id: self.id,
            mode: self.mode,
            status: self.status,
            media_path: self.target.media_path.clone(),
            audio_path,
            segments_written: progress.segments,
            bytes_written: progress.bytes,
            last_index: progress.last_index,
            gaps: self.gaps.clone(),
            transcode_error,
            interrupted: self.interrupted,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    segments: usize,
    bytes: u64,
    last_index: Option<u64>,
}

/// Delete the media file and its journal, and the work directory when it is
/// dedicated to this media file.
async fn remove_media(media_path: &Path, audio_path: &Path) {
    for path in [media_path.to_path_buf(), journal_path(media_path)] {
        if let Err(e) = tokio::fs::remove_file(&path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %e, "Failed to delete original media");
        }
    }
    if let Some(dir) = media_path.parent()
        && Some(dir) != audio_path.parent()
        && tokio::fs::remove_dir(dir).await.is_ok()
    {
        debug!(dir = %dir.display(), "Removed work directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SessionStatus::Pending, SessionStatus::Downloading, true)]
    #[case(SessionStatus::Pending, SessionStatus::Failed, true)]
    #[case(SessionStatus::Pending, SessionStatus::Completed, false)]
    #[case(SessionStatus::Downloading, SessionStatus::Stalled, true)]
    #[case(SessionStatus::Downloading, SessionStatus::Completed, true)]
    #[case(SessionStatus::Stalled, SessionStatus::Completed, true)]
    #[case(SessionStatus::Stalled, SessionStatus::Downloading, false)]
    #[case(SessionStatus::Completed, SessionStatus::Downloading, false)]
    #[case(SessionStatus::Failed, SessionStatus::Completed, false)]
    fn transitions(#[case] from: SessionStatus, #[case] to: SessionStatus, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn status_display_is_lowercase() {
        assert_eq!(SessionStatus::Stalled.to_string(), "stalled");
        assert_eq!(SessionMode::Live.to_string(), "live");
    }

    #[test]
    fn gap_length() {
        assert_eq!(SegmentGap { first: 5, last: 5 }.count(), 1);
        assert_eq!(SegmentGap { first: 3, last: 9 }.count(), 7);
    }
}
