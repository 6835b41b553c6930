//! Append-only media writer with a JSON-lines journal for resume.
//!
//! Every segment appended to the media file is recorded as one journal line
//! `{"index":..,"offset":..,"length":..,"url":..}`. Media bytes are written before the
//! journal line, so after a crash the journal never references bytes that are not on
//! disk. On open, the media file is truncated to the end of the last valid entry.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub index: u64,
    pub offset: u64,
    pub length: u64,
    pub url: String,
}

impl JournalEntry {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Path of the journal that accompanies `media_path`.
pub fn journal_path(media_path: &Path) -> PathBuf {
    let mut name = media_path.file_name().unwrap_or_default().to_os_string();
    name.push(".journal");
    media_path.with_file_name(name)
}

pub struct SegmentWriter {
    media_path: PathBuf,
    journal_path: PathBuf,
    media: File,
    journal: File,
    entries: Vec<JournalEntry>,
}

impl std::fmt::Debug for SegmentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentWriter")
            .field("media_path", &self.media_path)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl SegmentWriter {
    /// Open (or create) the media file and its journal, recovering the longest
    /// consistent prefix from a previous run.
    pub async fn open(media_path: &Path) -> Result<Self, SessionError> {
        if let Some(parent) = media_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SessionError::io("creating", parent, e))?;
        }

        let journal_path = journal_path(media_path);
        let media_len = match tokio::fs::metadata(media_path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(SessionError::io("inspecting", media_path, e)),
        };
        let raw = match tokio::fs::read_to_string(&journal_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(SessionError::io("reading", &journal_path, e)),
        };

        let (entries, dropped_lines) = recover_entries(&raw, media_len);
        let consistent_end = entries.last().map(JournalEntry::end).unwrap_or(0);

        let media = OpenOptions::new()
            .create(true)
            .append(true)
            .open(media_path)
            .await
            .map_err(|e| SessionError::io("opening", media_path, e))?;
        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)
            .await
            .map_err(|e| SessionError::io("opening", &journal_path, e))?;

        let mut writer = Self {
            media_path: media_path.to_path_buf(),
            journal_path,
            media,
            journal,
            entries,
        };

        if media_len != consistent_end {
            debug!(
                path = %writer.media_path.display(),
                from = media_len,
                to = consistent_end,
                "Truncating media file to journal end"
            );
            writer
                .media
                .set_len(consistent_end)
                .await
                .map_err(|e| SessionError::io("truncating", &writer.media_path, e))?;
        }
        if dropped_lines > 0 {
            warn!(
                path = %writer.journal_path.display(),
                dropped = dropped_lines,
                "Discarded unusable journal lines"
            );
            writer.rewrite_journal().await?;
        }
        if !writer.entries.is_empty() {
            info!(
                path = %writer.media_path.display(),
                segments = writer.entries.len(),
                bytes = consistent_end,
                "Resuming from existing media file"
            );
        }

        Ok(writer)
    }

    pub fn media_path(&self) -> &Path {
        &self.media_path
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn entry(&self, index: u64) -> Option<&JournalEntry> {
        self.entries
            .binary_search_by_key(&index, |e| e.index)
            .ok()
            .map(|pos| &self.entries[pos])
    }

    pub fn last_index(&self) -> Option<u64> {
        self.entries.last().map(|e| e.index)
    }

    pub fn bytes_written(&self) -> u64 {
        self.entries.last().map(JournalEntry::end).unwrap_or(0)
    }

    /// Append one segment. `index` must be greater than every recorded index.
    pub async fn append(
        &mut self,
        index: u64,
        url: &str,
        data: &[u8],
    ) -> Result<&JournalEntry, SessionError> {
        if let Some(last) = self.last_index()
            && index <= last
        {
            return Err(SessionError::Journal {
                path: self.journal_path.clone(),
                reason: format!("segment {index} appended after {last}"),
            });
        }

        let entry = JournalEntry {
            index,
            offset: self.bytes_written(),
            length: data.len() as u64,
            url: url.to_string(),
        };

        self.media
            .write_all(data)
            .await
            .map_err(|e| SessionError::io("writing", &self.media_path, e))?;
        self.media
            .flush()
            .await
            .map_err(|e| SessionError::io("flushing", &self.media_path, e))?;

        let line = journal_line(&entry, &self.journal_path)?;
        self.journal
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SessionError::io("writing", &self.journal_path, e))?;
        self.journal
            .flush()
            .await
            .map_err(|e| SessionError::io("flushing", &self.journal_path, e))?;

        self.entries.push(entry);
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// Forget `index` and everything after it, shrinking the media file accordingly.
    pub async fn truncate_from(&mut self, index: u64) -> Result<usize, SessionError> {
        let keep = self.entries.partition_point(|e| e.index < index);
        let removed = self.entries.len() - keep;
        if removed == 0 {
            return Ok(0);
        }
        self.entries.truncate(keep);
        self.media
            .set_len(self.bytes_written())
            .await
            .map_err(|e| SessionError::io("truncating", &self.media_path, e))?;
        self.rewrite_journal().await?;
        Ok(removed)
    }

    /// Flush both files to disk.
    pub async fn sync(&mut self) -> Result<(), SessionError> {
        self.media
            .sync_all()
            .await
            .map_err(|e| SessionError::io("syncing", &self.media_path, e))?;
        self.journal
            .sync_all()
            .await
            .map_err(|e| SessionError::io("syncing", &self.journal_path, e))
    }

    async fn rewrite_journal(&mut self) -> Result<(), SessionError> {
        let mut contents = String::new();
        for entry in &self.entries {
            contents.push_str(&journal_line(entry, &self.journal_path)?);
        }
        self.journal
            .set_len(0)
            .await
            .map_err(|e| SessionError::io("truncating", &self.journal_path, e))?;
        self.journal
            .write_all(contents.as_bytes())
            .await
            .map_err(|e| SessionError::io("writing", &self.journal_path, e))?;
        self.journal
            .flush()
            .await
            .map_err(|e| SessionError::io("flushing", &self.journal_path, e))
    }
}

fn journal_line(entry: &JournalEntry, path: &Path) -> Result<String, SessionError> {
    let mut line = serde_json::to_string(entry).map_err(|e| SessionError::Journal {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    line.push('\n');
    Ok(line)
}

/// Keep the longest prefix of journal lines that parse, are strictly ascending,
/// are contiguous on disk and fit in a media file of `media_len` bytes.
fn recover_entries(raw: &str, media_len: u64) -> (Vec<JournalEntry>, usize) {
    let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut entries: Vec<JournalEntry> = Vec::with_capacity(lines.len());

    for line in &lines {
        let Ok(entry) = serde_json::from_str::<JournalEntry>(line) else {
            break;
        };
        let expected_offset = entries.last().map(JournalEntry::end).unwrap_or(0);
        let ascending = entries.last().is_none_or(|last| entry.index > last.index);
        if !ascending || entry.offset != expected_offset || entry.end() > media_len {
            break;
        }
        entries.push(entry);
    }

    let dropped = lines.len() - entries.len();
    (entries, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_and_recovers_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("work").join("show.ts");

        let mut writer = SegmentWriter::open(&media).await.unwrap();
        writer.append(7, "https://a/7.ts", b"seven").await.unwrap();
        writer.append(8, "https://a/8.ts", b"eight!").await.unwrap();
        drop(writer);

        let writer = SegmentWriter::open(&media).await.unwrap();
        assert_eq!(writer.last_index(), Some(8));
        assert_eq!(writer.bytes_written(), 11);
        assert_eq!(writer.entry(8).map(|e| e.offset), Some(5));
        assert_eq!(tokio::fs::read(&media).await.unwrap(), b"seveneight!");
    }

    #[tokio::test]
    async fn torn_write_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("show.ts");

        let mut writer = SegmentWriter::open(&media).await.unwrap();
        writer.append(1, "u1", b"aaaa").await.unwrap();
        drop(writer);

        // Media bytes of a second segment landed, its journal line did not, and the
        // journal ends with half a line.
        let mut raw = tokio::fs::read_to_string(journal_path(&media)).await.unwrap();
        raw.push_str("{\"index\":2,\"off");
        tokio::fs::write(journal_path(&media), raw).await.unwrap();
        let mut bytes = tokio::fs::read(&media).await.unwrap();
        bytes.extend_from_slice(b"bbbb");
        tokio::fs::write(&media, bytes).await.unwrap();

        let writer = SegmentWriter::open(&media).await.unwrap();
        assert_eq!(writer.entries().len(), 1);
        assert_eq!(tokio::fs::read(&media).await.unwrap(), b"aaaa");
        let journal = tokio::fs::read_to_string(journal_path(&media)).await.unwrap();
        assert_eq!(journal.lines().count(), 1);
    }

    #[tokio::test]
    async fn journal_pointing_past_media_end_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("show.ts");

        let mut writer = SegmentWriter::open(&media).await.unwrap();
        writer.append(1, "u1", b"aaaa").await.unwrap();
        writer.append(2, "u2", b"bbbb").await.unwrap();
        drop(writer);
        tokio::fs::write(&media, b"aaaab").await.unwrap();

        let writer = SegmentWriter::open(&media).await.unwrap();
        assert_eq!(writer.last_index(), Some(1));
        assert_eq!(tokio::fs::read(&media).await.unwrap(), b"aaaa");
    }

    #[tokio::test]
    async fn truncate_from_rewinds_file_and_journal() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("show.ts");

        let mut writer = SegmentWriter::open(&media).await.unwrap();
        for index in 1..=4u64 {
            writer.append(index, "u", b"xx").await.unwrap();
        }
        assert_eq!(writer.truncate_from(3).await.unwrap(), 2);
        writer.append(3, "u", b"yyy").await.unwrap();
        drop(writer);

        let writer = SegmentWriter::open(&media).await.unwrap();
        assert_eq!(writer.last_index(), Some(3));
        assert_eq!(tokio::fs::read(&media).await.unwrap(), b"xxxxyyy");
    }

    #[tokio::test]
    async fn rejects_out_of_order_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SegmentWriter::open(&dir.path().join("show.ts")).await.unwrap();
        writer.append(5, "u", b"x").await.unwrap();
        assert!(matches!(
            writer.append(5, "u", b"x").await,
            Err(SessionError::Journal { .. })
        ));
        assert!(writer.append(4, "u", b"x").await.is_err());
    }

    #[test]
    fn journal_path_appends_suffix() {
        assert_eq!(
            journal_path(Path::new("/tmp/a/show.ts")),
            PathBuf::from("/tmp/a/show.ts.journal")
        );
    }
}
