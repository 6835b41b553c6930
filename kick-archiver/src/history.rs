//! Archive history: which live sessions of each channel were already archived.
//!
//! Persisted as `{output_dir}/_state.json`, a map of channel to the identities of its
//! archived sessions, oldest first. The file is replaced atomically on every change.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::HistoryError;

pub const HISTORY_FILE: &str = "_state.json";

/// Identities kept per channel.
pub const HISTORY_RETENTION: usize = 200;

type Entries = BTreeMap<String, Vec<String>>;

#[derive(Debug)]
pub struct ArchiveHistory {
    path: PathBuf,
    entries: Mutex<Entries>,
    /// Serializes file replacement so an older snapshot never lands last.
    write_lock: tokio::sync::Mutex<()>,
}

impl ArchiveHistory {
    /// Load `{output_dir}/_state.json`. A missing or unreadable file starts empty.
    pub async fn load(output_dir: &Path) -> Self {
        let path = output_dir.join(HISTORY_FILE);
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => parse_entries(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable archive history");
                Entries::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Entries::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read archive history");
                Entries::new()
            }
        };
        debug!(
            path = %path.display(),
            channels = entries.len(),
            "Archive history loaded"
        );

        Self {
            path,
            entries: Mutex::new(entries),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, channel: &str, identity: &str) -> bool {
        self.entries
            .lock()
            .get(channel)
            .is_some_and(|ids| ids.iter().any(|id| id == identity))
    }

    /// Archived identities of `channel`, oldest first.
    pub fn channel(&self, channel: &str) -> Vec<String> {
        self.entries.lock().get(channel).cloned().unwrap_or_default()
    }

    /// Record `identity` as archived and persist. Returns false when it already was.
    pub async fn record(&self, channel: &str, identity: &str) -> Result<bool, HistoryError> {
        let _guard = self.write_lock.lock().await;

        let snapshot = {
            let mut entries = self.entries.lock();
            let ids = entries.entry(channel.to_string()).or_default();
            if ids.iter().any(|id| id == identity) {
                return Ok(false);
            }
            ids.push(identity.to_string());
            if ids.len() > HISTORY_RETENTION {
                let excess = ids.len() - HISTORY_RETENTION;
                ids.drain(..excess);
            }
            serde_json::to_string_pretty(&*entries)?
        };

        self.persist(&snapshot).await?;
        debug!(channel, identity, "Recorded archived session");
        Ok(true)
    }

    async fn persist(&self, json: &str) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error("creating", parent))?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, json)
            .await
            .map_err(io_error("writing", &temp_path))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(io_error("replacing", &self.path))
    }
}

fn io_error(op: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> HistoryError {
    let path = path.to_path_buf();
    move |source| HistoryError::Io { op, path, source }
}

/// Accept a list or a single string per channel; drop non-strings and duplicates,
/// keep the newest [`HISTORY_RETENTION`].
fn parse_entries(raw: &str) -> Result<Entries, serde_json::Error> {
    let value: BTreeMap<String, serde_json::Value> = serde_json::from_str(raw)?;
    Ok(value
        .into_iter()
        .map(|(channel, history)| (channel, normalize(history)))
        .collect())
}

fn normalize(history: serde_json::Value) -> Vec<String> {
    let values = match history {
        serde_json::Value::Array(items) => items,
        single @ serde_json::Value::String(_) => vec![single],
        _ => Vec::new(),
    };

    let mut seen = HashSet::new();
    let mut ordered: Vec<String> = values
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) => Some(s),
            _ => None,
        })
        .filter(|s| seen.insert(s.clone()))
        .collect();
    if ordered.len() > HISTORY_RETENTION {
        ordered.drain(..ordered.len() - HISTORY_RETENTION);
    }
    ordered
}
