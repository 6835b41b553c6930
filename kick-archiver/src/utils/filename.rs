//! Output file naming for archived sessions.
//!
//! A session is named `{channel}_{YYYY-MM-DD}_{HH-MM}_{quality}` after the UTC start
//! of the broadcast, so a restarted process lands on the same files and resumes them.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use hls_capture::AudioFormat;
use regex::Regex;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.\-]").unwrap());

static QUALITY_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+p)").unwrap());

/// Replace every character outside `[A-Za-z0-9_.-]` with `_`.
///
/// Leading and trailing dots are trimmed; an empty result becomes `unnamed`.
pub fn sanitize_filename(input: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(input.trim(), "_");
    let trimmed = replaced.trim_matches('.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Naming form of a variant label: its leading `NNNp`, or the label itself.
///
/// ```
/// use kick_archiver::utils::filename::quality_tag;
///
/// assert_eq!(quality_tag("480p30"), "480p");
/// assert_eq!(quality_tag("source"), "source");
/// ```
pub fn quality_tag(label: &str) -> String {
    let label = label.trim();
    match QUALITY_PREFIX.captures(label) {
        Some(caps) => caps[1].to_string(),
        None => sanitize_filename(label),
    }
}

pub fn session_basename(channel: &str, started_at: DateTime<Utc>, quality_label: &str) -> String {
    sanitize_filename(&format!(
        "{}_{}_{}",
        channel,
        started_at.format("%Y-%m-%d_%H-%M"),
        quality_tag(quality_label)
    ))
}

/// Where one session's files go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub basename: String,
    /// `{output_dir}/{basename}/{basename}.ts`, journal alongside.
    pub media: PathBuf,
    /// `{output_dir}/{basename}.{ext}`
    pub audio: PathBuf,
}

impl SessionPaths {
    pub fn new(output_dir: &Path, basename: &str, format: AudioFormat) -> Self {
        Self {
            basename: basename.to_string(),
            media: output_dir.join(basename).join(format!("{basename}.ts")),
            audio: output_dir.join(format!("{basename}.{}", format.extension())),
        }
    }
}
