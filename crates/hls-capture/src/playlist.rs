//! Playlist handles, quality variants and segment references.
//!
//! A [`PlaylistHandle`] is what a playlist source hands out: a URL, the variants it
//! offers and when it was obtained. It is never mutated; negotiating a quality
//! produces a new handle that points at the chosen variant.

use std::time::Duration;

use chrono::{DateTime, Utc};
use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist};
use url::Url;

use crate::error::FetchError;

/// Label used when a playlist offers no variants to choose from.
pub const SOURCE_LABEL: &str = "source";

/// One quality rendition advertised by a master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub label: String,
    pub url: Url,
    pub bandwidth: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistHandle {
    url: Url,
    variants: Vec<Variant>,
    selected: Option<String>,
    fetched_at: DateTime<Utc>,
}

impl PlaylistHandle {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            variants: Vec::new(),
            selected: None,
            fetched_at: Utc::now(),
        }
    }

    pub fn parse(url: &str) -> Result<Self, FetchError> {
        let url = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::new(url))
    }

    pub fn with_variants(mut self, variants: Vec<Variant>) -> Self {
        self.variants = variants;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Label of the negotiated variant, `None` until [`select_quality`](Self::select_quality) ran.
    pub fn selected_label(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Negotiate a variant against an ordered preference list.
    ///
    /// The first preference matching a variant label exactly wins, then the first one
    /// that prefixes a label or appears in a variant URL. Without a match the highest
    /// bandwidth variant is used. A handle without variants keeps its own URL and is
    /// labelled [`SOURCE_LABEL`]. Negotiating an already negotiated handle is a no-op.
    pub fn select_quality(&self, preferences: &[String]) -> PlaylistHandle {
        if self.selected.is_some() {
            return self.clone();
        }

        match pick_variant(&self.variants, preferences) {
            Some(variant) => PlaylistHandle {
                url: variant.url.clone(),
                variants: self.variants.clone(),
                selected: Some(variant.label.clone()),
                fetched_at: self.fetched_at,
            },
            None => PlaylistHandle {
                selected: Some(SOURCE_LABEL.to_string()),
                ..self.clone()
            },
        }
    }
}

fn pick_variant<'a>(variants: &'a [Variant], preferences: &[String]) -> Option<&'a Variant> {
    for pref in preferences {
        let pref = pref.trim().to_ascii_lowercase();
        if pref.is_empty() {
            continue;
        }
        if let Some(v) = variants.iter().find(|v| v.label.eq_ignore_ascii_case(&pref)) {
            return Some(v);
        }
        if let Some(v) = variants.iter().find(|v| {
            v.label.to_ascii_lowercase().starts_with(&pref)
                || v.url.as_str().to_ascii_lowercase().contains(&pref)
        }) {
            return Some(v);
        }
    }

    variants.iter().max_by_key(|v| v.bandwidth.unwrap_or(0))
}

/// Derive a variant playlist URL from an IVS style master URL.
///
/// `.../media/hls/master.m3u8` becomes `.../media/hls/{quality}/playlist.m3u8`.
/// Returns `None` for URLs that do not follow the convention.
pub fn derive_variant_url(master: &Url, quality: &str) -> Option<Url> {
    let quality = quality.trim();
    if quality.is_empty() || !master.path().ends_with("/master.m3u8") {
        return None;
    }
    master.join(&format!("{quality}/playlist.m3u8")).ok()
}

/// One media segment of a resolved playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    /// HLS media sequence number.
    pub index: u64,
    pub url: Url,
    /// Expected byte length, when the playlist states it.
    pub length_hint: Option<u64>,
    /// Start of an `EXT-X-BYTERANGE` sub-range within `url`.
    pub byte_offset: Option<u64>,
}

impl SegmentRef {
    pub fn new(index: u64, url: Url) -> Self {
        Self {
            index,
            url,
            length_hint: None,
            byte_offset: None,
        }
    }

    pub fn with_length_hint(mut self, length: u64) -> Self {
        self.length_hint = Some(length);
        self
    }
}

/// Ordered segment list of a media playlist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPlaylist {
    pub segments: Vec<SegmentRef>,
    /// The playlist carried `EXT-X-ENDLIST`.
    pub ended: bool,
    pub target_duration: Duration,
}

impl ResolvedPlaylist {
    pub fn first_index(&self) -> Option<u64> {
        self.segments.first().map(|s| s.index)
    }

    pub fn last_index(&self) -> Option<u64> {
        self.segments.last().map(|s| s.index)
    }
}

#[derive(Debug, Clone)]
pub enum ParsedPlaylist {
    Master(Vec<Variant>),
    Media(ResolvedPlaylist),
}

/// Parse playlist bytes fetched from `base`; relative URIs are resolved against it.
pub fn parse_playlist(base: &Url, bytes: &[u8]) -> Result<ParsedPlaylist, FetchError> {
    match m3u8_rs::parse_playlist_res(bytes) {
        Ok(Playlist::MasterPlaylist(pl)) => Ok(ParsedPlaylist::Master(variants_from_master(base, &pl)?)),
        Ok(Playlist::MediaPlaylist(pl)) => Ok(ParsedPlaylist::Media(segments_from_media(base, &pl)?)),
        Err(e) => Err(FetchError::playlist(format!(
            "unparseable playlist from {base}: {e}"
        ))),
    }
}

fn join(base: &Url, uri: &str) -> Result<Url, FetchError> {
    base.join(uri)
        .map_err(|e| FetchError::InvalidUrl(format!("{uri} relative to {base}: {e}")))
}

fn variants_from_master(base: &Url, playlist: &MasterPlaylist) -> Result<Vec<Variant>, FetchError> {
    playlist
        .variants
        .iter()
        .filter(|v| !v.is_i_frame)
        .map(|v| {
            let label = v
                .video
                .clone()
                .or_else(|| {
                    v.uri
                        .rsplit_once('/')
                        .and_then(|(dir, _)| dir.rsplit('/').next())
                        .filter(|dir| !dir.is_empty())
                        .map(str::to_string)
                })
                .or_else(|| v.resolution.map(|r| format!("{}p", r.height)))
                .unwrap_or_else(|| format!("{}k", v.bandwidth / 1000));
            Ok(Variant {
                label,
                url: join(base, &v.uri)?,
                bandwidth: Some(v.bandwidth),
            })
        })
        .collect()
}

fn segments_from_media(base: &Url, playlist: &MediaPlaylist) -> Result<ResolvedPlaylist, FetchError> {
    let mut segments = Vec::with_capacity(playlist.segments.len());
    let mut range_end: Option<(String, u64)> = None;

    for (position, segment) in playlist.segments.iter().enumerate() {
        let mut seg = SegmentRef::new(
            playlist.media_sequence + position as u64,
            join(base, &segment.uri)?,
        );
        if let Some(range) = &segment.byte_range {
            // Without an explicit offset a sub-range continues where the previous
            // sub-range of the same resource ended.
            let offset = range.offset.unwrap_or_else(|| match &range_end {
                Some((uri, end)) if *uri == segment.uri => *end,
                _ => 0,
            });
            seg.length_hint = Some(range.length);
            seg.byte_offset = Some(offset);
            range_end = Some((segment.uri.clone(), offset + range.length));
        }
        segments.push(seg);
    }

    Ok(ResolvedPlaylist {
        segments,
        ended: playlist.end_list,
        target_duration: Duration::from_secs(playlist.target_duration),
    })
}
