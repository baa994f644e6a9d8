//! Transfer kinds and media quality presets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Named quality preset for media transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    #[default]
    Best,
    #[serde(rename = "2160p")]
    P2160,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
    Audio,
    AudioM4a,
}

impl Quality {
    pub const ALL: [Quality; 8] = [
        Quality::Best,
        Quality::P2160,
        Quality::P1080,
        Quality::P720,
        Quality::P480,
        Quality::P360,
        Quality::Audio,
        Quality::AudioM4a,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Best => "best",
            Quality::P2160 => "2160p",
            Quality::P1080 => "1080p",
            Quality::P720 => "720p",
            Quality::P480 => "480p",
            Quality::P360 => "360p",
            Quality::Audio => "audio",
            Quality::AudioM4a => "audio_m4a",
        }
    }

    /// Parses a preset name; unknown names fall back to `Best`.
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|q| q.as_str().eq_ignore_ascii_case(name))
            .unwrap_or_default()
    }

    /// Format-selection expression understood by the media extractor.
    pub fn format_selector(self) -> &'static str {
        match self {
            Quality::Best => "best[ext=mp4]/best",
            Quality::P2160 => "best[height<=2160][ext=mp4]/best[height<=2160]",
            Quality::P1080 => "best[height<=1080][ext=mp4]/best[height<=1080]",
            Quality::P720 => "best[height<=720][ext=mp4]/best[height<=720]",
            Quality::P480 => "best[height<=480][ext=mp4]/best[height<=480]",
            Quality::P360 => "best[height<=360][ext=mp4]/best[height<=360]",
            Quality::Audio => "bestaudio[ext=mp3]/bestaudio",
            Quality::AudioM4a => "bestaudio[ext=m4a]/bestaudio",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which transfer strategy an item uses; chosen once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferKind {
    /// Plain streaming GET of the URL.
    File,
    /// Extraction through the media collaborator at the given quality.
    Media { quality: Quality },
}

impl TransferKind {
    pub fn is_media(self) -> bool {
        matches!(self, TransferKind::Media { .. })
    }
}

const MEDIA_HOSTS: &[&str] = &["youtube.com", "youtu.be"];

/// True when `url` points at a site handled by the media extractor.
pub fn is_media_url(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    MEDIA_HOSTS
        .iter()
        .any(|m| host == *m || host.ends_with(&format!(".{}", m)))
}

/// Default kind for `url`: media at `quality` for known media sites, file otherwise.
pub fn detect_kind(url: &str, quality: Quality) -> TransferKind {
    if is_media_url(url) {
        TransferKind::Media { quality }
    } else {
        TransferKind::File
    }
}
