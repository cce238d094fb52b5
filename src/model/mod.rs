//! Core data models for the player.
//!
//! Defines the value objects shared by every component: [`Track`], [`Mode`]
//! and [`ErrorRecord`]. Tracks are immutable once loaded and are replaced
//! wholesale on track change.
//!
//! Tracks usually arrive from a CMS, either as a JSON payload or as URL query
//! parameters; see [`cms`] for those formats.

pub mod cms;

use serde::{Deserialize, Serialize};

/// Which renderer currently carries the audible signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// Plain audio element is audible; video element is the silent clock.
    #[default]
    AudioOnly,
    /// 360° video element is audible; audio element is the silent clock.
    Xr,
}

impl Mode {
    pub fn is_xr(self) -> bool {
        matches!(self, Mode::Xr)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::AudioOnly => f.write_str("AUDIO_ONLY"),
            Mode::Xr => f.write_str("XR_ACTIVE"),
        }
    }
}

/// A playable track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Track title
    pub title: String,
    /// Chapter the track belongs to (may be empty)
    #[serde(default)]
    pub chapter: String,
    /// Locator of the audio resource (always present)
    pub audio_locator: String,
    /// Locator of the 360° video resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_locator: Option<String>,
    /// Locator of the album artwork
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_art_locator: Option<String>,
    /// Position in the chapter, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    /// Whether XR mode may be entered for this track
    #[serde(default)]
    pub is_xr_capable: bool,
}

impl Track {
    /// Create an audio-only track.
    pub fn audio(title: impl Into<String>, audio_locator: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            chapter: String::new(),
            audio_locator: audio_locator.into(),
            video_locator: None,
            album_art_locator: None,
            order: None,
            is_xr_capable: false,
        }
    }

    /// Attach a 360° video and mark the track XR-capable.
    pub fn with_video(mut self, video_locator: impl Into<String>) -> Self {
        self.video_locator = Some(video_locator.into());
        self.is_xr_capable = true;
        self
    }

    /// Set the chapter.
    pub fn chapter(mut self, chapter: impl Into<String>) -> Self {
        self.chapter = chapter.into();
        self
    }

    /// Set the track order.
    pub fn order(mut self, order: u32) -> Self {
        self.order = Some(order);
        self
    }

    /// Video locator, if the track can be shown in XR.
    ///
    /// Returns `None` for tracks that carry a video but are not flagged
    /// XR-capable.
    pub fn xr_locator(&self) -> Option<&str> {
        if !self.is_xr_capable {
            return None;
        }
        self.video_locator.as_deref().filter(|s| !s.is_empty())
    }

    /// Title as shown in the player, prefixed with the order when known.
    pub fn display_title(&self) -> String {
        let title = if self.title.is_empty() {
            "Unknown Track"
        } else {
            self.title.as_str()
        };
        match self.order {
            Some(order) if order > 0 => format!("{}. {}", order, title),
            _ => title.to_string(),
        }
    }
}

/// A single entry in the store's error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// RFC 3339 timestamp
    pub timestamp: String,
    /// Human readable message
    pub message: String,
    /// Optional extra detail (underlying error, media error text)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorRecord {
    /// Create a record stamped with the current time.
    pub fn now(message: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            message: message.into(),
            detail,
        }
    }
}
