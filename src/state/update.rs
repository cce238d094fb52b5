//! Partial state updates.

use serde::{Deserialize, Deserializer};

use super::StateField;
use crate::model::{Mode, Track};

/// A partial update: every `Some` field is a requested new value.
///
/// Built either with the chained setters or from a loosely typed JSON
/// object via [`StateUpdate::from_json`], where unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateUpdate {
    pub mode: Option<Mode>,
    pub is_playing: Option<bool>,
    pub is_muted: Option<bool>,
    pub volume: Option<f64>,
    pub current_time: Option<f64>,
    pub duration: Option<f64>,
    pub media_ready: Option<bool>,
    pub video_buffered: Option<bool>,
    pub audio_buffered: Option<bool>,
    pub is_preloading: Option<bool>,
    pub is_track_ended: Option<bool>,
    pub player_initialized: Option<bool>,
    /// `Some(None)` clears the current track
    #[serde(deserialize_with = "present")]
    pub current_track: Option<Option<Track>>,
}

/// Distinguishes an explicit `null` from an absent key.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an update from a JSON object.
    ///
    /// Keys that do not name a state field are dropped without error.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        if let Some(object) = value.as_object() {
            for key in object.keys() {
                if StateField::from_name(key).is_none() {
                    tracing::debug!("Ignoring unknown state field {:?}", key);
                }
            }
        }
        serde_json::from_value(value)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn is_playing(mut self, value: bool) -> Self {
        self.is_playing = Some(value);
        self
    }

    pub fn is_muted(mut self, value: bool) -> Self {
        self.is_muted = Some(value);
        self
    }

    pub fn volume(mut self, value: f64) -> Self {
        self.volume = Some(value);
        self
    }

    pub fn current_time(mut self, value: f64) -> Self {
        self.current_time = Some(value);
        self
    }

    pub fn duration(mut self, value: f64) -> Self {
        self.duration = Some(value);
        self
    }

    pub fn media_ready(mut self, value: bool) -> Self {
        self.media_ready = Some(value);
        self
    }

    pub fn video_buffered(mut self, value: bool) -> Self {
        self.video_buffered = Some(value);
        self
    }

    pub fn audio_buffered(mut self, value: bool) -> Self {
        self.audio_buffered = Some(value);
        self
    }

    pub fn is_preloading(mut self, value: bool) -> Self {
        self.is_preloading = Some(value);
        self
    }

    pub fn is_track_ended(mut self, value: bool) -> Self {
        self.is_track_ended = Some(value);
        self
    }

    pub fn player_initialized(mut self, value: bool) -> Self {
        self.player_initialized = Some(value);
        self
    }

    pub fn current_track(mut self, track: Option<Track>) -> Self {
        self.current_track = Some(track);
        self
    }
}
