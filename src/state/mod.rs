//! Reactive player state.
//!
//! [`PlayerState`] is the single source of truth shared by the readiness
//! gate, the XR synchronizer and any UI observers. It is owned by the
//! [`StateStore`] and only ever changed through [`StateStore::update`],
//! which applies a [`StateUpdate`] and fans out [`StateEvent`]s.

mod store;
mod update;

pub use store::{Callback, EventKind, StateEvent, StateStore, Subscription};
pub use update::StateUpdate;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::model::{ErrorRecord, Mode, Track};

/// Canonical player state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    /// Which renderer is audible
    pub mode: Mode,
    /// Audio clock is running
    pub is_playing: bool,
    /// Effective mute flag of the audible element
    pub is_muted: bool,
    /// Master volume (0.0 - 1.0)
    pub volume: f64,
    /// Playback position (seconds)
    pub current_time: f64,
    /// Track duration (seconds, 0 when unknown)
    pub duration: f64,
    /// Current track is loaded and playable
    pub media_ready: bool,
    /// Video reached the playable threshold
    pub video_buffered: bool,
    /// Audio reached the playable threshold
    pub audio_buffered: bool,
    /// A preload is in flight
    pub is_preloading: bool,
    /// Current track played to its end
    pub is_track_ended: bool,
    /// Session wiring finished
    pub player_initialized: bool,
    /// Track being played
    pub current_track: Option<Track>,
    /// Error log, oldest first
    pub errors: VecDeque<ErrorRecord>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            mode: Mode::AudioOnly,
            is_playing: false,
            is_muted: false,
            volume: 1.0,
            current_time: 0.0,
            duration: 0.0,
            media_ready: false,
            video_buffered: false,
            audio_buffered: false,
            is_preloading: false,
            is_track_ended: false,
            player_initialized: false,
            current_track: None,
            errors: VecDeque::new(),
        }
    }
}

/// One updatable field of [`PlayerState`].
///
/// The error log is not a field: it only grows through
/// [`StateStore::log_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    Mode,
    IsPlaying,
    IsMuted,
    Volume,
    CurrentTime,
    Duration,
    MediaReady,
    VideoBuffered,
    AudioBuffered,
    IsPreloading,
    IsTrackEnded,
    PlayerInitialized,
    CurrentTrack,
}

impl StateField {
    /// All fields in event order.
    pub const ALL: [StateField; 13] = [
        StateField::Mode,
        StateField::IsPlaying,
        StateField::IsMuted,
        StateField::Volume,
        StateField::CurrentTime,
        StateField::Duration,
        StateField::MediaReady,
        StateField::VideoBuffered,
        StateField::AudioBuffered,
        StateField::IsPreloading,
        StateField::IsTrackEnded,
        StateField::PlayerInitialized,
        StateField::CurrentTrack,
    ];

    /// Wire name (matches the JSON snapshot keys).
    pub fn name(self) -> &'static str {
        match self {
            StateField::Mode => "mode",
            StateField::IsPlaying => "isPlaying",
            StateField::IsMuted => "isMuted",
            StateField::Volume => "volume",
            StateField::CurrentTime => "currentTime",
            StateField::Duration => "duration",
            StateField::MediaReady => "mediaReady",
            StateField::VideoBuffered => "videoBuffered",
            StateField::AudioBuffered => "audioBuffered",
            StateField::IsPreloading => "isPreloading",
            StateField::IsTrackEnded => "isTrackEnded",
            StateField::PlayerInitialized => "playerInitialized",
            StateField::CurrentTrack => "currentTrack",
        }
    }

    pub fn from_name(name: &str) -> Option<StateField> {
        StateField::ALL.into_iter().find(|f| f.name() == name)
    }

    /// The single-bit set for this field.
    pub fn flag(self) -> StateFields {
        match self {
            StateField::Mode => StateFields::MODE,
            StateField::IsPlaying => StateFields::IS_PLAYING,
            StateField::IsMuted => StateFields::IS_MUTED,
            StateField::Volume => StateFields::VOLUME,
            StateField::CurrentTime => StateFields::CURRENT_TIME,
            StateField::Duration => StateFields::DURATION,
            StateField::MediaReady => StateFields::MEDIA_READY,
            StateField::VideoBuffered => StateFields::VIDEO_BUFFERED,
            StateField::AudioBuffered => StateFields::AUDIO_BUFFERED,
            StateField::IsPreloading => StateFields::IS_PRELOADING,
            StateField::IsTrackEnded => StateFields::IS_TRACK_ENDED,
            StateField::PlayerInitialized => StateFields::PLAYER_INITIALIZED,
            StateField::CurrentTrack => StateFields::CURRENT_TRACK,
        }
    }
}

bitflags! {
    /// Set of fields changed by one update.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StateFields: u16 {
        const MODE = 1 << 0;
        const IS_PLAYING = 1 << 1;
        const IS_MUTED = 1 << 2;
        const VOLUME = 1 << 3;
        const CURRENT_TIME = 1 << 4;
        const DURATION = 1 << 5;
        const MEDIA_READY = 1 << 6;
        const VIDEO_BUFFERED = 1 << 7;
        const AUDIO_BUFFERED = 1 << 8;
        const IS_PRELOADING = 1 << 9;
        const IS_TRACK_ENDED = 1 << 10;
        const PLAYER_INITIALIZED = 1 << 11;
        const CURRENT_TRACK = 1 << 12;
    }
}

impl StateFields {
    /// Fields in this set, in event order.
    pub fn fields(self) -> impl Iterator<Item = StateField> {
        StateField::ALL
            .into_iter()
            .filter(move |f| self.contains(f.flag()))
    }

    /// Wire names of the fields in this set.
    pub fn names(self) -> Vec<&'static str> {
        self.fields().map(StateField::name).collect()
    }
}

/// New value of a single field, delivered with field-specific events.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldChange {
    Mode(Mode),
    IsPlaying(bool),
    IsMuted(bool),
    Volume(f64),
    CurrentTime(f64),
    Duration(f64),
    MediaReady(bool),
    VideoBuffered(bool),
    AudioBuffered(bool),
    IsPreloading(bool),
    IsTrackEnded(bool),
    PlayerInitialized(bool),
    CurrentTrack(Option<Track>),
}

impl FieldChange {
    pub fn field(&self) -> StateField {
        match self {
            FieldChange::Mode(_) => StateField::Mode,
            FieldChange::IsPlaying(_) => StateField::IsPlaying,
            FieldChange::IsMuted(_) => StateField::IsMuted,
            FieldChange::Volume(_) => StateField::Volume,
            FieldChange::CurrentTime(_) => StateField::CurrentTime,
            FieldChange::Duration(_) => StateField::Duration,
            FieldChange::MediaReady(_) => StateField::MediaReady,
            FieldChange::VideoBuffered(_) => StateField::VideoBuffered,
            FieldChange::AudioBuffered(_) => StateField::AudioBuffered,
            FieldChange::IsPreloading(_) => StateField::IsPreloading,
            FieldChange::IsTrackEnded(_) => StateField::IsTrackEnded,
            FieldChange::PlayerInitialized(_) => StateField::PlayerInitialized,
            FieldChange::CurrentTrack(_) => StateField::CurrentTrack,
        }
    }
}

impl PlayerState {
    /// Current value of a field.
    pub fn value_of(&self, field: StateField) -> FieldChange {
        match field {
            StateField::Mode => FieldChange::Mode(self.mode),
            StateField::IsPlaying => FieldChange::IsPlaying(self.is_playing),
            StateField::IsMuted => FieldChange::IsMuted(self.is_muted),
            StateField::Volume => FieldChange::Volume(self.volume),
            StateField::CurrentTime => FieldChange::CurrentTime(self.current_time),
            StateField::Duration => FieldChange::Duration(self.duration),
            StateField::MediaReady => FieldChange::MediaReady(self.media_ready),
            StateField::VideoBuffered => FieldChange::VideoBuffered(self.video_buffered),
            StateField::AudioBuffered => FieldChange::AudioBuffered(self.audio_buffered),
            StateField::IsPreloading => FieldChange::IsPreloading(self.is_preloading),
            StateField::IsTrackEnded => FieldChange::IsTrackEnded(self.is_track_ended),
            StateField::PlayerInitialized => {
                FieldChange::PlayerInitialized(self.player_initialized)
            }
            StateField::CurrentTrack => FieldChange::CurrentTrack(self.current_track.clone()),
        }
    }

    /// Apply every field of `update` whose value differs from the current one.
    ///
    /// Returns the set of fields that actually changed.
    pub(crate) fn apply(&mut self, update: StateUpdate) -> StateFields {
        let mut changed = StateFields::empty();

        fn set<T: PartialEq>(
            slot: &mut T,
            value: Option<T>,
            flag: StateFields,
            changed: &mut StateFields,
        ) {
            match value {
                Some(value) if *slot != value => {
                    *slot = value;
                    changed.insert(flag);
                }
                _ => {}
            }
        }

        set(&mut self.mode, update.mode, StateFields::MODE, &mut changed);
        set(&mut self.is_playing, update.is_playing, StateFields::IS_PLAYING, &mut changed);
        set(&mut self.is_muted, update.is_muted, StateFields::IS_MUTED, &mut changed);
        set(
            &mut self.volume,
            update.volume.map(|v| finite_or_zero(v).clamp(0.0, 1.0)),
            StateFields::VOLUME,
            &mut changed,
        );
        set(
            &mut self.current_time,
            update.current_time.map(finite_or_zero),
            StateFields::CURRENT_TIME,
            &mut changed,
        );
        set(
            &mut self.duration,
            update.duration.map(finite_or_zero),
            StateFields::DURATION,
            &mut changed,
        );
        set(&mut self.media_ready, update.media_ready, StateFields::MEDIA_READY, &mut changed);
        set(
            &mut self.video_buffered,
            update.video_buffered,
            StateFields::VIDEO_BUFFERED,
            &mut changed,
        );
        set(
            &mut self.audio_buffered,
            update.audio_buffered,
            StateFields::AUDIO_BUFFERED,
            &mut changed,
        );
        set(
            &mut self.is_preloading,
            update.is_preloading,
            StateFields::IS_PRELOADING,
            &mut changed,
        );
        set(
            &mut self.is_track_ended,
            update.is_track_ended,
            StateFields::IS_TRACK_ENDED,
            &mut changed,
        );
        set(
            &mut self.player_initialized,
            update.player_initialized,
            StateFields::PLAYER_INITIALIZED,
            &mut changed,
        );
        set(
            &mut self.current_track,
            update.current_track,
            StateFields::CURRENT_TRACK,
            &mut changed,
        );

        changed
    }
}

/// Media elements report NaN for unknown times; the store keeps 0 instead so
/// that equality checks stay meaningful.
fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}
