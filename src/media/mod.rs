//! Media element abstraction.
//!
//! The player drives two elements that behave like HTML media elements: one
//! audio element and one 360° video element. Components only ever see them
//! through [`MediaElement`], so the same engine runs against a browser
//! binding, a native backend or the in-memory [`SimulatedMedia`].
//!
//! Elements report what happens to them through a broadcast channel of
//! [`MediaEvent`]s. Subscribing before starting a load guarantees no event
//! is missed.

mod simulated;

pub use simulated::{LoadScript, MediaCatalog, SimulatedMedia, SimulatedShadows};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Which of the two renderers an element belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// How much data an element holds, ordered from nothing to enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ReadyState {
    #[default]
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

impl ReadyState {
    /// Enough data buffered that playback is unlikely to stall right away.
    pub fn is_playable(self) -> bool {
        self >= ReadyState::HaveFutureData
    }
}

/// Media error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaErrorCode {
    Aborted,
    Network,
    Decode,
    SrcNotSupported,
    Unknown,
}

impl MediaErrorCode {
    pub fn message(self) -> &'static str {
        match self {
            MediaErrorCode::Aborted => "Media playback aborted by user",
            MediaErrorCode::Network => "Network error during media download",
            MediaErrorCode::Decode => "Media decoding error",
            MediaErrorCode::SrcNotSupported => "Media format not supported",
            MediaErrorCode::Unknown => "Unknown media error",
        }
    }
}

impl std::fmt::Display for MediaErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Events emitted by a media element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MediaEvent {
    LoadStart,
    DurationChange,
    /// First frame decoded
    LoadedData,
    /// Enough data to play to the end without stalling
    CanPlayThrough,
    Play,
    Playing,
    Pause,
    Seeking,
    Seeked,
    VolumeChange,
    TimeUpdate,
    Ended,
    Error(MediaErrorCode),
}

/// Cross-origin request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrossOrigin {
    #[default]
    None,
    Anonymous,
}

/// Loading eagerness hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreloadHint {
    None,
    #[default]
    Metadata,
    Auto,
}

/// Element attributes that affect how a source is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadPolicy {
    pub cross_origin: CrossOrigin,
    pub preload: PreloadHint,
}

impl LoadPolicy {
    /// Cross-origin enabled, eager loading.
    pub fn eager() -> Self {
        Self {
            cross_origin: CrossOrigin::Anonymous,
            preload: PreloadHint::Auto,
        }
    }
}

/// Why `play()` was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PlayError {
    /// Autoplay policy requires a user gesture first
    #[error("playback not allowed without a user gesture")]
    NotAllowed,

    #[error("no source loaded")]
    NoSource,

    #[error("play request interrupted by a new load")]
    Aborted,
}

/// A media element (audio or video).
///
/// Setters never fail: like their HTML counterparts they clamp or ignore
/// invalid values. `duration()` is NaN while unknown.
#[async_trait]
pub trait MediaElement: Send + Sync {
    fn kind(&self) -> MediaKind;

    /// Current source locator.
    fn src(&self) -> Option<String>;
    fn set_src(&self, locator: &str);

    /// Drop the source and abort any load in progress.
    fn clear_src(&self);

    /// Restart resource selection for the current source.
    fn load(&self);
    fn set_load_policy(&self, policy: LoadPolicy);
    fn ready_state(&self) -> ReadyState;

    fn current_time(&self) -> f64;
    fn set_current_time(&self, secs: f64);
    fn duration(&self) -> f64;

    fn volume(&self) -> f64;
    fn set_volume(&self, volume: f64);
    fn muted(&self) -> bool;
    fn set_muted(&self, muted: bool);

    fn paused(&self) -> bool;
    async fn play(&self) -> Result<(), PlayError>;
    fn pause(&self);

    /// Receive every event emitted from now on.
    fn subscribe(&self) -> broadcast::Receiver<MediaEvent>;

    /// Source matches `locator` and enough data is buffered to play.
    fn is_ready_for(&self, locator: &str) -> bool {
        self.src().as_deref() == Some(locator) && self.ready_state().is_playable()
    }
}

/// Creates disposable, invisible elements for the preload fallback.
///
/// The element is disposed of when the last `Arc` is dropped.
pub trait ShadowFactory: Send + Sync {
    fn create(&self, kind: MediaKind) -> Option<Arc<dyn MediaElement>>;
}

/// Factory for environments that cannot create extra elements.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoShadow;

impl ShadowFactory for NoShadow {
    fn create(&self, _kind: MediaKind) -> Option<Arc<dyn MediaElement>> {
        None
    }
}
