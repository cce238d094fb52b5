//! Mode synchronizer: the audio-only / XR state machine.
//!
//! # Roles
//!
//! Both media elements play the same timeline, but only one is audible:
//!
//! | Mode         | Audible | Silent clock | Time authority |
//! |--------------|---------|--------------|----------------|
//! | `AUDIO_ONLY` | audio   | video        | audio          |
//! | `XR_ACTIVE`  | video   | audio        | audio          |
//!
//! While XR is active an audio-event pump mirrors play/pause, seeks and
//! volume from the audio element onto the video element, and a periodic
//! drift check snaps the video back whenever it strays beyond the tolerance.
//! Video writes never feed back into the pump: only audio events are
//! observed, and the tolerance keeps a correction from re-triggering itself.

mod scene;

pub use scene::{Collaborators, LogNotifier, NoScene, Notifier, SceneError, SceneHost};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::config::SyncConfig;
use crate::media::{MediaElement, MediaEvent, MediaKind, PlayError};
use crate::model::{Mode, Track};
use crate::preload::{PreloadError, ReadinessGate};
use crate::state::{StateStore, StateUpdate};

const XR_UNAVAILABLE: &str = "XR content is not available for this track.";
const XR_LOAD_FAILED: &str = "There was a problem loading the XR content. Please try again.";

/// Reasons `enter_xr` leaves the player in audio-only mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum XrError {
    #[error("current track is not XR capable")]
    NotXrCapable,

    #[error("no video source available for XR mode")]
    NoVideoSource,

    #[error("video preload rejected: {0}")]
    Preload(#[from] PreloadError),

    #[error("track changed while XR content was loading")]
    Superseded,

    #[error("mode synchronizer has no runtime")]
    Inert,
}

/// Audio settings from before the XR transition.
#[derive(Debug, Clone, Copy)]
struct SavedAudio {
    volume: f64,
    muted: bool,
}

#[derive(Default)]
struct XrState {
    mode: Mode,
    saved: Option<SavedAudio>,
    drift: Option<AbortHandle>,
}

struct SyncInner {
    store: StateStore,
    gate: ReadinessGate,
    audio: Arc<dyn MediaElement>,
    video: Arc<dyn MediaElement>,
    collaborators: Collaborators,
    config: SyncConfig,
    runtime: Option<Handle>,
    xr: Mutex<XrState>,
    /// Set when video autoplay was refused; cleared by the next gesture
    autoplay_retry: AtomicBool,
    track_epoch: AtomicU64,
    pump: Mutex<Option<AbortHandle>>,
}

impl Drop for SyncInner {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
        if let Some(drift) = self.xr.get_mut().drift.take() {
            drift.abort();
        }
    }
}

impl SyncInner {
    fn mode(&self) -> Mode {
        self.xr.lock().mode
    }

    fn resolve_video_locator(&self) -> Result<String, XrError> {
        let track = self.store.read(|s| s.current_track.clone());
        match &track {
            Some(track) if !track.is_xr_capable => Err(XrError::NotXrCapable),
            Some(track) => track
                .xr_locator()
                .map(str::to_string)
                .ok_or(XrError::NoVideoSource),
            // No track published: whatever the element already holds
            None => self
                .video
                .src()
                .filter(|src| !src.is_empty())
                .ok_or(XrError::NoVideoSource),
        }
    }

    fn reject(&self, err: &XrError) {
        let notice = match err {
            XrError::NotXrCapable | XrError::NoVideoSource => XR_UNAVAILABLE,
            XrError::Preload(_) | XrError::Inert => XR_LOAD_FAILED,
            XrError::Superseded => return,
        };
        tracing::error!("Cannot enter XR mode: {}", err);
        self.store
            .log_error(format!("Cannot enter XR mode: {}", err), None);
        self.collaborators.notifier.notify(notice);
    }

    async fn activate(self: &Arc<Self>) {
        let saved = {
            let mut xr = self.xr.lock();
            if xr.mode.is_xr() {
                return;
            }
            let saved = SavedAudio {
                volume: self.audio.volume(),
                muted: self.audio.muted(),
            };
            xr.mode = Mode::Xr;
            xr.saved = Some(saved);
            if let Some(runtime) = &self.runtime {
                let task = runtime.spawn(drift_loop(Arc::downgrade(self), self.config.interval()));
                if let Some(stale) = xr.drift.replace(task.abort_handle()) {
                    stale.abort();
                }
            }
            saved
        };

        self.gate.loading().force_hide();
        self.collaborators.scene.set_visible(true);

        self.video.set_volume(saved.volume);
        self.video.set_muted(false);
        self.audio.set_muted(true);
        tracing::info!(
            "XR mode activated. Video unmuted with volume {}, audio muted",
            saved.volume
        );

        self.store
            .update(StateUpdate::new().mode(Mode::Xr).is_muted(false));

        self.sync_play_state().await;
        self.sync_time();
    }

    fn deactivate(&self) -> bool {
        let (saved, drift) = {
            let mut xr = self.xr.lock();
            if !xr.mode.is_xr() {
                return false;
            }
            xr.mode = Mode::AudioOnly;
            (xr.saved.take(), xr.drift.take())
        };
        if let Some(drift) = drift {
            drift.abort();
        }
        self.autoplay_retry.store(false, Ordering::SeqCst);

        if let Err(e) = self.collaborators.scene.reset_camera() {
            tracing::error!("Error resetting camera on XR exit: {}", e);
        }
        self.collaborators.scene.set_visible(false);

        self.audio.set_muted(false);
        let mut update = StateUpdate::new().mode(Mode::AudioOnly).is_muted(false);
        if let Some(saved) = saved {
            tracing::debug!(
                "Restoring audio volume {} (muted before XR: {})",
                saved.volume,
                saved.muted
            );
            self.audio.set_volume(saved.volume);
            update = update.volume(saved.volume);
        }

        self.video.set_muted(true);
        if !self.video.paused() {
            self.video.pause();
        }
        tracing::info!("Exited XR mode. Audio unmuted, video muted");

        self.store.update(update);
        true
    }

    /// Start or pause the video to match the audio.
    async fn sync_play_state(&self) {
        if !self.mode().is_xr() {
            return;
        }
        let audio_paused = self.audio.paused();
        let video_paused = self.video.paused();

        if !audio_paused && video_paused {
            if let Err(e) = self.video.play().await {
                self.on_video_play_error(e);
            }
        } else if audio_paused && !video_paused {
            self.video.pause();
        }
    }

    fn on_video_play_error(&self, e: PlayError) {
        tracing::info!("Video autoplay prevented: {}", e);
        self.autoplay_retry.store(true, Ordering::SeqCst);
        self.store
            .log_error("Video autoplay prevented", Some(e.to_string()));
    }

    /// Snap the video to the audio when beyond tolerance.
    fn sync_time(&self) -> bool {
        if !self.mode().is_xr() {
            return false;
        }
        let audio_time = self.audio.current_time();
        let video_time = self.video.current_time();
        if !audio_time.is_finite() || !video_time.is_finite() {
            return false;
        }

        let drift = video_time - audio_time;
        if drift.abs() > self.config.drift_tolerance_secs {
            tracing::debug!("Video drifted {:+.3}s, snapping to {:.3}", drift, audio_time);
            self.video.set_current_time(audio_time);
            true
        } else {
            false
        }
    }

    /// Audio volume carries over regardless of its forced mute.
    fn sync_volume(&self) {
        if self.mode().is_xr() {
            self.video.set_volume(self.audio.volume());
        }
    }
}

/// Mirror audio events onto the video while XR is active.
async fn audio_pump(weak: Weak<SyncInner>, mut events: broadcast::Receiver<MediaEvent>) {
    loop {
        let event = events.recv().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match event {
            Ok(MediaEvent::Play | MediaEvent::Pause) => inner.sync_play_state().await,
            Ok(MediaEvent::Seeking) => {
                inner.sync_time();
            }
            Ok(MediaEvent::VolumeChange) => inner.sync_volume(),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("Audio pump skipped {} events, resyncing", skipped);
                inner.sync_play_state().await;
                inner.sync_time();
                inner.sync_volume();
            }
            Err(RecvError::Closed) => return,
        }
    }
}

async fn drift_loop(weak: Weak<SyncInner>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        inner.sync_time();
    }
}

/// Owns the audio-only / XR state machine.
///
/// Cheap to clone; clones drive the same elements.
#[derive(Clone)]
pub struct ModeSynchronizer {
    inner: Arc<SyncInner>,
}

impl std::fmt::Debug for ModeSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeSynchronizer")
            .field("mode", &self.inner.mode())
            .field("inert", &self.inner.runtime.is_none())
            .finish()
    }
}

impl ModeSynchronizer {
    /// Wire the synchronizer to the store, the gate and both elements.
    ///
    /// Starts in audio-only mode with the video element muted. Outside a
    /// tokio runtime the synchronizer is inert: `enter_xr` is refused.
    pub fn new(
        store: StateStore,
        gate: ReadinessGate,
        audio: Arc<dyn MediaElement>,
        video: Arc<dyn MediaElement>,
        collaborators: Collaborators,
        config: SyncConfig,
    ) -> Self {
        let runtime = Handle::try_current().ok();

        collaborators.scene.set_visible(false);
        video.set_muted(true);

        let inner = Arc::new(SyncInner {
            store,
            gate,
            audio,
            video,
            collaborators,
            config,
            runtime,
            xr: Mutex::new(XrState::default()),
            autoplay_retry: AtomicBool::new(false),
            track_epoch: AtomicU64::new(0),
            pump: Mutex::new(None),
        });

        match &inner.runtime {
            Some(runtime) => {
                let events = inner.audio.subscribe();
                let task = runtime.spawn(audio_pump(Arc::downgrade(&inner), events));
                *inner.pump.lock() = Some(task.abort_handle());
                tracing::info!("Mode synchronizer initialized");
            }
            None => {
                tracing::error!("Mode synchronizer created outside a tokio runtime; XR mode disabled");
            }
        }

        inner
            .store
            .update(StateUpdate::new().mode(Mode::AudioOnly));

        Self { inner }
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode()
    }

    /// Whether a track can be shown in XR.
    pub fn is_xr_available(track: &Track) -> bool {
        track.xr_locator().is_some()
    }

    /// Preload the XR video and switch to XR mode.
    ///
    /// Media failures during the preload do not prevent the switch; only
    /// outright rejections do, each with a user-visible notice. Calling
    /// this while already in XR is a no-op.
    pub async fn enter_xr(&self) -> Result<Mode, XrError> {
        let inner = &self.inner;
        if inner.mode().is_xr() {
            tracing::debug!("Already in XR mode");
            return Ok(Mode::Xr);
        }
        tracing::info!("Entering XR mode...");

        let locator = match inner.resolve_video_locator() {
            Ok(locator) => locator,
            Err(e) => {
                inner.reject(&e);
                return Err(e);
            }
        };
        if inner.runtime.is_none() {
            inner.reject(&XrError::Inert);
            return Err(XrError::Inert);
        }

        let epoch = inner.track_epoch.load(Ordering::SeqCst);
        let loading = inner.gate.loading();
        loading.show();

        let handle = match inner.gate.preload(MediaKind::Video, &locator) {
            Ok(handle) => handle,
            Err(e) => {
                loading.hide();
                let err = XrError::Preload(e);
                inner.reject(&err);
                return Err(err);
            }
        };

        let outcome = handle.wait().await;
        if outcome.is_superseded() || inner.track_epoch.load(Ordering::SeqCst) != epoch {
            loading.hide();
            tracing::info!("XR entry abandoned, track changed while loading {}", locator);
            return Err(XrError::Superseded);
        }

        tracing::info!("Video preload finished ({:?}), activating XR mode", outcome);
        inner.activate().await;
        Ok(Mode::Xr)
    }

    /// Return to audio-only mode. Returns `false` when not in XR.
    pub fn exit_xr(&self) -> bool {
        self.inner.deactivate()
    }

    /// Toggle the audible element's mute flag and return the new state.
    ///
    /// The silent clock stays muted in either mode.
    pub fn toggle_master_mute(&self) -> bool {
        let inner = &self.inner;
        let (mode, muted) = if inner.mode().is_xr() {
            let muted = !inner.video.muted();
            inner.video.set_muted(muted);
            inner.audio.set_muted(true);
            ("XR", muted)
        } else {
            let muted = !inner.audio.muted();
            inner.audio.set_muted(muted);
            inner.video.set_muted(true);
            ("Audio-only", muted)
        };
        tracing::info!(
            "{} mode: {}",
            mode,
            if muted { "muted" } else { "unmuted" }
        );

        inner.store.update(StateUpdate::new().is_muted(muted));
        muted
    }

    /// Seek by `delta` seconds, clamped to the audio's duration.
    ///
    /// In XR the video is moved to the same position directly. Returns the
    /// new position.
    pub fn skip_time(&self, delta: f64) -> f64 {
        let inner = &self.inner;
        let duration = inner.audio.duration();
        let mut target = inner.audio.current_time() + delta;
        if !target.is_finite() {
            target = 0.0;
        }
        target = target.max(0.0);
        if duration.is_finite() {
            target = target.min(duration);
        }

        inner.audio.set_current_time(target);
        if inner.mode().is_xr() {
            inner.video.set_current_time(target);
        }
        inner.store.update(StateUpdate::new().current_time(target));
        target
    }

    /// Skip forward by the configured step.
    pub fn skip_forward(&self) -> f64 {
        self.skip_time(self.inner.config.skip_secs)
    }

    /// Skip back by the configured step.
    pub fn skip_back(&self) -> f64 {
        self.skip_time(-self.inner.config.skip_secs)
    }

    /// Report a user gesture; retries a refused video start once.
    pub async fn user_gesture(&self) {
        let inner = &self.inner;
        if !inner.autoplay_retry.swap(false, Ordering::SeqCst) {
            return;
        }
        if !inner.mode().is_xr() || inner.audio.paused() {
            return;
        }

        match inner.video.play().await {
            Ok(()) => tracing::info!("Video playback started after user interaction"),
            Err(e) => {
                tracing::error!("Failed to play video even after user interaction: {}", e);
                inner.store.log_error(
                    "Failed to play video even after user interaction",
                    Some(e.to_string()),
                );
            }
        }
    }

    /// Re-center the XR camera. Does nothing outside XR.
    pub fn recenter(&self) -> bool {
        if !self.inner.mode().is_xr() {
            return false;
        }
        self.inner.collaborators.scene.recenter()
    }

    /// Notify the synchronizer of a new current track.
    ///
    /// Abandons any pending XR entry, and leaves XR when the new track cannot
    /// be shown in it. Returns whether XR is available for the track.
    pub fn on_track_changed(&self, track: Option<&Track>) -> bool {
        self.inner.track_epoch.fetch_add(1, Ordering::SeqCst);

        let available = track.is_some_and(Self::is_xr_available);
        if !available && self.inner.mode().is_xr() {
            tracing::info!("Exiting XR mode for non-XR track");
            self.inner.deactivate();
        }
        available
    }
}
