//! Player session: the components wired together.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    UI / CLI (calls Session)                     │
//! └───────────────┬─────────────────────────────────┬───────────────┘
//!                 │ enter_xr / exit_xr / mute / skip│ load_track
//!                 ▼                                 ▼
//! ┌───────────────────────────────┐   ┌───────────────────────────────┐
//! │       ModeSynchronizer        │──▶│         ReadinessGate         │
//! │  XR state machine, mirroring  │   │  preload, fallback, timeout   │
//! └───────────────┬───────────────┘   └───────────────┬───────────────┘
//!                 │                                   │
//!                 ▼                                   ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                StateStore (snapshots, subscriptions)            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A media-event pump per element keeps the store's playback fields
//! (`is_playing`, `current_time`, `duration`, ...) in step with the audio
//! element and records media errors from both.

use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::AbortHandle;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::media::{MediaElement, MediaEvent, MediaKind, PlayError, ShadowFactory};
use crate::model::{Mode, Track};
use crate::preload::{LoadingTracker, Readiness, ReadinessGate};
use crate::state::{PlayerState, StateStore, StateUpdate};
use crate::xr::{Collaborators, ModeSynchronizer, XrError};

/// A player session over one audio and one video element.
pub struct Session {
    store: StateStore,
    gate: ReadinessGate,
    xr: ModeSynchronizer,
    audio: Arc<dyn MediaElement>,
    video: Arc<dyn MediaElement>,
    config: Config,
    pumps: Vec<AbortHandle>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.xr.mode())
            .field("gate", &self.gate)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
    }
}

impl Session {
    /// Build the store, gate and synchronizer for two elements.
    pub fn new(
        audio: Arc<dyn MediaElement>,
        video: Arc<dyn MediaElement>,
        shadows: Arc<dyn ShadowFactory>,
        collaborators: Collaborators,
        config: Config,
    ) -> Self {
        let store = StateStore::new(&config.store);
        let loading = LoadingTracker::new(store.clone(), Arc::clone(&collaborators.indicator));
        let gate = ReadinessGate::new(
            store.clone(),
            Arc::clone(&audio),
            Arc::clone(&video),
            shadows,
            loading,
            config.preload.clone(),
        );
        let xr = ModeSynchronizer::new(
            store.clone(),
            gate.clone(),
            Arc::clone(&audio),
            Arc::clone(&video),
            collaborators,
            config.sync.clone(),
        );

        let mut pumps = Vec::new();
        if let Ok(runtime) = Handle::try_current() {
            for element in [&audio, &video] {
                let pump = MediaPump {
                    kind: element.kind(),
                    element: Arc::clone(element),
                    store: store.clone(),
                    gate: gate.clone(),
                    xr: xr.clone(),
                };
                let events = element.subscribe();
                pumps.push(runtime.spawn(pump.run(events)).abort_handle());
            }
        }

        store.update(
            StateUpdate::new()
                .volume(audio.volume())
                .is_muted(audio.muted())
                .player_initialized(true),
        );
        tracing::info!("Player session initialized");

        Self {
            store,
            gate,
            xr,
            audio,
            video,
            config,
            pumps,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    pub fn synchronizer(&self) -> &ModeSynchronizer {
        &self.xr
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> PlayerState {
        self.store.get_state()
    }

    pub fn mode(&self) -> Mode {
        self.xr.mode()
    }

    /// Replace the current track.
    ///
    /// Leaves XR, drops every preload, clears the playback flags and waits
    /// for the audio to be ready (or accepted unconfirmed). Playback resumes
    /// when the previous track was playing.
    pub async fn load_track(&self, track: Track) -> Result<Readiness> {
        if track.audio_locator.trim().is_empty() {
            return Err(Error::invalid_track("track has no audio source"));
        }
        tracing::info!("Loading track: {}", track.display_title());

        let was_playing = !self.audio.paused();
        if self.xr.exit_xr() {
            tracing::info!("Exited XR mode before switching tracks");
        }
        self.gate.reset();
        self.store.update(
            StateUpdate::new()
                .is_playing(false)
                .is_track_ended(false)
                .media_ready(false)
                .current_time(0.0),
        );
        self.xr.on_track_changed(Some(&track));

        match track.video_locator.as_deref().filter(|v| !v.trim().is_empty()) {
            Some(video) => {
                self.video.set_src(video);
                self.video.load();
            }
            // The previous track's video must not stay reachable
            None => self.video.clear_src(),
        }

        let handle = self.gate.preload(MediaKind::Audio, &track.audio_locator)?;
        self.store
            .update(StateUpdate::new().current_track(Some(track)));

        let readiness = handle.wait().await;
        if readiness.is_superseded() {
            return Ok(readiness);
        }

        let mut update = StateUpdate::new().media_ready(true);
        let duration = self.audio.duration();
        if duration.is_finite() {
            update = update.duration(duration);
        }
        self.store.update(update);

        if was_playing {
            tracing::info!("Auto-playing next track");
            if let Err(e) = self.audio.play().await {
                tracing::warn!("Auto-play prevented: {}", e);
            }
        }
        Ok(readiness)
    }

    /// Parse a CMS query string and load the track it describes.
    pub async fn load_cms_query(&self, query: &str) -> Result<Readiness> {
        let track = Track::from_query(query)?;
        self.load_track(track).await
    }

    pub async fn play(&self) -> std::result::Result<(), PlayError> {
        self.audio.play().await.inspect_err(|e| {
            tracing::warn!("Playback refused: {}", e);
        })
    }

    pub fn pause(&self) {
        self.audio.pause();
    }

    /// Set the master volume. The video follows while XR is active.
    pub fn set_volume(&self, volume: f64) {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.audio.set_volume(volume);
        self.store.update(StateUpdate::new().volume(volume));
    }

    pub async fn enter_xr(&self) -> std::result::Result<Mode, XrError> {
        self.xr.enter_xr().await
    }

    pub fn exit_xr(&self) -> bool {
        self.xr.exit_xr()
    }

    pub fn toggle_master_mute(&self) -> bool {
        self.xr.toggle_master_mute()
    }

    pub fn skip_time(&self, delta: f64) -> f64 {
        self.xr.skip_time(delta)
    }

    pub fn skip_forward(&self) -> f64 {
        self.xr.skip_time(self.config.sync.skip_secs)
    }

    pub fn skip_back(&self) -> f64 {
        self.xr.skip_time(-self.config.sync.skip_secs)
    }

    pub async fn user_gesture(&self) {
        self.xr.user_gesture().await;
    }
}

/// Forwards one element's events into the store.
struct MediaPump {
    kind: MediaKind,
    element: Arc<dyn MediaElement>,
    store: StateStore,
    gate: ReadinessGate,
    xr: ModeSynchronizer,
}

impl MediaPump {
    async fn run(self, mut events: broadcast::Receiver<MediaEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("{} pump skipped {} events", self.kind, skipped);
                }
                Err(RecvError::Closed) => return,
            }
        }
    }

    fn handle(&self, event: MediaEvent) {
        if let MediaEvent::Error(code) = event {
            tracing::error!("Media error ({}): {}", self.kind, code);
            self.store.log_error(
                format!("Media error ({})", self.kind),
                Some(code.message().to_string()),
            );
            // A pending preload recovers through its fallback and hides
            // the indicator itself
            if !self.gate.has_pending() {
                self.gate.loading().force_hide();
            }
            return;
        }
        // Playback fields follow the audio element only
        if self.kind != MediaKind::Audio {
            return;
        }

        match event {
            MediaEvent::Play | MediaEvent::Pause => {
                self.store
                    .update(StateUpdate::new().is_playing(!self.element.paused()));
            }
            MediaEvent::TimeUpdate | MediaEvent::Seeked => {
                self.store
                    .update(StateUpdate::new().current_time(self.element.current_time()));
            }
            MediaEvent::DurationChange => {
                let duration = self.element.duration();
                if duration.is_finite() {
                    self.store.update(StateUpdate::new().duration(duration));
                }
            }
            MediaEvent::Ended => {
                tracing::info!("Track ended");
                self.store.update(
                    StateUpdate::new()
                        .is_playing(false)
                        .is_track_ended(true),
                );
                if self.xr.exit_xr() {
                    tracing::info!("Exited XR mode at end of track");
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{LoadScript, MediaCatalog, MediaErrorCode, SimulatedMedia, SimulatedShadows};
    use crate::state::{EventKind, StateEvent, StateField};
    use crate::test_utils::{audio_only_track, settle, xr_track};
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Fixture {
        session: Session,
        catalog: Arc<MediaCatalog>,
        audio: SimulatedMedia,
        video: SimulatedMedia,
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(MediaCatalog::default());
        let audio = SimulatedMedia::new(MediaKind::Audio, Arc::clone(&catalog));
        let video = SimulatedMedia::new(MediaKind::Video, Arc::clone(&catalog));
        let session = Session::new(
            audio.handle(),
            video.handle(),
            Arc::new(SimulatedShadows::new(Arc::clone(&catalog))),
            Collaborators::default(),
            Config::default(),
        );
        Fixture {
            session,
            catalog,
            audio,
            video,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_starts_initialized() {
        let f = fixture();
        let state = f.session.state();
        assert!(state.player_initialized);
        assert_eq!(state.mode, Mode::AudioOnly);
        assert_eq!(state.volume, 1.0);
        assert!(f.video.muted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_track_publishes_track() {
        let f = fixture();
        let readiness = f.session.load_track(xr_track()).await.unwrap();
        assert!(readiness.is_confirmed());

        let state = f.session.state();
        assert_eq!(state.current_track, Some(xr_track()));
        assert_eq!(state.duration, 180.0);
        assert!(state.media_ready);
        assert!(state.audio_buffered);
        assert!(!state.is_playing);
        assert_eq!(f.audio.src().as_deref(), Some("a.mp3"));
        assert_eq!(f.video.src().as_deref(), Some("v.mp4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_track_rejects_missing_audio() {
        let f = fixture();
        let err = f
            .session
            .load_track(Track::audio("Broken", " "))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTrack(_)));
        assert!(f.session.state().current_track.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_track_leaves_xr_and_resets_preloads() {
        let f = fixture();
        f.session.load_track(xr_track()).await.unwrap();
        f.session.enter_xr().await.unwrap();
        assert!(f.session.state().video_buffered);

        f.session.load_track(audio_only_track()).await.unwrap();

        let state = f.session.state();
        assert_eq!(state.mode, Mode::AudioOnly);
        assert!(!state.video_buffered);
        assert!(!f.audio.muted());
        assert!(f.video.muted());
        assert_eq!(
            f.session.enter_xr().await,
            Err(XrError::NotXrCapable)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_playing_track_keeps_playing_after_switch() {
        let f = fixture();
        f.session.load_track(audio_only_track()).await.unwrap();
        f.session.play().await.unwrap();

        f.session.load_track(xr_track()).await.unwrap();
        settle().await;
        assert!(!f.audio.paused());
        assert!(f.session.state().is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_fields_follow_audio() {
        let f = fixture();
        f.session.load_track(audio_only_track()).await.unwrap();

        f.session.play().await.unwrap();
        settle().await;
        assert!(f.session.state().is_playing);

        f.audio.advance(12.5);
        settle().await;
        assert_eq!(f.session.state().current_time, 12.5);

        f.session.pause();
        settle().await;
        assert!(!f.session.state().is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_end_leaves_xr() {
        let f = fixture();
        f.session.load_track(xr_track()).await.unwrap();
        f.session.play().await.unwrap();
        f.session.enter_xr().await.unwrap();

        f.audio.advance(500.0);
        settle().await;

        let state = f.session.state();
        assert!(state.is_track_ended);
        assert!(!state.is_playing);
        assert_eq!(state.mode, Mode::AudioOnly);
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_error_is_logged() {
        let f = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = f.session.store().subscribe(EventKind::Error, move |event| {
            if let StateEvent::Error(record) = event {
                sink.lock().push(record.clone());
            }
        });

        f.session.gate().loading().show();
        f.video.fire(MediaEvent::Error(MediaErrorCode::SrcNotSupported));
        settle().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message, "Media error (video)");
        assert_eq!(seen[0].detail.as_deref(), Some("Media format not supported"));
        assert_eq!(f.session.gate().loading().active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_during_pending_audio_preload_keeps_audio_audible() {
        let f = fixture();
        f.catalog.script("a.mp3", [LoadScript::Silent]);

        let first = f.session.load_track(xr_track());
        let second = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(f.audio.muted());
            f.session.load_track(audio_only_track()).await
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap(), Readiness::Superseded);
        assert!(second.unwrap().is_confirmed());

        let state = f.session.state();
        assert_eq!(state.mode, Mode::AudioOnly);
        assert_eq!(state.current_track, Some(audio_only_track()));
        assert!(!state.is_muted);
        assert!(!f.audio.muted());
        assert_eq!(f.audio.volume(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_without_video_does_not_reuse_previous_video() {
        let f = fixture();
        f.session.load_track(xr_track()).await.unwrap();
        assert_eq!(f.video.src().as_deref(), Some("v.mp4"));

        let mut next = Track::audio("Next", "c.mp3");
        next.is_xr_capable = true;
        f.session.load_track(next).await.unwrap();

        assert!(f.video.src().is_none());
        assert_eq!(f.session.enter_xr().await, Err(XrError::NoVideoSource));
        assert_eq!(f.session.mode(), Mode::AudioOnly);
        assert!(f.video.muted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_stays_visible_while_fallback_recovers() {
        let f = fixture();
        f.catalog.script("v.mp4", [
            // Session load, gate load, shadow element
            LoadScript::ready(),
            LoadScript::Fail {
                after: Duration::from_millis(10),
                code: MediaErrorCode::Network,
            },
            LoadScript::Ready {
                after: Duration::from_secs(2),
                duration: 180.0,
            },
        ]);
        f.session.load_track(xr_track()).await.unwrap();

        let entering = f.session.enter_xr();
        let during = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            (
                f.session.state().is_preloading,
                f.session.gate().loading().active_count(),
            )
        };
        let (entered, (preloading, count)) = tokio::join!(entering, during);

        assert!(preloading);
        assert!(count > 0);
        assert_eq!(entered, Ok(Mode::Xr));
        assert!(!f.session.state().is_preloading);
        assert_eq!(f.session.gate().loading().active_count(), 0);
        assert!(f
            .session
            .state()
            .errors
            .iter()
            .any(|e| e.message == "Media error (video)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unplayable_audio_still_loads() {
        let f = fixture();
        f.catalog.script("a.mp3", [LoadScript::Silent]);

        let readiness = f.session.load_track(xr_track()).await.unwrap();
        assert_eq!(
            readiness,
            Readiness::Unconfirmed(crate::preload::UnconfirmedReason::Timeout)
        );
        let state = f.session.state();
        assert!(state.media_ready);
        assert!(!state.audio_buffered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_volume_clamps_and_mirrors_in_xr() {
        let f = fixture();
        f.session.load_track(xr_track()).await.unwrap();
        f.session.enter_xr().await.unwrap();

        let changes = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&changes);
        let _sub = f
            .session
            .store()
            .subscribe(EventKind::Field(StateField::Volume), move |_| {
                *counter.lock() += 1;
            });

        f.session.set_volume(1.7);
        f.session.set_volume(0.4);
        settle().await;

        assert_eq!(f.audio.volume(), 0.4);
        assert_eq!(f.video.volume(), 0.4);
        assert_eq!(f.session.state().volume, 0.4);
        assert_eq!(*changes.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_cms_query() {
        let f = fixture();
        f.session
            .load_cms_query("trackName=Dawn&audio_src=a.mp3&XR_src=v.mp4&isXR=true")
            .await
            .unwrap();

        let track = f.session.state().current_track.unwrap();
        assert_eq!(track.title, "Dawn");
        assert!(track.is_xr_capable);
        assert_eq!(f.session.enter_xr().await, Ok(Mode::Xr));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_serializes() {
        let f = fixture();
        f.session.load_track(xr_track()).await.unwrap();
        f.session.enter_xr().await.unwrap();

        let json = serde_json::to_value(f.session.state()).unwrap();
        assert_eq!(json["mode"], "XR");
        assert_eq!(json["currentTrack"]["videoLocator"], "v.mp4");
    }
}
