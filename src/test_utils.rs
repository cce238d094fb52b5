//! Test utilities and fixtures for xr-player tests.
//!
//! [`Rig`] wires a state store, a readiness gate and a mode synchronizer to
//! two simulated elements sharing one [`MediaCatalog`], the way a session
//! does, but keeps every piece reachable for assertions.
//!
//! # Example
//!
//! ```ignore
//! use xr_player::test_utils::{Rig, xr_track};
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_something() {
//!     let rig = Rig::new();
//!     rig.set_track(xr_track());
//!     rig.xr.enter_xr().await.unwrap();
//! }
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::Config;
use crate::media::{
    MediaCatalog, MediaElement, MediaKind, NoShadow, ShadowFactory, SimulatedMedia,
    SimulatedShadows,
};
use crate::model::Track;
use crate::preload::{LoadingTracker, NoIndicator, ReadinessGate};
use crate::state::{StateStore, StateUpdate};
use crate::xr::{Collaborators, ModeSynchronizer, Notifier, SceneError, SceneHost};

/// Track with audio and an XR video ("a.mp3" / "v.mp4").
pub fn xr_track() -> Track {
    Track::audio("Into the Deep", "a.mp3")
        .with_video("v.mp4")
        .chapter("Chapter One")
        .order(1)
}

/// Track without XR content ("b.mp3").
pub fn audio_only_track() -> Track {
    Track::audio("Interlude", "b.mp3").order(2)
}

/// Let spawned tasks run. The clock only moves when paused.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Scene host recording every call.
#[derive(Default)]
pub struct RecordingScene {
    pub visible: Mutex<Vec<bool>>,
    resets: AtomicUsize,
    failing: AtomicBool,
}

impl RecordingScene {
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Make every following camera reset fail.
    pub fn fail_reset(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl SceneHost for RecordingScene {
    fn set_visible(&self, visible: bool) {
        self.visible.lock().push(visible);
    }

    fn reset_camera(&self) -> Result<(), SceneError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SceneError::NoCamera);
        }
        Ok(())
    }

    fn recenter(&self) -> bool {
        true
    }
}

/// Notifier collecting every notice.
#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}

/// Fully wired components over simulated media.
pub struct Rig {
    pub config: Config,
    pub store: StateStore,
    pub catalog: Arc<MediaCatalog>,
    pub audio: SimulatedMedia,
    pub video: SimulatedMedia,
    pub shadows: SimulatedShadows,
    pub scene: Arc<RecordingScene>,
    pub notifier: Arc<RecordingNotifier>,
    pub gate: ReadinessGate,
    pub xr: ModeSynchronizer,
}

impl Rig {
    /// Every locator loads in 50ms unless scripted otherwise.
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Like [`Rig::new`] but the preload fallback has no shadow element.
    pub fn without_shadows() -> Self {
        Self::build(false)
    }

    fn build(with_shadows: bool) -> Self {
        let config = Config::default();
        let store = StateStore::new(&config.store);
        let catalog = Arc::new(MediaCatalog::default());
        let audio = SimulatedMedia::new(MediaKind::Audio, Arc::clone(&catalog));
        let video = SimulatedMedia::new(MediaKind::Video, Arc::clone(&catalog));
        let shadows = SimulatedShadows::new(Arc::clone(&catalog));
        let scene = Arc::new(RecordingScene::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let factory: Arc<dyn ShadowFactory> = if with_shadows {
            Arc::new(shadows.clone())
        } else {
            Arc::new(NoShadow)
        };
        let loading = LoadingTracker::new(store.clone(), Arc::new(NoIndicator));
        let gate = ReadinessGate::new(
            store.clone(),
            audio.handle(),
            video.handle(),
            factory,
            loading,
            config.preload.clone(),
        );
        let xr = ModeSynchronizer::new(
            store.clone(),
            gate.clone(),
            audio.handle(),
            video.handle(),
            Collaborators {
                scene: scene.clone(),
                notifier: notifier.clone(),
                ..Collaborators::default()
            },
            config.sync.clone(),
        );

        Self {
            config,
            store,
            catalog,
            audio,
            video,
            shadows,
            scene,
            notifier,
            gate,
            xr,
        }
    }

    /// Publish `track` as current and start loading its audio.
    pub fn set_track(&self, track: Track) {
        self.audio.set_src(&track.audio_locator);
        self.audio.load();
        self.store
            .update(StateUpdate::new().current_track(Some(track)));
    }
}
