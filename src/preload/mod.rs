//! Readiness gate: best-effort media preloading.
//!
//! [`ReadinessGate::preload`] drives a media element through loading and
//! hands back a [`PreloadHandle`] that always resolves. Media failures are
//! recovered through a shadow element or accepted as "resolved but
//! unconfirmed"; a hard timeout bounds the wait. Callers are never blocked
//! by unplayable media.
//!
//! # Handle identity
//!
//! At most one attempt per [`MediaKind`] is tracked. Asking again for the
//! same locator returns the same handle ([`PreloadHandle::ptr_eq`]); asking
//! for a different locator supersedes the tracked attempt.

mod attempt;
mod indicator;

pub use indicator::{LoadingIndicator, LoadingTracker, NoIndicator};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::config::PreloadConfig;
use crate::media::{MediaElement, MediaKind, ShadowFactory};
use crate::state::StateStore;
use attempt::{Attempt, Resolver};

/// Signal that confirmed a resource as playable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadySignal {
    CanPlayThrough,
    /// First frame decoded with future data buffered
    FirstFrame,
    Playing,
    /// Play-pause-rewind probe left the element playable
    Probe,
    /// Ready-state poll saw enough data
    Poll,
    /// Shadow element loaded the resource after the primary failed
    ShadowElement,
}

/// Why a preload resolved without confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnconfirmedReason {
    /// No signal fired before the ceiling
    Timeout,
    /// Primary and shadow element both failed
    FallbackFailed,
}

/// Outcome of a preload. There is no failure variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Confirmed(ReadySignal),
    Unconfirmed(UnconfirmedReason),
    /// Locator changed or the gate was reset before resolution
    Superseded,
}

impl Readiness {
    pub fn is_confirmed(self) -> bool {
        matches!(self, Readiness::Confirmed(_))
    }

    pub fn is_superseded(self) -> bool {
        matches!(self, Readiness::Superseded)
    }
}

/// Requests the gate refuses outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PreloadError {
    #[error("no media locator given")]
    EmptyLocator,

    #[error("readiness gate has no runtime to drive loading")]
    Inert,
}

/// In-flight (or finished) preload. Clones refer to the same attempt.
#[derive(Clone)]
pub struct PreloadHandle {
    attempt: Arc<Attempt>,
}

impl std::fmt::Debug for PreloadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadHandle")
            .field("kind", &self.attempt.kind)
            .field("locator", &self.attempt.locator)
            .field("outcome", &self.attempt.outcome())
            .finish()
    }
}

impl PreloadHandle {
    pub fn kind(&self) -> MediaKind {
        self.attempt.kind
    }

    pub fn locator(&self) -> &str {
        &self.attempt.locator
    }

    /// Whether two handles refer to the same attempt.
    pub fn ptr_eq(a: &PreloadHandle, b: &PreloadHandle) -> bool {
        Arc::ptr_eq(&a.attempt, &b.attempt)
    }

    /// Outcome if already resolved.
    pub fn outcome(&self) -> Option<Readiness> {
        self.attempt.outcome()
    }

    pub fn is_resolved(&self) -> bool {
        self.attempt.is_resolved()
    }

    /// Wait for resolution.
    pub async fn wait(&self) -> Readiness {
        self.attempt.wait().await
    }
}

impl IntoFuture for PreloadHandle {
    type Output = Readiness;
    type IntoFuture = BoxFuture<'static, Readiness>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.attempt.wait().await })
    }
}

struct GateInner {
    store: StateStore,
    audio: Arc<dyn MediaElement>,
    video: Arc<dyn MediaElement>,
    shadows: Arc<dyn ShadowFactory>,
    loading: LoadingTracker,
    config: PreloadConfig,
    runtime: Option<Handle>,
    tracked: Mutex<HashMap<MediaKind, PreloadHandle>>,
}

/// The readiness gate. Cheap to clone; clones share tracked handles.
#[derive(Clone)]
pub struct ReadinessGate {
    inner: Arc<GateInner>,
}

impl std::fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("tracked", &*self.inner.tracked.lock())
            .field("inert", &self.inner.runtime.is_none())
            .finish()
    }
}

impl ReadinessGate {
    /// Create a gate for the two player elements.
    ///
    /// Must be called inside a tokio runtime; otherwise the gate is inert and
    /// every `preload` is refused.
    pub fn new(
        store: StateStore,
        audio: Arc<dyn MediaElement>,
        video: Arc<dyn MediaElement>,
        shadows: Arc<dyn ShadowFactory>,
        loading: LoadingTracker,
        config: PreloadConfig,
    ) -> Self {
        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            tracing::error!("Readiness gate created outside a tokio runtime; preloading disabled");
        }

        store.update(
            crate::state::StateUpdate::new()
                .audio_buffered(false)
                .video_buffered(false)
                .is_preloading(false),
        );

        Self {
            inner: Arc::new(GateInner {
                store,
                audio,
                video,
                shadows,
                loading,
                config,
                runtime,
                tracked: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn element(&self, kind: MediaKind) -> &Arc<dyn MediaElement> {
        match kind {
            MediaKind::Audio => &self.inner.audio,
            MediaKind::Video => &self.inner.video,
        }
    }

    /// Start (or join) a preload of `locator` into the element of `kind`.
    pub fn preload(&self, kind: MediaKind, locator: &str) -> Result<PreloadHandle, PreloadError> {
        if locator.trim().is_empty() {
            return Err(PreloadError::EmptyLocator);
        }
        let Some(runtime) = self.inner.runtime.as_ref() else {
            return Err(PreloadError::Inert);
        };

        let (handle, stale) = {
            let mut tracked = self.inner.tracked.lock();
            match tracked.get(&kind) {
                Some(existing) if existing.locator() == locator => return Ok(existing.clone()),
                _ => {}
            }

            let handle = PreloadHandle {
                attempt: Arc::new(Attempt::new(kind, locator)),
            };
            let stale = tracked.insert(kind, handle.clone());
            (handle, stale)
        };

        if let Some(stale) = stale {
            tracing::info!("Starting new {} preload, replacing {}", kind, stale.locator());
            stale.attempt.supersede();
        }

        let element = Arc::clone(self.element(kind));
        let resolver = Resolver {
            attempt: Arc::clone(&handle.attempt),
            element,
            shadows: Arc::clone(&self.inner.shadows),
            store: self.inner.store.clone(),
            loading: self.inner.loading.clone(),
            config: self.inner.config.clone(),
        };
        attempt::start(resolver, runtime);

        Ok(handle)
    }

    /// Element of `kind` holds `locator` with enough data to play.
    pub fn is_ready(&self, kind: MediaKind, locator: &str) -> bool {
        self.element(kind).is_ready_for(locator)
    }

    /// Tracked handle for `kind`, if any.
    pub fn handle(&self, kind: MediaKind) -> Option<PreloadHandle> {
        self.inner.tracked.lock().get(&kind).cloned()
    }

    /// Some tracked preload has not resolved yet.
    pub fn has_pending(&self) -> bool {
        self.inner
            .tracked
            .lock()
            .values()
            .any(|handle| !handle.is_resolved())
    }

    /// Drop every tracked handle and clear the buffered flags.
    ///
    /// In-flight attempts resolve as [`Readiness::Superseded`].
    pub fn reset(&self) {
        let dropped: Vec<PreloadHandle> = self.inner.tracked.lock().drain().map(|(_, h)| h).collect();
        let had_pending = dropped.iter().any(|h| !h.is_resolved());
        for handle in &dropped {
            handle.attempt.supersede();
        }
        if had_pending {
            self.inner.loading.force_hide();
        }

        self.inner.store.update(
            crate::state::StateUpdate::new()
                .video_buffered(false)
                .audio_buffered(false),
        );
        tracing::debug!("Preload state reset ({} handles dropped)", dropped.len());
    }

    /// Shared loading indicator.
    pub fn loading(&self) -> &LoadingTracker {
        &self.inner.loading
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{LoadScript, MediaErrorCode, ReadyState};
    use crate::test_utils::Rig;
    use std::time::Duration;
    use tokio::time::Instant;

    const V: &str = "v.mp4";

    #[tokio::test(start_paused = true)]
    async fn test_ready_media_confirms_via_can_play_through() {
        let rig = Rig::new();
        rig.video.set_muted(false);

        let handle = rig.gate.preload(MediaKind::Video, V).unwrap();
        assert!(rig.store.get_state().is_preloading);

        let outcome = handle.wait().await;
        assert_eq!(outcome, Readiness::Confirmed(ReadySignal::CanPlayThrough));

        let state = rig.store.get_state();
        assert!(state.video_buffered);
        assert!(!state.is_preloading);
        assert_eq!(rig.gate.loading().active_count(), 0);
        assert!(rig.gate.is_ready(MediaKind::Video, V));
        // Muting during the load is undone afterwards
        assert!(!rig.video.muted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_element_configured_for_eager_cross_origin_load() {
        let rig = Rig::new();
        let _handle = rig.gate.preload(MediaKind::Video, V).unwrap();

        assert_eq!(rig.video.load_policy(), crate::media::LoadPolicy::eager());
        assert!(rig.video.muted());
        assert_eq!(rig.video.src().as_deref(), Some(V));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_locator_returns_same_handle() {
        let rig = Rig::new();
        let a = rig.gate.preload(MediaKind::Video, V).unwrap();
        let b = rig.gate.preload(MediaKind::Video, V).unwrap();

        assert!(PreloadHandle::ptr_eq(&a, &b));
        assert_eq!(rig.video.load_calls(), 1);

        let ra = a.wait().await;
        let rb = b.await;
        assert_eq!(ra, rb);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kinds_are_tracked_separately() {
        let rig = Rig::new();
        let video = rig.gate.preload(MediaKind::Video, "same.bin").unwrap();
        let audio = rig.gate.preload(MediaKind::Audio, "same.bin").unwrap();
        assert!(!PreloadHandle::ptr_eq(&video, &audio));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_locator_supersedes_stale_handle() {
        let rig = Rig::new();
        rig.catalog.script("old.mp4", [LoadScript::Silent]);

        let old = rig.gate.preload(MediaKind::Video, "old.mp4").unwrap();
        let new = rig.gate.preload(MediaKind::Video, V).unwrap();

        assert!(!PreloadHandle::ptr_eq(&old, &new));
        assert_eq!(old.outcome(), Some(Readiness::Superseded));
        assert!(new.wait().await.is_confirmed());
        assert!(PreloadHandle::ptr_eq(&rig.gate.handle(MediaKind::Video).unwrap(), &new));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_attempt_gives_element_back() {
        let rig = Rig::new();
        rig.catalog.script("old.mp3", [LoadScript::Silent]);
        rig.audio.set_volume(0.6);

        let old = rig.gate.preload(MediaKind::Audio, "old.mp3").unwrap();
        assert!(rig.audio.muted());

        let new = rig.gate.preload(MediaKind::Audio, "a.mp3").unwrap();
        assert_eq!(old.outcome(), Some(Readiness::Superseded));
        // Muted again for the new load, not by the stale one
        assert!(rig.audio.muted());

        assert!(new.wait().await.is_confirmed());
        assert!(!rig.audio.muted());
        assert_eq!(rig.audio.volume(), 0.6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_media_resolves_at_timeout() {
        let rig = Rig::new();
        rig.catalog.script(V, [LoadScript::Silent]);
        let start = Instant::now();

        let handle = rig.gate.preload(MediaKind::Video, V).unwrap();
        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert!(handle.outcome().is_none());

        let outcome = handle.wait().await;
        assert_eq!(outcome, Readiness::Unconfirmed(UnconfirmedReason::Timeout));
        assert_eq!(start.elapsed(), Duration::from_secs(10));

        let state = rig.store.get_state();
        assert!(!state.video_buffered);
        assert!(!state.is_preloading);
        assert!(state.errors.iter().any(|e| e.message.contains("timeout")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_frame_with_future_data() {
        let rig = Rig::new();
        rig.catalog.script(V, [LoadScript::Partial {
            after: Duration::from_millis(20),
            state: ReadyState::HaveFutureData,
        }]);

        let outcome = rig.gate.preload(MediaKind::Video, V).unwrap().await;
        assert_eq!(outcome, Readiness::Confirmed(ReadySignal::FirstFrame));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_frame_without_future_data_falls_to_poll() {
        let rig = Rig::new();
        rig.catalog.script(V, [LoadScript::Partial {
            after: Duration::from_millis(20),
            state: ReadyState::HaveCurrentData,
        }]);
        let start = Instant::now();

        let handle = rig.gate.preload(MediaKind::Video, V).unwrap();
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert!(handle.outcome().is_none());

        rig.video.set_ready_state(ReadyState::HaveFutureData);
        assert_eq!(handle.wait().await, Readiness::Confirmed(ReadySignal::Poll));
        assert_eq!(start.elapsed(), Duration::from_millis(1_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_confirms_buffered_element() {
        let rig = Rig::new();
        rig.catalog.script(V, [LoadScript::Silent]);

        let handle = rig.gate.preload(MediaKind::Video, V).unwrap();
        // Data arrives without any event
        rig.video.set_ready_state(ReadyState::HaveEnoughData);

        assert_eq!(handle.wait().await, Readiness::Confirmed(ReadySignal::Probe));
        assert!(rig.video.paused());
        assert_eq!(rig.video.current_time(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_refused_by_autoplay_policy_still_times_out() {
        let rig = Rig::new();
        rig.catalog.script(V, [LoadScript::Silent]);
        rig.video.set_autoplay_allowed(false);

        let handle = rig.gate.preload(MediaKind::Video, V).unwrap();
        assert_eq!(
            handle.wait().await,
            Readiness::Unconfirmed(UnconfirmedReason::Timeout)
        );
        assert_eq!(rig.video.play_calls(), 1);
        assert_eq!(rig.video.current_time(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_error_recovers_through_shadow() {
        let rig = Rig::new();
        rig.catalog.script(V, [
            LoadScript::Fail {
                after: Duration::from_millis(10),
                code: MediaErrorCode::Network,
            },
            LoadScript::ready(),
        ]);

        let outcome = rig.gate.preload(MediaKind::Video, V).unwrap().await;
        assert_eq!(outcome, Readiness::Confirmed(ReadySignal::ShadowElement));
        assert_eq!(rig.shadows.created(), 1);
        assert_eq!(rig.video.src().as_deref(), Some(V));
        assert!(rig.store.get_state().video_buffered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_attempts_failing_still_resolves() {
        let rig = Rig::new();
        rig.catalog.script(V, [LoadScript::Fail {
            after: Duration::from_millis(10),
            code: MediaErrorCode::Decode,
        }]);

        let outcome = rig.gate.preload(MediaKind::Video, V).unwrap().await;
        assert_eq!(outcome, Readiness::Unconfirmed(UnconfirmedReason::FallbackFailed));

        let state = rig.store.get_state();
        assert!(!state.video_buffered);
        assert!(!state.is_preloading);
        let last = state.errors.back().unwrap();
        assert!(last.message.contains("both attempts failed"));
        assert_eq!(last.detail.as_deref(), Some("Media decoding error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_shadow_factory_resolves_unconfirmed() {
        let rig = Rig::without_shadows();
        rig.catalog.script(V, [LoadScript::fail()]);

        let outcome = rig.gate.preload(MediaKind::Video, V).unwrap().await;
        assert_eq!(outcome, Readiness::Unconfirmed(UnconfirmedReason::FallbackFailed));
        assert!(rig
            .store
            .get_state()
            .errors
            .iter()
            .any(|e| e.message == "All loading attempts failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_first_signal_resolves() {
        let rig = Rig::new();
        let handle = rig.gate.preload(MediaKind::Video, V).unwrap();
        assert!(handle.wait().await.is_confirmed());

        let errors_before = rig.store.get_state().errors.len();
        // Late signals are inert
        rig.video.fire(crate::media::MediaEvent::Error(MediaErrorCode::Network));
        rig.video.fire(crate::media::MediaEvent::Playing);
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(handle.outcome(), Some(Readiness::Confirmed(ReadySignal::CanPlayThrough)));
        assert_eq!(rig.store.get_state().errors.len(), errors_before);
        assert_eq!(rig.shadows.created(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_supersedes_and_clears_flags() {
        let rig = Rig::new();
        rig.catalog.script(V, [LoadScript::Silent]);
        let ready = rig.gate.preload(MediaKind::Audio, "a.mp3").unwrap();
        assert!(ready.wait().await.is_confirmed());
        let pending = rig.gate.preload(MediaKind::Video, V).unwrap();
        assert!(rig.gate.has_pending());

        rig.gate.reset();
        assert!(!rig.gate.has_pending());

        assert_eq!(pending.outcome(), Some(Readiness::Superseded));
        assert!(rig.gate.handle(MediaKind::Video).is_none());
        assert!(rig.gate.handle(MediaKind::Audio).is_none());
        let state = rig.store.get_state();
        assert!(!state.audio_buffered);
        assert!(!state.video_buffered);
        assert!(!state.is_preloading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restores_element_mute() {
        let rig = Rig::new();
        rig.catalog.script("a.mp3", [LoadScript::Silent]);
        rig.catalog.script(V, [LoadScript::Silent]);
        rig.audio.set_volume(0.4);

        let audio = rig.gate.preload(MediaKind::Audio, "a.mp3").unwrap();
        let video = rig.gate.preload(MediaKind::Video, V).unwrap();
        assert!(rig.audio.muted());

        rig.gate.reset();

        assert!(audio.outcome().unwrap().is_superseded());
        assert!(video.outcome().unwrap().is_superseded());
        assert!(!rig.audio.muted());
        assert_eq!(rig.audio.volume(), 0.4);
        // The video element was muted before its preload and stays so
        assert!(rig.video.muted());
        assert_eq!(rig.gate.loading().active_count(), 0);

        // Nothing left running flips the flag later
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!rig.audio.muted());
    }

    #[tokio::test]
    async fn test_empty_locator_is_rejected() {
        let rig = Rig::new();
        assert_eq!(
            rig.gate.preload(MediaKind::Video, "  ").unwrap_err(),
            PreloadError::EmptyLocator
        );
    }

    #[test]
    fn test_gate_outside_runtime_is_inert() {
        let rig = Rig::new();
        assert_eq!(
            rig.gate.preload(MediaKind::Video, V).unwrap_err(),
            PreloadError::Inert
        );
    }
}
