//! In-memory media elements.
//!
//! [`SimulatedMedia`] behaves like an HTML media element whose network and
//! decoder are replaced by per-locator [`LoadScript`]s held in a shared
//! [`MediaCatalog`]. Scripts run on the tokio timer, so tests with a paused
//! clock see fully deterministic event sequences.
//!
//! Time does not advance on its own; call [`SimulatedMedia::advance`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

use super::{
    LoadPolicy, MediaElement, MediaErrorCode, MediaEvent, MediaKind, PlayError, ReadyState,
    ShadowFactory,
};

/// What happens after `load()` for a given locator.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadScript {
    /// Metadata, first frame and can-play-through after `after`
    Ready { after: Duration, duration: f64 },
    /// First frame only, leaving the element at `state`
    Partial { after: Duration, state: ReadyState },
    /// Media error after `after`
    Fail { after: Duration, code: MediaErrorCode },
    /// No event ever fires
    Silent,
}

impl LoadScript {
    /// Loads in 50ms, three minutes long.
    pub fn ready() -> Self {
        LoadScript::Ready {
            after: Duration::from_millis(50),
            duration: 180.0,
        }
    }

    /// Network failure after 50ms.
    pub fn fail() -> Self {
        LoadScript::Fail {
            after: Duration::from_millis(50),
            code: MediaErrorCode::Network,
        }
    }
}

/// Per-locator load scripts shared by every simulated element.
///
/// Each `load()` consumes the front script for its locator; the last script
/// is sticky. Unknown locators use the default script.
#[derive(Debug)]
pub struct MediaCatalog {
    scripts: Mutex<HashMap<String, VecDeque<LoadScript>>>,
    default_script: LoadScript,
}

impl Default for MediaCatalog {
    fn default() -> Self {
        Self::new(LoadScript::ready())
    }
}

impl MediaCatalog {
    pub fn new(default_script: LoadScript) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_script,
        }
    }

    /// Set the script sequence for a locator.
    pub fn script(&self, locator: &str, scripts: impl IntoIterator<Item = LoadScript>) {
        let queue: VecDeque<LoadScript> = scripts.into_iter().collect();
        self.scripts.lock().insert(locator.to_string(), queue);
    }

    fn next_for(&self, locator: &str) -> LoadScript {
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(locator) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| self.default_script.clone()),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| self.default_script.clone()),
            None => self.default_script.clone(),
        }
    }
}

#[derive(Debug)]
struct SimState {
    src: Option<String>,
    ready: ReadyState,
    time: f64,
    duration: f64,
    volume: f64,
    muted: bool,
    paused: bool,
    policy: LoadPolicy,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            src: None,
            ready: ReadyState::HaveNothing,
            time: 0.0,
            duration: f64::NAN,
            volume: 1.0,
            muted: false,
            paused: true,
            policy: LoadPolicy::default(),
        }
    }
}

struct SimShared {
    kind: MediaKind,
    catalog: Arc<MediaCatalog>,
    state: Mutex<SimState>,
    events: broadcast::Sender<MediaEvent>,
    autoplay_allowed: AtomicBool,
    generation: AtomicU64,
    play_calls: AtomicU64,
    load_calls: AtomicU64,
}

/// Scriptable media element. Clones share the same element.
#[derive(Clone)]
pub struct SimulatedMedia {
    shared: Arc<SimShared>,
}

impl std::fmt::Debug for SimulatedMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedMedia")
            .field("kind", &self.shared.kind)
            .field("state", &*self.shared.state.lock())
            .finish()
    }
}

impl SimulatedMedia {
    pub fn new(kind: MediaKind, catalog: Arc<MediaCatalog>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(SimShared {
                kind,
                catalog,
                state: Mutex::new(SimState::default()),
                events,
                autoplay_allowed: AtomicBool::new(true),
                generation: AtomicU64::new(0),
                play_calls: AtomicU64::new(0),
                load_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Share this element as a trait object.
    pub fn handle(&self) -> Arc<dyn MediaElement> {
        Arc::new(self.clone())
    }

    /// Whether `play()` succeeds without a user gesture.
    pub fn set_autoplay_allowed(&self, allowed: bool) {
        self.shared.autoplay_allowed.store(allowed, Ordering::SeqCst);
    }

    /// Emit an arbitrary event.
    pub fn fire(&self, event: MediaEvent) {
        let _ = self.shared.events.send(event);
    }

    /// Force the buffered-data level.
    pub fn set_ready_state(&self, ready: ReadyState) {
        self.shared.state.lock().ready = ready;
    }

    /// Move the playhead forward by `secs` if playing.
    ///
    /// Emits `TimeUpdate`, and `Ended` when the end is reached.
    pub fn advance(&self, secs: f64) {
        let ended = {
            let mut state = self.shared.state.lock();
            if state.paused {
                return;
            }
            state.time += secs;
            if state.duration.is_finite() && state.time >= state.duration {
                state.time = state.duration;
                state.paused = true;
                true
            } else {
                false
            }
        };
        self.fire(MediaEvent::TimeUpdate);
        if ended {
            self.fire(MediaEvent::Pause);
            self.fire(MediaEvent::Ended);
        }
    }

    /// Number of `play()` calls so far.
    pub fn play_calls(&self) -> u64 {
        self.shared.play_calls.load(Ordering::SeqCst)
    }

    /// Number of `load()` calls so far.
    pub fn load_calls(&self) -> u64 {
        self.shared.load_calls.load(Ordering::SeqCst)
    }

    pub fn load_policy(&self) -> LoadPolicy {
        self.shared.state.lock().policy
    }

    fn run_script(&self, generation: u64, script: LoadScript) {
        let delay = match &script {
            LoadScript::Ready { after, .. }
            | LoadScript::Partial { after, .. }
            | LoadScript::Fail { after, .. } => *after,
            LoadScript::Silent => return,
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("Simulated {} element loaded outside a runtime", self.shared.kind);
            return;
        };

        let element = self.clone();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // A newer load() supersedes this script
            if element.shared.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            match script {
                LoadScript::Ready { duration, .. } => {
                    {
                        let mut state = element.shared.state.lock();
                        state.duration = duration;
                        state.ready = ReadyState::HaveCurrentData;
                    }
                    element.fire(MediaEvent::DurationChange);
                    element.fire(MediaEvent::LoadedData);

                    // Listeners see the first frame before the rest arrives
                    tokio::task::yield_now().await;
                    if element.shared.generation.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    element.shared.state.lock().ready = ReadyState::HaveEnoughData;
                    element.fire(MediaEvent::CanPlayThrough);
                }
                LoadScript::Partial { state: ready, .. } => {
                    element.shared.state.lock().ready = ready;
                    element.fire(MediaEvent::LoadedData);
                }
                LoadScript::Fail { code, .. } => {
                    element.fire(MediaEvent::Error(code));
                }
                LoadScript::Silent => {}
            }
        });
    }
}

#[async_trait]
impl MediaElement for SimulatedMedia {
    fn kind(&self) -> MediaKind {
        self.shared.kind
    }

    fn src(&self) -> Option<String> {
        self.shared.state.lock().src.clone()
    }

    fn set_src(&self, locator: &str) {
        self.shared.state.lock().src = Some(locator.to_string());
    }

    fn clear_src(&self) {
        // Pending scripts see the new generation and stop
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let mut state = self.shared.state.lock();
        state.src = None;
        state.ready = ReadyState::HaveNothing;
        state.time = 0.0;
        state.duration = f64::NAN;
        state.paused = true;
    }

    fn load(&self) {
        self.shared.load_calls.fetch_add(1, Ordering::SeqCst);
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let src = {
            let mut state = self.shared.state.lock();
            state.ready = ReadyState::HaveNothing;
            state.time = 0.0;
            state.duration = f64::NAN;
            state.paused = true;
            state.src.clone()
        };
        self.fire(MediaEvent::LoadStart);

        match src {
            Some(src) => {
                let script = self.shared.catalog.next_for(&src);
                self.run_script(generation, script);
            }
            None => self.run_script(
                generation,
                LoadScript::Fail {
                    after: Duration::ZERO,
                    code: MediaErrorCode::SrcNotSupported,
                },
            ),
        }
    }

    fn set_load_policy(&self, policy: LoadPolicy) {
        self.shared.state.lock().policy = policy;
    }

    fn ready_state(&self) -> ReadyState {
        self.shared.state.lock().ready
    }

    fn current_time(&self) -> f64 {
        self.shared.state.lock().time
    }

    fn set_current_time(&self, secs: f64) {
        {
            let mut state = self.shared.state.lock();
            let mut target = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
            if state.duration.is_finite() {
                target = target.min(state.duration);
            }
            state.time = target;
        }
        self.fire(MediaEvent::Seeking);
        self.fire(MediaEvent::Seeked);
    }

    fn duration(&self) -> f64 {
        self.shared.state.lock().duration
    }

    fn volume(&self) -> f64 {
        self.shared.state.lock().volume
    }

    fn set_volume(&self, volume: f64) {
        let changed = {
            let mut state = self.shared.state.lock();
            let volume = volume.clamp(0.0, 1.0);
            let changed = state.volume != volume;
            state.volume = volume;
            changed
        };
        if changed {
            self.fire(MediaEvent::VolumeChange);
        }
    }

    fn muted(&self) -> bool {
        self.shared.state.lock().muted
    }

    fn set_muted(&self, muted: bool) {
        let changed = std::mem::replace(&mut self.shared.state.lock().muted, muted) != muted;
        if changed {
            self.fire(MediaEvent::VolumeChange);
        }
    }

    fn paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    async fn play(&self) -> Result<(), PlayError> {
        self.shared.play_calls.fetch_add(1, Ordering::SeqCst);
        if !self.shared.autoplay_allowed.load(Ordering::SeqCst) {
            return Err(PlayError::NotAllowed);
        }

        let (started, playable) = {
            let mut state = self.shared.state.lock();
            if state.src.is_none() {
                return Err(PlayError::NoSource);
            }
            let started = std::mem::replace(&mut state.paused, false);
            (started, state.ready.is_playable())
        };
        if started {
            self.fire(MediaEvent::Play);
            if playable {
                self.fire(MediaEvent::Playing);
            }
        }
        Ok(())
    }

    fn pause(&self) {
        let was_playing = !std::mem::replace(&mut self.shared.state.lock().paused, true);
        if was_playing {
            self.fire(MediaEvent::Pause);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.shared.events.subscribe()
    }
}

/// Shadow factory producing simulated elements from the same catalog.
#[derive(Debug, Clone)]
pub struct SimulatedShadows {
    catalog: Arc<MediaCatalog>,
    created: Arc<AtomicU64>,
}

impl SimulatedShadows {
    pub fn new(catalog: Arc<MediaCatalog>) -> Self {
        Self {
            catalog,
            created: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of shadow elements created so far.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }
}

impl ShadowFactory for SimulatedShadows {
    fn create(&self, kind: MediaKind) -> Option<Arc<dyn MediaElement>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Some(SimulatedMedia::new(kind, Arc::clone(&self.catalog)).handle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(catalog: &Arc<MediaCatalog>) -> SimulatedMedia {
        SimulatedMedia::new(MediaKind::Video, Arc::clone(catalog))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_script_fires_in_order() {
        let catalog = Arc::new(MediaCatalog::default());
        let element = video(&catalog);
        let mut events = element.subscribe();

        element.set_src("v.mp4");
        element.load();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(events.recv().await.unwrap(), MediaEvent::LoadStart);
        assert_eq!(events.recv().await.unwrap(), MediaEvent::DurationChange);
        assert_eq!(events.recv().await.unwrap(), MediaEvent::LoadedData);
        assert_eq!(events.recv().await.unwrap(), MediaEvent::CanPlayThrough);
        assert_eq!(element.ready_state(), ReadyState::HaveEnoughData);
        assert_eq!(element.duration(), 180.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripts_are_consumed_then_sticky() {
        let catalog = Arc::new(MediaCatalog::default());
        catalog.script("v.mp4", [LoadScript::fail(), LoadScript::ready()]);

        assert!(matches!(catalog.next_for("v.mp4"), LoadScript::Fail { .. }));
        assert!(matches!(catalog.next_for("v.mp4"), LoadScript::Ready { .. }));
        assert!(matches!(catalog.next_for("v.mp4"), LoadScript::Ready { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_load_supersedes_script() {
        let catalog = Arc::new(MediaCatalog::default());
        catalog.script("slow.mp4", [LoadScript::Fail {
            after: Duration::from_millis(100),
            code: MediaErrorCode::Decode,
        }]);
        let element = video(&catalog);

        element.set_src("slow.mp4");
        element.load();
        element.set_src("v.mp4");
        element.load();
        let mut events = element.subscribe();
        tokio::time::sleep(Duration::from_millis(200)).await;

        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, MediaEvent::Error(_)));
        }
        assert!(element.ready_state().is_playable());
    }

    #[tokio::test]
    async fn test_autoplay_policy() {
        let catalog = Arc::new(MediaCatalog::default());
        let element = video(&catalog);
        element.set_src("v.mp4");
        element.set_autoplay_allowed(false);

        assert_eq!(element.play().await, Err(PlayError::NotAllowed));
        assert!(element.paused());

        element.set_autoplay_allowed(true);
        assert_eq!(element.play().await, Ok(()));
        assert!(!element.paused());
        assert_eq!(element.play_calls(), 2);
    }

    #[tokio::test]
    async fn test_play_without_source() {
        let catalog = Arc::new(MediaCatalog::default());
        let element = video(&catalog);
        assert_eq!(element.play().await, Err(PlayError::NoSource));
    }

    #[test]
    fn test_volume_and_mute_emit_volume_change() {
        let catalog = Arc::new(MediaCatalog::default());
        let element = video(&catalog);
        let mut events = element.subscribe();

        element.set_volume(0.4);
        element.set_volume(0.4);
        element.set_muted(true);

        assert_eq!(events.try_recv().unwrap(), MediaEvent::VolumeChange);
        assert_eq!(events.try_recv().unwrap(), MediaEvent::VolumeChange);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_advance_to_end() {
        let catalog = Arc::new(MediaCatalog::default());
        let element = video(&catalog);
        element.set_src("v.mp4");
        element.shared.state.lock().duration = 5.0;
        element.play().await.unwrap();

        let mut events = element.subscribe();
        element.advance(10.0);

        assert_eq!(element.current_time(), 5.0);
        assert!(element.paused());
        assert_eq!(events.try_recv().unwrap(), MediaEvent::TimeUpdate);
        assert_eq!(events.try_recv().unwrap(), MediaEvent::Pause);
        assert_eq!(events.try_recv().unwrap(), MediaEvent::Ended);
    }
}
