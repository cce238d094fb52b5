//! A single preload attempt and the signals racing to resolve it.
//!
//! Five independent signals are started for every attempt:
//!
//! 1. `CanPlayThrough` on the element
//! 2. the first `LoadedData`, if the element already holds future data
//! 3. `Playing` (decoders that skip the events above)
//! 4. a muted play-pause-rewind probe shortly after the load starts
//! 5. a bounded ready-state poll
//!
//! plus a hard timeout. A media error hands over to a disposable shadow
//! element. Whichever path gets there first flips the `resolved` flag; every
//! later signal sees the flag and does nothing. Resolution aborts the
//! remaining tasks.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;
use tokio::time::{Instant, interval_at, sleep};

use super::indicator::LoadingTracker;
use super::{Readiness, ReadySignal, UnconfirmedReason};
use crate::config::PreloadConfig;
use crate::media::{
    LoadPolicy, MediaElement, MediaErrorCode, MediaEvent, MediaKind, ShadowFactory,
};
use crate::state::{StateStore, StateUpdate};

/// Shared resolution state of one attempt.
pub(crate) struct Attempt {
    pub(crate) kind: MediaKind,
    pub(crate) locator: String,
    resolved: AtomicBool,
    fallback_started: AtomicBool,
    outcome: watch::Sender<Option<Readiness>>,
    tasks: Mutex<Vec<AbortHandle>>,
    /// Element muted for the probe, with the flag to put back
    muted_override: Mutex<Option<(Arc<dyn MediaElement>, bool)>>,
}

impl Attempt {
    pub(crate) fn new(kind: MediaKind, locator: &str) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            kind,
            locator: locator.to_string(),
            resolved: AtomicBool::new(false),
            fallback_started: AtomicBool::new(false),
            outcome,
            tasks: Mutex::new(Vec::new()),
            muted_override: Mutex::new(None),
        }
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::SeqCst)
    }

    pub(crate) fn outcome(&self) -> Option<Readiness> {
        *self.outcome.borrow()
    }

    pub(crate) async fn wait(&self) -> Readiness {
        let mut rx = self.outcome.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).unwrap_or(Readiness::Superseded),
            Err(_) => Readiness::Superseded,
        }
    }

    /// Claim the right to resolve. Only the first caller gets `true`.
    fn claim(&self) -> bool {
        self.resolved
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Publish the outcome and stop every remaining signal.
    fn finish(&self, outcome: Readiness) {
        self.outcome.send_replace(Some(outcome));
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Resolve as superseded. The element gets its mute flag back; the
    /// store is left to whoever replaces this attempt.
    pub(crate) fn supersede(&self) {
        if self.claim() {
            tracing::debug!("Preload of {} {} superseded", self.kind, self.locator);
            self.restore_mute();
            self.finish(Readiness::Superseded);
        }
    }

    /// Mute `element` until the attempt resolves.
    fn override_mute(&self, element: &Arc<dyn MediaElement>) {
        *self.muted_override.lock() = Some((Arc::clone(element), element.muted()));
        element.set_muted(true);
    }

    fn restore_mute(&self) {
        let taken = self.muted_override.lock().take();
        if let Some((element, was_muted)) = taken {
            element.set_muted(was_muted);
        }
    }

    fn register(&self, task: AbortHandle) {
        let mut tasks = self.tasks.lock();
        if self.is_resolved() {
            task.abort();
        } else {
            tasks.push(task);
        }
    }
}

/// Everything a signal task needs to resolve its attempt.
#[derive(Clone)]
pub(crate) struct Resolver {
    pub(crate) attempt: Arc<Attempt>,
    pub(crate) element: Arc<dyn MediaElement>,
    pub(crate) shadows: Arc<dyn ShadowFactory>,
    pub(crate) store: StateStore,
    pub(crate) loading: LoadingTracker,
    pub(crate) config: PreloadConfig,
}

impl Resolver {
    fn resolve(&self, outcome: Readiness) -> bool {
        if !self.attempt.claim() {
            return false;
        }
        self.complete(outcome);
        true
    }

    /// Side effects of a won resolution.
    fn complete(&self, outcome: Readiness) {
        let kind = self.attempt.kind;
        match outcome {
            Readiness::Confirmed(signal) => {
                tracing::info!("{} preloaded via {:?}: {}", kind, signal, self.attempt.locator);
            }
            Readiness::Unconfirmed(reason) => {
                tracing::warn!(
                    "{} preload unconfirmed ({:?}), continuing anyway: {}",
                    kind,
                    reason,
                    self.attempt.locator
                );
            }
            Readiness::Superseded => {}
        }

        self.attempt.restore_mute();
        self.store
            .update(buffered(kind, outcome.is_confirmed()).is_preloading(false));
        self.loading.force_hide();
        self.attempt.finish(outcome);
    }

    fn is_resolved(&self) -> bool {
        self.attempt.is_resolved()
    }

    fn spawn<F>(&self, runtime: &Handle, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = runtime.spawn(task);
        self.attempt.register(handle.abort_handle());
    }
}

/// Store update for a kind's buffered flag.
pub(crate) fn buffered(kind: MediaKind, value: bool) -> StateUpdate {
    match kind {
        MediaKind::Audio => StateUpdate::new().audio_buffered(value),
        MediaKind::Video => StateUpdate::new().video_buffered(value),
    }
}

/// Configure the element, start loading and launch every signal.
pub(crate) fn start(resolver: Resolver, runtime: &Handle) {
    let element = &resolver.element;
    let locator = resolver.attempt.locator.clone();
    tracing::info!("Preloading {}: {}", resolver.attempt.kind, locator);

    // Subscribe before loading so no event can slip past
    let events = element.subscribe();

    resolver
        .store
        .update(buffered(resolver.attempt.kind, false).is_preloading(true));
    resolver.loading.show();

    resolver.attempt.override_mute(element);
    element.set_load_policy(LoadPolicy::eager());
    element.set_src(&locator);
    element.load();

    resolver.spawn(runtime, watch_events(resolver.clone(), events, runtime.clone()));
    resolver.spawn(runtime, probe(resolver.clone()));
    resolver.spawn(runtime, poll(resolver.clone()));
    resolver.spawn(runtime, timeout(resolver.clone()));
}

/// Signals 1-3 plus the hand-over to the fallback on a media error.
async fn watch_events(r: Resolver, mut events: broadcast::Receiver<MediaEvent>, runtime: Handle) {
    let mut first_frame_seen = false;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("Preload listener skipped {} events", skipped);
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        if r.is_resolved() {
            return;
        }

        match event {
            MediaEvent::CanPlayThrough => {
                r.resolve(Readiness::Confirmed(ReadySignal::CanPlayThrough));
            }
            MediaEvent::LoadedData if !first_frame_seen => {
                first_frame_seen = true;
                let ready = r.element.ready_state();
                tracing::debug!("{} loadeddata (ready state {:?})", r.attempt.kind, ready);
                if ready.is_playable() {
                    r.resolve(Readiness::Confirmed(ReadySignal::FirstFrame));
                }
            }
            MediaEvent::Playing => {
                r.resolve(Readiness::Confirmed(ReadySignal::Playing));
            }
            MediaEvent::Error(code) => {
                if !r.attempt.fallback_started.swap(true, Ordering::SeqCst) {
                    r.spawn(&runtime, fallback(r.clone(), code));
                }
            }
            _ => {}
        }
    }
}

/// Load the same locator into a disposable shadow element.
async fn fallback(r: Resolver, code: MediaErrorCode) {
    let kind = r.attempt.kind;
    let locator = r.attempt.locator.clone();
    tracing::error!("Error preloading {} {}: {}", kind, locator, code);
    tracing::info!("Attempting fallback loading method for {}", kind);

    let Some(shadow) = r.shadows.create(kind) else {
        if r.attempt.claim() {
            r.store.log_error(
                "All loading attempts failed",
                Some(format!("{}; no fallback element available", code)),
            );
            r.complete(Readiness::Unconfirmed(UnconfirmedReason::FallbackFailed));
        }
        return;
    };

    let mut events = shadow.subscribe();
    shadow.set_muted(true);
    shadow.set_load_policy(LoadPolicy::eager());
    shadow.set_src(&locator);
    shadow.load();

    loop {
        match events.recv().await {
            Ok(MediaEvent::CanPlayThrough) => {
                drop(shadow);
                // Hand the now-cached resource to the real element
                r.element.set_src(&locator);
                r.element.load();
                tracing::info!("Fallback loading successful for {}", kind);
                r.resolve(Readiness::Confirmed(ReadySignal::ShadowElement));
                return;
            }
            Ok(MediaEvent::Error(shadow_code)) => {
                drop(shadow);
                if r.attempt.claim() {
                    r.store.log_error(
                        format!("Error preloading {} (both attempts failed)", kind),
                        Some(shadow_code.message().to_string()),
                    );
                    r.complete(Readiness::Unconfirmed(UnconfirmedReason::FallbackFailed));
                }
                return;
            }
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => {
                if r.attempt.claim() {
                    r.store
                        .log_error("All loading attempts failed", Some(code.message().into()));
                    r.complete(Readiness::Unconfirmed(UnconfirmedReason::FallbackFailed));
                }
                return;
            }
        }
    }
}

/// Signal 4: coerce lazy engines into buffering.
async fn probe(r: Resolver) {
    sleep(r.config.probe_delay()).await;
    if r.is_resolved() {
        return;
    }

    match r.element.play().await {
        Ok(()) => {
            r.element.pause();
            r.element.set_current_time(0.0);
            tracing::debug!("{} played and paused to force preloading", r.attempt.kind);
            if r.element.ready_state().is_playable() {
                r.resolve(Readiness::Confirmed(ReadySignal::Probe));
            }
        }
        Err(e) => {
            tracing::warn!("Autoplay for preloading not permitted: {}", e);
            // Seeking also makes most engines fetch data
            r.element.set_current_time(0.1);
            sleep(r.config.nudge_delay()).await;
            if !r.is_resolved() {
                r.element.set_current_time(0.0);
            }
        }
    }
}

/// Signal 5: sample the ready state a bounded number of times.
async fn poll(r: Resolver) {
    let period = r.config.poll_interval();
    let mut ticker = interval_at(Instant::now() + period, period);

    for sample in 1..=r.config.poll_samples {
        ticker.tick().await;
        if r.is_resolved() {
            return;
        }
        let ready = r.element.ready_state();
        tracing::debug!("{} ready state check {}: {:?}", r.attempt.kind, sample, ready);
        if ready.is_playable() {
            r.resolve(Readiness::Confirmed(ReadySignal::Poll));
            return;
        }
    }

    tracing::warn!(
        "{} ready state checks exhausted after {} samples, waiting for timeout",
        r.attempt.kind,
        r.config.poll_samples
    );
}

/// Hard ceiling: resolve unconfirmed if nothing else did.
async fn timeout(r: Resolver) {
    sleep(r.config.timeout()).await;
    if r.attempt.claim() {
        r.store.log_error(
            format!("{} preload timeout - continuing anyway", r.attempt.kind),
            Some(r.attempt.locator.clone()),
        );
        r.complete(Readiness::Unconfirmed(UnconfirmedReason::Timeout));
    }
}
