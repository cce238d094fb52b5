//! The state store and its publish/subscribe fan-out.
//!
//! # Ordering
//!
//! For one [`StateStore::update`] call the aggregate
//! [`StateEvent::Changed`] is always delivered first, carrying a snapshot in
//! which every changed field is already visible. One
//! [`StateEvent::Field`] per changed field follows, in [`StateField::ALL`]
//! order.
//!
//! Callbacks run synchronously on the caller's thread with no state lock
//! held, so a callback may read the store or issue another update.
//!
//! Updates from different threads are serialized from apply to the last
//! emitted event: subscribers see snapshots in the order the updates were
//! applied. A nested update issued from a callback runs inside the outer
//! emission.

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use super::{FieldChange, PlayerState, StateField, StateFields, StateUpdate};
use crate::config::StoreConfig;
use crate::model::ErrorRecord;

/// Subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Any field changed
    StateChanged,
    /// A specific field changed
    Field(StateField),
    /// An error was logged
    Error,
}

/// Payload delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    /// Aggregate change with an independent snapshot
    Changed {
        fields: StateFields,
        snapshot: Box<PlayerState>,
    },
    /// New value of one field
    Field(FieldChange),
    /// Newly appended error record
    Error(ErrorRecord),
}

impl StateEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StateEvent::Changed { .. } => EventKind::StateChanged,
            StateEvent::Field(change) => EventKind::Field(change.field()),
            StateEvent::Error(_) => EventKind::Error,
        }
    }
}

/// Subscriber callback.
pub type Callback = Arc<dyn Fn(&StateEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(u64, Callback)>>,
}

struct StoreInner {
    state: RwLock<PlayerState>,
    subscribers: Mutex<Subscribers>,
    /// Held from apply to the last emitted event
    emitting: ReentrantMutex<()>,
    error_capacity: usize,
}

/// Owner of the canonical [`PlayerState`].
///
/// Cheap to clone; clones share the same state and subscribers.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("state", &*self.inner.state.read())
            .finish_non_exhaustive()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(&StoreConfig::default())
    }
}

impl StateStore {
    /// Create a store holding the default state.
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(PlayerState::default()),
                subscribers: Mutex::new(Subscribers::default()),
                emitting: ReentrantMutex::new(()),
                error_capacity: config.error_log_capacity.max(1),
            }),
        }
    }

    /// Independent copy of the current state.
    pub fn get_state(&self) -> PlayerState {
        self.inner.state.read().clone()
    }

    /// Read part of the state without copying all of it.
    pub fn read<R>(&self, f: impl FnOnce(&PlayerState) -> R) -> R {
        f(&self.inner.state.read())
    }

    /// Apply a partial update and notify subscribers.
    ///
    /// Returns the set of fields that changed; nothing is emitted when the
    /// set is empty.
    pub fn update(&self, update: StateUpdate) -> StateFields {
        let _emitting = self.inner.emitting.lock();
        let (changed, snapshot) = {
            let mut state = self.inner.state.write();
            let changed = state.apply(update);
            if changed.is_empty() {
                return changed;
            }
            (changed, state.clone())
        };

        tracing::trace!("State changed: {:?}", changed.names());

        self.emit(&StateEvent::Changed {
            fields: changed,
            snapshot: Box::new(snapshot.clone()),
        });
        for field in changed.fields() {
            self.emit(&StateEvent::Field(snapshot.value_of(field)));
        }

        changed
    }

    /// Register a callback for one event kind.
    ///
    /// Registering the same callback twice calls it twice. The callback stays
    /// registered until the returned [`Subscription`] is dropped or
    /// explicitly unsubscribed.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        let mut subs = self.inner.subscribers.lock();
        let id = subs.next_id;
        subs.next_id += 1;
        subs.by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));

        Subscription {
            store: Arc::downgrade(&self.inner),
            kind,
            id,
            active: true,
        }
    }

    /// Number of callbacks registered for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .subscribers
            .lock()
            .by_kind
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Append an error record and emit an [`EventKind::Error`] event.
    ///
    /// The log keeps at most `error_log_capacity` records; the oldest are
    /// evicted first.
    pub fn log_error(&self, message: impl Into<String>, detail: Option<String>) -> ErrorRecord {
        let record = ErrorRecord::now(message, detail);
        tracing::error!(
            "Player error: {}{}",
            record.message,
            record
                .detail
                .as_deref()
                .map(|d| format!(" ({})", d))
                .unwrap_or_default()
        );

        let _emitting = self.inner.emitting.lock();
        {
            let mut state = self.inner.state.write();
            while state.errors.len() >= self.inner.error_capacity {
                state.errors.pop_front();
            }
            state.errors.push_back(record.clone());
        }

        self.emit(&StateEvent::Error(record.clone()));
        record
    }

    fn emit(&self, event: &StateEvent) {
        let callbacks: Vec<Callback> = {
            let subs = self.inner.subscribers.lock();
            match subs.by_kind.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return,
            }
        };
        for callback in callbacks {
            callback(event);
        }
    }
}

/// Handle to a registered callback.
///
/// Dropping the handle unsubscribes. Use [`Subscription::detach`] to keep the
/// callback for the lifetime of the store.
#[must_use = "dropping a Subscription unsubscribes its callback"]
pub struct Subscription {
    store: Weak<StoreInner>,
    kind: EventKind,
    id: u64,
    active: bool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

impl Subscription {
    /// Remove the callback now.
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Keep the callback registered for as long as the store lives.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn remove(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        let mut subs = inner.subscribers.lock();
        if let Some(list) = subs.by_kind.get_mut(&self.kind) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                subs.by_kind.remove(&self.kind);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}
