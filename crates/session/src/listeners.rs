//! Typed publish/subscribe store for [`SessionEvent`]s.
//!
//! Besides plain fan-out, the registry caches the last `session_started`
//! payload so that a listener attaching after the session began still sees it
//! once.

use crate::events::{EventKind, SessionEvent};
use crate::protocol::SessionStarted;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
struct Inner {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(u64, Listener)>>,
    cached_session: Option<SessionStarted>,
    /// Bumped whenever the cached payload is replaced or cleared.
    session_generation: u64,
}

impl Inner {
    fn listener(&self, kind: EventKind, id: u64) -> Option<Listener> {
        self.listeners
            .get(&kind)?
            .iter()
            .find(|(lid, _)| *lid == id)
            .map(|(_, l)| l.clone())
    }
}

/// Shared, clonable listener store. Clones refer to the same set of listeners.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<Inner>>,
}

/// Handle returned by [`ListenerRegistry::on`]. Dropping it keeps the listener registered.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    kind: EventKind,
    registry: Weak<Mutex<Inner>>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Removes the listener. Further events are not delivered to it.
    pub fn unsubscribe(self) {
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        let mut inner = inner.lock();
        if let Some(list) = inner.listeners.get_mut(&self.kind) {
            list.retain(|(id, _)| *id != self.id);
        }
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for events of `kind`.
    ///
    /// Registering for [`EventKind::SessionStarted`] while a session payload is
    /// cached schedules one replay of it on the tokio runtime, so the callback
    /// never runs inside this call.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let (id, replay) = {
            let mut inner = self.inner.lock();
            inner.next_id += 1;
            let id = inner.next_id;
            inner
                .listeners
                .entry(kind)
                .or_default()
                .push((id, Arc::new(callback)));
            let replay = match kind {
                EventKind::SessionStarted => inner
                    .cached_session
                    .clone()
                    .map(|payload| (inner.session_generation, payload)),
                _ => None,
            };
            (id, replay)
        };

        if let Some((generation, payload)) = replay {
            self.schedule_replay(id, generation, payload);
        }

        Subscription {
            id,
            kind,
            registry: Arc::downgrade(&self.inner),
        }
    }

    fn schedule_replay(&self, id: u64, generation: u64, payload: SessionStarted) {
        let registry = Arc::downgrade(&self.inner);
        let replay = move || {
            let Some(inner) = registry.upgrade() else {
                return;
            };
            let listener = {
                let inner = inner.lock();
                // A newer session was cached (and emitted live to this
                // listener) or the session closed before the replay ran.
                if inner.session_generation != generation {
                    return;
                }
                // The subscriber may have gone away before the replay ran.
                inner.listener(EventKind::SessionStarted, id)
            };
            if let Some(listener) = listener {
                debug!(listener = id, "Replaying cached session_started");
                invoke(&listener, &SessionEvent::SessionStarted(payload));
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { replay() });
            }
            Err(_) => {
                warn!("No tokio runtime for session replay; delivering after registration");
                replay();
            }
        }
    }

    /// Delivers `event` to every listener registered for its kind.
    ///
    /// A panicking listener is logged and skipped; the rest still run.
    pub fn emit(&self, event: &SessionEvent) {
        let listeners: Vec<Listener> = {
            let inner = self.inner.lock();
            match inner.listeners.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, l)| l.clone()).collect(),
                None => return,
            }
        };
        for listener in &listeners {
            invoke(listener, event);
        }
    }

    pub fn cache_session(&self, payload: SessionStarted) {
        let mut inner = self.inner.lock();
        inner.cached_session = Some(payload);
        inner.session_generation += 1;
    }

    pub fn clear_cached_session(&self) {
        let mut inner = self.inner.lock();
        inner.cached_session = None;
        inner.session_generation += 1;
    }

    pub fn cached_session(&self) -> Option<SessionStarted> {
        self.inner.lock().cached_session.clone()
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner
            .lock()
            .listeners
            .get(&kind)
            .map_or(0, |list| list.len())
    }
}

fn invoke(listener: &Listener, event: &SessionEvent) {
    if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
        warn!(event = ?event.kind(), "Event listener panicked; continuing dispatch");
    }
}
