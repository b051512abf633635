//! Listener registration for session notifications.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::event::SessionEvent;
use crate::session::Session;

/// Receives session notifications on the thread that calls `poll`.
///
/// Listeners may call back into the session, including subscribing or
/// unsubscribing other listeners.
pub trait SessionListener: Send {
    fn on_event(&mut self, session: &Session, event: &SessionEvent);

    /// Called once per `poll`, after all events of that poll were delivered.
    fn on_tick(&mut self, _session: &Session, _now: Instant) {}
}

/// Shared listeners stay inspectable by their owner after subscribing.
impl<T: SessionListener> SessionListener for Arc<Mutex<T>> {
    fn on_event(&mut self, session: &Session, event: &SessionEvent) {
        self.lock().on_event(session, event);
    }

    fn on_tick(&mut self, session: &Session, now: Instant) {
        self.lock().on_tick(session, now);
    }
}

/// Adapter for closure listeners.
pub(crate) struct FnListener<F>(pub(crate) F);

impl<F> SessionListener for FnListener<F>
where
    F: FnMut(&Session, &SessionEvent) + Send,
{
    fn on_event(&mut self, session: &Session, event: &SessionEvent) {
        (self.0)(session, event);
    }
}

/// Handle returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: u64,
    entries: Vec<(ListenerId, Box<dyn SessionListener>)>,
    /// Removals requested while the entries were checked out for dispatch.
    deferred_removals: HashSet<ListenerId>,
}

impl ListenerRegistry {
    pub(crate) fn add(&mut self, listener: Box<dyn SessionListener>) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        if self.entries.len() == before && id.0 <= self.next_id {
            self.deferred_removals.insert(id);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Take the listeners out so they can run without the registry locked.
    pub(crate) fn check_out(&mut self) -> Vec<(ListenerId, Box<dyn SessionListener>)> {
        std::mem::take(&mut self.entries)
    }

    /// Put dispatched listeners back ahead of any added meanwhile, then apply
    /// removals requested during dispatch.
    pub(crate) fn check_in(&mut self, mut active: Vec<(ListenerId, Box<dyn SessionListener>)>) {
        active.append(&mut self.entries);
        let removed = std::mem::take(&mut self.deferred_removals);
        active.retain(|(id, _)| !removed.contains(id));
        self.entries = active;
    }
}
