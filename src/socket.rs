use crate::{CloseCode, MessageEvent};
use std::fmt::Formatter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Connection state of a socket, mirroring the browser `readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    /// `true` once the socket is on its way out, so calling `close()` again is pointless.
    pub fn is_closing_or_closed(self) -> bool {
        matches!(self, ReadyState::Closing | ReadyState::Closed)
    }
}

/// Named events a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Message,
    Close,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: CloseCode,
    pub reason: String,
    /// Whether the closing handshake completed.
    pub was_clean: bool,
}

impl CloseEvent {
    pub fn normal() -> Self {
        Self {
            code: CloseCode::Normal,
            reason: String::new(),
            was_clean: true,
        }
    }

    pub fn abnormal() -> Self {
        Self {
            code: CloseCode::Abnormal,
            reason: String::new(),
            was_clean: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent<E> {
    Open,
    Message(MessageEvent),
    Close(CloseEvent),
    Error(E),
}

impl<E> SocketEvent<E> {
    pub fn kind(&self) -> EventKind {
        match self {
            SocketEvent::Open => EventKind::Open,
            SocketEvent::Message(_) => EventKind::Message,
            SocketEvent::Close(_) => EventKind::Close,
            SocketEvent::Error(_) => EventKind::Error,
        }
    }
}

/// Callback invoked for every event of the kind it was registered for.
pub type Listener<E> = Arc<dyn Fn(&SocketEvent<E>) + Send + Sync>;

/// Handle returned by [`EventSocket::add_listener`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The capability the bridge consumes: an event-emitting socket.
///
/// Implementations are cheap handles; clones refer to the same connection.
pub trait EventSocket: Clone + Send + Sync + 'static {
    /// Value reported with `error` events.
    type Error: Clone + Send + 'static;

    fn ready_state(&self) -> ReadyState;
    fn add_listener(&self, kind: EventKind, listener: Listener<Self::Error>) -> ListenerId;
    /// Removing an unknown or already removed id is a no-op.
    fn remove_listener(&self, id: ListenerId);
    /// Starts the closing handshake. Must be a no-op on a closing or closed socket.
    fn close(&self);
}

/// Listener registry for [`EventSocket`] implementations.
///
/// `dispatch` snapshots the matching listeners and runs them without holding
/// the registry lock, so listeners are free to add or remove listeners,
/// including themselves.
pub struct Listeners<E> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, EventKind, Listener<E>)>>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, kind: EventKind, listener: Listener<E>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.entries).push((id, kind, listener));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|(entry, _, _)| *entry != id);
        entries.len() != before
    }

    pub fn dispatch(&self, event: &SocketEvent<E>) {
        let kind = event.kind();
        let matching: Vec<Listener<E>> = lock(&self.entries)
            .iter()
            .filter(|(_, entry_kind, _)| *entry_kind == kind)
            .map(|(_, _, listener)| listener.clone())
            .collect();
        for listener in matching {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Locks `mutex`, recovering the guard if a listener panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;
    use std::sync::atomic::AtomicUsize;

    fn counter(hits: &Arc<AtomicUsize>) -> Listener<()> {
        let hits = hits.clone();
        Arc::new(move |_: &SocketEvent<()>| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn dispatch_only_reaches_matching_kind() {
        let listeners = Listeners::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        listeners.add(EventKind::Message, counter(&hits));

        listeners.dispatch(&SocketEvent::Open);
        listeners.dispatch(&SocketEvent::Close(CloseEvent::normal()));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        listeners.dispatch(&SocketEvent::Message(MessageEvent::new(Message::text("x"))));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let listeners = Listeners::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = listeners.add(EventKind::Open, counter(&hits));

        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        assert!(listeners.is_empty());

        listeners.dispatch(&SocketEvent::Open);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_can_remove_itself_during_dispatch() {
        let listeners = Arc::new(Listeners::<()>::new());
        let own_id = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let remover: Listener<()> = {
            let listeners = listeners.clone();
            let own_id = own_id.clone();
            let hits = hits.clone();
            Arc::new(move |_: &SocketEvent<()>| {
                hits.fetch_add(1, Ordering::SeqCst);
                if let Some(id) = *own_id.lock().unwrap() {
                    listeners.remove(id);
                }
            })
        };
        let id = listeners.add(EventKind::Open, remover);
        *own_id.lock().unwrap() = Some(id);

        listeners.dispatch(&SocketEvent::Open);
        listeners.dispatch(&SocketEvent::Open);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.len(), 0);
    }
}
