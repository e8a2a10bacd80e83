//! An [`EventSocket`] that lives entirely in memory and is driven by hand.
//!
//! Handy for testing code that consumes socket streams without a network.

use crate::socket::{
    lock, CloseEvent, EventKind, EventSocket, Listener, ListenerId, Listeners, ReadyState,
    SocketEvent,
};
use crate::{CloseCode, Message, MessageEvent};
use std::fmt::Formatter;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct Inner<E> {
    state: Mutex<ReadyState>,
    listeners: Listeners<E>,
    close_calls: AtomicUsize,
}

pub struct MemorySocket<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for MemorySocket<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> std::fmt::Debug for MemorySocket<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySocket")
            .field("state", &*lock(&self.inner.state))
            .field("listeners", &self.inner.listeners.len())
            .finish_non_exhaustive()
    }
}

impl<E: Clone + Send + 'static> Default for MemorySocket<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + 'static> MemorySocket<E> {
    /// A socket that is still connecting; call [`emit_open`](Self::emit_open) to open it.
    pub fn new() -> Self {
        Self::with_state(ReadyState::Connecting)
    }

    /// A socket that is already open.
    pub fn open() -> Self {
        Self::with_state(ReadyState::Open)
    }

    fn with_state(state: ReadyState) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                listeners: Listeners::new(),
                close_calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn emit_open(&self) {
        {
            let mut state = lock(&self.inner.state);
            if *state != ReadyState::Connecting {
                tracing::debug!(state = ?*state, "ignoring open on a socket that is not connecting");
                return;
            }
            *state = ReadyState::Open;
        }
        self.inner.listeners.dispatch(&SocketEvent::Open);
    }

    pub fn emit_message(&self, message: impl Into<Message>) {
        let event = MessageEvent::new(message.into());
        self.inner.listeners.dispatch(&SocketEvent::Message(event));
    }

    pub fn emit_error(&self, error: E) {
        self.inner.listeners.dispatch(&SocketEvent::Error(error));
    }

    /// Closes the socket from the remote side. Ignored if it is already closed.
    pub fn emit_close(&self, code: CloseCode, reason: impl Into<String>) {
        if self.set_closed() {
            self.inner.listeners.dispatch(&SocketEvent::Close(CloseEvent {
                code,
                reason: reason.into(),
                was_clean: true,
            }));
        }
    }

    /// How many times [`close`](EventSocket::close) actually closed the socket.
    pub fn close_calls(&self) -> usize {
        self.inner.close_calls.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    fn set_closed(&self) -> bool {
        let mut state = lock(&self.inner.state);
        if *state == ReadyState::Closed {
            return false;
        }
        *state = ReadyState::Closed;
        true
    }
}

impl<E: Clone + Send + 'static> EventSocket for MemorySocket<E> {
    type Error = E;

    fn ready_state(&self) -> ReadyState {
        *lock(&self.inner.state)
    }

    fn add_listener(&self, kind: EventKind, listener: Listener<E>) -> ListenerId {
        self.inner.listeners.add(kind, listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.inner.listeners.remove(id);
    }

    fn close(&self) {
        if self.ready_state().is_closing_or_closed() {
            return;
        }
        if self.set_closed() {
            self.inner.close_calls.fetch_add(1, Ordering::SeqCst);
            self.inner
                .listeners
                .dispatch(&SocketEvent::Close(CloseEvent::normal()));
        }
    }
}
