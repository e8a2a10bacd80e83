//! Turns the push-style events of an [`EventSocket`] into a pull-style [`Stream`].
//!
//! Listeners are attached when the stream is created, so anything that arrives
//! before the first pull is buffered. Values are handed out in arrival order,
//! either straight to a waiting pull or through an unbounded queue. However the
//! stream ends (close, error, [`SocketStream::cancel`], [`SocketStream::fail`]
//! or drop), the listeners are detached exactly once and a socket that is still
//! open gets closed.

use crate::socket::{
    lock, EventKind, EventSocket, Listener, ListenerId, ReadyState, SocketEvent,
};
use crate::{EventsConfig, Message, MessageEvent, WebSocketEvent};
use futures::stream::FusedStream;
use futures::Stream;
use std::collections::VecDeque;
use std::fmt::Formatter;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{ready, Context, Poll};
use tokio::sync::oneshot;

/// Stream of message payloads, see [`websocket_data`].
pub type DataStream<S> = SocketStream<S, Message>;
/// Stream of event envelopes, see [`websocket_events`].
pub type EventStream<S> = SocketStream<S, WebSocketEvent>;

/// Yields the payload of every `message` event on `socket`.
///
/// `socket` is a handle; pass a clone if you keep using the socket yourself.
pub fn websocket_data<S: EventSocket>(socket: S) -> DataStream<S> {
    SocketStream::subscribe(
        socket,
        Mapping {
            message: |event: MessageEvent| event.data,
            open: None,
        },
    )
}

/// Yields every `message` event on `socket` as a [`WebSocketEvent::Message`].
///
/// With [`EventsConfig::emit_open`] set and the socket still connecting, the
/// first value is [`WebSocketEvent::Open`] once the connection is established.
pub fn websocket_events<S: EventSocket>(socket: S, config: EventsConfig) -> EventStream<S> {
    SocketStream::subscribe(
        socket,
        Mapping {
            message: WebSocketEvent::Message,
            open: config.emit_open.then_some(open_event as fn() -> WebSocketEvent),
        },
    )
}

fn open_event() -> WebSocketEvent {
    WebSocketEvent::Open
}

struct Mapping<T> {
    message: fn(MessageEvent) -> T,
    open: Option<fn() -> T>,
}

enum Termination<E> {
    Open,
    Closed,
    Errored(E),
}

/// What a waiter is resolved with.
enum Pull<T, E> {
    Value(T),
    Done,
    Failed(E),
}

impl<T, E> Pull<T, E> {
    fn into_item(self) -> Option<Result<T, E>> {
        match self {
            Pull::Value(value) => Some(Ok(value)),
            Pull::Done => None,
            Pull::Failed(error) => Some(Err(error)),
        }
    }
}

enum Next<T, E> {
    Ready(Pull<T, E>),
    Wait(oneshot::Receiver<Pull<T, E>>),
}

struct Shared<T, E> {
    queue: VecDeque<T>,
    waiters: VecDeque<oneshot::Sender<Pull<T, E>>>,
    termination: Termination<E>,
    /// Forced failure that surfaces after a stored socket error.
    next_error: Option<E>,
    listeners: Vec<ListenerId>,
    detached: bool,
    close_requested: bool,
}

impl<T, E> Shared<T, E> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            waiters: VecDeque::new(),
            termination: Termination::Open,
            next_error: None,
            listeners: Vec::new(),
            detached: false,
            close_requested: false,
        }
    }

    fn pull(&mut self) -> Next<T, E> {
        if let Some(value) = self.queue.pop_front() {
            return Next::Ready(Pull::Value(value));
        }
        match std::mem::replace(&mut self.termination, Termination::Closed) {
            Termination::Closed => Next::Ready(Pull::Done),
            Termination::Errored(error) => {
                if let Some(next) = self.next_error.take() {
                    self.termination = Termination::Errored(next);
                }
                Next::Ready(Pull::Failed(error))
            }
            Termination::Open => {
                self.termination = Termination::Open;
                self.waiters.retain(|waiter| !waiter.is_closed());
                let (sender, receiver) = oneshot::channel();
                self.waiters.push_back(sender);
                Next::Wait(receiver)
            }
        }
    }

    /// Hands `value` to the oldest waiter still listening, or queues it.
    fn push(&mut self, mut value: T) {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(Pull::Value(value)) {
                Ok(()) => return,
                Err(Pull::Value(returned)) => value = returned,
                Err(_) => return,
            }
        }
        self.queue.push_back(value);
    }

    /// Offers `error` to waiters in order; gives it back if nobody took it.
    fn fail_first(&mut self, error: E) -> Option<E> {
        let mut error = error;
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(Pull::Failed(error)) {
                Ok(()) => return None,
                Err(Pull::Failed(returned)) => error = returned,
                Err(_) => return None,
            }
        }
        Some(error)
    }

    fn finish_waiters(&mut self) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Pull::Done);
        }
    }

    /// Marks the listeners as detached and returns the ids still to remove.
    fn detach(&mut self) -> Vec<ListenerId> {
        self.detached = true;
        std::mem::take(&mut self.listeners)
    }
}

struct Inner<S: EventSocket, T> {
    socket: S,
    mapping: Mapping<T>,
    shared: Mutex<Shared<T, S::Error>>,
}

impl<S: EventSocket, T: Send + 'static> Inner<S, T> {
    fn listener(self: &Arc<Self>) -> Listener<S::Error> {
        let inner: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |event: &SocketEvent<S::Error>| {
            if let Some(inner) = inner.upgrade() {
                inner.on_event(event);
            }
        })
    }

    fn attach(self: &Arc<Self>, kind: EventKind) -> Option<ListenerId> {
        let id = self.socket.add_listener(kind, self.listener());
        let mut shared = lock(&self.shared);
        if shared.detached {
            // terminated while we were still subscribing
            drop(shared);
            self.socket.remove_listener(id);
            return None;
        }
        shared.listeners.push(id);
        Some(id)
    }

    fn unsubscribe(&self, id: ListenerId) {
        lock(&self.shared).listeners.retain(|listener| *listener != id);
        self.socket.remove_listener(id);
    }

    fn on_event(&self, event: &SocketEvent<S::Error>) {
        match event {
            SocketEvent::Open => {
                if let Some(open) = self.mapping.open {
                    self.on_value(open());
                }
            }
            SocketEvent::Message(message) => {
                self.on_value((self.mapping.message)(message.clone()));
            }
            SocketEvent::Close(close) => {
                tracing::debug!(code = ?close.code, reason = %close.reason, "socket closed");
                let ids = {
                    let mut shared = lock(&self.shared);
                    if let Termination::Open = shared.termination {
                        shared.termination = Termination::Closed;
                    }
                    shared.finish_waiters();
                    shared.detach()
                };
                self.remove_listeners(ids);
            }
            SocketEvent::Error(error) => {
                let ids = {
                    let mut shared = lock(&self.shared);
                    if let Termination::Open = shared.termination {
                        tracing::debug!("socket reported an error");
                        let unclaimed = shared.fail_first(error.clone());
                        shared.termination = match unclaimed {
                            Some(error) => Termination::Errored(error),
                            None => Termination::Closed,
                        };
                        shared.finish_waiters();
                    }
                    shared.detach()
                };
                self.remove_listeners(ids);
            }
        }
    }
}

impl<S: EventSocket, T> Inner<S, T> {
    fn on_value(&self, value: T) {
        let mut shared = lock(&self.shared);
        match shared.termination {
            Termination::Open => {
                tracing::trace!(queued = shared.queue.len(), "value received");
                shared.push(value);
            }
            _ => tracing::trace!("value received after termination, dropped"),
        }
    }

    fn remove_listeners(&self, ids: Vec<ListenerId>) {
        for id in ids {
            self.socket.remove_listener(id);
        }
    }

    /// Ends the stream: drops buffered values, detaches the listeners and closes
    /// the socket unless it is already on its way out. Only the first call
    /// closes. Returns the pulls that were still waiting, to be resolved by the
    /// caller after the socket was closed.
    fn terminate(
        &self,
        end: impl FnOnce(&mut Shared<T, S::Error>),
    ) -> VecDeque<oneshot::Sender<Pull<T, S::Error>>> {
        let (ids, close, waiters) = {
            let mut shared = lock(&self.shared);
            shared.waiters.retain(|waiter| !waiter.is_closed());
            end(&mut *shared);
            shared.queue.clear();
            let close = !std::mem::replace(&mut shared.close_requested, true);
            let waiters = std::mem::take(&mut shared.waiters);
            (shared.detach(), close, waiters)
        };
        self.remove_listeners(ids);
        if close {
            let state = self.socket.ready_state();
            if state.is_closing_or_closed() {
                tracing::debug!(?state, "stream released, socket already closing");
            } else {
                tracing::debug!(?state, "stream released, closing socket");
                self.socket.close();
            }
        }
        waiters
    }

    fn cancel(&self) {
        let waiters = self.terminate(|shared| {
            shared.termination = Termination::Closed;
            shared.next_error = None;
        });
        for waiter in waiters {
            let _ = waiter.send(Pull::Done);
        }
    }

    fn fail(&self, error: S::Error) {
        let waiters = self.terminate(|shared| {
            if !shared.waiters.is_empty() {
                shared.termination = Termination::Closed;
            } else if let Termination::Errored(_) = shared.termination {
                // the socket error goes first, then ours
                shared.next_error = Some(error.clone());
            } else {
                shared.termination = Termination::Errored(error.clone());
            }
        });
        if waiters.is_empty() {
            return;
        }
        let mut delivered = false;
        for waiter in waiters {
            delivered |= waiter.send(Pull::Failed(error.clone())).is_ok();
        }
        if !delivered {
            // every waiter went away after it was counted
            let mut shared = lock(&self.shared);
            if let Termination::Closed = shared.termination {
                shared.termination = Termination::Errored(error);
            }
        }
    }
}

/// A single-consumer, single-pass stream over the events of a socket.
///
/// Pull with [`StreamExt::next`](futures::StreamExt::next) or
/// [`next_value`](Self::next_value). Dropping the stream is the same as
/// calling [`cancel`](Self::cancel), so breaking out of a loop closes the
/// socket.
pub struct SocketStream<S: EventSocket, T> {
    inner: Arc<Inner<S, T>>,
    pending: Option<oneshot::Receiver<Pull<T, S::Error>>>,
}

impl<S: EventSocket, T> std::fmt::Debug for SocketStream<S, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let shared = lock(&self.inner.shared);
        f.debug_struct("SocketStream")
            .field("queued", &shared.queue.len())
            .field("waiters", &shared.waiters.len())
            .field("detached", &shared.detached)
            .finish_non_exhaustive()
    }
}

impl<S: EventSocket, T: Send + 'static> SocketStream<S, T> {
    fn subscribe(socket: S, mapping: Mapping<T>) -> Self {
        let emit_open = mapping.open.is_some();
        let inner = Arc::new(Inner {
            socket,
            mapping,
            shared: Mutex::new(Shared::new()),
        });

        // registered before the state check, so an open racing with us is seen
        let mut open = None;
        if emit_open {
            open = inner.attach(EventKind::Open);
            if let Some(id) = open {
                if inner.socket.ready_state() != ReadyState::Connecting {
                    inner.unsubscribe(id);
                    open = None;
                }
            }
        }
        for kind in [EventKind::Message, EventKind::Close, EventKind::Error] {
            inner.attach(kind);
        }
        tracing::debug!(open = open.is_some(), "subscribed to socket events");

        Self {
            inner,
            pending: None,
        }
    }

    /// Resolves to the next value, `None` once the stream is exhausted, or the
    /// socket's error exactly once.
    ///
    /// Takes `&self`, so several pulls may be outstanding; they are served in
    /// the order they were made.
    pub async fn next_value(&self) -> Option<Result<T, S::Error>> {
        let next = lock(&self.inner.shared).pull();
        match next {
            Next::Ready(pull) => pull.into_item(),
            Next::Wait(receiver) => receiver.await.ok().and_then(Pull::into_item),
        }
    }

    /// Stops the stream without an error: detaches from the socket, closes it
    /// if it is still open and resolves outstanding pulls with `None`.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Stops the stream with `error`: closes the socket like
    /// [`cancel`](Self::cancel), then fails every outstanding pull with
    /// `error`, or the next pull if none is outstanding.
    ///
    /// A socket error that arrived earlier and was not pulled yet is not
    /// replaced: the next pull fails with it and the one after with `error`.
    pub fn fail(&self, error: S::Error) {
        self.inner.fail(error);
    }

    /// Number of values received but not yet pulled.
    pub fn queued_len(&self) -> usize {
        lock(&self.inner.shared).queue.len()
    }
}

impl<S: EventSocket, T> Drop for SocketStream<S, T> {
    fn drop(&mut self) {
        self.inner.cancel();
    }
}

impl<S: EventSocket, T: Send + 'static> Stream for SocketStream<S, T> {
    type Item = Result<T, S::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(receiver) = this.pending.as_mut() {
                let pull = ready!(Pin::new(receiver).poll(cx));
                this.pending = None;
                return Poll::Ready(pull.ok().and_then(Pull::into_item));
            }
            let next = lock(&this.inner.shared).pull();
            match next {
                Next::Ready(pull) => return Poll::Ready(pull.into_item()),
                Next::Wait(receiver) => this.pending = Some(receiver),
            }
        }
    }
}

impl<S: EventSocket, T: Send + 'static> FusedStream for SocketStream<S, T> {
    fn is_terminated(&self) -> bool {
        let shared = lock(&self.inner.shared);
        self.pending.is_none()
            && shared.queue.is_empty()
            && matches!(shared.termination, Termination::Closed)
    }
}
