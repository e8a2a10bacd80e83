//! [`EventSocket`] on top of `tokio-tungstenite`.
//!
//! [`TungsteniteSocket`] behaves like a browser WebSocket: `connect` returns
//! straight away in [`ReadyState::Connecting`], the handshake and all I/O run
//! on a spawned task, and what happens on the wire is reported to listeners as
//! `open`, `message`, `error` and `close` events.

use crate::config::SocketConfig;
use crate::socket::{
    lock, CloseEvent, EventKind, EventSocket, Listener, ListenerId, Listeners, ReadyState,
    SocketEvent,
};
use crate::CloseCode;
use crate::CloseFrame;
use crate::Error;
use crate::Message;
use crate::MessageEvent;
use crate::Request;
use eyre::eyre;
use futures::{SinkExt, StreamExt};
use std::fmt::Formatter;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::WebSocketStream;
use tracing::info;
use tungstenite::client::IntoClientRequest;
use tungstenite::protocol::frame::coding::CloseCode as TungsteniteCloseCode;

/// Error reported with `error` events: the transport error as tungstenite
/// produced it, shared so every listener sees the same value.
pub type SocketError = Arc<tungstenite::Error>;

impl<'t> From<tungstenite::protocol::CloseFrame<'t>> for CloseFrame {
    fn from(frame: tungstenite::protocol::CloseFrame) -> Self {
        Self {
            code: frame.code.into(),
            reason: frame.reason.into(),
        }
    }
}

impl<'t> From<CloseFrame> for tungstenite::protocol::CloseFrame<'t> {
    fn from(frame: CloseFrame) -> Self {
        Self {
            code: frame.code.into(),
            reason: frame.reason.into(),
        }
    }
}

impl From<CloseCode> for TungsteniteCloseCode {
    fn from(code: CloseCode) -> Self {
        Self::from(u16::from(code))
    }
}

impl From<TungsteniteCloseCode> for CloseCode {
    fn from(code: TungsteniteCloseCode) -> Self {
        Self::from(u16::from(code))
    }
}

impl From<Message> for tungstenite::Message {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Self::Text(text),
            Message::Binary(bytes) => Self::Binary(bytes),
        }
    }
}

enum Command {
    Send(Message),
    Close,
}

/// How the connection task ended.
enum Ending {
    Closed(CloseEvent),
    Failed(tungstenite::Error),
}

struct Shared {
    state: Mutex<ReadyState>,
    listeners: Listeners<SocketError>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Shared {
    /// Moves from `Connecting` to `Open`; `false` if `close()` got there first.
    fn opened(&self) -> bool {
        let mut state = lock(&self.state);
        if *state != ReadyState::Connecting {
            return false;
        }
        *state = ReadyState::Open;
        true
    }

    fn closing(&self) {
        let mut state = lock(&self.state);
        if !state.is_closing_or_closed() {
            *state = ReadyState::Closing;
        }
    }

    fn finish(&self, ending: Ending) {
        *lock(&self.state) = ReadyState::Closed;
        match ending {
            Ending::Closed(event) => {
                info!(code = ?event.code, reason = %event.reason, "websocket closed");
                self.listeners.dispatch(&SocketEvent::Close(event));
            }
            Ending::Failed(error) => {
                tracing::error!("websocket connection error: {error}");
                self.listeners.dispatch(&SocketEvent::Error(Arc::new(error)));
                self.listeners.dispatch(&SocketEvent::Close(CloseEvent::abnormal()));
            }
        }
    }
}

/// A tokio-tungstenite connection exposed as an [`EventSocket`].
///
/// Clones share the connection. The connection task keeps running until the
/// socket is closed by either side.
#[derive(Clone)]
pub struct TungsteniteSocket {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TungsteniteSocket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TungsteniteSocket")
            .field("state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

impl TungsteniteSocket {
    /// Starts connecting to `request` and returns immediately.
    ///
    /// Only an invalid request fails here; connection failures are reported as
    /// an `error` event followed by a `close` event. Must be called from within
    /// a tokio runtime.
    pub fn connect(request: impl IntoClientRequest, config: SocketConfig) -> Result<Self, Error> {
        let request: Request = request.into_client_request()?;
        let (socket, commands) = Self::with_state(ReadyState::Connecting);
        let shared = socket.shared.clone();
        tokio::spawn(async move {
            let uri = request.uri().clone();
            match tokio_tungstenite::connect_async(request).await {
                Ok((stream, _response)) => {
                    info!(%uri, "websocket connected");
                    if shared.opened() {
                        shared.listeners.dispatch(&SocketEvent::Open);
                    }
                    let ending = run(&shared, stream, commands, &config).await;
                    shared.finish(ending);
                }
                Err(error) => {
                    tracing::error!(%uri, "failed to connect: {error}");
                    shared.finish(Ending::Failed(error));
                }
            }
        });
        Ok(socket)
    }

    /// Wraps an established connection, e.g. one accepted by a server. The
    /// socket starts out [`ReadyState::Open`].
    pub fn from_stream<S>(stream: WebSocketStream<S>, config: SocketConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (socket, commands) = Self::with_state(ReadyState::Open);
        let shared = socket.shared.clone();
        tokio::spawn(async move {
            let ending = run(&shared, stream, commands, &config).await;
            shared.finish(ending);
        });
        socket
    }

    fn with_state(state: ReadyState) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let socket = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                listeners: Listeners::new(),
                commands,
            }),
        };
        (socket, receiver)
    }

    /// Queues `message` for sending. Fails unless the socket is open.
    pub fn send(&self, message: impl Into<Message>) -> Result<(), Error> {
        let state = self.ready_state();
        if state != ReadyState::Open {
            return Err(eyre!("cannot send on a socket that is {state:?}"));
        }
        self.shared
            .commands
            .send(Command::Send(message.into()))
            .map_err(|_| eyre!("connection task has stopped"))
    }
}

impl EventSocket for TungsteniteSocket {
    type Error = SocketError;

    fn ready_state(&self) -> ReadyState {
        *lock(&self.shared.state)
    }

    fn add_listener(&self, kind: EventKind, listener: Listener<SocketError>) -> ListenerId {
        self.shared.listeners.add(kind, listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.shared.listeners.remove(id);
    }

    fn close(&self) {
        {
            let mut state = lock(&self.shared.state);
            if state.is_closing_or_closed() {
                return;
            }
            *state = ReadyState::Closing;
        }
        if self.shared.commands.send(Command::Close).is_err() {
            tracing::debug!("close requested after the connection task stopped");
        }
    }
}

async fn run<S>(
    shared: &Shared,
    mut stream: WebSocketStream<S>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    config: &SocketConfig,
) -> Ending
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut peer_frame: Option<CloseFrame> = None;
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(message)) => {
                    if let Err(error) = stream.send(message.into()).await {
                        return Ending::Failed(error);
                    }
                }
                Some(Command::Close) | None => {
                    return close_handshake(&mut stream, config).await;
                }
            },
            message = stream.next() => match message {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    tracing::trace!(len = text.len(), "text message received");
                    let event = MessageEvent::new(Message::Text(text));
                    shared.listeners.dispatch(&SocketEvent::Message(event));
                }
                Some(Ok(tungstenite::Message::Binary(bytes))) => {
                    tracing::trace!(len = bytes.len(), "binary message received");
                    let event = MessageEvent::new(Message::Binary(bytes));
                    shared.listeners.dispatch(&SocketEvent::Message(event));
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    // tungstenite answers the close frame; the stream ends next
                    shared.closing();
                    peer_frame = frame.map(CloseFrame::from);
                }
                Some(Ok(_)) => {}
                Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed))
                | None => {
                    return Ending::Closed(peer_close_event(peer_frame));
                }
                Some(Err(error)) => return Ending::Failed(error),
            },
        }
    }
}

fn peer_close_event(frame: Option<CloseFrame>) -> CloseEvent {
    match frame {
        Some(CloseFrame { code, reason }) => CloseEvent {
            code,
            reason,
            was_clean: true,
        },
        None => CloseEvent {
            code: CloseCode::Status,
            reason: String::new(),
            was_clean: true,
        },
    }
}

/// Sends our close frame and waits up to `close_timeout` for the peer's answer.
async fn close_handshake<S>(stream: &mut WebSocketStream<S>, config: &SocketConfig) -> Ending
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: String::new(),
    };
    if let Err(error) = stream.close(Some(frame.into())).await {
        tracing::debug!("failed to send close frame: {error}");
        return Ending::Closed(CloseEvent::abnormal());
    }
    let reply = tokio::time::timeout(config.close_timeout, async {
        let mut reply = None;
        while let Some(message) = stream.next().await {
            match message {
                Ok(tungstenite::Message::Close(frame)) => reply = frame.map(CloseFrame::from),
                Ok(_) => tracing::trace!("message after close dropped"),
                Err(_) => break,
            }
        }
        reply
    })
    .await;
    match reply {
        Ok(Some(CloseFrame { code, reason })) => Ending::Closed(CloseEvent {
            code,
            reason,
            was_clean: true,
        }),
        Ok(None) => Ending::Closed(CloseEvent::normal()),
        Err(_) => {
            tracing::warn!(timeout = ?config.close_timeout, "peer did not answer the close frame");
            Ending::Closed(CloseEvent::abnormal())
        }
    }
}
