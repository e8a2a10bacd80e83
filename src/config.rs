use std::time::Duration;

/// Options for [`websocket_events`](crate::websocket_events).
#[derive(Clone, Debug, Default)]
pub struct EventsConfig {
    /// Yield a [`WebSocketEvent::Open`](crate::WebSocketEvent::Open) first if
    /// the socket is still connecting when the stream is created.
    pub emit_open: bool,
}

impl EventsConfig {
    pub fn emit_open() -> Self {
        Self { emit_open: true }
    }
}

#[derive(Clone, Debug)]
pub struct SocketConfig {
    /// How long to wait for the peer to answer our close frame before the
    /// connection is dropped.
    pub close_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            close_timeout: Duration::from_secs(5),
        }
    }
}
