//! WebSockets hand you events; most code would rather pull values. This crate bridges the two:
//! - [`websocket_data`] turns a socket into a [`Stream`](futures::Stream) of message payloads.
//! - [`websocket_events`] does the same with full [`WebSocketEvent`] envelopes, optionally
//!   starting with [`WebSocketEvent::Open`].
//!
//! Nothing that arrives before the first pull is lost, and a socket is closed as soon as its
//! stream is dropped, cancelled or failed, so breaking out of a loop never leaves it dangling.
//!
//! Any socket implementing [`EventSocket`] works. [`MemorySocket`] is driven by hand for tests,
//! and with the `tungstenite` feature [`tungstenite::TungsteniteSocket`] wraps a real connection.
//!
//! ```no_run
//! use ezstream::tungstenite::TungsteniteSocket;
//! use ezstream::{websocket_data, SocketConfig};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), ezstream::Error> {
//! let socket = TungsteniteSocket::connect("ws://127.0.0.1:8080", SocketConfig::default())?;
//! let mut messages = websocket_data(socket);
//! while let Some(message) = messages.next().await {
//!     if message?.as_text() == Some("bye") {
//!         break; // closes the socket
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod bridge;
mod message;

pub use message::CloseCode;
pub use message::CloseFrame;
pub use message::Message;
pub use message::MessageEvent;
pub use message::WebSocketEvent;

#[cfg(feature = "tokio-tungstenite")]
pub mod tungstenite;

pub mod config;
pub mod memory;
pub mod socket;

pub use bridge::websocket_data;
pub use bridge::websocket_events;
pub use bridge::DataStream;
pub use bridge::EventStream;
pub use bridge::SocketStream;

pub use config::EventsConfig;
pub use config::SocketConfig;

pub use memory::MemorySocket;

pub use socket::EventSocket;
pub use socket::ReadyState;

pub type Error = eyre::Error;
pub type Request = http::Request<()>;
