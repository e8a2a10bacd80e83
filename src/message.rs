use chrono::{DateTime, Utc};

/// Status code carried by a close frame or close event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Indicates a normal closure, meaning that the purpose for
    /// which the connection was established has been fulfilled.
    Normal,
    /// Indicates that an endpoint is "going away", such as a server
    /// going down or a browser having navigated away from a page.
    Away,
    /// Indicates that an endpoint is terminating the connection due
    /// to a protocol error.
    Protocol,
    /// Indicates that an endpoint is terminating the connection
    /// because it has received a type of data it cannot accept.
    Unsupported,
    /// Indicates that no status code was included in a closing frame.
    Status,
    /// Indicates an abnormal closure. Never sent over the wire; reported
    /// when the connection dropped without a close frame.
    Abnormal,
    /// Indicates that an endpoint received data within a message that was
    /// not consistent with the type of the message.
    Invalid,
    /// Indicates that an endpoint received a message that violates its policy.
    Policy,
    /// Indicates that an endpoint received a message that is too big to process.
    Size,
    /// Indicates that the client expected the server to negotiate an extension.
    Extension,
    /// Indicates that a server encountered an unexpected condition.
    Error,
    /// Indicates that the server is restarting.
    Restart,
    /// Indicates that the server is overloaded and the client should retry later.
    Again,
    /// Any other code, kept verbatim.
    Other(u16),
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Restart => 1012,
            CloseCode::Again => 1013,
            CloseCode::Other(code) => code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1005 => Self::Status,
            1006 => Self::Abnormal,
            1007 => Self::Invalid,
            1008 => Self::Policy,
            1009 => Self::Size,
            1010 => Self::Extension,
            1011 => Self::Error,
            1012 => Self::Restart,
            1013 => Self::Again,
            code => Self::Other(code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: CloseCode,
    pub reason: String,
}

/// Payload of a `message` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Binary(bytes.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            Self::Text(_) => None,
        }
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// A `message` event as observed on the socket: the payload plus when it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub data: Message,
    pub received_at: DateTime<Utc>,
}

impl MessageEvent {
    /// Stamps `data` with the current time.
    pub fn new(data: Message) -> Self {
        Self {
            data,
            received_at: Utc::now(),
        }
    }
}

/// Envelope yielded by [`websocket_events`](crate::websocket_events).
///
/// `Open` carries no payload at all, so it can never be confused with a
/// message, whatever that message contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebSocketEvent {
    Open,
    Message(MessageEvent),
}

impl WebSocketEvent {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Payload of a message envelope, `None` for `Open`.
    pub fn data(&self) -> Option<&Message> {
        match self {
            Self::Open => None,
            Self::Message(event) => Some(&event.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_code_round_trips_through_u16() {
        assert_eq!(u16::from(CloseCode::Normal), 1000);
        assert_eq!(CloseCode::from(1011), CloseCode::Error);
        assert_eq!(CloseCode::from(4000), CloseCode::Other(4000));
        assert_eq!(u16::from(CloseCode::Other(4000)), 4000);
    }

    #[test]
    fn open_envelope_has_no_payload() {
        let open = WebSocketEvent::Open;
        let empty = WebSocketEvent::Message(MessageEvent::new(Message::text("")));
        assert!(open.is_open());
        assert_eq!(open.data(), None);
        assert!(!empty.is_open());
        assert_eq!(empty.data(), Some(&Message::text("")));
    }

    #[test]
    fn message_accessors() {
        let text: Message = "hi".into();
        assert_eq!(text.as_text(), Some("hi"));
        assert_eq!(text.as_binary(), None);

        let binary: Message = vec![1u8, 2].into();
        assert_eq!(binary.as_binary(), Some(&[1u8, 2][..]));
        assert_eq!(binary.as_text(), None);
    }
}
