//! Transport abstraction the connection manager is layered on.
//!
//! A [`Connector`] builds one [`Transport`] per connection attempt. Construction is
//! synchronous and may fail. Everything that happens afterwards (open, close, errors,
//! inbound frames) is reported asynchronously through the [`EventSink`] the connector
//! was handed, tagged with the attempt it belongs to.

pub mod error;
pub mod tungstenite;

use std::fmt;

use tokio::sync::mpsc;

pub use error::TransportError;

/// Ready state of a single transport, mirroring the WebSocket `readyState` values.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// How a transport can carry a liveness probe.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingCapability {
    /// Protocol-level ping frames are available
    Native,
    /// Probes have to travel as regular application messages
    MessageOnly,
}

/// Application data carried by a transport.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Returns the text content, if this is a text payload.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(bytes.to_vec())
    }
}

/// Details of a transport that just opened.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenInfo {
    /// Sub-protocol selected by the server, if any
    pub protocol: Option<String>,
}

impl OpenInfo {
    #[must_use]
    pub fn new(protocol: Option<String>) -> Self {
        Self { protocol }
    }
}

/// Close code and reason reported when a transport shuts down.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    /// Close without a status code in the close frame.
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close handshake.
    pub const ABNORMAL: u16 = 1006;

    pub fn new<S: Into<String>>(code: u16, reason: S) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn abnormal() -> Self {
        Self::new(Self::ABNORMAL, "")
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

/// Occurrences a transport reports after it has been constructed.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportEvent {
    Open(OpenInfo),
    Close(CloseInfo),
    Error(TransportError),
    Message(Payload),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
}

#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) generation: u64,
    pub(crate) event: TransportEvent,
}

/// Handle a transport uses to report its events back to the owning connection.
///
/// Each sink is bound to one connection attempt. Once the connection moves on to a newer
/// transport, events from older sinks are ignored.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { generation, tx }
    }

    /// Report an event. Returns `false` once the owning connection is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Envelope {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Target of a connection attempt.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    /// Sub-protocols in order of preference, possibly empty
    pub protocols: Vec<String>,
}

impl ConnectRequest {
    pub fn new<U: Into<String>>(url: U, protocols: Vec<String>) -> Self {
        Self {
            url: url.into(),
            protocols,
        }
    }
}

/// A single live (or connecting) socket.
pub trait Transport: Send + 'static {
    fn ready_state(&self) -> ReadyState;

    fn ping_capability(&self) -> PingCapability;

    /// Queue an application message.
    fn send(&mut self, payload: Payload) -> Result<(), TransportError>;

    /// Queue a protocol-level ping frame. Only called on transports reporting
    /// [`PingCapability::Native`].
    fn ping(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Start closing with the given status code and reason. A [`TransportEvent::Close`]
    /// follows once the transport is actually closed.
    fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// Builds a fresh [`Transport`] for every connection attempt.
pub trait Connector: Send + 'static {
    type Transport: Transport;

    /// Construct a transport for `request`. The returned transport reports everything that
    /// happens to it through `sink`.
    fn connect(
        &self,
        request: &ConnectRequest,
        sink: EventSink,
    ) -> Result<Self::Transport, TransportError>;
}
