#![expect(
    clippy::module_name_repetitions,
    reason = "TransportError includes module name for clarity when used outside this module"
)]

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::time::Duration;

/// Transport error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// The target address could not be parsed
    InvalidUrl(url::ParseError),
    /// The target address uses a scheme other than `ws` or `wss`
    UnsupportedScheme(String),
    /// A sub-protocol or extra header could not be encoded as a header value
    InvalidHeader(String),
    /// The transport is not in the open state
    NotOpen,
    /// Opening the connection took longer than the configured limit
    ConnectTimeout(Duration),
    /// Lower-level I/O failure
    Io(io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::InvalidUrl(e) => write!(f, "Invalid WebSocket URL: {e}"),
            Self::UnsupportedScheme(scheme) => {
                write!(f, "Unsupported URL scheme {scheme:?}, expected ws or wss")
            }
            Self::InvalidHeader(reason) => write!(f, "Invalid handshake header: {reason}"),
            Self::NotOpen => write!(f, "WebSocket is not open"),
            Self::ConnectTimeout(after) => write!(f, "WebSocket did not open within {after:?}"),
            Self::Io(e) => write!(f, "WebSocket I/O error: {e}"),
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::InvalidUrl(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(e)
    }
}

impl From<url::ParseError> for TransportError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e)
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
