use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use crate::transport::TransportError;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// The transport could not be constructed for a connection attempt
    Construction,
    /// Runtime error surfaced by the transport, e.g. a send on a closed socket
    Transport,
    /// A liveness probe could not be sent or was never answered
    Heartbeat,
    /// Invalid settings supplied by the caller
    Validation,
    /// The background connection task is no longer running
    Internal,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    /// Wraps a connector failure so it is reported as a [`Kind::Construction`] error.
    #[must_use]
    pub fn construction(source: TransportError) -> Self {
        Self::with_source(Kind::Construction, source)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

/// Reason a heartbeat cycle declared the connection dead.
#[non_exhaustive]
#[derive(Debug)]
pub enum HeartbeatFailure {
    /// No pong arrived within the configured timeout
    Timeout(Duration),
    /// The probe itself could not be sent
    ProbeFailed(Box<Error>),
}

impl fmt::Display for HeartbeatFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(after) => write!(f, "heartbeat failed: no pong within {after:?}"),
            Self::ProbeFailed(e) => write!(f, "heartbeat failed: unable to send probe: {e}"),
        }
    }
}

impl StdError for HeartbeatFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::ProbeFailed(e) => Some(e.as_ref()),
            Self::Timeout(_) => None,
        }
    }
}

/// The background task driving a connection has stopped.
#[non_exhaustive]
#[derive(Debug)]
pub struct Shutdown;

impl fmt::Display for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection task is no longer running")
    }
}

impl StdError for Shutdown {}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<HeartbeatFailure> for Error {
    fn from(err: HeartbeatFailure) -> Self {
        Error::with_source(Kind::Heartbeat, err)
    }
}

impl From<Shutdown> for Error {
    fn from(err: Shutdown) -> Self {
        Error::with_source(Kind::Internal, err)
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::with_source(Kind::Transport, err)
    }
}
