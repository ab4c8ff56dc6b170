#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lively_ws::events::{Event, EventKind};
use lively_ws::transport::{
    CloseInfo, ConnectRequest, Connector, EventSink, OpenInfo, Payload, PingCapability, ReadyState,
    Transport, TransportError, TransportEvent,
};
use lively_ws::ConnectionManager;
use tokio::time::Instant;

/// How the in-memory peer behaves for one connection attempt.
#[derive(Debug, Clone, Copy)]
pub struct Behavior {
    refuse: bool,
    answer_pings: bool,
    ping_fails: bool,
    capability: PingCapability,
}

impl Behavior {
    /// Transport construction fails.
    pub fn refuse() -> Self {
        Self {
            refuse: true,
            ..Self::responsive()
        }
    }

    /// Opens and answers every probe with a pong.
    pub fn responsive() -> Self {
        Self {
            refuse: false,
            answer_pings: true,
            ping_fails: false,
            capability: PingCapability::Native,
        }
    }

    /// Opens and never answers probes.
    pub fn silent() -> Self {
        Self {
            answer_pings: false,
            ..Self::responsive()
        }
    }

    /// Opens, but sending a ping frame fails.
    pub fn broken_probe() -> Self {
        Self {
            ping_fails: true,
            ..Self::responsive()
        }
    }

    /// Same peer, without native ping frames.
    pub fn message_only(self) -> Self {
        Self {
            capability: PingCapability::MessageOnly,
            ..self
        }
    }
}

#[derive(Debug)]
pub struct Peer {
    script: VecDeque<Behavior>,
    fallback: Behavior,
    pub attempts: Vec<Instant>,
    pub sent: Vec<(Instant, Payload)>,
    pub pings: Vec<(Instant, Vec<u8>)>,
    pub closes: Vec<(Instant, u16, String)>,
    pub sinks: Vec<EventSink>,
}

/// In-memory [`Connector`] whose peers follow a script, then a fallback behavior.
#[derive(Debug, Clone)]
pub struct MockConnector {
    peer: Arc<Mutex<Peer>>,
}

impl MockConnector {
    pub fn new(script: Vec<Behavior>, fallback: Behavior) -> Self {
        Self {
            peer: Arc::new(Mutex::new(Peer {
                script: script.into(),
                fallback,
                attempts: Vec::new(),
                sent: Vec::new(),
                pings: Vec::new(),
                closes: Vec::new(),
                sinks: Vec::new(),
            })),
        }
    }

    pub fn always(behavior: Behavior) -> Self {
        Self::new(Vec::new(), behavior)
    }

    pub fn peer(&self) -> std::sync::MutexGuard<'_, Peer> {
        self.peer.lock().unwrap()
    }

    /// Deliver an event as if the newest transport produced it.
    pub fn push(&self, event: TransportEvent) {
        let sink = self.peer().sinks.last().cloned().unwrap();
        sink.emit(event);
    }

    /// Deliver an event through the transport of the given attempt (0-based).
    pub fn push_to(&self, attempt: usize, event: TransportEvent) {
        let sink = self.peer().sinks[attempt].clone();
        sink.emit(event);
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    fn connect(
        &self,
        _request: &ConnectRequest,
        sink: EventSink,
    ) -> Result<MockTransport, TransportError> {
        let mut peer = self.peer();
        peer.attempts.push(Instant::now());
        let behavior = peer.script.pop_front().unwrap_or(peer.fallback);
        peer.sinks.push(sink.clone());
        drop(peer);

        if behavior.refuse {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into());
        }

        sink.emit(TransportEvent::Open(OpenInfo::new(None)));
        Ok(MockTransport {
            peer: Arc::clone(&self.peer),
            sink,
            behavior,
            ready: ReadyState::Open,
        })
    }
}

pub struct MockTransport {
    peer: Arc<Mutex<Peer>>,
    sink: EventSink,
    behavior: Behavior,
    ready: ReadyState,
}

impl Transport for MockTransport {
    fn ready_state(&self) -> ReadyState {
        self.ready
    }

    fn ping_capability(&self) -> PingCapability {
        self.behavior.capability
    }

    fn send(&mut self, payload: Payload) -> Result<(), TransportError> {
        if self.ready != ReadyState::Open {
            return Err(TransportError::NotOpen);
        }
        self.peer.lock().unwrap().sent.push((Instant::now(), payload));
        Ok(())
    }

    fn ping(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if self.behavior.capability == PingCapability::MessageOnly {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "no ping frames").into());
        }
        if self.behavior.ping_fails {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe").into());
        }

        self.peer
            .lock()
            .unwrap()
            .pings
            .push((Instant::now(), payload.to_vec()));
        if self.behavior.answer_pings {
            self.sink.emit(TransportEvent::Pong(payload.to_vec()));
        }
        Ok(())
    }

    fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.peer
            .lock()
            .unwrap()
            .closes
            .push((Instant::now(), code, reason.to_owned()));
        self.ready = ReadyState::Closed;
        self.sink
            .emit(TransportEvent::Close(CloseInfo::new(code, reason)));
        Ok(())
    }
}

/// Every event emitted by a connection, with the time it was emitted.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<(Instant, Event)>>>,
}

impl Recorder {
    pub fn attach(connection: &ConnectionManager) -> Self {
        let recorder = Self::default();
        let events = Arc::clone(&recorder.events);
        connection.subscribe_all(move |event| {
            events.lock().unwrap().push((Instant::now(), event.clone()));
        });
        recorder
    }

    pub fn all(&self) -> Vec<(Instant, Event)> {
        self.events.lock().unwrap().clone()
    }

    pub fn of(&self, kind: EventKind) -> Vec<(Instant, Event)> {
        self.all()
            .into_iter()
            .filter(|(_, event)| event.kind() == kind)
            .collect()
    }

    /// Emission times of every event of `kind`, relative to `start`.
    pub fn times(&self, kind: EventKind, start: Instant) -> Vec<Duration> {
        self.of(kind).into_iter().map(|(at, _)| at - start).collect()
    }
}

#[must_use]
pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Relative times of a list of instants.
pub fn relative(start: Instant, instants: impl IntoIterator<Item = Instant>) -> Vec<Duration> {
    instants.into_iter().map(|at| at - start).collect()
}
