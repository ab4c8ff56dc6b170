//! Lifecycle and diagnostic notifications.
//!
//! The connection publishes everything a consumer may care about to an [`EventBus`].
//! Handlers are plain closures registered per [`EventKind`] (or for every event) and run
//! synchronously on the connection task, in emission order. They should hand off any slow
//! work instead of blocking, since the connection cannot react to timers or transport
//! events while a handler runs.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::error::Error;
use crate::transport::{CloseInfo, OpenInfo, Payload};

/// Something observed by the connection.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Event {
    /// The transport reported open and is ready for traffic
    Open(OpenInfo),
    /// The transport closed, cleanly or not
    Close(CloseInfo),
    /// Inbound application message
    Message(Payload),
    /// A failure the connection observed on its own
    Error(Arc<Error>),
    /// Human-readable trace, only emitted when `debug` is enabled
    Debug(String),
    /// A liveness probe is about to be sent
    Heartbeat,
    /// Ping received from the peer
    Ping(String),
    /// Pong received from the peer
    Pong(String),
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open(_) => EventKind::Open,
            Self::Close(_) => EventKind::Close,
            Self::Message(_) => EventKind::Message,
            Self::Error(_) => EventKind::Error,
            Self::Debug(_) => EventKind::Debug,
            Self::Heartbeat => EventKind::Heartbeat,
            Self::Ping(_) => EventKind::Ping,
            Self::Pong(_) => EventKind::Pong,
        }
    }
}

/// Discriminant of [`Event`], used to pick which events a handler receives.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Close,
    Message,
    Error,
    Debug,
    Heartbeat,
    Ping,
    Pong,
}

/// Identifies a registered handler so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Listener {
    /// `None` listens to every event
    kind: Option<EventKind>,
    handler: Handler,
}

/// Publish/subscribe surface for connection [`Event`]s.
pub struct EventBus {
    listeners: DashMap<SubscriptionId, Listener>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for events of one kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Register `handler` for every event.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    /// Remove a handler. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver `event` to every matching handler, in registration order.
    pub(crate) fn emit(&self, event: &Event) {
        let kind = event.kind();

        // Handlers are cloned out first so they can (un)subscribe without deadlocking on the map.
        let mut handlers: Vec<(SubscriptionId, Handler)> = self
            .listeners
            .iter()
            .filter(|entry| entry.kind.is_none_or(|wanted| wanted == kind))
            .map(|entry| (*entry.key(), Arc::clone(&entry.handler)))
            .collect();
        handlers.sort_unstable_by_key(|(id, _)| *id);

        for (_, handler) in handlers {
            handler(event);
        }
    }

    fn register(&self, kind: Option<EventKind>, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, Listener { kind, handler });
        id
    }
}
