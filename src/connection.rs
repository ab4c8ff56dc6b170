#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::Arc;

use backoff::backoff::{Backoff as _, Constant};
use tokio::sync::{mpsc, oneshot, watch};

use crate::Result;
use crate::config::{Settings, TransportOptions};
use crate::error::{Error, Shutdown};
use crate::events::{Event, EventBus, EventKind, SubscriptionId};
use crate::heartbeat::HeartbeatController;
use crate::timer::TimerSlot;
use crate::transport::tungstenite::TungsteniteConnector;
use crate::transport::{
    CloseInfo, ConnectRequest, Connector, Envelope, EventSink, OpenInfo, Payload, PingCapability,
    ReadyState, Transport, TransportError, TransportEvent,
};

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, [`ConnectionManager::init`] not called yet
    Idle,
    /// A transport exists and is opening
    Connecting,
    /// The transport is open and heartbeats are running
    Open,
    /// Waiting for the reconnect timer
    Reconnecting {
        /// Connections lost or failed since the last successful open
        attempt: u32,
    },
    /// Close requested, waiting for the transport to confirm
    Closing,
    /// Closed for good, nothing is scheduled
    Closed,
}

impl ConnectionState {
    /// Check if the connection is currently open.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if the connection reached its terminal state.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

enum Command {
    Init,
    Connect(oneshot::Sender<bool>),
    Reconnect,
    Close {
        code: u16,
        reason: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        payload: Payload,
        reply: oneshot::Sender<Result<()>>,
    },
    Ping(oneshot::Sender<Result<()>>),
}

/// Keeps a logical WebSocket connection alive.
///
/// The manager owns one transport at a time. Once [`init`](Self::init) is called it
/// connects, probes the connection every `heartbeat_interval`, closes it when a probe goes
/// unanswered for `heartbeat_timeout`, and reconnects `reconnect_interval` after every close
/// for as long as `reconnect` is enabled. All of that runs on a background task. The handle
/// only sends it commands, so it is cheap to clone.
///
/// Lifecycle and diagnostics are published on an [`EventBus`]. Register handlers before
/// calling `init` to observe the first `open`.
///
/// # Example
///
/// ```no_run
/// use lively_ws::ConnectionManager;
/// use lively_ws::config::{Settings, TransportOptions};
/// use lively_ws::events::{Event, EventKind};
///
/// # async fn example() -> lively_ws::Result<()> {
/// let connection = ConnectionManager::new(
///     "wss://example.com/socket",
///     Vec::new(),
///     TransportOptions::default(),
///     Settings::default(),
/// )?;
///
/// connection.subscribe(EventKind::Message, |event| {
///     if let Event::Message(payload) = event {
///         println!("received {payload}");
///     }
/// });
///
/// connection.init()?;
/// # Ok(())
/// # }
/// ```
///
/// Dropping the last clone stops the background task, cancels every timer and discards the
/// transport.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    events: Arc<EventBus>,
    settings: Arc<Settings>,
}

impl ConnectionManager {
    /// Create a manager that connects through `tokio-tungstenite`.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        url: &str,
        protocols: Vec<String>,
        options: TransportOptions,
        settings: Settings,
    ) -> Result<Self> {
        Self::with_connector(url, protocols, TungsteniteConnector::new(options), settings)
    }

    /// Create a manager that builds its transports with `connector`.
    ///
    /// Nothing connects until [`init`](Self::init) is called.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_connector<C: Connector>(
        url: &str,
        protocols: Vec<String>,
        connector: C,
        settings: Settings,
    ) -> Result<Self> {
        settings.validate()?;

        let settings = Arc::new(settings);
        let events = Arc::new(EventBus::new());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (envelope_tx, envelope_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let session = Session {
            link: Link {
                settings: Arc::clone(&settings),
                events: Arc::clone(&events),
                transport: None,
                state_tx,
            },
            backoff: settings.as_ref().into(),
            connector,
            request: ConnectRequest::new(url, protocols),
            generation: 0,
            active: None,
            attempt: 0,
            envelopes: envelope_tx,
            reconnect_timer: TimerSlot::new("reconnect"),
            heartbeat: HeartbeatController::new(),
        };

        tokio::spawn(async move {
            Self::connection_loop(session, command_rx, envelope_rx).await;
        });

        Ok(Self {
            commands,
            state_rx,
            events,
            settings,
        })
    }

    /// Runs every handler of one connection, one at a time.
    async fn connection_loop<C: Connector>(
        mut session: Session<C>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut envelopes: mpsc::UnboundedReceiver<Envelope>,
    ) {
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => {
                    let Some(command) = command else {
                        session.teardown();
                        break;
                    };
                    session.handle(command);
                }

                Some(envelope) = envelopes.recv() => session.dispatch(envelope),

                () = session.reconnect_timer.fired() => session.reconnect(),

                () = session.heartbeat.interval.fired() => {
                    session.heartbeat.heartbeat(&mut session.link);
                }

                () = session.heartbeat.timeout.fired() => {
                    session.heartbeat.heartbeat_timeout(&mut session.link);
                }
            }
        }
    }

    /// Start the connection: connect now, or schedule a reconnect if the transport cannot be
    /// constructed. Only the first call has an effect.
    pub fn init(&self) -> Result<()> {
        self.command(Command::Init)
    }

    /// Replace the current transport with a freshly connected one.
    ///
    /// Returns whether the transport could be constructed. This is an explicit request and
    /// is honored even with `reconnect` disabled; a failure is handled the same way as
    /// during [`init`](Self::init).
    pub async fn connect(&self) -> Result<bool> {
        self.request(Command::Connect).await
    }

    /// Discard the current transport and connect again, unless `reconnect` is disabled.
    pub fn reconnect(&self) -> Result<()> {
        self.command(Command::Reconnect)
    }

    /// Ask the transport to close with `code` and `reason`.
    ///
    /// Heartbeats stop, and a reconnect is scheduled when `reconnect` is enabled, once the
    /// transport reports the close.
    pub async fn close(&self, code: u16, reason: &str) -> Result<()> {
        let reason = reason.to_owned();
        self.request(|reply| Command::Close {
            code,
            reason,
            reply,
        })
        .await?
    }

    /// Send an application message on the open transport.
    pub async fn send<D: Into<Payload>>(&self, data: D) -> Result<()> {
        let payload = data.into();
        self.request(|reply| Command::Send { payload, reply })
            .await?
    }

    /// Send a liveness probe carrying the configured `ping_message`.
    ///
    /// The probe is a ping frame when the transport has native ping support and
    /// `message_ping` is off, otherwise a text message.
    pub async fn ping(&self) -> Result<()> {
        self.request(Command::Ping).await?
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Register `handler` for events of one kind. See [`EventBus::subscribe`].
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, handler)
    }

    /// Register `handler` for every event. See [`EventBus::subscribe_all`].
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events.subscribe_all(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_e| Shutdown)?;
        Ok(())
    }

    async fn request<T, F>(&self, build: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> Command,
    {
        let (reply, response) = oneshot::channel();
        self.command(build(reply))?;
        response.await.map_err(|_e| Shutdown.into())
    }
}

/// The part of a session the heartbeat needs: settings, events and the live transport.
pub(crate) struct Link<T: Transport> {
    pub(crate) settings: Arc<Settings>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) transport: Option<T>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<T: Transport> Link<T> {
    pub(crate) fn emit(&self, event: Event) {
        self.events.emit(&event);
    }

    pub(crate) fn debug(&self, message: &str) {
        #[cfg(feature = "tracing")]
        tracing::debug!("{message}");
        if self.settings.debug {
            self.emit(Event::Debug(message.to_owned()));
        }
    }

    pub(crate) fn error(&self, error: Error) {
        #[cfg(feature = "tracing")]
        tracing::warn!(kind = ?error.kind(), "{error}");
        self.emit(Event::Error(Arc::new(error)));
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            #[cfg(feature = "tracing")]
            tracing::trace!(?previous, current = ?state, "Connection state changed");
        }
    }

    pub(crate) fn send(&mut self, payload: Payload) -> Result<()> {
        self.debug(&format!("Sending data: {payload}"));
        let transport = self.transport.as_mut().ok_or(TransportError::NotOpen)?;
        transport.send(payload)?;
        Ok(())
    }

    /// Probe with `ping_message`, as a ping frame when possible.
    pub(crate) fn ping(&mut self) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(TransportError::NotOpen)?;

        if self.settings.message_ping || transport.ping_capability() == PingCapability::MessageOnly
        {
            let probe = Payload::Text(self.settings.ping_message.clone());
            return self.send(probe);
        }

        transport.ping(self.settings.ping_message.as_bytes())?;
        Ok(())
    }

    pub(crate) fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        self.debug(&format!("Closing with {code}: {reason}"));
        let transport = self.transport.as_mut().ok_or(TransportError::NotOpen)?;
        transport.close(code, reason)?;
        self.set_state(ConnectionState::Closing);
        Ok(())
    }
}

/// State owned by the background task of one [`ConnectionManager`].
pub(crate) struct Session<C: Connector> {
    pub(crate) link: Link<C::Transport>,
    connector: C,
    request: ConnectRequest,
    /// Incremented for every constructed transport
    generation: u64,
    /// Generation whose events are currently handled
    active: Option<u64>,
    attempt: u32,
    backoff: Constant,
    envelopes: mpsc::UnboundedSender<Envelope>,
    pub(crate) reconnect_timer: TimerSlot,
    pub(crate) heartbeat: HeartbeatController,
}

impl<C: Connector> Session<C> {
    fn handle(&mut self, command: Command) {
        match command {
            Command::Init => self.init(),
            Command::Connect(reply) => {
                let connected = self.connect();
                if connected {
                    self.configure();
                } else {
                    self.schedule_reconnect();
                }
                _ = reply.send(connected);
            }
            Command::Reconnect => self.reconnect(),
            Command::Close {
                code,
                reason,
                reply,
            } => {
                _ = reply.send(self.link.close(code, &reason));
            }
            Command::Send { payload, reply } => {
                _ = reply.send(self.link.send(payload));
            }
            Command::Ping(reply) => {
                _ = reply.send(self.link.ping());
            }
        }
    }

    fn init(&mut self) {
        if self.link.state() != ConnectionState::Idle {
            self.link.debug("Already initialized, ignoring init.");
            return;
        }

        self.link.debug("Initializing connection.");
        if self.connect() {
            self.configure();
        } else {
            self.schedule_reconnect();
        }
    }

    /// Construct a new transport, discarding the current one. Failures become an `error`
    /// event and leave no transport behind.
    fn connect(&mut self) -> bool {
        self.discard_transport();
        self.link
            .debug(&format!("Connecting to {}.", self.request.url));

        self.generation += 1;
        let sink = EventSink::new(self.generation, self.envelopes.clone());

        match self.connector.connect(&self.request, sink) {
            Ok(transport) => {
                self.link.transport = Some(transport);
                self.link.set_state(ConnectionState::Connecting);
                true
            }
            Err(e) => {
                self.link.error(Error::construction(e));
                false
            }
        }
    }

    /// Constant-interval retry loop: attempt now, re-arm the reconnect slot on failure.
    fn reconnect(&mut self) {
        if !self.link.settings.reconnect {
            return;
        }

        self.reconnect_timer.cancel();
        self.link.debug("Reconnecting.");
        if self.connect() {
            self.configure();
        } else {
            self.schedule_reconnect();
        }
    }

    /// Route events of the newest transport to the handlers.
    fn configure(&mut self) {
        self.link
            .debug(&format!("Configuring transport #{}.", self.generation));
        self.active = Some(self.generation);
    }

    fn schedule_reconnect(&mut self) {
        if !self.link.settings.reconnect {
            self.link.debug("Reconnect disabled, connection closed.");
            self.link.set_state(ConnectionState::Closed);
            return;
        }

        // A `Constant` policy never runs out
        let Some(delay) = self.backoff.next_backoff() else {
            self.link.debug("Reconnect policy exhausted, connection closed.");
            self.link.set_state(ConnectionState::Closed);
            return;
        };
        self.attempt = self.attempt.saturating_add(1);
        self.link.debug(&format!(
            "Reconnect attempt {} in {delay:?}.",
            self.attempt
        ));
        self.reconnect_timer.arm(delay);
        self.link.set_state(ConnectionState::Reconnecting {
            attempt: self.attempt,
        });
    }

    fn discard_transport(&mut self) {
        self.heartbeat.stop_heartbeat(&self.link);
        self.heartbeat.cancel_timeout(&self.link);
        self.active = None;
        if self.link.transport.take().is_some() {
            self.link.debug("Discarded previous transport.");
        }
    }

    fn dispatch(&mut self, envelope: Envelope) {
        if self.active != Some(envelope.generation) {
            #[cfg(feature = "tracing")]
            tracing::trace!(
                generation = envelope.generation,
                event = ?envelope.event,
                "Ignoring event from discarded transport"
            );
            return;
        }

        match envelope.event {
            TransportEvent::Open(info) => self.on_open(info),
            TransportEvent::Close(info) => self.on_close(info),
            TransportEvent::Error(e) => self.on_error(e),
            TransportEvent::Message(payload) => self.on_message(payload),
            TransportEvent::Ping(payload) => self.on_ping(&payload),
            TransportEvent::Pong(payload) => self.on_pong(&payload),
        }
    }

    fn on_open(&mut self, info: OpenInfo) {
        let ready_state = self.link.transport.as_ref().map(Transport::ready_state);
        if ready_state != Some(ReadyState::Open) {
            self.link.debug(&format!(
                "Ignoring open notification, transport is {ready_state:?}."
            ));
            return;
        }

        self.attempt = 0;
        self.backoff.reset();
        self.link.set_state(ConnectionState::Open);
        self.link.emit(Event::Open(info));
        self.heartbeat.start_heartbeat(&self.link);
    }

    fn on_close(&mut self, info: CloseInfo) {
        self.link.emit(Event::Close(info));
        self.discard_transport();
        self.schedule_reconnect();
    }

    fn on_error(&self, error: TransportError) {
        self.link.error(error.into());
    }

    fn on_message(&mut self, payload: Payload) {
        if let Payload::Text(text) = &payload
            && self.link.settings.pong_message.as_deref() == Some(text.as_str())
        {
            self.on_pong(text.as_bytes());
            return;
        }

        self.link.emit(Event::Message(payload));
    }

    fn on_ping(&self, payload: &[u8]) {
        self.link
            .emit(Event::Ping(String::from_utf8_lossy(payload).into_owned()));
    }

    fn on_pong(&mut self, payload: &[u8]) {
        self.link
            .emit(Event::Pong(String::from_utf8_lossy(payload).into_owned()));
        self.heartbeat.stop_heartbeat_timeout(&self.link);
    }

    /// Cancel everything reachable from this session.
    fn teardown(&mut self) {
        self.reconnect_timer.cancel();
        self.discard_transport();
        self.link.set_state(ConnectionState::Closed);
        self.link.debug("Connection dropped, session ended.");
    }
}
