//! [`Transport`] backed by `tokio-tungstenite`.
//!
//! Each connection attempt spawns one I/O task that performs the opening handshake, then
//! pumps inbound frames into the [`EventSink`] and outbound commands into the socket. The
//! [`TungsteniteTransport`] handle only queues commands, so every operation on it is
//! synchronous.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::stream::SplitSink;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use url::Url;

use super::{
    CloseInfo, ConnectRequest, Connector, EventSink, OpenInfo, Payload, PingCapability,
    ReadyState, Transport, TransportError, TransportEvent,
};
use crate::config::TransportOptions;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Builds a [`TungsteniteTransport`] per connection attempt.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector {
    options: Arc<TransportOptions>,
}

impl TungsteniteConnector {
    #[must_use]
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }

    /// Validate the target and assemble the opening handshake request.
    fn handshake(&self, request: &ConnectRequest) -> Result<Request, TransportError> {
        let url = Url::parse(&request.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::UnsupportedScheme(url.scheme().to_owned()));
        }

        let mut handshake = url.as_str().into_client_request()?;

        if !request.protocols.is_empty() {
            let protocols = request.protocols.join(", ");
            let value = HeaderValue::from_str(&protocols)
                .map_err(|e| TransportError::InvalidHeader(format!("{protocols:?}: {e}")))?;
            handshake.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        for (header, value) in &self.options.headers {
            let name = HeaderName::from_bytes(header.as_bytes())
                .map_err(|e| TransportError::InvalidHeader(format!("{header}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidHeader(format!("{header}: {e}")))?;
            handshake.headers_mut().append(name, value);
        }

        Ok(handshake)
    }
}

impl Connector for TungsteniteConnector {
    type Transport = TungsteniteTransport;

    fn connect(
        &self,
        request: &ConnectRequest,
        sink: EventSink,
    ) -> Result<TungsteniteTransport, TransportError> {
        let handshake = self.handshake(request)?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let ready = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));
        let io = Io {
            options: Arc::clone(&self.options),
            sink,
            ready: Arc::clone(&ready),
        };

        tokio::spawn(async move {
            io.run(handshake, command_rx).await;
        });

        Ok(TungsteniteTransport { commands, ready })
    }
}

enum Outbound {
    Message(Message),
    Close(CloseInfo),
}

/// Handle to one tungstenite connection. Dropping it ends the connection without reporting
/// any further events.
#[derive(Debug)]
pub struct TungsteniteTransport {
    commands: mpsc::UnboundedSender<Outbound>,
    ready: Arc<AtomicU8>,
}

impl TungsteniteTransport {
    fn enqueue(&self, message: Message) -> Result<(), TransportError> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::NotOpen);
        }

        self.commands
            .send(Outbound::Message(message))
            .map_err(|_e| TransportError::NotOpen)
    }
}

impl Transport for TungsteniteTransport {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready.load(Ordering::Acquire))
    }

    fn ping_capability(&self) -> PingCapability {
        PingCapability::Native
    }

    fn send(&mut self, payload: Payload) -> Result<(), TransportError> {
        let message = match payload {
            Payload::Text(text) => Message::Text(text.into()),
            Payload::Binary(bytes) => Message::Binary(bytes.into()),
        };
        self.enqueue(message)
    }

    fn ping(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.enqueue(Message::Ping(payload.to_vec().into()))
    }

    fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        if matches!(self.ready_state(), ReadyState::Closing | ReadyState::Closed) {
            return Ok(());
        }

        self.ready
            .store(ReadyState::Closing as u8, Ordering::Release);
        self.commands
            .send(Outbound::Close(CloseInfo::new(code, reason)))
            .map_err(|_e| TransportError::NotOpen)
    }
}

/// State of the I/O task behind a [`TungsteniteTransport`].
struct Io {
    options: Arc<TransportOptions>,
    sink: EventSink,
    ready: Arc<AtomicU8>,
}

impl Io {
    async fn run(self, handshake: Request, mut commands: mpsc::UnboundedReceiver<Outbound>) {
        let Some(stream) = self.open(handshake, &mut commands).await else {
            return;
        };

        if let Some(close) = self.pump(stream, &mut commands).await {
            #[cfg(feature = "tracing")]
            tracing::debug!(%close, "WebSocket closed");
            self.set_ready(ReadyState::Closed);
            self.sink.emit(TransportEvent::Close(close));
        }
    }

    fn set_ready(&self, state: ReadyState) {
        self.ready.store(state as u8, Ordering::Release);
    }

    /// Perform the opening handshake. A close requested meanwhile aborts it.
    async fn open(
        &self,
        handshake: Request,
        commands: &mut mpsc::UnboundedReceiver<Outbound>,
    ) -> Option<WsStream> {
        let connecting = connect_async_with_config(
            handshake,
            Some(self.options.websocket_config()),
            self.options.disable_nagle,
        );
        let attempt = async {
            match self.options.connect_timeout {
                Some(limit) => match timeout(limit, connecting).await {
                    Ok(result) => result.map_err(TransportError::from),
                    Err(_elapsed) => Err(TransportError::ConnectTimeout(limit)),
                },
                None => connecting.await.map_err(TransportError::from),
            }
        };
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    return match result {
                        Ok((stream, response)) => {
                            let protocol = response
                                .headers()
                                .get(SEC_WEBSOCKET_PROTOCOL)
                                .and_then(|value| value.to_str().ok())
                                .map(str::to_owned);
                            self.set_ready(ReadyState::Open);
                            self.sink.emit(TransportEvent::Open(OpenInfo::new(protocol)));
                            Some(stream)
                        }
                        Err(e) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(error = %e, "Unable to connect");
                            self.set_ready(ReadyState::Closed);
                            self.sink.emit(TransportEvent::Error(e));
                            self.sink.emit(TransportEvent::Close(CloseInfo::abnormal()));
                            None
                        }
                    };
                }

                command = commands.recv() => match command {
                    Some(Outbound::Close(info)) => {
                        self.set_ready(ReadyState::Closed);
                        self.sink.emit(TransportEvent::Close(info));
                        return None;
                    }
                    // Rejected by the handle until the socket is open
                    Some(Outbound::Message(_)) => {}
                    None => return None,
                },
            }
        }
    }

    /// Move frames in both directions until the connection ends. Returns the close to
    /// report, or `None` when the handle was dropped.
    ///
    /// Writes run on their own task, so a peer that stops reading can neither stall
    /// inbound frames nor hold up the close deadline.
    async fn pump(
        &self,
        stream: WsStream,
        commands: &mut mpsc::UnboundedReceiver<Outbound>,
    ) -> Option<CloseInfo> {
        let (write, mut read) = stream.split();
        let (frames, frame_rx) = mpsc::unbounded_channel();
        let (failure_tx, mut failure) = oneshot::channel();
        let mut writer = tokio::spawn(write_frames(write, frame_rx, failure_tx));

        let mut requested: Option<CloseInfo> = None;
        let mut received: Option<CloseInfo> = None;
        let mut close_deadline: Option<Instant> = None;

        let handle_alive = loop {
            tokio::select! {
                inbound = read.next() => match inbound {
                    Some(Ok(message)) => {
                        if let Some(info) = self.inbound(message) {
                            received = Some(info);
                        }
                    }
                    Some(Err(e)) if is_closed(&e) => break true,
                    None => break true,
                    Some(Err(e)) => {
                        self.sink.emit(TransportEvent::Error(e.into()));
                        break true;
                    }
                },

                outbound = commands.recv(), if close_deadline.is_none() => match outbound {
                    Some(Outbound::Message(message)) => {
                        _ = frames.send(message);
                    }
                    Some(Outbound::Close(info)) => {
                        close_deadline = Some(Instant::now() + self.options.close_timeout);
                        let frame = CloseFrame {
                            code: CloseCode::from(info.code),
                            reason: info.reason.clone().into(),
                        };
                        requested = Some(info);
                        _ = frames.send(Message::Close(Some(frame)));
                    }
                    None => break false,
                },

                result = &mut failure => {
                    let closing = requested.is_some() || received.is_some();
                    if let Ok(e) = result
                        && !closing
                        && !is_closed(&e)
                    {
                        self.sink.emit(TransportEvent::Error(e.into()));
                    }
                    break true;
                }

                () = sleep_until(close_deadline.unwrap_or_else(Instant::now)),
                    if close_deadline.is_some() =>
                {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Peer did not complete the close handshake in time");
                    break true;
                }
            }
        };

        if !handle_alive {
            _ = frames.send(Message::Close(None));
            drop(frames);
            _ = timeout(self.options.close_timeout, &mut writer).await;
            writer.abort();
            return None;
        }

        writer.abort();
        Some(
            received
                .or(requested)
                .unwrap_or_else(CloseInfo::abnormal),
        )
    }

    /// Forward one inbound frame. Returns the peer's close, if this was one.
    fn inbound(&self, message: Message) -> Option<CloseInfo> {
        let event = match message {
            Message::Text(text) => TransportEvent::Message(Payload::Text(text.as_str().to_owned())),
            Message::Binary(bytes) => TransportEvent::Message(Payload::Binary(bytes.to_vec())),
            Message::Ping(payload) => TransportEvent::Ping(payload.to_vec()),
            Message::Pong(payload) => TransportEvent::Pong(payload.to_vec()),
            Message::Close(frame) => {
                self.set_ready(ReadyState::Closing);
                return Some(frame.map_or_else(
                    || CloseInfo::new(CloseInfo::NO_STATUS, ""),
                    |frame| CloseInfo::new(u16::from(frame.code), frame.reason.as_str()),
                ));
            }
            Message::Frame(_) => return None,
        };

        self.sink.emit(event);
        None
    }
}

fn is_closed(e: &tungstenite::Error) -> bool {
    matches!(
        e,
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed
    )
}

/// Write queued frames until the queue closes or the socket fails.
async fn write_frames(
    mut write: SplitSink<WsStream, Message>,
    mut frames: mpsc::UnboundedReceiver<Message>,
    failure: oneshot::Sender<tungstenite::Error>,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = write.send(frame).await {
            _ = failure.send(e);
            return;
        }
    }
}
