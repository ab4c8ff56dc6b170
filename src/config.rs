use std::time::Duration;

use backoff::backoff::Constant;
use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::Result;
use crate::error::Error;

const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
/// Payload used for liveness probes unless overridden.
pub const DEFAULT_PING_MESSAGE: &str = "ClientWebSocket";

/// Connection behavior, fixed for the lifetime of a [`ConnectionManager`].
///
/// Every field is optional in the builder and when deserializing; anything left out keeps
/// its default. Durations serialize as whole milliseconds.
///
/// ```
/// use std::time::Duration;
/// use lively_ws::config::Settings;
///
/// let settings = Settings::builder()
///     .heartbeat_interval(Duration::from_secs(10))
///     .message_ping(true)
///     .build();
///
/// assert!(settings.reconnect);
/// assert_eq!(settings.ping_message, "ClientWebSocket");
/// ```
///
/// [`ConnectionManager`]: crate::ConnectionManager
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Emit [`Event::Debug`](crate::events::Event::Debug) trace events
    #[builder(default)]
    pub debug: bool,
    /// Reconnect automatically after every close
    #[builder(default = true)]
    pub reconnect: bool,
    /// Delay before each reconnect attempt
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[builder(default = DEFAULT_RECONNECT_INTERVAL)]
    pub reconnect_interval: Duration,
    /// Delay between successive liveness probes
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL)]
    pub heartbeat_interval: Duration,
    /// How long to wait for a pong after a probe before declaring the connection dead
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[builder(default = DEFAULT_HEARTBEAT_TIMEOUT)]
    pub heartbeat_timeout: Duration,
    /// Probe payload, sent either as a ping frame or as a text message
    #[builder(into, default = DEFAULT_PING_MESSAGE.to_owned())]
    pub ping_message: String,
    /// Always send probes as text messages, even when ping frames are available
    #[builder(default)]
    pub message_ping: bool,
    /// Inbound text message that counts as a pong. Useful together with `message_ping`
    /// for servers that answer with an application-level reply.
    #[builder(into)]
    pub pong_message: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Settings {
    /// Reject settings that would make the connection spin.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("reconnect_interval", self.reconnect_interval),
            ("heartbeat_interval", self.heartbeat_interval),
            ("heartbeat_timeout", self.heartbeat_timeout),
        ];

        for (name, value) in intervals {
            if value.is_zero() {
                return Err(Error::validation(format!("{name} must be greater than zero")));
            }
        }

        Ok(())
    }
}

impl From<&Settings> for Constant {
    fn from(settings: &Settings) -> Self {
        Constant::new(settings.reconnect_interval)
    }
}

/// Options for the tungstenite transport. Opaque to the connection state machine.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct TransportOptions {
    /// Extra headers added to the opening handshake
    #[builder(default)]
    pub headers: Vec<(String, String)>,
    /// Give up on the opening handshake after this long
    pub connect_timeout: Option<Duration>,
    /// How long to wait for the server's close frame after sending ours
    #[builder(default = DEFAULT_CLOSE_TIMEOUT)]
    pub close_timeout: Duration,
    /// Largest accepted message, `None` keeps the tungstenite default
    pub max_message_size: Option<usize>,
    /// Largest accepted frame, `None` keeps the tungstenite default
    pub max_frame_size: Option<usize>,
    /// Set `TCP_NODELAY` on the socket so small frames such as pings go out immediately
    #[builder(default)]
    pub disable_nagle: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TransportOptions {
    pub(crate) fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        if self.max_message_size.is_some() {
            config = config.max_message_size(self.max_message_size);
        }
        if self.max_frame_size.is_some() {
            config = config.max_frame_size(self.max_frame_size);
        }
        config
    }
}
