//! Keeps a connection alive with short heartbeats and logs everything that happens to it.
//!
//! Run with:
//! ```sh
//! RUST_LOG=debug,rustls=off cargo run --example heartbeat --features tracing -- wss://echo.websocket.org
//! ```
//!
//! Stopping the server (or pulling the network) shows the heartbeat failing and the
//! connection retrying every `reconnect_interval` until it comes back.
use std::env;
use std::time::Duration;

use lively_ws::ConnectionManager;
use lively_ws::config::{Settings, TransportOptions};
use lively_ws::events::{Event, EventKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = env::args()
        .nth(1)
        .unwrap_or_else(|| "wss://echo.websocket.org".to_owned());

    let settings = Settings::builder()
        .heartbeat_interval(Duration::from_secs(2))
        .heartbeat_timeout(Duration::from_secs(1))
        .reconnect_interval(Duration::from_secs(1))
        .build();
    let options = TransportOptions::builder()
        .connect_timeout(Duration::from_secs(5))
        .build();
    let connection = ConnectionManager::new(&url, Vec::new(), options, settings)?;

    connection.subscribe_all(|event| match event {
        Event::Open(info) => info!(protocol = ?info.protocol, "open"),
        Event::Close(info) => warn!(%info, "closed"),
        Event::Error(error) => warn!(%error, "error"),
        Event::Pong(payload) => info!(%payload, "pong"),
        _ => {}
    });
    connection.subscribe(EventKind::Message, |event| {
        if let Event::Message(payload) = event {
            info!(%payload, "message");
        }
    });

    connection.init()?;

    let mut state = connection.state_receiver();
    state.wait_for(|state| state.is_open()).await?;
    connection.send("hello from lively-ws").await?;

    tokio::time::sleep(Duration::from_secs(30)).await;

    connection.close(1000, "demo finished").await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    Ok(())
}
