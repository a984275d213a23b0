//! WebSocket connection manager
//!
//! Handles reconnection logic and frame dispatch.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use super::FeedSocket;
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::metrics;
use crate::parser::FeedMessage;
use crate::provider::{ConnectorState, EventsProvider};

/// Maximum backoff delay in milliseconds (60 seconds)
const MAX_BACKOFF_MS: u64 = 60_000;
/// Cooldown period after which reconnect attempts are reset (5 minutes)
const RECONNECT_COOLDOWN_SECS: u64 = 300;
/// Silence after which a protocol ping is sent
const KEEPALIVE_AFTER: Duration = Duration::from_secs(30);

/// Manages the feed socket with automatic reconnection
pub struct WebSocketManager {
    provider: Arc<EventsProvider>,
    config: Arc<Config>,
    socket: FeedSocket,
    reconnect_attempts: u32,
    last_successful_connection: Option<Instant>,
}

impl WebSocketManager {
    pub fn new(provider: Arc<EventsProvider>, config: Arc<Config>) -> Self {
        let socket = FeedSocket::new(config.ws_endpoint.clone());

        Self {
            provider,
            config,
            socket,
            reconnect_attempts: 0,
            last_successful_connection: None,
        }
    }

    /// Run until the reconnect budget is exhausted
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting live feed manager");

        loop {
            // Reset reconnect attempts if we've been stable for a while
            if let Some(last_success) = self.last_successful_connection {
                if last_success.elapsed() > Duration::from_secs(RECONNECT_COOLDOWN_SECS)
                    && self.reconnect_attempts > 0
                {
                    info!(
                        previous_attempts = self.reconnect_attempts,
                        "Resetting reconnect counter after cooldown period"
                    );
                    self.reconnect_attempts = 0;
                }
            }

            let result = self.connect_and_process().await;
            self.provider.set_connector_state(ConnectorState::Disconnected);

            match result {
                Ok(()) => {
                    info!("Feed processing completed normally, reconnecting...");
                    sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    error!(error = %e, "Feed socket error");
                    self.reconnect_attempts += 1;
                    if self.reconnect_attempts > self.config.max_reconnect_attempts {
                        error!(attempts = self.reconnect_attempts, "Giving up on live feed");
                        return Err(e);
                    }

                    let delay = backoff(self.config.reconnect_delay_ms, self.reconnect_attempts);
                    warn!(
                        attempt = self.reconnect_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting after error..."
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn connect_and_process(&mut self) -> Result<()> {
        self.provider.set_connector_state(ConnectorState::Connecting);
        self.socket.connect().await?;
        self.provider.set_connector_state(ConnectorState::Connected);

        self.last_successful_connection = Some(Instant::now());
        self.reconnect_attempts = 0;
        info!("Feed connected, resetting reconnect counter");

        loop {
            match timeout(KEEPALIVE_AFTER, self.socket.next_frame()).await {
                Ok(Ok(Some(text))) => match self.handle_frame(&text) {
                    Ok(true) => self.socket.reply_pong().await?,
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "Failed to process frame"),
                },
                Ok(Ok(None)) => return Ok(()),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(
                        idle_secs = self.socket.idle_for().as_secs(),
                        "Feed quiet, sending keepalive"
                    );
                    if let Err(e) = self.socket.keepalive().await {
                        warn!(error = %e, "Keepalive failed, reconnecting");
                        self.socket.close().await;
                        return Err(SyncError::ConnectionTimeout);
                    }
                }
            }
        }
    }

    /// Apply one text frame; `true` when the feed expects a pong
    pub fn handle_frame(&self, raw: &str) -> Result<bool> {
        metrics::get().frames_received.inc();

        match FeedMessage::parse(raw)? {
            FeedMessage::Session { token } => {
                if self.provider.tokens().rotate(token) {
                    debug!("Session token rotated by feed");
                }
                Ok(false)
            }
            FeedMessage::Content(update) => {
                let delivered = self.provider.dispatcher().dispatch(&update);
                trace!(
                    identifier = %update.identifier,
                    kind = update.delta.kind(),
                    delivered,
                    "Content frame dispatched"
                );
                Ok(false)
            }
            FeedMessage::Ping => Ok(true),
            FeedMessage::Unknown(msg) => {
                trace!(msg = %msg, "Unknown frame");
                Ok(false)
            }
        }
    }

    /// Close the socket
    pub async fn shutdown(&mut self) {
        if self.socket.is_connected() {
            self.socket.close().await;
        }
        self.provider.set_connector_state(ConnectorState::Disconnected);
    }
}

/// Exponential backoff capped at `MAX_BACKOFF_MS`
fn backoff(base_ms: u64, attempt: u32) -> Duration {
    let delay = base_ms.saturating_mul(2u64.pow(attempt.min(6)));
    Duration::from_millis(delay.min(MAX_BACKOFF_MS))
}
