//! Feed socket
//!
//! One connection to the live feed. Callers only see the feed's JSON text
//! frames; protocol pings, pongs and raw frames are absorbed here.

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reply to the feed's application-level `ping` frame
pub const PONG_FRAME: &str = r#"{"type":"pong"}"#;

pub struct FeedSocket {
    endpoint: String,
    stream: Option<WsStream>,
    last_inbound: Instant,
}

impl FeedSocket {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            stream: None,
            last_inbound: Instant::now(),
        }
    }

    pub async fn connect(&mut self) -> Result<()> {
        info!(url = %self.endpoint, "Connecting to live feed");

        let (stream, response) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| SyncError::WebSocketConnection(format!("Failed to connect: {}", e)))?;

        info!(status = ?response.status(), "Feed socket open");
        self.stream = Some(stream);
        self.last_inbound = Instant::now();
        Ok(())
    }

    /// Next feed frame; `None` once the server has closed the socket
    pub async fn next_frame(&mut self) -> Result<Option<String>> {
        loop {
            let next = self.stream_mut()?.next().await;
            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(SyncError::WebSocketMessage(e.to_string()));
                }
                None => {
                    warn!("Feed socket ended");
                    self.stream = None;
                    return Ok(None);
                }
            };
            self.last_inbound = Instant::now();

            match message {
                Message::Text(text) => return Ok(Some(text)),
                Message::Binary(data) => {
                    let text = String::from_utf8(data)
                        .map_err(|e| SyncError::WebSocketMessage(e.to_string()))?;
                    return Ok(Some(text));
                }
                Message::Ping(data) => {
                    self.stream_mut()?
                        .send(Message::Pong(data))
                        .await?;
                }
                Message::Close(frame) => {
                    info!(frame = ?frame, "Feed closed by server");
                    self.stream = None;
                    return Ok(None);
                }
                Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    /// Answer the feed's `ping` frame
    pub async fn reply_pong(&mut self) -> Result<()> {
        debug!("Answering feed ping");
        self.stream_mut()?
            .send(Message::Text(PONG_FRAME.to_string()))
            .await
            .map_err(SyncError::from)
    }

    /// Protocol ping sent when the feed has gone quiet
    pub async fn keepalive(&mut self) -> Result<()> {
        self.stream_mut()?
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(SyncError::from)
    }

    /// Time since the last frame of any kind
    pub fn idle_for(&self) -> Duration {
        self.last_inbound.elapsed()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }

    fn stream_mut(&mut self) -> Result<&mut WsStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| SyncError::WebSocketConnection("Not connected".to_string()))
    }
}
