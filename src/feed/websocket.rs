//! WebSocket client for the VALR trade socket.
//!
//! Ping frames are answered by tungstenite while reading; only text (and
//! UTF-8 binary) frames are surfaced to the caller.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::messages::SubscribeRequest;
use super::{ConnectionState, FeedConnection};
use crate::error::FeedError;
use crate::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Feed connection backed by tokio-tungstenite.
pub struct WsFeedConnection {
    /// WebSocket endpoint.
    url: String,
    /// Open transport, if any.
    stream: Option<WsStream>,
    /// Lifecycle state.
    state: ConnectionState,
}

impl WsFeedConnection {
    /// Create a disconnected client for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: None,
            state: ConnectionState::Disconnected,
        }
    }

    /// Endpoint this client connects to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Drop the transport after a failure.
    fn reset(&mut self) {
        self.stream = None;
        self.state = ConnectionState::Disconnected;
    }
}

#[async_trait]
impl FeedConnection for WsFeedConnection {
    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn connect(&mut self) -> Result<(), FeedError> {
        if self.state == ConnectionState::Closed {
            return Err(FeedError::Closed);
        }

        // A previous cycle may have left a half-open transport behind.
        self.stream = None;
        self.state = ConnectionState::Connecting;

        info!(url = %self.url, "Connecting to WebSocket");

        match connect_async(self.url.as_str()).await {
            Ok((stream, _response)) => {
                self.stream = Some(stream);
                info!(url = %self.url, "Connected to WebSocket");
                Ok(())
            }
            Err(e) => {
                self.reset();
                Err(FeedError::ConnectionFailed(e.to_string()))
            }
        }
    }

    async fn subscribe(&mut self, pairs: &[String]) -> Result<(), FeedError> {
        let stream = self.stream.as_mut().ok_or(FeedError::NotConnected)?;

        let request = SubscribeRequest::full_orderbook(pairs);
        let msg_json = request
            .to_json()
            .map_err(|e| FeedError::SendFailed(e.to_string()))?;

        if let Err(e) = stream.send(Message::Text(msg_json)).await {
            self.reset();
            return Err(FeedError::SendFailed(e.to_string()));
        }

        self.state = ConnectionState::Subscribed;
        info!(pairs = ?pairs, "Subscribed to full order book updates");
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<String>, FeedError> {
        loop {
            let stream = self.stream.as_mut().ok_or(FeedError::NotConnected)?;

            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.state = ConnectionState::Receiving;
                    metrics::inc_ws_messages_received();
                    return Ok(Some(text));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        self.state = ConnectionState::Receiving;
                        metrics::inc_ws_messages_received();
                        return Ok(Some(text));
                    }
                    Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(_))) => debug!("Received ping"),
                Some(Ok(Message::Pong(_))) => debug!("Received pong"),
                Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    self.reset();
                    return close_outcome(frame);
                }
                Some(Err(WsError::ConnectionClosed)) | None => {
                    info!("WebSocket stream ended");
                    self.reset();
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.reset();
                    return Err(FeedError::Tungstenite(e));
                }
            }
        }
    }

    async fn close(&mut self) {
        self.state = ConnectionState::Closed;

        let Some(mut stream) = self.stream.take() else {
            return;
        };

        match stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                debug!(url = %self.url, "WebSocket closed");
            }
            Err(e) => warn!(error = %e, url = %self.url, "WebSocket close failed"),
        }
    }
}

/// Map a close frame to end-of-stream (normal/going-away) or an error.
fn close_outcome(frame: Option<CloseFrame<'static>>) -> Result<Option<String>, FeedError> {
    match frame {
        None => {
            info!("WebSocket closed by peer");
            Ok(None)
        }
        Some(frame) if matches!(frame.code, CloseCode::Normal | CloseCode::Away) => {
            info!(code = u16::from(frame.code), reason = %frame.reason, "WebSocket closed by peer");
            Ok(None)
        }
        Some(frame) => {
            warn!(code = u16::from(frame.code), reason = %frame.reason, "WebSocket closed abnormally");
            Err(FeedError::ConnectionClosed {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.into_owned(),
            })
        }
    }
}
