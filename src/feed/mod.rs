//! Exchange feed connection.
//!
//! This module handles:
//! - Inbound/outbound wire types for the VALR trade socket
//! - The [`FeedConnection`] lifecycle trait used by the collector
//! - A tokio-tungstenite implementation and a scripted mock

use async_trait::async_trait;
use strum::Display;

use crate::error::FeedError;

pub mod messages;
pub mod mock;
pub mod websocket;

pub use messages::{InboundMessage, MessageType, RawBook, RawLevel, RawOrder, SubscribeRequest};
pub use mock::{MockEvent, MockFeed, MockLog};
pub use websocket::WsFeedConnection;

/// Feed connection state.
///
/// `Disconnected -> Connecting -> Subscribed -> Receiving`; a failure while
/// connecting or receiving returns to `Disconnected`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    /// No transport open.
    Disconnected,
    /// Transport being opened (or open, not yet subscribed).
    Connecting,
    /// Subscription request sent.
    Subscribed,
    /// At least one message received on this connection.
    Receiving,
    /// Closed by its owner.
    Closed,
}

/// One exchange WebSocket session, reusable across reconnects until closed.
#[async_trait]
pub trait FeedConnection: Send {
    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Open the transport.
    async fn connect(&mut self) -> Result<(), FeedError>;

    /// Send one subscription request for the given display-format pairs.
    ///
    /// Does not wait for the acknowledgment; it arrives as a regular message.
    async fn subscribe(&mut self, pairs: &[String]) -> Result<(), FeedError>;

    /// Next text message.
    ///
    /// `Ok(None)` when the peer closed the connection gracefully; an error on
    /// abnormal close or read failure.
    async fn next_message(&mut self) -> Result<Option<String>, FeedError>;

    /// Close the transport and enter [`ConnectionState::Closed`].
    ///
    /// Best-effort and idempotent: close failures are logged, never returned.
    async fn close(&mut self);
}
