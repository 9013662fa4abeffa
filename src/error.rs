//! Unified error types for the order book recorder.

use thiserror::Error;

/// Unified error type for the recorder.
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Invalid configuration (fatal, never retried).
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Environment configuration could not be loaded.
    #[error("environment error: {0}")]
    Env(#[from] envy::Error),

    /// Feed connection error.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// Snapshot store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Inbound message could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Depth must retain at least one level.
    #[error("invalid depth: {0} (must be at least 1)")]
    InvalidDepth(usize),

    /// Recording duration must be positive.
    #[error("invalid duration: recording duration must be greater than zero")]
    InvalidDuration,

    /// Trading pair symbol is empty.
    #[error("trading pair must not be empty")]
    EmptyTradingPair,

    /// No trading pairs configured.
    #[error("at least one trading pair is required")]
    NoTradingPairs,

    /// WebSocket URL is malformed or uses the wrong scheme.
    #[error("invalid websocket url {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Reconnect delay must be positive.
    #[error("reconnect delay must be greater than zero")]
    InvalidReconnectDelay,

    /// Progress interval must be positive.
    #[error("progress interval must be greater than zero")]
    InvalidProgressInterval,
}

/// Feed connection errors.
#[derive(Error, Debug)]
pub enum FeedError {
    /// Network, TLS or handshake failure.
    #[error("websocket connection failed: {0}")]
    ConnectionFailed(String),

    /// Peer closed the connection abnormally.
    #[error("websocket connection closed: code={code:?}, reason={reason}")]
    ConnectionClosed {
        /// Close code.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },

    /// Operation requires an open connection.
    #[error("websocket is not connected")]
    NotConnected,

    /// The connection was closed by its owner and cannot be reopened.
    #[error("feed connection has been closed")]
    Closed,

    /// Send failed.
    #[error("failed to send websocket message: {0}")]
    SendFailed(String),

    /// Tungstenite error while reading.
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Snapshot store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Ladder (de)serialization failed.
    #[error("ladder serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (directory creation, export file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored timestamp could not be parsed.
    #[error("invalid stored timestamp {0:?}")]
    InvalidTimestamp(String),

    /// Stored decimal column could not be parsed.
    #[error("invalid decimal in column {column}: {value:?}")]
    InvalidDecimal {
        /// Column name.
        column: &'static str,
        /// Raw stored value.
        value: String,
    },

    /// Time bound supplied by a caller could not be parsed.
    #[error("invalid time bound {0:?} (expected YYYY-MM-DD or RFC 3339)")]
    InvalidTimeBound(String),
}

/// Inbound message decode errors.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Message is not valid JSON.
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    /// Message is JSON but not an object.
    #[error("message is not a json object")]
    NotAnObject,
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, RecorderError>;
