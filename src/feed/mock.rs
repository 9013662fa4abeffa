//! Scripted feed connection for unit and integration testing.
//!
//! This module provides a mock transport that replays scripted messages
//! without opening a socket. Once a session's script is exhausted the mock
//! idles like a quiet exchange, so the collector's deadline or stop request
//! ends the run.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use super::{ConnectionState, FeedConnection};
use crate::error::FeedError;

/// One scripted step within a connected session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// Deliver a text frame.
    Message(String),
    /// Peer closes gracefully.
    Close,
    /// Connection drops abnormally with the given reason.
    Fail(String),
}

/// Calls observed by the mock, shared with the test.
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    /// Instant of every connect attempt, successful or not.
    pub connect_attempts: Vec<Instant>,
    /// Pairs passed to each subscribe call.
    pub subscriptions: Vec<Vec<String>>,
    /// Number of `close()` calls.
    pub close_calls: usize,
}

/// Mock feed connection for testing.
#[derive(Debug)]
pub struct MockFeed {
    /// Connect attempts that fail before any succeeds.
    connect_failures: usize,
    /// Event scripts, one per successful connect.
    sessions: VecDeque<Vec<MockEvent>>,
    /// Remaining events of the active session.
    current: Option<VecDeque<MockEvent>>,
    /// Lifecycle state.
    state: ConnectionState,
    /// Shared call log.
    log: Arc<Mutex<MockLog>>,
}

impl MockFeed {
    /// Create a mock whose connects all succeed with empty sessions.
    pub fn new() -> Self {
        Self {
            connect_failures: 0,
            sessions: VecDeque::new(),
            current: None,
            state: ConnectionState::Disconnected,
            log: Arc::new(Mutex::new(MockLog::default())),
        }
    }

    /// Fail the first `n` connect attempts.
    pub fn with_connect_failures(mut self, n: usize) -> Self {
        self.connect_failures = n;
        self
    }

    /// Append a session script used by the next successful connect.
    pub fn with_session(mut self, events: Vec<MockEvent>) -> Self {
        self.sessions.push_back(events);
        self
    }

    /// Append a session delivering the given text messages, then idling.
    pub fn with_messages<I, S>(self, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let events = messages
            .into_iter()
            .map(|m| MockEvent::Message(m.into()))
            .collect();
        self.with_session(events)
    }

    /// Handle to the shared call log.
    pub fn log(&self) -> Arc<Mutex<MockLog>> {
        Arc::clone(&self.log)
    }
}

impl Default for MockFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedConnection for MockFeed {
    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn connect(&mut self) -> Result<(), FeedError> {
        self.log.lock().unwrap().connect_attempts.push(Instant::now());

        if self.state == ConnectionState::Closed {
            return Err(FeedError::Closed);
        }

        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            self.state = ConnectionState::Disconnected;
            return Err(FeedError::ConnectionFailed(
                "scripted connect failure".to_string(),
            ));
        }

        self.current = Some(self.sessions.pop_front().unwrap_or_default().into());
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    async fn subscribe(&mut self, pairs: &[String]) -> Result<(), FeedError> {
        if self.current.is_none() {
            return Err(FeedError::NotConnected);
        }
        self.log.lock().unwrap().subscriptions.push(pairs.to_vec());
        self.state = ConnectionState::Subscribed;
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<String>, FeedError> {
        let events = self.current.as_mut().ok_or(FeedError::NotConnected)?;

        match events.pop_front() {
            Some(MockEvent::Message(text)) => {
                self.state = ConnectionState::Receiving;
                Ok(Some(text))
            }
            Some(MockEvent::Close) => {
                self.current = None;
                self.state = ConnectionState::Disconnected;
                Ok(None)
            }
            Some(MockEvent::Fail(reason)) => {
                self.current = None;
                self.state = ConnectionState::Disconnected;
                Err(FeedError::ConnectionClosed {
                    code: Some(1006),
                    reason,
                })
            }
            None => futures::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.log.lock().unwrap().close_calls += 1;
        self.current = None;
        self.state = ConnectionState::Closed;
    }
}
