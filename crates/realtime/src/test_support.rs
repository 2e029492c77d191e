// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: mock transport and recording sinks.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheInvalidator, CacheKey};
use crate::credential::Credential;
use crate::error::TransportError;
use crate::transport::{Connector, Transport, TransportEvent};
use crate::unread::SeenReporter;

/// Server side of one mock transport.
pub struct MockPeer {
    /// Token of the credential the connection was opened with.
    pub token: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<String>,
    close: CancellationToken,
}

impl MockPeer {
    /// Push one inbound text frame to the client.
    pub fn send_frame(&self, frame: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Frame(frame.into()));
    }

    /// Close from the server side.
    pub fn close(&self, reason: Option<&str>) {
        let _ = self.events.send(TransportEvent::Closed { reason: reason.map(str::to_owned) });
    }

    pub fn fail(&self, err: &str) {
        let _ = self.events.send(TransportEvent::Error(err.to_owned()));
    }

    /// Next frame the client sent.
    pub async fn recv(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Whether the client released this transport.
    pub fn is_released(&self) -> bool {
        self.close.is_cancelled()
    }

    pub async fn released(&self) {
        self.close.cancelled().await;
    }
}

/// [`Connector`] that hands the server side of every opened transport to the test.
pub struct MockConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
    attempts: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<String>>,
    delay: Duration,
}

impl MockConnector {
    /// Connector plus the stream of server-side peers it opens.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        Self::channel_with_delay(Duration::ZERO)
    }

    /// Every handshake takes `delay` before it resolves.
    pub fn channel_with_delay(delay: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            peers,
            attempts: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            delay,
        });
        (connector, rx)
    }

    /// Make the next handshake fail with `err`.
    pub fn fail_next(&self, err: impl Into<String>) {
        self.failures.lock().push_back(err.into());
    }

    /// Tokens of every handshake attempted so far.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().clone()
    }
}

impl Connector for MockConnector {
    fn connect(&self, credential: &Credential) -> BoxFuture<'static, Result<Transport, TransportError>> {
        let token = credential.token().to_owned();
        self.attempts.lock().push(token.clone());
        let failure = self.failures.lock().pop_front();
        let peers = self.peers.clone();
        let delay = self.delay;

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = failure {
                return Err(TransportError::Connect(err));
            }
            let (outbound, peer_outbound) = mpsc::unbounded_channel();
            let (events, inbound) = mpsc::unbounded_channel();
            let close = CancellationToken::new();
            let _ = peers.send(MockPeer { token, events, outbound: peer_outbound, close: close.clone() });
            Ok(Transport { outbound, inbound, close })
        })
    }
}

/// Records every invalidated key with the (Tokio) instant it fired.
#[derive(Default)]
pub struct RecordingInvalidator {
    calls: Mutex<Vec<(CacheKey, tokio::time::Instant)>>,
}

impl RecordingInvalidator {
    pub fn calls(&self) -> Vec<(CacheKey, tokio::time::Instant)> {
        self.calls.lock().clone()
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.calls.lock().iter().map(|(k, _)| k.clone()).collect()
    }
}

impl CacheInvalidator for RecordingInvalidator {
    fn invalidate(&self, key: &CacheKey) {
        self.calls.lock().push((key.clone(), tokio::time::Instant::now()));
    }
}

/// Records seen reports; can be told to fail for specific message ids.
#[derive(Default)]
pub struct RecordingSeenReporter {
    reported: Mutex<Vec<(String, String)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingSeenReporter {
    pub fn reported(&self) -> Vec<(String, String)> {
        self.reported.lock().clone()
    }

    pub fn fail_for(&self, message_id: &str) {
        self.failing.lock().insert(message_id.to_owned());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }
}

impl SeenReporter for RecordingSeenReporter {
    fn mark_seen(&self, conversation_id: &str, message_id: &str) -> anyhow::Result<()> {
        if self.failing.lock().contains(message_id) {
            anyhow::bail!("mark seen rejected for {message_id}");
        }
        self.reported.lock().push((conversation_id.to_owned(), message_id.to_owned()));
        Ok(())
    }
}
