// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Duplex text-frame transport seam between the connection manager and the wire.

pub mod ws;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::credential::Credential;
use crate::error::TransportError;

pub use ws::WsConnector;

/// Something the transport observed after opening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound text frame.
    Frame(String),
    /// The peer closed the connection.
    Closed { reason: Option<String> },
    /// The connection failed.
    Error(String),
}

/// An open connection.
///
/// Frames written to `outbound` are sent in order. `inbound` yields frames
/// in receipt order and ends after a `Closed` or `Error`. Cancelling `close`
/// (or dropping the transport) releases the underlying socket.
pub struct Transport {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
    pub close: CancellationToken,
}

impl Transport {
    pub fn shutdown(&self) {
        self.close.cancel();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close.cancel();
    }
}

/// Opens transports. Every call performs a fresh handshake for the given credential.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, credential: &Credential) -> BoxFuture<'static, Result<Transport, TransportError>>;
}
