// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the realtime core.
//!
//! Expected failures are values, never panics. Each error exposes a stable
//! machine-readable code via `as_str()` for logs and host-side mapping.

use std::fmt;

/// Why `connect()` did not produce an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// No credential, or the current one is expired. Not fatal.
    NoCredential,
    /// The transport failed to open.
    Transport(String),
    /// `disconnect()` abandoned the attempt before it finished.
    Cancelled,
    /// The manager has been shut down.
    Shutdown,
}

impl ConnectError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoCredential => "NO_CREDENTIAL",
            Self::Transport(_) => "TRANSPORT",
            Self::Cancelled => "CANCELLED",
            Self::Shutdown => "SHUTDOWN",
        }
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredential => f.write_str("no usable credential"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Cancelled => f.write_str("connect attempt cancelled"),
            Self::Shutdown => f.write_str("connection manager shut down"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Why `send()` was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    NotConnected,
    Encode(String),
}

impl SendError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::Encode(_) => "ENCODE",
        }
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => f.write_str("not connected"),
            Self::Encode(msg) => write!(f, "failed to encode envelope: {msg}"),
        }
    }
}

impl std::error::Error for SendError {}

/// Failure reported by a [`Connector`](crate::transport::Connector).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Connect(String),
    Closed,
}

impl TransportError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect(_) => "CONNECT_FAILED",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(msg) => write!(f, "connect failed: {msg}"),
            Self::Closed => f.write_str("transport closed"),
        }
    }
}

impl std::error::Error for TransportError {}

/// An inbound frame that is not a valid envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError(pub String);

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed frame: {}", self.0)
    }
}

impl std::error::Error for DecodeError {}

/// Persistence failure in a marker store.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl StoreError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Io(_) => "STORE_IO",
            Self::Json(_) => "STORE_JSON",
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "marker store io: {e}"),
            Self::Json(e) => write!(f, "marker store json: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Invalid configuration. The only class of error treated as a programming fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
