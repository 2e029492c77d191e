// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire envelope shared by both directions of the notification socket.
//!
//! Every frame is a JSON text frame `{"type": "...", "payload": ...}`. The
//! dispatcher treats all types uniformly; only the connection manager looks
//! at the authentication types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;

/// Reserved inbound event types.
pub mod types {
    pub const AUTH_SUCCESS: &str = "auth_success";
    pub const AUTH_ERROR: &str = "auth_error";
    pub const ERROR: &str = "error";
    pub const NEW_MESSAGE: &str = "new_message";
    pub const NEW_GROUP_MESSAGE: &str = "new_group_message";
    pub const NOTIFICATION: &str = "notification";
    pub const APPLICATION_STATUS_UPDATE: &str = "application_status_update";
}

/// Phrase the server puts in error messages for unauthenticated sockets.
const NOT_AUTHENTICATED: &str = "not authenticated";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self { event_type: event_type.into(), payload }
    }

    /// Decode one inbound text frame.
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        let envelope: Self =
            serde_json::from_str(frame).map_err(|e| DecodeError(e.to_string()))?;
        if envelope.event_type.is_empty() {
            return Err(DecodeError("empty event type".to_owned()));
        }
        Ok(envelope)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Human-readable message carried by error envelopes, if any.
    pub fn message(&self) -> Option<&str> {
        self.payload.get("message").and_then(Value::as_str)
    }

    /// Whether this envelope tells us the socket is not (or no longer) authenticated.
    pub fn is_auth_failure(&self) -> bool {
        match self.event_type.as_str() {
            types::AUTH_ERROR => true,
            types::ERROR => self
                .message()
                .is_some_and(|m| m.to_lowercase().contains(NOT_AUTHENTICATED)),
            _ => false,
        }
    }
}
