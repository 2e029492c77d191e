// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Configuration for the realtime core.
///
/// Hosts embed this in their own CLI via `#[command(flatten)]`; every field
/// also falls back to an environment variable.
#[derive(Debug, Clone, clap::Args)]
pub struct RealtimeConfig {
    /// Notification WebSocket endpoint.
    #[arg(long, default_value = "ws://127.0.0.1:8000/ws/notifications/", env = "MENTOR_WS_URL")]
    pub ws_url: String,

    /// Delay before reconnecting after a close that followed a credential rotation.
    #[arg(long, default_value_t = 1000, env = "MENTOR_RECONNECT_BACKOFF_MS")]
    pub reconnect_backoff_ms: u64,

    /// Quiet period before a debounced cache invalidation fires.
    #[arg(long, default_value_t = 300, env = "MENTOR_DEBOUNCE_MS")]
    pub debounce_ms: u64,

    /// Storage key whose cross-tab change events carry the auth credential.
    #[arg(long, default_value = "access_token", env = "MENTOR_CREDENTIAL_KEY")]
    pub credential_key: String,

    /// JSON file for group last-visit markers. In-memory when unset.
    #[arg(long, env = "MENTOR_MARKER_STORE")]
    pub marker_store: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, default_value = "text", env = "MENTOR_LOG_FORMAT")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "MENTOR_LOG_LEVEL")]
    pub log_level: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8000/ws/notifications/".to_owned(),
            reconnect_backoff_ms: 1000,
            debounce_ms: 300,
            credential_key: "access_token".to_owned(),
            marker_store: None,
            log_format: "text".to_owned(),
            log_level: "info".to_owned(),
        }
    }
}

impl RealtimeConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Reject settings that would make the core misbehave silently.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ws_url.is_empty() {
            return Err(ConfigError("ws_url must not be empty".to_owned()));
        }
        if !self.ws_url.starts_with("ws://") && !self.ws_url.starts_with("wss://") {
            return Err(ConfigError(format!("ws_url must be ws:// or wss://, got {}", self.ws_url)));
        }
        if self.reconnect_backoff_ms == 0 {
            return Err(ConfigError("reconnect_backoff_ms must be positive".to_owned()));
        }
        if self.debounce_ms == 0 {
            return Err(ConfigError("debounce_ms must be positive".to_owned()));
        }
        if self.credential_key.is_empty() {
            return Err(ConfigError("credential_key must not be empty".to_owned()));
        }
        match self.log_format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(ConfigError(format!("unknown log format: {other}"))),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
