// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auth credential seam.
//!
//! The credential itself is owned by the host's auth layer. The core reads it
//! through [`TokenSource`], asks for refreshes, and reacts to cross-tab
//! storage notifications translated into [`CredentialChange`]s.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

/// Opaque auth token with an optional expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// A credential with no known expiry.
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into(), expires_at: None }
    }

    pub fn with_expiry(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self { token: token.into(), expires_at: Some(expires_at) }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Read-only view of the host's auth layer.
pub trait TokenSource: Send + Sync {
    /// The currently stored credential, expired or not.
    fn current(&self) -> Option<Credential>;

    /// Whether a refresh may be attempted now. Rate limiting lives here.
    fn can_refresh(&self) -> bool;

    /// Ask the auth layer to refresh. Completion arrives as a credential change.
    fn request_refresh(&self);
}

/// Cross-tab notification about the stored credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialChange {
    /// The credential was removed (logout in another tab).
    Cleared,
    /// A credential was inserted or replaced (login or refresh elsewhere).
    Rotated,
}

impl CredentialChange {
    /// Translate a storage change event into a credential change.
    ///
    /// `key == None` models a full storage clear. Events for other keys
    /// return `None`.
    pub fn from_storage_event(
        credential_key: &str,
        key: Option<&str>,
        new_value: Option<&str>,
    ) -> Option<Self> {
        match key {
            None => Some(Self::Cleared),
            Some(k) if k != credential_key => None,
            Some(_) => match new_value {
                Some(v) if !v.is_empty() => Some(Self::Rotated),
                _ => Some(Self::Cleared),
            },
        }
    }
}

/// Raw cross-tab storage change as the host observes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// `None` when the whole storage area was cleared.
    pub key: Option<String>,
    pub new_value: Option<String>,
}

impl StorageEvent {
    pub fn new(key: Option<&str>, new_value: Option<&str>) -> Self {
        Self { key: key.map(str::to_owned), new_value: new_value.map(str::to_owned) }
    }

    /// The credential change this event means for `credential_key`, if any.
    pub fn credential_change(&self, credential_key: &str) -> Option<CredentialChange> {
        CredentialChange::from_storage_event(credential_key, self.key.as_deref(), self.new_value.as_deref())
    }
}

/// Minimum spacing between refresh requests from [`SharedTokenSource`].
const DEFAULT_REFRESH_COOLDOWN: Duration = Duration::from_secs(30);

/// In-process [`TokenSource`] for hosts that keep the credential in memory.
///
/// Setting or clearing the credential publishes a [`CredentialChange`] to
/// subscribers, which plays the role of the cross-tab notification.
pub struct SharedTokenSource {
    credential: Mutex<Option<Credential>>,
    last_refresh: Mutex<Option<Instant>>,
    refresh_cooldown: Duration,
    refresh_requests: AtomicU32,
    on_refresh: Option<Box<dyn Fn() + Send + Sync>>,
    change_tx: broadcast::Sender<CredentialChange>,
}

impl SharedTokenSource {
    pub fn new(initial: Option<Credential>) -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            credential: Mutex::new(initial),
            last_refresh: Mutex::new(None),
            refresh_cooldown: DEFAULT_REFRESH_COOLDOWN,
            refresh_requests: AtomicU32::new(0),
            on_refresh: None,
            change_tx,
        }
    }

    pub fn with_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.refresh_cooldown = cooldown;
        self
    }

    /// Hook invoked on every accepted refresh request (e.g. spawn the HTTP refresh).
    pub fn with_refresh_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_refresh = Some(Box::new(hook));
        self
    }

    /// Replace the credential. Publishes `Rotated` when the token changed.
    pub fn set(&self, credential: Credential) {
        let changed = {
            let mut current = self.credential.lock();
            let changed = current.as_ref().map(Credential::token) != Some(credential.token());
            *current = Some(credential);
            changed
        };
        if changed {
            let _ = self.change_tx.send(CredentialChange::Rotated);
        }
    }

    /// Replace the credential without publishing a change (another tab did not see it).
    pub fn set_quietly(&self, credential: Credential) {
        *self.credential.lock() = Some(credential);
    }

    /// Remove the credential and publish `Cleared`.
    pub fn clear(&self) {
        let had = self.credential.lock().take().is_some();
        if had {
            let _ = self.change_tx.send(CredentialChange::Cleared);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CredentialChange> {
        self.change_tx.subscribe()
    }

    /// Number of refresh requests accepted so far.
    pub fn refresh_requests(&self) -> u32 {
        self.refresh_requests.load(Ordering::Relaxed)
    }
}

impl TokenSource for SharedTokenSource {
    fn current(&self) -> Option<Credential> {
        self.credential.lock().clone()
    }

    fn can_refresh(&self) -> bool {
        match *self.last_refresh.lock() {
            Some(at) => at.elapsed() >= self.refresh_cooldown,
            None => true,
        }
    }

    fn request_refresh(&self) {
        {
            let mut last = self.last_refresh.lock();
            if last.is_some_and(|at| at.elapsed() < self.refresh_cooldown) {
                debug!("refresh request suppressed by cooldown");
                return;
            }
            *last = Some(Instant::now());
        }
        self.refresh_requests.fetch_add(1, Ordering::Relaxed);
        if let Some(ref hook) = self.on_refresh {
            hook();
        }
    }
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
