// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection lifecycle manager.
//!
//! One actor task owns the transport. Commands, inbound transport events,
//! the pending connect attempt, and the reconnect backoff are multiplexed
//! through a single `select!` loop, so the state machine never races with
//! itself. A small shared snapshot (state, last error, outbound sender) lets
//! `send()` stay synchronous.
//!
//! Reconnection is only automatic when the credential rotated since the
//! connection (or attempt) that closed was opened. A close with an unchanged
//! credential leaves the manager `Disconnected`.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

use crate::credential::{Credential, CredentialChange, StorageEvent, TokenSource};
use crate::dispatch::EventDispatcher;
use crate::envelope::EventEnvelope;
use crate::error::{ConnectError, SendError, TransportError};
use crate::transport::{Connector, Transport, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted on every state change. `seq` increases by one per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    pub prev: ConnectionState,
    pub next: ConnectionState,
    pub seq: u64,
}

struct Shared {
    state: ConnectionState,
    last_error: Option<String>,
    /// Present only while `Connected`.
    outbound: Option<mpsc::UnboundedSender<String>>,
    /// Credential used for the most recent connection or attempt.
    credential: Option<Credential>,
    /// Credential active at the last successful connect.
    connected_with: Option<Credential>,
    seq: u64,
}

enum Command {
    Connect { reply: Option<oneshot::Sender<Result<(), ConnectError>>> },
    Disconnect { reason: String },
    CredentialChanged(CredentialChange),
}

/// Handle to the single logical connection.
pub struct ConnectionManager {
    shared: Arc<Mutex<Shared>>,
    commands: mpsc::UnboundedSender<Command>,
    transitions: broadcast::Sender<StateTransition>,
    tokens: Arc<dyn TokenSource>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Spawn the connection actor. Must be called inside a Tokio runtime.
    pub fn start(
        reconnect_backoff: Duration,
        tokens: Arc<dyn TokenSource>,
        connector: Arc<dyn Connector>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Arc<Self> {
        let shared = Arc::new(Mutex::new(Shared {
            state: ConnectionState::Disconnected,
            last_error: None,
            outbound: None,
            credential: None,
            connected_with: None,
            seq: 0,
        }));
        let (transitions, _) = broadcast::channel(64);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let actor = Actor {
            shared: Arc::clone(&shared),
            transitions: transitions.clone(),
            tokens: Arc::clone(&tokens),
            connector,
            dispatcher,
            backoff: reconnect_backoff,
            transport: None,
            attempt: None,
            backoff_timer: None,
            waiters: Vec::new(),
        };
        let task = tokio::spawn(actor.run(command_rx, cancel.clone()));

        Arc::new(Self {
            shared,
            commands,
            transitions,
            tokens,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Open the connection with the current credential.
    ///
    /// A no-op when already connected with that credential; joins an attempt
    /// already in flight for it. Returns `NoCredential` without attempting
    /// anything when no unexpired credential is available.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect { reply: Some(reply) })
            .map_err(|_| ConnectError::Shutdown)?;
        rx.await.unwrap_or(Err(ConnectError::Shutdown))
    }

    /// Send one envelope. Never waits.
    ///
    /// When not connected, returns `NotConnected` and requests a reconnect if
    /// the credential rotated since the last successful connect.
    pub fn send(&self, event_type: &str, payload: Value) -> Result<(), SendError> {
        let frame = EventEnvelope::new(event_type, payload)
            .encode()
            .map_err(|e| SendError::Encode(e.to_string()))?;

        let (outbound, stored) = {
            let shared = self.shared.lock();
            let outbound = match shared.state {
                ConnectionState::Connected => shared.outbound.clone(),
                _ => None,
            };
            (outbound, shared.connected_with.clone())
        };

        if let Some(tx) = outbound {
            if tx.send(frame).is_ok() {
                return Ok(());
            }
        }

        if let Some(current) = self.tokens.current() {
            let rotated = stored.as_ref().map(Credential::token) != Some(current.token());
            if rotated && !current.is_expired() {
                tracing::debug!(event_type, "send while disconnected with a new credential, reconnecting");
                let _ = self.commands.send(Command::Connect { reply: None });
            }
        }
        Err(SendError::NotConnected)
    }

    /// Close intentionally. Suppresses automatic reconnection.
    pub fn disconnect(&self, reason: impl Into<String>) {
        let _ = self.commands.send(Command::Disconnect { reason: reason.into() });
    }

    /// Feed a cross-tab credential change into the state machine.
    pub fn credential_changed(&self, change: CredentialChange) {
        let _ = self.commands.send(Command::CredentialChanged(change));
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    /// Stop the actor and release the transport. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Forward credential changes (e.g. from [`SharedTokenSource::subscribe`]) to the manager.
///
/// [`SharedTokenSource::subscribe`]: crate::credential::SharedTokenSource::subscribe
pub fn spawn_credential_watcher(
    manager: Arc<ConnectionManager>,
    changes: broadcast::Receiver<CredentialChange>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    spawn_watcher(manager, changes, cancel, Some)
}

/// Translate raw storage events for `credential_key` and forward them to the manager.
/// Events for other keys are ignored.
pub fn spawn_storage_watcher(
    manager: Arc<ConnectionManager>,
    events: broadcast::Receiver<StorageEvent>,
    credential_key: String,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    spawn_watcher(manager, events, cancel, move |event: StorageEvent| {
        event.credential_change(&credential_key)
    })
}

fn spawn_watcher<T, F>(
    manager: Arc<ConnectionManager>,
    mut events: broadcast::Receiver<T>,
    cancel: CancellationToken,
    translate: F,
) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
    F: Fn(T) -> Option<CredentialChange> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => {
                    if let Some(change) = translate(event) {
                        tracing::debug!(?change, "credential changed");
                        manager.credential_changed(change);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "credential watcher lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

struct Attempt {
    credential: Credential,
    future: BoxFuture<'static, Result<Transport, TransportError>>,
}

struct Actor {
    shared: Arc<Mutex<Shared>>,
    transitions: broadcast::Sender<StateTransition>,
    tokens: Arc<dyn TokenSource>,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<EventDispatcher>,
    backoff: Duration,
    transport: Option<Transport>,
    attempt: Option<Attempt>,
    backoff_timer: Option<Pin<Box<Sleep>>>,
    waiters: Vec<oneshot::Sender<Result<(), ConnectError>>>,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                result = next_attempt(&mut self.attempt) => self.on_attempt_finished(result),
                event = next_event(&mut self.transport) => self.on_transport_event(event),
                () = backoff_elapsed(&mut self.backoff_timer) => self.on_backoff_elapsed(),
            }
        }
        self.teardown();
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { reply } => self.connect(reply),
            Command::Disconnect { reason } => self.disconnect(&reason),
            Command::CredentialChanged(CredentialChange::Cleared) => {
                self.disconnect("credential cleared");
            }
            Command::CredentialChanged(CredentialChange::Rotated) => self.connect(None),
        }
    }

    fn connect(&mut self, reply: Option<oneshot::Sender<Result<(), ConnectError>>>) {
        let Some(credential) = self.tokens.current().filter(|c| !c.is_expired()) else {
            tracing::debug!("connect skipped: no usable credential");
            if self.transport.is_none() && self.attempt.is_none() {
                self.backoff_timer = None;
                self.set_state(ConnectionState::Disconnected);
            }
            if let Some(reply) = reply {
                let _ = reply.send(Err(ConnectError::NoCredential));
            }
            return;
        };

        let same = self.shared.lock().credential.as_ref().map(Credential::token)
            == Some(credential.token());
        if same && self.transport.is_some() {
            if let Some(reply) = reply {
                let _ = reply.send(Ok(()));
            }
            return;
        }
        if let Some(reply) = reply {
            self.waiters.push(reply);
        }
        if same && self.attempt.is_some() {
            return;
        }

        if let Some(old) = self.transport.take() {
            tracing::info!("credential rotated, replacing open connection");
            old.shutdown();
            self.shared.lock().outbound = None;
            self.dispatcher.set_ready(false);
        }
        self.backoff_timer = None;
        self.start_attempt(credential);
    }

    fn start_attempt(&mut self, credential: Credential) {
        self.shared.lock().credential = Some(credential.clone());
        self.set_state(ConnectionState::Connecting);
        let future = self.connector.connect(&credential);
        self.attempt = Some(Attempt { credential, future });
    }

    fn on_attempt_finished(&mut self, result: Result<Transport, TransportError>) {
        let Some(attempt) = self.attempt.take() else {
            return;
        };
        match result {
            Ok(transport) => {
                {
                    let mut shared = self.shared.lock();
                    shared.outbound = Some(transport.outbound.clone());
                    shared.connected_with = Some(attempt.credential.clone());
                    shared.last_error = None;
                }
                self.transport = Some(transport);
                self.dispatcher.set_ready(true);
                self.set_state(ConnectionState::Connected);
                tracing::info!("realtime connection open");
                self.resolve_waiters(Ok(()));
            }
            Err(e) => {
                tracing::warn!(err = %e, "connect attempt failed");
                self.shared.lock().last_error = Some(e.to_string());
                self.resolve_waiters(Err(ConnectError::Transport(e.to_string())));
                self.after_close(&attempt.credential);
            }
        }
    }

    fn on_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Frame(text)) => self.on_frame(&text),
            Some(TransportEvent::Closed { reason }) => {
                tracing::info!(reason = reason.as_deref().unwrap_or(""), "realtime connection closed");
                self.on_closed();
            }
            Some(TransportEvent::Error(e)) => {
                tracing::warn!(err = %e, "realtime connection error");
                self.shared.lock().last_error = Some(e);
                self.on_closed();
            }
            None => self.on_closed(),
        }
    }

    fn on_frame(&mut self, text: &str) {
        let envelope = match EventEnvelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.dispatcher.reject_frame(&e, text.len());
                return;
            }
        };
        if envelope.is_auth_failure() {
            self.on_auth_failure(&envelope);
        }
        self.dispatcher.dispatch(&envelope);
    }

    fn on_auth_failure(&mut self, envelope: &EventEnvelope) {
        let message = envelope.message().unwrap_or(envelope.event_type.as_str()).to_owned();
        tracing::warn!(message = %message, "server rejected credential");
        self.shared.lock().last_error = Some(message);

        let expired = self.tokens.current().is_some_and(|c| c.is_expired());
        if expired && self.tokens.can_refresh() {
            tracing::debug!("requesting credential refresh");
            self.tokens.request_refresh();
        }
    }

    fn on_closed(&mut self) {
        self.transport = None;
        self.dispatcher.set_ready(false);
        let opened_with = {
            let mut shared = self.shared.lock();
            shared.outbound = None;
            shared.credential.clone()
        };
        match opened_with {
            Some(credential) => self.after_close(&credential),
            None => self.set_state(ConnectionState::Disconnected),
        }
    }

    /// Decide what follows an unintentional close of a connection opened with `opened_with`.
    fn after_close(&mut self, opened_with: &Credential) {
        let rotated = self
            .tokens
            .current()
            .is_some_and(|c| !c.is_expired() && c.token() != opened_with.token());
        if rotated {
            tracing::info!(backoff_ms = self.backoff.as_millis() as u64, "credential rotated, reconnecting");
            self.set_state(ConnectionState::Reconnecting);
            self.backoff_timer = Some(Box::pin(tokio::time::sleep(self.backoff)));
        } else {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn on_backoff_elapsed(&mut self) {
        self.backoff_timer = None;
        self.connect(None);
    }

    fn disconnect(&mut self, reason: &str) {
        self.backoff_timer = None;
        if self.attempt.take().is_some() {
            self.resolve_waiters(Err(ConnectError::Cancelled));
        }
        if let Some(transport) = self.transport.take() {
            transport.shutdown();
        }
        self.shared.lock().outbound = None;
        self.dispatcher.set_ready(false);
        if self.state() != ConnectionState::Disconnected {
            tracing::info!(reason, "realtime connection closed by client");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn teardown(&mut self) {
        self.backoff_timer = None;
        self.attempt = None;
        if let Some(transport) = self.transport.take() {
            transport.shutdown();
        }
        self.resolve_waiters(Err(ConnectError::Shutdown));
        self.shared.lock().outbound = None;
        self.dispatcher.set_ready(false);
        self.set_state(ConnectionState::Disconnected);
        tracing::debug!("connection manager stopped");
    }

    fn resolve_waiters(&mut self, result: Result<(), ConnectError>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    fn set_state(&self, next: ConnectionState) {
        let transition = {
            let mut shared = self.shared.lock();
            if shared.state == next {
                return;
            }
            shared.seq += 1;
            let transition = StateTransition { prev: shared.state, next, seq: shared.seq };
            shared.state = next;
            transition
        };
        tracing::debug!(prev = %transition.prev, state = %next, seq = transition.seq, "connection state");
        let _ = self.transitions.send(transition);
    }
}

async fn next_attempt(attempt: &mut Option<Attempt>) -> Result<Transport, TransportError> {
    match attempt {
        Some(attempt) => (&mut attempt.future).await,
        None => pending().await,
    }
}

async fn next_event(transport: &mut Option<Transport>) -> Option<TransportEvent> {
    match transport {
        Some(transport) => transport.inbound.recv().await,
        None => pending().await,
    }
}

async fn backoff_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
