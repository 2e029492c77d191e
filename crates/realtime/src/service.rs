// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The wired-up realtime core with an explicit init/shutdown lifecycle.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheInvalidator, MessageCache};
use crate::config::RealtimeConfig;
use crate::connection::{spawn_credential_watcher, spawn_storage_watcher, ConnectionManager};
use crate::credential::{CredentialChange, StorageEvent, TokenSource};
use crate::debounce::DebouncedInvalidator;
use crate::dispatch::{EventDispatcher, Subscription};
use crate::marker::{FileMarkerStore, MarkerStore, MemoryMarkerStore};
use crate::transport::{Connector, WsConnector};
use crate::unread::{SeenReporter, UnreadAggregator};

/// Host-provided services the core reads from and reports to.
pub struct Collaborators {
    /// Id of the signed-in user, used to decide what counts as unread.
    pub user_id: String,
    pub tokens: Arc<dyn TokenSource>,
    pub cache: Arc<dyn MessageCache>,
    pub seen: Arc<dyn SeenReporter>,
    pub invalidation_sink: Arc<dyn CacheInvalidator>,
    /// Defaults to a [`WsConnector`] for `config.ws_url`.
    pub connector: Option<Arc<dyn Connector>>,
    /// Defaults to `config.marker_store`, or memory when that is unset.
    pub markers: Option<Arc<dyn MarkerStore>>,
    /// Cross-tab credential notifications, if the host has them.
    pub credential_changes: Option<broadcast::Receiver<CredentialChange>>,
    /// Raw cross-tab storage events, translated with `config.credential_key`.
    pub storage_events: Option<broadcast::Receiver<StorageEvent>>,
}

/// One shared connection plus the components that consume it.
pub struct RealtimeCore {
    pub config: RealtimeConfig,
    pub dispatcher: Arc<EventDispatcher>,
    pub connection: Arc<ConnectionManager>,
    pub invalidator: Arc<DebouncedInvalidator>,
    pub unread: Arc<UnreadAggregator>,
    subscriptions: Vec<Subscription>,
    cancel: CancellationToken,
    watchers: Vec<JoinHandle<()>>,
}

impl RealtimeCore {
    /// Validate config and wire every component. Does not connect.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn init(config: RealtimeConfig, deps: Collaborators) -> anyhow::Result<Self> {
        config.validate()?;

        let markers: Arc<dyn MarkerStore> = match (deps.markers, &config.marker_store) {
            (Some(markers), _) => markers,
            (None, Some(path)) => Arc::new(
                FileMarkerStore::open(path)
                    .with_context(|| format!("opening marker store {}", path.display()))?,
            ),
            (None, None) => Arc::new(MemoryMarkerStore::new()),
        };
        let connector = deps
            .connector
            .unwrap_or_else(|| Arc::new(WsConnector::new(config.ws_url.clone())) as Arc<dyn Connector>);

        let dispatcher = EventDispatcher::new();
        let connection = ConnectionManager::start(
            config.reconnect_backoff(),
            deps.tokens,
            connector,
            Arc::clone(&dispatcher),
        );
        let invalidator = Arc::new(DebouncedInvalidator::new(
            Arc::clone(&dispatcher),
            deps.invalidation_sink,
            config.debounce_delay(),
        ));
        let unread = UnreadAggregator::new(deps.user_id, deps.cache, markers, deps.seen);
        let subscriptions = unread.attach(&dispatcher);

        let cancel = CancellationToken::new();
        let mut watchers = Vec::new();
        if let Some(changes) = deps.credential_changes {
            watchers.push(spawn_credential_watcher(Arc::clone(&connection), changes, cancel.child_token()));
        }
        if let Some(events) = deps.storage_events {
            watchers.push(spawn_storage_watcher(
                Arc::clone(&connection),
                events,
                config.credential_key.clone(),
                cancel.child_token(),
            ));
        }

        tracing::info!(ws_url = %config.ws_url, "realtime core initialized");
        Ok(Self { config, dispatcher, connection, invalidator, unread, subscriptions, cancel, watchers })
    }

    /// Close the connection and release every subscription the core holds.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for watcher in self.watchers.drain(..) {
            let _ = watcher.await;
        }
        self.connection.shutdown().await;
        self.subscriptions.clear();
        tracing::info!("realtime core shut down");
    }
}

impl Drop for RealtimeCore {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
