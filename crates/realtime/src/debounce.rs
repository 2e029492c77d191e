// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Debounced cache invalidation driven by inbound events.
//!
//! A registration subscribes to a set of event types and owns one timer.
//! Every matching event re-arms the timer; when it fires, each affected
//! cache key is invalidated once. Registrations are keyed by their sorted
//! type and key sets, so identical registrations share one timer.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheInvalidator, CacheKey};
use crate::dispatch::{EventDispatcher, Subscription};
use crate::envelope::EventEnvelope;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceOptions {
    pub delay: Duration,
    /// Disabled registrations subscribe to nothing.
    pub enabled: bool,
}

impl Default for DebounceOptions {
    fn default() -> Self {
        Self { delay: DEFAULT_DEBOUNCE, enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Identity {
    types: Vec<String>,
    keys: Vec<CacheKey>,
}

struct Registration {
    refs: usize,
    subscriptions: Vec<Subscription>,
    timer: Option<CancellationToken>,
    generation: u64,
    last_message: Option<EventEnvelope>,
    /// Cleared on dispose. Checked before every key is invalidated.
    live: Arc<AtomicBool>,
}

type Table = Mutex<HashMap<Identity, Registration>>;

/// Coalesces bursts of events into one invalidation batch per registration.
pub struct DebouncedInvalidator {
    dispatcher: Arc<EventDispatcher>,
    sink: Arc<dyn CacheInvalidator>,
    default_delay: Duration,
    table: Arc<Table>,
}

impl DebouncedInvalidator {
    pub fn new(
        dispatcher: Arc<EventDispatcher>,
        sink: Arc<dyn CacheInvalidator>,
        default_delay: Duration,
    ) -> Self {
        Self { dispatcher, sink, default_delay, table: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Options with this invalidator's configured delay.
    pub fn options(&self) -> DebounceOptions {
        DebounceOptions { delay: self.default_delay, enabled: true }
    }

    /// Invalidate `keys` after a quiet period following any event of `types`.
    ///
    /// Registering an identical type/key set again shares the existing
    /// registration (and its delay); it stays live until every handle is
    /// disposed.
    pub fn register<T, S, K>(&self, types: T, keys: K, options: DebounceOptions) -> InvalidationHandle
    where
        T: IntoIterator<Item = S>,
        S: Into<String>,
        K: IntoIterator<Item = CacheKey>,
    {
        if !options.enabled {
            return InvalidationHandle::inert();
        }
        let identity = Identity {
            types: types.into_iter().map(Into::into).collect::<BTreeSet<_>>().into_iter().collect(),
            keys: keys.into_iter().collect::<BTreeSet<_>>().into_iter().collect(),
        };

        let mut table = self.table.lock();
        if let Some(existing) = table.get_mut(&identity) {
            existing.refs += 1;
            return InvalidationHandle::new(&self.table, identity);
        }

        let subscriptions = identity
            .types
            .iter()
            .map(|event_type| {
                let on_event = self.listener(&identity, event_type, options.delay);
                self.dispatcher.on(event_type.clone(), on_event)
            })
            .collect();
        table.insert(
            identity.clone(),
            Registration {
                refs: 1,
                subscriptions,
                timer: None,
                generation: 0,
                last_message: None,
                live: Arc::new(AtomicBool::new(true)),
            },
        );
        drop(table);

        tracing::debug!(types = ?identity.types, keys = identity.keys.len(), "debounced invalidation registered");
        InvalidationHandle::new(&self.table, identity)
    }

    /// Number of distinct live registrations.
    pub fn registration_count(&self) -> usize {
        self.table.lock().len()
    }

    fn listener(
        &self,
        identity: &Identity,
        event_type: &str,
        delay: Duration,
    ) -> impl Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static {
        let table = Arc::downgrade(&self.table);
        let sink = Arc::clone(&self.sink);
        let identity = identity.clone();
        let event_type = event_type.to_owned();

        move |payload: &Value| {
            let Some(strong) = table.upgrade() else {
                return Ok(());
            };
            let (token, generation, live) = {
                let mut entries = strong.lock();
                let Some(reg) = entries.get_mut(&identity) else {
                    return Ok(());
                };
                reg.last_message = Some(EventEnvelope::new(event_type.clone(), payload.clone()));
                if let Some(previous) = reg.timer.take() {
                    previous.cancel();
                }
                let token = CancellationToken::new();
                reg.generation += 1;
                reg.timer = Some(token.clone());
                (token, reg.generation, Arc::clone(&reg.live))
            };

            let runtime = tokio::runtime::Handle::try_current()
                .map_err(|e| anyhow::anyhow!("debounce timer needs a tokio runtime: {e}"))?;
            runtime.spawn(fire_after(
                delay,
                token,
                generation,
                Weak::clone(&table),
                identity.clone(),
                live,
                Arc::clone(&sink),
            ));
            Ok(())
        }
    }
}

async fn fire_after(
    delay: Duration,
    token: CancellationToken,
    generation: u64,
    table: Weak<Table>,
    identity: Identity,
    live: Arc<AtomicBool>,
    sink: Arc<dyn CacheInvalidator>,
) {
    tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
    }

    let still_live = || live.load(Ordering::Acquire) && !token.is_cancelled();
    if !still_live() {
        return;
    }
    if let Some(table) = table.upgrade() {
        if let Some(reg) = table.lock().get_mut(&identity) {
            if reg.generation == generation {
                reg.timer = None;
            }
        }
    }
    tracing::debug!(types = ?identity.types, keys = identity.keys.len(), "invalidating cached queries");
    // The sink may dispose this registration; no lock is held while it runs.
    for key in &identity.keys {
        if !still_live() {
            return;
        }
        sink.invalidate(key);
    }
}

/// Handle to one debounced registration. Disposes on drop.
///
/// Disposing stops a batch already in progress before its next key,
/// including from inside the invalidation sink.
#[must_use = "dropping an InvalidationHandle disposes the registration"]
pub struct InvalidationHandle {
    table: Weak<Table>,
    identity: Option<Identity>,
    disposed: AtomicBool,
}

impl InvalidationHandle {
    fn new(table: &Arc<Table>, identity: Identity) -> Self {
        Self { table: Arc::downgrade(table), identity: Some(identity), disposed: AtomicBool::new(false) }
    }

    fn inert() -> Self {
        Self { table: Weak::new(), identity: None, disposed: AtomicBool::new(false) }
    }

    /// Unsubscribe and cancel any pending timer. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let (Some(identity), Some(table)) = (&self.identity, self.table.upgrade()) else {
            return;
        };

        let removed = {
            let mut entries = table.lock();
            let last = match entries.get_mut(identity) {
                Some(reg) => {
                    reg.refs = reg.refs.saturating_sub(1);
                    reg.refs == 0
                }
                None => false,
            };
            if last {
                entries.remove(identity)
            } else {
                None
            }
        };
        if let Some(reg) = removed {
            reg.live.store(false, Ordering::Release);
            if let Some(timer) = reg.timer {
                timer.cancel();
            }
            drop(reg.subscriptions);
            tracing::debug!(types = ?identity.types, "debounced invalidation disposed");
        }
    }

    /// The most recent event that re-armed this registration's timer.
    pub fn last_message(&self) -> Option<EventEnvelope> {
        self.with_registration(|reg| reg.last_message.clone()).flatten()
    }

    /// Whether an invalidation is scheduled.
    pub fn pending(&self) -> bool {
        self.with_registration(|reg| reg.timer.is_some()).unwrap_or(false)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn with_registration<R>(&self, f: impl FnOnce(&Registration) -> R) -> Option<R> {
        if self.is_disposed() {
            return None;
        }
        let identity = self.identity.as_ref()?;
        let table = self.table.upgrade()?;
        let table = table.lock();
        table.get(identity).map(f)
    }
}

impl Drop for InvalidationHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
#[path = "debounce_tests.rs"]
mod tests;
