// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed publish-subscribe dispatcher for inbound envelopes.
//!
//! Listeners are registered per event type and released through a
//! [`Subscription`] guard. The registry lock is never held while a listener
//! runs, so listeners may subscribe, unsubscribe, or dispatch reentrantly.
//! A listener that returns an error or panics is logged and skipped; its
//! siblings still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::envelope::EventEnvelope;
use crate::error::DecodeError;

/// Callback invoked with the payload of each matching envelope.
pub type Listener = dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync;

struct Entry {
    id: u64,
    callback: Arc<Listener>,
    /// Number of live handles sharing this entry.
    refs: usize,
    /// Cleared on removal so an in-progress dispatch skips it.
    active: Arc<AtomicBool>,
}

/// Result of dispatching one envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub delivered: usize,
    pub failed: usize,
}

/// Cumulative dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub decode_failures: u64,
    pub listener_failures: u64,
}

/// Event-type keyed listener registry with fan-out.
pub struct EventDispatcher {
    registry: Mutex<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
    ready: AtomicBool,
    dispatched: AtomicU64,
    decode_failures: AtomicU64,
    listener_failures: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            ready: AtomicBool::new(false),
            dispatched: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            listener_failures: AtomicU64::new(0),
        })
    }

    /// Register `callback` for `event_type`.
    ///
    /// Registering the same callback (same `Arc`) twice under one type does
    /// not duplicate delivery: both handles share one entry, which stays
    /// registered until the last handle is released.
    pub fn subscribe(
        self: &Arc<Self>,
        event_type: impl Into<String>,
        callback: Arc<Listener>,
    ) -> Subscription {
        let event_type = event_type.into();
        let mut registry = self.registry.lock();
        let entries = registry.entry(event_type.clone()).or_default();

        let id = match entries.iter_mut().find(|e| Arc::ptr_eq(&e.callback, &callback)) {
            Some(existing) => {
                existing.refs += 1;
                existing.id
            }
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                entries.push(Entry {
                    id,
                    callback,
                    refs: 1,
                    active: Arc::new(AtomicBool::new(true)),
                });
                id
            }
        };
        drop(registry);

        debug!(event_type = %event_type, listener = id, "listener subscribed");
        Subscription { dispatcher: Arc::downgrade(self), event_type, id, released: false }
    }

    /// Convenience wrapper around [`subscribe`](Self::subscribe) for a fresh closure.
    pub fn on<F>(self: &Arc<Self>, event_type: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(event_type, Arc::new(callback))
    }

    fn release(&self, event_type: &str, id: u64) {
        let mut registry = self.registry.lock();
        let Some(entries) = registry.get_mut(event_type) else {
            return;
        };
        let Some(pos) = entries.iter().position(|e| e.id == id) else {
            return;
        };
        entries[pos].refs = entries[pos].refs.saturating_sub(1);
        if entries[pos].refs == 0 {
            let entry = entries.remove(pos);
            entry.active.store(false, Ordering::Release);
            debug!(event_type, listener = id, "listener unsubscribed");
        }
        if entries.is_empty() {
            registry.remove(event_type);
        }
    }

    /// Deliver one envelope to every listener registered for its type.
    pub fn dispatch(&self, envelope: &EventEnvelope) -> DispatchOutcome {
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        let snapshot: Vec<(u64, Arc<Listener>, Arc<AtomicBool>)> = {
            let registry = self.registry.lock();
            match registry.get(&envelope.event_type) {
                Some(entries) => entries
                    .iter()
                    .map(|e| (e.id, Arc::clone(&e.callback), Arc::clone(&e.active)))
                    .collect(),
                None => Vec::new(),
            }
        };

        let mut outcome = DispatchOutcome::default();
        for (id, callback, active) in snapshot {
            if !active.load(Ordering::Acquire) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| callback(&envelope.payload))) {
                Ok(Ok(())) => outcome.delivered += 1,
                Ok(Err(e)) => {
                    outcome.failed += 1;
                    warn!(event_type = %envelope.event_type, listener = id, err = %e, "listener failed");
                }
                Err(panic) => {
                    outcome.failed += 1;
                    warn!(
                        event_type = %envelope.event_type,
                        listener = id,
                        panic = panic_message(panic.as_ref()),
                        "listener panicked"
                    );
                }
            }
        }

        if outcome.failed > 0 {
            self.listener_failures.fetch_add(outcome.failed as u64, Ordering::Relaxed);
        }
        outcome
    }

    /// Decode a raw text frame and dispatch it. Malformed frames are logged and dropped.
    pub fn dispatch_frame(&self, frame: &str) -> Option<DispatchOutcome> {
        match EventEnvelope::decode(frame) {
            Ok(envelope) => Some(self.dispatch(&envelope)),
            Err(e) => {
                self.reject_frame(&e, frame.len());
                None
            }
        }
    }

    /// Count and log a frame that failed to decode.
    pub(crate) fn reject_frame(&self, err: &DecodeError, len: usize) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
        warn!(err = %err, len, "dropping inbound frame");
    }

    /// Number of distinct listeners registered for `event_type`.
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.registry.lock().get(event_type).map_or(0, Vec::len)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
        }
    }

    /// Set by the connection manager when a transport opens or closes.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handle to a registered listener. Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    dispatcher: Weak<EventDispatcher>,
    event_type: String,
    id: u64,
    released: bool,
}

impl Subscription {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Release this handle now. Safe to call from inside a listener.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.release(&self.event_type, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event_type", &self.event_type)
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
