// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unread counters for private conversations and group chats.
//!
//! Counts live in per-conversation and per-group buckets. Totals are always
//! recomputed from the buckets, and every decrement saturates at zero, so
//! the published counts can neither drift nor go negative.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::cache::{CachedGroupMessage, CachedPrivateMessage, MessageCache};
use crate::dispatch::{EventDispatcher, Subscription};
use crate::envelope::types;
use crate::error::StoreError;
use crate::marker::{read_last_visit, write_last_visit, MarkerStore};

/// Reports a private message as seen to the server.
pub trait SeenReporter: Send + Sync {
    fn mark_seen(&self, conversation_id: &str, message_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnreadCounts {
    pub private: u32,
    pub group: u32,
    pub total: u32,
}

#[derive(Default)]
struct UnreadState {
    private: HashMap<String, u32>,
    group: HashMap<String, u32>,
    /// Message ids already reported seen whose cached copy may still say unseen.
    acknowledged: HashSet<String>,
    conversations: Vec<String>,
    groups: Vec<String>,
}

impl UnreadState {
    fn counts(&self) -> UnreadCounts {
        let private = self.private.values().fold(0u32, |acc, n| acc.saturating_add(*n));
        let group = self.group.values().fold(0u32, |acc, n| acc.saturating_add(*n));
        UnreadCounts { private, group, total: private.saturating_add(group) }
    }
}

pub struct UnreadAggregator {
    user_id: String,
    cache: Arc<dyn MessageCache>,
    markers: Arc<dyn MarkerStore>,
    seen: Arc<dyn SeenReporter>,
    state: Mutex<UnreadState>,
    counts_tx: watch::Sender<UnreadCounts>,
}

impl UnreadAggregator {
    pub fn new(
        user_id: impl Into<String>,
        cache: Arc<dyn MessageCache>,
        markers: Arc<dyn MarkerStore>,
        seen: Arc<dyn SeenReporter>,
    ) -> Arc<Self> {
        let (counts_tx, _) = watch::channel(UnreadCounts::default());
        Arc::new(Self {
            user_id: user_id.into(),
            cache,
            markers,
            seen,
            state: Mutex::new(UnreadState::default()),
            counts_tx,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Rebuild every bucket from the cached snapshots.
    pub fn initialize<C, G>(&self, conversation_ids: C, group_ids: G)
    where
        C: IntoIterator,
        C::Item: Into<String>,
        G: IntoIterator,
        G::Item: Into<String>,
    {
        let conversations: Vec<String> = conversation_ids.into_iter().map(Into::into).collect();
        let groups: Vec<String> = group_ids.into_iter().map(Into::into).collect();

        let private_snapshots: Vec<(String, Vec<CachedPrivateMessage>)> = conversations
            .iter()
            .map(|id| (id.clone(), self.cache.private_messages(id)))
            .collect();
        let group_buckets: HashMap<String, u32> = groups
            .iter()
            .map(|id| {
                let since = read_last_visit(self.markers.as_ref(), id);
                (id.clone(), self.unread_in_group(&self.cache.group_messages(id), since))
            })
            .collect();

        {
            let mut state = self.state.lock();
            // Forget acknowledgements the cache has caught up with.
            let still_unseen: HashSet<&str> = private_snapshots
                .iter()
                .flat_map(|(_, msgs)| msgs.iter())
                .filter(|m| !m.is_seen)
                .map(|m| m.id.as_str())
                .collect();
            state.acknowledged.retain(|id| still_unseen.contains(id.as_str()));

            let private_buckets: HashMap<String, u32> = private_snapshots
                .iter()
                .map(|(id, msgs)| (id.clone(), count_u32(self.unread_private(msgs, &state.acknowledged))))
                .collect();
            state.private = private_buckets;
            state.group = group_buckets;
            state.conversations = conversations;
            state.groups = groups;
        }
        let counts = self.publish();
        tracing::debug!(private = counts.private, group = counts.group, "unread counts initialized");
    }

    /// Re-run [`initialize`](Self::initialize) with the ids it was last given.
    pub fn reinitialize(&self) {
        let (conversations, groups) = {
            let state = self.state.lock();
            (state.conversations.clone(), state.groups.clone())
        };
        self.initialize(conversations, groups);
    }

    /// Count a live `new_message` payload. Returns whether it was counted.
    pub fn on_private_message_event(&self, payload: &Value) -> bool {
        let message: CachedPrivateMessage = match serde_json::from_value(payload.clone()) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(err = %e, "ignoring malformed private message payload");
                return false;
            }
        };
        if message.recipient_id != self.user_id || message.is_seen {
            return false;
        }
        self.bump(|state| state.private.entry(message.conversation_id).or_default());
        true
    }

    /// Count a live `new_group_message` payload. Returns whether it was counted.
    pub fn on_group_message_event(&self, payload: &Value) -> bool {
        let message: CachedGroupMessage = match serde_json::from_value(payload.clone()) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(err = %e, "ignoring malformed group message payload");
                return false;
            }
        };
        if message.sender_id == self.user_id {
            return false;
        }
        self.bump(|state| state.group.entry(message.group_id).or_default());
        true
    }

    /// Report every cached unseen message to the current user as seen.
    ///
    /// Returns the number of messages marked. Messages whose report fails
    /// stay unread and are retried on the next call.
    pub fn mark_conversation_read(&self, conversation_id: &str) -> u32 {
        let messages = self.cache.private_messages(conversation_id);
        let pending: Vec<CachedPrivateMessage> = {
            let state = self.state.lock();
            messages
                .into_iter()
                .filter(|m| self.is_unread_private(m, &state.acknowledged))
                .collect()
        };

        let mut marked = Vec::with_capacity(pending.len());
        for message in &pending {
            match self.seen.mark_seen(conversation_id, &message.id) {
                Ok(()) => marked.push(message.id.clone()),
                Err(e) => {
                    tracing::warn!(conversation_id, message_id = %message.id, err = %e, "failed to mark message seen");
                }
            }
        }

        let count = count_u32(marked.len());
        {
            let mut state = self.state.lock();
            state.acknowledged.extend(marked);
            if let Some(bucket) = state.private.get_mut(conversation_id) {
                *bucket = bucket.saturating_sub(count);
            }
        }
        self.publish();
        count
    }

    /// Persist now as the group's last visit and drop its unread messages from the count.
    ///
    /// Returns the number of messages that were unread before the visit.
    pub fn mark_group_read(&self, group_id: &str) -> Result<u32, StoreError> {
        self.mark_group_read_at(group_id, Utc::now())
    }

    pub fn mark_group_read_at(&self, group_id: &str, now: DateTime<Utc>) -> Result<u32, StoreError> {
        let since = read_last_visit(self.markers.as_ref(), group_id);
        let unread = self.unread_in_group(&self.cache.group_messages(group_id), since);
        write_last_visit(self.markers.as_ref(), group_id, now)?;

        if let Some(bucket) = self.state.lock().group.get_mut(group_id) {
            *bucket = bucket.saturating_sub(unread);
        }
        self.publish();
        Ok(unread)
    }

    pub fn counts(&self) -> UnreadCounts {
        self.state.lock().counts()
    }

    /// Latest counts, updated after every change.
    pub fn watch(&self) -> watch::Receiver<UnreadCounts> {
        self.counts_tx.subscribe()
    }

    /// Feed live events from `dispatcher` and rebuild on every `auth_success`.
    pub fn attach(self: &Arc<Self>, dispatcher: &Arc<EventDispatcher>) -> Vec<Subscription> {
        let private = Arc::clone(self);
        let group = Arc::clone(self);
        let auth = Arc::clone(self);
        vec![
            dispatcher.on(types::NEW_MESSAGE, move |payload| {
                private.on_private_message_event(payload);
                Ok(())
            }),
            dispatcher.on(types::NEW_GROUP_MESSAGE, move |payload| {
                group.on_group_message_event(payload);
                Ok(())
            }),
            dispatcher.on(types::AUTH_SUCCESS, move |_| {
                auth.reinitialize();
                Ok(())
            }),
        ]
    }

    fn unread_private(&self, messages: &[CachedPrivateMessage], acknowledged: &HashSet<String>) -> usize {
        messages.iter().filter(|m| self.is_unread_private(m, acknowledged)).count()
    }

    fn is_unread_private(&self, message: &CachedPrivateMessage, acknowledged: &HashSet<String>) -> bool {
        message.recipient_id == self.user_id && !message.is_seen && !acknowledged.contains(&message.id)
    }

    fn unread_in_group(&self, messages: &[CachedGroupMessage], since: DateTime<Utc>) -> u32 {
        count_u32(messages.iter().filter(|m| m.sender_id != self.user_id && m.created_at > since).count())
    }

    fn bump(&self, bucket: impl FnOnce(&mut UnreadState) -> &mut u32) {
        {
            let mut state = self.state.lock();
            let n = bucket(&mut *state);
            *n = n.saturating_add(1);
        }
        self.publish();
    }

    fn publish(&self) -> UnreadCounts {
        let counts = self.counts();
        self.counts_tx.send_replace(counts);
        counts
    }
}

fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
#[path = "unread_tests.rs"]
mod tests;
