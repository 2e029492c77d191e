// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-side view of the host's local message cache, and the invalidation sink.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Key of one cached query, e.g. `["conversations", "42"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(":"))
    }
}

/// Receives "refetch this query" signals.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, key: &CacheKey);
}

impl<F> CacheInvalidator for F
where
    F: Fn(&CacheKey) + Send + Sync,
{
    fn invalidate(&self, key: &CacheKey) {
        self(key)
    }
}

/// Private message as cached locally and as carried by `new_message` payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPrivateMessage {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(deserialize_with = "id_string")]
    pub conversation_id: String,
    #[serde(deserialize_with = "id_string")]
    pub sender_id: String,
    #[serde(deserialize_with = "id_string")]
    pub recipient_id: String,
    #[serde(default)]
    pub is_seen: bool,
    pub created_at: DateTime<Utc>,
}

/// Group chat message as cached locally and as carried by `new_group_message` payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedGroupMessage {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(deserialize_with = "id_string")]
    pub group_id: String,
    #[serde(deserialize_with = "id_string")]
    pub sender_id: String,
    pub created_at: DateTime<Utc>,
}

/// Server ids arrive as either JSON strings or integers.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or integer id, got {other}"))),
    }
}

/// Snapshot reads of cached message lists.
pub trait MessageCache: Send + Sync {
    fn private_messages(&self, conversation_id: &str) -> Vec<CachedPrivateMessage>;
    fn group_messages(&self, group_id: &str) -> Vec<CachedGroupMessage>;
}

/// In-memory [`MessageCache`] for hosts without their own store, and for tests.
#[derive(Default)]
pub struct MemoryMessageCache {
    private: Mutex<HashMap<String, Vec<CachedPrivateMessage>>>,
    group: Mutex<HashMap<String, Vec<CachedGroupMessage>>>,
}

impl MemoryMessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached list for one conversation.
    pub fn put_private(&self, conversation_id: &str, messages: Vec<CachedPrivateMessage>) {
        self.private.lock().insert(conversation_id.to_owned(), messages);
    }

    pub fn push_private(&self, message: CachedPrivateMessage) {
        self.private.lock().entry(message.conversation_id.clone()).or_default().push(message);
    }

    /// Flag cached messages as seen, as a refetch after marking would.
    pub fn mark_seen(&self, conversation_id: &str, message_ids: &[String]) {
        if let Some(messages) = self.private.lock().get_mut(conversation_id) {
            for msg in messages.iter_mut().filter(|m| message_ids.contains(&m.id)) {
                msg.is_seen = true;
            }
        }
    }

    pub fn put_group(&self, group_id: &str, messages: Vec<CachedGroupMessage>) {
        self.group.lock().insert(group_id.to_owned(), messages);
    }

    pub fn push_group(&self, message: CachedGroupMessage) {
        self.group.lock().entry(message.group_id.clone()).or_default().push(message);
    }
}

impl MessageCache for MemoryMessageCache {
    fn private_messages(&self, conversation_id: &str) -> Vec<CachedPrivateMessage> {
        self.private.lock().get(conversation_id).cloned().unwrap_or_default()
    }

    fn group_messages(&self, group_id: &str) -> Vec<CachedGroupMessage> {
        self.group.lock().get(group_id).cloned().unwrap_or_default()
    }
}
