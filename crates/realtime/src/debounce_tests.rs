// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use super::*;
use crate::test_support::RecordingInvalidator;

fn setup() -> (Arc<EventDispatcher>, Arc<RecordingInvalidator>, DebouncedInvalidator) {
    let dispatcher = EventDispatcher::new();
    let sink = Arc::new(RecordingInvalidator::default());
    let invalidator = DebouncedInvalidator::new(
        Arc::clone(&dispatcher),
        Arc::clone(&sink) as Arc<dyn CacheInvalidator>,
        DEFAULT_DEBOUNCE,
    );
    (dispatcher, sink, invalidator)
}

fn event(event_type: &str, n: u64) -> EventEnvelope {
    EventEnvelope::new(event_type, json!({ "n": n }))
}

fn key(name: &str) -> CacheKey {
    CacheKey::new([name])
}

#[tokio::test(start_paused = true)]
async fn burst_coalesces_into_one_invalidation() {
    let (dispatcher, sink, invalidator) = setup();
    let _handle = invalidator.register(["a"], [key("messages")], DebounceOptions::default());

    let mut last_event = Instant::now();
    for n in 0..5 {
        dispatcher.dispatch(&event("a", n));
        last_event = Instant::now();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    let calls = sink.calls();
    assert_eq!(calls.len(), 1, "calls: {calls:?}");
    let (fired_key, fired_at) = &calls[0];
    assert_eq!(fired_key, &key("messages"));
    assert!(*fired_at - last_event >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn one_invalidation_per_key() {
    let (dispatcher, sink, invalidator) = setup();
    let _handle = invalidator.register(
        ["new_message", "new_group_message"],
        [key("conversations"), key("groups")],
        DebounceOptions::default(),
    );

    dispatcher.dispatch(&event("new_message", 1));
    dispatcher.dispatch(&event("new_group_message", 2));
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(sink.keys(), vec![key("conversations"), key("groups")]);
}

#[tokio::test(start_paused = true)]
async fn separated_bursts_fire_separately() {
    let (dispatcher, sink, invalidator) = setup();
    let _handle = invalidator.register(["a"], [key("k")], DebounceOptions::default());

    dispatcher.dispatch(&event("a", 1));
    tokio::time::sleep(Duration::from_millis(500)).await;
    dispatcher.dispatch(&event("a", 2));
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(sink.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn dispose_cancels_pending_timer() {
    let (dispatcher, sink, invalidator) = setup();
    let handle = invalidator.register(["a"], [key("k")], DebounceOptions::default());

    dispatcher.dispatch(&event("a", 1));
    assert!(handle.pending());
    tokio::time::sleep(Duration::from_millis(299)).await;
    handle.dispose();
    handle.dispose();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(sink.calls().is_empty());
    assert!(handle.is_disposed());
    assert_eq!(dispatcher.listener_count("a"), 0);
    assert_eq!(invalidator.registration_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn events_after_dispose_are_ignored() {
    let (dispatcher, sink, invalidator) = setup();
    let handle = invalidator.register(["a"], [key("k")], DebounceOptions::default());
    drop(handle);

    dispatcher.dispatch(&event("a", 1));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(sink.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn identical_registrations_share_one_timer() {
    let (dispatcher, sink, invalidator) = setup();
    let first = invalidator.register(["b", "a"], [key("y"), key("x")], DebounceOptions::default());
    let second = invalidator.register(["a", "b", "a"], [key("x"), key("y")], DebounceOptions::default());

    assert_eq!(invalidator.registration_count(), 1);
    assert_eq!(dispatcher.listener_count("a"), 1);

    dispatcher.dispatch(&event("a", 1));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sink.keys(), vec![key("x"), key("y")]);

    // Still live through the second handle.
    first.dispose();
    dispatcher.dispatch(&event("b", 2));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sink.calls().len(), 4);

    second.dispose();
    assert_eq!(invalidator.registration_count(), 0);
    assert_eq!(dispatcher.listener_count("b"), 0);
}

#[tokio::test(start_paused = true)]
async fn tracks_last_message_and_clears_pending() {
    let (dispatcher, _sink, invalidator) = setup();
    let handle = invalidator.register(["a"], [key("k")], DebounceOptions::default());
    assert!(handle.last_message().is_none());
    assert!(!handle.pending());

    dispatcher.dispatch(&event("a", 1));
    dispatcher.dispatch(&event("a", 2));
    assert_eq!(handle.last_message(), Some(event("a", 2)));
    assert!(handle.pending());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!handle.pending());
    assert_eq!(handle.last_message(), Some(event("a", 2)));
}

#[tokio::test]
async fn disabled_registration_subscribes_nothing() {
    let (dispatcher, sink, invalidator) = setup();
    let handle = invalidator.register(
        ["a"],
        [key("k")],
        DebounceOptions { enabled: false, ..DebounceOptions::default() },
    );

    assert_eq!(dispatcher.listener_count("a"), 0);
    assert_eq!(invalidator.registration_count(), 0);
    dispatcher.dispatch(&event("a", 1));
    assert!(!handle.pending());
    assert!(sink.calls().is_empty());
    handle.dispose();
}

#[tokio::test(start_paused = true)]
async fn custom_delay_is_honored() {
    let (dispatcher, sink, invalidator) = setup();
    let _handle = invalidator.register(
        ["a"],
        [key("k")],
        DebounceOptions { delay: Duration::from_millis(50), ..invalidator.options() },
    );

    let start = Instant::now();
    dispatcher.dispatch(&event("a", 1));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let calls = sink.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].1 - start >= Duration::from_millis(50));
    assert!(calls[0].1 - start < Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn sink_may_dispose_its_own_registration() -> anyhow::Result<()> {
    let dispatcher = EventDispatcher::new();
    let slot: Arc<Mutex<Option<InvalidationHandle>>> = Arc::new(Mutex::new(None));
    let invalidated: Arc<Mutex<Vec<CacheKey>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = {
        let slot = Arc::clone(&slot);
        let invalidated = Arc::clone(&invalidated);
        move |key: &CacheKey| {
            invalidated.lock().push(key.clone());
            // Refetch navigated away: tear the registration down mid-batch.
            let handle = slot.lock().take();
            if let Some(handle) = handle {
                handle.dispose();
            }
        }
    };
    let invalidator = DebouncedInvalidator::new(Arc::clone(&dispatcher), Arc::new(sink), DEFAULT_DEBOUNCE);
    let handle = invalidator.register(["a"], [key("first"), key("second")], DebounceOptions::default());
    *slot.lock() = Some(handle);

    dispatcher.dispatch(&event("a", 1));
    tokio::time::timeout(Duration::from_secs(5), async {
        while invalidator.registration_count() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await?;

    assert_eq!(*invalidated.lock(), vec![key("first")]);
    assert_eq!(dispatcher.listener_count("a"), 0);
    Ok(())
}
