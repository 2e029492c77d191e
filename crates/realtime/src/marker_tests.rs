// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::{TimeZone, Utc};

use super::*;

#[test]
fn key_format() {
    assert_eq!(group_last_visit_key("17"), "group_chat_17_last_visit");
}

#[yare::parameterized(
    absent = { None },
    garbage = { Some("yesterday") },
    empty = { Some("") },
)]
fn unreadable_marker_defaults_to_epoch(raw: Option<&str>) {
    let store = MemoryMarkerStore::new();
    if let Some(raw) = raw {
        assert!(store.set(&group_last_visit_key("g"), raw).is_ok());
    }
    assert_eq!(read_last_visit(&store, "g"), DateTime::UNIX_EPOCH);
}

#[test]
fn marker_round_trips_through_rfc3339() -> anyhow::Result<()> {
    let store = MemoryMarkerStore::new();
    let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).single().ok_or_else(|| anyhow::anyhow!("bad date"))?;
    write_last_visit(&store, "g", at)?;

    assert_eq!(store.get("group_chat_g_last_visit").as_deref(), Some("2026-03-04T05:06:07.000Z"));
    assert_eq!(read_last_visit(&store, "g"), at);
    Ok(())
}

#[test]
fn offset_timestamps_are_normalized() -> anyhow::Result<()> {
    let store = MemoryMarkerStore::new();
    store.set(&group_last_visit_key("g"), "2026-03-04T07:06:07+02:00")?;
    let expected = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).single().ok_or_else(|| anyhow::anyhow!("bad date"))?;
    assert_eq!(read_last_visit(&store, "g"), expected);
    Ok(())
}

#[test]
fn file_store_persists_across_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("markers.json");

    let store = FileMarkerStore::open(&path)?;
    assert!(store.get("k").is_none());
    store.set("k", "v1")?;
    store.set("k", "v2")?;
    drop(store);

    let reopened = FileMarkerStore::open(&path)?;
    assert_eq!(reopened.get("k").as_deref(), Some("v2"));

    // No temp files left behind.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())?
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
    Ok(())
}

#[test]
fn file_store_rejects_corrupt_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("markers.json");
    std::fs::write(&path, "{not json")?;

    let err = FileMarkerStore::open(&path).err().ok_or_else(|| anyhow::anyhow!("expected error"))?;
    assert_eq!(err.as_str(), "STORE_JSON");
    Ok(())
}

#[test]
fn failed_write_leaves_memory_unchanged() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("missing-dir").join("markers.json");
    let store = FileMarkerStore::open(&path)?;

    let err = store.set("k", "v").err().ok_or_else(|| anyhow::anyhow!("expected error"))?;
    assert_eq!(err.as_str(), "STORE_IO");
    assert!(store.get("k").is_none());
    Ok(())
}

#[test]
fn failed_rename_removes_temp_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("markers.json");
    let store = FileMarkerStore::open(&path)?;
    // A non-empty directory where the file should go makes the rename fail.
    std::fs::create_dir(&path)?;
    std::fs::write(path.join("occupant"), "x")?;

    let err = store.set("k", "v").err().ok_or_else(|| anyhow::anyhow!("expected error"))?;
    assert_eq!(err.as_str(), "STORE_IO");
    let names: Vec<String> = std::fs::read_dir(dir.path())?
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["markers.json".to_owned()]);
    Ok(())
}
