// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

use super::RealtimeConfig;

#[derive(Debug, Parser)]
struct Host {
    #[command(flatten)]
    realtime: RealtimeConfig,
}

fn parse(args: &[&str]) -> anyhow::Result<RealtimeConfig> {
    let mut argv = vec!["host"];
    argv.extend_from_slice(args);
    Ok(Host::try_parse_from(argv)?.realtime)
}

#[test]
fn defaults_match_documented_values() -> anyhow::Result<()> {
    let config = parse(&[])?;
    assert_eq!(config.reconnect_backoff(), Duration::from_millis(1000));
    assert_eq!(config.debounce_delay(), Duration::from_millis(300));
    assert_eq!(config.credential_key, "access_token");
    assert!(config.marker_store.is_none());
    config.validate()?;
    Ok(())
}

#[test]
fn flags_override_defaults() -> anyhow::Result<()> {
    let config = parse(&[
        "--ws-url",
        "wss://api.example.com/ws/notifications/",
        "--reconnect-backoff-ms",
        "250",
        "--debounce-ms",
        "50",
        "--marker-store",
        "/tmp/markers.json",
        "--log-format",
        "json",
    ])?;
    assert_eq!(config.ws_url, "wss://api.example.com/ws/notifications/");
    assert_eq!(config.reconnect_backoff(), Duration::from_millis(250));
    assert_eq!(config.debounce_delay(), Duration::from_millis(50));
    assert_eq!(config.marker_store.as_deref(), Some(std::path::Path::new("/tmp/markers.json")));
    config.validate()?;
    Ok(())
}

#[test]
fn default_impl_agrees_with_clap_defaults() -> anyhow::Result<()> {
    let parsed = parse(&[])?;
    let built = RealtimeConfig::default();
    assert_eq!(parsed.ws_url, built.ws_url);
    assert_eq!(parsed.reconnect_backoff_ms, built.reconnect_backoff_ms);
    assert_eq!(parsed.debounce_ms, built.debounce_ms);
    assert_eq!(parsed.log_format, built.log_format);
    Ok(())
}

#[yare::parameterized(
    zero_backoff = { |c: &mut RealtimeConfig| c.reconnect_backoff_ms = 0 },
    zero_debounce = { |c: &mut RealtimeConfig| c.debounce_ms = 0 },
    http_url = { |c: &mut RealtimeConfig| c.ws_url = "http://example.com".to_owned() },
    empty_key = { |c: &mut RealtimeConfig| c.credential_key.clear() },
    bad_log_format = { |c: &mut RealtimeConfig| c.log_format = "yaml".to_owned() },
)]
fn validate_rejects(mutate: fn(&mut RealtimeConfig)) {
    let mut config = RealtimeConfig::default();
    mutate(&mut config);
    assert!(config.validate().is_err());
}
