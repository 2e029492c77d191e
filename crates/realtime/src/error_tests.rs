// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    no_credential = { ConnectError::NoCredential, "NO_CREDENTIAL" },
    transport = { ConnectError::Transport("refused".to_owned()), "TRANSPORT" },
    cancelled = { ConnectError::Cancelled, "CANCELLED" },
    shutdown = { ConnectError::Shutdown, "SHUTDOWN" },
)]
fn connect_error_codes(err: ConnectError, expected: &str) {
    assert_eq!(err.as_str(), expected);
}

#[test]
fn transport_error_message_is_carried() {
    let err = ConnectError::Transport("connection refused".to_owned());
    assert_eq!(err.to_string(), "transport error: connection refused");
}

#[test]
fn send_error_display() {
    assert_eq!(SendError::NotConnected.to_string(), "not connected");
    assert_eq!(SendError::NotConnected.as_str(), "NOT_CONNECTED");
}

#[test]
fn store_error_keeps_source() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err = StoreError::from(io);
    assert_eq!(err.as_str(), "STORE_IO");
    assert!(std::error::Error::source(&err).is_some());
}
