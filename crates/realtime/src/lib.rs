// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod cache;
pub mod config;
pub mod connection;
pub mod credential;
pub mod debounce;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod marker;
pub mod service;
pub mod telemetry;
pub mod test_support;
pub mod transport;
pub mod unread;

pub use config::RealtimeConfig;
pub use service::{Collaborators, RealtimeCore};
