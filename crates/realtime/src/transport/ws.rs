// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket transport: one `tokio-tungstenite` connection per [`Transport`].
//!
//! A pump task owns the socket, forwards outbound frames in order, and
//! reports inbound text frames, closes, and errors on the event channel.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::credential::Credential;
use crate::error::TransportError;
use crate::transport::{Connector, Transport, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Builds the connection URL for a credential. Called on every connect.
pub type UrlBuilder = dyn Fn(&str, &Credential) -> String + Send + Sync;

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// [`Connector`] backed by `tokio-tungstenite`.
pub struct WsConnector {
    base_url: String,
    url_builder: Arc<UrlBuilder>,
    handshake_timeout: Duration,
}

impl WsConnector {
    /// Connector that passes the credential as a `token` query parameter.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            url_builder: Arc::new(|base: &str, credential: &Credential| {
                build_ws_url(base, credential.token())
            }),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Replace how the URL is derived from the credential (e.g. signed query params).
    pub fn with_url_builder(
        mut self,
        builder: impl Fn(&str, &Credential) -> String + Send + Sync + 'static,
    ) -> Self {
        self.url_builder = Arc::new(builder);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

impl Connector for WsConnector {
    fn connect(&self, credential: &Credential) -> BoxFuture<'static, Result<Transport, TransportError>> {
        let url = (self.url_builder)(&self.base_url, credential);
        let base = self.base_url.clone();
        let timeout = self.handshake_timeout;

        Box::pin(async move {
            let ws_stream =
                match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.as_str())).await {
                    Ok(Ok((stream, _))) => stream,
                    Ok(Err(e)) => return Err(TransportError::Connect(e.to_string())),
                    Err(_) => return Err(TransportError::Connect("handshake timed out".to_owned())),
                };
            tracing::debug!(url = %base, "websocket connected");

            let (outbound, out_rx) = mpsc::unbounded_channel();
            let (in_tx, inbound) = mpsc::unbounded_channel();
            let close = CancellationToken::new();
            tokio::spawn(pump(ws_stream, out_rx, in_tx, close.clone()));

            Ok(Transport { outbound, inbound, close })
        })
    }
}

async fn pump(
    ws_stream: WsStream,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    in_tx: mpsc::UnboundedSender<TransportEvent>,
    close: CancellationToken,
) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = close.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            out = out_rx.recv() => {
                let Some(text) = out else {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    tracing::debug!(err = %e, "websocket write failed");
                    let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                    break;
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let _ = in_tx.send(TransportEvent::Frame(text.to_string()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_owned())
                            .filter(|r| !r.is_empty());
                        let _ = in_tx.send(TransportEvent::Closed { reason });
                        break;
                    }
                    None => {
                        let _ = in_tx.send(TransportEvent::Closed { reason: None });
                        break;
                    }
                    Some(Err(e)) => {
                        let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                    _ => {} // ping/pong/binary ignored
                }
            }
        }
    }
}

/// Append the credential to the base URL as a percent-encoded `token` query parameter.
pub fn build_ws_url(base_url: &str, token: &str) -> String {
    let sep = if base_url.contains('?') { '&' } else { '?' };
    format!("{base_url}{sep}token={}", urlencoding::encode(token))
}

#[cfg(test)]
mod tests {
    use super::build_ws_url;

    #[yare::parameterized(
        bare = { "ws://localhost:8000/ws/notifications/", "ws://localhost:8000/ws/notifications/?token=t1" },
        with_query = { "wss://api.example.com/ws?v=2", "wss://api.example.com/ws?v=2&token=t1" },
    )]
    fn url_carries_token(base: &str, expected: &str) {
        assert_eq!(build_ws_url(base, "t1"), expected);
    }

    #[yare::parameterized(
        jwt_padding = { "abc+/def==", "ws://h/ws?token=abc%2B%2Fdef%3D%3D" },
        query_chars = { "a&b=c#d", "ws://h/ws?token=a%26b%3Dc%23d" },
        space = { "a b", "ws://h/ws?token=a%20b" },
    )]
    fn token_is_percent_encoded(token: &str, expected: &str) {
        assert_eq!(build_ws_url("ws://h/ws", token), expected);
    }
}
