//! WebSocket relay binding.
//!
//! Connects to the relay server with `tokio-tungstenite` and pumps frames
//! between the socket and the transport lifecycle. The relay is the
//! fallback path: lower priority than a direct peer link, and always
//! worth reconnecting to.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result, code};
use crate::session::Session;

use super::binding::{Link, LinkEnd, LinkEvent, TransportBinding, WirePayload};

// ============================================================================
// Constants
// ============================================================================

/// Default priority of the relay.
pub const RELAY_PRIORITY: u32 = 50;

// ============================================================================
// WebSocketBinding
// ============================================================================

/// Binding that reaches the far end through a WebSocket relay.
#[derive(Debug, Clone)]
pub struct WebSocketBinding {
    url: Url,
    priority: u32,
}

impl WebSocketBinding {
    /// Creates a binding for a `ws://` or `wss://` URL.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if the URL does not parse
    /// - [`Error::Config`] for any other scheme
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self {
                url,
                priority: RELAY_PRIORITY,
            }),
            other => Err(Error::config(format!(
                "unsupported relay scheme '{other}', expected ws or wss"
            ))),
        }
    }

    /// Overrides the selection priority.
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Returns the relay URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl TransportBinding for WebSocketBinding {
    fn kind(&self) -> &'static str {
        "websocket"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    async fn open(&self, _session: &Session) -> Result<Link> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;

        debug!(url = %self.url, "Relay connected");

        let (link, end) = Link::pair();
        tokio::spawn(pump(ws_stream, end));
        Ok(link)
    }

    fn disconnect(&self, _session: &Session) -> bool {
        // The pump stops once the lifecycle drops its outbound sender.
        true
    }
}

// ============================================================================
// Pump
// ============================================================================

async fn pump<S>(ws_stream: tokio_tungstenite::WebSocketStream<S>, end: LinkEnd)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let LinkEnd {
        events,
        mut outgoing,
    } = end;
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let closed = loop {
        tokio::select! {
            message = ws_read.next() => {
                let payload = match message {
                    Some(Ok(WsMessage::Text(text))) => WirePayload::Text(text.as_str().to_owned()),
                    Some(Ok(WsMessage::Binary(data))) => WirePayload::Binary(data),
                    Some(Ok(WsMessage::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_owned())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by relay".to_owned());
                        break Some((reason, code::LINK_CLOSED));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break Some((e.to_string(), code::LINK_FAILED)),
                    None => break Some(("relay stream ended".to_owned(), code::LINK_CLOSED)),
                };

                if events.send(LinkEvent::Payload(payload)).is_err() {
                    break None;
                }
            }

            payload = outgoing.recv() => {
                let message = match payload {
                    Some(WirePayload::Text(text)) => WsMessage::Text(text.into()),
                    Some(WirePayload::Binary(data)) => WsMessage::Binary(data),
                    None => {
                        let _ = ws_write.close().await;
                        break None;
                    }
                };

                if let Err(e) = ws_write.send(message).await {
                    warn!(error = %e, "Relay write failed");
                    break Some((e.to_string(), code::LINK_FAILED));
                }
            }
        }
    };

    if let Some((reason, code)) = closed {
        debug!(reason = %reason, code, "Relay link closed");
        let _ = events.send(LinkEvent::Closed { reason, code });
    }
}

// ============================================================================
// Tests
// ============================================================================
