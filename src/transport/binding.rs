//! The seam between the shared transport lifecycle and one transport kind.
//!
//! A [`TransportBinding`] knows how to open one physical link and how to
//! tear it down. Everything else (login, backoff, routing) lives in
//! [`Transport`](super::Transport) and is shared by all kinds.
//!
//! # Link model
//!
//! ```text
//! ┌─────────────┐  outbound: WirePayload   ┌─────────────┐
//! │  Transport  │ ───────────────────────► │   binding   │ ──► wire
//! │ (lifecycle) │ ◄─────────────────────── │    pump     │ ◄── wire
//! └─────────────┘  inbound: LinkEvent      └─────────────┘
//! ```
//!
//! Dropping the outbound sender asks the pump to close the link.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::Message;
use crate::session::Session;

// ============================================================================
// Payloads
// ============================================================================

/// One frame as it travels over a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WirePayload {
    /// Structured message text.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

/// Something a binding reports to the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A frame arrived.
    Payload(WirePayload),
    /// The link is gone.
    Closed {
        /// Why the link closed.
        reason: String,
        /// Failure code, see [`crate::error::code`].
        code: u32,
    },
}

/// A message submitted for delivery, before serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Structured message, sent as text.
    Message(Message),
    /// Pre-encoded binary frame.
    Binary(Bytes),
}

impl From<Message> for Outbound {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

// ============================================================================
// Link
// ============================================================================

/// Lifecycle side of an open link.
#[derive(Debug)]
pub struct Link {
    /// Frames to write to the wire.
    pub outbound: mpsc::UnboundedSender<WirePayload>,
    /// Frames and close notifications read from the wire.
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Binding side of an open link.
#[derive(Debug)]
pub struct LinkEnd {
    /// Where the binding reports inbound frames.
    pub events: mpsc::UnboundedSender<LinkEvent>,
    /// Frames the lifecycle wants written.
    pub outgoing: mpsc::UnboundedReceiver<WirePayload>,
}

impl Link {
    /// Creates a connected pair of link halves.
    #[must_use]
    pub fn pair() -> (Link, LinkEnd) {
        let (outbound, outgoing) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();
        (Link { outbound, inbound }, LinkEnd { events, outgoing })
    }
}

// ============================================================================
// TransportBinding
// ============================================================================

/// One concrete way of reaching the far end.
///
/// Implementations must be cheap to call repeatedly: the lifecycle calls
/// [`open`](Self::open) once per connection attempt.
#[async_trait]
pub trait TransportBinding: Send + Sync + 'static {
    /// Short name used in logs.
    fn kind(&self) -> &'static str;

    /// Selection priority, higher wins.
    fn priority(&self) -> u32;

    /// Returns `false` when the binding must not connect at all right now.
    ///
    /// A disabled binding leaves its transport idle without counting a
    /// failure.
    fn enabled(&self, _session: &Session) -> bool {
        true
    }

    /// Opens a link. Returns once frames can be written.
    ///
    /// # Errors
    ///
    /// Any error is treated as a connect failure and drives backoff.
    async fn open(&self, session: &Session) -> Result<Link>;

    /// Releases whatever [`open`](Self::open) created.
    ///
    /// Returns whether an automatic reconnect is warranted.
    fn disconnect(&self, session: &Session) -> bool;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_link_pair_is_connected() {
        let (mut link, mut end) = Link::pair();

        link.outbound
            .send(WirePayload::Text("hello".into()))
            .expect("send");
        assert_eq!(
            end.outgoing.recv().await,
            Some(WirePayload::Text("hello".into()))
        );

        end.events
            .send(LinkEvent::Payload(WirePayload::Binary(Bytes::from_static(
                b"\x03\0\0\0\x01",
            ))))
            .expect("send");
        assert!(matches!(
            link.inbound.recv().await,
            Some(LinkEvent::Payload(WirePayload::Binary(_)))
        ));
    }

    #[tokio::test]
    async fn test_dropping_outbound_ends_pump_input() {
        let (link, mut end) = Link::pair();
        drop(link);
        assert_eq!(end.outgoing.recv().await, None);
    }
}
