//! Direct peer-link binding.
//!
//! Needs a token from an earlier relay login. The offer/answer exchange
//! itself goes through [`Session::rpc`], so it rides on whichever
//! transport is primary at the time.
//!
//! Two data channels carry the traffic: text on `viewsharecontrol`,
//! binary on `viewsharebulk`.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result, code};
use crate::peer::{ChannelEvent, DataChannel, PeerLinkFactory, PeerSession};
use crate::session::Session;

use super::binding::{Link, LinkEnd, LinkEvent, TransportBinding, WirePayload};

// ============================================================================
// Constants
// ============================================================================

/// Default priority of a direct link.
pub const DIRECT_PRIORITY: u32 = 100;

/// Label of the text channel.
pub const CONTROL_CHANNEL: &str = "viewsharecontrol";

/// Label of the binary channel.
pub const BULK_CHANNEL: &str = "viewsharebulk";

/// Method the far end answers offers on.
pub const NEGOTIATE_METHOD: &str = "webrtcControlStart";

/// How long the control channel may take to open after negotiation.
const CHANNEL_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// PeerLinkBinding
// ============================================================================

/// Binding that reaches the far end over a direct peer link.
pub struct PeerLinkBinding {
    factory: Arc<dyn PeerLinkFactory>,
    priority: u32,
    current: Mutex<Option<Arc<PeerSession>>>,
}

impl std::fmt::Debug for PeerLinkBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLinkBinding")
            .field("priority", &self.priority)
            .field("current", &self.current.lock().as_ref().map(|p| p.id().clone()))
            .finish_non_exhaustive()
    }
}

impl PeerLinkBinding {
    /// Creates a binding that builds links with `factory`.
    #[must_use]
    pub fn new(factory: impl PeerLinkFactory) -> Self {
        Self {
            factory: Arc::new(factory),
            priority: DIRECT_PRIORITY,
            current: Mutex::new(None),
        }
    }

    /// Overrides the selection priority.
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Returns the peer session of the current attempt.
    #[must_use]
    pub fn current(&self) -> Option<Arc<PeerSession>> {
        self.current.lock().clone()
    }

    fn replace_current(&self, next: Option<Arc<PeerSession>>) {
        let previous = std::mem::replace(&mut *self.current.lock(), next);
        if let Some(previous) = previous {
            previous.close();
        }
    }
}

#[async_trait]
impl TransportBinding for PeerLinkBinding {
    fn kind(&self) -> &'static str {
        "peer"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn enabled(&self, session: &Session) -> bool {
        session.direct_enabled()
    }

    async fn open(&self, session: &Session) -> Result<Link> {
        if session.token().is_none() {
            return Err(Error::transport("No login token", code::NO_LOGIN_TOKEN));
        }

        let link = self.factory.create(&session.ice_servers())?;
        let control = link.create_data_channel(CONTROL_CHANNEL)?;
        let bulk = link.create_data_channel(BULK_CHANNEL)?;
        let peer = Arc::new(PeerSession::new(link, None));
        self.replace_current(Some(Arc::clone(&peer)));

        if let Err(e) = peer.negotiate(session, NEGOTIATE_METHOD).await {
            warn!(peer_session = %peer.id(), error = %e, "Datachannel failed");
            peer.close();
            return Err(Error::transport(
                format!("Datachannel failed: {e}"),
                code::NEGOTIATION_FAILED,
            ));
        }

        let DataChannel {
            outgoing: control_tx,
            events: mut control_rx,
            ..
        } = control;

        let opened = tokio::time::timeout(CHANNEL_OPEN_TIMEOUT, wait_open(&mut control_rx)).await;
        if !matches!(opened, Ok(true)) {
            peer.close();
            return Err(Error::transport(
                "Datachannel failed: control channel did not open",
                code::NEGOTIATION_FAILED,
            ));
        }
        debug!(peer_session = %peer.id(), "Datachannel connected");

        let (link, end) = Link::pair();
        let events = end.events.clone();
        peer.set_on_close(Box::new(move || {
            let _ = events.send(LinkEvent::Closed {
                reason: "ICE failed".to_owned(),
                code: code::LINK_FAILED,
            });
        }));

        tokio::spawn(pump(end, control_tx, control_rx, bulk));
        Ok(link)
    }

    fn disconnect(&self, session: &Session) -> bool {
        self.replace_current(None);
        // Only worth retrying while another transport can carry the offer.
        session.is_authenticated()
    }
}

// ============================================================================
// Channel Pump
// ============================================================================

async fn wait_open(events: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> bool {
    loop {
        match events.recv().await {
            Some(ChannelEvent::Open) => return true,
            Some(ChannelEvent::Message(_)) => {}
            Some(ChannelEvent::Closed) | None => return false,
        }
    }
}

async fn pump(
    end: LinkEnd,
    control_tx: mpsc::UnboundedSender<WirePayload>,
    mut control_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    bulk: DataChannel,
) {
    let LinkEnd {
        events,
        mut outgoing,
    } = end;
    let DataChannel {
        outgoing: bulk_tx,
        events: mut bulk_rx,
        ..
    } = bulk;

    let closed = loop {
        tokio::select! {
            payload = outgoing.recv() => {
                let sent = match payload {
                    Some(payload @ WirePayload::Text(_)) => control_tx.send(payload).is_ok(),
                    Some(payload @ WirePayload::Binary(_)) => bulk_tx.send(payload).is_ok(),
                    None => break None,
                };
                if !sent {
                    break Some("data channel gone");
                }
            }

            event = control_rx.recv() => match event {
                Some(ChannelEvent::Message(payload)) => {
                    if events.send(LinkEvent::Payload(payload)).is_err() {
                        break None;
                    }
                }
                Some(ChannelEvent::Open) => {}
                Some(ChannelEvent::Closed) | None => break Some("control channel closed"),
            },

            event = bulk_rx.recv() => match event {
                Some(ChannelEvent::Message(payload)) => {
                    if events.send(LinkEvent::Payload(payload)).is_err() {
                        break None;
                    }
                }
                Some(ChannelEvent::Open) => {}
                Some(ChannelEvent::Closed) | None => break Some("bulk channel closed"),
            },
        }
    };

    if let Some(reason) = closed {
        debug!(reason, "Peer link closed");
        let _ = events.send(LinkEvent::Closed {
            reason: reason.to_owned(),
            code: code::LINK_CLOSED,
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
