//! Abstraction over a browser-style peer connection.
//!
//! The session layer never talks to a WebRTC stack directly. It drives a
//! [`PeerLink`] created by a [`PeerLinkFactory`], and exchanges frames
//! with the link's data channels through plain channels.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::Result;
use crate::protocol::{IceCandidate, IceServer, SessionDescription};
use crate::transport::WirePayload;

// ============================================================================
// LinkState
// ============================================================================

/// ICE connection state of a peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Created, no checks yet.
    #[default]
    New,
    /// Gathering or checking candidates.
    Checking,
    /// A usable candidate pair was found.
    Connected,
    /// Checks finished.
    Completed,
    /// Connectivity lost, may recover.
    Disconnected,
    /// Connectivity lost for good.
    Failed,
    /// Closed locally.
    Closed,
}

// ============================================================================
// DataChannel
// ============================================================================

/// Something a data channel reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel can carry frames.
    Open,
    /// A frame arrived.
    Message(WirePayload),
    /// The channel closed.
    Closed,
}

/// Local side of one data channel.
#[derive(Debug)]
pub struct DataChannel {
    /// Channel label.
    pub label: String,
    /// Frames to send.
    pub outgoing: mpsc::UnboundedSender<WirePayload>,
    /// Open/close notifications and received frames.
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

// ============================================================================
// PeerLink
// ============================================================================

/// One peer connection.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Creates a local offer.
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Applies the local description.
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    /// Applies the far end's description.
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Adds a trickled candidate from the far end.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Creates a data channel. Must be called before the offer.
    fn create_data_channel(&self, label: &str) -> Result<DataChannel>;

    /// Watches the ICE connection state.
    fn state(&self) -> watch::Receiver<LinkState>;

    /// Returns `true` once closed.
    fn is_closed(&self) -> bool;

    /// Closes the connection.
    fn close(&self);
}

/// Creates peer links.
pub trait PeerLinkFactory: Send + Sync + 'static {
    /// Creates a link that uses `ice_servers` for connectivity checks.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying stack refuses the configuration.
    fn create(&self, ice_servers: &[IceServer]) -> Result<Arc<dyn PeerLink>>;
}
