//! Direct peer links.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `link` | [`PeerLink`] and [`PeerLinkFactory`] traits over a WebRTC stack |
//! | `session` | [`PeerSession`], one negotiation attempt |

// ============================================================================
// Submodules
// ============================================================================

/// Peer connection abstraction.
pub mod link;

/// Negotiation attempt.
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use link::{ChannelEvent, DataChannel, LinkState, PeerLink, PeerLinkFactory};
pub use session::{Callback, PeerSession};
