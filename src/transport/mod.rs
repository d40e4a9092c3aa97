//! Transport layer.
//!
//! Every way of reaching the far end is a [`Transport`]: one shared
//! lifecycle (connect, login, backoff, reconnect) driving a pluggable
//! [`TransportBinding`] that only knows how to open and close its link.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐        ┌─────────────────────┐
//! │   Session    │ ─────► │ Transport (prio 100) │ ──► PeerLinkBinding ──► data channels
//! │  (primary =  │        └─────────────────────┘
//! │   best up)   │        ┌─────────────────────┐
//! │              │ ─────► │ Transport (prio 50)  │ ──► WebSocketBinding ──► relay
//! └──────────────┘        └─────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `backoff` | Reconnect delay with jitter |
//! | `binding` | [`TransportBinding`] trait and link halves |
//! | `lifecycle` | Shared state machine |
//! | `peer` | Direct peer-link binding |
//! | `websocket` | WebSocket relay binding |

// ============================================================================
// Submodules
// ============================================================================

/// Reconnect delay.
pub mod backoff;

/// Binding trait and link types.
pub mod binding;

/// Shared transport lifecycle.
pub mod lifecycle;

/// Direct peer-link binding.
pub mod peer;

/// WebSocket relay binding.
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::Backoff;
pub use binding::{Link, LinkEnd, LinkEvent, Outbound, TransportBinding, WirePayload};
pub use lifecycle::{Transport, TransportState};
pub use peer::PeerLinkBinding;
pub use websocket::WebSocketBinding;
