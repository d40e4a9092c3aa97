//! Viewshare - Resilient session layer for a screen-sharing client.
//!
//! This library keeps one logical session to a sharing device alive over
//! several physical transports at once: a WebSocket relay and a direct
//! peer link. It picks the best established transport as primary, queues
//! traffic while nothing is connected, and reconnects with jittered
//! backoff.
//!
//! # Architecture
//!
//! - **Session**: queue, call table, subscriptions, method handlers,
//!   credentials and primary selection
//! - **Transport**: one shared connect/login/backoff lifecycle per link
//! - **Binding**: how one kind of link is opened and closed
//! - **PeerSession**: one offer/answer negotiation over a peer link
//!
//! Key design principles:
//!
//! - Exactly one primary transport; sends never bypass it
//! - Each call resolves exactly once: reply, remote error, timeout or shutdown
//! - Binary replies are chunked at 16000 bytes and reassembled by call id
//! - Transports hold only a weak handle to their session
//!
//! # Quick Start
//!
//! ```no_run
//! use viewshare::{Result, RpcOptions, Session, WebSocketBinding};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = Session::builder()
//!         .credentials("alice", "secret")
//!         .build()?;
//!
//!     session.add_transport(WebSocketBinding::new("wss://relay.example/ws")?)?;
//!     session.start();
//!
//!     // Queued until the relay has logged in.
//!     let screens = session
//!         .rpc("listScreens", serde_json::json!({}), RpcOptions::new())
//!         .await?
//!         .into_value()?;
//!     println!("Screens: {}", screens);
//!
//!     session.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`peer`] | Peer link abstraction and [`PeerSession`] |
//! | [`protocol`] | Text messages, binary frames, signaling envelopes |
//! | [`session`] | [`Session`] orchestrator and configuration |
//! | [`transport`] | [`Transport`] lifecycle and bindings |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing call, subscription and transport ids.
pub mod identifiers;

/// Direct peer links.
pub mod peer;

/// Wire protocol types.
pub mod protocol;

/// Session orchestration.
///
/// Use [`Session::builder()`] to create a configured session.
pub mod session;

/// Transport lifecycle and bindings.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Session types
pub use session::{
    AuthStatus, LocalState, Reply, RpcOptions, Session, SessionBuilder, SessionConfig,
    SessionHandle, Subscription,
};

// Transport types
pub use transport::{
    Outbound, PeerLinkBinding, Transport, TransportBinding, TransportState, WebSocketBinding,
};

// Peer types
pub use peer::{PeerLink, PeerLinkFactory, PeerSession};

// Protocol types
pub use protocol::{IceServer, Message, MutationEvent, MutationKind, Signal};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{CallId, PeerSessionId, SubscriptionId, TransportId};
