//! Wire protocol types.
//!
//! This module defines the messages exchanged between the client and the
//! far end of a transport, and the envelopes of the peer-negotiation side
//! channel.
//!
//! # Protocol Overview
//!
//! | Form | Carried on | Purpose |
//! |------|------------|---------|
//! | [`Message`] | text frames / control channel | Login, calls, pushes |
//! | [`Frame`] | binary frames / bulk channel | Chunked replies, acks |
//! | [`Signal`] | signaling side channel | Offer/answer, candidates |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Binary chunk codec and reassembly |
//! | `message` | Tagged text messages |
//! | `signal` | Negotiation envelopes |

// ============================================================================
// Submodules
// ============================================================================

/// Binary chunk codec.
pub mod frame;

/// Structured text messages.
pub mod message;

/// Negotiation envelopes.
pub mod signal;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{Frame, MAX_CHUNK_SIZE, Reassembly, chunk_reply};
pub use message::{
    IceServer, Login, LoginResponse, Message, Mutation, MutationEvent, MutationKind,
    PROTOCOL_VERSION, RpcProgress, RpcReply, RpcRequest, SetIceServers,
};
pub use signal::{IceCandidate, SdpKind, SessionDescription, Signal};
