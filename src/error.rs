//! Error types for the viewshare session layer.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use viewshare::{Result, Session};
//!
//! async fn example(session: &Session) -> Result<()> {
//!     let reply = session.rpc("ping", serde_json::json!({}), Default::default()).await?;
//!     println!("{reply:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Transport | [`Error::Transport`], [`Error::LoginRejected`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::ProtocolViolation`], [`Error::UnknownMethod`] |
//! | Calls | [`Error::RemoteCall`], [`Error::CallTimeout`], [`Error::SessionClosed`] |
//! | Negotiation | [`Error::Negotiation`] |
//! | External | [`Error::Json`], [`Error::WebSocket`], [`Error::Url`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::CallId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Failure Codes
// ============================================================================

/// Numeric codes attached to [`Error::Transport`] and published to observers.
pub mod code {
    /// Peer link reported a failed connectivity state.
    pub const LINK_FAILED: u32 = 1000;
    /// Peer link requested before the relay issued a login token.
    pub const NO_LOGIN_TOKEN: u32 = 1001;
    /// Offer/answer round trip failed.
    pub const NEGOTIATION_FAILED: u32 = 1002;
    /// Login acknowledgment carried an error.
    pub const LOGIN_REJECTED: u32 = 1003;
    /// Peer sent something the handshake does not allow.
    pub const PROTOCOL_VIOLATION: u32 = 1004;
    /// The binding could not open its link.
    pub const CONNECT_FAILED: u32 = 1005;
    /// The link closed underneath an open transport.
    pub const LINK_CLOSED: u32 = 1006;
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when session configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Connect, authentication or link failure on one transport.
    ///
    /// Drives the transport into backoff unless it is suspended.
    #[error("Transport error {code}: {message}")]
    Transport {
        /// Human readable failure description.
        message: String,
        /// Numeric failure code, see [`code`].
        code: u32,
    },

    /// The login acknowledgment carried an error.
    #[error("Login rejected: {message}")]
    LoginRejected {
        /// Error reported by the far end.
        message: String,
    },

    /// The link is gone.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Unexpected message shape or framing.
    #[error("Protocol violation: {message}")]
    ProtocolViolation {
        /// Description of the violation.
        message: String,
    },

    /// A call referenced a method with no registered handler.
    #[error("Not a valid RPC method: {method}")]
    UnknownMethod {
        /// The requested method name.
        method: String,
    },

    // ========================================================================
    // Call Errors
    // ========================================================================
    /// The far end reported failure for a call.
    #[error("Remote: {message}")]
    RemoteCall {
        /// Message supplied by the far end.
        message: String,
    },

    /// No terminal reply arrived before the deadline.
    #[error("Call {call_id} timed out after {timeout_ms}ms")]
    CallTimeout {
        /// The call that timed out.
        call_id: CallId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The session was shut down while the operation was outstanding.
    #[error("Session closed")]
    SessionClosed,

    // ========================================================================
    // Negotiation Errors
    // ========================================================================
    /// Offer/answer negotiation with the peer link failed.
    #[error("Negotiation failed: {message}")]
    Negotiation {
        /// Description of the negotiation failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Invalid URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>, code: u32) -> Self {
        Self::Transport {
            message: message.into(),
            code,
        }
    }

    /// Creates a login rejected error.
    #[inline]
    pub fn login_rejected(message: impl Into<String>) -> Self {
        Self::LoginRejected {
            message: message.into(),
        }
    }

    /// Creates a protocol violation error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Creates an unknown method error.
    #[inline]
    pub fn unknown_method(method: impl Into<String>) -> Self {
        Self::UnknownMethod {
            method: method.into(),
        }
    }

    /// Creates a remote call error.
    #[inline]
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteCall {
            message: message.into(),
        }
    }

    /// Creates a call timeout error.
    #[inline]
    pub fn call_timeout(call_id: CallId, timeout_ms: u64) -> Self {
        Self::CallTimeout {
            call_id,
            timeout_ms,
        }
    }

    /// Creates a negotiation error.
    #[inline]
    pub fn negotiation(message: impl Into<String>) -> Self {
        Self::Negotiation {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CallTimeout { .. })
    }

    /// Returns `true` if this error belongs to the transport layer.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::LoginRejected { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the far end reported the failure.
    #[inline]
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteCall { .. })
    }

    /// Returns the code this error is reported under when it tears a
    /// transport down.
    #[must_use]
    pub fn failure_code(&self) -> u32 {
        match self {
            Self::Transport { code, .. } => *code,
            Self::LoginRejected { .. } => code::LOGIN_REJECTED,
            Self::ProtocolViolation { .. } | Self::Json(_) => code::PROTOCOL_VIOLATION,
            Self::Negotiation { .. } => code::NEGOTIATION_FAILED,
            Self::ConnectionClosed | Self::ChannelClosed(_) => code::LINK_CLOSED,
            _ => code::CONNECT_FAILED,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
