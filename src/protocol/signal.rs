//! Peer-negotiation envelopes exchanged over the signaling side channel.
//!
//! ```json
//! { "sdp": { "type": "offer", "sdp": "v=0..." } }
//! { "candidate": { "candidate": "candidate:1 1 UDP ...", "sdpMid": "0", "sdpMLineIndex": 0 } }
//! { "closeConnection": true }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ============================================================================
// Signal
// ============================================================================

/// One signaling envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Signal {
    /// Offer or answer.
    Sdp(SessionDescription),
    /// Trickled ICE candidate.
    Candidate(IceCandidate),
    /// Far end hung up.
    CloseConnection(bool),
}

impl Signal {
    /// Decodes an envelope from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) for unknown envelopes.
    pub fn from_text(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encodes the envelope as JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if serialization fails.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// SessionDescription
// ============================================================================

/// Offer/answer description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description kind.
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// SDP text.
    pub sdp: String,
}

impl SessionDescription {
    /// Creates an offer.
    #[inline]
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Creates an answer.
    #[inline]
    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Description kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Offer.
    Offer,
    /// Provisional answer.
    Pranswer,
    /// Final answer.
    Answer,
    /// Rollback.
    Rollback,
}

// ============================================================================
// IceCandidate
// ============================================================================

/// Trickled ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate line.
    pub candidate: String,
    /// Media stream identification tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Media line index.
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

// ============================================================================
// Tests
// ============================================================================
