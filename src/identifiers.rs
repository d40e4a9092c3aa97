//! Type-safe identifiers for session entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Wire form | Scope |
//! |------|-----------|-------|
//! | [`CallId`] | `u32` | One outstanding call |
//! | [`SubscriptionId`] | string | One subscribed resource |
//! | [`TransportId`] | not on the wire | One transport in a session |
//! | [`PeerSessionId`] | 32 hex digits | One negotiation attempt |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// CallId
// ============================================================================

/// Identifier correlating a call with its reply, progress and binary chunks.
///
/// Encoded as a big-endian `u32` in binary frames and as a JSON number in
/// text messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(u32);

impl CallId {
    /// Wraps a raw call id.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

/// Identifier of a subscribed resource, stable across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Creates a subscription id.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// TransportId
// ============================================================================

/// Global counter for transport ids.
static NEXT_TRANSPORT_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique identifier of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(u32);

impl TransportId {
    /// Allocates the next transport id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport-{}", self.0)
    }
}

// ============================================================================
// PeerSessionId
// ============================================================================

/// Random 128-bit identifier of one negotiation attempt.
///
/// Rendered as 32 upper-case hexadecimal digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerSessionId(String);

impl PeerSessionId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        // All 128 bits random; a v4 uuid would pin the version and variant bits.
        let mut buf = Uuid::encode_buffer();
        let hex = Uuid::from_bytes(rand::random()).simple().encode_upper(&mut buf);
        Self(hex.to_owned())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id_serializes_as_number() {
        let json = serde_json::to_string(&CallId::new(7)).expect("serialize");
        assert_eq!(json, "7");
    }

    #[test]
    fn test_transport_ids_are_unique() {
        let a = TransportId::next();
        let b = TransportId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_peer_session_id_shape() {
        let id = PeerSessionId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert!(
            id.as_str()
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        );
        assert_ne!(id, PeerSessionId::generate());
    }

    #[test]
    fn test_peer_session_id_version_nibble_is_random() {
        let nibbles: std::collections::HashSet<char> = (0..64)
            .filter_map(|_| PeerSessionId::generate().as_str().chars().nth(12))
            .collect();
        assert!(nibbles.len() > 1);
    }
}
