//! Structured (text) wire messages.
//!
//! Every text message is a JSON object whose `op` field selects the kind.
//! Unknown `op` values decode to [`Message::Unknown`] so that newer peers
//! can add kinds without tearing established connections down.
//!
//! | `op` | Direction | Payload |
//! |------|-----------|---------|
//! | `login` | client → peer | [`Login`] |
//! | `loginresponse` | peer → client | [`LoginResponse`] |
//! | `rpc` | both | [`RpcRequest`] |
//! | `rpcreply` | both | [`RpcReply`] |
//! | `rpcprogress` | peer → client | [`RpcProgress`] |
//! | `additem` `delitem` `moveitem` `updatefield` `subsync` | peer → client | [`Mutation`] |
//! | `setIceServers` | peer → client | [`SetIceServers`] |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::identifiers::{CallId, SubscriptionId};

// ============================================================================
// Constants
// ============================================================================

/// Protocol version announced in [`Login`].
pub const PROTOCOL_VERSION: u32 = 1;

// ============================================================================
// Message
// ============================================================================

/// A structured message, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Message {
    /// Login request, always the first message sent on a link.
    #[serde(rename = "login")]
    Login(Login),

    /// Login acknowledgment, always the first message received.
    #[serde(rename = "loginresponse")]
    LoginResponse(LoginResponse),

    /// Call request.
    #[serde(rename = "rpc")]
    Rpc(RpcRequest),

    /// Terminal call reply.
    #[serde(rename = "rpcreply")]
    RpcReply(RpcReply),

    /// Non-terminal call progress.
    #[serde(rename = "rpcprogress")]
    RpcProgress(RpcProgress),

    /// Item added to a subscribed collection.
    #[serde(rename = "additem")]
    AddItem(Mutation),

    /// Item removed from a subscribed collection.
    #[serde(rename = "delitem")]
    DelItem(Mutation),

    /// Item moved within a subscribed collection.
    #[serde(rename = "moveitem")]
    MoveItem(Mutation),

    /// Field of a subscribed item updated.
    #[serde(rename = "updatefield")]
    UpdateField(Mutation),

    /// Full resync of a subscribed resource.
    #[serde(rename = "subsync")]
    SubSync(Mutation),

    /// Replacement ICE server list.
    #[serde(rename = "setIceServers")]
    SetIceServers(SetIceServers),

    /// Any `op` this client does not know.
    #[serde(other)]
    Unknown,
}

impl Message {
    /// Decodes a message from its JSON text form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the text is not a
    /// JSON object with a string `op`.
    pub fn from_text(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encodes the message as JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if serialization fails.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the wire tag of this message.
    #[must_use]
    pub fn op(&self) -> &'static str {
        match self {
            Self::Login(_) => "login",
            Self::LoginResponse(_) => "loginresponse",
            Self::Rpc(_) => "rpc",
            Self::RpcReply(_) => "rpcreply",
            Self::RpcProgress(_) => "rpcprogress",
            Self::AddItem(_) => "additem",
            Self::DelItem(_) => "delitem",
            Self::MoveItem(_) => "moveitem",
            Self::UpdateField(_) => "updatefield",
            Self::SubSync(_) => "subsync",
            Self::SetIceServers(_) => "setIceServers",
            Self::Unknown => "unknown",
        }
    }

    /// Splits a mutation message into its kind and body.
    ///
    /// Returns `None` for non-mutation messages.
    #[must_use]
    pub fn into_mutation(self) -> Option<MutationEvent> {
        let (kind, mutation) = match self {
            Self::AddItem(m) => (MutationKind::AddItem, m),
            Self::DelItem(m) => (MutationKind::DelItem, m),
            Self::MoveItem(m) => (MutationKind::MoveItem, m),
            Self::UpdateField(m) => (MutationKind::UpdateField, m),
            Self::SubSync(m) => (MutationKind::SubSync, m),
            _ => return None,
        };
        Some(MutationEvent {
            kind,
            subid: mutation.subid,
            payload: mutation.payload,
        })
    }
}

// ============================================================================
// Login
// ============================================================================

/// Login request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    /// Protocol version, see [`PROTOCOL_VERSION`].
    pub version: u32,

    /// Account name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Account password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Token issued by an earlier successful login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Login acknowledgment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Present when the login was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Fresh reusable token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Identifier the far end assigned to this client.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub id: Value,

    /// ICE servers to use for peer links.
    #[serde(
        rename = "iceServers",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ice_servers: Option<Vec<IceServer>>,
}

impl LoginResponse {
    /// Returns the assigned peer id rendered as a string.
    ///
    /// The far end may send either a string or a number.
    #[must_use]
    pub fn peer_id(&self) -> Option<String> {
        match &self.id {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

// ============================================================================
// RPC
// ============================================================================

/// Call request.
///
/// A request without `rpcid` expects no reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id, absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpcid: Option<CallId>,

    /// Method name.
    pub method: String,

    /// Method arguments.
    #[serde(default)]
    pub args: Value,
}

/// Terminal call reply carrying either `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcReply {
    /// Correlation id.
    pub rpcid: CallId,

    /// Success value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcReply {
    /// Creates a success reply.
    #[inline]
    #[must_use]
    pub fn success(rpcid: CallId, result: Value) -> Self {
        Self {
            rpcid,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error reply.
    #[inline]
    #[must_use]
    pub fn failure(rpcid: CallId, error: impl Into<String>) -> Self {
        Self {
            rpcid,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Progress notification for an outstanding call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcProgress {
    /// Correlation id.
    pub rpcid: CallId,

    /// Progress status reported by the far end.
    #[serde(default)]
    pub status: Value,

    /// Progress value reported by the far end.
    #[serde(default)]
    pub value: Value,
}

// ============================================================================
// Mutations
// ============================================================================

/// Body shared by all mutation kinds.
///
/// Everything besides `subid` is kept verbatim for the subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Target subscription.
    pub subid: SubscriptionId,

    /// Kind-specific fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

/// Mutation discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    /// `additem`
    AddItem,
    /// `delitem`
    DelItem,
    /// `moveitem`
    MoveItem,
    /// `updatefield`
    UpdateField,
    /// `subsync`
    SubSync,
}

/// A mutation ready for delivery to a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEvent {
    /// Mutation kind.
    pub kind: MutationKind,
    /// Target subscription.
    pub subid: SubscriptionId,
    /// Kind-specific fields.
    pub payload: Map<String, Value>,
}

// ============================================================================
// ICE configuration
// ============================================================================

/// Replacement ICE server list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetIceServers {
    /// New servers.
    #[serde(rename = "iceServers")]
    pub ice_servers: Vec<IceServer>,
}

/// One STUN/TURN server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs, a single string on the wire is accepted too.
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,

    /// TURN username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// TURN credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Creates an entry for a single URL without credentials.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_login_serialization_omits_missing_credentials() {
        let login = Message::Login(Login {
            version: PROTOCOL_VERSION,
            username: Some("alice".into()),
            password: Some("secret".into()),
            token: None,
        });
        let value: Value = serde_json::from_str(&login.to_text().expect("encode")).expect("json");

        assert_eq!(
            value,
            json!({"op": "login", "version": 1, "username": "alice", "password": "secret"})
        );
    }

    #[test]
    fn test_login_response_parsing() {
        let text = r#"{
            "op": "loginresponse",
            "token": "t-1",
            "id": 42,
            "iceServers": [{"urls": "stun:stun.l.google.com:19302"}]
        }"#;

        let Message::LoginResponse(resp) = Message::from_text(text).expect("parse") else {
            panic!("expected loginresponse");
        };
        assert_eq!(resp.error, None);
        assert_eq!(resp.token.as_deref(), Some("t-1"));
        assert_eq!(resp.peer_id().as_deref(), Some("42"));
        let servers = resp.ice_servers.expect("ice servers");
        assert_eq!(servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
    }

    #[test]
    fn test_rpc_without_id_is_notification() {
        let text = r#"{"op": "rpc", "method": "refresh", "args": {"full": true}}"#;
        let Message::Rpc(req) = Message::from_text(text).expect("parse") else {
            panic!("expected rpc");
        };
        assert_eq!(req.rpcid, None);
        assert_eq!(req.method, "refresh");
        assert_eq!(req.args, json!({"full": true}));
    }

    #[test]
    fn test_rpc_reply_shapes() {
        let ok = Message::RpcReply(RpcReply::success(CallId::new(3), json!("pong")));
        let value: Value = serde_json::from_str(&ok.to_text().expect("encode")).expect("json");
        assert_eq!(value, json!({"op": "rpcreply", "rpcid": 3, "result": "pong"}));

        let err = Message::RpcReply(RpcReply::failure(CallId::new(4), "boom"));
        let value: Value = serde_json::from_str(&err.to_text().expect("encode")).expect("json");
        assert_eq!(value, json!({"op": "rpcreply", "rpcid": 4, "error": "boom"}));
    }

    #[test]
    fn test_mutation_keeps_payload() {
        let text = r#"{"op": "moveitem", "subid": "devices", "from": 1, "to": 3}"#;
        let event = Message::from_text(text)
            .expect("parse")
            .into_mutation()
            .expect("mutation");

        assert_eq!(event.kind, MutationKind::MoveItem);
        assert_eq!(event.subid.as_str(), "devices");
        assert_eq!(event.payload.get("from"), Some(&json!(1)));
        assert_eq!(event.payload.get("to"), Some(&json!(3)));
        assert!(!event.payload.contains_key("op"));
    }

    #[test]
    fn test_unknown_op() {
        let msg = Message::from_text(r#"{"op": "futurething", "x": 1}"#).expect("parse");
        assert_eq!(msg, Message::Unknown);
        assert!(msg.into_mutation().is_none());
    }

    #[test]
    fn test_missing_op_is_error() {
        assert!(Message::from_text(r#"{"method": "x"}"#).is_err());
        assert!(Message::from_text("not json").is_err());
    }
}
