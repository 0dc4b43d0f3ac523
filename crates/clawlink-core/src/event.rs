//! Typed server-pushed events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{chat::ChatRole, error::ConnectionError, frame::EventFrame};

/// Handshake challenge event.
pub const EVENT_CHALLENGE: &str = "connect.challenge";
/// Legacy handshake completion event.
pub const EVENT_READY: &str = "connect.ready";

/// Payload of a `chat` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    /// Target session
    pub session_key: String,
    /// Streaming fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    /// Complete message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Author of `content` (assistant when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl ChatPayload {
    /// Author of a `content` message.
    pub fn role(&self) -> ChatRole {
        ChatRole::parse(self.role.as_deref())
    }
}

/// What the gateway reported on handshake completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadyInfo {
    /// Gateway version
    pub version: Option<String>,
    /// Negotiated protocol
    pub protocol: Option<u32>,
}

impl ReadyInfo {
    /// Read `version` (or `server.version`) and `protocol` from a payload.
    ///
    /// Covers both `connect.ready` and the `hello-ok` connect response.
    pub fn from_payload(payload: &Value) -> Self {
        let version = payload
            .get("version")
            .and_then(Value::as_str)
            .or_else(|| payload.pointer("/server/version").and_then(Value::as_str))
            .map(str::to_string);
        let protocol =
            payload.get("protocol").and_then(Value::as_u64).and_then(|p| u32::try_from(p).ok());

        Self { version, protocol }
    }
}

/// Classified server event.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// `connect.challenge`: sign and answer with `connect`
    Challenge {
        /// Server nonce, echoed verbatim
        nonce: String,
        /// Server timestamp, echoed verbatim
        ts: u64,
    },
    /// `connect.ready`: handshake complete
    Ready(ReadyInfo),
    /// `health` snapshot
    Health(Value),
    /// `chat` streaming update
    Chat(ChatPayload),
    /// `agent` activity
    Agent(Value),
    /// `session.created`
    SessionCreated(Value),
    /// `session.updated`
    SessionUpdated(Value),
    /// `session.deleted`
    SessionDeleted(Value),
    /// `tick` keep-alive
    Tick(Value),
    /// `presence` change
    Presence(Value),
    /// `shutdown` notice
    Shutdown(Value),
    /// Any other event name
    Unknown {
        /// Event name
        name: String,
        /// Raw payload
        payload: Value,
    },
}

impl GatewayEvent {
    /// Classify an event frame.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::MalformedMessage` if a known event lacks required
    ///   payload fields
    pub fn from_frame(frame: &EventFrame) -> Result<Self, ConnectionError> {
        let payload = frame.payload.clone().unwrap_or(Value::Null);

        let event = match frame.event.as_str() {
            EVENT_CHALLENGE => {
                let nonce = payload.get("nonce").and_then(Value::as_str);
                let ts = payload.get("ts").and_then(Value::as_u64);
                match (nonce, ts) {
                    (Some(nonce), Some(ts)) => Self::Challenge { nonce: nonce.to_string(), ts },
                    _ => {
                        return Err(ConnectionError::MalformedMessage(
                            "connect.challenge without nonce/ts".to_string(),
                        ));
                    },
                }
            },
            EVENT_READY => Self::Ready(ReadyInfo::from_payload(&payload)),
            "health" => Self::Health(payload),
            "chat" => Self::Chat(
                serde_json::from_value(payload)
                    .map_err(|e| ConnectionError::MalformedMessage(format!("chat: {e}")))?,
            ),
            "agent" => Self::Agent(payload),
            "session.created" => Self::SessionCreated(payload),
            "session.updated" => Self::SessionUpdated(payload),
            "session.deleted" => Self::SessionDeleted(payload),
            "tick" => Self::Tick(payload),
            "presence" => Self::Presence(payload),
            "shutdown" => Self::Shutdown(payload),
            name => Self::Unknown { name: name.to_string(), payload },
        };

        Ok(event)
    }

    /// Wire name of the event.
    pub fn name(&self) -> &str {
        match self {
            Self::Challenge { .. } => EVENT_CHALLENGE,
            Self::Ready(_) => EVENT_READY,
            Self::Health(_) => "health",
            Self::Chat(_) => "chat",
            Self::Agent(_) => "agent",
            Self::SessionCreated(_) => "session.created",
            Self::SessionUpdated(_) => "session.updated",
            Self::SessionDeleted(_) => "session.deleted",
            Self::Tick(_) => "tick",
            Self::Presence(_) => "presence",
            Self::Shutdown(_) => "shutdown",
            Self::Unknown { name, .. } => name.as_str(),
        }
    }
}
