//! Gateway wire frames.
//!
//! Every socket message is one JSON text frame. Outbound frames are always
//! requests (`type: "req"`); inbound frames are either responses
//! (`type: "res"`) or server-pushed events (`type: "event"`). Anything else is
//! malformed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConnectionError;

/// Correlation id of an outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Wrap an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Render a random `u64` as a fixed-width lowercase base-36 id.
    ///
    /// Always 13 characters, left-padded with `0`.
    pub fn from_random(mut value: u64) -> Self {
        const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
        const WIDTH: usize = 13;

        let mut buf = [b'0'; WIDTH];
        for slot in buf.iter_mut().rev() {
            *slot = DIGITS[(value % 36) as usize];
            value /= 36;
        }
        Self(buf.iter().map(|&b| char::from(b)).collect())
    }

    /// Id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outbound request frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestFrame<'a> {
    #[serde(rename = "type")]
    frame_type: &'static str,
    /// Correlation id
    pub id: &'a RequestId,
    /// Gateway method name
    pub method: &'a str,
    /// Method parameters
    pub params: &'a Value,
}

impl<'a> RequestFrame<'a> {
    /// Build a request frame.
    pub fn new(id: &'a RequestId, method: &'a str, params: &'a Value) -> Self {
        Self { frame_type: "req", id, method, params }
    }

    /// Serialize to the JSON text sent on the socket.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Error object carried by an `ok: false` response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorShape {
    /// Machine-readable code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

/// Inbound response to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Id of the matching request
    pub id: RequestId,
    /// Whether the call succeeded
    pub ok: bool,
    /// Success payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

/// Inbound server-pushed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event name, e.g. `connect.challenge`
    pub event: String,
    /// Event payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Optional sequence number (any JSON number, not interpreted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<serde_json::Number>,
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundFrame {
    /// Reply to a call
    #[serde(rename = "res")]
    Response(ResponseFrame),
    /// Server push
    #[serde(rename = "event")]
    Event(EventFrame),
}

impl InboundFrame {
    /// Parse one raw text message.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::MalformedMessage` if the text is not JSON, has no
    ///   recognizable `type`, or lacks the fields that type requires
    pub fn parse(raw: &str) -> Result<Self, ConnectionError> {
        serde_json::from_str(raw).map_err(|e| ConnectionError::MalformedMessage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_frame_shape() {
        let id = RequestId::new("abc123xyz");
        let params = json!({ "limit": 5 });
        let text = RequestFrame::new(&id, "sessions.list", &params).to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(
            value,
            json!({ "type": "req", "id": "abc123xyz", "method": "sessions.list", "params": { "limit": 5 } })
        );
    }

    #[test]
    fn random_ids_are_fixed_width_base36() {
        for value in [0, 1, 35, 36, u64::MAX, 0x1234_5678_9abc_def0] {
            let id = RequestId::from_random(value);
            assert_eq!(id.as_str().len(), 13);
            assert!(id.as_str().bytes().all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()));
        }

        assert_eq!(RequestId::from_random(0).as_str(), "0000000000000");
        assert_eq!(RequestId::from_random(35).as_str(), "000000000000z");
        assert_ne!(RequestId::from_random(1), RequestId::from_random(2));
    }

    #[test]
    fn parses_response_with_error() {
        let frame = InboundFrame::parse(
            r#"{"type":"res","id":"r1","ok":false,"error":{"code":"FORBIDDEN","message":"nope"}}"#,
        )
        .unwrap();

        match frame {
            InboundFrame::Response(res) => {
                assert_eq!(res.id.as_str(), "r1");
                assert!(!res.ok);
                assert!(res.payload.is_none());
                let error = res.error.unwrap();
                assert_eq!(error.code.as_deref(), Some("FORBIDDEN"));
                assert_eq!(error.message, "nope");
            },
            InboundFrame::Event(_) => panic!("expected response"),
        }
    }

    #[test]
    fn parses_event_without_payload() {
        let frame = InboundFrame::parse(r#"{"type":"event","event":"tick","seq":7}"#).unwrap();

        match frame {
            InboundFrame::Event(event) => {
                assert_eq!(event.event, "tick");
                assert_eq!(event.payload, None);
                assert_eq!(event.seq, Some(7.into()));
            },
            InboundFrame::Response(_) => panic!("expected event"),
        }
    }

    #[test]
    fn any_numeric_seq_is_accepted() {
        for seq in ["1.5", "-3", "0", "18446744073709551615"] {
            let raw = format!(r#"{{"type":"event","event":"health","seq":{seq}}}"#);
            let frame = InboundFrame::parse(&raw).unwrap();
            assert!(matches!(frame, InboundFrame::Event(ref e) if e.event == "health"), "seq {seq}");
        }
    }

    #[test]
    fn rejects_unknown_and_garbage_frames() {
        for raw in [
            "not json",
            "{}",
            r#"{"type":"req","id":"1","method":"x","params":{}}"#,
            r#"{"type":"res","ok":true}"#,
            r#"{"type":"event"}"#,
            "[1,2,3]",
        ] {
            let result = InboundFrame::parse(raw);
            assert!(
                matches!(result, Err(ConnectionError::MalformedMessage(_))),
                "expected malformed for {raw}"
            );
        }
    }
}
