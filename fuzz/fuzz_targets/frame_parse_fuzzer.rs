//! Fuzz target for inbound frame parsing
//!
//! # Strategy
//!
//! - Raw text: arbitrary UTF-8 straight into the parser
//! - Shaped JSON: well-formed envelopes with fuzzed field values, so the
//!   fuzzer spends time past the JSON tokenizer
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - Every parsed event classifies without panicking
//! - A challenge classifies only if it carried a string nonce

#![no_main]

use arbitrary::Arbitrary;
use clawlink_core::{event::GatewayEvent, frame::InboundFrame};
use libfuzzer_sys::fuzz_target;
use serde_json::json;

#[derive(Debug, Arbitrary)]
enum Input {
    Raw(String),
    Response { id: String, ok: bool, code: Option<String>, message: String },
    Event { name: String, nonce: Option<String>, ts: u64, seq: Option<i64> },
    Chat { session_key: Option<String>, delta: Option<String>, role: Option<String> },
}

fuzz_target!(|input: Input| {
    let raw = match input {
        Input::Raw(raw) => raw,
        Input::Response { id, ok, code, message } => json!({
            "type": "res", "id": id, "ok": ok,
            "error": { "code": code, "message": message },
        })
        .to_string(),
        Input::Event { name, nonce, ts, seq } => json!({
            "type": "event", "event": name, "seq": seq,
            "payload": { "nonce": nonce, "ts": ts },
        })
        .to_string(),
        Input::Chat { session_key, delta, role } => json!({
            "type": "event", "event": "chat",
            "payload": { "sessionKey": session_key, "delta": delta, "role": role },
        })
        .to_string(),
    };

    if let Ok(InboundFrame::Event(frame)) = InboundFrame::parse(&raw) {
        if let Ok(GatewayEvent::Challenge { nonce, .. }) = GatewayEvent::from_frame(&frame) {
            assert!(frame.payload.as_ref().is_some_and(|p| p["nonce"] == nonce.as_str()));
        }
    }
});
