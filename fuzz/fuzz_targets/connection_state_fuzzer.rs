//! Fuzz target for the connection state machine
//!
//! Drives one `Connection` through arbitrary interleavings of socket events,
//! inbound frames, calls, timer advances and client commands.
//!
//! # Invariants
//!
//! - NEVER panic
//! - Each resolver settles at most once
//! - `Connected` implies an open socket
//! - A closed socket has no pending calls
//! - `Disconnected` never has a reconnect scheduled

#![no_main]

use std::{collections::HashSet, time::Duration};

use arbitrary::Arbitrary;
use clawlink_core::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionState, DeviceIdentity, Environment,
    endpoint::GatewayEndpoint,
};
use clawlink_harness::SimEnv;
use libfuzzer_sys::fuzz_target;
use serde_json::{Value, json};

#[derive(Debug, Arbitrary)]
enum Op {
    Connect,
    Opened,
    Challenge { nonce: String, ts: u64 },
    Answer { ok: bool, hello: bool },
    Ready { version: String },
    Raw(String),
    Call { timeout_ms: u16 },
    Error,
    Closed { code: u16 },
    Advance { ms: u16 },
    Disconnect,
}

#[derive(Debug, Arbitrary)]
struct Scenario {
    seed: u64,
    auto_reconnect: bool,
    ops: Vec<Op>,
}

fuzz_target!(|scenario: Scenario| {
    let env = SimEnv::with_seed(scenario.seed);
    let identity = DeviceIdentity::generate(&env);
    let config = ConnectionConfig {
        auto_reconnect: scenario.auto_reconnect,
        ..ConnectionConfig::new(GatewayEndpoint::new("ws://gateway.fuzz", "token"))
    };
    let mut conn: Connection<SimEnv, u32> = Connection::new(env.clone(), config);
    let mut last_sent: Option<Value> = None;
    let mut next_resolver = 0u32;
    let mut settled = HashSet::new();

    for op in scenario.ops.into_iter().take(256) {
        let now = env.now();
        let actions = match op {
            Op::Connect => conn.connect(now, identity.clone()).unwrap_or_default(),
            Op::Opened => conn.handle_opened(now),
            Op::Challenge { nonce, ts } => {
                let frame = json!({
                    "type": "event", "event": "connect.challenge",
                    "payload": { "nonce": nonce, "ts": ts },
                });
                conn.handle_message(now, &frame.to_string())
            },
            Op::Answer { ok, hello } => {
                let id = last_sent.as_ref().map_or(Value::Null, |frame| frame["id"].clone());
                let payload = if hello { json!({ "type": "hello-ok" }) } else { json!({}) };
                let frame = json!({
                    "type": "res", "id": id, "ok": ok, "payload": payload,
                    "error": { "message": "denied" },
                });
                conn.handle_message(now, &frame.to_string())
            },
            Op::Ready { version } => {
                let frame = json!({
                    "type": "event", "event": "connect.ready", "payload": { "version": version },
                });
                conn.handle_message(now, &frame.to_string())
            },
            Op::Raw(raw) => conn.handle_message(now, &raw),
            Op::Call { timeout_ms } => {
                next_resolver += 1;
                let timeout = Duration::from_millis(u64::from(timeout_ms));
                match conn.call(now, "fuzz", &json!({}), Some(timeout), next_resolver) {
                    Ok(actions) => actions,
                    Err(rejected) => {
                        assert_eq!(rejected.resolver, next_resolver);
                        Vec::new()
                    },
                }
            },
            Op::Error => conn.handle_error(now, "fuzz"),
            Op::Closed { code } => conn.handle_closed(now, code, "fuzz"),
            Op::Advance { ms } => {
                env.advance(Duration::from_millis(u64::from(ms)));
                conn.tick(env.now())
            },
            Op::Disconnect => conn.disconnect(now),
        };

        for action in actions {
            match action {
                ConnectionAction::Send(text) => last_sent = serde_json::from_str(&text).ok(),
                ConnectionAction::Resolve { resolver, .. } => {
                    assert!(settled.insert(resolver), "resolver settled twice");
                },
                _ => {},
            }
        }

        if conn.state() == ConnectionState::Connected {
            assert!(conn.is_open());
        }
        if !conn.is_open() {
            assert_eq!(conn.pending_count(), 0);
        }
        if conn.state() == ConnectionState::Disconnected {
            assert!(!conn.reconnect_scheduled());
        }
    }
});
