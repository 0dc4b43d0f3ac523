//! Events broadcast to subscribers.

use clawlink_core::{ConnectionState, GatewayEvent, chat::ChatUpdate};
use serde_json::Value;

/// Something observers may care about.
///
/// Delivered through a `tokio::sync::broadcast` channel. Slow subscribers
/// can lag and miss events; the latest state is always available from
/// [`GatewayClient::status`](crate::GatewayClient::status).
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Connection state changed
    StateChanged(ConnectionState),

    /// Push event from the gateway (handshake events excluded)
    Gateway(GatewayEvent),

    /// A chat transcript changed
    ChatUpdated(ChatUpdate),

    /// The session list was refreshed
    SessionsRefreshed(Vec<Value>),
}
