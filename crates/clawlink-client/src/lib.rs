//! Client
//!
//! Async driver for the OpenClaw gateway over WebSocket.
//!
//! # Architecture
//!
//! The protocol lives in the Sans-IO [`clawlink_core::Connection`]. This crate
//! supplies the I/O around it: a tokio task that owns the connection, opens
//! sockets when asked, feeds socket events and timer expiries back in, and
//! executes the actions that come out.
//!
//! # Components
//!
//! - [`GatewayClient`]: cloneable handle to the runtime task
//! - [`Transport`]: one WebSocket bridged to channels
//! - [`SystemEnv`]: tokio time and OS randomness
//! - [`ClientEvent`]: what subscribers receive

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
mod event;
mod system_env;
pub mod transport;

pub use client::{CHAT_SEND_METHOD, GatewayClient};
pub use error::ClientError;
pub use event::ClientEvent;
pub use system_env::SystemEnv;
pub use transport::{Transport, TransportError, TransportEvent, TransportNotice};
