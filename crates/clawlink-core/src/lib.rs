//! Core
//!
//! Sans-IO state machines for the OpenClaw gateway client protocol. Nothing in
//! this crate opens a socket or spawns a task: methods take the current time
//! and return actions for a driver to execute.
//!
//! # Components
//!
//! - [`identity`]: Ed25519 device identity, its storage, and challenge signing
//! - [`frame`]: JSON wire frames (`req`, `res`, `event`)
//! - [`endpoint`] / [`setup_code`]: gateway URL normalization and pairing codes
//! - [`params`]: the `connect` handshake payload
//! - [`connection`]: socket phase, handshake, timers, and reconnect policy
//! - [`multiplexer`]: request correlation and per-call deadlines
//! - [`event`] / [`dispatcher`] / [`chat`]: push event routing and transcripts
//! - [`diagnostics`]: bounded lifecycle trail mirrored to `tracing`
//! - [`env`]: injectable time and randomness

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod chat;
pub mod connection;
pub mod diagnostics;
pub mod dispatcher;
pub mod endpoint;
pub mod env;
pub mod error;
pub mod event;
pub mod frame;
pub mod identity;
pub mod multiplexer;
pub mod params;
pub mod setup_code;

pub use connection::{
    CallRejected, Connection, ConnectionAction, ConnectionConfig, ConnectionState, ConnectionStatus,
};
pub use env::Environment;
pub use error::{CallError, ConnectionError, EndpointError, IdentityError, SetupCodeError};
pub use event::GatewayEvent;
pub use identity::{DeviceIdentity, FileStorage, IdentityStorage, IdentityStore, MemoryStorage};
