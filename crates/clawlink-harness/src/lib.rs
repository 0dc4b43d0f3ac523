//! Test harness for clawlink.
//!
//! - [`SimEnv`]: deterministic Environment (seeded RNG, manual virtual clock)
//!   for driving the core state machines without real time
//! - [`MockGateway`]: a real WebSocket server speaking the gateway handshake,
//!   for end-to-end client tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod mock_gateway;
pub mod sim_env;

pub use mock_gateway::{HandshakeReply, MethodReply, MockGateway, MockGatewayConfig};
pub use sim_env::{SimEnv, SimInstant};
