//! Client errors.

use std::time::Duration;

use clawlink_core::error::{
    CallError, ConnectionError, EndpointError, IdentityError, SetupCodeError,
};
use thiserror::Error;

/// Errors returned by [`GatewayClient`](crate::GatewayClient).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Connection-level failure
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The call failed (not connected, timed out, or rejected)
    #[error(transparent)]
    Call(#[from] CallError),

    /// Device identity could not be loaded or created
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Gateway URL is invalid
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// Setup code is invalid
    #[error(transparent)]
    SetupCode(#[from] SetupCodeError),

    /// The connection was torn down while the call was in flight
    #[error("request abandoned: connection closed before a response arrived")]
    RequestAbandoned,

    /// The runtime task has exited
    #[error("client runtime stopped")]
    RuntimeStopped,

    /// A wait exceeded its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl ClientError {
    /// Remediation text for errors that need operator action.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::Connection(e) => e.remediation(),
            _ => None,
        }
    }
}
