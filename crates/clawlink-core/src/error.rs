//! Error types for the gateway client core.
//!
//! Strongly-typed errors per layer: connection errors (handshake, timeout,
//! close policy), call errors (one in-flight request), identity errors (key
//! material and storage), and parse errors for endpoints and setup codes.
//!
//! Connection errors never escape the message handlers as `Err`. They are
//! recorded as the connection's `last_error` and in the diagnostics log.

use std::time::Duration;

use thiserror::Error;

/// Steps an operator follows when the gateway closes with 1008.
pub const PAIRING_REMEDIATION: &str = "This device is not approved yet. 1) On the gateway host, \
                                       list pending requests with `openclaw devices list`. 2) \
                                       Approve this device with `openclaw devices approve \
                                       <requestId>`, then reconnect.";

/// Connection-level failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Attempted to send with no open transport
    #[error("not connected to gateway")]
    NotConnected,

    /// Establishment timer fired before the handshake completed
    #[error("connection timeout after {elapsed:?}")]
    ConnectionTimeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Could not produce the handshake signature
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Gateway answered the connect request with `ok: false`
    #[error("handshake rejected: {message}")]
    HandshakeRejected {
        /// Server-supplied `error.message`, verbatim
        message: String,
    },

    /// Gateway closed with 1008: the device must be approved out-of-band
    #[error("device pairing required: {reason}")]
    PairingRequired {
        /// Close reason sent by the gateway
        reason: String,
    },

    /// Inbound frame could not be parsed
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Socket closed abnormally, or cleanly before the handshake completed
    #[error("connection closed (code {code}): {reason}")]
    Closed {
        /// WebSocket close code
        code: u16,
        /// Close reason
        reason: String,
    },

    /// Underlying socket error
    #[error("transport error: {0}")]
    Transport(String),

    /// Gateway URL could not be normalized
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl ConnectionError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Pairing and rejection need operator action first; they are never
    /// transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. } | Self::Closed { .. } | Self::Transport(_))
    }

    /// Actionable remediation text, if this error has one.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::PairingRequired { .. } => Some(PAIRING_REMEDIATION),
            _ => None,
        }
    }
}

impl From<EndpointError> for ConnectionError {
    fn from(err: EndpointError) -> Self {
        Self::InvalidEndpoint(err.to_string())
    }
}

/// Failure of a single in-flight call.
///
/// Local to that call; the connection itself stays healthy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Transport was not open when the call was issued
    #[error("not connected to gateway")]
    NotConnected,

    /// No response arrived before the deadline
    #[error("request timeout: {method}")]
    RequestTimeout {
        /// Method of the timed-out call
        method: String,
    },

    /// Gateway answered with `ok: false`
    #[error("request rejected: {message}")]
    Rejected {
        /// Machine-readable error code, if the gateway sent one
        code: Option<String>,
        /// Human-readable error message
        message: String,
    },

    /// Request frame could not be serialized
    #[error("could not encode request: {0}")]
    Encode(String),
}

/// Device identity failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Identity has no private key to sign with
    #[error("signing unavailable: no private key")]
    SigningUnavailable,

    /// Key material did not decode into a valid Ed25519 key
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Persisted identity exists but cannot be imported
    #[error("corrupt identity: {0}")]
    Corrupt(String),

    /// Storage backend failed (I/O, permissions)
    #[error("identity storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for IdentityError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Gateway URL normalization failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// URL was empty after trimming
    #[error("gateway url is empty")]
    Empty,

    /// Scheme other than ws, wss, http or https
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// URL did not parse
    #[error("unparseable url: {0}")]
    Parse(String),
}

/// Setup-code decoding failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetupCodeError {
    /// Body is not valid base64 in any accepted alphabet
    #[error("setup code is not base64")]
    Base64,

    /// Decoded bytes are not the expected JSON object
    #[error("setup code json: {0}")]
    Json(String),

    /// Decoded object has an empty url
    #[error("setup code has no gateway url")]
    MissingUrl,
}
