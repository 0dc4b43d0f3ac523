//! Gateway connection state machine.
//!
//! Owns the socket phase, the handshake, the establishment timer, the pending
//! call table, and the reconnect schedule for one logical connection. Uses the
//! action pattern: every method takes `now` and returns the
//! [`ConnectionAction`]s the driver must execute. Nothing here touches a
//! socket, a timer, or a task.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ connect ┌────────────┐ challenge ┌────────────┐ connect sent ┌────────────────┐
//! │ Idle │────────>│ Connecting │──────────>│ Challenged │─────────────>│ Authenticating │
//! └──────┘         └────────────┘           └────────────┘              └────────────────┘
//!                        │                        │                             │ ready /
//!                        │ close/error/timeout    │ signing failed              │ hello-ok
//!                        ↓                        ↓                             ↓
//!                   ┌───────┐<──────────────────────────── abnormal close ┌───────────┐
//!                   │ Error │                                              │ Connected │
//!                   └───────┘                  ┌──────────────┐ 1000 close └───────────┘
//!                                              │ Disconnected │<──────────────────┘
//!                                              └──────────────┘
//! ```
//!
//! `Error` and `Disconnected` are re-enterable through a fresh
//! [`Connection::connect`].

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::{
    diagnostics::{DEFAULT_DIAGNOSTICS_CAPACITY, DiagnosticsLog, Severity},
    endpoint::GatewayEndpoint,
    env::Environment,
    error::{CallError, ConnectionError},
    event::{GatewayEvent, ReadyInfo},
    frame::{InboundFrame, RequestFrame, RequestId, ResponseFrame},
    identity::DeviceIdentity,
    multiplexer::Multiplexer,
    params::{AuthParams, ClientProfile, ConnectParams, DeviceProof},
};

/// Time allowed from `open` to handshake completion.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-call timeout when the caller gives none.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before an automatic reconnect.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Closed without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Policy violation: the device must be approved before retrying.
pub const CLOSE_PAIRING_REQUIRED: u16 = 1008;

/// Handshake method name.
pub const CONNECT_METHOD: &str = "connect";

const REASON_CLIENT_DISCONNECT: &str = "Client disconnect";
const REASON_CONNECT_TIMEOUT: &str = "Connection timeout";
const REASON_SIGNING_FAILED: &str = "Signing failed";

/// Actions returned by the connection state machine.
///
/// The driver executes these in order:
/// - `Open`: close any current socket, open a new one to `url`
/// - `Send`: write the text frame on the current socket
/// - `Close`: close the current socket with `code` and `reason`
/// - `Resolve`: complete the caller behind `resolver`
/// - `Event`: hand a push event to the dispatcher
/// - `StateChanged`: publish the new state
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionAction<R> {
    /// Open a socket
    Open {
        /// Normalized URL, token included
        url: Url,
    },

    /// Send a text frame
    Send(String),

    /// Close the socket locally
    Close {
        /// WebSocket close code
        code: u16,
        /// Close reason
        reason: String,
    },

    /// Complete a caller
    Resolve {
        /// Continuation registered with [`Connection::call`]
        resolver: R,
        /// Response payload or per-call failure
        outcome: Result<Value, CallError>,
    },

    /// Push event received while connected
    Event(GatewayEvent),

    /// Observable state changed
    StateChanged(ConnectionState),
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Never connected
    #[default]
    Idle,
    /// Socket opening, waiting for the challenge
    Connecting,
    /// Challenge received, signing
    Challenged,
    /// Signed `connect` sent, waiting for acceptance
    Authenticating,
    /// Handshake complete
    Connected,
    /// Attempt failed or connection dropped
    Error,
    /// Closed cleanly
    Disconnected,
}

impl ConnectionState {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Challenged => "challenged",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Disconnected => "disconnected",
        }
    }

    /// Whether a handshake is underway.
    pub fn is_handshaking(self) -> bool {
        matches!(self, Self::Connecting | Self::Challenged | Self::Authenticating)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Gateway location and credentials
    pub endpoint: GatewayEndpoint,
    /// Handshake identity of this client
    pub profile: ClientProfile,
    /// Establishment timeout
    pub connect_timeout: Duration,
    /// Default per-call timeout
    pub request_timeout: Duration,
    /// Reconnect after abnormal closes
    pub auto_reconnect: bool,
    /// Delay before reconnecting
    pub reconnect_delay: Duration,
    /// Diagnostics entries kept (`None` keeps all)
    pub diagnostics_capacity: Option<usize>,
}

impl ConnectionConfig {
    /// Default configuration for an endpoint.
    pub fn new(endpoint: GatewayEndpoint) -> Self {
        Self { endpoint, ..Self::default() }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: GatewayEndpoint::default(),
            profile: ClientProfile::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            auto_reconnect: false,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            diagnostics_capacity: Some(DEFAULT_DIAGNOSTICS_CAPACITY),
        }
    }
}

/// Observable snapshot of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Current state
    pub state: ConnectionState,
    /// Version reported by the gateway
    pub gateway_version: Option<String>,
    /// Negotiated protocol
    pub protocol: Option<u32>,
    /// Most recent connection-level error
    pub last_error: Option<ConnectionError>,
}

/// A call refused before anything was sent. Hands the resolver back.
#[derive(Debug)]
pub struct CallRejected<R> {
    /// The caller's continuation, untouched
    pub resolver: R,
    /// Why the call was refused
    pub error: CallError,
}

#[derive(Debug)]
enum Waiter<R> {
    Handshake,
    Caller(R),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketPhase {
    Closed,
    Opening,
    Open,
}

/// Connection state machine.
///
/// Generic over the environment (time, randomness) and over `R`, the
/// continuation type callers register. Production uses a oneshot sender.
pub struct Connection<E: Environment, R> {
    env: E,
    config: ConnectionConfig,
    state: ConnectionState,
    socket: SocketPhase,
    identity: Option<DeviceIdentity>,
    pending: Multiplexer<E::Instant, Waiter<R>>,
    handshake_request: Option<RequestId>,
    handshake_started: Option<E::Instant>,
    handshake_deadline: Option<E::Instant>,
    reconnect_at: Option<E::Instant>,
    gateway_version: Option<String>,
    protocol: Option<u32>,
    last_error: Option<ConnectionError>,
    diagnostics: DiagnosticsLog,
}

impl<E: Environment, R> Connection<E, R> {
    /// Create an idle connection.
    pub fn new(env: E, config: ConnectionConfig) -> Self {
        let diagnostics = DiagnosticsLog::with_capacity(config.diagnostics_capacity);
        Self {
            env,
            config,
            state: ConnectionState::Idle,
            socket: SocketPhase::Closed,
            identity: None,
            pending: Multiplexer::new(),
            handshake_request: None,
            handshake_started: None,
            handshake_deadline: None,
            reconnect_at: None,
            gateway_version: None,
            protocol: None,
            last_error: None,
            diagnostics,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Gateway version from the last completed handshake.
    pub fn gateway_version(&self) -> Option<&str> {
        self.gateway_version.as_deref()
    }

    /// Protocol from the last completed handshake.
    pub fn protocol(&self) -> Option<u32> {
        self.protocol
    }

    /// Most recent connection-level error.
    pub fn last_error(&self) -> Option<&ConnectionError> {
        self.last_error.as_ref()
    }

    /// Diagnostics trail.
    pub fn diagnostics(&self) -> &DiagnosticsLog {
        &self.diagnostics
    }

    /// Number of calls awaiting a response (the handshake included).
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Identity used for the current or last attempt.
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// Configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Whether frames can be sent right now.
    pub fn is_open(&self) -> bool {
        self.socket == SocketPhase::Open
    }

    /// Whether a reconnect is scheduled.
    pub fn reconnect_scheduled(&self) -> bool {
        self.reconnect_at.is_some()
    }

    /// Snapshot for observers.
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            gateway_version: self.gateway_version.clone(),
            protocol: self.protocol,
            last_error: self.last_error.clone(),
        }
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self) -> Option<E::Instant> {
        [self.handshake_deadline, self.pending.next_deadline(), self.reconnect_at]
            .into_iter()
            .flatten()
            .min()
    }

    /// Start a fresh connection attempt.
    ///
    /// Any current socket is closed first (1000, "Client disconnect") and its
    /// pending calls are dropped unresolved. Arms the establishment timer.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidEndpoint` if the configured URL cannot be
    ///   normalized. The state becomes `Error`.
    pub fn connect(
        &mut self,
        now: E::Instant,
        identity: DeviceIdentity,
    ) -> Result<Vec<ConnectionAction<R>>, ConnectionError> {
        let mut actions = Vec::new();
        self.reconnect_at = None;

        if self.socket != SocketPhase::Closed {
            self.note(Severity::Info, "replacing existing socket");
            actions.push(ConnectionAction::Close {
                code: CLOSE_NORMAL,
                reason: REASON_CLIENT_DISCONNECT.to_string(),
            });
        }
        self.teardown();

        let url = match self.config.endpoint.socket_url() {
            Ok(url) => url,
            Err(e) => {
                let error = ConnectionError::from(e);
                self.note(Severity::Error, error.to_string());
                self.last_error = Some(error.clone());
                self.transition(ConnectionState::Error, &mut actions);
                return Err(error);
            },
        };

        self.identity = Some(identity);
        self.gateway_version = None;
        self.protocol = None;
        self.last_error = None;
        self.socket = SocketPhase::Opening;
        self.handshake_started = Some(now);
        self.handshake_deadline = Some(now + self.config.connect_timeout);

        self.note(Severity::Info, format!("connecting to {}", redacted(&url)));
        self.transition(ConnectionState::Connecting, &mut actions);
        actions.push(ConnectionAction::Open { url });
        Ok(actions)
    }

    /// The socket finished opening.
    pub fn handle_opened(&mut self, _now: E::Instant) -> Vec<ConnectionAction<R>> {
        if self.socket != SocketPhase::Opening {
            return Vec::new();
        }
        self.socket = SocketPhase::Open;
        self.note(Severity::Info, "socket open, awaiting challenge");
        Vec::new()
    }

    /// One raw text message arrived.
    ///
    /// Malformed input is logged and dropped.
    pub fn handle_message(&mut self, now: E::Instant, raw: &str) -> Vec<ConnectionAction<R>> {
        if self.socket == SocketPhase::Closed {
            return Vec::new();
        }

        let frame = match InboundFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.note(Severity::Warn, e.to_string());
                return Vec::new();
            },
        };

        match frame {
            InboundFrame::Response(response) => self.handle_response(now, response),
            InboundFrame::Event(frame) => match GatewayEvent::from_frame(&frame) {
                Ok(event) => self.handle_event(now, event),
                Err(e) => {
                    self.note(Severity::Warn, format!("{} event: {e}", frame.event));
                    Vec::new()
                },
            },
        }
    }

    /// The socket reported an error. A close notification follows.
    pub fn handle_error(&mut self, _now: E::Instant, message: &str) -> Vec<ConnectionAction<R>> {
        if self.socket == SocketPhase::Closed {
            return Vec::new();
        }

        let mut actions = Vec::new();
        let error = ConnectionError::Transport(message.to_string());
        self.note(Severity::Error, error.to_string());
        if !matches!(self.last_error, Some(ConnectionError::HandshakeRejected { .. })) {
            self.last_error = Some(error);
        }
        if self.state != ConnectionState::Connected {
            self.transition(ConnectionState::Error, &mut actions);
        }
        actions
    }

    /// The socket closed.
    ///
    /// Drops every pending call unresolved. 1008 reports `PairingRequired`
    /// and never reconnects. 1000 after the handshake is a clean disconnect.
    /// Anything else is abnormal and may schedule a reconnect.
    pub fn handle_closed(
        &mut self,
        now: E::Instant,
        code: u16,
        reason: &str,
    ) -> Vec<ConnectionAction<R>> {
        if self.socket == SocketPhase::Closed {
            return Vec::new();
        }

        let mut actions = Vec::new();
        let was_connected = self.state == ConnectionState::Connected;
        self.teardown();

        if code == CLOSE_PAIRING_REQUIRED {
            let error = ConnectionError::PairingRequired { reason: reason.to_string() };
            self.note(Severity::Error, format!("{error}. {}", crate::error::PAIRING_REMEDIATION));
            self.last_error = Some(error);
            self.transition(ConnectionState::Error, &mut actions);
            return actions;
        }

        if code == CLOSE_NORMAL && was_connected {
            self.note(Severity::Info, format!("connection closed normally: {reason}"));
            self.transition(ConnectionState::Disconnected, &mut actions);
            return actions;
        }

        let error = ConnectionError::Closed { code, reason: reason.to_string() };
        self.note(Severity::Error, error.to_string());
        if !matches!(self.last_error, Some(ConnectionError::HandshakeRejected { .. })) {
            self.last_error = Some(error);
        }
        self.transition(ConnectionState::Error, &mut actions);

        if code != CLOSE_NORMAL {
            self.schedule_reconnect(now);
        }
        actions
    }

    /// Issue a call.
    ///
    /// `timeout` overrides the configured request timeout for this call only.
    ///
    /// # Errors
    ///
    /// - `CallError::NotConnected` if the socket is not open
    /// - `CallError::Encode` if the frame could not be serialized
    ///
    /// Both hand the resolver back untouched.
    pub fn call(
        &mut self,
        now: E::Instant,
        method: &str,
        params: &Value,
        timeout: Option<Duration>,
        resolver: R,
    ) -> Result<Vec<ConnectionAction<R>>, CallRejected<R>> {
        if self.socket != SocketPhase::Open {
            self.note(Severity::Warn, format!("{method} refused: {}", CallError::NotConnected));
            return Err(CallRejected { resolver, error: CallError::NotConnected });
        }

        let id = self.pending.next_id(&self.env);
        let text = match RequestFrame::new(&id, method, params).to_text() {
            Ok(text) => text,
            Err(e) => {
                let error = CallError::Encode(e.to_string());
                self.note(Severity::Warn, format!("{method} refused: {error}"));
                return Err(CallRejected { resolver, error });
            },
        };

        let deadline = now + timeout.unwrap_or(self.config.request_timeout);
        if let Err(Waiter::Caller(resolver)) =
            self.pending.insert(id.clone(), method, deadline, Waiter::Caller(resolver))
        {
            return Err(CallRejected {
                resolver,
                error: CallError::Encode(format!("duplicate request id {id}")),
            });
        }

        tracing::debug!(%method, %id, "sending request");
        Ok(vec![ConnectionAction::Send(text)])
    }

    /// Close on purpose.
    ///
    /// Idempotent. Cancels every timer (including a scheduled reconnect),
    /// drops pending calls unresolved, closes the socket with 1000, and lands
    /// in `Disconnected`.
    pub fn disconnect(&mut self, _now: E::Instant) -> Vec<ConnectionAction<R>> {
        let mut actions = Vec::new();
        let had_reconnect = self.reconnect_at.take().is_some();

        if self.socket != SocketPhase::Closed {
            actions.push(ConnectionAction::Close {
                code: CLOSE_NORMAL,
                reason: REASON_CLIENT_DISCONNECT.to_string(),
            });
        }
        self.teardown();

        if self.state != ConnectionState::Disconnected || had_reconnect {
            self.note(Severity::Info, "disconnected by client");
        }
        self.transition(ConnectionState::Disconnected, &mut actions);
        actions
    }

    /// Fire every deadline at or before `now`.
    ///
    /// Order: establishment timeout, call timeouts (earliest first), then a
    /// due reconnect.
    pub fn tick(&mut self, now: E::Instant) -> Vec<ConnectionAction<R>> {
        let mut actions = Vec::new();

        if let Some(deadline) = self.handshake_deadline
            && now >= deadline
        {
            self.fire_connect_timeout(now, &mut actions);
        }

        for (id, pending) in self.pending.expire(now) {
            match pending.waiter {
                Waiter::Caller(resolver) => {
                    let error = CallError::RequestTimeout { method: pending.method };
                    self.note(Severity::Warn, format!("{error} (id {id})"));
                    actions.push(ConnectionAction::Resolve { resolver, outcome: Err(error) });
                },
                Waiter::Handshake => {
                    if self.handshake_request.as_ref() == Some(&id) {
                        self.handshake_request = None;
                    }
                },
            }
        }

        if let Some(at) = self.reconnect_at
            && now >= at
        {
            self.reconnect_at = None;
            if let Some(identity) = self.identity.clone() {
                self.note(Severity::Info, "reconnecting");
                if let Ok(more) = self.connect(now, identity) {
                    actions.extend(more);
                }
            }
        }

        actions
    }

    fn handle_response(
        &mut self,
        now: E::Instant,
        response: ResponseFrame,
    ) -> Vec<ConnectionAction<R>> {
        let Some(pending) = self.pending.resolve(&response.id) else {
            self.note(Severity::Info, format!("response for unknown request {}", response.id));
            return Vec::new();
        };

        match pending.waiter {
            Waiter::Caller(resolver) => {
                let outcome = if response.ok {
                    Ok(response.payload.unwrap_or(Value::Null))
                } else {
                    let error = response.error.unwrap_or_default();
                    self.note(
                        Severity::Warn,
                        format!(
                            "{} rejected (id {}): {} {}",
                            pending.method,
                            response.id,
                            error.code.as_deref().unwrap_or("-"),
                            error.message
                        ),
                    );
                    Err(CallError::Rejected { code: error.code, message: error.message })
                };
                vec![ConnectionAction::Resolve { resolver, outcome }]
            },
            Waiter::Handshake => {
                self.handshake_request = None;
                self.handle_connect_response(now, response)
            },
        }
    }

    fn handle_connect_response(
        &mut self,
        now: E::Instant,
        response: ResponseFrame,
    ) -> Vec<ConnectionAction<R>> {
        if !response.ok {
            let message = response.error.map(|e| e.message).unwrap_or_default();
            let error = ConnectionError::HandshakeRejected { message };
            self.note(Severity::Error, error.to_string());
            self.last_error = Some(error);

            let mut actions = Vec::new();
            self.transition(ConnectionState::Error, &mut actions);
            return actions;
        }

        let payload = response.payload.unwrap_or(Value::Null);
        if payload.get("type").and_then(Value::as_str) == Some("hello-ok") {
            return self.complete_handshake(now, &ReadyInfo::from_payload(&payload));
        }

        self.note(Severity::Info, "connect accepted, awaiting connect.ready");
        Vec::new()
    }

    fn handle_event(&mut self, now: E::Instant, event: GatewayEvent) -> Vec<ConnectionAction<R>> {
        match event {
            GatewayEvent::Challenge { nonce, ts } => self.handle_challenge(now, &nonce, ts),
            GatewayEvent::Ready(info) => self.complete_handshake(now, &info),
            event if self.state == ConnectionState::Connected => {
                vec![ConnectionAction::Event(event)]
            },
            event => {
                tracing::debug!(event = %event.name(), state = %self.state, "event before handshake completed");
                Vec::new()
            },
        }
    }

    fn handle_challenge(&mut self, now: E::Instant, nonce: &str, ts: u64) -> Vec<ConnectionAction<R>> {
        let mut actions = Vec::new();
        if self.socket != SocketPhase::Open {
            return actions;
        }

        if self.state == ConnectionState::Connected {
            self.note(Severity::Info, "re-challenged, restarting handshake");
        } else {
            self.note(Severity::Info, "challenge received");
        }
        self.handshake_started = Some(now);
        self.handshake_deadline = Some(now + self.config.connect_timeout);
        if let Some(previous) = self.handshake_request.take() {
            self.pending.resolve(&previous);
        }
        self.transition(ConnectionState::Challenged, &mut actions);

        let proof = match self.sign_challenge(nonce, ts) {
            Ok(proof) => proof,
            Err(error) => {
                self.fail_locally(error, REASON_SIGNING_FAILED, &mut actions);
                return actions;
            },
        };

        let auth = AuthParams {
            token: self.config.endpoint.bare_token(),
            password: self.config.endpoint.password.clone(),
        };
        let params = ConnectParams::build(&self.config.profile, auth, proof);

        let id = self.pending.next_id(&self.env);
        let text = serde_json::to_value(&params)
            .and_then(|params| RequestFrame::new(&id, CONNECT_METHOD, &params).to_text());
        let text = match text {
            Ok(text) => text,
            Err(e) => {
                let error = ConnectionError::MalformedMessage(format!("connect params: {e}"));
                self.fail_locally(error, REASON_SIGNING_FAILED, &mut actions);
                return actions;
            },
        };

        let deadline = self.handshake_deadline.unwrap_or(now + self.config.connect_timeout);
        if self.pending.insert(id.clone(), CONNECT_METHOD, deadline, Waiter::Handshake).is_ok() {
            self.handshake_request = Some(id);
        }

        actions.push(ConnectionAction::Send(text));
        self.note(Severity::Info, "signed connect request sent");
        self.transition(ConnectionState::Authenticating, &mut actions);
        actions
    }

    fn sign_challenge(&self, nonce: &str, ts: u64) -> Result<DeviceProof, ConnectionError> {
        let identity = self
            .identity
            .as_ref()
            .ok_or_else(|| ConnectionError::SigningFailed("no device identity".to_string()))?;
        let signature =
            identity.sign(nonce, ts).map_err(|e| ConnectionError::SigningFailed(e.to_string()))?;

        Ok(DeviceProof {
            id: identity.id().to_string(),
            public_key: identity.public_key_base64(),
            signature,
            signed_at: ts,
            nonce: nonce.to_string(),
        })
    }

    fn complete_handshake(&mut self, _now: E::Instant, info: &ReadyInfo) -> Vec<ConnectionAction<R>> {
        let mut actions = Vec::new();
        if self.socket != SocketPhase::Open {
            return actions;
        }

        if self.state == ConnectionState::Connected {
            if info.version.is_some() {
                self.gateway_version.clone_from(&info.version);
            }
            if info.protocol.is_some() {
                self.protocol = info.protocol;
            }
            return actions;
        }
        if !self.state.is_handshaking() {
            return actions;
        }

        self.handshake_deadline = None;
        self.handshake_started = None;
        if let Some(id) = self.handshake_request.take() {
            self.pending.resolve(&id);
        }
        self.gateway_version.clone_from(&info.version);
        self.protocol = info.protocol;
        self.last_error = None;

        let version = self.gateway_version.as_deref().unwrap_or("unknown");
        self.note(Severity::Success, format!("connected to gateway {version}"));
        self.transition(ConnectionState::Connected, &mut actions);
        actions
    }

    fn fire_connect_timeout(&mut self, now: E::Instant, actions: &mut Vec<ConnectionAction<R>>) {
        self.handshake_deadline = None;
        let rejected = self.state == ConnectionState::Error;

        if self.socket != SocketPhase::Closed {
            actions.push(ConnectionAction::Close {
                code: CLOSE_NORMAL,
                reason: REASON_CONNECT_TIMEOUT.to_string(),
            });
        }

        if rejected {
            // Handshake already failed; only release the socket
            self.teardown();
            return;
        }

        let elapsed = self.handshake_started.map_or(self.config.connect_timeout, |start| now - start);
        let error = ConnectionError::ConnectionTimeout { elapsed };
        self.note(Severity::Error, error.to_string());
        self.last_error = Some(error);
        self.teardown();
        self.transition(ConnectionState::Error, actions);
        self.schedule_reconnect(now);
    }

    fn fail_locally(
        &mut self,
        error: ConnectionError,
        reason: &str,
        actions: &mut Vec<ConnectionAction<R>>,
    ) {
        self.note(Severity::Error, error.to_string());
        self.last_error = Some(error);
        if self.socket != SocketPhase::Closed {
            actions.push(ConnectionAction::Close { code: CLOSE_NORMAL, reason: reason.to_string() });
        }
        self.teardown();
        self.transition(ConnectionState::Error, actions);
    }

    fn schedule_reconnect(&mut self, now: E::Instant) {
        if !self.config.auto_reconnect || self.identity.is_none() {
            return;
        }
        let delay = self.config.reconnect_delay;
        self.reconnect_at = Some(now + delay);
        self.note(Severity::Info, format!("reconnecting in {} ms", delay.as_millis()));
    }

    /// Release the socket and everything tied to it. Pending callers are
    /// dropped, not completed.
    fn teardown(&mut self) {
        self.socket = SocketPhase::Closed;
        self.handshake_deadline = None;
        self.handshake_started = None;
        self.handshake_request = None;
        let dropped = self.pending.clear();
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "dropping pending requests");
        }
    }

    fn transition(&mut self, next: ConnectionState, actions: &mut Vec<ConnectionAction<R>>) {
        if self.state == next {
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "connection state");
        self.state = next;
        actions.push(ConnectionAction::StateChanged(next));
    }

    fn note(&mut self, severity: Severity, message: impl Into<String>) {
        let timestamp = self.env.wall_clock_millis();
        self.diagnostics.push(timestamp, severity, message);
    }
}

fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    };

    use serde_json::json;

    use super::*;
    use crate::diagnostics::DiagnosticEntry;

    /// Virtual clock in milliseconds plus a counting RNG.
    #[derive(Clone, Default)]
    struct TestEnv {
        clock_ms: Arc<AtomicU64>,
        rng: Arc<AtomicU64>,
    }

    impl TestEnv {
        fn at(&self, ms: u64) -> Duration {
            self.clock_ms.store(ms, Ordering::SeqCst);
            Duration::from_millis(ms)
        }
    }

    impl Environment for TestEnv {
        type Instant = Duration;

        fn now(&self) -> Duration {
            Duration::from_millis(self.clock_ms.load(Ordering::SeqCst))
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            let n = self.rng.fetch_add(1, Ordering::SeqCst);
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = (n as u8).wrapping_add(i as u8).wrapping_mul(7);
            }
        }

        fn wall_clock_millis(&self) -> u64 {
            1_700_000_000_000 + self.clock_ms.load(Ordering::SeqCst)
        }
    }

    type Conn = Connection<TestEnv, u32>;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new(GatewayEndpoint::new("ws://gw:18789", "Bearer secret"))
    }

    fn connection(config: ConnectionConfig) -> (TestEnv, Conn) {
        let env = TestEnv::default();
        (env.clone(), Connection::new(env, config))
    }

    fn identity(env: &TestEnv) -> DeviceIdentity {
        DeviceIdentity::generate(env)
    }

    fn challenge(nonce: &str, ts: u64) -> String {
        json!({ "type": "event", "event": "connect.challenge", "payload": { "nonce": nonce, "ts": ts } })
            .to_string()
    }

    fn sent(actions: &[ConnectionAction<u32>]) -> Vec<Value> {
        actions
            .iter()
            .filter_map(|action| match action {
                ConnectionAction::Send(text) => Some(serde_json::from_str(text).unwrap()),
                _ => None,
            })
            .collect()
    }

    fn states(actions: &[ConnectionAction<u32>]) -> Vec<ConnectionState> {
        actions
            .iter()
            .filter_map(|action| match action {
                ConnectionAction::StateChanged(state) => Some(*state),
                _ => None,
            })
            .collect()
    }

    /// Drive a connection through open + challenge; returns the connect frame.
    fn open_and_challenge(env: &TestEnv, conn: &mut Conn, nonce: &str, ts: u64) -> Value {
        let now = env.now();
        conn.connect(now, identity(env)).unwrap();
        conn.handle_opened(now);
        let actions = conn.handle_message(now, &challenge(nonce, ts));
        sent(&actions).pop().unwrap()
    }

    fn connected(env: &TestEnv, conn: &mut Conn) {
        let connect = open_and_challenge(env, conn, "n1", 1000);
        let ready = json!({ "type": "res", "id": connect["id"], "ok": true,
                            "payload": { "type": "hello-ok", "protocol": 3, "server": { "version": "9.9.9" } } });
        conn.handle_message(env.now(), &ready.to_string());
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    fn messages(conn: &Conn) -> Vec<DiagnosticEntry> {
        conn.diagnostics().snapshot()
    }

    #[test]
    fn connect_opens_normalized_url() {
        let (env, mut conn) = connection(config());
        let actions = conn.connect(env.now(), identity(&env)).unwrap();

        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(states(&actions), [ConnectionState::Connecting]);
        match actions.last().unwrap() {
            ConnectionAction::Open { url } => {
                assert_eq!(url.as_str(), "ws://gw:18789/?token=secret");
            },
            other => panic!("expected Open, got {other:?}"),
        }
        assert!(!messages(&conn).iter().any(|e| e.message.contains("secret")));
    }

    #[test]
    fn invalid_endpoint_fails_connect() {
        let (env, mut conn) =
            connection(ConnectionConfig::new(GatewayEndpoint::new("ftp://gw", "t")));
        let result = conn.connect(env.now(), identity(&env));

        assert!(matches!(result, Err(ConnectionError::InvalidEndpoint(_))));
        assert_eq!(conn.state(), ConnectionState::Error);
        assert!(conn.diagnostics().latest_error().is_some());
    }

    #[test]
    fn challenge_is_answered_with_echoed_nonce_and_ts() {
        let (env, mut conn) = connection(config());
        let frame = open_and_challenge(&env, &mut conn, "abc123", 1_700_000_000_000);

        assert_eq!(frame["type"], "req");
        assert_eq!(frame["method"], "connect");
        let params = &frame["params"];
        assert_eq!(params["device"]["nonce"], "abc123");
        assert_eq!(params["device"]["signedAt"], 1_700_000_000_000_u64);
        assert_eq!(params["auth"]["token"], "secret");
        assert_eq!(params["minProtocol"], 3);
        assert_eq!(params["device"]["id"], conn.identity().unwrap().id());
        assert_eq!(conn.state(), ConnectionState::Authenticating);
        assert_eq!(conn.pending_count(), 1);
    }

    #[test]
    fn challenge_walks_through_states() {
        let (env, mut conn) = connection(config());
        conn.connect(env.now(), identity(&env)).unwrap();
        conn.handle_opened(env.now());

        let actions = conn.handle_message(env.now(), &challenge("n", 1));
        assert_eq!(states(&actions), [ConnectionState::Challenged, ConnectionState::Authenticating]);
        assert_eq!(sent(&actions).len(), 1);
    }

    #[test]
    fn connect_ready_completes_handshake() {
        let (env, mut conn) = connection(config());
        open_and_challenge(&env, &mut conn, "n1", 1000);

        let ready = json!({ "type": "event", "event": "connect.ready", "payload": { "version": "9.9.9" } });
        let actions = conn.handle_message(env.now(), &ready.to_string());

        assert_eq!(states(&actions), [ConnectionState::Connected]);
        assert_eq!(conn.gateway_version(), Some("9.9.9"));
        assert!(conn.last_error().is_none());
        assert_eq!(
            conn.diagnostics().entries().last().unwrap().severity,
            Severity::Success
        );
    }

    #[test]
    fn hello_ok_response_completes_handshake() {
        let (env, mut conn) = connection(config());
        connected(&env, &mut conn);

        assert_eq!(conn.gateway_version(), Some("9.9.9"));
        assert_eq!(conn.protocol(), Some(3));
        assert_eq!(conn.pending_count(), 0);
        assert_eq!(conn.next_deadline(), None);
    }

    #[test]
    fn rejected_connect_surfaces_message() {
        let (env, mut conn) = connection(config());
        let frame = open_and_challenge(&env, &mut conn, "n1", 1000);

        let rejection = json!({ "type": "res", "id": frame["id"], "ok": false,
                                "error": { "code": "UNAUTHORIZED", "message": "bad token" } });
        conn.handle_message(env.now(), &rejection.to_string());

        assert_eq!(conn.state(), ConnectionState::Error);
        assert_eq!(
            conn.last_error(),
            Some(&ConnectionError::HandshakeRejected { message: "bad token".into() })
        );
    }

    #[test]
    fn pairing_close_replaces_rejection_and_never_reconnects() {
        let (env, mut conn) = connection(ConnectionConfig { auto_reconnect: true, ..config() });
        let frame = open_and_challenge(&env, &mut conn, "n1", 1000);
        let rejection =
            json!({ "type": "res", "id": frame["id"], "ok": false, "error": { "message": "pairing" } });
        conn.handle_message(env.now(), &rejection.to_string());

        conn.handle_closed(env.now(), CLOSE_PAIRING_REQUIRED, "pairing required");

        let error = conn.last_error().unwrap();
        assert_eq!(error, &ConnectionError::PairingRequired { reason: "pairing required".into() });
        assert!(error.remediation().is_some());
        assert!(!conn.reconnect_scheduled());
        assert_eq!(conn.next_deadline(), None);
    }

    #[test]
    fn abnormal_close_schedules_reconnect() {
        let (env, mut conn) = connection(ConnectionConfig { auto_reconnect: true, ..config() });
        connected(&env, &mut conn);

        let t = env.at(500);
        let actions = conn.handle_closed(t, CLOSE_ABNORMAL, "");
        assert_eq!(states(&actions), [ConnectionState::Error]);
        assert!(conn.reconnect_scheduled());
        assert_eq!(conn.next_deadline(), Some(t + DEFAULT_RECONNECT_DELAY));

        assert!(conn.tick(env.at(3_499)).is_empty());
        let actions = conn.tick(env.at(3_500));
        assert!(matches!(actions.last(), Some(ConnectionAction::Open { .. })));
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn abnormal_close_without_auto_reconnect_stays_down() {
        let (env, mut conn) = connection(config());
        connected(&env, &mut conn);

        conn.handle_closed(env.now(), CLOSE_ABNORMAL, "");
        assert_eq!(conn.state(), ConnectionState::Error);
        assert!(!conn.reconnect_scheduled());
    }

    #[test]
    fn clean_close_after_connected_is_disconnected() {
        let (env, mut conn) = connection(ConnectionConfig { auto_reconnect: true, ..config() });
        connected(&env, &mut conn);

        conn.handle_closed(env.now(), CLOSE_NORMAL, "bye");
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.reconnect_scheduled());
        assert!(conn.last_error().is_none());
    }

    #[test]
    fn clean_close_before_connected_is_error() {
        let (env, mut conn) = connection(config());
        conn.connect(env.now(), identity(&env)).unwrap();
        conn.handle_opened(env.now());

        conn.handle_closed(env.now(), CLOSE_NORMAL, "");
        assert_eq!(conn.state(), ConnectionState::Error);
        assert!(matches!(conn.last_error(), Some(ConnectionError::Closed { code: 1000, .. })));
    }

    #[test]
    fn establishment_timeout_force_closes() {
        let (env, mut conn) = connection(config());
        conn.connect(env.now(), identity(&env)).unwrap();
        assert_eq!(conn.next_deadline(), Some(DEFAULT_CONNECT_TIMEOUT));

        assert!(conn.tick(env.at(9_999)).is_empty());
        let actions = conn.tick(env.at(10_000));

        assert!(matches!(
            &actions[0],
            ConnectionAction::Close { code: CLOSE_NORMAL, reason } if reason == "Connection timeout"
        ));
        assert_eq!(conn.state(), ConnectionState::Error);
        assert_eq!(
            conn.last_error(),
            Some(&ConnectionError::ConnectionTimeout { elapsed: Duration::from_secs(10) })
        );

        // Late notifications from the dead socket are ignored
        assert!(conn.handle_opened(env.now()).is_empty());
        assert!(conn.handle_closed(env.now(), CLOSE_ABNORMAL, "").is_empty());
    }

    #[test]
    fn establishment_timeout_reconnects_when_enabled() {
        let (env, mut conn) = connection(ConnectionConfig { auto_reconnect: true, ..config() });
        conn.connect(env.now(), identity(&env)).unwrap();
        conn.tick(env.at(10_000));
        assert!(conn.reconnect_scheduled());
    }

    #[test]
    fn handshake_completion_cancels_timer() {
        let (env, mut conn) = connection(config());
        connected(&env, &mut conn);

        assert!(conn.tick(env.at(60_000)).is_empty());
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn rechallenge_rearms_timer_and_resends_connect() {
        let (env, mut conn) = connection(config());
        connected(&env, &mut conn);

        let t = env.at(20_000);
        let actions = conn.handle_message(t, &challenge("n2", 2000));
        let frame = sent(&actions).pop().unwrap();

        assert_eq!(frame["params"]["device"]["nonce"], "n2");
        assert_eq!(conn.state(), ConnectionState::Authenticating);
        assert_eq!(conn.next_deadline(), Some(t + DEFAULT_CONNECT_TIMEOUT));
    }

    #[test]
    fn malformed_challenge_is_ignored() {
        let (env, mut conn) = connection(config());
        conn.connect(env.now(), identity(&env)).unwrap();
        conn.handle_opened(env.now());

        let bad = json!({ "type": "event", "event": "connect.challenge", "payload": { "nonce": 5 } });
        let actions = conn.handle_message(env.now(), &bad.to_string());

        assert!(actions.is_empty());
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(messages(&conn).iter().any(|e| e.severity == Severity::Warn));
    }

    #[test]
    fn signing_failure_closes_without_sending() {
        let (env, mut conn) = connection(config());
        conn.connect(env.now(), identity(&env).without_signing_key()).unwrap();
        conn.handle_opened(env.now());

        let actions = conn.handle_message(env.now(), &challenge("n", 1));

        assert!(sent(&actions).is_empty());
        assert!(actions.iter().any(|a| matches!(
            a,
            ConnectionAction::Close { code: CLOSE_NORMAL, reason } if reason == "Signing failed"
        )));
        assert_eq!(conn.state(), ConnectionState::Error);
        assert!(matches!(conn.last_error(), Some(ConnectionError::SigningFailed(_))));
        assert_eq!(conn.next_deadline(), None);
    }

    #[test]
    fn garbage_frames_are_dropped() {
        let (env, mut conn) = connection(config());
        connected(&env, &mut conn);

        for raw in ["not json", r#"{"type":"mystery"}"#, r#"{"type":"res"}"#] {
            assert!(conn.handle_message(env.now(), raw).is_empty());
        }
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn call_requires_open_socket() {
        let (env, mut conn) = connection(config());
        let rejected = conn.call(env.now(), "health", &json!({}), None, 7).unwrap_err();

        assert_eq!(rejected.resolver, 7);
        assert_eq!(rejected.error, CallError::NotConnected);

        let last = messages(&conn).pop().unwrap();
        assert_eq!(last.severity, Severity::Warn);
        assert!(last.message.contains("health"));
    }

    #[test]
    fn call_round_trip() {
        let (env, mut conn) = connection(config());
        connected(&env, &mut conn);

        let actions = conn.call(env.now(), "sessions.list", &json!({ "limit": 1 }), None, 7).unwrap();
        let frame = sent(&actions).pop().unwrap();
        assert_eq!(frame["method"], "sessions.list");
        assert_eq!(frame["params"], json!({ "limit": 1 }));
        assert_eq!(frame["id"].as_str().unwrap().len(), 13);

        let response = json!({ "type": "res", "id": frame["id"], "ok": true, "payload": { "sessions": [] } });
        let actions = conn.handle_message(env.now(), &response.to_string());
        assert_eq!(
            actions,
            [ConnectionAction::Resolve { resolver: 7, outcome: Ok(json!({ "sessions": [] })) }]
        );

        // A duplicate response is dropped
        assert!(conn.handle_message(env.now(), &response.to_string()).is_empty());
    }

    #[test]
    fn rejected_call_is_local() {
        let (env, mut conn) = connection(config());
        connected(&env, &mut conn);

        let actions = conn.call(env.now(), "chat.send", &json!({}), None, 1).unwrap();
        let frame = sent(&actions).pop().unwrap();
        let response = json!({ "type": "res", "id": frame["id"], "ok": false,
                               "error": { "code": "INVALID", "message": "sessionKey required" } });
        let actions = conn.handle_message(env.now(), &response.to_string());

        assert_eq!(
            actions,
            [ConnectionAction::Resolve {
                resolver: 1,
                outcome: Err(CallError::Rejected {
                    code: Some("INVALID".into()),
                    message: "sessionKey required".into()
                }),
            }]
        );
        assert_eq!(conn.state(), ConnectionState::Connected);

        let last = messages(&conn).pop().unwrap();
        assert_eq!(last.severity, Severity::Warn);
        assert!(last.message.contains("chat.send"));
        assert!(last.message.contains("INVALID"));
        assert!(last.message.contains("sessionKey required"));
    }

    #[test]
    fn call_timeouts_are_independent() {
        let (env, mut conn) = connection(config());
        connected(&env, &mut conn);

        let t0 = env.at(100);
        conn.call(t0, "fast", &json!({}), Some(Duration::from_millis(50)), 1).unwrap();
        conn.call(t0, "slow", &json!({}), Some(Duration::from_millis(5_000)), 2).unwrap();

        let actions = conn.tick(env.at(150));
        assert_eq!(
            actions,
            [ConnectionAction::Resolve {
                resolver: 1,
                outcome: Err(CallError::RequestTimeout { method: "fast".into() }),
            }]
        );
        assert_eq!(conn.pending_count(), 1);

        assert!(conn.tick(env.at(5_099)).is_empty());
        let actions = conn.tick(env.at(5_100));
        assert!(matches!(
            &actions[..],
            [ConnectionAction::Resolve { resolver: 2, outcome: Err(CallError::RequestTimeout { .. }) }]
        ));
    }

    #[test]
    fn late_response_after_timeout_is_dropped() {
        let (env, mut conn) = connection(config());
        connected(&env, &mut conn);

        let actions = conn.call(env.now(), "slow", &json!({}), Some(Duration::from_millis(10)), 1).unwrap();
        let frame = sent(&actions).pop().unwrap();
        conn.tick(env.at(10));

        let late = json!({ "type": "res", "id": frame["id"], "ok": true });
        assert!(conn.handle_message(env.now(), &late.to_string()).is_empty());
    }

    #[test]
    fn close_clears_pending_without_resolving() {
        let (env, mut conn) = connection(config());
        connected(&env, &mut conn);
        conn.call(env.now(), "a", &json!({}), None, 1).unwrap();
        conn.call(env.now(), "b", &json!({}), None, 2).unwrap();

        let actions = conn.handle_closed(env.now(), CLOSE_ABNORMAL, "gone");
        assert!(!actions.iter().any(|a| matches!(a, ConnectionAction::Resolve { .. })));
        assert_eq!(conn.pending_count(), 0);
        assert!(conn.tick(env.at(60_000)).is_empty());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let (env, mut conn) = connection(ConnectionConfig { auto_reconnect: true, ..config() });
        connected(&env, &mut conn);
        conn.call(env.now(), "a", &json!({}), None, 1).unwrap();

        let first = conn.disconnect(env.now());
        assert!(matches!(&first[0], ConnectionAction::Close { code: CLOSE_NORMAL, .. }));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.pending_count(), 0);

        assert!(conn.disconnect(env.now()).is_empty());
        assert!(conn.handle_closed(env.now(), CLOSE_NORMAL, "").is_empty());
        assert!(!conn.reconnect_scheduled());
    }

    #[test]
    fn disconnect_cancels_scheduled_reconnect() {
        let (env, mut conn) = connection(ConnectionConfig { auto_reconnect: true, ..config() });
        connected(&env, &mut conn);
        conn.handle_closed(env.now(), CLOSE_ABNORMAL, "");
        assert!(conn.reconnect_scheduled());

        conn.disconnect(env.now());
        assert!(!conn.reconnect_scheduled());
        assert!(conn.tick(env.at(60_000)).is_empty());
    }

    #[test]
    fn reconnect_closes_previous_socket_first() {
        let (env, mut conn) = connection(config());
        connected(&env, &mut conn);
        conn.call(env.now(), "a", &json!({}), None, 1).unwrap();

        let actions = conn.connect(env.now(), identity(&env)).unwrap();
        assert!(matches!(
            &actions[0],
            ConnectionAction::Close { code: CLOSE_NORMAL, reason } if reason == "Client disconnect"
        ));
        assert!(matches!(actions.last(), Some(ConnectionAction::Open { .. })));
        assert_eq!(conn.pending_count(), 0);
        assert_eq!(conn.gateway_version(), None);
    }

    #[test]
    fn push_events_flow_only_when_connected() {
        let (env, mut conn) = connection(config());
        conn.connect(env.now(), identity(&env)).unwrap();
        conn.handle_opened(env.now());

        let tick = json!({ "type": "event", "event": "tick", "seq": 1 }).to_string();
        assert!(conn.handle_message(env.now(), &tick).is_empty());

        conn.handle_message(env.now(), &challenge("n", 1));
        conn.handle_message(
            env.now(),
            &json!({ "type": "event", "event": "connect.ready", "payload": {} }).to_string(),
        );
        let actions = conn.handle_message(env.now(), &tick);
        assert_eq!(actions, [ConnectionAction::Event(GatewayEvent::Tick(Value::Null))]);
    }

    #[test]
    fn transport_error_before_connected_is_error() {
        let (env, mut conn) = connection(config());
        conn.connect(env.now(), identity(&env)).unwrap();

        let actions = conn.handle_error(env.now(), "connection refused");
        assert_eq!(states(&actions), [ConnectionState::Error]);
        conn.handle_closed(env.now(), CLOSE_ABNORMAL, "connection refused");
        assert!(matches!(conn.last_error(), Some(ConnectionError::Closed { code: 1006, .. })));
    }

    #[test]
    fn failures_are_logged_before_transition() {
        let (env, mut conn) = connection(config());
        connected(&env, &mut conn);
        conn.handle_closed(env.now(), CLOSE_ABNORMAL, "reset");

        let last = conn.diagnostics().latest_error().unwrap();
        assert!(last.message.contains("1006"));
        assert_eq!(conn.status().state, ConnectionState::Error);
    }

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(ConnectionState::Authenticating.to_string(), "authenticating");
        assert_eq!(serde_json::to_value(ConnectionState::Connected).unwrap(), "connected");
    }
}
