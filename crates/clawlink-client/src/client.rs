//! Async gateway client.
//!
//! [`GatewayClient`] is a cheap, cloneable handle to a runtime task. The task
//! owns the Sans-IO [`Connection`], the [`EventDispatcher`], the identity
//! store and the current [`Transport`], and is the only place any of them
//! are mutated. Handles talk to it over a command channel. State is
//! published on a `watch` channel and events on a `broadcast` channel.
//!
//! The runtime loop waits on three sources:
//!
//! - commands from handles
//! - socket notices (stale generations are discarded)
//! - the next deadline reported by the connection
//!
//! and feeds each into the state machine, then executes the returned
//! actions. The task exits after the last handle is dropped.

use std::{collections::VecDeque, time::Duration};

use clawlink_core::{
    CallError, CallRejected, Connection, ConnectionAction, ConnectionConfig, ConnectionError,
    ConnectionState, ConnectionStatus, Environment, IdentityStorage, IdentityStore,
    chat::{ChatChange, ChatMessage, ChatRole, ChatUpdate},
    connection::CLOSE_NORMAL,
    diagnostics::DiagnosticEntry,
    dispatcher::{Dispatch, EventDispatcher, SESSIONS_LIST_METHOD},
};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::{
    error::ClientError,
    event::ClientEvent,
    system_env::SystemEnv,
    transport::{Transport, TransportEvent, TransportNotice},
};

/// Method used by [`GatewayClient::send_chat`].
pub const CHAT_SEND_METHOD: &str = "chat.send";

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 256;

type CallReply = oneshot::Sender<Result<Value, CallError>>;

/// Continuation attached to a pending request.
#[derive(Debug)]
enum Reply {
    Caller(CallReply),
    SessionRefresh,
}

enum Command {
    Connect { done: oneshot::Sender<Result<(), ClientError>> },
    Disconnect { done: oneshot::Sender<()> },
    Call { method: String, params: Value, timeout: Option<Duration>, reply: CallReply },
    SendChat { session_key: String, message: String, reply: CallReply },
    Transcript { session_key: String, reply: oneshot::Sender<Vec<ChatMessage>> },
    Sessions { reply: oneshot::Sender<Vec<Value>> },
    Diagnostics { reply: oneshot::Sender<Vec<DiagnosticEntry>> },
}

/// Handle to a running gateway client.
#[derive(Clone)]
pub struct GatewayClient {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    events: broadcast::Sender<ClientEvent>,
}

impl GatewayClient {
    /// Spawn the runtime task. Does not connect.
    ///
    /// The device identity is loaded from `storage` on the first connect,
    /// and created there if none exists. Must be called from within a tokio
    /// runtime.
    pub fn spawn<S>(config: ConnectionConfig, storage: S) -> Self
    where
        S: IdentityStorage + Send + 'static,
    {
        let env = SystemEnv::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();

        let runtime = Runtime {
            connection: Connection::new(env, config),
            identities: IdentityStore::new(storage, env),
            dispatcher: EventDispatcher::new(),
            transport: None,
            generation: 0,
            env,
            commands: commands_rx,
            notices_tx,
            notices: notices_rx,
            status: status_tx,
            events: events_tx.clone(),
        };
        tokio::spawn(runtime.run());

        Self { commands: commands_tx, status: status_rx, events: events_tx }
    }

    /// Start connecting. Returns once the socket open has been issued.
    ///
    /// Use [`wait_connected`](Self::wait_connected) or
    /// [`subscribe`](Self::subscribe) to follow the handshake.
    ///
    /// # Errors
    ///
    /// - `ClientError::Identity` if the device identity cannot be loaded
    /// - `ClientError::Connection` if the gateway URL is invalid
    pub async fn connect(&self) -> Result<(), ClientError> {
        let (done, rx) = oneshot::channel();
        self.command(Command::Connect { done })?;
        rx.await.map_err(|_| ClientError::RuntimeStopped)?
    }

    /// Wait until the handshake completes.
    ///
    /// # Errors
    ///
    /// - `ClientError::Connection` with the recorded error if the attempt
    ///   ends in `Error` or `Disconnected`
    /// - `ClientError::Timeout` if `wait` elapses first
    pub async fn wait_connected(&self, wait: Duration) -> Result<ConnectionStatus, ClientError> {
        let mut status = self.status.clone();
        let settled = tokio::time::timeout(wait, async move {
            loop {
                let current = status.borrow_and_update().clone();
                match current.state {
                    ConnectionState::Connected => return Ok(current),
                    ConnectionState::Error | ConnectionState::Disconnected => {
                        return Err(ClientError::Connection(
                            current.last_error.unwrap_or(ConnectionError::NotConnected),
                        ));
                    },
                    _ => {},
                }
                if status.changed().await.is_err() {
                    return Err(ClientError::RuntimeStopped);
                }
            }
        })
        .await;

        settled.map_err(|_| ClientError::Timeout(wait))?
    }

    /// Close the socket. Idempotent.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let (done, rx) = oneshot::channel();
        self.command(Command::Disconnect { done })?;
        rx.await.map_err(|_| ClientError::RuntimeStopped)
    }

    /// Issue `method` with the default request timeout.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        self.issue(method, params, None).await
    }

    /// Issue `method` with its own timeout.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        self.issue(method, params, Some(timeout)).await
    }

    /// Send a chat message to `session_key`.
    ///
    /// The message is appended to the local transcript as a user message
    /// once the request has been written.
    pub async fn send_chat(&self, session_key: &str, message: &str) -> Result<Value, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::SendChat {
            session_key: session_key.to_owned(),
            message: message.to_owned(),
            reply,
        })?;
        settle(rx).await
    }

    /// Subscribe to client events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Latest published status.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Watch channel following the status.
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Transcript of `session_key`.
    pub async fn transcript(&self, session_key: &str) -> Result<Vec<ChatMessage>, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Transcript { session_key: session_key.to_owned(), reply })?;
        rx.await.map_err(|_| ClientError::RuntimeStopped)
    }

    /// Last refreshed session list.
    pub async fn sessions(&self) -> Result<Vec<Value>, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Sessions { reply })?;
        rx.await.map_err(|_| ClientError::RuntimeStopped)
    }

    /// Snapshot of the diagnostics log, oldest first.
    pub async fn diagnostics(&self) -> Result<Vec<DiagnosticEntry>, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Diagnostics { reply })?;
        rx.await.map_err(|_| ClientError::RuntimeStopped)
    }

    async fn issue(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Call { method: method.to_owned(), params, timeout, reply })?;
        settle(rx).await
    }

    fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::RuntimeStopped)
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient").field("status", &*self.status.borrow()).finish()
    }
}

/// A dropped reply sender means the connection was torn down first.
async fn settle(rx: oneshot::Receiver<Result<Value, CallError>>) -> Result<Value, ClientError> {
    match rx.await {
        Ok(outcome) => outcome.map_err(ClientError::Call),
        Err(_) => Err(ClientError::RequestAbandoned),
    }
}

struct Runtime<S> {
    connection: Connection<SystemEnv, Reply>,
    identities: IdentityStore<S, SystemEnv>,
    dispatcher: EventDispatcher,
    transport: Option<Transport>,
    generation: u64,
    env: SystemEnv,
    commands: mpsc::UnboundedReceiver<Command>,
    notices_tx: mpsc::UnboundedSender<TransportNotice>,
    notices: mpsc::UnboundedReceiver<TransportNotice>,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<ClientEvent>,
}

impl<S: IdentityStorage> Runtime<S> {
    async fn run(mut self) {
        loop {
            let deadline = self.connection.next_deadline();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(notice) = self.notices.recv() => self.handle_notice(notice),
                () = sleep_until(deadline) => {
                    let actions = self.connection.tick(self.env.now());
                    self.execute(actions);
                },
            }

            self.publish_status();
        }

        tracing::debug!("all client handles dropped, shutting down");
        let actions = self.connection.disconnect(self.env.now());
        self.execute(actions);
    }

    fn handle_command(&mut self, command: Command) {
        let now = self.env.now();
        match command {
            Command::Connect { done } => {
                let result = self.start_connect();
                let _ = done.send(result);
            },
            Command::Disconnect { done } => {
                let actions = self.connection.disconnect(now);
                self.execute(actions);
                let _ = done.send(());
            },
            Command::Call { method, params, timeout, reply } => {
                self.call(&method, &params, timeout, reply);
            },
            Command::SendChat { session_key, message, reply } => {
                self.send_chat(session_key, message, reply);
            },
            Command::Transcript { session_key, reply } => {
                let _ = reply.send(self.dispatcher.transcript(&session_key).to_vec());
            },
            Command::Sessions { reply } => {
                let _ = reply.send(self.dispatcher.sessions().to_vec());
            },
            Command::Diagnostics { reply } => {
                let _ = reply.send(self.connection.diagnostics().snapshot());
            },
        }
    }

    fn start_connect(&mut self) -> Result<(), ClientError> {
        let identity = self.identities.get_identity()?.clone();
        let actions = self.connection.connect(self.env.now(), identity)?;
        self.execute(actions);
        Ok(())
    }

    fn call(&mut self, method: &str, params: &Value, timeout: Option<Duration>, reply: CallReply) {
        let now = self.env.now();
        match self.connection.call(now, method, params, timeout, Reply::Caller(reply)) {
            Ok(actions) => self.execute(actions),
            Err(rejected) => reject(rejected),
        }
    }

    fn send_chat(&mut self, session_key: String, message: String, reply: CallReply) {
        let now = self.env.now();
        let params = json!({
            "sessionKey": &session_key,
            "message": &message,
            "idempotencyKey": idempotency_key(&self.env),
        });

        match self.connection.call(now, CHAT_SEND_METHOD, &params, None, Reply::Caller(reply)) {
            Ok(actions) => {
                let outgoing = ChatMessage::new(ChatRole::User, message);
                self.dispatcher.record_outgoing(&session_key, outgoing.clone());
                self.broadcast(ClientEvent::ChatUpdated(ChatUpdate {
                    session_key,
                    change: ChatChange::Appended,
                    message: outgoing,
                }));
                self.execute(actions);
            },
            Err(rejected) => reject(rejected),
        }
    }

    fn handle_notice(&mut self, notice: TransportNotice) {
        if notice.generation != self.generation {
            tracing::trace!(
                generation = notice.generation,
                current = self.generation,
                "discarding notice from replaced socket"
            );
            return;
        }

        let now = self.env.now();
        let actions = match notice.event {
            TransportEvent::Opened => self.connection.handle_opened(now),
            TransportEvent::Message(raw) => self.connection.handle_message(now, &raw),
            TransportEvent::Errored(message) => self.connection.handle_error(now, &message),
            TransportEvent::Closed { code, reason } => {
                self.transport = None;
                self.connection.handle_closed(now, code, &reason)
            },
        };
        self.execute(actions);
    }

    /// Run actions to completion, including any they trigger.
    fn execute(&mut self, actions: Vec<ConnectionAction<Reply>>) {
        let mut queue: VecDeque<_> = actions.into();

        while let Some(action) = queue.pop_front() {
            match action {
                ConnectionAction::Open { url } => {
                    if let Some(stale) = self.transport.take() {
                        stale.close(CLOSE_NORMAL, "Client disconnect");
                    }
                    self.generation += 1;
                    self.transport =
                        Some(Transport::open(url, self.generation, self.notices_tx.clone()));
                },
                ConnectionAction::Send(text) => match &self.transport {
                    Some(transport) => {
                        if let Err(e) = transport.send(text) {
                            tracing::warn!(error = %e, "dropping outbound frame");
                        }
                    },
                    None => tracing::warn!("dropping outbound frame with no socket"),
                },
                ConnectionAction::Close { code, reason } => {
                    if let Some(transport) = self.transport.take() {
                        transport.close(code, &reason);
                    }
                },
                ConnectionAction::Resolve { resolver, outcome } => match resolver {
                    Reply::Caller(reply) => {
                        // The caller may have stopped waiting.
                        let _ = reply.send(outcome);
                    },
                    Reply::SessionRefresh => queue.extend(self.apply_sessions(outcome)),
                },
                ConnectionAction::Event(event) => {
                    for dispatch in self.dispatcher.dispatch(&event) {
                        match dispatch {
                            Dispatch::Notify(event) => self.broadcast(ClientEvent::Gateway(event)),
                            Dispatch::ChatUpdated(update) => {
                                self.broadcast(ClientEvent::ChatUpdated(update));
                            },
                            Dispatch::RefreshSessions => queue.extend(self.refresh_sessions()),
                        }
                    }
                },
                ConnectionAction::StateChanged(state) => {
                    if matches!(
                        state,
                        ConnectionState::Connecting
                            | ConnectionState::Error
                            | ConnectionState::Disconnected
                    ) {
                        // Teardown dropped any refresh in flight.
                        self.dispatcher.reset_refresh();
                    }
                    self.broadcast(ClientEvent::StateChanged(state));
                },
            }
        }

        self.publish_status();
    }

    fn refresh_sessions(&mut self) -> Vec<ConnectionAction<Reply>> {
        let now = self.env.now();
        match self.connection.call(now, SESSIONS_LIST_METHOD, &json!({}), None, Reply::SessionRefresh)
        {
            Ok(actions) => actions,
            Err(rejected) => {
                tracing::debug!(error = %rejected.error, "session refresh not issued");
                self.dispatcher.reset_refresh();
                Vec::new()
            },
        }
    }

    fn apply_sessions(&mut self, outcome: Result<Value, CallError>) -> Vec<ConnectionAction<Reply>> {
        let again = match outcome {
            Ok(payload) => {
                let again = self.dispatcher.apply_session_list(&payload);
                self.broadcast(ClientEvent::SessionsRefreshed(self.dispatcher.sessions().to_vec()));
                again
            },
            Err(e) => {
                tracing::warn!(error = %e, "session refresh failed");
                self.dispatcher.refresh_failed()
            },
        };

        if again { self.refresh_sessions() } else { Vec::new() }
    }

    fn broadcast(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_status(&self) {
        let status = self.connection.status();
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

fn reject(rejected: CallRejected<Reply>) {
    if let Reply::Caller(reply) = rejected.resolver {
        let _ = reply.send(Err(rejected.error));
    }
}

fn idempotency_key(env: &SystemEnv) -> String {
    format!("{:016x}{:016x}", env.random_u64(), env.random_u64())
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
