//! Scriptable gateway WebSocket server for end-to-end tests.
//!
//! Each accepted socket immediately receives a `connect.challenge`. The
//! `connect` request is answered according to [`HandshakeReply`], other
//! methods from the canned [`MethodReply`] table (or not at all). Every
//! inbound frame is recorded so tests can assert on exactly what the client
//! sent. The test can push events, close with any code, or drop the TCP
//! stream without a close frame to simulate an abnormal disconnect.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_tungstenite::tungstenite::{
    Message,
    protocol::{CloseFrame, frame::coding::CloseCode},
};

/// How long helpers wait for the client before giving up.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// How the gateway answers `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeReply {
    /// `ok: true` with a `hello-ok` payload
    HelloOk {
        /// Reported `server.version`
        version: String,
    },
    /// `ok: true`, then a separate `connect.ready` event
    ConnectReady {
        /// Reported `version`
        version: String,
    },
    /// `ok: false` with this message
    Reject {
        /// `error.message`
        message: String,
    },
    /// No answer; the test drives the outcome
    Silent,
}

/// Canned answer for a non-handshake method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodReply {
    /// `ok: true` with this payload
    Ok(Value),
    /// `ok: false` with this error
    Error {
        /// `error.code`
        code: String,
        /// `error.message`
        message: String,
    },
}

/// Mock gateway behaviour.
#[derive(Debug, Clone)]
pub struct MockGatewayConfig {
    /// Challenge nonce
    pub nonce: String,
    /// Challenge timestamp
    pub ts: u64,
    /// Send the challenge on accept
    pub send_challenge: bool,
    /// Answer to `connect`
    pub handshake: HandshakeReply,
    /// Answers to other methods, by method name
    pub replies: HashMap<String, MethodReply>,
}

impl Default for MockGatewayConfig {
    fn default() -> Self {
        Self {
            nonce: "n1".to_string(),
            ts: 1000,
            send_challenge: true,
            handshake: HandshakeReply::HelloOk { version: "9.9.9".to_string() },
            replies: HashMap::new(),
        }
    }
}

impl MockGatewayConfig {
    /// Set the handshake answer.
    #[must_use]
    pub fn handshake(mut self, reply: HandshakeReply) -> Self {
        self.handshake = reply;
        self
    }

    /// Answer `method` with `ok: true` and `payload`.
    #[must_use]
    pub fn reply_ok(mut self, method: &str, payload: Value) -> Self {
        self.replies.insert(method.to_string(), MethodReply::Ok(payload));
        self
    }

    /// Answer `method` with `ok: false`.
    #[must_use]
    pub fn reply_error(mut self, method: &str, code: &str, message: &str) -> Self {
        self.replies.insert(
            method.to_string(),
            MethodReply::Error { code: code.to_string(), message: message.to_string() },
        );
        self
    }
}

#[derive(Debug)]
enum Control {
    Send(Value),
    Close { code: u16, reason: String },
    Drop,
}

type ControlSlot = Arc<Mutex<Option<mpsc::UnboundedSender<Control>>>>;

/// Running mock gateway. Stops when dropped.
pub struct MockGateway {
    addr: SocketAddr,
    accepts: Arc<AtomicUsize>,
    control: ControlSlot,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
    task: tokio::task::JoinHandle<()>,
}

impl MockGateway {
    /// Bind to an ephemeral localhost port and start accepting.
    pub async fn start(config: MockGatewayConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let accepts = Arc::new(AtomicUsize::new(0));
        let control: ControlSlot = Arc::new(Mutex::new(None));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(accept_loop(
            listener,
            Arc::new(config),
            accepts.clone(),
            control.clone(),
            inbound_tx,
        ));

        Ok(Self { addr, accepts, control, inbound: tokio::sync::Mutex::new(inbound_rx), task })
    }

    /// `ws://` URL of the gateway.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of sockets accepted so far.
    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` sockets have been accepted.
    pub async fn wait_for_accepts(&self, count: usize, wait: Duration) -> bool {
        tokio::time::timeout(wait, async {
            while self.accepts() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Next frame the client sent, in arrival order.
    pub async fn next_frame(&self, wait: Duration) -> Option<Value> {
        let mut inbound = self.inbound.lock().await;
        tokio::time::timeout(wait, inbound.recv()).await.ok().flatten()
    }

    /// Next request for `method`, skipping others.
    pub async fn next_request(&self, method: &str, wait: Duration) -> Option<Value> {
        tokio::time::timeout(wait, async {
            let mut inbound = self.inbound.lock().await;
            while let Some(frame) = inbound.recv().await {
                if frame["method"] == method {
                    return Some(frame);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    /// Push an event to the current socket.
    pub fn push_event(&self, event: &str, payload: Value) -> bool {
        self.send(json!({ "type": "event", "event": event, "payload": payload }))
    }

    /// Send an arbitrary frame to the current socket.
    pub fn send(&self, frame: Value) -> bool {
        self.control(Control::Send(frame))
    }

    /// Reply to a request frame the client sent.
    pub fn respond(&self, request: &Value, payload: Value) -> bool {
        self.send(json!({ "type": "res", "id": request["id"], "ok": true, "payload": payload }))
    }

    /// Close the current socket with a close frame.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.control(Control::Close { code, reason: reason.to_string() })
    }

    /// Drop the current TCP stream without a close frame.
    pub fn drop_connection(&self) -> bool {
        self.control(Control::Drop)
    }

    fn control(&self, message: Control) -> bool {
        let slot = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().is_some_and(|tx| tx.send(message).is_ok())
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<MockGatewayConfig>,
    accepts: Arc<AtomicUsize>,
    control: ControlSlot,
    inbound: mpsc::UnboundedSender<Value>,
) {
    let mut connections = tokio::task::JoinSet::new();
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "mock gateway accept failed");
                continue;
            },
        };

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        *control.lock().unwrap_or_else(PoisonError::into_inner) = Some(control_tx);
        accepts.fetch_add(1, Ordering::SeqCst);

        connections.spawn(serve(stream, config.clone(), control_rx, inbound.clone()));
    }
}

async fn serve(
    stream: TcpStream,
    config: Arc<MockGatewayConfig>,
    mut control: mpsc::UnboundedReceiver<Control>,
    inbound: mpsc::UnboundedSender<Value>,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(error = %e, "mock gateway websocket upgrade failed");
            return;
        },
    };
    let (mut write, mut read) = ws.split();

    if config.send_challenge {
        let challenge = json!({
            "type": "event",
            "event": "connect.challenge",
            "payload": { "nonce": config.nonce, "ts": config.ts },
        });
        if write.send(text(&challenge)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            message = read.next() => {
                let raw = match message {
                    Some(Ok(Message::Text(raw))) => raw,
                    Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                    Some(Ok(_)) => continue,
                };
                let Ok(frame) = serde_json::from_str::<Value>(raw.as_str()) else {
                    continue;
                };
                let _ = inbound.send(frame.clone());

                for reply in replies_for(&config, &frame) {
                    if write.send(text(&reply)).await.is_err() {
                        return;
                    }
                }
            },
            command = control.recv() => match command {
                Some(Control::Send(frame)) => {
                    if write.send(text(&frame)).await.is_err() {
                        return;
                    }
                },
                Some(Control::Close { code, reason }) => {
                    let frame = CloseFrame { code: CloseCode::from(code), reason: reason.into() };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    let _ = write.flush().await;
                    // Let the client finish the closing handshake
                    while let Some(Ok(message)) = read.next().await {
                        if message.is_close() {
                            break;
                        }
                    }
                    return;
                },
                Some(Control::Drop) | None => return,
            },
        }
    }
}

fn replies_for(config: &MockGatewayConfig, frame: &Value) -> Vec<Value> {
    if frame["type"] != "req" {
        return Vec::new();
    }
    let id = frame["id"].clone();
    let Some(method) = frame["method"].as_str() else {
        return Vec::new();
    };

    if method == "connect" {
        return match &config.handshake {
            HandshakeReply::HelloOk { version } => vec![json!({
                "type": "res", "id": id, "ok": true,
                "payload": { "type": "hello-ok", "protocol": 3, "server": { "version": version } },
            })],
            HandshakeReply::ConnectReady { version } => vec![
                json!({ "type": "res", "id": id, "ok": true, "payload": {} }),
                json!({ "type": "event", "event": "connect.ready", "payload": { "version": version } }),
            ],
            HandshakeReply::Reject { message } => vec![json!({
                "type": "res", "id": id, "ok": false,
                "error": { "code": "UNAUTHORIZED", "message": message },
            })],
            HandshakeReply::Silent => Vec::new(),
        };
    }

    match config.replies.get(method) {
        Some(MethodReply::Ok(payload)) => {
            vec![json!({ "type": "res", "id": id, "ok": true, "payload": payload })]
        },
        Some(MethodReply::Error { code, message }) => vec![json!({
            "type": "res", "id": id, "ok": false,
            "error": { "code": code, "message": message },
        })],
        None => Vec::new(),
    }
}

fn text(frame: &Value) -> Message {
    Message::Text(frame.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str) -> Value {
        json!({ "type": "req", "id": "abc", "method": method, "params": {} })
    }

    #[test]
    fn hello_ok_reply_echoes_id() {
        let replies = replies_for(&MockGatewayConfig::default(), &request("connect"));
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["id"], "abc");
        assert_eq!(replies[0]["payload"]["type"], "hello-ok");
        assert_eq!(replies[0]["payload"]["server"]["version"], "9.9.9");
    }

    #[test]
    fn connect_ready_mode_sends_two_frames() {
        let config = MockGatewayConfig::default()
            .handshake(HandshakeReply::ConnectReady { version: "1.0.0".into() });
        let replies = replies_for(&config, &request("connect"));
        assert_eq!(replies[1]["event"], "connect.ready");
    }

    #[test]
    fn canned_replies_by_method() {
        let config = MockGatewayConfig::default()
            .reply_ok("health", json!({ "ok": true }))
            .reply_error("chat.send", "INVALID", "nope");

        assert_eq!(replies_for(&config, &request("health"))[0]["payload"]["ok"], true);
        assert_eq!(replies_for(&config, &request("chat.send"))[0]["error"]["code"], "INVALID");
        assert!(replies_for(&config, &request("sessions.list")).is_empty());
        assert!(replies_for(&config, &json!({ "type": "event", "event": "x" })).is_empty());
    }
}
