//! WebSocket transport for the client.
//!
//! [`Transport`] owns one socket. A spawned task bridges the socket to
//! channels: outbound text goes in through [`Transport::send`], and every
//! socket event comes back as a [`TransportNotice`] tagged with the
//! generation the socket was opened under. The runtime uses the tag to
//! discard late events from a socket it already replaced.
//!
//! No protocol logic lives here. Framing, correlation and the handshake all
//! belong to the Sans-IO [`Connection`](clawlink_core::Connection).

use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use clawlink_core::{
    ConnectionError,
    connection::{CLOSE_ABNORMAL, CLOSE_NORMAL},
};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{
    Message,
    protocol::{CloseFrame, frame::coding::CloseCode},
};
use url::Url;

/// RFC 6455 code for a close frame without a status.
const CLOSE_NO_STATUS: u16 = 1005;

/// How long to wait for the peer to answer a local close.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Transport errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The socket is not open
    #[error("socket not open")]
    NotOpen,

    /// The socket task has exited
    #[error("socket task stopped")]
    Stopped,
}

impl From<TransportError> for ConnectionError {
    fn from(_: TransportError) -> Self {
        Self::NotConnected
    }
}

/// Something that happened on a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// WebSocket handshake completed
    Opened,
    /// Text frame (or UTF-8 binary frame) received
    Message(String),
    /// Socket error; always followed by `Closed`
    Errored(String),
    /// Socket closed
    Closed {
        /// Close code from the peer, or 1006 if the stream just ended
        code: u16,
        /// Close reason
        reason: String,
    },
}

/// A [`TransportEvent`] tagged with its socket generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportNotice {
    /// Generation passed to [`Transport::open`]
    pub generation: u64,
    /// What happened
    pub event: TransportEvent,
}

enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Handle to one WebSocket.
///
/// Dropping the handle closes the socket with 1000.
pub struct Transport {
    generation: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl Transport {
    /// Start connecting to `url`. Returns immediately.
    ///
    /// Must be called from within a tokio runtime. Events arrive on
    /// `notices`; a failed connect reports `Errored` then `Closed` with 1006.
    pub fn open(url: Url, generation: u64, notices: mpsc::UnboundedSender<TransportNotice>) -> Self {
        install_crypto_provider();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_socket(url, generation, outbound_rx, Arc::clone(&open), notices));

        Self { generation, outbound: outbound_tx, open }
    }

    /// Generation this socket was opened under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True between `Opened` and the start of a close.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Queue a text frame.
    ///
    /// # Errors
    ///
    /// - `TransportError::NotOpen` if the socket is not open
    /// - `TransportError::Stopped` if the socket task has exited
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.outbound.send(Outbound::Text(text)).map_err(|_| TransportError::Stopped)
    }

    /// Close the socket with `code` and `reason`.
    pub fn close(&self, code: u16, reason: &str) {
        self.open.store(false, Ordering::Release);
        // The task may already be gone.
        let _ = self.outbound.send(Outbound::Close { code, reason: reason.to_owned() });
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("generation", &self.generation)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Install ring as the process-wide rustls provider, once.
pub fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Another component may have installed one already.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

async fn run_socket(
    url: Url,
    generation: u64,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
    notices: mpsc::UnboundedSender<TransportNotice>,
) {
    let notify = |event: TransportEvent| {
        // Runtime gone means nobody is listening.
        let _ = notices.send(TransportNotice { generation, event });
    };

    // Nothing but a close can be queued before `Opened`, so any outbound
    // item (or the handle dropping) abandons the upgrade.
    let connected = tokio::select! {
        connected = tokio_tungstenite::connect_async(url.as_str()) => connected,
        _ = outbound.recv() => {
            tracing::debug!(generation, "connect abandoned before upgrade");
            notify(TransportEvent::Closed {
                code: CLOSE_ABNORMAL,
                reason: "connect abandoned".to_owned(),
            });
            return;
        },
    };

    let stream = match connected {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::debug!(generation, error = %e, "socket connect failed");
            notify(TransportEvent::Errored(e.to_string()));
            notify(TransportEvent::Closed { code: CLOSE_ABNORMAL, reason: e.to_string() });
            return;
        },
    };

    open.store(true, Ordering::Release);
    notify(TransportEvent::Opened);

    let (mut write, mut read) = stream.split();
    let mut peer_close: Option<(u16, String)> = None;
    let mut close_deadline: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => notify(TransportEvent::Message(text)),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => notify(TransportEvent::Message(text)),
                    Err(_) => tracing::warn!(generation, "dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    open.store(false, Ordering::Release);
                    // Keep reading so tungstenite can flush its close reply.
                    peer_close = Some(frame.map_or_else(
                        || (CLOSE_NO_STATUS, String::new()),
                        |f| (u16::from(f.code), f.reason.into_owned()),
                    ));
                },
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    open.store(false, Ordering::Release);
                    if let Some((code, reason)) = peer_close.take() {
                        notify(TransportEvent::Closed { code, reason });
                    } else {
                        notify(TransportEvent::Errored(e.to_string()));
                        notify(TransportEvent::Closed { code: CLOSE_ABNORMAL, reason: e.to_string() });
                    }
                    return;
                },
                None => {
                    open.store(false, Ordering::Release);
                    let (code, reason) = peer_close
                        .take()
                        .unwrap_or_else(|| (CLOSE_ABNORMAL, "connection ended".to_owned()));
                    notify(TransportEvent::Closed { code, reason });
                    return;
                },
            },
            next = outbound.recv(), if close_deadline.is_none() => {
                let (code, reason) = match next {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::warn!(generation, error = %e, "socket write failed");
                        }
                        continue;
                    },
                    Some(Outbound::Close { code, reason }) => (code, reason),
                    None => (CLOSE_NORMAL, "Client disconnect".to_owned()),
                };

                open.store(false, Ordering::Release);
                let frame = CloseFrame { code: CloseCode::from(code), reason: reason.into() };
                if let Err(e) = write.send(Message::Close(Some(frame))).await {
                    tracing::debug!(generation, error = %e, "close frame not sent");
                    return;
                }
                close_deadline = Some(tokio::time::Instant::now() + CLOSE_GRACE);
            },
            () = wait_until(close_deadline) => {
                tracing::debug!(generation, "peer never answered close");
                return;
            },
        }
    }
}

async fn wait_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
