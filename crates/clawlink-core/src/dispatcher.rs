//! Event routing after the handshake.
//!
//! [`EventDispatcher`] consumes classified [`GatewayEvent`]s and tells the
//! driver what to do with each one through [`Dispatch`] values: forward it to
//! subscribers, report a transcript change, or refresh the session list.
//! Session lifecycle events never edit local session state directly. They
//! schedule a `sessions.list` refresh, with at most one refresh in flight.

use serde_json::Value;

use crate::{
    chat::{ChatLog, ChatMessage, ChatUpdate},
    event::GatewayEvent,
};

/// Method used to refresh the session list.
pub const SESSIONS_LIST_METHOD: &str = "sessions.list";

/// Instruction for the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Deliver the event to subscribers
    Notify(GatewayEvent),
    /// The chat transcript changed
    ChatUpdated(ChatUpdate),
    /// Issue a `sessions.list` call now
    RefreshSessions,
}

/// Routes push events and owns the state they feed.
#[derive(Debug, Clone, Default)]
pub struct EventDispatcher {
    chat: ChatLog,
    sessions: Vec<Value>,
    refresh_in_flight: bool,
    refresh_dirty: bool,
}

impl EventDispatcher {
    /// Empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route one event.
    pub fn dispatch(&mut self, event: &GatewayEvent) -> Vec<Dispatch> {
        match event {
            GatewayEvent::Challenge { .. } | GatewayEvent::Ready(_) => Vec::new(),
            GatewayEvent::Unknown { name, .. } => {
                tracing::info!(event = %name, "ignoring unknown gateway event");
                Vec::new()
            },
            GatewayEvent::Chat(payload) => {
                let mut out = vec![Dispatch::Notify(event.clone())];
                if let Some(update) = self.chat.apply(payload) {
                    out.push(Dispatch::ChatUpdated(update));
                }
                out
            },
            GatewayEvent::SessionCreated(_)
            | GatewayEvent::SessionUpdated(_)
            | GatewayEvent::SessionDeleted(_) => {
                let mut out = vec![Dispatch::Notify(event.clone())];
                if self.request_refresh() {
                    out.push(Dispatch::RefreshSessions);
                }
                out
            },
            GatewayEvent::Health(_)
            | GatewayEvent::Agent(_)
            | GatewayEvent::Tick(_)
            | GatewayEvent::Presence(_)
            | GatewayEvent::Shutdown(_) => vec![Dispatch::Notify(event.clone())],
        }
    }

    /// Ask for a session refresh.
    ///
    /// Returns true if the driver should issue the call now. While one is in
    /// flight the request is remembered and replayed when it settles.
    pub fn request_refresh(&mut self) -> bool {
        if self.refresh_in_flight {
            self.refresh_dirty = true;
            false
        } else {
            self.refresh_in_flight = true;
            true
        }
    }

    /// Store a `sessions.list` result.
    ///
    /// Accepts `{ "sessions": [...] }` or a bare array. Returns true if another
    /// refresh was requested meanwhile and should be issued now.
    pub fn apply_session_list(&mut self, payload: &Value) -> bool {
        let list = payload.get("sessions").unwrap_or(payload);
        self.sessions = list.as_array().cloned().unwrap_or_default();
        self.settle_refresh()
    }

    /// The in-flight refresh failed. Returns true if it should be retried
    /// because more lifecycle events arrived meanwhile.
    pub fn refresh_failed(&mut self) -> bool {
        self.settle_refresh()
    }

    /// Forget refresh bookkeeping (the connection was torn down).
    pub fn reset_refresh(&mut self) {
        self.refresh_in_flight = false;
        self.refresh_dirty = false;
    }

    /// Whether a refresh is outstanding.
    pub fn refresh_in_flight(&self) -> bool {
        self.refresh_in_flight
    }

    /// Last known session list.
    pub fn sessions(&self) -> &[Value] {
        &self.sessions
    }

    /// Record a message the local user sent.
    pub fn record_outgoing(&mut self, session_key: &str, message: ChatMessage) {
        self.chat.push(session_key, message);
    }

    /// Transcript of a session.
    pub fn transcript(&self, session_key: &str) -> &[ChatMessage] {
        self.chat.messages(session_key)
    }

    fn settle_refresh(&mut self) -> bool {
        if self.refresh_dirty {
            self.refresh_dirty = false;
            self.refresh_in_flight = true;
            true
        } else {
            self.refresh_in_flight = false;
            false
        }
    }
}
