//! Per-session chat transcript with streaming delta support.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::event::ChatPayload;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Message typed by the operator
    User,
    /// Agent output
    Assistant,
    /// System notice
    System,
}

impl ChatRole {
    /// Parse a wire role; unknown or missing roles are the assistant.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("user") => Self::User,
            Some("system") => Self::System,
            _ => Self::Assistant,
        }
    }
}

/// One transcript message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author
    pub role: ChatRole,
    /// Text so far
    pub content: String,
}

impl ChatMessage {
    /// Build a message.
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// How a chat payload changed the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatChange {
    /// A delta was appended to the trailing assistant message
    Extended,
    /// A new message was started
    Appended,
}

/// Result of applying one chat payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatUpdate {
    /// Session that changed
    pub session_key: String,
    /// Kind of change
    pub change: ChatChange,
    /// The affected message after the change
    pub message: ChatMessage,
}

/// Transcripts keyed by session.
#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    sessions: HashMap<String, Vec<ChatMessage>>,
}

impl ChatLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a streaming chat payload.
    ///
    /// A `delta` extends the session's last message if that message is from
    /// the assistant, and otherwise starts a new assistant message. A
    /// `content` without `delta` is always a new, complete message. A payload
    /// with neither changes nothing.
    pub fn apply(&mut self, payload: &ChatPayload) -> Option<ChatUpdate> {
        let transcript = self.sessions.entry(payload.session_key.clone()).or_default();

        let change = if let Some(delta) = &payload.delta {
            match transcript.last_mut() {
                Some(last) if last.role == ChatRole::Assistant => {
                    last.content.push_str(delta);
                    ChatChange::Extended
                },
                _ => {
                    transcript.push(ChatMessage::new(ChatRole::Assistant, delta.as_str()));
                    ChatChange::Appended
                },
            }
        } else if let Some(content) = &payload.content {
            transcript.push(ChatMessage::new(payload.role(), content.as_str()));
            ChatChange::Appended
        } else {
            return None;
        };

        let message = transcript.last()?.clone();
        Some(ChatUpdate { session_key: payload.session_key.clone(), change, message })
    }

    /// Append a complete message (e.g. one the user just sent).
    pub fn push(&mut self, session_key: &str, message: ChatMessage) {
        self.sessions.entry(session_key.to_string()).or_default().push(message);
    }

    /// Messages of a session, oldest first.
    pub fn messages(&self, session_key: &str) -> &[ChatMessage] {
        self.sessions.get(session_key).map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn delta(text: &str) -> ChatPayload {
        ChatPayload {
            session_key: "main".into(),
            delta: Some(text.into()),
            content: None,
            role: None,
        }
    }

    fn content(text: &str) -> ChatPayload {
        ChatPayload {
            session_key: "main".into(),
            delta: None,
            content: Some(text.into()),
            role: None,
        }
    }

    #[test]
    fn deltas_stream_into_one_assistant_message() {
        let mut log = ChatLog::new();
        log.push("main", ChatMessage::new(ChatRole::User, "hi"));

        let first = log.apply(&delta("He")).unwrap();
        assert_eq!(first.change, ChatChange::Appended);
        let second = log.apply(&delta("llo")).unwrap();
        assert_eq!(second.change, ChatChange::Extended);
        assert_eq!(second.message.content, "Hello");

        assert_eq!(
            log.messages("main"),
            [ChatMessage::new(ChatRole::User, "hi"), ChatMessage::new(ChatRole::Assistant, "Hello")]
        );

        log.apply(&content("Done")).unwrap();
        assert_eq!(log.messages("main").len(), 3);
        assert_eq!(log.messages("main")[2], ChatMessage::new(ChatRole::Assistant, "Done"));
    }

    #[test]
    fn content_never_merges() {
        let mut log = ChatLog::new();
        log.apply(&content("one"));
        log.apply(&content("two"));
        assert_eq!(log.messages("main").len(), 2);
    }

    #[test]
    fn delta_after_content_extends_it() {
        let mut log = ChatLog::new();
        log.apply(&content("Done"));
        log.apply(&delta("!"));
        assert_eq!(log.messages("main"), [ChatMessage::new(ChatRole::Assistant, "Done!")]);
    }

    #[test]
    fn content_role_is_honored() {
        let mut log = ChatLog::new();
        let payload = ChatPayload { role: Some("system".into()), ..content("restarted") };
        log.apply(&payload);
        log.apply(&delta("x"));

        let messages = log.messages("main");
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[1], ChatMessage::new(ChatRole::Assistant, "x"));
    }

    #[test]
    fn empty_delta_still_starts_a_message() {
        let mut log = ChatLog::new();
        log.push("main", ChatMessage::new(ChatRole::User, "hi"));
        assert!(log.apply(&delta("")).is_some());
        assert_eq!(log.messages("main").last().unwrap().role, ChatRole::Assistant);
    }

    #[test]
    fn sessions_are_isolated() {
        let mut log = ChatLog::new();
        log.apply(&delta("a"));
        log.apply(&ChatPayload { session_key: "other".into(), ..delta("b") });

        assert_eq!(log.messages("main")[0].content, "a");
        assert_eq!(log.messages("other")[0].content, "b");
        assert!(log.messages("missing").is_empty());
    }

    #[test]
    fn payload_without_text_is_ignored() {
        let mut log = ChatLog::new();
        let payload = ChatPayload { delta: None, ..content("x") };
        let payload = ChatPayload { content: None, ..payload };
        assert!(log.apply(&payload).is_none());
    }

    proptest! {
        #[test]
        fn consecutive_deltas_concatenate(chunks in prop::collection::vec("[a-z ]{0,8}", 1..20)) {
            let mut log = ChatLog::new();
            log.push("main", ChatMessage::new(ChatRole::User, "q"));
            for chunk in &chunks {
                log.apply(&delta(chunk));
            }

            let messages = log.messages("main");
            prop_assert_eq!(messages.len(), 2);
            prop_assert_eq!(&messages[1].content, &chunks.concat());
        }
    }
}
