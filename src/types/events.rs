//! Transport payloads and session events.
//!
//! [`TransportEvent`]s flow from the transport into the session;
//! [`SessionEvent`]s flow from the session out to subscribers.

use serde::{Deserialize, Serialize};

use crate::state::ConnectionSnapshot;
use crate::store::{Message, MessageStatus};

/// A message as the transport reports it, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Transport-assigned id, unique per chat.
    pub id: String,
    pub from: String,
    pub to: String,
    pub from_me: bool,
    pub body: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Transport type tag (`chat`, `image`, `document`, ...).
    pub kind: String,
    /// Push name of the sender, if the transport knows it.
    pub notify_name: Option<String>,
    /// Display name of the chat, if the transport knows it.
    pub chat_name: Option<String>,
    /// Last ack code seen by the transport.
    pub ack: Option<i32>,
}

impl RawMessage {
    /// The participant that is not us.
    pub fn counterpart(&self) -> &str {
        if self.from_me {
            &self.to
        } else {
            &self.from
        }
    }
}

/// A chat as listed by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChat {
    pub id: String,
    pub name: String,
    pub is_group: bool,
    pub unread_count: u32,
    /// Unix seconds of the last activity.
    pub timestamp: i64,
}

/// An address-book entry as listed by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawContact {
    pub id: String,
    pub number: String,
    pub name: Option<String>,
    pub push_name: Option<String>,
    pub is_my_contact: bool,
}

/// Options forwarded with an outbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    /// Reply to this message id.
    pub quoted_message_id: Option<String>,
    pub link_preview: bool,
}

/// Events emitted by a transport instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Qr(String),
    Authenticated,
    AuthFailure(String),
    Ready,
    Disconnected(String),
    Message(RawMessage),
    MessageAck(RawMessage, i32),
}

impl TransportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::Qr(_) => "qr",
            TransportEvent::Authenticated => "authenticated",
            TransportEvent::AuthFailure(_) => "auth_failure",
            TransportEvent::Ready => "ready",
            TransportEvent::Disconnected(_) => "disconnected",
            TransportEvent::Message(_) => "message",
            TransportEvent::MessageAck(_, _) => "message_ack",
        }
    }
}

/// Class of a [`SessionEvent`], used to subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChange,
    Qr,
    Authenticated,
    Ready,
    AuthFailure,
    Message,
    MessageStatus,
    Error,
    Disconnected,
}

/// Events published by the session to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChange(ConnectionSnapshot),
    Qr {
        code: String,
    },
    Authenticated,
    Ready,
    AuthFailure {
        reason: String,
    },
    /// A message seen for the first time.
    Message(Message),
    MessageStatus {
        chat_id: String,
        message_id: String,
        status: MessageStatus,
    },
    Error {
        message: String,
    },
    Disconnected {
        reason: String,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::StateChange(_) => EventKind::StateChange,
            SessionEvent::Qr { .. } => EventKind::Qr,
            SessionEvent::Authenticated => EventKind::Authenticated,
            SessionEvent::Ready => EventKind::Ready,
            SessionEvent::AuthFailure { .. } => EventKind::AuthFailure,
            SessionEvent::Message(_) => EventKind::Message,
            SessionEvent::MessageStatus { .. } => EventKind::MessageStatus,
            SessionEvent::Error { .. } => EventKind::Error,
            SessionEvent::Disconnected { .. } => EventKind::Disconnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counterpart_depends_on_direction() {
        let mut raw = RawMessage {
            from: "me@c.us".into(),
            to: "5511@c.us".into(),
            from_me: true,
            ..Default::default()
        };
        assert_eq!(raw.counterpart(), "5511@c.us");

        raw.from_me = false;
        raw.from = "5511@c.us".into();
        raw.to = "me@c.us".into();
        assert_eq!(raw.counterpart(), "5511@c.us");
    }
}
