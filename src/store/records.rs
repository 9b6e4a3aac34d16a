//! Records persisted by the session: contacts, messages, message logs,
//! QR codes and API status snapshots.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Received,
    Failed,
}

impl MessageStatus {
    /// Map a transport acknowledgement code.
    ///
    /// Codes `0..=2` mean the message left the device, `3` that it reached the
    /// recipient, `4` and `5` that it was read (or played). Negative codes are
    /// transport-side errors.
    pub fn from_ack(code: i32) -> Self {
        match code {
            c if c < 0 => MessageStatus::Failed,
            0..=2 => MessageStatus::Sent,
            3 => MessageStatus::Delivered,
            _ => MessageStatus::Read,
        }
    }

    /// Status after moving to `next`, or `None` if the move is not forward.
    ///
    /// Own messages go `sent -> delivered -> read` (or `sent -> failed`) and
    /// never become `received`; inbound messages only go `received -> read`.
    pub fn advance(self, next: MessageStatus, from_me: bool) -> Option<MessageStatus> {
        use MessageStatus::*;

        let legal = if from_me {
            matches!(
                (self, next),
                (Sent, Delivered) | (Sent, Read) | (Sent, Failed) | (Delivered, Read)
            )
        } else {
            matches!((self, next), (Received, Read))
        };
        legal.then_some(next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Received => "received",
            MessageStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Coarse message content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Media,
    Document,
    Location,
}

impl MessageType {
    /// Classify the transport's message type tag.
    pub fn from_transport(kind: &str) -> Self {
        match kind {
            "image" | "video" | "audio" | "ptt" | "sticker" | "gif" | "media" => MessageType::Media,
            "document" => MessageType::Document,
            "location" | "live_location" => MessageType::Location,
            _ => MessageType::Text,
        }
    }
}

/// Summary of the most recent message in a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub message_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
}

/// A one-to-one conversation partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Canonical chat id (`number@c.us`).
    pub id: String,
    pub name: String,
    pub number: String,
    pub last_message: Option<LastMessage>,
    pub unread_count: u32,
}

impl Contact {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            number: String::new(),
            last_message: None,
            unread_count: 0,
        }
    }

    fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_message.as_ref().map(|m| m.timestamp)
    }
}

/// Partial contact update. `None` fields leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactPatch {
    pub name: Option<String>,
    pub number: Option<String>,
    pub last_message: Option<LastMessage>,
    pub unread_count: Option<u32>,
}

impl ContactPatch {
    pub(crate) fn apply(self, contact: &mut Contact) {
        if let Some(name) = self.name.filter(|n| !n.is_empty()) {
            contact.name = name;
        }
        if let Some(number) = self.number.filter(|n| !n.is_empty()) {
            contact.number = number;
        }
        if let Some(last) = self.last_message {
            contact.last_message = Some(last);
        }
        if let Some(unread) = self.unread_count {
            contact.unread_count = unread;
        }
    }
}

/// A message in a one-to-one chat, keyed by `(chat_id, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub from_me: bool,
    pub sender: String,
    pub status: MessageStatus,
    pub message_type: MessageType,
}

impl Message {
    /// Merge a re-saved copy into the stored record.
    ///
    /// `status` is always overwritten; text fields only when the incoming
    /// copy carries a value.
    pub(crate) fn merge(&mut self, incoming: Message) {
        if !incoming.content.is_empty() {
            self.content = incoming.content;
        }
        if !incoming.sender.is_empty() {
            self.sender = incoming.sender;
        }
        self.timestamp = incoming.timestamp;
        self.from_me = incoming.from_me;
        self.message_type = incoming.message_type;
        self.status = incoming.status;
    }

    pub fn summary(&self) -> LastMessage {
        LastMessage {
            message_id: self.id.clone(),
            content: self.content.clone(),
            timestamp: self.timestamp,
            status: self.status,
        }
    }
}

/// Direction of a logged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Append-only audit entry, one per message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLog {
    pub log_id: Uuid,
    pub chat_id: String,
    pub message_id: String,
    pub direction: Direction,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
}

impl MessageLog {
    pub fn for_message(message: &Message, created_at: DateTime<Utc>) -> Self {
        Self {
            log_id: Uuid::new_v4(),
            chat_id: message.chat_id.clone(),
            message_id: message.id.clone(),
            direction: if message.from_me {
                Direction::Outbound
            } else {
                Direction::Inbound
            },
            content: message.content.clone(),
            created_at,
            delivered_at: None,
            read_at: None,
            failed_reason: None,
        }
    }
}

/// Status timestamps to record on a log entry. Each is written at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogPatch {
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
}

impl LogPatch {
    pub fn is_empty(&self) -> bool {
        self.delivered_at.is_none() && self.read_at.is_none() && self.failed_reason.is_none()
    }

    /// Returns whether anything changed.
    pub(crate) fn apply(self, log: &mut MessageLog) -> bool {
        let mut changed = false;
        if log.delivered_at.is_none() && self.delivered_at.is_some() {
            log.delivered_at = self.delivered_at;
            changed = true;
        }
        if log.read_at.is_none() && self.read_at.is_some() {
            log.read_at = self.read_at;
            changed = true;
        }
        if log.failed_reason.is_none() && self.failed_reason.is_some() {
            log.failed_reason = self.failed_reason;
            changed = true;
        }
        changed
    }
}

/// A QR code issued for pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrCodeRecord {
    pub code: String,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub scanned_at: Option<DateTime<Utc>>,
}

impl QrCodeRecord {
    pub fn new(code: impl Into<String>, generated_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            code: code.into(),
            generated_at,
            expires_at: generated_at + ttl,
            scanned_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Health of the upstream session at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiHealth {
    Online,
    Offline,
}

/// Point-in-time health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiStatus {
    pub status: ApiHealth,
    pub rate_limit_remaining: Option<u32>,
    pub rate_limit_reset: Option<DateTime<Utc>>,
    pub response_time_ms: Option<u64>,
    pub error_message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ApiStatus {
    pub fn online(recorded_at: DateTime<Utc>) -> Self {
        Self {
            status: ApiHealth::Online,
            rate_limit_remaining: None,
            rate_limit_reset: None,
            response_time_ms: None,
            error_message: None,
            recorded_at,
        }
    }

    pub fn offline(reason: impl Into<String>, recorded_at: DateTime<Utc>) -> Self {
        Self {
            status: ApiHealth::Offline,
            error_message: Some(reason.into()),
            ..Self::online(recorded_at)
        }
    }

    pub fn with_response_time(mut self, millis: u64) -> Self {
        self.response_time_ms = Some(millis);
        self
    }
}

/// Offset/limit pagination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Page {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset,
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub(crate) fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// Contact list filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactFilter {
    pub unread_only: bool,
    pub name_contains: Option<String>,
}

impl ContactFilter {
    pub fn matches(&self, contact: &Contact) -> bool {
        if self.unread_only && contact.unread_count == 0 {
            return false;
        }
        if let Some(needle) = &self.name_contains {
            let needle = needle.to_lowercase();
            if !contact.name.to_lowercase().contains(&needle) && !contact.number.contains(&needle) {
                return false;
            }
        }
        true
    }
}

/// Message list filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    /// Counterpart chat.
    pub chat_id: Option<String>,
    pub status: Option<MessageStatus>,
    pub message_type: Option<MessageType>,
    pub from_me: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl MessageFilter {
    pub fn for_chat(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: Some(chat_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.chat_id.as_ref().map_or(true, |c| *c == message.chat_id)
            && self.status.map_or(true, |s| s == message.status)
            && self.message_type.map_or(true, |t| t == message.message_type)
            && self.from_me.map_or(true, |f| f == message.from_me)
            && self.since.map_or(true, |t| message.timestamp >= t)
            && self.until.map_or(true, |t| message.timestamp < t)
    }
}

/// Message log filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub chat_id: Option<String>,
    pub direction: Option<Direction>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl LogFilter {
    pub fn matches(&self, log: &MessageLog) -> bool {
        self.chat_id.as_ref().map_or(true, |c| *c == log.chat_id)
            && self.direction.map_or(true, |d| d == log.direction)
            && self.since.map_or(true, |t| log.created_at >= t)
            && self.until.map_or(true, |t| log.created_at < t)
    }
}

/// Most recent activity first, then by id.
pub(crate) fn contact_order(a: &Contact, b: &Contact) -> std::cmp::Ordering {
    b.last_activity()
        .cmp(&a.last_activity())
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_mapping() {
        assert_eq!(MessageStatus::from_ack(-1), MessageStatus::Failed);
        assert_eq!(MessageStatus::from_ack(1), MessageStatus::Sent);
        assert_eq!(MessageStatus::from_ack(3), MessageStatus::Delivered);
        assert_eq!(MessageStatus::from_ack(4), MessageStatus::Read);
        assert_eq!(MessageStatus::from_ack(5), MessageStatus::Read);
    }

    #[test]
    fn test_outbound_status_only_moves_forward() {
        use MessageStatus::*;

        assert_eq!(Sent.advance(Delivered, true), Some(Delivered));
        assert_eq!(Delivered.advance(Read, true), Some(Read));
        assert_eq!(Sent.advance(Read, true), Some(Read));
        assert_eq!(Read.advance(Delivered, true), None);
        assert_eq!(Delivered.advance(Failed, true), None);
        assert_eq!(Sent.advance(Received, true), None);
        assert_eq!(Sent.advance(Sent, true), None);
    }

    #[test]
    fn test_inbound_status_only_reaches_read() {
        use MessageStatus::*;

        assert_eq!(Received.advance(Read, false), Some(Read));
        assert_eq!(Received.advance(Delivered, false), None);
        assert_eq!(Read.advance(Received, false), None);
    }

    #[test]
    fn test_contact_patch_keeps_unset_fields() {
        let mut contact = Contact::new("1@c.us");
        contact.name = "Alice".into();
        contact.unread_count = 3;

        ContactPatch {
            number: Some("1".into()),
            name: Some(String::new()),
            ..Default::default()
        }
        .apply(&mut contact);

        assert_eq!(contact.name, "Alice");
        assert_eq!(contact.number, "1");
        assert_eq!(contact.unread_count, 3);
    }

    #[test]
    fn test_log_patch_sets_fields_once() {
        let now = Utc::now();
        let message = Message {
            id: "m1".into(),
            chat_id: "1@c.us".into(),
            content: "hi".into(),
            timestamp: now,
            from_me: true,
            sender: "me".into(),
            status: MessageStatus::Sent,
            message_type: MessageType::Text,
        };
        let mut log = MessageLog::for_message(&message, now);
        assert_eq!(log.direction, Direction::Outbound);

        let first = LogPatch {
            read_at: Some(now),
            ..Default::default()
        };
        assert!(first.apply(&mut log));

        let later = LogPatch {
            read_at: Some(now + Duration::seconds(5)),
            ..Default::default()
        };
        assert!(!later.apply(&mut log));
        assert_eq!(log.read_at, Some(now));
    }

    #[test]
    fn test_page_applies_offset_and_limit() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(Page::new(3, 2).apply(items.clone()), vec![2, 3, 4]);
        assert_eq!(Page::all().apply(items).len(), 10);
    }
}
