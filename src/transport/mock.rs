//! In-process transport.
//!
//! `MockTransport` keeps a scripted view of the network: chats, history and
//! contacts to hand out, failures to inject, and a log of the commands it
//! received. Events are pushed into the session with [`MockTransport::emit`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::sync::Notify;

use crate::transport::{EventSink, Transport, TransportError, TransportFactory};
use crate::types::{RawChat, RawContact, RawMessage, SendOptions, TransportEvent};

/// Chat id the mock uses for the local account.
pub const SELF_ID: &str = "5500000000000@c.us";

/// Generate a message id shaped like the ones WhatsApp Web assigns.
pub fn generate_message_id() -> String {
    let id: u64 = rand::thread_rng().gen();
    format!("3EB0{:016X}", id)
}

/// An inbound text message from `from`.
pub fn incoming(from: &str, id: &str, body: &str, timestamp: i64) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        from: from.to_string(),
        to: SELF_ID.to_string(),
        from_me: false,
        body: body.to_string(),
        timestamp,
        kind: "chat".to_string(),
        ..Default::default()
    }
}

/// A text message we sent to `to`.
pub fn outgoing(to: &str, id: &str, body: &str, timestamp: i64) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        from: SELF_ID.to_string(),
        to: to.to_string(),
        from_me: true,
        body: body.to_string(),
        timestamp,
        kind: "chat".to_string(),
        ack: Some(1),
        ..Default::default()
    }
}

/// A one-to-one chat listing entry.
pub fn chat(id: &str, name: &str, unread_count: u32) -> RawChat {
    RawChat {
        id: id.to_string(),
        name: name.to_string(),
        is_group: false,
        unread_count,
        timestamp: 0,
    }
}

#[derive(Default)]
struct MockState {
    sink: Option<EventSink>,
    chats: Vec<RawChat>,
    history: HashMap<String, Vec<RawMessage>>,
    contacts: Vec<RawContact>,
    start_error: Option<String>,
    send_error: Option<String>,
    destroy_error: Option<String>,
    broken_history: HashSet<String>,
    start_gate: Option<Arc<Notify>>,
    sent: Vec<RawMessage>,
    seen: Vec<String>,
    starts: usize,
    destroyed: bool,
}

/// Scriptable transport. Clones share state.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a chat and the history it returns.
    pub fn with_chat(self, chat: RawChat, history: Vec<RawMessage>) -> Self {
        {
            let mut state = self.state();
            state.history.insert(chat.id.clone(), history);
            state.chats.push(chat);
        }
        self
    }

    pub fn with_contact(self, contact: RawContact) -> Self {
        self.state().contacts.push(contact);
        self
    }

    /// Make `start` fail.
    pub fn failing_start(self, reason: &str) -> Self {
        self.state().start_error = Some(reason.to_string());
        self
    }

    /// Make `send_text` fail.
    pub fn failing_send(self, reason: &str) -> Self {
        self.state().send_error = Some(reason.to_string());
        self
    }

    /// Make `destroy` fail.
    pub fn failing_destroy(self, reason: &str) -> Self {
        self.state().destroy_error = Some(reason.to_string());
        self
    }

    /// Make history loading fail for one chat.
    pub fn failing_history(self, chat_id: &str) -> Self {
        self.state().broken_history.insert(chat_id.to_string());
        self
    }

    /// Hold `start` until `gate` is notified.
    pub fn gated_start(self, gate: Arc<Notify>) -> Self {
        self.state().start_gate = Some(gate);
        self
    }

    /// Push an event into the session. Returns `false` if never started.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let sink = self.state().sink.clone();
        match sink {
            Some(sink) => {
                sink.emit(event).await;
                true
            }
            None => false,
        }
    }

    pub fn generation(&self) -> Option<u64> {
        self.state().sink.as_ref().map(EventSink::generation)
    }

    pub fn sent_messages(&self) -> Vec<RawMessage> {
        self.state().sent.clone()
    }

    pub fn seen_chats(&self) -> Vec<String> {
        self.state().seen.clone()
    }

    pub fn start_count(&self) -> usize {
        self.state().starts
    }

    pub fn is_destroyed(&self) -> bool {
        self.state().destroyed
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start(&self, events: EventSink) -> Result<(), TransportError> {
        let gate = {
            let mut state = self.state();
            state.starts += 1;
            state.sink = Some(events);
            state.start_gate.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let error = self.state().start_error.clone();
        match error {
            Some(reason) => Err(TransportError::StartFailed(reason)),
            None => Ok(()),
        }
    }

    async fn send_text(
        &self,
        chat_id: &str,
        content: &str,
        _options: &SendOptions,
    ) -> Result<RawMessage, TransportError> {
        let mut state = self.state();
        if let Some(reason) = &state.send_error {
            return Err(TransportError::SendFailed(reason.clone()));
        }
        let message = RawMessage {
            id: generate_message_id(),
            from: SELF_ID.to_string(),
            to: chat_id.to_string(),
            from_me: true,
            body: content.to_string(),
            timestamp: Utc::now().timestamp(),
            kind: "chat".to_string(),
            ack: Some(0),
            ..Default::default()
        };
        state.sent.push(message.clone());
        Ok(message)
    }

    async fn send_seen(&self, chat_id: &str) -> Result<(), TransportError> {
        self.state().seen.push(chat_id.to_string());
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.destroyed = true;
        state.sink = None;
        match &state.destroy_error {
            Some(reason) => Err(TransportError::CommandFailed(reason.clone())),
            None => Ok(()),
        }
    }

    async fn chats(&self) -> Result<Vec<RawChat>, TransportError> {
        Ok(self.state().chats.clone())
    }

    async fn chat_messages(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<RawMessage>, TransportError> {
        let state = self.state();
        if state.broken_history.contains(chat_id) {
            return Err(TransportError::CommandFailed(format!(
                "history unavailable for {chat_id}"
            )));
        }
        let history = state.history.get(chat_id).cloned().unwrap_or_default();
        let skip = history.len().saturating_sub(limit);
        Ok(history.into_iter().skip(skip).collect())
    }

    async fn contacts(&self) -> Result<Vec<RawContact>, TransportError> {
        Ok(self.state().contacts.clone())
    }
}

/// Hands out queued mock transports, or fresh ones once the queue is empty,
/// and remembers every instance it created.
#[derive(Default)]
pub struct MockFactory {
    queued: Mutex<VecDeque<MockTransport>>,
    created: Mutex<Vec<MockTransport>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose first transport is `transport`.
    pub fn with(transport: MockTransport) -> Self {
        let factory = Self::new();
        factory.queue(transport);
        factory
    }

    pub fn queue(&self, transport: MockTransport) {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(transport);
    }

    pub fn created(&self) -> Vec<MockTransport> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn latest(&self) -> Option<MockTransport> {
        self.created().pop()
    }
}

impl TransportFactory for MockFactory {
    fn create(&self) -> Arc<dyn Transport> {
        let transport = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default();
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transport.clone());
        Arc::new(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_message_id() {
        let id1 = generate_message_id();
        let id2 = generate_message_id();

        assert!(id1.starts_with("3EB0"));
        assert_eq!(id1.len(), 20);
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn test_history_returns_most_recent_window() {
        let history = (0..5)
            .map(|i| incoming("1@c.us", &format!("m{i}"), "x", i))
            .collect();
        let transport = MockTransport::new().with_chat(chat("1@c.us", "One", 0), history);

        let window = transport.chat_messages("1@c.us", 2).await.unwrap();
        let ids: Vec<&str> = window.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn test_emit_before_start_is_rejected() {
        let transport = MockTransport::new();
        assert!(!transport.emit(TransportEvent::Ready).await);
    }

    #[test]
    fn test_factory_prefers_queued_transports() {
        let factory = MockFactory::with(MockTransport::new().failing_send("offline"));
        let _first = factory.create();
        let _second = factory.create();

        let created = factory.created();
        assert_eq!(created.len(), 2);
        assert!(created[0].state().send_error.is_some());
        assert!(created[1].state().send_error.is_none());
    }
}
