//! Transport seam.
//!
//! The session never talks to the network itself. A [`Transport`] carries out
//! commands (start, send, mark seen, teardown, listings) and reports what
//! happens through the [`EventSink`] it was started with. A fresh transport is
//! created from a [`TransportFactory`] for every connection attempt, and every
//! sink is tagged with that attempt's generation so events from a replaced
//! transport can be recognized and dropped.

pub mod mock;

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{RawChat, RawContact, RawMessage, SendOptions, TransportEvent};

/// Transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("session start failed: {0}")]
    StartFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport closed")]
    Closed,
}

/// Commands a transport instance must support.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin the session. Events are reported through `events` from here on.
    async fn start(&self, events: EventSink) -> Result<(), TransportError>;

    /// Send a text message and return it with its transport-assigned id.
    async fn send_text(
        &self,
        chat_id: &str,
        content: &str,
        options: &SendOptions,
    ) -> Result<RawMessage, TransportError>;

    /// Tell the network the chat has been read.
    async fn send_seen(&self, chat_id: &str) -> Result<(), TransportError>;

    /// Tear the session down.
    async fn destroy(&self) -> Result<(), TransportError>;

    async fn chats(&self) -> Result<Vec<RawChat>, TransportError>;

    /// The most recent `limit` messages of a chat, oldest first.
    async fn chat_messages(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<RawMessage>, TransportError>;

    async fn contacts(&self) -> Result<Vec<RawContact>, TransportError>;
}

/// Creates one transport instance per connection attempt.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Arc<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Arc<dyn Transport> + Send + Sync,
{
    fn create(&self) -> Arc<dyn Transport> {
        self()
    }
}

/// Receiver side of transport events.
#[async_trait]
pub trait TransportEventHandler: Send + Sync {
    async fn handle_transport_event(&self, generation: u64, event: TransportEvent);
}

/// Handle a transport uses to report events, tagged with its generation.
#[derive(Clone)]
pub struct EventSink {
    generation: u64,
    handler: Weak<dyn TransportEventHandler>,
}

impl EventSink {
    pub fn new(generation: u64, handler: Weak<dyn TransportEventHandler>) -> Self {
        Self {
            generation,
            handler,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver an event and wait until it has been handled.
    ///
    /// Transports must call this sequentially; events are processed in the
    /// order they are emitted.
    pub async fn emit(&self, event: TransportEvent) {
        match self.handler.upgrade() {
            Some(handler) => handler.handle_transport_event(self.generation, event).await,
            None => log::debug!(
                "dropping {} event from generation {}: session is gone",
                event.name(),
                self.generation
            ),
        }
    }
}

/// Run a transport command, bounded by `timeout` when one is configured.
pub(crate) async fn with_deadline<T, F>(
    timeout: Option<Duration>,
    command: F,
) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, command)
            .await
            .map_err(|_| TransportError::Timeout(limit))?,
        None => command.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_passes_through_without_timeout() {
        let result = with_deadline(None, async { Ok::<_, TransportError>(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let limit = Duration::from_millis(10);
        let result = with_deadline(Some(limit), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, TransportError>(())
        })
        .await;
        assert_eq!(result, Err(TransportError::Timeout(limit)));
    }
}
