//! Message synchronization.
//!
//! Turns transport message and ack events into store writes. Every write for a
//! chat happens while holding that chat's lock, so live events, bulk import
//! and outbound sends for the same chat apply in order while different chats
//! proceed independently. Ingestion is keyed by `(chat_id, message_id)`:
//! replaying an event converges to the same records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::sync::{Mutex as ChatMutex, OwnedMutexGuard};

use crate::config::SessionConfig;
use crate::store::{
    ContactPatch, LastMessage, LogPatch, Message, MessageFilter, MessageLog, MessageStatus,
    MessageType, Page, RecordStore, StoreError,
};
use crate::transport::{with_deadline, Transport, TransportError};
use crate::types::{normalize_chat_id, ParseJIDError, RawChat, RawMessage, SendOptions, JID};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid chat id: {0}")]
    InvalidChatId(#[from] ParseJIDError),
    #[error("persistence error: {0}")]
    Store(#[from] StoreError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Outcome of ingesting one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub message: Message,
    /// `false` when the message was already known.
    pub inserted: bool,
}

/// A status transition applied by an ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub chat_id: String,
    pub message_id: String,
    pub previous: MessageStatus,
    pub status: MessageStatus,
}

/// What a bulk import did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub chats: usize,
    pub skipped_chats: usize,
    pub messages: usize,
    pub failed_chats: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IngestMode {
    /// A live event: new inbound messages count as unread.
    Live,
    /// History pulled during bulk import; the chat listing owns unread counts.
    History,
}

/// One async mutex per chat. Entries hold only weak references; a lock lives
/// as long as someone is holding or waiting on it.
#[derive(Default)]
struct ChatLocks {
    locks: Mutex<HashMap<String, Weak<ChatMutex<()>>>>,
}

impl ChatLocks {
    const PRUNE_THRESHOLD: usize = 128;

    async fn acquire(&self, chat_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() > Self::PRUNE_THRESHOLD {
                locks.retain(|_, weak| weak.strong_count() > 0);
            }
            match locks.get(chat_id).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(ChatMutex::new(()));
                    locks.insert(chat_id.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub struct MessageSynchronizer {
    store: Arc<dyn RecordStore>,
    import_limit: usize,
    import_concurrency: usize,
    command_timeout: Option<Duration>,
    chat_locks: ChatLocks,
}

impl MessageSynchronizer {
    pub fn new(store: Arc<dyn RecordStore>, config: &SessionConfig) -> Self {
        Self {
            store,
            import_limit: config.import_message_limit,
            import_concurrency: config.import_concurrency.max(1),
            command_timeout: config.command_timeout(),
            chat_locks: ChatLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Record a message event. Returns `None` for chats this session does not
    /// track (groups, broadcasts).
    pub async fn ingest(&self, raw: &RawMessage) -> SyncResult<Option<Ingested>> {
        self.ingest_with(raw, IngestMode::Live).await
    }

    async fn ingest_with(&self, raw: &RawMessage, mode: IngestMode) -> SyncResult<Option<Ingested>> {
        let Some(chat_id) = tracked_chat_id(raw.counterpart())? else {
            log::debug!("skipping message {} from untracked chat {}", raw.id, raw.counterpart());
            return Ok(None);
        };
        let _chat = self.chat_locks.acquire(&chat_id).await;
        self.ingest_locked(&chat_id, raw, mode).map(Some)
    }

    fn ingest_locked(&self, chat_id: &str, raw: &RawMessage, mode: IngestMode) -> SyncResult<Ingested> {
        let existing = self.store.get_message(chat_id, &raw.id)?;
        let reported = reported_status(raw);
        let status = match &existing {
            Some(stored) => stored
                .status
                .advance(reported, stored.from_me)
                .unwrap_or(stored.status),
            None => reported,
        };

        let message = Message {
            id: raw.id.clone(),
            chat_id: chat_id.to_string(),
            content: raw.body.clone(),
            timestamp: timestamp_of(raw.timestamp),
            from_me: raw.from_me,
            sender: normalize_chat_id(&raw.from).unwrap_or_else(|_| raw.from.clone()),
            status,
            message_type: MessageType::from_transport(&raw.kind),
        };
        let upserted = self.store.upsert_message(message)?;
        let now = Utc::now();
        self.store
            .append_log(MessageLog::for_message(&upserted.record, now))?;
        let patch = log_patch_for(status, now);
        if !patch.is_empty() {
            self.patch_log(chat_id, &raw.id, patch)?;
        }

        let contact = self.store.get_contact(chat_id)?;
        let mut update = ContactPatch::default();
        if contact.as_ref().map_or(true, |c| c.name.is_empty()) {
            update.name = Some(display_name(raw, chat_id));
        }
        if contact.as_ref().map_or(true, |c| c.number.is_empty()) {
            update.number = Some(number_of(chat_id));
        }
        if upserted.inserted && !raw.from_me && mode == IngestMode::Live {
            update.unread_count = Some(contact.as_ref().map_or(0, |c| c.unread_count) + 1);
        }
        let last = contact.as_ref().and_then(|c| c.last_message.as_ref());
        if supersedes(last, &upserted.record) {
            update.last_message = Some(upserted.record.summary());
        }
        self.store.upsert_contact(chat_id, update)?;

        Ok(Ingested {
            message: upserted.record,
            inserted: upserted.inserted,
        })
    }

    /// Apply a delivery acknowledgement. Acks that would move the status
    /// backwards, or that refer to unknown or inbound messages, are ignored.
    pub async fn ingest_ack(&self, raw: &RawMessage, ack: i32) -> SyncResult<Option<StatusChange>> {
        let Some(chat_id) = tracked_chat_id(raw.counterpart())? else {
            return Ok(None);
        };
        let _chat = self.chat_locks.acquire(&chat_id).await;

        let Some(mut message) = self.store.get_message(&chat_id, &raw.id)? else {
            log::debug!("ack {} for unknown message {} in {}", ack, raw.id, chat_id);
            return Ok(None);
        };
        if !message.from_me {
            return Ok(None);
        }

        let previous = message.status;
        let Some(status) = previous.advance(MessageStatus::from_ack(ack), true) else {
            log::debug!(
                "ignoring ack {} for {}: already {}",
                ack,
                raw.id,
                previous
            );
            return Ok(None);
        };

        message.status = status;
        let stored = self.store.upsert_message(message)?.record;
        let now = Utc::now();
        self.patch_log(&chat_id, &raw.id, log_patch_for(status, now))?;
        self.refresh_last_message(&chat_id, &stored)?;

        Ok(Some(StatusChange {
            chat_id,
            message_id: raw.id.clone(),
            previous,
            status,
        }))
    }

    /// Send through `transport` and record the result. Nothing is written if
    /// the transport fails.
    pub async fn send(
        &self,
        transport: &dyn Transport,
        to: &str,
        content: &str,
        options: &SendOptions,
    ) -> SyncResult<Message> {
        let chat_id = tracked_chat_id(to)?.ok_or_else(|| {
            SyncError::InvalidChatId(ParseJIDError(format!("`{to}` is not a one-to-one chat")))
        })?;
        let sent = with_deadline(
            self.command_timeout,
            transport.send_text(&chat_id, content, options),
        )
        .await?;

        let raw = RawMessage {
            to: chat_id.clone(),
            from_me: true,
            body: if sent.body.is_empty() {
                content.to_string()
            } else {
                sent.body.clone()
            },
            timestamp: if sent.timestamp > 0 {
                sent.timestamp
            } else {
                Utc::now().timestamp()
            },
            // A fresh send is `sent` whatever the transport reported so far.
            ack: None,
            ..sent
        };

        let _chat = self.chat_locks.acquire(&chat_id).await;
        let ingested = self.ingest_locked(&chat_id, &raw, IngestMode::Live)?;
        Ok(ingested.message)
    }

    /// Reset the unread counter and mark inbound messages read. Own messages
    /// are left alone. Returns how many messages changed.
    pub async fn mark_as_read(&self, chat_id: &str) -> SyncResult<usize> {
        let chat_id = normalize_chat_id(chat_id)?;
        let _chat = self.chat_locks.acquire(&chat_id).await;

        let unread = MessageFilter {
            chat_id: Some(chat_id.clone()),
            status: Some(MessageStatus::Received),
            from_me: Some(false),
            ..Default::default()
        };
        let now = Utc::now();
        let mut changed = 0;
        for mut message in self.store.list_messages(&unread, Page::all())? {
            message.status = MessageStatus::Read;
            let id = message.id.clone();
            let stored = self.store.upsert_message(message)?.record;
            self.patch_log(&chat_id, &id, log_patch_for(MessageStatus::Read, now))?;
            self.refresh_last_message(&chat_id, &stored)?;
            changed += 1;
        }

        if self.store.get_contact(&chat_id)?.is_some() {
            self.store.upsert_contact(
                &chat_id,
                ContactPatch {
                    unread_count: Some(0),
                    ..Default::default()
                },
            )?;
        }
        Ok(changed)
    }

    /// Import chats and their recent history after the session becomes ready.
    ///
    /// A chat whose history cannot be loaded is logged and skipped; the rest
    /// of the import continues.
    pub async fn bulk_import(&self, transport: &dyn Transport) -> SyncResult<ImportSummary> {
        let chats = with_deadline(self.command_timeout, transport.chats()).await?;
        let mut summary = ImportSummary::default();

        let (direct, skipped): (Vec<RawChat>, Vec<RawChat>) =
            chats.into_iter().partition(|chat| {
                !chat.is_group && chat.id.parse::<JID>().map_or(false, |jid| jid.is_user())
            });
        summary.skipped_chats = skipped.len();

        let results: Vec<(String, SyncResult<usize>)> = stream::iter(direct)
            .map(|chat| async move {
                let result = self.import_chat(transport, &chat).await;
                (chat.id, result)
            })
            .buffer_unordered(self.import_concurrency)
            .collect()
            .await;

        for (chat_id, result) in results {
            match result {
                Ok(count) => {
                    summary.chats += 1;
                    summary.messages += count;
                }
                Err(err) => {
                    log::warn!("skipping history of {}: {}", chat_id, err);
                    summary.failed_chats.push(chat_id);
                }
            }
        }
        summary.failed_chats.sort();
        Ok(summary)
    }

    async fn import_chat(&self, transport: &dyn Transport, chat: &RawChat) -> SyncResult<usize> {
        let chat_id = normalize_chat_id(&chat.id)?;
        {
            let _chat = self.chat_locks.acquire(&chat_id).await;
            self.store.upsert_contact(
                &chat_id,
                ContactPatch {
                    name: Some(chat.name.clone()),
                    number: Some(number_of(&chat_id)),
                    ..Default::default()
                },
            )?;
        }

        let history = with_deadline(
            self.command_timeout,
            transport.chat_messages(&chat.id, self.import_limit),
        )
        .await?;

        let mut imported = 0;
        for raw in &history {
            if self.ingest_with(raw, IngestMode::History).await?.is_some() {
                imported += 1;
            }
        }

        let _chat = self.chat_locks.acquire(&chat_id).await;
        self.store.upsert_contact(
            &chat_id,
            ContactPatch {
                unread_count: Some(chat.unread_count),
                ..Default::default()
            },
        )?;
        Ok(imported)
    }

    /// Messages restored from an older snapshot may have no log entry.
    fn patch_log(&self, chat_id: &str, message_id: &str, patch: LogPatch) -> SyncResult<()> {
        match self.store.update_log(chat_id, message_id, patch) {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound) => {
                log::warn!("no log entry for message {} in {}", message_id, chat_id);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Keep the contact's summary in step when its last message changes.
    fn refresh_last_message(&self, chat_id: &str, message: &Message) -> SyncResult<()> {
        let Some(contact) = self.store.get_contact(chat_id)? else {
            return Ok(());
        };
        if supersedes(contact.last_message.as_ref(), message) {
            self.store.upsert_contact(
                chat_id,
                ContactPatch {
                    last_message: Some(message.summary()),
                    ..Default::default()
                },
            )?;
        }
        Ok(())
    }
}

/// Canonical id of a one-to-one chat, or `None` for groups and broadcasts.
fn tracked_chat_id(participant: &str) -> SyncResult<Option<String>> {
    let jid: JID = participant.parse()?;
    if !jid.is_user() {
        return Ok(None);
    }
    Ok(Some(jid.to_non_ad().to_chat_id()))
}

fn reported_status(raw: &RawMessage) -> MessageStatus {
    if raw.from_me {
        raw.ack.map_or(MessageStatus::Sent, MessageStatus::from_ack)
    } else {
        MessageStatus::Received
    }
}

fn log_patch_for(status: MessageStatus, now: DateTime<Utc>) -> LogPatch {
    match status {
        MessageStatus::Delivered => LogPatch {
            delivered_at: Some(now),
            ..Default::default()
        },
        // Read implies delivered; fills `delivered_at` if that ack was skipped.
        MessageStatus::Read => LogPatch {
            delivered_at: Some(now),
            read_at: Some(now),
            ..Default::default()
        },
        MessageStatus::Failed => LogPatch {
            failed_reason: Some("transport reported delivery error".to_string()),
            ..Default::default()
        },
        MessageStatus::Sent | MessageStatus::Received => LogPatch::default(),
    }
}

/// Latest by timestamp, not by arrival. The same message always refreshes.
fn supersedes(current: Option<&LastMessage>, candidate: &Message) -> bool {
    match current {
        None => true,
        Some(last) if last.message_id == candidate.id => true,
        Some(last) => candidate.timestamp >= last.timestamp,
    }
}

fn timestamp_of(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

fn number_of(chat_id: &str) -> String {
    chat_id.split('@').next().unwrap_or(chat_id).to_string()
}

fn display_name(raw: &RawMessage, chat_id: &str) -> String {
    let from_chat = raw.chat_name.as_deref().filter(|n| !n.is_empty());
    let from_sender = if raw.from_me {
        None
    } else {
        raw.notify_name.as_deref().filter(|n| !n.is_empty())
    };
    from_chat
        .or(from_sender)
        .map(str::to_string)
        .unwrap_or_else(|| number_of(chat_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        ContactFilter, ContactStore, Direction, LogFilter, MemoryStore, MessageLogStore,
        MessageStore,
    };
    use crate::transport::mock::{self, MockTransport};

    const ALICE: &str = "5511999999991@c.us";
    const BOB: &str = "5511999999992@c.us";

    fn synchronizer() -> (Arc<MemoryStore>, MessageSynchronizer) {
        let store = Arc::new(MemoryStore::new());
        let sync = MessageSynchronizer::new(store.clone(), &SessionConfig::default());
        (store, sync)
    }

    #[tokio::test]
    async fn test_ingest_twice_is_idempotent() {
        let (store, sync) = synchronizer();
        let mut raw = mock::incoming(ALICE, "m1", "hello", 1_700_000_000);
        raw.notify_name = Some("Alice".into());

        let first = sync.ingest(&raw).await.unwrap().unwrap();
        let second = sync.ingest(&raw).await.unwrap().unwrap();
        assert!(first.inserted);
        assert!(!second.inserted);

        let messages = store.list_messages(&MessageFilter::for_chat(ALICE), Page::all()).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, MessageStatus::Received);
        assert_eq!(store.list_logs(&LogFilter::default(), Page::all()).unwrap().len(), 1);

        let contact = store.get_contact(ALICE).unwrap().unwrap();
        assert_eq!(contact.unread_count, 1);
        assert_eq!(contact.name, "Alice");
        assert_eq!(contact.number, "5511999999991");
    }

    #[tokio::test]
    async fn test_ingest_normalizes_chat_id_and_skips_groups() {
        let (store, sync) = synchronizer();
        let raw = mock::incoming("5511999999991:4@s.whatsapp.net", "m1", "hey", 10);
        let ingested = sync.ingest(&raw).await.unwrap().unwrap();
        assert_eq!(ingested.message.chat_id, ALICE);

        let group = mock::incoming("120363000000000000@g.us", "g1", "all", 10);
        assert!(sync.ingest(&group).await.unwrap().is_none());
        assert!(store.get_contact("120363000000000000@g.us").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_contact_name_falls_back_to_number() {
        let (store, sync) = synchronizer();
        sync.ingest(&mock::incoming(BOB, "m1", "hi", 10)).await.unwrap();
        let contact = store.get_contact(BOB).unwrap().unwrap();
        assert_eq!(contact.name, "5511999999992");
    }

    #[tokio::test]
    async fn test_last_message_follows_timestamp_not_arrival() {
        let (store, sync) = synchronizer();
        sync.ingest(&mock::incoming(ALICE, "new", "newer", 200)).await.unwrap();
        sync.ingest(&mock::incoming(ALICE, "old", "older", 100)).await.unwrap();

        let contact = store.get_contact(ALICE).unwrap().unwrap();
        let last = contact.last_message.unwrap();
        assert_eq!(last.message_id, "new");
        assert_eq!(last.content, "newer");
        assert_eq!(contact.unread_count, 2);
    }

    #[tokio::test]
    async fn test_out_of_order_acks_only_move_forward() {
        let (store, sync) = synchronizer();
        let transport = MockTransport::new();
        let sent = sync
            .send(&transport, ALICE, "hi", &SendOptions::default())
            .await
            .unwrap();
        let raw = mock::outgoing(ALICE, &sent.id, "hi", 0);

        let read = sync.ingest_ack(&raw, 4).await.unwrap().unwrap();
        assert_eq!(read.previous, MessageStatus::Sent);
        assert_eq!(read.status, MessageStatus::Read);

        // Late delivery ack is stale.
        assert!(sync.ingest_ack(&raw, 3).await.unwrap().is_none());

        let stored = store.get_message(ALICE, &sent.id).unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Read);
        let log = store.get_log(ALICE, &sent.id).unwrap().unwrap();
        assert!(log.delivered_at.is_some());
        assert!(log.read_at.is_some());
        assert!(log.delivered_at <= log.read_at);
        assert_eq!(
            store.get_contact(ALICE).unwrap().unwrap().last_message.unwrap().status,
            MessageStatus::Read
        );
    }

    #[tokio::test]
    async fn test_ack_sets_log_timestamps_once() {
        let (store, sync) = synchronizer();
        let transport = MockTransport::new();
        let sent = sync
            .send(&transport, ALICE, "hi", &SendOptions::default())
            .await
            .unwrap();
        let raw = mock::outgoing(ALICE, &sent.id, "hi", 0);

        sync.ingest_ack(&raw, 3).await.unwrap().unwrap();
        let delivered_at = store.get_log(ALICE, &sent.id).unwrap().unwrap().delivered_at;
        assert!(delivered_at.is_some());

        sync.ingest_ack(&raw, 4).await.unwrap().unwrap();
        let log = store.get_log(ALICE, &sent.id).unwrap().unwrap();
        assert_eq!(log.delivered_at, delivered_at);
        assert!(log.read_at.is_some());
    }

    #[tokio::test]
    async fn test_ack_for_unknown_or_inbound_message_is_ignored() {
        let (_store, sync) = synchronizer();
        let unknown = mock::outgoing(ALICE, "missing", "x", 10);
        assert!(sync.ingest_ack(&unknown, 3).await.unwrap().is_none());

        let inbound = mock::incoming(ALICE, "in1", "x", 10);
        sync.ingest(&inbound).await.unwrap();
        assert!(sync.ingest_ack(&inbound, 4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_to_group_is_rejected_before_transport() {
        let (store, sync) = synchronizer();
        let transport = MockTransport::new();

        let err = sync
            .send(&transport, "120363000000000000@g.us", "hi all", &SendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidChatId(_)));
        assert!(transport.sent_messages().is_empty());
        assert!(store.list_contacts(&ContactFilter::default(), Page::all()).unwrap().is_empty());
        assert!(store.list_messages(&MessageFilter::default(), Page::all()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chat_locks_are_shared_while_held_and_pruned_after() {
        let locks = ChatLocks::default();

        let held = locks.acquire(ALICE).await;
        let waiting = tokio::time::timeout(Duration::from_millis(50), locks.acquire(ALICE));
        assert!(waiting.await.is_err(), "second acquire of a held chat must wait");
        drop(held);

        for i in 0..=ChatLocks::PRUNE_THRESHOLD {
            drop(locks.acquire(&format!("55119{i:08}@c.us")).await);
        }
        assert!(locks.len() > ChatLocks::PRUNE_THRESHOLD);

        let _bob = locks.acquire(BOB).await;
        // Every released entry was dropped; only the new one is left.
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_send_writes_nothing() {
        let (store, sync) = synchronizer();
        let transport = MockTransport::new().failing_send("socket closed");

        let err = sync
            .send(&transport, ALICE, "hi", &SendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transport(TransportError::SendFailed(_))));
        assert!(store.list_messages(&MessageFilter::default(), Page::all()).unwrap().is_empty());
        assert!(store.list_logs(&LogFilter::default(), Page::all()).unwrap().is_empty());
        assert!(store.get_contact(ALICE).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_then_echo_converges() {
        let (store, sync) = synchronizer();
        let transport = MockTransport::new();
        let sent = sync
            .send(&transport, "5511999999991", "hi", &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(sent.status, MessageStatus::Sent);
        assert!(sent.from_me);
        assert_eq!(sent.chat_id, ALICE);

        let mut echo = mock::outgoing(ALICE, &sent.id, "hi", sent.timestamp.timestamp());
        echo.ack = Some(1);
        let again = sync.ingest(&echo).await.unwrap().unwrap();
        assert!(!again.inserted);

        let logs = store.list_logs(&LogFilter::default(), Page::all()).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].direction, Direction::Outbound);
        assert_eq!(store.get_contact(ALICE).unwrap().unwrap().unread_count, 0);
    }

    #[tokio::test]
    async fn test_mark_as_read_leaves_own_messages() {
        let (store, sync) = synchronizer();
        let transport = MockTransport::new();
        sync.ingest(&mock::incoming(ALICE, "in1", "a", 10)).await.unwrap();
        sync.ingest(&mock::incoming(ALICE, "in2", "b", 20)).await.unwrap();
        let mine = sync
            .send(&transport, ALICE, "c", &SendOptions::default())
            .await
            .unwrap();

        assert_eq!(sync.mark_as_read(ALICE).await.unwrap(), 2);

        let contact = store.get_contact(ALICE).unwrap().unwrap();
        assert_eq!(contact.unread_count, 0);
        for id in ["in1", "in2"] {
            let message = store.get_message(ALICE, id).unwrap().unwrap();
            assert_eq!(message.status, MessageStatus::Read);
            assert!(store.get_log(ALICE, id).unwrap().unwrap().read_at.is_some());
        }
        let own = store.get_message(ALICE, &mine.id).unwrap().unwrap();
        assert_eq!(own.status, MessageStatus::Sent);

        // A replayed inbound event does not undo the read state.
        sync.ingest(&mock::incoming(ALICE, "in1", "a", 10)).await.unwrap();
        let replayed = store.get_message(ALICE, "in1").unwrap().unwrap();
        assert_eq!(replayed.status, MessageStatus::Read);
        assert_eq!(store.get_contact(ALICE).unwrap().unwrap().unread_count, 0);
    }

    #[tokio::test]
    async fn test_bulk_import_skips_groups_and_failed_chats() {
        let (store, sync) = synchronizer();
        let history = (0..60)
            .map(|i| mock::incoming(ALICE, &format!("a{i}"), "x", 1_000 + i))
            .collect();
        let group = RawChat {
            id: "120363000000000000@g.us".into(),
            name: "Team".into(),
            is_group: true,
            ..Default::default()
        };
        let transport = MockTransport::new()
            .with_chat(mock::chat(ALICE, "Alice", 3), history)
            .with_chat(mock::chat(BOB, "Bob", 0), vec![mock::incoming(BOB, "b1", "y", 5)])
            .with_chat(group, Vec::new())
            .with_chat(mock::chat("5511999999993@c.us", "Carol", 0), Vec::new())
            .failing_history("5511999999993@c.us");

        let summary = sync.bulk_import(&transport).await.unwrap();
        assert_eq!(summary.chats, 2);
        assert_eq!(summary.skipped_chats, 1);
        assert_eq!(summary.messages, 51);
        assert_eq!(summary.failed_chats, vec!["5511999999993@c.us".to_string()]);

        let alice = store.get_contact(ALICE).unwrap().unwrap();
        assert_eq!(alice.name, "Alice");
        assert_eq!(alice.unread_count, 3);
        assert_eq!(alice.last_message.unwrap().message_id, "a59");
        let imported = store.list_messages(&MessageFilter::for_chat(ALICE), Page::all()).unwrap();
        assert_eq!(imported.len(), 50);

        // The failed chat still got its contact entry.
        assert!(store.get_contact("5511999999993@c.us").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bulk_import_converges_with_live_events() {
        let (store, sync) = synchronizer();
        sync.ingest(&mock::incoming(ALICE, "a1", "live", 100)).await.unwrap();
        let transport = MockTransport::new().with_chat(
            mock::chat(ALICE, "Alice", 1),
            vec![
                mock::incoming(ALICE, "a0", "older", 50),
                mock::incoming(ALICE, "a1", "live", 100),
            ],
        );

        sync.bulk_import(&transport).await.unwrap();
        let messages = store.list_messages(&MessageFilter::for_chat(ALICE), Page::all()).unwrap();
        assert_eq!(messages.len(), 2);
        let contact = store.get_contact(ALICE).unwrap().unwrap();
        assert_eq!(contact.unread_count, 1);
        assert_eq!(contact.last_message.unwrap().message_id, "a1");
    }

    #[tokio::test]
    async fn test_concurrent_ingest_of_same_message_counts_once() {
        let (store, sync) = synchronizer();
        let sync = Arc::new(sync);
        let raw = mock::incoming(ALICE, "dup", "x", 10);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let sync = sync.clone();
                let raw = raw.clone();
                tokio::spawn(async move { sync.ingest(&raw).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.get_contact(ALICE).unwrap().unwrap().unread_count, 1);
        assert_eq!(store.list_logs(&LogFilter::default(), Page::all()).unwrap().len(), 1);
    }
}
