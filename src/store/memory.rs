//! In-memory store implementation.
//!
//! State can be written to and restored from a JSON snapshot file, which is
//! enough for the CLI and for tests. Anything that needs concurrent writers
//! across processes should implement the store traits on a real database.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{
    records::contact_order, ApiStatus, Contact, ContactFilter, ContactPatch, ContactStore,
    LogFilter, LogPatch, Message, MessageFilter, MessageLog, MessageLogStore, MessageStore, Page,
    QrCodeRecord, QrCodeStore, StatusStore, StoreError, StoreResult, Upserted,
};

type MessageKey = (String, String);

fn key(chat_id: &str, id: &str) -> MessageKey {
    (chat_id.to_string(), id.to_string())
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::DatabaseError("lock poisoned".to_string())
}

/// Serializable image of a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub contacts: Vec<Contact>,
    pub messages: Vec<Message>,
    pub logs: Vec<MessageLog>,
    pub qr_codes: Vec<QrCodeRecord>,
    pub statuses: Vec<ApiStatus>,
}

/// In-memory implementation of all store traits.
#[derive(Default)]
pub struct MemoryStore {
    contacts: RwLock<HashMap<String, Contact>>,
    messages: RwLock<HashMap<MessageKey, Message>>,
    logs: RwLock<HashMap<MessageKey, MessageLog>>,
    qr_codes: RwLock<Vec<QrCodeRecord>>,
    statuses: RwLock<Vec<ApiStatus>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            contacts: RwLock::new(
                snapshot
                    .contacts
                    .into_iter()
                    .map(|c| (c.id.clone(), c))
                    .collect(),
            ),
            messages: RwLock::new(
                snapshot
                    .messages
                    .into_iter()
                    .map(|m| (key(&m.chat_id, &m.id), m))
                    .collect(),
            ),
            logs: RwLock::new(
                snapshot
                    .logs
                    .into_iter()
                    .map(|l| (key(&l.chat_id, &l.message_id), l))
                    .collect(),
            ),
            qr_codes: RwLock::new(snapshot.qr_codes),
            statuses: RwLock::new(snapshot.statuses),
        }
    }

    /// Copy the current contents out.
    pub fn snapshot(&self) -> StoreResult<StoreSnapshot> {
        let mut contacts: Vec<Contact> =
            self.contacts.read().map_err(poisoned)?.values().cloned().collect();
        contacts.sort_by(|a, b| a.id.cmp(&b.id));

        let mut messages: Vec<Message> =
            self.messages.read().map_err(poisoned)?.values().cloned().collect();
        messages.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));

        let mut logs: Vec<MessageLog> =
            self.logs.read().map_err(poisoned)?.values().cloned().collect();
        logs.sort_by(|a, b| (a.created_at, &a.message_id).cmp(&(b.created_at, &b.message_id)));

        Ok(StoreSnapshot {
            contacts,
            messages,
            logs,
            qr_codes: self.qr_codes.read().map_err(poisoned)?.clone(),
            statuses: self.statuses.read().map_err(poisoned)?.clone(),
        })
    }

    /// Persist the store to disk in JSON format.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let serialized = serde_json::to_string_pretty(&self.snapshot()?)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        }
        fs::write(path, serialized).map_err(|e| StoreError::DatabaseError(e.to_string()))
    }

    /// Load a store from a snapshot file. A missing file yields an empty store.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(err) => return Err(StoreError::DatabaseError(err.to_string())),
        };
        let snapshot: StoreSnapshot = serde_json::from_str(&contents)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        Ok(Self::from_snapshot(snapshot))
    }
}

impl ContactStore for MemoryStore {
    fn get_contact(&self, id: &str) -> StoreResult<Option<Contact>> {
        let contacts = self.contacts.read().map_err(poisoned)?;
        Ok(contacts.get(id).cloned())
    }

    fn upsert_contact(&self, id: &str, patch: ContactPatch) -> StoreResult<Contact> {
        let mut contacts = self.contacts.write().map_err(poisoned)?;
        let contact = contacts
            .entry(id.to_string())
            .or_insert_with(|| Contact::new(id));
        patch.apply(contact);
        Ok(contact.clone())
    }

    fn list_contacts(&self, filter: &ContactFilter, page: Page) -> StoreResult<Vec<Contact>> {
        let contacts = self.contacts.read().map_err(poisoned)?;
        let mut matched: Vec<Contact> = contacts
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        matched.sort_by(contact_order);
        Ok(page.apply(matched))
    }
}

impl MessageStore for MemoryStore {
    fn get_message(&self, chat_id: &str, id: &str) -> StoreResult<Option<Message>> {
        let messages = self.messages.read().map_err(poisoned)?;
        Ok(messages.get(&key(chat_id, id)).cloned())
    }

    fn upsert_message(&self, message: Message) -> StoreResult<Upserted<Message>> {
        let mut messages = self.messages.write().map_err(poisoned)?;
        let message_key = key(&message.chat_id, &message.id);
        match messages.get_mut(&message_key) {
            Some(existing) => {
                existing.merge(message);
                Ok(Upserted {
                    record: existing.clone(),
                    inserted: false,
                })
            }
            None => {
                messages.insert(message_key, message.clone());
                Ok(Upserted {
                    record: message,
                    inserted: true,
                })
            }
        }
    }

    fn list_messages(&self, filter: &MessageFilter, page: Page) -> StoreResult<Vec<Message>> {
        let messages = self.messages.read().map_err(poisoned)?;
        let mut matched: Vec<Message> = messages
            .values()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        matched.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));
        Ok(page.apply(matched))
    }
}

impl MessageLogStore for MemoryStore {
    fn append_log(&self, entry: MessageLog) -> StoreResult<bool> {
        let mut logs = self.logs.write().map_err(poisoned)?;
        let log_key = key(&entry.chat_id, &entry.message_id);
        if logs.contains_key(&log_key) {
            return Ok(false);
        }
        logs.insert(log_key, entry);
        Ok(true)
    }

    fn get_log(&self, chat_id: &str, message_id: &str) -> StoreResult<Option<MessageLog>> {
        let logs = self.logs.read().map_err(poisoned)?;
        Ok(logs.get(&key(chat_id, message_id)).cloned())
    }

    fn update_log(&self, chat_id: &str, message_id: &str, patch: LogPatch) -> StoreResult<bool> {
        let mut logs = self.logs.write().map_err(poisoned)?;
        let entry = logs
            .get_mut(&key(chat_id, message_id))
            .ok_or(StoreError::NotFound)?;
        Ok(patch.apply(entry))
    }

    fn list_logs(&self, filter: &LogFilter, page: Page) -> StoreResult<Vec<MessageLog>> {
        let logs = self.logs.read().map_err(poisoned)?;
        let mut matched: Vec<MessageLog> =
            logs.values().filter(|l| filter.matches(l)).cloned().collect();
        matched.sort_by(|a, b| (a.created_at, &a.message_id).cmp(&(b.created_at, &b.message_id)));
        Ok(page.apply(matched))
    }
}

impl QrCodeStore for MemoryStore {
    fn append_qr_code(&self, record: QrCodeRecord) -> StoreResult<()> {
        let mut codes = self.qr_codes.write().map_err(poisoned)?;
        codes.push(record);
        Ok(())
    }

    fn latest_qr_code(&self) -> StoreResult<Option<QrCodeRecord>> {
        let codes = self.qr_codes.read().map_err(poisoned)?;
        Ok(codes.iter().max_by_key(|c| c.generated_at).cloned())
    }

    fn mark_qr_scanned(&self, code: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut codes = self.qr_codes.write().map_err(poisoned)?;
        let record = codes
            .iter_mut()
            .rev()
            .find(|c| c.code == code)
            .ok_or(StoreError::NotFound)?;
        if record.scanned_at.is_some() {
            return Ok(false);
        }
        record.scanned_at = Some(at);
        Ok(true)
    }

    fn qr_codes_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<QrCodeRecord>> {
        let codes = self.qr_codes.read().map_err(poisoned)?;
        Ok(codes
            .iter()
            .filter(|c| c.generated_at >= since && c.generated_at < until)
            .cloned()
            .collect())
    }
}

impl StatusStore for MemoryStore {
    fn append_status(&self, status: ApiStatus) -> StoreResult<()> {
        let mut statuses = self.statuses.write().map_err(poisoned)?;
        statuses.push(status);
        Ok(())
    }

    fn latest_status(&self) -> StoreResult<Option<ApiStatus>> {
        let statuses = self.statuses.read().map_err(poisoned)?;
        Ok(statuses.iter().max_by_key(|s| s.recorded_at).cloned())
    }

    fn statuses_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<ApiStatus>> {
        let statuses = self.statuses.read().map_err(poisoned)?;
        let mut matched: Vec<ApiStatus> = statuses
            .iter()
            .filter(|s| s.recorded_at >= since && s.recorded_at < until)
            .cloned()
            .collect();
        matched.sort_by_key(|s| s.recorded_at);
        Ok(matched)
    }
}
