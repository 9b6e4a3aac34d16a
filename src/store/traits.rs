//! Store traits for session data persistence.
//!
//! These traits define the storage contract the session relies on. Writes are
//! upserts by key or appends, and re-applying the same logical write is a
//! no-op. Partial updates merge field-wise.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::store::{
    ApiStatus, Contact, ContactFilter, ContactPatch, LogFilter, LogPatch, Message, MessageFilter,
    MessageLog, Page, QrCodeRecord,
};

/// Error type for store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("database error: {0}")]
    DatabaseError(String),
    #[error("serialization error: {0}")]
    SerializationError(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of an upsert: the stored record after merging, and whether the key
/// was new.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted<T> {
    pub record: T,
    pub inserted: bool,
}

/// Contacts keyed by canonical chat id. Never deleted.
pub trait ContactStore: Send + Sync {
    /// Get a contact by chat id.
    fn get_contact(&self, id: &str) -> StoreResult<Option<Contact>>;

    /// Create the contact if missing, then merge the patch into it.
    fn upsert_contact(&self, id: &str, patch: ContactPatch) -> StoreResult<Contact>;

    /// List contacts, most recently active first.
    fn list_contacts(&self, filter: &ContactFilter, page: Page) -> StoreResult<Vec<Contact>>;
}

/// Messages keyed by `(chat_id, id)`.
pub trait MessageStore: Send + Sync {
    /// Get a message by key.
    fn get_message(&self, chat_id: &str, id: &str) -> StoreResult<Option<Message>>;

    /// Insert, or merge into the existing record with the same key.
    fn upsert_message(&self, message: Message) -> StoreResult<Upserted<Message>>;

    /// List messages, oldest first.
    fn list_messages(&self, filter: &MessageFilter, page: Page) -> StoreResult<Vec<Message>>;
}

/// Append-only message audit log, one entry per `(chat_id, message_id)`.
pub trait MessageLogStore: Send + Sync {
    /// Append an entry. Returns `false` if one already exists for the message.
    fn append_log(&self, entry: MessageLog) -> StoreResult<bool>;

    /// Get the entry for a message.
    fn get_log(&self, chat_id: &str, message_id: &str) -> StoreResult<Option<MessageLog>>;

    /// Record status timestamps. Returns whether anything changed.
    fn update_log(&self, chat_id: &str, message_id: &str, patch: LogPatch) -> StoreResult<bool>;

    /// List entries, oldest first.
    fn list_logs(&self, filter: &LogFilter, page: Page) -> StoreResult<Vec<MessageLog>>;
}

/// Historical QR codes. Only the latest is actionable.
pub trait QrCodeStore: Send + Sync {
    /// Store a newly issued code.
    fn append_qr_code(&self, record: QrCodeRecord) -> StoreResult<()>;

    /// Get the most recently generated code.
    fn latest_qr_code(&self) -> StoreResult<Option<QrCodeRecord>>;

    /// Set `scanned_at` on the code if it is not set yet.
    fn mark_qr_scanned(&self, code: &str, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Codes generated in `[since, until)`.
    fn qr_codes_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<QrCodeRecord>>;
}

/// Rolling API status history.
pub trait StatusStore: Send + Sync {
    /// Append a snapshot.
    fn append_status(&self, status: ApiStatus) -> StoreResult<()>;

    /// Get the most recent snapshot.
    fn latest_status(&self) -> StoreResult<Option<ApiStatus>>;

    /// Snapshots recorded in `[since, until)`, oldest first.
    fn statuses_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<ApiStatus>>;
}

/// Combined store interface for all stores.
pub trait RecordStore:
    ContactStore + MessageStore + MessageLogStore + QrCodeStore + StatusStore
{
}

// Blanket implementation for any type that implements all store traits
impl<T> RecordStore for T where
    T: ContactStore + MessageStore + MessageLogStore + QrCodeStore + StatusStore
{
}
