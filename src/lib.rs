//! wa-session: client-side WhatsApp Web session management
//!
//! Keeps one upstream session alive through an abstract transport and
//! mirrors its contacts, messages and delivery state into a record store.
//!
//! ## Modules
//!
//! - `types` - JIDs, chat-id normalization, transport payloads and events
//! - `client` - Session lifecycle, connectivity guard and public API
//! - `sync` - Idempotent message ingestion, acks, sends and bulk import
//! - `store` - Record types, store traits and the in-memory backend
//! - `dispatch` - Ordered, isolated fan-out of session events
//! - `transport` - Transport seam and the in-process mock
//! - `config` - Configuration management
//! - `state` - Session state machine
//! - `qr` - Terminal QR rendering

pub mod dispatch;
pub mod qr;
pub mod store;
pub mod sync;
pub mod transport;
pub mod types;

mod client;
mod config;
mod state;

pub use client::{ClientError, SessionClient};
pub use config::{ConfigError, SessionConfig};
pub use dispatch::{EventDispatcher, ObserverError, SubscriptionId};
pub use state::{ConnectionSnapshot, ConnectionState, SessionState};
pub use store::{MemoryStore, RecordStore};
pub use sync::{ImportSummary, MessageSynchronizer, SyncError};
pub use transport::{Transport, TransportError, TransportFactory};
pub use types::{EventKind, SessionEvent, TransportEvent, JID};
