//! Types module for transport payloads and session events.
//!
//! This module contains the chat identifier helpers, the raw payloads the
//! transport hands to the session, and the events the session publishes.

mod events;
mod jid;

pub use events::*;
pub use jid::*;
