//! Storage module for session data persistence.
//!
//! Provides the record types, the store traits every backend implements, and
//! an in-memory backend with JSON snapshot persistence.

mod memory;
mod records;
mod traits;

pub use memory::*;
pub use records::*;
pub use traits::*;
