//! parley-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Parley-Crates gemeinsam genutzt werden.

pub mod error;
pub mod message;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{ParleyError, Result};
pub use message::MessageRecord;
pub use types::{ConnectionId, ConversationId, MessageId, UserId};
