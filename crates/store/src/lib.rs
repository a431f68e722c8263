//! parley-store – Schnittstellen zu den externen Stores
//!
//! Die Persistenz von Nachrichten und Konversationen liegt ausserhalb des
//! Signaling-Kerns. Dieses Crate definiert die Traits, ueber die der Kern
//! mit ihnen spricht, und eine In-Memory-Implementierung fuer
//! Einzelprozess-Betrieb und Tests.
//!
//! ## Repository-Pattern
//! - `MessageStore`: Nachrichten anhaengen, Lesebestaetigungen setzen
//! - `ConversationStore`: Teilnehmer einer Konversation auflisten

pub mod error;
pub mod memory;
pub mod repository;

// Bequeme Re-Exporte
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use repository::{ConversationStore, MessageStore};
