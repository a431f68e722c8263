//! Nachrichten-Datensatz wie ihn der externe Message-Store liefert
//!
//! Der Signaling-Layer reicht den Datensatz unveraendert an die Clients
//! weiter und veraendert den Inhalt nie selbst.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, MessageId, UserId};

/// Eine persistierte Chat-Nachricht
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    /// Nachrichtentyp ("text", "image", ...), wird nicht interpretiert
    pub message_type: String,
    /// Leser der Nachricht, jeder Benutzer hoechstens einmal
    pub read_by: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Prueft ob der Benutzer die Nachricht bereits gelesen hat
    pub fn gelesen_von(&self, user_id: &UserId) -> bool {
        self.read_by.contains(user_id)
    }
}
