//! In-Memory-Implementierung beider Store-Traits
//!
//! Fuer Einzelprozess-Betrieb ohne externe Datenbank und fuer Tests.
//! Inhalte gehen beim Neustart verloren.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use parley_core::{ConversationId, MessageId, MessageRecord, UserId};
use std::collections::{HashMap, HashSet};

use crate::error::{StoreError, StoreResult};
use crate::repository::{ConversationStore, MessageStore};

/// Nachrichten und Konversationen im Arbeitsspeicher
#[derive(Debug, Default)]
pub struct InMemoryStore {
    konversationen: RwLock<HashMap<ConversationId, HashSet<UserId>>>,
    nachrichten: RwLock<HashMap<MessageId, MessageRecord>>,
}

impl InMemoryStore {
    /// Erstellt einen leeren Store
    pub fn neu() -> Self {
        Self::default()
    }

    /// Legt eine Konversation mit den angegebenen Teilnehmern an
    pub fn konversation_anlegen(&self, teilnehmer: impl IntoIterator<Item = UserId>) -> ConversationId {
        let id = ConversationId::new();
        self.konversation_setzen(id, teilnehmer);
        id
    }

    /// Setzt die Teilnehmer einer Konversation (legt sie bei Bedarf an)
    pub fn konversation_setzen(
        &self,
        id: ConversationId,
        teilnehmer: impl IntoIterator<Item = UserId>,
    ) {
        self.konversationen
            .write()
            .insert(id, teilnehmer.into_iter().collect());
    }

    /// Gibt eine gespeicherte Nachricht zurueck
    pub fn nachricht(&self, id: &MessageId) -> Option<MessageRecord> {
        self.nachrichten.read().get(id).cloned()
    }

    /// Anzahl gespeicherter Nachrichten
    pub fn nachrichten_anzahl(&self) -> usize {
        self.nachrichten.read().len()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn nachricht_anhaengen(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: &str,
        message_type: &str,
    ) -> StoreResult<MessageRecord> {
        if !self.konversationen.read().contains_key(&conversation_id) {
            return Err(StoreError::nicht_gefunden(conversation_id.to_string()));
        }
        if content.trim().is_empty() {
            return Err(StoreError::UngueltigeEingabe(
                "Nachricht darf nicht leer sein".into(),
            ));
        }

        let nachricht = MessageRecord {
            id: MessageId::new(),
            conversation_id,
            sender_id,
            content: content.to_string(),
            message_type: message_type.to_string(),
            read_by: vec![sender_id],
            created_at: Utc::now(),
        };
        self.nachrichten
            .write()
            .insert(nachricht.id, nachricht.clone());

        tracing::trace!(message_id = %nachricht.id, "Nachricht gespeichert");
        Ok(nachricht)
    }

    async fn als_gelesen_markieren(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> StoreResult<MessageRecord> {
        let mut nachrichten = self.nachrichten.write();
        let nachricht = nachrichten
            .get_mut(&message_id)
            .ok_or_else(|| StoreError::nicht_gefunden(message_id.to_string()))?;

        if !nachricht.gelesen_von(&user_id) {
            nachricht.read_by.push(user_id);
        }
        Ok(nachricht.clone())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn teilnehmer_auflisten(
        &self,
        conversation_id: ConversationId,
    ) -> StoreResult<HashSet<UserId>> {
        self.konversationen
            .read()
            .get(&conversation_id)
            .cloned()
            .ok_or_else(|| StoreError::nicht_gefunden(conversation_id.to_string()))
    }
}
