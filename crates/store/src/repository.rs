//! Repository-Traits fuer die externen Stores
//!
//! Der Signaling-Kern haelt nur `Arc<dyn ...>`-Referenzen. Ob dahinter
//! eine Datenbank, ein HTTP-Dienst oder der `InMemoryStore` steckt,
//! aendert keine Aufrufstelle.

use async_trait::async_trait;
use parley_core::{ConversationId, MessageId, MessageRecord, UserId};
use std::collections::HashSet;

use crate::error::StoreResult;

/// Zugriff auf persistierte Nachrichten
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Haengt eine neue Nachricht an eine Konversation an
    ///
    /// Der Absender gilt als erster Leser der Nachricht.
    async fn nachricht_anhaengen(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: &str,
        message_type: &str,
    ) -> StoreResult<MessageRecord>;

    /// Traegt den Benutzer als Leser ein und gibt den aktualisierten Datensatz zurueck
    ///
    /// Idempotent: ein Benutzer erscheint hoechstens einmal in `read_by`.
    /// Unbekannte Nachrichten ergeben `StoreError::NichtGefunden`.
    async fn als_gelesen_markieren(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> StoreResult<MessageRecord>;
}

/// Zugriff auf Konversationen und ihre Teilnehmer
#[async_trait]
pub trait ConversationStore: Send + Sync + 'static {
    /// Gibt alle Teilnehmer einer Konversation zurueck
    ///
    /// Unbekannte Konversationen ergeben `StoreError::NichtGefunden`.
    async fn teilnehmer_auflisten(
        &self,
        conversation_id: ConversationId,
    ) -> StoreResult<HashSet<UserId>>;
}
