//! Live-Nachrichten und Lesebestaetigungen
//!
//! Beide Operationen persistieren zuerst ueber den `MessageStore` und
//! verteilen erst danach. Schlaegt der Store fehl oder laeuft das
//! Zeitlimit ab, wird nichts verteilt.

use parley_core::{ConversationId, MessageId, MessageRecord, UserId};
use parley_protocol::{MessageReadEvent, SignalMessage, SignalPayload};
use parley_store::{ConversationStore, MessageStore};
use std::sync::Arc;
use std::time::Duration;

use crate::broadcast::EventRouter;
use crate::error::{store_aufruf, SignalingError, SignalingResult};

#[derive(Clone)]
pub struct MessageRelay {
    inner: Arc<MessageRelayInner>,
}

struct MessageRelayInner {
    nachrichten: Arc<dyn MessageStore>,
    konversationen: Arc<dyn ConversationStore>,
    router: EventRouter,
    store_timeout: Duration,
}

impl MessageRelay {
    pub fn neu(
        nachrichten: Arc<dyn MessageStore>,
        konversationen: Arc<dyn ConversationStore>,
        router: EventRouter,
        store_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(MessageRelayInner {
                nachrichten,
                konversationen,
                router,
                store_timeout,
            }),
        }
    }

    /// Persistiert eine Nachricht und verteilt sie an den Raum
    ///
    /// Der Absender erhaelt `new_message` ebenfalls (auf allen seinen
    /// Verbindungen im Raum), der Datensatz wird unveraendert weitergereicht.
    pub async fn nachricht_senden(
        &self,
        sender_id: UserId,
        conversation_id: ConversationId,
        content: &str,
        message_type: &str,
    ) -> SignalingResult<MessageRecord> {
        let teilnehmer = store_aufruf(
            self.inner.store_timeout,
            "teilnehmer_auflisten",
            self.inner.konversationen.teilnehmer_auflisten(conversation_id),
        )
        .await?;
        if !teilnehmer.contains(&sender_id) {
            return Err(SignalingError::nicht_gefunden(format!(
                "{} ist kein Teilnehmer von {}",
                sender_id, conversation_id
            )));
        }

        let nachricht = store_aufruf(
            self.inner.store_timeout,
            "nachricht_anhaengen",
            self.inner
                .nachrichten
                .nachricht_anhaengen(conversation_id, sender_id, content, message_type),
        )
        .await?;

        let gesendet = self.inner.router.an_raum_senden(
            &conversation_id,
            SignalMessage::push(SignalPayload::NewMessage {
                message: nachricht.clone(),
            }),
            None,
        );

        tracing::debug!(
            user_id = %sender_id,
            conversation_id = %conversation_id,
            message_id = %nachricht.id,
            empfaenger = gesendet,
            "Nachricht verteilt"
        );
        Ok(nachricht)
    }

    /// Traegt den Leser ein und meldet `message_read` an den Raum
    ///
    /// Idempotent im Store; die Meldung geht bei jedem Erfolg raus.
    pub async fn als_gelesen_markieren(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> SignalingResult<MessageRecord> {
        let nachricht = store_aufruf(
            self.inner.store_timeout,
            "als_gelesen_markieren",
            self.inner.nachrichten.als_gelesen_markieren(message_id, user_id),
        )
        .await?;

        self.inner.router.an_raum_senden(
            &nachricht.conversation_id,
            SignalMessage::push(SignalPayload::MessageRead(MessageReadEvent {
                message_id,
                user_id,
            })),
            None,
        );

        tracing::trace!(message_id = %message_id, user_id = %user_id, "Lesebestaetigung verteilt");
        Ok(nachricht)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::RoomIndex;
    use crate::session::SessionRegistry;
    use parley_auth::StaticTokenProvider;
    use parley_core::ConnectionId;
    use parley_store::InMemoryStore;

    fn aufbau() -> (MessageRelay, Arc<InMemoryStore>, RoomIndex, EventRouter) {
        let raeume = RoomIndex::neu();
        let sitzungen =
            SessionRegistry::neu(Arc::new(StaticTokenProvider::neu()), Duration::from_secs(1));
        let router = EventRouter::neu(raeume.clone(), sitzungen, 16);
        let store = Arc::new(InMemoryStore::neu());
        let relay = MessageRelay::neu(store.clone(), store.clone(), router.clone(), Duration::from_secs(1));
        (relay, store, raeume, router)
    }

    #[tokio::test]
    async fn nachricht_erreicht_auch_absender() {
        let (relay, store, raeume, router) = aufbau();
        let alice = UserId::new();
        let raum = store.konversation_anlegen([alice, UserId::new()]);
        let conn = ConnectionId::naechste();
        let mut rx = router.verbindung_registrieren(conn);
        raeume.beitreten(conn, raum);

        let gespeichert = relay.nachricht_senden(alice, raum, "Hallo", "text").await.unwrap();
        match rx.try_recv().unwrap().payload {
            SignalPayload::NewMessage { message } => assert_eq!(message.id, gespeichert.id),
            andere => panic!("Erwartet NewMessage, erhalten {}", andere.typ_name()),
        }
    }

    #[tokio::test]
    async fn fremder_absender_nicht_gefunden() {
        let (relay, store, _, _) = aufbau();
        let raum = store.konversation_anlegen([UserId::new()]);
        let fehler = relay
            .nachricht_senden(UserId::new(), raum, "Hallo", "text")
            .await
            .unwrap_err();
        assert!(matches!(fehler, SignalingError::NichtGefunden(_)));
        assert_eq!(store.nachrichten_anzahl(), 0);
    }

    #[tokio::test]
    async fn unbekannte_nachricht_nicht_gefunden() {
        let (relay, _, _, _) = aufbau();
        let fehler = relay
            .als_gelesen_markieren(MessageId::new(), UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(fehler, SignalingError::NichtGefunden(_)));
    }
}
