//! Tipp-Indikatoren
//!
//! Ein Eintrag pro (Konversation, Benutzer) mit dem Zeitpunkt der letzten
//! Erneuerung und der Verbindung, von der er kam. `user_typing` und
//! `user_stop_typing` gehen an den Raum ohne die ausloesende Verbindung.
//!
//! Eintraege verfallen serverseitig nach `tipp_timeout`, damit ein
//! abgestuerzter Client keinen haengenden Indikator hinterlaesst. Beim
//! Trennen einer Verbindung werden ihre Eintraege sofort beendet.

use dashmap::DashMap;
use parley_core::{ConnectionId, ConversationId, UserId};
use parley_protocol::{SignalMessage, SignalPayload};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::broadcast::EventRouter;

#[derive(Debug, Clone, Copy)]
struct TippEintrag {
    zuletzt: Instant,
    verbindung: ConnectionId,
}

#[derive(Clone)]
pub struct TypingCoordinator {
    inner: Arc<TypingInner>,
}

struct TypingInner {
    eintraege: DashMap<(ConversationId, UserId), TippEintrag>,
    router: EventRouter,
    timeout: Option<Duration>,
}

impl TypingCoordinator {
    pub fn neu(router: EventRouter, timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(TypingInner {
                eintraege: DashMap::new(),
                router,
                timeout,
            }),
        }
    }

    /// Erneuert den Eintrag und meldet `user_typing` an den Raum
    pub fn tippen(&self, verbindung: ConnectionId, user_id: UserId, conversation_id: ConversationId) {
        self.inner.eintraege.insert(
            (conversation_id, user_id),
            TippEintrag {
                zuletzt: Instant::now(),
                verbindung,
            },
        );
        self.inner.router.an_raum_senden(
            &conversation_id,
            SignalMessage::push(SignalPayload::UserTyping {
                conversation_id,
                user_id,
            }),
            Some(verbindung),
        );
    }

    /// Entfernt den Eintrag und meldet `user_stop_typing`
    ///
    /// Meldet auch dann, wenn kein Eintrag existierte.
    pub fn tippen_beenden(
        &self,
        verbindung: ConnectionId,
        user_id: UserId,
        conversation_id: ConversationId,
    ) {
        self.inner.eintraege.remove(&(conversation_id, user_id));
        self.stop_melden(conversation_id, user_id, verbindung);
    }

    fn stop_melden(&self, conversation_id: ConversationId, user_id: UserId, verbindung: ConnectionId) {
        self.inner.router.an_raum_senden(
            &conversation_id,
            SignalMessage::push(SignalPayload::UserStopTyping {
                conversation_id,
                user_id,
            }),
            Some(verbindung),
        );
    }

    /// Beendet alle Eintraege, die seit `timeout` nicht erneuert wurden
    ///
    /// Gibt die Anzahl der beendeten Eintraege zurueck.
    pub fn abgelaufene_entfernen(&self, jetzt: Instant) -> usize {
        let Some(timeout) = self.inner.timeout else {
            return 0;
        };
        let mut abgelaufen = Vec::new();
        self.inner.eintraege.retain(|schluessel, eintrag| {
            if jetzt.saturating_duration_since(eintrag.zuletzt) >= timeout {
                abgelaufen.push((*schluessel, eintrag.verbindung));
                false
            } else {
                true
            }
        });
        for ((conversation_id, user_id), verbindung) in &abgelaufen {
            tracing::debug!(conversation_id = %conversation_id, user_id = %user_id, "Tipp-Indikator abgelaufen");
            self.stop_melden(*conversation_id, *user_id, *verbindung);
        }
        abgelaufen.len()
    }

    /// Beendet alle Eintraege einer getrennten Verbindung
    pub fn verbindung_getrennt(&self, verbindung: ConnectionId) {
        let mut beendet = Vec::new();
        self.inner.eintraege.retain(|schluessel, eintrag| {
            if eintrag.verbindung == verbindung {
                beendet.push(*schluessel);
                false
            } else {
                true
            }
        });
        for (conversation_id, user_id) in beendet {
            self.stop_melden(conversation_id, user_id, verbindung);
        }
    }

    pub fn tippt(&self, conversation_id: &ConversationId, user_id: &UserId) -> bool {
        self.inner.eintraege.contains_key(&(*conversation_id, *user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::RoomIndex;
    use crate::session::SessionRegistry;
    use parley_auth::StaticTokenProvider;
    use tokio::sync::mpsc;

    struct Aufbau {
        tippen: TypingCoordinator,
        raum: ConversationId,
        c1: ConnectionId,
        rx1: mpsc::Receiver<SignalMessage>,
        rx2: mpsc::Receiver<SignalMessage>,
    }

    fn aufbau(timeout: Option<Duration>) -> Aufbau {
        let raeume = RoomIndex::neu();
        let sitzungen =
            SessionRegistry::neu(Arc::new(StaticTokenProvider::neu()), Duration::from_secs(1));
        let router = EventRouter::neu(raeume.clone(), sitzungen, 16);
        let raum = ConversationId::new();
        let c1 = ConnectionId::naechste();
        let c2 = ConnectionId::naechste();
        let rx1 = router.verbindung_registrieren(c1);
        let rx2 = router.verbindung_registrieren(c2);
        raeume.beitreten(c1, raum);
        raeume.beitreten(c2, raum);
        Aufbau {
            tippen: TypingCoordinator::neu(router, timeout),
            raum,
            c1,
            rx1,
            rx2,
        }
    }

    #[tokio::test]
    async fn tippen_erreicht_nur_andere() {
        let mut a = aufbau(None);
        let uid = UserId::new();
        a.tippen.tippen(a.c1, uid, a.raum);

        assert!(a.rx1.try_recv().is_err());
        assert!(matches!(
            a.rx2.try_recv().unwrap().payload,
            SignalPayload::UserTyping { .. }
        ));
        assert!(a.tippen.tippt(&a.raum, &uid));
    }

    #[tokio::test]
    async fn stop_ohne_eintrag_meldet_trotzdem() {
        let mut a = aufbau(None);
        a.tippen.tippen_beenden(a.c1, UserId::new(), a.raum);
        assert!(matches!(
            a.rx2.try_recv().unwrap().payload,
            SignalPayload::UserStopTyping { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn eintrag_verfaellt_nach_timeout() {
        let mut a = aufbau(Some(Duration::from_secs(5)));
        let uid = UserId::new();
        a.tippen.tippen(a.c1, uid, a.raum);
        a.rx2.try_recv().unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(a.tippen.abgelaufene_entfernen(Instant::now()), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(a.tippen.abgelaufene_entfernen(Instant::now()), 1);
        assert!(!a.tippen.tippt(&a.raum, &uid));
        assert!(matches!(
            a.rx2.try_recv().unwrap().payload,
            SignalPayload::UserStopTyping { .. }
        ));
    }

    #[tokio::test]
    async fn trennen_beendet_eintraege() {
        let mut a = aufbau(None);
        let uid = UserId::new();
        a.tippen.tippen(a.c1, uid, a.raum);
        a.rx2.try_recv().unwrap();

        a.tippen.verbindung_getrennt(a.c1);
        assert!(!a.tippen.tippt(&a.raum, &uid));
        assert!(matches!(
            a.rx2.try_recv().unwrap().payload,
            SignalPayload::UserStopTyping { .. }
        ));
    }
}
