//! Event-Router – Sendet Events an Verbindungen, Raeume und Benutzer
//!
//! Der EventRouter verwaltet die Send-Queues aller offenen Verbindungen
//! und loest Raeume (ueber den `RoomIndex`) und Benutzer (ueber die
//! `SessionRegistry`) in konkrete Verbindungen auf.
//!
//! ## Zustellung
//! - Best-Effort, hoechstens einmal, ohne Wiederholung
//! - Volle oder geschlossene Queues verwerfen die Nachricht fuer diesen
//!   Empfaenger; alle anderen Empfaenger werden trotzdem beliefert
//! - Reihenfolge pro Quell-Verbindung bleibt erhalten, weil jede
//!   Verbindung ihre Nachrichten nacheinander dispatcht und jede Queue FIFO ist
//! - Ausnahme `gesammelt_senden`: reserviert vorab Platz und sendet alles
//!   oder nichts (Anruf-Aushandlung)
//!
//! ## Selektives Broadcasting
//! - An einen Raum (optional ohne ausloesende Verbindung): `an_raum_senden`
//! - An alle Verbindungen eines Benutzers: `an_user_senden`
//! - An alle authentifizierten Verbindungen: `an_alle_authentifizierten_senden`

use dashmap::DashMap;
use parley_core::{ConnectionId, ConversationId, UserId};
use parley_protocol::SignalMessage;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{SignalingError, SignalingResult};
use crate::rooms::RoomIndex;
use crate::session::SessionRegistry;

// ---------------------------------------------------------------------------
// ClientSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue einer offenen Verbindung
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub verbindung: ConnectionId,
    pub tx: mpsc::Sender<SignalMessage>,
}

impl ClientSender {
    /// Sendet eine Nachricht nicht-blockierend an die Verbindung
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    pub fn senden(&self, nachricht: SignalMessage) -> bool {
        match self.tx.try_send(nachricht) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %self.verbindung,
                    typ = msg.payload.typ_name(),
                    "Send-Queue voll – Nachricht verworfen"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %self.verbindung, "Send-Queue geschlossen (Client getrennt)");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// EventRouter
// ---------------------------------------------------------------------------

/// Zentraler Router fuer alle Server-Pushes
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct EventRouter {
    inner: Arc<EventRouterInner>,
}

struct EventRouterInner {
    /// Send-Queues, indiziert nach Verbindung
    clients: DashMap<ConnectionId, ClientSender>,
    raeume: RoomIndex,
    sitzungen: SessionRegistry,
    queue_groesse: usize,
}

impl EventRouter {
    pub fn neu(raeume: RoomIndex, sitzungen: SessionRegistry, queue_groesse: usize) -> Self {
        Self {
            inner: Arc::new(EventRouterInner {
                clients: DashMap::new(),
                raeume,
                sitzungen,
                queue_groesse: queue_groesse.max(1),
            }),
        }
    }

    /// Registriert eine Verbindung und gibt ihre Empfangs-Queue zurueck
    ///
    /// Die `ClientConnection` liest aus dieser Queue und schreibt auf den Transport.
    pub fn verbindung_registrieren(&self, verbindung: ConnectionId) -> mpsc::Receiver<SignalMessage> {
        let (tx, rx) = mpsc::channel(self.inner.queue_groesse);
        self.inner
            .clients
            .insert(verbindung, ClientSender { verbindung, tx });
        tracing::debug!(connection_id = %verbindung, "Verbindung im Router registriert");
        rx
    }

    /// Entfernt die Send-Queue einer Verbindung
    pub fn verbindung_entfernen(&self, verbindung: ConnectionId) {
        if self.inner.clients.remove(&verbindung).is_some() {
            tracing::debug!(connection_id = %verbindung, "Verbindung aus Router entfernt");
        }
    }

    /// Sendet eine Nachricht an eine einzelne Verbindung
    ///
    /// Unbekannte Verbindungen werden still uebergangen.
    pub fn an_verbindung_senden(&self, verbindung: ConnectionId, nachricht: SignalMessage) -> bool {
        match self.inner.clients.get(&verbindung) {
            Some(sender) => sender.senden(nachricht),
            None => {
                tracing::debug!(connection_id = %verbindung, "Senden an unbekannte Verbindung");
                false
            }
        }
    }

    /// Stellt zusammengehoerige Nachrichten ganz oder gar nicht zu
    ///
    /// Fuer jede Ziel-Verbindung wird vorab Platz fuer alle ihre Nachrichten
    /// reserviert, die Reihenfolge pro Ziel bleibt erhalten. Reicht der Platz
    /// bei einem Ziel nicht, geht nichts raus. Unbekannte oder geschlossene
    /// Verbindungen werden uebergangen. Gibt die Anzahl gesendeter Nachrichten zurueck.
    pub fn gesammelt_senden(
        &self,
        nachrichten: Vec<(ConnectionId, SignalMessage)>,
    ) -> SignalingResult<usize> {
        let mut ziele: Vec<(ConnectionId, Vec<SignalMessage>)> = Vec::new();
        for (verbindung, nachricht) in nachrichten {
            match ziele.iter_mut().find(|(c, _)| *c == verbindung) {
                Some((_, liste)) => liste.push(nachricht),
                None => ziele.push((verbindung, vec![nachricht])),
            }
        }

        let mut sender = Vec::with_capacity(ziele.len());
        let mut pakete = Vec::with_capacity(ziele.len());
        for (verbindung, liste) in ziele {
            // Sender klonen, damit kein Shard-Lock ueber die Reservierung gehalten wird
            let tx = self.inner.clients.get(&verbindung).map(|c| c.tx.clone());
            match tx {
                Some(tx) => {
                    sender.push((verbindung, tx));
                    pakete.push(liste);
                }
                None => {
                    tracing::debug!(connection_id = %verbindung, "Senden an unbekannte Verbindung");
                }
            }
        }

        let mut reserviert = Vec::with_capacity(sender.len());
        for ((verbindung, tx), liste) in sender.iter().zip(&pakete) {
            if liste.len() > tx.max_capacity() {
                return Err(SignalingError::EmpfaengerUeberlastet(*verbindung));
            }
            match tx.try_reserve_many(liste.len()) {
                Ok(permits) => reserviert.push(Some(permits)),
                Err(mpsc::error::TrySendError::Full(())) => {
                    tracing::warn!(
                        connection_id = %verbindung,
                        benoetigt = liste.len(),
                        frei = tx.capacity(),
                        "Send-Queue reicht nicht – nichts gesendet"
                    );
                    return Err(SignalingError::EmpfaengerUeberlastet(*verbindung));
                }
                Err(mpsc::error::TrySendError::Closed(())) => {
                    tracing::debug!(connection_id = %verbindung, "Send-Queue geschlossen (Client getrennt)");
                    reserviert.push(None);
                }
            }
        }

        let mut gesendet = 0;
        for (permits, liste) in reserviert.into_iter().zip(pakete) {
            let Some(permits) = permits else {
                continue;
            };
            for (permit, nachricht) in permits.zip(liste) {
                permit.send(nachricht);
                gesendet += 1;
            }
        }
        Ok(gesendet)
    }

    /// Sendet eine Nachricht an mehrere Verbindungen
    ///
    /// Gibt die Anzahl der erfolgreichen Sendungen zurueck.
    pub fn an_verbindungen_senden(
        &self,
        verbindungen: impl IntoIterator<Item = ConnectionId>,
        nachricht: SignalMessage,
    ) -> usize {
        let mut gesendet = 0;
        for verbindung in verbindungen {
            if let Some(sender) = self.inner.clients.get(&verbindung) {
                if sender.senden(nachricht.clone()) {
                    gesendet += 1;
                }
            }
        }
        gesendet
    }

    /// Sendet eine Nachricht an alle Mitglieder eines Raums
    ///
    /// Mit `ausser` wird die ausloesende Verbindung uebersprungen
    /// (Echo-Unterdrueckung); andere Verbindungen desselben Benutzers
    /// werden trotzdem beliefert.
    pub fn an_raum_senden(
        &self,
        raum: &ConversationId,
        nachricht: SignalMessage,
        ausser: Option<ConnectionId>,
    ) -> usize {
        let mitglieder = self.inner.raeume.mitglieder(raum);
        let gesendet = self.an_verbindungen_senden(
            mitglieder.into_iter().filter(|c| Some(*c) != ausser),
            nachricht,
        );
        tracing::trace!(conversation_id = %raum, gesendet, "Raum-Broadcast");
        gesendet
    }

    /// Sendet eine Nachricht an jede offene Verbindung eines Benutzers
    pub fn an_user_senden(&self, user_id: &UserId, nachricht: SignalMessage) -> usize {
        self.an_verbindungen_senden(self.inner.sitzungen.verbindungen_von(user_id), nachricht)
    }

    /// Sendet eine Nachricht an alle authentifizierten Verbindungen
    ///
    /// Mit `ausser_user` werden alle Verbindungen dieses Benutzers uebersprungen.
    pub fn an_alle_authentifizierten_senden(
        &self,
        nachricht: SignalMessage,
        ausser_user: Option<UserId>,
    ) -> usize {
        let ziele: Vec<ConnectionId> = self
            .inner
            .sitzungen
            .authentifizierte_verbindungen()
            .into_iter()
            .filter(|c| match ausser_user {
                Some(uid) => self.inner.sitzungen.benutzer_von(*c) != Some(uid),
                None => true,
            })
            .collect();
        self.an_verbindungen_senden(ziele, nachricht)
    }

    /// Kapazitaet jeder Send-Queue
    pub fn queue_groesse(&self) -> usize {
        self.inner.queue_groesse
    }

    /// Gibt die Anzahl der registrierten Verbindungen zurueck
    pub fn verbindungs_anzahl(&self) -> usize {
        self.inner.clients.len()
    }

    pub fn ist_registriert(&self, verbindung: ConnectionId) -> bool {
        self.inner.clients.contains_key(&verbindung)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parley_auth::StaticTokenProvider;
    use std::time::Duration;

    fn test_nachricht(id: u32) -> SignalMessage {
        SignalMessage::ping(id, 12345)
    }

    fn router(queue: usize) -> (EventRouter, RoomIndex, SessionRegistry) {
        let raeume = RoomIndex::neu();
        let sitzungen = SessionRegistry::neu(Arc::new(StaticTokenProvider::neu()), Duration::from_secs(1));
        let router = EventRouter::neu(raeume.clone(), sitzungen.clone(), queue);
        (router, raeume, sitzungen)
    }

    #[tokio::test]
    async fn an_raum_senden_ohne_ausloeser() {
        let (router, raeume, _) = router(8);
        let raum = ConversationId::new();

        let c1 = ConnectionId::naechste();
        let c2 = ConnectionId::naechste();
        let c3 = ConnectionId::naechste(); // nicht im Raum

        let mut rx1 = router.verbindung_registrieren(c1);
        let mut rx2 = router.verbindung_registrieren(c2);
        let mut rx3 = router.verbindung_registrieren(c3);
        raeume.beitreten(c1, raum);
        raeume.beitreten(c2, raum);

        let gesendet = router.an_raum_senden(&raum, test_nachricht(10), Some(c1));
        assert_eq!(gesendet, 1);

        assert!(rx1.try_recv().is_err(), "Ausloeser darf nichts empfangen");
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err(), "c3 darf nichts empfangen");
    }

    #[tokio::test]
    async fn an_user_erreicht_alle_geraete() {
        let (router, _, sitzungen) = router(8);
        let uid = UserId::new();
        let c1 = ConnectionId::naechste();
        let c2 = ConnectionId::naechste();
        let mut rx1 = router.verbindung_registrieren(c1);
        let mut rx2 = router.verbindung_registrieren(c2);
        sitzungen.verbindung_registrieren(c1);
        sitzungen.verbindung_registrieren(c2);
        sitzungen.binden(c1, uid).unwrap();
        sitzungen.binden(c2, uid).unwrap();

        assert_eq!(router.an_user_senden(&uid, test_nachricht(1)), 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn volle_queue_blockiert_andere_nicht() {
        let (router, raeume, _) = router(1);
        let raum = ConversationId::new();
        let langsam = ConnectionId::naechste();
        let schnell = ConnectionId::naechste();
        let _rx_langsam = router.verbindung_registrieren(langsam);
        let mut rx_schnell = router.verbindung_registrieren(schnell);
        raeume.beitreten(langsam, raum);
        raeume.beitreten(schnell, raum);

        router.an_raum_senden(&raum, test_nachricht(1), None);
        rx_schnell.try_recv().unwrap();
        // Die Queue von `langsam` ist jetzt voll
        assert_eq!(router.an_raum_senden(&raum, test_nachricht(2), None), 1);
        assert_eq!(rx_schnell.try_recv().unwrap().request_id, 2);
    }

    #[tokio::test]
    async fn reihenfolge_pro_queue_bleibt_erhalten() {
        let (router, _, _) = router(16);
        let conn = ConnectionId::naechste();
        let mut rx = router.verbindung_registrieren(conn);
        for i in 1..=5 {
            router.an_verbindung_senden(conn, test_nachricht(i));
        }
        for i in 1..=5 {
            assert_eq!(rx.try_recv().unwrap().request_id, i);
        }
    }

    #[test]
    fn entfernte_verbindung_wird_uebergangen() {
        let (router, _, _) = router(4);
        let conn = ConnectionId::naechste();
        let _rx = router.verbindung_registrieren(conn);
        router.verbindung_entfernen(conn);
        assert!(!router.ist_registriert(conn));
        assert!(!router.an_verbindung_senden(conn, test_nachricht(1)));
    }

    #[test]
    fn gesammelt_senden_alles_oder_nichts() {
        let (router, _, _) = router(4);
        let a = ConnectionId::naechste();
        let b = ConnectionId::naechste();
        let mut rx_a = router.verbindung_registrieren(a);
        let mut rx_b = router.verbindung_registrieren(b);
        router.an_verbindung_senden(b, test_nachricht(99));
        router.an_verbindung_senden(b, test_nachricht(98));

        // b hat nur noch zwei freie Plaetze
        let fehler = router
            .gesammelt_senden(vec![
                (a, test_nachricht(1)),
                (b, test_nachricht(2)),
                (b, test_nachricht(3)),
                (b, test_nachricht(4)),
            ])
            .unwrap_err();
        assert!(matches!(fehler, SignalingError::EmpfaengerUeberlastet(c) if c == b));
        assert!(rx_a.try_recv().is_err());

        rx_b.try_recv().unwrap();
        rx_b.try_recv().unwrap();
        let gesendet = router
            .gesammelt_senden(vec![
                (b, test_nachricht(2)),
                (a, test_nachricht(1)),
                (b, test_nachricht(3)),
            ])
            .unwrap();
        assert_eq!(gesendet, 3);
        assert_eq!(rx_a.try_recv().unwrap().request_id, 1);
        assert_eq!(rx_b.try_recv().unwrap().request_id, 2);
        assert_eq!(rx_b.try_recv().unwrap().request_id, 3);
    }

    #[test]
    fn gesammelt_senden_groesser_als_queue() {
        let (router, _, _) = router(2);
        let a = ConnectionId::naechste();
        let mut rx = router.verbindung_registrieren(a);
        let nachrichten = (1..=3).map(|i| (a, test_nachricht(i))).collect();
        assert!(router.gesammelt_senden(nachrichten).is_err());
        assert!(rx.try_recv().is_err());

        // Unbekannte Ziele zaehlen nicht als Fehler
        let fremd = ConnectionId::naechste();
        assert_eq!(router.gesammelt_senden(vec![(fremd, test_nachricht(1))]).unwrap(), 0);
    }
}
