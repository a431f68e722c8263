//! Anruf-Koordinator – Lebenszyklus der Anruf-Sessions
//!
//! Pro Konversation hoechstens eine Session. Der Koordinator prueft
//! Teilnahme und Zustand, aendert die Session und stellt die daraus
//! folgenden Nachrichten zu. Zustellungen passieren unter dem
//! Eintrags-Lock der Session, damit Aushandlungsnachrichten eines
//! Peer-Links in der berechneten Reihenfolge in den Queues landen.
//!
//! Aushandlungsnachrichten gehen ganz oder gar nicht raus: passt eine
//! Beschreibung samt nachgereichter Kandidaten nicht in die Send-Queue
//! des Empfaengers, wird der Link zurueckgesetzt und der Absender bekommt
//! `RECIPIENT_BUSY`.
//!
//! ## Zustandsmaschine
//! ```text
//! (keine Session) --call_start--> Klingelt --call_accept--> Verbindend
//!                                                               |
//!                                            offer/answer       v
//!                                                             Aktiv
//! jeder Zustand --call_end/call_reject/Trennen--> (aufgeloest, wenn < 2 Teilnehmer
//!                                                  oder keiner beigetreten)
//! ```
//!
//! Topologie ist ein Vollvermaschtes Netz: jedes Paar beigetretener
//! Teilnehmer handelt einen eigenen `PeerLink` aus. Die Link-Verwaltung
//! liegt vollstaendig in `CallSession`, die Nachrichten nach aussen
//! haengen nicht davon ab.

pub mod peer_link;
pub mod session;

pub use peer_link::{LinkSchluessel, LinkZustand, PeerLink, MAX_GEPUFFERTE_KANDIDATEN};
pub use session::{AnrufZustand, CallSession, TeilnehmerStatus};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parley_core::{ConnectionId, ConversationId, UserId};
use parley_protocol::{
    CallEndedEvent, CallJoinedResponse, CallKind, IncomingCallEvent, MediaStateChangedEvent,
    MediaStateRequest, SignalMessage, SignalPayload, WebRtcOutbound,
};
use parley_store::ConversationStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::broadcast::EventRouter;
use crate::error::{store_aufruf, SignalingError, SignalingResult};
use crate::session::SessionRegistry;

/// Wohin eine Lebenszyklus-Nachricht geht
#[derive(Debug, Clone, Copy)]
enum Ziel {
    /// Gebundene Verbindung eines Beigetretenen
    Verbindung(ConnectionId),
    /// Alle Verbindungen eines Benutzers, optional ohne eine
    Benutzer {
        user_id: UserId,
        ausser: Option<ConnectionId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Abgang {
    /// Einladung abgelehnt (explizit oder Klingel-Timeout)
    Abgelehnt,
    /// Aufgelegt oder Verbindung getrennt
    Aufgelegt,
}

#[derive(Debug, Clone, Copy)]
enum Aushandlung {
    Offer,
    Answer,
    Kandidat,
}

fn kein_anruf(conversation_id: &ConversationId) -> SignalingError {
    SignalingError::nicht_gefunden(format!("Kein Anruf in {}", conversation_id))
}

/// Verwaltet alle laufenden Anruf-Sessions
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct CallCoordinator {
    inner: Arc<CallInner>,
}

struct CallInner {
    sessions: DashMap<ConversationId, CallSession>,
    sitzungen: SessionRegistry,
    router: EventRouter,
    konversationen: Arc<dyn ConversationStore>,
    store_timeout: Duration,
    klingel_timeout: Option<Duration>,
    /// Fruehe Kandidaten pro Link-Richtung, unter der Queue-Groesse
    kandidaten_limit: usize,
}

impl CallCoordinator {
    pub fn neu(
        sitzungen: SessionRegistry,
        router: EventRouter,
        konversationen: Arc<dyn ConversationStore>,
        store_timeout: Duration,
        klingel_timeout: Option<Duration>,
    ) -> Self {
        // Beschreibung plus Warteschlange muessen in eine Send-Queue passen
        let kandidaten_limit = router
            .queue_groesse()
            .saturating_sub(1)
            .min(MAX_GEPUFFERTE_KANDIDATEN);
        Self {
            inner: Arc::new(CallInner {
                sessions: DashMap::new(),
                sitzungen,
                router,
                konversationen,
                store_timeout,
                klingel_timeout,
                kandidaten_limit,
            }),
        }
    }

    fn zustellen(&self, ziel: Ziel, payload: SignalPayload) {
        let nachricht = SignalMessage::push(payload);
        match ziel {
            Ziel::Verbindung(verbindung) => {
                self.inner.router.an_verbindung_senden(verbindung, nachricht);
            }
            Ziel::Benutzer { user_id, ausser } => {
                let verbindungen = self
                    .inner
                    .sitzungen
                    .verbindungen_von(&user_id)
                    .into_iter()
                    .filter(|c| Some(*c) != ausser);
                self.inner.router.an_verbindungen_senden(verbindungen, nachricht);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lebenszyklus
    // -----------------------------------------------------------------------

    /// Startet einen Anruf und laedt alle anderen Teilnehmer ein
    ///
    /// Gibt die Eingeladenen zurueck. Laeuft bereits ein Anruf, bleibt
    /// dieser unveraendert und die Anfrage scheitert mit `BereitsImAnruf`.
    pub async fn anruf_starten(
        &self,
        verbindung: ConnectionId,
        user_id: UserId,
        conversation_id: ConversationId,
        art: CallKind,
    ) -> SignalingResult<Vec<UserId>> {
        if self.inner.sessions.contains_key(&conversation_id) {
            return Err(SignalingError::BereitsImAnruf);
        }

        let teilnehmer = store_aufruf(
            self.inner.store_timeout,
            "teilnehmer_auflisten",
            self.inner.konversationen.teilnehmer_auflisten(conversation_id),
        )
        .await?;
        if !teilnehmer.contains(&user_id) {
            return Err(SignalingError::nicht_gefunden(format!(
                "{} ist kein Teilnehmer von {}",
                user_id, conversation_id
            )));
        }

        let mut eingeladene: Vec<UserId> =
            teilnehmer.into_iter().filter(|uid| *uid != user_id).collect();
        eingeladene.sort();
        if eingeladene.is_empty() {
            return Err(SignalingError::ungueltig("Keine weiteren Teilnehmer in der Konversation"));
        }

        // Zwischen Pruefung und Store-Aufruf kann ein anderer Start gewonnen haben
        match self.inner.sessions.entry(conversation_id) {
            Entry::Occupied(_) => return Err(SignalingError::BereitsImAnruf),
            Entry::Vacant(frei) => {
                let _session = frei.insert(CallSession::neu(
                    conversation_id,
                    user_id,
                    verbindung,
                    art,
                    eingeladene.iter().copied(),
                    Instant::now(),
                )
                .mit_kandidaten_limit(self.inner.kandidaten_limit));

                let mut alle = eingeladene.clone();
                alle.push(user_id);
                alle.sort();
                let event = IncomingCallEvent {
                    conversation_id,
                    caller_id: user_id,
                    call_kind: art,
                    participants: alle,
                };
                for uid in &eingeladene {
                    self.zustellen(
                        Ziel::Benutzer {
                            user_id: *uid,
                            ausser: None,
                        },
                        SignalPayload::IncomingCall(event.clone()),
                    );
                }
            }
        }

        tracing::info!(
            conversation_id = %conversation_id,
            user_id = %user_id,
            call_kind = %art,
            eingeladen = eingeladene.len(),
            "Anruf gestartet"
        );
        Ok(eingeladene)
    }

    /// Nimmt eine Einladung an und bindet die Verbindung an den Anruf
    pub fn anruf_annehmen(
        &self,
        verbindung: ConnectionId,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> SignalingResult<CallJoinedResponse> {
        let mut session = self
            .inner
            .sessions
            .get_mut(&conversation_id)
            .ok_or_else(|| kein_anruf(&conversation_id))?;
        let bisherige = session.annehmen(user_id, verbindung)?;

        for uid in &bisherige {
            if let Some(ziel) = session.verbindung_von(uid) {
                self.zustellen(
                    Ziel::Verbindung(ziel),
                    SignalPayload::CallAccepted {
                        conversation_id,
                        user_id,
                    },
                );
            }
        }
        // Auf den anderen Geraeten des Annehmenden hoert das Klingeln auf
        self.zustellen(
            Ziel::Benutzer {
                user_id,
                ausser: Some(verbindung),
            },
            SignalPayload::CallAccepted {
                conversation_id,
                user_id,
            },
        );

        tracing::info!(
            conversation_id = %conversation_id,
            user_id = %user_id,
            zustand = ?session.zustand(),
            "Anruf angenommen"
        );
        Ok(CallJoinedResponse {
            conversation_id,
            call_kind: session.art(),
            participants: bisherige,
        })
    }

    /// Lehnt eine Einladung ab
    ///
    /// Gibt `true` zurueck wenn die Session dadurch aufgeloest wurde.
    pub fn anruf_ablehnen(
        &self,
        verbindung: ConnectionId,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> SignalingResult<bool> {
        self.abgang(conversation_id, user_id, Abgang::Abgelehnt, Some(verbindung))
    }

    /// Verlaesst den Anruf (oder lehnt ab, solange es noch klingelt)
    ///
    /// Gibt `true` zurueck wenn die Session dadurch aufgeloest wurde.
    pub fn anruf_beenden(
        &self,
        verbindung: ConnectionId,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> SignalingResult<bool> {
        let status = self
            .inner
            .sessions
            .get(&conversation_id)
            .ok_or_else(|| kein_anruf(&conversation_id))?
            .status(&user_id);
        match status {
            Some(TeilnehmerStatus::Eingeladen { .. }) => {
                self.abgang(conversation_id, user_id, Abgang::Abgelehnt, Some(verbindung))
            }
            Some(TeilnehmerStatus::Beigetreten { .. }) => {
                self.abgang(conversation_id, user_id, Abgang::Aufgelegt, Some(verbindung))
            }
            None => Err(SignalingError::nicht_gefunden(format!(
                "{} nimmt nicht am Anruf in {} teil",
                user_id, conversation_id
            ))),
        }
    }

    /// Beendet alle Anrufe, in denen diese Verbindung gebunden ist
    pub fn verbindung_getrennt(&self, verbindung: ConnectionId, user_id: UserId) {
        let betroffen: Vec<ConversationId> = self
            .inner
            .sessions
            .iter()
            .filter(|e| e.value().verbindung_von(&user_id) == Some(verbindung))
            .map(|e| *e.key())
            .collect();

        for conversation_id in betroffen {
            if let Err(e) = self.abgang(conversation_id, user_id, Abgang::Aufgelegt, None) {
                tracing::debug!(
                    conversation_id = %conversation_id,
                    fehler = %e,
                    "Anruf beim Trennen bereits beendet"
                );
            }
        }
    }

    /// Behandelt unbeantwortete Einladungen als Ablehnung
    ///
    /// Gibt die Anzahl der abgelaufenen Einladungen zurueck.
    pub fn klingel_timeouts_pruefen(&self, jetzt: Instant) -> usize {
        let Some(timeout) = self.inner.klingel_timeout else {
            return 0;
        };

        let mut faellig = Vec::new();
        for eintrag in self.inner.sessions.iter() {
            let conversation_id = *eintrag.key();
            for uid in eintrag.value().ueberfaellige_einladungen(jetzt, timeout) {
                faellig.push((conversation_id, uid));
            }
        }

        let mut abgelaufen = 0;
        for (conversation_id, user_id) in faellig {
            if self
                .abgang(conversation_id, user_id, Abgang::Abgelehnt, None)
                .is_ok()
            {
                tracing::debug!(
                    conversation_id = %conversation_id,
                    user_id = %user_id,
                    "Einladung unbeantwortet – als abgelehnt gewertet"
                );
                abgelaufen += 1;
            }
        }
        abgelaufen
    }

    /// Entfernt einen Teilnehmer und benachrichtigt die Verbleibenden
    fn abgang(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        abgang: Abgang,
        ausloeser: Option<ConnectionId>,
    ) -> SignalingResult<bool> {
        let Entry::Occupied(mut eintrag) = self.inner.sessions.entry(conversation_id) else {
            return Err(kein_anruf(&conversation_id));
        };

        let session = eintrag.get_mut();
        match abgang {
            Abgang::Abgelehnt => session.ablehnen(user_id)?,
            Abgang::Aufgelegt => {
                session.verlassen(&user_id).ok_or_else(|| {
                    SignalingError::nicht_gefunden(format!(
                        "{} nimmt nicht am Anruf in {} teil",
                        user_id, conversation_id
                    ))
                })?;
            }
        }
        let aufgeloest = session.aufzuloesen();

        for uid in session.beigetretene() {
            let Some(ziel) = session.verbindung_von(&uid) else {
                continue;
            };
            if abgang == Abgang::Abgelehnt {
                self.zustellen(
                    Ziel::Verbindung(ziel),
                    SignalPayload::CallRejected {
                        conversation_id,
                        user_id,
                    },
                );
            }
            if abgang == Abgang::Aufgelegt || aufgeloest {
                self.zustellen(
                    Ziel::Verbindung(ziel),
                    SignalPayload::CallEnded(CallEndedEvent {
                        conversation_id,
                        user_id,
                        session_closed: aufgeloest,
                    }),
                );
            }
        }

        if aufgeloest {
            for uid in session.eingeladene() {
                self.zustellen(
                    Ziel::Benutzer {
                        user_id: uid,
                        ausser: None,
                    },
                    SignalPayload::CallEnded(CallEndedEvent {
                        conversation_id,
                        user_id,
                        session_closed: true,
                    }),
                );
            }
        }

        // Die anderen Geraete des Abgehenden erfahren es ebenfalls
        let eigene = match abgang {
            Abgang::Abgelehnt => SignalPayload::CallRejected {
                conversation_id,
                user_id,
            },
            Abgang::Aufgelegt => SignalPayload::CallEnded(CallEndedEvent {
                conversation_id,
                user_id,
                session_closed: aufgeloest,
            }),
        };
        self.zustellen(
            Ziel::Benutzer {
                user_id,
                ausser: ausloeser,
            },
            eigene,
        );

        if aufgeloest {
            eintrag.remove();
            tracing::info!(conversation_id = %conversation_id, user_id = %user_id, "Anruf beendet");
        } else {
            tracing::info!(
                conversation_id = %conversation_id,
                user_id = %user_id,
                abgang = ?abgang,
                "Teilnehmer hat den Anruf verlassen"
            );
        }
        Ok(aufgeloest)
    }

    // -----------------------------------------------------------------------
    // Aushandlung
    // -----------------------------------------------------------------------

    pub fn offer_weiterleiten(
        &self,
        verbindung: ConnectionId,
        user_id: UserId,
        anfrage: WebRtcOutbound,
    ) -> SignalingResult<()> {
        self.aushandeln(verbindung, user_id, anfrage, Aushandlung::Offer)
    }

    pub fn answer_weiterleiten(
        &self,
        verbindung: ConnectionId,
        user_id: UserId,
        anfrage: WebRtcOutbound,
    ) -> SignalingResult<()> {
        self.aushandeln(verbindung, user_id, anfrage, Aushandlung::Answer)
    }

    pub fn kandidat_weiterleiten(
        &self,
        verbindung: ConnectionId,
        user_id: UserId,
        anfrage: WebRtcOutbound,
    ) -> SignalingResult<()> {
        self.aushandeln(verbindung, user_id, anfrage, Aushandlung::Kandidat)
    }

    fn aushandeln(
        &self,
        verbindung: ConnectionId,
        user_id: UserId,
        anfrage: WebRtcOutbound,
        art: Aushandlung,
    ) -> SignalingResult<()> {
        let mut session = self
            .inner
            .sessions
            .get_mut(&anfrage.conversation_id)
            .ok_or_else(|| kein_anruf(&anfrage.conversation_id))?;

        let ziel = anfrage.target_user_id;
        let sicherung = session.link_sichern(user_id, ziel);
        let zustellungen = match art {
            Aushandlung::Offer => session.offer(user_id, verbindung, ziel, anfrage.data)?,
            Aushandlung::Answer => session.answer(user_id, verbindung, ziel, anfrage.data)?,
            Aushandlung::Kandidat => session.kandidat(user_id, verbindung, ziel, anfrage.data)?,
        };
        let anzahl = zustellungen.len();
        let nachrichten = zustellungen
            .into_iter()
            .map(|z| (z.verbindung, SignalMessage::push(z.payload)))
            .collect();

        if let Err(e) = self.inner.router.gesammelt_senden(nachrichten) {
            session.link_zuruecksetzen(user_id, ziel, sicherung);
            tracing::warn!(
                conversation_id = %anfrage.conversation_id,
                von = %user_id,
                an = %ziel,
                art = ?art,
                fehler = %e,
                "Aushandlung nicht zustellbar – Link zurueckgesetzt"
            );
            return Err(e);
        }

        tracing::trace!(
            conversation_id = %anfrage.conversation_id,
            von = %user_id,
            an = %ziel,
            art = ?art,
            zustellungen = anzahl,
            "Aushandlung weitergeleitet"
        );
        Ok(())
    }

    /// Leitet den Medienstatus an die anderen Beigetretenen weiter
    pub fn medienstatus_weiterleiten(
        &self,
        verbindung: ConnectionId,
        user_id: UserId,
        anfrage: MediaStateRequest,
    ) -> SignalingResult<()> {
        let session = self
            .inner
            .sessions
            .get(&anfrage.conversation_id)
            .ok_or_else(|| kein_anruf(&anfrage.conversation_id))?;
        if session.verbindung_von(&user_id) != Some(verbindung) {
            return Err(SignalingError::nicht_gefunden(
                "Absender nimmt ueber diese Verbindung nicht am Anruf teil",
            ));
        }

        let event = MediaStateChangedEvent {
            conversation_id: anfrage.conversation_id,
            user_id,
            audio_muted: anfrage.audio_muted,
            video_enabled: anfrage.video_enabled,
            screen_sharing: anfrage.screen_sharing,
        };
        for uid in session.beigetretene() {
            if uid == user_id {
                continue;
            }
            if let Some(ziel) = session.verbindung_von(&uid) {
                self.zustellen(
                    Ziel::Verbindung(ziel),
                    SignalPayload::MediaStateChanged(event.clone()),
                );
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn zustand(&self, conversation_id: &ConversationId) -> Option<AnrufZustand> {
        self.inner.sessions.get(conversation_id).map(|s| s.zustand())
    }

    pub fn beigetretene(&self, conversation_id: &ConversationId) -> Option<Vec<UserId>> {
        self.inner
            .sessions
            .get(conversation_id)
            .map(|s| s.beigetretene())
    }

    pub fn eingeladene(&self, conversation_id: &ConversationId) -> Option<Vec<UserId>> {
        self.inner.sessions.get(conversation_id).map(|s| s.eingeladene())
    }

    pub fn link_zustand(
        &self,
        conversation_id: &ConversationId,
        a: UserId,
        b: UserId,
    ) -> Option<LinkZustand> {
        self.inner
            .sessions
            .get(conversation_id)
            .and_then(|s| s.link(a, b).map(|l| l.zustand()))
    }

    pub fn link_anzahl(&self, conversation_id: &ConversationId) -> usize {
        self.inner
            .sessions
            .get(conversation_id)
            .map(|s| s.link_anzahl())
            .unwrap_or(0)
    }

    /// Wartende Kandidaten von `von` an `an`
    pub fn gepufferte_kandidaten(
        &self,
        conversation_id: &ConversationId,
        von: UserId,
        an: UserId,
    ) -> usize {
        self.inner
            .sessions
            .get(conversation_id)
            .and_then(|s| s.link(von, an).map(|l| l.gepufferte_kandidaten(&von)))
            .unwrap_or(0)
    }

    pub fn aktive_anrufe(&self) -> usize {
        self.inner.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::RoomIndex;
    use parley_auth::StaticTokenProvider;
    use parley_store::InMemoryStore;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Teilnehmer {
        user_id: UserId,
        verbindung: ConnectionId,
        rx: mpsc::Receiver<SignalMessage>,
    }

    impl Teilnehmer {
        fn alle(&mut self) -> Vec<SignalPayload> {
            let mut aus = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                aus.push(msg.payload);
            }
            aus
        }
    }

    struct Aufbau {
        anrufe: CallCoordinator,
        konversation: ConversationId,
        teilnehmer: Vec<Teilnehmer>,
    }

    fn aufbau(anzahl: usize, klingel_timeout: Option<Duration>) -> Aufbau {
        let sitzungen =
            SessionRegistry::neu(Arc::new(StaticTokenProvider::neu()), Duration::from_secs(1));
        let router = EventRouter::neu(RoomIndex::neu(), sitzungen.clone(), 64);
        let store = Arc::new(InMemoryStore::neu());

        let teilnehmer: Vec<Teilnehmer> = (0..anzahl)
            .map(|_| {
                let user_id = UserId::new();
                let verbindung = ConnectionId::naechste();
                let rx = router.verbindung_registrieren(verbindung);
                sitzungen.verbindung_registrieren(verbindung);
                sitzungen.binden(verbindung, user_id).unwrap();
                Teilnehmer { user_id, verbindung, rx }
            })
            .collect();
        let konversation = store.konversation_anlegen(teilnehmer.iter().map(|t| t.user_id));

        let anrufe = CallCoordinator::neu(
            sitzungen,
            router,
            store,
            Duration::from_secs(1),
            klingel_timeout,
        );
        Aufbau { anrufe, konversation, teilnehmer }
    }

    #[tokio::test]
    async fn zweiter_start_bereits_im_anruf() {
        let mut a = aufbau(3, None);
        let (u0, c0) = (a.teilnehmer[0].user_id, a.teilnehmer[0].verbindung);
        let (u1, c1) = (a.teilnehmer[1].user_id, a.teilnehmer[1].verbindung);

        a.anrufe
            .anruf_starten(c0, u0, a.konversation, CallKind::Audio)
            .await
            .unwrap();
        let vorher = a.anrufe.eingeladene(&a.konversation);

        let fehler = a
            .anrufe
            .anruf_starten(c1, u1, a.konversation, CallKind::Video)
            .await
            .unwrap_err();
        assert!(matches!(fehler, SignalingError::BereitsImAnruf));
        assert_eq!(a.anrufe.eingeladene(&a.konversation), vorher);
        assert_eq!(a.anrufe.beigetretene(&a.konversation), Some(vec![u0]));
        // Nur die erste Einladung kam an
        assert_eq!(a.teilnehmer[1].alle().len(), 1);
    }

    #[tokio::test]
    async fn nicht_teilnehmer_kann_nicht_anrufen() {
        let a = aufbau(2, None);
        let fremd = UserId::new();
        let fehler = a
            .anrufe
            .anruf_starten(ConnectionId::naechste(), fremd, a.konversation, CallKind::Audio)
            .await
            .unwrap_err();
        assert!(matches!(fehler, SignalingError::NichtGefunden(_)));
        assert_eq!(a.anrufe.aktive_anrufe(), 0);
    }

    #[tokio::test]
    async fn ablehnen_im_zweiergespraech_beendet_session() {
        let mut a = aufbau(2, None);
        let (u0, c0) = (a.teilnehmer[0].user_id, a.teilnehmer[0].verbindung);
        let (u1, c1) = (a.teilnehmer[1].user_id, a.teilnehmer[1].verbindung);
        a.anrufe
            .anruf_starten(c0, u0, a.konversation, CallKind::Audio)
            .await
            .unwrap();

        assert!(a.anrufe.anruf_ablehnen(c1, u1, a.konversation).unwrap());
        assert_eq!(a.anrufe.aktive_anrufe(), 0);

        let bei_anrufer = a.teilnehmer[0].alle();
        assert!(matches!(bei_anrufer[0], SignalPayload::CallRejected { user_id, .. } if user_id == u1));
        assert!(matches!(
            bei_anrufer[1],
            SignalPayload::CallEnded(CallEndedEvent { session_closed: true, .. })
        ));
    }

    #[tokio::test]
    async fn ablehnen_durch_beigetretenen_nicht_gefunden() {
        let a = aufbau(2, None);
        let (u0, c0) = (a.teilnehmer[0].user_id, a.teilnehmer[0].verbindung);
        a.anrufe
            .anruf_starten(c0, u0, a.konversation, CallKind::Audio)
            .await
            .unwrap();
        assert!(matches!(
            a.anrufe.anruf_ablehnen(c0, u0, a.konversation),
            Err(SignalingError::NichtGefunden(_))
        ));
    }

    #[tokio::test]
    async fn medienstatus_an_andere_beigetretene() {
        let mut a = aufbau(2, None);
        let (u0, c0) = (a.teilnehmer[0].user_id, a.teilnehmer[0].verbindung);
        let (u1, c1) = (a.teilnehmer[1].user_id, a.teilnehmer[1].verbindung);
        a.anrufe
            .anruf_starten(c0, u0, a.konversation, CallKind::Video)
            .await
            .unwrap();
        a.anrufe.anruf_annehmen(c1, u1, a.konversation).unwrap();
        a.teilnehmer[0].alle();

        a.anrufe
            .medienstatus_weiterleiten(
                c1,
                u1,
                MediaStateRequest {
                    conversation_id: a.konversation,
                    audio_muted: true,
                    video_enabled: false,
                    screen_sharing: false,
                },
            )
            .unwrap();

        let empfangen = a.teilnehmer[0].alle();
        assert!(matches!(
            &empfangen[..],
            [SignalPayload::MediaStateChanged(e)] if e.user_id == u1 && e.audio_muted
        ));
        assert_eq!(a.anrufe.zustand(&a.konversation), Some(AnrufZustand::Verbindend));
    }

    #[tokio::test]
    async fn kandidat_ohne_session_nicht_gefunden() {
        let a = aufbau(2, None);
        let fehler = a
            .anrufe
            .kandidat_weiterleiten(
                a.teilnehmer[0].verbindung,
                a.teilnehmer[0].user_id,
                WebRtcOutbound {
                    conversation_id: a.konversation,
                    target_user_id: a.teilnehmer[1].user_id,
                    data: json!({"candidate": "x"}),
                },
            )
            .unwrap_err();
        assert!(matches!(fehler, SignalingError::NichtGefunden(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn klingel_timeout_wirkt_wie_ablehnen() {
        let mut a = aufbau(2, Some(Duration::from_secs(45)));
        let (u0, c0) = (a.teilnehmer[0].user_id, a.teilnehmer[0].verbindung);
        let u1 = a.teilnehmer[1].user_id;
        a.anrufe
            .anruf_starten(c0, u0, a.konversation, CallKind::Audio)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(a.anrufe.klingel_timeouts_pruefen(Instant::now()), 0);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(a.anrufe.klingel_timeouts_pruefen(Instant::now()), 1);
        assert_eq!(a.anrufe.aktive_anrufe(), 0);

        let bei_anrufer = a.teilnehmer[0].alle();
        assert!(matches!(bei_anrufer[0], SignalPayload::CallRejected { user_id, .. } if user_id == u1));
        // Beim Eingeladenen: erst incoming_call, dann call_rejected auf seinen Geraeten
        let beim_eingeladenen = a.teilnehmer[1].alle();
        assert!(matches!(beim_eingeladenen[0], SignalPayload::IncomingCall(_)));
        assert!(matches!(beim_eingeladenen[1], SignalPayload::CallRejected { .. }));
    }

    fn webrtc(a: &Aufbau, an: usize, data: serde_json::Value) -> WebRtcOutbound {
        WebRtcOutbound {
            conversation_id: a.konversation,
            target_user_id: a.teilnehmer[an].user_id,
            data,
        }
    }

    /// Start durch Teilnehmer 0, alle anderen nehmen an, Queues geleert
    async fn alle_beigetreten(a: &mut Aufbau) {
        let (u0, c0) = (a.teilnehmer[0].user_id, a.teilnehmer[0].verbindung);
        a.anrufe
            .anruf_starten(c0, u0, a.konversation, CallKind::Video)
            .await
            .unwrap();
        for t in 1..a.teilnehmer.len() {
            let (u, c) = (a.teilnehmer[t].user_id, a.teilnehmer[t].verbindung);
            a.anrufe.anruf_annehmen(c, u, a.konversation).unwrap();
        }
        for t in a.teilnehmer.iter_mut() {
            t.alle();
        }
    }

    #[tokio::test]
    async fn fruehe_kandidaten_passen_in_die_queue() {
        let mut a = aufbau(2, None);
        alle_beigetreten(&mut a).await;
        let (u1, c1) = (a.teilnehmer[1].user_id, a.teilnehmer[1].verbindung);

        // Queue 64: eine Beschreibung plus hoechstens 63 Kandidaten
        let mut angenommen = 0;
        for i in 0..100 {
            let anfrage = webrtc(&a, 0, json!(i));
            match a.anrufe.kandidat_weiterleiten(c1, u1, anfrage) {
                Ok(()) => angenommen += 1,
                Err(e) => assert!(matches!(e, SignalingError::UngueltigeAnfrage(_))),
            }
        }
        assert_eq!(angenommen, 63);

        let anfrage = webrtc(&a, 0, json!("offer"));
        a.anrufe.offer_weiterleiten(c1, u1, anfrage).unwrap();

        let bei_a = a.teilnehmer[0].alle();
        assert_eq!(bei_a.len(), 64);
        assert!(matches!(bei_a[0], SignalPayload::WebrtcOfferReceived(_)));
        for (i, p) in bei_a[1..].iter().enumerate() {
            assert!(matches!(
                p,
                SignalPayload::WebrtcIceCandidateReceived(e) if e.data == json!(i)
            ));
        }
    }

    #[tokio::test]
    async fn volle_queue_setzt_link_zurueck() {
        let mut a = aufbau(2, None);
        alle_beigetreten(&mut a).await;
        let (u0, c0) = (a.teilnehmer[0].user_id, a.teilnehmer[0].verbindung);
        let (u1, c1) = (a.teilnehmer[1].user_id, a.teilnehmer[1].verbindung);

        for i in 0..10 {
            let anfrage = webrtc(&a, 0, json!(i));
            a.anrufe.kandidat_weiterleiten(c1, u1, anfrage).unwrap();
        }
        // Queue von A bis auf vier Plaetze fuellen
        for i in 0..60 {
            assert!(a.anrufe.inner.router.an_verbindung_senden(c0, SignalMessage::ping(i, 0)));
        }

        let anfrage = webrtc(&a, 0, json!("offer"));
        let fehler = a.anrufe.offer_weiterleiten(c1, u1, anfrage).unwrap_err();
        assert!(matches!(fehler, SignalingError::EmpfaengerUeberlastet(c) if c == c0));
        assert_eq!(fehler.code(), parley_protocol::ErrorCode::RecipientBusy);
        assert_eq!(a.anrufe.gepufferte_kandidaten(&a.konversation, u1, u0), 10);
        assert_eq!(
            a.anrufe.link_zustand(&a.konversation, u0, u1),
            Some(LinkZustand::Ausstehend)
        );

        // Nach dem Leeren klappt der zweite Versuch vollstaendig
        assert_eq!(a.teilnehmer[0].alle().len(), 60);
        let anfrage = webrtc(&a, 0, json!("offer"));
        a.anrufe.offer_weiterleiten(c1, u1, anfrage).unwrap();
        let bei_a = a.teilnehmer[0].alle();
        assert_eq!(bei_a.len(), 11);
        assert!(matches!(bei_a[0], SignalPayload::WebrtcOfferReceived(_)));
        assert_eq!(
            a.anrufe.link_zustand(&a.konversation, u0, u1),
            Some(LinkZustand::Angeboten)
        );
    }

    #[tokio::test]
    async fn getrennter_teilnehmer_tritt_wieder_bei() {
        let mut a = aufbau(3, None);
        alle_beigetreten(&mut a).await;
        let u0 = a.teilnehmer[0].user_id;
        let (u1, c1) = (a.teilnehmer[1].user_id, a.teilnehmer[1].verbindung);
        let u2 = a.teilnehmer[2].user_id;

        a.anrufe.verbindung_getrennt(c1, u1);
        assert_eq!(a.anrufe.beigetretene(&a.konversation), Some({
            let mut v = vec![u0, u2];
            v.sort();
            v
        }));

        // Neuer Start ist weiterhin gesperrt, Wiedereintritt geht ueber Annehmen
        let neu = ConnectionId::naechste();
        assert!(matches!(
            a.anrufe
                .anruf_starten(neu, u1, a.konversation, CallKind::Video)
                .await,
            Err(SignalingError::BereitsImAnruf)
        ));
        let antwort = a.anrufe.anruf_annehmen(neu, u1, a.konversation).unwrap();
        let mut erwartet = vec![u0, u2];
        erwartet.sort();
        assert_eq!(antwort.participants, erwartet);
        assert_eq!(a.anrufe.beigetretene(&a.konversation).map(|b| b.len()), Some(3));

        let bei_a = a.teilnehmer[0].alle();
        assert!(matches!(
            bei_a.last(),
            Some(SignalPayload::CallAccepted { user_id, .. }) if *user_id == u1
        ));
    }
}
