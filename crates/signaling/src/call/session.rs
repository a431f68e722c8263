//! Anruf-Session einer Konversation
//!
//! Reiner Zustand ohne IO: Teilnehmer, Peer-Links und die Regeln, wann
//! eine Session aufgeloest wird. Der `CallCoordinator` haelt die Sessions
//! und stellt die hier berechneten Nachrichten zu.

use chrono::{DateTime, Utc};
use parley_core::{ConnectionId, ConversationId, UserId};
use parley_protocol::{CallKind, SignalPayload, WebRtcInbound};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

use super::peer_link::{
    LinkSchluessel, LinkZustand, PeerLink, Relais, Weiterleitung, MAX_GEPUFFERTE_KANDIDATEN,
};
use crate::error::{SignalingError, SignalingResult};

/// Zustand einer laufenden Session (`Beendet` = nicht mehr in der Tabelle)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnrufZustand {
    /// Nur der Initiator ist beigetreten
    Klingelt,
    /// Mindestens zwei beigetreten, noch kein aktiver Link
    Verbindend,
    /// Mindestens ein aktiver Peer-Link
    Aktiv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeilnehmerStatus {
    /// Es klingelt; an keine Verbindung gebunden
    Eingeladen { seit: Instant },
    /// Beigetreten ueber genau diese Verbindung
    Beigetreten { verbindung: ConnectionId },
}

/// Aushandlungsnachricht zur Zustellung an eine gebundene Verbindung
#[derive(Debug, Clone)]
pub struct LinkZustellung {
    pub verbindung: ConnectionId,
    pub payload: SignalPayload,
}

#[derive(Debug)]
pub struct CallSession {
    conversation_id: ConversationId,
    initiator: UserId,
    art: CallKind,
    gestartet_am: DateTime<Utc>,
    teilnehmer: HashMap<UserId, TeilnehmerStatus>,
    /// Ehemals Beigetretene, die waehrend der Session wieder annehmen duerfen
    ehemalige: HashSet<UserId>,
    links: HashMap<LinkSchluessel, PeerLink>,
    kandidaten_limit: usize,
}

impl CallSession {
    pub fn neu(
        conversation_id: ConversationId,
        initiator: UserId,
        verbindung: ConnectionId,
        art: CallKind,
        eingeladene: impl IntoIterator<Item = UserId>,
        jetzt: Instant,
    ) -> Self {
        let mut teilnehmer: HashMap<UserId, TeilnehmerStatus> = eingeladene
            .into_iter()
            .map(|uid| (uid, TeilnehmerStatus::Eingeladen { seit: jetzt }))
            .collect();
        teilnehmer.insert(initiator, TeilnehmerStatus::Beigetreten { verbindung });

        Self {
            conversation_id,
            initiator,
            art,
            gestartet_am: Utc::now(),
            teilnehmer,
            ehemalige: HashSet::new(),
            links: HashMap::new(),
            kandidaten_limit: MAX_GEPUFFERTE_KANDIDATEN,
        }
    }

    /// Setzt die Obergrenze fruehzeitiger Kandidaten pro Link-Richtung
    pub fn mit_kandidaten_limit(mut self, limit: usize) -> Self {
        self.kandidaten_limit = limit.min(MAX_GEPUFFERTE_KANDIDATEN);
        self
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn initiator(&self) -> UserId {
        self.initiator
    }

    pub fn art(&self) -> CallKind {
        self.art
    }

    pub fn gestartet_am(&self) -> DateTime<Utc> {
        self.gestartet_am
    }

    pub fn zustand(&self) -> AnrufZustand {
        if self.links.values().any(|l| l.zustand() == LinkZustand::Aktiv) {
            AnrufZustand::Aktiv
        } else if self.beigetretene().len() >= 2 {
            AnrufZustand::Verbindend
        } else {
            AnrufZustand::Klingelt
        }
    }

    /// Beigetretene Teilnehmer (sortiert)
    pub fn beigetretene(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .teilnehmer
            .iter()
            .filter(|(_, s)| matches!(s, TeilnehmerStatus::Beigetreten { .. }))
            .map(|(uid, _)| *uid)
            .collect();
        ids.sort();
        ids
    }

    /// Eingeladene, die noch nicht geantwortet haben (sortiert)
    pub fn eingeladene(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .teilnehmer
            .iter()
            .filter(|(_, s)| matches!(s, TeilnehmerStatus::Eingeladen { .. }))
            .map(|(uid, _)| *uid)
            .collect();
        ids.sort();
        ids
    }

    pub fn status(&self, user_id: &UserId) -> Option<TeilnehmerStatus> {
        self.teilnehmer.get(user_id).copied()
    }

    /// Gebundene Verbindung eines beigetretenen Teilnehmers
    pub fn verbindung_von(&self, user_id: &UserId) -> Option<ConnectionId> {
        match self.teilnehmer.get(user_id) {
            Some(TeilnehmerStatus::Beigetreten { verbindung }) => Some(*verbindung),
            _ => None,
        }
    }

    /// Nimmt die Einladung an und bindet die Verbindung
    ///
    /// Wer die Session verlassen hat (aufgelegt oder Verbindung verloren),
    /// kann auf demselben Weg wieder beitreten, solange sie laeuft.
    /// Gibt die bereits beigetretenen Teilnehmer zurueck; an jeden von
    /// ihnen schickt der Annehmende anschliessend ein Offer.
    pub fn annehmen(&mut self, user_id: UserId, verbindung: ConnectionId) -> SignalingResult<Vec<UserId>> {
        match self.teilnehmer.get(&user_id) {
            Some(TeilnehmerStatus::Eingeladen { .. }) => {}
            None if self.ehemalige.remove(&user_id) => {}
            _ => {
                return Err(SignalingError::nicht_gefunden(format!(
                    "Keine offene Einladung fuer {} in {}",
                    user_id, self.conversation_id
                )))
            }
        }
        self.teilnehmer
            .insert(user_id, TeilnehmerStatus::Beigetreten { verbindung });
        Ok(self
            .beigetretene()
            .into_iter()
            .filter(|uid| *uid != user_id)
            .collect())
    }

    /// Lehnt die Einladung ab und entfernt den Eingeladenen
    pub fn ablehnen(&mut self, user_id: UserId) -> SignalingResult<()> {
        match self.teilnehmer.get(&user_id) {
            Some(TeilnehmerStatus::Eingeladen { .. }) => {
                self.teilnehmer.remove(&user_id);
                Ok(())
            }
            _ => Err(SignalingError::nicht_gefunden(format!(
                "Keine offene Einladung fuer {} in {}",
                user_id, self.conversation_id
            ))),
        }
    }

    /// Entfernt einen Teilnehmer samt aller Peer-Links, die ihn beruehren
    pub fn verlassen(&mut self, user_id: &UserId) -> Option<TeilnehmerStatus> {
        let status = self.teilnehmer.remove(user_id)?;
        self.links.retain(|schluessel, _| !schluessel.enthaelt(user_id));
        if matches!(status, TeilnehmerStatus::Beigetreten { .. }) {
            self.ehemalige.insert(*user_id);
        }
        Some(status)
    }

    /// Darf `user_id` der laufenden Session wieder beitreten?
    pub fn kann_wieder_beitreten(&self, user_id: &UserId) -> bool {
        self.ehemalige.contains(user_id)
    }

    /// `true` wenn weniger als zwei Teilnehmer uebrig sind oder keiner beigetreten ist
    pub fn aufzuloesen(&self) -> bool {
        self.teilnehmer.len() < 2 || self.beigetretene().is_empty()
    }

    /// Einladungen, die laenger als `timeout` unbeantwortet sind
    pub fn ueberfaellige_einladungen(&self, jetzt: Instant, timeout: Duration) -> Vec<UserId> {
        self.teilnehmer
            .iter()
            .filter_map(|(uid, status)| match status {
                TeilnehmerStatus::Eingeladen { seit }
                    if jetzt.saturating_duration_since(*seit) >= timeout =>
                {
                    Some(*uid)
                }
                _ => None,
            })
            .collect()
    }

    pub fn link(&self, a: UserId, b: UserId) -> Option<&PeerLink> {
        self.links.get(&LinkSchluessel::neu(a, b))
    }

    pub fn link_anzahl(&self) -> usize {
        self.links.len()
    }

    /// Kopie des Links zwischen `a` und `b`, falls es ihn gibt
    pub fn link_sichern(&self, a: UserId, b: UserId) -> Option<PeerLink> {
        self.link(a, b).cloned()
    }

    /// Stellt einen mit `link_sichern` gesicherten Stand wieder her
    pub fn link_zuruecksetzen(&mut self, a: UserId, b: UserId, sicherung: Option<PeerLink>) {
        let schluessel = LinkSchluessel::neu(a, b);
        match sicherung {
            Some(link) => {
                self.links.insert(schluessel, link);
            }
            None => {
                self.links.remove(&schluessel);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Aushandlung
    // -----------------------------------------------------------------------

    /// Prueft Absender (beigetreten, ueber diese Verbindung) und Ziel (beigetreten, nicht er selbst)
    fn aushandlung_pruefen(
        &self,
        von: UserId,
        verbindung: ConnectionId,
        an: UserId,
    ) -> SignalingResult<()> {
        if self.verbindung_von(&von) != Some(verbindung) {
            return Err(SignalingError::nicht_gefunden(
                "Absender nimmt ueber diese Verbindung nicht am Anruf teil",
            ));
        }
        if an == von {
            return Err(SignalingError::nicht_gefunden("Ziel ist der Absender selbst"));
        }
        if self.verbindung_von(&an).is_none() {
            return Err(SignalingError::nicht_gefunden(format!(
                "{} ist dem Anruf nicht beigetreten",
                an
            )));
        }
        Ok(())
    }

    fn link_mut(&mut self, von: UserId, an: UserId) -> &mut PeerLink {
        let schluessel = LinkSchluessel::neu(von, an);
        let limit = self.kandidaten_limit;
        self.links
            .entry(schluessel)
            .or_insert_with(|| PeerLink::neu(schluessel, limit))
    }

    pub fn offer(
        &mut self,
        von: UserId,
        verbindung: ConnectionId,
        an: UserId,
        sdp: Value,
    ) -> SignalingResult<Vec<LinkZustellung>> {
        self.aushandlung_pruefen(von, verbindung, an)?;
        let weiterleitungen = self.link_mut(von, an).offer(von, an, sdp);
        Ok(self.zustellungen(weiterleitungen))
    }

    pub fn answer(
        &mut self,
        von: UserId,
        verbindung: ConnectionId,
        an: UserId,
        sdp: Value,
    ) -> SignalingResult<Vec<LinkZustellung>> {
        self.aushandlung_pruefen(von, verbindung, an)?;
        let weiterleitungen = self.link_mut(von, an).answer(von, an, sdp);
        Ok(self.zustellungen(weiterleitungen))
    }

    pub fn kandidat(
        &mut self,
        von: UserId,
        verbindung: ConnectionId,
        an: UserId,
        kandidat: Value,
    ) -> SignalingResult<Vec<LinkZustellung>> {
        self.aushandlung_pruefen(von, verbindung, an)?;
        let weiterleitungen = self.link_mut(von, an).kandidat(von, an, kandidat)?;
        Ok(self.zustellungen(weiterleitungen))
    }

    fn zustellungen(&self, weiterleitungen: Vec<Weiterleitung>) -> Vec<LinkZustellung> {
        weiterleitungen
            .into_iter()
            .filter_map(|w| {
                let verbindung = self.verbindung_von(&w.an)?;
                let inbound = WebRtcInbound {
                    conversation_id: self.conversation_id,
                    from_user_id: w.von,
                    data: match &w.relais {
                        Relais::Offer(v) | Relais::Answer(v) | Relais::Kandidat(v) => v.clone(),
                    },
                };
                let payload = match w.relais {
                    Relais::Offer(_) => SignalPayload::WebrtcOfferReceived(inbound),
                    Relais::Answer(_) => SignalPayload::WebrtcAnswerReceived(inbound),
                    Relais::Kandidat(_) => SignalPayload::WebrtcIceCandidateReceived(inbound),
                };
                Some(LinkZustellung { verbindung, payload })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Aufbau {
        session: CallSession,
        a: UserId,
        b: UserId,
        c: UserId,
        ca: ConnectionId,
        cb: ConnectionId,
    }

    fn aufbau() -> Aufbau {
        let a = UserId::new();
        let b = UserId::new();
        let c = UserId::new();
        let ca = ConnectionId::naechste();
        let cb = ConnectionId::naechste();
        let session = CallSession::neu(
            ConversationId::new(),
            a,
            ca,
            CallKind::Video,
            [b, c],
            Instant::now(),
        );
        Aufbau { session, a, b, c, ca, cb }
    }

    #[test]
    fn neue_session_klingelt() {
        let s = aufbau();
        assert_eq!(s.session.zustand(), AnrufZustand::Klingelt);
        assert_eq!(s.session.beigetretene(), vec![s.a]);
        assert_eq!(s.session.eingeladene().len(), 2);
    }

    #[test]
    fn annehmen_liefert_bisherige_teilnehmer() {
        let mut s = aufbau();
        let bisher = s.session.annehmen(s.b, s.cb).unwrap();
        assert_eq!(bisher, vec![s.a]);
        assert_eq!(s.session.zustand(), AnrufZustand::Verbindend);
        assert_eq!(s.session.verbindung_von(&s.b), Some(s.cb));
    }

    #[test]
    fn doppeltes_annehmen_nicht_gefunden() {
        let mut s = aufbau();
        s.session.annehmen(s.b, s.cb).unwrap();
        assert!(matches!(
            s.session.annehmen(s.b, s.cb),
            Err(SignalingError::NichtGefunden(_))
        ));
        assert!(s.session.ablehnen(s.a).is_err());
    }

    #[test]
    fn offer_answer_aktiviert_session() {
        let mut s = aufbau();
        s.session.annehmen(s.b, s.cb).unwrap();

        let aus = s.session.offer(s.b, s.cb, s.a, json!("o")).unwrap();
        assert_eq!(aus.len(), 1);
        assert_eq!(aus[0].verbindung, s.ca);
        assert!(matches!(aus[0].payload, SignalPayload::WebrtcOfferReceived(_)));

        let aus = s.session.answer(s.a, s.ca, s.b, json!("a")).unwrap();
        assert_eq!(aus[0].verbindung, s.cb);
        assert_eq!(s.session.zustand(), AnrufZustand::Aktiv);
    }

    #[test]
    fn aushandlung_mit_eingeladenem_nicht_gefunden() {
        let mut s = aufbau();
        // C ist nur eingeladen
        assert!(s.session.offer(s.a, s.ca, s.c, json!("o")).is_err());
        // Absender ueber fremde Verbindung
        assert!(s.session.offer(s.a, s.cb, s.b, json!("o")).is_err());
        // An sich selbst
        assert!(s.session.offer(s.a, s.ca, s.a, json!("o")).is_err());
        assert_eq!(s.session.link_anzahl(), 0);
    }

    #[test]
    fn verlassen_entfernt_links() {
        let mut s = aufbau();
        s.session.annehmen(s.b, s.cb).unwrap();
        s.session.offer(s.b, s.cb, s.a, json!("o")).unwrap();
        assert_eq!(s.session.link_anzahl(), 1);

        s.session.verlassen(&s.b);
        assert_eq!(s.session.link_anzahl(), 0);
        // A und C (eingeladen) bleiben: noch zwei Teilnehmer, A beigetreten
        assert!(!s.session.aufzuloesen());

        s.session.ablehnen(s.c).unwrap();
        assert!(s.session.aufzuloesen());
    }

    #[test]
    fn ueberfaellige_einladungen() {
        let s = aufbau();
        let spaeter = Instant::now() + Duration::from_secs(60);
        let mut faellig = s.session.ueberfaellige_einladungen(spaeter, Duration::from_secs(45));
        faellig.sort();
        let mut erwartet = vec![s.b, s.c];
        erwartet.sort();
        assert_eq!(faellig, erwartet);
        assert!(s
            .session
            .ueberfaellige_einladungen(Instant::now(), Duration::from_secs(45))
            .is_empty());
    }

    #[test]
    fn ehemaliger_tritt_wieder_bei() {
        let mut s = aufbau();
        s.session.annehmen(s.b, s.cb).unwrap();
        s.session.annehmen(s.c, ConnectionId::naechste()).unwrap();

        s.session.verlassen(&s.b);
        assert!(s.session.kann_wieder_beitreten(&s.b));
        assert!(!s.session.aufzuloesen());

        let neu = ConnectionId::naechste();
        let mut bisher = s.session.annehmen(s.b, neu).unwrap();
        bisher.sort();
        let mut erwartet = vec![s.a, s.c];
        erwartet.sort();
        assert_eq!(bisher, erwartet);
        assert_eq!(s.session.verbindung_von(&s.b), Some(neu));
        assert!(!s.session.kann_wieder_beitreten(&s.b));
        // Nur einmal pro Abgang
        assert!(s.session.annehmen(s.b, neu).is_err());
    }

    #[test]
    fn abgelehnter_kann_nicht_beitreten() {
        let mut s = aufbau();
        s.session.ablehnen(s.c).unwrap();
        assert!(!s.session.kann_wieder_beitreten(&s.c));
        assert!(matches!(
            s.session.annehmen(s.c, ConnectionId::naechste()),
            Err(SignalingError::NichtGefunden(_))
        ));
    }

    #[test]
    fn link_zuruecksetzen_stellt_puffer_wieder_her() {
        let mut s = aufbau();
        s.session.annehmen(s.b, s.cb).unwrap();
        s.session.kandidat(s.b, s.cb, s.a, json!("k1")).unwrap();

        let sicherung = s.session.link_sichern(s.b, s.a);
        let aus = s.session.offer(s.b, s.cb, s.a, json!("o")).unwrap();
        assert_eq!(aus.len(), 2);
        assert_eq!(s.session.link(s.a, s.b).unwrap().gepufferte_kandidaten(&s.b), 0);

        s.session.link_zuruecksetzen(s.b, s.a, sicherung);
        let link = s.session.link(s.a, s.b).unwrap();
        assert_eq!(link.gepufferte_kandidaten(&s.b), 1);
        assert_eq!(link.zustand(), LinkZustand::Ausstehend);

        // Ohne Sicherung verschwindet ein neu angelegter Link wieder
        s.session.link_zuruecksetzen(s.b, s.a, None);
        assert_eq!(s.session.link_anzahl(), 0);
    }

    #[test]
    fn kandidaten_limit_gilt_fuer_neue_links() {
        let mut s = aufbau();
        s.session = s.session.mit_kandidaten_limit(2);
        s.session.annehmen(s.b, s.cb).unwrap();
        s.session.kandidat(s.b, s.cb, s.a, json!(1)).unwrap();
        s.session.kandidat(s.b, s.cb, s.a, json!(2)).unwrap();
        assert!(matches!(
            s.session.kandidat(s.b, s.cb, s.a, json!(3)),
            Err(SignalingError::UngueltigeAnfrage(_))
        ));
    }
}
