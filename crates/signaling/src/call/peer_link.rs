//! Peer-Links – Offer/Answer/ICE-Aushandlung zwischen zwei Teilnehmern
//!
//! Im Mesh haelt jedes Teilnehmerpaar genau einen Link, Schluessel ist
//! das ungeordnete Paar. Der Server interpretiert SDP und Kandidaten nie,
//! er ordnet nur ihre Zustellung.
//!
//! ## Richtungen
//! Jeder Link hat zwei Richtungen (X -> Y und Y -> X). Ein Kandidat von X
//! an Y wird erst zugestellt, nachdem Y eine Beschreibung von X erhalten
//! hat (Offer oder Answer). Bis dahin liegt er in der Warteschlange dieser
//! Richtung und wird direkt nach der Beschreibung in Ankunftsreihenfolge
//! nachgereicht.
//!
//! Offene Offers werden ebenfalls pro Richtung gefuehrt. Eine Answer von Y
//! an X geht sofort raus, sobald X je ein Offer an Y geschickt hat. Das
//! deckt Glare ab: bieten beide Seiten gleichzeitig an und nimmt eine ihr
//! Offer zurueck, erreicht ihre Answer trotzdem die andere Seite.
//!
//! ## Zustaende
//! ```text
//! Ausstehend --offer--> Angeboten --answer--> Aktiv
//!                           ^                   |
//!                           +------offer--------+   (Neuverhandlung)
//! ```

use parley_core::UserId;
use serde_json::Value;
use std::collections::VecDeque;

use crate::error::{SignalingError, SignalingResult};

/// Obergrenze gepufferter Kandidaten pro Richtung
///
/// Der Koordinator senkt sie unter die Groesse der Send-Queues, damit eine
/// Beschreibung samt Warteschlange immer in eine leere Queue passt.
pub const MAX_GEPUFFERTE_KANDIDATEN: usize = 256;

/// Ungeordnetes Benutzerpaar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkSchluessel(UserId, UserId);

impl LinkSchluessel {
    pub fn neu(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }

    pub fn enthaelt(&self, user_id: &UserId) -> bool {
        self.0 == *user_id || self.1 == *user_id
    }

    pub fn benutzer(&self) -> (UserId, UserId) {
        (self.0, self.1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkZustand {
    /// Angelegt durch einen fruehen Kandidaten oder eine fruehe Answer
    Ausstehend,
    /// Offer zugestellt, Answer steht aus
    Angeboten,
    /// Answer zugestellt
    Aktiv,
}

/// Art einer weitergeleiteten Nachricht
#[derive(Debug, Clone, PartialEq)]
pub enum Relais {
    Offer(Value),
    Answer(Value),
    Kandidat(Value),
}

/// Eine Zustellung von `von` an `an`
#[derive(Debug, Clone, PartialEq)]
pub struct Weiterleitung {
    pub von: UserId,
    pub an: UserId,
    pub relais: Relais,
}

#[derive(Debug, Clone, Default)]
struct Richtung {
    /// Empfaenger hat eine Beschreibung des Absenders erhalten
    beschreibung_zugestellt: bool,
    /// Absender hat mindestens ein Offer geschickt
    offer_gesendet: bool,
    /// Letztes Offer des Absenders ist noch unbeantwortet
    offer_offen: bool,
    kandidaten: VecDeque<Value>,
    /// Answer des Absenders, die vor jedem Offer des Partners eintraf
    wartende_answer: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct PeerLink {
    schluessel: LinkSchluessel,
    zustand: LinkZustand,
    max_kandidaten: usize,
    /// [0]: schluessel.0 -> schluessel.1, [1]: umgekehrt
    richtungen: [Richtung; 2],
}

impl PeerLink {
    pub fn neu(schluessel: LinkSchluessel, max_kandidaten: usize) -> Self {
        Self {
            schluessel,
            zustand: LinkZustand::Ausstehend,
            max_kandidaten,
            richtungen: [Richtung::default(), Richtung::default()],
        }
    }

    fn index(&self, von: &UserId) -> usize {
        if *von == self.schluessel.0 {
            0
        } else {
            1
        }
    }

    pub fn schluessel(&self) -> LinkSchluessel {
        self.schluessel
    }

    pub fn zustand(&self) -> LinkZustand {
        self.zustand
    }

    /// `true` solange das letzte Offer von `von` unbeantwortet ist
    pub fn offer_offen(&self, von: &UserId) -> bool {
        self.richtungen[self.index(von)].offer_offen
    }

    /// Anzahl wartender Kandidaten von `von` an den Partner
    pub fn gepufferte_kandidaten(&self, von: &UserId) -> usize {
        self.richtungen[self.index(von)].kandidaten.len()
    }

    /// Leitet ein Offer weiter und gibt alle dadurch faelligen Zustellungen zurueck
    pub fn offer(&mut self, von: UserId, an: UserId, sdp: Value) -> Vec<Weiterleitung> {
        let idx = self.index(&von);
        self.richtungen[idx].offer_gesendet = true;
        self.richtungen[idx].offer_offen = true;
        self.zustand = LinkZustand::Angeboten;

        let mut aus = vec![Weiterleitung {
            von,
            an,
            relais: Relais::Offer(sdp),
        }];
        aus.extend(self.beschreibung_zugestellt(von, an));

        // Eine vorzeitige Answer des Partners wird jetzt faellig
        let gegen = self.index(&an);
        if let Some(answer) = self.richtungen[gegen].wartende_answer.take() {
            aus.extend(self.answer_zustellen(an, von, answer));
        }
        aus
    }

    /// Leitet eine Answer von `von` auf ein Offer von `an` weiter
    ///
    /// Hat `an` noch nie ein Offer geschickt, wird die Answer bis dahin gepuffert.
    pub fn answer(&mut self, von: UserId, an: UserId, sdp: Value) -> Vec<Weiterleitung> {
        let gegen = &self.richtungen[self.index(&an)];
        if gegen.offer_gesendet {
            if !gegen.offer_offen {
                tracing::debug!(von = %von, an = %an, "Answer ohne offenes Offer weitergeleitet");
            }
            return self.answer_zustellen(von, an, sdp);
        }
        let idx = self.index(&von);
        self.richtungen[idx].wartende_answer = Some(sdp);
        tracing::debug!(von = %von, an = %an, "Answer vor Offer – gepuffert");
        Vec::new()
    }

    /// Leitet einen Kandidaten weiter oder puffert ihn
    pub fn kandidat(
        &mut self,
        von: UserId,
        an: UserId,
        kandidat: Value,
    ) -> SignalingResult<Vec<Weiterleitung>> {
        let idx = self.index(&von);
        let richtung = &mut self.richtungen[idx];
        if richtung.beschreibung_zugestellt {
            return Ok(vec![Weiterleitung {
                von,
                an,
                relais: Relais::Kandidat(kandidat),
            }]);
        }
        if richtung.kandidaten.len() >= self.max_kandidaten {
            return Err(SignalingError::ungueltig(
                "Zu viele ICE-Kandidaten vor der Session-Beschreibung",
            ));
        }
        richtung.kandidaten.push_back(kandidat);
        Ok(Vec::new())
    }

    fn answer_zustellen(&mut self, von: UserId, an: UserId, sdp: Value) -> Vec<Weiterleitung> {
        let gegen = self.index(&an);
        self.richtungen[gegen].offer_offen = false;
        self.zustand = LinkZustand::Aktiv;
        let mut aus = vec![Weiterleitung {
            von,
            an,
            relais: Relais::Answer(sdp),
        }];
        aus.extend(self.beschreibung_zugestellt(von, an));
        aus
    }

    /// Markiert die Richtung `von -> an` und leert ihre Warteschlange
    fn beschreibung_zugestellt(&mut self, von: UserId, an: UserId) -> Vec<Weiterleitung> {
        let idx = self.index(&von);
        let richtung = &mut self.richtungen[idx];
        richtung.beschreibung_zugestellt = true;
        richtung
            .kandidaten
            .drain(..)
            .map(|kandidat| Weiterleitung {
                von,
                an,
                relais: Relais::Kandidat(kandidat),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paar() -> (UserId, UserId, PeerLink) {
        let a = UserId::new();
        let b = UserId::new();
        (a, b, PeerLink::neu(LinkSchluessel::neu(a, b), MAX_GEPUFFERTE_KANDIDATEN))
    }

    #[test]
    fn schluessel_ist_ungeordnet() {
        let a = UserId::new();
        let b = UserId::new();
        assert_eq!(LinkSchluessel::neu(a, b), LinkSchluessel::neu(b, a));
        assert!(LinkSchluessel::neu(a, b).enthaelt(&b));
    }

    #[test]
    fn kandidaten_vor_offer_folgen_dem_offer_in_reihenfolge() {
        let (a, b, mut link) = paar();
        for i in 0..3 {
            assert!(link.kandidat(a, b, json!(i)).unwrap().is_empty());
        }
        assert_eq!(link.gepufferte_kandidaten(&a), 3);

        let aus = link.offer(a, b, json!("sdp-offer"));
        assert_eq!(aus.len(), 4);
        assert_eq!(aus[0].relais, Relais::Offer(json!("sdp-offer")));
        for (i, w) in aus[1..].iter().enumerate() {
            assert_eq!(w.relais, Relais::Kandidat(json!(i)));
            assert_eq!((w.von, w.an), (a, b));
        }
        assert_eq!(link.gepufferte_kandidaten(&a), 0);
        assert_eq!(link.zustand(), LinkZustand::Angeboten);
    }

    #[test]
    fn kandidaten_des_antwortenden_warten_auf_answer() {
        let (a, b, mut link) = paar();
        link.offer(a, b, json!("o"));
        // B schickt Kandidaten bevor A die Answer hat
        assert!(link.kandidat(b, a, json!("b1")).unwrap().is_empty());
        // A schickt Kandidaten, B hat A's Offer schon
        assert_eq!(link.kandidat(a, b, json!("a1")).unwrap().len(), 1);

        let aus = link.answer(b, a, json!("ans"));
        assert_eq!(aus.len(), 2);
        assert_eq!(aus[0].relais, Relais::Answer(json!("ans")));
        assert_eq!(aus[1].relais, Relais::Kandidat(json!("b1")));
        assert_eq!(link.zustand(), LinkZustand::Aktiv);
    }

    #[test]
    fn answer_vor_offer_wird_gepuffert() {
        let (a, b, mut link) = paar();
        assert!(link.answer(b, a, json!("ans")).is_empty());
        assert_eq!(link.zustand(), LinkZustand::Ausstehend);

        let aus = link.offer(a, b, json!("o"));
        let arten: Vec<_> = aus.iter().map(|w| w.relais.clone()).collect();
        assert_eq!(arten, vec![Relais::Offer(json!("o")), Relais::Answer(json!("ans"))]);
        assert_eq!(aus[1].an, a);
        assert_eq!(link.zustand(), LinkZustand::Aktiv);
    }

    #[test]
    fn neuverhandlung_behaelt_beschreibungen() {
        let (a, b, mut link) = paar();
        link.offer(a, b, json!("o1"));
        link.answer(b, a, json!("a1"));

        link.offer(a, b, json!("o2"));
        assert_eq!(link.zustand(), LinkZustand::Angeboten);
        // Kandidaten beider Richtungen fliessen weiter direkt
        assert_eq!(link.kandidat(b, a, json!("k")).unwrap().len(), 1);
        assert_eq!(link.kandidat(a, b, json!("k")).unwrap().len(), 1);
    }

    #[test]
    fn puffer_ist_begrenzt() {
        let a = UserId::new();
        let b = UserId::new();
        let mut link = PeerLink::neu(LinkSchluessel::neu(a, b), 4);
        for i in 0..4 {
            link.kandidat(a, b, json!(i)).unwrap();
        }
        assert!(link.kandidat(a, b, json!("zu viel")).is_err());
        assert_eq!(link.gepufferte_kandidaten(&a), 4);
        // Die Gegenrichtung hat ihr eigenes Limit
        assert!(link.kandidat(b, a, json!("b1")).is_ok());
    }

    #[test]
    fn glare_answer_erreicht_den_anbieter() {
        let (a, b, mut link) = paar();
        link.offer(a, b, json!("o1"));
        link.answer(b, a, json!("a1"));

        // Beide bieten gleichzeitig neu an, B nimmt sein Offer zurueck
        link.offer(a, b, json!("o2"));
        link.offer(b, a, json!("o3"));
        let aus = link.answer(b, a, json!("a2"));

        assert_eq!(aus.len(), 1);
        assert_eq!(aus[0].relais, Relais::Answer(json!("a2")));
        assert_eq!((aus[0].von, aus[0].an), (b, a));
        assert_eq!(link.zustand(), LinkZustand::Aktiv);
        assert!(!link.offer_offen(&a));
        // Das zurueckgenommene Offer von B bleibt offen
        assert!(link.offer_offen(&b));

        // Ein spaeteres Offer bringt keine alte Answer mit
        let aus = link.offer(a, b, json!("o4"));
        assert_eq!(aus, vec![Weiterleitung { von: a, an: b, relais: Relais::Offer(json!("o4")) }]);
    }

    #[test]
    fn answer_in_beide_richtungen() {
        let (a, b, mut link) = paar();
        link.offer(a, b, json!("o1"));
        assert_eq!(link.answer(b, a, json!("a1")).len(), 1);

        // B verhandelt neu, A antwortet
        link.offer(b, a, json!("o2"));
        assert!(link.offer_offen(&b));
        let aus = link.answer(a, b, json!("a2"));
        assert_eq!(aus.len(), 1);
        assert_eq!(aus[0].an, b);
        assert!(!link.offer_offen(&b));
    }
}
