//! Raum-Index – Welche Verbindung hoert welche Konversation
//!
//! Ein Raum entspricht genau einer Konversation. Mitglieder sind
//! Verbindungen, nicht Benutzer: zwei Tabs desselben Benutzers treten
//! unabhaengig voneinander bei.
//!
//! Beide Richtungen werden gefuehrt (Raum -> Verbindungen und
//! Verbindung -> Raeume), damit das Trennen ohne vollstaendigen Scan
//! auskommt. Es wird nie mehr als ein DashMap-Guard gleichzeitig gehalten.

use dashmap::DashMap;
use parley_core::{ConnectionId, ConversationId};
use std::collections::HashSet;
use std::sync::Arc;

/// Raum-Mitgliedschaften aller Verbindungen
///
/// Clone teilt den inneren Zustand.
#[derive(Clone, Default)]
pub struct RoomIndex {
    inner: Arc<RoomIndexInner>,
}

#[derive(Default)]
struct RoomIndexInner {
    raeume: DashMap<ConversationId, HashSet<ConnectionId>>,
    mitgliedschaften: DashMap<ConnectionId, HashSet<ConversationId>>,
}

impl RoomIndex {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Tritt einem Raum bei
    ///
    /// Gibt `false` zurueck wenn die Verbindung bereits Mitglied war.
    pub fn beitreten(&self, verbindung: ConnectionId, raum: ConversationId) -> bool {
        let neu = self.inner.raeume.entry(raum).or_default().insert(verbindung);
        if neu {
            self.inner
                .mitgliedschaften
                .entry(verbindung)
                .or_default()
                .insert(raum);
        }
        neu
    }

    /// Verlaesst einen Raum
    ///
    /// Gibt `false` zurueck wenn die Verbindung kein Mitglied war.
    pub fn verlassen(&self, verbindung: ConnectionId, raum: ConversationId) -> bool {
        let mut entfernt = false;
        self.inner.raeume.remove_if_mut(&raum, |_, mitglieder| {
            entfernt = mitglieder.remove(&verbindung);
            mitglieder.is_empty()
        });
        if entfernt {
            self.inner
                .mitgliedschaften
                .remove_if_mut(&verbindung, |_, raeume| {
                    raeume.remove(&raum);
                    raeume.is_empty()
                });
        }
        entfernt
    }

    /// Entfernt die Verbindung aus allen Raeumen
    ///
    /// Gibt die verlassenen Raeume zurueck.
    pub fn alle_verlassen(&self, verbindung: ConnectionId) -> Vec<ConversationId> {
        let raeume: Vec<ConversationId> = match self.inner.mitgliedschaften.remove(&verbindung) {
            Some((_, raeume)) => raeume.into_iter().collect(),
            None => return Vec::new(),
        };
        for raum in &raeume {
            self.inner.raeume.remove_if_mut(raum, |_, mitglieder| {
                mitglieder.remove(&verbindung);
                mitglieder.is_empty()
            });
        }
        raeume
    }

    /// Momentaufnahme der Mitglieder eines Raums
    pub fn mitglieder(&self, raum: &ConversationId) -> Vec<ConnectionId> {
        self.inner
            .raeume
            .get(raum)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Raeume, denen die Verbindung angehoert
    pub fn raeume_von(&self, verbindung: ConnectionId) -> Vec<ConversationId> {
        self.inner
            .mitgliedschaften
            .get(&verbindung)
            .map(|r| r.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn ist_mitglied(&self, verbindung: ConnectionId, raum: &ConversationId) -> bool {
        self.inner
            .raeume
            .get(raum)
            .map(|m| m.contains(&verbindung))
            .unwrap_or(false)
    }

    /// Alle Raeume mit mindestens einem Mitglied
    pub fn aktive_raeume(&self) -> Vec<ConversationId> {
        self.inner.raeume.iter().map(|e| *e.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beitreten_ist_idempotent() {
        let index = RoomIndex::neu();
        let conn = ConnectionId::naechste();
        let raum = ConversationId::new();

        assert!(index.beitreten(conn, raum));
        assert!(!index.beitreten(conn, raum));
        assert_eq!(index.mitglieder(&raum), vec![conn]);
    }

    #[test]
    fn verlassen_ohne_beitritt_kein_fehler() {
        let index = RoomIndex::neu();
        assert!(!index.verlassen(ConnectionId::naechste(), ConversationId::new()));
    }

    #[test]
    fn leere_raeume_werden_entfernt() {
        let index = RoomIndex::neu();
        let conn = ConnectionId::naechste();
        let raum = ConversationId::new();

        index.beitreten(conn, raum);
        assert!(index.verlassen(conn, raum));
        assert!(index.aktive_raeume().is_empty());
        assert!(index.raeume_von(conn).is_empty());
    }

    #[test]
    fn alle_verlassen_raeumt_beide_richtungen_auf() {
        let index = RoomIndex::neu();
        let c1 = ConnectionId::naechste();
        let c2 = ConnectionId::naechste();
        let r1 = ConversationId::new();
        let r2 = ConversationId::new();

        index.beitreten(c1, r1);
        index.beitreten(c1, r2);
        index.beitreten(c2, r1);

        let mut verlassen = index.alle_verlassen(c1);
        verlassen.sort();
        let mut erwartet = vec![r1, r2];
        erwartet.sort();
        assert_eq!(verlassen, erwartet);

        assert_eq!(index.mitglieder(&r1), vec![c2]);
        assert!(index.mitglieder(&r2).is_empty());
        assert!(index.alle_verlassen(c1).is_empty());
    }
}
