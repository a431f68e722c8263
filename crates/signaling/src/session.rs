//! Session-Registry – Verbindung <-> Benutzer
//!
//! Haelt fuer jede offene Verbindung den gebundenen Benutzer (sofern
//! authentifiziert) und fuer jeden Benutzer die Menge seiner Verbindungen.
//! Ein Benutzer kann mehrere Verbindungen gleichzeitig halten (mehrere
//! Geraete oder Tabs).
//!
//! Presence-Kanten entstehen nur an den Uebergaengen 0 -> 1 und 1 -> 0
//! der Verbindungsanzahl eines Benutzers. Beide Uebergaenge werden unter
//! dem Eintrags-Lock des Benutzers berechnet.

use dashmap::DashMap;
use parley_auth::AuthProvider;
use parley_core::{ConnectionId, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{SignalingError, SignalingResult};

/// Ergebnis einer Aenderung der Verbindungsanzahl eines Benutzers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceKante {
    /// Erste Verbindung des Benutzers (0 -> 1)
    Online,
    /// Letzte Verbindung des Benutzers getrennt (1 -> 0)
    Offline,
    /// Zwischenzustand (weiteres Geraet), keine Meldung
    Keine,
}

/// Verbindungs- und Benutzertabelle
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<SessionRegistryInner>,
}

struct SessionRegistryInner {
    /// Alle offenen Verbindungen; `None` solange nicht authentifiziert
    verbindungen: DashMap<ConnectionId, Option<UserId>>,
    /// Benutzer -> alle gebundenen Verbindungen (nie leer)
    benutzer: DashMap<UserId, HashSet<ConnectionId>>,
    auth: Arc<dyn AuthProvider>,
    auth_timeout: Duration,
}

impl SessionRegistry {
    pub fn neu(auth: Arc<dyn AuthProvider>, auth_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(SessionRegistryInner {
                verbindungen: DashMap::new(),
                benutzer: DashMap::new(),
                auth,
                auth_timeout,
            }),
        }
    }

    /// Traegt eine neue, noch nicht authentifizierte Verbindung ein
    pub fn verbindung_registrieren(&self, verbindung: ConnectionId) {
        self.inner.verbindungen.insert(verbindung, None);
    }

    /// Prueft das Credential beim Provider und bindet den Benutzer
    ///
    /// Der Provider wird pro Aufruf genau einmal befragt. Ein zweiter
    /// Aufruf auf einer bereits gebundenen Verbindung wird abgelehnt,
    /// ohne den Provider zu kontaktieren.
    pub async fn authentifizieren(
        &self,
        verbindung: ConnectionId,
        token: &str,
    ) -> SignalingResult<(UserId, PresenceKante)> {
        match self.inner.verbindungen.get(&verbindung).map(|e| *e.value()) {
            None => return Err(SignalingError::intern("Verbindung nicht registriert")),
            Some(Some(_)) => return Err(SignalingError::BereitsAuthentifiziert),
            Some(None) => {}
        }

        let user_id = match tokio::time::timeout(
            self.inner.auth_timeout,
            self.inner.auth.benutzer_aufloesen(token),
        )
        .await
        {
            Ok(Ok(user_id)) => user_id,
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %verbindung, fehler = %e, "Credential abgelehnt");
                return Err(e.into());
            }
            Err(_) => return Err(SignalingError::Zeitlimit("Identity-Provider".into())),
        };

        let kante = self.binden(verbindung, user_id)?;
        Ok((user_id, kante))
    }

    /// Bindet einen bereits gepruften Benutzer an die Verbindung
    pub fn binden(&self, verbindung: ConnectionId, user_id: UserId) -> SignalingResult<PresenceKante> {
        {
            let mut eintrag = self
                .inner
                .verbindungen
                .get_mut(&verbindung)
                .ok_or_else(|| SignalingError::intern("Verbindung nicht registriert"))?;
            if eintrag.is_some() {
                return Err(SignalingError::BereitsAuthentifiziert);
            }
            *eintrag = Some(user_id);
        }

        let mut verbindungen = self.inner.benutzer.entry(user_id).or_default();
        verbindungen.insert(verbindung);
        let kante = if verbindungen.len() == 1 {
            PresenceKante::Online
        } else {
            PresenceKante::Keine
        };

        tracing::debug!(
            connection_id = %verbindung,
            user_id = %user_id,
            verbindungen = verbindungen.len(),
            "Verbindung gebunden"
        );
        Ok(kante)
    }

    /// Loest die Benutzerbindung, die Verbindung bleibt offen (Logout)
    pub fn entbinden(&self, verbindung: ConnectionId) -> Option<(UserId, PresenceKante)> {
        let user_id = {
            let mut eintrag = self.inner.verbindungen.get_mut(&verbindung)?;
            eintrag.take()?
        };
        Some((user_id, self.benutzer_verbindung_loesen(user_id, verbindung)))
    }

    /// Entfernt eine Verbindung vollstaendig
    ///
    /// Idempotent: ein zweiter Aufruf gibt `None` zurueck.
    pub fn entfernen(&self, verbindung: ConnectionId) -> Option<(Option<UserId>, PresenceKante)> {
        let (_, user_id) = self.inner.verbindungen.remove(&verbindung)?;
        let kante = match user_id {
            Some(uid) => self.benutzer_verbindung_loesen(uid, verbindung),
            None => PresenceKante::Keine,
        };
        Some((user_id, kante))
    }

    fn benutzer_verbindung_loesen(&self, user_id: UserId, verbindung: ConnectionId) -> PresenceKante {
        let mut offline = false;
        self.inner.benutzer.remove_if_mut(&user_id, |_, verbindungen| {
            let entfernt = verbindungen.remove(&verbindung);
            offline = entfernt && verbindungen.is_empty();
            verbindungen.is_empty()
        });
        if offline {
            PresenceKante::Offline
        } else {
            PresenceKante::Keine
        }
    }

    /// Gebundener Benutzer einer Verbindung
    pub fn benutzer_von(&self, verbindung: ConnectionId) -> Option<UserId> {
        self.inner.verbindungen.get(&verbindung).and_then(|e| *e.value())
    }

    /// Alle Verbindungen eines Benutzers
    pub fn verbindungen_von(&self, user_id: &UserId) -> Vec<ConnectionId> {
        self.inner
            .benutzer
            .get(user_id)
            .map(|v| v.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn ist_online(&self, user_id: &UserId) -> bool {
        self.inner.benutzer.contains_key(user_id)
    }

    /// Alle Benutzer mit mindestens einer Verbindung
    pub fn online_benutzer(&self) -> Vec<UserId> {
        self.inner.benutzer.iter().map(|e| *e.key()).collect()
    }

    /// Alle authentifizierten Verbindungen
    pub fn authentifizierte_verbindungen(&self) -> Vec<ConnectionId> {
        self.inner
            .verbindungen
            .iter()
            .filter(|e| e.value().is_some())
            .map(|e| *e.key())
            .collect()
    }

    /// Anzahl offener Verbindungen (auch nicht authentifizierte)
    pub fn verbindungs_anzahl(&self) -> usize {
        self.inner.verbindungen.len()
    }
}
