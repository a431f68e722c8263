//! Presence-Tracker – Online/Offline-Meldungen
//!
//! Meldet nur Kanten: die erste Verbindung eines Benutzers erzeugt genau
//! ein `user_online`, das Trennen der letzten genau ein `user_offline`.
//! Weitere Geraete desselben Benutzers aendern nichts an der Presence.
//!
//! Wer die Meldung erhaelt, bestimmt `PresencePublikum`:
//! - `AllAuthenticated`: jede authentifizierte Verbindung ausser denen des Benutzers
//! - `SharedConversations`: Verbindungen in Raeumen, deren Konversation
//!   den Benutzer als Teilnehmer fuehrt

use parley_core::{ConnectionId, UserId};
use parley_protocol::{SignalMessage, SignalPayload};
use parley_store::ConversationStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::broadcast::EventRouter;
use crate::error::store_aufruf;
use crate::rooms::RoomIndex;
use crate::server_state::PresencePublikum;
use crate::session::{PresenceKante, SessionRegistry};

#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<PresenceTrackerInner>,
}

struct PresenceTrackerInner {
    publikum: PresencePublikum,
    sitzungen: SessionRegistry,
    raeume: RoomIndex,
    router: EventRouter,
    konversationen: Arc<dyn ConversationStore>,
    store_timeout: Duration,
}

impl PresenceTracker {
    pub fn neu(
        publikum: PresencePublikum,
        sitzungen: SessionRegistry,
        raeume: RoomIndex,
        router: EventRouter,
        konversationen: Arc<dyn ConversationStore>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PresenceTrackerInner {
                publikum,
                sitzungen,
                raeume,
                router,
                konversationen,
                store_timeout,
            }),
        }
    }

    /// Verteilt eine Presence-Kante an das konfigurierte Publikum
    ///
    /// `PresenceKante::Keine` wird ignoriert.
    pub async fn kante_melden(&self, user_id: UserId, kante: PresenceKante) {
        let payload = match kante {
            PresenceKante::Online => SignalPayload::UserOnline { user_id },
            PresenceKante::Offline => SignalPayload::UserOffline { user_id },
            PresenceKante::Keine => return,
        };

        let gesendet = match self.inner.publikum {
            PresencePublikum::AllAuthenticated => self
                .inner
                .router
                .an_alle_authentifizierten_senden(SignalMessage::push(payload), Some(user_id)),
            PresencePublikum::SharedConversations => {
                let ziele = self.gemeinsame_verbindungen(user_id).await;
                self.inner
                    .router
                    .an_verbindungen_senden(ziele, SignalMessage::push(payload))
            }
        };

        tracing::info!(
            user_id = %user_id,
            kante = ?kante,
            empfaenger = gesendet,
            "Presence-Kante gemeldet"
        );
    }

    /// Verbindungen, die mit dem Benutzer einen Raum teilen
    ///
    /// Nicht erreichbare Konversationen werden uebersprungen; eine
    /// Presence-Meldung ist nie den Ausfall einer Verbindung wert.
    async fn gemeinsame_verbindungen(&self, user_id: UserId) -> Vec<ConnectionId> {
        let eigene: HashSet<ConnectionId> =
            self.inner.sitzungen.verbindungen_von(&user_id).into_iter().collect();
        let mut ziele = HashSet::new();

        for raum in self.inner.raeume.aktive_raeume() {
            let teilnehmer = match store_aufruf(
                self.inner.store_timeout,
                "teilnehmer_auflisten",
                self.inner.konversationen.teilnehmer_auflisten(raum),
            )
            .await
            {
                Ok(t) => t,
                Err(e) => {
                    tracing::debug!(conversation_id = %raum, fehler = %e, "Raum fuer Presence uebersprungen");
                    continue;
                }
            };
            if teilnehmer.contains(&user_id) {
                ziele.extend(
                    self.inner
                        .raeume
                        .mitglieder(&raum)
                        .into_iter()
                        .filter(|c| !eigene.contains(c)),
                );
            }
        }

        ziele.into_iter().collect()
    }

    /// Online-Status einer Benutzerliste (fuer `presence_query`)
    pub fn online_filtern(&self, user_ids: &[UserId]) -> Vec<UserId> {
        user_ids
            .iter()
            .filter(|uid| self.inner.sitzungen.ist_online(uid))
            .copied()
            .collect()
    }

    pub fn online_anzahl(&self) -> usize {
        self.inner.sitzungen.online_benutzer().len()
    }
}
